//! Plan (de)serialization (§4.14/§6 Module N).
//!
//! Plans round-trip through YAML. Parsing does a pre-pass over the raw
//! [`serde_yaml::Value`] to normalise alternate keys (`planName` → `name`,
//! a step's `command` → `tool`) and drop a step's `label` key entirely
//! before handing off to `serde_yaml`'s typed deserializer — `Step`'s
//! `#[serde(flatten)]` field then picks up every remaining step key as a
//! parameter automatically.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_yaml::Mapping;

use crate::error::AuthoringError;

/// An ordered, serialisable list of tool invocations replayable against a
/// device (§3, §6). Steps are immutable once serialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<String>,
    #[serde(default, rename = "appId", skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    pub steps: Vec<Step>,
}

/// A single recorded tool invocation. Every YAML key besides `tool` (and a
/// dropped `label`) folds into `params` via `#[serde(flatten)]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub tool: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

/// Parses a YAML plan document, normalising `planName`/`command` and
/// dropping any `label` keys before typed deserialization (§4.14).
pub fn parse(yaml: &str) -> Result<Plan, AuthoringError> {
    let raw: serde_yaml::Value =
        serde_yaml::from_str(yaml).map_err(|e| AuthoringError::PlanParse(e.to_string()))?;
    let normalized = normalize(raw);
    serde_yaml::from_value(normalized).map_err(|e| AuthoringError::PlanParse(e.to_string()))
}

/// Serialises a plan back to YAML.
pub fn serialize(plan: &Plan) -> Result<String, AuthoringError> {
    serde_yaml::to_string(plan).map_err(|e| AuthoringError::PlanSerialize(e.to_string()))
}

fn normalize(mut value: serde_yaml::Value) -> serde_yaml::Value {
    if let serde_yaml::Value::Mapping(top) = &mut value {
        rename_key(top, "planName", "name");
        if let Some(serde_yaml::Value::Sequence(steps)) = top.get_mut("steps") {
            for step in steps.iter_mut() {
                if let serde_yaml::Value::Mapping(step_map) = step {
                    rename_key(step_map, "command", "tool");
                    step_map.remove(serde_yaml::Value::String("label".to_string()));
                }
            }
        }
    }
    value
}

fn rename_key(map: &mut Mapping, from: &str, to: &str) {
    let from_key = serde_yaml::Value::String(from.to_string());
    if let Some(value) = map.remove(&from_key) {
        map.insert(serde_yaml::Value::String(to.to_string()), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_plan() {
        let yaml = "name: foo\nsteps: []\n";
        let plan = parse(yaml).unwrap();
        assert_eq!(plan.name, "foo");
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn normalises_plan_name_and_step_command_alias() {
        let yaml = "planName: bar\nsteps:\n  - command: tapOn\n    x: 100\n    y: 200\n";
        let plan = parse(yaml).unwrap();
        assert_eq!(plan.name, "bar");
        assert_eq!(plan.steps[0].tool, "tapOn");
        assert_eq!(plan.steps[0].params.get("x").unwrap(), 100);
    }

    #[test]
    fn drops_step_label_key() {
        let yaml = "name: bar\nsteps:\n  - tool: tapOn\n    label: my step\n    x: 1\n";
        let plan = parse(yaml).unwrap();
        assert!(!plan.steps[0].params.contains_key("label"));
        assert!(plan.steps[0].params.contains_key("x"));
    }

    #[test]
    fn round_trips_modulo_normalisation() {
        let plan = Plan {
            name: "session".into(),
            description: Some("desc".into()),
            generated: Some("2026-01-01T00:00:00Z".into()),
            app_id: Some("com.example".into()),
            metadata: Map::new(),
            steps: vec![Step {
                tool: "tapOn".into(),
                params: {
                    let mut m = Map::new();
                    m.insert("x".into(), Value::from(100));
                    m
                },
            }],
        };
        let yaml = serialize(&plan).unwrap();
        let reparsed = parse(&yaml).unwrap();
        assert_eq!(plan, reparsed);
    }
}

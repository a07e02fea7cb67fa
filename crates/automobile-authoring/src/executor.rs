//! Plan Executor (§4.14 Module N).

use std::sync::Arc;

use automobile_registry::ToolRegistry;
use serde::{Deserialize, Serialize};

use crate::error::AuthoringError;
use crate::plan::Plan;

/// One step's failure locus, recorded when execution stops early (§4.14).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedStep {
    pub step_index: usize,
    pub tool: String,
    pub error: String,
}

/// Result of replaying a plan through the tool registry (§4.14).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub executed_steps: usize,
    pub total_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<FailedStep>,
}

/// Replays a plan's steps through the tool registry in order (§4.14).
pub struct PlanExecutor {
    registry: Arc<ToolRegistry>,
}

impl PlanExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Executes `plan` starting from `start_step` (inclusive). Stops at the
    /// first step whose response has `success: false`; zero-step plans (or
    /// a `start_step` equal to the total) succeed vacuously.
    pub async fn execute(
        &self,
        plan: &Plan,
        start_step: usize,
        device_id: Option<&str>,
    ) -> Result<ExecutionResult, AuthoringError> {
        let total_steps = plan.steps.len();
        if start_step > total_steps {
            return Err(AuthoringError::OutOfBounds {
                start: start_step,
                total: total_steps,
            });
        }

        let mut executed_steps = 0;
        for (index, step) in plan.steps.iter().enumerate().skip(start_step) {
            let params = serde_json::Value::Object(step.params.clone());
            let response = self.registry.call(&step.tool, params, device_id).await;
            if !response.success {
                return Ok(ExecutionResult {
                    success: false,
                    executed_steps,
                    total_steps,
                    failed_step: Some(FailedStep {
                        step_index: index,
                        tool: step.tool.clone(),
                        error: response.error.unwrap_or_default(),
                    }),
                });
            }
            executed_steps += 1;
        }

        Ok(ExecutionResult {
            success: true,
            executed_steps,
            total_steps,
            failed_step: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Step;
    use async_trait::async_trait;
    use automobile_registry::ToolHandler;
    use serde_json::{Map, Value};

    struct AlwaysOk;

    #[async_trait]
    impl ToolHandler for AlwaysOk {
        async fn handle(&self, params: Value) -> Result<Value, String> {
            Ok(params)
        }
    }

    fn any_schema() -> Value {
        serde_json::json!({ "type": "object" })
    }

    fn plan_with(tools: &[&str]) -> Plan {
        Plan {
            name: "p".into(),
            description: None,
            generated: None,
            app_id: None,
            metadata: Map::new(),
            steps: tools
                .iter()
                .map(|t| Step {
                    tool: t.to_string(),
                    params: Map::new(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn zero_step_plan_succeeds_vacuously() {
        let registry = Arc::new(ToolRegistry::new(None));
        let executor = PlanExecutor::new(registry);
        let result = executor.execute(&plan_with(&[]), 0, None).await.unwrap();
        assert!(result.success);
        assert_eq!(result.total_steps, 0);
    }

    #[tokio::test]
    async fn out_of_bounds_start_step_fails() {
        let registry = Arc::new(ToolRegistry::new(None));
        let executor = PlanExecutor::new(registry);
        let err = executor
            .execute(&plan_with(&["tapOn"]), 5, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthoringError::OutOfBounds { .. }));
    }

    #[tokio::test]
    async fn step_failure_stops_and_records_locus() {
        let registry = Arc::new(ToolRegistry::new(None));
        registry
            .register("tapOn", any_schema(), Arc::new(AlwaysOk))
            .unwrap();
        let executor = PlanExecutor::new(registry);

        let result = executor
            .execute(&plan_with(&["tapOn", "doesNotExist"]), 0, None)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.executed_steps, 1);
        assert_eq!(result.total_steps, 2);
        assert_eq!(result.failed_step.unwrap().step_index, 1);
    }
}

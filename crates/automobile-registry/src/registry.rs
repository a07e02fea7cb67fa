//! Tool Registry & Executor (§4.12 Module L).
//!
//! Tools are registered dynamically (there is no fixed compile-time tool
//! table, since authoring sessions and platform drivers each contribute their
//! own set) so each registration compiles its own [`jsonschema::JSONSchema`]
//! validator up front rather than validating against a raw [`Value`] on every
//! call.
//!
//! L needs to both record successful and failed calls into the active test
//! authoring session (module M) and ask the lifecycle monitor (module K) to
//! re-check for app launches/terminations after every call, but taking a
//! concrete dependency on `automobile-authoring` would create the same
//! registry/authoring cycle spec.md §9 calls out between K and M. The fix is
//! the same shape: L depends only on the [`ToolCallRecorder`] trait object,
//! and `automobile-authoring`'s `AuthoringManager` is the thing that
//! implements it, wired together at the composition root (`automobile-cli`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use async_trait::async_trait;
use automobile_events::LifecycleMonitor;
use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

use crate::error::RegistryError;

/// Implemented by any tool's business logic. Handlers report failures as a
/// plain message; `ToolRegistry` wraps it into [`RegistryError::ToolFailure`]
/// and a failed [`ToolResponse`] rather than propagating a typed error,
/// since tool failures are data the caller inspects, not a crash.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, params: Value) -> Result<Value, String>;
}

/// Receives every completed tool call so an active test authoring session
/// can append it to the plan under construction (§4.13). A registry with no
/// recorder attached simply drops calls on the floor.
pub trait ToolCallRecorder: Send + Sync {
    fn record(&self, entry: ToolCallLogEntry);
}

/// The uniform envelope every tool call resolves to, whether it succeeded,
/// was rejected for bad params, or the handler itself failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// One entry in a test authoring session's call log (§4.13 `ToolCallLogEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallLogEntry {
    pub timestamp: String,
    pub tool: String,
    pub params: Value,
    pub result: ToolResponse,
}

struct RegisteredTool {
    schema: Arc<Value>,
    compiled: Arc<JSONSchema>,
    handler: Arc<dyn ToolHandler>,
}

impl Clone for RegisteredTool {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            compiled: Arc::clone(&self.compiled),
            handler: Arc::clone(&self.handler),
        }
    }
}

/// Dispatches named, schema-validated tool calls to their registered
/// handlers, recording each completed call and nudging the lifecycle monitor
/// afterward (§4.12).
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
    recorder: StdMutex<Option<Arc<dyn ToolCallRecorder>>>,
    lifecycle: Option<Arc<LifecycleMonitor>>,
}

impl ToolRegistry {
    pub fn new(lifecycle: Option<Arc<LifecycleMonitor>>) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            recorder: StdMutex::new(None),
            lifecycle,
        }
    }

    /// Wires (or clears, with `None`) the session that receives completed
    /// calls. `automobile-cli`'s composition root calls this whenever a test
    /// authoring session starts or stops.
    pub fn set_recorder(&self, recorder: Option<Arc<dyn ToolCallRecorder>>) {
        *self.recorder.lock().unwrap() = recorder;
    }

    /// Compiles `schema` as a Draft 2020-12 JSON Schema and registers
    /// `handler` under `name`, replacing any prior registration.
    pub fn register(
        &self,
        name: impl Into<String>,
        schema: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft202012)
            .compile(&schema)
            .map_err(|e| RegistryError::SchemaCompile {
                tool: name.clone(),
                source: e.to_string(),
            })?;
        self.tools.write().unwrap().insert(
            name,
            RegisteredTool {
                schema: Arc::new(schema),
                compiled: Arc::new(compiled),
                handler,
            },
        );
        Ok(())
    }

    pub fn unregister(&self, name: &str) {
        self.tools.write().unwrap().remove(name);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.tools.read().unwrap().contains_key(name)
    }

    pub fn schema_for(&self, name: &str) -> Option<Arc<Value>> {
        self.tools
            .read()
            .unwrap()
            .get(name)
            .map(|t| Arc::clone(&t.schema))
    }

    /// Looks up `name`, validates `params` against its schema, invokes the
    /// handler, records the outcome, and (if `device_id` is given and a
    /// lifecycle monitor is wired) re-checks that device for app
    /// launches/terminates. Every branch returns a [`ToolResponse`] rather
    /// than an `Err` — the uniform envelope is the point (§4.12).
    pub async fn call(&self, name: &str, params: Value, device_id: Option<&str>) -> ToolResponse {
        let registered = self.tools.read().unwrap().get(name).cloned();
        let Some(registered) = registered else {
            return ToolResponse::err(RegistryError::UnknownTool(name.to_string()).to_string());
        };

        if let Err(errors) = registered.compiled.validate(&params) {
            let reasons: Vec<String> = errors
                .map(|e| format!("{e} at {}", e.instance_path))
                .collect();
            return ToolResponse::err(
                RegistryError::BadRequest {
                    tool: name.to_string(),
                    reasons,
                }
                .to_string(),
            );
        }

        let response = match registered.handler.handle(params.clone()).await {
            Ok(data) => ToolResponse::ok(data),
            Err(cause) => ToolResponse::err(
                RegistryError::ToolFailure {
                    tool: name.to_string(),
                    cause,
                }
                .to_string(),
            ),
        };

        self.record(name, params, response.clone());

        if let (Some(lifecycle), Some(device_id)) = (&self.lifecycle, device_id) {
            if let Err(err) = lifecycle.check_for_changes(device_id).await {
                warn!(error = %err, device_id, "lifecycle check_for_changes failed after tool call");
            }
        }

        response
    }

    fn record(&self, tool: &str, params: Value, result: ToolResponse) {
        let recorder = self.recorder.lock().unwrap().clone();
        if let Some(recorder) = recorder {
            let timestamp = OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default();
            recorder.record(ToolCallLogEntry {
                timestamp,
                tool: tool.to_string(),
                params,
                result,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn handle(&self, params: Value) -> Result<Value, String> {
            Ok(params)
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl ToolHandler for FailingHandler {
        async fn handle(&self, _params: Value) -> Result<Value, String> {
            Err("device offline".to_string())
        }
    }

    struct RecordingSink {
        entries: Mutex<Vec<ToolCallLogEntry>>,
    }

    impl ToolCallRecorder for RecordingSink {
        fn record(&self, entry: ToolCallLogEntry) {
            self.entries.lock().unwrap().push(entry);
        }
    }

    fn echo_schema() -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"],
            "additionalProperties": false,
        })
    }

    #[tokio::test]
    async fn unknown_tool_returns_failure_response() {
        let registry = ToolRegistry::new(None);
        let response = registry.call("nonexistent", serde_json::json!({}), None).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn invalid_params_are_rejected_before_handler_runs() {
        let registry = ToolRegistry::new(None);
        registry
            .register("echo", echo_schema(), Arc::new(EchoHandler))
            .unwrap();

        let response = registry
            .call("echo", serde_json::json!({"wrong": 1}), None)
            .await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("invalid params"));
    }

    #[tokio::test]
    async fn valid_call_succeeds_and_is_recorded() {
        let registry = ToolRegistry::new(None);
        registry
            .register("echo", echo_schema(), Arc::new(EchoHandler))
            .unwrap();
        let sink = Arc::new(RecordingSink {
            entries: Mutex::new(Vec::new()),
        });
        registry.set_recorder(Some(sink.clone()));

        let response = registry
            .call("echo", serde_json::json!({"text": "hi"}), None)
            .await;
        assert!(response.success);
        assert_eq!(sink.entries.lock().unwrap().len(), 1);
        assert_eq!(sink.entries.lock().unwrap()[0].tool, "echo");
    }

    #[tokio::test]
    async fn handler_failure_becomes_failed_response_not_panic() {
        let registry = ToolRegistry::new(None);
        registry
            .register("fail", echo_schema(), Arc::new(FailingHandler))
            .unwrap();
        let response = registry
            .call("fail", serde_json::json!({"text": "hi"}), None)
            .await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("device offline"));
    }

    #[tokio::test]
    async fn no_recorder_attached_does_not_panic() {
        let registry = ToolRegistry::new(None);
        registry
            .register("echo", echo_schema(), Arc::new(EchoHandler))
            .unwrap();
        let response = registry
            .call("echo", serde_json::json!({"text": "hi"}), None)
            .await;
        assert!(response.success);
    }

    #[tokio::test]
    async fn reregistering_a_name_replaces_the_handler() {
        let registry = ToolRegistry::new(None);
        registry
            .register("tool", echo_schema(), Arc::new(EchoHandler))
            .unwrap();
        registry
            .register("tool", echo_schema(), Arc::new(FailingHandler))
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let _ = calls.fetch_add(1, Ordering::SeqCst);
        let response = registry
            .call("tool", serde_json::json!({"text": "hi"}), None)
            .await;
        assert!(!response.success);
    }
}

//! Test Authoring Manager (§4.13 Module M).
//!
//! Holds a single active authoring session (mirroring the Device Session
//! Manager's single "current device" slot in module J) rather than keying
//! sessions by device, since spec.md's `AlreadyActive` failure reads as a
//! global invariant, not a per-device one. Implements [`ToolCallRecorder`] so
//! the Tool Registry (module L) can record completed calls without taking a
//! concrete dependency on this crate (see `automobile-registry`'s doc
//! comment on [`automobile_registry::ToolCallRecorder`]).

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use automobile_core::{CommandRunner, CommandSpec, ConfigStore};
use automobile_events::{LifecycleEventKind, LifecycleMonitor};
use automobile_registry::{ToolCallLogEntry, ToolCallRecorder};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::error::AuthoringError;
use crate::plan::{Plan, Step};

/// Recorded tool names that are never themselves plan steps (§4.13), except
/// that the session's last successful `observe` call is retained.
const EXCLUDED_TOOLS: &[&str] = &[
    "observe",
    "getConfig",
    "config",
    "listDevices",
    "setActiveDevice",
    "startDevice",
    "killEmulator",
    "listDeviceImages",
    "checkRunningEmulators",
];

struct ActiveSession {
    id: String,
    device_id: String,
    app_id: String,
    description: Option<String>,
    calls: Vec<ToolCallLogEntry>,
}

pub struct AuthoringManager {
    runner: Arc<dyn CommandRunner>,
    lifecycle: Arc<LifecycleMonitor>,
    config: Arc<ConfigStore>,
    session: StdMutex<Option<ActiveSession>>,
}

impl AuthoringManager {
    /// Builds the manager and spawns its auto-stop task, which watches the
    /// lifecycle broadcast channel for a `terminate` matching the active
    /// session's appId (§4.13).
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        lifecycle: Arc<LifecycleMonitor>,
        config: Arc<ConfigStore>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            runner,
            lifecycle,
            config,
            session: StdMutex::new(None),
        });
        manager.spawn_auto_stop();
        manager
    }

    fn spawn_auto_stop(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let mut receiver = manager.lifecycle.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv().await {
                if event.kind != LifecycleEventKind::Terminate {
                    continue;
                }
                let matches = {
                    let guard = manager.session.lock().unwrap();
                    guard
                        .as_ref()
                        .is_some_and(|s| s.app_id == event.app_id && s.device_id == event.device_id)
                };
                if matches {
                    if let Err(err) = manager.stop(&event.device_id).await {
                        warn!(error = %err, "auto-stop failed after terminate event");
                    }
                }
            }
        });
    }

    /// Starts recording a session for `app_id` on `device_id`. Fails with
    /// `AlreadyActive` if one is already running.
    pub async fn start(
        &self,
        device_id: &str,
        app_id: &str,
        description: Option<String>,
    ) -> Result<String, AuthoringError> {
        {
            let guard = self.session.lock().unwrap();
            if guard.is_some() {
                return Err(AuthoringError::AlreadyActive(device_id.to_string()));
            }
        }
        let id = Uuid::new_v4().to_string();
        *self.session.lock().unwrap() = Some(ActiveSession {
            id: id.clone(),
            device_id: device_id.to_string(),
            app_id: app_id.to_string(),
            description,
            calls: Vec::new(),
        });
        self.lifecycle.track(device_id, app_id).await;
        Ok(id)
    }

    /// Finalises the session active on `device_id`: filters recorded calls
    /// into plan steps, writes the YAML plan into the app's configured
    /// source directory (if any), and invokes the code generator.
    pub async fn stop(&self, device_id: &str) -> Result<Plan, AuthoringError> {
        let session = {
            let mut guard = self.session.lock().unwrap();
            match guard.take() {
                Some(session) if session.device_id == device_id => session,
                Some(other) => {
                    *guard = Some(other);
                    return Err(AuthoringError::NoActiveSession(device_id.to_string()));
                }
                None => return Err(AuthoringError::NoActiveSession(device_id.to_string())),
            }
        };

        self.lifecycle
            .untrack(&session.device_id, &session.app_id)
            .await;

        let steps = filter_calls(&session.calls);
        let plan = Plan {
            name: format!("{}-session", session.app_id),
            description: session.description.clone(),
            generated: Some(
                OffsetDateTime::now_utc()
                    .format(&Rfc3339)
                    .unwrap_or_default(),
            ),
            app_id: Some(session.app_id.clone()),
            metadata: serde_json::Map::new(),
            steps,
        };

        if let Some(app_config) = self.config.app(&session.app_id) {
            if let Some(source_dir) = app_config.source_dir {
                let path =
                    PathBuf::from(source_dir).join(format!("{}-{}.plan.yaml", session.app_id, session.id));
                let yaml = crate::plan::serialize(&plan)?;
                tokio::fs::write(&path, yaml)
                    .await
                    .map_err(|e| automobile_core::CoreError::io(&path, e))?;
                self.invoke_codegen(&path).await?;
            }
        }

        Ok(plan)
    }

    /// Shells out to the Kotlin code generator jar, the same way the teacher
    /// shells to its own codegen subprocesses (via module A's runner rather
    /// than a raw `tokio::process::Command`).
    async fn invoke_codegen(&self, plan_path: &PathBuf) -> Result<(), AuthoringError> {
        let jar_path = match std::env::var_os("KOTLINPOET_JAR_PATH") {
            Some(path) => PathBuf::from(path),
            None => {
                warn!("KOTLINPOET_JAR_PATH is not set; skipping code generation");
                return Ok(());
            }
        };
        let output = self
            .runner
            .execute(CommandSpec::new(
                "java",
                vec![
                    "-jar".into(),
                    jar_path.to_string_lossy().into_owned(),
                    "--plan".into(),
                    plan_path.to_string_lossy().into_owned(),
                    "--mode".into(),
                    "json".into(),
                ],
            ))
            .await?;
        if !output.status.success() {
            warn!(
                stderr = %output.stderr_string(),
                "code generator exited non-zero"
            );
        }
        Ok(())
    }
}

impl ToolCallRecorder for AuthoringManager {
    fn record(&self, entry: ToolCallLogEntry) {
        if let Some(session) = self.session.lock().unwrap().as_mut() {
            session.calls.push(entry);
        }
    }
}

/// Applies the exclusion list (§4.13), keeping only successful calls, with
/// the one exception that the session's last successful `observe` survives.
fn filter_calls(calls: &[ToolCallLogEntry]) -> Vec<Step> {
    let last_observe = calls
        .iter()
        .rposition(|entry| entry.tool == "observe" && entry.result.success);

    calls
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            if !entry.result.success {
                return None;
            }
            if EXCLUDED_TOOLS.contains(&entry.tool.as_str()) && Some(index) != last_observe {
                return None;
            }
            let params = match &entry.params {
                Value::Object(map) => map.clone(),
                _ => serde_json::Map::new(),
            };
            Some(Step {
                tool: entry.tool.clone(),
                params,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use automobile_core::{CommandOutput, CoreError};
    use automobile_registry::ToolResponse;
    use async_trait::async_trait;

    #[cfg(unix)]
    fn exit_success() -> std::process::ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(0)
    }

    struct NoopRunner;

    #[async_trait]
    impl CommandRunner for NoopRunner {
        async fn execute(&self, _spec: CommandSpec) -> Result<CommandOutput, CoreError> {
            Ok(CommandOutput {
                status: exit_success(),
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        }
    }

    fn entry(tool: &str, success: bool) -> ToolCallLogEntry {
        ToolCallLogEntry {
            timestamp: "2026-01-01T00:00:00Z".into(),
            tool: tool.to_string(),
            params: Value::Object(serde_json::Map::new()),
            result: if success {
                ToolResponse::ok(Value::Null)
            } else {
                ToolResponse::err("boom")
            },
        }
    }

    #[test]
    fn filter_keeps_non_excluded_and_last_observe_only() {
        let calls = vec![
            entry("observe", true),
            entry("launchApp", true),
            entry("tap", true),
            entry("observe", true),
            entry("observe", true),
        ];
        let steps = filter_calls(&calls);
        let names: Vec<&str> = steps.iter().map(|s| s.tool.as_str()).collect();
        assert_eq!(names, vec!["launchApp", "tap", "observe"]);
    }

    #[test]
    fn filter_drops_failed_calls() {
        let calls = vec![entry("tap", false), entry("launchApp", true)];
        let steps = filter_calls(&calls);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].tool, "launchApp");
    }

    #[tokio::test]
    async fn start_twice_without_stop_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ConfigStore::load(dir.path().join("config.json")).unwrap());
        let runner: Arc<dyn CommandRunner> = Arc::new(NoopRunner);
        let lifecycle = Arc::new(LifecycleMonitor::new(Arc::clone(&runner)));
        let manager = AuthoringManager::new(runner, lifecycle, config);

        manager
            .start("emulator-5554", "com.example", None)
            .await
            .unwrap();
        let err = manager
            .start("emulator-5554", "com.example", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthoringError::AlreadyActive(_)));
    }

    #[tokio::test]
    async fn stop_with_no_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ConfigStore::load(dir.path().join("config.json")).unwrap());
        let runner: Arc<dyn CommandRunner> = Arc::new(NoopRunner);
        let lifecycle = Arc::new(LifecycleMonitor::new(Arc::clone(&runner)));
        let manager = AuthoringManager::new(runner, lifecycle, config);

        let err = manager.stop("emulator-5554").await.unwrap_err();
        assert!(matches!(err, AuthoringError::NoActiveSession(_)));
    }

    #[tokio::test]
    async fn stopped_session_is_terminal_for_further_tool_calls() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ConfigStore::load(dir.path().join("config.json")).unwrap());
        let runner: Arc<dyn CommandRunner> = Arc::new(NoopRunner);
        let lifecycle = Arc::new(LifecycleMonitor::new(Arc::clone(&runner)));
        let manager = AuthoringManager::new(runner, lifecycle, config);

        manager.start("emulator-5554", "com.example", None).await.unwrap();
        manager.record(entry("launchApp", true));
        let plan = manager.stop("emulator-5554").await.unwrap();
        assert_eq!(plan.steps.len(), 1);

        // Events after stop, even naming the same device/session, are no-ops:
        // there is no active session for `record` to append to.
        manager.record(entry("tap", true));
        let err = manager.stop("emulator-5554").await.unwrap_err();
        assert!(matches!(err, AuthoringError::NoActiveSession(_)));
    }

    #[tokio::test]
    async fn start_stop_round_trip_produces_plan_named_after_app() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ConfigStore::load(dir.path().join("config.json")).unwrap());
        let runner: Arc<dyn CommandRunner> = Arc::new(NoopRunner);
        let lifecycle = Arc::new(LifecycleMonitor::new(Arc::clone(&runner)));
        let manager = AuthoringManager::new(runner, lifecycle, config);

        manager
            .start("emulator-5554", "com.example", Some("a session".into()))
            .await
            .unwrap();
        manager.record(entry("observe", true));
        manager.record(entry("launchApp", true));
        manager.record(entry("tap", true));
        manager.record(entry("observe", true));

        let plan = manager.stop("emulator-5554").await.unwrap();
        assert_eq!(plan.name, "com.example-session");
        assert_eq!(plan.app_id.as_deref(), Some("com.example"));
        let names: Vec<&str> = plan.steps.iter().map(|s| s.tool.as_str()).collect();
        assert_eq!(names, vec!["launchApp", "tap", "observe"]);
    }
}

//! App Lifecycle Monitor (§4.11 Module K).
//!
//! Polling, not streaming: `checkForChanges` is invoked opportunistically
//! (by the Tool Registry after every tool call, and by the Test Authoring
//! Manager on demand) rather than running its own timer loop, keeping the
//! model single-threaded and deterministic (spec.md §4.11, §9 "Polling vs
//! streams").
//!
//! The listener cycle the source has between the lifecycle monitor and the
//! test authoring manager is resolved the way spec.md §9 prescribes: the
//! monitor publishes onto a [`tokio::sync::broadcast`] channel and holds no
//! back-pointer to its subscribers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use automobile_core::{CommandRunner, CommandSpec, CoreError};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

use crate::error::EventsError;

/// The two event types a diff between polls can produce (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEventKind {
    Launch,
    Terminate,
}

/// A single launch/terminate observation for a tracked app on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub device_id: String,
    pub app_id: String,
    pub kind: LifecycleEventKind,
}

const CHANNEL_CAPACITY: usize = 256;

/// Tracks which app ids are being watched per device and diffs their
/// `pidof`-observed running state on demand.
pub struct LifecycleMonitor {
    runner: Arc<dyn CommandRunner>,
    tracked: Mutex<HashMap<String, HashSet<String>>>,
    running: Mutex<HashMap<String, HashSet<String>>>,
    sender: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleMonitor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            runner,
            tracked: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            sender,
        }
    }

    /// Subscribes to the lifecycle event broadcast. Matches the pattern the
    /// Test Authoring Manager (module M) uses for auto-stop (spec.md §4.13).
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub async fn track(&self, device_id: &str, app_id: &str) {
        self.tracked
            .lock()
            .await
            .entry(device_id.to_string())
            .or_default()
            .insert(app_id.to_string());
    }

    pub async fn untrack(&self, device_id: &str, app_id: &str) {
        if let Some(set) = self.tracked.lock().await.get_mut(device_id) {
            set.remove(app_id);
        }
        if let Some(set) = self.running.lock().await.get_mut(device_id) {
            set.remove(app_id);
        }
    }

    /// Diffs the previous running set against the current one and emits
    /// events: launches first, terminates second, within this one diff
    /// (§4.11 "Emission order").
    pub async fn check_for_changes(&self, device_id: &str) -> Result<(), EventsError> {
        let tracked_apps: Vec<String> = {
            let tracked = self.tracked.lock().await;
            tracked
                .get(device_id)
                .map(|apps| apps.iter().cloned().collect())
                .unwrap_or_default()
        };
        if tracked_apps.is_empty() {
            return Ok(());
        }

        let mut currently_running = HashSet::new();
        for app_id in &tracked_apps {
            if self.is_running(device_id, app_id).await? {
                currently_running.insert(app_id.clone());
            }
        }

        let (launches, terminates) = {
            let mut running = self.running.lock().await;
            let previously_running = running.entry(device_id.to_string()).or_default();
            let launches: Vec<String> = currently_running
                .difference(previously_running)
                .cloned()
                .collect();
            let terminates: Vec<String> = previously_running
                .difference(&currently_running)
                .cloned()
                .collect();
            *previously_running = currently_running;
            (launches, terminates)
        };

        for app_id in launches {
            self.emit(LifecycleEvent {
                device_id: device_id.to_string(),
                app_id,
                kind: LifecycleEventKind::Launch,
            });
        }
        for app_id in terminates {
            self.emit(LifecycleEvent {
                device_id: device_id.to_string(),
                app_id,
                kind: LifecycleEventKind::Terminate,
            });
        }
        Ok(())
    }

    async fn is_running(&self, device_id: &str, app_id: &str) -> Result<bool, EventsError> {
        let result = self
            .runner
            .execute(CommandSpec::new(
                "adb",
                vec![
                    "-s".into(),
                    device_id.into(),
                    "shell".into(),
                    "pidof".into(),
                    app_id.into(),
                ],
            ))
            .await;
        match result {
            Ok(output) => Ok(!output.stdout_string().trim().is_empty()),
            // pidof exits non-zero when nothing matches; that's "not running", not a failure.
            Err(CoreError::NonZeroExit { .. }) => Ok(false),
            Err(err) => Err(EventsError::Core(err)),
        }
    }

    /// A send with no subscribers is not an error; subscribers may simply
    /// not exist yet (§4.11: listener errors are caught and logged, never
    /// propagated).
    fn emit(&self, event: LifecycleEvent) {
        if self.sender.send(event).is_err() {
            warn!("lifecycle event emitted with no active subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use automobile_core::CommandOutput;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[cfg(unix)]
    fn exit_success() -> std::process::ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(0)
    }

    struct FakePidofRunner {
        responses: StdMutex<Vec<bool>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommandRunner for FakePidofRunner {
        async fn execute(&self, _spec: CommandSpec) -> Result<CommandOutput, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let running = self.responses.lock().unwrap().remove(0);
            let stdout = if running { b"1234\n".to_vec() } else { Vec::new() };
            Ok(CommandOutput {
                status: exit_success(),
                stdout,
                stderr: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn first_check_with_nothing_running_emits_no_events() {
        let runner = Arc::new(FakePidofRunner {
            responses: StdMutex::new(vec![false]),
            calls: AtomicUsize::new(0),
        });
        let monitor = LifecycleMonitor::new(runner);
        monitor.track("emulator-5554", "com.example").await;
        let mut receiver = monitor.subscribe();
        monitor.check_for_changes("emulator-5554").await.unwrap();
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn launch_then_terminate_emits_in_order() {
        let runner = Arc::new(FakePidofRunner {
            responses: StdMutex::new(vec![false, true, false]),
            calls: AtomicUsize::new(0),
        });
        let monitor = LifecycleMonitor::new(runner);
        monitor.track("emulator-5554", "com.example").await;
        let mut receiver = monitor.subscribe();

        monitor.check_for_changes("emulator-5554").await.unwrap(); // not running
        monitor.check_for_changes("emulator-5554").await.unwrap(); // launch
        let launch = receiver.try_recv().unwrap();
        assert_eq!(launch.kind, LifecycleEventKind::Launch);
        assert_eq!(launch.app_id, "com.example");

        monitor.check_for_changes("emulator-5554").await.unwrap(); // terminate
        let terminate = receiver.try_recv().unwrap();
        assert_eq!(terminate.kind, LifecycleEventKind::Terminate);
    }

    #[tokio::test]
    async fn untracked_app_is_not_diffed() {
        let runner = Arc::new(FakePidofRunner {
            responses: StdMutex::new(vec![]),
            calls: AtomicUsize::new(0),
        });
        let monitor = LifecycleMonitor::new(runner);
        monitor.track("emulator-5554", "com.example").await;
        monitor.untrack("emulator-5554", "com.example").await;
        monitor.check_for_changes("emulator-5554").await.unwrap();
    }
}

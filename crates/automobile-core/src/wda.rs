//! WebDriverAgent Host (§4.8 — iOS runtime dependency).
//!
//! Launches `xcodebuild test-without-building` to host WebDriverAgent's
//! local HTTP server, discovers its URL by scanning stdout for the
//! `ServerURLHere-><url><-ServerURLHere` marker, and manages the single
//! automation session against it.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::types::ActiveWindow;

const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(60);
const STATUS_TIMEOUT_STARTUP: Duration = Duration::from_secs(15);
const STATUS_TIMEOUT_STEADY: Duration = Duration::from_secs(10);
const MARKER_START: &str = "ServerURLHere->";
const MARKER_END: &str = "<-ServerURLHere";

/// A running WebDriverAgent process plus its discovered base URL and
/// (lazily established) session id.
pub struct WdaHost {
    base_url: String,
    child: Mutex<Child>,
    client: reqwest::Client,
    session_id: Mutex<Option<String>>,
}

impl WdaHost {
    /// Spawns `xcodebuild test-without-building` for the given simulator
    /// UDID and waits for `/status` to report readiness.
    pub async fn launch(udid: &str, wda_project: &str) -> Result<Self, CoreError> {
        let mut command = Command::new("xcodebuild");
        command
            .args([
                "test-without-building",
                "-project",
                wda_project,
                "-scheme",
                "WebDriverAgentRunner",
                "-destination",
            ])
            .arg(format!("id={udid}"))
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| CoreError::Spawn {
            command: "xcodebuild test-without-building".into(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoreError::DeviceNotReady {
                reason: "xcodebuild stdout unavailable".into(),
            })?;

        let base_url = scan_for_server_url(stdout, DEFAULT_LAUNCH_TIMEOUT).await?;
        info!(base_url = %base_url, "WebDriverAgent server URL discovered");

        let client = reqwest::Client::new();
        let host = Self {
            base_url,
            child: Mutex::new(child),
            client,
            session_id: Mutex::new(None),
        };
        host.wait_status_ready(DEFAULT_LAUNCH_TIMEOUT).await?;
        Ok(host)
    }

    async fn wait_status_ready(&self, timeout: Duration) -> Result<(), CoreError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(value) = self.get_json("/status", STATUS_TIMEOUT_STARTUP).await {
                if value
                    .get("value")
                    .and_then(|v| v.get("ready"))
                    .and_then(Value::as_bool)
                    == Some(true)
                {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CoreError::WebDriverAgentTimeout(timeout));
            }
            time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn get_json(&self, path: &str, timeout: Duration) -> Result<Value, CoreError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .timeout(timeout)
            .send()
            .await?;
        Ok(response.json().await?)
    }

    /// Ensures a WebDriverAgent session exists, creating one if necessary.
    pub async fn ensure_session(&self, udid: &str) -> Result<String, CoreError> {
        let mut guard = self.session_id.lock().await;
        if let Some(id) = guard.as_ref() {
            return Ok(id.clone());
        }
        let body = json!({
            "capabilities": {
                "alwaysMatch": {
                    "platformName": "iOS",
                    "udid": udid,
                }
            }
        });
        let response = self
            .client
            .post(format!("{}/session", self.base_url))
            .timeout(STATUS_TIMEOUT_STEADY)
            .json(&body)
            .send()
            .await?;
        let value: Value = response.json().await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .or_else(|| value.get("value").and_then(|v| v.get("sessionId")).and_then(Value::as_str))
            .ok_or_else(|| CoreError::DeviceNotReady {
                reason: "WebDriverAgent /session response missing sessionId".into(),
            })?
            .to_string();
        *guard = Some(session_id.clone());
        Ok(session_id)
    }

    pub async fn source_xml(&self) -> Result<String, CoreError> {
        let session_id = self.session_id.lock().await.clone().ok_or_else(|| {
            CoreError::DeviceNotReady {
                reason: "no active WebDriverAgent session".into(),
            }
        })?;
        let response = self
            .client
            .get(format!("{}/session/{session_id}/source", self.base_url))
            .timeout(STATUS_TIMEOUT_STEADY)
            .send()
            .await?;
        Ok(response.text().await?)
    }

    /// Fetches `/screenshot`, which returns base64-encoded PNG bytes (§4.7).
    pub async fn screenshot_png(&self) -> Result<Vec<u8>, CoreError> {
        let value = self.get_json("/screenshot", STATUS_TIMEOUT_STEADY).await?;
        let encoded = value
            .get("value")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::DeviceNotReady {
                reason: "WebDriverAgent /screenshot response missing value".into(),
            })?;
        crate::screenshot::decode_legacy_base64(encoded)
    }

    pub async fn active_window(&self) -> Result<ActiveWindow, CoreError> {
        let status = self.get_json("/status", STATUS_TIMEOUT_STEADY).await?;
        let app_id = status
            .pointer("/value/currentApp/bundleId")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        Ok(ActiveWindow {
            app_id,
            activity_name: "default".to_string(),
            window_id: None,
        })
    }

    /// SIGTERM, 2s grace, then SIGKILL — same contract as the command runner
    /// (§4.1, §4.8).
    pub async fn stop(&self) {
        let mut child = self.child.lock().await;
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                let pid = nix::unistd::Pid::from_raw(pid as i32);
                let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
            }
        }
        if time::timeout(Duration::from_secs(2), child.wait())
            .await
            .is_err()
        {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

/// Incrementally scans an async stdout stream for the
/// `ServerURLHere-><url><-ServerURLHere` marker, bounded by `timeout`.
async fn scan_for_server_url(
    stdout: tokio::process::ChildStdout,
    timeout: Duration,
) -> Result<String, CoreError> {
    let mut lines = BufReader::new(stdout).lines();
    let scan = async {
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(line = %line, "xcodebuild output");
            if let Some(start) = line.find(MARKER_START) {
                let after = &line[start + MARKER_START.len()..];
                if let Some(end) = after.find(MARKER_END) {
                    return Ok(after[..end].to_string());
                }
            }
        }
        Err(CoreError::DeviceNotReady {
            reason: "xcodebuild exited before printing a server URL".into(),
        })
    };
    match time::timeout(timeout, scan).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::WebDriverAgentTimeout(timeout)),
    }
}

/// Extracts the server URL from a single already-read line, exposed
/// separately from [`scan_for_server_url`] for unit testing without a real
/// child process.
pub(crate) fn extract_server_url(line: &str) -> Option<&str> {
    let start = line.find(MARKER_START)?;
    let after = &line[start + MARKER_START.len()..];
    let end = after.find(MARKER_END)?;
    Some(&after[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_marker_url() {
        let line = "ServerURLHere->http://127.0.0.1:8100<-ServerURLHere";
        assert_eq!(extract_server_url(line), Some("http://127.0.0.1:8100"));
    }

    #[test]
    fn ignores_lines_without_marker() {
        assert_eq!(extract_server_url("some unrelated xcodebuild output"), None);
    }
}

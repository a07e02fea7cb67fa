//! Window / Active-App Probe (§4.4 Module D).

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::time;

use crate::error::CoreError;
use crate::runner::{CommandRunner, CommandSpec};
use crate::types::{ActiveWindow, Device, Platform};
use crate::wda::WdaHost;

const RETRY_PAUSE: Duration = Duration::from_millis(250);

fn focused_app_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"mFocusedApp=.*ActivityRecord\{[^}]*\s(?P<pkg>[\w.]+)/(?P<activity>[\w.$]+)")
            .expect("static regex is valid")
    })
}

fn current_focus_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"mCurrentFocus=Window\{(?P<id>\S+)\s(?P<pkg>[\w.]+)/(?P<activity>[\w.$]+)\}")
            .expect("static regex is valid")
    })
}

/// Extracts the foreground app + activity/scene and window id (§4.4).
pub struct WindowProbe {
    runner: Arc<dyn CommandRunner>,
}

impl WindowProbe {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    pub async fn get_active(&self, device: &Device, wda: Option<&WdaHost>) -> Result<ActiveWindow, CoreError> {
        for attempt in 0..2 {
            let result = match device.platform {
                Platform::Android => self.get_active_android(&device.device_id).await,
                Platform::Ios => {
                    let Some(wda) = wda else {
                        return Err(CoreError::DeviceNotReady {
                            reason: "no WebDriverAgent session for iOS probe".into(),
                        });
                    };
                    self.get_active_ios(wda).await
                }
            };
            match result {
                Ok(window) => return Ok(window),
                Err(_) if attempt == 0 => time::sleep(RETRY_PAUSE).await,
                Err(err) => return Err(err),
            }
        }
        unreachable!("loop always returns within two attempts")
    }

    async fn get_active_android(&self, device_id: &str) -> Result<ActiveWindow, CoreError> {
        let output = self
            .runner
            .execute(CommandSpec::new(
                "adb",
                vec![
                    "-s".into(),
                    device_id.into(),
                    "shell".into(),
                    "dumpsys".into(),
                    "window".into(),
                    "windows".into(),
                ],
            ))
            .await?;
        let stdout = output.stdout_string();
        parse_dumpsys_window(&stdout)
    }

    async fn get_active_ios(&self, wda: &WdaHost) -> Result<ActiveWindow, CoreError> {
        wda.active_window().await
    }
}

/// Parses `dumpsys window windows` output for the focused app and window id
/// (§4.4). The first `mFocusedApp` match wins for app id; window id comes
/// from `mCurrentFocus`.
fn parse_dumpsys_window(stdout: &str) -> Result<ActiveWindow, CoreError> {
    let focused = focused_app_regex().captures(stdout).ok_or_else(|| {
        CoreError::DeviceNotReady {
            reason: "no mFocusedApp line found in dumpsys output".into(),
        }
    })?;
    let app_id = focused["pkg"].to_string();
    let activity_name = focused["activity"].to_string();

    let window_id = current_focus_regex()
        .captures(stdout)
        .map(|captures| captures["id"].to_string());

    Ok(ActiveWindow {
        app_id,
        activity_name,
        window_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
  Window #3 Window{a1b2c3 u0 com.example.app/com.example.app.MainActivity}:
    mFocusedApp=ActivityRecord{1234567 u0 com.example.app/com.example.app.MainActivity t12}
    mCurrentFocus=Window{a1b2c3 u0 com.example.app/com.example.app.MainActivity}
"#;

    #[test]
    fn extracts_app_and_window_id() {
        let window = parse_dumpsys_window(SAMPLE).unwrap();
        assert_eq!(window.app_id, "com.example.app");
        assert_eq!(window.activity_name, "com.example.app.MainActivity");
        assert_eq!(window.window_id.as_deref(), Some("a1b2c3"));
    }

    #[test]
    fn missing_focused_app_is_device_not_ready() {
        let err = parse_dumpsys_window("nothing interesting here").unwrap_err();
        assert!(matches!(err, CoreError::DeviceNotReady { .. }));
    }
}

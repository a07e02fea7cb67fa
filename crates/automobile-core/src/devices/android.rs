use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time;
use tracing::debug;

use crate::discovery::ToolLocator;
use crate::error::CoreError;
use crate::runner::{CommandRunner, CommandSpec};
use crate::types::{Device, DeviceInfo, LifecycleState, Platform};

use super::{DeviceRegistry, TtlCache, READY_POLL_INTERVAL};

/// Android device enumeration and lifecycle via `adb` / `emulator` (§4.3).
pub struct AndroidRegistry {
    runner: Arc<dyn CommandRunner>,
    locator: Arc<ToolLocator>,
    booted_cache: TtlCache<Vec<Device>>,
}

impl AndroidRegistry {
    pub fn new(runner: Arc<dyn CommandRunner>, locator: Arc<ToolLocator>) -> Self {
        Self {
            runner,
            locator,
            booted_cache: TtlCache::new(Duration::from_secs(5)),
        }
    }

    async fn adb_path(&self) -> Result<String, CoreError> {
        Ok(self
            .locator
            .locate_android("adb")?
            .path
            .to_string_lossy()
            .into_owned())
    }

    async fn emulator_path(&self) -> Result<String, CoreError> {
        Ok(self
            .locator
            .locate_android("emulator")?
            .path
            .to_string_lossy()
            .into_owned())
    }

    async fn fetch_booted(&self) -> Result<Vec<Device>, CoreError> {
        let adb = self.adb_path().await?;
        let output = self
            .runner
            .execute(CommandSpec::new(adb, vec!["devices".into()]))
            .await?;
        Ok(parse_adb_devices(&output.stdout_string()))
    }

    async fn boot_completed(&self, device_id: &str) -> Result<bool, CoreError> {
        let adb = self.adb_path().await?;
        let boot_completed = self
            .runner
            .execute(CommandSpec::new(
                adb.clone(),
                vec![
                    "-s".into(),
                    device_id.into(),
                    "shell".into(),
                    "getprop".into(),
                    "sys.boot_completed".into(),
                ],
            ))
            .await?;
        let animation_done = self
            .runner
            .execute(CommandSpec::new(
                adb,
                vec![
                    "-s".into(),
                    device_id.into(),
                    "shell".into(),
                    "getprop".into(),
                    "init.svc.bootanim".into(),
                ],
            ))
            .await?;
        Ok(boot_completed.stdout_string().trim() == "1"
            && animation_done.stdout_string().trim() == "stopped")
    }
}

#[async_trait]
impl DeviceRegistry for AndroidRegistry {
    async fn list_booted(&self) -> Result<Vec<Device>, CoreError> {
        self.booted_cache.get_or_fetch(|| self.fetch_booted()).await
    }

    async fn list_images(&self) -> Result<Vec<DeviceInfo>, CoreError> {
        let emulator = self.emulator_path().await?;
        let output = self
            .runner
            .execute(CommandSpec::new(emulator, vec!["-list-avds".into()]))
            .await?;
        Ok(output
            .stdout_string()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|name| DeviceInfo {
                identifier: name.to_string(),
                name: name.to_string(),
                platform: Platform::Android,
            })
            .collect())
    }

    async fn boot(&self, image: &DeviceInfo) -> Result<(), CoreError> {
        let emulator = self.emulator_path().await?;
        // Detached: the emulator process outlives this call, readiness is
        // polled separately via `wait_ready`.
        let mut command = tokio::process::Command::new(emulator);
        command
            .arg("-avd")
            .arg(&image.identifier)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());
        command
            .spawn()
            .map_err(|source| CoreError::Spawn {
                command: format!("emulator -avd {}", image.identifier),
                source,
            })?;
        Ok(())
    }

    async fn wait_ready(&self, device_id: &str, timeout: Duration) -> Result<Device, CoreError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.boot_completed(device_id).await.unwrap_or(false) {
                return Ok(Device {
                    device_id: device_id.to_string(),
                    name: device_id.to_string(),
                    platform: Platform::Android,
                    state: LifecycleState::Booted,
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CoreError::Timeout {
                    command: format!("wait_ready({device_id})"),
                    timeout,
                });
            }
            time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn kill(&self, device_id: &str) -> Result<(), CoreError> {
        let adb = self.adb_path().await?;
        self.runner
            .execute(CommandSpec::new(
                adb,
                vec!["-s".into(), device_id.into(), "emu".into(), "kill".into()],
            ))
            .await?;
        Ok(())
    }

    fn platform(&self) -> Platform {
        Platform::Android
    }
}

/// Parses `adb devices` output, skipping the header line (§4.3).
fn parse_adb_devices(stdout: &str) -> Vec<Device> {
    let mut devices = Vec::new();
    for line in stdout.lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(id) = parts.next() else { continue };
        let Some(state) = parts.next() else { continue };
        let lifecycle = match state {
            "device" => LifecycleState::Booted,
            "offline" => LifecycleState::Unresponsive,
            _ => {
                debug!(device_id = id, state, "skipping device in unknown state");
                continue;
            }
        };
        devices.push(Device {
            device_id: id.to_string(),
            name: id.to_string(),
            platform: Platform::Android,
            state: lifecycle,
        });
    }
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_devices_output_skipping_header() {
        let stdout = "List of devices attached\nemulator-5554\tdevice\n0123456789ABCDEF\toffline\n\n";
        let devices = parse_adb_devices(stdout);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].device_id, "emulator-5554");
        assert_eq!(devices[0].state, LifecycleState::Booted);
        assert_eq!(devices[1].state, LifecycleState::Unresponsive);
    }

    #[test]
    fn parses_empty_device_list() {
        let stdout = "List of devices attached\n\n";
        assert!(parse_adb_devices(stdout).is_empty());
    }
}

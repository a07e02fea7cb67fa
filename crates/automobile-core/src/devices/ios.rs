use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time;

use crate::discovery::ToolLocator;
use crate::error::CoreError;
use crate::runner::{CommandRunner, CommandSpec};
use crate::types::{Device, DeviceInfo, LifecycleState, Platform};

use super::{DeviceRegistry, TtlCache, READY_POLL_INTERVAL};

/// iOS simulator enumeration and lifecycle via `xcrun simctl` (§4.3).
pub struct IosRegistry {
    runner: Arc<dyn CommandRunner>,
    locator: Arc<ToolLocator>,
    booted_cache: TtlCache<Vec<Device>>,
}

#[derive(Debug, Deserialize)]
struct SimctlList {
    devices: std::collections::HashMap<String, Vec<SimctlDevice>>,
}

#[derive(Debug, Deserialize)]
struct SimctlDevice {
    udid: String,
    name: String,
    state: String,
}

impl IosRegistry {
    pub fn new(runner: Arc<dyn CommandRunner>, locator: Arc<ToolLocator>) -> Self {
        Self {
            runner,
            locator,
            booted_cache: TtlCache::new(Duration::from_secs(5)),
        }
    }

    async fn xcrun_path(&self) -> Result<String, CoreError> {
        let resolved = self.locator.locate_xcrun(self.runner.as_ref()).await?;
        Ok(resolved.path.to_string_lossy().into_owned())
    }

    async fn list_all(&self) -> Result<SimctlList, CoreError> {
        let xcrun = self.xcrun_path().await?;
        let output = self
            .runner
            .execute(CommandSpec::new(
                xcrun,
                vec![
                    "simctl".into(),
                    "list".into(),
                    "devices".into(),
                    "--json".into(),
                ],
            ))
            .await?;
        serde_json::from_str(&output.stdout_string())
            .map_err(|source| CoreError::Json(source))
    }
}

#[async_trait]
impl DeviceRegistry for IosRegistry {
    async fn list_booted(&self) -> Result<Vec<Device>, CoreError> {
        self.booted_cache
            .get_or_fetch(|| async {
                let list = self.list_all().await?;
                Ok(list
                    .devices
                    .values()
                    .flatten()
                    .filter(|device| device.state == "Booted")
                    .map(|device| Device {
                        device_id: device.udid.clone(),
                        name: device.name.clone(),
                        platform: Platform::Ios,
                        state: LifecycleState::Booted,
                    })
                    .collect())
            })
            .await
    }

    async fn list_images(&self) -> Result<Vec<DeviceInfo>, CoreError> {
        let list = self.list_all().await?;
        Ok(list
            .devices
            .values()
            .flatten()
            .filter(|device| device.state != "Booted")
            .map(|device| DeviceInfo {
                identifier: device.udid.clone(),
                name: device.name.clone(),
                platform: Platform::Ios,
            })
            .collect())
    }

    async fn boot(&self, image: &DeviceInfo) -> Result<(), CoreError> {
        let xcrun = self.xcrun_path().await?;
        self.runner
            .execute(CommandSpec::new(
                xcrun,
                vec!["simctl".into(), "boot".into(), image.identifier.clone()],
            ))
            .await?;
        Ok(())
    }

    async fn wait_ready(&self, device_id: &str, timeout: Duration) -> Result<Device, CoreError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(list) = self.list_all().await {
                if let Some(device) = list
                    .devices
                    .values()
                    .flatten()
                    .find(|device| device.udid == device_id)
                {
                    if device.state == "Booted" {
                        return Ok(Device {
                            device_id: device.udid.clone(),
                            name: device.name.clone(),
                            platform: Platform::Ios,
                            state: LifecycleState::Booted,
                        });
                    }
                }
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
        let xcrun = self.xcrun_path().await?;
        self.runner
            .execute(CommandSpec::new(
                xcrun,
                vec!["simctl".into(), "shutdown".into(), device_id.into()],
            ))
            .await?;
        Ok(())
    }

    fn platform(&self) -> Platform {
        Platform::Ios
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simctl_json_shape() {
        let json = r#"{
            "devices": {
                "com.apple.CoreSimulator.SimRuntime.iOS-17-0": [
                    {"udid": "A1B2C3D4-E5F6-7890-ABCD-EF1234567890", "name": "iPhone 15", "state": "Booted"},
                    {"udid": "11111111-2222-3333-4444-555555555555", "name": "iPhone 14", "state": "Shutdown"}
                ]
            }
        }"#;
        let parsed: SimctlList = serde_json::from_str(json).unwrap();
        let all: Vec<&SimctlDevice> = parsed.devices.values().flatten().collect();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|d| d.state == "Booted"));
    }
}

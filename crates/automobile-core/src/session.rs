//! Device Session Manager (§4.10 Module J).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::devices::DeviceRegistry;
use crate::error::CoreError;
use crate::installers::{accessibility::AccessibilityInstaller, Installer};
use crate::probe::WindowProbe;
use crate::runner::CommandRunner;
use crate::types::{Device, Platform, PlatformPreference};
use crate::wda::WdaHost;

const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(120);

/// State of the "current device" slot (§4.10: `None -> Booting -> Verifying
/// -> Ready -> (Ready|Unresponsive)`). Only [`SessionManager::ensure_device_ready`]
/// mutates it; readers get a clone of the `Device`.
#[derive(Debug, Clone)]
enum CurrentDeviceState {
    None,
    Ready(Device),
    Unresponsive,
}

/// Checks that a device picked by [`SessionManager`] is actually usable
/// before it is handed back to a caller (§4.10 step 7). Pluggable so tests
/// can fake iOS/Android verification without a real emulator or simulator.
#[async_trait]
pub trait ReadinessVerifier: Send + Sync {
    async fn verify(&self, device: &Device) -> Result<(), CoreError>;
}

/// Production verifier: Android checks a successful window probe plus the
/// accessibility service reaching `Active`; iOS checks a live WebDriverAgent
/// `/status` session when a WebDriverAgent project path is configured, and
/// otherwise trusts the `simctl`-reported `Booted` state the registry
/// already filtered on.
pub struct DefaultReadinessVerifier {
    runner: Arc<dyn CommandRunner>,
    wda_project: Option<PathBuf>,
    wda_hosts: Mutex<HashMap<String, Arc<WdaHost>>>,
}

impl DefaultReadinessVerifier {
    pub fn new(runner: Arc<dyn CommandRunner>, wda_project: Option<PathBuf>) -> Self {
        Self {
            runner,
            wda_project,
            wda_hosts: Mutex::new(HashMap::new()),
        }
    }

    async fn wda_host_for(&self, udid: &str) -> Result<Arc<WdaHost>, CoreError> {
        let mut hosts = self.wda_hosts.lock().await;
        if let Some(host) = hosts.get(udid) {
            return Ok(host.clone());
        }
        let project = self.wda_project.as_ref().ok_or_else(|| CoreError::DeviceNotReady {
            reason: "no WebDriverAgent project configured for iOS verification".into(),
        })?;
        let host = Arc::new(WdaHost::launch(udid, &project.to_string_lossy()).await?);
        hosts.insert(udid.to_string(), host.clone());
        Ok(host)
    }
}

#[async_trait]
impl ReadinessVerifier for DefaultReadinessVerifier {
    async fn verify(&self, device: &Device) -> Result<(), CoreError> {
        match device.platform {
            Platform::Android => {
                let probe = WindowProbe::new(self.runner.clone());
                probe.get_active(device, None).await?;
                let installer = AccessibilityInstaller::new(device.clone(), self.runner.clone());
                installer.ensure_active().await
            }
            Platform::Ios => {
                if self.wda_project.is_some() {
                    let host = self.wda_host_for(&device.device_id).await?;
                    host.ensure_session(&device.device_id).await?;
                }
                Ok(())
            }
        }
    }
}

/// Resolves which device to drive and guarantees it is ready, per the
/// 8-step algorithm of §4.10.
pub struct SessionManager {
    android: Arc<dyn DeviceRegistry>,
    ios: Arc<dyn DeviceRegistry>,
    verifier: Arc<dyn ReadinessVerifier>,
    boot_timeout: Duration,
    current: Mutex<CurrentDeviceState>,
}

impl SessionManager {
    pub fn new(
        android: Arc<dyn DeviceRegistry>,
        ios: Arc<dyn DeviceRegistry>,
        verifier: Arc<dyn ReadinessVerifier>,
    ) -> Self {
        Self {
            android,
            ios,
            verifier,
            boot_timeout: DEFAULT_BOOT_TIMEOUT,
            current: Mutex::new(CurrentDeviceState::None),
        }
    }

    pub fn with_boot_timeout(mut self, timeout: Duration) -> Self {
        self.boot_timeout = timeout;
        self
    }

    /// Returns the current device if its slot holds `Ready`, without
    /// re-running the resolution algorithm.
    pub async fn current_device(&self) -> Option<Device> {
        match &*self.current.lock().await {
            CurrentDeviceState::Ready(device) => Some(device.clone()),
            _ => None,
        }
    }

    fn registry_for(&self, platform: Platform) -> &Arc<dyn DeviceRegistry> {
        match platform {
            Platform::Android => &self.android,
            Platform::Ios => &self.ios,
        }
    }

    /// Resolves, boots if necessary, and verifies a ready device, per §4.10.
    pub async fn ensure_device_ready(
        &self,
        preference: PlatformPreference,
        provided_id: Option<&str>,
    ) -> Result<Device, CoreError> {
        let (android_booted, ios_booted) =
            tokio::try_join!(self.android.list_booted(), self.ios.list_booted())?;

        if matches!(preference, PlatformPreference::Either)
            && !android_booted.is_empty()
            && !ios_booted.is_empty()
        {
            return Err(CoreError::AmbiguousPlatform {
                android: android_booted.iter().map(|d| d.device_id.clone()).collect(),
                ios: ios_booted.iter().map(|d| d.device_id.clone()).collect(),
            });
        }

        let platform = match preference {
            PlatformPreference::Android => Platform::Android,
            PlatformPreference::Ios => Platform::Ios,
            PlatformPreference::Either => {
                if !android_booted.is_empty() || ios_booted.is_empty() {
                    Platform::Android
                } else {
                    Platform::Ios
                }
            }
        };
        let booted = match platform {
            Platform::Android => &android_booted,
            Platform::Ios => &ios_booted,
        };

        let device = if let Some(id) = provided_id {
            booted
                .iter()
                .find(|d| d.device_id == id)
                .cloned()
                .ok_or_else(|| CoreError::DeviceNotFound {
                    device_id: id.to_string(),
                    platform: platform.as_str().to_string(),
                })?
        } else if let Some(reused) = self.reusable_current(platform).await {
            reused
        } else if let Some(first) = booted.first() {
            first.clone()
        } else {
            self.boot_first_image(platform).await?
        };

        *self.current.lock().await = CurrentDeviceState::None;
        match self.verifier.verify(&device).await {
            Ok(()) => {
                info!(device_id = %device.device_id, platform = %platform.as_str(), "device ready");
                *self.current.lock().await = CurrentDeviceState::Ready(device.clone());
                Ok(device)
            }
            Err(err) => {
                warn!(device_id = %device.device_id, error = %err, "device failed readiness verification");
                *self.current.lock().await = CurrentDeviceState::Unresponsive;
                Err(CoreError::DeviceNotReady {
                    reason: format!("readiness verification failed for {}: {err}", device.device_id),
                })
            }
        }
    }

    async fn reusable_current(&self, platform: Platform) -> Option<Device> {
        let current = self.current.lock().await.clone();
        match current {
            CurrentDeviceState::Ready(device) if device.platform == platform => Some(device),
            _ => None,
        }
    }

    async fn boot_first_image(&self, platform: Platform) -> Result<Device, CoreError> {
        let registry = self.registry_for(platform);
        let images = registry.list_images().await?;
        let image = images.into_iter().next().ok_or_else(|| CoreError::DeviceNotReady {
            reason: format!("no booted {} device and no image available to boot", platform.as_str()),
        })?;
        registry.boot(&image).await?;
        registry.wait_ready(&image.identifier, self.boot_timeout).await
    }
}

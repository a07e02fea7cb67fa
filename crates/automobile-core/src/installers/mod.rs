//! Accessibility-service and virtual-keyboard installers (§4.9 Modules H/I).
//!
//! Both installers step through the same five-stage machine
//! (`NotInstalled -> Installed -> Enabled -> Active`); only the platform
//! commands issued at each stage differ, so they share the [`Installer`]
//! trait and the [`StatusCache`] TTL bookkeeping.

pub mod accessibility;
pub mod keyboard;

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::CoreError;

const INSTALLED_TTL: Duration = Duration::from_secs(30 * 60);
const ENABLED_TTL: Duration = Duration::from_secs(30 * 60);
const ACTIVE_TTL: Duration = Duration::from_secs(60 * 60);

/// Stage of the install/enable/activate state machine (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    NotInstalled,
    Installed,
    Enabled,
    Active,
}

struct TtlSlot {
    value: Option<bool>,
    stamped_at: Instant,
    ttl: Duration,
}

impl TtlSlot {
    fn new(ttl: Duration) -> Self {
        Self {
            value: None,
            stamped_at: Instant::now(),
            ttl,
        }
    }

    fn get(&self) -> Option<bool> {
        if self.stamped_at.elapsed() < self.ttl {
            self.value
        } else {
            None
        }
    }

    fn set(&mut self, value: bool) {
        self.value = Some(value);
        self.stamped_at = Instant::now();
    }

    fn invalidate(&mut self) {
        self.value = None;
    }
}

/// Per-installer `installed`/`enabled`/`active` status cache, each its own
/// TTL-stamped slot (§4.9).
pub struct StatusCache {
    installed: Mutex<TtlSlot>,
    enabled: Mutex<TtlSlot>,
    active: Mutex<TtlSlot>,
}

impl Default for StatusCache {
    fn default() -> Self {
        Self {
            installed: Mutex::new(TtlSlot::new(INSTALLED_TTL)),
            enabled: Mutex::new(TtlSlot::new(ENABLED_TTL)),
            active: Mutex::new(TtlSlot::new(ACTIVE_TTL)),
        }
    }
}

impl StatusCache {
    pub fn cached_installed(&self) -> Option<bool> {
        self.installed.lock().unwrap().get()
    }

    pub fn cached_enabled(&self) -> Option<bool> {
        self.enabled.lock().unwrap().get()
    }

    pub fn cached_active(&self) -> Option<bool> {
        self.active.lock().unwrap().get()
    }

    pub fn set_installed(&self, value: bool) {
        self.installed.lock().unwrap().set(value);
    }

    pub fn set_enabled(&self, value: bool) {
        self.enabled.lock().unwrap().set(value);
    }

    pub fn set_active(&self, value: bool) {
        self.active.lock().unwrap().set(value);
    }

    /// Marks every cached status as stale; called whenever an
    /// [`CoreError::ActionableError`] surfaces mid-setup (§4.9).
    pub fn invalidate_all(&self) {
        self.installed.lock().unwrap().invalidate();
        self.enabled.lock().unwrap().invalidate();
        self.active.lock().unwrap().invalidate();
    }
}

/// Shared shape for the accessibility-service and virtual-keyboard
/// installers (§4.9).
#[async_trait]
pub trait Installer: Send + Sync {
    fn status_cache(&self) -> &StatusCache;

    async fn check_installed(&self) -> Result<bool, CoreError>;
    async fn install(&self) -> Result<(), CoreError>;
    async fn check_enabled(&self) -> Result<bool, CoreError>;
    async fn enable(&self) -> Result<(), CoreError>;
    async fn check_active(&self) -> Result<bool, CoreError>;
    async fn activate(&self) -> Result<(), CoreError>;

    /// Drives the device through whatever stages are needed to reach
    /// `Active`, consulting and refreshing the status cache at each step.
    async fn ensure_active(&self) -> Result<(), CoreError> {
        let installed = match self.status_cache().cached_installed() {
            Some(value) => value,
            None => {
                let value = self.check_installed().await?;
                self.status_cache().set_installed(value);
                value
            }
        };
        if !installed {
            self.install().await?;
            self.status_cache().set_installed(true);
        }

        let enabled = match self.status_cache().cached_enabled() {
            Some(value) => value,
            None => {
                let value = self.check_enabled().await?;
                self.status_cache().set_enabled(value);
                value
            }
        };
        if !enabled {
            self.enable().await?;
            self.status_cache().set_enabled(true);
        }

        let active = match self.status_cache().cached_active() {
            Some(value) => value,
            None => {
                let value = self.check_active().await?;
                self.status_cache().set_active(value);
                value
            }
        };
        if !active {
            self.activate().await?;
            self.status_cache().set_active(true);
        }
        Ok(())
    }
}

/// Downloads `url` to `destination`, verifying both a minimum size and a
/// SHA-256 digest; deletes the file and returns [`CoreError::IntegrityError`]
/// on mismatch (§4.9).
pub(crate) async fn download_and_verify(
    client: &reqwest::Client,
    url: &str,
    destination: &std::path::Path,
    expected_sha256: &str,
) -> Result<(), CoreError> {
    use sha2::{Digest, Sha256};

    let response = client.get(url).send().await?;
    let bytes = response.bytes().await?;
    if bytes.len() < 10 * 1024 {
        return Err(CoreError::IntegrityError {
            expected: format!(">{} bytes", 10 * 1024),
            actual: format!("{} bytes", bytes.len()),
        });
    }

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let actual = format!("{:x}", hasher.finalize());
    if actual != expected_sha256 {
        let _ = tokio::fs::remove_file(destination).await;
        return Err(CoreError::IntegrityError {
            expected: expected_sha256.to_string(),
            actual,
        });
    }

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| CoreError::io(parent, source))?;
    }
    tokio::fs::write(destination, &bytes)
        .await
        .map_err(|source| CoreError::io(destination, source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_reports_none_until_set() {
        let slot = TtlSlot::new(Duration::from_secs(1));
        assert_eq!(slot.get(), None);
    }

    #[test]
    fn slot_expires_after_ttl() {
        let mut slot = TtlSlot::new(Duration::from_millis(1));
        slot.set(true);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(slot.get(), None);
    }

    #[test]
    fn status_cache_invalidate_all_clears_every_slot() {
        let cache = StatusCache::default();
        cache.set_installed(true);
        cache.set_enabled(true);
        cache.set_active(true);
        cache.invalidate_all();
        assert_eq!(cache.cached_installed(), None);
        assert_eq!(cache.cached_enabled(), None);
        assert_eq!(cache.cached_active(), None);
    }
}

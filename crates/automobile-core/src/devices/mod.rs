//! Device Registry (§4.3 Module C).

mod android;
mod ios;

pub use android::AndroidRegistry;
pub use ios::IosRegistry;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::CoreError;
use crate::types::{Device, DeviceInfo, Platform};

/// Cross-platform contract for enumerating and booting devices.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn list_booted(&self) -> Result<Vec<Device>, CoreError>;
    async fn list_images(&self) -> Result<Vec<DeviceInfo>, CoreError>;
    async fn boot(&self, image: &DeviceInfo) -> Result<(), CoreError>;
    async fn wait_ready(&self, device_id: &str, timeout: Duration) -> Result<Device, CoreError>;
    async fn kill(&self, device_id: &str) -> Result<(), CoreError>;
    fn platform(&self) -> Platform;
}

/// A short-TTL cache around a registry's booted-device list (§4.3: Android 5s).
pub(crate) struct TtlCache<T: Clone> {
    ttl: Duration,
    entry: Mutex<Option<(Instant, T)>>,
}

impl<T: Clone> TtlCache<T> {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    pub(crate) async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut guard = self.entry.lock().await;
        if let Some((fetched_at, value)) = guard.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(value.clone());
            }
        }
        let value = fetch().await?;
        *guard = Some((Instant::now(), value.clone()));
        Ok(value)
    }
}

pub(crate) const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

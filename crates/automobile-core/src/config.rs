//! Configuration Store (§4.14/§6 Module O in spec.md; folded into this crate
//! rather than `automobile-authoring` to avoid a dependency cycle — both the
//! Device Session Manager (module J, this crate) and the Test Authoring
//! Manager (module M, `automobile-authoring`) read it at construction, and
//! `automobile-authoring` already depends on this crate for [`Device`] and
//! [`CoreError`]; see DESIGN.md).
//!
//! Re-expressed as an explicit, constructed struct rather than a lazy
//! singleton, per the Redesign Flags in spec.md §9: callers own a
//! `ConfigStore` and pass it to whatever needs it, and tests construct their
//! own pointed at a `tempfile` directory.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{AppConfig, DeviceConfig};

/// The on-disk shape at `$HOME/.auto-mobile/config.json` (spec.md §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    devices: Vec<DeviceConfig>,
    #[serde(default)]
    apps: Vec<AppConfig>,
}

/// Persists [`AppConfig`]/[`DeviceConfig`] collections to disk. Writes are
/// synchronous and flushed via a temp-file-then-rename so a crash mid-write
/// never leaves a torn `config.json` (spec.md §3: "writes are flushed
/// synchronously").
pub struct ConfigStore {
    path: PathBuf,
    state: Mutex<ConfigFile>,
}

impl ConfigStore {
    /// Loads (or initializes, if absent) the config file at `path`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => ConfigFile::default(),
            Err(source) => return Err(CoreError::io(&path, source)),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Loads from the canonical `$HOME/.auto-mobile/config.json` location.
    pub fn load_default() -> Result<Self, CoreError> {
        let home = std::env::var_os("HOME").map(PathBuf::from).ok_or_else(|| {
            CoreError::Io {
                path: PathBuf::from("$HOME"),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "HOME environment variable is not set",
                ),
            }
        })?;
        Self::load(home.join(".auto-mobile").join("config.json"))
    }

    pub fn apps(&self) -> Vec<AppConfig> {
        self.state.lock().unwrap().apps.clone()
    }

    pub fn devices(&self) -> Vec<DeviceConfig> {
        self.state.lock().unwrap().devices.clone()
    }

    pub fn app(&self, app_id: &str) -> Option<AppConfig> {
        self.state
            .lock()
            .unwrap()
            .apps
            .iter()
            .find(|app| app.app_id == app_id)
            .cloned()
    }

    pub fn device(&self, device_id: &str) -> Option<DeviceConfig> {
        self.state
            .lock()
            .unwrap()
            .devices
            .iter()
            .find(|device| device.device_id == device_id)
            .cloned()
    }

    /// Inserts or replaces the `AppConfig` keyed by `app_id`, then flushes.
    pub fn upsert_app(&self, app: AppConfig) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.apps.iter_mut().find(|a| a.app_id == app.app_id) {
            *existing = app;
        } else {
            state.apps.push(app);
        }
        self.flush(&state)
    }

    /// Inserts or replaces the `DeviceConfig` keyed by `device_id`, then flushes.
    pub fn upsert_device(&self, device: DeviceConfig) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .devices
            .iter_mut()
            .find(|d| d.device_id == device.device_id)
        {
            *existing = device;
        } else {
            state.devices.push(device);
        }
        self.flush(&state)
    }

    fn flush(&self, state: &ConfigFile) -> Result<(), CoreError> {
        write_atomic(&self.path, state)
    }
}

fn write_atomic(path: &Path, state: &ConfigFile) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| CoreError::io(parent, source))?;
    }
    let serialized = serde_json::to_string_pretty(state)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, serialized).map_err(|source| CoreError::io(&tmp_path, source))?;
    std::fs::rename(&tmp_path, path).map_err(|source| CoreError::io(path, source))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceMode, Platform};
    use std::collections::HashMap;

    #[test]
    fn loads_empty_store_when_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("config.json")).unwrap();
        assert!(store.apps().is_empty());
        assert!(store.devices().is_empty());
    }

    #[test]
    fn upsert_app_persists_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::load(&path).unwrap();
        store
            .upsert_app(AppConfig {
                app_id: "com.example".into(),
                source_dir: Some("/tmp/src".into()),
                platform: Platform::Android,
                data: HashMap::new(),
            })
            .unwrap();

        let reloaded = ConfigStore::load(&path).unwrap();
        assert_eq!(reloaded.apps().len(), 1);
        assert_eq!(reloaded.apps()[0].app_id, "com.example");
    }

    #[test]
    fn upsert_app_replaces_existing_by_app_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("config.json")).unwrap();
        store
            .upsert_app(AppConfig {
                app_id: "com.example".into(),
                source_dir: None,
                platform: Platform::Android,
                data: HashMap::new(),
            })
            .unwrap();
        store
            .upsert_app(AppConfig {
                app_id: "com.example".into(),
                source_dir: Some("/tmp/updated".into()),
                platform: Platform::Android,
                data: HashMap::new(),
            })
            .unwrap();
        let apps = store.apps();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].source_dir.as_deref(), Some("/tmp/updated"));
    }

    #[test]
    fn upsert_device_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("config.json")).unwrap();
        store
            .upsert_device(DeviceConfig {
                platform: Platform::Ios,
                device_id: "udid-1".into(),
                mode: DeviceMode::Exploration {
                    deep_link_skipping: false,
                },
            })
            .unwrap();
        assert_eq!(store.devices().len(), 1);
        assert!(store.device("udid-1").is_some());
        assert!(store.device("missing").is_none());
    }
}

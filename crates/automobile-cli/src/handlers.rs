//! Tool handlers for the administrative tools named in spec.md §4.13's
//! authoring exclusion list (`listDevices`, `getConfig`, `config`,
//! `setActiveDevice`, `startDevice`, `killEmulator`, `listDeviceImages`,
//! `checkRunningEmulators`) plus `observe`. These are the tools the
//! authoring manager always drops from a recorded plan, so they are the
//! natural administrative surface for `automobile-cli` to expose directly
//! through the tool registry (module L) rather than reinventing a
//! parallel non-tool code path.
//!
//! The feature-specific gesture tools (`tapOn`, `swipe`, `type`, ...) are
//! out of scope per spec.md §1 ("specified only by their contract on the
//! execution layer") and are not registered here.

use std::sync::Arc;

use async_trait::async_trait;
use automobile_core::{
    ConfigStore, Device, DeviceConfig, DeviceInfo, DeviceRegistry, LifecycleState,
    ObservationCache, Platform, PlatformPreference, SessionManager,
};
use automobile_events::LifecycleMonitor;
use automobile_registry::{ToolHandler, ToolRegistry};
use serde::Deserialize;
use serde_json::{json, Value};

fn parse_platform(raw: Option<&str>) -> Result<Option<Platform>, String> {
    match raw {
        None => Ok(None),
        Some("android") => Ok(Some(Platform::Android)),
        Some("ios") => Ok(Some(Platform::Ios)),
        Some(other) => Err(format!("unknown platform `{other}`")),
    }
}

fn registry_for<'a>(
    android: &'a Arc<dyn DeviceRegistry>,
    ios: &'a Arc<dyn DeviceRegistry>,
    platform: Platform,
) -> &'a Arc<dyn DeviceRegistry> {
    match platform {
        Platform::Android => android,
        Platform::Ios => ios,
    }
}

fn device_json(device: &Device) -> Value {
    json!({
        "deviceId": device.device_id,
        "name": device.name,
        "platform": device.platform.as_str(),
        "state": match device.state {
            LifecycleState::Shutdown => "shutdown",
            LifecycleState::Booting => "booting",
            LifecycleState::Booted => "booted",
            LifecycleState::Unresponsive => "unresponsive",
        },
    })
}

fn image_json(image: &DeviceInfo) -> Value {
    json!({
        "identifier": image.identifier,
        "name": image.name,
        "platform": image.platform.as_str(),
    })
}

struct ListDevicesHandler {
    android: Arc<dyn DeviceRegistry>,
    ios: Arc<dyn DeviceRegistry>,
}

#[derive(Deserialize, Default)]
struct PlatformParams {
    platform: Option<String>,
}

#[async_trait]
impl ToolHandler for ListDevicesHandler {
    async fn handle(&self, params: Value) -> Result<Value, String> {
        let params: PlatformParams = serde_json::from_value(params).map_err(|e| e.to_string())?;
        let platform = parse_platform(params.platform.as_deref())?;

        let mut devices = Vec::new();
        if platform.is_none() || platform == Some(Platform::Android) {
            devices.extend(self.android.list_booted().await.map_err(|e| e.to_string())?);
        }
        if platform.is_none() || platform == Some(Platform::Ios) {
            devices.extend(self.ios.list_booted().await.map_err(|e| e.to_string())?);
        }
        Ok(json!({ "devices": devices.iter().map(device_json).collect::<Vec<_>>() }))
    }
}

struct ListDeviceImagesHandler {
    android: Arc<dyn DeviceRegistry>,
    ios: Arc<dyn DeviceRegistry>,
}

#[async_trait]
impl ToolHandler for ListDeviceImagesHandler {
    async fn handle(&self, params: Value) -> Result<Value, String> {
        let params: PlatformParams = serde_json::from_value(params).map_err(|e| e.to_string())?;
        let platform = parse_platform(params.platform.as_deref())?;

        let mut images = Vec::new();
        if platform.is_none() || platform == Some(Platform::Android) {
            images.extend(self.android.list_images().await.map_err(|e| e.to_string())?);
        }
        if platform.is_none() || platform == Some(Platform::Ios) {
            images.extend(self.ios.list_images().await.map_err(|e| e.to_string())?);
        }
        Ok(json!({ "images": images.iter().map(image_json).collect::<Vec<_>>() }))
    }
}

struct CheckRunningEmulatorsHandler {
    android: Arc<dyn DeviceRegistry>,
    ios: Arc<dyn DeviceRegistry>,
}

#[async_trait]
impl ToolHandler for CheckRunningEmulatorsHandler {
    async fn handle(&self, _params: Value) -> Result<Value, String> {
        let android = self.android.list_booted().await.map_err(|e| e.to_string())?;
        let ios = self.ios.list_booted().await.map_err(|e| e.to_string())?;
        Ok(json!({
            "running": !android.is_empty() || !ios.is_empty(),
            "android": android.iter().map(device_json).collect::<Vec<_>>(),
            "ios": ios.iter().map(device_json).collect::<Vec<_>>(),
        }))
    }
}

struct StartDeviceHandler {
    android: Arc<dyn DeviceRegistry>,
    ios: Arc<dyn DeviceRegistry>,
}

#[derive(Deserialize)]
struct StartDeviceParams {
    platform: String,
    identifier: String,
}

#[async_trait]
impl ToolHandler for StartDeviceHandler {
    async fn handle(&self, params: Value) -> Result<Value, String> {
        let params: StartDeviceParams = serde_json::from_value(params).map_err(|e| e.to_string())?;
        let platform = parse_platform(Some(&params.platform))?
            .ok_or_else(|| "platform is required".to_string())?;
        let registry = registry_for(&self.android, &self.ios, platform);
        let image = DeviceInfo {
            identifier: params.identifier.clone(),
            name: params.identifier.clone(),
            platform,
        };
        registry.boot(&image).await.map_err(|e| e.to_string())?;
        Ok(json!({ "booting": params.identifier }))
    }
}

struct KillEmulatorHandler {
    android: Arc<dyn DeviceRegistry>,
    ios: Arc<dyn DeviceRegistry>,
}

#[derive(Deserialize)]
struct KillEmulatorParams {
    platform: String,
    #[serde(rename = "deviceId")]
    device_id: String,
}

#[async_trait]
impl ToolHandler for KillEmulatorHandler {
    async fn handle(&self, params: Value) -> Result<Value, String> {
        let params: KillEmulatorParams = serde_json::from_value(params).map_err(|e| e.to_string())?;
        let platform = parse_platform(Some(&params.platform))?
            .ok_or_else(|| "platform is required".to_string())?;
        let registry = registry_for(&self.android, &self.ios, platform);
        registry
            .kill(&params.device_id)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({ "killed": params.device_id }))
    }
}

struct GetConfigHandler {
    config: Arc<ConfigStore>,
}

#[async_trait]
impl ToolHandler for GetConfigHandler {
    async fn handle(&self, _params: Value) -> Result<Value, String> {
        Ok(json!({
            "apps": self.config.apps(),
            "devices": self.config.devices(),
        }))
    }
}

struct ConfigHandler {
    config: Arc<ConfigStore>,
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum ConfigParams {
    App {
        #[serde(flatten)]
        app: automobile_core::AppConfig,
    },
    Device {
        #[serde(flatten)]
        device: DeviceConfig,
    },
}

#[async_trait]
impl ToolHandler for ConfigHandler {
    async fn handle(&self, params: Value) -> Result<Value, String> {
        let params: ConfigParams = serde_json::from_value(params).map_err(|e| e.to_string())?;
        match params {
            ConfigParams::App { app } => {
                self.config.upsert_app(app).map_err(|e| e.to_string())?;
            }
            ConfigParams::Device { device } => {
                self.config.upsert_device(device).map_err(|e| e.to_string())?;
            }
        }
        Ok(json!({ "saved": true }))
    }
}

struct SetActiveDeviceHandler {
    session: Arc<SessionManager>,
}

#[derive(Deserialize)]
struct SetActiveDeviceParams {
    platform: Option<String>,
    #[serde(rename = "deviceId")]
    device_id: Option<String>,
}

#[async_trait]
impl ToolHandler for SetActiveDeviceHandler {
    async fn handle(&self, params: Value) -> Result<Value, String> {
        let params: SetActiveDeviceParams =
            serde_json::from_value(params).map_err(|e| e.to_string())?;
        let preference = match parse_platform(params.platform.as_deref())? {
            Some(Platform::Android) => PlatformPreference::Android,
            Some(Platform::Ios) => PlatformPreference::Ios,
            None => PlatformPreference::Either,
        };
        let device = self
            .session
            .ensure_device_ready(preference, params.device_id.as_deref())
            .await
            .map_err(|e| e.to_string())?;
        Ok(device_json(&device))
    }
}

struct ObserveHandler {
    session: Arc<SessionManager>,
    observations: Arc<ObservationCache>,
}

#[async_trait]
impl ToolHandler for ObserveHandler {
    async fn handle(&self, _params: Value) -> Result<Value, String> {
        let device = match self.session.current_device().await {
            Some(device) => device,
            None => self
                .session
                .ensure_device_ready(PlatformPreference::Either, None)
                .await
                .map_err(|e| e.to_string())?,
        };
        let observation = self
            .observations
            .observe(&device, None)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "activeWindow": {
                "appId": observation.active_window.app_id,
                "activityName": observation.active_window.activity_name,
                "windowId": observation.active_window.window_id,
            },
            "tree": observation.tree,
            "fromCache": observation.from_cache,
        }))
    }
}

fn any_object_schema() -> Value {
    json!({ "type": "object" })
}

/// Registers every administrative tool (§4.13 exclusion list, plus
/// `observe`) against `registry`.
#[allow(clippy::too_many_arguments)]
pub fn register_administrative_tools(
    registry: &Arc<ToolRegistry>,
    session: Arc<SessionManager>,
    android: Arc<dyn DeviceRegistry>,
    ios: Arc<dyn DeviceRegistry>,
    observations: Arc<ObservationCache>,
    config: Arc<ConfigStore>,
    _lifecycle: Arc<LifecycleMonitor>,
) {
    registry
        .register(
            "listDevices",
            any_object_schema(),
            Arc::new(ListDevicesHandler {
                android: android.clone(),
                ios: ios.clone(),
            }),
        )
        .expect("listDevices schema compiles");

    registry
        .register(
            "listDeviceImages",
            any_object_schema(),
            Arc::new(ListDeviceImagesHandler {
                android: android.clone(),
                ios: ios.clone(),
            }),
        )
        .expect("listDeviceImages schema compiles");

    registry
        .register(
            "checkRunningEmulators",
            any_object_schema(),
            Arc::new(CheckRunningEmulatorsHandler {
                android: android.clone(),
                ios: ios.clone(),
            }),
        )
        .expect("checkRunningEmulators schema compiles");

    registry
        .register(
            "startDevice",
            json!({
                "type": "object",
                "properties": {
                    "platform": { "type": "string", "enum": ["android", "ios"] },
                    "identifier": { "type": "string" },
                },
                "required": ["platform", "identifier"],
            }),
            Arc::new(StartDeviceHandler {
                android: android.clone(),
                ios: ios.clone(),
            }),
        )
        .expect("startDevice schema compiles");

    registry
        .register(
            "killEmulator",
            json!({
                "type": "object",
                "properties": {
                    "platform": { "type": "string", "enum": ["android", "ios"] },
                    "deviceId": { "type": "string" },
                },
                "required": ["platform", "deviceId"],
            }),
            Arc::new(KillEmulatorHandler { android, ios }),
        )
        .expect("killEmulator schema compiles");

    registry
        .register(
            "getConfig",
            any_object_schema(),
            Arc::new(GetConfigHandler {
                config: config.clone(),
            }),
        )
        .expect("getConfig schema compiles");

    registry
        .register("config", any_object_schema(), Arc::new(ConfigHandler { config }))
        .expect("config schema compiles");

    registry
        .register(
            "setActiveDevice",
            any_object_schema(),
            Arc::new(SetActiveDeviceHandler {
                session: session.clone(),
            }),
        )
        .expect("setActiveDevice schema compiles");

    registry
        .register(
            "observe",
            any_object_schema(),
            Arc::new(ObserveHandler {
                session,
                observations,
            }),
        )
        .expect("observe schema compiles");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    struct FakeRegistry {
        platform: Platform,
        booted: Vec<Device>,
        images: Vec<DeviceInfo>,
    }

    #[async_trait]
    impl DeviceRegistry for FakeRegistry {
        async fn list_booted(&self) -> Result<Vec<Device>, automobile_core::CoreError> {
            Ok(self.booted.clone())
        }
        async fn list_images(&self) -> Result<Vec<DeviceInfo>, automobile_core::CoreError> {
            Ok(self.images.clone())
        }
        async fn boot(&self, _image: &DeviceInfo) -> Result<(), automobile_core::CoreError> {
            Ok(())
        }
        async fn wait_ready(
            &self,
            device_id: &str,
            _timeout: Duration,
        ) -> Result<Device, automobile_core::CoreError> {
            Ok(Device {
                device_id: device_id.to_string(),
                name: device_id.to_string(),
                platform: self.platform,
                state: LifecycleState::Booted,
            })
        }
        async fn kill(&self, _device_id: &str) -> Result<(), automobile_core::CoreError> {
            Ok(())
        }
        fn platform(&self) -> Platform {
            self.platform
        }
    }

    fn device(id: &str, platform: Platform) -> Device {
        Device {
            device_id: id.to_string(),
            name: id.to_string(),
            platform,
            state: LifecycleState::Booted,
        }
    }

    #[tokio::test]
    async fn list_devices_filters_by_requested_platform() {
        let handler = ListDevicesHandler {
            android: Arc::new(FakeRegistry {
                platform: Platform::Android,
                booted: vec![device("emulator-5554", Platform::Android)],
                images: vec![],
            }),
            ios: Arc::new(FakeRegistry {
                platform: Platform::Ios,
                booted: vec![device("A1B2C3D4-E5F6-7890-ABCD-EF1234567890", Platform::Ios)],
                images: vec![],
            }),
        };
        let result = handler
            .handle(json!({ "platform": "android" }))
            .await
            .unwrap();
        let devices = result["devices"].as_array().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0]["deviceId"], "emulator-5554");
    }

    #[tokio::test]
    async fn list_devices_rejects_unknown_platform() {
        let handler = ListDevicesHandler {
            android: Arc::new(FakeRegistry {
                platform: Platform::Android,
                booted: vec![],
                images: vec![],
            }),
            ios: Arc::new(FakeRegistry {
                platform: Platform::Ios,
                booted: vec![],
                images: vec![],
            }),
        };
        let err = handler
            .handle(json!({ "platform": "windows" }))
            .await
            .unwrap_err();
        assert!(err.contains("unknown platform"));
    }

    #[tokio::test]
    async fn list_devices_with_no_platform_merges_both() {
        let handler = ListDevicesHandler {
            android: Arc::new(FakeRegistry {
                platform: Platform::Android,
                booted: vec![device("emulator-5554", Platform::Android)],
                images: vec![],
            }),
            ios: Arc::new(FakeRegistry {
                platform: Platform::Ios,
                booted: vec![device("A1B2C3D4-E5F6-7890-ABCD-EF1234567890", Platform::Ios)],
                images: vec![],
            }),
        };
        let result = handler.handle(json!({})).await.unwrap();
        assert_eq!(result["devices"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn check_running_emulators_reports_false_when_both_empty() {
        let handler = CheckRunningEmulatorsHandler {
            android: Arc::new(FakeRegistry {
                platform: Platform::Android,
                booted: vec![],
                images: vec![],
            }),
            ios: Arc::new(FakeRegistry {
                platform: Platform::Ios,
                booted: vec![],
                images: vec![],
            }),
        };
        let result = handler.handle(json!({})).await.unwrap();
        assert_eq!(result["running"], false);
    }

    #[tokio::test]
    async fn start_device_requires_platform_field() {
        let handler = StartDeviceHandler {
            android: Arc::new(FakeRegistry {
                platform: Platform::Android,
                booted: vec![],
                images: vec![],
            }),
            ios: Arc::new(FakeRegistry {
                platform: Platform::Ios,
                booted: vec![],
                images: vec![],
            }),
        };
        let err = handler.handle(json!({ "identifier": "Pixel_7" })).await.unwrap_err();
        assert!(!err.is_empty());
    }

    #[tokio::test]
    async fn start_device_boots_the_named_image() {
        let handler = StartDeviceHandler {
            android: Arc::new(FakeRegistry {
                platform: Platform::Android,
                booted: vec![],
                images: vec![],
            }),
            ios: Arc::new(FakeRegistry {
                platform: Platform::Ios,
                booted: vec![],
                images: vec![],
            }),
        };
        let result = handler
            .handle(json!({ "platform": "android", "identifier": "Pixel_7_API_34" }))
            .await
            .unwrap();
        assert_eq!(result["booting"], "Pixel_7_API_34");
    }

    #[tokio::test]
    async fn get_config_and_config_round_trip_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::load(dir.path().join("config.json")).unwrap());

        let config_handler = ConfigHandler {
            config: store.clone(),
        };
        config_handler
            .handle(json!({
                "kind": "app",
                "appId": "com.example",
                "sourceDir": "/src",
                "platform": "android",
                "data": {},
            }))
            .await
            .unwrap();

        let get_handler = GetConfigHandler {
            config: store.clone(),
        };
        let result = get_handler.handle(json!({})).await.unwrap();
        let apps = result["apps"].as_array().unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0]["appId"], "com.example");
    }

    #[tokio::test]
    async fn config_handler_rejects_unrecognized_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::load(dir.path().join("config.json")).unwrap());
        let handler = ConfigHandler { config: store };
        let err = handler.handle(json!({ "kind": "nonsense" })).await.unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn app_config_data_map_defaults_empty() {
        let app = automobile_core::AppConfig {
            app_id: "com.example".into(),
            source_dir: None,
            platform: Platform::Android,
            data: HashMap::new(),
        };
        assert!(app.data.is_empty());
    }
}

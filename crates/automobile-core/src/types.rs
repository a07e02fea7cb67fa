use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A platform the automation core can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

/// Caller-expressed platform preference when resolving a device (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformPreference {
    Android,
    Ios,
    Either,
}

/// Lifecycle state of a device as tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Shutdown,
    Booting,
    Booted,
    Unresponsive,
}

/// A platform-tagged endpoint (§3).
///
/// `device_id` is opaque and never parsed except by [`looks_like_ios_udid`],
/// used only as a last-resort disambiguation heuristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub name: String,
    pub platform: Platform,
    pub state: LifecycleState,
}

/// A stored simulator/emulator image that can be booted into a live [`Device`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub identifier: String,
    pub name: String,
    pub platform: Platform,
}

/// Returns true when `id` has the canonical hex-hyphen UUID shape
/// (`8-4-4-4-12` hex groups), the one heuristic the core applies to an
/// otherwise-opaque device identifier (§3, §4.3).
pub fn looks_like_ios_udid(id: &str) -> bool {
    let groups: Vec<&str> = id.split('-').collect();
    let expected_lengths = [8, 4, 4, 4, 12];
    if groups.len() != expected_lengths.len() {
        return false;
    }
    groups
        .iter()
        .zip(expected_lengths.iter())
        .all(|(group, len)| group.len() == *len && group.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Authoring mode recorded against a device identifier (§3, §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceMode {
    TestAuthoring { app_id: String, persist: bool },
    Exploration { deep_link_skipping: bool },
}

/// Per-device-identifier operating mode, persisted alongside [`AppConfig`] (§3, §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub platform: Platform,
    pub device_id: String,
    #[serde(flatten)]
    pub mode: DeviceMode,
}

/// A mapping from app identifier to source directory, platform, and opaque
/// data (§3, §6). Unique by `app_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub app_id: String,
    pub source_dir: Option<String>,
    pub platform: Platform,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

/// The foreground app + activity/scene name used as the observation cache's
/// primary key (§3, GLOSSARY).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveWindow {
    pub app_id: String,
    pub activity_name: String,
    pub window_id: Option<String>,
}

impl ActiveWindow {
    /// The raw string the fingerprint hash is derived from: `appId||activityName`.
    pub fn fingerprint_source(&self) -> String {
        format!("{}||{}", self.app_id, self.activity_name)
    }
}

/// A single node in a normalised view-hierarchy tree (§4.5).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub text: Option<String>,
    pub content_desc: Option<String>,
    pub resource_id: Option<String>,
    pub bounds: Option<String>,
    pub enabled: bool,
    pub clickable: bool,
    pub class: Option<String>,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Whether this node carries any attribute worth keeping on its own;
    /// nodes failing this test are collapsed into their children (§4.5).
    pub fn has_meaningful_attribute(&self) -> bool {
        self.text.as_deref().is_some_and(|s| !s.is_empty())
            || self.content_desc.as_deref().is_some_and(|s| !s.is_empty())
            || self.resource_id.as_deref().is_some_and(|s| !s.is_empty())
            || self.clickable
    }
}

/// Root of a dumped view hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub root: TreeNode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udid_heuristic_accepts_canonical_shape() {
        assert!(looks_like_ios_udid("A1B2C3D4-E5F6-7890-ABCD-EF1234567890"));
    }

    #[test]
    fn udid_heuristic_rejects_android_serial() {
        assert!(!looks_like_ios_udid("emulator-5554"));
        assert!(!looks_like_ios_udid("0123456789ABCDEF"));
    }

    #[test]
    fn fingerprint_source_joins_app_and_activity() {
        let window = ActiveWindow {
            app_id: "com.example".into(),
            activity_name: "MainActivity".into(),
            window_id: None,
        };
        assert_eq!(window.fingerprint_source(), "com.example||MainActivity");
    }
}

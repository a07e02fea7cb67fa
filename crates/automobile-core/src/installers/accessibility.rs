//! Accessibility-service installer (§4.9 Module H, Android only).

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::installers::{download_and_verify, Installer, StatusCache};
use crate::runner::{CommandRunner, CommandSpec};
use crate::types::{Device, TreeNode};
use crate::view_tree::ViewHierarchyDump;

const SERVICE_ID: &str = "com.automobile.a11y/.AutoMobileAccessibilityService";
const APK_URL: &str = "https://example.invalid/automobile-a11y.apk";
const EXPECTED_SHA256: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Text labels tapped in sequence to walk through Android's accessibility
/// settings flow (§4.9).
const ENABLE_TAP_SEQUENCE: &[&str] = &[
    "Open Accessibility Settings",
    "AutoMobile A11Y Service",
    "Use AutoMobile A11Y Service",
    "Allow",
];

pub struct AccessibilityInstaller {
    device: Device,
    runner: Arc<dyn CommandRunner>,
    client: reqwest::Client,
    status: StatusCache,
}

impl AccessibilityInstaller {
    pub fn new(device: Device, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            device,
            runner,
            client: reqwest::Client::new(),
            status: StatusCache::default(),
        }
    }

    async fn shell(&self, args: Vec<String>) -> Result<String, CoreError> {
        let mut full = vec![
            "-s".to_string(),
            self.device.device_id.clone(),
            "shell".to_string(),
        ];
        full.extend(args);
        let output = self.runner.execute(CommandSpec::new("adb", full)).await?;
        Ok(output.stdout_string())
    }

    async fn tap_by_text(&self, text: &str) -> Result<(), CoreError> {
        let dump = ViewHierarchyDump::new(self.runner.clone());
        let tree = dump.dump_android(&self.device).await?;
        let target = find_by_text(&tree.root, text).ok_or_else(|| CoreError::ActionableError(
            format!("could not find an element with text \"{text}\" during accessibility enable flow"),
        ))?;
        let (x, y) = center_of(target).ok_or_else(|| CoreError::ActionableError(
            format!("element with text \"{text}\" has no usable bounds"),
        ))?;
        self.shell(vec![
            "input".into(),
            "tap".into(),
            x.to_string(),
            y.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn press_back(&self) -> Result<(), CoreError> {
        self.shell(vec!["input".into(), "keyevent".into(), "KEYCODE_BACK".into()])
            .await?;
        Ok(())
    }
}

fn find_by_text<'a>(node: &'a TreeNode, text: &str) -> Option<&'a TreeNode> {
    let matches = node.text.as_deref() == Some(text) || node.content_desc.as_deref() == Some(text);
    if matches {
        return Some(node);
    }
    node.children.iter().find_map(|child| find_by_text(child, text))
}

fn center_of(node: &TreeNode) -> Option<(i64, i64)> {
    let bounds = node.bounds.as_deref()?;
    let (left, top, right, bottom) = parse_bounds(bounds)?;
    Some(((left + right) / 2, (top + bottom) / 2))
}

fn parse_bounds(bounds: &str) -> Option<(i64, i64, i64, i64)> {
    let digits: Vec<i64> = bounds
        .split(|c: char| !c.is_ascii_digit() && c != '-')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    if digits.len() == 4 {
        Some((digits[0], digits[1], digits[2], digits[3]))
    } else {
        None
    }
}

#[async_trait]
impl Installer for AccessibilityInstaller {
    fn status_cache(&self) -> &StatusCache {
        &self.status
    }

    async fn check_installed(&self) -> Result<bool, CoreError> {
        let output = self
            .shell(vec!["pm".into(), "list".into(), "packages".into()])
            .await?;
        Ok(output.contains("com.automobile.a11y"))
    }

    async fn install(&self) -> Result<(), CoreError> {
        let apk_path = std::path::PathBuf::from("/tmp/automobile-a11y/automobile-a11y.apk");
        download_and_verify(&self.client, APK_URL, &apk_path, EXPECTED_SHA256).await?;
        let output = self
            .runner
            .execute(CommandSpec::new(
                "adb",
                vec![
                    "-s".into(),
                    self.device.device_id.clone(),
                    "install".into(),
                    "-r".into(),
                    apk_path.to_string_lossy().into_owned(),
                ],
            ))
            .await?;
        if !output.stdout_string().contains("Success") {
            return Err(CoreError::ActionableError(
                "adb install did not report Success for the accessibility service".into(),
            ));
        }
        Ok(())
    }

    async fn check_enabled(&self) -> Result<bool, CoreError> {
        let output = self
            .shell(vec![
                "settings".into(),
                "get".into(),
                "secure".into(),
                "enabled_accessibility_services".into(),
            ])
            .await?;
        Ok(output.contains(SERVICE_ID))
    }

    /// Walks the scripted tap sequence, then presses back three times to
    /// return to the foreground app (§4.9).
    async fn enable(&self) -> Result<(), CoreError> {
        for label in ENABLE_TAP_SEQUENCE {
            self.tap_by_text(label).await?;
        }
        for _ in 0..3 {
            self.press_back().await?;
        }
        Ok(())
    }

    async fn check_active(&self) -> Result<bool, CoreError> {
        self.check_enabled().await
    }

    async fn activate(&self) -> Result<(), CoreError> {
        // Accessibility services become active as soon as they're enabled;
        // there is no separate "set active" step as there is for the IME.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nested_element_by_text() {
        let mut root = TreeNode::default();
        let mut child = TreeNode::default();
        child.text = Some("Allow".into());
        child.bounds = Some("[0,0][100,50]".into());
        root.children.push(child);
        let found = find_by_text(&root, "Allow").expect("should find nested node");
        assert_eq!(center_of(found), Some((50, 25)));
    }

    #[test]
    fn missing_text_returns_none() {
        let root = TreeNode::default();
        assert!(find_by_text(&root, "Allow").is_none());
    }

    #[test]
    fn parses_bounds_string() {
        assert_eq!(parse_bounds("[10,20][110,70]"), Some((10, 20, 110, 70)));
    }
}

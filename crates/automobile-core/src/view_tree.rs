//! View-Hierarchy Dump (§4.5 Module E).

use std::sync::Arc;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::CoreError;
use crate::runner::{CommandRunner, CommandSpec};
use crate::types::{Device, Tree, TreeNode};
use crate::wda::WdaHost;

/// Obtains the UI tree for a device and normalises it into the common
/// [`Tree`] shape. This module implements only the uncached primitive; the
/// `cache` flag on the higher-level observation API (module F) decides
/// whether a call is routed through here at all.
pub struct ViewHierarchyDump {
    runner: Arc<dyn CommandRunner>,
}

impl ViewHierarchyDump {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    pub async fn dump_android(&self, device: &Device) -> Result<Tree, CoreError> {
        let inline = self
            .runner
            .execute(CommandSpec::new(
                "adb",
                vec![
                    "-s".into(),
                    device.device_id.clone(),
                    "shell".into(),
                    "uiautomator dump /sdcard/window_dump.xml && cat /sdcard/window_dump.xml && rm /sdcard/window_dump.xml".into(),
                ],
            ))
            .await;

        let xml = match inline {
            Ok(output) if looks_like_xml(&output.stdout_string()) => output.stdout_string(),
            _ => self.dump_android_via_pull(device).await?,
        };

        parse_uiautomator_xml(&xml)
    }

    async fn dump_android_via_pull(&self, device: &Device) -> Result<String, CoreError> {
        self.runner
            .execute(CommandSpec::new(
                "adb",
                vec![
                    "-s".into(),
                    device.device_id.clone(),
                    "shell".into(),
                    "uiautomator".into(),
                    "dump".into(),
                    "/sdcard/window_dump.xml".into(),
                ],
            ))
            .await?;
        let local = format!("/tmp/automobile-{}-window_dump.xml", device.device_id);
        self.runner
            .execute(CommandSpec::new(
                "adb",
                vec![
                    "-s".into(),
                    device.device_id.clone(),
                    "pull".into(),
                    "/sdcard/window_dump.xml".into(),
                    local.clone(),
                ],
            ))
            .await?;
        let xml = tokio::fs::read_to_string(&local)
            .await
            .map_err(|source| CoreError::io(&local, source))?;
        let _ = self
            .runner
            .execute(CommandSpec::new(
                "adb",
                vec![
                    "-s".into(),
                    device.device_id.clone(),
                    "shell".into(),
                    "rm".into(),
                    "/sdcard/window_dump.xml".into(),
                ],
            ))
            .await;
        Ok(xml)
    }

    pub async fn dump_ios(&self, wda: &WdaHost) -> Result<Tree, CoreError> {
        let xml = wda.source_xml().await?;
        Ok(normalise_xcuitest_xml(&xml))
    }
}

fn looks_like_xml(stdout: &str) -> bool {
    stdout.trim_start().starts_with("<?xml") || stdout.trim_start().starts_with("<hierarchy")
}

/// Parses `uiautomator dump` XML (`<hierarchy><node .../></hierarchy>`) into
/// the common [`Tree`] shape.
fn parse_uiautomator_xml(xml: &str) -> Result<Tree, CoreError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<TreeNode> = Vec::new();
    let mut root: Option<TreeNode> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) if tag.name().as_ref() == b"node" => {
                stack.push(node_from_attributes(&tag)?);
            }
            Ok(Event::Empty(tag)) if tag.name().as_ref() == b"node" => {
                let node = node_from_attributes(&tag)?;
                attach_or_set_root(&mut stack, &mut root, node);
            }
            Ok(Event::End(tag)) if tag.name().as_ref() == b"node" => {
                if let Some(node) = stack.pop() {
                    attach_or_set_root(&mut stack, &mut root, node);
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(CoreError::ViewHierarchyParse(err.to_string())),
            _ => {}
        }
    }

    let root = root.ok_or_else(|| {
        CoreError::ViewHierarchyParse("no <node> elements found in uiautomator dump".into())
    })?;
    Ok(Tree {
        root: collapse_meaningless(root),
    })
}

fn attach_or_set_root(stack: &mut Vec<TreeNode>, root: &mut Option<TreeNode>, node: TreeNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else {
        *root = Some(node);
    }
}

fn node_from_attributes(tag: &quick_xml::events::BytesStart) -> Result<TreeNode, CoreError> {
    let mut node = TreeNode::default();
    for attribute in tag.attributes().flatten() {
        let key = attribute.key.as_ref();
        let value = attribute
            .decode_and_unescape_value(tag.decoder())
            .map_err(|e| CoreError::ViewHierarchyParse(e.to_string()))?
            .into_owned();
        match key {
            b"text" => node.text = non_empty(value),
            b"content-desc" => node.content_desc = non_empty(value),
            b"resource-id" => node.resource_id = non_empty(value),
            b"bounds" => node.bounds = non_empty(value),
            b"enabled" => node.enabled = value == "true",
            b"clickable" => node.clickable = value == "true",
            b"class" => node.class = non_empty(value),
            _ => {}
        }
    }
    Ok(node)
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Collapses nodes lacking any meaningful attribute into their children,
/// depth-first post-order (§4.5).
fn collapse_meaningless(mut node: TreeNode) -> Tree {
    fn collapse(node: TreeNode) -> Vec<TreeNode> {
        let children: Vec<TreeNode> = node
            .children
            .into_iter()
            .flat_map(collapse)
            .collect();
        let mut flattened = node;
        flattened.children = children;
        if flattened.has_meaningful_attribute() || !flattened.children.is_empty() {
            vec![flattened]
        } else {
            Vec::new()
        }
    }
    node.children = node.children.into_iter().flat_map(collapse).collect();
    Tree { root: node }
}

/// Normalises WebDriverAgent's XCUIElementType XML into the common [`Tree`]
/// shape (§4.5): `label`/`value` → `content_desc`, `name`/`identifier` →
/// `resource_id`, `rect` → `bounds=[x,y][x+w,y+h]`, raw element type → `class`.
fn normalise_xcuitest_xml(xml: &str) -> Tree {
    // WebDriverAgent's /source XML nests elements by tag name
    // (XCUIElementTypeApplication, XCUIElementTypeButton, ...) rather than a
    // uniform `node` tag, so this walks generically by element depth instead
    // of relying on a fixed tag name.
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<TreeNode> = vec![TreeNode::default()];

    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) => {
                stack.push(xcui_node_from_tag(&tag));
            }
            Ok(Event::Empty(tag)) => {
                let node = xcui_node_from_tag(&tag);
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() > 1 {
                    let node = stack.pop().unwrap();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(node);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }

    let synthetic_root = stack.pop().unwrap_or_default();
    let root = if synthetic_root.children.len() == 1 {
        synthetic_root.children.into_iter().next().unwrap()
    } else {
        synthetic_root
    };
    collapse_meaningless(root)
}

fn xcui_node_from_tag(tag: &quick_xml::events::BytesStart) -> TreeNode {
    let mut node = TreeNode::default();
    node.class = Some(String::from_utf8_lossy(tag.name().as_ref()).into_owned());
    let mut rect_parts: (Option<i64>, Option<i64>, Option<i64>, Option<i64>) =
        (None, None, None, None);
    for attribute in tag.attributes().flatten() {
        let Ok(value) = attribute.decode_and_unescape_value(tag.decoder()) else {
            continue;
        };
        let value = value.into_owned();
        match attribute.key.as_ref() {
            b"label" | b"value" if node.content_desc.is_none() => {
                node.content_desc = non_empty(value)
            }
            b"name" | b"identifier" if node.resource_id.is_none() => {
                node.resource_id = non_empty(value)
            }
            b"x" => rect_parts.0 = value.parse().ok(),
            b"y" => rect_parts.1 = value.parse().ok(),
            b"width" => rect_parts.2 = value.parse().ok(),
            b"height" => rect_parts.3 = value.parse().ok(),
            b"enabled" => node.enabled = value == "true",
            b"accessible" => node.clickable = value == "true",
            _ => {}
        }
    }
    if let (Some(x), Some(y), Some(w), Some(h)) =
        (rect_parts.0, rect_parts.1, rect_parts.2, rect_parts.3)
    {
        node.bounds = Some(format!("[{x},{y}][{},{}]", x + w, y + h));
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_uiautomator_dump_and_collapses_empty_nodes() {
        let xml = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node index="0" text="" resource-id="" class="android.widget.FrameLayout" bounds="[0,0][1080,2400]" enabled="true" clickable="false">
    <node index="0" text="Hello" resource-id="com.example:id/label" class="android.widget.TextView" bounds="[0,0][200,50]" enabled="true" clickable="false" />
    <node index="1" text="" resource-id="" class="android.view.View" bounds="[0,50][1080,100]" enabled="true" clickable="false" />
  </node>
</hierarchy>"#;
        let tree = parse_uiautomator_xml(xml).unwrap();
        // The empty wrapper view should have been collapsed away, leaving
        // the meaningful "Hello" text node as the only child.
        assert_eq!(tree.root.children.len(), 1);
        assert_eq!(tree.root.children[0].text.as_deref(), Some("Hello"));
    }

    #[test]
    fn rejects_non_xml_output() {
        assert!(!looks_like_xml("adb: error: no devices/emulators found"));
    }

    #[test]
    fn normalises_xcuitest_bounds() {
        let xml = r#"<XCUIElementTypeApplication name="MyApp">
  <XCUIElementTypeButton name="submit" label="Submit" x="10" y="20" width="100" height="40" enabled="true" accessible="true" />
</XCUIElementTypeApplication>"#;
        let tree = normalise_xcuitest_xml(xml);
        assert_eq!(tree.root.children.len(), 1);
        let button = &tree.root.children[0];
        assert_eq!(button.bounds.as_deref(), Some("[10,20][110,60]"));
        assert_eq!(button.content_desc.as_deref(), Some("Submit"));
    }
}

#![forbid(unsafe_code)]
//! Device session management, command execution, and observation caching for
//! the AutoMobile device-automation core.
//!
//! This crate implements Modules A-J and O of the device-automation core: the
//! command runner, tool-location discovery, device registry, window/app
//! probe, view-hierarchy dump, observation cache, screenshot pipeline, the
//! WebDriverAgent host, the accessibility/keyboard installers, the device
//! session manager, and the on-disk configuration store. It has no
//! dependency on any other workspace crate.

pub mod cache;
pub mod config;
pub mod devices;
pub mod discovery;
pub mod error;
pub mod installers;
pub mod probe;
pub mod runner;
pub mod screenshot;
pub mod session;
pub mod types;
pub mod view_tree;
pub mod wda;

pub use cache::{Observation, ObservationCache};
pub use config::ConfigStore;
pub use devices::{AndroidRegistry, DeviceRegistry, IosRegistry};
pub use discovery::ToolLocator;
pub use error::CoreError;
pub use installers::accessibility::AccessibilityInstaller;
pub use installers::keyboard::KeyboardInstaller;
pub use installers::Installer;
pub use probe::WindowProbe;
pub use runner::{CommandOutput, CommandRunner, CommandSpec, TokioCommandRunner};
pub use screenshot::ScreenshotPipeline;
pub use session::SessionManager;
pub use types::{
    ActiveWindow, AppConfig, Device, DeviceConfig, DeviceInfo, DeviceMode, LifecycleState,
    Platform, PlatformPreference, Tree, TreeNode,
};
pub use view_tree::ViewHierarchyDump;
pub use wda::WdaHost;

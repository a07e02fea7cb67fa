use std::{path::PathBuf, process::ExitStatus, time::Duration};

use thiserror::Error;

/// Errors surfaced by the device-automation core.
///
/// Mirrors the taxonomy in the design spec (§7): transient failures are
/// recovered internally by the command runner's retry policy and never
/// reach a caller as this type; everything else propagates.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("tool `{tool}` could not be located on this system")]
    ToolNotFound { tool: &'static str },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exceeded timeout of {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("`{command}` exited with {status:?}: {stderr}")]
    NonZeroExit {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("command output was not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("device is not ready: {reason}")]
    DeviceNotReady { reason: String },

    #[error(
        "ambiguous platform: both Android ({android:?}) and iOS ({ios:?}) devices are present; \
         pin a platform to proceed"
    )]
    AmbiguousPlatform {
        android: Vec<String>,
        ios: Vec<String>,
    },

    #[error("device `{device_id}` not found among booted {platform} devices")]
    DeviceNotFound { device_id: String, platform: String },

    #[error("APK checksum verification failed: expected {expected}, got {actual}")]
    IntegrityError { expected: String, actual: String },

    #[error("failed to parse view hierarchy: {0}")]
    ViewHierarchyParse(String),

    #[error("HTTP request to WebDriverAgent failed: {0}")]
    WebDriverAgent(#[from] reqwest::Error),

    #[error("WebDriverAgent did not become ready within {0:?}")]
    WebDriverAgentTimeout(Duration),

    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("action requires re-verifying cached installer status: {0}")]
    ActionableError(String),
}

impl CoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

//! Tool-Location Discovery (§4.2 Module B).
//!
//! Resolves absolute paths to the vendor CLIs the rest of the core shells
//! out to, cached for the process lifetime.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::error::CoreError;
use crate::runner::{CommandRunner, CommandSpec};

/// Where a resolved tool path came from, used to break ties deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ToolSource {
    Path,
    SdkRoot,
    Homebrew,
    Env,
}

#[derive(Debug, Clone)]
pub struct ResolvedTool {
    pub path: PathBuf,
    pub source: ToolSource,
    pub version: Option<String>,
}

/// Caches resolved tool locations for the lifetime of the process.
pub struct ToolLocator {
    cache: Mutex<HashMap<&'static str, ResolvedTool>>,
    home_dir: Option<PathBuf>,
}

impl Default for ToolLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolLocator {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            home_dir: std::env::var_os("HOME").map(PathBuf::from),
        }
    }

    pub fn locate_android(&self, tool: &'static str) -> Result<ResolvedTool, CoreError> {
        if let Some(cached) = self.cache.lock().unwrap().get(tool).cloned() {
            return Ok(cached);
        }
        let resolved = self.resolve_android(tool)?;
        self.cache.lock().unwrap().insert(tool, resolved.clone());
        Ok(resolved)
    }

    fn resolve_android(&self, tool: &'static str) -> Result<ResolvedTool, CoreError> {
        let mut candidates: Vec<(PathBuf, ToolSource)> = Vec::new();

        for var in ["ANDROID_HOME", "ANDROID_SDK_ROOT", "ANDROID_SDK_HOME"] {
            if let Some(root) = std::env::var_os(var) {
                candidates.push((
                    PathBuf::from(root).join("platform-tools").join(tool),
                    ToolSource::Env,
                ));
            }
        }

        candidates.push((
            PathBuf::from("/opt/homebrew/share/android-commandlinetools/platform-tools")
                .join(tool),
            ToolSource::Homebrew,
        ));

        if let Some(home) = &self.home_dir {
            if cfg!(target_os = "macos") {
                candidates.push((
                    home.join("Library/Android/sdk/platform-tools").join(tool),
                    ToolSource::SdkRoot,
                ));
            } else {
                candidates.push((
                    home.join("Android/Sdk/platform-tools").join(tool),
                    ToolSource::SdkRoot,
                ));
            }
        }

        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        for (path, source) in candidates {
            if path.is_file() {
                return Ok(ResolvedTool {
                    path,
                    source,
                    version: None,
                });
            }
        }

        Ok(ResolvedTool {
            path: PathBuf::from(tool),
            source: ToolSource::Path,
            version: None,
        })
    }

    /// `xcrun` is required on PATH; its absence is terminal (§4.2).
    pub async fn locate_xcrun(&self, runner: &dyn CommandRunner) -> Result<ResolvedTool, CoreError> {
        if let Some(cached) = self.cache.lock().unwrap().get("xcrun").cloned() {
            return Ok(cached);
        }
        let output = runner
            .execute(CommandSpec::new("which", vec!["xcrun".into()]))
            .await
            .map_err(|_| CoreError::ToolNotFound { tool: "xcrun" })?;
        let path = PathBuf::from(output.stdout_string().trim());
        let resolved = ResolvedTool {
            path,
            source: ToolSource::Path,
            version: None,
        };
        self.cache
            .lock()
            .unwrap()
            .insert("xcrun", resolved.clone());
        Ok(resolved)
    }

    /// Probes an optional iOS tool (`axe`, `idb`) via `--version`; absence is
    /// cached as `None` rather than erroring, since both are optional
    /// collaborators (§4.2, §6).
    pub async fn probe_optional(
        &self,
        tool: &'static str,
        runner: &dyn CommandRunner,
    ) -> Option<ResolvedTool> {
        if let Some(cached) = self.cache.lock().unwrap().get(tool).cloned() {
            return Some(cached);
        }
        let output = runner
            .execute(CommandSpec::new(tool, vec!["--version".into()]))
            .await
            .ok()?;
        let resolved = ResolvedTool {
            path: PathBuf::from(tool),
            source: ToolSource::Path,
            version: Some(output.stdout_string().trim().to_string()),
        };
        self.cache
            .lock()
            .unwrap()
            .insert(tool, resolved.clone());
        Some(resolved)
    }
}

pub fn is_absolute_existing(path: &Path) -> bool {
    path.is_absolute() && path.exists()
}

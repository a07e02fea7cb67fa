//! Composition root: wires modules A-O into one `AppContext` (§2 "Composition").
//!
//! Nothing here is business logic; it is the place that would otherwise be a
//! set of lazy singletons (spec.md §9 Redesign Flags) and is instead an
//! explicitly constructed struct, owned by `main` and passed down.

use std::path::PathBuf;
use std::sync::Arc;

use automobile_authoring::AuthoringManager;
use automobile_core::session::DefaultReadinessVerifier;
use automobile_core::{
    AndroidRegistry, CommandRunner, ConfigStore, DeviceRegistry, IosRegistry, ObservationCache,
    SessionManager, TokioCommandRunner, ToolLocator,
};
use automobile_events::LifecycleMonitor;
use automobile_registry::ToolRegistry;

use crate::error::CliError;
use crate::handlers;

/// Everything a CLI subcommand needs, built once at startup.
pub struct AppContext {
    pub runner: Arc<dyn CommandRunner>,
    pub android: Arc<dyn DeviceRegistry>,
    pub ios: Arc<dyn DeviceRegistry>,
    pub config: Arc<ConfigStore>,
    pub session: Arc<SessionManager>,
    pub lifecycle: Arc<LifecycleMonitor>,
    pub observations: Arc<ObservationCache>,
    pub registry: Arc<ToolRegistry>,
    pub authoring: Arc<AuthoringManager>,
}

impl AppContext {
    /// Builds the full dependency graph. `config_path` overrides the default
    /// `$HOME/.auto-mobile/config.json` location (tests point this at a
    /// tempdir); `wda_project` is the optional WebDriverAgent `.xcodeproj`
    /// path used for iOS readiness verification (§4.10 step 7).
    pub fn bootstrap(
        config_path: Option<PathBuf>,
        wda_project: Option<PathBuf>,
    ) -> Result<Self, CliError> {
        let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner::new());
        let locator = Arc::new(ToolLocator::new());

        let config = Arc::new(match config_path {
            Some(path) => ConfigStore::load(path)?,
            None => ConfigStore::load_default()?,
        });

        let android: Arc<dyn DeviceRegistry> =
            Arc::new(AndroidRegistry::new(runner.clone(), locator.clone()));
        let ios: Arc<dyn DeviceRegistry> = Arc::new(IosRegistry::new(runner.clone(), locator.clone()));
        let verifier = Arc::new(DefaultReadinessVerifier::new(runner.clone(), wda_project));
        let session = Arc::new(SessionManager::new(android.clone(), ios.clone(), verifier));

        let lifecycle = Arc::new(LifecycleMonitor::new(runner.clone()));

        let disk_dir = view_hierarchy_cache_dir();
        let observations = Arc::new(ObservationCache::new(runner.clone(), disk_dir));

        let registry = Arc::new(ToolRegistry::new(Some(lifecycle.clone())));
        let authoring = AuthoringManager::new(runner.clone(), lifecycle.clone(), config.clone());
        registry.set_recorder(Some(authoring.clone()));

        handlers::register_administrative_tools(
            &registry,
            session.clone(),
            android.clone(),
            ios.clone(),
            observations.clone(),
            config.clone(),
            lifecycle.clone(),
        );

        Ok(Self {
            runner,
            android,
            ios,
            config,
            session,
            lifecycle,
            observations,
            registry,
            authoring,
        })
    }
}

/// `.view_hierarchy_cache/` under the working directory (spec.md §6).
fn view_hierarchy_cache_dir() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".view_hierarchy_cache")
}

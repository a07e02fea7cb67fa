//! One submodule per CLI subcommand, each exporting an `Args` (clap derive)
//! and a `run(&AppContext, Args) -> Result<(), CliError>`, mirroring the
//! teacher's `xtask` convention of an `Args` + `run` pair per task.

pub mod authoring;
pub mod ensure_device;
pub mod execute_plan;
pub mod list_devices;
pub mod list_images;
pub mod observe;

use automobile_core::{Platform, PlatformPreference};
use clap::ValueEnum;

/// CLI-facing platform selector, shared by every subcommand that accepts
/// `--platform`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlatformArg {
    Android,
    Ios,
    Either,
}

impl PlatformArg {
    pub fn as_preference(self) -> PlatformPreference {
        match self {
            PlatformArg::Android => PlatformPreference::Android,
            PlatformArg::Ios => PlatformPreference::Ios,
            PlatformArg::Either => PlatformPreference::Either,
        }
    }

    pub fn as_platform(self) -> Option<Platform> {
        match self {
            PlatformArg::Android => Some(Platform::Android),
            PlatformArg::Ios => Some(Platform::Ios),
            PlatformArg::Either => None,
        }
    }
}

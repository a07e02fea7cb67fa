#![forbid(unsafe_code)]
//! Administrative CLI wiring the AutoMobile device-automation crates
//! together (spec.md §1: "the MCP transport framing" itself is out of
//! scope; this binary exercises modules A-O directly — device listing,
//! session start/stop, plan replay — the way `xtask` exercises the
//! teacher's own crates).

mod commands;
mod context;
mod error;
mod handlers;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use context::AppContext;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "auto-mobile")]
#[command(about = "Administrative CLI for the AutoMobile device-automation core")]
struct Cli {
    /// Overrides `$HOME/.auto-mobile/config.json`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to a `WebDriverAgentRunner.xcodeproj` for iOS readiness checks.
    #[arg(long, global = true)]
    wda_project: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List booted devices for one or both platforms.
    ListDevices(commands::list_devices::Args),
    /// List bootable AVD/simulator images for one or both platforms.
    ListImages(commands::list_images::Args),
    /// Resolve, boot if necessary, and verify a ready device.
    EnsureDevice(commands::ensure_device::Args),
    /// Take an observation (screenshot + view tree) of the active device.
    Observe(commands::observe::Args),
    /// Start a test authoring session for an app on a device.
    StartAuthoring(commands::authoring::StartArgs),
    /// Stop the active test authoring session, writing its plan.
    StopAuthoring(commands::authoring::StopArgs),
    /// Replay a recorded YAML plan against the tool registry.
    ExecutePlan(commands::execute_plan::Args),
}

fn main() -> ExitCode {
    if let Err(err) = logging::init() {
        eprintln!("failed to initialize logging: {err}");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run())
}

async fn run() -> ExitCode {
    let cli = Cli::parse();

    let context = match AppContext::bootstrap(cli.config, cli.wda_project) {
        Ok(context) => context,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let result: Result<(), CliError> = match cli.command {
        Command::ListDevices(args) => commands::list_devices::run(&context, args).await,
        Command::ListImages(args) => commands::list_images::run(&context, args).await,
        Command::EnsureDevice(args) => commands::ensure_device::run(&context, args).await,
        Command::Observe(args) => commands::observe::run(&context, args).await,
        Command::StartAuthoring(args) => commands::authoring::run_start(&context, args).await,
        Command::StopAuthoring(args) => commands::authoring::run_stop(&context, args).await,
        Command::ExecutePlan(args) => commands::execute_plan::run(&context, args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

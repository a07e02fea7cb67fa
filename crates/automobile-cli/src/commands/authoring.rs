//! `auto-mobile start-authoring` / `stop-authoring` (§4.13 Module M).

use clap::Args as ClapArgs;

use crate::context::AppContext;
use crate::error::CliError;

#[derive(Debug, ClapArgs)]
pub struct StartArgs {
    #[arg(long)]
    device_id: String,
    #[arg(long)]
    app_id: String,
    #[arg(long)]
    description: Option<String>,
}

pub async fn run_start(context: &AppContext, args: StartArgs) -> Result<(), CliError> {
    let session_id = context
        .authoring
        .start(&args.device_id, &args.app_id, args.description)
        .await?;
    println!("{session_id}");
    Ok(())
}

#[derive(Debug, ClapArgs)]
pub struct StopArgs {
    #[arg(long)]
    device_id: String,
}

pub async fn run_stop(context: &AppContext, args: StopArgs) -> Result<(), CliError> {
    let plan = context.authoring.stop(&args.device_id).await?;
    let yaml = automobile_authoring::serialize_plan(&plan)?;
    print!("{yaml}");
    Ok(())
}

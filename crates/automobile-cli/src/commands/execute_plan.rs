//! `auto-mobile execute-plan` (§4.14 Module N).

use std::path::PathBuf;

use automobile_authoring::PlanExecutor;
use clap::Args as ClapArgs;

use crate::context::AppContext;
use crate::error::CliError;

#[derive(Debug, ClapArgs)]
pub struct Args {
    /// Path to a YAML plan file (§6).
    plan: PathBuf,

    /// Step index to resume from (default: 0, the beginning).
    #[arg(long, default_value_t = 0)]
    start_step: usize,

    /// Device to replay the plan against, passed to the tool registry so
    /// it can re-check app lifecycle after each step (§4.12 step 4).
    #[arg(long)]
    device_id: Option<String>,
}

pub async fn run(context: &AppContext, args: Args) -> Result<(), CliError> {
    let yaml = tokio::fs::read_to_string(&args.plan)
        .await
        .map_err(CliError::Io)?;
    let plan = automobile_authoring::parse_plan(&yaml)?;

    let executor = PlanExecutor::new(context.registry.clone());
    let result = executor
        .execute(&plan, args.start_step, args.device_id.as_deref())
        .await?;

    let pretty = serde_json::to_string_pretty(&result)?;
    println!("{pretty}");

    if !result.success {
        return Err(CliError::Tool(format!(
            "plan execution stopped at step {} of {}",
            result.executed_steps, result.total_steps
        )));
    }
    Ok(())
}

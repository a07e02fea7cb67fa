//! `auto-mobile observe` (§4.6 Module F, dispatched through §4.12 Module L).

use clap::Args as ClapArgs;

use crate::context::AppContext;
use crate::error::CliError;

#[derive(Debug, ClapArgs)]
pub struct Args {
    /// Device to re-check for app lifecycle changes after the observation
    /// (passed through to the tool registry's post-call hook, §4.12 step 4).
    #[arg(long)]
    device_id: Option<String>,
}

pub async fn run(context: &AppContext, args: Args) -> Result<(), CliError> {
    let response = context
        .registry
        .call("observe", serde_json::json!({}), args.device_id.as_deref())
        .await;

    if !response.success {
        return Err(CliError::Tool(
            response.error.unwrap_or_else(|| "observe failed".to_string()),
        ));
    }

    let pretty = serde_json::to_string_pretty(&response.data)?;
    println!("{pretty}");
    Ok(())
}

//! `auto-mobile ensure-device` (§4.10 Module J).

use clap::Args as ClapArgs;

use crate::context::AppContext;
use crate::error::CliError;

use super::PlatformArg;

#[derive(Debug, ClapArgs)]
pub struct Args {
    /// Platform preference; `either` auto-resolves and refuses on a mixed
    /// Android/iOS presence (§4.10 step 2).
    #[arg(long, value_enum, default_value = "either")]
    platform: PlatformArg,

    /// Pin a specific device identifier rather than auto-selecting one.
    #[arg(long)]
    device_id: Option<String>,
}

pub async fn run(context: &AppContext, args: Args) -> Result<(), CliError> {
    let device = context
        .session
        .ensure_device_ready(args.platform.as_preference(), args.device_id.as_deref())
        .await?;
    println!(
        "{}\t{}\t{:?}",
        device.device_id, device.platform.as_str(), device.state
    );
    Ok(())
}

//! `auto-mobile list-devices` (§4.3 Module C).

use clap::Args as ClapArgs;

use crate::context::AppContext;
use crate::error::CliError;

use super::PlatformArg;

#[derive(Debug, ClapArgs)]
pub struct Args {
    /// Restrict the listing to one platform.
    #[arg(long, value_enum, default_value = "either")]
    platform: PlatformArg,
}

pub async fn run(context: &AppContext, args: Args) -> Result<(), CliError> {
    let mut devices = Vec::new();
    if matches!(args.platform, PlatformArg::Either | PlatformArg::Android) {
        devices.extend(context.android.list_booted().await?);
    }
    if matches!(args.platform, PlatformArg::Either | PlatformArg::Ios) {
        devices.extend(context.ios.list_booted().await?);
    }

    if devices.is_empty() {
        println!("no booted devices");
        return Ok(());
    }
    for device in devices {
        println!(
            "{}\t{}\t{:?}",
            device.device_id, device.platform.as_str(), device.state
        );
    }
    Ok(())
}

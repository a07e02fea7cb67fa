//! `auto-mobile list-images` (§4.3 Module C).

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
    let mut images = Vec::new();
    if matches!(args.platform, PlatformArg::Either | PlatformArg::Android) {
        images.extend(context.android.list_images().await?);
    }
    if matches!(args.platform, PlatformArg::Either | PlatformArg::Ios) {
        images.extend(context.ios.list_images().await?);
    }

    if images.is_empty() {
        println!("no images found");
        return Ok(());
    }
    for image in images {
        println!("{}\t{}", image.identifier, image.platform.as_str());
    }
    Ok(())
}

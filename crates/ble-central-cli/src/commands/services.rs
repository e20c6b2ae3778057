use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::cli::ServicesArgs;
use crate::commands::common;

pub async fn run(args: ServicesArgs) -> Result<()> {
    debug!("services command: address={}", args.address);
    let (handle, mut events) = common::start_session().await?;
    common::connect_to(&handle, &mut events, &args.address, args.scan_secs).await?;

    let Some(services) = handle.discover_services().await? else {
        bail!("service discovery failed");
    };
    let json = serde_json::to_string_pretty(&services).context("serializing services")?;
    println!("{json}");

    handle.disconnect().await?;
    Ok(())
}

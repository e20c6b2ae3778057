use anyhow::{bail, Result};
use tracing::debug;

use crate::cli::ReadArgs;
use crate::commands::common;

pub async fn run(args: ReadArgs) -> Result<()> {
    debug!(
        "read command: address={}, service={}, characteristic={}",
        args.address, args.service, args.characteristic
    );
    let (handle, mut events) = common::start_session().await?;
    common::connect_to(&handle, &mut events, &args.address, args.scan_secs).await?;

    let value = handle
        .read_characteristic(&args.service, &args.characteristic, Some(args.timeout_secs))
        .await?;
    handle.disconnect().await?;

    let Some(value) = value else {
        bail!("read failed (characteristic missing, not readable, or timed out)");
    };
    println!("{}", hex::encode(&value));
    Ok(())
}

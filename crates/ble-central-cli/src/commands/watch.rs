use std::time::Duration;

use anyhow::{bail, Result};
use ble_central::SessionEvent;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::cli::WatchArgs;
use crate::commands::common;

pub async fn run(args: WatchArgs) -> Result<()> {
    debug!(
        "watch command: address={}, characteristic={}, duration_secs={}",
        args.address, args.characteristic, args.duration_secs
    );
    let (handle, mut events) = common::start_session().await?;
    common::connect_to(&handle, &mut events, &args.address, args.scan_secs).await?;

    if !handle.start_notify(&args.service, &args.characteristic).await? {
        handle.disconnect().await?;
        bail!("subscribe failed (characteristic missing or not notifiable)");
    }

    println!("Watching for {}s...", args.duration_secs);
    let deadline = Instant::now() + Duration::from_secs(args.duration_secs);
    loop {
        match time::timeout_at(deadline, events.recv()).await {
            Ok(Some(SessionEvent::Notify { characteristic_uuid, value, .. })) => {
                println!("{characteristic_uuid}  {}", hex::encode(&value));
            }
            Ok(Some(SessionEvent::Disconnected)) => {
                println!("Peripheral disconnected.");
                return Ok(());
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => break,
        }
    }

    handle.stop_notify(&args.service, &args.characteristic).await?;
    handle.disconnect().await?;
    Ok(())
}

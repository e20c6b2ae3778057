use std::time::Duration;

use anyhow::{bail, Context, Result};
use ble_central::{BleSession, BtleplugAdapter, SessionEvent, SessionHandle};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::debug;

pub async fn start_session() -> Result<(SessionHandle, mpsc::Receiver<SessionEvent>)> {
    let (adapter, adapter_events) =
        BtleplugAdapter::new().await.context("BLE adapter init failed")?;
    let (handle, events, _task) = BleSession::spawn(adapter, adapter_events);
    Ok((handle, events))
}

/// Scans until the target address is seen, then connects. Consumes scan
/// events up to and including the connection.
pub async fn connect_to(
    handle: &SessionHandle,
    events: &mut mpsc::Receiver<SessionEvent>,
    address: &str,
    scan_secs: u64,
) -> Result<()> {
    if !handle.start_scan(Some(address)).await? {
        bail!("scan could not be started (radio off or permissions missing)");
    }

    let target = address.trim().to_uppercase();
    let deadline = Instant::now() + Duration::from_secs(scan_secs);
    let mut seen = false;
    while !seen {
        match time::timeout_at(deadline, events.recv()).await {
            Ok(Some(SessionEvent::Scan(record))) => {
                debug!(address = %record.mac_address, rssi = ?record.rssi, "advertisement");
                seen = record.mac_address == target;
            }
            Ok(Some(_)) => {}
            Ok(None) => bail!("session stopped"),
            Err(_) => break,
        }
    }
    if !seen {
        handle.stop_scan().await?;
        bail!("device {address} not seen within {scan_secs}s");
    }

    if !handle.connect(address).await? {
        bail!("connect to {address} failed");
    }
    debug!(%target, "connected and services discovered");
    Ok(())
}

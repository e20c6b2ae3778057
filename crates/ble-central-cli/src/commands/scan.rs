use std::time::Duration;

use anyhow::{bail, Result};
use ble_central::SessionEvent;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::cli::ScanArgs;
use crate::commands::common;

pub async fn run(args: ScanArgs) -> Result<()> {
    debug!("scan command: duration_secs={}", args.duration_secs);
    let (handle, mut events) = common::start_session().await?;

    if !handle.start_scan(args.address.as_deref()).await? {
        bail!("scan could not be started (radio off or permissions missing)");
    }

    println!("Scanning for {}s...", args.duration_secs);
    let deadline = Instant::now() + Duration::from_secs(args.duration_secs);
    let mut count = 0usize;
    loop {
        match time::timeout_at(deadline, events.recv()).await {
            Ok(Some(SessionEvent::Scan(record))) => {
                count += 1;
                let rssi = record
                    .rssi
                    .map(|rssi| format!("{rssi} dBm"))
                    .unwrap_or_else(|| "n/a".to_string());
                println!("{}  {}  rssi={}", record.mac_address, record.name, rssi);
                for entry in &record.manufacturer_data {
                    println!("    manufacturer 0x{:04X}: {}", entry.company_id, hex::encode(&entry.data));
                }
                for entry in &record.service_data {
                    println!("    service 0x{:04X}: {}", entry.uuid, hex::encode(&entry.data));
                }
            }
            Ok(Some(SessionEvent::ScanStopped)) => break,
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => break,
        }
    }
    handle.stop_scan().await?;
    debug!("scan command: {count} advertisement(s)");

    if count == 0 {
        println!("No devices found.");
    }
    Ok(())
}

//! btleplug-backed [`BleAdapter`].
//!
//! Owns the platform peripheral objects and pumps central events into the
//! adapter event channel the session consumes. Long-running operations
//! (connect, discovery, reads, writes) run on their own tasks so the
//! session loop stays free to enforce deadlines.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::adapter::{
    AdapterError, AdapterEvent, BleAdapter, PowerState, RawCharacteristic, RawScanResult,
    RawService,
};
use crate::model::Capabilities;
use crate::normalize::canonical_address;

/// btleplug does not negotiate MTU; this is the largest payload the
/// backends reliably accept per write.
const MAX_TX_MTU: u16 = 244;

const EVENT_BUFFER: usize = 64;

pub struct BtleplugAdapter {
    adapter: Adapter,
    events: mpsc::Sender<AdapterEvent>,
    connected: Arc<Mutex<Option<Peripheral>>>,
    notify_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    event_task: JoinHandle<()>,
}

impl BtleplugAdapter {
    /// Opens the first system adapter and starts the central event pump.
    /// Returns the adapter together with the event channel the session
    /// consumes.
    pub async fn new() -> Result<(Arc<Self>, mpsc::Receiver<AdapterEvent>), AdapterError> {
        let manager = Manager::new().await.map_err(backend_error)?;
        let adapters = manager.adapters().await.map_err(backend_error)?;
        let adapter = adapters.into_iter().next().ok_or(AdapterError::AdapterUnavailable)?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let connected = Arc::new(Mutex::new(None));

        let mut central_events = adapter.events().await.map_err(backend_error)?;
        let pump_adapter = adapter.clone();
        let pump_tx = event_tx.clone();
        let pump_connected = Arc::clone(&connected);
        let event_task = tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                if forward_central_event(&pump_adapter, &pump_tx, &pump_connected, event)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            debug!("central event stream ended");
        });

        let backend = Arc::new(Self {
            adapter,
            events: event_tx,
            connected,
            notify_task: Arc::new(Mutex::new(None)),
            event_task,
        });
        Ok((backend, event_rx))
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, AdapterError> {
        let peripherals = self.adapter.peripherals().await.map_err(backend_error)?;
        peripherals
            .into_iter()
            .find(|peripheral| peripheral_address(peripheral) == address)
            .ok_or_else(|| AdapterError::UnknownPeripheral(address.to_string()))
    }

    async fn connected_peripheral(&self) -> Result<Peripheral, AdapterError> {
        self.connected.lock().await.clone().ok_or(AdapterError::NotConnected)
    }

    async fn find_characteristic(
        &self,
        service: &str,
        characteristic: &str,
    ) -> Result<(Peripheral, Characteristic), AdapterError> {
        let peripheral = self.connected_peripheral().await?;
        let service_uuid = parse_uuid(service)?;
        let characteristic_uuid = parse_uuid(characteristic)?;
        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service_uuid && c.uuid == characteristic_uuid)
            .ok_or_else(|| AdapterError::UnknownCharacteristic {
                service: service.to_string(),
                characteristic: characteristic.to_string(),
            })?;
        Ok((peripheral, target))
    }
}

#[async_trait]
impl BleAdapter for BtleplugAdapter {
    fn capabilities(&self) -> Option<Capabilities> {
        // Desktop stacks expose no permission snapshot.
        None
    }

    async fn start_scan(&self) -> Result<(), AdapterError> {
        self.adapter.start_scan(ScanFilter::default()).await.map_err(backend_error)
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        self.adapter.stop_scan().await.map_err(backend_error)
    }

    async fn connect(&self, address: &str) -> Result<(), AdapterError> {
        let peripheral = self.find_peripheral(address).await?;
        *self.connected.lock().await = Some(peripheral.clone());
        let events = self.events.clone();
        let connected = Arc::clone(&self.connected);
        tokio::spawn(async move {
            let event = match peripheral.connect().await {
                Ok(()) => AdapterEvent::Connected,
                Err(err) => {
                    debug!(%err, "connect failed");
                    connected.lock().await.take();
                    AdapterEvent::ConnectionFailed
                }
            };
            let _ = events.send(event).await;
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        if let Some(task) = self.notify_task.lock().await.take() {
            task.abort();
        }
        let peripheral = self.connected.lock().await.take();
        if let Some(peripheral) = peripheral {
            peripheral.disconnect().await.map_err(backend_error)?;
        }
        Ok(())
    }

    async fn discover_services(&self) -> Result<(), AdapterError> {
        let peripheral = self.connected_peripheral().await?;
        let events = self.events.clone();
        let notify_slot = Arc::clone(&self.notify_task);
        tokio::spawn(async move {
            if let Err(err) = peripheral.discover_services().await {
                debug!(%err, "service discovery failed");
                let _ = events.send(AdapterEvent::DiscoveryFailed).await;
                return;
            }
            let characteristics = peripheral.characteristics();
            let services = group_services(&characteristics);
            // ValueNotification carries no service UUID; resolve it from
            // the freshly discovered layout.
            let service_by_characteristic: HashMap<Uuid, Uuid> = characteristics
                .iter()
                .map(|c| (c.uuid, c.service_uuid))
                .collect();

            match peripheral.notifications().await {
                Ok(mut notifications) => {
                    let notify_tx = events.clone();
                    let forwarder = tokio::spawn(async move {
                        while let Some(notification) = notifications.next().await {
                            let service = service_by_characteristic
                                .get(&notification.uuid)
                                .copied()
                                .unwrap_or_default();
                            let forwarded = notify_tx
                                .send(AdapterEvent::CharacteristicChanged {
                                    service,
                                    characteristic: notification.uuid,
                                    value: notification.value,
                                })
                                .await;
                            if forwarded.is_err() {
                                break;
                            }
                        }
                        debug!("notification stream ended");
                    });
                    if let Some(previous) = notify_slot.lock().await.replace(forwarder) {
                        previous.abort();
                    }
                }
                Err(err) => debug!(%err, "notification stream unavailable"),
            }

            let _ = events.send(AdapterEvent::ServicesDiscovered(services)).await;
        });
        Ok(())
    }

    async fn request_mtu(&self, mtu: u16) -> Result<(), AdapterError> {
        // No negotiation available; report the safe cap.
        let _ = self.connected_peripheral().await?;
        let negotiated = mtu.min(MAX_TX_MTU);
        self.events
            .send(AdapterEvent::MtuChanged(Some(negotiated)))
            .await
            .map_err(|_| AdapterError::Backend("event channel closed".to_string()))
    }

    async fn write_characteristic(
        &self,
        service: &str,
        characteristic: &str,
        payload: &[u8],
        with_response: bool,
    ) -> Result<(), AdapterError> {
        let (peripheral, target) = self.find_characteristic(service, characteristic).await?;
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        let payload = payload.to_vec();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = peripheral.write(&target, &payload, write_type).await;
            if let Err(err) = &result {
                debug!(%err, "characteristic write failed");
            }
            let _ = events.send(AdapterEvent::WriteCompleted(result.is_ok())).await;
        });
        Ok(())
    }

    async fn read_characteristic(
        &self,
        service: &str,
        characteristic: &str,
    ) -> Result<(), AdapterError> {
        let (peripheral, target) = self.find_characteristic(service, characteristic).await?;
        let events = self.events.clone();
        tokio::spawn(async move {
            let event = match peripheral.read(&target).await {
                Ok(value) => AdapterEvent::ReadCompleted(Some(value)),
                Err(err) => {
                    debug!(%err, "characteristic read failed");
                    AdapterEvent::ReadCompleted(None)
                }
            };
            let _ = events.send(event).await;
        });
        Ok(())
    }

    async fn set_notify(
        &self,
        service: &str,
        characteristic: &str,
        enabled: bool,
    ) -> Result<(), AdapterError> {
        let (peripheral, target) = self.find_characteristic(service, characteristic).await?;
        if enabled {
            peripheral.subscribe(&target).await.map_err(backend_error)
        } else {
            peripheral.unsubscribe(&target).await.map_err(backend_error)
        }
    }
}

impl Drop for BtleplugAdapter {
    fn drop(&mut self) {
        self.event_task.abort();
        if let Ok(mut slot) = self.notify_task.try_lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

async fn forward_central_event(
    adapter: &Adapter,
    sender: &mpsc::Sender<AdapterEvent>,
    connected: &Mutex<Option<Peripheral>>,
    event: CentralEvent,
) -> Result<(), ()> {
    match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
            if let Ok(peripheral) = adapter.peripheral(&id).await {
                if let Some(result) = fetch_scan_result(&peripheral).await {
                    sender.send(AdapterEvent::ScanResult(result)).await.map_err(|_| ())?;
                }
            }
        }
        CentralEvent::DeviceDisconnected(id) => {
            let is_current = {
                let mut current = connected.lock().await;
                match current.as_ref() {
                    Some(peripheral) if peripheral.id() == id => {
                        current.take();
                        true
                    }
                    _ => false,
                }
            };
            if is_current {
                sender.send(AdapterEvent::Disconnected).await.map_err(|_| ())?;
            }
        }
        CentralEvent::StateUpdate(state) => {
            let power = match state {
                CentralState::PoweredOn => PowerState::PoweredOn,
                CentralState::PoweredOff => PowerState::PoweredOff,
                _ => PowerState::Unknown,
            };
            sender.send(AdapterEvent::PowerState(power)).await.map_err(|_| ())?;
        }
        _ => {}
    }
    Ok(())
}

async fn fetch_scan_result(peripheral: &Peripheral) -> Option<RawScanResult> {
    let properties = peripheral.properties().await.ok()??;
    Some(RawScanResult {
        address: peripheral_address(peripheral),
        name: properties.local_name,
        rssi: properties.rssi,
        manufacturer_data: properties.manufacturer_data.into_iter().collect(),
        service_data: properties.service_data.into_iter().collect(),
        tx_power: properties.tx_power_level,
    })
}

/// Groups the flat characteristic set btleplug exposes into per-service
/// raw records, in service UUID order.
fn group_services(characteristics: &BTreeSet<Characteristic>) -> Vec<RawService> {
    let mut services: BTreeMap<Uuid, Vec<RawCharacteristic>> = BTreeMap::new();
    for characteristic in characteristics {
        services.entry(characteristic.service_uuid).or_default().push(RawCharacteristic {
            uuid: characteristic.uuid,
            properties: characteristic.properties.bits(),
        });
    }
    services
        .into_iter()
        .map(|(uuid, characteristics)| RawService { uuid, characteristics })
        .collect()
}

fn peripheral_address(peripheral: &Peripheral) -> String {
    canonical_address(&peripheral.id().to_string())
}

fn parse_uuid(value: &str) -> Result<Uuid, AdapterError> {
    Uuid::parse_str(value).map_err(|_| AdapterError::Backend(format!("invalid uuid {value}")))
}

fn backend_error(err: btleplug::Error) -> AdapterError {
    AdapterError::Backend(err.to_string())
}

//! Hardware adapter boundary.
//!
//! A [`BleAdapter`] issues commands against the platform Bluetooth stack;
//! completion and unsolicited hardware activity arrive on a single
//! [`AdapterEvent`] channel the session consumes. Commands return as soon
//! as the operation is underway, never after it finished.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::model::Capabilities;

/// Last reported radio power state. `Unknown` until the platform says
/// otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Unknown,
    PoweredOn,
    PoweredOff,
}

/// Raw advertisement as the platform reported it, before normalization.
#[derive(Debug, Clone)]
pub struct RawScanResult {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub manufacturer_data: Vec<(u16, Vec<u8>)>,
    pub service_data: Vec<(Uuid, Vec<u8>)>,
    pub tx_power: Option<i16>,
}

/// Raw characteristic from service discovery: UUID plus the GATT property
/// bitmask.
#[derive(Debug, Clone)]
pub struct RawCharacteristic {
    pub uuid: Uuid,
    pub properties: u8,
}

/// Raw service from discovery.
#[derive(Debug, Clone)]
pub struct RawService {
    pub uuid: Uuid,
    pub characteristics: Vec<RawCharacteristic>,
}

/// Everything the hardware reports back, solicited or not.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    ScanResult(RawScanResult),
    Connected,
    ConnectionFailed,
    Disconnected,
    ServicesDiscovered(Vec<RawService>),
    DiscoveryFailed,
    MtuChanged(Option<u16>),
    WriteCompleted(bool),
    ReadCompleted(Option<Vec<u8>>),
    CharacteristicChanged {
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    PowerState(PowerState),
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("no BLE adapter available")]
    AdapterUnavailable,
    #[error("peripheral {0} not known to the adapter")]
    UnknownPeripheral(String),
    #[error("no peripheral connected")]
    NotConnected,
    #[error("characteristic {characteristic} not found in service {service}")]
    UnknownCharacteristic { service: String, characteristic: String },
    #[error("backend error: {0}")]
    Backend(String),
}

/// Platform Bluetooth stack capability.
///
/// Object safe: the session holds `Arc<dyn BleAdapter>`. Peripherals and
/// characteristics are referenced by their canonical string keys; the
/// adapter owns the underlying platform objects.
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Permission snapshot, or `None` on platforms without one.
    fn capabilities(&self) -> Option<Capabilities>;

    async fn start_scan(&self) -> Result<(), AdapterError>;

    async fn stop_scan(&self) -> Result<(), AdapterError>;

    /// Begins connecting to a previously scanned peripheral. Completion is
    /// `Connected` or `ConnectionFailed`.
    async fn connect(&self, address: &str) -> Result<(), AdapterError>;

    async fn disconnect(&self) -> Result<(), AdapterError>;

    /// Begins service discovery on the connected peripheral. Completion is
    /// `ServicesDiscovered` or `DiscoveryFailed`.
    async fn discover_services(&self) -> Result<(), AdapterError>;

    /// Requests an MTU; completion is `MtuChanged` with the negotiated
    /// value, or `None` when negotiation failed.
    async fn request_mtu(&self, mtu: u16) -> Result<(), AdapterError>;

    /// Begins a characteristic write. Completion is `WriteCompleted`.
    async fn write_characteristic(
        &self,
        service: &str,
        characteristic: &str,
        payload: &[u8],
        with_response: bool,
    ) -> Result<(), AdapterError>;

    /// Begins a characteristic read. Completion is `ReadCompleted`.
    async fn read_characteristic(
        &self,
        service: &str,
        characteristic: &str,
    ) -> Result<(), AdapterError>;

    /// Enables or disables notifications on a characteristic. Takes effect
    /// before the call returns.
    async fn set_notify(
        &self,
        service: &str,
        characteristic: &str,
        enabled: bool,
    ) -> Result<(), AdapterError>;
}

//! BLE central-role session core.
//!
//! The crate exposes one serialized request/response surface over a
//! pluggable hardware adapter: scan for peripherals, connect, discover GATT
//! services, read/write characteristics and subscribe to notifications. A
//! single session task owns all connection state and admits at most one
//! in-flight hardware operation at a time.

pub mod adapter;
pub mod backend;
pub mod model;
pub mod normalize;
pub mod registry;
pub mod session;

pub use adapter::{
    AdapterError, AdapterEvent, BleAdapter, PowerState, RawCharacteristic, RawScanResult,
    RawService,
};
pub use backend::BtleplugAdapter;
pub use model::{
    AdvertisementRecord, Capabilities, CharProperty, CharacteristicRecord, ManufacturerData,
    ServiceData, ServiceRecord,
};
pub use session::{
    BleSession, OperationKind, Request, Response, SessionError, SessionEvent, SessionHandle,
    DEFAULT_TIMEOUT_SECS,
};

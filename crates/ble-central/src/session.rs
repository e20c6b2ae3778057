//! The session actor: one task owning all central-role state.
//!
//! Callers talk to the task through a [`SessionHandle`]; the hardware
//! talks to it through the adapter event channel. The task admits at most
//! one in-flight operation. While one is pending, every new request is
//! rejected with [`SessionError::OperationInProgress`] naming the blocking
//! operation; the pending caller is answered exactly once, by the matching
//! adapter callback, by its deadline, or by a disconnect.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::adapter::{AdapterEvent, BleAdapter, PowerState, RawScanResult, RawService};
use crate::model::{
    AdvertisementRecord, Capabilities, CharProperty, ManufacturerData, ServiceData, ServiceRecord,
};
use crate::normalize::{canonical_address, canonical_from_uuid, canonical_uuid, short_uuid_16};
use crate::registry::{DeviceRegistry, GattCache, PeripheralHandle};

/// Default per-operation timeout, applied when the caller gives none.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Caller-supplied timeouts are clamped up to this floor.
const MIN_TIMEOUT_SECS: u64 = 1;

const COMMAND_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 64;

/// Name fallback for peripherals that advertise none.
const UNKNOWN_NAME: &str = "Unknown";

/// The operation vocabulary. `Scan` resolves synchronously from the
/// adapter command result; the rest wait for a callback and occupy the
/// pending slot until it arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Scan,
    Connect,
    DiscoverServices,
    SetMtu,
    WriteCharacteristic,
    ReadCharacteristic,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Scan => "SCAN",
            OperationKind::Connect => "CONNECT",
            OperationKind::DiscoverServices => "DISCOVER_SERVICES",
            OperationKind::SetMtu => "SET_MTU",
            OperationKind::WriteCharacteristic => "WRITE_CHARACTERISTIC",
            OperationKind::ReadCharacteristic => "READ_CHARACTERISTIC",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Another operation holds the pending slot; the payload names it.
    #[error("{0} in progress, request rejected")]
    OperationInProgress(OperationKind),
    #[error("session task is no longer running")]
    SessionClosed,
    #[error("response variant did not match the request")]
    UnexpectedResponse,
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::OperationInProgress(_) => "OPERATION_IN_PROGRESS",
            SessionError::SessionClosed => "SESSION_CLOSED",
            SessionError::UnexpectedResponse => "UNEXPECTED_RESPONSE",
        }
    }
}

/// Caller requests, mirrored one-to-one by [`SessionHandle`] helpers.
#[derive(Debug, Clone)]
pub enum Request {
    CheckCapabilities,
    StartScan {
        address_filter: Option<String>,
    },
    StopScan,
    Connect {
        address: String,
    },
    Disconnect,
    DiscoverServices,
    SetMtu {
        mtu: u16,
    },
    WriteCharacteristic {
        service_uuid: String,
        characteristic_uuid: String,
        payload: Vec<u8>,
        with_response: bool,
        timeout_secs: Option<u64>,
    },
    ReadCharacteristic {
        service_uuid: String,
        characteristic_uuid: String,
        timeout_secs: Option<u64>,
    },
    StartNotify {
        service_uuid: String,
        characteristic_uuid: String,
    },
    StopNotify {
        service_uuid: String,
        characteristic_uuid: String,
    },
}

/// Request outcomes. Failures short of a busy rejection surface as the
/// negative value of the matching variant (`false`, `None`), never as an
/// error.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Capabilities(Option<Capabilities>),
    Bool(bool),
    Services(Option<Vec<ServiceRecord>>),
    Mtu(Option<u16>),
    Bytes(Option<Vec<u8>>),
}

/// Unsolicited activity pushed to the caller, independent of the request
/// path.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Scan(AdvertisementRecord),
    Notify {
        service_uuid: String,
        characteristic_uuid: String,
        value: Vec<u8>,
    },
    Connected,
    Disconnected,
    ScanStopped,
}

type Responder = oneshot::Sender<Result<Response, SessionError>>;

struct Command {
    request: Request,
    respond: Responder,
}

struct PendingOperation {
    id: u64,
    kind: OperationKind,
    responder: Responder,
    deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Disconnected,
    Connecting,
    Discovering,
    Ready,
}

/// Cloneable client side of the session mailbox.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Sends a raw request and waits for its response.
    pub async fn submit(&self, request: Request) -> Result<Response, SessionError> {
        let (respond, response) = oneshot::channel();
        self.commands
            .send(Command { request, respond })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)?
    }

    pub async fn check_capabilities(&self) -> Result<Option<Capabilities>, SessionError> {
        match self.submit(Request::CheckCapabilities).await? {
            Response::Capabilities(capabilities) => Ok(capabilities),
            _ => Err(SessionError::UnexpectedResponse),
        }
    }

    pub async fn start_scan(&self, address_filter: Option<&str>) -> Result<bool, SessionError> {
        let request = Request::StartScan {
            address_filter: address_filter.map(str::to_string),
        };
        self.expect_bool(request).await
    }

    pub async fn stop_scan(&self) -> Result<bool, SessionError> {
        self.expect_bool(Request::StopScan).await
    }

    pub async fn connect(&self, address: &str) -> Result<bool, SessionError> {
        self.expect_bool(Request::Connect { address: address.to_string() }).await
    }

    pub async fn disconnect(&self) -> Result<bool, SessionError> {
        self.expect_bool(Request::Disconnect).await
    }

    pub async fn discover_services(&self) -> Result<Option<Vec<ServiceRecord>>, SessionError> {
        match self.submit(Request::DiscoverServices).await? {
            Response::Services(services) => Ok(services),
            _ => Err(SessionError::UnexpectedResponse),
        }
    }

    pub async fn set_mtu(&self, mtu: u16) -> Result<Option<u16>, SessionError> {
        match self.submit(Request::SetMtu { mtu }).await? {
            Response::Mtu(mtu) => Ok(mtu),
            _ => Err(SessionError::UnexpectedResponse),
        }
    }

    pub async fn write_characteristic(
        &self,
        service_uuid: &str,
        characteristic_uuid: &str,
        payload: &[u8],
        with_response: bool,
        timeout_secs: Option<u64>,
    ) -> Result<bool, SessionError> {
        let request = Request::WriteCharacteristic {
            service_uuid: service_uuid.to_string(),
            characteristic_uuid: characteristic_uuid.to_string(),
            payload: payload.to_vec(),
            with_response,
            timeout_secs,
        };
        self.expect_bool(request).await
    }

    pub async fn read_characteristic(
        &self,
        service_uuid: &str,
        characteristic_uuid: &str,
        timeout_secs: Option<u64>,
    ) -> Result<Option<Vec<u8>>, SessionError> {
        let request = Request::ReadCharacteristic {
            service_uuid: service_uuid.to_string(),
            characteristic_uuid: characteristic_uuid.to_string(),
            timeout_secs,
        };
        match self.submit(request).await? {
            Response::Bytes(value) => Ok(value),
            _ => Err(SessionError::UnexpectedResponse),
        }
    }

    pub async fn start_notify(
        &self,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<bool, SessionError> {
        let request = Request::StartNotify {
            service_uuid: service_uuid.to_string(),
            characteristic_uuid: characteristic_uuid.to_string(),
        };
        self.expect_bool(request).await
    }

    pub async fn stop_notify(
        &self,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<bool, SessionError> {
        let request = Request::StopNotify {
            service_uuid: service_uuid.to_string(),
            characteristic_uuid: characteristic_uuid.to_string(),
        };
        self.expect_bool(request).await
    }

    async fn expect_bool(&self, request: Request) -> Result<bool, SessionError> {
        match self.submit(request).await? {
            Response::Bool(value) => Ok(value),
            _ => Err(SessionError::UnexpectedResponse),
        }
    }
}

/// The actor. Constructed and spawned through [`BleSession::spawn`].
pub struct BleSession {
    adapter: Arc<dyn BleAdapter>,
    commands: mpsc::Receiver<Command>,
    adapter_events: mpsc::Receiver<AdapterEvent>,
    events: mpsc::Sender<SessionEvent>,
    registry: DeviceRegistry,
    gatt: GattCache,
    subscriptions: BTreeSet<String>,
    pending: Option<PendingOperation>,
    next_request_id: u64,
    link: LinkState,
    scanning: bool,
    scan_filter: Option<String>,
    power: PowerState,
}

impl BleSession {
    /// Spawns the session task over an adapter and its event stream.
    /// Returns the client handle, the session event channel, and the task
    /// handle.
    pub fn spawn(
        adapter: Arc<dyn BleAdapter>,
        adapter_events: mpsc::Receiver<AdapterEvent>,
    ) -> (SessionHandle, mpsc::Receiver<SessionEvent>, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let session = BleSession {
            adapter,
            commands: command_rx,
            adapter_events,
            events: event_tx,
            registry: DeviceRegistry::default(),
            gatt: GattCache::default(),
            subscriptions: BTreeSet::new(),
            pending: None,
            next_request_id: 0,
            link: LinkState::Disconnected,
            scanning: false,
            scan_filter: None,
            power: PowerState::Unknown,
        };
        let task = tokio::spawn(session.run());
        (SessionHandle { commands: command_tx }, event_rx, task)
    }

    async fn run(mut self) {
        loop {
            let deadline = self.pending.as_ref().map(|operation| operation.deadline);
            tokio::select! {
                maybe_command = self.commands.recv() => match maybe_command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                maybe_event = self.adapter_events.recv() => match maybe_event {
                    Some(event) => self.handle_adapter_event(event).await,
                    None => break,
                },
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_timeout();
                }
            }
        }
        debug!("session task stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        let Command { request, respond } = command;
        if let Some(pending) = &self.pending {
            debug!(kind = %pending.kind, "operation in progress, rejecting request");
            let _ = respond.send(Err(SessionError::OperationInProgress(pending.kind)));
            return;
        }
        match request {
            Request::CheckCapabilities => {
                let _ = respond.send(Ok(Response::Capabilities(self.adapter.capabilities())));
            }
            Request::StartScan { address_filter } => self.start_scan(address_filter, respond).await,
            Request::StopScan => self.stop_scan(respond).await,
            Request::Connect { address } => self.connect(address, respond).await,
            Request::Disconnect => self.disconnect(respond).await,
            Request::DiscoverServices => self.discover_services(respond).await,
            Request::SetMtu { mtu } => self.set_mtu(mtu, respond).await,
            Request::WriteCharacteristic {
                service_uuid,
                characteristic_uuid,
                payload,
                with_response,
                timeout_secs,
            } => {
                self.write_characteristic(
                    &service_uuid,
                    &characteristic_uuid,
                    payload,
                    with_response,
                    timeout_secs,
                    respond,
                )
                .await
            }
            Request::ReadCharacteristic { service_uuid, characteristic_uuid, timeout_secs } => {
                self.read_characteristic(&service_uuid, &characteristic_uuid, timeout_secs, respond)
                    .await
            }
            Request::StartNotify { service_uuid, characteristic_uuid } => {
                self.start_notify(&service_uuid, &characteristic_uuid, respond).await
            }
            Request::StopNotify { service_uuid, characteristic_uuid } => {
                self.stop_notify(&service_uuid, &characteristic_uuid, respond).await
            }
        }
    }

    async fn start_scan(&mut self, address_filter: Option<String>, respond: Responder) {
        if self.power == PowerState::PoweredOff {
            debug!("radio powered off, scan refused");
            let _ = respond.send(Ok(Response::Bool(false)));
            return;
        }
        if let Some(capabilities) = self.adapter.capabilities() {
            if !capabilities.all_granted() {
                debug!("permissions missing, scan refused");
                let _ = respond.send(Ok(Response::Bool(false)));
                return;
            }
        }
        if self.scanning {
            // Restart: drop the previous scan before rearming the filter.
            if let Err(err) = self.adapter.stop_scan().await {
                debug!(%err, "stopping previous scan failed");
            }
            self.scanning = false;
        }
        self.scan_filter = address_filter.map(|filter| canonical_address(&filter));
        match self.adapter.start_scan().await {
            Ok(()) => {
                debug!(filter = ?self.scan_filter, "scan started");
                self.scanning = true;
                let _ = respond.send(Ok(Response::Bool(true)));
            }
            Err(err) => {
                debug!(%err, "scan start failed");
                self.scan_filter = None;
                let _ = respond.send(Ok(Response::Bool(false)));
            }
        }
    }

    async fn stop_scan(&mut self, respond: Responder) {
        if self.scanning {
            if let Err(err) = self.adapter.stop_scan().await {
                debug!(%err, "scan stop failed");
            }
            self.scanning = false;
            self.scan_filter = None;
        }
        let _ = respond.send(Ok(Response::Bool(true)));
    }

    async fn connect(&mut self, address: String, respond: Responder) {
        let address = canonical_address(&address);
        if !self.registry.contains(&address) {
            debug!(%address, "connect refused, address not seen while scanning");
            let _ = respond.send(Ok(Response::Bool(false)));
            return;
        }
        if self.scanning {
            if let Err(err) = self.adapter.stop_scan().await {
                debug!(%err, "stopping scan before connect failed");
            }
            self.scanning = false;
            self.scan_filter = None;
            self.emit(SessionEvent::ScanStopped).await;
        }
        if let Err(err) = self.adapter.connect(&address).await {
            debug!(%err, %address, "connect failed to start");
            let _ = respond.send(Ok(Response::Bool(false)));
            return;
        }
        self.link = LinkState::Connecting;
        self.arm(OperationKind::Connect, respond, None);
    }

    async fn disconnect(&mut self, respond: Responder) {
        if self.link != LinkState::Disconnected {
            if let Err(err) = self.adapter.disconnect().await {
                debug!(%err, "hardware disconnect failed");
            }
        }
        self.reset_connection_state();
        let _ = respond.send(Ok(Response::Bool(true)));
    }

    async fn discover_services(&mut self, respond: Responder) {
        if self.link != LinkState::Ready {
            debug!("not connected, discovery refused");
            let _ = respond.send(Ok(Response::Services(None)));
            return;
        }
        if let Err(err) = self.adapter.discover_services().await {
            debug!(%err, "discovery failed to start");
            let _ = respond.send(Ok(Response::Services(None)));
            return;
        }
        self.arm(OperationKind::DiscoverServices, respond, None);
    }

    async fn set_mtu(&mut self, mtu: u16, respond: Responder) {
        if self.link != LinkState::Ready {
            debug!("not connected, mtu request refused");
            let _ = respond.send(Ok(Response::Mtu(None)));
            return;
        }
        if let Err(err) = self.adapter.request_mtu(mtu).await {
            debug!(%err, "mtu request failed to start");
            let _ = respond.send(Ok(Response::Mtu(None)));
            return;
        }
        self.arm(OperationKind::SetMtu, respond, None);
    }

    async fn write_characteristic(
        &mut self,
        service_uuid: &str,
        characteristic_uuid: &str,
        payload: Vec<u8>,
        with_response: bool,
        timeout_secs: Option<u64>,
        respond: Responder,
    ) {
        let Some((service, characteristic)) =
            self.resolve_target(service_uuid, characteristic_uuid, CharProperty::Write)
        else {
            let _ = respond.send(Ok(Response::Bool(false)));
            return;
        };
        if let Err(err) = self
            .adapter
            .write_characteristic(&service, &characteristic, &payload, with_response)
            .await
        {
            debug!(%err, %characteristic, "write failed to start");
            let _ = respond.send(Ok(Response::Bool(false)));
            return;
        }
        self.arm(OperationKind::WriteCharacteristic, respond, timeout_secs);
    }

    async fn read_characteristic(
        &mut self,
        service_uuid: &str,
        characteristic_uuid: &str,
        timeout_secs: Option<u64>,
        respond: Responder,
    ) {
        let Some((service, characteristic)) =
            self.resolve_target(service_uuid, characteristic_uuid, CharProperty::Read)
        else {
            let _ = respond.send(Ok(Response::Bytes(None)));
            return;
        };
        if let Err(err) = self.adapter.read_characteristic(&service, &characteristic).await {
            debug!(%err, %characteristic, "read failed to start");
            let _ = respond.send(Ok(Response::Bytes(None)));
            return;
        }
        self.arm(OperationKind::ReadCharacteristic, respond, timeout_secs);
    }

    async fn start_notify(
        &mut self,
        service_uuid: &str,
        characteristic_uuid: &str,
        respond: Responder,
    ) {
        let Some(characteristic_key) = canonical_uuid(characteristic_uuid) else {
            let _ = respond.send(Ok(Response::Bool(false)));
            return;
        };
        if self.subscriptions.contains(&characteristic_key) {
            debug!(characteristic = %characteristic_key, "already subscribed");
            let _ = respond.send(Ok(Response::Bool(true)));
            return;
        }
        let Some((service, characteristic)) =
            self.resolve_target(service_uuid, characteristic_uuid, CharProperty::Notify)
        else {
            let _ = respond.send(Ok(Response::Bool(false)));
            return;
        };
        if let Err(err) = self.adapter.set_notify(&service, &characteristic, true).await {
            debug!(%err, %characteristic, "subscribe failed");
            let _ = respond.send(Ok(Response::Bool(false)));
            return;
        }
        self.subscriptions.insert(characteristic);
        let _ = respond.send(Ok(Response::Bool(true)));
    }

    async fn stop_notify(
        &mut self,
        service_uuid: &str,
        characteristic_uuid: &str,
        respond: Responder,
    ) {
        let Some(characteristic_key) = canonical_uuid(characteristic_uuid) else {
            let _ = respond.send(Ok(Response::Bool(false)));
            return;
        };
        if !self.subscriptions.contains(&characteristic_key) {
            let _ = respond.send(Ok(Response::Bool(true)));
            return;
        }
        let Some((service, characteristic)) =
            self.resolve_target(service_uuid, characteristic_uuid, CharProperty::Notify)
        else {
            let _ = respond.send(Ok(Response::Bool(false)));
            return;
        };
        if let Err(err) = self.adapter.set_notify(&service, &characteristic, false).await {
            debug!(%err, %characteristic, "unsubscribe failed");
            let _ = respond.send(Ok(Response::Bool(false)));
            return;
        }
        self.subscriptions.remove(&characteristic);
        let _ = respond.send(Ok(Response::Bool(true)));
    }

    /// Canonicalizes a characteristic target and checks that the link is
    /// up and the characteristic advertises the required capability.
    fn resolve_target(
        &self,
        service_uuid: &str,
        characteristic_uuid: &str,
        required: CharProperty,
    ) -> Option<(String, String)> {
        if self.link != LinkState::Ready {
            debug!("not connected, request refused");
            return None;
        }
        let service = canonical_uuid(service_uuid)?;
        let characteristic = canonical_uuid(characteristic_uuid)?;
        let Some(record) = self.gatt.characteristic(&service, &characteristic) else {
            debug!(%service, %characteristic, "characteristic not in cache");
            return None;
        };
        if !record.supports(required) {
            debug!(%characteristic, %required, "characteristic lacks capability");
            return None;
        }
        Some((service, characteristic))
    }

    async fn handle_adapter_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::ScanResult(result) => self.on_scan_result(result).await,
            AdapterEvent::Connected => self.on_connected().await,
            AdapterEvent::ConnectionFailed => {
                if self.pending_kind() == Some(OperationKind::Connect) {
                    self.link = LinkState::Disconnected;
                    self.resolve_negative();
                } else {
                    debug!("stale connection-failed callback dropped");
                }
            }
            AdapterEvent::Disconnected => self.on_disconnected().await,
            AdapterEvent::ServicesDiscovered(raw) => self.on_services_discovered(raw),
            AdapterEvent::DiscoveryFailed => self.on_discovery_failed(),
            AdapterEvent::MtuChanged(mtu) => {
                if self.pending_kind() == Some(OperationKind::SetMtu) {
                    self.resolve(Response::Mtu(mtu));
                } else {
                    debug!("stale mtu callback dropped");
                }
            }
            AdapterEvent::WriteCompleted(ok) => {
                if self.pending_kind() == Some(OperationKind::WriteCharacteristic) {
                    self.resolve(Response::Bool(ok));
                } else {
                    debug!("stale write callback dropped");
                }
            }
            AdapterEvent::ReadCompleted(value) => {
                if self.pending_kind() == Some(OperationKind::ReadCharacteristic) {
                    self.resolve(Response::Bytes(value));
                } else {
                    debug!("stale read callback dropped");
                }
            }
            AdapterEvent::CharacteristicChanged { service, characteristic, value } => {
                self.emit(SessionEvent::Notify {
                    service_uuid: canonical_from_uuid(&service),
                    characteristic_uuid: canonical_from_uuid(&characteristic),
                    value,
                })
                .await;
            }
            AdapterEvent::PowerState(state) => self.on_power_state(state).await,
        }
    }

    async fn on_scan_result(&mut self, result: RawScanResult) {
        if !self.scanning {
            return;
        }
        let address = canonical_address(&result.address);
        if let Some(filter) = &self.scan_filter {
            if &address != filter {
                return;
            }
        }
        let record = AdvertisementRecord {
            name: result.name.clone().unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            mac_address: address.clone(),
            rssi: result.rssi,
            manufacturer_data: result
                .manufacturer_data
                .into_iter()
                .map(|(company_id, data)| ManufacturerData { company_id, data })
                .collect(),
            service_data: result
                .service_data
                .into_iter()
                .map(|(uuid, data)| ServiceData { uuid: short_uuid_16(&uuid), data })
                .collect(),
            tx_power: result.tx_power,
        };
        self.registry.insert(PeripheralHandle { address, name: result.name });
        self.emit(SessionEvent::Scan(record)).await;
    }

    async fn on_connected(&mut self) {
        if self.pending_kind() != Some(OperationKind::Connect)
            || self.link != LinkState::Connecting
        {
            debug!("stale link-up callback dropped");
            return;
        }
        self.link = LinkState::Discovering;
        self.gatt.clear();
        self.emit(SessionEvent::Connected).await;
        // Connect resolves only once discovery has populated the cache.
        if let Err(err) = self.adapter.discover_services().await {
            debug!(%err, "discovery failed to start after link-up");
            self.link = LinkState::Disconnected;
            self.resolve_negative();
        }
    }

    fn on_services_discovered(&mut self, raw: Vec<RawService>) {
        match self.pending_kind() {
            Some(OperationKind::Connect) if self.link == LinkState::Discovering => {
                self.gatt.replace(&raw);
                self.link = LinkState::Ready;
                debug!(services = raw.len(), "link ready");
                self.resolve(Response::Bool(true));
            }
            Some(OperationKind::DiscoverServices) => {
                self.gatt.replace(&raw);
                let records = self.gatt.records();
                self.resolve(Response::Services(Some(records)));
            }
            _ => debug!("stale discovery callback dropped"),
        }
    }

    fn on_discovery_failed(&mut self) {
        match self.pending_kind() {
            Some(OperationKind::Connect) => {
                self.link = LinkState::Disconnected;
                self.resolve_negative();
            }
            Some(OperationKind::DiscoverServices) => self.resolve_negative(),
            _ => debug!("stale discovery-failed callback dropped"),
        }
    }

    async fn on_disconnected(&mut self) {
        self.resolve_negative();
        self.reset_connection_state();
        self.emit(SessionEvent::Disconnected).await;
    }

    async fn on_power_state(&mut self, state: PowerState) {
        self.power = state;
        if state == PowerState::PoweredOff && self.scanning {
            debug!("radio powered off, scan cancelled");
            self.scanning = false;
            self.scan_filter = None;
            if let Err(err) = self.adapter.stop_scan().await {
                debug!(%err, "stopping scan after power-off failed");
            }
            self.emit(SessionEvent::ScanStopped).await;
        }
    }

    fn on_timeout(&mut self) {
        let kind = self.pending_kind();
        if let Some(pending) = &self.pending {
            debug!(id = pending.id, kind = %pending.kind, "operation timed out");
        }
        // The hardware is not cancelled; a completion arriving after this
        // point fails the kind check and is dropped.
        self.resolve_negative();
        if kind == Some(OperationKind::Connect) {
            self.link = LinkState::Disconnected;
        }
    }

    fn arm(&mut self, kind: OperationKind, responder: Responder, timeout_secs: Option<u64>) {
        let timeout = timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS).max(MIN_TIMEOUT_SECS);
        self.next_request_id += 1;
        debug!(id = self.next_request_id, %kind, timeout_secs = timeout, "operation armed");
        self.pending = Some(PendingOperation {
            id: self.next_request_id,
            kind,
            responder,
            deadline: Instant::now() + Duration::from_secs(timeout),
        });
    }

    fn resolve(&mut self, response: Response) {
        if let Some(pending) = self.pending.take() {
            debug!(id = pending.id, kind = %pending.kind, "operation resolved");
            let _ = pending.responder.send(Ok(response));
        }
    }

    fn resolve_negative(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(id = pending.id, kind = %pending.kind, "operation resolved negatively");
            let response = match pending.kind {
                OperationKind::Scan | OperationKind::Connect | OperationKind::WriteCharacteristic => {
                    Response::Bool(false)
                }
                OperationKind::DiscoverServices => Response::Services(None),
                OperationKind::SetMtu => Response::Mtu(None),
                OperationKind::ReadCharacteristic => Response::Bytes(None),
            };
            let _ = pending.responder.send(Ok(response));
        }
    }

    fn reset_connection_state(&mut self) {
        self.link = LinkState::Disconnected;
        self.gatt.clear();
        self.registry.clear();
        self.subscriptions.clear();
    }

    fn pending_kind(&self) -> Option<OperationKind> {
        self.pending.as_ref().map(|operation| operation.kind)
    }

    async fn emit(&self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            debug!("session event receiver dropped");
        }
    }
}

// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Adapters, sessions, and the devices discovery finds through them.
//!
//! One [Adapter] fronts one controller. It owns at most one open [Session]
//! (the bound socket) and the registry of [Device]s seen through that
//! session. `discover_devices` and `connect` block the calling thread; the
//! registry and the listener only ever observe events in socket-arrival
//! order, on that thread.

use crate::adv;
use crate::hci::{self, opcode, Address, CommandComplete, Event};
use crate::transport::{HciSocket, Transport, TransportError};
use log::{debug, warn};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::num::NonZeroU16;
use std::time::{Duration, Instant, SystemTime};

/// How long to wait for a controller to acknowledge a command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// A connection identified by its controller-assigned handle.
///
/// The zero handle is reserved wire-side for "not connected" and is never a
/// value of this type.
pub type ConnectionHandle = NonZeroU16;

/// Errors from adapter operations.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The operation needs an open session and there is none.
    #[error("no open session")]
    SessionClosed,
    /// A session is already open on this adapter.
    #[error("a session is already open")]
    SessionOpen,
    /// `stop_discovery` was called with no discovery in progress.
    #[error("discovery is not running")]
    NotDiscovering,
    /// `start_discovery` was called while discovery was in progress.
    #[error("discovery is already running")]
    AlreadyDiscovering,
    /// The controller rejected a command.
    #[error("the controller rejected command {opcode:#06X} with status {status:#04X}")]
    CommandFailed {
        /// The rejected command's opcode.
        opcode: u16,
        /// The controller's status code.
        status: u8,
    },
    /// The controller did not acknowledge a command in time.
    #[error("timed out waiting for the controller")]
    ControllerTimeout,
    /// The peer reported a failed connection attempt.
    #[error("connection to {address} failed with status {status:#04X}")]
    ConnectionFailed {
        /// The peer that was being connected.
        address: Address,
        /// The failure status from the connection-complete event.
        status: u8,
    },
    /// No connection-complete event for the peer arrived in time.
    #[error("connection to {address} timed out")]
    ConnectTimeout {
        /// The peer that was being connected.
        address: Address,
    },
    /// The socket failed underneath the operation.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A remote device observed during discovery.
#[derive(Debug, Clone)]
pub struct Device {
    address: Address,
    name: Option<String>,
    discovered: SystemTime,
    last_update: SystemTime,
    connection_handle: Option<ConnectionHandle>,
}

impl Device {
    /// The device's 48-bit address; unique within the registry.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The advertised name, once one has been seen.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// When the device was first observed.
    pub fn discovered(&self) -> SystemTime {
        self.discovered
    }

    /// When an advertisement from the device was last processed.
    pub fn last_update(&self) -> SystemTime {
        self.last_update
    }

    /// The connection handle, if the adapter currently holds a connection
    /// to this device.
    pub fn connection_handle(&self) -> Option<ConnectionHandle> {
        self.connection_handle
    }
}

/// What identifies an adapter: its controller device id, a caller-chosen
/// name, and the controller's own address.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    /// Controller device id (`hci0` is 0).
    pub device_id: u16,
    /// Caller-chosen adapter name.
    pub name: String,
    /// The controller's public address; all zeros until a session has been
    /// opened.
    pub address: Address,
}

/// Observer for registry changes during discovery.
///
/// Callbacks run synchronously on the thread driving `discover_devices`,
/// in socket-arrival order, and must not block: they sit on the critical
/// path of the controller-event read loop.
pub trait DiscoveryListener {
    /// A device was seen for the first time.
    fn device_added(&mut self, adapter: &AdapterInfo, device: &Device);

    /// A later advertisement refreshed an already-known device.
    fn device_updated(&mut self, adapter: &AdapterInfo, device: &Device);
}

/// An open channel to a controller, with the scan state that travels
/// with it.
///
/// A session is bound to the adapter that opened it and lives until
/// [Adapter::close_session]; dropping it releases the socket.
pub struct Session<T: Transport> {
    transport: T,
    scanning: bool,
}

impl<T: Transport> Session<T> {
    fn new(transport: T) -> Self {
        Self {
            transport,
            scanning: false,
        }
    }

    /// True while scanning is enabled on the controller.
    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Send a command and block for its Command Complete, skipping
    /// unrelated events; returns the return parameters past the status
    /// byte.
    fn execute(&mut self, opcode: u16, parameters: &[u8]) -> Result<Vec<u8>, HostError> {
        self.transport
            .write_packet(&hci::command(opcode, parameters))?;

        let deadline = Instant::now() + COMMAND_TIMEOUT;
        let mut buf = [0_u8; hci::MAX_EVENT_PACKET];
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(HostError::ControllerTimeout);
            }
            let Some(len) = self.transport.read_packet(&mut buf, deadline - now)? else {
                return Err(HostError::ControllerTimeout);
            };
            match Event::parse(&buf[..len]) {
                Ok(Event::CommandComplete(CommandComplete {
                    opcode: completed,
                    status,
                    parameters,
                })) if completed == opcode => {
                    return if status == 0 {
                        Ok(parameters)
                    } else {
                        Err(HostError::CommandFailed { opcode, status })
                    };
                }
                Ok(Event::CommandStatus {
                    opcode: pending,
                    status,
                }) if pending == opcode && status != 0 => {
                    return Err(HostError::CommandFailed { opcode, status });
                }
                Ok(_) => {}
                Err(e) => debug!("skipping undecodable packet while awaiting {opcode:#06X}: {e}"),
            }
        }
    }
}

/// One Bluetooth controller and everything discovered through it.
pub struct Adapter<T: Transport = HciSocket> {
    info: AdapterInfo,
    session: Option<Session<T>>,
    registry: HashMap<Address, Device>,
    listener: Option<Box<dyn DiscoveryListener>>,
}

impl<T: Transport> Adapter<T> {
    /// An adapter for controller `device_id`, with no session open.
    pub fn new(device_id: u16, name: impl Into<String>) -> Self {
        Self {
            info: AdapterInfo {
                device_id,
                name: name.into(),
                address: Address::from_le_bytes([0; 6]),
            },
            session: None,
            registry: HashMap::new(),
            listener: None,
        }
    }

    /// The adapter's identifying info.
    pub fn info(&self) -> &AdapterInfo {
        &self.info
    }

    /// True while a session is open.
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// True while discovery is enabled on the controller.
    pub fn is_discovering(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_scanning)
    }

    /// The device most recently observed at `address`, if any.
    pub fn device(&self, address: Address) -> Option<&Device> {
        self.registry.get(&address)
    }

    /// All devices observed through the current session.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.registry.values()
    }

    /// Register `listener` for discovery callbacks, replacing any previous
    /// registration.
    pub fn set_discovery_listener(&mut self, listener: Box<dyn DiscoveryListener>) {
        self.listener = Some(listener);
    }

    /// Adopt an already-open transport as this adapter's session.
    ///
    /// [Adapter::open_session] is the usual entry point; this one exists
    /// for transports other than the raw socket.
    pub fn open_session_with(&mut self, transport: T) -> Result<(), HostError> {
        if self.session.is_some() {
            return Err(HostError::SessionOpen);
        }
        self.session = Some(Session::new(transport));
        Ok(())
    }

    /// Close the session, releasing the socket and clearing the device
    /// registry. Closing an adapter with no open session is a no-op.
    pub fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            if session.scanning {
                // best effort; the socket is going away either way
                if let Err(e) = session
                    .transport
                    .write_packet(&hci::command(opcode::LE_SET_SCAN_ENABLE, &[0x00, 0x00]))
                {
                    warn!("could not disable scan while closing: {e}");
                }
            }
        }
        self.registry.clear();
    }

    /// Enable LE scanning. The session moves from idle to discovering;
    /// advertisements are collected by [Adapter::discover_devices].
    pub fn start_discovery(&mut self) -> Result<(), HostError> {
        let session = self.session.as_mut().ok_or(HostError::SessionClosed)?;
        if session.scanning {
            return Err(HostError::AlreadyDiscovering);
        }

        // active scan, 10ms interval and window, public own address, no
        // filter list
        const SCAN_PARAMETERS: [u8; 7] = [0x01, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00];
        session.execute(opcode::LE_SET_SCAN_PARAMETERS, &SCAN_PARAMETERS)?;
        // enable, duplicate filtering off: the registry does its own
        // deduplication and wants the name/timestamp refreshes
        session.execute(opcode::LE_SET_SCAN_ENABLE, &[0x01, 0x00])?;
        session.scanning = true;
        Ok(())
    }

    /// Disable LE scanning. Returns [HostError::NotDiscovering] when there
    /// is nothing to stop.
    pub fn stop_discovery(&mut self) -> Result<(), HostError> {
        let session = self.session.as_mut().ok_or(HostError::SessionClosed)?;
        if !session.scanning {
            return Err(HostError::NotDiscovering);
        }
        session.execute(opcode::LE_SET_SCAN_ENABLE, &[0x00, 0x00])?;
        session.scanning = false;
        Ok(())
    }

    /// Block reading controller events until `timeout` elapses, feeding
    /// every advertisement into the registry in arrival order and invoking
    /// the listener for each.
    ///
    /// Undecodable packets are skipped. A timeout with nothing received is
    /// a normal return; only a socket failure is an error.
    pub fn discover_devices(&mut self, timeout: Duration) -> Result<(), HostError> {
        if self.session.is_none() {
            return Err(HostError::SessionClosed);
        }
        let deadline = Instant::now() + timeout;
        let mut buf = [0_u8; hci::MAX_EVENT_PACKET];
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            // re-borrow each pass: the registry update below needs &mut self
            let session = self.session.as_mut().ok_or(HostError::SessionClosed)?;
            let Some(len) = session.transport.read_packet(&mut buf, deadline - now)? else {
                // no further advertisement pending
                return Ok(());
            };
            match Event::parse(&buf[..len]) {
                Ok(Event::LeAdvertisingReports(reports)) => {
                    for report in reports {
                        self.record_advertisement(&report.address, &report.data);
                    }
                }
                Ok(Event::DisconnectionComplete {
                    connection_handle, ..
                }) => self.clear_connection(connection_handle),
                Ok(other) => debug!("ignoring event during discovery: {other:?}"),
                Err(e) => debug!("skipping undecodable packet during discovery: {e}"),
            }
        }
    }

    /// Establish a connection to `address`, blocking until the correlated
    /// connection-complete event arrives or `timeout` elapses.
    ///
    /// On success the handle is also recorded on the registry entry for
    /// `address`, when one exists.
    pub fn connect(
        &mut self,
        address: Address,
        timeout: Duration,
    ) -> Result<ConnectionHandle, HostError> {
        let session = self.session.as_mut().ok_or(HostError::SessionClosed)?;

        let mut parameters = Vec::with_capacity(25);
        parameters.extend_from_slice(&0x0060_u16.to_le_bytes()); // scan interval 60ms
        parameters.extend_from_slice(&0x0030_u16.to_le_bytes()); // scan window 30ms
        parameters.push(0x00); // no filter accept list
        parameters.push(0x00); // peer address type: public
        parameters.extend_from_slice(&address.as_le_bytes());
        parameters.push(0x00); // own address type: public
        parameters.extend_from_slice(&0x0018_u16.to_le_bytes()); // conn interval min 30ms
        parameters.extend_from_slice(&0x0028_u16.to_le_bytes()); // conn interval max 50ms
        parameters.extend_from_slice(&0x0000_u16.to_le_bytes()); // max latency
        parameters.extend_from_slice(&0x0190_u16.to_le_bytes()); // supervision timeout 4s
        parameters.extend_from_slice(&[0x00; 4]); // CE length min/max
        session
            .transport
            .write_packet(&hci::command(opcode::LE_CREATE_CONNECTION, &parameters))?;

        let deadline = Instant::now() + timeout;
        let mut buf = [0_u8; hci::MAX_EVENT_PACKET];
        let handle = loop {
            let now = Instant::now();
            let session = self.session.as_mut().ok_or(HostError::SessionClosed)?;
            if now >= deadline {
                // withdraw the pending attempt so a retry can start clean
                if let Err(e) = session
                    .transport
                    .write_packet(&hci::command(opcode::LE_CREATE_CONNECTION_CANCEL, &[]))
                {
                    warn!("could not cancel connection attempt to {address}: {e}");
                }
                return Err(HostError::ConnectTimeout { address });
            }
            let Some(len) = session.transport.read_packet(&mut buf, deadline - now)? else {
                continue;
            };
            match Event::parse(&buf[..len]) {
                Ok(Event::CommandStatus {
                    opcode: pending,
                    status,
                }) if pending == opcode::LE_CREATE_CONNECTION && status != 0 => {
                    return Err(HostError::CommandFailed {
                        opcode: opcode::LE_CREATE_CONNECTION,
                        status,
                    });
                }
                Ok(Event::LeConnectionComplete(complete))
                    if complete.peer_address == address =>
                {
                    match (complete.status, NonZeroU16::new(complete.connection_handle)) {
                        (0, Some(handle)) => break handle,
                        (0, None) => {
                            // success with the reserved zero handle: treat
                            // as a failed attempt rather than hand out 0
                            return Err(HostError::ConnectionFailed { address, status: 0 });
                        }
                        (status, _) => {
                            return Err(HostError::ConnectionFailed { address, status });
                        }
                    }
                }
                Ok(Event::LeAdvertisingReports(reports)) => {
                    // discovery may still be enabled; keep the registry warm
                    for report in reports {
                        self.record_advertisement(&report.address, &report.data);
                    }
                }
                Ok(other) => debug!("ignoring event while connecting: {other:?}"),
                Err(e) => debug!("skipping undecodable packet while connecting: {e}"),
            }
        };

        if let Some(device) = self.registry.get_mut(&address) {
            device.connection_handle = Some(handle);
            device.last_update = SystemTime::now();
        }
        Ok(handle)
    }

    fn record_advertisement(&mut self, address: &Address, data: &[u8]) {
        let name = adv::local_name(data).map(str::to_owned);
        let now = SystemTime::now();
        match self.registry.entry(*address) {
            Entry::Occupied(mut entry) => {
                let device = entry.get_mut();
                if name.is_some() {
                    device.name = name;
                }
                device.last_update = now;
                if let Some(listener) = self.listener.as_deref_mut() {
                    listener.device_updated(&self.info, device);
                }
            }
            Entry::Vacant(entry) => {
                let device = entry.insert(Device {
                    address: *address,
                    name,
                    discovered: now,
                    last_update: now,
                    connection_handle: None,
                });
                if let Some(listener) = self.listener.as_deref_mut() {
                    listener.device_added(&self.info, device);
                }
            }
        }
    }

    fn clear_connection(&mut self, connection_handle: u16) {
        for device in self.registry.values_mut() {
            if device.connection_handle.map(ConnectionHandle::get) == Some(connection_handle) {
                device.connection_handle = None;
                device.last_update = SystemTime::now();
            }
        }
    }
}

impl Adapter<HciSocket> {
    /// Bind a raw socket to this adapter's controller and make it the open
    /// session, reading the controller's address while at it.
    ///
    /// Any failure releases the socket before returning.
    pub fn open_session(&mut self) -> Result<(), HostError> {
        if self.session.is_some() {
            return Err(HostError::SessionOpen);
        }
        let mut session = Session::new(HciSocket::open(self.info.device_id)?);
        let parameters = session.execute(opcode::READ_BD_ADDR, &[])?;
        if let Ok(le_bytes) = <[u8; 6]>::try_from(&parameters[..]) {
            self.info.address = Address::from_le_bytes(le_bytes);
        }
        self.session = Some(session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hci::event_code;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::str::FromStr;

    /// A transport fed from a script of incoming packets; reads past the
    /// end of the script behave as timeouts.
    #[derive(Default)]
    struct FakeTransport {
        incoming: VecDeque<Vec<u8>>,
        written: Vec<Vec<u8>>,
    }

    impl Transport for FakeTransport {
        fn write_packet(&mut self, packet: &[u8]) -> Result<(), TransportError> {
            self.written.push(packet.to_vec());
            Ok(())
        }

        fn read_packet(
            &mut self,
            buf: &mut [u8],
            _timeout: Duration,
        ) -> Result<Option<usize>, TransportError> {
            match self.incoming.pop_front() {
                Some(packet) => {
                    let len = packet.len().min(buf.len());
                    buf[..len].copy_from_slice(&packet[..len]);
                    Ok(Some(len))
                }
                None => Ok(None),
            }
        }
    }

    fn command_complete(opcode: u16, status: u8) -> Vec<u8> {
        let [lo, hi] = opcode.to_le_bytes();
        vec![0x04, event_code::COMMAND_COMPLETE, 0x04, 0x01, lo, hi, status]
    }

    fn advertising_report(address: Address, data: &[u8]) -> Vec<u8> {
        let mut payload = vec![event_code::LE_ADVERTISING_REPORT, 0x01, 0x00, 0x00];
        payload.extend_from_slice(&address.as_le_bytes());
        payload.push(data.len() as u8);
        payload.extend_from_slice(data);
        payload.push(0xC8);
        let mut packet = vec![0x04, event_code::LE_META, payload.len() as u8];
        packet.extend(payload);
        packet
    }

    fn connection_complete(address: Address, status: u8, handle: u16) -> Vec<u8> {
        let mut payload = vec![event_code::LE_CONNECTION_COMPLETE, status];
        payload.extend_from_slice(&handle.to_le_bytes());
        payload.extend_from_slice(&[0x00, 0x00]); // role, peer address type
        payload.extend_from_slice(&address.as_le_bytes());
        payload.extend_from_slice(&[0x18, 0x00, 0x00, 0x00, 0x90, 0x01, 0x00]);
        let mut packet = vec![0x04, event_code::LE_META, payload.len() as u8];
        packet.extend(payload);
        packet
    }

    fn open_adapter(incoming: Vec<Vec<u8>>) -> Adapter<FakeTransport> {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut adapter = Adapter::new(0, "test");
        adapter
            .open_session_with(FakeTransport {
                incoming: incoming.into(),
                written: Vec::new(),
            })
            .unwrap();
        adapter
    }

    fn peer() -> Address {
        Address::from_str("F0:F1:F2:F3:F4:F5").unwrap()
    }

    /// Records callback invocations through a shared log.
    struct Recorder {
        log: Rc<RefCell<Vec<(String, Address, Option<String>)>>>,
    }

    impl DiscoveryListener for Recorder {
        fn device_added(&mut self, _adapter: &AdapterInfo, device: &Device) {
            self.log.borrow_mut().push((
                "added".into(),
                device.address(),
                device.name().map(str::to_owned),
            ));
        }

        fn device_updated(&mut self, _adapter: &AdapterInfo, device: &Device) {
            self.log.borrow_mut().push((
                "updated".into(),
                device.address(),
                device.name().map(str::to_owned),
            ));
        }
    }

    #[test]
    fn start_discovery_sends_parameters_then_enable() {
        let mut adapter = open_adapter(vec![
            command_complete(opcode::LE_SET_SCAN_PARAMETERS, 0x00),
            command_complete(opcode::LE_SET_SCAN_ENABLE, 0x00),
        ]);
        adapter.start_discovery().unwrap();
        assert!(adapter.is_discovering());

        let session = adapter.session.as_ref().unwrap();
        assert_eq!(2, session.transport.written.len());
        assert_eq!(
            [0x01, 0x0B, 0x20],
            session.transport.written[0][..3]
        );
        assert_eq!(
            hci::command(opcode::LE_SET_SCAN_ENABLE, &[0x01, 0x00]),
            session.transport.written[1]
        );
    }

    #[test]
    fn start_discovery_surfaces_controller_rejection() {
        let mut adapter = open_adapter(vec![command_complete(
            opcode::LE_SET_SCAN_PARAMETERS,
            0x0C,
        )]);
        assert!(matches!(
            adapter.start_discovery(),
            Err(HostError::CommandFailed {
                opcode: opcode::LE_SET_SCAN_PARAMETERS,
                status: 0x0C
            })
        ));
        assert!(!adapter.is_discovering());
    }

    #[test]
    fn start_discovery_without_session_fails() {
        let mut adapter: Adapter<FakeTransport> = Adapter::new(0, "test");
        assert!(matches!(
            adapter.start_discovery(),
            Err(HostError::SessionClosed)
        ));
    }

    #[test]
    fn stop_discovery_without_start_is_a_failure_not_a_fault() {
        let mut adapter = open_adapter(vec![]);
        assert!(matches!(
            adapter.stop_discovery(),
            Err(HostError::NotDiscovering)
        ));
    }

    #[test]
    fn discovery_deduplicates_by_address_and_updates_in_place() {
        let name_data = [0x05, 0x09, b'P', b'o', b'l', b'a'];
        let mut adapter = open_adapter(vec![
            advertising_report(peer(), &[]),
            advertising_report(peer(), &name_data),
        ]);
        let log = Rc::new(RefCell::new(Vec::new()));
        adapter.set_discovery_listener(Box::new(Recorder { log: log.clone() }));

        adapter.discover_devices(Duration::from_secs(1)).unwrap();

        assert_eq!(1, adapter.devices().count());
        let device = adapter.device(peer()).unwrap();
        assert_eq!(Some("Pola"), device.name());
        assert!(device.last_update() >= device.discovered());

        assert_eq!(
            vec![
                ("added".to_string(), peer(), None),
                ("updated".to_string(), peer(), Some("Pola".to_string())),
            ],
            log.borrow().clone()
        );
    }

    #[test]
    fn an_update_without_a_name_keeps_the_old_name() {
        let name_data = [0x05, 0x09, b'P', b'o', b'l', b'a'];
        let mut adapter = open_adapter(vec![
            advertising_report(peer(), &name_data),
            advertising_report(peer(), &[]),
        ]);
        adapter.discover_devices(Duration::from_secs(1)).unwrap();
        assert_eq!(Some("Pola"), adapter.device(peer()).unwrap().name());
    }

    #[test]
    fn malformed_packets_are_skipped_not_fatal() {
        let mut adapter = open_adapter(vec![
            vec![0xFF, 0x00],                          // not even a packet type
            vec![0x04, 0x3E, 0x05, 0x02, 0x01, 0x00], // truncated report
            advertising_report(peer(), &[]),
        ]);
        adapter.discover_devices(Duration::from_secs(1)).unwrap();
        assert_eq!(1, adapter.devices().count());
    }

    #[test]
    fn timeout_with_no_advertisements_is_not_an_error() {
        let mut adapter = open_adapter(vec![]);
        adapter.discover_devices(Duration::from_millis(10)).unwrap();
        assert_eq!(0, adapter.devices().count());
    }

    #[test]
    fn new_listener_replaces_the_old_one() {
        let mut adapter = open_adapter(vec![advertising_report(peer(), &[])]);
        let first = Rc::new(RefCell::new(Vec::new()));
        let second = Rc::new(RefCell::new(Vec::new()));
        adapter.set_discovery_listener(Box::new(Recorder { log: first.clone() }));
        adapter.set_discovery_listener(Box::new(Recorder {
            log: second.clone(),
        }));

        adapter.discover_devices(Duration::from_secs(1)).unwrap();
        assert!(first.borrow().is_empty());
        assert_eq!(1, second.borrow().len());
    }

    fn queue(adapter: &mut Adapter<FakeTransport>, packet: Vec<u8>) {
        adapter
            .session
            .as_mut()
            .unwrap()
            .transport
            .incoming
            .push_back(packet);
    }

    #[test]
    fn connect_returns_the_correlated_nonzero_handle() {
        let other = Address::from_str("AA:BB:CC:DD:EE:FF").unwrap();
        let mut adapter = open_adapter(vec![advertising_report(peer(), &[])]);
        adapter.discover_devices(Duration::from_millis(10)).unwrap();

        // a completion for some other peer must not satisfy this call
        queue(&mut adapter, connection_complete(other, 0x00, 0x0041));
        queue(&mut adapter, connection_complete(peer(), 0x00, 0x0040));

        let handle = adapter.connect(peer(), Duration::from_secs(1)).unwrap();
        assert_eq!(0x0040, handle.get());
        assert_eq!(
            Some(handle),
            adapter.device(peer()).unwrap().connection_handle()
        );

        let session = adapter.session.as_ref().unwrap();
        let create = session.transport.written.last().unwrap();
        assert_eq!([0x01, 0x0D, 0x20, 25], create[..4]);
        assert_eq!(peer().as_le_bytes(), create[10..16]);
    }

    #[test]
    fn connect_failure_status_is_an_error() {
        let mut adapter = open_adapter(vec![connection_complete(peer(), 0x3E, 0x0000)]);
        assert!(matches!(
            adapter.connect(peer(), Duration::from_secs(1)),
            Err(HostError::ConnectionFailed {
                status: 0x3E,
                ..
            })
        ));
    }

    #[test]
    fn connect_timeout_cancels_the_attempt() {
        let mut adapter = open_adapter(vec![]);
        assert!(matches!(
            adapter.connect(peer(), Duration::from_millis(10)),
            Err(HostError::ConnectTimeout { .. })
        ));
        let session = adapter.session.as_ref().unwrap();
        let cancel = session.transport.written.last().unwrap();
        assert_eq!(
            hci::command(opcode::LE_CREATE_CONNECTION_CANCEL, &[]),
            *cancel
        );
    }

    #[test]
    fn connect_rejected_by_command_status_is_an_error() {
        // command status carrying a failure for LE Create Connection
        let packet = vec![0x04, event_code::COMMAND_STATUS, 0x04, 0x0C, 0x01, 0x0D, 0x20];
        let mut adapter = open_adapter(vec![packet]);
        assert!(matches!(
            adapter.connect(peer(), Duration::from_secs(1)),
            Err(HostError::CommandFailed {
                opcode: opcode::LE_CREATE_CONNECTION,
                status: 0x0C
            })
        ));
    }

    #[test]
    fn disconnection_clears_the_recorded_handle() {
        let mut adapter = open_adapter(vec![advertising_report(peer(), &[])]);
        adapter.discover_devices(Duration::from_millis(10)).unwrap();
        queue(&mut adapter, connection_complete(peer(), 0x00, 0x0040));
        adapter.connect(peer(), Duration::from_secs(1)).unwrap();
        assert!(adapter.device(peer()).unwrap().connection_handle().is_some());

        let disconnection = vec![
            0x04,
            event_code::DISCONNECTION_COMPLETE,
            0x04,
            0x00,
            0x40,
            0x00,
            0x13,
        ];
        queue(&mut adapter, disconnection);
        adapter.discover_devices(Duration::from_millis(10)).unwrap();

        assert_eq!(None, adapter.device(peer()).unwrap().connection_handle());
    }

    #[test]
    fn close_session_is_idempotent_and_clears_the_registry() {
        let mut adapter = open_adapter(vec![advertising_report(peer(), &[])]);
        adapter.discover_devices(Duration::from_millis(10)).unwrap();
        assert_eq!(1, adapter.devices().count());

        adapter.close_session();
        assert!(!adapter.is_open());
        assert_eq!(0, adapter.devices().count());

        adapter.close_session();
        assert!(!adapter.is_open());
    }

    #[test]
    fn opening_a_second_session_fails() {
        let mut adapter = open_adapter(vec![]);
        assert!(matches!(
            adapter.open_session_with(FakeTransport::default()),
            Err(HostError::SessionOpen)
        ));
    }
}

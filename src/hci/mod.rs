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

//! HCI packet framing: command assembly and the event decoding the
//! discovery/connection loop relies on.
//!
//! Controllers send events the stack did not ask for and peers put
//! arbitrary bytes in advertisements, so event decoding treats every
//! malformed packet as a skippable [HciError].

use crate::codec::{self, ByteOrder, CodecError};
use itertools::Itertools as _;
use std::fmt;
use std::str::FromStr;


/// Command opcodes (OGF << 10 | OCF).
pub mod opcode {
    /// Set Event Mask.
    pub const SET_EVENT_MASK: u16 = 0x0C01;
    /// Reset the controller.
    pub const RESET: u16 = 0x0C03;
    /// Read the controller's public address.
    pub const READ_BD_ADDR: u16 = 0x1009;
    /// LE Set Event Mask.
    pub const LE_SET_EVENT_MASK: u16 = 0x2001;
    /// LE Set Scan Parameters.
    pub const LE_SET_SCAN_PARAMETERS: u16 = 0x200B;
    /// LE Set Scan Enable.
    pub const LE_SET_SCAN_ENABLE: u16 = 0x200C;
    /// LE Create Connection.
    pub const LE_CREATE_CONNECTION: u16 = 0x200D;
    /// LE Create Connection Cancel.
    pub const LE_CREATE_CONNECTION_CANCEL: u16 = 0x200E;
}

/// Event codes.
pub mod event_code {
    /// Disconnection Complete.
    pub const DISCONNECTION_COMPLETE: u8 = 0x05;
    /// Command Complete.
    pub const COMMAND_COMPLETE: u8 = 0x0E;
    /// Command Status.
    pub const COMMAND_STATUS: u8 = 0x0F;
    /// LE Meta; the subevent code is the first payload byte.
    pub const LE_META: u8 = 0x3E;
    /// LE Connection Complete subevent.
    pub const LE_CONNECTION_COMPLETE: u8 = 0x01;
    /// LE Advertising Report subevent.
    pub const LE_ADVERTISING_REPORT: u8 = 0x02;
}

/// Largest event packet: type byte, event code, length byte, 255 payload bytes.
pub const MAX_EVENT_PACKET: usize = 258;

/// HCI packet type, prepended to every packet on the transport.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PacketType {
    /// Host-to-controller command.
    Command = 0x01,
    /// ACL data.
    AclData = 0x02,
    /// Synchronous (SCO) data.
    ScoData = 0x03,
    /// Controller-to-host event.
    Event = 0x04,
}

impl TryFrom<u8> for PacketType {
    type Error = HciError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PacketType::Command),
            0x02 => Ok(PacketType::AclData),
            0x03 => Ok(PacketType::ScoData),
            0x04 => Ok(PacketType::Event),
            _ => Err(HciError::InvalidPacketType { value }),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(packet_type: PacketType) -> Self {
        packet_type as u8
    }
}

/// Errors that may arise when framing or decoding HCI packets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HciError {
    /// The packet type byte is not one of the four assigned values.
    #[error("packet type ({value:#04X}) is invalid")]
    InvalidPacketType {
        /// The offending byte.
        value: u8,
    },
    /// Expected an event packet, found another type.
    #[error("expected an event packet, got {actual:?}")]
    NotAnEvent {
        /// The type the packet actually had.
        actual: PacketType,
    },
    /// The packet ended before its declared or implied length.
    #[error("packet truncated ({len} bytes)")]
    Truncated {
        /// How many bytes there were.
        len: usize,
    },
    /// The event's length byte disagrees with the bytes that follow it.
    #[error("event declares {declared} payload bytes but carries {actual}")]
    LengthMismatch {
        /// The length byte's value.
        declared: usize,
        /// The bytes actually present.
        actual: usize,
    },
    /// A field inside the event did not decode.
    #[error("malformed {event} event")]
    Malformed {
        /// Which event failed to decode.
        event: &'static str,
    },
    /// A textual device address did not parse.
    #[error("'{input}' is not a device address")]
    InvalidAddress {
        /// The rejected text.
        input: String,
    },
}

impl From<CodecError> for HciError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::OutOfBounds { len, .. } => HciError::Truncated { len },
        }
    }
}

/// A 48-bit device address.
///
/// Stored in wire (little-endian) order; displayed big-endian,
/// colon-separated, as on a device label.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    le_bytes: [u8; 6],
}

impl Address {
    /// Construct from wire-order bytes.
    pub const fn from_le_bytes(le_bytes: [u8; 6]) -> Self {
        Self { le_bytes }
    }

    /// The address in wire (little-endian) order.
    pub fn as_le_bytes(&self) -> [u8; 6] {
        self.le_bytes
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.le_bytes
                .iter()
                .rev()
                .map(|byte| hex::encode_upper([*byte]))
                .join(":")
        )
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl FromStr for Address {
    type Err = HciError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || HciError::InvalidAddress {
            input: s.to_owned(),
        };
        let mut bytes = [0_u8; 6];
        let mut parts = s.split(':');
        // display order is big-endian, so fill the array back to front
        for byte in bytes.iter_mut().rev() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self { le_bytes: bytes })
    }
}

/// Assemble a command packet: type prefix, little-endian opcode, parameter
/// length, parameters.
pub fn command(opcode: u16, parameters: &[u8]) -> Vec<u8> {
    debug_assert!(parameters.len() <= u8::MAX as usize);
    let mut packet = Vec::with_capacity(4 + parameters.len());
    packet.push(PacketType::Command.into());
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(parameters.len() as u8);
    packet.extend_from_slice(parameters);
    packet
}

/// Command Complete: the controller finished a command and returned its
/// status plus any return parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandComplete {
    /// The completed command's opcode.
    pub opcode: u16,
    /// Status code; 0 is success.
    pub status: u8,
    /// Return parameters after the status byte.
    pub parameters: Vec<u8>,
}

/// LE Connection Complete: a connection attempt resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionComplete {
    /// Status code; 0 is success.
    pub status: u8,
    /// The new connection's handle; only meaningful on success.
    pub connection_handle: u16,
    /// Peer address type (public/random).
    pub peer_address_type: u8,
    /// Peer address.
    pub peer_address: Address,
}

/// One report out of an LE Advertising Report event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingReport {
    /// Advertisement kind (connectable, scan response, ...).
    pub event_type: u8,
    /// Advertiser address type (public/random).
    pub address_type: u8,
    /// Advertiser address.
    pub address: Address,
    /// The advertisement payload.
    pub data: Vec<u8>,
    /// Received signal strength in dBm, or 127 when unavailable.
    pub rssi: i8,
}

/// A decoded controller event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Command Complete.
    CommandComplete(CommandComplete),
    /// Command Status: an intermediate status for a command that completes
    /// asynchronously.
    CommandStatus {
        /// Status code; 0 means the command is underway.
        status: u8,
        /// The command's opcode.
        opcode: u16,
    },
    /// LE Advertising Report, carrying one or more reports.
    LeAdvertisingReports(Vec<AdvertisingReport>),
    /// LE Connection Complete.
    LeConnectionComplete(ConnectionComplete),
    /// Disconnection Complete.
    DisconnectionComplete {
        /// The closed connection's handle.
        connection_handle: u16,
        /// Why it closed.
        reason: u8,
    },
    /// An event this stack does not decode; safe to skip.
    Unknown {
        /// The event code.
        event_code: u8,
    },
}

impl Event {
    /// Decode a full event packet, including its packet-type prefix.
    pub fn parse(packet: &[u8]) -> Result<Event, HciError> {
        let (&packet_type, rest) = packet
            .split_first()
            .ok_or(HciError::Truncated { len: packet.len() })?;
        match PacketType::try_from(packet_type)? {
            PacketType::Event => {}
            actual => return Err(HciError::NotAnEvent { actual }),
        }
        let [event_code, declared, payload @ ..] = rest else {
            return Err(HciError::Truncated { len: packet.len() });
        };
        if *declared as usize != payload.len() {
            return Err(HciError::LengthMismatch {
                declared: *declared as usize,
                actual: payload.len(),
            });
        }

        match *event_code {
            event_code::COMMAND_COMPLETE => parse_command_complete(payload),
            event_code::COMMAND_STATUS => parse_command_status(payload),
            event_code::DISCONNECTION_COMPLETE => parse_disconnection_complete(payload),
            event_code::LE_META => parse_le_meta(payload),
            other => Ok(Event::Unknown { event_code: other }),
        }
    }
}

fn parse_command_complete(payload: &[u8]) -> Result<Event, HciError> {
    // num_hci_command_packets(1) opcode(2) status(1) return parameters
    let opcode = codec::get_u16(payload, 1, ByteOrder::LittleEndian)?;
    let status = *payload.get(3).ok_or(HciError::Malformed {
        event: "Command Complete",
    })?;
    Ok(Event::CommandComplete(CommandComplete {
        opcode,
        status,
        parameters: payload[4..].to_vec(),
    }))
}

fn parse_command_status(payload: &[u8]) -> Result<Event, HciError> {
    // status(1) num_hci_command_packets(1) opcode(2)
    let status = *payload.first().ok_or(HciError::Malformed {
        event: "Command Status",
    })?;
    let opcode = codec::get_u16(payload, 2, ByteOrder::LittleEndian)?;
    Ok(Event::CommandStatus { status, opcode })
}

fn parse_disconnection_complete(payload: &[u8]) -> Result<Event, HciError> {
    // status(1) connection_handle(2) reason(1)
    if payload.len() < 4 {
        return Err(HciError::Malformed {
            event: "Disconnection Complete",
        });
    }
    Ok(Event::DisconnectionComplete {
        connection_handle: codec::get_u16(payload, 1, ByteOrder::LittleEndian)?,
        reason: payload[3],
    })
}

fn parse_le_meta(payload: &[u8]) -> Result<Event, HciError> {
    let (&subevent, rest) = payload.split_first().ok_or(HciError::Malformed {
        event: "LE Meta",
    })?;
    match subevent {
        event_code::LE_CONNECTION_COMPLETE => parse_connection_complete(rest),
        event_code::LE_ADVERTISING_REPORT => parse_advertising_reports(rest),
        // undecoded subevents surface under the meta code
        _ => Ok(Event::Unknown {
            event_code: event_code::LE_META,
        }),
    }
}

fn parse_connection_complete(payload: &[u8]) -> Result<Event, HciError> {
    // status(1) handle(2) role(1) peer_address_type(1) peer_address(6)
    // conn_interval(2) latency(2) supervision_timeout(2) clock_accuracy(1)
    if payload.len() < 11 {
        return Err(HciError::Malformed {
            event: "LE Connection Complete",
        });
    }
    let peer_address: [u8; 6] = payload[5..11].try_into().unwrap();
    Ok(Event::LeConnectionComplete(ConnectionComplete {
        status: payload[0],
        connection_handle: codec::get_u16(payload, 1, ByteOrder::LittleEndian)?,
        peer_address_type: payload[4],
        peer_address: Address::from_le_bytes(peer_address),
    }))
}

fn parse_advertising_reports(payload: &[u8]) -> Result<Event, HciError> {
    let malformed = || HciError::Malformed {
        event: "LE Advertising Report",
    };
    let (&num_reports, mut rest) = payload.split_first().ok_or_else(malformed)?;
    let mut reports = Vec::with_capacity(num_reports as usize);
    for _ in 0..num_reports {
        // event_type(1) address_type(1) address(6) data_len(1) data rssi(1)
        if rest.len() < 9 {
            return Err(malformed());
        }
        let address: [u8; 6] = rest[2..8].try_into().unwrap();
        let data_len = rest[8] as usize;
        if rest.len() < 9 + data_len + 1 {
            return Err(malformed());
        }
        reports.push(AdvertisingReport {
            event_type: rest[0],
            address_type: rest[1],
            address: Address::from_le_bytes(address),
            data: rest[9..9 + data_len].to_vec(),
            rssi: rest[9 + data_len] as i8,
        });
        rest = &rest[9 + data_len + 1..];
    }
    Ok(Event::LeAdvertisingReports(reports))
}

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

//! HCI packet transport.
//!
//! [HciSocket] is the real thing: a raw AF_BLUETOOTH socket bound to one
//! controller. The [Transport] trait is the seam the adapter drives, so the
//! state machine can run against a scripted transport in tests.

use log::debug;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read as _, Write as _};
use std::time::Duration;

// Bluetooth socket constants; Linux kernel extensions, absent from libc
const AF_BLUETOOTH: i32 = 31;
const BTPROTO_HCI: i32 = 1;
const SOL_HCI: i32 = 0;
const HCI_FILTER: i32 = 2;

const HCI_CHANNEL_RAW: u16 = 0;

const HCI_EVENT_PKT: u8 = 0x04;

/// Errors from opening or driving the HCI socket.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The socket could not be created.
    #[error("failed to open an HCI socket: {0}")]
    Open(#[source] io::Error),
    /// The socket could not be bound to the controller, typically because
    /// the device id names no controller.
    #[error("failed to bind hci{device_id}: {source}")]
    Bind {
        /// The controller device id.
        device_id: u16,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
    /// The event filter could not be installed.
    #[error("failed to set the HCI event filter: {0}")]
    Filter(#[source] io::Error),
    /// A read from the controller failed.
    #[error("socket read failed: {0}")]
    Read(#[source] io::Error),
    /// A write to the controller failed.
    #[error("socket write failed: {0}")]
    Write(#[source] io::Error),
}

/// A byte channel carrying whole HCI packets to and from one controller.
pub trait Transport {
    /// Write one packet, type prefix included.
    fn write_packet(&mut self, packet: &[u8]) -> Result<(), TransportError>;

    /// Read one packet into `buf`, waiting at most `timeout`.
    ///
    /// Returns the packet length, or `None` if the timeout elapsed first.
    fn read_packet(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<usize>, TransportError>;
}

// The sockaddr and filter layouts the kernel expects; socket2 knows
// neither, so the bind and setsockopt calls go through libc directly.
#[allow(unsafe_code)]
mod sys {
    use super::*;
    use std::os::unix::io::AsRawFd;

    /// HCI socket address
    #[repr(C)]
    struct SockaddrHci {
        hci_family: u16,
        hci_dev: u16,
        hci_channel: u16,
    }

    /// HCI socket filter
    #[repr(C)]
    pub(super) struct HciFilter {
        pub(super) type_mask: u32,
        pub(super) event_mask: [u32; 2],
        pub(super) opcode: u16,
    }

    pub(super) fn bind_hci(socket: &Socket, dev_id: u16, channel: u16) -> io::Result<()> {
        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as u16,
            hci_dev: dev_id,
            hci_channel: channel,
        };
        // SAFETY: bind() with a valid fd and a properly sized sockaddr struct
        let ret = unsafe {
            libc::bind(
                socket.as_raw_fd(),
                &addr as *const SockaddrHci as *const libc::sockaddr,
                std::mem::size_of::<SockaddrHci>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub(super) fn set_hci_filter(socket: &Socket, filter: &HciFilter) -> io::Result<()> {
        // SAFETY: setsockopt with a valid fd and a properly sized filter struct
        let ret = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                filter as *const HciFilter as *const libc::c_void,
                std::mem::size_of::<HciFilter>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// A raw HCI socket bound to one controller device id.
///
/// The fd is owned for the life of the value and released on drop, on every
/// path.
pub struct HciSocket {
    socket: Socket,
    device_id: u16,
}

impl HciSocket {
    /// Open and bind a raw socket to controller `device_id` (`hci0` is 0),
    /// filtered to event packets.
    pub fn open(device_id: u16) -> Result<Self, TransportError> {
        let socket = Socket::new(
            Domain::from(AF_BLUETOOTH),
            Type::RAW,
            Some(Protocol::from(BTPROTO_HCI)),
        )
        .map_err(TransportError::Open)?;

        sys::bind_hci(&socket, device_id, HCI_CHANNEL_RAW).map_err(|source| {
            TransportError::Bind { device_id, source }
        })?;

        // the raw channel is shared with the rest of the host; only events
        // are of interest here
        let filter = sys::HciFilter {
            type_mask: 1 << HCI_EVENT_PKT,
            event_mask: [0xFFFF_FFFF, 0xFFFF_FFFF],
            opcode: 0,
        };
        sys::set_hci_filter(&socket, &filter).map_err(TransportError::Filter)?;

        debug!("opened raw HCI socket for hci{device_id}");
        Ok(Self { socket, device_id })
    }

    /// The controller device id this socket is bound to.
    pub fn device_id(&self) -> u16 {
        self.device_id
    }
}

impl Transport for HciSocket {
    fn write_packet(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        (&self.socket)
            .write_all(packet)
            .map_err(TransportError::Write)
    }

    fn read_packet(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<usize>, TransportError> {
        // a zero Duration would mean "no timeout" to the kernel
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))
            .map_err(TransportError::Read)?;
        match (&self.socket).read(buf) {
            Ok(len) => Ok(Some(len)),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(TransportError::Read(e)),
        }
    }
}

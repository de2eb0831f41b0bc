// Copyright 2024 Google LLC
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

//! Attribute Protocol PDUs.
//!
//! A PDU is one opcode byte followed by opcode-specific fields. Decoding
//! dispatches on that byte; input comes from a peer device and is never
//! trusted, so every shape problem is an [AttError], not a panic.

use crate::core::{Uuid, Uuid128, Uuid16};
use bytes::BufMut;
use nom::number;

/// Smallest attribute handle a peer may expose.
pub const MIN_HANDLE: u16 = 0x0001;
/// Largest attribute handle a peer may expose.
pub const MAX_HANDLE: u16 = 0xFFFF;

/// ATT opcodes this stack speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Opcode {
    ErrorResponse = 0x01,
    ExchangeMtuRequest = 0x02,
    ExchangeMtuResponse = 0x03,
    FindInformationRequest = 0x04,
    ReadByTypeRequest = 0x08,
    ReadRequest = 0x0A,
    ReadResponse = 0x0B,
    ReadByGroupTypeRequest = 0x10,
    WriteRequest = 0x12,
    WriteResponse = 0x13,
    WriteCommand = 0x52,
}

impl TryFrom<u8> for Opcode {
    type Error = AttError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Opcode::ErrorResponse),
            0x02 => Ok(Opcode::ExchangeMtuRequest),
            0x03 => Ok(Opcode::ExchangeMtuResponse),
            0x04 => Ok(Opcode::FindInformationRequest),
            0x08 => Ok(Opcode::ReadByTypeRequest),
            0x0A => Ok(Opcode::ReadRequest),
            0x0B => Ok(Opcode::ReadResponse),
            0x10 => Ok(Opcode::ReadByGroupTypeRequest),
            0x12 => Ok(Opcode::WriteRequest),
            0x13 => Ok(Opcode::WriteResponse),
            0x52 => Ok(Opcode::WriteCommand),
            _ => Err(AttError::UnknownOpcode { opcode: value }),
        }
    }
}

/// Errors from building or decoding ATT PDUs.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AttError {
    /// The leading opcode byte is not one this stack speaks.
    #[error("unknown ATT opcode {opcode:#04X}")]
    UnknownOpcode {
        /// The opcode byte.
        opcode: u8,
    },
    /// The PDU ended before its fixed fields did.
    #[error("PDU truncated")]
    Truncated,
    /// The PDU carried bytes past its last field.
    #[error("{len} unexpected bytes after the last PDU field")]
    TrailingBytes {
        /// How many bytes were left over.
        len: usize,
    },
    /// A handle range must satisfy 0x0001 <= start <= end.
    #[error("attribute handle range {start:#06X}..={end:#06X} is invalid")]
    InvalidHandleRange {
        /// Range start.
        start: u16,
        /// Range end.
        end: u16,
    },
    /// An attribute type must be a 16- or 128-bit UUID.
    #[error("attribute type must be 16 or 128 bits wide, not {width} bits")]
    InvalidAttributeTypeWidth {
        /// The rejected width in bits.
        width: usize,
    },
}

fn check_handle_range(start: u16, end: u16) -> Result<(), AttError> {
    if start >= MIN_HANDLE && start <= end {
        Ok(())
    } else {
        Err(AttError::InvalidHandleRange { start, end })
    }
}

/// Read By Type / Read By Group Type request: a handle range plus the
/// attribute type to match within it.
///
/// The two requests share a wire shape and differ only in opcode; the
/// `grouped` flag selects which one this is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByTypeRequest {
    grouped: bool,
    start_handle: u16,
    end_handle: u16,
    attribute_type: Uuid,
}

impl ReadByTypeRequest {
    /// Build a request, validating the handle range and the attribute-type
    /// width (16 or 128 bits; the 32-bit width is not legal on the wire).
    pub fn new(
        grouped: bool,
        start_handle: u16,
        end_handle: u16,
        attribute_type: Uuid,
    ) -> Result<Self, AttError> {
        check_handle_range(start_handle, end_handle)?;
        if !matches!(attribute_type, Uuid::Uuid16(_) | Uuid::Uuid128(_)) {
            return Err(AttError::InvalidAttributeTypeWidth {
                width: attribute_type.size() * 8,
            });
        }
        Ok(Self {
            grouped,
            start_handle,
            end_handle,
            attribute_type,
        })
    }

    /// True for a Read By Group Type request.
    pub fn grouped(&self) -> bool {
        self.grouped
    }

    /// First handle of the range, inclusive.
    pub fn start_handle(&self) -> u16 {
        self.start_handle
    }

    /// Last handle of the range, inclusive.
    pub fn end_handle(&self) -> u16 {
        self.end_handle
    }

    /// The attribute type to match, whichever width was encoded.
    pub fn attribute_type(&self) -> &Uuid {
        &self.attribute_type
    }
}

/// An Attribute Protocol PDU, tagged by opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttPdu {
    /// A request failed; carries the offending request's opcode and handle.
    ErrorResponse {
        /// Opcode of the request that failed.
        request_opcode: u8,
        /// Handle the request was operating on, or 0.
        attribute_handle: u16,
        /// ATT error code.
        error_code: u8,
    },
    /// Client announces its receive MTU.
    ExchangeMtuRequest {
        /// Client receive MTU.
        client_mtu: u16,
    },
    /// Server answers with its receive MTU.
    ExchangeMtuResponse {
        /// Server receive MTU.
        server_mtu: u16,
    },
    /// Ask the server to list attribute handles and types in a range.
    FindInformationRequest {
        /// First handle of the range, inclusive.
        start_handle: u16,
        /// Last handle of the range, inclusive.
        end_handle: u16,
    },
    /// Read By Type or Read By Group Type request.
    ReadByType(ReadByTypeRequest),
    /// Read one attribute's value.
    ReadRequest {
        /// Handle to read.
        attribute_handle: u16,
    },
    /// The value a read produced.
    ReadResponse {
        /// The attribute value.
        value: Vec<u8>,
    },
    /// Write one attribute's value, expecting a response.
    WriteRequest {
        /// Handle to write.
        attribute_handle: u16,
        /// Value to write.
        value: Vec<u8>,
    },
    /// A write completed.
    WriteResponse,
    /// Write one attribute's value with no response.
    WriteCommand {
        /// Handle to write.
        attribute_handle: u16,
        /// Value to write.
        value: Vec<u8>,
    },
}

fn le_u16(input: &[u8]) -> Result<(&[u8], u16), AttError> {
    number::complete::le_u16::<_, nom::error::Error<_>>(input).map_err(|_| AttError::Truncated)
}

fn u8(input: &[u8]) -> Result<(&[u8], u8), AttError> {
    number::complete::u8::<_, nom::error::Error<_>>(input).map_err(|_| AttError::Truncated)
}

fn finish(rest: &[u8]) -> Result<(), AttError> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(AttError::TrailingBytes { len: rest.len() })
    }
}

fn parse_read_by_type(input: &[u8], grouped: bool) -> Result<AttPdu, AttError> {
    let (input, start_handle) = le_u16(input)?;
    let (input, end_handle) = le_u16(input)?;
    // the attribute type's width is whatever is left
    let attribute_type: Uuid = match input.len() {
        2 => Uuid16::parse_le(input)
            .map_err(|_| AttError::Truncated)?
            .1
            .into(),
        16 => Uuid128::parse_le(input)
            .map_err(|_| AttError::Truncated)?
            .1
            .into(),
        len => {
            return Err(AttError::InvalidAttributeTypeWidth { width: len * 8 });
        }
    };
    Ok(AttPdu::ReadByType(ReadByTypeRequest::new(
        grouped,
        start_handle,
        end_handle,
        attribute_type,
    )?))
}

impl AttPdu {
    /// This PDU's opcode.
    pub fn opcode(&self) -> Opcode {
        match self {
            AttPdu::ErrorResponse { .. } => Opcode::ErrorResponse,
            AttPdu::ExchangeMtuRequest { .. } => Opcode::ExchangeMtuRequest,
            AttPdu::ExchangeMtuResponse { .. } => Opcode::ExchangeMtuResponse,
            AttPdu::FindInformationRequest { .. } => Opcode::FindInformationRequest,
            AttPdu::ReadByType(request) if request.grouped() => Opcode::ReadByGroupTypeRequest,
            AttPdu::ReadByType(_) => Opcode::ReadByTypeRequest,
            AttPdu::ReadRequest { .. } => Opcode::ReadRequest,
            AttPdu::ReadResponse { .. } => Opcode::ReadResponse,
            AttPdu::WriteRequest { .. } => Opcode::WriteRequest,
            AttPdu::WriteResponse => Opcode::WriteResponse,
            AttPdu::WriteCommand { .. } => Opcode::WriteCommand,
        }
    }

    /// Decode a PDU from its wire form.
    pub fn parse(bytes: &[u8]) -> Result<AttPdu, AttError> {
        let (input, opcode) = u8(bytes)?;
        match Opcode::try_from(opcode)? {
            Opcode::ErrorResponse => {
                let (input, request_opcode) = u8(input)?;
                let (input, attribute_handle) = le_u16(input)?;
                let (input, error_code) = u8(input)?;
                finish(input)?;
                Ok(AttPdu::ErrorResponse {
                    request_opcode,
                    attribute_handle,
                    error_code,
                })
            }
            Opcode::ExchangeMtuRequest => {
                let (input, client_mtu) = le_u16(input)?;
                finish(input)?;
                Ok(AttPdu::ExchangeMtuRequest { client_mtu })
            }
            Opcode::ExchangeMtuResponse => {
                let (input, server_mtu) = le_u16(input)?;
                finish(input)?;
                Ok(AttPdu::ExchangeMtuResponse { server_mtu })
            }
            Opcode::FindInformationRequest => {
                let (input, start_handle) = le_u16(input)?;
                let (input, end_handle) = le_u16(input)?;
                finish(input)?;
                check_handle_range(start_handle, end_handle)?;
                Ok(AttPdu::FindInformationRequest {
                    start_handle,
                    end_handle,
                })
            }
            Opcode::ReadByTypeRequest => parse_read_by_type(input, false),
            Opcode::ReadByGroupTypeRequest => parse_read_by_type(input, true),
            Opcode::ReadRequest => {
                let (input, attribute_handle) = le_u16(input)?;
                finish(input)?;
                Ok(AttPdu::ReadRequest { attribute_handle })
            }
            Opcode::ReadResponse => Ok(AttPdu::ReadResponse {
                value: input.to_vec(),
            }),
            Opcode::WriteRequest => {
                let (input, attribute_handle) = le_u16(input)?;
                Ok(AttPdu::WriteRequest {
                    attribute_handle,
                    value: input.to_vec(),
                })
            }
            Opcode::WriteResponse => {
                finish(input)?;
                Ok(AttPdu::WriteResponse)
            }
            Opcode::WriteCommand => {
                let (input, attribute_handle) = le_u16(input)?;
                Ok(AttPdu::WriteCommand {
                    attribute_handle,
                    value: input.to_vec(),
                })
            }
        }
    }

    /// Encode this PDU to its wire form.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.put_u8(self.opcode() as u8);
        match self {
            AttPdu::ErrorResponse {
                request_opcode,
                attribute_handle,
                error_code,
            } => {
                buf.put_u8(*request_opcode);
                buf.put_u16_le(*attribute_handle);
                buf.put_u8(*error_code);
            }
            AttPdu::ExchangeMtuRequest { client_mtu } => buf.put_u16_le(*client_mtu),
            AttPdu::ExchangeMtuResponse { server_mtu } => buf.put_u16_le(*server_mtu),
            AttPdu::FindInformationRequest {
                start_handle,
                end_handle,
            } => {
                buf.put_u16_le(*start_handle);
                buf.put_u16_le(*end_handle);
            }
            AttPdu::ReadByType(request) => {
                buf.put_u16_le(request.start_handle);
                buf.put_u16_le(request.end_handle);
                match &request.attribute_type {
                    Uuid::Uuid16(uuid) => buf.put_slice(&uuid.as_le_bytes()),
                    Uuid::Uuid128(uuid) => buf.put_slice(&uuid.as_le_bytes()),
                    // unreachable: the constructor rejects 32-bit types
                    Uuid::Uuid32(uuid) => buf.put_slice(&uuid.as_le_bytes()),
                }
            }
            AttPdu::ReadRequest { attribute_handle } => buf.put_u16_le(*attribute_handle),
            AttPdu::ReadResponse { value } => buf.put_slice(value),
            AttPdu::WriteRequest {
                attribute_handle,
                value,
            }
            | AttPdu::WriteCommand {
                attribute_handle,
                value,
            } => {
                buf.put_u16_le(*attribute_handle);
                buf.put_slice(value);
            }
            AttPdu::WriteResponse => {}
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BASE_UUID;

    #[test]
    fn read_by_type_with_16_bit_type_round_trips() {
        let request =
            ReadByTypeRequest::new(false, 0x0001, 0xFFFF, Uuid16::from(0x2A37).into()).unwrap();
        let pdu = AttPdu::ReadByType(request);

        let bytes = pdu.to_vec();
        assert_eq!(vec![0x08, 0x01, 0x00, 0xFF, 0xFF, 0x37, 0x2A], bytes);
        assert_eq!(pdu, AttPdu::parse(&bytes).unwrap());
    }

    #[test]
    fn read_by_group_type_uses_its_own_opcode() {
        let request =
            ReadByTypeRequest::new(true, 0x0001, 0x00FF, Uuid16::from(0x2800).into()).unwrap();
        let pdu = AttPdu::ReadByType(request);

        let bytes = pdu.to_vec();
        assert_eq!(0x10, bytes[0]);
        let decoded = AttPdu::parse(&bytes).unwrap();
        let AttPdu::ReadByType(decoded) = &decoded else {
            panic!("wrong variant");
        };
        assert!(decoded.grouped());
        assert_eq!(0x0001, decoded.start_handle());
        assert_eq!(0x00FF, decoded.end_handle());
    }

    #[test]
    fn read_by_type_dispatches_on_encoded_uuid_width() {
        let uuid128 = Uuid128::from(Uuid16::from(0x2A37));
        let mut bytes = vec![0x08, 0x01, 0x00, 0xFF, 0xFF];
        bytes.extend_from_slice(&uuid128.as_le_bytes());

        let decoded = AttPdu::parse(&bytes).unwrap();
        let AttPdu::ReadByType(decoded) = &decoded else {
            panic!("wrong variant");
        };
        assert_eq!(&Uuid::Uuid128(uuid128), decoded.attribute_type());
        assert_eq!(16, decoded.attribute_type().size());
    }

    #[test]
    fn read_by_type_rejects_other_uuid_widths() {
        // four type bytes would be a 32-bit UUID, which ATT does not carry
        let bytes = [0x08, 0x01, 0x00, 0xFF, 0xFF, 0x37, 0x2A, 0x00, 0x00];
        assert_eq!(
            Err(AttError::InvalidAttributeTypeWidth { width: 32 }),
            AttPdu::parse(&bytes)
        );
        assert_eq!(
            Err(AttError::InvalidAttributeTypeWidth { width: 32 }),
            ReadByTypeRequest::new(false, 1, 2, crate::core::Uuid32::from(1).into())
                .map(AttPdu::ReadByType)
        );
    }

    #[test]
    fn handle_ranges_are_validated_both_ways() {
        assert_eq!(
            Err(AttError::InvalidHandleRange { start: 0, end: 5 }),
            ReadByTypeRequest::new(false, 0x0000, 0x0005, Uuid16::from(0x2A37).into())
                .map(AttPdu::ReadByType)
        );
        assert_eq!(
            Err(AttError::InvalidHandleRange {
                start: 5,
                end: 1
            }),
            ReadByTypeRequest::new(false, 0x0005, 0x0001, Uuid16::from(0x2A37).into())
                .map(AttPdu::ReadByType)
        );
        // decoded handle ranges from a peer get the same checks
        let bytes = [0x04, 0x00, 0x00, 0x05, 0x00];
        assert_eq!(
            Err(AttError::InvalidHandleRange { start: 0, end: 5 }),
            AttPdu::parse(&bytes)
        );
        assert!(ReadByTypeRequest::new(false, 0x0001, 0x0001, (*BASE_UUID).into()).is_ok());
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        assert_eq!(
            Err(AttError::UnknownOpcode { opcode: 0x77 }),
            AttPdu::parse(&[0x77, 0x00])
        );
    }

    #[test]
    fn truncated_pdus_are_errors() {
        assert_eq!(Err(AttError::Truncated), AttPdu::parse(&[]));
        assert_eq!(Err(AttError::Truncated), AttPdu::parse(&[0x02, 0x17]));
        assert_eq!(Err(AttError::Truncated), AttPdu::parse(&[0x08, 0x01, 0x00]));
    }

    #[test]
    fn trailing_bytes_are_errors() {
        assert_eq!(
            Err(AttError::TrailingBytes { len: 1 }),
            AttPdu::parse(&[0x03, 0x17, 0x00, 0xAA])
        );
    }

    #[test]
    fn error_response_round_trips() {
        let pdu = AttPdu::ErrorResponse {
            request_opcode: 0x08,
            attribute_handle: 0x0001,
            error_code: 0x0A,
        };
        assert_eq!(pdu, AttPdu::parse(&pdu.to_vec()).unwrap());
    }

    #[test]
    fn writes_carry_their_values() {
        let pdu = AttPdu::WriteRequest {
            attribute_handle: 0x0005,
            value: b"on".to_vec(),
        };
        let bytes = pdu.to_vec();
        assert_eq!(vec![0x12, 0x05, 0x00, b'o', b'n'], bytes);
        assert_eq!(pdu, AttPdu::parse(&bytes).unwrap());

        let command = AttPdu::parse(&[0x52, 0x05, 0x00, 0x01]).unwrap();
        assert_eq!(
            AttPdu::WriteCommand {
                attribute_handle: 0x0005,
                value: vec![0x01],
            },
            command
        );
    }

    #[test]
    fn read_response_takes_the_rest_of_the_pdu() {
        let decoded = AttPdu::parse(&[0x0B, 0x18, 0x64]).unwrap();
        assert_eq!(
            AttPdu::ReadResponse {
                value: vec![0x18, 0x64]
            },
            decoded
        );
    }
}

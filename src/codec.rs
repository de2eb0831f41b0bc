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

//! Bounds-checked get/put of fixed-width integers and UUIDs at arbitrary
//! buffer offsets, with the byte order spelled out at every call site.
//!
//! These are stateless slice transforms; the HCI and ATT codecs are built
//! on top of them.

use crate::core::{Uuid, Uuid128, Uuid16, Uuid32};

/// Byte order of a value within a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Least significant byte first (the Bluetooth wire order).
    LittleEndian,
    /// Most significant byte first.
    BigEndian,
}

/// Errors from buffer reads and writes.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The requested span does not fit in the buffer.
    #[error("{needed} bytes at offset {offset} overrun a buffer of {len}")]
    OutOfBounds {
        /// Offset the access started at.
        offset: usize,
        /// Bytes the access needed.
        needed: usize,
        /// Length of the buffer.
        len: usize,
    },
}

fn span(buf_len: usize, offset: usize, needed: usize) -> Result<(), CodecError> {
    if offset.checked_add(needed).is_some_and(|end| end <= buf_len) {
        Ok(())
    } else {
        Err(CodecError::OutOfBounds {
            offset,
            needed,
            len: buf_len,
        })
    }
}

/// Read a u16 at `offset`.
pub fn get_u16(buf: &[u8], offset: usize, order: ByteOrder) -> Result<u16, CodecError> {
    span(buf.len(), offset, 2)?;
    let bytes = buf[offset..offset + 2].try_into().unwrap();
    Ok(match order {
        ByteOrder::LittleEndian => u16::from_le_bytes(bytes),
        ByteOrder::BigEndian => u16::from_be_bytes(bytes),
    })
}

/// Read a u32 at `offset`.
pub fn get_u32(buf: &[u8], offset: usize, order: ByteOrder) -> Result<u32, CodecError> {
    span(buf.len(), offset, 4)?;
    let bytes = buf[offset..offset + 4].try_into().unwrap();
    Ok(match order {
        ByteOrder::LittleEndian => u32::from_le_bytes(bytes),
        ByteOrder::BigEndian => u32::from_be_bytes(bytes),
    })
}

/// Read a u128 at `offset`.
pub fn get_u128(buf: &[u8], offset: usize, order: ByteOrder) -> Result<u128, CodecError> {
    span(buf.len(), offset, 16)?;
    let bytes = buf[offset..offset + 16].try_into().unwrap();
    Ok(match order {
        ByteOrder::LittleEndian => u128::from_le_bytes(bytes),
        ByteOrder::BigEndian => u128::from_be_bytes(bytes),
    })
}

/// Write a u16 at `offset`.
pub fn put_u16(
    buf: &mut [u8],
    offset: usize,
    value: u16,
    order: ByteOrder,
) -> Result<(), CodecError> {
    span(buf.len(), offset, 2)?;
    let bytes = match order {
        ByteOrder::LittleEndian => value.to_le_bytes(),
        ByteOrder::BigEndian => value.to_be_bytes(),
    };
    buf[offset..offset + 2].copy_from_slice(&bytes);
    Ok(())
}

/// Write a u32 at `offset`.
pub fn put_u32(
    buf: &mut [u8],
    offset: usize,
    value: u32,
    order: ByteOrder,
) -> Result<(), CodecError> {
    span(buf.len(), offset, 4)?;
    let bytes = match order {
        ByteOrder::LittleEndian => value.to_le_bytes(),
        ByteOrder::BigEndian => value.to_be_bytes(),
    };
    buf[offset..offset + 4].copy_from_slice(&bytes);
    Ok(())
}

/// Write a u128 at `offset`.
pub fn put_u128(
    buf: &mut [u8],
    offset: usize,
    value: u128,
    order: ByteOrder,
) -> Result<(), CodecError> {
    span(buf.len(), offset, 16)?;
    let bytes = match order {
        ByteOrder::LittleEndian => value.to_le_bytes(),
        ByteOrder::BigEndian => value.to_be_bytes(),
    };
    buf[offset..offset + 16].copy_from_slice(&bytes);
    Ok(())
}

/// Read a UUID of the given byte width (2, 4 or 16) at `offset`.
///
/// Widths other than the three UUID sizes are a caller bug and panic.
pub fn get_uuid(
    buf: &[u8],
    offset: usize,
    size: usize,
    order: ByteOrder,
) -> Result<Uuid, CodecError> {
    span(buf.len(), offset, size)?;
    let bytes = &buf[offset..offset + size];
    Ok(match (size, order) {
        (2, ByteOrder::LittleEndian) => Uuid16::from_le_bytes(bytes.try_into().unwrap()).into(),
        (2, ByteOrder::BigEndian) => Uuid16::from_be_bytes(bytes.try_into().unwrap()).into(),
        (4, ByteOrder::LittleEndian) => Uuid32::from_le_bytes(bytes.try_into().unwrap()).into(),
        (4, ByteOrder::BigEndian) => Uuid32::from_be_bytes(bytes.try_into().unwrap()).into(),
        (16, ByteOrder::LittleEndian) => {
            let mut le: [u8; 16] = bytes.try_into().unwrap();
            le.reverse();
            Uuid128::from_be_bytes(le).into()
        }
        (16, ByteOrder::BigEndian) => Uuid128::from_be_bytes(bytes.try_into().unwrap()).into(),
        _ => panic!("{size} is not a UUID byte width"),
    })
}

/// Write `uuid` at `offset`.
pub fn put_uuid(
    buf: &mut [u8],
    offset: usize,
    uuid: &Uuid,
    order: ByteOrder,
) -> Result<(), CodecError> {
    span(buf.len(), offset, uuid.size())?;
    let target = &mut buf[offset..offset + uuid.size()];
    target.copy_from_slice(uuid.as_be_bytes());
    if order == ByteOrder::LittleEndian {
        target.reverse();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BASE_UUID;

    #[test]
    fn integers_round_trip_in_both_orders() {
        let mut buf = [0_u8; 24];
        for order in [ByteOrder::LittleEndian, ByteOrder::BigEndian] {
            put_u16(&mut buf, 1, 0xBEEF, order).unwrap();
            assert_eq!(0xBEEF, get_u16(&buf, 1, order).unwrap());

            put_u32(&mut buf, 3, 0xDEAD_BEEF, order).unwrap();
            assert_eq!(0xDEAD_BEEF, get_u32(&buf, 3, order).unwrap());

            put_u128(&mut buf, 7, 0x0102_0304_0506_0708_090A_0B0C_0D0E_0F10, order).unwrap();
            assert_eq!(
                0x0102_0304_0506_0708_090A_0B0C_0D0E_0F10,
                get_u128(&buf, 7, order).unwrap()
            );
        }
    }

    #[test]
    fn little_endian_reverses_the_bytes() {
        let mut buf = [0_u8; 2];
        put_u16(&mut buf, 0, 0x180D, ByteOrder::LittleEndian).unwrap();
        assert_eq!([0x0D, 0x18], buf);
        put_u16(&mut buf, 0, 0x180D, ByteOrder::BigEndian).unwrap();
        assert_eq!([0x18, 0x0D], buf);
    }

    #[test]
    fn out_of_bounds_is_an_error_not_a_panic() {
        let mut buf = [0_u8; 3];
        assert_eq!(
            Err(CodecError::OutOfBounds {
                offset: 2,
                needed: 2,
                len: 3
            }),
            get_u16(&buf, 2, ByteOrder::LittleEndian)
        );
        assert_eq!(
            Err(CodecError::OutOfBounds {
                offset: 0,
                needed: 4,
                len: 3
            }),
            put_u32(&mut buf, 0, 1, ByteOrder::BigEndian)
        );
        // offset + needed past usize::MAX must not wrap into "fits"
        assert!(get_u16(&buf, usize::MAX, ByteOrder::LittleEndian).is_err());
    }

    #[test]
    fn uuids_round_trip_through_either_order() {
        let uuids: [Uuid; 3] = [
            crate::core::Uuid16::from(0x2A37).into(),
            crate::core::Uuid32::from(0x1234_5678).into(),
            (*BASE_UUID).into(),
        ];
        let mut buf = [0_u8; 20];
        for uuid in &uuids {
            for order in [ByteOrder::LittleEndian, ByteOrder::BigEndian] {
                put_uuid(&mut buf, 2, uuid, order).unwrap();
                let decoded = get_uuid(&buf, 2, uuid.size(), order).unwrap();
                assert_eq!(*uuid, decoded);
                assert_eq!(uuid.to_string(), decoded.to_string());
            }
        }
    }

    #[test]
    fn uuid_wire_order_matches_integer_wire_order() {
        let mut by_uuid = [0_u8; 2];
        let mut by_int = [0_u8; 2];
        put_uuid(
            &mut by_uuid,
            0,
            &crate::core::Uuid16::from(0x2A37).into(),
            ByteOrder::LittleEndian,
        )
        .unwrap();
        put_u16(&mut by_int, 0, 0x2A37, ByteOrder::LittleEndian).unwrap();
        assert_eq!(by_int, by_uuid);
    }
}

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

//! UUIDs in the three widths Bluetooth uses, and expansion of the short
//! widths against the SIG base UUID.
//!
//! Payload bytes are always stored big-endian; the wire (little-endian)
//! forms only exist at parse/serialize boundaries.

use lazy_static::lazy_static;
use nom::combinator;
use std::fmt;

lazy_static! {
    /// The Bluetooth SIG base UUID, 00000000-0000-1000-8000-00805F9B34FB.
    ///
    /// 16- and 32-bit UUIDs are shorthand for this value with the short
    /// value merged in at octet offset 12.
    pub static ref BASE_UUID: Uuid128 = Uuid128::from_be_bytes(
        hex::decode("0000000000001000800000805F9B34FB")
            .unwrap()
            .try_into()
            .unwrap(),
    );
}

/// Errors from UUID construction and merging.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum UuidError {
    /// The merge octet index fell outside the range valid for the short
    /// UUID's width.
    #[error("octet index {index} out of range for a {width}-bit UUID (max {max})")]
    OctetIndexOutOfRange {
        /// The rejected index.
        index: usize,
        /// Bit width of the short UUID being merged.
        width: usize,
        /// Largest index valid for that width.
        max: usize,
    },
    /// Only 16- and 32-bit UUIDs can be merged into a base UUID.
    #[error("a 128-bit UUID cannot be merged into a base UUID")]
    MergeNotShort,
}

/// 16-bit UUID
#[derive(PartialEq, Eq, Hash, Clone, Copy)]
pub struct Uuid16 {
    /// Big-endian bytes
    be_bytes: [u8; 2],
}

impl Uuid16 {
    /// Construct a UUID from little-endian bytes
    pub fn from_le_bytes(mut le_bytes: [u8; 2]) -> Self {
        le_bytes.reverse();
        Self::from_be_bytes(le_bytes)
    }

    /// Construct a UUID from big-endian bytes
    pub const fn from_be_bytes(be_bytes: [u8; 2]) -> Self {
        Self { be_bytes }
    }

    /// The UUID in big-endian bytes form
    pub fn as_be_bytes(&self) -> [u8; 2] {
        self.be_bytes
    }

    /// The UUID in little-endian bytes form
    pub fn as_le_bytes(&self) -> [u8; 2] {
        let mut uuid = self.be_bytes;
        uuid.reverse();
        uuid
    }

    pub(crate) fn parse_le(input: &[u8]) -> nom::IResult<&[u8], Self> {
        combinator::map_res(nom::bytes::complete::take(2_usize), |b: &[u8]| {
            b.try_into().map(|mut uuid: [u8; 2]| {
                uuid.reverse();
                Self { be_bytes: uuid }
            })
        })(input)
    }
}

impl From<u16> for Uuid16 {
    fn from(value: u16) -> Self {
        Self {
            be_bytes: value.to_be_bytes(),
        }
    }
}

impl fmt::Display for Uuid16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.be_bytes))
    }
}

impl fmt::Debug for Uuid16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UUID-16:{self}")
    }
}

/// 32-bit UUID
#[derive(PartialEq, Eq, Hash, Clone, Copy)]
pub struct Uuid32 {
    /// Big-endian bytes
    be_bytes: [u8; 4],
}

impl Uuid32 {
    /// Construct a UUID from little-endian bytes
    pub fn from_le_bytes(mut le_bytes: [u8; 4]) -> Self {
        le_bytes.reverse();
        Self::from_be_bytes(le_bytes)
    }

    /// Construct a UUID from big-endian bytes
    pub const fn from_be_bytes(be_bytes: [u8; 4]) -> Self {
        Self { be_bytes }
    }

    /// The UUID in big-endian bytes form
    pub fn as_be_bytes(&self) -> [u8; 4] {
        self.be_bytes
    }

    /// The UUID in little-endian bytes form
    pub fn as_le_bytes(&self) -> [u8; 4] {
        let mut uuid = self.be_bytes;
        uuid.reverse();
        uuid
    }

    pub(crate) fn parse_le(input: &[u8]) -> nom::IResult<&[u8], Self> {
        combinator::map_res(nom::bytes::complete::take(4_usize), |b: &[u8]| {
            b.try_into().map(|mut uuid: [u8; 4]| {
                uuid.reverse();
                Self { be_bytes: uuid }
            })
        })(input)
    }
}

impl From<u32> for Uuid32 {
    fn from(value: u32) -> Self {
        Self {
            be_bytes: value.to_be_bytes(),
        }
    }
}

impl From<Uuid16> for Uuid32 {
    fn from(value: Uuid16) -> Self {
        let mut uuid = [0; 4];
        uuid[2..].copy_from_slice(&value.be_bytes);
        Self { be_bytes: uuid }
    }
}

impl fmt::Display for Uuid32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.be_bytes))
    }
}

impl fmt::Debug for Uuid32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UUID-32:{self}")
    }
}

/// 128-bit UUID
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid128 {
    /// Big-endian bytes
    be_bytes: [u8; 16],
}

impl Uuid128 {
    /// Construct a UUID from big-endian bytes
    pub const fn from_be_bytes(be_bytes: [u8; 16]) -> Self {
        Self { be_bytes }
    }

    /// The UUID in big-endian bytes form
    pub fn as_be_bytes(&self) -> [u8; 16] {
        self.be_bytes
    }

    /// The UUID in little-endian bytes form
    pub fn as_le_bytes(&self) -> [u8; 16] {
        let mut bytes = self.be_bytes;
        bytes.reverse();
        bytes
    }

    pub(crate) fn parse_le(input: &[u8]) -> nom::IResult<&[u8], Self> {
        combinator::map_res(nom::bytes::complete::take(16_usize), |b: &[u8]| {
            b.try_into().map(|mut uuid: [u8; 16]| {
                uuid.reverse();
                Self { be_bytes: uuid }
            })
        })(input)
    }

    /// Parse the normal dash-separated form of a UUID, returning None if the input is invalid
    pub fn parse_str(input: &str) -> Option<Self> {
        uuid::Uuid::parse_str(input).ok().map(|u| Self {
            be_bytes: u.into_bytes(),
        })
    }

    /// Returns a copy of this UUID with `value`'s bytes overlaid at the
    /// logical little-endian octet offset `octet_index`.
    ///
    /// Valid indices are 0..=14 for a 16-bit value and 0..=12 for a 32-bit
    /// value; anything else, or a 128-bit `value`, is an argument error.
    /// The SIG expansion of a short UUID is a merge into [`struct@BASE_UUID`]
    /// at index 12.
    pub fn merge(&self, value: &Uuid, octet_index: usize) -> Result<Uuid128, UuidError> {
        let short = match value {
            Uuid::Uuid16(uuid) => &uuid.be_bytes[..],
            Uuid::Uuid32(uuid) => &uuid.be_bytes[..],
            Uuid::Uuid128(_) => return Err(UuidError::MergeNotShort),
        };
        let max = 16 - short.len();
        if octet_index > max {
            return Err(UuidError::OctetIndexOutOfRange {
                index: octet_index,
                width: short.len() * 8,
                max,
            });
        }

        let mut be_bytes = self.be_bytes;
        // the logical little-endian offset counts up from the last
        // big-endian byte
        let start = max - octet_index;
        be_bytes[start..start + short.len()].copy_from_slice(short);
        Ok(Self { be_bytes })
    }
}

impl fmt::Display for Uuid128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}",
            hex::encode_upper(&self.be_bytes[..4]),
            hex::encode_upper(&self.be_bytes[4..6]),
            hex::encode_upper(&self.be_bytes[6..8]),
            hex::encode_upper(&self.be_bytes[8..10]),
            hex::encode_upper(&self.be_bytes[10..])
        )
    }
}

impl fmt::Debug for Uuid128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl From<Uuid16> for Uuid128 {
    fn from(value: Uuid16) -> Self {
        let mut uuid = BASE_UUID.be_bytes;
        uuid[2..4].copy_from_slice(&value.be_bytes);
        Self { be_bytes: uuid }
    }
}

impl From<Uuid32> for Uuid128 {
    fn from(value: Uuid32) -> Self {
        let mut uuid = BASE_UUID.be_bytes;
        uuid[..4].copy_from_slice(&value.be_bytes);
        Self { be_bytes: uuid }
    }
}

/// A UUID of any of the three widths.
///
/// Dispatch happens on the variant tag; the payload is the width's exact
/// byte array.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Uuid {
    /// 16-bit UUID
    Uuid16(Uuid16),
    /// 32-bit UUID
    Uuid32(Uuid32),
    /// 128-bit UUID
    Uuid128(Uuid128),
}

impl Uuid {
    /// The width of this UUID in bytes: 2, 4 or 16.
    pub fn size(&self) -> usize {
        match self {
            Uuid::Uuid16(_) => 2,
            Uuid::Uuid32(_) => 4,
            Uuid::Uuid128(_) => 16,
        }
    }

    /// The payload in big-endian bytes form.
    pub fn as_be_bytes(&self) -> &[u8] {
        match self {
            Uuid::Uuid16(uuid) => &uuid.be_bytes,
            Uuid::Uuid32(uuid) => &uuid.be_bytes,
            Uuid::Uuid128(uuid) => &uuid.be_bytes,
        }
    }
}

impl From<Uuid16> for Uuid {
    fn from(value: Uuid16) -> Self {
        Self::Uuid16(value)
    }
}

impl From<Uuid32> for Uuid {
    fn from(value: Uuid32) -> Self {
        Self::Uuid32(value)
    }
}

impl From<Uuid128> for Uuid {
    fn from(value: Uuid128) -> Self {
        Self::Uuid128(value)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uuid::Uuid16(uuid) => uuid.fmt(f),
            Uuid::Uuid32(uuid) => uuid.fmt(f),
            Uuid::Uuid128(uuid) => uuid.fmt(f),
        }
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uuid::Uuid16(uuid) => uuid.fmt(f),
            Uuid::Uuid32(uuid) => uuid.fmt(f),
            Uuid::Uuid128(uuid) => uuid.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// What §merge should produce, built by string surgery: the base's
    /// undashed hex with the short value's big-endian digits overlaid at
    /// the position the octet index implies.
    fn overlay_16(base: &Uuid128, value: u16, octet_index: usize) -> String {
        let mut hex: Vec<u8> = hex::encode_upper(base.as_be_bytes()).into_bytes();
        let start = 2 * (14 - octet_index);
        hex[start..start + 4].copy_from_slice(format!("{value:04X}").as_bytes());
        let hex = String::from_utf8(hex).unwrap();
        format!(
            "{}-{}-{}-{}-{}",
            &hex[..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..]
        )
    }

    #[test]
    fn merge_16_matches_string_overlay_at_every_index() {
        for value in [0x0000_u16, 0x2A37, 0xFFFF] {
            for octet_index in 0..=14 {
                let merged = BASE_UUID
                    .merge(&Uuid16::from(value).into(), octet_index)
                    .unwrap();
                assert_eq!(
                    overlay_16(&BASE_UUID, value, octet_index),
                    merged.to_string(),
                    "value {value:#06X} at index {octet_index}"
                );
            }
        }
    }

    #[test]
    fn merge_16_at_sig_offset_is_canonical_expansion() {
        let merged = BASE_UUID.merge(&Uuid16::from(0x2A37).into(), 12).unwrap();
        assert_eq!("00002A37-0000-1000-8000-00805F9B34FB", merged.to_string());
        assert_eq!(Uuid128::from(Uuid16::from(0x2A37)), merged);
    }

    #[test]
    fn merge_32_at_sig_offset_is_canonical_expansion() {
        let merged = BASE_UUID
            .merge(&Uuid32::from(0x12345678).into(), 12)
            .unwrap();
        assert_eq!("12345678-0000-1000-8000-00805F9B34FB", merged.to_string());
        assert_eq!(Uuid128::from(Uuid32::from(0x12345678)), merged);
    }

    #[test]
    fn merge_overlays_rather_than_carries() {
        // index 0 lands on the base's nonzero 0x34FB tail
        let merged = BASE_UUID.merge(&Uuid16::from(0x1234).into(), 0).unwrap();
        assert_eq!("00000000-0000-1000-8000-00805F9B1234", merged.to_string());
    }

    #[test]
    fn merge_rejects_out_of_range_indices() {
        assert_eq!(
            Err(UuidError::OctetIndexOutOfRange {
                index: 15,
                width: 16,
                max: 14
            }),
            BASE_UUID.merge(&Uuid16::from(1).into(), 15)
        );
        assert_eq!(
            Err(UuidError::OctetIndexOutOfRange {
                index: 13,
                width: 32,
                max: 12
            }),
            BASE_UUID.merge(&Uuid32::from(1).into(), 13)
        );
    }

    #[test]
    fn merge_rejects_128_bit_values() {
        assert_eq!(
            Err(UuidError::MergeNotShort),
            BASE_UUID.merge(&Uuid::Uuid128(*BASE_UUID), 0)
        );
    }

    #[test]
    fn display_is_fixed_width_uppercase() {
        assert_eq!("180D", Uuid16::from(0x180D).to_string());
        assert_eq!("0000180D", Uuid32::from(0x180D).to_string());

        let uuid = Uuid128::from(Uuid16::from(0x180D));
        assert_eq!("0000180D-0000-1000-8000-00805F9B34FB", uuid.to_string());

        assert_eq!(4, Uuid::from(Uuid16::from(0xABCD)).to_string().len());
        assert_eq!(8, Uuid::from(Uuid32::from(0xABCD)).to_string().len());
        assert_eq!(36, Uuid::from(uuid).to_string().len());
    }

    #[test]
    fn le_parse_round_trips() {
        let (rest, uuid) = Uuid16::parse_le(&[0x0D, 0x18]).unwrap();
        assert!(rest.is_empty());
        assert_eq!(Uuid16::from(0x180D), uuid);

        let le = Uuid128::from(Uuid16::from(0x180D)).as_le_bytes();
        let (rest, uuid) = Uuid128::parse_le(&le).unwrap();
        assert!(rest.is_empty());
        assert_eq!("0000180D-0000-1000-8000-00805F9B34FB", uuid.to_string());
    }

    #[test]
    fn parse_str_accepts_canonical_form() {
        let uuid = Uuid128::parse_str("0000180D-0000-1000-8000-00805F9B34FB").unwrap();
        assert_eq!(Uuid128::from(Uuid16::from(0x180D)), uuid);
        assert_eq!(None, Uuid128::parse_str("not a uuid"));
    }

    #[test]
    fn size_follows_variant() {
        assert_eq!(2, Uuid::from(Uuid16::from(1)).size());
        assert_eq!(4, Uuid::from(Uuid32::from(1)).size());
        assert_eq!(16, Uuid::from(*BASE_UUID).size());
    }
}

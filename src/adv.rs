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

//! BLE advertisement payloads.
//!
//! An advertisement is a sequence of length-prefixed structures; discovery
//! only needs a handful of the assigned type codes, chiefly the local name.

use crate::core::{Uuid128, Uuid16};
use nom::{combinator, multi, number};
use std::fmt;
use strum::IntoEnumIterator;

/// The numeric code for a common data type.
///
/// For known types, see [CommonDataType], or use this type directly for non-assigned codes.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub struct CommonDataTypeCode(u8);

impl From<CommonDataType> for CommonDataTypeCode {
    fn from(value: CommonDataType) -> Self {
        let byte = match value {
            CommonDataType::Flags => 0x01,
            CommonDataType::IncompleteListOf16BitServiceClassUuids => 0x02,
            CommonDataType::CompleteListOf16BitServiceClassUuids => 0x03,
            CommonDataType::IncompleteListOf128BitServiceClassUuids => 0x06,
            CommonDataType::CompleteListOf128BitServiceClassUuids => 0x07,
            CommonDataType::ShortenedLocalName => 0x08,
            CommonDataType::CompleteLocalName => 0x09,
            CommonDataType::TxPowerLevel => 0x0A,
            CommonDataType::ServiceData16BitUuid => 0x16,
            CommonDataType::ManufacturerSpecificData => 0xFF,
        };

        Self(byte)
    }
}

impl From<u8> for CommonDataTypeCode {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<CommonDataTypeCode> for u8 {
    fn from(value: CommonDataTypeCode) -> Self {
        value.0
    }
}

/// Data types for the assigned type codes discovery decodes.
///
/// See Bluetooth Assigned Numbers § 2.3
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::EnumIter)]
#[allow(missing_docs)]
pub enum CommonDataType {
    Flags,
    IncompleteListOf16BitServiceClassUuids,
    CompleteListOf16BitServiceClassUuids,
    IncompleteListOf128BitServiceClassUuids,
    CompleteListOf128BitServiceClassUuids,
    ShortenedLocalName,
    CompleteLocalName,
    TxPowerLevel,
    ServiceData16BitUuid,
    ManufacturerSpecificData,
}

impl CommonDataType {
    /// Iterate over the zero, one, or more matching types for the provided code.
    pub fn for_type_code(code: CommonDataTypeCode) -> impl Iterator<Item = CommonDataType> {
        Self::iter().filter(move |t| CommonDataTypeCode::from(*t) == code)
    }
}

impl fmt::Display for CommonDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommonDataType::Flags => write!(f, "Flags"),
            CommonDataType::IncompleteListOf16BitServiceClassUuids => {
                write!(f, "Incomplete List of 16-bit Service Class UUIDs")
            }
            CommonDataType::CompleteListOf16BitServiceClassUuids => {
                write!(f, "Complete List of 16-bit Service Class UUIDs")
            }
            CommonDataType::IncompleteListOf128BitServiceClassUuids => {
                write!(f, "Incomplete List of 128-bit Service Class UUIDs")
            }
            CommonDataType::CompleteListOf128BitServiceClassUuids => {
                write!(f, "Complete List of 128-bit Service Class UUIDs")
            }
            CommonDataType::ShortenedLocalName => write!(f, "Shortened Local Name"),
            CommonDataType::CompleteLocalName => write!(f, "Complete Local Name"),
            CommonDataType::TxPowerLevel => write!(f, "TX Power Level"),
            CommonDataType::ServiceData16BitUuid => write!(f, "Service Data 16-bit UUID"),
            CommonDataType::ManufacturerSpecificData => {
                write!(f, "Manufacturer Specific Data")
            }
        }
    }
}

/// One length-prefixed structure out of an advertisement payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdStructure<'a> {
    /// The structure's assigned type code.
    pub type_code: CommonDataTypeCode,
    /// The structure's payload.
    pub data: &'a [u8],
}

fn parse_structure(input: &[u8]) -> nom::IResult<&[u8], AdStructure<'_>> {
    let (input, len) = combinator::verify(number::complete::u8, |len| *len >= 1)(input)?;
    let (input, type_code) = number::complete::u8(input)?;
    let (input, data) = nom::bytes::complete::take(len - 1)(input)?;
    Ok((
        input,
        AdStructure {
            type_code: type_code.into(),
            data,
        },
    ))
}

/// Split an advertisement payload into its structures.
///
/// Parsing stops at the first malformed or zero-length structure; peers
/// routinely pad payloads with zeros, so whatever parsed up to that point
/// is returned rather than an error.
pub fn parse_structures(data: &[u8]) -> Vec<AdStructure<'_>> {
    multi::many0(parse_structure)(data)
        .map(|(_rest, structures)| structures)
        .unwrap_or_default()
}

/// The advertised device name, if any.
///
/// A complete local name wins over a shortened one; a name that is not
/// valid UTF-8 is treated as absent.
pub fn local_name(data: &[u8]) -> Option<&str> {
    let mut shortened = None;
    for structure in parse_structures(data) {
        for data_type in CommonDataType::for_type_code(structure.type_code) {
            match data_type {
                CommonDataType::CompleteLocalName => {
                    return std::str::from_utf8(structure.data).ok();
                }
                CommonDataType::ShortenedLocalName => {
                    shortened = std::str::from_utf8(structure.data).ok();
                }
                _ => {}
            }
        }
    }
    shortened
}

/// The advertised 16-bit service class UUIDs, complete or incomplete lists.
pub fn service_uuids_16(data: &[u8]) -> Vec<Uuid16> {
    let mut uuids = Vec::new();
    for structure in parse_structures(data) {
        let listed = CommonDataType::for_type_code(structure.type_code).any(|t| {
            matches!(
                t,
                CommonDataType::CompleteListOf16BitServiceClassUuids
                    | CommonDataType::IncompleteListOf16BitServiceClassUuids
            )
        });
        if listed {
            if let Ok((_rest, mut parsed)) =
                combinator::complete(multi::many0(Uuid16::parse_le))(structure.data)
            {
                uuids.append(&mut parsed);
            }
        }
    }
    uuids
}

/// The advertised 128-bit service class UUIDs, complete or incomplete lists.
pub fn service_uuids_128(data: &[u8]) -> Vec<Uuid128> {
    let mut uuids = Vec::new();
    for structure in parse_structures(data) {
        let listed = CommonDataType::for_type_code(structure.type_code).any(|t| {
            matches!(
                t,
                CommonDataType::CompleteListOf128BitServiceClassUuids
                    | CommonDataType::IncompleteListOf128BitServiceClassUuids
            )
        });
        if listed {
            if let Ok((_rest, mut parsed)) =
                combinator::complete(multi::many0(Uuid128::parse_le))(structure.data)
            {
                uuids.append(&mut parsed);
            }
        }
    }
    uuids
}

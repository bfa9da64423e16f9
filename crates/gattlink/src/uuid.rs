//! Bluetooth UUIDs
//!
//! Services, characteristics and descriptors are identified by 128-bit UUIDs.
//! SIG-assigned attributes use 16-bit or 32-bit short forms which expand onto
//! the Bluetooth base UUID `00000000-0000-1000-8000-00805F9B34FB`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A 128-bit Bluetooth UUID, stored little-endian as it travels over the air.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uuid {
    bytes: [u8; 16],
}

/// Base UUID in little-endian order.
const BASE_UUID_BYTES: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Offset of the 16/32-bit value inside the base UUID.
const BASE_OFFSET: usize = 12;

/// Client Characteristic Configuration descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = Uuid::from_u16(0x2902);

impl Uuid {
    /// Creates a UUID from 16 little-endian bytes.
    pub const fn from_bytes_le(bytes: [u8; 16]) -> Self {
        Uuid { bytes }
    }

    /// Creates a UUID from 16 big-endian bytes (textual order).
    pub fn from_bytes_be(mut bytes: [u8; 16]) -> Self {
        bytes.reverse();
        Uuid { bytes }
    }

    /// Expands a SIG-assigned 16-bit value onto the base UUID.
    pub const fn from_u16(uuid16: u16) -> Self {
        Self::from_u32(uuid16 as u32)
    }

    /// Expands a SIG-assigned 32-bit value onto the base UUID.
    pub const fn from_u32(uuid32: u32) -> Self {
        let mut bytes = BASE_UUID_BYTES;
        bytes[BASE_OFFSET] = uuid32 as u8;
        bytes[BASE_OFFSET + 1] = (uuid32 >> 8) as u8;
        bytes[BASE_OFFSET + 2] = (uuid32 >> 16) as u8;
        bytes[BASE_OFFSET + 3] = (uuid32 >> 24) as u8;
        Uuid { bytes }
    }

    /// Parses a little-endian UUID of 2, 4 or 16 bytes.
    pub fn try_from_slice_le(slice: &[u8]) -> Option<Self> {
        match slice.len() {
            2 => Some(Uuid::from_u16(u16::from_le_bytes([slice[0], slice[1]]))),
            4 => Some(Uuid::from_u32(u32::from_le_bytes([
                slice[0], slice[1], slice[2], slice[3],
            ]))),
            16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(slice);
                Some(Uuid::from_bytes_le(bytes))
            }
            _ => None,
        }
    }

    pub const fn as_bytes_le(&self) -> &[u8; 16] {
        &self.bytes
    }

    pub fn as_bytes_be(&self) -> [u8; 16] {
        let mut bytes = self.bytes;
        bytes.reverse();
        bytes
    }

    fn is_sig_assigned(&self) -> bool {
        self.bytes[..BASE_OFFSET] == BASE_UUID_BYTES[..BASE_OFFSET]
    }

    /// Returns the 16-bit short form, if this UUID has one.
    pub fn as_u16(&self) -> Option<u16> {
        match self.as_u32() {
            Some(value) if value <= u16::MAX as u32 => Some(value as u16),
            _ => None,
        }
    }

    /// Returns the 32-bit short form, if this UUID has one.
    pub fn as_u32(&self) -> Option<u32> {
        if !self.is_sig_assigned() {
            return None;
        }
        Some(u32::from_le_bytes([
            self.bytes[BASE_OFFSET],
            self.bytes[BASE_OFFSET + 1],
            self.bytes[BASE_OFFSET + 2],
            self.bytes[BASE_OFFSET + 3],
        ]))
    }
}

impl From<u16> for Uuid {
    fn from(uuid16: u16) -> Self {
        Uuid::from_u16(uuid16)
    }
}

impl From<u32> for Uuid {
    fn from(uuid32: u32) -> Self {
        Uuid::from_u32(uuid32)
    }
}

impl PartialEq<u16> for Uuid {
    fn eq(&self, other: &u16) -> bool {
        self.as_u16() == Some(*other)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.as_bytes_be();
        write!(
            f,
            "{}-{}-{}-{}-{}",
            hex::encode(&b[0..4]),
            hex::encode(&b[4..6]),
            hex::encode(&b[6..8]),
            hex::encode(&b[8..10]),
            hex::encode(&b[10..16])
        )
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.as_u16(), self.as_u32()) {
            (Some(short), _) => write!(f, "Uuid(0x{:04X})", short),
            (None, Some(long)) => write!(f, "Uuid(0x{:08X})", long),
            _ => write!(f, "Uuid({})", self),
        }
    }
}

/// Errors produced when parsing a UUID from text
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UuidParseError {
    #[error("invalid UUID length: {0} hex digits")]
    InvalidLength(usize),

    #[error("invalid UUID format")]
    InvalidFormat,

    #[error("invalid hex in UUID: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    /// Accepts `180a`, `0x180A`, `0000180a`, or the full hyphenated form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);

        if s.contains('-') {
            let groups: Vec<&str> = s.split('-').collect();
            let lengths: Vec<usize> = groups.iter().map(|g| g.len()).collect();
            if lengths != [8, 4, 4, 4, 12] {
                return Err(UuidParseError::InvalidFormat);
            }
        }

        let cleaned: String = s.chars().filter(|c| *c != '-').collect();
        match cleaned.len() {
            4 => {
                let mut raw = [0u8; 2];
                hex::decode_to_slice(&cleaned, &mut raw)?;
                Ok(Uuid::from_u16(u16::from_be_bytes(raw)))
            }
            8 => {
                let mut raw = [0u8; 4];
                hex::decode_to_slice(&cleaned, &mut raw)?;
                Ok(Uuid::from_u32(u32::from_be_bytes(raw)))
            }
            32 => {
                let mut bytes_be = [0u8; 16];
                hex::decode_to_slice(&cleaned, &mut bytes_be)?;
                Ok(Uuid::from_bytes_be(bytes_be))
            }
            other => Err(UuidParseError::InvalidLength(other)),
        }
    }
}

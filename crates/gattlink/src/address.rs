//! Bluetooth device addresses

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A 48-bit device address, stored little-endian as on the wire.
///
/// Displayed and parsed most significant byte first (`AA:BB:CC:DD:EE:FF`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BdAddr {
    pub bytes: [u8; 6],
}

impl BdAddr {
    pub fn new(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; 6] = slice.get(..6)?.try_into().ok()?;
        Some(Self { bytes })
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.bytes[5],
            self.bytes[4],
            self.bytes[3],
            self.bytes[2],
            self.bytes[1],
            self.bytes[0]
        )
    }
}

/// Errors produced when parsing a device address
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AddressParseError {
    #[error("expected 6 colon-separated octets, found {0}")]
    WrongOctetCount(usize),

    #[error("invalid octet {0:?}")]
    InvalidOctet(String),
}

impl FromStr for BdAddr {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<&str> = s.trim().split(|c: char| c == ':' || c == '-').collect();
        if octets.len() != 6 {
            return Err(AddressParseError::WrongOctetCount(octets.len()));
        }

        let mut bytes = [0u8; 6];
        for (i, octet) in octets.iter().enumerate() {
            let mut raw = [0u8; 1];
            hex::decode_to_slice(octet, &mut raw)
                .map_err(|_| AddressParseError::InvalidOctet(octet.to_string()))?;
            // Text is most significant first; storage is little-endian.
            bytes[5 - i] = raw[0];
        }
        Ok(Self { bytes })
    }
}

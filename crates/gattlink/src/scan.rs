//! Bluetooth LE scan results
//!
//! The transport reports raw advertisements; this module turns them into
//! [`ScanRecord`]s for the listener.

use crate::address::BdAddr;
use crate::uuid::Uuid;

/// Incomplete list of 16-bit service UUIDs
pub const AD_TYPE_INCOMPLETE_UUID16: u8 = 0x02;
/// Complete list of 16-bit service UUIDs
pub const AD_TYPE_COMPLETE_UUID16: u8 = 0x03;
/// Shortened local name
pub const AD_TYPE_SHORT_NAME: u8 = 0x08;
/// Complete local name
pub const AD_TYPE_COMPLETE_NAME: u8 = 0x09;

/// A device seen while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub address: BdAddr,
    pub rssi: i16,
    /// Local name, preferring the complete name over the shortened one
    pub name: Option<String>,
    pub service_uuids: Vec<Uuid>,
    /// Raw advertising data as received
    pub advertising_data: Vec<u8>,
}

impl ScanRecord {
    /// Build a record from a raw advertisement
    pub fn from_advertisement(address: BdAddr, rssi: i16, advertising_data: Vec<u8>) -> Self {
        let mut name = None;
        let mut service_uuids = Vec::new();

        for (ad_type, data) in parse_advertising_data(&advertising_data) {
            match ad_type {
                AD_TYPE_COMPLETE_NAME => {
                    name = Some(String::from_utf8_lossy(&data).into_owned());
                }
                AD_TYPE_SHORT_NAME if name.is_none() => {
                    name = Some(String::from_utf8_lossy(&data).into_owned());
                }
                AD_TYPE_INCOMPLETE_UUID16 | AD_TYPE_COMPLETE_UUID16 => {
                    service_uuids.extend(data.chunks_exact(2).filter_map(Uuid::try_from_slice_le));
                }
                _ => {}
            }
        }

        Self {
            address,
            rssi,
            name,
            service_uuids,
            advertising_data,
        }
    }
}

/// Split advertising data into `(type, data)` structures.
///
/// Parsing stops at the first zero-length structure or at a structure that
/// runs past the end of the buffer.
pub fn parse_advertising_data(data: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut result = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let length = data[i] as usize;
        if length == 0 || i + 1 + length > data.len() {
            break;
        }

        let ad_type = data[i + 1];
        result.push((ad_type, data[i + 2..i + 1 + length].to_vec()));

        i += 1 + length;
    }

    result
}

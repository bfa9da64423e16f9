//! Common types for GATT operations
//!
//! This module defines the attribute tree reported by discovery and the
//! small value types shared between the controller and the transport.

use crate::uuid::Uuid;
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;

/// Transport-native handle of a characteristic value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeHandle(pub u16);

/// Transport-native handle of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorHandle(pub u16);

impl fmt::Display for AttributeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl fmt::Display for DescriptorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Completion status reported by the transport.
///
/// Zero is success; every other value is a failure whose meaning belongs to
/// the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattStatus(pub i32);

impl GattStatus {
    pub const SUCCESS: GattStatus = GattStatus(0);
    /// Generic failure, for transports without finer-grained codes
    pub const FAILURE: GattStatus = GattStatus(0x101);

    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// Characteristic properties as defined in the Bluetooth specification
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

impl CharacteristicProperties {
    pub fn can_read(&self) -> bool {
        self.contains(Self::READ)
    }

    pub fn can_write(&self) -> bool {
        self.contains(Self::WRITE)
    }

    pub fn can_write_without_response(&self) -> bool {
        self.contains(Self::WRITE_WITHOUT_RESPONSE)
    }

    pub fn can_notify(&self) -> bool {
        self.contains(Self::NOTIFY)
    }

    pub fn can_indicate(&self) -> bool {
        self.contains(Self::INDICATE)
    }
}

/// A descriptor found during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub uuid: Uuid,
    pub handle: DescriptorHandle,
}

/// A characteristic found during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    /// Value handle
    pub handle: AttributeHandle,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<Descriptor>,
}

/// A service found during discovery, with everything below it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub uuid: Uuid,
    pub is_primary: bool,
    pub characteristics: Vec<Characteristic>,
}

/// Write flavour for characteristic writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    /// ATT Write Request, acknowledged by the peer
    WithResponse,
    /// ATT Write Command
    WithoutResponse,
}

/// A physical layer in use on the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phy {
    Le1M,
    Le2M,
    LeCoded,
}

bitflags! {
    /// Set of PHYs acceptable for one direction of the link
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PhyMask: u8 {
        const LE_1M = 0x01;
        const LE_2M = 0x02;
        const LE_CODED = 0x04;
    }
}

/// Coding preference when LE Coded is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PhyOptions {
    #[default]
    NoPreference,
    S2,
    S8,
}

/// Value of a Client Characteristic Configuration descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CccdValue {
    Disabled,
    Notify,
    Indicate,
}

impl CccdValue {
    const NOTIFY_BIT: u16 = 0x0001;
    const INDICATE_BIT: u16 = 0x0002;

    pub fn to_bytes(self) -> Vec<u8> {
        let bits = match self {
            CccdValue::Disabled => 0,
            CccdValue::Notify => Self::NOTIFY_BIT,
            CccdValue::Indicate => Self::INDICATE_BIT,
        };
        let mut out = Vec::with_capacity(2);
        // Writing into a Vec cannot fail.
        let _ = out.write_u16::<LittleEndian>(bits);
        out
    }

    /// Decode a CCCD value read back from the peer
    pub fn parse(mut bytes: &[u8]) -> Option<Self> {
        let bits = bytes.read_u16::<LittleEndian>().ok()?;
        if bits & Self::NOTIFY_BIT != 0 {
            Some(CccdValue::Notify)
        } else if bits & Self::INDICATE_BIT != 0 {
            Some(CccdValue::Indicate)
        } else {
            Some(CccdValue::Disabled)
        }
    }
}

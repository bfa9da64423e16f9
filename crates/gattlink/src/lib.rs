//! gattlink - A Rust library for driving one Bluetooth LE GATT connection
//!
//! The library sits between an application and a platform BLE stack. It owns
//! the connection lifecycle and service discovery, serializes attribute
//! operations so that only one is ever outstanding on the link, splits long
//! writes into MTU-sized fragments, and delivers every outcome to a single
//! listener in order.
//!
//! The platform stack is reached through the [`Transport`] trait; completions
//! come back through the [`EventSink`] the controller hands out.

pub mod address;
pub mod config;
pub mod error;
pub mod gatt;
pub mod scan;
pub mod transport;
pub mod uuid;

// Re-export common types for convenience
pub use address::BdAddr;
pub use config::ControllerConfig;
pub use error::{GattError, GattResult, TransportError};
pub use gatt::{
    Characteristic, CharacteristicProperties, ConnectionState, Descriptor, GattController,
    GattEvent, GattListener, GattStatus, Service, WriteMode,
};
pub use scan::{parse_advertising_data, ScanRecord};
pub use transport::{EventSink, Submission, Transport, TransportEvent};
pub use uuid::Uuid;

//! GATT (Generic Attribute Profile) client controller
//!
//! This module drives a single connection to a peripheral: connection
//! lifecycle, service discovery, and a strictly serialized queue of
//! attribute operations on top of a platform [`Transport`](crate::transport::Transport).

pub mod controller;
pub(crate) mod dispatcher;
pub mod event;
pub(crate) mod index;
pub mod operation;
pub(crate) mod queue;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;

pub use controller::GattController;
pub use event::{GattEvent, GattListener};
pub use operation::{ChunkState, OperationKind};
pub use state::{fragment_size, ConnectionState};
pub use types::{
    AttributeHandle, CccdValue, Characteristic, CharacteristicProperties, Descriptor,
    DescriptorHandle, GattStatus, Phy, PhyMask, PhyOptions, Service, WriteMode,
};

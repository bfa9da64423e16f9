//! Platform BLE stack seam
//!
//! A [`Transport`] wraps whatever actually talks to the radio. Every submit
//! method is non-blocking: it either refuses immediately with a
//! [`TransportError`] or accepts and later reports exactly one completion by
//! posting a [`TransportEvent`] into the [`EventSink`] handed out by the
//! controller.
//!
//! A transport must not call controller methods from inside a submit call.
//! Posting to the sink from anywhere, including from inside a submit call, is
//! fine.

use crate::address::BdAddr;
use crate::error::TransportError;
use crate::gatt::dispatcher::Message;
use crate::gatt::types::{
    AttributeHandle, DescriptorHandle, GattStatus, Phy, PhyMask, PhyOptions, Service, WriteMode,
};
use std::sync::mpsc::Sender;

/// Result of a submit call
pub type Submission = Result<(), TransportError>;

/// Primitives the controller needs from the platform BLE stack
pub trait Transport: Send + Sync {
    fn start_scan(&self) -> Submission;

    fn stop_scan(&self);

    /// Open the link; completes with `LinkUp` or `LinkError`
    fn connect(&self, address: BdAddr) -> Submission;

    /// Close the link. Must be safe to call at any time.
    fn disconnect(&self);

    /// Completes with `ServicesDiscovered`
    fn discover_services(&self) -> Submission;

    fn read_characteristic(&self, handle: AttributeHandle) -> Submission;

    fn write_characteristic(&self, handle: AttributeHandle, value: &[u8], mode: WriteMode)
        -> Submission;

    fn read_descriptor(&self, handle: DescriptorHandle) -> Submission;

    fn write_descriptor(&self, handle: DescriptorHandle, value: &[u8]) -> Submission;

    fn request_mtu(&self, mtu: u16) -> Submission;

    fn set_preferred_phy(&self, tx: PhyMask, rx: PhyMask, options: PhyOptions) -> Submission;

    fn read_phy(&self) -> Submission;

    fn read_remote_rssi(&self) -> Submission;
}

/// Out-of-band notifications from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ScanResult {
        address: BdAddr,
        rssi: i16,
        advertising_data: Vec<u8>,
    },
    ScanFailed {
        code: i32,
    },
    LinkUp,
    LinkError {
        status: GattStatus,
    },
    LinkDown {
        status: GattStatus,
    },
    ServicesDiscovered {
        services: Vec<Service>,
        status: GattStatus,
    },
    CharacteristicRead {
        handle: AttributeHandle,
        value: Vec<u8>,
        status: GattStatus,
    },
    CharacteristicWrite {
        handle: AttributeHandle,
        status: GattStatus,
    },
    DescriptorRead {
        handle: DescriptorHandle,
        value: Vec<u8>,
        status: GattStatus,
    },
    DescriptorWrite {
        handle: DescriptorHandle,
        status: GattStatus,
    },
    MtuChanged {
        mtu: u16,
        status: GattStatus,
    },
    PhyUpdated {
        tx: Phy,
        rx: Phy,
        status: GattStatus,
    },
    PhyRead {
        tx: Phy,
        rx: Phy,
        status: GattStatus,
    },
    RemoteRssi {
        rssi: i16,
        status: GattStatus,
    },
    /// Unsolicited value change (notification or indication)
    Notification {
        handle: AttributeHandle,
        value: Vec<u8>,
    },
}

/// Handle through which a transport reports events to its controller
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<Message>,
}

impl EventSink {
    pub(crate) fn new(tx: Sender<Message>) -> Self {
        Self { tx }
    }

    /// Queue an event for the controller. Returns `false` once the
    /// controller has shut down.
    pub fn post(&self, event: TransportEvent) -> bool {
        self.tx.send(Message::Transport(event)).is_ok()
    }
}

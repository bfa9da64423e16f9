//! Events delivered to the application
//!
//! Every asynchronous outcome becomes one [`GattEvent`]. The dispatcher hands
//! each event to [`GattListener::on_event`], whose default implementation
//! routes it to the matching `on_*` method.

use crate::address::BdAddr;
use crate::error::GattError;
use crate::gatt::types::{Phy, Service};
use crate::scan::ScanRecord;
use crate::uuid::Uuid;
use std::sync::mpsc::Sender;

/// An asynchronous outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    ScanResult(ScanRecord),
    ScanFailed {
        code: i32,
    },
    Connected {
        address: BdAddr,
    },
    Disconnected {
        address: BdAddr,
    },
    ConnectionError {
        address: BdAddr,
        error: GattError,
    },
    ServicesDiscovered(Result<Vec<Service>, GattError>),
    CharacteristicRead {
        service: Uuid,
        characteristic: Uuid,
        result: Result<Vec<u8>, GattError>,
    },
    /// One event per logical write, carrying the whole payload on success
    CharacteristicWrite {
        service: Uuid,
        characteristic: Uuid,
        result: Result<Vec<u8>, GattError>,
    },
    Notification {
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    DescriptorRead {
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        result: Result<Vec<u8>, GattError>,
    },
    DescriptorWrite {
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        result: Result<Vec<u8>, GattError>,
    },
    MtuChanged(Result<u16, GattError>),
    RemoteRssi(Result<i16, GattError>),
    /// `(tx, rx)`
    PhyUpdated(Result<(Phy, Phy), GattError>),
    /// `(tx, rx)`
    PhyRead(Result<(Phy, Phy), GattError>),
}

impl GattEvent {
    /// Call the `on_*` method of `listener` matching this event
    pub fn route<L: GattListener + ?Sized>(self, listener: &mut L) {
        match self {
            GattEvent::ScanResult(record) => listener.on_scan_result(record),
            GattEvent::ScanFailed { code } => listener.on_scan_error(code),
            GattEvent::Connected { address } => listener.on_connected(address),
            GattEvent::Disconnected { address } => listener.on_disconnected(address),
            GattEvent::ConnectionError { address, error } => {
                listener.on_connection_error(address, error)
            }
            GattEvent::ServicesDiscovered(result) => listener.on_services_discovered(result),
            GattEvent::CharacteristicRead {
                service,
                characteristic,
                result,
            } => listener.on_characteristic_read(service, characteristic, result),
            GattEvent::CharacteristicWrite {
                service,
                characteristic,
                result,
            } => listener.on_characteristic_write(service, characteristic, result),
            GattEvent::Notification {
                service,
                characteristic,
                value,
            } => listener.on_notify(service, characteristic, value),
            GattEvent::DescriptorRead {
                service,
                characteristic,
                descriptor,
                result,
            } => listener.on_descriptor_read(service, characteristic, descriptor, result),
            GattEvent::DescriptorWrite {
                service,
                characteristic,
                descriptor,
                result,
            } => listener.on_descriptor_write(service, characteristic, descriptor, result),
            GattEvent::MtuChanged(result) => listener.on_mtu_changed(result),
            GattEvent::RemoteRssi(result) => listener.on_read_remote_rssi(result),
            GattEvent::PhyUpdated(result) => listener.on_phy_updated(result),
            GattEvent::PhyRead(result) => listener.on_phy_read(result),
        }
    }
}

/// Receiver of controller events.
///
/// All calls happen on the controller's dispatcher thread, one at a time, in
/// the order the events were produced. No controller lock is held during a
/// call, so a listener holding a controller handle may issue new operations
/// from inside a callback.
#[allow(unused_variables)]
pub trait GattListener: Send {
    fn on_event(&mut self, event: GattEvent) {
        event.route(self)
    }

    fn on_scan_result(&mut self, record: ScanRecord) {}

    fn on_scan_error(&mut self, code: i32) {}

    fn on_connected(&mut self, address: BdAddr) {}

    fn on_disconnected(&mut self, address: BdAddr) {}

    fn on_connection_error(&mut self, address: BdAddr, error: GattError) {}

    fn on_services_discovered(&mut self, result: Result<Vec<Service>, GattError>) {}

    fn on_characteristic_read(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        result: Result<Vec<u8>, GattError>,
    ) {
    }

    fn on_characteristic_write(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        result: Result<Vec<u8>, GattError>,
    ) {
    }

    fn on_notify(&mut self, service: Uuid, characteristic: Uuid, value: Vec<u8>) {}

    fn on_descriptor_read(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        result: Result<Vec<u8>, GattError>,
    ) {
    }

    fn on_descriptor_write(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        result: Result<Vec<u8>, GattError>,
    ) {
    }

    fn on_mtu_changed(&mut self, result: Result<u16, GattError>) {}

    fn on_read_remote_rssi(&mut self, result: Result<i16, GattError>) {}

    fn on_phy_updated(&mut self, result: Result<(Phy, Phy), GattError>) {}

    fn on_phy_read(&mut self, result: Result<(Phy, Phy), GattError>) {}
}

/// Forwards every event into a channel, for consumers that prefer to poll
impl GattListener for Sender<GattEvent> {
    fn on_event(&mut self, event: GattEvent) {
        if self.send(event).is_err() {
            log::debug!("Event receiver dropped; discarding event");
        }
    }
}

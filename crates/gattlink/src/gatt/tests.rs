//! Unit tests for GATT functionality

use crate::address::BdAddr;
use crate::config::ControllerConfig;
use crate::error::{GattError, TransportError};
use crate::gatt::controller::GattController;
use crate::gatt::event::GattEvent;
use crate::gatt::state::ConnectionState;
use crate::gatt::types::{
    AttributeHandle, Characteristic, CharacteristicProperties, Descriptor, DescriptorHandle,
    GattStatus, Phy, PhyMask, PhyOptions, Service, WriteMode,
};
use crate::transport::{EventSink, Submission, Transport, TransportEvent};
use crate::uuid::{Uuid, CLIENT_CHARACTERISTIC_CONFIG};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A call the controller made on the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Submitted {
    StartScan,
    StopScan,
    Connect(BdAddr),
    Disconnect,
    Discover,
    Read(AttributeHandle),
    Write(AttributeHandle, Vec<u8>, WriteMode),
    ReadDescriptor(DescriptorHandle),
    WriteDescriptor(DescriptorHandle, Vec<u8>),
    RequestMtu(u16),
    SetPhy(PhyMask, PhyMask, PhyOptions),
    ReadPhy,
    ReadRssi,
}

/// Mock transport for testing
///
/// Records every accepted submission. Completions are posted by the test.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    submitted: Mutex<Vec<Submitted>>,
    reject: Mutex<usize>,
    link_lost: Mutex<bool>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> Vec<Submitted> {
        self.submitted.lock().unwrap().clone()
    }

    /// Refuse the next `count` submissions
    pub fn reject_next(&self, count: usize) {
        *self.reject.lock().unwrap() = count;
    }

    /// Refuse everything from now on, as a stack that lost the link would
    pub fn lose_link(&self) {
        *self.link_lost.lock().unwrap() = true;
    }

    /// Fragments written to `handle`, in order
    pub fn written(&self, handle: AttributeHandle) -> Vec<Vec<u8>> {
        self.submitted()
            .into_iter()
            .filter_map(|s| match s {
                Submitted::Write(h, value, _) if h == handle => Some(value),
                _ => None,
            })
            .collect()
    }

    fn record(&self, submitted: Submitted) -> Submission {
        if *self.link_lost.lock().unwrap() {
            return Err(TransportError::NotConnected);
        }
        let mut reject = self.reject.lock().unwrap();
        if *reject > 0 {
            *reject -= 1;
            return Err(TransportError::Rejected("mock refused".into()));
        }
        self.submitted.lock().unwrap().push(submitted);
        Ok(())
    }
}

impl Transport for MockTransport {
    fn start_scan(&self) -> Submission {
        self.record(Submitted::StartScan)
    }

    fn stop_scan(&self) {
        self.submitted.lock().unwrap().push(Submitted::StopScan);
    }

    fn connect(&self, address: BdAddr) -> Submission {
        self.record(Submitted::Connect(address))
    }

    fn disconnect(&self) {
        self.submitted.lock().unwrap().push(Submitted::Disconnect);
    }

    fn discover_services(&self) -> Submission {
        self.record(Submitted::Discover)
    }

    fn read_characteristic(&self, handle: AttributeHandle) -> Submission {
        self.record(Submitted::Read(handle))
    }

    fn write_characteristic(
        &self,
        handle: AttributeHandle,
        value: &[u8],
        mode: WriteMode,
    ) -> Submission {
        self.record(Submitted::Write(handle, value.to_vec(), mode))
    }

    fn read_descriptor(&self, handle: DescriptorHandle) -> Submission {
        self.record(Submitted::ReadDescriptor(handle))
    }

    fn write_descriptor(&self, handle: DescriptorHandle, value: &[u8]) -> Submission {
        self.record(Submitted::WriteDescriptor(handle, value.to_vec()))
    }

    fn request_mtu(&self, mtu: u16) -> Submission {
        self.record(Submitted::RequestMtu(mtu))
    }

    fn set_preferred_phy(&self, tx: PhyMask, rx: PhyMask, options: PhyOptions) -> Submission {
        self.record(Submitted::SetPhy(tx, rx, options))
    }

    fn read_phy(&self) -> Submission {
        self.record(Submitted::ReadPhy)
    }

    fn read_remote_rssi(&self) -> Submission {
        self.record(Submitted::ReadRssi)
    }
}

const BATTERY_SERVICE: Uuid = Uuid::from_u16(0x180F);
const BATTERY_LEVEL: Uuid = Uuid::from_u16(0x2A19);
const UART_SERVICE: Uuid = Uuid::from_u16(0xFFE0);
const UART_DATA: Uuid = Uuid::from_u16(0xFFE1);
const UART_STATUS: Uuid = Uuid::from_u16(0xFFE2);
const UART_VERSION: Uuid = Uuid::from_u16(0xFFE3);

const BATTERY_LEVEL_HANDLE: AttributeHandle = AttributeHandle(0x0003);
const BATTERY_CCCD_HANDLE: DescriptorHandle = DescriptorHandle(0x0004);
const UART_DATA_HANDLE: AttributeHandle = AttributeHandle(0x0010);
const UART_STATUS_HANDLE: AttributeHandle = AttributeHandle(0x0012);
const UART_STATUS_CCCD_HANDLE: DescriptorHandle = DescriptorHandle(0x0013);
const UART_VERSION_HANDLE: AttributeHandle = AttributeHandle(0x0015);

fn peer() -> BdAddr {
    BdAddr::new([0x66, 0x55, 0x44, 0x33, 0x22, 0x11])
}

fn cccd(handle: DescriptorHandle) -> Descriptor {
    Descriptor {
        uuid: CLIENT_CHARACTERISTIC_CONFIG,
        handle,
    }
}

fn services() -> Vec<Service> {
    vec![
        Service {
            uuid: BATTERY_SERVICE,
            is_primary: true,
            characteristics: vec![Characteristic {
                uuid: BATTERY_LEVEL,
                handle: BATTERY_LEVEL_HANDLE,
                properties: CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
                descriptors: vec![cccd(BATTERY_CCCD_HANDLE)],
            }],
        },
        Service {
            uuid: UART_SERVICE,
            is_primary: true,
            characteristics: vec![
                Characteristic {
                    uuid: UART_DATA,
                    handle: UART_DATA_HANDLE,
                    properties: CharacteristicProperties::READ
                        | CharacteristicProperties::WRITE
                        | CharacteristicProperties::WRITE_WITHOUT_RESPONSE,
                    descriptors: Vec::new(),
                },
                Characteristic {
                    uuid: UART_STATUS,
                    handle: UART_STATUS_HANDLE,
                    properties: CharacteristicProperties::READ
                        | CharacteristicProperties::INDICATE,
                    descriptors: vec![cccd(UART_STATUS_CCCD_HANDLE)],
                },
                Characteristic {
                    uuid: UART_VERSION,
                    handle: UART_VERSION_HANDLE,
                    properties: CharacteristicProperties::READ,
                    descriptors: Vec::new(),
                },
            ],
        },
    ]
}

fn read_done(handle: AttributeHandle, value: &[u8]) -> TransportEvent {
    TransportEvent::CharacteristicRead {
        handle,
        value: value.to_vec(),
        status: GattStatus::SUCCESS,
    }
}

fn write_ack(handle: AttributeHandle) -> TransportEvent {
    TransportEvent::CharacteristicWrite {
        handle,
        status: GattStatus::SUCCESS,
    }
}

struct Harness {
    transport: Arc<MockTransport>,
    controller: GattController,
    sink: EventSink,
    events: Receiver<GattEvent>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(ControllerConfig::default())
    }

    fn with_config(config: ControllerConfig) -> Self {
        let transport = Arc::new(MockTransport::new());
        let (tx, events) = mpsc::channel();
        let controller = GattController::new(transport.clone(), tx, config).unwrap();
        let sink = controller.event_sink();
        Self {
            transport,
            controller,
            sink,
            events,
        }
    }

    fn post(&self, event: TransportEvent) {
        assert!(self.sink.post(event));
    }

    /// Everything delivered so far
    fn drain(&self) -> Vec<GattEvent> {
        self.controller.flush();
        self.events.try_iter().collect()
    }

    fn ready(&self) {
        self.controller.connect(peer()).unwrap();
        self.post(TransportEvent::LinkUp);
        self.post(TransportEvent::ServicesDiscovered {
            services: services(),
            status: GattStatus::SUCCESS,
        });
        self.drain();
        assert_eq!(self.controller.state(), ConnectionState::Ready);
    }

    fn reads(&self) -> Vec<AttributeHandle> {
        self.transport
            .submitted()
            .into_iter()
            .filter_map(|s| match s {
                Submitted::Read(handle) => Some(handle),
                _ => None,
            })
            .collect()
    }
}

fn read_values(events: &[GattEvent]) -> Vec<(Uuid, Result<Vec<u8>, GattError>)> {
    events
        .iter()
        .filter_map(|e| match e {
            GattEvent::CharacteristicRead {
                characteristic,
                result,
                ..
            } => Some((*characteristic, result.clone())),
            _ => None,
        })
        .collect()
}

#[test]
fn test_connect_and_discover() {
    let h = Harness::new();
    assert_eq!(h.controller.state(), ConnectionState::Disconnected);

    h.controller.connect(peer()).unwrap();
    assert_eq!(h.controller.state(), ConnectionState::Connecting);
    assert_eq!(h.controller.address(), Some(peer()));
    assert_eq!(
        h.controller.connect(peer()),
        Err(GattError::InvalidState(ConnectionState::Connecting))
    );

    h.post(TransportEvent::LinkUp);
    assert_eq!(h.drain(), vec![GattEvent::Connected { address: peer() }]);
    assert_eq!(h.controller.state(), ConnectionState::Discovering);
    assert_eq!(
        h.transport.submitted(),
        vec![Submitted::Connect(peer()), Submitted::Discover]
    );

    h.post(TransportEvent::ServicesDiscovered {
        services: services(),
        status: GattStatus::SUCCESS,
    });
    assert_eq!(h.drain(), vec![GattEvent::ServicesDiscovered(Ok(services()))]);
    assert_eq!(h.controller.state(), ConnectionState::Ready);
    assert_eq!(h.controller.services(), services());
    assert_eq!(h.controller.mtu(), 23);
}

#[test]
fn test_operations_need_ready_link() {
    let h = Harness::new();
    assert_eq!(
        h.controller.read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL),
        Err(GattError::NotReady)
    );

    h.controller.connect(peer()).unwrap();
    h.post(TransportEvent::LinkUp);
    h.drain();
    assert_eq!(
        h.controller
            .write_characteristic(UART_SERVICE, UART_DATA, vec![1], WriteMode::WithResponse),
        Err(GattError::NotReady)
    );
    assert_eq!(h.controller.request_mtu(100), Err(GattError::NotReady));
    assert!(h.reads().is_empty());
    assert_eq!(h.controller.pending_operations(), 0);
}

#[test]
fn test_unknown_attribute_never_reaches_transport() {
    let h = Harness::new();
    h.ready();
    let before = h.transport.submitted();

    assert_eq!(
        h.controller
            .read_characteristic(BATTERY_SERVICE, Uuid::from_u16(0x2A00)),
        Err(GattError::AttributeNotFound {
            service: BATTERY_SERVICE,
            characteristic: Uuid::from_u16(0x2A00),
            descriptor: None,
        })
    );
    assert_eq!(
        h.controller.read_descriptor(
            UART_SERVICE,
            UART_DATA,
            CLIENT_CHARACTERISTIC_CONFIG
        ),
        Err(GattError::AttributeNotFound {
            service: UART_SERVICE,
            characteristic: UART_DATA,
            descriptor: Some(CLIENT_CHARACTERISTIC_CONFIG),
        })
    );
    assert_eq!(h.transport.submitted(), before);
    assert!(h.drain().is_empty());
}

#[test]
fn test_property_checks() {
    let h = Harness::new();
    h.ready();

    assert_eq!(
        h.controller.write_characteristic(
            UART_SERVICE,
            UART_VERSION,
            vec![1],
            WriteMode::WithResponse
        ),
        Err(GattError::NotPermitted)
    );
    assert_eq!(
        h.controller.set_notify(UART_SERVICE, UART_VERSION, true),
        Err(GattError::NotPermitted)
    );
    assert_eq!(h.controller.pending_operations(), 0);
}

#[test]
fn test_one_operation_in_flight() {
    let h = Harness::new();
    h.ready();

    h.controller
        .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
        .unwrap();
    h.controller
        .read_characteristic(UART_SERVICE, UART_DATA)
        .unwrap();
    h.controller
        .read_characteristic(UART_SERVICE, UART_VERSION)
        .unwrap();
    assert_eq!(h.reads(), vec![BATTERY_LEVEL_HANDLE]);
    assert_eq!(h.controller.pending_operations(), 3);

    h.post(read_done(BATTERY_LEVEL_HANDLE, &[87]));
    h.drain();
    assert_eq!(h.reads(), vec![BATTERY_LEVEL_HANDLE, UART_DATA_HANDLE]);

    h.post(read_done(UART_DATA_HANDLE, b"hi"));
    h.post(read_done(UART_VERSION_HANDLE, b"1.2"));
    let events = h.drain();
    assert_eq!(
        h.reads(),
        vec![BATTERY_LEVEL_HANDLE, UART_DATA_HANDLE, UART_VERSION_HANDLE]
    );
    assert_eq!(
        read_values(&events),
        vec![(UART_DATA, Ok(b"hi".to_vec())), (UART_VERSION, Ok(b"1.2".to_vec()))]
    );
    assert_eq!(h.controller.pending_operations(), 0);
}

#[test]
fn test_failed_status_advances_queue() {
    let h = Harness::new();
    h.ready();
    h.controller
        .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
        .unwrap();
    h.controller
        .read_characteristic(UART_SERVICE, UART_DATA)
        .unwrap();

    h.post(TransportEvent::CharacteristicRead {
        handle: BATTERY_LEVEL_HANDLE,
        value: Vec::new(),
        status: GattStatus(0x05),
    });
    let events = h.drain();
    assert_eq!(
        read_values(&events),
        vec![(
            BATTERY_LEVEL,
            Err(GattError::OperationFailed(GattStatus(0x05)))
        )]
    );
    assert_eq!(h.reads(), vec![BATTERY_LEVEL_HANDLE, UART_DATA_HANDLE]);
}

#[test]
fn test_rejected_submission_reports_and_continues() {
    let h = Harness::new();
    h.ready();
    h.transport.reject_next(1);

    h.controller
        .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
        .unwrap();
    h.controller
        .read_characteristic(UART_SERVICE, UART_DATA)
        .unwrap();

    let events = h.drain();
    assert!(matches!(
        read_values(&events).as_slice(),
        [(c, Err(GattError::SubmissionRejected(_)))] if *c == BATTERY_LEVEL
    ));
    assert_eq!(h.reads(), vec![UART_DATA_HANDLE]);
    assert_eq!(h.controller.pending_operations(), 1);
}

#[test]
fn test_transport_without_link_rejects() {
    let h = Harness::new();
    h.ready();
    h.transport.lose_link();

    h.controller
        .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
        .unwrap();
    assert_eq!(
        read_values(&h.drain()),
        vec![(
            BATTERY_LEVEL,
            Err(GattError::SubmissionRejected("link not connected".into()))
        )]
    );
    assert!(h.reads().is_empty());
    assert_eq!(h.controller.pending_operations(), 0);
}

#[test]
fn test_chunked_write_single_completion() {
    let h = Harness::new();
    h.ready();
    let payload: Vec<u8> = (0..45).collect();

    h.controller
        .write_characteristic(UART_SERVICE, UART_DATA, payload.clone(), WriteMode::WithResponse)
        .unwrap();
    h.controller
        .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
        .unwrap();

    for _ in 0..2 {
        h.post(write_ack(UART_DATA_HANDLE));
        assert!(h.drain().is_empty());
    }
    assert!(h.reads().is_empty());
    h.post(write_ack(UART_DATA_HANDLE));

    assert_eq!(
        h.drain(),
        vec![GattEvent::CharacteristicWrite {
            service: UART_SERVICE,
            characteristic: UART_DATA,
            result: Ok(payload.clone()),
        }]
    );
    let fragments = h.transport.written(UART_DATA_HANDLE);
    assert_eq!(
        fragments.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![20, 20, 5]
    );
    assert_eq!(fragments.concat(), payload);
    assert_eq!(h.reads(), vec![BATTERY_LEVEL_HANDLE]);
}

#[test]
fn test_chunked_write_failure_stops_transfer() {
    let h = Harness::new();
    h.ready();
    h.controller
        .write_characteristic(UART_SERVICE, UART_DATA, vec![0; 50], WriteMode::WithResponse)
        .unwrap();

    h.post(TransportEvent::CharacteristicWrite {
        handle: UART_DATA_HANDLE,
        status: GattStatus(0x03),
    });
    assert_eq!(
        h.drain(),
        vec![GattEvent::CharacteristicWrite {
            service: UART_SERVICE,
            characteristic: UART_DATA,
            result: Err(GattError::OperationFailed(GattStatus(0x03))),
        }]
    );
    assert_eq!(h.transport.written(UART_DATA_HANDLE).len(), 1);
    assert_eq!(h.controller.pending_operations(), 0);
}

#[test]
fn test_empty_write_sends_one_fragment() {
    let h = Harness::new();
    h.ready();
    h.controller
        .write_characteristic(UART_SERVICE, UART_DATA, Vec::new(), WriteMode::WithoutResponse)
        .unwrap();
    h.post(write_ack(UART_DATA_HANDLE));

    assert_eq!(h.transport.written(UART_DATA_HANDLE), vec![Vec::<u8>::new()]);
    assert_eq!(
        h.drain(),
        vec![GattEvent::CharacteristicWrite {
            service: UART_SERVICE,
            characteristic: UART_DATA,
            result: Ok(Vec::new()),
        }]
    );
}

#[test]
fn test_mtu_change_mid_transfer() {
    let h = Harness::new();
    h.ready();
    let payload: Vec<u8> = (0..100).collect();

    h.controller
        .write_characteristic(UART_SERVICE, UART_DATA, payload.clone(), WriteMode::WithResponse)
        .unwrap();
    h.post(TransportEvent::MtuChanged {
        mtu: 53,
        status: GattStatus::SUCCESS,
    });
    assert_eq!(h.drain(), vec![GattEvent::MtuChanged(Ok(53))]);
    assert_eq!(h.controller.mtu(), 53);

    h.post(write_ack(UART_DATA_HANDLE));
    h.post(write_ack(UART_DATA_HANDLE));
    h.post(write_ack(UART_DATA_HANDLE));
    let events = h.drain();

    let fragments = h.transport.written(UART_DATA_HANDLE);
    assert_eq!(
        fragments.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![20, 50, 30]
    );
    assert_eq!(fragments.concat(), payload);
    assert_eq!(events.len(), 1);
}

#[test]
fn test_disconnect_cancels_everything() {
    let h = Harness::new();
    h.ready();
    h.controller
        .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
        .unwrap();
    h.controller
        .write_characteristic(UART_SERVICE, UART_DATA, vec![1, 2, 3], WriteMode::WithResponse)
        .unwrap();
    h.controller.read_remote_rssi().unwrap();

    h.controller.disconnect();
    assert_eq!(h.controller.state(), ConnectionState::Disconnected);
    assert_eq!(h.controller.pending_operations(), 0);
    assert!(h.transport.submitted().contains(&Submitted::Disconnect));

    let events = h.drain();
    assert_eq!(
        events,
        vec![
            GattEvent::CharacteristicRead {
                service: BATTERY_SERVICE,
                characteristic: BATTERY_LEVEL,
                result: Err(GattError::Cancelled),
            },
            GattEvent::CharacteristicWrite {
                service: UART_SERVICE,
                characteristic: UART_DATA,
                result: Err(GattError::Cancelled),
            },
            GattEvent::RemoteRssi(Err(GattError::Cancelled)),
            GattEvent::Disconnected { address: peer() },
        ]
    );

    // Idempotent, and a late link-down or completion changes nothing
    h.controller.disconnect();
    h.post(TransportEvent::LinkDown {
        status: GattStatus(0x16),
    });
    h.post(read_done(BATTERY_LEVEL_HANDLE, &[1]));
    assert!(h.drain().is_empty());
    assert_eq!(
        h.controller.read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL),
        Err(GattError::NotReady)
    );
}

#[test]
fn test_reconnect_after_disconnect() {
    let h = Harness::new();
    h.ready();
    h.controller
        .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
        .unwrap();
    h.controller.disconnect();
    h.drain();

    h.ready();
    h.controller
        .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
        .unwrap();
    h.post(read_done(BATTERY_LEVEL_HANDLE, &[42]));
    assert_eq!(
        read_values(&h.drain()),
        vec![(BATTERY_LEVEL, Ok(vec![42]))]
    );
}

#[test]
fn test_remote_link_loss() {
    let h = Harness::new();
    h.ready();
    h.controller
        .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
        .unwrap();

    h.post(TransportEvent::LinkDown {
        status: GattStatus(0x08),
    });
    assert_eq!(
        h.drain(),
        vec![
            GattEvent::CharacteristicRead {
                service: BATTERY_SERVICE,
                characteristic: BATTERY_LEVEL,
                result: Err(GattError::Cancelled),
            },
            GattEvent::Disconnected { address: peer() },
        ]
    );
    assert_eq!(h.controller.state(), ConnectionState::Disconnected);
    assert!(!h.transport.submitted().contains(&Submitted::Disconnect));
}

#[test]
fn test_connection_error() {
    let h = Harness::new();
    h.controller.connect(peer()).unwrap();
    h.post(TransportEvent::LinkError {
        status: GattStatus(0x3E),
    });
    assert_eq!(
        h.drain(),
        vec![GattEvent::ConnectionError {
            address: peer(),
            error: GattError::OperationFailed(GattStatus(0x3E)),
        }]
    );
    assert_eq!(h.controller.state(), ConnectionState::Disconnected);
    assert!(h.controller.connect(peer()).is_ok());
}

#[test]
fn test_link_down_while_connecting() {
    let h = Harness::new();
    h.controller.connect(peer()).unwrap();
    h.post(TransportEvent::LinkDown {
        status: GattStatus(0x08),
    });
    assert_eq!(
        h.drain(),
        vec![GattEvent::ConnectionError {
            address: peer(),
            error: GattError::OperationFailed(GattStatus(0x08)),
        }]
    );
    assert_eq!(h.controller.state(), ConnectionState::Disconnected);
    assert!(h.controller.connect(peer()).is_ok());
}

#[test]
fn test_connect_rejected_by_transport() {
    let h = Harness::new();
    h.transport.reject_next(1);
    assert!(matches!(
        h.controller.connect(peer()),
        Err(GattError::SubmissionRejected(_))
    ));
    assert_eq!(h.controller.state(), ConnectionState::Disconnected);
    assert!(h.drain().is_empty());
}

#[test]
fn test_discovery_failure_closes_link() {
    let h = Harness::new();
    h.controller.connect(peer()).unwrap();
    h.post(TransportEvent::LinkUp);
    h.post(TransportEvent::ServicesDiscovered {
        services: Vec::new(),
        status: GattStatus::FAILURE,
    });

    assert_eq!(
        h.drain(),
        vec![
            GattEvent::Connected { address: peer() },
            GattEvent::ServicesDiscovered(Err(GattError::OperationFailed(GattStatus::FAILURE))),
            GattEvent::Disconnected { address: peer() },
        ]
    );
    assert_eq!(h.controller.state(), ConnectionState::Disconnected);
    assert_eq!(
        h.transport.submitted().last(),
        Some(&Submitted::Disconnect)
    );
    assert!(h.controller.services().is_empty());
}

#[test]
fn test_rediscovery() {
    let h = Harness::new();
    h.ready();
    h.controller
        .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
        .unwrap();
    assert_eq!(h.controller.discover_services(), Err(GattError::Busy));

    h.post(read_done(BATTERY_LEVEL_HANDLE, &[1]));
    h.drain();
    h.controller.discover_services().unwrap();
    assert_eq!(h.controller.state(), ConnectionState::Discovering);
    assert_eq!(
        h.controller.read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL),
        Err(GattError::NotReady)
    );

    // The new table replaces the old one entirely
    let battery_only = vec![services().remove(0)];
    h.post(TransportEvent::ServicesDiscovered {
        services: battery_only.clone(),
        status: GattStatus::SUCCESS,
    });
    h.drain();
    assert_eq!(h.controller.state(), ConnectionState::Ready);
    assert_eq!(h.controller.services(), battery_only);
    assert!(matches!(
        h.controller.read_characteristic(UART_SERVICE, UART_DATA),
        Err(GattError::AttributeNotFound { .. })
    ));
}

#[test]
fn test_notification_while_read_in_flight() {
    let h = Harness::new();
    h.ready();
    h.controller
        .read_characteristic(UART_SERVICE, UART_VERSION)
        .unwrap();

    h.post(TransportEvent::Notification {
        handle: BATTERY_LEVEL_HANDLE,
        value: vec![55],
    });
    h.post(TransportEvent::Notification {
        handle: AttributeHandle(0x0099),
        value: vec![0],
    });
    assert_eq!(
        h.drain(),
        vec![GattEvent::Notification {
            service: BATTERY_SERVICE,
            characteristic: BATTERY_LEVEL,
            value: vec![55],
        }]
    );
    assert_eq!(h.controller.pending_operations(), 1);

    h.post(read_done(UART_VERSION_HANDLE, b"2.0"));
    assert_eq!(
        read_values(&h.drain()),
        vec![(UART_VERSION, Ok(b"2.0".to_vec()))]
    );
}

#[test]
fn test_set_notify_writes_cccd() {
    let h = Harness::new();
    h.ready();

    h.controller
        .set_notify(BATTERY_SERVICE, BATTERY_LEVEL, true)
        .unwrap();
    h.post(TransportEvent::DescriptorWrite {
        handle: BATTERY_CCCD_HANDLE,
        status: GattStatus::SUCCESS,
    });
    h.controller
        .set_notify(UART_SERVICE, UART_STATUS, true)
        .unwrap();
    h.post(TransportEvent::DescriptorWrite {
        handle: UART_STATUS_CCCD_HANDLE,
        status: GattStatus::SUCCESS,
    });
    h.controller
        .set_notify(BATTERY_SERVICE, BATTERY_LEVEL, false)
        .unwrap();

    let events = h.drain();
    assert_eq!(
        events[0],
        GattEvent::DescriptorWrite {
            service: BATTERY_SERVICE,
            characteristic: BATTERY_LEVEL,
            descriptor: CLIENT_CHARACTERISTIC_CONFIG,
            result: Ok(vec![0x01, 0x00]),
        }
    );
    assert_eq!(events.len(), 2);

    let writes: Vec<_> = h
        .transport
        .submitted()
        .into_iter()
        .filter(|s| matches!(s, Submitted::WriteDescriptor(..)))
        .collect();
    assert_eq!(
        writes,
        vec![
            Submitted::WriteDescriptor(BATTERY_CCCD_HANDLE, vec![0x01, 0x00]),
            Submitted::WriteDescriptor(UART_STATUS_CCCD_HANDLE, vec![0x02, 0x00]),
            Submitted::WriteDescriptor(BATTERY_CCCD_HANDLE, vec![0x00, 0x00]),
        ]
    );
}

#[test]
fn test_descriptor_read() {
    let h = Harness::new();
    h.ready();
    h.controller
        .read_descriptor(BATTERY_SERVICE, BATTERY_LEVEL, CLIENT_CHARACTERISTIC_CONFIG)
        .unwrap();
    h.post(TransportEvent::DescriptorRead {
        handle: BATTERY_CCCD_HANDLE,
        value: vec![0x01, 0x00],
        status: GattStatus::SUCCESS,
    });
    assert_eq!(
        h.drain(),
        vec![GattEvent::DescriptorRead {
            service: BATTERY_SERVICE,
            characteristic: BATTERY_LEVEL,
            descriptor: CLIENT_CHARACTERISTIC_CONFIG,
            result: Ok(vec![0x01, 0x00]),
        }]
    );
}

#[test]
fn test_requested_mtu_after_discovery() {
    let h = Harness::with_config(ControllerConfig::default().with_requested_mtu(247));
    h.ready();
    assert_eq!(
        h.transport.submitted().last(),
        Some(&Submitted::RequestMtu(247))
    );

    h.post(TransportEvent::MtuChanged {
        mtu: 185,
        status: GattStatus::SUCCESS,
    });
    assert_eq!(h.drain(), vec![GattEvent::MtuChanged(Ok(185))]);
    assert_eq!(h.controller.mtu(), 185);

    h.controller
        .write_characteristic(UART_SERVICE, UART_DATA, vec![7; 200], WriteMode::WithoutResponse)
        .unwrap();
    assert_eq!(h.transport.written(UART_DATA_HANDLE)[0].len(), 182);

    h.controller.disconnect();
    assert_eq!(h.controller.mtu(), 23);
}

#[test]
fn test_request_mtu_bounds() {
    let h = Harness::new();
    h.ready();
    assert!(matches!(
        h.controller.request_mtu(10),
        Err(GattError::InvalidArgument(_))
    ));
    assert!(matches!(
        h.controller.request_mtu(600),
        Err(GattError::InvalidArgument(_))
    ));
    h.controller.request_mtu(517).unwrap();
    assert_eq!(
        h.transport.submitted().last(),
        Some(&Submitted::RequestMtu(517))
    );
}

#[test]
fn test_phy_and_rssi() {
    let h = Harness::new();
    h.ready();

    h.controller
        .set_preferred_phy(PhyMask::LE_2M, PhyMask::LE_2M, PhyOptions::NoPreference)
        .unwrap();
    h.controller.read_phy().unwrap();
    h.controller.read_remote_rssi().unwrap();
    assert_eq!(
        h.transport.submitted().last(),
        Some(&Submitted::SetPhy(
            PhyMask::LE_2M,
            PhyMask::LE_2M,
            PhyOptions::NoPreference
        ))
    );

    h.post(TransportEvent::PhyUpdated {
        tx: Phy::Le2M,
        rx: Phy::Le2M,
        status: GattStatus::SUCCESS,
    });
    h.post(TransportEvent::PhyRead {
        tx: Phy::Le2M,
        rx: Phy::Le1M,
        status: GattStatus::SUCCESS,
    });
    h.post(TransportEvent::RemoteRssi {
        rssi: -61,
        status: GattStatus::SUCCESS,
    });
    assert_eq!(
        h.drain(),
        vec![
            GattEvent::PhyUpdated(Ok((Phy::Le2M, Phy::Le2M))),
            GattEvent::PhyRead(Ok((Phy::Le2M, Phy::Le1M))),
            GattEvent::RemoteRssi(Ok(-61)),
        ]
    );
    assert!(matches!(
        h.controller
            .set_preferred_phy(PhyMask::empty(), PhyMask::LE_1M, PhyOptions::S2),
        Err(GattError::InvalidArgument(_))
    ));
}

#[test]
fn test_watchdog_fails_stalled_operation() {
    let config = ControllerConfig::default()
        .with_operation_timeout(Some(Duration::from_millis(40)))
        .with_watchdog_interval(Duration::from_millis(5));
    let h = Harness::with_config(config);
    h.ready();

    h.controller
        .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
        .unwrap();
    h.controller
        .read_characteristic(UART_SERVICE, UART_DATA)
        .unwrap();
    std::thread::sleep(Duration::from_millis(200));

    let events = h.drain();
    assert_eq!(
        read_values(&events)[0],
        (BATTERY_LEVEL, Err(GattError::Timeout))
    );
    assert!(h.reads().contains(&UART_DATA_HANDLE));

    // The late completion for the expired read is not delivered
    h.post(read_done(BATTERY_LEVEL_HANDLE, &[1]));
    let late = h.drain();
    assert!(!read_values(&late)
        .iter()
        .any(|(c, r)| *c == BATTERY_LEVEL && r.is_ok()));
}

#[test]
fn test_late_completion_not_taken_by_next_read() {
    let config = ControllerConfig::default()
        .with_operation_timeout(Some(Duration::from_millis(300)))
        .with_watchdog_interval(Duration::from_millis(5));
    let h = Harness::with_config(config);
    h.ready();

    h.controller
        .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
        .unwrap();
    h.controller
        .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
        .unwrap();
    std::thread::sleep(Duration::from_millis(400));

    assert_eq!(
        read_values(&h.drain()),
        vec![(BATTERY_LEVEL, Err(GattError::Timeout))]
    );
    assert_eq!(h.reads(), vec![BATTERY_LEVEL_HANDLE, BATTERY_LEVEL_HANDLE]);

    // Reply to the first read, arriving while the second one is in flight
    h.post(read_done(BATTERY_LEVEL_HANDLE, &[0xAA]));
    assert!(h.drain().is_empty());
    assert_eq!(h.controller.pending_operations(), 1);

    h.post(read_done(BATTERY_LEVEL_HANDLE, &[0xBB]));
    assert_eq!(
        read_values(&h.drain()),
        vec![(BATTERY_LEVEL, Ok(vec![0xBB]))]
    );
    assert_eq!(h.controller.pending_operations(), 0);
}

#[test]
fn test_scan_results() {
    let h = Harness::new();
    h.controller.start_scan().unwrap();
    h.post(TransportEvent::ScanResult {
        address: peer(),
        rssi: -70,
        advertising_data: vec![0x05, 0x09, b'T', b'a', b'g', b'1', 0x03, 0x03, 0x0F, 0x18],
    });
    h.post(TransportEvent::ScanFailed { code: 2 });
    h.controller.stop_scan();

    let events = h.drain();
    match &events[0] {
        GattEvent::ScanResult(record) => {
            assert_eq!(record.address, peer());
            assert_eq!(record.name.as_deref(), Some("Tag1"));
            assert_eq!(record.service_uuids, vec![BATTERY_SERVICE]);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(events[1], GattEvent::ScanFailed { code: 2 });
    assert_eq!(
        h.transport.submitted(),
        vec![Submitted::StartScan, Submitted::StopScan]
    );
}

#[test]
fn test_drop_disconnects() {
    let h = Harness::new();
    h.ready();
    h.controller
        .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
        .unwrap();

    let Harness {
        transport,
        controller,
        sink,
        events,
    } = h;
    drop(controller);

    let events: Vec<GattEvent> = events.try_iter().collect();
    assert_eq!(
        events,
        vec![
            GattEvent::CharacteristicRead {
                service: BATTERY_SERVICE,
                characteristic: BATTERY_LEVEL,
                result: Err(GattError::Cancelled),
            },
            GattEvent::Disconnected { address: peer() },
        ]
    );
    assert!(transport.submitted().contains(&Submitted::Disconnect));
    assert!(!sink.post(TransportEvent::LinkUp));
}

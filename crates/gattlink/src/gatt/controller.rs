//! GATT Controller
//!
//! The caller-facing API. Every method may be called from any thread and
//! returns without waiting for the peer: validation failures come back
//! synchronously, everything else arrives later through the listener.
//!
//! Link state, the attribute index, and the operation queue live together
//! behind one mutex. Events produced while the mutex is held are pushed into
//! the dispatcher FIFO before it is released, so listener order always
//! matches the order in which the state changed.

use crate::address::BdAddr;
use crate::config::{ControllerConfig, DEFAULT_MTU, MAX_MTU};
use crate::error::{GattError, GattResult};
use crate::gatt::dispatcher::{Dispatcher, EventProcessor, Message};
use crate::gatt::event::{GattEvent, GattListener};
use crate::gatt::index::AttributeIndex;
use crate::gatt::operation::{
    CharacteristicTarget, ChunkState, DescriptorTarget, PendingOperation,
};
use crate::gatt::queue::OperationQueue;
use crate::gatt::state::{ConnectionState, Link};
use crate::gatt::types::{CccdValue, GattStatus, PhyMask, PhyOptions, Service, WriteMode};
use crate::scan::ScanRecord;
use crate::transport::{EventSink, Transport, TransportEvent};
use crate::uuid::{Uuid, CLIENT_CHARACTERISTIC_CONFIG};
use log::{debug, error, info, trace, warn};
use std::io;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Everything guarded by the controller mutex
#[derive(Debug)]
struct Core {
    link: Link,
    index: AttributeIndex,
    queue: OperationQueue,
    outbox: Sender<Message>,
}

impl Core {
    fn new(outbox: Sender<Message>) -> Self {
        Self {
            link: Link::new(),
            index: AttributeIndex::new(),
            queue: OperationQueue::new(),
            outbox,
        }
    }

    fn emit(&self, events: Vec<GattEvent>) {
        for event in events {
            if self.outbox.send(Message::Deliver(event)).is_err() {
                warn!("Dispatcher has stopped; dropping event");
                return;
            }
        }
    }

    fn enqueue(&mut self, op: PendingOperation, transport: &dyn Transport, out: &mut Vec<GattEvent>) {
        let fragment_size = self.link.fragment_size();
        self.queue.enqueue(op, transport, fragment_size, out);
    }

    /// Drop all link-scoped state and report the disconnect
    fn teardown(&mut self, out: &mut Vec<GattEvent>) {
        self.queue.cancel_all(out);
        self.index.invalidate();
        if let Some(address) = self.link.reset() {
            info!("Disconnected from {}", address);
            out.push(GattEvent::Disconnected { address });
        }
    }

    fn connect_failed(&mut self, status: GattStatus, out: &mut Vec<GattEvent>) {
        if let Some(address) = self.link.reset() {
            error!("Connection to {} failed with status {}", address, status);
            out.push(GattEvent::ConnectionError {
                address,
                error: GattError::OperationFailed(status),
            });
        }
    }

    fn start_discovery(&mut self, transport: &dyn Transport, out: &mut Vec<GattEvent>) {
        if let Err(err) = self.link.begin_discovery() {
            warn!("Cannot start discovery: {}", err);
            return;
        }
        self.index.invalidate();

        match transport.discover_services() {
            Ok(()) => debug!("Service discovery started"),
            Err(err) => self.discovery_failed(err.into(), transport, out),
        }
    }

    /// A link without a usable attribute table is closed
    fn discovery_failed(&mut self, err: GattError, transport: &dyn Transport, out: &mut Vec<GattEvent>) {
        error!("Service discovery failed: {}", err);
        self.index.invalidate();
        out.push(GattEvent::ServicesDiscovered(Err(err)));
        transport.disconnect();
        self.teardown(out);
    }

    fn handle(
        &mut self,
        event: TransportEvent,
        transport: &dyn Transport,
        config: &ControllerConfig,
        out: &mut Vec<GattEvent>,
    ) {
        match event {
            TransportEvent::ScanResult {
                address,
                rssi,
                advertising_data,
            } => {
                let record = ScanRecord::from_advertisement(address, rssi, advertising_data);
                trace!("Scan result {} rssi={} name={:?}", address, rssi, record.name);
                out.push(GattEvent::ScanResult(record));
            }
            TransportEvent::ScanFailed { code } => {
                warn!("Scan failed with code {}", code);
                out.push(GattEvent::ScanFailed { code });
            }
            TransportEvent::LinkUp => {
                if !self.link.link_up() {
                    warn!("Link up while {:?}; closing it", self.link.state());
                    if self.link.state() == ConnectionState::Disconnected {
                        transport.disconnect();
                    }
                    return;
                }
                if let Some(address) = self.link.address() {
                    info!("Connected to {}", address);
                    out.push(GattEvent::Connected { address });
                }
                self.start_discovery(transport, out);
            }
            TransportEvent::LinkError { status } => {
                if self.link.state() != ConnectionState::Connecting {
                    warn!("Link error {} while {:?}; ignored", status, self.link.state());
                    return;
                }
                self.connect_failed(status, out);
            }
            TransportEvent::LinkDown { status } => match self.link.state() {
                ConnectionState::Disconnected => {
                    debug!("Link down ({}) for a link already torn down", status);
                }
                // The link never came up, so this is a failed attempt
                ConnectionState::Connecting => self.connect_failed(status, out),
                _ => {
                    info!("Link down with status {}", status);
                    self.teardown(out);
                }
            },
            TransportEvent::ServicesDiscovered { services, status } => {
                if self.link.state() != ConnectionState::Discovering {
                    warn!("Discovery result while {:?}; ignored", self.link.state());
                    return;
                }
                if !status.is_success() {
                    self.discovery_failed(GattError::OperationFailed(status), transport, out);
                    return;
                }

                self.index.rebuild(services.clone());
                self.link.discovery_succeeded();
                info!(
                    "Discovered {} services, {} characteristics",
                    services.len(),
                    self.index.len()
                );
                out.push(GattEvent::ServicesDiscovered(Ok(services)));

                if let Some(mtu) = config.requested_mtu {
                    self.enqueue(PendingOperation::RequestMtu(mtu), transport, out);
                }
            }
            TransportEvent::Notification { handle, value } => match self.index.resolve(handle) {
                Some((service, characteristic)) => {
                    trace!("Notification from {}: {}", handle, hex::encode(&value));
                    out.push(GattEvent::Notification {
                        service,
                        characteristic,
                        value,
                    });
                }
                None => warn!("Notification for unknown handle {}; dropped", handle),
            },
            TransportEvent::MtuChanged { mtu, status } => {
                if status.is_success() && self.link.state() != ConnectionState::Disconnected {
                    debug!("MTU now {}", mtu);
                    self.link.set_mtu(mtu);
                }
                let event = TransportEvent::MtuChanged { mtu, status };
                if self.complete(event, transport, out).is_some() {
                    debug!("Peer changed MTU to {}", mtu);
                    out.push(GattEvent::MtuChanged(status_result(status).map(|_| mtu)));
                }
            }
            TransportEvent::PhyUpdated { tx, rx, status } => {
                let event = TransportEvent::PhyUpdated { tx, rx, status };
                if self.complete(event, transport, out).is_some() {
                    debug!("Peer changed PHY to tx={:?} rx={:?}", tx, rx);
                    out.push(GattEvent::PhyUpdated(status_result(status).map(|_| (tx, rx))));
                }
            }
            completion => {
                if let Some(stray) = self.complete(completion, transport, out) {
                    warn!("Completion with no matching operation; dropped: {:?}", stray);
                }
            }
        }
    }

    fn complete(
        &mut self,
        event: TransportEvent,
        transport: &dyn Transport,
        out: &mut Vec<GattEvent>,
    ) -> Option<TransportEvent> {
        let fragment_size = self.link.fragment_size();
        self.queue.complete(event, transport, fragment_size, out)
    }
}

fn status_result(status: GattStatus) -> GattResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(GattError::OperationFailed(status))
    }
}

struct Shared {
    core: Mutex<Core>,
    transport: Arc<dyn Transport>,
    config: ControllerConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventProcessor for Shared {
    fn process(&self, event: TransportEvent) {
        let mut core = self.lock();
        let mut out = Vec::new();
        core.handle(event, self.transport.as_ref(), &self.config, &mut out);
        core.emit(out);
    }

    fn tick(&self, now: Instant) {
        let Some(timeout) = self.config.operation_timeout else {
            return;
        };
        let mut core = self.lock();
        let mut out = Vec::new();
        let fragment_size = core.link.fragment_size();
        core.queue
            .expire(now, timeout, self.transport.as_ref(), fragment_size, &mut out);
        core.emit(out);
    }
}

/// Controller for one GATT connection
pub struct GattController {
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
}

impl std::fmt::Debug for GattController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.shared.lock();
        f.debug_struct("GattController")
            .field("state", &core.link.state())
            .field("mtu", &core.link.mtu())
            .field("pending", &core.queue.len())
            .finish()
    }
}

impl GattController {
    /// Create a controller and start its dispatcher thread
    pub fn new<L>(
        transport: Arc<dyn Transport>,
        listener: L,
        config: ControllerConfig,
    ) -> io::Result<Self>
    where
        L: GattListener + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let tick_interval = config.operation_timeout.map(|_| config.watchdog_interval);
        let thread_name = config.thread_name.clone();

        let shared = Arc::new(Shared {
            core: Mutex::new(Core::new(tx.clone())),
            transport,
            config,
        });
        let dispatcher = Dispatcher::spawn(
            &thread_name,
            tick_interval,
            tx,
            rx,
            shared.clone(),
            Box::new(listener),
        )?;

        Ok(Self { shared, dispatcher })
    }

    /// Handle the transport uses to report events
    pub fn event_sink(&self) -> EventSink {
        self.dispatcher.sink()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().link.state()
    }

    pub fn address(&self) -> Option<BdAddr> {
        self.shared.lock().link.address()
    }

    /// Current negotiated MTU
    pub fn mtu(&self) -> u16 {
        self.shared.lock().link.mtu()
    }

    /// Snapshot of the discovered attribute tree
    pub fn services(&self) -> Vec<Service> {
        self.shared.lock().index.services().to_vec()
    }

    /// Operations queued, including the one in flight
    pub fn pending_operations(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Wait until every event queued so far has been processed and
    /// delivered to the listener
    pub fn flush(&self) {
        self.dispatcher.flush();
    }

    pub fn start_scan(&self) -> GattResult<()> {
        self.shared.transport.start_scan()?;
        debug!("Scan started");
        Ok(())
    }

    pub fn stop_scan(&self) {
        self.shared.transport.stop_scan();
        debug!("Scan stopped");
    }

    /// Open a link to `address`; completion is reported through
    /// `on_connected` or `on_connection_error`
    pub fn connect(&self, address: BdAddr) -> GattResult<()> {
        let mut core = self.shared.lock();
        core.link.begin_connect(address)?;

        if let Err(err) = self.shared.transport.connect(address) {
            error!("Connect to {} rejected: {}", address, err);
            core.link.reset();
            return Err(err.into());
        }
        info!("Connecting to {}", address);
        Ok(())
    }

    /// Close the link and cancel everything queued.
    ///
    /// All teardown happens before this returns; calling it while already
    /// disconnected does nothing.
    pub fn disconnect(&self) {
        let mut core = self.shared.lock();
        if core.link.state() == ConnectionState::Disconnected {
            return;
        }

        self.shared.transport.disconnect();
        let mut out = Vec::new();
        core.teardown(&mut out);
        core.emit(out);
    }

    /// Discard the attribute index and discover again
    pub fn discover_services(&self) -> GattResult<()> {
        let mut core = self.shared.lock();
        if !core.link.is_ready() {
            return Err(GattError::NotReady);
        }
        if !core.queue.is_empty() {
            return Err(GattError::Busy);
        }

        let mut out = Vec::new();
        core.start_discovery(self.shared.transport.as_ref(), &mut out);
        core.emit(out);
        Ok(())
    }

    pub fn read_characteristic(&self, service: Uuid, characteristic: Uuid) -> GattResult<()> {
        self.submit(|core| {
            let entry = core.index.lookup(service, characteristic)?;
            if !entry.properties.can_read() {
                return Err(GattError::NotPermitted);
            }
            Ok(PendingOperation::ReadCharacteristic(CharacteristicTarget {
                service,
                characteristic,
                handle: entry.handle,
            }))
        })
    }

    /// Write `value`, split into MTU-sized fragments when needed.
    ///
    /// One `on_characteristic_write` reports the whole write.
    pub fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: impl Into<Vec<u8>>,
        mode: WriteMode,
    ) -> GattResult<()> {
        let value = value.into();
        self.submit(move |core| {
            let entry = core.index.lookup(service, characteristic)?;
            let permitted = match mode {
                WriteMode::WithResponse => entry.properties.can_write(),
                WriteMode::WithoutResponse => entry.properties.can_write_without_response(),
            };
            if !permitted {
                return Err(GattError::NotPermitted);
            }
            Ok(PendingOperation::WriteCharacteristic(
                CharacteristicTarget {
                    service,
                    characteristic,
                    handle: entry.handle,
                },
                ChunkState::new(value, mode),
            ))
        })
    }

    pub fn read_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> GattResult<()> {
        self.submit(|core| {
            let handle = core
                .index
                .lookup_descriptor(service, characteristic, descriptor)?;
            Ok(PendingOperation::ReadDescriptor(DescriptorTarget {
                service,
                characteristic,
                descriptor,
                handle,
            }))
        })
    }

    pub fn write_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: impl Into<Vec<u8>>,
    ) -> GattResult<()> {
        let value = value.into();
        self.submit(move |core| {
            let handle = core
                .index
                .lookup_descriptor(service, characteristic, descriptor)?;
            Ok(PendingOperation::WriteDescriptor(
                DescriptorTarget {
                    service,
                    characteristic,
                    descriptor,
                    handle,
                },
                value,
            ))
        })
    }

    /// Enable or disable value updates through the CCCD.
    ///
    /// Notifications are preferred when the characteristic supports both.
    /// The descriptor write is reported through `on_descriptor_write`.
    pub fn set_notify(&self, service: Uuid, characteristic: Uuid, enable: bool) -> GattResult<()> {
        self.submit(|core| {
            let entry = core.index.lookup(service, characteristic)?;
            let value = match (enable, entry.properties) {
                (false, _) => CccdValue::Disabled,
                (true, props) if props.can_notify() => CccdValue::Notify,
                (true, props) if props.can_indicate() => CccdValue::Indicate,
                (true, _) => return Err(GattError::NotPermitted),
            };
            let handle = core.index.lookup_descriptor(
                service,
                characteristic,
                CLIENT_CHARACTERISTIC_CONFIG,
            )?;
            Ok(PendingOperation::WriteDescriptor(
                DescriptorTarget {
                    service,
                    characteristic,
                    descriptor: CLIENT_CHARACTERISTIC_CONFIG,
                    handle,
                },
                value.to_bytes(),
            ))
        })
    }

    /// Ask the peer for a larger MTU; reported through `on_mtu_changed`
    pub fn request_mtu(&self, mtu: u16) -> GattResult<()> {
        if !(DEFAULT_MTU..=MAX_MTU).contains(&mtu) {
            return Err(GattError::InvalidArgument(format!(
                "MTU {} outside {}..={}",
                mtu, DEFAULT_MTU, MAX_MTU
            )));
        }
        self.submit(|_| Ok(PendingOperation::RequestMtu(mtu)))
    }

    pub fn set_preferred_phy(&self, tx: PhyMask, rx: PhyMask, options: PhyOptions) -> GattResult<()> {
        if tx.is_empty() || rx.is_empty() {
            return Err(GattError::InvalidArgument("empty PHY mask".into()));
        }
        self.submit(|_| Ok(PendingOperation::SetPreferredPhy { tx, rx, options }))
    }

    pub fn read_phy(&self) -> GattResult<()> {
        self.submit(|_| Ok(PendingOperation::ReadPhy))
    }

    pub fn read_remote_rssi(&self) -> GattResult<()> {
        self.submit(|_| Ok(PendingOperation::ReadRemoteRssi))
    }

    /// Validate against the current state and queue the operation.
    ///
    /// Nothing is queued unless the link is ready and `build` succeeds.
    fn submit<F>(&self, build: F) -> GattResult<()>
    where
        F: FnOnce(&Core) -> GattResult<PendingOperation>,
    {
        let mut core = self.shared.lock();
        if !core.link.is_ready() {
            return Err(GattError::NotReady);
        }
        let op = build(&*core)?;

        let mut out = Vec::new();
        core.enqueue(op, self.shared.transport.as_ref(), &mut out);
        core.emit(out);
        Ok(())
    }
}

impl Drop for GattController {
    fn drop(&mut self) {
        self.disconnect();
        self.dispatcher.shutdown();
    }
}

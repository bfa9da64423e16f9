//! Queued GATT operations
//!
//! A [`PendingOperation`] knows how to submit itself to the transport and how
//! to recognise its own completion. Characteristic writes carry a
//! [`ChunkState`] so a payload larger than one ATT packet is sent as a series
//! of fragments that count as a single logical operation.

use crate::error::{GattError, GattResult};
use crate::gatt::event::GattEvent;
use crate::gatt::types::{
    AttributeHandle, DescriptorHandle, GattStatus, PhyMask, PhyOptions, WriteMode,
};
use crate::transport::{Submission, Transport, TransportEvent};
use crate::uuid::Uuid;
use std::fmt;

/// The kind of a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    ReadCharacteristic,
    WriteCharacteristic,
    ReadDescriptor,
    WriteDescriptor,
    RequestMtu,
    SetPreferredPhy,
    ReadPhy,
    ReadRemoteRssi,
}

/// A characteristic resolved through the attribute index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CharacteristicTarget {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub handle: AttributeHandle,
}

/// A descriptor resolved through the attribute index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DescriptorTarget {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub descriptor: Uuid,
    pub handle: DescriptorHandle,
}

/// The transport completion an operation is waiting for.
///
/// Kept for operations that timed out so their late completion can be told
/// apart from the one the next operation on the same attribute is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompletionKey {
    CharacteristicRead(AttributeHandle),
    CharacteristicWrite(AttributeHandle),
    DescriptorRead(DescriptorHandle),
    DescriptorWrite(DescriptorHandle),
    MtuChanged,
    PhyUpdated,
    PhyRead,
    RemoteRssi,
}

impl CompletionKey {
    pub fn matches(&self, event: &TransportEvent) -> bool {
        match (*self, event) {
            (
                CompletionKey::CharacteristicRead(expected),
                TransportEvent::CharacteristicRead { handle, .. },
            )
            | (
                CompletionKey::CharacteristicWrite(expected),
                TransportEvent::CharacteristicWrite { handle, .. },
            ) => *handle == expected,
            (
                CompletionKey::DescriptorRead(expected),
                TransportEvent::DescriptorRead { handle, .. },
            )
            | (
                CompletionKey::DescriptorWrite(expected),
                TransportEvent::DescriptorWrite { handle, .. },
            ) => *handle == expected,
            (CompletionKey::MtuChanged, TransportEvent::MtuChanged { .. })
            | (CompletionKey::PhyUpdated, TransportEvent::PhyUpdated { .. })
            | (CompletionKey::PhyRead, TransportEvent::PhyRead { .. })
            | (CompletionKey::RemoteRssi, TransportEvent::RemoteRssi { .. }) => true,
            _ => false,
        }
    }
}

/// Progress of a fragmented characteristic write.
///
/// `cursor` only moves forward, by the length of a fragment the peer has
/// acknowledged, and never passes the end of the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkState {
    payload: Vec<u8>,
    mode: WriteMode,
    cursor: usize,
    pending: usize,
    fragments_sent: usize,
}

impl ChunkState {
    pub fn new(payload: Vec<u8>, mode: WriteMode) -> Self {
        Self {
            payload,
            mode,
            cursor: 0,
            pending: 0,
            fragments_sent: 0,
        }
    }

    /// The next fragment, at most `fragment_size` bytes from the cursor.
    ///
    /// An empty payload yields one empty fragment.
    pub fn next_fragment(&mut self, fragment_size: usize) -> &[u8] {
        let end = (self.cursor + fragment_size.max(1)).min(self.payload.len());
        self.pending = end - self.cursor;
        self.fragments_sent += 1;
        &self.payload[self.cursor..end]
    }

    /// Record that the fragment returned by the last
    /// [`next_fragment`](Self::next_fragment) was acknowledged.
    pub fn commit(&mut self) {
        self.cursor += self.pending;
        self.pending = 0;
    }

    pub fn is_complete(&self) -> bool {
        self.fragments_sent > 0 && self.pending == 0 && self.cursor >= self.payload.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.payload.len() - self.cursor
    }

    pub fn fragments_sent(&self) -> usize {
        self.fragments_sent
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// One entry of the operation queue
#[derive(Debug)]
pub(crate) enum PendingOperation {
    ReadCharacteristic(CharacteristicTarget),
    WriteCharacteristic(CharacteristicTarget, ChunkState),
    ReadDescriptor(DescriptorTarget),
    WriteDescriptor(DescriptorTarget, Vec<u8>),
    RequestMtu(u16),
    SetPreferredPhy {
        tx: PhyMask,
        rx: PhyMask,
        options: PhyOptions,
    },
    ReadPhy,
    ReadRemoteRssi,
}

/// Outcome of offering a transport event to the operation at the head
#[derive(Debug)]
pub(crate) enum Step {
    /// Not this operation's completion
    Unmatched(TransportEvent),
    /// More fragments to send; the operation stays at the head
    Continue,
    /// Finished; dispatch the event and drop the operation
    Done(GattEvent),
}

fn check(status: GattStatus) -> GattResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(GattError::OperationFailed(status))
    }
}

impl PendingOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            PendingOperation::ReadCharacteristic(_) => OperationKind::ReadCharacteristic,
            PendingOperation::WriteCharacteristic(..) => OperationKind::WriteCharacteristic,
            PendingOperation::ReadDescriptor(_) => OperationKind::ReadDescriptor,
            PendingOperation::WriteDescriptor(..) => OperationKind::WriteDescriptor,
            PendingOperation::RequestMtu(_) => OperationKind::RequestMtu,
            PendingOperation::SetPreferredPhy { .. } => OperationKind::SetPreferredPhy,
            PendingOperation::ReadPhy => OperationKind::ReadPhy,
            PendingOperation::ReadRemoteRssi => OperationKind::ReadRemoteRssi,
        }
    }

    pub fn completion_key(&self) -> CompletionKey {
        match self {
            PendingOperation::ReadCharacteristic(target) => {
                CompletionKey::CharacteristicRead(target.handle)
            }
            PendingOperation::WriteCharacteristic(target, _) => {
                CompletionKey::CharacteristicWrite(target.handle)
            }
            PendingOperation::ReadDescriptor(target) => CompletionKey::DescriptorRead(target.handle),
            PendingOperation::WriteDescriptor(target, _) => {
                CompletionKey::DescriptorWrite(target.handle)
            }
            PendingOperation::RequestMtu(_) => CompletionKey::MtuChanged,
            PendingOperation::SetPreferredPhy { .. } => CompletionKey::PhyUpdated,
            PendingOperation::ReadPhy => CompletionKey::PhyRead,
            PendingOperation::ReadRemoteRssi => CompletionKey::RemoteRssi,
        }
    }

    /// Hand the operation (or its next fragment) to the transport
    pub fn submit(&mut self, transport: &dyn Transport, fragment_size: usize) -> Submission {
        match self {
            PendingOperation::ReadCharacteristic(target) => {
                transport.read_characteristic(target.handle)
            }
            PendingOperation::WriteCharacteristic(target, chunks) => {
                let mode = chunks.mode();
                let fragment = chunks.next_fragment(fragment_size);
                log::trace!(
                    "Write fragment to {}: {}",
                    target.handle,
                    hex::encode(fragment)
                );
                transport.write_characteristic(target.handle, fragment, mode)
            }
            PendingOperation::ReadDescriptor(target) => transport.read_descriptor(target.handle),
            PendingOperation::WriteDescriptor(target, value) => {
                transport.write_descriptor(target.handle, value)
            }
            PendingOperation::RequestMtu(mtu) => transport.request_mtu(*mtu),
            PendingOperation::SetPreferredPhy { tx, rx, options } => {
                transport.set_preferred_phy(*tx, *rx, *options)
            }
            PendingOperation::ReadPhy => transport.read_phy(),
            PendingOperation::ReadRemoteRssi => transport.read_remote_rssi(),
        }
    }

    /// Offer a transport event; matched by kind and target handle
    pub fn step(&mut self, event: TransportEvent) -> Step {
        match (self, event) {
            (
                PendingOperation::ReadCharacteristic(target),
                TransportEvent::CharacteristicRead {
                    handle,
                    value,
                    status,
                },
            ) if handle == target.handle => Step::Done(GattEvent::CharacteristicRead {
                service: target.service,
                characteristic: target.characteristic,
                result: check(status).map(|_| value),
            }),
            (
                PendingOperation::WriteCharacteristic(target, chunks),
                TransportEvent::CharacteristicWrite { handle, status },
            ) if handle == target.handle => {
                if let Err(err) = check(status) {
                    return Step::Done(GattEvent::CharacteristicWrite {
                        service: target.service,
                        characteristic: target.characteristic,
                        result: Err(err),
                    });
                }
                chunks.commit();
                if !chunks.is_complete() {
                    return Step::Continue;
                }
                Step::Done(GattEvent::CharacteristicWrite {
                    service: target.service,
                    characteristic: target.characteristic,
                    result: Ok(chunks.payload().to_vec()),
                })
            }
            (
                PendingOperation::ReadDescriptor(target),
                TransportEvent::DescriptorRead {
                    handle,
                    value,
                    status,
                },
            ) if handle == target.handle => Step::Done(GattEvent::DescriptorRead {
                service: target.service,
                characteristic: target.characteristic,
                descriptor: target.descriptor,
                result: check(status).map(|_| value),
            }),
            (
                PendingOperation::WriteDescriptor(target, value),
                TransportEvent::DescriptorWrite { handle, status },
            ) if handle == target.handle => Step::Done(GattEvent::DescriptorWrite {
                service: target.service,
                characteristic: target.characteristic,
                descriptor: target.descriptor,
                result: check(status).map(|_| value.clone()),
            }),
            (PendingOperation::RequestMtu(_), TransportEvent::MtuChanged { mtu, status }) => {
                Step::Done(GattEvent::MtuChanged(check(status).map(|_| mtu)))
            }
            (
                PendingOperation::SetPreferredPhy { .. },
                TransportEvent::PhyUpdated { tx, rx, status },
            ) => Step::Done(GattEvent::PhyUpdated(check(status).map(|_| (tx, rx)))),
            (PendingOperation::ReadPhy, TransportEvent::PhyRead { tx, rx, status }) => {
                Step::Done(GattEvent::PhyRead(check(status).map(|_| (tx, rx))))
            }
            (PendingOperation::ReadRemoteRssi, TransportEvent::RemoteRssi { rssi, status }) => {
                Step::Done(GattEvent::RemoteRssi(check(status).map(|_| rssi)))
            }
            (_, event) => Step::Unmatched(event),
        }
    }

    /// The completion event reporting this operation as failed
    pub fn fail(self, error: GattError) -> GattEvent {
        match self {
            PendingOperation::ReadCharacteristic(target) => GattEvent::CharacteristicRead {
                service: target.service,
                characteristic: target.characteristic,
                result: Err(error),
            },
            PendingOperation::WriteCharacteristic(target, _) => GattEvent::CharacteristicWrite {
                service: target.service,
                characteristic: target.characteristic,
                result: Err(error),
            },
            PendingOperation::ReadDescriptor(target) => GattEvent::DescriptorRead {
                service: target.service,
                characteristic: target.characteristic,
                descriptor: target.descriptor,
                result: Err(error),
            },
            PendingOperation::WriteDescriptor(target, _) => GattEvent::DescriptorWrite {
                service: target.service,
                characteristic: target.characteristic,
                descriptor: target.descriptor,
                result: Err(error),
            },
            PendingOperation::RequestMtu(_) => GattEvent::MtuChanged(Err(error)),
            PendingOperation::SetPreferredPhy { .. } => GattEvent::PhyUpdated(Err(error)),
            PendingOperation::ReadPhy => GattEvent::PhyRead(Err(error)),
            PendingOperation::ReadRemoteRssi => GattEvent::RemoteRssi(Err(error)),
        }
    }
}

impl fmt::Display for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingOperation::ReadCharacteristic(t) => write!(f, "read {}", t.handle),
            PendingOperation::WriteCharacteristic(t, chunks) => write!(
                f,
                "write {} ({}/{} bytes)",
                t.handle,
                chunks.cursor(),
                chunks.payload().len()
            ),
            PendingOperation::ReadDescriptor(t) => write!(f, "read descriptor {}", t.handle),
            PendingOperation::WriteDescriptor(t, _) => write!(f, "write descriptor {}", t.handle),
            PendingOperation::RequestMtu(mtu) => write!(f, "request MTU {}", mtu),
            PendingOperation::SetPreferredPhy { tx, rx, .. } => {
                write!(f, "set PHY tx={:?} rx={:?}", tx, rx)
            }
            PendingOperation::ReadPhy => write!(f, "read PHY"),
            PendingOperation::ReadRemoteRssi => write!(f, "read RSSI"),
        }
    }
}

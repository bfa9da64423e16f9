//! Operation Queue
//!
//! The transport accepts one outstanding request per link. The queue keeps
//! everything else waiting: the head is submitted, and nothing behind it
//! moves until the head's completion, synchronous rejection, or timeout has
//! been handled. A fragmented write stays at the head until its last fragment
//! is acknowledged.

use crate::error::GattError;
use crate::gatt::event::GattEvent;
use crate::gatt::operation::{CompletionKey, OperationKind, PendingOperation, Step};
use crate::transport::{Transport, TransportEvent};
use log::{debug, error, warn};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub(crate) struct OperationQueue {
    pending: VecDeque<PendingOperation>,
    /// Submission time of the head, while it awaits completion
    in_flight: Option<Instant>,
    /// Completions still owed to operations that timed out, with the time
    /// each one was given up on
    expired: VecDeque<(CompletionKey, Instant)>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn head_kind(&self) -> Option<OperationKind> {
        self.pending.front().map(PendingOperation::kind)
    }

    /// Append an operation and start it if the link is idle
    pub fn enqueue(
        &mut self,
        op: PendingOperation,
        transport: &dyn Transport,
        fragment_size: usize,
        out: &mut Vec<GattEvent>,
    ) {
        debug!("Queued {} ({} pending)", op, self.pending.len());
        self.pending.push_back(op);
        self.pump(transport, fragment_size, out);
    }

    /// Submit the head if nothing is in flight.
    ///
    /// A synchronous rejection completes the head with
    /// [`GattError::SubmissionRejected`] and moves on to the next entry.
    pub fn pump(&mut self, transport: &dyn Transport, fragment_size: usize, out: &mut Vec<GattEvent>) {
        while self.in_flight.is_none() {
            let Some(head) = self.pending.front_mut() else {
                return;
            };

            match head.submit(transport, fragment_size) {
                Ok(()) => {
                    debug!("Submitted {}", head);
                    self.in_flight = Some(Instant::now());
                }
                Err(err) => {
                    error!("Transport rejected {}: {}", head, err);
                    if let Some(op) = self.pending.pop_front() {
                        out.push(op.fail(err.into()));
                    }
                }
            }
        }
    }

    /// Offer a completion to the in-flight head.
    ///
    /// Returns the event back if it does not belong to the head.
    pub fn complete(
        &mut self,
        event: TransportEvent,
        transport: &dyn Transport,
        fragment_size: usize,
        out: &mut Vec<GattEvent>,
    ) -> Option<TransportEvent> {
        let event = self.discard_late(event)?;
        if self.in_flight.is_none() {
            return Some(event);
        }
        let head = self.pending.front_mut()?;

        match head.step(event) {
            Step::Unmatched(event) => Some(event),
            Step::Continue => {
                debug!("Continuing {}", head);
                self.in_flight = None;
                self.pump(transport, fragment_size, out);
                None
            }
            Step::Done(completion) => {
                self.pending.pop_front();
                self.in_flight = None;
                out.push(completion);
                self.pump(transport, fragment_size, out);
                None
            }
        }
    }

    /// Fail the head if it has been in flight for `timeout` or longer
    pub fn expire(
        &mut self,
        now: Instant,
        timeout: Duration,
        transport: &dyn Transport,
        fragment_size: usize,
        out: &mut Vec<GattEvent>,
    ) -> bool {
        // A completion that has not shown up within another full timeout
        // is not coming
        self.expired
            .retain(|(_, expired_at)| now.saturating_duration_since(*expired_at) < timeout);

        let Some(started) = self.in_flight else {
            return false;
        };
        if now.saturating_duration_since(started) < timeout {
            return false;
        }

        self.in_flight = None;
        if let Some(op) = self.pending.pop_front() {
            warn!("{} timed out after {:?}", op, timeout);
            self.expired.push_back((op.completion_key(), now));
            out.push(op.fail(GattError::Timeout));
        }
        self.pump(transport, fragment_size, out);
        true
    }

    /// Swallow the first completion owed to an operation that already timed
    /// out, so it cannot be taken for the reply to a newer operation on the
    /// same attribute.
    fn discard_late(&mut self, event: TransportEvent) -> Option<TransportEvent> {
        let Some(index) = self.expired.iter().position(|(key, _)| key.matches(&event)) else {
            return Some(event);
        };
        self.expired.remove(index);
        debug!("Discarding late completion {:?}", event);
        None
    }

    /// Fail every entry, in flight or not, with [`GattError::Cancelled`]
    pub fn cancel_all(&mut self, out: &mut Vec<GattEvent>) {
        if !self.pending.is_empty() {
            debug!("Cancelling {} queued operations", self.pending.len());
        }
        self.in_flight = None;
        self.expired.clear();
        out.extend(self.pending.drain(..).map(|op| op.fail(GattError::Cancelled)));
    }
}

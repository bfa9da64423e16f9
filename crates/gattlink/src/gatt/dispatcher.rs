//! Event Dispatcher
//!
//! One thread per controller drains a single FIFO carrying both transport
//! events and listener deliveries. Transport events are processed there
//! (which advances the operation queue) and listener calls happen there, so
//! the listener only ever runs on one thread and sees events in the order
//! they were produced.

use crate::gatt::event::{GattEvent, GattListener};
use crate::transport::{EventSink, TransportEvent};
use log::{debug, trace};
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Dispatcher FIFO entries
#[derive(Debug)]
pub(crate) enum Message {
    Transport(TransportEvent),
    Deliver(GattEvent),
    Flush(SyncSender<()>),
    Shutdown,
}

/// State machine driven by the dispatcher thread
pub(crate) trait EventProcessor: Send + Sync {
    fn process(&self, event: TransportEvent);

    fn tick(&self, now: Instant);
}

pub(crate) struct Dispatcher {
    tx: Sender<Message>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl Dispatcher {
    pub fn spawn(
        name: &str,
        tick_interval: Option<Duration>,
        tx: Sender<Message>,
        rx: Receiver<Message>,
        processor: Arc<dyn EventProcessor>,
        listener: Box<dyn GattListener>,
    ) -> io::Result<Self> {
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(rx, tick_interval, processor, listener))?;
        let thread_id = thread.thread().id();

        Ok(Self {
            tx,
            thread: Some(thread),
            thread_id,
        })
    }

    pub fn sink(&self) -> EventSink {
        EventSink::new(self.tx.clone())
    }

    pub fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Block until everything queued before this call has been handled,
    /// including deliveries produced while processing it.
    /// Returns immediately when called from the dispatcher thread itself.
    pub fn flush(&self) {
        if self.is_dispatch_thread() {
            return;
        }
        // Deliveries produced by the first pass land behind its marker.
        for _ in 0..2 {
            let (ack_tx, ack_rx) = mpsc::sync_channel(1);
            if self.tx.send(Message::Flush(ack_tx)).is_err() || ack_rx.recv().is_err() {
                return;
            }
        }
    }

    /// Deliver what is already queued, then stop the thread
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
        if let Some(thread) = self.thread.take() {
            if self.is_dispatch_thread() {
                return;
            }
            if thread.join().is_err() {
                log::error!("Dispatcher thread panicked");
            }
        }
    }
}

fn run(
    rx: Receiver<Message>,
    tick_interval: Option<Duration>,
    processor: Arc<dyn EventProcessor>,
    mut listener: Box<dyn GattListener>,
) {
    debug!("Dispatcher started");
    let mut last_tick = Instant::now();

    loop {
        let message = match tick_interval {
            Some(interval) => match rx.recv_timeout(interval) {
                Ok(message) => Some(message),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(message) => Some(message),
                Err(_) => break,
            },
        };

        match message {
            Some(Message::Transport(event)) => {
                trace!("Transport event: {:?}", event);
                processor.process(event);
            }
            Some(Message::Deliver(event)) => listener.on_event(event),
            Some(Message::Flush(ack)) => {
                let _ = ack.send(());
            }
            Some(Message::Shutdown) => break,
            None => {}
        }

        // A steady stream of messages must not starve the watchdog.
        if let Some(interval) = tick_interval {
            let now = Instant::now();
            if now.saturating_duration_since(last_tick) >= interval {
                last_tick = now;
                processor.tick(now);
            }
        }
    }

    debug!("Dispatcher stopped");
}

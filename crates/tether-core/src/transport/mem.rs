//! In-process transport pair.
//!
//! This is the reference transport: text sent on one side is delivered to the
//! other side's on-message callback from a pump task, never synchronously from
//! `send`. Both sides start out [`ReadyState::Connecting`]; tests drive the
//! lifecycle with [`MemTransport::open`] and [`MemTransport::close`].

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{EventSlot, ReadyState, Transport, TransportEvents};
use crate::TransportError;

#[derive(Debug)]
enum Wire {
    Text(String),
    Close,
}

#[derive(Clone, Debug)]
pub struct MemTransport {
    inner: Arc<MemInner>,
}

#[derive(Debug)]
struct MemInner {
    /// Frames to the peer.
    tx: mpsc::UnboundedSender<Wire>,
    state: Mutex<ReadyState>,
    events: EventSlot,
}

impl MemTransport {
    /// Create a connected pair. Must be called inside a Tokio runtime.
    ///
    /// Returns (A, B) where text sent on A is received on B and vice versa.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self::new(tx_b);
        let b = Self::new(tx_a);

        tokio::spawn(pump(Arc::downgrade(&a.inner), rx_a));
        tokio::spawn(pump(Arc::downgrade(&b.inner), rx_b));

        (a, b)
    }

    /// Like [`pair`](Self::pair), with both sides already open.
    pub fn open_pair() -> (Self, Self) {
        let (a, b) = Self::pair();
        a.set_state(ReadyState::Open);
        b.set_state(ReadyState::Open);
        (a, b)
    }

    fn new(tx: mpsc::UnboundedSender<Wire>) -> Self {
        Self {
            inner: Arc::new(MemInner {
                tx,
                state: Mutex::new(ReadyState::Connecting),
                events: EventSlot::new(),
            }),
        }
    }

    fn set_state(&self, state: ReadyState) {
        *self.inner.state.lock() = state;
    }

    /// Transition to open and fire on-open.
    pub fn open(&self) {
        self.set_state(ReadyState::Open);
        self.inner.events.fire_open();
    }

    /// Report a transport error through on-error without changing state.
    pub fn fail(&self, error: TransportError) {
        self.inner.events.fire_error(error);
    }
}

impl Transport for MemTransport {
    fn ready_state(&self) -> ReadyState {
        *self.inner.state.lock()
    }

    fn send(&self, text: &str) -> Result<(), TransportError> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::NotOpen);
        }
        self.inner
            .tx
            .send(Wire::Text(text.to_owned()))
            .map_err(|_| TransportError::Closed)
    }

    fn attach(&self, events: TransportEvents) {
        self.inner.events.attach(events);
    }

    fn detach(&self) {
        self.inner.events.detach();
    }

    /// Close both sides; each fires on-close.
    fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == ReadyState::Closed {
                return;
            }
            *state = ReadyState::Closed;
        }
        let _ = self.inner.tx.send(Wire::Close);
        self.inner.events.fire_close();
    }
}

async fn pump(inner: Weak<MemInner>, mut rx: mpsc::UnboundedReceiver<Wire>) {
    while let Some(wire) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match wire {
            Wire::Text(text) => {
                if *inner.state.lock() != ReadyState::Open {
                    tracing::trace!(len = text.len(), "mem transport not open; dropping message");
                    continue;
                }
                inner.events.fire_message(text);
            }
            Wire::Close => {
                let was_closed = {
                    let mut state = inner.state.lock();
                    std::mem::replace(&mut *state, ReadyState::Closed) == ReadyState::Closed
                };
                if !was_closed {
                    inner.events.fire_close();
                }
            }
        }
    }
}

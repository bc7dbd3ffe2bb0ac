//! The transport contract consumed by [`ConnectionBinding`](crate::ConnectionBinding).
//!
//! A transport is one message-oriented connection (typically a WebSocket).
//! It exposes a readiness state, a `send` that is only valid while open, and
//! four attachable callbacks. Creating and reconnecting transports is the
//! caller's business; the binding only attaches to and detaches from them.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::TransportError;

/// Readiness of a transport, mirroring the WebSocket `readyState` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

type Callback = Box<dyn Fn() + Send + Sync>;
type MessageCallback = Box<dyn Fn(String) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(TransportError) + Send + Sync>;

/// The four callbacks a binding attaches to its transport.
pub struct TransportEvents {
    pub on_open: Callback,
    pub on_message: MessageCallback,
    pub on_error: ErrorCallback,
    pub on_close: Callback,
}

impl TransportEvents {
    /// Callbacks that ignore everything.
    pub fn noop() -> Self {
        Self {
            on_open: Box::new(|| {}),
            on_message: Box::new(|_| {}),
            on_error: Box::new(|_| {}),
            on_close: Box::new(|| {}),
        }
    }
}

impl std::fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportEvents").finish_non_exhaustive()
    }
}

/// A message-oriented connection.
///
/// Implementations must not invoke any attached callback synchronously from
/// inside [`send`](Transport::send); inbound delivery happens from the
/// transport's own task.
pub trait Transport: Send + Sync + 'static {
    fn ready_state(&self) -> ReadyState;

    /// Transmit one text message. Only valid while [`ReadyState::Open`].
    fn send(&self, text: &str) -> Result<(), TransportError>;

    /// Attach callbacks, replacing any previously attached set.
    fn attach(&self, events: TransportEvents);

    /// Detach all callbacks. Safe to call when none are attached.
    fn detach(&self);

    /// Begin closing the connection.
    fn close(&self);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn ready_state(&self) -> ReadyState {
        (**self).ready_state()
    }

    fn send(&self, text: &str) -> Result<(), TransportError> {
        (**self).send(text)
    }

    fn attach(&self, events: TransportEvents) {
        (**self).attach(events)
    }

    fn detach(&self) {
        (**self).detach()
    }

    fn close(&self) {
        (**self).close()
    }
}

/// Storage for attached callbacks, shared by transport implementations.
///
/// Callers clone the current set out with [`EventSlot::current`] and invoke
/// it after the lock is released, so a callback may detach or re-attach.
#[derive(Default)]
pub struct EventSlot {
    events: RwLock<Option<Arc<TransportEvents>>>,
}

impl EventSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, events: TransportEvents) {
        *self.events.write() = Some(Arc::new(events));
    }

    pub fn detach(&self) {
        self.events.write().take();
    }

    pub fn current(&self) -> Option<Arc<TransportEvents>> {
        self.events.read().clone()
    }

    pub fn fire_open(&self) {
        if let Some(events) = self.current() {
            (events.on_open)();
        }
    }

    pub fn fire_message(&self, text: String) {
        if let Some(events) = self.current() {
            (events.on_message)(text);
        }
    }

    pub fn fire_error(&self, error: TransportError) {
        if let Some(events) = self.current() {
            (events.on_error)(error);
        }
    }

    pub fn fire_close(&self) {
        if let Some(events) = self.current() {
            (events.on_close)();
        }
    }
}

impl std::fmt::Debug for EventSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSlot")
            .field("attached", &self.events.read().is_some())
            .finish()
    }
}

pub mod mem;

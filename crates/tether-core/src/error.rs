//! Error types.

use std::time::Duration;

use serde_json::Value;

/// Transport-level errors.
///
/// These are reported through the transport's on-error callback. They never
/// settle pending requests on their own; only a reply or a timeout does.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not open")]
    NotOpen,
    #[error("transport closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(String),
}

/// Inbound wire data that could not be decoded into a [`Message`](crate::Message).
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid wire message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event name must be a string or null, got {0}")]
    EventName(Value),
}

/// Why a [`RequestHandle`](crate::RequestHandle) settled without a result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// No reply arrived within the configured window.
    #[error("request {request_id} timed out after {timeout:?}")]
    Timeout {
        request_id: String,
        timeout: Duration,
    },
    /// The peer answered with an explicit rejection; the payload is verbatim.
    #[error("peer rejected request: {0}")]
    Peer(Value),
    /// The binding went away before the request settled.
    #[error("request abandoned before it settled")]
    Abandoned,
}

/// Failure raised by an event or RPC handler.
///
/// When an RPC handler fails, the payload is sent back to the remote caller
/// as the `e` field of the rejection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("handler failed: {payload}")]
pub struct HandlerError {
    payload: Value,
}

impl HandlerError {
    /// Build an error carrying an arbitrary payload.
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Build an error whose payload is `{"message": <message>}`.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(serde_json::json!({ "message": message.into() }))
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }
}

/// One or more handlers failed during [`EventDispatcher::emit`](crate::EventDispatcher::emit).
///
/// Every registered handler still ran; this only collects the failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{} of {delivered} handler(s) for {event:?} failed", failures.len())]
pub struct DispatchError {
    pub event: String,
    pub delivered: usize,
    pub failures: Vec<HandlerError>,
}

//! tether: bidirectional events and request/response over one message connection.
//!
//! # Quick Start
//!
//! ```ignore
//! use tether::prelude::*;
//!
//! tether::init_tracing();
//!
//! let binding = ConnectionBinding::new(WebSocketTransport::connect("ws://127.0.0.1:9000/"));
//! let math = binding.channel().of("math");
//!
//! // Answer requests for "math/add".
//! let add = RpcHandler::new(|args: Vec<Value>| async move {
//!     let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
//!     Ok(json!(sum))
//! });
//! let _subscription = math.on("add", &add);
//!
//! // Fire and forget; queued until the socket opens.
//! math.emit("hello", vec![json!("world")]);
//!
//! // Ask the peer; resolves with its reply, or fails with its error or a timeout.
//! let product = math.request("mul", vec![json!(6), json!(7)]).await?;
//! ```
//!
//! # Channels
//!
//! A [`Channel`] prefixes event names with its path, so `of("math").on("add", ..)`
//! listens for `math/add`. Children are created on first use and cached.
//!
//! # Reconnecting
//!
//! The binding owns the outbound queue and the pending requests. When the
//! socket drops, bind a fresh one with [`ConnectionBinding::rebind`]; queued
//! messages are flushed once it opens and outstanding requests can still be
//! answered.
//!
//! # Error Handling
//!
//! Requests settle with `Result<Value, RequestError>`:
//!
//! ```ignore
//! match binding.send_request("div", vec![json!(1), json!(0)]).await {
//!     Ok(value) => println!("result: {value}"),
//!     Err(RequestError::Peer(error)) => eprintln!("peer rejected: {error}"),
//!     Err(RequestError::Timeout { request_id, .. }) => eprintln!("{request_id} timed out"),
//!     Err(e) => eprintln!("request failed: {e}"),
//! }
//! ```

#![forbid(unsafe_code)]

pub use tether_core::{
    BindingConfig, Channel, ConnectionBinding, DecodeError, DispatchError, EventDispatcher,
    EventSlot, Handler, HandlerError, HandlerId, IdProvider, MemTransport, Message, ReadyState,
    RequestError, RequestHandle, RpcHandler, Subscription, Transport, TransportError,
    TransportEvents, UuidProvider, codec,
};
pub use tether_core::{DEFAULT_REQUEST_TIMEOUT, REQUEST_TIMEOUT_ENV};

pub use serde_json;

/// Transport implementations.
pub mod transport {
    pub use tether_core::MemTransport;

    #[cfg(feature = "websocket")]
    pub use tether_transport_websocket::{TransportParts, WebSocketDriver, WebSocketTransport};
}

#[cfg(feature = "websocket")]
pub use transport::WebSocketTransport;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use tether::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        BindingConfig, Channel, ConnectionBinding, HandlerError, RequestError, RpcHandler,
        Transport,
    };
    pub use serde_json::{Value, json};

    #[cfg(feature = "websocket")]
    pub use crate::WebSocketTransport;
}

/// Install a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `warn`.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

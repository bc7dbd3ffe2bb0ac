//! tether-core: Core types for the tether event and request protocol.
//!
//! This crate defines:
//! - The wire message and its JSON codec ([`Message`], [`codec::encode`], [`codec::decode`])
//! - The named-handler registry ([`EventDispatcher`], [`Handler`], [`Subscription`])
//! - The protocol session over one transport ([`ConnectionBinding`], [`RpcHandler`], [`RequestHandle`])
//! - Hierarchical namespaces ([`Channel`])
//! - The transport contract ([`Transport`], [`TransportEvents`], [`ReadyState`]) and
//!   an in-process implementation ([`MemTransport`])
//! - Correlation ids ([`IdProvider`], [`UuidProvider`]) and configuration ([`BindingConfig`])

#![forbid(unsafe_code)]

mod binding;
mod channel;
pub mod codec;
mod config;
mod dispatcher;
mod error;
mod id;
mod request;
mod transport;

#[cfg(test)]
mod proptests;

pub use binding::*;
pub use channel::*;
pub use codec::Message;
pub use config::*;
pub use dispatcher::{EventDispatcher, Handler, HandlerId, Subscription};
pub use error::*;
pub use id::*;
pub use request::RequestHandle;
pub use transport::mem::MemTransport;
pub use transport::{EventSlot, ReadyState, Transport, TransportEvents};

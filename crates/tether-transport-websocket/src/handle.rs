//! Handle + driver for a tokio-tungstenite WebSocket.
//!
//! - [`WebSocketTransport`]: cloneable handle implementing [`Transport`]
//! - [`WebSocketDriver`]: future that owns the socket and runs the I/O loop
//!
//! Text that arrives before the first [`Transport::attach`] is held and
//! replayed, in order, to the first attached callbacks, so the driver may be
//! spawned before a binding exists. Build the binding with
//! `ConnectionBinding::unbound` and register handlers before binding if the
//! replay must reach them.
//!
//! ```ignore
//! let (ws, _) = tokio_tungstenite::accept_async(tcp).await?;
//! let parts = WebSocketTransport::from_stream(ws);
//! tokio::spawn(parts.driver);
//! let binding = ConnectionBinding::unbound(BindingConfig::default());
//! install_handlers(&binding);
//! binding.rebind(parts.handle);
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tether_core::{EventSlot, ReadyState, Transport, TransportError, TransportEvents};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// The I/O loop for one socket. Must be spawned or polled by the caller.
pub type WebSocketDriver = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send>>;

/// A handle and the driver that serves it.
pub struct TransportParts {
    pub handle: WebSocketTransport,
    pub driver: WebSocketDriver,
}

/// Outbound messages from handle to driver.
#[derive(Debug)]
enum OutboundMsg {
    Text(String),
    Close,
}

/// State shared between the handles and the driver.
#[derive(Debug)]
struct Shared {
    state: Mutex<ReadyState>,
    events: EventSlot,
    /// Inbound text held until the first attach; `None` once replayed.
    backlog: Mutex<Option<VecDeque<String>>>,
}

impl Shared {
    fn new(state: ReadyState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            events: EventSlot::new(),
            backlog: Mutex::new(Some(VecDeque::new())),
        })
    }

    /// Hand inbound text to on-message, or hold it while nothing has attached yet.
    fn deliver(&self, text: String) {
        {
            let mut backlog = self.backlog.lock();
            if let Some(held) = backlog.as_mut() {
                held.push_back(text);
                return;
            }
        }
        self.events.fire_message(text);
    }

    fn attach(&self, events: TransportEvents) {
        self.events.attach(events);
        // The backlog stays in place while replaying so the driver keeps
        // appending behind it; it is retired only once drained.
        loop {
            let next = {
                let mut backlog = self.backlog.lock();
                let Some(held) = backlog.as_mut() else {
                    return;
                };
                match held.pop_front() {
                    Some(text) => text,
                    None => {
                        *backlog = None;
                        return;
                    }
                }
            };
            tracing::trace!(len = next.len(), "replaying text received before attach");
            self.events.fire_message(next);
        }
    }

    fn state(&self) -> ReadyState {
        *self.state.lock()
    }

    fn set_state(&self, state: ReadyState) {
        *self.state.lock() = state;
    }

    fn opened(&self) {
        self.set_state(ReadyState::Open);
        self.events.fire_open();
    }

    /// Enter Closed and fire on-close once.
    fn closed(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), ReadyState::Closed);
        if previous != ReadyState::Closed {
            self.events.fire_close();
        }
    }

    fn failed(&self, message: String) -> Result<(), TransportError> {
        tracing::warn!(error = %message, "websocket failed");
        let error = TransportError::Io(message);
        self.events.fire_error(error.clone());
        self.closed();
        Err(error)
    }
}

/// WebSocket transport handle.
///
/// Cloneable; clones share one connection. The connection closes gracefully
/// once every handle is dropped.
#[derive(Clone, Debug)]
pub struct WebSocketTransport {
    out_tx: mpsc::UnboundedSender<OutboundMsg>,
    shared: Arc<Shared>,
}

impl WebSocketTransport {
    /// Connect to `url` in the background. Must be called inside a Tokio runtime.
    ///
    /// The returned handle starts [`ReadyState::Connecting`] and fires on-open
    /// once the handshake completes. A failed handshake fires on-error and
    /// on-close.
    pub fn connect(url: impl Into<String>) -> Self {
        let url = url.into();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let shared = Shared::new(ReadyState::Connecting);

        tokio::spawn({
            let shared = shared.clone();
            async move {
                tracing::debug!(%url, "websocket connecting");
                match tokio_tungstenite::connect_async(url.as_str()).await {
                    Ok((ws, _response)) => {
                        if shared.state() != ReadyState::Connecting {
                            // Closed while the handshake was in flight.
                            let mut ws = ws;
                            let _ = ws.close(None).await;
                            shared.closed();
                            return Ok(());
                        }
                        tracing::debug!(%url, "websocket open");
                        shared.opened();
                        run_driver(ws, out_rx, shared).await
                    }
                    Err(e) => shared.failed(e.to_string()),
                }
            }
        });

        Self { out_tx, shared }
    }

    /// Wrap an already-upgraded socket. The handle starts [`ReadyState::Open`].
    pub fn from_stream<S>(ws: WebSocketStream<S>) -> TransportParts
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let shared = Shared::new(ReadyState::Open);

        let driver: WebSocketDriver = Box::pin(run_driver(ws, out_rx, shared.clone()));
        TransportParts {
            handle: Self { out_tx, shared },
            driver,
        }
    }
}

impl Transport for WebSocketTransport {
    fn ready_state(&self) -> ReadyState {
        self.shared.state()
    }

    fn send(&self, text: &str) -> Result<(), TransportError> {
        match self.shared.state() {
            ReadyState::Open => {}
            ReadyState::Connecting => return Err(TransportError::NotOpen),
            ReadyState::Closing | ReadyState::Closed => return Err(TransportError::Closed),
        }
        self.out_tx
            .send(OutboundMsg::Text(text.to_owned()))
            .map_err(|_| TransportError::Closed)
    }

    fn attach(&self, events: TransportEvents) {
        self.shared.attach(events);
    }

    fn detach(&self) {
        self.shared.events.detach();
    }

    fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            if matches!(*state, ReadyState::Closing | ReadyState::Closed) {
                return;
            }
            *state = ReadyState::Closing;
        }
        // Best-effort; a gone driver means the socket is already down.
        let _ = self.out_tx.send(OutboundMsg::Close);
    }
}

/// The WebSocket driver loop.
async fn run_driver<S>(
    mut ws: WebSocketStream<S>,
    mut out_rx: mpsc::UnboundedReceiver<OutboundMsg>,
    shared: Arc<Shared>,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        tokio::select! {
            biased;

            msg = out_rx.recv() => {
                match msg {
                    Some(OutboundMsg::Text(text)) => {
                        if let Err(e) = ws.send(WsMessage::text(text)).await {
                            return shared.failed(e.to_string());
                        }
                    }
                    // Close requested, or every handle dropped.
                    Some(OutboundMsg::Close) | None => {
                        shared.set_state(ReadyState::Closing);
                        let _ = ws.close(None).await;
                        shared.closed();
                        return Ok(());
                    }
                }
            }

            incoming = ws.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        shared.deliver(text.as_str().to_owned());
                    }
                    Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => shared.deliver(text),
                        Err(_) => {
                            tracing::warn!(len = data.len(), "dropping binary frame that is not UTF-8");
                        }
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        tracing::debug!(?frame, "websocket closed by peer");
                        shared.closed();
                        return Ok(());
                    }
                    // Ping, pong and raw frames.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return shared.failed(e.to_string()),
                    None => {
                        shared.closed();
                        return Ok(());
                    }
                }
            }
        }
    }
}

static_assertions::assert_impl_all!(WebSocketTransport: Send, Sync, Clone);

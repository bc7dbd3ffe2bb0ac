//! ConnectionBinding: the protocol session bound to one transport at a time.
//!
//! The binding owns everything with protocol state: the outbound queue, the
//! table of outstanding requests, the event dispatcher, and a per-connection
//! state store. The transport is a swappable resource; [`ConnectionBinding::rebind`]
//! moves the session onto a new connection without losing queued messages or
//! pending requests.
//!
//! # Architecture
//!
//! ```text
//!   send_event / send_request / send_resolve / send_reject
//!                        │
//!                    encode (codec)
//!                        │
//!            ┌───────────▼────────────┐
//!            │ open? send : queue      │──── on-open ──▶ flush queue (FIFO)
//!            └────────────────────────┘
//!
//!   on-message ──▶ decode ──▶ pending id? settle ──▶ dispatch under event name ("" for replies)
//! ```
//!
//! Locks are never held while user handlers run. The outbound lock is held
//! across a flush and a send so submission order is the wire order.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::dispatcher::panic_message;
use crate::request::{PendingRequest, RequestTable};
use crate::{
    BindingConfig, Channel, EventDispatcher, Handler, HandlerError, HandlerId, IdProvider,
    Message, ReadyState, RequestError, RequestHandle, Subscription, Transport, TransportError,
    TransportEvents, UuidProvider, codec,
};

/// How many fresh ids to try when the provider hands out one that is already pending.
const MAX_ID_ATTEMPTS: usize = 8;

type RpcFn = dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync;

/// A handler for inbound events and requests.
///
/// It receives the message's positional arguments. When the inbound message
/// was a request, the returned value is sent back as the reply, and an error
/// is sent back as the rejection.
///
/// Identity is preserved across clones, which is what
/// [`ConnectionBinding::off`] matches on.
#[derive(Clone)]
pub struct RpcHandler {
    inner: Arc<RpcFn>,
}

impl RpcHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |args| f(args).boxed()),
        }
    }

    pub fn id(&self) -> HandlerId {
        HandlerId::of(&self.inner)
    }

    fn call(&self, args: Vec<Value>) -> BoxFuture<'static, Result<Value, HandlerError>> {
        (self.inner)(args)
    }
}

impl std::fmt::Debug for RpcHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RpcHandler").field(&self.id()).finish()
    }
}

struct Outbound {
    transport: Option<Arc<dyn Transport>>,
    queue: VecDeque<String>,
    /// Bumped on every rebind; callbacks from older transports are ignored.
    generation: u64,
}

impl Outbound {
    fn open_transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport
            .as_ref()
            .filter(|t| t.ready_state() == ReadyState::Open)
            .cloned()
    }

    /// Send queued messages front to back. Returns false if one failed and
    /// was left at the front.
    fn drain_into(&mut self, transport: &dyn Transport) -> bool {
        while let Some(wire) = self.queue.front() {
            if let Err(error) = transport.send(wire) {
                tracing::warn!(%error, queued = self.queue.len(), "flush interrupted; message kept queued");
                return false;
            }
            self.queue.pop_front();
        }
        true
    }
}

struct BindingInner {
    config: BindingConfig,
    ids: Box<dyn IdProvider>,
    outbound: Mutex<Outbound>,
    requests: Mutex<RequestTable>,
    dispatcher: EventDispatcher<Message>,
    state: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl Drop for BindingInner {
    fn drop(&mut self) {
        if let Some(transport) = self.outbound.get_mut().transport.take() {
            transport.detach();
        }
    }
}

/// A protocol session over one transport connection.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct ConnectionBinding {
    inner: Arc<BindingInner>,
}

impl ConnectionBinding {
    /// Bind `transport` with the default configuration and random UUID ids.
    pub fn new(transport: impl Transport) -> Self {
        Self::with_config(transport, BindingConfig::default())
    }

    pub fn with_config(transport: impl Transport, config: BindingConfig) -> Self {
        Self::with_id_provider(transport, config, UuidProvider)
    }

    pub fn with_id_provider(
        transport: impl Transport,
        config: BindingConfig,
        ids: impl IdProvider,
    ) -> Self {
        let binding = Self::build(config, Box::new(ids));
        binding.rebind(transport);
        binding
    }

    /// A binding with no transport yet; it reports [`ReadyState::Closed`] and
    /// queues everything sent until [`rebind`](Self::rebind).
    ///
    /// Register handlers first, then bind, when the transport may already
    /// hold inbound messages that it replays on attach.
    pub fn unbound(config: BindingConfig) -> Self {
        Self::build(config, Box::new(UuidProvider))
    }

    fn build(config: BindingConfig, ids: Box<dyn IdProvider>) -> Self {
        Self {
            inner: Arc::new(BindingInner {
                config,
                ids,
                outbound: Mutex::new(Outbound {
                    transport: None,
                    queue: VecDeque::new(),
                    generation: 0,
                }),
                requests: Mutex::new(RequestTable::default()),
                dispatcher: EventDispatcher::new(),
                state: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The root channel over this binding.
    pub fn channel(&self) -> Channel {
        Channel::root(self.clone())
    }

    pub fn config(&self) -> &BindingConfig {
        &self.inner.config
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Readiness of the bound transport.
    pub fn state(&self) -> ReadyState {
        self.inner
            .outbound
            .lock()
            .transport
            .as_ref()
            .map_or(ReadyState::Closed, |t| t.ready_state())
    }

    pub fn is_connecting(&self) -> bool {
        self.state() == ReadyState::Connecting
    }

    pub fn is_open(&self) -> bool {
        self.state() == ReadyState::Open
    }

    pub fn is_closing(&self) -> bool {
        self.state() == ReadyState::Closing
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ReadyState::Closed
    }

    /// Move the session onto `transport`.
    ///
    /// Detaches every callback from the previously bound transport, attaches
    /// to the new one, and flushes the queue right away if it is already open.
    /// Queued messages and pending requests carry over.
    pub fn rebind(&self, transport: impl Transport) {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let generation = {
            let mut outbound = self.inner.outbound.lock();
            if let Some(previous) = outbound.transport.take() {
                previous.detach();
            }
            outbound.generation += 1;
            outbound.transport = Some(transport.clone());
            outbound.generation
        };

        transport.attach(self.transport_events(generation));
        tracing::debug!(
            generation,
            state = ?transport.ready_state(),
            queued = self.queued_len(),
            pending = self.inner.requests.lock().len(),
            "transport bound"
        );

        if transport.ready_state() == ReadyState::Open {
            self.flush();
        }
    }

    /// Ask the bound transport to close.
    pub fn close(&self) {
        let transport = self.inner.outbound.lock().transport.clone();
        if let Some(transport) = transport {
            transport.close();
        }
    }

    fn transport_events(&self, generation: u64) -> TransportEvents {
        let weak = Arc::downgrade(&self.inner);

        TransportEvents {
            on_open: Box::new({
                let weak = weak.clone();
                move || {
                    if let Some(binding) = Self::live(&weak, generation) {
                        tracing::debug!(generation, "transport open");
                        binding.flush();
                    }
                }
            }),
            on_message: Box::new({
                let weak = weak.clone();
                move |text: String| {
                    if let Some(binding) = Self::live(&weak, generation) {
                        binding.receive(&text);
                    }
                }
            }),
            on_error: Box::new({
                let weak = weak.clone();
                move |error: TransportError| {
                    if Self::live(&weak, generation).is_some() {
                        tracing::warn!(generation, %error, "transport error");
                    }
                }
            }),
            on_close: Box::new(move || {
                if let Some(binding) = Self::live(&weak, generation) {
                    tracing::debug!(
                        generation,
                        queued = binding.queued_len(),
                        pending = binding.pending_ids().len(),
                        "transport closed"
                    );
                }
            }),
        }
    }

    /// Upgrade a callback's binding reference, unless the callback belongs to
    /// a transport that has since been replaced.
    fn live(weak: &Weak<BindingInner>, generation: u64) -> Option<Self> {
        let inner = weak.upgrade()?;
        let current = inner.outbound.lock().generation;
        if current != generation {
            tracing::trace!(generation, current, "ignoring callback from stale transport");
            return None;
        }
        Some(Self { inner })
    }

    fn flush(&self) {
        let mut outbound = self.inner.outbound.lock();
        let Some(transport) = outbound.open_transport() else {
            return;
        };
        let queued = outbound.queue.len();
        if queued == 0 {
            return;
        }
        outbound.drain_into(transport.as_ref());
        tracing::debug!(
            flushed = queued - outbound.queue.len(),
            remaining = outbound.queue.len(),
            "outbound queue flushed"
        );
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Transmit a wire message now if the transport is open, else queue it.
    pub fn send(&self, wire: String) {
        let mut outbound = self.inner.outbound.lock();
        if let Some(transport) = outbound.open_transport() {
            // Anything still queued goes first.
            if outbound.drain_into(transport.as_ref()) {
                match transport.send(&wire) {
                    Ok(()) => {
                        tracing::trace!(len = wire.len(), "message sent");
                        return;
                    }
                    Err(error) => {
                        tracing::warn!(%error, "send failed; message queued");
                    }
                }
            }
        }
        outbound.queue.push_back(wire);
        tracing::trace!(queued = outbound.queue.len(), "message queued");
    }

    /// Send a fire-and-forget event.
    pub fn send_event(&self, event_name: impl Into<String>, args: Vec<Value>) {
        self.send(codec::encode(&Message::event(event_name, args)));
    }

    /// Send a request and return a handle that settles with the reply.
    ///
    /// The request times out after the configured
    /// [`request_timeout`](BindingConfig::request_timeout) unless that is zero.
    /// Timeouts need a Tokio runtime; without one the request waits forever.
    pub fn send_request(&self, event_name: impl Into<String>, args: Vec<Value>) -> RequestHandle {
        let event_name = event_name.into();
        let (tx, rx) = oneshot::channel();

        let request_id = {
            let mut requests = self.inner.requests.lock();
            let request_id = self.fresh_id(&requests);
            let timer = self.arm_timeout(&request_id);
            requests.insert(request_id.clone(), PendingRequest::new(tx, timer));
            request_id
        };

        tracing::debug!(request_id = %request_id, event = %event_name, "request sent");
        self.send(codec::encode(&Message::request(
            request_id.clone(),
            event_name,
            args,
        )));

        RequestHandle::new(request_id, rx)
    }

    fn fresh_id(&self, requests: &RequestTable) -> String {
        let mut id = self.inner.ids.next_id();
        for _ in 1..MAX_ID_ATTEMPTS {
            if !requests.contains(&id) {
                break;
            }
            id = self.inner.ids.next_id();
        }
        if requests.contains(&id) {
            tracing::warn!(request_id = %id, "id provider keeps returning a pending id; previous request abandoned");
        }
        id
    }

    fn arm_timeout(&self, request_id: &str) -> Option<tokio::task::JoinHandle<()>> {
        let timeout = self.inner.config.request_timeout;
        if timeout.is_zero() {
            return None;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(expire(
                Arc::downgrade(&self.inner),
                request_id.to_owned(),
                timeout,
            ))),
            Err(_) => {
                tracing::warn!(request_id, "no Tokio runtime; request timeout disabled");
                None
            }
        }
    }

    /// Answer an inbound request successfully.
    pub fn send_resolve(&self, request_id: impl Into<String>, data: Value) {
        self.send(codec::encode(&Message::resolve(request_id, data)));
    }

    /// Answer an inbound request with an error.
    pub fn send_reject(&self, request_id: impl Into<String>, error: Value) {
        self.send(codec::encode(&Message::reject(request_id, error)));
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Handle one inbound wire message.
    ///
    /// Called by the transport's on-message callback. Undecodable input is
    /// dropped with a warning. A reply settles its pending request; every
    /// decoded message is then dispatched under its event name, or `""` for
    /// pure replies.
    pub fn receive(&self, raw: &str) {
        let message = match codec::decode(raw) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(%error, len = raw.len(), "dropping undecodable message");
                return;
            }
        };

        tracing::trace!(
            request_id = ?message.request_id,
            event = ?message.event_name,
            args = message.args.len(),
            "message received"
        );

        if let Some(request_id) = &message.request_id {
            let pending = self.inner.requests.lock().take(request_id);
            match pending {
                Some(pending) => {
                    let result = match &message.error {
                        Some(error) => Err(RequestError::Peer(error.clone())),
                        None => Ok(message.data.clone().unwrap_or(Value::Null)),
                    };
                    tracing::debug!(request_id = %request_id, ok = result.is_ok(), "request settled");
                    pending.settle(result);
                }
                None if message.is_reply() => {
                    tracing::debug!(request_id = %request_id, "reply for unknown request");
                }
                None => {}
            }
        }

        let event = message.event_name.as_deref().unwrap_or("");
        if let Err(error) = self.inner.dispatcher.emit(event, &message) {
            tracing::debug!(%error, "inbound dispatch finished with handler failures");
        }
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    /// Register `handler` for inbound messages named `event_name`.
    ///
    /// The handler runs on a spawned Tokio task with the message's args. If
    /// the inbound message was a request, its result is sent back with
    /// [`send_resolve`](Self::send_resolve), or its error with
    /// [`send_reject`](Self::send_reject). Handler errors and panics are
    /// logged at `error` level either way; the spawned task is detached, so
    /// nothing else observes them.
    pub fn on(&self, event_name: impl Into<String>, handler: &RpcHandler) -> Subscription {
        let weak = Arc::downgrade(&self.inner);
        let rpc = handler.clone();

        let wrapped = Handler::new(move |message: &Message| {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            let binding = ConnectionBinding { inner };
            let request_id = message.request_id.clone();

            let runtime = match tokio::runtime::Handle::try_current() {
                Ok(runtime) => runtime,
                Err(_) => {
                    let error = HandlerError::message("no Tokio runtime to run the handler on");
                    if let Some(request_id) = request_id {
                        binding.send_reject(request_id, error.payload().clone());
                    }
                    return Err(error);
                }
            };

            let event = message.event_name.clone().unwrap_or_default();
            let future = rpc.call(message.args.clone());
            runtime.spawn(binding.answer(event, request_id, future));
            Ok(())
        });

        self.inner
            .dispatcher
            .register(event_name.into(), handler.id(), wrapped, false)
    }

    /// Remove the registration of `handler` under `event_name`.
    pub fn off(&self, event_name: &str, handler: &RpcHandler) -> bool {
        self.inner.dispatcher.off_key(event_name, handler.id())
    }

    async fn answer(
        self,
        event: String,
        request_id: Option<String>,
        future: BoxFuture<'static, Result<Value, HandlerError>>,
    ) -> Result<(), HandlerError> {
        let result = match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::message(panic_message(panic.as_ref()))),
        };

        match result {
            Ok(data) => {
                if let Some(request_id) = request_id {
                    self.send_resolve(request_id, data);
                }
                Ok(())
            }
            Err(error) => {
                if let Some(request_id) = &request_id {
                    self.send_reject(request_id.clone(), error.payload().clone());
                }
                tracing::error!(event = %event, request_id = ?request_id, %error, "handler failed");
                Err(error)
            }
        }
    }

    /// The message-level registry every inbound message is dispatched through.
    ///
    /// Handlers registered here see the whole [`Message`], including the
    /// request id, and are invoked synchronously. Replies are dispatched
    /// under the empty event name.
    pub fn dispatcher(&self) -> &EventDispatcher<Message> {
        &self.inner.dispatcher
    }

    // ========================================================================
    // State store + diagnostics
    // ========================================================================

    /// Read a value from the per-connection state store.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.inner.state.lock().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    /// Store a value in the per-connection state store.
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.inner.state.lock().insert(key.into(), Arc::new(value));
    }

    /// Number of wire messages waiting for the transport to open.
    pub fn queued_len(&self) -> usize {
        self.inner.outbound.lock().queue.len()
    }

    /// Ids of requests still awaiting a reply, sorted.
    pub fn pending_ids(&self) -> Vec<String> {
        self.inner.requests.lock().ids()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ConnectionBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionBinding")
            .field("state", &self.state())
            .field("queued", &self.queued_len())
            .field("pending", &self.inner.requests.lock().len())
            .finish_non_exhaustive()
    }
}

async fn expire(inner: Weak<BindingInner>, request_id: String, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let pending = inner.requests.lock().take(&request_id);
    if let Some(pending) = pending {
        tracing::warn!(request_id = %request_id, ?timeout, "request timed out waiting for reply");
        pending.expire(RequestError::Timeout {
            request_id,
            timeout,
        });
    }
}

static_assertions::assert_impl_all!(ConnectionBinding: Send, Sync, Clone);
static_assertions::assert_impl_all!(RpcHandler: Send, Sync, Clone);

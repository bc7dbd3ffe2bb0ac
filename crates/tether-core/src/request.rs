//! Outstanding requests, keyed by correlation id.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::RequestError;

pub(crate) type Settlement = Result<Value, RequestError>;

/// Bookkeeping for one request awaiting its reply.
pub(crate) struct PendingRequest {
    tx: oneshot::Sender<Settlement>,
    timer: Option<JoinHandle<()>>,
}

impl PendingRequest {
    pub(crate) fn new(tx: oneshot::Sender<Settlement>, timer: Option<JoinHandle<()>>) -> Self {
        Self { tx, timer }
    }

    /// Settle with a reply, cancelling the timer.
    pub(crate) fn settle(self, result: Settlement) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        // The caller may have dropped its handle; nobody is left to tell.
        let _ = self.tx.send(result);
    }

    /// Settle from inside the timer task itself.
    pub(crate) fn expire(self, error: RequestError) {
        let _ = self.tx.send(Err(error));
    }
}

#[derive(Default)]
pub(crate) struct RequestTable {
    pending: HashMap<String, PendingRequest>,
}

impl RequestTable {
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub(crate) fn insert(&mut self, id: String, request: PendingRequest) {
        if let Some(previous) = self.pending.insert(id, request) {
            previous.settle(Err(RequestError::Abandoned));
        }
    }

    pub(crate) fn take(&mut self, id: &str) -> Option<PendingRequest> {
        self.pending.remove(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }
}

/// Awaitable result of [`ConnectionBinding::send_request`](crate::ConnectionBinding::send_request).
///
/// Resolves with the reply's `data` (`Value::Null` when the reply carried
/// none), or fails with the peer's error, a timeout, or
/// [`RequestError::Abandoned`] if the binding is dropped first. Dropping the
/// handle does not cancel the request.
#[must_use = "a request handle does nothing unless awaited"]
#[derive(Debug)]
pub struct RequestHandle {
    id: String,
    rx: oneshot::Receiver<Settlement>,
}

impl RequestHandle {
    pub(crate) fn new(id: String, rx: oneshot::Receiver<Settlement>) -> Self {
        Self { id, rx }
    }

    /// The correlation id carried on the wire.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for RequestHandle {
    type Output = Settlement;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(RequestError::Abandoned)))
    }
}

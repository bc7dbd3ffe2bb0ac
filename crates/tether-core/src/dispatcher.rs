//! EventDispatcher: a registry of named handlers with synchronous dispatch.
//!
//! Handlers are registered by identity. A [`Handler`] is a cheap, cloneable
//! wrapper around an `Arc`'d closure; two clones of the same handler are the
//! same registration, so registering a handler twice under one name never
//! causes duplicate deliveries.
//!
//! # Reentrancy
//!
//! [`EventDispatcher::emit`] takes a snapshot of the registrations for the
//! event before invoking anything, and the registry lock is never held while
//! a handler runs. Handlers may therefore subscribe, unsubscribe, or emit
//! again from inside their own invocation.
//!
//! # Failure isolation
//!
//! Each invocation is isolated: a handler that returns an error or panics is
//! logged and recorded in the returned [`DispatchError`], and the remaining
//! handlers are still invoked.
//!
//! ```ignore
//! let dispatcher = EventDispatcher::<[Value]>::new();
//! let greet = Handler::new(|args: &[Value]| {
//!     println!("hello {:?}", args);
//!     Ok(())
//! });
//! let subscription = dispatcher.on("greet", &greet);
//! dispatcher.emit("greet", &[json!("world")])?;
//! subscription.unsubscribe();
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use crate::{DispatchError, HandlerError};

type HandlerFn<T> = dyn Fn(&T) -> Result<(), HandlerError> + Send + Sync;

/// Identity of a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(usize);

impl HandlerId {
    pub(crate) fn of<F: ?Sized>(inner: &Arc<F>) -> Self {
        Self(Arc::as_ptr(inner).cast::<()>() as usize)
    }
}

/// A handler invoked with a borrowed event argument.
pub struct Handler<T: ?Sized + 'static = [Value]> {
    inner: Arc<HandlerFn<T>>,
}

impl<T: ?Sized + 'static> Handler<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&T) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    pub fn id(&self) -> HandlerId {
        HandlerId::of(&self.inner)
    }

    fn call(&self, arg: &T) -> Result<(), HandlerError> {
        (self.inner)(arg)
    }
}

impl<T: ?Sized + 'static> Clone for Handler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: ?Sized + 'static> PartialEq for Handler<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<T: ?Sized + 'static> Eq for Handler<T> {}

impl<T: ?Sized + 'static> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.id()).finish()
    }
}

/// Returned by every registration; removes exactly that registration.
///
/// Dropping a subscription does *not* unsubscribe.
#[must_use = "dropping a Subscription keeps the handler registered"]
pub struct Subscription {
    event: String,
    unsubscribe: Box<dyn FnOnce() -> bool + Send + Sync>,
}

impl Subscription {
    pub(crate) fn new(
        event: String,
        unsubscribe: impl FnOnce() -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            event,
            unsubscribe: Box::new(unsubscribe),
        }
    }

    /// The (fully-qualified) event name this subscription is registered under.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove the registration. Returns whether it was still registered.
    pub fn unsubscribe(self) -> bool {
        (self.unsubscribe)()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

struct Registration<T: ?Sized + 'static> {
    key: HandlerId,
    serial: u64,
    handler: Handler<T>,
    /// Present for one-shot registrations; flips to true on first delivery.
    fired: Option<Arc<AtomicBool>>,
}

impl<T: ?Sized + 'static> Clone for Registration<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            serial: self.serial,
            handler: self.handler.clone(),
            fired: self.fired.clone(),
        }
    }
}

struct Registry<T: ?Sized + 'static> {
    events: HashMap<String, Vec<Registration<T>>>,
    next_serial: u64,
}

impl<T: ?Sized + 'static> Registry<T> {
    fn remove_where(&mut self, name: &str, pred: impl Fn(&Registration<T>) -> bool) -> bool {
        let Some(entries) = self.events.get_mut(name) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|r| !pred(r));
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.events.remove(name);
        }
        removed
    }
}

/// Registry mapping event names to ordered handler registrations.
pub struct EventDispatcher<T: ?Sized + 'static = [Value]> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: ?Sized + 'static> Default for EventDispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> EventDispatcher<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                events: HashMap::new(),
                next_serial: 0,
            })),
        }
    }

    /// Register `handler` under `name`.
    pub fn on(&self, name: impl Into<String>, handler: &Handler<T>) -> Subscription {
        self.register(name.into(), handler.id(), handler.clone(), false)
    }

    /// Register `handler` under `name` for a single delivery.
    ///
    /// The registration is removed right before the handler runs, so it is
    /// invoked at most once even if it re-emits the same event.
    pub fn once(&self, name: impl Into<String>, handler: &Handler<T>) -> Subscription {
        self.register(name.into(), handler.id(), handler.clone(), true)
    }

    /// Register `wrapped` keyed by `key`, the identity of the caller's handler.
    ///
    /// Re-registering a key under the same name replaces the wrapped form in
    /// place, keeping its position in the dispatch order. The replaced
    /// registration's [`Subscription`] no longer removes anything.
    pub(crate) fn register(
        &self,
        name: String,
        key: HandlerId,
        wrapped: Handler<T>,
        once: bool,
    ) -> Subscription {
        let serial = {
            let mut registry = self.registry.lock();
            let serial = registry.next_serial;
            registry.next_serial += 1;

            let registration = Registration {
                key,
                serial,
                handler: wrapped,
                fired: once.then(|| Arc::new(AtomicBool::new(false))),
            };

            let entries = registry.events.entry(name.clone()).or_default();
            match entries.iter_mut().find(|r| r.key == key) {
                Some(existing) => *existing = registration,
                None => entries.push(registration),
            }
            serial
        };

        tracing::trace!(event = %name, once, "handler registered");

        let registry = Arc::downgrade(&self.registry);
        let event = name.clone();
        Subscription::new(name, move || remove_registration(&registry, &event, serial))
    }

    /// Remove every registration. Always returns true.
    pub fn off_all(&self) -> bool {
        self.registry.lock().events.clear();
        true
    }

    /// Remove every registration under `name`. Returns whether any existed.
    pub fn off_event(&self, name: &str) -> bool {
        self.registry.lock().events.remove(name).is_some()
    }

    /// Remove the registration of `handler` under `name`. Returns whether it existed.
    pub fn off(&self, name: &str, handler: &Handler<T>) -> bool {
        self.off_key(name, handler.id())
    }

    pub(crate) fn off_key(&self, name: &str, key: HandlerId) -> bool {
        self.registry.lock().remove_where(name, |r| r.key == key)
    }

    /// Invoke, in registration order, every handler registered under `name`.
    ///
    /// Returns the number of handlers invoked. If any of them failed, all
    /// failures are returned together after every handler has run.
    pub fn emit(&self, name: &str, arg: &T) -> Result<usize, DispatchError> {
        let snapshot = match self.registry.lock().events.get(name) {
            Some(entries) => entries.clone(),
            None => return Ok(0),
        };

        let mut delivered = 0;
        let mut failures = Vec::new();

        for registration in snapshot {
            if let Some(fired) = &registration.fired {
                if fired.swap(true, Ordering::AcqRel) {
                    continue;
                }
                let serial = registration.serial;
                self.registry
                    .lock()
                    .remove_where(name, |r| r.serial == serial);
            }

            delivered += 1;
            let result = match catch_unwind(AssertUnwindSafe(|| registration.handler.call(arg))) {
                Ok(result) => result,
                Err(panic) => Err(HandlerError::message(panic_message(panic.as_ref()))),
            };

            if let Err(error) = result {
                tracing::warn!(event = name, %error, "event handler failed");
                failures.push(error);
            }
        }

        if failures.is_empty() {
            Ok(delivered)
        } else {
            Err(DispatchError {
                event: name.to_owned(),
                delivered,
                failures,
            })
        }
    }

    /// Names with at least one live registration, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let registry = self.registry.lock();
        let mut names: Vec<String> = registry
            .events
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.registry.lock().events.get(name).map_or(0, Vec::len)
    }
}

fn remove_registration<T: ?Sized + 'static>(
    registry: &Weak<Mutex<Registry<T>>>,
    name: &str,
    serial: u64,
) -> bool {
    registry
        .upgrade()
        .is_some_and(|registry| registry.lock().remove_where(name, |r| r.serial == serial))
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

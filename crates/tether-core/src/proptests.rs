//! Property tests for the wire codec and the handler registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{Value, json};

use crate::{EventDispatcher, Handler, Message, Subscription, codec};

// ============================================================================
// Codec
// ============================================================================

fn json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        any::<u64>().prop_map(Value::from),
        // Quarters print and parse back exactly.
        any::<i32>().prop_map(|n| json!(f64::from(n) / 4.0)),
        any::<String>().prop_map(Value::String),
    ]
}

fn json_value() -> impl Strategy<Value = Value> {
    json_leaf().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec(("[a-z_]{0,6}", inner), 0..4)
                .prop_map(|entries| Value::Object(entries.into_iter().collect())),
        ]
    })
}

fn message() -> impl Strategy<Value = Message> {
    (
        prop::option::of(any::<String>()),
        prop::option::of(any::<String>()),
        prop::collection::vec(json_value(), 0..5),
        prop::option::of(json_value()),
        prop::option::of(json_value()),
    )
        .prop_map(|(request_id, event_name, args, data, error)| Message {
            request_id,
            event_name,
            args,
            data,
            error,
        })
}

proptest! {
    /// Whatever is encoded decodes to the same message.
    #[test]
    fn codec_round_trips(message in message()) {
        let wire = codec::encode(&message);
        let decoded = codec::decode(&wire);
        prop_assert!(decoded.is_ok(), "{wire} failed to decode: {decoded:?}");
        prop_assert_eq!(decoded.ok(), Some(message));
    }

    /// Encoding is a single JSON object whose keys follow `i`, `a`, `d`, `e`.
    #[test]
    fn codec_key_order(message in message()) {
        let wire: Value = serde_json::from_str(&codec::encode(&message)).unwrap();
        let keys: Vec<&str> = wire.as_object().unwrap().keys().map(String::as_str).collect();
        let expected: Vec<&str> = [
            message.request_id.as_ref().map(|_| "i"),
            Some("a"),
            message.data.as_ref().map(|_| "d"),
            message.error.as_ref().map(|_| "e"),
        ]
        .into_iter()
        .flatten()
        .collect();
        prop_assert_eq!(keys, expected);
    }
}

// ============================================================================
// Registry
// ============================================================================

const NAMES: [&str; 3] = ["a", "b", "c/d"];
const HANDLERS: usize = 3;

#[derive(Debug, Clone, Copy)]
enum Op {
    On(usize, usize),
    Once(usize, usize),
    Off(usize, usize),
    OffEvent(usize),
    OffAll,
    Emit(usize),
    Unsubscribe(usize),
}

fn op() -> impl Strategy<Value = Op> {
    let name = 0..NAMES.len();
    let handler = 0..HANDLERS;
    prop_oneof![
        3 => (name.clone(), handler.clone()).prop_map(|(n, h)| Op::On(n, h)),
        3 => (name.clone(), handler.clone()).prop_map(|(n, h)| Op::Once(n, h)),
        2 => (name.clone(), handler).prop_map(|(n, h)| Op::Off(n, h)),
        1 => name.clone().prop_map(Op::OffEvent),
        1 => Just(Op::OffAll),
        4 => name.prop_map(Op::Emit),
        2 => any::<usize>().prop_map(Op::Unsubscribe),
    ]
}

#[derive(Debug)]
struct Entry {
    handler: usize,
    once: bool,
    token: u64,
}

/// Plain ordered-list model of the registry.
#[derive(Debug, Default)]
struct Model {
    events: BTreeMap<&'static str, Vec<Entry>>,
    next_token: u64,
}

impl Model {
    fn register(&mut self, name: &'static str, handler: usize, once: bool) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        let entry = Entry { handler, once, token };
        let entries = self.events.entry(name).or_default();
        match entries.iter_mut().find(|e| e.handler == handler) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        token
    }

    fn remove(&mut self, name: &'static str, pred: impl Fn(&Entry) -> bool) -> bool {
        let Some(entries) = self.events.get_mut(name) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| !pred(e));
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.events.remove(name);
        }
        removed
    }

    fn unsubscribe(&mut self, token: u64) -> bool {
        NAMES
            .into_iter()
            .any(|name| self.remove(name, |e| e.token == token))
    }

    /// Handlers that an emit of `name` reaches, in order; drops one-shots.
    fn emit(&mut self, name: &'static str) -> Vec<usize> {
        let reached = self
            .events
            .get(name)
            .map(|entries| entries.iter().map(|e| e.handler).collect())
            .unwrap_or_default();
        self.remove(name, |e| e.once);
        reached
    }

    fn count(&self, name: &str) -> usize {
        self.events.get(name).map_or(0, Vec::len)
    }

    fn names(&self) -> Vec<String> {
        self.events.keys().map(|name| name.to_string()).collect()
    }
}

proptest! {
    /// Any sequence of registrations, removals and emits agrees with the model.
    #[test]
    fn registry_matches_model(ops in prop::collection::vec(op(), 1..48)) {
        let dispatcher = EventDispatcher::<[Value]>::new();
        let log: Arc<Mutex<Vec<usize>>> = Arc::default();
        let handlers: Vec<Handler> = (0..HANDLERS)
            .map(|i| {
                let log = log.clone();
                Handler::new(move |_args: &[Value]| {
                    log.lock().push(i);
                    Ok(())
                })
            })
            .collect();

        let mut model = Model::default();
        let mut subscriptions: Vec<(u64, Subscription)> = Vec::new();

        for op in ops {
            match op {
                Op::On(n, h) => {
                    let subscription = dispatcher.on(NAMES[n], &handlers[h]);
                    subscriptions.push((model.register(NAMES[n], h, false), subscription));
                }
                Op::Once(n, h) => {
                    let subscription = dispatcher.once(NAMES[n], &handlers[h]);
                    subscriptions.push((model.register(NAMES[n], h, true), subscription));
                }
                Op::Off(n, h) => {
                    prop_assert_eq!(
                        dispatcher.off(NAMES[n], &handlers[h]),
                        model.remove(NAMES[n], |e| e.handler == h)
                    );
                }
                Op::OffEvent(n) => {
                    prop_assert_eq!(
                        dispatcher.off_event(NAMES[n]),
                        model.events.remove(NAMES[n]).is_some()
                    );
                }
                Op::OffAll => {
                    prop_assert!(dispatcher.off_all());
                    model.events.clear();
                }
                Op::Emit(n) => {
                    log.lock().clear();
                    let expected = model.emit(NAMES[n]);
                    prop_assert_eq!(dispatcher.emit(NAMES[n], &[]), Ok(expected.len()));
                    prop_assert_eq!(&*log.lock(), &expected);
                }
                Op::Unsubscribe(k) => {
                    if !subscriptions.is_empty() {
                        let (token, subscription) = subscriptions.swap_remove(k % subscriptions.len());
                        prop_assert_eq!(subscription.unsubscribe(), model.unsubscribe(token));
                    }
                }
            }

            for name in NAMES {
                prop_assert_eq!(dispatcher.listener_count(name), model.count(name));
            }
            prop_assert_eq!(dispatcher.event_names(), model.names());
        }
    }
}

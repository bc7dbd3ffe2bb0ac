//! Logical messages and their JSON wire form.
//!
//! Every message travels as one compact JSON object:
//!
//! ```text
//! { "i": <correlation id, optional>,
//!   "a": [ <event name or null>, <arg0>, <arg1>, ... ],
//!   "d": <result payload, optional>,
//!   "e": <error value, optional> }
//! ```
//!
//! A message without an event name is a pure reply (resolve or reject).

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::DecodeError;

/// A decoded protocol message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub request_id: Option<String>,
    pub event_name: Option<String>,
    pub args: Vec<Value>,
    pub data: Option<Value>,
    pub error: Option<Value>,
}

impl Message {
    /// A fire-and-forget event.
    pub fn event(event_name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event_name: Some(event_name.into()),
            args,
            ..Self::default()
        }
    }

    /// A request expecting a reply correlated by `request_id`.
    pub fn request(
        request_id: impl Into<String>,
        event_name: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            request_id: Some(request_id.into()),
            ..Self::event(event_name, args)
        }
    }

    /// A successful reply.
    pub fn resolve(request_id: impl Into<String>, data: Value) -> Self {
        Self {
            request_id: Some(request_id.into()),
            data: Some(data),
            ..Self::default()
        }
    }

    /// A failed reply.
    pub fn reject(request_id: impl Into<String>, error: Value) -> Self {
        Self {
            request_id: Some(request_id.into()),
            error: Some(error),
            ..Self::default()
        }
    }

    /// True when the message carries no event name, i.e. it only answers a request.
    pub fn is_reply(&self) -> bool {
        self.event_name.is_none()
    }

    /// Serialize to the wire representation.
    pub fn encode(&self) -> String {
        encode(self)
    }

    /// Parse a wire message.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        decode(raw)
    }
}

/// Serialize a message. Absent fields are omitted, except the event-name slot
/// of `a`, which becomes `null`.
pub fn encode(message: &Message) -> String {
    let mut object = Map::with_capacity(4);

    if let Some(request_id) = &message.request_id {
        object.insert("i".into(), Value::String(request_id.clone()));
    }

    let mut a = Vec::with_capacity(message.args.len() + 1);
    a.push(
        message
            .event_name
            .as_ref()
            .map_or(Value::Null, |name| Value::String(name.clone())),
    );
    a.extend(message.args.iter().cloned());
    object.insert("a".into(), Value::Array(a));

    if let Some(data) = &message.data {
        object.insert("d".into(), data.clone());
    }
    if let Some(error) = &message.error {
        object.insert("e".into(), error.clone());
    }

    Value::Object(object).to_string()
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    i: Option<String>,
    a: Vec<Value>,
    #[serde(default, deserialize_with = "present")]
    d: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    e: Option<Value>,
}

// `"d": null` is a present null payload, not an absent one.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Parse a wire message.
pub fn decode(raw: &str) -> Result<Message, DecodeError> {
    let wire: WireMessage = serde_json::from_str(raw)?;

    let mut a = wire.a.into_iter();
    let event_name = match a.next() {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) => Some(name),
        Some(other) => return Err(DecodeError::EventName(other)),
    };

    Ok(Message {
        request_id: wire.i,
        event_name,
        args: a.collect(),
        data: wire.d,
        error: wire.e,
    })
}

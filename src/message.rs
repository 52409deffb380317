//! The typed message model shared by both wire framings.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Error;

/// Wire tags of the message types, `0..=8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Disconnect = 0,
    Connect = 1,
    Heartbeat = 2,
    Text = 3,
    Json = 4,
    Event = 5,
    Ack = 6,
    Error = 7,
    Noop = 8,
}

impl MessageType {
    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => MessageType::Disconnect,
            1 => MessageType::Connect,
            2 => MessageType::Heartbeat,
            3 => MessageType::Text,
            4 => MessageType::Json,
            5 => MessageType::Event,
            6 => MessageType::Ack,
            7 => MessageType::Error,
            8 => MessageType::Noop,
            _ => return None,
        })
    }

    pub(crate) fn tag(&self) -> u8 {
        *self as u8
    }
}

/// One decoded (or hand-built) message.
///
/// `id` is 0 when the message carries no identifier. `ack` reflects the `+`
/// flag: on inbound messages it means the sender expects an acknowledgement
/// carrying data from the application rather than an automatic empty ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub(crate) typ: MessageType,
    pub(crate) id: u32,
    pub(crate) ack: bool,
    pub(crate) endpoint: String,
    pub(crate) data: String,
}

impl Message {
    pub fn new(
        typ: MessageType,
        id: u32,
        ack: bool,
        endpoint: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            typ,
            id,
            ack,
            endpoint: endpoint.into(),
            data: data.into(),
        }
    }

    /// Shorthand for a plain text message.
    pub fn text(data: impl Into<String>) -> Self {
        Self::new(MessageType::Text, 0, false, "", data)
    }

    pub fn typ(&self) -> MessageType {
        self.typ
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn ack(&self) -> bool {
        self.ack
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The raw payload: text, or the JSON body of json/event messages.
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Deserialize the JSON payload of a json message.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_str(&self.data)?)
    }

    /// The event name, for event messages.
    pub fn event(&self) -> Result<String, Error> {
        if self.typ != MessageType::Event {
            return Err(Error::NotAnEvent);
        }
        let body: EventBody = serde_json::from_str(&self.data)?;
        Ok(body.name)
    }

    /// Deserialize the event arguments positionally, e.g. into a tuple:
    /// `let (a, b): (String, u32) = msg.args()?;`
    pub fn args<T: DeserializeOwned>(&self) -> Result<T, Error> {
        if self.typ != MessageType::Event {
            return Err(Error::NotAnEvent);
        }
        let body: EventBody = serde_json::from_str(&self.data)?;
        Ok(serde_json::from_value(Value::Array(body.args))?)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}(id={}, ack={}, endpoint={:?}, data={:?})",
            self.typ, self.id, self.ack, self.endpoint, self.data
        )
    }
}

/// JSON body of an event message. The legacy wire also spelled the keys
/// capitalized, hence the aliases.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct EventBody {
    #[serde(default, alias = "Args", skip_serializing_if = "Vec::is_empty")]
    pub(crate) args: Vec<Value>,
    #[serde(default, alias = "Name")]
    pub(crate) name: String,
}

/// Normalize a serialized argument value into an event argument list: arrays
/// pass through, `null` means no arguments, anything else becomes a single
/// argument.
pub(crate) fn args_vec(value: Value) -> Vec<Value> {
    match value {
        Value::Null => vec![],
        Value::Array(args) => args,
        value => vec![value],
    }
}

/// Everything that can be handed to the encoder.
#[derive(Debug, Clone)]
pub enum Payload {
    Text(String),
    Json(Value),
    Event { name: String, args: Vec<Value> },
    Ack { id: u32, args: Option<Vec<Value>> },
    Error {
        endpoint: String,
        reason: Option<u32>,
        advice: Option<u32>,
    },
    Heartbeat(u32),
    Handshake(String),
    Connect(String),
    Disconnect(String),
    Noop,
    /// A fully specified raw message, passed through unchanged.
    Message(Message),
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Self {
        Payload::Text(n.to_string())
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Payload::Json(v)
    }
}

impl From<Message> for Payload {
    fn from(m: Message) -> Self {
        Payload::Message(m)
    }
}

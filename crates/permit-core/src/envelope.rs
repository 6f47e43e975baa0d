//! Wire envelope shared by every realtime component.
//!
//! ```json
//! {"type": "TYPING_INDICATOR", "payload": {...}, "timestamp": "2026-01-01T00:00:00Z", "threadId": "..."}
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decoding failure for an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The frame was not a valid envelope document.
    #[error("invalid envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// Envelope type tag.
///
/// Unrecognized tags survive decoding as [`EnvelopeKind::Other`] so the
/// dispatcher can name them when replying with an error.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvelopeKind {
    /// `CHAT_MESSAGE`
    Chat,
    /// `TYPING_INDICATOR`
    Typing,
    /// `READ_RECEIPT`
    ReadReceipt,
    /// `USER_STATUS`
    Presence,
    /// `ERROR`
    Error,
    /// `THREAD_SUBSCRIBE`
    Subscribe,
    /// `THREAD_UNSUBSCRIBE`
    Unsubscribe,
    /// Any other tag, kept verbatim.
    Other(String),
}

impl EnvelopeKind {
    /// Wire tag for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Chat => "CHAT_MESSAGE",
            Self::Typing => "TYPING_INDICATOR",
            Self::ReadReceipt => "READ_RECEIPT",
            Self::Presence => "USER_STATUS",
            Self::Error => "ERROR",
            Self::Subscribe => "THREAD_SUBSCRIBE",
            Self::Unsubscribe => "THREAD_UNSUBSCRIBE",
            Self::Other(raw) => raw,
        }
    }

    /// Kinds that only make sense inside one thread.
    pub fn is_thread_scoped(&self) -> bool {
        matches!(self, Self::Chat | Self::Typing | Self::ReadReceipt)
    }
}

impl From<String> for EnvelopeKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "CHAT_MESSAGE" => Self::Chat,
            "TYPING_INDICATOR" => Self::Typing,
            "READ_RECEIPT" => Self::ReadReceipt,
            "USER_STATUS" => Self::Presence,
            "ERROR" => Self::Error,
            "THREAD_SUBSCRIBE" => Self::Subscribe,
            "THREAD_UNSUBSCRIBE" => Self::Unsubscribe,
            _ => Self::Other(raw),
        }
    }
}

impl From<EnvelopeKind> for String {
    fn from(kind: EnvelopeKind) -> Self {
        match kind {
            EnvelopeKind::Other(raw) => raw,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed message exchanged over a live connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Type tag.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Kind-specific body.
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Absent or `null` on the wire until [`Envelope::stamp`] fills it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Raw thread id. Validation is left to the dispatcher so a malformed id
    /// gets an error reply instead of dropping the connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    pub fn new(kind: EnvelopeKind, payload: Map<String, Value>) -> Self {
        Self {
            kind,
            payload,
            timestamp: Some(Utc::now()),
            thread_id: None,
        }
    }

    /// Set the timestamp to now unless the sender supplied one.
    pub fn stamp(&mut self) -> DateTime<Utc> {
        *self.timestamp.get_or_insert_with(Utc::now)
    }

    /// Point the envelope at `thread_id` if its kind is thread-scoped, and
    /// clear any thread id otherwise.
    pub fn route_to(&mut self, thread_id: impl fmt::Display) {
        self.thread_id = self.kind.is_thread_scoped().then(|| thread_id.to_string());
    }

    /// An `ERROR` envelope with a machine code and human message.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        let mut payload = Map::new();
        let _ = payload.insert("code".into(), Value::String(code.to_owned()));
        let _ = payload.insert("message".into(), Value::String(message.into()));
        Self::new(EnvelopeKind::Error, payload)
    }

    /// Decode an inbound text frame.
    pub fn decode(raw: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Decode an inbound binary frame.
    pub fn decode_bytes(raw: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Typed payload accessor for string fields.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Typed payload accessor for boolean fields.
    pub fn payload_bool(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(Value::as_bool)
    }
}

//! Tagged request-body envelope for forwarded calls.
//!
//! Makes the serialization rule explicit: structured JSON is
//! re-serialized to a canonical string before transmission, anything
//! else passes through unchanged, absent bodies stay absent.

use bytes::Bytes;

/// Body forwarded to the gateway
#[derive(Debug, Clone, PartialEq)]
pub enum ForwardBody {
    /// Structured JSON (object or array), re-serialized canonically
    Json(serde_json::Value),
    /// Opaque bytes passed through unchanged
    Raw(Bytes),
    /// No body
    Empty,
}

impl ForwardBody {
    /// Classify an inbound body. JSON objects and arrays become
    /// [`ForwardBody::Json`]; scalars and non-JSON payloads stay raw.
    pub fn classify(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            return ForwardBody::Empty;
        }
        match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(value) if value.is_object() || value.is_array() => ForwardBody::Json(value),
            _ => ForwardBody::Raw(bytes),
        }
    }

    /// Serialized wire form, `None` when there is no body.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            // Value serialization cannot fail for plain JSON trees.
            ForwardBody::Json(value) => Some(Bytes::from(value.to_string())),
            ForwardBody::Raw(bytes) => Some(bytes),
            ForwardBody::Empty => None,
        }
    }

    /// Whether the forwarded body should carry a JSON content type.
    pub fn is_json(&self) -> bool {
        matches!(self, ForwardBody::Json(_))
    }
}

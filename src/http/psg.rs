//! PSG wire framing (spec §6 "Wire protocol (PSG framing)").
//!
//! A PSG reply is a sequence of chunks. Each chunk begins with a small JSON
//! envelope and may carry a binary payload glued on afterwards. This module
//! only models the envelope shapes the gateway core itself emits
//! (message/completion); processor-specific data chunks are opaque bytes
//! the dispatcher hands to [`crate::http::reply::Reply`].

use serde::Serialize;

use crate::error::PsgErrorCode;

/// Severity attached to a `reply-message` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message, not an error.
    Info,
    /// Request-level warning; does not fail the reply.
    Warning,
    /// Hard error; contributes to the aggregate HTTP status.
    Error,
}

/// A single `reply-message` envelope: `{status, code, severity, message}`.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyMessage {
    /// Either `"OK"` or `"ERROR"`.
    pub status: &'static str,
    /// Stable PSG error code (absent on success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    /// Message severity.
    pub severity: Severity,
    /// Human-readable detail.
    pub message: String,
}

impl ReplyMessage {
    /// Build an error message chunk carrying the given PSG error code.
    pub fn error(code: PsgErrorCode, message: impl Into<String>) -> Self {
        ReplyMessage {
            status: "ERROR",
            code: Some(code.as_str()),
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

/// The terminal chunk of every reply: `{status, code, n_chunks, elapsed_us}`.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyCompletion {
    /// Aggregated HTTP status (the maximum ever emitted by any processor or
    /// by the framing layer).
    pub status: u16,
    /// Wall-clock microseconds from request start to completion.
    pub elapsed_us: u64,
}

/// One emitted chunk: the JSON envelope, plus an optional binary payload
/// that follows it on the wire.
#[derive(Debug, Clone)]
pub enum Chunk {
    /// A `reply-message` envelope.
    Message(ReplyMessage),
    /// A `reply-completion` envelope; always the last chunk of a reply.
    Completion(ReplyCompletion),
    /// Raw processor-owned binary data, opaque to the gateway core.
    Data(bytes::Bytes),
}

impl Chunk {
    /// Serialize the JSON envelope, if this chunk has one. `Data` chunks
    /// have no envelope of their own — the processor framed them already.
    pub fn envelope_json(&self) -> Option<String> {
        match self {
            Chunk::Message(m) => serde_json::to_string(m).ok(),
            Chunk::Completion(c) => serde_json::to_string(c).ok(),
            Chunk::Data(_) => None,
        }
    }
}

/// MIME content types a [`crate::http::reply::Reply`] owner may pick for
/// the first chunk (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyMimeType {
    /// Content type not yet decided.
    #[default]
    NotSet,
    /// `application/json`
    Json,
    /// `text/html`
    Html,
    /// `application/octet-stream`
    Binary,
    /// `text/plain`
    PlainText,
    /// `image/x-icon`
    Image,
    /// `application/x-ncbi-psg`
    Psg,
}

impl ReplyMimeType {
    /// The wire `Content-Type` header value.
    pub fn as_header_value(self) -> Option<&'static str> {
        match self {
            ReplyMimeType::NotSet => None,
            ReplyMimeType::Json => Some("application/json"),
            ReplyMimeType::Html => Some("text/html"),
            ReplyMimeType::Binary => Some("application/octet-stream"),
            ReplyMimeType::PlainText => Some("text/plain"),
            ReplyMimeType::Image => Some("image/x-icon"),
            ReplyMimeType::Psg => Some("application/x-ncbi-psg"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_serializes_expected_shape() {
        let msg = ReplyMessage::error(PsgErrorCode::TooManyRequests, "too many pending requests");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"status\":\"ERROR\""));
        assert!(json.contains("\"code\":\"TooManyRequests\""));
    }

    #[test]
    fn mime_type_maps_to_header_value() {
        assert_eq!(ReplyMimeType::Psg.as_header_value(), Some("application/x-ncbi-psg"));
        assert_eq!(ReplyMimeType::NotSet.as_header_value(), None);
    }
}

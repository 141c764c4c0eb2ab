//! SSE data-line decoding and downstream frame encoding.
//!
//! Upstream lines are decoded one at a time; downstream frames follow the
//! relay protocol: `data: {"token": ...}`, `data: {"error": ...}` and a
//! single `data: [DONE]` sentinel, each terminated by a blank line.
use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::util::{extract_sse_data_payload, push_json_string_escaped};

/// The terminal marker.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Marker attached to error frames produced by a safety block.
pub const SAFETY_ERROR_CODE: &str = "safety_blocked";

/// Decode one SSE line into a JSON payload.
///
/// Lines that are blank, are not `data:` fields, carry an empty payload, or
/// do not parse as `T` yield `None`. Parse failures are expected while a
/// fragment is still incomplete and are never surfaced as errors.
#[must_use]
pub fn decode_data_line<T>(line: &str) -> Option<T>
where
    T: DeserializeOwned,
{
    let payload = extract_sse_data_payload(line)?;
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::trace!(error = %err, payload_len = payload.len(), "skipping malformed SSE data line");
            None
        }
    }
}

/// Kind of downstream error frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFrameKind {
    Generic,
    Safety,
}

/// `data: {"token":"<text>"}\n\n`
#[must_use]
pub fn token_frame(text: &str) -> Bytes {
    let mut out = String::with_capacity(24 + text.len());
    out.push_str("data: {\"token\":");
    push_json_string_escaped(&mut out, text);
    out.push_str("}\n\n");
    Bytes::from(out)
}

/// `data: {"error":"<message>"}\n\n`, with `"code":"safety_blocked"` added
/// for safety blocks.
#[must_use]
pub fn error_frame(message: &str, kind: ErrorFrameKind) -> Bytes {
    let mut out = String::with_capacity(48 + message.len());
    out.push_str("data: {\"error\":");
    push_json_string_escaped(&mut out, message);
    if kind == ErrorFrameKind::Safety {
        out.push_str(",\"code\":");
        push_json_string_escaped(&mut out, SAFETY_ERROR_CODE);
    }
    out.push_str("}\n\n");
    Bytes::from(out)
}

#[must_use]
pub fn done_frame() -> Bytes {
    Bytes::from_static(DONE_FRAME.as_bytes())
}

const HEX: &[u8; 16] = b"0123456789abcdef";
const UPSTREAM_ERROR_MAX_LEN: usize = 500;

/// Strip the `data:` prefix from an SSE line and return the trimmed payload.
///
/// Returns `None` for blank lines, comments, non-data fields, and data lines
/// with an empty payload.
#[inline]
pub(crate) fn extract_sse_data_payload(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }

    let payload = trimmed.strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    Some(payload)
}

#[inline]
pub(crate) fn push_json_string_escaped(out: &mut String, value: &str) {
    let bytes = value.as_bytes();
    if bytes.iter().all(|&b| b >= 0x20 && b != b'"' && b != b'\\') {
        out.push('"');
        out.push_str(value);
        out.push('"');
        return;
    }

    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c <= '\u{1f}' => {
                let control = c as u8;
                out.push_str("\\u00");
                out.push(char::from(HEX[(control >> 4) as usize]));
                out.push(char::from(HEX[(control & 0x0f) as usize]));
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
}

/// Reduce an upstream error body to a short client-safe message.
///
/// Prefers `error.message` from a JSON body; falls back to lossy UTF-8.
/// Either way the result is capped at 500 bytes on a char boundary.
#[must_use]
pub(crate) fn sanitize_upstream_error(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(msg) = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return truncate_message(msg);
        }
        if let Some(msg) = json.get("error").and_then(|e| e.as_str()) {
            return truncate_message(msg);
        }
    }

    let raw = String::from_utf8_lossy(body);
    truncate_message(raw.trim())
}

fn truncate_message(message: &str) -> String {
    if message.len() <= UPSTREAM_ERROR_MAX_LEN {
        return message.to_string();
    }
    let mut end = UPSTREAM_ERROR_MAX_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &message[..end])
}

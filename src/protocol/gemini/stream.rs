use smallvec::SmallVec;

use crate::protocol::gemini::{upstream_error_message, GeminiCandidate, GeminiResponse};
use crate::stream::RelayEvent;

/// Events extracted from one upstream payload. At most a token and one
/// terminal signal, so two inline slots cover every case.
pub type ExtractedEvents = SmallVec<[RelayEvent; 2]>;

/// Upstream finish indicator, as far as the relay cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishKind {
    /// `STOP`
    Stop,
    /// `MAX_TOKENS`
    MaxTokens,
    /// `SAFETY`
    Safety,
    /// Any other reason (`RECITATION`, `OTHER`, ...). Not terminal by itself;
    /// the upstream closes the stream right after.
    Other,
}

#[must_use]
pub fn finish_kind(finish_reason: &str) -> FinishKind {
    match finish_reason {
        "STOP" => FinishKind::Stop,
        "MAX_TOKENS" => FinishKind::MaxTokens,
        "SAFETY" => FinishKind::Safety,
        _ => FinishKind::Other,
    }
}

/// Map one decoded Gemini stream payload to relay events.
///
/// Only candidate 0 is inspected. A payload carrying both text and a finish
/// reason yields the token first and the terminal signal second. Missing
/// fields are treated as absent, never as malformed input; a payload with
/// nothing relevant yields a single [`RelayEvent::Ignored`].
#[must_use]
pub fn extract_stream_events(chunk: GeminiResponse) -> ExtractedEvents {
    let mut out = ExtractedEvents::new();
    extract_stream_events_into(chunk, &mut out);
    out
}

/// Like [`extract_stream_events`], appending into a caller-provided buffer.
pub fn extract_stream_events_into(chunk: GeminiResponse, out: &mut ExtractedEvents) {
    let start = out.len();

    if let Some(error) = chunk.error.as_ref() {
        out.push(RelayEvent::UpstreamError(upstream_error_message(error)));
        return;
    }

    let prompt_blocked = chunk
        .prompt_feedback
        .as_ref()
        .is_some_and(|feedback| feedback.block_reason.is_some());

    if let Some(candidate) = chunk.candidates.and_then(|c| c.into_iter().next()) {
        let GeminiCandidate {
            content,
            finish_reason,
            ..
        } = candidate;

        let text = content.map(|content| collect_text(content.parts)).unwrap_or_default();
        if !text.is_empty() {
            out.push(RelayEvent::Token(text));
        }

        match finish_reason.as_deref().map(finish_kind) {
            Some(FinishKind::Stop | FinishKind::MaxTokens) => out.push(RelayEvent::Done),
            Some(FinishKind::Safety) => out.push(RelayEvent::SafetyBlocked),
            Some(FinishKind::Other) | None => {}
        }
    }

    if prompt_blocked {
        // A blocked prompt outranks a normal finish in the same payload.
        if let Some(pos) = out[start..].iter().position(|e| *e == RelayEvent::Done) {
            out.remove(start + pos);
        }
        if !out[start..].contains(&RelayEvent::SafetyBlocked) {
            out.push(RelayEvent::SafetyBlocked);
        }
    }

    if out.len() == start {
        out.push(RelayEvent::Ignored);
    }
}

fn collect_text(parts: Vec<crate::protocol::gemini::GeminiPart>) -> String {
    let mut text = String::new();
    for part in parts {
        if part.thought == Some(true) {
            continue;
        }
        if let Some(fragment) = part.text {
            if text.is_empty() {
                text = fragment;
            } else {
                text.push_str(&fragment);
            }
        }
    }
    text
}

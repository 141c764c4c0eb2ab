use serde::Serialize;

use crate::error::RelayError;
use crate::protocol::gemini::stream::{finish_kind, FinishKind};
use crate::protocol::gemini::{upstream_error_message, GeminiResponse, GeminiUsageMetadata};

/// Result of a non-streaming `generateContent` call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateOutcome {
    pub text: String,
    pub finish_reason: Option<String>,
    pub model: Option<String>,
    pub usage: Option<GeminiUsageMetadata>,
}

/// Decode a Gemini generateContent response, candidate 0 only.
///
/// # Errors
///
/// Returns [`RelayError::Upstream`] when the body carries an error object or
/// no candidate, and [`RelayError::SafetyBlocked`] when the prompt or the
/// reply was blocked without producing text.
pub fn decode_generate_response(response: GeminiResponse) -> Result<GenerateOutcome, RelayError> {
    let GeminiResponse {
        candidates,
        prompt_feedback,
        usage_metadata,
        model_version,
        error,
    } = response;

    if let Some(error) = error {
        return Err(RelayError::Upstream {
            status: 502,
            message: upstream_error_message(&error),
        });
    }

    if let Some(reason) = prompt_feedback.and_then(|feedback| feedback.block_reason) {
        return Err(RelayError::SafetyBlocked(reason));
    }

    let candidate = candidates
        .and_then(|candidates| candidates.into_iter().next())
        .ok_or_else(|| RelayError::Upstream {
            status: 502,
            message: "Gemini response has no candidates".to_string(),
        })?;

    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter(|part| part.thought != Some(true))
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    let finish_reason = candidate.finish_reason;
    if text.is_empty() && finish_reason.as_deref().map(finish_kind) == Some(FinishKind::Safety) {
        return Err(RelayError::SafetyBlocked("SAFETY".to_string()));
    }

    Ok(GenerateOutcome {
        text,
        finish_reason,
        model: model_version,
        usage: usage_metadata,
    })
}

use bytes::Bytes;
use serde::Deserialize;

use crate::config::{AppConfig, GenerationConfig};
use crate::error::RelayError;
use crate::protocol::gemini::build_generate_request;

const TEMPERATURE_RANGE: (f64, f64) = (0.0, 2.0);

/// Inbound body accepted by `/api/stream` and `/api/generate`.
#[derive(Debug, Deserialize)]
pub struct RelayRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<i64>,
}

/// A request that passed validation, with defaults and clamps applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub prompt: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

/// Parse and validate an inbound body.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] when the body is not JSON, the
/// prompt is missing or blank, or the prompt exceeds the configured length.
pub fn parse_relay_request(
    body: &[u8],
    generation: &GenerationConfig,
) -> Result<ValidatedRequest, RelayError> {
    let request: RelayRequest = serde_json::from_slice(body)
        .map_err(|err| RelayError::InvalidRequest(format!("Invalid JSON body: {err}")))?;
    validate_relay_request(request, generation)
}

/// Apply defaults and bounds to a decoded request.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] for a missing, blank or oversized prompt.
pub fn validate_relay_request(
    request: RelayRequest,
    generation: &GenerationConfig,
) -> Result<ValidatedRequest, RelayError> {
    let prompt = request
        .prompt
        .ok_or_else(|| RelayError::InvalidRequest("prompt is required".into()))?;
    if prompt.trim().is_empty() {
        return Err(RelayError::InvalidRequest("prompt cannot be empty".into()));
    }
    let prompt_chars = prompt.chars().count();
    if prompt_chars > generation.max_prompt_chars {
        return Err(RelayError::InvalidRequest(format!(
            "prompt is too long ({prompt_chars} characters, max {})",
            generation.max_prompt_chars
        )));
    }

    let temperature = request
        .temperature
        .unwrap_or(generation.temperature)
        .clamp(TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1);

    let min = i64::from(generation.min_output_tokens);
    let max = i64::from(generation.max_output_tokens);
    let max_output_tokens = request
        .max_tokens
        .map_or(max, |requested| requested.clamp(min, max));

    Ok(ValidatedRequest {
        prompt,
        temperature,
        // Clamped into a range of u32 bounds above.
        max_output_tokens: u32::try_from(max_output_tokens).unwrap_or(generation.max_output_tokens),
    })
}

/// Encode the upstream `generateContent` body for a validated request.
///
/// # Errors
///
/// Returns [`RelayError::Internal`] if serialization fails.
pub fn encode_upstream_body(
    request: &ValidatedRequest,
    config: &AppConfig,
) -> Result<Bytes, RelayError> {
    let upstream = build_generate_request(
        &request.prompt,
        config
            .generation
            .to_upstream(request.temperature, request.max_output_tokens),
        &config.safety_settings,
    );
    serde_json::to_vec(&upstream)
        .map(Bytes::from)
        .map_err(|err| RelayError::Internal(format!("Failed to encode upstream request: {err}")))
}

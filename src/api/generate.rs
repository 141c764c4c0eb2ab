use std::sync::Arc;
use std::time::Instant;

use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use serde::Serialize;

use crate::api::request::{encode_upstream_body, parse_relay_request};
use crate::error::RelayError;
use crate::observability::{estimate_tokens, merge_usage, TokenUsage};
use crate::protocol::gemini::response_decoder::decode_generate_response;
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct GenerateResponse {
    text: String,
    finish_reason: Option<String>,
    model: String,
    usage: TokenUsage,
}

/// `POST /api/generate`: one upstream call, one JSON reply.
pub async fn handler(state: Arc<AppState>, body: Bytes) -> Response {
    let request_id = state.next_request_id();
    let started = Instant::now();
    match handle(&state, &body).await {
        Ok(reply) => {
            tracing::info!(
                request_id = %request_id,
                model = %reply.model,
                finish_reason = reply.finish_reason.as_deref().unwrap_or(""),
                completion_tokens = reply.usage.completion_tokens,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "generate completed"
            );
            Json(reply).into_response()
        }
        Err(err) => {
            tracing::warn!(request_id = %request_id, error = %err, "generate failed");
            err.into_response()
        }
    }
}

async fn handle(state: &AppState, body: &[u8]) -> Result<GenerateResponse, RelayError> {
    let request = parse_relay_request(body, &state.config.generation)?;
    let upstream_body = encode_upstream_body(&request, &state.config)?;
    let response = state
        .transport
        .send_generate(&state.endpoint, upstream_body)
        .await?;
    let outcome = decode_generate_response(response)?;

    let usage = merge_usage(
        outcome.usage.as_ref(),
        estimate_tokens(&request.prompt),
        estimate_tokens(&outcome.text),
    );
    Ok(GenerateResponse {
        model: outcome
            .model
            .unwrap_or_else(|| state.endpoint.model().to_string()),
        text: outcome.text,
        finish_reason: outcome.finish_reason,
        usage,
    })
}

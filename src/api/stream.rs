use std::sync::Arc;
use std::time::Instant;

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::Instrument;

use crate::api::request::{encode_upstream_body, parse_relay_request};
use crate::observability::log_relay_complete;
use crate::state::AppState;
use crate::stream::{frame_channel, relay_stream, RelaySink};

/// `POST /api/stream`
///
/// Request validation failures are answered with a plain 400. Once the
/// request is accepted the SSE headers are committed and every later
/// failure, including an upstream error status, is reported in-band.
pub async fn handler(state: Arc<AppState>, body: Bytes) -> Response {
    let request = match parse_relay_request(&body, &state.config.generation) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };
    let upstream_body = match encode_upstream_body(&request, &state.config) {
        Ok(bytes) => bytes,
        Err(err) => return err.into_response(),
    };

    let request_id = state.next_request_id();
    let (writer, frames) = frame_channel(state.config.relay.channel_capacity);
    let span = tracing::info_span!("relay", request_id = %request_id);

    tokio::spawn(
        async move {
            let started = Instant::now();
            let mut sink = RelaySink::new(writer);
            let upstream = state
                .transport
                .open_stream(&state.endpoint, upstream_body)
                .await;
            let summary = relay_stream(upstream, &mut sink, state.relay_options()).await;
            log_relay_complete(
                &request_id,
                state.endpoint.model(),
                &request.prompt,
                &summary,
                started,
            );
        }
        .instrument(span),
    );

    sse_ok_response(axum::body::Body::from_stream(frames))
}

#[inline]
fn sse_ok_response(body: axum::body::Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    headers.insert("x-accel-buffering", http::HeaderValue::from_static("no"));
    response
}

mod common;

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, RawQuery};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::json;

use common::{
    body_text, build_state, build_state_with, dispatch, post_json, spawn_upstream, sse_response,
};

const HI: &str = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi\"}],\"role\":\"model\"}}]}\r\n\r\n";
const THERE_STOP: &str = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\" there\"}],\"role\":\"model\"},\"finishReason\":\"STOP\"}]}\r\n\r\n";
const EXPECTED_HI_THERE: &str =
    "data: {\"token\":\"Hi\"}\n\ndata: {\"token\":\" there\"}\n\ndata: [DONE]\n\n";

fn scripted_upstream(chunks: Vec<&'static str>) -> Router {
    Router::new().route(
        "/v1beta/models/{action}",
        post(move || {
            let chunks = chunks.clone();
            async move { sse_response(chunks) }
        }),
    )
}

#[derive(Debug, Default)]
struct Captured {
    action: String,
    query: Option<String>,
    api_key: Option<String>,
    body: serde_json::Value,
}

#[tokio::test]
async fn test_stream_relays_tokens_and_single_done() {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let sink = Arc::clone(&captured);
    let app = Router::new().route(
        "/v1beta/models/{action}",
        post(
            move |Path(action): Path<String>,
                  RawQuery(query): RawQuery,
                  headers: HeaderMap,
                  Json(body): Json<serde_json::Value>| {
                let sink = Arc::clone(&sink);
                async move {
                    let mut captured = sink.lock().expect("lock");
                    captured.action = action;
                    captured.query = query;
                    captured.api_key = headers
                        .get("x-goog-api-key")
                        .and_then(|value| value.to_str().ok())
                        .map(ToString::to_string);
                    captured.body = body;
                    sse_response(vec![HI, THERE_STOP])
                }
            },
        ),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let state = build_state(base_url);

    let response = dispatch(
        state,
        post_json(
            "/api/stream",
            json!({"prompt": "Say hi", "temperature": 5.0, "max_tokens": 64}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(headers["cache-control"], "no-cache, no-transform");
    assert_eq!(headers["x-accel-buffering"], "no");
    assert_eq!(headers["access-control-allow-origin"], "*");

    assert_eq!(body_text(response).await, EXPECTED_HI_THERE);

    let captured = captured.lock().expect("lock");
    assert_eq!(captured.action, "gemini-1.5-flash:streamGenerateContent");
    assert_eq!(captured.query.as_deref(), Some("alt=sse"));
    assert_eq!(captured.api_key.as_deref(), Some(common::TEST_API_KEY));
    assert_eq!(captured.body["contents"][0]["parts"][0]["text"], "Say hi");
    assert_eq!(captured.body["generationConfig"]["temperature"], 2.0);
    assert_eq!(captured.body["generationConfig"]["maxOutputTokens"], 64);

    server.abort();
}

#[tokio::test]
async fn test_stream_output_independent_of_upstream_chunking() {
    let split = vec![
        "data: {\"candid",
        "ates\":[{\"content\":{\"parts\":[{\"text\":\"Hi\"}],\"role\":\"model\"}}]}\r",
        "\n\r\ndata: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\" the",
        "re\"}],\"role\":\"model\"},\"finishReason\":\"STOP\"}]}\r\n\r\n",
    ];
    let (base_url, server) = spawn_upstream(scripted_upstream(split)).await;
    let response = dispatch(
        build_state(base_url),
        post_json("/api/stream", json!({"prompt": "Say hi"})),
    )
    .await;
    assert_eq!(body_text(response).await, EXPECTED_HI_THERE);
    server.abort();
}

#[tokio::test]
async fn test_stream_multibyte_text_passes_through() {
    let chunks = vec![
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"caf\u{e9} \u{1f44b}\"}]},\"finishReason\":\"STOP\"}]}\n\n",
    ];
    let (base_url, server) = spawn_upstream(scripted_upstream(chunks)).await;
    let response = dispatch(
        build_state(base_url),
        post_json("/api/stream", json!({"prompt": "hello"})),
    )
    .await;
    assert_eq!(
        body_text(response).await,
        "data: {\"token\":\"caf\u{e9} \u{1f44b}\"}\n\ndata: [DONE]\n\n"
    );
    server.abort();
}

#[tokio::test]
async fn test_stream_safety_block_reports_marked_error() {
    let chunks = vec![
        "data: {\"candidates\":[{\"finishReason\":\"SAFETY\",\"safetyRatings\":[{\"category\":\"HARM_CATEGORY_HARASSMENT\",\"probability\":\"HIGH\"}]}]}\r\n\r\n",
    ];
    let (base_url, server) = spawn_upstream(scripted_upstream(chunks)).await;
    let response = dispatch(
        build_state(base_url),
        post_json("/api/stream", json!({"prompt": "something rude"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;

    let frames: Vec<&str> = text.split_terminator("\n\n").collect();
    assert_eq!(frames.len(), 2, "{text}");
    let error: serde_json::Value =
        serde_json::from_str(frames[0].trim_start_matches("data: ")).expect("error json");
    assert!(error["error"].as_str().is_some_and(|m| !m.is_empty()));
    assert_eq!(error["code"], "safety_blocked");
    assert_eq!(frames[1], "data: [DONE]");
    server.abort();
}

#[tokio::test]
async fn test_stream_upstream_error_status_is_reported_in_band() {
    let app = Router::new().route(
        "/v1beta/models/{action}",
        post(|| async {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": {"code": 503, "message": "The model is overloaded.", "status": "UNAVAILABLE"}})),
            )
                .into_response()
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let response = dispatch(
        build_state(base_url),
        post_json("/api/stream", json!({"prompt": "hi"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        "data: {\"error\":\"Upstream request failed with status 503: The model is overloaded.\"}\n\ndata: [DONE]\n\n"
    );
    server.abort();
}

#[tokio::test]
async fn test_stream_embedded_error_object_terminates() {
    let chunks = vec![
        HI,
        "data: {\"error\":{\"code\":500,\"message\":\"Internal error encountered.\"}}\n\n",
        THERE_STOP,
    ];
    let (base_url, server) = spawn_upstream(scripted_upstream(chunks)).await;
    let response = dispatch(
        build_state(base_url),
        post_json("/api/stream", json!({"prompt": "hi"})),
    )
    .await;
    assert_eq!(
        body_text(response).await,
        "data: {\"token\":\"Hi\"}\n\ndata: {\"error\":\"Internal error encountered.\"}\n\ndata: [DONE]\n\n"
    );
    server.abort();
}

#[tokio::test]
async fn test_stream_unreachable_upstream_still_terminates() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let response = dispatch(
        build_state(format!("http://127.0.0.1:{port}/v1beta")),
        post_json("/api/stream", json!({"prompt": "hi"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        "data: {\"error\":\"Failed to reach the upstream model service\"}\n\ndata: [DONE]\n\n"
    );
}

#[tokio::test]
async fn test_stream_without_finish_reason_ends_with_done() {
    let (base_url, server) = spawn_upstream(scripted_upstream(vec![HI])).await;
    let response = dispatch(
        build_state(base_url),
        post_json("/api/stream", json!({"prompt": "hi"})),
    )
    .await;
    assert_eq!(
        body_text(response).await,
        "data: {\"token\":\"Hi\"}\n\ndata: [DONE]\n\n"
    );
    server.abort();
}

#[tokio::test]
async fn test_stream_idle_timeout_reports_error() {
    let app = Router::new().route(
        "/v1beta/models/{action}",
        post(|| async {
            let stream = futures_util::stream::iter(vec![Ok::<_, Infallible>(Bytes::from_static(
                HI.as_bytes(),
            ))])
            .chain(futures_util::stream::pending());
            Response::builder()
                .header("content-type", "text/event-stream")
                .body(Body::from_stream(stream))
                .expect("response")
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let state = build_state_with(base_url, |config| {
        config.relay.idle_timeout_secs = Some(1);
    });
    let response = dispatch(state, post_json("/api/stream", json!({"prompt": "hi"}))).await;
    let text = body_text(response).await;
    assert!(text.starts_with("data: {\"token\":\"Hi\"}\n\ndata: {\"error\":"), "{text}");
    assert!(text.ends_with("data: [DONE]\n\n"));
    assert_eq!(text.matches("[DONE]").count(), 1);
    server.abort();
}

#[tokio::test]
async fn test_stream_invalid_request_is_rejected_before_streaming() {
    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    let app = Router::new().route(
        "/v1beta/models/{action}",
        post(move || {
            flag.store(true, Ordering::SeqCst);
            async { sse_response(vec![THERE_STOP]) }
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let state = build_state(base_url);

    for body in [json!({}), json!({"prompt": "   "}), json!({"prompt": 42})] {
        let response = dispatch(Arc::clone(&state), post_json("/api/stream", body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["content-type"], "application/json");
    }
    assert!(!called.load(Ordering::SeqCst));
    server.abort();
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_client_disconnect_releases_upstream() {
    let released = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&released);
    let app = Router::new().route(
        "/v1beta/models/{action}",
        post(move || {
            let guard = DropFlag(Arc::clone(&flag));
            async move {
                let endless = futures_util::stream::unfold(guard, |guard| async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Some((
                        Ok::<_, Infallible>(Bytes::from_static(HI.as_bytes())),
                        guard,
                    ))
                });
                Response::builder()
                    .header("content-type", "text/event-stream")
                    .body(Body::from_stream(endless))
                    .expect("response")
            }
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let state = build_state_with(base_url, |config| config.relay.channel_capacity = 1);

    let response = dispatch(state, post_json("/api/stream", json!({"prompt": "hi"}))).await;
    let mut body = response.into_body().into_data_stream();
    let first = tokio::time::timeout(Duration::from_secs(5), body.next())
        .await
        .expect("first frame in time")
        .expect("first frame")
        .expect("frame bytes");
    assert_eq!(&first[..], b"data: {\"token\":\"Hi\"}\n\n");
    drop(body);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !released.load(Ordering::SeqCst) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "upstream stream was not released after client disconnect"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    server.abort();
}

#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;
use gemini_relay::config::AppConfig;
use gemini_relay::routing::dispatch::dispatch_request;
use gemini_relay::state::AppState;

pub const TEST_API_KEY: &str = "upstream-secret";

/// Bind `app` on an ephemeral port and return the `/v1beta` base URL.
pub async fn spawn_upstream(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/v1beta"), server)
}

pub fn build_state(base_url: String) -> Arc<AppState> {
    build_state_with(base_url, |_| {})
}

pub fn build_state_with(base_url: String, tweak: impl FnOnce(&mut AppConfig)) -> Arc<AppState> {
    let mut config = AppConfig::default();
    config.upstream.base_url = base_url;
    config.upstream.api_key = TEST_API_KEY.to_string();
    config.server.timeout = 5;
    tweak(&mut config);
    Arc::new(AppState::from_config(config).expect("state"))
}

/// An SSE response whose chunks are flushed separately.
pub fn sse_response(chunks: Vec<&'static str>) -> Response {
    let stream = futures_util::stream::iter(chunks).then(|chunk| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok::<_, Infallible>(Bytes::from_static(chunk.as_bytes()))
    });
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(stream))
        .expect("sse response")
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).expect("serialize")))
        .expect("build request")
}

pub async fn dispatch(state: Arc<AppState>, request: Request<Body>) -> Response {
    dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch")
}

pub async fn body_text(response: Response) -> String {
    let bytes = tokio::time::timeout(
        Duration::from_secs(10),
        axum::body::to_bytes(response.into_body(), usize::MAX),
    )
    .await
    .expect("body completes")
    .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

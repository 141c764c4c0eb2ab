use std::convert::Infallible;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpListener;

const DEFAULT_UPSTREAM_PORT: u16 = 19_001;
const DEFAULT_SPLIT_BYTES: usize = 7;
const DEFAULT_SPLIT_DELAY_MS: u64 = 20;

type MockBody = UnsyncBoxBody<Bytes, Infallible>;

#[derive(Copy, Clone)]
enum MockScenario {
    Text,
    Split,
    Safety,
    Error,
}

impl MockScenario {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Split => "split",
            Self::Safety => "safety",
            Self::Error => "error",
        }
    }
}

#[derive(Copy, Clone)]
enum GeminiAction {
    Stream,
    Generate,
}

struct MockState {
    scenario: MockScenario,
    split_bytes: usize,
    split_delay: Duration,
    stream_calls: AtomicU64,
    generate_calls: AtomicU64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let port = env_u16("UPSTREAM_PORT", DEFAULT_UPSTREAM_PORT);
    let state = Arc::new(MockState {
        scenario: parse_scenario(),
        split_bytes: env_parse("MOCK_SPLIT_BYTES", DEFAULT_SPLIT_BYTES).max(1),
        split_delay: Duration::from_millis(env_parse("MOCK_SPLIT_DELAY_MS", DEFAULT_SPLIT_DELAY_MS)),
        stream_calls: AtomicU64::new(0),
        generate_calls: AtomicU64::new(0),
    });

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap_or_else(|err| panic!("failed to bind mock upstream on 127.0.0.1:{port}: {err}"));
    eprintln!(
        "mock gemini upstream on 127.0.0.1:{port} (scenario={})",
        state.scenario.as_str()
    );

    let conn_builder = AutoBuilder::new(TokioExecutor::new());

    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok((stream, remote_addr)) => (stream, remote_addr),
            Err(err) => {
                eprintln!("accept error: {err}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let service_state = Arc::clone(&state);
        let service = service_fn(move |request: Request<Incoming>| {
            let state_ref = Arc::clone(&service_state);
            async move { Ok::<_, Infallible>(handle_request(request, &state_ref).await) }
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, service).await {
                eprintln!("mock upstream connection error from {remote_addr}: {err}");
            }
        });
    }
}

fn env_u16(name: &str, default: u16) -> u16 {
    env_parse(name, default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_scenario() -> MockScenario {
    match env::var("MOCK_SCENARIO").as_deref() {
        Ok("split") => MockScenario::Split,
        Ok("safety") => MockScenario::Safety,
        Ok("error") => MockScenario::Error,
        Ok("text") | Err(_) => MockScenario::Text,
        Ok(other) => {
            eprintln!("unknown MOCK_SCENARIO '{other}', fallback to text");
            MockScenario::Text
        }
    }
}

async fn handle_request(request: Request<Incoming>, state: &Arc<MockState>) -> Response<MockBody> {
    let (parts, body) = request.into_parts();
    drain_request_body(body).await;

    let method = parts.method;
    let path = parts.uri.path();

    if method == Method::GET && path == "/_mock/stats" {
        return stats_response(state);
    }
    if method != Method::POST {
        return simple_response_static(
            StatusCode::METHOD_NOT_ALLOWED,
            "application/json",
            br#"{"error":"method_not_allowed"}"#,
        );
    }

    let Some(action) = action_for_path(path) else {
        return simple_response_static(
            StatusCode::NOT_FOUND,
            "application/json",
            br#"{"error":{"code":404,"message":"model not found","status":"NOT_FOUND"}}"#,
        );
    };

    match action {
        GeminiAction::Stream => state.stream_calls.fetch_add(1, Ordering::Relaxed),
        GeminiAction::Generate => state.generate_calls.fetch_add(1, Ordering::Relaxed),
    };

    if matches!(state.scenario, MockScenario::Error) {
        return simple_response_static(
            StatusCode::SERVICE_UNAVAILABLE,
            "application/json",
            GEMINI_ERROR_UNAVAILABLE,
        );
    }

    match action {
        GeminiAction::Stream => streaming_response(state),
        GeminiAction::Generate => non_streaming_response(state.scenario),
    }
}

async fn drain_request_body(mut body: Incoming) {
    while let Some(frame_result) = body.frame().await {
        if frame_result.is_err() {
            break;
        }
    }
}

fn action_for_path(path: &str) -> Option<GeminiAction> {
    let rest = path.strip_prefix("/v1beta/models/")?;
    let (model, action) = rest.split_once(':')?;
    if model.is_empty() {
        return None;
    }
    match action {
        "streamGenerateContent" => Some(GeminiAction::Stream),
        "generateContent" => Some(GeminiAction::Generate),
        _ => None,
    }
}

fn stats_response(state: &MockState) -> Response<MockBody> {
    let body = format!(
        "{{\"scenario\":\"{}\",\"stream_calls\":{},\"generate_calls\":{}}}",
        state.scenario.as_str(),
        state.stream_calls.load(Ordering::Relaxed),
        state.generate_calls.load(Ordering::Relaxed),
    );
    simple_response(
        StatusCode::OK,
        "application/json",
        Bytes::from(body.into_bytes()),
    )
}

fn non_streaming_response(scenario: MockScenario) -> Response<MockBody> {
    let body = match scenario {
        MockScenario::Text | MockScenario::Split => GEMINI_NONSTREAM_TEXT,
        MockScenario::Safety => GEMINI_NONSTREAM_BLOCKED,
        MockScenario::Error => GEMINI_ERROR_UNAVAILABLE,
    };
    simple_response_static(StatusCode::OK, "application/json", body)
}

fn streaming_response(state: &MockState) -> Response<MockBody> {
    let mut response = match state.scenario {
        MockScenario::Split => {
            event_stream_response(split_body(GEMINI_STREAM_TEXT, state.split_bytes, state.split_delay))
        }
        MockScenario::Safety => {
            simple_response_static(StatusCode::OK, "text/event-stream", GEMINI_STREAM_SAFETY)
        }
        MockScenario::Text | MockScenario::Error => {
            simple_response_static(StatusCode::OK, "text/event-stream", GEMINI_STREAM_TEXT)
        }
    };
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Sends `payload` in fixed-size pieces so lines and multibyte characters
/// land across chunk boundaries.
fn split_body(payload: &'static [u8], piece: usize, delay: Duration) -> MockBody {
    let pieces = payload.chunks(piece).map(Bytes::from_static);
    let stream = futures_util::stream::unfold(pieces, move |mut pieces| async move {
        let next = pieces.next()?;
        tokio::time::sleep(delay).await;
        Some((Ok::<_, Infallible>(Frame::data(next)), pieces))
    });
    StreamBody::new(stream).boxed_unsync()
}

fn event_stream_response(body: MockBody) -> Response<MockBody> {
    let mut response = Response::new(body);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    response
}

fn simple_response(
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
) -> Response<MockBody> {
    let mut response = Response::new(Full::new(body).boxed_unsync());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn simple_response_static(
    status: StatusCode,
    content_type: &'static str,
    body: &'static [u8],
) -> Response<MockBody> {
    simple_response(status, content_type, Bytes::from_static(body))
}

const GEMINI_NONSTREAM_TEXT: &[u8] = br#"{"candidates":[{"content":{"parts":[{"text":"Hello from the mock"}],"role":"model"},"finishReason":"STOP","index":0}],"usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":4,"totalTokenCount":7},"modelVersion":"gemini-mock"}"#;
const GEMINI_NONSTREAM_BLOCKED: &[u8] = br#"{"promptFeedback":{"blockReason":"SAFETY"},"usageMetadata":{"promptTokenCount":3,"totalTokenCount":3}}"#;
const GEMINI_ERROR_UNAVAILABLE: &[u8] = br#"{"error":{"code":503,"message":"The model is overloaded. Please try again later.","status":"UNAVAILABLE"}}"#;
const GEMINI_STREAM_TEXT: &[u8] = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hello\"}],\"role\":\"model\"},\"index\":0}]}\r\n\r\ndata: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\", caf\u{e9} \u{1f600}\"}],\"role\":\"model\"},\"index\":0}]}\r\n\r\ndata: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"!\"}],\"role\":\"model\"},\"finishReason\":\"STOP\",\"index\":0}],\"usageMetadata\":{\"promptTokenCount\":3,\"candidatesTokenCount\":5,\"totalTokenCount\":8}}\r\n\r\n".as_bytes();
const GEMINI_STREAM_SAFETY: &[u8] = b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Sure\"}],\"role\":\"model\"},\"index\":0}]}\r\n\r\ndata: {\"candidates\":[{\"finishReason\":\"SAFETY\",\"index\":0,\"safetyRatings\":[{\"category\":\"HARM_CATEGORY_DANGEROUS_CONTENT\",\"probability\":\"HIGH\"}]}]}\r\n\r\n";

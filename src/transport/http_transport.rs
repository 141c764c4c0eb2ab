use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;

use crate::config::ServerConfig;
use crate::error::RelayError;
use crate::protocol::gemini::GeminiResponse;
use crate::util::sanitize_upstream_error;

use super::prepared_upstream::GeminiEndpoint;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, RelayError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none());

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| RelayError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| RelayError::Config(format!("Failed to build HTTP client: {err}")))
}

/// Pooled HTTP client for the Gemini upstream.
///
/// One attempt per call: a failed call is reported, never retried.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Create a transport with connection pooling and timeouts from the
    /// server config, routed through `proxy_url` when given.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the proxy URL is invalid or the
    /// client cannot be built.
    pub fn new(config: &ServerConfig, proxy_url: Option<&str>) -> Result<Self, RelayError> {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };
        let client = build_reqwest_client(
            config.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            config.http_use_env_proxy,
            proxy_url,
        )?;
        Ok(Self {
            client,
            request_timeout: Duration::from_secs(config.timeout),
        })
    }

    /// Open a `streamGenerateContent` call and return its body as a byte
    /// stream once the upstream has answered with a success status.
    ///
    /// The request timeout bounds the wait for response headers only; the
    /// body may stream for longer.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Upstream`] for a non-success status and
    /// [`RelayError::Transport`] when the upstream cannot be reached in time.
    pub async fn open_stream(
        &self,
        endpoint: &GeminiEndpoint,
        body: Bytes,
    ) -> Result<impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static, RelayError>
    {
        let request = self
            .client
            .post(endpoint.stream_url().clone())
            .headers(endpoint.static_headers().clone())
            .body(body)
            .send();
        let response = match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result.map_err(transport_error)?,
            Err(_) => {
                return Err(RelayError::Transport(format!(
                    "Upstream did not respond within {}s",
                    self.request_timeout.as_secs()
                )))
            }
        };
        let response = ensure_success(response).await?;
        Ok(response.bytes_stream())
    }

    /// Send a `generateContent` call and decode the JSON reply.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Upstream`] for a non-success status or an
    /// undecodable body, and [`RelayError::Transport`] for network failures.
    pub async fn send_generate(
        &self,
        endpoint: &GeminiEndpoint,
        body: Bytes,
    ) -> Result<GeminiResponse, RelayError> {
        let response = self
            .client
            .post(endpoint.generate_url().clone())
            .headers(endpoint.static_headers().clone())
            .timeout(self.request_timeout)
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success(response).await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        serde_json::from_slice(&bytes).map_err(|err| RelayError::Upstream {
            status: 502,
            message: format!("Invalid JSON from upstream: {err}"),
        })
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RelayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    let mut message = sanitize_upstream_error(&body);
    if message.is_empty() {
        message = status
            .canonical_reason()
            .unwrap_or("upstream error")
            .to_string();
    }
    tracing::warn!(status = status.as_u16(), message = %message, "upstream returned error status");
    Err(RelayError::Upstream {
        status: status.as_u16(),
        message,
    })
}

fn transport_error(err: reqwest::Error) -> RelayError {
    if err.is_timeout() {
        RelayError::Transport(format!("Upstream request timed out: {err}"))
    } else {
        RelayError::Transport(err.to_string())
    }
}

use crate::config::UpstreamConfig;
use crate::error::RelayError;

/// Precomputed Gemini endpoint data used by the hot request paths.
#[derive(Debug, Clone)]
pub struct GeminiEndpoint {
    model: String,
    upstream_host: String,
    stream_url: url::Url,
    generate_url: url::Url,
    static_headers: http::HeaderMap,
    proxy: Option<String>,
}

impl GeminiEndpoint {
    /// Build the endpoint from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the URLs cannot be parsed or the
    /// API key is not a valid header value.
    pub fn new(upstream: &UpstreamConfig) -> Result<Self, RelayError> {
        let base = upstream.base_url.trim_end_matches('/');
        let model = upstream.model.trim().to_string();
        let model_prefix = format!("{base}/models/{model}");

        let stream_url = parse_url(&format!("{model_prefix}:streamGenerateContent?alt=sse"))?;
        let generate_url = parse_url(&format!("{model_prefix}:generateContent"))?;
        let upstream_host = stream_url.host_str().unwrap_or_default().to_string();

        Ok(Self {
            model,
            upstream_host,
            stream_url,
            generate_url,
            static_headers: build_gemini_headers(upstream.api_key.trim())?,
            proxy: normalize_proxy(upstream.proxy.as_deref()),
        })
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Host part of the upstream URL, safe to show in status output.
    #[must_use]
    pub fn upstream_host(&self) -> &str {
        &self.upstream_host
    }

    #[must_use]
    pub fn stream_url(&self) -> &url::Url {
        &self.stream_url
    }

    #[must_use]
    pub fn generate_url(&self) -> &url::Url {
        &self.generate_url
    }

    #[must_use]
    pub fn static_headers(&self) -> &http::HeaderMap {
        &self.static_headers
    }

    #[must_use]
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }
}

fn parse_url(raw: &str) -> Result<url::Url, RelayError> {
    url::Url::parse(raw)
        .map_err(|err| RelayError::Config(format!("Invalid upstream URL '{raw}': {err}")))
}

fn build_gemini_headers(api_key: &str) -> Result<http::HeaderMap, RelayError> {
    let mut headers = http::HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    let mut key = http::HeaderValue::from_str(api_key)
        .map_err(|_| RelayError::Config("upstream.api_key is not a valid header value".into()))?;
    key.set_sensitive(true);
    headers.insert("x-goog-api-key", key);
    Ok(headers)
}

fn normalize_proxy(proxy: Option<&str>) -> Option<String> {
    proxy.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

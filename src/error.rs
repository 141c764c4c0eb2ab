use crate::protocol::error_shapes::error_payload;

/// Canonical error type used across all modules.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Response blocked by safety filters: {0}")]
    SafetyBlocked(String),
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    RateLimit,
    Safety,
    BadGateway,
    ServerError,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 => ErrorCategory::InvalidRequest,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        429 => ErrorCategory::RateLimit,
        _ => ErrorCategory::BadGateway,
    }
}

impl RelayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            RelayError::SafetyBlocked(_) => ErrorCategory::Safety,
            RelayError::Transport(_) | RelayError::Stream(_) => ErrorCategory::BadGateway,
            RelayError::Config(_) | RelayError::Internal(_) => ErrorCategory::ServerError,
            RelayError::Upstream { status, .. } => category_from_upstream_status(*status),
        }
    }

    /// Message written into a downstream `{"error": ...}` stream frame.
    ///
    /// Upstream messages are passed through; local faults collapse to a
    /// generic text so internal details do not leak to clients.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Upstream { status, message } => {
                if message.is_empty() {
                    format!("Upstream request failed with status {status}")
                } else {
                    format!("Upstream request failed with status {status}: {message}")
                }
            }
            RelayError::Transport(_) => "Failed to reach the upstream model service".to_string(),
            RelayError::SafetyBlocked(_) => {
                "The response was blocked by the upstream safety filters".to_string()
            }
            RelayError::InvalidRequest(message) | RelayError::Stream(message) => message.clone(),
            RelayError::Config(_) | RelayError::Internal(_) => {
                "Internal error while streaming the response".to_string()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Category -> HTTP status code
// ---------------------------------------------------------------------------

#[must_use]
pub fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => http::StatusCode::UNAUTHORIZED,
        ErrorCategory::Permission => http::StatusCode::FORBIDDEN,
        ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::Safety => http::StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCategory::BadGateway => http::StatusCode::BAD_GATEWAY,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Format an error as `(status_code, JSON body)` for non-streaming replies.
#[must_use]
pub fn format_error(err: &RelayError) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let status = http_status_for_category(cat);
    (status, error_payload(cat, &err.to_string()))
}

// ---------------------------------------------------------------------------
// Axum integration
// ---------------------------------------------------------------------------

impl axum::response::IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}

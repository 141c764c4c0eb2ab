pub mod dispatch;

pub use dispatch::{dispatch_request, normalize_base_path};

const CORS_ALLOW_METHODS: &str = "GET, POST, OPTIONS";
const CORS_ALLOW_HEADERS: &str = "content-type";

/// Add the CORS headers every response carries.
///
/// The origin is validated at config load; an origin that still fails to
/// encode falls back to `*`.
pub fn apply_cors_headers(headers: &mut http::HeaderMap, allow_origin: &str) {
    let origin = http::HeaderValue::from_str(allow_origin)
        .unwrap_or_else(|_| http::HeaderValue::from_static("*"));
    headers.insert(http::header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        http::header::ACCESS_CONTROL_ALLOW_METHODS,
        http::HeaderValue::from_static(CORS_ALLOW_METHODS),
    );
    headers.insert(
        http::header::ACCESS_CONTROL_ALLOW_HEADERS,
        http::HeaderValue::from_static(CORS_ALLOW_HEADERS),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_headers_are_set() {
        let mut headers = http::HeaderMap::new();
        apply_cors_headers(&mut headers, "https://app.example");
        assert_eq!(headers["access-control-allow-origin"], "https://app.example");
        assert_eq!(headers["access-control-allow-methods"], "GET, POST, OPTIONS");
        assert_eq!(headers["access-control-allow-headers"], "content-type");
    }
}

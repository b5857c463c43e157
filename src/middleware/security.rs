use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::AppState;

pub async fn security_headers_middleware(
    State(_state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    validate_request_security(&request)?;

    let mut response = next.run(request).await;
    add_security_headers(&mut response);

    Ok(response)
}

fn validate_request_security(request: &Request) -> Result<(), StatusCode> {
    let uri = request.uri();
    let path = uri.path();
    let query = uri.query().unwrap_or("");

    if contains_dangerous_patterns(path) || contains_dangerous_patterns(query) {
        warn!(path = %path, query = %query, "path traversal attempt rejected");
        return Err(StatusCode::BAD_REQUEST);
    }

    for (name, value) in request.headers().iter() {
        if value.len() > 8192 {
            warn!(header = %name, size = value.len(), "oversized header rejected");
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    Ok(())
}

fn contains_dangerous_patterns(input: &str) -> bool {
    let dangerous_patterns = [
        "../", "..\\", "..%2f", "..%5c", "%2e%2e%2f", "%2e%2e%5c", "etc/passwd", "windows/system32", "/proc/",
        "/sys/", "\\x00", "%00",
    ];

    let input_lower = input.to_lowercase();
    dangerous_patterns.iter().any(|&pattern| input_lower.contains(pattern))
}

fn add_security_headers(response: &mut Response) {
    let headers = response.headers_mut();

    headers.insert(HeaderName::from_static("x-content-type-options"), HeaderValue::from_static("nosniff"));
    headers.insert(HeaderName::from_static("x-frame-options"), HeaderValue::from_static("DENY"));
    headers.insert(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static("default-src 'none'; media-src 'self'; connect-src 'self'"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dangerous_patterns_are_detected() {
        assert!(contains_dangerous_patterns("../etc/passwd"));
        assert!(contains_dangerous_patterns("file.mp3?param=../../windows/system32"));
        assert!(!contains_dangerous_patterns("normal_file.mp3"));
        assert!(!contains_dangerous_patterns("music-track_01.wav"));
    }
}

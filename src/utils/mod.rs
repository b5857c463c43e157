pub mod metrics;

use crate::error::{AppError, Result};
use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

pub use metrics::*;

pub fn validate_filename(id: &str) -> Result<String> {
    if id.is_empty() || id.len() > 255 {
        return Err(AppError::Validation("invalid filename length".to_string()));
    }

    if id.contains("..") || id.contains('/') || id.contains('\\') {
        return Err(AppError::Validation("path traversal attempt detected".to_string()));
    }

    let filename = id.trim();
    let allowed_chars = filename
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == '_' || c == ' ');

    if !allowed_chars {
        return Err(AppError::Validation("invalid characters in filename".to_string()));
    }

    Ok(filename.to_string())
}

pub fn parse_range(header: &str, file_size: u64) -> Option<(u64, u64)> {
    let range_str = header.strip_prefix("bytes=")?;

    let (start_str, end_str) = range_str.split_once('-')?;
    let start = if start_str.is_empty() {
        0
    } else {
        start_str.parse::<u64>().ok()?
    };

    let end = if end_str.is_empty() {
        file_size.saturating_sub(1)
    } else {
        end_str.parse::<u64>().ok()?.min(file_size.saturating_sub(1))
    };

    if start <= end && start < file_size {
        Some((start, end))
    } else {
        None
    }
}

/// Serves a file with HTTP range support, used for both cached transcodes
/// and passthrough originals. `max_range_bytes` bounds how much of a range
/// request is read into memory at once; anything larger falls back to a
/// streamed full-body response.
pub async fn serve_partial_file(
    path: PathBuf,
    headers: HeaderMap,
    max_range_bytes: u64,
    mime_type: &str,
) -> Result<Response<Body>> {
    let file = File::open(&path)
        .await
        .map_err(|_| AppError::NotFound(format!("{}", path.display())))?;

    let metadata = file
        .metadata()
        .await
        .map_err(|err| AppError::Internal(format!("failed to read file metadata: {err}")))?;

    let file_size = metadata.len();

    if let Some(range_header) = headers.get("range") {
        if let Ok(range_str) = range_header.to_str() {
            if let Some((start, end)) = parse_range(range_str, file_size) {
                let content_length = end - start + 1;

                if content_length <= max_range_bytes {
                    use tokio::io::AsyncSeekExt;
                    let mut file = file;
                    file.seek(std::io::SeekFrom::Start(start))
                        .await
                        .map_err(|err| AppError::Internal(format!("failed to seek: {err}")))?;
                    let mut buffer = vec![0; content_length as usize];
                    file.read_exact(&mut buffer)
                        .await
                        .map_err(|err| AppError::Internal(format!("failed to read file range: {err}")))?;

                    let mut response = Response::builder()
                        .status(StatusCode::PARTIAL_CONTENT)
                        .header("Content-Length", content_length.to_string())
                        .header("Content-Range", format!("bytes {start}-{end}/{file_size}"))
                        .header("Content-Type", mime_type)
                        .header("Accept-Ranges", "bytes");

                    add_security_headers(&mut response);

                    return response
                        .body(Body::from(buffer))
                        .map_err(|err| AppError::Internal(format!("failed to build response: {err}")));
                }
            }
        }
    }

    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header("Content-Length", file_size.to_string())
        .header("Content-Type", mime_type)
        .header("Accept-Ranges", "bytes");

    add_security_headers(&mut response);

    response
        .body(body)
        .map_err(|err| AppError::Internal(format!("failed to build response: {err}")))
}

fn add_security_headers(response: &mut axum::http::response::Builder) {
    if let Some(headers) = response.headers_mut() {
        headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
        headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
        headers.insert(
            "Content-Security-Policy",
            HeaderValue::from_static("default-src 'none'; media-src 'self'"),
        );
        headers.insert("Referrer-Policy", HeaderValue::from_static("strict-origin-when-cross-origin"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_filename_rejects_traversal_and_separators() {
        assert!(validate_filename("test.mp3").is_ok());
        assert!(validate_filename("my-song_01.wav").is_ok());
        assert!(validate_filename("../../../etc/passwd").is_err());
        assert!(validate_filename("file/with/slash").is_err());
        assert!(validate_filename("file\\with\\backslash").is_err());
        assert!(validate_filename("").is_err());
    }

    #[test]
    fn parse_range_handles_closed_open_and_suffix_forms() {
        assert_eq!(parse_range("bytes=0-1023", 2048), Some((0, 1023)));
        assert_eq!(parse_range("bytes=1024-2047", 2048), Some((1024, 2047)));
        assert_eq!(parse_range("bytes=1024-", 2048), Some((1024, 2047)));
        assert_eq!(parse_range("bytes=-1024", 2048), Some((1024, 2047)));
        assert_eq!(parse_range("bytes=2048-", 2048), None);
        assert_eq!(parse_range("invalid", 2048), None);
    }
}

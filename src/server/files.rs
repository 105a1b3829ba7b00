//! File responses with HTTP range requests.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use std::io::SeekFrom;
use std::path::{Component, Path as FsPath, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use super::ServeContext;

/// Outcome of interpreting a `Range` header against a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// No usable range; serve the whole file.
    Full,
    /// Inclusive byte range.
    Partial { start: u64, end: u64 },
    /// Syntactically valid but outside the file.
    Unsatisfiable,
}

pub(super) async fn serve_root(
    State(ctx): State<ServeContext>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    serve(&ctx, &method, "", &headers).await
}

pub(super) async fn serve_file(
    State(ctx): State<ServeContext>,
    method: Method,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    serve(&ctx, &method, &path, &headers).await
}

async fn serve(ctx: &ServeContext, method: &Method, path: &str, headers: &HeaderMap) -> Response {
    if *method != Method::GET && *method != Method::HEAD {
        return status_text(StatusCode::METHOD_NOT_ALLOWED);
    }

    let file_path = match resolve_path(&ctx.root, path).await {
        Ok(p) => p,
        Err(status) => return status_text(status),
    };

    let file_size = match tokio::fs::metadata(&file_path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return status_text(StatusCode::NOT_FOUND),
    };

    let range = headers
        .get(header::RANGE)
        .and_then(|h| h.to_str().ok())
        .map(|s| parse_range_header(s, file_size))
        .unwrap_or(ByteRange::Full);

    tracing::debug!("{} {:?} {:?}", method, file_path, range);

    let head_only = *method == Method::HEAD;
    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type_for(&file_path))
        .header(header::ACCEPT_RANGES, "bytes");
    if ctx.cache_max_age_secs > 0 {
        builder = builder.header(
            header::CACHE_CONTROL,
            format!("max-age={}", ctx.cache_max_age_secs),
        );
    }

    let response = match range {
        ByteRange::Unsatisfiable => builder
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{}", file_size))
            .body(Body::empty()),
        ByteRange::Partial { start, end } => {
            let length = end - start + 1;
            let body = if head_only {
                Body::empty()
            } else {
                let mut file = match File::open(&file_path).await {
                    Ok(f) => f,
                    Err(_) => return status_text(StatusCode::NOT_FOUND),
                };
                if file.seek(SeekFrom::Start(start)).await.is_err() {
                    return status_text(StatusCode::INTERNAL_SERVER_ERROR);
                }
                Body::from_stream(ReaderStream::new(file.take(length)))
            };

            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, length.to_string())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, file_size),
                )
                .body(body)
        }
        ByteRange::Full => {
            let body = if head_only {
                Body::empty()
            } else {
                match File::open(&file_path).await {
                    Ok(file) => Body::from_stream(ReaderStream::new(file)),
                    Err(_) => return status_text(StatusCode::NOT_FOUND),
                }
            };

            builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, file_size.to_string())
                .body(body)
        }
    };

    response.unwrap_or_else(|e| {
        tracing::error!("Failed to build response: {}", e);
        status_text(StatusCode::INTERNAL_SERVER_ERROR)
    })
}

/// Map a request path onto the served root.
///
/// Parent or absolute components are refused outright; symlinks that lead
/// outside the root are refused after canonicalization.
async fn resolve_path(root: &FsPath, request: &str) -> Result<PathBuf, StatusCode> {
    let mut relative = PathBuf::new();
    for component in FsPath::new(request).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                tracing::warn!("Rejected path outside media root: {}", request);
                return Err(StatusCode::FORBIDDEN);
            }
        }
    }

    let resolved = tokio::fs::canonicalize(root.join(&relative))
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    if !resolved.starts_with(root) {
        tracing::warn!("Rejected link outside media root: {}", request);
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(resolved)
}

fn status_text(status: StatusCode) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain")],
        status.canonical_reason().unwrap_or_default(),
    )
        .into_response()
}

/// Parse HTTP Range header.
///
/// Supports formats:
/// - bytes=0-499
/// - bytes=500-
/// - bytes=-500 (last 500 bytes)
///
/// Malformed and multi-range headers are ignored.
pub fn parse_range_header(header: &str, file_size: u64) -> ByteRange {
    let Some(ranges) = header.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if ranges.contains(',') {
        return ByteRange::Full;
    }
    let Some((start, end)) = ranges.split_once('-') else {
        return ByteRange::Full;
    };

    let start = start.trim();
    let end = end.trim();

    match (start.is_empty(), end.is_empty()) {
        // bytes=-500 (last 500 bytes)
        (true, false) => {
            let Ok(suffix_len) = end.parse::<u64>() else {
                return ByteRange::Full;
            };
            if suffix_len == 0 || file_size == 0 {
                return ByteRange::Unsatisfiable;
            }
            ByteRange::Partial {
                start: file_size.saturating_sub(suffix_len),
                end: file_size - 1,
            }
        }
        // bytes=500- (from 500 to end)
        (false, true) => {
            let Ok(start) = start.parse::<u64>() else {
                return ByteRange::Full;
            };
            if start >= file_size {
                return ByteRange::Unsatisfiable;
            }
            ByteRange::Partial {
                start,
                end: file_size - 1,
            }
        }
        // bytes=0-499
        (false, false) => {
            let (Ok(start), Ok(end)) = (start.parse::<u64>(), end.parse::<u64>()) else {
                return ByteRange::Full;
            };
            if start > end {
                return ByteRange::Full;
            }
            if start >= file_size {
                return ByteRange::Unsatisfiable;
            }
            ByteRange::Partial {
                start,
                end: end.min(file_size - 1),
            }
        }
        // bytes=- (invalid)
        (true, true) => ByteRange::Full,
    }
}

/// MIME type by file extension.
pub fn content_type_for(path: &FsPath) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("mpd") => "application/dash+xml",
        Some("m4s") => "video/iso.segment",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_header() {
        // Standard range
        assert_eq!(
            parse_range_header("bytes=0-499", 1000),
            ByteRange::Partial { start: 0, end: 499 }
        );

        // Open-ended range
        assert_eq!(
            parse_range_header("bytes=500-", 1000),
            ByteRange::Partial { start: 500, end: 999 }
        );

        // Suffix range (last N bytes)
        assert_eq!(
            parse_range_header("bytes=-200", 1000),
            ByteRange::Partial { start: 800, end: 999 }
        );

        // Suffix larger than the file
        assert_eq!(
            parse_range_header("bytes=-5000", 1000),
            ByteRange::Partial { start: 0, end: 999 }
        );

        // End clamped to file size
        assert_eq!(
            parse_range_header("bytes=900-2000", 1000),
            ByteRange::Partial { start: 900, end: 999 }
        );
    }

    #[test]
    fn test_parse_range_header_unsatisfiable() {
        assert_eq!(
            parse_range_header("bytes=1000-", 1000),
            ByteRange::Unsatisfiable
        );
        assert_eq!(
            parse_range_header("bytes=1500-1600", 1000),
            ByteRange::Unsatisfiable
        );
        assert_eq!(parse_range_header("bytes=-0", 1000), ByteRange::Unsatisfiable);
        assert_eq!(parse_range_header("bytes=-10", 0), ByteRange::Unsatisfiable);
    }

    #[test]
    fn test_parse_range_header_ignored() {
        assert_eq!(parse_range_header("bytes=-", 1000), ByteRange::Full);
        assert_eq!(parse_range_header("items=0-10", 1000), ByteRange::Full);
        assert_eq!(parse_range_header("bytes=abc-def", 1000), ByteRange::Full);
        assert_eq!(parse_range_header("bytes=500-100", 1000), ByteRange::Full);
        assert_eq!(parse_range_header("bytes=0-1,5-9", 1000), ByteRange::Full);
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(
            content_type_for(FsPath::new("stream/master.m3u8")),
            "application/vnd.apple.mpegurl"
        );
        assert_eq!(
            content_type_for(FsPath::new("manifest.MPD")),
            "application/dash+xml"
        );
        assert_eq!(content_type_for(FsPath::new("seg1.m4s")), "video/iso.segment");
        assert_eq!(content_type_for(FsPath::new("init.mp4")), "video/mp4");
        assert_eq!(
            content_type_for(FsPath::new("notes.txt")),
            "application/octet-stream"
        );
        assert_eq!(content_type_for(FsPath::new("README")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_resolve_path_rejects_parent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(
            resolve_path(&root, "../etc/passwd").await,
            Err(StatusCode::FORBIDDEN)
        );
        assert_eq!(
            resolve_path(&root, "a/../../b").await,
            Err(StatusCode::FORBIDDEN)
        );
        assert_eq!(
            resolve_path(&root, "missing.m4s").await,
            Err(StatusCode::NOT_FOUND)
        );

        std::fs::write(root.join("init.mp4"), b"x").unwrap();
        assert_eq!(
            resolve_path(&root, "./init.mp4").await,
            Ok(root.join("init.mp4"))
        );
    }
}

//! Handlers for listing and serving result files.
//!
//! Manifests, segments, annotated videos and result records all live flat
//! in the results directory and are served by filename with HTTP range
//! support so players can seek.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{self, HeaderMap};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use reefwatch_core::error::CoreError;
use reefwatch_core::media;
use reefwatch_core::records::{self, ResultSummary};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Maximum bytes served for an open-ended range request (1 MiB).
const MAX_CHUNK_SIZE: u64 = 1024 * 1024;

/// Parse a `Range: bytes=START-END` header value.
///
/// Returns `(start, end)` where either side may be absent; a missing start
/// is a suffix range (`bytes=-N`). Multi-range requests are not supported
/// and parse as `None`.
fn parse_range_header(range: &str) -> Option<(Option<u64>, Option<u64>)> {
    let range = range.trim().strip_prefix("bytes=")?;
    if range.contains(',') {
        return None;
    }
    let (start, end) = range.split_once('-')?;
    let parse = |s: &str| -> Option<Option<u64>> {
        let s = s.trim();
        if s.is_empty() {
            Some(None)
        } else {
            s.parse::<u64>().ok().map(Some)
        }
    };
    let (start, end) = (parse(start)?, parse(end)?);
    if start.is_none() && end.is_none() {
        return None;
    }
    Some((start, end))
}

/// Resolve a parsed range against the file size into inclusive byte
/// offsets, or `None` when it cannot be satisfied.
fn resolve_range(start: Option<u64>, end: Option<u64>, file_size: u64) -> Option<(u64, u64)> {
    if file_size == 0 {
        return None;
    }
    let last = file_size - 1;
    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (start, end.min(last)),
        (Some(start), None) => (start, start.saturating_add(MAX_CHUNK_SIZE - 1).min(last)),
        (None, Some(suffix)) if suffix > 0 => (file_size.saturating_sub(suffix), last),
        _ => return None,
    };
    if start > last || start > end {
        return None;
    }
    Some((start, end))
}

fn cache_control(filename: &str) -> &'static str {
    // Manifests are small and may be re-read while a player starts up.
    if filename.ends_with(".m3u8") {
        "no-cache"
    } else {
        "public, max-age=3600"
    }
}

fn build(builder: axum::http::response::Builder, body: Body) -> AppResult<Response> {
    builder
        .body(body)
        .map_err(|e| AppError::InternalError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /results
///
/// Every processed upload, oldest first.
pub async fn list_results(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Vec<ResultSummary>>>> {
    let records = records::list_records(&state.config.results_dir).await?;
    let data = records.iter().map(ResultSummary::from).collect();
    Ok(Json(DataResponse { data }))
}

/// GET /results/{filename}
///
/// Serves one file from the results directory with range request support.
pub async fn get_result_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    if !media::is_safe_result_name(&filename) {
        return Err(AppError::BadRequest(format!("Invalid result filename '{filename}'")));
    }

    let path = state.config.results_dir.join(&filename);
    let not_found = || {
        AppError::Core(CoreError::NotFound {
            entity: "Result file",
            id: filename.clone(),
        })
    };

    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(not_found()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(AppError::InternalError(e.to_string())),
    };
    let file_size = metadata.len();
    let content_type = media::content_type_for_result(&filename);

    // Check for Range header.
    if let Some(range_value) = headers.get(header::RANGE) {
        let range_str = range_value
            .to_str()
            .map_err(|_| AppError::BadRequest("Invalid Range header".into()))?;

        if let Some((start, end)) = parse_range_header(range_str) {
            let Some((start, end)) = resolve_range(start, end, file_size) else {
                return build(
                    Response::builder()
                        .status(StatusCode::RANGE_NOT_SATISFIABLE)
                        .header(header::CONTENT_RANGE, format!("bytes */{file_size}"))
                        .header(header::ACCEPT_RANGES, "bytes"),
                    Body::empty(),
                );
            };

            let length = end - start + 1;

            let mut file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| AppError::InternalError(e.to_string()))?;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|e| AppError::InternalError(e.to_string()))?;

            let limited = file.take(length);
            let stream = ReaderStream::new(limited);

            return build(
                Response::builder()
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(header::CONTENT_TYPE, content_type)
                    .header(header::CONTENT_LENGTH, length.to_string())
                    .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{file_size}"))
                    .header(header::ACCEPT_RANGES, "bytes")
                    .header(header::CACHE_CONTROL, cache_control(&filename)),
                Body::from_stream(stream),
            );
        }
    }

    // No (usable) Range header: serve the full file.
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;
    let stream = ReaderStream::new(file);

    build(
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, file_size.to_string())
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CACHE_CONTROL, cache_control(&filename)),
        Body::from_stream(stream),
    )
}

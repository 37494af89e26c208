//! Media type rules for uploads and served result files.
//!
//! Upload validation happens before any bytes hit disk, so everything here
//! is pure string inspection.

use crate::error::CoreError;

/// Extensions accepted for video uploads when the client sends no usable
/// content type.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "webm", "mkv", "avi", "mpeg", "mpg", "ts"];

/// Extensions accepted for still-image uploads.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

const OCTET_STREAM: &str = "application/octet-stream";

/// Lowercased extension of a filename, without the dot.
pub fn extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Guess a video content type from a filename extension.
pub fn video_type_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "mp4" | "m4v" => Some("video/mp4"),
        "mov" => Some("video/quicktime"),
        "webm" => Some("video/webm"),
        "mkv" => Some("video/x-matroska"),
        "avi" => Some("video/x-msvideo"),
        "mpeg" | "mpg" => Some("video/mpeg"),
        "ts" => Some("video/mp2t"),
        _ => None,
    }
}

/// Resolve the effective content type of an uploaded video part.
///
/// A declared `video/*` type wins. A missing or `application/octet-stream`
/// type falls back to the filename extension. Anything else is rejected.
pub fn validate_video_upload(
    declared: Option<&str>,
    filename: Option<&str>,
) -> Result<String, CoreError> {
    let declared = declared
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty());

    match declared.as_deref() {
        Some(ct) if ct.starts_with("video/") => Ok(ct.to_string()),
        None | Some(OCTET_STREAM) => filename
            .and_then(extension)
            .and_then(|ext| video_type_for_extension(&ext))
            .map(str::to_string)
            .ok_or_else(|| {
                CoreError::UnsupportedMedia(format!(
                    "Could not determine a video type for '{}'",
                    filename.unwrap_or("upload")
                ))
            }),
        Some(other) => Err(CoreError::UnsupportedMedia(format!(
            "Expected a video upload, got '{other}'"
        ))),
    }
}

/// Whether an uploaded still image is acceptable.
pub fn validate_image_upload(declared: Option<&str>, filename: &str) -> Result<(), CoreError> {
    if let Some(ct) = declared {
        if ct.starts_with("image/") {
            return Ok(());
        }
    }
    match extension(filename) {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(CoreError::UnsupportedMedia(format!(
            "Expected an image upload, got '{filename}'"
        ))),
    }
}

/// File extension (with dot) used when storing an upload of the given type.
pub fn storage_extension(content_type: &str, original_filename: Option<&str>) -> String {
    if let Some(ext) = original_filename.and_then(extension) {
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            return format!(".{ext}");
        }
    }
    let ext = match content_type {
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "video/x-matroska" => "mkv",
        "video/x-msvideo" => "avi",
        "video/mpeg" => "mpeg",
        "video/mp2t" => "ts",
        _ => "mp4",
    };
    format!(".{ext}")
}

/// Content-Type for a file served from the results directory.
pub fn content_type_for_result(filename: &str) -> &'static str {
    match extension(filename).as_deref() {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Reduce a client-supplied filename to a safe display name.
///
/// Strips any directory components and replaces characters outside
/// `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Whether a requested result filename is a plain file name inside the
/// results directory (no separators, no parent references).
pub fn is_safe_result_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['/', '\\', '\0'])
        && name != "."
        && !name.contains("..")
}

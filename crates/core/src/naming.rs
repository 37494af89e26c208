//! Result file naming convention.
//!
//! Every artifact produced for an upload shares the `result_{id}` stem, so
//! results from concurrent uploads never collide in the flat results
//! directory:
//!
//! - `result_{id}.mp4`       annotated video
//! - `result_{id}.m3u8`      HLS manifest
//! - `result_{id}_{n:03}.ts` HLS segments
//! - `result_{id}.json`      result record

use crate::types::VideoId;

pub const RESULT_PREFIX: &str = "result_";
pub const RECORD_EXTENSION: &str = "json";

/// Shared stem for all artifacts of one upload.
pub fn result_stem(id: &VideoId) -> String {
    format!("{RESULT_PREFIX}{id}")
}

pub fn video_filename(id: &VideoId) -> String {
    format!("{}.mp4", result_stem(id))
}

pub fn manifest_filename(id: &VideoId) -> String {
    format!("{}.m3u8", result_stem(id))
}

pub fn record_filename(id: &VideoId) -> String {
    format!("{}.{RECORD_EXTENSION}", result_stem(id))
}

/// ffmpeg `-hls_segment_filename` pattern for an upload.
pub fn segment_pattern(id: &VideoId) -> String {
    format!("{}_%03d.ts", result_stem(id))
}

/// Name of an annotated still image inside a batch.
pub fn image_result_filename(batch_id: &VideoId, index: usize, ext: &str) -> String {
    format!("{RESULT_PREFIX}img_{batch_id}_{index:03}.{ext}")
}

/// Public URL path for a file in the results directory.
pub fn result_url(filename: &str) -> String {
    format!("/results/{filename}")
}

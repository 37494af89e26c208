//! HLS packaging of an annotated video.

use std::path::Path;

use reefwatch_core::ffmpeg::{self, FfmpegTools};
use reefwatch_core::hls::MediaPlaylist;
use reefwatch_core::naming;
use reefwatch_core::records::ProcessedVideo;
use reefwatch_core::types::VideoId;

use crate::error::PipelineError;

/// Segment `result_{id}.mp4` into `result_{id}.m3u8` plus `.ts` segments in
/// `results_dir`, then verify the manifest covers `expected_secs`.
pub async fn package(
    tools: &FfmpegTools,
    results_dir: &Path,
    id: &VideoId,
    segment_secs: u32,
    expected_secs: f64,
) -> Result<ProcessedVideo, PipelineError> {
    let video_filename = naming::video_filename(id);
    let manifest_filename = naming::manifest_filename(id);
    let manifest_path = results_dir.join(&manifest_filename);

    ffmpeg::package_hls(
        tools,
        &results_dir.join(&video_filename),
        &manifest_path,
        &results_dir.join(naming::segment_pattern(id)),
        segment_secs,
    )
    .await?;

    let playlist = MediaPlaylist::load(&manifest_path).await?;
    playlist.verify(results_dir, expected_secs, segment_secs as f64)?;

    tracing::info!(
        video_id = %id,
        segments = playlist.segments.len(),
        duration_secs = playlist.total_duration(),
        "Packaged HLS stream"
    );

    Ok(ProcessedVideo {
        id: *id,
        video_filename,
        manifest_filename,
        segment_filenames: playlist.segment_uris().map(str::to_string).collect(),
        duration_secs: playlist.total_duration(),
    })
}

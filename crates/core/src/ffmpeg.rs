//! FFmpeg/FFprobe shared command utilities.
//!
//! Probing and HLS packaging run as async subprocesses. The raw-frame
//! decode/encode pipes are spawned by the pipeline crate from the argument
//! lists built here, so the exact command lines stay testable.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Frame rate used when the container does not report one.
pub const FALLBACK_FRAME_RATE: &str = "30/1";

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("video file not found: {0}")]
    VideoNotFound(String),

    #[error("no video stream in {0}")]
    NoVideoStream(String),
}

/// Locations of the external tools.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegTools {
    /// Run `-version` on both binaries. Used at startup so a missing tool is
    /// a configuration error rather than a request-time failure.
    pub async fn verify(&self) -> Result<String, FfmpegError> {
        let version = tool_version(&self.ffmpeg).await?;
        tool_version(&self.ffprobe).await?;
        Ok(version)
    }
}

async fn tool_version(binary: &Path) -> Result<String, FfmpegError> {
    let output = tokio::process::Command::new(binary)
        .arg("-version")
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string())
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Default, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    /// Coded size, before any display rotation.
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Mean rate over the stream, e.g. "30/1". Reliable for variable-rate
    /// sources, where `r_frame_rate` is often a timebase such as "1000/1".
    pub avg_frame_rate: Option<String>,
    /// e.g. "30/1" or "24000/1001"
    pub r_frame_rate: Option<String>,
    pub duration: Option<String>,
    pub nb_frames: Option<String>,
    #[serde(default)]
    pub side_data_list: Vec<FfprobeSideData>,
    pub tags: Option<FfprobeTags>,
}

/// Stream side data; only the display matrix rotation is read.
#[derive(Debug, Default, Deserialize)]
pub struct FfprobeSideData {
    pub rotation: Option<f64>,
}

/// Stream tags. Older muxers store rotation as `rotate`.
#[derive(Debug, Default, Deserialize)]
pub struct FfprobeTags {
    pub rotate: Option<String>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Default, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
}

/// The subset of probe data the pipeline needs.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    /// Display size. This is the size of the frames the decoder emits,
    /// since ffmpeg applies the display rotation while decoding.
    pub width: u32,
    pub height: u32,
    /// Clockwise display rotation in degrees, normalized to `0..360`.
    pub rotation: u32,
    /// Frame rate as a rational string, passed through to the encoder.
    pub frame_rate: String,
    pub fps: f64,
    pub duration_secs: f64,
    pub total_frames: u64,
}

impl VideoInfo {
    /// Bytes in one packed RGB24 frame.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run `ffprobe` on a video file and return the parsed JSON output.
pub async fn probe_video(tools: &FfmpegTools, path: &Path) -> Result<FfprobeOutput, FfmpegError> {
    if !path.exists() {
        return Err(FfmpegError::VideoNotFound(
            path.to_string_lossy().to_string(),
        ));
    }

    let output = tokio::process::Command::new(&tools.ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str::<FfprobeOutput>(&stdout)
        .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))
}

/// Probe a video and reduce the output to [`VideoInfo`].
pub async fn video_info(tools: &FfmpegTools, path: &Path) -> Result<VideoInfo, FfmpegError> {
    let probe = probe_video(tools, path).await?;
    summarize(&probe).ok_or_else(|| FfmpegError::NoVideoStream(path.to_string_lossy().to_string()))
}

/// Segment an annotated video into an HLS VOD playlist.
///
/// Segments are written next to the manifest using `segment_pattern`
/// (an ffmpeg `%03d` template), and the manifest references them by bare
/// filename.
pub async fn package_hls(
    tools: &FfmpegTools,
    input: &Path,
    manifest: &Path,
    segment_pattern: &Path,
    segment_secs: u32,
) -> Result<(), FfmpegError> {
    if !input.exists() {
        return Err(FfmpegError::VideoNotFound(
            input.to_string_lossy().to_string(),
        ));
    }

    let output = tokio::process::Command::new(&tools.ffmpeg)
        .args(hls_args(input, manifest, segment_pattern, segment_secs))
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Argument builders
// ---------------------------------------------------------------------------

/// Arguments for decoding `input` to packed RGB24 frames on stdout.
///
/// Autorotation stays on, so frames arrive upright at the display size
/// reported in [`VideoInfo`].
pub fn decode_args(input: &Path) -> Vec<String> {
    let mut args = vec![
        "-nostdin".to_string(),
        "-v".into(),
        "error".into(),
        "-i".into(),
    ];
    args.push(input.to_string_lossy().to_string());
    args.extend(
        ["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-vsync", "passthrough", "-"]
            .map(String::from),
    );
    args
}

/// Arguments for encoding packed RGB24 frames from stdin into an H.264 mp4.
///
/// Keyframes are forced every `segment_secs` so the later stream-copy HLS
/// step can cut segments at exact boundaries. Odd dimensions are padded to
/// even, which yuv420p requires.
pub fn encode_args(info: &VideoInfo, output: &Path, segment_secs: u32) -> Vec<String> {
    let mut args: Vec<String> = [
        "-nostdin",
        "-y",
        "-v",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgb24",
    ]
    .map(String::from)
    .to_vec();
    args.push("-s".into());
    args.push(format!("{}x{}", info.width, info.height));
    args.push("-r".into());
    args.push(info.frame_rate.clone());
    args.extend(["-i", "-", "-an"].map(String::from));
    args.push("-vf".into());
    args.push("pad=ceil(iw/2)*2:ceil(ih/2)*2".into());
    args.extend(
        ["-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p"].map(String::from),
    );
    args.push("-force_key_frames".into());
    args.push(format!("expr:gte(t,n_forced*{segment_secs})"));
    args.extend(["-movflags", "+faststart"].map(String::from));
    args.push(output.to_string_lossy().to_string());
    args
}

/// Arguments for stream-copy HLS segmentation.
pub fn hls_args(input: &Path, manifest: &Path, segment_pattern: &Path, segment_secs: u32) -> Vec<String> {
    let mut args: Vec<String> = ["-nostdin", "-y", "-v", "error", "-i"].map(String::from).to_vec();
    args.push(input.to_string_lossy().to_string());
    args.extend(["-c", "copy", "-f", "hls"].map(String::from));
    args.push("-hls_time".into());
    args.push(segment_secs.to_string());
    args.extend(
        ["-hls_playlist_type", "vod", "-hls_list_size", "0", "-hls_segment_filename"]
            .map(String::from),
    );
    args.push(segment_pattern.to_string_lossy().to_string());
    args.push(manifest.to_string_lossy().to_string());
    args
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Find the first video stream in the ffprobe output.
fn first_video_stream(probe: &FfprobeOutput) -> Option<&FfprobeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
}

/// The stream's usable frame rate: `avg_frame_rate`, then `r_frame_rate`.
fn stream_frame_rate(stream: &FfprobeStream) -> Option<&str> {
    [stream.avg_frame_rate.as_deref(), stream.r_frame_rate.as_deref()]
        .into_iter()
        .flatten()
        .find(|r| parse_fraction(r) > 0.0)
}

/// Clockwise display rotation of a stream in degrees (`0..360`).
///
/// The display matrix `rotation` is counter-clockwise; the legacy `rotate`
/// tag is clockwise.
pub fn parse_rotation(stream: &FfprobeStream) -> u32 {
    let degrees = stream
        .side_data_list
        .iter()
        .find_map(|d| d.rotation)
        .map(|r| -r)
        .or_else(|| {
            stream
                .tags
                .as_ref()
                .and_then(|t| t.rotate.as_deref())
                .and_then(|r| r.trim().parse::<f64>().ok())
        })
        .unwrap_or(0.0);
    (degrees.round() as i64).rem_euclid(360) as u32
}

/// Reduce probe output to [`VideoInfo`]. `None` when there is no usable
/// video stream.
pub fn summarize(probe: &FfprobeOutput) -> Option<VideoInfo> {
    let stream = first_video_stream(probe)?;
    let (coded_width, coded_height) = (stream.width?, stream.height?);
    if coded_width == 0 || coded_height == 0 {
        return None;
    }

    let rotation = parse_rotation(stream);
    let (width, height) = if rotation == 90 || rotation == 270 {
        (coded_height, coded_width)
    } else {
        (coded_width, coded_height)
    };

    let frame_rate = stream_frame_rate(stream)
        .unwrap_or(FALLBACK_FRAME_RATE)
        .to_string();

    Some(VideoInfo {
        width,
        height,
        rotation,
        fps: parse_fraction(&frame_rate),
        frame_rate,
        duration_secs: parse_duration(probe),
        total_frames: parse_total_frames(probe),
    })
}

/// Parse the video duration in seconds from ffprobe output.
pub fn parse_duration(probe: &FfprobeOutput) -> f64 {
    // Try format-level duration first.
    if let Some(d) = &probe.format.duration {
        if let Ok(secs) = d.parse::<f64>() {
            return secs;
        }
    }
    // Fall back to the first video stream's duration.
    first_video_stream(probe)
        .and_then(|s| s.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Parse the video framerate from ffprobe output, preferring
/// `avg_frame_rate` over `r_frame_rate`. Both are fractions like `"30/1"`
/// or `"24000/1001"`.
pub fn parse_framerate(probe: &FfprobeOutput) -> f64 {
    first_video_stream(probe)
        .and_then(stream_frame_rate)
        .map(parse_fraction)
        .unwrap_or(0.0)
}

/// Parse a fraction string like `"30/1"` into a float.
pub fn parse_fraction(s: &str) -> f64 {
    if let Some((num, den)) = s.split_once('/') {
        let num = num.parse::<f64>().unwrap_or(0.0);
        let den = den.parse::<f64>().unwrap_or(0.0);
        return if den > 0.0 { num / den } else { 0.0 };
    }
    s.parse::<f64>().unwrap_or(0.0)
}

/// Count total frames from ffprobe output.
pub fn parse_total_frames(probe: &FfprobeOutput) -> u64 {
    if let Some(n) = first_video_stream(probe)
        .and_then(|s| s.nb_frames.as_deref())
        .and_then(|nb| nb.parse::<u64>().ok())
    {
        return n;
    }
    // Estimate from duration * framerate.
    let duration = parse_duration(probe);
    let fps = parse_framerate(probe);
    if duration > 0.0 && fps > 0.0 {
        return (duration * fps).round() as u64;
    }
    0
}

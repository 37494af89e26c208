//! Domain layer shared by the pipeline and the HTTP server: detection
//! types, media rules, result naming, result records, the ffmpeg/ffprobe
//! command layer and the HLS playlist model.

pub mod detection;
pub mod error;
pub mod ffmpeg;
pub mod hls;
pub mod media;
pub mod naming;
pub mod records;
pub mod types;

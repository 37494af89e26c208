use std::path::PathBuf;

/// Tunables for the processing pipeline.
///
/// Built by the server from environment variables; see
/// `reefwatch_api::config::ServerConfig::from_env`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Where annotated videos, manifests, segments and records are written.
    pub results_dir: PathBuf,
    /// Target HLS segment length in seconds.
    pub segment_secs: u32,
    /// Run inference on every Nth frame (1 = every frame).
    pub frame_stride: u32,
    /// Maximum number of uploads processed at once.
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            segment_secs: 4,
            frame_stride: 1,
            concurrency: 2,
        }
    }
}

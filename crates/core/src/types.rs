/// Uploads, results and jobs are keyed by time-ordered UUIDs (v7), so
/// lexical order of ids follows creation order.
pub type VideoId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh, collision-resistant id for an upload.
pub fn new_video_id() -> VideoId {
    uuid::Uuid::now_v7()
}

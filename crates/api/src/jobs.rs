//! In-memory registry of asynchronous prediction jobs.
//!
//! Jobs are created by `POST /predict/video?async=true` and polled through
//! `GET /jobs/{id}`. The registry lives only as long as the process, and
//! finished jobs are dropped once they are older than the retention window.

use std::collections::HashMap;

use reefwatch_core::types::{Timestamp, VideoId};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::response::VideoPredictionResponse;

/// How long a finished job stays pollable.
pub const FINISHED_JOB_RETENTION_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Done { result: VideoPredictionResponse },
    Failed { message: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done { .. } | JobStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: VideoId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(flatten)]
    pub status: JobStatus,
}

#[derive(Debug)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<VideoId, Job>>,
    retention: chrono::Duration,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(chrono::Duration::seconds(FINISHED_JOB_RETENTION_SECS))
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: chrono::Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Register a new queued job. The id is the upload's video id, so the
    /// job's eventual result shares it. Expired finished jobs are pruned
    /// first.
    pub async fn create(&self, id: VideoId) -> Job {
        let now = chrono::Utc::now();
        let job = Job {
            id,
            created_at: now,
            updated_at: now,
            status: JobStatus::Queued,
        };
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && now - job.updated_at >= self.retention));
        let pruned = before - jobs.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned finished jobs");
        }
        jobs.insert(id, job.clone());
        job
    }

    /// Move a job to `status`. Terminal jobs are never reopened.
    pub async fn update(&self, id: VideoId, status: JobStatus) {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status.is_terminal() => {
                tracing::warn!(job_id = %id, "Ignoring update to finished job");
            }
            Some(job) => {
                job.status = status;
                job.updated_at = chrono::Utc::now();
            }
            None => tracing::warn!(job_id = %id, "Update for unknown job"),
        }
    }

    pub async fn get(&self, id: VideoId) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }
}

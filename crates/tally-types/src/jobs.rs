use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of vote-recording work handed from the API to the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteJob {
    pub job_id: Uuid,
    pub poll_id: Uuid,
    pub question_id: Uuid,
    pub choice_id: Uuid,
    pub user_id: Uuid,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued or in flight; the vote may not be visible yet.
    Pending,
    Recorded { vote_id: Uuid },
    Failed { reason: String },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Returned by `POST /polls/{id}/vote` (status `pending`) and `GET /jobs/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    pub job_id: Uuid,
    pub poll_id: Uuid,
    #[serde(flatten)]
    pub status: JobStatus,
}

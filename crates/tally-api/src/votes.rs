use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use tally_db::parse_timestamp;
use tally_types::api::{Claims, VoteRequest};
use tally_types::jobs::{JobResponse, JobStatus};

use crate::convert;
use crate::error::{ApiError, blocking};
use crate::middleware::AuthUser;
use crate::state::AppState;

/// Validate a vote against the poll and hand it to the worker pool.
///
/// Everything that can be checked cheaply is checked here so the caller gets
/// a synchronous error; the store re-checks all of it, and the uniqueness
/// constraint stays the final word on duplicates.
pub(crate) async fn submit(
    state: &AppState,
    claims: &Claims,
    poll_id: Uuid,
    req: VoteRequest,
) -> Result<JobResponse, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub.to_string();
    let choice_id = req.choice_id.to_string();

    let question_id = blocking(move || {
        let poll = db
            .get_poll_row(&poll_id.to_string())?
            .ok_or_else(|| ApiError::not_found("poll"))?;
        if !poll.is_active {
            return Err(ApiError::Validation("This poll is closed.".to_string()));
        }
        let ended = poll
            .end_date
            .as_deref()
            .and_then(parse_timestamp)
            .is_some_and(|end| end <= chrono::Utc::now());
        if ended {
            return Err(ApiError::Validation("This poll has ended.".to_string()));
        }

        let (_choice, question) = db
            .get_choice_with_question(&choice_id)?
            .ok_or_else(|| ApiError::not_found("choice"))?;
        if question.poll_id != poll.id {
            return Err(ApiError::Validation(
                "Choice does not belong to this poll.".to_string(),
            ));
        }
        if let Some(expected) = req.question_id {
            if expected.to_string() != question.id {
                return Err(ApiError::Validation(
                    "Choice does not belong to the question.".to_string(),
                ));
            }
        }

        if db.has_voted(&question.id, &user_id)? {
            return Err(ApiError::ConstraintViolation(
                "You have already voted on this question.".to_string(),
            ));
        }
        Ok(question.id)
    })
    .await?;

    let question_id = convert::uuid(&question_id, "question id");
    let job_id = state
        .queue
        .submit(poll_id, question_id, req.choice_id, claims.sub)?;

    info!(
        "Vote job {} accepted: user {} -> choice {} on poll {}",
        job_id, claims.username, req.choice_id, poll_id
    );
    Ok(JobResponse {
        job_id,
        poll_id,
        status: JobStatus::Pending,
    })
}

/// POST /polls/{poll_id}/vote: `202 Accepted` with a job id; the vote is
/// recorded out-of-band.
pub async fn submit_vote(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
    AuthUser(claims): AuthUser,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let accepted = submit(&state, &claims, poll_id, req).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

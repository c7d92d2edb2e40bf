use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use tally_types::api::Claims;
use tally_types::jobs::JobResponse;

use crate::error::ApiError;
use crate::state::AppState;

/// Status of a vote job submitted by `claims`. Other users' jobs look the
/// same as unknown ones.
pub(crate) fn lookup(state: &AppState, claims: &Claims, job_id: Uuid) -> Option<JobResponse> {
    state
        .queue
        .status(job_id)
        .filter(|record| record.owner == claims.sub)
        .map(|record| JobResponse {
            job_id,
            poll_id: record.poll_id,
            status: record.status,
        })
}

/// GET /jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let job = lookup(&state, &claims, job_id).ok_or_else(|| ApiError::not_found("job"))?;
    Ok(Json(job))
}

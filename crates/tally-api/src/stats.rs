use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::debug;
use uuid::Uuid;

use tally_types::stats::PollStats;

use crate::convert;
use crate::error::{ApiError, blocking};
use crate::state::AppState;

/// Stats for one poll, served from the cache when fresh.
pub(crate) async fn compute(state: &AppState, poll_id: Uuid) -> Result<PollStats, ApiError> {
    if let Some(stats) = state.cache.get(poll_id) {
        return Ok(stats);
    }

    let generation = state.cache.generation(poll_id);
    let db = state.db.clone();
    let tree = blocking(move || Ok(db.get_poll(&poll_id.to_string())?))
        .await?
        .ok_or_else(|| ApiError::not_found("poll"))?;

    let stats = convert::poll_stats(tree);
    if state.cache.set(poll_id, stats.clone(), generation) {
        debug!("Stats for poll {} recomputed ({} votes)", poll_id, stats.total_votes);
    } else {
        debug!("Stats for poll {} changed while computing; not cached", poll_id);
    }
    Ok(stats)
}

/// GET /polls/{poll_id}/stats
pub async fn get_stats(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(compute(&state, poll_id).await?))
}

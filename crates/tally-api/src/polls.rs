use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use tally_db::format_timestamp;
use tally_db::models::{ChoiceEdit, NewPoll, NewQuestion, PollEdit, PollRow, QuestionEdit};
use tally_types::api::{Claims, CreatePollRequest, PollResponse, UpdatePollRequest};

use crate::convert;
use crate::error::{ApiError, blocking};
use crate::middleware::AuthUser;
use crate::state::AppState;

// -- Shared by REST and GraphQL --

pub(crate) async fn list_active(state: &AppState) -> Result<Vec<PollResponse>, ApiError> {
    let db = state.db.clone();
    let trees = blocking(move || Ok(db.list_active_polls()?)).await?;
    Ok(trees.into_iter().map(convert::poll_response).collect())
}

pub(crate) async fn fetch(state: &AppState, poll_id: Uuid) -> Result<Option<PollResponse>, ApiError> {
    let db = state.db.clone();
    let tree = blocking(move || Ok(db.get_poll(&poll_id.to_string())?)).await?;
    Ok(tree.map(convert::poll_response))
}

pub(crate) async fn create(
    state: &AppState,
    claims: &Claims,
    req: CreatePollRequest,
) -> Result<PollResponse, ApiError> {
    req.validate(chrono::Utc::now())?;

    let new = NewPoll {
        title: req.title.trim().to_string(),
        description: req.description.filter(|d| !d.trim().is_empty()),
        end_date: req.end_date.map(format_timestamp),
        created_by: claims.sub.to_string(),
        questions: req
            .questions
            .into_iter()
            .map(|q| NewQuestion {
                text: q.text,
                choices: q.choices.into_iter().map(|c| c.text).collect(),
            })
            .collect(),
    };

    let db = state.db.clone();
    let tree = blocking(move || Ok(db.create_poll(&new)?)).await?;
    info!("User {} created poll {}", claims.username, tree.poll.id);
    Ok(convert::poll_response(tree))
}

pub(crate) async fn update(
    state: &AppState,
    claims: &Claims,
    poll_id: Uuid,
    req: UpdatePollRequest,
) -> Result<PollResponse, ApiError> {
    // Reported only once the caller is known to own the poll
    let invalid = req.validate(chrono::Utc::now()).err();

    let confirm_reset = req.confirm_reset;
    let edit = PollEdit {
        title: req.title.map(|t| t.trim().to_string()),
        description: req.description,
        end_date: req.end_date.map(|end| end.map(format_timestamp)),
        is_active: req.is_active,
        questions: req.questions.map(|questions| {
            questions
                .into_iter()
                .map(|q| QuestionEdit {
                    id: q.id.map(|id| id.to_string()),
                    text: q.text,
                    choices: q
                        .choices
                        .into_iter()
                        .map(|c| ChoiceEdit {
                            id: c.id.map(|id| id.to_string()),
                            text: c.text,
                        })
                        .collect(),
                })
                .collect()
        }),
    };

    let db = state.db.clone();
    let caller = claims.sub;
    let (outcome, tree) = blocking(move || {
        let id = poll_id.to_string();
        let poll = db.get_poll_row(&id)?.ok_or_else(|| ApiError::not_found("poll"))?;
        ensure_owner(&poll, caller, "update")?;
        if let Some(err) = invalid {
            return Err(err.into());
        }

        let outcome = db.update_poll(&id, &edit, confirm_reset)?;
        let tree = db.get_poll(&id)?.ok_or_else(|| ApiError::not_found("poll"))?;
        Ok((outcome, tree))
    })
    .await?;

    state.cache.invalidate(poll_id);
    if outcome.votes_reset > 0 {
        info!(
            "User {} reset {} votes on poll {}",
            claims.username, outcome.votes_reset, poll_id
        );
    }
    Ok(convert::poll_response(tree))
}

pub(crate) async fn delete(state: &AppState, claims: &Claims, poll_id: Uuid) -> Result<(), ApiError> {
    let db = state.db.clone();
    let caller = claims.sub;
    blocking(move || {
        let id = poll_id.to_string();
        let poll = db.get_poll_row(&id)?.ok_or_else(|| ApiError::not_found("poll"))?;
        ensure_owner(&poll, caller, "delete")?;

        if !db.delete_poll(&id)? {
            return Err(ApiError::not_found("poll"));
        }
        Ok(())
    })
    .await?;

    state.cache.invalidate(poll_id);
    info!("User {} deleted poll {}", claims.username, poll_id);
    Ok(())
}

fn ensure_owner(poll: &PollRow, caller: Uuid, action: &str) -> Result<(), ApiError> {
    if poll.created_by != caller.to_string() {
        return Err(ApiError::PermissionDenied(format!(
            "You can only {} your own polls.",
            action
        )));
    }
    Ok(())
}

// -- Handlers --

/// GET /polls: active polls with their questions and choices.
pub async fn list_polls(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(list_active(&state).await?))
}

/// POST /polls
pub async fn create_poll(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    payload: Result<Json<CreatePollRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let poll = create(&state, &claims, req).await?;
    Ok((StatusCode::CREATED, Json(poll)))
}

/// GET /polls/{poll_id}
pub async fn get_poll(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let poll = fetch(&state, poll_id)
        .await?
        .ok_or_else(|| ApiError::not_found("poll"))?;
    Ok(Json(poll))
}

/// PUT/PATCH /polls/{poll_id}
pub async fn update_poll(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
    AuthUser(claims): AuthUser,
    payload: Result<Json<UpdatePollRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    Ok(Json(update(&state, &claims, poll_id, req).await?))
}

/// DELETE /polls/{poll_id}
pub async fn delete_poll(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
    AuthUser(claims): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    delete(&state, &claims, poll_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

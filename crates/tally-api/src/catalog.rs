//! Read-only listings of questions and choices.

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use crate::convert;
use crate::error::{ApiError, blocking};
use crate::state::AppState;

pub async fn list_questions(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let questions = blocking(move || Ok(db.list_questions()?)).await?;
    Ok(Json(
        questions
            .into_iter()
            .map(convert::question_response)
            .collect::<Vec<_>>(),
    ))
}

pub async fn get_question(
    State(state): State<AppState>,
    Path(question_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let question = blocking(move || Ok(db.get_question(&question_id.to_string())?))
        .await?
        .ok_or_else(|| ApiError::not_found("question"))?;
    Ok(Json(convert::question_response(question)))
}

pub async fn list_choices(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let choices = blocking(move || Ok(db.list_choices()?)).await?;
    Ok(Json(
        choices
            .into_iter()
            .map(convert::choice_response)
            .collect::<Vec<_>>(),
    ))
}

pub async fn get_choice(
    State(state): State<AppState>,
    Path(choice_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let choice = blocking(move || Ok(db.get_choice(&choice_id.to_string())?))
        .await?
        .ok_or_else(|| ApiError::not_found("choice"))?;
    Ok(Json(convert::choice_response(choice)))
}

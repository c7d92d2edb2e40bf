use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared by the REST extractors and the GraphQL handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

// -- Polls --

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePollRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub questions: Vec<CreateQuestion>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateQuestion {
    pub text: String,
    #[serde(default)]
    pub choices: Vec<CreateChoice>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChoice {
    pub text: String,
}

/// Body of `PUT`/`PATCH /polls/{id}`. Absent fields are left untouched;
/// `"end_date": null` clears the end date.
///
/// `questions`, when present, is the complete new structure of the poll:
/// entries with an `id` update the existing question or choice, entries
/// without one are created, and anything not resubmitted is deleted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePollRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub end_date: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub questions: Option<Vec<QuestionInput>>,
    #[serde(default)]
    pub confirm_reset: bool,
}

/// Absent field: `None`. Explicit `null`: `Some(None)`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuestionInput {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub text: String,
    #[serde(default)]
    pub choices: Vec<ChoiceInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChoiceInput {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub created_by: Uuid,
    pub is_active: bool,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub questions: Vec<QuestionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub text: String,
    pub choices: Vec<ChoiceResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceResponse {
    pub id: Uuid,
    pub question_id: Uuid,
    pub text: String,
    pub vote_count: i64,
}

// -- Votes --

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoteRequest {
    pub choice_id: Uuid,
    /// Optional cross-check: rejected when the choice belongs to another question.
    #[serde(default)]
    pub question_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

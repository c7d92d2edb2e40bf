//! Database row types; these map directly to SQLite rows.
//! Distinct from tally-types API models to keep the DB layer independent.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct PollRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub created_by: String,
    pub is_active: bool,
    pub end_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct QuestionRow {
    pub id: String,
    pub poll_id: String,
    pub text: String,
    pub position: i64,
}

#[derive(Debug, Clone)]
pub struct ChoiceRow {
    pub id: String,
    pub question_id: String,
    pub text: String,
    pub position: i64,
    pub vote_count: i64,
}

#[derive(Debug, Clone)]
pub struct VoteRow {
    pub id: String,
    pub question_id: String,
    pub choice_id: String,
    pub user_id: String,
    pub created_at: String,
}

/// A question together with its choices, in display order.
#[derive(Debug, Clone)]
pub struct QuestionTree {
    pub question: QuestionRow,
    pub choices: Vec<ChoiceRow>,
}

/// A poll with its full nested structure.
#[derive(Debug, Clone)]
pub struct PollTree {
    pub poll: PollRow,
    pub questions: Vec<QuestionTree>,
}

// -- Write inputs --

pub struct NewPoll {
    pub title: String,
    pub description: Option<String>,
    pub end_date: Option<String>,
    pub created_by: String,
    pub questions: Vec<NewQuestion>,
}

pub struct NewQuestion {
    pub text: String,
    pub choices: Vec<String>,
}

/// A poll edit. `None` fields are left unchanged; `questions` replaces the
/// whole structure (see [`crate::Database::update_poll`]).
#[derive(Default)]
pub struct PollEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    /// `Some(None)` clears the end date.
    pub end_date: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub questions: Option<Vec<QuestionEdit>>,
}

pub struct QuestionEdit {
    pub id: Option<String>,
    pub text: String,
    pub choices: Vec<ChoiceEdit>,
}

pub struct ChoiceEdit {
    pub id: Option<String>,
    pub text: String,
}

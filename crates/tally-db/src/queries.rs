use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::{StoreError, is_unique_violation};
use crate::models::{ChoiceRow, PollRow, PollTree, QuestionRow, QuestionTree, UserRow, VoteRow};
use crate::{Database, now_timestamp};

const POLL_COLUMNS: &str =
    "id, title, description, created_by, is_active, end_date, created_at, updated_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<(), StoreError> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
            (id, username, password_hash, now_timestamp()),
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::ConstraintViolation(format!("username '{}' is already taken", username))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, username, password, created_at FROM users WHERE username = ?1",
                    [username],
                    user_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, username, password, created_at FROM users WHERE id = ?1",
                    [id],
                    user_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Returns false when the user no longer exists.
    pub fn update_password(&self, id: &str, password_hash: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET password = ?1 WHERE id = ?2",
                (password_hash, id),
            )?;
            Ok(changed == 1)
        })
    }

    // -- Polls --

    pub fn list_active_polls(&self) -> Result<Vec<PollTree>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POLL_COLUMNS} FROM polls WHERE is_active = 1 ORDER BY created_at DESC"
            ))?;
            let polls = stmt
                .query_map([], poll_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            polls
                .into_iter()
                .map(|poll| {
                    let questions = query_question_trees(conn, &poll.id)?;
                    Ok(PollTree { poll, questions })
                })
                .collect()
        })
    }

    pub fn get_poll(&self, id: &str) -> Result<Option<PollTree>> {
        self.with_conn(|conn| {
            let Some(poll) = query_poll_row(conn, id)? else {
                return Ok(None);
            };
            let questions = query_question_trees(conn, &poll.id)?;
            Ok(Some(PollTree { poll, questions }))
        })
    }

    pub fn get_poll_row(&self, id: &str) -> Result<Option<PollRow>> {
        self.with_conn(|conn| query_poll_row(conn, id))
    }

    // -- Questions & choices --

    pub fn list_questions(&self) -> Result<Vec<QuestionTree>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, poll_id, text, position FROM questions ORDER BY poll_id, position",
            )?;
            let questions = stmt
                .query_map([], question_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut stmt = conn.prepare(
                "SELECT id, question_id, text, position, vote_count FROM choices ORDER BY position",
            )?;
            let choices = stmt
                .query_map([], choice_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(group_choices(questions, choices))
        })
    }

    pub fn get_question(&self, id: &str) -> Result<Option<QuestionTree>> {
        self.with_conn(|conn| {
            let question = conn
                .query_row(
                    "SELECT id, poll_id, text, position FROM questions WHERE id = ?1",
                    [id],
                    question_from_row,
                )
                .optional()?;
            let Some(question) = question else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT id, question_id, text, position, vote_count FROM choices
                 WHERE question_id = ?1 ORDER BY position",
            )?;
            let choices = stmt
                .query_map([id], choice_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(Some(QuestionTree { question, choices }))
        })
    }

    pub fn list_choices(&self) -> Result<Vec<ChoiceRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, question_id, text, position, vote_count FROM choices
                 ORDER BY question_id, position",
            )?;
            let rows = stmt
                .query_map([], choice_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_choice(&self, id: &str) -> Result<Option<ChoiceRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, question_id, text, position, vote_count FROM choices WHERE id = ?1",
                    [id],
                    choice_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// A choice plus the question it answers, used to resolve a vote target.
    pub fn get_choice_with_question(&self, choice_id: &str) -> Result<Option<(ChoiceRow, QuestionRow)>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT c.id, c.question_id, c.text, c.position, c.vote_count,
                            q.id, q.poll_id, q.text, q.position
                     FROM choices c
                     JOIN questions q ON q.id = c.question_id
                     WHERE c.id = ?1",
                    [choice_id],
                    |row| {
                        let choice = choice_from_row(row)?;
                        let question = QuestionRow {
                            id: row.get(5)?,
                            poll_id: row.get(6)?,
                            text: row.get(7)?,
                            position: row.get(8)?,
                        };
                        Ok((choice, question))
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Votes --

    pub fn has_voted(&self, question_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM votes WHERE question_id = ?1 AND user_id = ?2",
                    [question_id, user_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn get_votes_for_poll(&self, poll_id: &str) -> Result<Vec<VoteRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT v.id, v.question_id, v.choice_id, v.user_id, v.created_at
                 FROM votes v
                 JOIN questions q ON q.id = v.question_id
                 WHERE q.poll_id = ?1
                 ORDER BY v.created_at",
            )?;
            let rows = stmt
                .query_map([poll_id], |row| {
                    Ok(VoteRow {
                        id: row.get(0)?,
                        question_id: row.get(1)?,
                        choice_id: row.get(2)?,
                        user_id: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub(crate) fn query_poll_row(conn: &Connection, id: &str) -> Result<Option<PollRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {POLL_COLUMNS} FROM polls WHERE id = ?1"),
            [id],
            poll_from_row,
        )
        .optional()?;
    Ok(row)
}

fn query_question_trees(conn: &Connection, poll_id: &str) -> Result<Vec<QuestionTree>> {
    let mut stmt = conn.prepare(
        "SELECT id, poll_id, text, position FROM questions WHERE poll_id = ?1 ORDER BY position",
    )?;
    let questions = stmt
        .query_map([poll_id], question_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // One query for every choice of the poll instead of one per question
    let mut stmt = conn.prepare(
        "SELECT c.id, c.question_id, c.text, c.position, c.vote_count
         FROM choices c
         JOIN questions q ON q.id = c.question_id
         WHERE q.poll_id = ?1
         ORDER BY c.position",
    )?;
    let choices = stmt
        .query_map([poll_id], choice_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(group_choices(questions, choices))
}

fn group_choices(questions: Vec<QuestionRow>, choices: Vec<ChoiceRow>) -> Vec<QuestionTree> {
    let mut by_question: HashMap<String, Vec<ChoiceRow>> = HashMap::new();
    for choice in choices {
        by_question.entry(choice.question_id.clone()).or_default().push(choice);
    }

    questions
        .into_iter()
        .map(|question| {
            let choices = by_question.remove(&question.id).unwrap_or_default();
            QuestionTree { question, choices }
        })
        .collect()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn poll_from_row(row: &Row<'_>) -> rusqlite::Result<PollRow> {
    Ok(PollRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        created_by: row.get(3)?,
        is_active: row.get(4)?,
        end_date: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn question_from_row(row: &Row<'_>) -> rusqlite::Result<QuestionRow> {
    Ok(QuestionRow {
        id: row.get(0)?,
        poll_id: row.get(1)?,
        text: row.get(2)?,
        position: row.get(3)?,
    })
}

fn choice_from_row(row: &Row<'_>) -> rusqlite::Result<ChoiceRow> {
    Ok(ChoiceRow {
        id: row.get(0)?,
        question_id: row.get(1)?,
        text: row.get(2)?,
        position: row.get(3)?,
        vote_count: row.get(4)?,
    })
}

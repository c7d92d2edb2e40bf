use std::collections::HashSet;

use anyhow::Result;
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ChoiceEdit, NewPoll, PollEdit, PollTree, QuestionEdit};
use crate::queries::query_poll_row;
use crate::{Database, now_timestamp};

/// Result of [`Database::update_poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Votes deleted by a confirmed reset; zero when no reset happened.
    pub votes_reset: usize,
}

pub const RESET_REQUIRED: &str =
    "This poll already has votes. To update its content, you must confirm that all votes will be reset (confirm_reset: true).";

impl Database {
    /// Insert a poll with its questions and choices in one transaction.
    pub fn create_poll(&self, new: &NewPoll) -> Result<PollTree> {
        let poll_id = Uuid::new_v4().to_string();
        let now = now_timestamp();

        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO polls (id, title, description, created_by, is_active, end_date, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6)",
                rusqlite::params![poll_id, new.title, new.description, new.created_by, new.end_date, now],
            )?;

            for (qpos, question) in new.questions.iter().enumerate() {
                let question_id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO questions (id, poll_id, text, position) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![question_id, poll_id, question.text, qpos as i64],
                )?;
                for (cpos, text) in question.choices.iter().enumerate() {
                    insert_choice(&tx, &question_id, text, cpos)?;
                }
            }
            tx.commit()?;
            Ok(())
        })?;

        info!("Poll {} created by {}", poll_id, new.created_by);
        self.get_poll(&poll_id)?
            .ok_or_else(|| anyhow::anyhow!("Poll {} vanished after insert", poll_id))
    }

    /// Apply an edit, guarded by the vote-reset gate.
    ///
    /// A structural edit (`edit.questions` set) on a poll that already has
    /// votes fails with [`StoreError::Validation`] unless `confirm_reset` is
    /// true, and in that case nothing is written. With `confirm_reset`, every
    /// vote under the poll is deleted and all counters zeroed before the edit
    /// is applied. Everything happens in a single transaction.
    pub fn update_poll(
        &self,
        poll_id: &str,
        edit: &PollEdit,
        confirm_reset: bool,
    ) -> Result<UpdateOutcome, StoreError> {
        let conn = self.writer()?;
        let tx = conn.unchecked_transaction()?;

        if query_poll_row(&tx, poll_id)?.is_none() {
            return Err(StoreError::NotFound("poll"));
        }

        let existing_votes = count_votes(&tx, poll_id)?;
        if edit.questions.is_some() && existing_votes > 0 && !confirm_reset {
            return Err(StoreError::Validation(RESET_REQUIRED.to_string()));
        }

        let votes_reset = if confirm_reset && existing_votes > 0 {
            reset_votes(&tx, poll_id)?
        } else {
            0
        };

        let now = now_timestamp();
        tx.execute(
            "UPDATE polls SET
                title = COALESCE(?2, title),
                description = CASE WHEN ?3 IS NULL THEN description ELSE NULLIF(?3, '') END,
                end_date = CASE WHEN ?4 THEN ?5 ELSE end_date END,
                is_active = COALESCE(?6, is_active),
                updated_at = ?7
             WHERE id = ?1",
            rusqlite::params![
                poll_id,
                edit.title,
                edit.description,
                edit.end_date.is_some(),
                edit.end_date.clone().flatten(),
                edit.is_active,
                now
            ],
        )?;

        if let Some(questions) = &edit.questions {
            sync_questions(&tx, poll_id, questions)?;
        }

        tx.commit()?;
        debug!("Poll {} updated (votes reset: {})", poll_id, votes_reset);
        Ok(UpdateOutcome { votes_reset })
    }

    /// Delete a poll; questions, choices and votes go with it. Returns false
    /// when the poll did not exist.
    pub fn delete_poll(&self, poll_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute("DELETE FROM polls WHERE id = ?1", [poll_id])?;
            Ok(deleted == 1)
        })
    }

    /// Delete every vote under a poll and zero its counters. Returns the
    /// number of votes removed.
    pub fn reset_poll_votes(&self, poll_id: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            let removed = reset_votes(&tx, poll_id)?;
            tx.commit()?;
            Ok(removed)
        })
    }

    pub fn count_poll_votes(&self, poll_id: &str) -> Result<i64> {
        self.with_conn(|conn| count_votes(conn, poll_id))
    }

    /// Close active polls whose end date is at or before `now`. Returns the
    /// ids of the polls that were closed.
    pub fn deactivate_expired_polls(&self, now: &str) -> Result<Vec<String>> {
        self.with_conn_mut(|conn| {
            let mut stmt = conn.prepare(
                "UPDATE polls SET is_active = 0, updated_at = ?1
                 WHERE is_active = 1 AND end_date IS NOT NULL AND end_date <= ?1
                 RETURNING id",
            )?;
            let ids = stmt
                .query_map([now], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }
}

fn count_votes(conn: &Connection, poll_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM votes v
         JOIN questions q ON q.id = v.question_id
         WHERE q.poll_id = ?1",
        [poll_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn reset_votes(conn: &Connection, poll_id: &str) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM votes WHERE question_id IN (SELECT id FROM questions WHERE poll_id = ?1)",
        [poll_id],
    )?;
    conn.execute(
        "UPDATE choices SET vote_count = 0
         WHERE question_id IN (SELECT id FROM questions WHERE poll_id = ?1)",
        [poll_id],
    )?;
    info!("Reset {} votes on poll {}", removed, poll_id);
    Ok(removed)
}

fn insert_choice(conn: &Connection, question_id: &str, text: &str, position: usize) -> Result<String> {
    let choice_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO choices (id, question_id, text, position) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![choice_id, question_id, text, position as i64],
    )?;
    Ok(choice_id)
}

fn child_ids(conn: &Connection, sql: &str, parent_id: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([parent_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;
    Ok(ids)
}

/// Diff the submitted questions against the stored ones by id.
fn sync_questions(conn: &Connection, poll_id: &str, questions: &[QuestionEdit]) -> Result<(), StoreError> {
    let existing = child_ids(conn, "SELECT id FROM questions WHERE poll_id = ?1", poll_id)?;
    let mut kept = HashSet::new();

    for (position, question) in questions.iter().enumerate() {
        let question_id = match &question.id {
            Some(id) => {
                if !existing.contains(id) {
                    return Err(StoreError::Validation(format!(
                        "question {} does not belong to this poll",
                        id
                    )));
                }
                if !kept.insert(id.clone()) {
                    return Err(StoreError::Validation(format!("question {} submitted twice", id)));
                }
                conn.execute(
                    "UPDATE questions SET text = ?1, position = ?2 WHERE id = ?3",
                    rusqlite::params![question.text, position as i64, id],
                )?;
                id.clone()
            }
            None => {
                let id = Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO questions (id, poll_id, text, position) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![id, poll_id, question.text, position as i64],
                )?;
                kept.insert(id.clone());
                id
            }
        };

        sync_choices(conn, &question_id, &question.choices)?;
    }

    for stale in existing.difference(&kept) {
        conn.execute("DELETE FROM questions WHERE id = ?1", [stale])?;
    }
    Ok(())
}

fn sync_choices(conn: &Connection, question_id: &str, choices: &[ChoiceEdit]) -> Result<(), StoreError> {
    let existing = child_ids(conn, "SELECT id FROM choices WHERE question_id = ?1", question_id)?;
    let mut kept = HashSet::new();

    for (position, choice) in choices.iter().enumerate() {
        match &choice.id {
            Some(id) => {
                if !existing.contains(id) {
                    return Err(StoreError::Validation(format!(
                        "choice {} does not belong to question {}",
                        id, question_id
                    )));
                }
                if !kept.insert(id.clone()) {
                    return Err(StoreError::Validation(format!("choice {} submitted twice", id)));
                }
                conn.execute(
                    "UPDATE choices SET text = ?1, position = ?2 WHERE id = ?3",
                    rusqlite::params![choice.text, position as i64, id],
                )?;
            }
            None => {
                let id = insert_choice(conn, question_id, &choice.text, position)?;
                kept.insert(id);
            }
        }
    }

    for stale in existing.difference(&kept) {
        conn.execute("DELETE FROM choices WHERE id = ?1", [stale])?;
    }
    Ok(())
}

use rusqlite::OptionalExtension;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, is_unique_violation};
use crate::{Database, now_timestamp};

/// What a successful [`Database::record_vote`] wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    pub vote_id: String,
    pub poll_id: String,
}

impl Database {
    /// Record one vote and bump the choice counter as a single unit of work.
    ///
    /// Fails with [`StoreError::NotFound`] if the question, choice or user is
    /// missing, [`StoreError::Validation`] if the choice answers a different
    /// question, and [`StoreError::ConstraintViolation`] if the user already
    /// voted on the question. On any failure neither the vote row nor the
    /// counter change is kept.
    pub fn record_vote(
        &self,
        question_id: &str,
        choice_id: &str,
        user_id: &str,
    ) -> Result<VoteReceipt, StoreError> {
        let conn = self.writer()?;
        let tx = conn.unchecked_transaction()?;

        let poll_id: String = tx
            .query_row("SELECT poll_id FROM questions WHERE id = ?1", [question_id], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or(StoreError::NotFound("question"))?;

        let choice_question: String = tx
            .query_row("SELECT question_id FROM choices WHERE id = ?1", [choice_id], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or(StoreError::NotFound("choice"))?;

        tx.query_row("SELECT 1 FROM users WHERE id = ?1", [user_id], |_| Ok(()))
            .optional()?
            .ok_or(StoreError::NotFound("user"))?;

        if choice_question != question_id {
            return Err(StoreError::Validation(
                "Choice does not belong to the question".to_string(),
            ));
        }

        let vote_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO votes (id, question_id, choice_id, user_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            (&vote_id, question_id, choice_id, user_id, now_timestamp()),
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::ConstraintViolation("User already voted on this question".to_string())
            } else {
                e.into()
            }
        })?;

        // Increment in SQL so concurrent writers never lose an update
        tx.execute(
            "UPDATE choices SET vote_count = vote_count + 1 WHERE id = ?1",
            [choice_id],
        )?;

        tx.commit()?;
        debug!("Vote {} recorded: user {} -> choice {}", vote_id, user_id, choice_id);
        Ok(VoteReceipt { vote_id, poll_id })
    }
}

//! Poll result aggregation.
//!
//! Counts come from the denormalized `vote_count` column on each choice;
//! this module only turns them into totals and percentages.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollStats {
    pub poll_id: Uuid,
    pub title: String,
    pub total_votes: i64,
    pub questions: Vec<QuestionStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionStats {
    pub question_id: Uuid,
    pub text: String,
    pub total_votes: i64,
    pub choices: Vec<ChoiceStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceStats {
    pub choice_id: Uuid,
    pub text: String,
    pub votes: i64,
    pub percentage: f64,
}

/// Raw per-question counts fed into [`PollStats::aggregate`].
#[derive(Debug, Clone)]
pub struct QuestionTally {
    pub question_id: Uuid,
    pub text: String,
    pub choices: Vec<ChoiceTally>,
}

#[derive(Debug, Clone)]
pub struct ChoiceTally {
    pub choice_id: Uuid,
    pub text: String,
    pub votes: i64,
}

impl PollStats {
    pub fn aggregate(poll_id: Uuid, title: String, tallies: Vec<QuestionTally>) -> Self {
        let questions: Vec<QuestionStats> = tallies.into_iter().map(QuestionStats::from).collect();
        let total_votes = questions.iter().map(|q| q.total_votes).sum();

        Self {
            poll_id,
            title,
            total_votes,
            questions,
        }
    }
}

impl From<QuestionTally> for QuestionStats {
    fn from(tally: QuestionTally) -> Self {
        let total_votes: i64 = tally.choices.iter().map(|c| c.votes.max(0)).sum();
        let choices = tally
            .choices
            .into_iter()
            .map(|c| ChoiceStats {
                choice_id: c.choice_id,
                percentage: percentage(c.votes, total_votes),
                votes: c.votes,
                text: c.text,
            })
            .collect();

        Self {
            question_id: tally.question_id,
            text: tally.text,
            total_votes,
            choices,
        }
    }
}

/// Share of `total`, rounded to two decimals. Zero when nobody has voted.
pub fn percentage(votes: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let raw = votes as f64 * 100.0 / total as f64;
    (raw * 100.0).round() / 100.0
}

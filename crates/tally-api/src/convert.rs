//! Row → wire conversions. Corrupt ids or timestamps are logged and replaced
//! with defaults rather than failing the whole response.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use tally_db::models::{ChoiceRow, PollTree, QuestionTree};
use tally_db::parse_timestamp;
use tally_types::api::{ChoiceResponse, PollResponse, QuestionResponse};
use tally_types::stats::{ChoiceTally, PollStats, QuestionTally};

pub(crate) fn uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

fn timestamp(raw: &str, what: &str) -> DateTime<Utc> {
    parse_timestamp(raw).unwrap_or_else(|| {
        warn!("Corrupt {} '{}'", what, raw);
        DateTime::default()
    })
}

pub(crate) fn poll_response(tree: PollTree) -> PollResponse {
    let poll = tree.poll;
    PollResponse {
        id: uuid(&poll.id, "poll id"),
        created_by: uuid(&poll.created_by, "created_by"),
        is_active: poll.is_active,
        end_date: poll.end_date.as_deref().map(|raw| timestamp(raw, "end_date")),
        created_at: timestamp(&poll.created_at, "created_at"),
        updated_at: timestamp(&poll.updated_at, "updated_at"),
        title: poll.title,
        description: poll.description,
        questions: tree.questions.into_iter().map(question_response).collect(),
    }
}

pub(crate) fn question_response(tree: QuestionTree) -> QuestionResponse {
    QuestionResponse {
        id: uuid(&tree.question.id, "question id"),
        poll_id: uuid(&tree.question.poll_id, "poll id"),
        text: tree.question.text,
        choices: tree.choices.into_iter().map(choice_response).collect(),
    }
}

pub(crate) fn choice_response(row: ChoiceRow) -> ChoiceResponse {
    ChoiceResponse {
        id: uuid(&row.id, "choice id"),
        question_id: uuid(&row.question_id, "question id"),
        text: row.text,
        vote_count: row.vote_count,
    }
}

pub(crate) fn poll_stats(tree: PollTree) -> PollStats {
    let tallies = tree
        .questions
        .into_iter()
        .map(|q| QuestionTally {
            question_id: uuid(&q.question.id, "question id"),
            text: q.question.text,
            choices: q
                .choices
                .into_iter()
                .map(|c| ChoiceTally {
                    choice_id: uuid(&c.id, "choice id"),
                    text: c.text,
                    votes: c.vote_count,
                })
                .collect(),
        })
        .collect();

    PollStats::aggregate(uuid(&tree.poll.id, "poll id"), tree.poll.title, tallies)
}

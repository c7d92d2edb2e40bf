use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE polls (
                id          TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                description TEXT,
                created_by  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                is_active   INTEGER NOT NULL DEFAULT 1,
                end_date    TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_polls_active
                ON polls(is_active, created_at);

            CREATE TABLE questions (
                id          TEXT PRIMARY KEY,
                poll_id     TEXT NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
                text        TEXT NOT NULL,
                position    INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_questions_poll
                ON questions(poll_id, position);

            CREATE TABLE choices (
                id          TEXT PRIMARY KEY,
                question_id TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
                text        TEXT NOT NULL,
                position    INTEGER NOT NULL DEFAULT 0,
                vote_count  INTEGER NOT NULL DEFAULT 0 CHECK (vote_count >= 0)
            );

            CREATE INDEX idx_choices_question
                ON choices(question_id, position);

            CREATE TABLE votes (
                id          TEXT PRIMARY KEY,
                question_id TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
                choice_id   TEXT NOT NULL REFERENCES choices(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at  TEXT NOT NULL,
                UNIQUE(question_id, user_id)
            );

            CREATE INDEX idx_votes_choice
                ON votes(choice_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

use thiserror::Error;

/// Failures the callers of the vote recorder and the poll editor act on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A uniqueness constraint rejected the write (e.g. a second vote).
    #[error("{0}")]
    ConstraintViolation(String),

    #[error("{0}")]
    Validation(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// True for `UNIQUE` and `PRIMARY KEY` violations, false for every other
/// error including foreign-key failures.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

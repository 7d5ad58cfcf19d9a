use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// True when the underlying failure was a uniqueness/constraint violation
    /// (alias taken, duplicate subscription, immutable-field trigger).
    pub fn is_constraint(&self) -> bool {
        match self {
            StoreError::Db(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(
                e,
                _,
            ))) => e.code == rusqlite::ErrorCode::ConstraintViolation,
            _ => false,
        }
    }

    /// The message attached to a constraint violation, when present. Trigger
    /// aborts surface their RAISE message here.
    pub fn constraint_message(&self) -> Option<&str> {
        match self {
            StoreError::Db(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(
                _,
                Some(msg),
            ))) => Some(msg),
            _ => None,
        }
    }
}

impl From<StoreError> for bh_core::Error {
    fn from(err: StoreError) -> Self {
        bh_core::Error::Internal(err.to_string())
    }
}

use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// The shared error taxonomy for every component.
///
/// Components return these; the HTTP bridge maps each variant onto its status
/// code and the `{detail, code, fields?}` response body.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input (bad field shape, oversize body, unparsable tuple).
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid credentials.
    #[error("{0}")]
    Unauthenticated(String),

    /// Valid credentials but the action is not permitted (actor binding,
    /// public-reader write, non-member access).
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// State-level collision: alias taken, claim held, policy base mismatch,
    /// duplicate subscription. Optionally carries structured context the
    /// caller can surface ("blocked by alice").
    #[error("{detail}")]
    Conflict {
        detail: String,
        fields: Option<Value>,
    },

    /// Attempt to change an immutable binding or act on a stale version.
    #[error("{0}")]
    PreconditionFailed(String),

    /// A dependency is down or the server is draining.
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// The wire-level `code` string for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Unauthenticated(_) => "unauthenticated",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::Conflict { .. } => "conflict",
            Error::PreconditionFailed(_) => "precondition_failed",
            Error::Unavailable(_) => "unavailable",
            Error::Internal(_) => "internal",
        }
    }

    /// Plain conflict with no structured fields.
    pub fn conflict(detail: impl Into<String>) -> Self {
        Error::Conflict {
            detail: detail.into(),
            fields: None,
        }
    }

    /// Conflict carrying structured context for the response body.
    pub fn conflict_with(detail: impl Into<String>, fields: Value) -> Self {
        Error::Conflict {
            detail: detail.into(),
            fields: Some(fields),
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Error::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

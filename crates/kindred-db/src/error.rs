use kindred_types::models::MatchStatus;
use thiserror::Error;

/// Typed storage/domain errors. The API layer maps these onto HTTP statuses;
/// everything the state machine can refuse is represented here so handlers
/// never have to inspect strings.
///
/// `NotFound` deliberately covers ownership mismatches on match requests and
/// private discussions; a caller probing someone else's resources learns
/// nothing beyond "no such thing".
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("forbidden")]
    Forbidden,

    /// A match request already exists for this (from, to, note) triple.
    /// Carries the existing request's status so the caller can render an
    /// appropriate message.
    #[error("a match request already exists for this note")]
    Conflict { status: MatchStatus },

    #[error("this request has expired")]
    Expired,

    #[error("this discussion has expired")]
    Gone,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("database error")]
    Db(#[from] rusqlite::Error),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

//! Session error taxonomy.

use kingside_record::StoreError;

use crate::clock::ClockError;
use crate::session::Lifecycle;

/// Outcome of a rejected or failed session operation.
///
/// `UnauthorizedMove`, `IllegalMove` and `MatchNotActive` are recoverable and
/// reported to the submitter only. `InvariantViolation` has already forced
/// the match into `Abandoned` by the time the caller sees it.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unauthorized move: {0}")]
    UnauthorizedMove(String),
    #[error("illegal move: {0}")]
    IllegalMove(String),
    #[error("match is not active ({0})")]
    MatchNotActive(Lifecycle),
    #[error("identity is not seated")]
    NotSeated,
    #[error("a match is already in progress")]
    MatchInProgress,
    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<ClockError> for SessionError {
    fn from(err: ClockError) -> Self {
        Self::InvariantViolation(err.to_string())
    }
}

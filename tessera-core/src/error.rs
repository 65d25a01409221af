use uuid::Uuid;

use crate::models::SessionStatus;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure taxonomy for lock and session mutations. Every variant except
/// `Store` is user- or caller-visible and carries enough detail to decide
/// whether a retry makes sense.
#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("Seats unavailable: {0:?}")]
    SeatsUnavailable(Vec<Uuid>),

    #[error("A reservation needs at least one seat")]
    EmptySeatSet,

    #[error("Operation {operation} not allowed from {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionStatus,
    },

    #[error("Session {0} lost its seat locks before completion")]
    LockLost(Uuid),

    #[error("Session {0} expired")]
    Expired(Uuid),

    #[error("Holder does not own one or more of the requested locks: {0:?}")]
    Forbidden(Vec<Uuid>),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Storage failure: {0}")]
    Store(BoxError),
}

impl From<BoxError> for ReservationError {
    fn from(e: BoxError) -> Self {
        ReservationError::Store(e)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a set of locks went away. A sweep expiry is announced differently
/// from a holder-initiated release.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseCause {
    Released,
    Expired,
}

/// State-change events published after the corresponding store write has
/// committed. Payloads are self-contained so subscribers never need a
/// follow-up read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationEvent {
    SeatsLocked {
        event_id: Uuid,
        seat_ids: Vec<Uuid>,
        holder: String,
        expires_at: DateTime<Utc>,
    },
    SeatsReleased {
        event_id: Uuid,
        seat_ids: Vec<Uuid>,
        holder: String,
        cause: ReleaseCause,
    },
    SessionCreated {
        session_id: Uuid,
        user_id: String,
        event_id: Uuid,
        seat_ids: Vec<Uuid>,
        amount_minor: i64,
        currency: String,
        expires_at: DateTime<Utc>,
    },
    VerificationSubmitted {
        session_id: Uuid,
        user_id: String,
        event_id: Uuid,
        reference: String,
    },
    SessionCompleted {
        session_id: Uuid,
        user_id: String,
        event_id: Uuid,
        seat_ids: Vec<Uuid>,
        booking_id: Uuid,
    },
    SessionFailed {
        session_id: Uuid,
        user_id: String,
        event_id: Uuid,
        seat_ids: Vec<Uuid>,
        reason: String,
    },
}

impl ReservationEvent {
    /// Wire-level event name, e.g. `seats.expired` or `session.completed`.
    pub fn name(&self) -> &'static str {
        match self {
            ReservationEvent::SeatsLocked { .. } => "seats.locked",
            ReservationEvent::SeatsReleased {
                cause: ReleaseCause::Expired,
                ..
            } => "seats.expired",
            ReservationEvent::SeatsReleased { .. } => "seats.released",
            ReservationEvent::SessionCreated { .. } => "session.created",
            ReservationEvent::VerificationSubmitted { .. } => "session.verification",
            ReservationEvent::SessionCompleted { .. } => "session.completed",
            ReservationEvent::SessionFailed { .. } => "session.failed",
        }
    }

    pub fn event_id(&self) -> Uuid {
        match self {
            ReservationEvent::SeatsLocked { event_id, .. }
            | ReservationEvent::SeatsReleased { event_id, .. }
            | ReservationEvent::SessionCreated { event_id, .. }
            | ReservationEvent::VerificationSubmitted { event_id, .. }
            | ReservationEvent::SessionCompleted { event_id, .. }
            | ReservationEvent::SessionFailed { event_id, .. } => *event_id,
        }
    }

    /// The user channel this event belongs to, if any.
    pub fn user_id(&self) -> &str {
        match self {
            ReservationEvent::SeatsLocked { holder, .. }
            | ReservationEvent::SeatsReleased { holder, .. } => holder,
            ReservationEvent::SessionCreated { user_id, .. }
            | ReservationEvent::VerificationSubmitted { user_id, .. }
            | ReservationEvent::SessionCompleted { user_id, .. }
            | ReservationEvent::SessionFailed { user_id, .. } => user_id,
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seat availability as stored on the seat row. The core only ever flips
/// this field; pricing and seat metadata belong to the catalog side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Locked,
    Booked,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "available",
            SeatStatus::Locked => "locked",
            SeatStatus::Booked => "booked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(SeatStatus::Available),
            "locked" => Some(SeatStatus::Locked),
            "booked" => Some(SeatStatus::Booked),
            _ => None,
        }
    }
}

/// One bookable unit of inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seat {
    pub id: Uuid,
    pub event_id: Uuid,
    pub price_minor: i64,
    pub currency: String,
    pub status: SeatStatus,
}

/// A temporary exclusive claim on one seat by one holder.
///
/// `event_id` is denormalized from the seat row so expiry notifications can
/// be routed to the event room without a second lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatLock {
    pub seat_id: Uuid,
    pub event_id: Uuid,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SeatLock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Payment session status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    VerificationPending,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "PENDING",
            SessionStatus::VerificationPending => "VERIFICATION_PENDING",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(SessionStatus::Pending),
            "VERIFICATION_PENDING" => Some(SessionStatus::VerificationPending),
            "COMPLETED" => Some(SessionStatus::Completed),
            "FAILED" => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

/// The transactional record spanning claim, verification and booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    pub id: Uuid,
    pub user_id: String,
    pub event_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    pub amount_minor: i64,
    pub currency: String,
    pub status: SessionStatus,
    /// Externally supplied payment reference (e.g. a UTR) once submitted.
    pub reference: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PaymentSession {
    pub fn new(
        user_id: String,
        event_id: Uuid,
        seat_ids: Vec<Uuid>,
        amount_minor: i64,
        currency: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            event_id,
            seat_ids,
            amount_minor,
            currency,
            status: SessionStatus::Pending,
            reference: None,
            failure_reason: None,
            created_at: Utc::now(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// The durable record created exactly once per completed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: String,
    pub event_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    pub amount_minor: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            SessionStatus::Pending,
            SessionStatus::VerificationPending,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ] {
            assert_eq!(SessionStatus::parse(s.as_str()), Some(s));
        }
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(!SessionStatus::Pending.is_terminal());
    }

    #[test]
    fn test_seat_status_round_trip() {
        for s in [SeatStatus::Available, SeatStatus::Locked, SeatStatus::Booked] {
            assert_eq!(SeatStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(SeatStatus::parse("void"), None);
    }
}

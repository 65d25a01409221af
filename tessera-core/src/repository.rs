use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::BoxError;
use crate::models::{Booking, PaymentSession, SeatLock, SeatStatus, SessionStatus};

/// Outcome of an all-or-nothing acquire. `renewed` lists the seats the same
/// holder already held; their expiry was pushed forward rather than re-granted.
#[derive(Debug, Clone)]
pub enum LockWrite {
    Granted {
        locks: Vec<SeatLock>,
        renewed: Vec<Uuid>,
    },
    Conflict(Vec<Uuid>),
}

/// Outcome of a strict release. A single foreign holder aborts the whole
/// release with no writes.
#[derive(Debug, Clone)]
pub enum ReleaseWrite {
    Released(Vec<SeatLock>),
    Forbidden(Vec<Uuid>),
}

/// Optional fields applied together with a session status transition.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub reference: Option<String>,
    pub failure_reason: Option<String>,
}

impl SessionPatch {
    pub fn reference(reference: &str) -> Self {
        Self {
            reference: Some(reference.to_string()),
            ..Default::default()
        }
    }

    pub fn failure(reason: &str) -> Self {
        Self {
            failure_reason: Some(reason.to_string()),
            ..Default::default()
        }
    }
}

/// Durable lock table access. This store is the single arbitration point for
/// seat contention: every mutating method expresses its guard in one store
/// round-trip (a transaction or compare-and-swap), never read-then-write.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Acquire every requested seat for `holder` or none of them. The losing
    /// side of a race must observe the winner's row and get `Conflict` naming
    /// the contended seats. Also flips the underlying seats to `locked`.
    async fn acquire_all(
        &self,
        seat_ids: &[Uuid],
        holder: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<LockWrite, BoxError>;

    /// Strict release: fails with `Forbidden` if any seat is held by a
    /// different holder. Seats with no lock at all are skipped, not errors.
    /// Released seats go back to `available`.
    async fn release_all(&self, seat_ids: &[Uuid], holder: &str)
        -> Result<ReleaseWrite, BoxError>;

    /// Lenient release for cleanup paths: deletes only the rows `holder`
    /// still owns and returns them; rows owned by someone else are left
    /// untouched.
    async fn delete_if_held_by(
        &self,
        seat_ids: &[Uuid],
        holder: &str,
    ) -> Result<Vec<SeatLock>, BoxError>;

    /// Optimistic sweep delete, conditioned on the expiry timestamp still
    /// being the one read. Returns false when a concurrent sweeper got there
    /// first or the lock was renewed in the meantime.
    async fn delete_if_expiry_matches(
        &self,
        seat_id: Uuid,
        holder: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, BoxError>;

    async fn get_lock(&self, seat_id: Uuid) -> Result<Option<SeatLock>, BoxError>;

    async fn list_locks(&self) -> Result<Vec<SeatLock>, BoxError>;

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<SeatLock>, BoxError>;

    /// Atomically verify every lock is still held (unexpired) by `holder`,
    /// delete the locks and flip the seats to `booked`. Returns false with no
    /// writes on any mismatch, meaning a lock expired and may have been
    /// re-granted mid-flight.
    async fn convert_to_booked(&self, seat_ids: &[Uuid], holder: &str) -> Result<bool, BoxError>;

    /// Seats stuck in `locked` with no live lock row backing them. Input to
    /// the reconciler's repair pass.
    async fn list_orphaned_seats(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, BoxError>;

    /// Guarded seat status flip; false when the seat was not in `from`.
    async fn set_seat_status(
        &self,
        seat_id: Uuid,
        from: SeatStatus,
        to: SeatStatus,
    ) -> Result<bool, BoxError>;
}

/// Session persistence with the same conditional-write discipline.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &PaymentSession) -> Result<(), BoxError>;

    async fn get(&self, id: Uuid) -> Result<Option<PaymentSession>, BoxError>;

    /// Move the session to `to` only if its current status is one of `from`,
    /// applying `patch` in the same write. `None` means the precondition no
    /// longer held because a racer already moved the row.
    async fn transition(
        &self,
        id: Uuid,
        from: &[SessionStatus],
        to: SessionStatus,
        patch: SessionPatch,
    ) -> Result<Option<PaymentSession>, BoxError>;

    /// Non-terminal sessions whose TTL has elapsed.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<PaymentSession>, BoxError>;
}

/// Booking creation collaborator, idempotent on session id: the second call
/// for the same session returns the existing booking unchanged.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn create_once(&self, session: &PaymentSession) -> Result<Booking, BoxError>;
}

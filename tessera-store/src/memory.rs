use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use tessera_core::repository::{
    BookingStore, LockStore, LockWrite, ReleaseWrite, SessionPatch, SessionStore,
};
use tessera_core::{Booking, BoxError, PaymentSession, Seat, SeatLock, SeatStatus, SessionStatus};

#[derive(Default)]
struct Inner {
    seats: HashMap<Uuid, Seat>,
    locks: HashMap<Uuid, SeatLock>,
    sessions: HashMap<Uuid, PaymentSession>,
    bookings: HashMap<Uuid, Booking>,
}

/// In-memory store with the same conditional-write semantics as the
/// Postgres repos. One mutex over all tables stands in for the database's
/// transaction, which keeps multi-row guards atomic. Test-only collaborator.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `count` available seats for one event and return their ids.
    pub async fn seed_seats(&self, event_id: Uuid, count: usize) -> Vec<Uuid> {
        let mut inner = self.inner.lock().await;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let id = Uuid::new_v4();
            inner.seats.insert(
                id,
                Seat {
                    id,
                    event_id,
                    price_minor: 5_000,
                    currency: "INR".to_string(),
                    status: SeatStatus::Available,
                },
            );
            ids.push(id);
        }
        ids
    }

    pub async fn seat_status(&self, seat_id: Uuid) -> Option<SeatStatus> {
        self.inner.lock().await.seats.get(&seat_id).map(|s| s.status)
    }

    pub async fn booking_count(&self) -> usize {
        self.inner.lock().await.bookings.len()
    }

    /// Backdate a lock's expiry so sweeps and steals can be tested without
    /// sleeping.
    pub async fn force_expire_lock(&self, seat_id: Uuid) {
        let mut inner = self.inner.lock().await;
        if let Some(lock) = inner.locks.get_mut(&seat_id) {
            lock.expires_at = Utc::now() - Duration::seconds(1);
        }
    }

    pub async fn force_expire_session(&self, id: Uuid) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.sessions.get_mut(&id) {
            session.expires_at = Utc::now() - Duration::seconds(1);
        }
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn acquire_all(
        &self,
        seat_ids: &[Uuid],
        holder: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<LockWrite, BoxError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        let mut conflicts = Vec::new();
        let mut renewed = Vec::new();
        for seat_id in seat_ids {
            let seat = inner
                .seats
                .get(seat_id)
                .ok_or_else(|| format!("unknown seat {seat_id}"))?;
            if seat.status == SeatStatus::Booked {
                conflicts.push(*seat_id);
                continue;
            }
            if let Some(lock) = inner.locks.get(seat_id) {
                if !lock.is_expired(now) {
                    if lock.holder == holder {
                        renewed.push(*seat_id);
                    } else {
                        conflicts.push(*seat_id);
                    }
                }
            }
        }
        if !conflicts.is_empty() {
            conflicts.sort();
            return Ok(LockWrite::Conflict(conflicts));
        }

        let mut locks = Vec::with_capacity(seat_ids.len());
        for seat_id in seat_ids {
            let event_id = inner.seats[seat_id].event_id;
            let acquired_at = inner
                .locks
                .get(seat_id)
                .filter(|l| !l.is_expired(now) && l.holder == holder)
                .map(|l| l.acquired_at)
                .unwrap_or(now);
            let lock = SeatLock {
                seat_id: *seat_id,
                event_id,
                holder: holder.to_string(),
                acquired_at,
                expires_at,
            };
            inner.locks.insert(*seat_id, lock.clone());
            if let Some(seat) = inner.seats.get_mut(seat_id) {
                seat.status = SeatStatus::Locked;
            }
            locks.push(lock);
        }
        Ok(LockWrite::Granted { locks, renewed })
    }

    async fn release_all(
        &self,
        seat_ids: &[Uuid],
        holder: &str,
    ) -> Result<ReleaseWrite, BoxError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        let foreign: Vec<Uuid> = seat_ids
            .iter()
            .filter(|id| {
                inner
                    .locks
                    .get(id)
                    .is_some_and(|l| l.holder != holder && !l.is_expired(now))
            })
            .copied()
            .collect();
        if !foreign.is_empty() {
            return Ok(ReleaseWrite::Forbidden(foreign));
        }

        let mut released = Vec::new();
        for seat_id in seat_ids {
            let owned = inner.locks.get(seat_id).is_some_and(|l| l.holder == holder);
            if owned {
                if let Some(lock) = inner.locks.remove(seat_id) {
                    released.push(lock);
                }
                if let Some(seat) = inner.seats.get_mut(seat_id) {
                    if seat.status == SeatStatus::Locked {
                        seat.status = SeatStatus::Available;
                    }
                }
            }
        }
        Ok(ReleaseWrite::Released(released))
    }

    async fn delete_if_held_by(
        &self,
        seat_ids: &[Uuid],
        holder: &str,
    ) -> Result<Vec<SeatLock>, BoxError> {
        let mut inner = self.inner.lock().await;
        let mut deleted = Vec::new();
        for seat_id in seat_ids {
            let owned = inner.locks.get(seat_id).is_some_and(|l| l.holder == holder);
            if owned {
                if let Some(lock) = inner.locks.remove(seat_id) {
                    deleted.push(lock);
                }
                if let Some(seat) = inner.seats.get_mut(seat_id) {
                    if seat.status == SeatStatus::Locked {
                        seat.status = SeatStatus::Available;
                    }
                }
            }
        }
        Ok(deleted)
    }

    async fn delete_if_expiry_matches(
        &self,
        seat_id: Uuid,
        holder: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, BoxError> {
        let mut inner = self.inner.lock().await;
        let matches = inner
            .locks
            .get(&seat_id)
            .is_some_and(|l| l.holder == holder && l.expires_at == expires_at);
        if !matches {
            return Ok(false);
        }
        inner.locks.remove(&seat_id);
        if let Some(seat) = inner.seats.get_mut(&seat_id) {
            if seat.status == SeatStatus::Locked {
                seat.status = SeatStatus::Available;
            }
        }
        Ok(true)
    }

    async fn get_lock(&self, seat_id: Uuid) -> Result<Option<SeatLock>, BoxError> {
        Ok(self.inner.lock().await.locks.get(&seat_id).cloned())
    }

    async fn list_locks(&self) -> Result<Vec<SeatLock>, BoxError> {
        Ok(self.inner.lock().await.locks.values().cloned().collect())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<SeatLock>, BoxError> {
        Ok(self
            .inner
            .lock()
            .await
            .locks
            .values()
            .filter(|l| l.is_expired(now))
            .cloned()
            .collect())
    }

    async fn convert_to_booked(&self, seat_ids: &[Uuid], holder: &str) -> Result<bool, BoxError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        let all_held = seat_ids.iter().all(|id| {
            inner
                .locks
                .get(id)
                .is_some_and(|l| l.holder == holder && !l.is_expired(now))
        });
        if !all_held {
            return Ok(false);
        }

        for seat_id in seat_ids {
            inner.locks.remove(seat_id);
            if let Some(seat) = inner.seats.get_mut(seat_id) {
                seat.status = SeatStatus::Booked;
            }
        }
        Ok(true)
    }

    async fn list_orphaned_seats(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, BoxError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .seats
            .values()
            .filter(|s| s.status == SeatStatus::Locked)
            .filter(|s| {
                inner
                    .locks
                    .get(&s.id)
                    .map_or(true, |l| l.is_expired(now))
            })
            .map(|s| s.id)
            .collect())
    }

    async fn set_seat_status(
        &self,
        seat_id: Uuid,
        from: SeatStatus,
        to: SeatStatus,
    ) -> Result<bool, BoxError> {
        let mut inner = self.inner.lock().await;
        match inner.seats.get_mut(&seat_id) {
            Some(seat) if seat.status == from => {
                seat.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert(&self, session: &PaymentSession) -> Result<(), BoxError> {
        let mut inner = self.inner.lock().await;
        if inner.sessions.contains_key(&session.id) {
            return Err(format!("duplicate session {}", session.id).into());
        }
        inner.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentSession>, BoxError> {
        Ok(self.inner.lock().await.sessions.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[SessionStatus],
        to: SessionStatus,
        patch: SessionPatch,
    ) -> Result<Option<PaymentSession>, BoxError> {
        let mut inner = self.inner.lock().await;
        let Some(session) = inner.sessions.get_mut(&id) else {
            return Ok(None);
        };
        if !from.contains(&session.status) {
            return Ok(None);
        }
        session.status = to;
        if let Some(reference) = patch.reference {
            session.reference = Some(reference);
        }
        if let Some(reason) = patch.failure_reason {
            session.failure_reason = Some(reason);
        }
        Ok(Some(session.clone()))
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<PaymentSession>, BoxError> {
        Ok(self
            .inner
            .lock()
            .await
            .sessions
            .values()
            .filter(|s| !s.status.is_terminal() && s.is_expired(now))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn create_once(&self, session: &PaymentSession) -> Result<Booking, BoxError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.bookings.get(&session.id) {
            return Ok(existing.clone());
        }
        let booking = Booking {
            id: Uuid::new_v4(),
            session_id: session.id,
            user_id: session.user_id.clone(),
            event_id: session.event_id,
            seat_ids: session.seat_ids.clone(),
            amount_minor: session.amount_minor,
            currency: session.currency.clone(),
            created_at: Utc::now(),
        };
        inner.bookings.insert(session.id, booking.clone());
        Ok(booking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_is_all_or_nothing() {
        let store = MemoryStore::new();
        let seats = store.seed_seats(Uuid::new_v4(), 2).await;
        let later = Utc::now() + Duration::seconds(300);

        let first = store.acquire_all(&seats[..1], "alice", later).await.unwrap();
        assert!(matches!(first, LockWrite::Granted { .. }));

        let second = store.acquire_all(&seats, "bob", later).await.unwrap();
        match second {
            LockWrite::Conflict(conflicts) => assert_eq!(conflicts, vec![seats[0]]),
            other => panic!("expected conflict, got {other:?}"),
        }
        // The uncontended seat was not written.
        assert!(store.get_lock(seats[1]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_booked_seat_cannot_be_reacquired() {
        let store = MemoryStore::new();
        let seats = store.seed_seats(Uuid::new_v4(), 1).await;
        let later = Utc::now() + Duration::seconds(300);

        store.acquire_all(&seats, "alice", later).await.unwrap();
        assert!(store.convert_to_booked(&seats, "alice").await.unwrap());

        let write = store.acquire_all(&seats, "bob", later).await.unwrap();
        assert!(matches!(write, LockWrite::Conflict(_)));
    }

    #[tokio::test]
    async fn test_steal_after_expiry_resets_acquired_at() {
        let store = MemoryStore::new();
        let seats = store.seed_seats(Uuid::new_v4(), 1).await;
        let later = Utc::now() + Duration::seconds(300);

        store.acquire_all(&seats, "alice", later).await.unwrap();
        let first = store.get_lock(seats[0]).await.unwrap().unwrap();

        // Renewal by the same holder keeps the original acquisition time.
        let renewed_until = later + Duration::seconds(60);
        store
            .acquire_all(&seats, "alice", renewed_until)
            .await
            .unwrap();
        let renewed = store.get_lock(seats[0]).await.unwrap().unwrap();
        assert_eq!(renewed.acquired_at, first.acquired_at);
        assert_eq!(renewed.expires_at, renewed_until);

        // A steal of an expired lock starts a fresh acquisition.
        store.force_expire_lock(seats[0]).await;
        let before_steal = Utc::now();
        let write = store.acquire_all(&seats, "bob", later).await.unwrap();
        assert!(matches!(write, LockWrite::Granted { .. }));
        let stolen = store.get_lock(seats[0]).await.unwrap().unwrap();
        assert_eq!(stolen.holder, "bob");
        assert!(stolen.acquired_at >= before_steal);
    }

    #[tokio::test]
    async fn test_transition_requires_expected_status() {
        let store = MemoryStore::new();
        let session = PaymentSession::new(
            "alice".to_string(),
            Uuid::new_v4(),
            vec![Uuid::new_v4()],
            5_000,
            "INR".to_string(),
            Utc::now() + Duration::seconds(300),
        );
        store.insert(&session).await.unwrap();

        let moved = store
            .transition(
                session.id,
                &[SessionStatus::VerificationPending],
                SessionStatus::Completed,
                SessionPatch::default(),
            )
            .await
            .unwrap();
        assert!(moved.is_none());

        let moved = store
            .transition(
                session.id,
                &[SessionStatus::Pending],
                SessionStatus::VerificationPending,
                SessionPatch::reference("UTR1"),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.status, SessionStatus::VerificationPending);
        assert_eq!(moved.reference.as_deref(), Some("UTR1"));
    }

    #[tokio::test]
    async fn test_booking_create_once_is_idempotent() {
        let store = MemoryStore::new();
        let session = PaymentSession::new(
            "alice".to_string(),
            Uuid::new_v4(),
            vec![Uuid::new_v4()],
            5_000,
            "INR".to_string(),
            Utc::now() + Duration::seconds(300),
        );

        let first = store.create_once(&session).await.unwrap();
        let second = store.create_once(&session).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.booking_count().await, 1);
    }
}

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use tessera_core::{LockStore, LockWrite, ReleaseWrite, ReservationError, SeatLock};

/// Result of a successful acquire: every requested seat is now locked for
/// the holder until `expires_at`. `renewed` names the seats the holder
/// already held, whose expiry was pushed forward.
#[derive(Debug, Clone)]
pub struct AcquireGrant {
    pub locks: Vec<SeatLock>,
    pub renewed: Vec<Uuid>,
    pub expires_at: DateTime<Utc>,
}

/// Seat lock manager: the persistent store is authoritative, the in-memory
/// map is a read-through cache only. Conflicts are adjudicated by the
/// store's conditional writes, never by the cache, so multiple service
/// instances stay consistent.
pub struct SeatLockManager {
    store: Arc<dyn LockStore>,
    cache: RwLock<HashMap<Uuid, SeatLock>>,
}

impl SeatLockManager {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Acquire every seat in the set for `holder`, or none of them. A seat
    /// already held by the same holder is renewed rather than refused.
    pub async fn acquire(
        &self,
        seat_ids: &[Uuid],
        holder: &str,
        ttl: Duration,
    ) -> Result<AcquireGrant, ReservationError> {
        let seats = dedupe(seat_ids);
        if seats.is_empty() {
            return Err(ReservationError::EmptySeatSet);
        }

        let expires_at = Utc::now() + ttl;
        match self.store.acquire_all(&seats, holder, expires_at).await? {
            LockWrite::Conflict(conflicts) => {
                debug!(holder, ?conflicts, "seat acquire conflict");
                Err(ReservationError::SeatsUnavailable(conflicts))
            }
            LockWrite::Granted { locks, renewed } => {
                let mut cache = self.cache.write().await;
                for lock in &locks {
                    cache.insert(lock.seat_id, lock.clone());
                }
                Ok(AcquireGrant {
                    locks,
                    renewed,
                    expires_at,
                })
            }
        }
    }

    /// Strict release: a holder may only release its own locks. Seats with
    /// no lock are no-ops; a single foreign holder fails the whole call.
    pub async fn release(
        &self,
        seat_ids: &[Uuid],
        holder: &str,
    ) -> Result<Vec<SeatLock>, ReservationError> {
        let seats = dedupe(seat_ids);
        match self.store.release_all(&seats, holder).await? {
            ReleaseWrite::Forbidden(foreign) => Err(ReservationError::Forbidden(foreign)),
            ReleaseWrite::Released(locks) => {
                self.evict(&locks).await;
                Ok(locks)
            }
        }
    }

    /// Lenient release for cleanup paths: drops only the locks the holder
    /// still owns and reports what was actually deleted.
    pub async fn release_held(
        &self,
        seat_ids: &[Uuid],
        holder: &str,
    ) -> Result<Vec<SeatLock>, ReservationError> {
        let seats = dedupe(seat_ids);
        let locks = self.store.delete_if_held_by(&seats, holder).await?;
        self.evict(&locks).await;
        Ok(locks)
    }

    /// Read-through lookup. An expired row found in the store is deleted
    /// (optimistically) and reported as absent.
    pub async fn query(&self, seat_id: Uuid) -> Result<Option<SeatLock>, ReservationError> {
        let now = Utc::now();
        {
            let cache = self.cache.read().await;
            if let Some(lock) = cache.get(&seat_id) {
                if !lock.is_expired(now) {
                    return Ok(Some(lock.clone()));
                }
            }
        }

        match self.store.get_lock(seat_id).await? {
            None => {
                self.cache.write().await.remove(&seat_id);
                Ok(None)
            }
            Some(lock) if lock.is_expired(now) => {
                self.store
                    .delete_if_expiry_matches(lock.seat_id, &lock.holder, lock.expires_at)
                    .await?;
                self.cache.write().await.remove(&seat_id);
                Ok(None)
            }
            Some(lock) => {
                self.cache.write().await.insert(seat_id, lock.clone());
                Ok(Some(lock))
            }
        }
    }

    /// Convert the holder's locks to a permanent booking: locks are deleted
    /// and the seats flip to `booked` in one store operation. Returns false
    /// when the holder no longer owns every seat, which means a lock expired
    /// and may have been re-granted mid-flight.
    pub async fn convert_to_permanent(
        &self,
        seat_ids: &[Uuid],
        holder: &str,
    ) -> Result<bool, ReservationError> {
        let seats = dedupe(seat_ids);
        let converted = self.store.convert_to_booked(&seats, holder).await?;
        if converted {
            let mut cache = self.cache.write().await;
            for seat_id in &seats {
                cache.remove(seat_id);
            }
        }
        Ok(converted)
    }

    /// Delete every lock whose TTL has elapsed, conditioned on the expiry
    /// timestamp read. Returns only the locks this runner actually deleted,
    /// so a concurrent sweep on another instance cannot double-report.
    pub async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatLock>, ReservationError> {
        let mut swept = Vec::new();
        for lock in self.store.list_expired(now).await? {
            if self
                .store
                .delete_if_expiry_matches(lock.seat_id, &lock.holder, lock.expires_at)
                .await?
            {
                self.cache.write().await.remove(&lock.seat_id);
                swept.push(lock);
            }
        }
        Ok(swept)
    }

    /// Replace the cache wholesale with the store's live rows. Used by the
    /// reconciler; the cache is derived state and can always be rebuilt.
    pub async fn replace_cache(&self, locks: Vec<SeatLock>) {
        let mut cache = self.cache.write().await;
        cache.clear();
        for lock in locks {
            cache.insert(lock.seat_id, lock);
        }
    }

    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }

    async fn evict(&self, locks: &[SeatLock]) {
        if locks.is_empty() {
            return;
        }
        let mut cache = self.cache.write().await;
        for lock in locks {
            cache.remove(&lock.seat_id);
        }
    }
}

fn dedupe(seat_ids: &[Uuid]) -> Vec<Uuid> {
    seat_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
}

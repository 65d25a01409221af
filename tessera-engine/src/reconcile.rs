use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use tessera_core::{LockStore, ReservationError, SeatStatus};

use crate::locks::SeatLockManager;

#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileReport {
    /// Expired persistent rows deleted during the walk.
    pub stale_rows: usize,
    /// Live locks the cache now mirrors.
    pub cached: usize,
    /// Seats found stuck in `locked` with no backing lock row and flipped
    /// back to `available`.
    pub repaired_seats: usize,
}

/// Repair pass aligning cache, lock store and seat status after drift, e.g.
/// following a crash that left seats stuck in `locked`. The persistent store
/// always wins: the cache is rebuilt from it, never the other way around.
pub struct Reconciler {
    locks: Arc<SeatLockManager>,
    store: Arc<dyn LockStore>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(locks: Arc<SeatLockManager>, store: Arc<dyn LockStore>, interval: Duration) -> Self {
        Self {
            locks,
            store,
            interval,
        }
    }

    /// Immediate pass at startup, then a slow periodic loop. Errors are
    /// logged and retried next tick.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "reconciler started");
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(report) if report.stale_rows > 0 || report.repaired_seats > 0 => {
                    info!(
                        stale_rows = report.stale_rows,
                        repaired_seats = report.repaired_seats,
                        cached = report.cached,
                        "reconcile pass"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "reconcile pass failed"),
            }
        }
    }

    pub async fn run_once(&self) -> Result<ReconcileReport, ReservationError> {
        let now = Utc::now();
        let mut report = ReconcileReport::default();

        // Walk the persistent rows: drop the expired ones (optimistically,
        // a concurrent sweep may beat us) and keep the live set.
        let mut live = Vec::new();
        for lock in self.store.list_locks().await? {
            if lock.is_expired(now) {
                if self
                    .store
                    .delete_if_expiry_matches(lock.seat_id, &lock.holder, lock.expires_at)
                    .await?
                {
                    report.stale_rows += 1;
                }
            } else {
                live.push(lock);
            }
        }

        // The cache is derived state; rebuild it wholesale from the store.
        report.cached = live.len();
        self.locks.replace_cache(live).await;

        // Seats stuck in `locked` with no lock row behind them: release back
        // to the pool. This is the crash-recovery safety net.
        for seat_id in self.store.list_orphaned_seats(now).await? {
            if self
                .store
                .set_seat_status(seat_id, SeatStatus::Locked, SeatStatus::Available)
                .await?
            {
                warn!(%seat_id, "reconciled orphaned seat back to available");
                report.repaired_seats += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tessera_store::MemoryStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_reconcile_repairs_orphaned_seat() {
        let store = Arc::new(MemoryStore::new());
        let seats = store.seed_seats(Uuid::new_v4(), 1).await;
        let locks = Arc::new(SeatLockManager::new(store.clone()));
        let reconciler = Reconciler::new(locks, store.clone(), Duration::from_secs(600));

        // Simulate a crash that left the seat marked locked with no row.
        store
            .set_seat_status(seats[0], SeatStatus::Available, SeatStatus::Locked)
            .await
            .unwrap();

        let report = reconciler.run_once().await.unwrap();
        assert_eq!(report.repaired_seats, 1);
        assert_eq!(store.seat_status(seats[0]).await, Some(SeatStatus::Available));
    }

    #[tokio::test]
    async fn test_reconcile_drops_stale_rows_and_rebuilds_cache() {
        let store = Arc::new(MemoryStore::new());
        let seats = store.seed_seats(Uuid::new_v4(), 2).await;
        let locks = Arc::new(SeatLockManager::new(store.clone()));

        locks
            .acquire(&seats, "alice", ChronoDuration::seconds(300))
            .await
            .unwrap();
        store.force_expire_lock(seats[0]).await;

        let reconciler = Reconciler::new(locks.clone(), store.clone(), Duration::from_secs(600));
        let report = reconciler.run_once().await.unwrap();

        assert_eq!(report.stale_rows, 1);
        assert_eq!(report.cached, 1);
        assert_eq!(locks.cached_count().await, 1);
        assert!(store.get_lock(seats[0]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reconcile_leaves_healthy_state_alone() {
        let store = Arc::new(MemoryStore::new());
        let seats = store.seed_seats(Uuid::new_v4(), 1).await;
        let locks = Arc::new(SeatLockManager::new(store.clone()));

        locks
            .acquire(&seats, "alice", ChronoDuration::seconds(300))
            .await
            .unwrap();

        let reconciler = Reconciler::new(locks, store.clone(), Duration::from_secs(600));
        let report = reconciler.run_once().await.unwrap();
        assert_eq!(report.stale_rows, 0);
        assert_eq!(report.repaired_seats, 0);
        assert_eq!(report.cached, 1);
    }
}

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use tessera_core::{ReleaseCause, ReservationError, ReservationEvent, SessionStore};

use crate::dispatch::NotificationDispatcher;
use crate::locks::SeatLockManager;
use crate::session::{PaymentSessions, REASON_EXPIRED};

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    pub locks_expired: usize,
    pub sessions_failed: usize,
}

/// Periodic scan-and-release pass over expired locks and sessions. Safe to
/// run concurrently from multiple instances: every delete is conditioned on
/// the expiry timestamp read, so only the runner that performed the actual
/// state change emits notifications.
pub struct ExpirySweeper {
    locks: Arc<SeatLockManager>,
    sessions: Arc<PaymentSessions>,
    session_store: Arc<dyn SessionStore>,
    dispatcher: Arc<NotificationDispatcher>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(
        locks: Arc<SeatLockManager>,
        sessions: Arc<PaymentSessions>,
        session_store: Arc<dyn SessionStore>,
        dispatcher: Arc<NotificationDispatcher>,
        interval: Duration,
    ) -> Self {
        Self {
            locks,
            sessions,
            session_store,
            dispatcher,
            interval,
        }
    }

    /// Loop forever; sweep errors are logged and retried next tick. The
    /// reconciler repairs anything a failed sweep leaves behind.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "expiry sweeper started");
        loop {
            ticker.tick().await;
            match self.sweep_once().await {
                Ok(report) if report.locks_expired > 0 || report.sessions_failed > 0 => {
                    info!(
                        locks_expired = report.locks_expired,
                        sessions_failed = report.sessions_failed,
                        "sweep pass"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "sweep pass failed"),
            }
        }
    }

    pub async fn sweep_once(&self) -> Result<SweepReport, ReservationError> {
        let now = Utc::now();
        let mut report = SweepReport::default();

        // Expired locks first, grouped per (event, holder) for notification.
        let swept = self.locks.sweep_expired(now).await?;
        report.locks_expired = swept.len();
        for (key, seat_ids) in group_by_owner(&swept) {
            self.dispatcher
                .publish(&ReservationEvent::SeatsReleased {
                    event_id: key.0,
                    seat_ids,
                    holder: key.1,
                    cause: ReleaseCause::Expired,
                })
                .await;
        }

        // Then abandoned sessions. `fail` is idempotent and skips sessions a
        // concurrent sweeper already moved.
        for session in self.session_store.list_expired(now).await? {
            match self.sessions.fail(session.id, REASON_EXPIRED).await {
                Ok(_) => report.sessions_failed += 1,
                Err(ReservationError::InvalidState { .. }) => {}
                Err(e) => {
                    error!(session_id = %session.id, error = %e, "failed to expire session")
                }
            }
        }

        Ok(report)
    }
}

fn group_by_owner(
    swept: &[tessera_core::SeatLock],
) -> Vec<((Uuid, String), Vec<Uuid>)> {
    let mut groups: Vec<((Uuid, String), Vec<Uuid>)> = Vec::new();
    for lock in swept {
        let key = (lock.event_id, lock.holder.clone());
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, seats)) => seats.push(lock.seat_id),
            None => groups.push((key, vec![lock.seat_id])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{BroadcastTransport, Envelope};
    use chrono::Duration as ChronoDuration;
    use tessera_core::{SeatStatus, SessionStatus};
    use tessera_store::MemoryStore;
    use tokio::sync::broadcast;

    struct Fixture {
        store: Arc<MemoryStore>,
        locks: Arc<SeatLockManager>,
        sessions: Arc<PaymentSessions>,
        sweeper: ExpirySweeper,
        rx: broadcast::Receiver<Envelope>,
        event_id: Uuid,
        seats: Vec<Uuid>,
    }

    async fn setup(count: usize) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let event_id = Uuid::new_v4();
        let seats = store.seed_seats(event_id, count).await;

        let locks = Arc::new(SeatLockManager::new(store.clone()));
        let transport = Arc::new(BroadcastTransport::new(64));
        let rx = transport.subscribe();
        let dispatcher = Arc::new(NotificationDispatcher::new(transport));
        let sessions = Arc::new(PaymentSessions::new(
            locks.clone(),
            store.clone(),
            store.clone(),
            dispatcher.clone(),
        ));
        let sweeper = ExpirySweeper::new(
            locks.clone(),
            sessions.clone(),
            store.clone(),
            dispatcher,
            Duration::from_secs(30),
        );

        Fixture {
            store,
            locks,
            sessions,
            sweeper,
            rx,
            event_id,
            seats,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<Envelope>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            out.push(envelope);
        }
        out
    }

    #[tokio::test]
    async fn test_sweep_releases_expired_lock_and_notifies() {
        let mut fx = setup(1).await;

        fx.locks
            .acquire(&fx.seats, "alice", ChronoDuration::seconds(300))
            .await
            .unwrap();
        fx.store.force_expire_lock(fx.seats[0]).await;
        drain(&mut fx.rx);

        let report = fx.sweeper.sweep_once().await.unwrap();
        assert_eq!(report.locks_expired, 1);

        let expired: Vec<_> = drain(&mut fx.rx)
            .into_iter()
            .filter(|e| e.event == "seats.expired" && e.channel == "admin")
            .collect();
        assert_eq!(expired.len(), 1);

        // Someone else can now take the seat.
        fx.locks
            .acquire(&fx.seats, "bob", ChronoDuration::seconds(300))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_fails_abandoned_session() {
        let fx = setup(2).await;

        let session = fx
            .sessions
            .create("alice", fx.event_id, &fx.seats, 9_000, "INR", ChronoDuration::seconds(300))
            .await
            .unwrap();
        fx.store.force_expire_session(session.id).await;
        // Expire the locks too, as they would have in real time.
        for seat in &fx.seats {
            fx.store.force_expire_lock(*seat).await;
        }

        let report = fx.sweeper.sweep_once().await.unwrap();
        assert_eq!(report.locks_expired, 2);
        assert_eq!(report.sessions_failed, 1);

        let session = fx.sessions.get(session.id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.failure_reason.as_deref(), Some(REASON_EXPIRED));
        for seat in &fx.seats {
            assert_eq!(fx.store.seat_status(*seat).await, Some(SeatStatus::Available));
        }
    }

    #[tokio::test]
    async fn test_double_sweep_is_a_noop() {
        let mut fx = setup(1).await;

        let session = fx
            .sessions
            .create("alice", fx.event_id, &fx.seats, 9_000, "INR", ChronoDuration::seconds(300))
            .await
            .unwrap();
        fx.store.force_expire_session(session.id).await;
        fx.store.force_expire_lock(fx.seats[0]).await;

        fx.sweeper.sweep_once().await.unwrap();
        drain(&mut fx.rx);

        let second = fx.sweeper.sweep_once().await.unwrap();
        assert_eq!(second.locks_expired, 0);
        assert_eq!(second.sessions_failed, 0);
        assert!(drain(&mut fx.rx).is_empty());
    }
}

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use tessera_core::{
    BookingStore, PaymentSession, ReleaseCause, ReservationError, ReservationEvent, SeatLock,
    SessionPatch, SessionStatus, SessionStore,
};

use crate::dispatch::NotificationDispatcher;
use crate::locks::SeatLockManager;

pub const REASON_EXPIRED: &str = "expired";
pub const REASON_LOCK_LOST: &str = "lock_lost";

/// How long re-acquired seats are held while a rejected-then-retried session
/// completes. Only the retry path uses this; it just needs to bridge the
/// conversion call.
const RETRY_HOLD: i64 = 60;

/// Payment session state machine. Every transition goes through the session
/// store's conditional write, so two racing callers (or a caller racing the
/// sweep) resolve deterministically: one performs the write and publishes,
/// the other observes the result. Notifications always follow the commit.
pub struct PaymentSessions {
    locks: Arc<SeatLockManager>,
    sessions: Arc<dyn SessionStore>,
    bookings: Arc<dyn BookingStore>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl PaymentSessions {
    pub fn new(
        locks: Arc<SeatLockManager>,
        sessions: Arc<dyn SessionStore>,
        bookings: Arc<dyn BookingStore>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            locks,
            sessions,
            bookings,
            dispatcher,
        }
    }

    /// Acquire the seats and open a `PENDING` session spanning them. The
    /// session's user is the lock holder, so a user who pre-held the seats
    /// simply gets them renewed here.
    pub async fn create(
        &self,
        user_id: &str,
        event_id: Uuid,
        seat_ids: &[Uuid],
        amount_minor: i64,
        currency: &str,
        ttl: Duration,
    ) -> Result<PaymentSession, ReservationError> {
        let grant = self.locks.acquire(seat_ids, user_id, ttl).await?;

        let session = PaymentSession::new(
            user_id.to_string(),
            event_id,
            grant.locks.iter().map(|l| l.seat_id).collect(),
            amount_minor,
            currency.to_string(),
            grant.expires_at,
        );

        if let Err(e) = self.sessions.insert(&session).await {
            // Don't strand the seats behind a session that was never born.
            if let Err(cleanup) = self.locks.release_held(&session.seat_ids, user_id).await {
                warn!(session_id = %session.id, error = %cleanup, "lock cleanup after failed insert");
            }
            return Err(ReservationError::Store(e));
        }

        info!(session_id = %session.id, user_id, seats = session.seat_ids.len(), "payment session created");

        self.dispatcher
            .publish(&ReservationEvent::SeatsLocked {
                event_id,
                seat_ids: session.seat_ids.clone(),
                holder: user_id.to_string(),
                expires_at: grant.expires_at,
            })
            .await;
        self.dispatcher
            .publish(&ReservationEvent::SessionCreated {
                session_id: session.id,
                user_id: session.user_id.clone(),
                event_id,
                seat_ids: session.seat_ids.clone(),
                amount_minor,
                currency: session.currency.clone(),
                expires_at: session.expires_at,
            })
            .await;

        Ok(session)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<PaymentSession>, ReservationError> {
        Ok(self.sessions.get(id).await?)
    }

    /// Record the externally supplied payment reference (e.g. a UTR) and
    /// move `PENDING → VERIFICATION_PENDING`. An already expired session is
    /// failed instead and surfaced as `Expired`.
    pub async fn submit_verification(
        &self,
        id: Uuid,
        reference: &str,
    ) -> Result<PaymentSession, ReservationError> {
        let session = self.load(id).await?;
        if session.status != SessionStatus::Pending {
            return Err(ReservationError::InvalidState {
                operation: "submit_verification",
                state: session.status,
            });
        }
        if session.is_expired(Utc::now()) {
            self.fail(id, REASON_EXPIRED).await?;
            return Err(ReservationError::Expired(id));
        }

        let updated = self
            .sessions
            .transition(
                id,
                &[SessionStatus::Pending],
                SessionStatus::VerificationPending,
                SessionPatch::reference(reference),
            )
            .await?;

        match updated {
            None => {
                // A racer (user action or sweep) moved the session first.
                let current = self.load(id).await?;
                Err(ReservationError::InvalidState {
                    operation: "submit_verification",
                    state: current.status,
                })
            }
            Some(session) => {
                self.dispatcher
                    .publish(&ReservationEvent::VerificationSubmitted {
                        session_id: session.id,
                        user_id: session.user_id.clone(),
                        event_id: session.event_id,
                        reference: reference.to_string(),
                    })
                    .await;
                Ok(session)
            }
        }
    }

    /// Verifier-driven completion: convert the locks to a booking, then mark
    /// the session `COMPLETED` and create the booking record exactly once.
    ///
    /// Legal from `VERIFICATION_PENDING`, and from `FAILED` when a reference
    /// was already submitted: one retry after a false rejection. The retry
    /// re-acquires the seats first since the rejection released them; if
    /// somebody claimed a seat in between the retry surfaces `LockLost`.
    pub async fn complete(&self, id: Uuid) -> Result<PaymentSession, ReservationError> {
        let session = self.load(id).await?;
        match session.status {
            SessionStatus::Completed => return Ok(session),
            SessionStatus::VerificationPending => {}
            SessionStatus::Failed if session.reference.is_some() => {
                let retry_hold = Duration::seconds(RETRY_HOLD);
                if let Err(e) = self
                    .locks
                    .acquire(&session.seat_ids, &session.user_id, retry_hold)
                    .await
                {
                    return match e {
                        ReservationError::SeatsUnavailable(_) => {
                            Err(ReservationError::LockLost(id))
                        }
                        other => Err(other),
                    };
                }
            }
            state => {
                return Err(ReservationError::InvalidState {
                    operation: "complete",
                    state,
                })
            }
        }

        let converted = self
            .locks
            .convert_to_permanent(&session.seat_ids, &session.user_id)
            .await?;
        if !converted {
            return self.fail_lock_lost(session).await;
        }

        let updated = self
            .sessions
            .transition(
                id,
                &[SessionStatus::VerificationPending, SessionStatus::Failed],
                SessionStatus::Completed,
                SessionPatch::default(),
            )
            .await?;

        let session = match updated {
            Some(s) => s,
            // Somebody else moved the session between our read and write.
            // Completed is fine (the booking below is idempotent); anything
            // else means a racer failed it and we must not book.
            None => {
                let current = self.load(id).await?;
                if current.status != SessionStatus::Completed {
                    return Err(ReservationError::InvalidState {
                        operation: "complete",
                        state: current.status,
                    });
                }
                current
            }
        };

        let booking = self.bookings.create_once(&session).await?;
        info!(session_id = %session.id, booking_id = %booking.id, "payment session completed");

        self.dispatcher
            .publish(&ReservationEvent::SessionCompleted {
                session_id: session.id,
                user_id: session.user_id.clone(),
                event_id: session.event_id,
                seat_ids: session.seat_ids.clone(),
                booking_id: booking.id,
            })
            .await;

        Ok(session)
    }

    /// Terminal failure from any non-terminal state. Releases whatever locks
    /// the session's holder still owns; a session that is already `FAILED`
    /// is returned unchanged with no duplicate notification.
    pub async fn fail(&self, id: Uuid, reason: &str) -> Result<PaymentSession, ReservationError> {
        let session = self.load(id).await?;
        match session.status {
            SessionStatus::Failed => return Ok(session),
            SessionStatus::Completed => {
                return Err(ReservationError::InvalidState {
                    operation: "fail",
                    state: session.status,
                })
            }
            _ => {}
        }

        let updated = self
            .sessions
            .transition(
                id,
                &[SessionStatus::Pending, SessionStatus::VerificationPending],
                SessionStatus::Failed,
                SessionPatch::failure(reason),
            )
            .await?;

        let Some(session) = updated else {
            // Lost the race; report whatever the winner made of it.
            let current = self.load(id).await?;
            return match current.status {
                SessionStatus::Failed => Ok(current),
                state => Err(ReservationError::InvalidState {
                    operation: "fail",
                    state,
                }),
            };
        };

        let released = self
            .locks
            .release_held(&session.seat_ids, &session.user_id)
            .await?;
        self.publish_failure(&session, reason, &released).await;
        Ok(session)
    }

    async fn fail_lock_lost(
        &self,
        session: PaymentSession,
    ) -> Result<PaymentSession, ReservationError> {
        let was_failed = session.status == SessionStatus::Failed;
        let updated = self
            .sessions
            .transition(
                session.id,
                &[SessionStatus::VerificationPending, SessionStatus::Failed],
                SessionStatus::Failed,
                SessionPatch::failure(REASON_LOCK_LOST),
            )
            .await?;

        if let Some(failed) = updated {
            let released = self
                .locks
                .release_held(&failed.seat_ids, &failed.user_id)
                .await?;
            if !was_failed {
                self.publish_failure(&failed, REASON_LOCK_LOST, &released).await;
            }
        }
        Err(ReservationError::LockLost(session.id))
    }

    async fn publish_failure(&self, session: &PaymentSession, reason: &str, released: &[SeatLock]) {
        if !released.is_empty() {
            let cause = if reason == REASON_EXPIRED {
                ReleaseCause::Expired
            } else {
                ReleaseCause::Released
            };
            self.dispatcher
                .publish(&ReservationEvent::SeatsReleased {
                    event_id: session.event_id,
                    seat_ids: released.iter().map(|l| l.seat_id).collect(),
                    holder: session.user_id.clone(),
                    cause,
                })
                .await;
        }
        self.dispatcher
            .publish(&ReservationEvent::SessionFailed {
                session_id: session.id,
                user_id: session.user_id.clone(),
                event_id: session.event_id,
                seat_ids: session.seat_ids.clone(),
                reason: reason.to_string(),
            })
            .await;
    }

    async fn load(&self, id: Uuid) -> Result<PaymentSession, ReservationError> {
        self.sessions
            .get(id)
            .await?
            .ok_or(ReservationError::SessionNotFound(id))
    }
}

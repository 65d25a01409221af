use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use tessera_core::repository::BookingStore;
use tessera_core::{Booking, BoxError, PaymentSession};

/// Bookings are keyed by session id with a unique constraint; the insert is
/// `ON CONFLICT DO NOTHING` plus a read-back, so concurrent completions of
/// the same session converge on one booking row.
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    session_id: Uuid,
    user_id: String,
    event_id: Uuid,
    seat_ids: Vec<Uuid>,
    amount_minor: i64,
    currency: String,
    created_at: DateTime<Utc>,
}

impl From<BookingRow> for Booking {
    fn from(row: BookingRow) -> Self {
        Booking {
            id: row.id,
            session_id: row.session_id,
            user_id: row.user_id,
            event_id: row.event_id,
            seat_ids: row.seat_ids,
            amount_minor: row.amount_minor,
            currency: row.currency,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn create_once(&self, session: &PaymentSession) -> Result<Booking, BoxError> {
        sqlx::query(
            "INSERT INTO bookings
               (id, session_id, user_id, event_id, seat_ids, amount_minor, currency, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, now())
             ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(session.id)
        .bind(&session.user_id)
        .bind(session.event_id)
        .bind(&session.seat_ids)
        .bind(session.amount_minor)
        .bind(&session.currency)
        .execute(&self.pool)
        .await?;

        let row: BookingRow = sqlx::query_as(
            "SELECT id, session_id, user_id, event_id, seat_ids, amount_minor, currency, created_at
             FROM bookings WHERE session_id = $1",
        )
        .bind(session.id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use tessera_core::repository::{SessionPatch, SessionStore};
use tessera_core::{BoxError, PaymentSession, SessionStatus};

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: String,
    event_id: Uuid,
    seat_ids: Vec<Uuid>,
    amount_minor: i64,
    currency: String,
    status: String,
    reference: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for PaymentSession {
    type Error = BoxError;

    fn try_from(row: SessionRow) -> Result<Self, BoxError> {
        let status = SessionStatus::parse(&row.status)
            .ok_or_else(|| format!("unknown session status '{}' for {}", row.status, row.id))?;
        Ok(PaymentSession {
            id: row.id,
            user_id: row.user_id,
            event_id: row.event_id,
            seat_ids: row.seat_ids,
            amount_minor: row.amount_minor,
            currency: row.currency,
            status,
            reference: row.reference,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

const SESSION_COLUMNS: &str = "id, user_id, event_id, seat_ids, amount_minor, currency, status, \
                               reference, failure_reason, created_at, expires_at";

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: &PaymentSession) -> Result<(), BoxError> {
        sqlx::query(
            "INSERT INTO payment_sessions
               (id, user_id, event_id, seat_ids, amount_minor, currency, status,
                reference, failure_reason, created_at, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(session.id)
        .bind(&session.user_id)
        .bind(session.event_id)
        .bind(&session.seat_ids)
        .bind(session.amount_minor)
        .bind(&session.currency)
        .bind(session.status.as_str())
        .bind(&session.reference)
        .bind(&session.failure_reason)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentSession>, BoxError> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM payment_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PaymentSession::try_from).transpose()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[SessionStatus],
        to: SessionStatus,
        patch: SessionPatch,
    ) -> Result<Option<PaymentSession>, BoxError> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "UPDATE payment_sessions
             SET status = $2,
                 reference = COALESCE($3, reference),
                 failure_reason = COALESCE($4, failure_reason)
             WHERE id = $1 AND status = ANY($5)
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(id)
        .bind(to.as_str())
        .bind(&patch.reference)
        .bind(&patch.failure_reason)
        .bind(&from)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PaymentSession::try_from).transpose()
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<PaymentSession>, BoxError> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM payment_sessions
             WHERE expires_at <= $1 AND status IN ('PENDING', 'VERIFICATION_PENDING')"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PaymentSession::try_from).collect()
    }
}

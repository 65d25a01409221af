use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use tessera_core::repository::{LockStore, LockWrite, ReleaseWrite};
use tessera_core::{BoxError, SeatLock, SeatStatus};

/// Postgres lock table. All multi-row guards run inside a transaction that
/// takes `FOR UPDATE` on the contended rows, so two racing acquires for
/// overlapping seat sets serialize at the database and the loser observes
/// the winner's rows.
///
/// Row locks are always taken in one global order: seats first, then
/// seat_locks. A path that touched seat_locks before seats would deadlock
/// against a concurrent acquire holding the seat rows.
pub struct PgLockStore {
    pool: PgPool,
}

impl PgLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Pin the seat rows before reading or writing seat_locks, keeping the
/// lock order consistent with `acquire_all`.
async fn pin_seats(tx: &mut Transaction<'_, Postgres>, ids: &[Uuid]) -> Result<(), BoxError> {
    sqlx::query("SELECT id FROM seats WHERE id = ANY($1) ORDER BY id FOR UPDATE")
        .bind(ids)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct LockRow {
    seat_id: Uuid,
    event_id: Uuid,
    holder_id: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<LockRow> for SeatLock {
    fn from(row: LockRow) -> Self {
        SeatLock {
            seat_id: row.seat_id,
            event_id: row.event_id,
            holder: row.holder_id,
            acquired_at: row.acquired_at,
            expires_at: row.expires_at,
        }
    }
}

#[async_trait]
impl LockStore for PgLockStore {
    async fn acquire_all(
        &self,
        seat_ids: &[Uuid],
        holder: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<LockWrite, BoxError> {
        let ids = seat_ids.to_vec();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // Pin the seat rows first; a booked seat is never lockable.
        let seats: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT id, status FROM seats WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;
        if seats.len() != ids.len() {
            return Err(format!("unknown seat in acquire set ({} of {} found)", seats.len(), ids.len()).into());
        }
        let mut conflicts: Vec<Uuid> = seats
            .iter()
            .filter(|(_, status)| SeatStatus::parse(status) == Some(SeatStatus::Booked))
            .map(|(id, _)| *id)
            .collect();

        let existing: Vec<LockRow> = sqlx::query_as(
            "SELECT seat_id, event_id, holder_id, acquired_at, expires_at
             FROM seat_locks WHERE seat_id = ANY($1) ORDER BY seat_id FOR UPDATE",
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        let mut renewed = Vec::new();
        for row in &existing {
            if row.expires_at > now {
                if row.holder_id == holder {
                    renewed.push(row.seat_id);
                } else {
                    conflicts.push(row.seat_id);
                }
            }
        }
        if !conflicts.is_empty() {
            conflicts.sort();
            conflicts.dedup();
            tx.rollback().await?;
            return Ok(LockWrite::Conflict(conflicts));
        }

        let locks: Vec<LockRow> = sqlx::query_as(
            "INSERT INTO seat_locks (seat_id, event_id, holder_id, acquired_at, expires_at)
             SELECT s.id, s.event_id, $2, now(), $3 FROM seats s WHERE s.id = ANY($1)
             ON CONFLICT (seat_id) DO UPDATE
               SET holder_id = EXCLUDED.holder_id,
                   expires_at = EXCLUDED.expires_at,
                   acquired_at = CASE
                     WHEN seat_locks.holder_id = EXCLUDED.holder_id
                          AND seat_locks.expires_at > now()
                     THEN seat_locks.acquired_at
                     ELSE now()
                   END
             RETURNING seat_id, event_id, holder_id, acquired_at, expires_at",
        )
        .bind(&ids)
        .bind(holder)
        .bind(expires_at)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("UPDATE seats SET status = 'locked' WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(LockWrite::Granted {
            locks: locks.into_iter().map(SeatLock::from).collect(),
            renewed,
        })
    }

    async fn release_all(
        &self,
        seat_ids: &[Uuid],
        holder: &str,
    ) -> Result<ReleaseWrite, BoxError> {
        let ids = seat_ids.to_vec();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        pin_seats(&mut tx, &ids).await?;

        let existing: Vec<LockRow> = sqlx::query_as(
            "SELECT seat_id, event_id, holder_id, acquired_at, expires_at
             FROM seat_locks WHERE seat_id = ANY($1) ORDER BY seat_id FOR UPDATE",
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        // A live lock owned by someone else forbids the whole release. An
        // expired foreign row is not a held lock; the sweep will collect it.
        let foreign: Vec<Uuid> = existing
            .iter()
            .filter(|row| row.holder_id != holder && row.expires_at > now)
            .map(|row| row.seat_id)
            .collect();
        if !foreign.is_empty() {
            tx.rollback().await?;
            return Ok(ReleaseWrite::Forbidden(foreign));
        }

        let own: Vec<Uuid> = existing
            .iter()
            .filter(|row| row.holder_id == holder)
            .map(|row| row.seat_id)
            .collect();
        let released: Vec<LockRow> = sqlx::query_as(
            "DELETE FROM seat_locks WHERE seat_id = ANY($1)
             RETURNING seat_id, event_id, holder_id, acquired_at, expires_at",
        )
        .bind(&own)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("UPDATE seats SET status = 'available' WHERE id = ANY($1) AND status = 'locked'")
            .bind(&own)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ReleaseWrite::Released(
            released.into_iter().map(SeatLock::from).collect(),
        ))
    }

    async fn delete_if_held_by(
        &self,
        seat_ids: &[Uuid],
        holder: &str,
    ) -> Result<Vec<SeatLock>, BoxError> {
        let ids = seat_ids.to_vec();
        let mut tx = self.pool.begin().await?;
        pin_seats(&mut tx, &ids).await?;

        let deleted: Vec<LockRow> = sqlx::query_as(
            "DELETE FROM seat_locks WHERE seat_id = ANY($1) AND holder_id = $2
             RETURNING seat_id, event_id, holder_id, acquired_at, expires_at",
        )
        .bind(&ids)
        .bind(holder)
        .fetch_all(&mut *tx)
        .await?;

        let freed: Vec<Uuid> = deleted.iter().map(|row| row.seat_id).collect();
        sqlx::query("UPDATE seats SET status = 'available' WHERE id = ANY($1) AND status = 'locked'")
            .bind(&freed)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted.into_iter().map(SeatLock::from).collect())
    }

    async fn delete_if_expiry_matches(
        &self,
        seat_id: Uuid,
        holder: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, BoxError> {
        let mut tx = self.pool.begin().await?;
        pin_seats(&mut tx, &[seat_id]).await?;

        let deleted = sqlx::query(
            "DELETE FROM seat_locks WHERE seat_id = $1 AND holder_id = $2 AND expires_at = $3",
        )
        .bind(seat_id)
        .bind(holder)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if deleted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE seats SET status = 'available' WHERE id = $1 AND status = 'locked'")
            .bind(seat_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn get_lock(&self, seat_id: Uuid) -> Result<Option<SeatLock>, BoxError> {
        let row: Option<LockRow> = sqlx::query_as(
            "SELECT seat_id, event_id, holder_id, acquired_at, expires_at
             FROM seat_locks WHERE seat_id = $1",
        )
        .bind(seat_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(SeatLock::from))
    }

    async fn list_locks(&self) -> Result<Vec<SeatLock>, BoxError> {
        let rows: Vec<LockRow> = sqlx::query_as(
            "SELECT seat_id, event_id, holder_id, acquired_at, expires_at FROM seat_locks",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SeatLock::from).collect())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<SeatLock>, BoxError> {
        let rows: Vec<LockRow> = sqlx::query_as(
            "SELECT seat_id, event_id, holder_id, acquired_at, expires_at
             FROM seat_locks WHERE expires_at <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SeatLock::from).collect())
    }

    async fn convert_to_booked(&self, seat_ids: &[Uuid], holder: &str) -> Result<bool, BoxError> {
        let ids = seat_ids.to_vec();
        let mut tx = self.pool.begin().await?;
        pin_seats(&mut tx, &ids).await?;

        let held: Vec<Uuid> = sqlx::query_scalar(
            "SELECT seat_id FROM seat_locks
             WHERE seat_id = ANY($1) AND holder_id = $2 AND expires_at > now()
             ORDER BY seat_id FOR UPDATE",
        )
        .bind(&ids)
        .bind(holder)
        .fetch_all(&mut *tx)
        .await?;
        if held.len() != ids.len() {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM seat_locks WHERE seat_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE seats SET status = 'booked' WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn list_orphaned_seats(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, BoxError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT s.id FROM seats s
             LEFT JOIN seat_locks l ON l.seat_id = s.id AND l.expires_at > $1
             WHERE s.status = 'locked' AND l.seat_id IS NULL",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn set_seat_status(
        &self,
        seat_id: Uuid,
        from: SeatStatus,
        to: SeatStatus,
    ) -> Result<bool, BoxError> {
        let updated = sqlx::query("UPDATE seats SET status = $3 WHERE id = $1 AND status = $2")
            .bind(seat_id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }
}

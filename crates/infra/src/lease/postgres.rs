//! Postgres-backed lease ledger.
//!
//! Expected table:
//!
//! ```sql
//! CREATE TABLE leases (
//!     source_client      TEXT        NOT NULL,
//!     source_reading_id  BIGINT      NOT NULL,
//!     image_url          TEXT        NOT NULL,
//!     holder_session_id  TEXT        NOT NULL,
//!     nonce              UUID        NOT NULL,
//!     acquired_at        TIMESTAMPTZ NOT NULL,
//!     expires_at         TIMESTAMPTZ NOT NULL,
//!     PRIMARY KEY (source_client, source_reading_id)
//! );
//! ```
//!
//! Expiry is judged against the database clock (`now()`), so several server
//! processes sharing the table agree on it regardless of host clock skew.
//!
//! ## Atomic acquire
//!
//! `acquire` is a single `INSERT .. ON CONFLICT DO UPDATE .. WHERE
//! leases.expires_at <= now() RETURNING ..`. A missing row is inserted, an
//! expired row is taken over, and a live row is left untouched (no row comes
//! back, which maps to `AlreadyLeased`). Concurrent inserts on one key are
//! serialized by the primary key.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use meterlab_core::{ClientId, Lease, LeaseKey, ReadingId, SessionId};

use super::r#trait::{LeaseError, LeaseLedger};

#[derive(Debug, Clone)]
pub struct PostgresLeaseLedger {
    pool: Arc<PgPool>,
}

impl PostgresLeaseLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(
        skip(self, image_url),
        fields(
            source_client = %key.source_client,
            source_reading_id = %key.source_reading_id,
            session_id = %session
        )
    )]
    pub async fn acquire_lease(
        &self,
        key: &LeaseKey,
        image_url: &str,
        session: &SessionId,
        ttl: chrono::Duration,
    ) -> Result<Lease, LeaseError> {
        if ttl <= chrono::Duration::zero() {
            return Err(LeaseError::InvalidTtl(format!("lease ttl must be positive, got {ttl}")));
        }
        let ttl_secs = ttl.num_milliseconds() as f64 / 1000.0;

        let row = sqlx::query(
            r#"
            INSERT INTO leases (
                source_client,
                source_reading_id,
                image_url,
                holder_session_id,
                nonce,
                acquired_at,
                expires_at
            )
            VALUES ($1, $2, $3, $4, $5, now(), now() + make_interval(secs => $6))
            ON CONFLICT (source_client, source_reading_id) DO UPDATE
            SET image_url = EXCLUDED.image_url,
                holder_session_id = EXCLUDED.holder_session_id,
                nonce = EXCLUDED.nonce,
                acquired_at = EXCLUDED.acquired_at,
                expires_at = EXCLUDED.expires_at
            WHERE leases.expires_at <= now()
            RETURNING
                source_client,
                source_reading_id,
                image_url,
                holder_session_id,
                nonce,
                acquired_at,
                expires_at
            "#,
        )
        .bind(key.source_client.as_str())
        .bind(key.source_reading_id.get())
        .bind(image_url)
        .bind(session.as_str())
        .bind(Uuid::now_v7())
        .bind(ttl_secs)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("acquire", e))?;

        match row {
            Some(row) => decode_lease(&row),
            None => Err(LeaseError::AlreadyLeased(key.clone())),
        }
    }

    #[instrument(
        skip(self),
        fields(
            source_client = %key.source_client,
            source_reading_id = %key.source_reading_id,
            session_id = %session
        ),
        err
    )]
    pub async fn release_lease(&self, key: &LeaseKey, session: &SessionId) -> Result<(), LeaseError> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM leases
            WHERE source_client = $1
              AND source_reading_id = $2
              AND holder_session_id = $3
              AND expires_at > now()
            "#,
        )
        .bind(key.source_client.as_str())
        .bind(key.source_reading_id.get())
        .bind(session.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("release", e))?
        .rows_affected();

        if deleted > 0 {
            return Ok(());
        }

        match self.load_live(key).await? {
            Some(_) => Err(LeaseError::NotHolder(key.clone())),
            None => Err(LeaseError::NotFound(key.clone())),
        }
    }

    pub async fn load_live(&self, key: &LeaseKey) -> Result<Option<Lease>, LeaseError> {
        let row = sqlx::query(
            r#"
            SELECT
                source_client,
                source_reading_id,
                image_url,
                holder_session_id,
                nonce,
                acquired_at,
                expires_at
            FROM leases
            WHERE source_client = $1 AND source_reading_id = $2 AND expires_at > now()
            "#,
        )
        .bind(key.source_client.as_str())
        .bind(key.source_reading_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_live", e))?;

        row.as_ref().map(decode_lease).transpose()
    }

    #[instrument(skip(self), fields(source_client = %client), err)]
    pub async fn load_active_ids(&self, client: &ClientId) -> Result<HashSet<ReadingId>, LeaseError> {
        let rows = sqlx::query(
            r#"
            SELECT source_reading_id
            FROM leases
            WHERE source_client = $1 AND expires_at > now()
            "#,
        )
        .bind(client.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("active_ids", e))?;

        let mut ids = HashSet::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row
                .try_get("source_reading_id")
                .map_err(|e| map_sqlx_error("active_ids", e))?;
            ids.insert(ReadingId::new(id));
        }
        Ok(ids)
    }

    #[instrument(skip(self), err)]
    pub async fn delete_expired(&self) -> Result<usize, LeaseError> {
        let deleted = sqlx::query("DELETE FROM leases WHERE expires_at <= now()")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_expired", e))?
            .rows_affected();
        Ok(deleted as usize)
    }
}

fn runtime() -> Result<tokio::runtime::Handle, LeaseError> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        LeaseError::Unavailable(
            "PostgresLeaseLedger must be called from within a tokio runtime context".to_string(),
        )
    })
}

impl LeaseLedger for PostgresLeaseLedger {
    fn acquire(
        &self,
        key: &LeaseKey,
        image_url: &str,
        session: &SessionId,
        ttl: chrono::Duration,
    ) -> Result<Lease, LeaseError> {
        runtime()?.block_on(self.acquire_lease(key, image_url, session, ttl))
    }

    fn release(&self, key: &LeaseKey, session: &SessionId) -> Result<(), LeaseError> {
        runtime()?.block_on(self.release_lease(key, session))
    }

    fn get(&self, key: &LeaseKey) -> Result<Option<Lease>, LeaseError> {
        runtime()?.block_on(self.load_live(key))
    }

    fn active_ids(&self, client: &ClientId) -> Result<HashSet<ReadingId>, LeaseError> {
        runtime()?.block_on(self.load_active_ids(client))
    }

    fn purge_expired(&self) -> Result<usize, LeaseError> {
        runtime()?.block_on(self.delete_expired())
    }
}

/// Every sqlx failure on this table is a connectivity or server fault from
/// the caller's point of view; `acquire` conflicts never surface as errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LeaseError {
    match err {
        sqlx::Error::Database(db_err) => {
            LeaseError::Unavailable(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            LeaseError::Unavailable(format!("connection pool closed in {operation}"))
        }
        other => LeaseError::Unavailable(format!("{operation}: {other}")),
    }
}

#[derive(Debug)]
struct LeaseRow {
    source_client: String,
    source_reading_id: i64,
    image_url: String,
    holder_session_id: String,
    nonce: Uuid,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for LeaseRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(LeaseRow {
            source_client: row.try_get("source_client")?,
            source_reading_id: row.try_get("source_reading_id")?,
            image_url: row.try_get("image_url")?,
            holder_session_id: row.try_get("holder_session_id")?,
            nonce: row.try_get("nonce")?,
            acquired_at: row.try_get("acquired_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

impl TryFrom<LeaseRow> for Lease {
    type Error = LeaseError;

    fn try_from(row: LeaseRow) -> Result<Self, Self::Error> {
        let corrupt = |e| LeaseError::Unavailable(format!("corrupt lease row: {e}"));
        Ok(Lease {
            key: LeaseKey::new(
                ClientId::new(row.source_client).map_err(corrupt)?,
                ReadingId::new(row.source_reading_id),
            ),
            image_url: row.image_url,
            holder_session_id: SessionId::new(row.holder_session_id).map_err(corrupt)?,
            nonce: row.nonce,
            acquired_at: row.acquired_at,
            expires_at: row.expires_at,
        })
    }
}

fn decode_lease(row: &sqlx::postgres::PgRow) -> Result<Lease, LeaseError> {
    LeaseRow::from_row(row)
        .map_err(|e| map_sqlx_error("decode_lease", e))?
        .try_into()
}

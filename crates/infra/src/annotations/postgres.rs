//! Postgres-backed annotation repository.
//!
//! Expected table:
//!
//! ```sql
//! CREATE TABLE annotations (
//!     id                 BIGSERIAL   PRIMARY KEY,
//!     source_client      TEXT        NOT NULL,
//!     source_reading_id  BIGINT      NOT NULL,
//!     image_url          TEXT        NOT NULL,
//!     detections         JSONB       NOT NULL,
//!     annotated_by       TEXT        NOT NULL,
//!     annotated_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     UNIQUE (source_client, source_reading_id)
//! );
//! ```
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | RepositoryError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `Duplicate` (with the existing row re-read) |
//! | Database (other) | Any other | `Unavailable` |
//! | PoolClosed / Io / Tls / timeouts | N/A | `Unavailable` |
//! | Decode / ColumnDecode | N/A | `Corrupt` |

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use meterlab_core::annotation::{detections_from_json, detections_to_json};
use meterlab_core::{
    Annotation, AnnotationId, ClientId, LeaseKey, NewAnnotation, ReadingId, UtilityType,
};
use meterlab_scheduler::ClassCounts;

use super::r#trait::{AnnotationRepository, RepositoryError};

#[derive(Debug, Clone)]
pub struct PostgresAnnotationRepository {
    pool: Arc<PgPool>,
}

impl PostgresAnnotationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(
        skip(self, new),
        fields(
            source_client = %new.source_client,
            source_reading_id = %new.source_reading_id,
            detection_count = new.detections.len()
        )
    )]
    pub async fn insert_annotation(&self, new: NewAnnotation) -> Result<Annotation, RepositoryError> {
        let detections =
            detections_to_json(&new.detections).map_err(|e| RepositoryError::Encode(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO annotations (
                source_client,
                source_reading_id,
                image_url,
                detections,
                annotated_by,
                annotated_at
            )
            VALUES ($1, $2, $3, $4, $5, now())
            RETURNING id, annotated_at
            "#,
        )
        .bind(new.source_client.as_str())
        .bind(new.source_reading_id.get())
        .bind(&new.image_url)
        .bind(&detections)
        .bind(&new.annotated_by)
        .fetch_one(&*self.pool)
        .await;

        match result {
            Ok(row) => {
                let id: i64 = row.try_get("id").map_err(|e| map_sqlx_error("insert", e))?;
                let at: DateTime<Utc> = row
                    .try_get("annotated_at")
                    .map_err(|e| map_sqlx_error("insert", e))?;
                Ok(Annotation::from_new(AnnotationId::new(id), new, at))
            }
            Err(e) if is_unique_violation(&e) => {
                // Lost the race: surface whichever row won.
                match self.load(&new.key()).await? {
                    Some(existing) => Err(RepositoryError::Duplicate(Box::new(existing))),
                    None => Err(RepositoryError::Unavailable(format!(
                        "unique violation on {} but no row is visible",
                        new.key()
                    ))),
                }
            }
            Err(e) => Err(map_sqlx_error("insert", e)),
        }
    }

    #[instrument(
        skip(self),
        fields(source_client = %key.source_client, source_reading_id = %key.source_reading_id),
        err
    )]
    pub async fn load(&self, key: &LeaseKey) -> Result<Option<Annotation>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT
                id,
                source_client,
                source_reading_id,
                image_url,
                detections,
                annotated_by,
                annotated_at
            FROM annotations
            WHERE source_client = $1 AND source_reading_id = $2
            "#,
        )
        .bind(key.source_client.as_str())
        .bind(key.source_reading_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        match row {
            Some(row) => {
                let row = AnnotationRow::from_row(&row).map_err(|e| map_sqlx_error("get", e))?;
                Ok(Some(row.try_into()?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(source_client = %client), err)]
    pub async fn load_annotated_ids(
        &self,
        client: &ClientId,
    ) -> Result<HashSet<ReadingId>, RepositoryError> {
        let rows = sqlx::query("SELECT source_reading_id FROM annotations WHERE source_client = $1")
            .bind(client.as_str())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("annotated_ids", e))?;

        let mut ids = HashSet::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row
                .try_get("source_reading_id")
                .map_err(|e| map_sqlx_error("annotated_ids", e))?;
            ids.insert(ReadingId::new(id));
        }
        Ok(ids)
    }

    #[instrument(skip(self), err)]
    pub async fn load_class_counts(&self) -> Result<ClassCounts, RepositoryError> {
        let totals = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_images,
                COUNT(*) FILTER (WHERE jsonb_array_length(detections) = 0) AS no_meter
            FROM annotations
            "#,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("class_counts", e))?;

        let per_class = sqlx::query(
            r#"
            SELECT (d ->> 'class_label')::BIGINT AS class_label, COUNT(*) AS n
            FROM annotations, jsonb_array_elements(detections) AS d
            GROUP BY 1
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("class_counts", e))?;

        let total_images: i64 = totals
            .try_get("total_images")
            .map_err(|e| map_sqlx_error("class_counts", e))?;
        let no_meter: i64 = totals
            .try_get("no_meter")
            .map_err(|e| map_sqlx_error("class_counts", e))?;

        let mut counts = ClassCounts {
            no_meter: no_meter as u64,
            total_images: total_images as u64,
            ..ClassCounts::default()
        };
        for row in per_class {
            let label: Option<i64> = row
                .try_get("class_label")
                .map_err(|e| map_sqlx_error("class_counts", e))?;
            let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("class_counts", e))?;
            let class = label
                .and_then(UtilityType::from_class_label)
                .ok_or_else(|| RepositoryError::Corrupt(format!("unknown class label {label:?}")))?;
            counts.add(class, n as u64);
        }
        Ok(counts)
    }
}

fn runtime() -> Result<tokio::runtime::Handle, RepositoryError> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        RepositoryError::Unavailable(
            "PostgresAnnotationRepository must be called from within a tokio runtime context"
                .to_string(),
        )
    })
}

impl AnnotationRepository for PostgresAnnotationRepository {
    fn insert(&self, new: NewAnnotation) -> Result<Annotation, RepositoryError> {
        runtime()?.block_on(self.insert_annotation(new))
    }

    fn get(&self, key: &LeaseKey) -> Result<Option<Annotation>, RepositoryError> {
        runtime()?.block_on(self.load(key))
    }

    fn annotated_ids(&self, client: &ClientId) -> Result<HashSet<ReadingId>, RepositoryError> {
        runtime()?.block_on(self.load_annotated_ids(client))
    }

    fn class_counts(&self) -> Result<ClassCounts, RepositoryError> {
        runtime()?.block_on(self.load_class_counts())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            RepositoryError::Unavailable(format!("database error in {operation}: {}", db_err.message()))
        }
        decode @ (sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)) => {
            RepositoryError::Corrupt(format!("{operation}: {decode}"))
        }
        sqlx::Error::PoolClosed => {
            RepositoryError::Unavailable(format!("connection pool closed in {operation}"))
        }
        other => RepositoryError::Unavailable(format!("{operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[derive(Debug)]
struct AnnotationRow {
    id: i64,
    source_client: String,
    source_reading_id: i64,
    image_url: String,
    detections: serde_json::Value,
    annotated_by: String,
    annotated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for AnnotationRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(AnnotationRow {
            id: row.try_get("id")?,
            source_client: row.try_get("source_client")?,
            source_reading_id: row.try_get("source_reading_id")?,
            image_url: row.try_get("image_url")?,
            detections: row.try_get("detections")?,
            annotated_by: row.try_get("annotated_by")?,
            annotated_at: row.try_get("annotated_at")?,
        })
    }
}

impl TryFrom<AnnotationRow> for Annotation {
    type Error = RepositoryError;

    fn try_from(row: AnnotationRow) -> Result<Self, Self::Error> {
        Ok(Annotation {
            id: AnnotationId::new(row.id),
            source_client: ClientId::new(row.source_client)
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))?,
            source_reading_id: ReadingId::new(row.source_reading_id),
            image_url: row.image_url,
            detections: detections_from_json(row.detections).map_err(RepositoryError::Corrupt)?,
            annotated_by: row.annotated_by,
            annotated_at: row.annotated_at,
        })
    }
}

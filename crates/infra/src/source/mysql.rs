//! MySQL-backed source client.
//!
//! Each client keeps its readings in its own database with a
//! `meter_readings` table joined to `meter_history` on `meter_no`. Only rows
//! with a usable image file are candidates.

use std::collections::HashSet;
use std::time::Duration;

use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{FromRow, MySql, QueryBuilder, Row};
use tracing::instrument;

use meterlab_core::{ClientDescriptor, ClientId, ReadingHint, ReadingId, UtilityType};

use super::r#trait::{SourceClient, SourceError, SourceReading};

/// Public prefix the image files are served under.
pub const IMAGE_BASE_URL: &str = "https://urbion-mobi.com/image/";

/// Cap on ids sent in the `NOT IN` list. The fetcher filters the rest locally.
pub const MAX_EXCLUDED_IN_QUERY: usize = 10_000;

/// Default number of rows sampled per query.
pub const DEFAULT_SAMPLE_SIZE: u32 = 16;

/// Connection settings shared by every client database on one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDbSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

pub struct MySqlSourceClient {
    id: ClientId,
    database: String,
    pool: MySqlPool,
    sample_size: u32,
}

impl core::fmt::Debug for MySqlSourceClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MySqlSourceClient")
            .field("id", &self.id)
            .field("database", &self.database)
            .field("sample_size", &self.sample_size)
            .finish()
    }
}

impl MySqlSourceClient {
    /// Build a client without connecting. The pool connects on first use.
    pub fn connect_lazy(settings: &SourceDbSettings, descriptor: &ClientDescriptor) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&descriptor.database);

        let pool = MySqlPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy_with(options);

        Self {
            id: descriptor.id.clone(),
            database: descriptor.database.clone(),
            pool,
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }

    #[instrument(
        skip(self, excluded),
        fields(source_client = %self.id, database = %self.database, excluded = excluded.len()),
        err
    )]
    pub async fn fetch_unseen(
        &self,
        utility: UtilityType,
        excluded: &HashSet<ReadingId>,
    ) -> Result<Vec<SourceReading>, SourceError> {
        let mut qb = QueryBuilder::<MySql>::new(
            r#"
            SELECT CAST(mr.id AS SIGNED) AS reading_id,
                   CAST(mr.meter_no AS CHAR) AS meter_no,
                   CAST(mr.reading_new AS DOUBLE) AS reading_new,
                   CAST(mr.reading_old AS DOUBLE) AS reading_old,
                   CONCAT("#,
        );
        qb.push_bind(IMAGE_BASE_URL);
        qb.push(
            r#", mr.site, '/', mr.reading_date, '/', mr.file_name) AS image_url
            FROM meter_readings mr
            LEFT JOIN meter_history mh ON mr.meter_no = mh.meter_no
            WHERE mr.site IS NOT NULL
              AND mr.reading_date IS NOT NULL
              AND mr.file_name IS NOT NULL
              AND mr.file_name != ''
              AND mr.file_name NOT LIKE '%NOFILE%'
              AND mh.utility_type = "#,
        );
        qb.push_bind(utility.as_str());

        if !excluded.is_empty() {
            qb.push(" AND mr.id NOT IN (");
            let mut ids = qb.separated(", ");
            for id in excluded.iter().take(MAX_EXCLUDED_IN_QUERY) {
                ids.push_bind(id.get());
            }
            ids.push_unseparated(")");
        }

        qb.push(" ORDER BY RAND() LIMIT ");
        qb.push_bind(i64::from(self.sample_size));

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(&self.id, e))?;

        let mut readings = Vec::with_capacity(rows.len());
        for row in rows {
            let row = ReadingRow::from_row(&row).map_err(|e| map_sqlx_error(&self.id, e))?;
            readings.push(row.into_reading(utility));
        }
        Ok(readings)
    }
}

impl SourceClient for MySqlSourceClient {
    fn client_id(&self) -> &ClientId {
        &self.id
    }

    fn list_unseen(
        &self,
        utility: UtilityType,
        excluded: &HashSet<ReadingId>,
    ) -> Result<Vec<SourceReading>, SourceError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            SourceError::Unavailable(
                "MySqlSourceClient must be called from within a tokio runtime context".to_string(),
            )
        })?;
        handle.block_on(self.fetch_unseen(utility, excluded))
    }
}

fn map_sqlx_error(client: &ClientId, err: sqlx::Error) -> SourceError {
    match err {
        sqlx::Error::Io(e) => SourceError::Unavailable(format!("{client}: {e}")),
        sqlx::Error::Tls(e) => SourceError::Unavailable(format!("{client}: {e}")),
        sqlx::Error::PoolTimedOut => SourceError::Unavailable(format!("{client}: pool timed out")),
        sqlx::Error::PoolClosed => SourceError::Unavailable(format!("{client}: pool closed")),
        sqlx::Error::Database(db_err) => {
            SourceError::Query(format!("{client}: {}", db_err.message()))
        }
        other => SourceError::Query(format!("{client}: {other}")),
    }
}

#[derive(Debug)]
struct ReadingRow {
    reading_id: i64,
    meter_no: Option<String>,
    reading_new: Option<f64>,
    reading_old: Option<f64>,
    image_url: String,
}

impl<'r> FromRow<'r, MySqlRow> for ReadingRow {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(ReadingRow {
            reading_id: row.try_get("reading_id")?,
            meter_no: row.try_get("meter_no")?,
            reading_new: row.try_get("reading_new")?,
            reading_old: row.try_get("reading_old")?,
            image_url: row.try_get("image_url")?,
        })
    }
}

impl ReadingRow {
    fn into_reading(self, utility: UtilityType) -> SourceReading {
        let hint = if self.meter_no.is_some() || self.reading_new.is_some() || self.reading_old.is_some() {
            Some(ReadingHint {
                meter_no: self.meter_no,
                reading_new: self.reading_new,
                reading_old: self.reading_old,
            })
        } else {
            None
        };
        SourceReading {
            reading_id: ReadingId::new(self.reading_id),
            image_url: self.image_url,
            utility_type: utility,
            hint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_without_reference_values_carry_no_hint() {
        let row = ReadingRow {
            reading_id: 9,
            meter_no: None,
            reading_new: None,
            reading_old: None,
            image_url: format!("{IMAGE_BASE_URL}site/2024-01-02/a.jpg"),
        };
        let reading = row.into_reading(UtilityType::Electricity);
        assert_eq!(reading.reading_id, ReadingId::new(9));
        assert!(reading.hint.is_none());
    }

    #[test]
    fn reference_values_travel_as_hint() {
        let row = ReadingRow {
            reading_id: 10,
            meter_no: Some("E-77".to_string()),
            reading_new: Some(1520.4),
            reading_old: Some(1490.0),
            image_url: "u".to_string(),
        };
        let hint = row.into_reading(UtilityType::ColdWater).hint.unwrap();
        assert_eq!(hint.meter_no.as_deref(), Some("E-77"));
        assert_eq!(hint.reading_new_whole(), Some(1520));
    }
}

use crate::config::DatabaseConfig;
use crate::identifiers::{LongId, ShortId};
use crate::model::{Blob, Upload, UploadKind};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Unique constraint backing short id lookups (see migrations)
const SHORT_ID_CONSTRAINT: &str = "uploads_short_id_key";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("short id {0} is already taken")]
    ShortIdConflict(String),

    #[error("corrupt upload record {long_id}: {reason}")]
    Corrupt { long_id: String, reason: String },

    #[error("metadata store error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for MetadataError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Upload record persistence
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new record. A taken short id yields
    /// [`MetadataError::ShortIdConflict`].
    async fn insert(&self, upload: &Upload) -> Result<(), MetadataError>;

    async fn find_by_short_id(&self, short_id: &str) -> Result<Option<Upload>, MetadataError>;

    async fn find_by_long_id(&self, long_id: &str) -> Result<Option<Upload>, MetadataError>;

    async fn short_id_exists(&self, short_id: &str) -> Result<bool, MetadataError>;

    /// Cheap connectivity check for readiness probes
    async fn ping(&self) -> Result<(), MetadataError>;
}

/// Row shape of the `uploads` table
#[derive(Debug, Clone, FromRow)]
pub struct UploadRow {
    pub long_id: String,
    pub short_id: String,
    pub kind: String,
    pub content_path: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<UploadRow> for Upload {
    type Error = MetadataError;

    fn try_from(row: UploadRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| MetadataError::Corrupt {
            long_id: row.long_id.clone(),
            reason,
        };

        let long_id: LongId = row.long_id.parse().map_err(|e| corrupt(format!("{e}")))?;
        let kind: UploadKind = row.kind.parse().map_err(corrupt)?;
        let size = u64::try_from(row.size_bytes)
            .map_err(|_| corrupt(format!("negative size {}", row.size_bytes)))?;

        Ok(Upload {
            long_id,
            short_id: ShortId::new(row.short_id),
            kind,
            content: Blob {
                path: row.content_path,
                size,
                content_type: row.content_type,
            },
            created_at: row.created_at,
        })
    }
}

/// Metadata store for upload records in PostgreSQL
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<Upload>, MetadataError> {
        let sql = format!(
            r#"
            SELECT long_id, short_id, kind, content_path,
                   content_type, size_bytes, created_at
            FROM uploads
            WHERE {column} = $1
            "#
        );

        let row = sqlx::query_as::<_, UploadRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Upload::try_from).transpose()
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    #[instrument(skip(self, upload), fields(long_id = %upload.long_id, short_id = %upload.short_id))]
    async fn insert(&self, upload: &Upload) -> Result<(), MetadataError> {
        let size_bytes = i64::try_from(upload.content.size)
            .map_err(|_| MetadataError::Backend("upload size exceeds BIGINT".to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO uploads (
                long_id, short_id, kind, content_path,
                content_type, size_bytes, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7
            )
            "#,
        )
        .bind(upload.long_id.as_str())
        .bind(upload.short_id.as_str())
        .bind(upload.kind.as_str())
        .bind(&upload.content.path)
        .bind(&upload.content.content_type)
        .bind(size_bytes)
        .bind(upload.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| classify_insert_error(e, upload.short_id.as_str()))?;

        debug!("Upload record inserted");
        Ok(())
    }

    async fn find_by_short_id(&self, short_id: &str) -> Result<Option<Upload>, MetadataError> {
        self.find_one("short_id", short_id).await
    }

    async fn find_by_long_id(&self, long_id: &str) -> Result<Option<Upload>, MetadataError> {
        self.find_one("long_id", long_id).await
    }

    async fn short_id_exists(&self, short_id: &str) -> Result<bool, MetadataError> {
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM uploads WHERE short_id = $1)")
                .bind(short_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists.0)
    }

    async fn ping(&self) -> Result<(), MetadataError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Separate short id collisions from every other insert failure
fn classify_insert_error(err: sqlx::Error, short_id: &str) -> MetadataError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() && db_err.constraint() == Some(SHORT_ID_CONSTRAINT) {
            return MetadataError::ShortIdConflict(short_id.to_string());
        }
    }
    MetadataError::Backend(err.to_string())
}

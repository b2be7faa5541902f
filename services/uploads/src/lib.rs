//! Upload Service
//!
//! Accepts file uploads over HTTP, stores the bytes in S3 and an index record
//! in PostgreSQL, and hands back a long identifier, a short shareable
//! identifier and a time-limited signed URL. Short identifiers resolve to a
//! freshly signed URL on every request.
//!
//! ## Architecture
//!
//! ```text
//!   POST /api/uploads               GET /u/:short_id
//!          │                               │
//!          ▼                               ▼
//! ┌──────────────────┐           ┌──────────────────┐
//! │ Upload           │           │ Retrieval        │
//! │ Pipeline         │           │ Resolver         │
//! └──────────────────┘           └──────────────────┘
//!    │ 1. blob    │ 2. record        │ lookup   │ sign
//!    ▼            ▼                  ▼          ▼
//! ┌────────┐  ┌──────────┐      ┌──────────┐ ┌────────┐
//! │ S3     │  │ Postgres │      │ Postgres │ │ S3     │
//! └────────┘  └──────────┘      └──────────┘ └────────┘
//!    │
//!    ▼ (optional)
//! ┌──────────────────┐
//! │ Kafka            │
//! │ upload events    │
//! └──────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod identifiers;
pub mod metadata_store;
pub mod model;
pub mod object_store;
pub mod pipeline;
pub mod resolver;
pub mod startup;
pub mod stream_limiter;
pub mod views;

#[cfg(test)]
mod testing;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use error::{ErrorKind, UploadError};
pub use events::{KafkaNotifier, NoopNotifier, UploadNotifier};
pub use identifiers::{LongId, RandomShortIds, ShortId, ShortIdSource};
pub use metadata_store::{MetadataError, MetadataStore, PgMetadataStore};
pub use model::{Blob, SignedUrl, StoredUpload, Upload, UploadKind, UploadResponse};
pub use object_store::{ObjectStore, ObjectStoreError, S3ObjectStore};
pub use pipeline::{PipelineSettings, UploadPipeline};
pub use resolver::RetrievalResolver;

//! Classified failures at the pipeline/resolver boundary.
//!
//! Gateway errors never leave the core as-is: the pipeline and resolver map
//! each one into exactly one [`UploadError`] variant, and every variant
//! belongs to exactly one [`ErrorKind`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Coarse classification used for status mapping and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// User-correctable input problem
    ClientInput,
    /// Network/read hiccup, safe to retry at the caller's discretion
    TransientIo,
    /// Object store rejected the blob write
    StorageWrite,
    /// Metadata store rejected the record write
    MetadataWrite,
    /// No unused short id could be found within the attempt bound
    IdentifierExhaustion,
    /// Absent key
    NotFound,
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("request has no file field named `file`")]
    MissingFile,

    #[error("malformed upload request: {0}")]
    InvalidRequest(String),

    #[error("content exceeds the maximum size of {max_bytes} bytes")]
    ContentTooLarge { max_bytes: u64 },

    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    #[error("failed to store blob for upload {long_id}: {reason}")]
    StorageWrite { long_id: String, reason: String },

    #[error("failed to store metadata for upload {long_id}: {reason}")]
    MetadataWrite { long_id: String, reason: String },

    #[error("no unused short id found after {attempts} attempts")]
    IdentifierExhaustion { attempts: u32 },

    #[error("upload {0} not found")]
    NotFound(String),
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingFile | Self::InvalidRequest(_) | Self::ContentTooLarge { .. } => {
                ErrorKind::ClientInput
            }
            Self::TransientIo(_) => ErrorKind::TransientIo,
            Self::StorageWrite { .. } => ErrorKind::StorageWrite,
            Self::MetadataWrite { .. } => ErrorKind::MetadataWrite,
            Self::IdentifierExhaustion { .. } => ErrorKind::IdentifierExhaustion,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::ClientInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::TransientIo
            | ErrorKind::StorageWrite
            | ErrorKind::MetadataWrite
            | ErrorKind::IdentifierExhaustion => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::MissingFile => "MISSING_FILE",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::ContentTooLarge { .. } => "CONTENT_TOO_LARGE",
            Self::TransientIo(_) => "TRANSIENT_IO",
            Self::StorageWrite { .. } => "STORAGE_WRITE",
            Self::MetadataWrite { .. } => "METADATA_WRITE",
            Self::IdentifierExhaustion { .. } => "IDENTIFIER_EXHAUSTION",
            Self::NotFound(_) => "NOT_FOUND",
        }
    }

    /// Message safe to show to the uploader. Server-side failures are
    /// reported generically; details stay in the logs.
    fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::ClientInput | ErrorKind::NotFound => self.to_string(),
            _ => "Internal Server Error".to_string(),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.public_message(),
            code: self.code().to_string(),
        };

        (status, Json(body)).into_response()
    }
}

use crate::identifiers::{LongId, ShortId};
use crate::object_store::{ObjectStore, ObjectStoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Key prefix for every stored blob
pub const UPLOADS_PREFIX: &str = "uploads";

/// Content classification of an upload
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadKind {
    Image,
    Video,
    Audio,
    /// Anything without a more specific kind
    File,
}

impl UploadKind {
    /// Classify by the top-level type of a declared MIME type
    pub fn from_content_type(content_type: &str) -> Self {
        let essence = content_type
            .split(';')
            .next()
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_default();

        match essence.split('/').next() {
            Some("image") => Self::Image,
            Some("video") => Self::Video,
            Some("audio") => Self::Audio,
            _ => Self::File,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
        }
    }
}

impl fmt::Display for UploadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "file" => Ok(Self::File),
            other => Err(format!("unknown upload kind: {other}")),
        }
    }
}

/// Stored blob descriptor. Holds no URL; signed URLs are derived per read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// Object store key
    pub path: String,
    /// Size in bytes
    pub size: u64,
    /// Content type declared by the uploader
    pub content_type: String,
}

impl Blob {
    /// Object store key for an upload
    pub fn path_for(long_id: &LongId) -> String {
        format!("{}/{}", UPLOADS_PREFIX, long_id)
    }

    /// Mint a fresh signed URL for this blob
    pub async fn signed_url(
        &self,
        store: &dyn ObjectStore,
        ttl: Duration,
    ) -> Result<SignedUrl, ObjectStoreError> {
        store.signed_url(&self.path, ttl).await
    }
}

/// Persisted upload entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub long_id: LongId,
    pub short_id: ShortId,
    pub kind: UploadKind,
    pub content: Blob,
    pub created_at: DateTime<Utc>,
}

/// Time-bounded capability URL for a private object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// An upload together with a URL signed for the current request
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub upload: Upload,
    pub url: SignedUrl,
}

/// JSON body returned by the ingest endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: String,
    #[serde(rename = "shortID")]
    pub short_id: String,
    pub content: UploadContentResponse,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadContentResponse {
    pub url: String,
}

impl From<&StoredUpload> for UploadResponse {
    fn from(stored: &StoredUpload) -> Self {
        Self {
            id: stored.upload.long_id.to_string(),
            short_id: stored.upload.short_id.to_string(),
            content: UploadContentResponse {
                url: stored.url.url.clone(),
            },
        }
    }
}

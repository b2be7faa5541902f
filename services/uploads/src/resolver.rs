use crate::error::UploadError;
use crate::identifiers::ShortId;
use crate::metadata_store::MetadataStore;
use crate::model::StoredUpload;
use crate::object_store::ObjectStore;
use crate::pipeline::within_deadline;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Resolves short ids to uploads with a URL signed for this request only
pub struct RetrievalResolver {
    object_store: Arc<dyn ObjectStore>,
    metadata_store: Arc<dyn MetadataStore>,
    signed_url_ttl: Duration,
    store_timeout: Duration,
}

impl RetrievalResolver {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        metadata_store: Arc<dyn MetadataStore>,
        signed_url_ttl: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            object_store,
            metadata_store,
            signed_url_ttl,
            store_timeout,
        }
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self, short_id: &str) -> Result<StoredUpload, UploadError> {
        // Nothing malformed was ever issued
        if !ShortId::is_well_formed(short_id) {
            debug!("Malformed short id");
            return Err(UploadError::NotFound(short_id.to_string()));
        }

        let found = within_deadline(
            self.store_timeout,
            "metadata lookup",
            self.metadata_store.find_by_short_id(short_id),
        )
        .await
        .map_err(|reason| {
            warn!(error = %reason, "Error reading upload metadata");
            UploadError::TransientIo(reason)
        })?;

        let upload = found.ok_or_else(|| UploadError::NotFound(short_id.to_string()))?;

        let url = within_deadline(
            self.store_timeout,
            "url signing",
            upload
                .content
                .signed_url(self.object_store.as_ref(), self.signed_url_ttl),
        )
        .await
        .map_err(|reason| {
            warn!(long_id = %upload.long_id, error = %reason, "Error signing upload url");
            UploadError::TransientIo(reason)
        })?;

        metrics::counter!("uploads.resolved").increment(1);

        Ok(StoredUpload { upload, url })
    }
}

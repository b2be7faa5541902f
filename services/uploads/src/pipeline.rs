//! Upload ingestion across the object store and the metadata store.
//!
//! Ordering: the blob is written before the metadata record. A failure
//! between the two leaves an orphaned blob, which is invisible to readers and
//! reclaimable by a sweep over blobs without records. A record never points
//! at a missing blob.

use crate::config::{AccessPolicy, Config};
use crate::error::UploadError;
use crate::events::{NoopNotifier, UploadCreatedEvent, UploadNotifier};
use crate::identifiers::{LongId, LongIdGenerator, ShortId, ShortIdSource};
use crate::metadata_store::{MetadataError, MetadataStore};
use crate::model::{Blob, StoredUpload, Upload, UploadKind};
use crate::object_store::ObjectStore;
use crate::stream_limiter::{read_limited, LimitError};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Tunables of the ingest path
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Largest accepted body in bytes (inclusive)
    pub max_content_size: u64,
    pub signed_url_ttl: Duration,
    /// Deadline for each individual store call
    pub store_timeout: Duration,
    pub short_id_max_attempts: u32,
    pub access_policy: AccessPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_content_size: config.uploads.max_content_size_bytes,
            signed_url_ttl: config.signed_url_ttl(),
            store_timeout: config.store_timeout(),
            short_id_max_attempts: config.uploads.short_id_max_attempts.max(1),
            access_policy: config.s3.access_policy,
        }
    }
}

/// Run a store call under `timeout`, flattening failures into a message
pub(crate) async fn within_deadline<T, E, F>(
    timeout: Duration,
    operation: &str,
    call: F,
) -> Result<T, String>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("{operation} timed out after {timeout:?}")),
    }
}

pub struct UploadPipeline {
    object_store: Arc<dyn ObjectStore>,
    metadata_store: Arc<dyn MetadataStore>,
    notifier: Arc<dyn UploadNotifier>,
    long_ids: LongIdGenerator,
    short_ids: Arc<dyn ShortIdSource>,
    settings: PipelineSettings,
}

impl UploadPipeline {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        metadata_store: Arc<dyn MetadataStore>,
        short_ids: Arc<dyn ShortIdSource>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            object_store,
            metadata_store,
            notifier: Arc::new(NoopNotifier),
            long_ids: LongIdGenerator::new(),
            short_ids,
            settings,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn UploadNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Read, validate and persist one upload.
    ///
    /// Either both stores were written and a freshly signed URL is returned,
    /// or the caller gets a classified error and no metadata record exists.
    /// The one exception is an insert that timed out and whose outcome could
    /// not be read back; that is reported as `MetadataWrite`.
    #[instrument(skip(self, body, cancel), fields(content_type = %content_type))]
    pub async fn ingest<S, E>(
        &self,
        body: S,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<StoredUpload, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let bytes = self.read_body(body, cancel).await?;

        let long_id = self.long_ids.next_id();
        let mut attempts = 0;
        let short_id = self.unused_short_id(&mut attempts).await?;

        let content_type = match content_type.trim() {
            "" => DEFAULT_CONTENT_TYPE,
            declared => declared,
        };

        let mut upload = Upload {
            content: Blob {
                path: Blob::path_for(&long_id),
                size: bytes.len() as u64,
                content_type: content_type.to_string(),
            },
            kind: UploadKind::from_content_type(content_type),
            long_id,
            short_id,
            created_at: Utc::now(),
        };

        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        self.store_blob(&upload, bytes).await?;

        if cancel.is_cancelled() {
            warn!(long_id = %upload.long_id, "Upload cancelled after blob write, blob orphaned");
            metrics::counter!("uploads.orphaned_blobs").increment(1);
            metrics::counter!("uploads.failed", "reason" => "cancelled").increment(1);
            return Err(cancelled());
        }

        // Signed before the record exists: a record is only written once a
        // URL can be handed back
        let url = within_deadline(
            self.settings.store_timeout,
            "url signing",
            upload
                .content
                .signed_url(self.object_store.as_ref(), self.settings.signed_url_ttl),
        )
        .await
        .map_err(|reason| {
            error!(long_id = %upload.long_id, error = %reason, "Error signing upload url, blob orphaned");
            metrics::counter!("uploads.orphaned_blobs").increment(1);
            metrics::counter!("uploads.failed", "reason" => "signing").increment(1);
            UploadError::TransientIo(reason)
        })?;

        self.store_record(&mut upload, &mut attempts).await?;

        info!(
            long_id = %upload.long_id,
            short_id = %upload.short_id,
            kind = %upload.kind,
            size_bytes = upload.content.size,
            "Upload stored"
        );
        metrics::counter!("uploads.ingested").increment(1);
        metrics::histogram!("uploads.size_bytes").record(upload.content.size as f64);

        self.notify(&upload).await;

        Ok(StoredUpload { upload, url })
    }

    async fn read_body<S, E>(&self, body: S, cancel: &CancellationToken) -> Result<Bytes, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        read_limited(body, self.settings.max_content_size, cancel)
            .await
            .map_err(|e| match e {
                LimitError::Overflow { limit } => {
                    info!(max_bytes = limit, "Max upload content size exceeded");
                    metrics::counter!("uploads.rejected", "reason" => "too_large").increment(1);
                    UploadError::ContentTooLarge { max_bytes: limit }
                }
                LimitError::Io(reason) => {
                    warn!(error = %reason, "Error receiving upload body");
                    UploadError::TransientIo(reason)
                }
                LimitError::Cancelled => {
                    debug!("Upload body read cancelled");
                    cancelled()
                }
            })
    }

    /// Draw candidates until one is unused, sharing `attempts` with
    /// conflict retries at insert time.
    async fn unused_short_id(&self, attempts: &mut u32) -> Result<ShortId, UploadError> {
        let max_attempts = self.settings.short_id_max_attempts;

        while *attempts < max_attempts {
            *attempts += 1;
            let candidate = self.short_ids.next_short_id();

            let taken = within_deadline(
                self.settings.store_timeout,
                "short id lookup",
                self.metadata_store.short_id_exists(candidate.as_str()),
            )
            .await
            .map_err(UploadError::TransientIo)?;

            if !taken {
                return Ok(candidate);
            }
            debug!(short_id = %candidate, attempt = *attempts, "Short id collision, regenerating");
        }

        error!(
            attempts = max_attempts,
            "Unable to allocate an unused short id; short id space or entropy exhausted"
        );
        metrics::counter!("uploads.failed", "reason" => "identifier_exhaustion").increment(1);
        Err(UploadError::IdentifierExhaustion {
            attempts: max_attempts,
        })
    }

    async fn store_blob(&self, upload: &Upload, bytes: Bytes) -> Result<(), UploadError> {
        within_deadline(
            self.settings.store_timeout,
            "object store write",
            self.object_store.put(
                &upload.content.path,
                bytes,
                &upload.content.content_type,
                self.settings.access_policy,
            ),
        )
        .await
        .map_err(|reason| {
            error!(long_id = %upload.long_id, error = %reason, "Error storing upload blob");
            metrics::counter!("uploads.failed", "reason" => "storage_write").increment(1);
            UploadError::StorageWrite {
                long_id: upload.long_id.to_string(),
                reason,
            }
        })
    }

    /// Insert the record, regenerating the short id when a racing request
    /// claimed it between the existence check and the insert.
    async fn store_record(&self, upload: &mut Upload, attempts: &mut u32) -> Result<(), UploadError> {
        loop {
            let outcome = tokio::time::timeout(
                self.settings.store_timeout,
                self.metadata_store.insert(upload),
            )
            .await;

            let reason = match outcome {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(MetadataError::ShortIdConflict(taken))) => {
                    warn!(long_id = %upload.long_id, short_id = %taken, "Short id claimed concurrently, regenerating");
                    match self.unused_short_id(attempts).await {
                        Ok(fresh) => {
                            upload.short_id = fresh;
                            continue;
                        }
                        Err(err) => return Err(self.orphaned(&upload.long_id, err)),
                    }
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => return self.settle_timed_out_insert(upload).await,
            };

            let err = UploadError::MetadataWrite {
                long_id: upload.long_id.to_string(),
                reason,
            };
            return Err(self.orphaned(&upload.long_id, err));
        }
    }

    /// A timed out insert may still have committed; look before declaring
    /// the blob orphaned.
    async fn settle_timed_out_insert(&self, upload: &Upload) -> Result<(), UploadError> {
        let reason = format!(
            "metadata store write timed out after {:?}",
            self.settings.store_timeout
        );

        let lookup = within_deadline(
            self.settings.store_timeout,
            "metadata lookup",
            self.metadata_store.find_by_long_id(upload.long_id.as_str()),
        )
        .await;

        match lookup {
            Ok(Some(_)) => {
                warn!(long_id = %upload.long_id, "Metadata write timed out but the record was committed");
                Ok(())
            }
            Ok(None) => Err(self.orphaned(
                &upload.long_id,
                UploadError::MetadataWrite {
                    long_id: upload.long_id.to_string(),
                    reason,
                },
            )),
            Err(lookup_error) => {
                error!(
                    long_id = %upload.long_id,
                    error = %reason,
                    lookup_error = %lookup_error,
                    "Metadata write outcome unknown"
                );
                metrics::counter!("uploads.failed", "reason" => "metadata_write").increment(1);
                Err(UploadError::MetadataWrite {
                    long_id: upload.long_id.to_string(),
                    reason,
                })
            }
        }
    }

    /// Record a failure that happened after the blob was written
    fn orphaned(&self, long_id: &LongId, err: UploadError) -> UploadError {
        let err = match err {
            UploadError::TransientIo(reason) => UploadError::MetadataWrite {
                long_id: long_id.to_string(),
                reason,
            },
            other => other,
        };

        error!(
            long_id = %long_id,
            path = %Blob::path_for(long_id),
            error = %err,
            "Error storing upload metadata, blob orphaned"
        );
        metrics::counter!("uploads.orphaned_blobs").increment(1);

        // Exhaustion is counted where it is detected
        if matches!(err, UploadError::MetadataWrite { .. }) {
            metrics::counter!("uploads.failed", "reason" => "metadata_write").increment(1);
        }
        err
    }

    async fn notify(&self, upload: &Upload) {
        let event = UploadCreatedEvent::from_upload(upload);
        if let Err(e) = self.notifier.upload_created(&event).await {
            warn!(long_id = %upload.long_id, error = %e, "Failed to publish upload event");
            metrics::counter!("uploads.events.failed").increment(1);
        }
    }
}

fn cancelled() -> UploadError {
    UploadError::TransientIo("upload cancelled before completion".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::identifiers::RandomShortIds;
    use crate::metadata_store::MockMetadataStore;
    use crate::object_store::MockObjectStore;
    use crate::testing::{
        MemoryMetadataStore, MemoryObjectStore, RecordingNotifier, ScriptedShortIds,
    };
    use futures::{stream, StreamExt};
    use std::collections::HashSet;
    use std::io;
    use tokio_test::{assert_err, assert_ok};

    const MAX: u64 = 10_000;

    fn settings() -> PipelineSettings {
        PipelineSettings {
            max_content_size: MAX,
            signed_url_ttl: Duration::from_secs(900),
            store_timeout: Duration::from_secs(5),
            short_id_max_attempts: 5,
            access_policy: AccessPolicy::Private,
        }
    }

    fn body(len: usize) -> impl Stream<Item = Result<Bytes, io::Error>> {
        let chunks: Vec<_> = vec![0xABu8; len]
            .chunks(1024)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        stream::iter(chunks)
    }

    struct Harness {
        objects: Arc<MemoryObjectStore>,
        records: Arc<MemoryMetadataStore>,
        pipeline: UploadPipeline,
    }

    fn harness_with(objects: MemoryObjectStore, short_ids: Arc<dyn ShortIdSource>) -> Harness {
        harness_from(objects, MemoryMetadataStore::new(), short_ids, settings().store_timeout)
    }

    fn harness_from(
        objects: MemoryObjectStore,
        records: MemoryMetadataStore,
        short_ids: Arc<dyn ShortIdSource>,
        store_timeout: Duration,
    ) -> Harness {
        let objects = Arc::new(objects);
        let records = Arc::new(records);
        let settings = PipelineSettings {
            store_timeout,
            ..settings()
        };
        let pipeline = UploadPipeline::new(objects.clone(), records.clone(), short_ids, settings);
        Harness {
            objects,
            records,
            pipeline,
        }
    }

    fn stalled_records(records: MemoryMetadataStore) -> Harness {
        harness_from(
            MemoryObjectStore::new(),
            records,
            Arc::new(RandomShortIds::new(6)),
            Duration::from_millis(50),
        )
    }

    fn harness() -> Harness {
        harness_with(MemoryObjectStore::new(), Arc::new(RandomShortIds::new(6)))
    }

    #[tokio::test]
    async fn test_successful_ingest_writes_both_stores() {
        let h = harness();
        let cancel = CancellationToken::new();

        let stored = h.pipeline.ingest(body(2048), "image/png", &cancel).await.unwrap();
        let upload = &stored.upload;

        assert_eq!(upload.kind, UploadKind::Image);
        assert_eq!(upload.content.size, 2048);
        assert_eq!(upload.content.path, format!("uploads/{}", upload.long_id));

        let object = h.objects.object(&upload.content.path).unwrap();
        assert_eq!(object.body.len(), 2048);
        assert_eq!(object.content_type, "image/png");
        assert_eq!(object.access, AccessPolicy::Private);

        let record = h
            .records
            .find_by_long_id(upload.long_id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.short_id, upload.short_id);
        assert!(stored.url.url.contains(&upload.content.path));
    }

    #[tokio::test]
    async fn test_oversized_upload_never_reaches_object_store() {
        let h = harness();
        let cancel = CancellationToken::new();

        let err = h
            .pipeline
            .ingest(body(MAX as usize + 1), "image/png", &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ClientInput);
        assert!(matches!(err, UploadError::ContentTooLarge { max_bytes: MAX }));
        assert_eq!(h.objects.put_calls(), 0);
        assert_eq!(h.records.record_count(), 0);
    }

    #[tokio::test]
    async fn test_size_boundary() {
        let h = harness();
        let cancel = CancellationToken::new();

        assert_ok!(h.pipeline.ingest(body(MAX as usize - 1), "image/png", &cancel).await);
        assert_ok!(h.pipeline.ingest(body(MAX as usize), "image/png", &cancel).await);
        assert_err!(h.pipeline.ingest(body(MAX as usize + 1), "image/png", &cancel).await);

        assert_eq!(h.objects.put_calls(), 2);
        assert_eq!(h.records.record_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ingests_get_distinct_short_ids() {
        let h = harness();
        let pipeline = Arc::new(h.pipeline);

        let tasks: Vec<_> = (0..10_000)
            .map(|_| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    let cancel = CancellationToken::new();
                    pipeline.ingest(body(16), "image/gif", &cancel).await
                })
            })
            .collect();

        let mut short_ids = HashSet::new();
        let mut long_ids = HashSet::new();
        for task in futures::future::join_all(tasks).await {
            let stored = task.unwrap().unwrap();
            short_ids.insert(stored.upload.short_id.clone());
            long_ids.insert(stored.upload.long_id.clone());
        }

        assert_eq!(short_ids.len(), 10_000);
        assert_eq!(long_ids.len(), 10_000);
        assert_eq!(h.records.record_count(), 10_000);
    }

    #[tokio::test]
    async fn test_metadata_failure_leaves_no_record() {
        let h = harness();
        h.records.fail_inserts(true);
        let cancel = CancellationToken::new();

        let err = h.pipeline.ingest(body(100), "image/png", &cancel).await.unwrap_err();

        let long_id = match &err {
            UploadError::MetadataWrite { long_id, .. } => long_id.clone(),
            other => panic!("Expected MetadataWrite, got {:?}", other),
        };
        assert_eq!(err.kind(), ErrorKind::MetadataWrite);

        h.records.fail_inserts(false);
        assert!(h.records.find_by_long_id(&long_id).await.unwrap().is_none());
        // The orphaned blob is tolerated
        assert!(h.objects.object(&format!("uploads/{long_id}")).is_some());
    }

    #[tokio::test]
    async fn test_storage_failure_skips_metadata_write() {
        let mut objects = MockObjectStore::new();
        objects.expect_put().times(1).returning(|path, _, _, _| {
            Err(crate::object_store::ObjectStoreError::Put {
                path: path.to_string(),
                reason: "AccessDenied".to_string(),
            })
        });
        objects.expect_signed_url().times(0);

        let mut records = MockMetadataStore::new();
        records.expect_short_id_exists().returning(|_| Ok(false));
        records.expect_insert().times(0);

        let pipeline = UploadPipeline::new(
            Arc::new(objects),
            Arc::new(records),
            Arc::new(RandomShortIds::new(6)),
            settings(),
        );

        let err = pipeline
            .ingest(body(100), "image/png", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StorageWrite);
    }

    #[tokio::test]
    async fn test_object_store_timeout_is_storage_error() {
        let mut h = harness_with(
            MemoryObjectStore::new().with_put_delay(Duration::from_secs(10)),
            Arc::new(RandomShortIds::new(6)),
        );
        h.pipeline.settings.store_timeout = Duration::from_millis(50);

        let err = h
            .pipeline
            .ingest(body(100), "image/png", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StorageWrite);
        assert!(err.to_string().contains("timed out"));
        assert_eq!(h.records.record_count(), 0);
    }

    #[tokio::test]
    async fn test_signing_failure_leaves_no_record() {
        let mut objects = MockObjectStore::new();
        objects.expect_put().times(1).returning(|_, _, _, _| Ok(()));
        objects.expect_signed_url().times(1).returning(|path, _| {
            Err(crate::object_store::ObjectStoreError::Sign {
                path: path.to_string(),
                reason: "credentials expired".to_string(),
            })
        });

        let records = Arc::new(MemoryMetadataStore::new());
        let pipeline = UploadPipeline::new(
            Arc::new(objects),
            records.clone(),
            Arc::new(RandomShortIds::new(6)),
            settings(),
        );

        let err = pipeline
            .ingest(body(100), "image/png", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransientIo);
        assert_eq!(records.record_count(), 0);
    }

    #[tokio::test]
    async fn test_stalled_insert_is_metadata_error() {
        let h = stalled_records(MemoryMetadataStore::new().with_insert_delay(Duration::from_secs(10)));

        let err = h
            .pipeline
            .ingest(body(100), "image/png", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MetadataWrite);
        assert!(err.to_string().contains("timed out"));
        assert_eq!(h.records.record_count(), 0);
        assert_eq!(h.objects.put_calls(), 1);
    }

    #[tokio::test]
    async fn test_timed_out_insert_that_committed_is_success() {
        let h = stalled_records(MemoryMetadataStore::new().with_commit_delay(Duration::from_secs(10)));

        let stored = h
            .pipeline
            .ingest(body(100), "image/png", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(h.records.record_count(), 1);
        let record = h
            .records
            .find_by_long_id(stored.upload.long_id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.short_id, stored.upload.short_id);
    }

    #[tokio::test]
    async fn test_stalled_short_id_lookup_is_transient() {
        let h = stalled_records(MemoryMetadataStore::new().with_read_delay(Duration::from_secs(10)));

        let err = h
            .pipeline
            .ingest(body(100), "image/png", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransientIo);
        assert!(err.to_string().contains("short id lookup timed out"));
        assert_eq!(h.objects.put_calls(), 0);
        assert_eq!(h.records.record_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_blob_write_leaves_no_record() {
        let h = harness_with(
            MemoryObjectStore::new().with_put_delay(Duration::from_millis(100)),
            Arc::new(RandomShortIds::new(6)),
        );
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = h.pipeline.ingest(body(100), "image/png", &cancel).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransientIo);
        assert_eq!(h.objects.put_calls(), 1);
        assert_eq!(h.objects.sign_calls(), 0);
        assert_eq!(h.records.record_count(), 0);
    }

    #[tokio::test]
    async fn test_insert_conflict_regenerates_short_id() {
        let mut records = MockMetadataStore::new();
        records.expect_short_id_exists().returning(|_| Ok(false));

        let mut seq = mockall::Sequence::new();
        records
            .expect_insert()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|u| u.short_id.as_str() == "first")
            .returning(|u| Err(MetadataError::ShortIdConflict(u.short_id.to_string())));
        records
            .expect_insert()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|u| u.short_id.as_str() == "second")
            .returning(|_| Ok(()));

        let objects = Arc::new(MemoryObjectStore::new());
        let pipeline = UploadPipeline::new(
            objects.clone(),
            Arc::new(records),
            Arc::new(ScriptedShortIds::new(&["first", "second"])),
            settings(),
        );

        let stored = pipeline
            .ingest(body(10), "image/png", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stored.upload.short_id.as_str(), "second");
        assert_eq!(objects.put_calls(), 1);
    }

    #[tokio::test]
    async fn test_persistent_collisions_exhaust_identifiers() {
        let h = harness_with(
            MemoryObjectStore::new(),
            Arc::new(ScriptedShortIds::new(&["taken"])),
        );
        let cancel = CancellationToken::new();

        // First upload claims "taken"
        h.pipeline.ingest(body(10), "image/png", &cancel).await.unwrap();

        let err = h.pipeline.ingest(body(10), "image/png", &cancel).await.unwrap_err();

        assert!(matches!(err, UploadError::IdentifierExhaustion { attempts: 5 }));
        assert_eq!(err.kind(), ErrorKind::IdentifierExhaustion);
        assert_eq!(h.objects.put_calls(), 1);
        assert_eq!(h.records.record_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_collision_then_fresh_id() {
        let h = harness_with(
            MemoryObjectStore::new(),
            Arc::new(ScriptedShortIds::new(&["dup", "dup", "dup", "fresh"])),
        );
        let cancel = CancellationToken::new();

        let first = h.pipeline.ingest(body(10), "image/png", &cancel).await.unwrap();
        let second = h.pipeline.ingest(body(10), "image/png", &cancel).await.unwrap();

        assert_eq!(first.upload.short_id.as_str(), "dup");
        assert_eq!(second.upload.short_id.as_str(), "fresh");
    }

    #[tokio::test]
    async fn test_cancelled_upload_writes_nothing() {
        let h = harness();
        let cancel = CancellationToken::new();

        let stalled = stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"partial"))])
            .chain(stream::pending());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = h.pipeline.ingest(stalled, "image/png", &cancel).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransientIo);
        assert_eq!(h.objects.put_calls(), 0);
        assert_eq!(h.records.record_count(), 0);
    }

    #[tokio::test]
    async fn test_read_failure_is_transient() {
        let h = harness();
        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "client went away")),
        ]);

        let err = h
            .pipeline
            .ingest(failing, "image/png", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransientIo);
        assert_eq!(h.objects.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_content_type_defaults_to_octet_stream() {
        let h = harness();

        let stored = h
            .pipeline
            .ingest(body(10), "  ", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stored.upload.kind, UploadKind::File);
        assert_eq!(stored.upload.content.content_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn test_notifier_receives_event_and_failures_are_ignored() {
        let notifier = Arc::new(RecordingNotifier::failing());
        let h = harness();
        let pipeline = h.pipeline.with_notifier(notifier.clone());

        let stored = pipeline
            .ingest(body(10), "video/mp4", &CancellationToken::new())
            .await
            .unwrap();

        let events = notifier.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].long_id, stored.upload.long_id.to_string());
        assert_eq!(events[0].kind, "video");
    }
}

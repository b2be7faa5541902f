//! In-memory gateways for tests.

use crate::config::AccessPolicy;
use crate::events::{EventError, UploadCreatedEvent, UploadNotifier};
use crate::identifiers::{ShortId, ShortIdSource};
use crate::metadata_store::{MetadataError, MetadataStore};
use crate::model::{SignedUrl, Upload};
use crate::object_store::{ObjectStore, ObjectStoreError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
    pub access: AccessPolicy,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    put_calls: AtomicUsize,
    sign_calls: AtomicUsize,
    fail_puts: AtomicBool,
    put_delay: Option<Duration>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = Some(delay);
        self
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn object(&self, path: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(path).cloned()
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        path: &str,
        body: Bytes,
        content_type: &str,
        access: AccessPolicy,
    ) -> Result<(), ObjectStoreError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.put_delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Put {
                path: path.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        self.objects.lock().unwrap().insert(
            path.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
                access,
            },
        );
        Ok(())
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<SignedUrl, ObjectStoreError> {
        let n = self.sign_calls.fetch_add(1, Ordering::SeqCst);

        if !self.objects.lock().unwrap().contains_key(path) {
            return Err(ObjectStoreError::Sign {
                path: path.to_string(),
                reason: "no such object".to_string(),
            });
        }

        Ok(SignedUrl {
            url: format!("https://objects.test/{}?expires={}&sig={}", path, ttl.as_secs(), n),
            expires_at: Utc::now() + chrono::Duration::from_std(ttl).unwrap(),
        })
    }
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    records: Mutex<HashMap<String, Upload>>,
    fail_inserts: AtomicBool,
    fail_reads: AtomicBool,
    insert_delay: Option<Duration>,
    commit_delay: Option<Duration>,
    read_delay: Option<Duration>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stall inserts before anything is written
    pub fn with_insert_delay(mut self, delay: Duration) -> Self {
        self.insert_delay = Some(delay);
        self
    }

    /// Write the record, then stall before acknowledging the insert
    pub fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = Some(delay);
        self
    }

    /// Stall every lookup
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    async fn check_reads(&self) -> Result<(), MetadataError> {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(MetadataError::Backend("injected read failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert(&self, upload: &Upload) -> Result<(), MetadataError> {
        if let Some(delay) = self.insert_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(MetadataError::Backend("injected insert failure".to_string()));
        }

        {
            let mut records = self.records.lock().unwrap();
            if records.values().any(|u| u.short_id == upload.short_id) {
                return Err(MetadataError::ShortIdConflict(upload.short_id.to_string()));
            }
            if records.contains_key(upload.long_id.as_str()) {
                return Err(MetadataError::Backend("duplicate long id".to_string()));
            }
            records.insert(upload.long_id.to_string(), upload.clone());
        }

        if let Some(delay) = self.commit_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn find_by_short_id(&self, short_id: &str) -> Result<Option<Upload>, MetadataError> {
        self.check_reads().await?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|u| u.short_id.as_str() == short_id)
            .cloned())
    }

    async fn find_by_long_id(&self, long_id: &str) -> Result<Option<Upload>, MetadataError> {
        self.check_reads().await?;
        Ok(self.records.lock().unwrap().get(long_id).cloned())
    }

    async fn short_id_exists(&self, short_id: &str) -> Result<bool, MetadataError> {
        self.check_reads().await?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .any(|u| u.short_id.as_str() == short_id))
    }

    async fn ping(&self) -> Result<(), MetadataError> {
        self.check_reads().await
    }
}

/// Hands out a fixed sequence of short ids, repeating the last one
pub struct ScriptedShortIds {
    queue: Mutex<VecDeque<String>>,
    last: Mutex<String>,
}

impl ScriptedShortIds {
    pub fn new(ids: &[&str]) -> Self {
        Self {
            queue: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
            last: Mutex::new(ids.last().map(|s| s.to_string()).unwrap_or_default()),
        }
    }
}

impl ShortIdSource for ScriptedShortIds {
    fn next_short_id(&self) -> ShortId {
        match self.queue.lock().unwrap().pop_front() {
            Some(id) => ShortId::new(id),
            None => ShortId::new(self.last.lock().unwrap().clone()),
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<UploadCreatedEvent>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::SeqCst);
        notifier
    }
}

#[async_trait]
impl UploadNotifier for RecordingNotifier {
    async fn upload_created(&self, event: &UploadCreatedEvent) -> Result<(), EventError> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(EventError::SendError {
                topic: "uploads.created".to_string(),
                message: "broker unavailable".to_string(),
            });
        }
        Ok(())
    }
}

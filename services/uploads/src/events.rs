//! Upload event notifications.
//!
//! Notifications are best effort: the pipeline logs and counts a failed
//! publish but never fails an ingest because of it.

use crate::config::EventsConfig;
use crate::model::Upload;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub const UPLOAD_CREATED: &str = "upload.created";

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Failed to create producer: {0}")]
    CreationError(String),

    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    #[error("Failed to send event to topic {topic}: {message}")]
    SendError { topic: String, message: String },
}

/// Published after an upload is fully stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCreatedEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub long_id: String,
    pub short_id: String,
    pub kind: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl UploadCreatedEvent {
    pub fn from_upload(upload: &Upload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: UPLOAD_CREATED.to_string(),
            long_id: upload.long_id.to_string(),
            short_id: upload.short_id.to_string(),
            kind: upload.kind.to_string(),
            content_type: upload.content.content_type.clone(),
            size_bytes: upload.content.size,
            created_at: upload.created_at,
        }
    }
}

#[async_trait]
pub trait UploadNotifier: Send + Sync {
    async fn upload_created(&self, event: &UploadCreatedEvent) -> Result<(), EventError>;
}

/// Notifier used when events are disabled
pub struct NoopNotifier;

#[async_trait]
impl UploadNotifier for NoopNotifier {
    async fn upload_created(&self, _event: &UploadCreatedEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// Publishes upload events to a Kafka topic, keyed by long id
pub struct KafkaNotifier {
    producer: FutureProducer,
    topic: String,
    delivery_timeout: Duration,
}

impl KafkaNotifier {
    pub fn new(config: &EventsConfig) -> Result<Self, EventError> {
        info!(
            bootstrap_servers = %config.bootstrap_servers,
            topic = %config.topic,
            "Creating Kafka upload event producer"
        );

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("client.id", &config.client_id)
            .set("message.timeout.ms", config.delivery_timeout_ms.to_string())
            .create()
            .map_err(|e| EventError::CreationError(e.to_string()))?;

        Ok(Self {
            producer,
            topic: config.topic.clone(),
            delivery_timeout: config.delivery_timeout(),
        })
    }
}

#[async_trait]
impl UploadNotifier for KafkaNotifier {
    #[instrument(skip(self, event), fields(topic = %self.topic, long_id = %event.long_id))]
    async fn upload_created(&self, event: &UploadCreatedEvent) -> Result<(), EventError> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| EventError::SerializationError(e.to_string()))?;

        let record = FutureRecord::to(&self.topic)
            .key(event.long_id.as_str())
            .payload(&payload)
            .headers(OwnedHeaders::new().insert(Header {
                key: "message-type",
                value: Some(event.event_type.as_str()),
            }));

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.delivery_timeout))
            .await
            .map_err(|(e, _)| EventError::SendError {
                topic: self.topic.clone(),
                message: e.to_string(),
            })?;

        debug!(partition, offset, "Upload event delivered");
        Ok(())
    }
}

impl Drop for KafkaNotifier {
    fn drop(&mut self) {
        info!("Shutting down Kafka upload event producer");
        if let Err(e) = self.producer.flush(Timeout::After(Duration::from_secs(5))) {
            warn!("Failed to flush producer on shutdown: {}", e);
        }
    }
}

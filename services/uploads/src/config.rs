use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the upload service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Upload handling configuration
    #[serde(default)]
    pub uploads: UploadsConfig,
    /// Startup connection retry policy
    #[serde(default)]
    pub startup: StartupConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Upload event notifications (disabled when absent)
    pub events: Option<EventsConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Access policy applied to stored objects
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessPolicy {
    /// Send the `private` canned ACL with every write
    #[default]
    Private,
    /// Send no ACL and rely on the bucket's own policy
    /// (required for buckets with ACLs disabled)
    BucketDefault,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for upload storage
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Signed URL validity in seconds
    #[serde(default = "default_signed_url_ttl_secs")]
    pub signed_url_ttl_secs: u64,
    /// Access policy for stored objects
    #[serde(default)]
    pub access_policy: AccessPolicy,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// Upload ingestion configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadsConfig {
    /// Maximum accepted content size in bytes (inclusive)
    #[serde(default = "default_max_content_size_bytes")]
    pub max_content_size_bytes: u64,
    /// Deadline for every individual object/metadata store call, in seconds
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    /// Random bytes per short id (encoded as unpadded base64url)
    #[serde(default = "default_short_id_bytes")]
    pub short_id_bytes: usize,
    /// Attempts at finding an unused short id before giving up
    #[serde(default = "default_short_id_max_attempts")]
    pub short_id_max_attempts: u32,
}

/// Retry policy for connecting to backing stores at startup
#[derive(Debug, Clone, Deserialize)]
pub struct StartupConfig {
    /// Maximum connection attempts per store
    #[serde(default = "default_startup_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound for a single backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Kafka settings for upload event notifications
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Topic receiving `upload.created` events
    #[serde(default = "default_events_topic")]
    pub topic: String,
    /// Client ID reported to the brokers
    #[serde(default = "default_service_name")]
    pub client_id: String,
    /// Delivery timeout in milliseconds
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
}

// Default value functions
fn default_service_name() -> String {
    "upload-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_signed_url_ttl_secs() -> u64 {
    900 // 15 minutes
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_max_content_size_bytes() -> u64 {
    10_000_000
}

fn default_store_timeout_secs() -> u64 {
    30
}

fn default_short_id_bytes() -> usize {
    6 // 8 characters once encoded
}

fn default_short_id_max_attempts() -> u32 {
    5
}

fn default_startup_max_attempts() -> u32 {
    20
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    20_000
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_events_topic() -> String {
    "uploads.created".to_string()
}

fn default_delivery_timeout_ms() -> u64 {
    5000
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "upload-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/uploads").required(false))
            .add_source(config::File::with_name("/etc/uploads/uploads").required(false))
            // Override with environment variables
            // UPLOADS__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("UPLOADS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get signed URL validity as Duration
    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.s3.signed_url_ttl_secs)
    }

    /// Get the per-call store deadline as Duration
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.uploads.store_timeout_secs)
    }
}

impl StartupConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl EventsConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            max_content_size_bytes: default_max_content_size_bytes(),
            store_timeout_secs: default_store_timeout_secs(),
            short_id_bytes: default_short_id_bytes(),
            short_id_max_attempts: default_short_id_max_attempts(),
        }
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_startup_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}

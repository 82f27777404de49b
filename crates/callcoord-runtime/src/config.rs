use crate::telemetry::LogFormat;
use callcoord_archival::ArchiverConfig;
use callcoord_core::{CoordError, CoordResult, RetryPolicy};
use callcoord_session::DEFAULT_SYNC_FREQUENCY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level coordinator configuration, read from TOML.
///
/// Every field has a default, so an empty file is a valid configuration
/// (in-memory store, archival disabled).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Turn processing and call start.
    #[serde(default)]
    pub session: SessionSettings,
    /// Agent configuration cache.
    #[serde(default)]
    pub cache: CacheSettings,
    /// Durable store backend.
    #[serde(default)]
    pub store: StoreSettings,
    /// Recording archival.
    #[serde(default)]
    pub archival: ArchivalSettings,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// `[session]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Unsynced messages that trigger a periodic flush.
    #[serde(default = "default_sync_frequency")]
    pub sync_frequency: u64,
    /// Past calls loaded as context when a call starts.
    #[serde(default = "default_past_conversation_limit")]
    pub past_conversation_limit: usize,
    /// Serve the built-in default agent when the requested one cannot be used.
    #[serde(default = "default_true")]
    pub fallback_to_default_agent: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            sync_frequency: default_sync_frequency(),
            past_conversation_limit: default_past_conversation_limit(),
            fallback_to_default_agent: true,
        }
    }
}

/// `[cache]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Lifetime of a cached agent config.
    #[serde(default = "default_agent_ttl_secs")]
    pub agent_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            agent_ttl_secs: default_agent_ttl_secs(),
        }
    }
}

impl CacheSettings {
    /// TTL as a duration.
    pub fn agent_ttl(&self) -> Duration {
        Duration::from_secs(self.agent_ttl_secs)
    }
}

/// Where durable records live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process memory; lost on restart.
    #[default]
    Memory,
    /// One JSON document per record under `data_dir`.
    File,
}

/// `[store]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Backend kind.
    #[serde(default)]
    pub backend: StoreBackend,
    /// Root directory of the file backend.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Timeout of each store request.
    #[serde(default = "default_store_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Retries of transient store failures.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            data_dir: default_data_dir(),
            request_timeout_ms: default_store_timeout_ms(),
            retry: RetryPolicy::default(),
        }
    }
}

impl StoreSettings {
    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Where archived recordings live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    /// Process memory.
    #[default]
    Memory,
    /// Encrypted files under `blob_dir`.
    File,
}

/// `[archival]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivalSettings {
    /// Archive recordings when calls end.
    #[serde(default)]
    pub enabled: bool,
    /// Download attempts while the provider reports the recording not ready.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pause between download attempts.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Timeout of each provider request.
    #[serde(default = "default_archival_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Bucket name recorded in archived URLs.
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Prefix of every object key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Provider account for download auth.
    #[serde(default)]
    pub account_sid: Option<String>,
    /// Provider secret for download auth.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Local copy of downloads, deleted after `spool_retention_secs`.
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,
    /// Retention of spooled downloads.
    #[serde(default = "default_spool_retention_secs")]
    pub spool_retention_secs: u64,
    /// Lifetime of presigned read URLs.
    #[serde(default = "default_presign_ttl_secs")]
    pub presign_ttl_secs: u64,
    /// Public prefix presigned URLs are issued under.
    #[serde(default = "default_presign_base_url")]
    pub presign_base_url: String,
    /// HMAC secret for presigned URLs. A random one is used when unset.
    #[serde(default)]
    pub presign_secret: Option<String>,
    /// Blob backend kind.
    #[serde(default)]
    pub blob_backend: BlobBackend,
    /// Root directory of the file blob backend.
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,
    /// Base64 AES-256 key for the file blob backend.
    #[serde(default)]
    pub encryption_key: Option<String>,
}

impl Default for ArchivalSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            request_timeout_secs: default_archival_timeout_secs(),
            bucket: default_bucket(),
            key_prefix: default_key_prefix(),
            account_sid: None,
            auth_token: None,
            spool_dir: None,
            spool_retention_secs: default_spool_retention_secs(),
            presign_ttl_secs: default_presign_ttl_secs(),
            presign_base_url: default_presign_base_url(),
            presign_secret: None,
            blob_backend: BlobBackend::default(),
            blob_dir: default_blob_dir(),
            encryption_key: None,
        }
    }
}

impl ArchivalSettings {
    /// Settings for the archiver itself.
    pub fn archiver_config(&self) -> ArchiverConfig {
        ArchiverConfig {
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            key_prefix: self.key_prefix.clone(),
            account_sid: self.account_sid.clone(),
            auth_token: self.auth_token.clone(),
            spool_dir: self.spool_dir.clone(),
            spool_retention: Duration::from_secs(self.spool_retention_secs),
            presign_ttl: Duration::from_secs(self.presign_ttl_secs),
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

fn default_sync_frequency() -> u64 {
    DEFAULT_SYNC_FREQUENCY
}
fn default_past_conversation_limit() -> usize {
    5
}
fn default_true() -> bool {
    true
}
fn default_agent_ttl_secs() -> u64 {
    300
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_store_timeout_ms() -> u64 {
    5_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    5
}
fn default_archival_timeout_secs() -> u64 {
    30
}
fn default_bucket() -> String {
    "call-recordings".to_string()
}
fn default_key_prefix() -> String {
    "recordings/".to_string()
}
fn default_spool_retention_secs() -> u64 {
    300
}
fn default_presign_ttl_secs() -> u64 {
    3600
}
fn default_presign_base_url() -> String {
    "https://recordings.localhost/".to_string()
}
fn default_blob_dir() -> PathBuf {
    PathBuf::from("./data/blobs")
}

impl CoordinatorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> CoordResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| CoordError::Config(format!("invalid coordinator config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub async fn load(path: &Path) -> CoordResult<Self> {
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            CoordError::Config(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&source)
    }

    /// Reject settings the coordinator cannot run with.
    pub fn validate(&self) -> CoordResult<()> {
        if self.session.sync_frequency == 0 {
            return Err(CoordError::Config("session.sync_frequency must be at least 1".into()));
        }
        if self.cache.agent_ttl_secs == 0 {
            return Err(CoordError::Config("cache.agent_ttl_secs must be positive".into()));
        }
        if self.store.request_timeout_ms == 0 {
            return Err(CoordError::Config("store.request_timeout_ms must be positive".into()));
        }
        let archival = &self.archival;
        if archival.enabled {
            if archival.max_attempts == 0 {
                return Err(CoordError::Config("archival.max_attempts must be at least 1".into()));
            }
            if archival.request_timeout_secs == 0 {
                return Err(CoordError::Config(
                    "archival.request_timeout_secs must be positive".into(),
                ));
            }
            if archival.bucket.trim().is_empty() {
                return Err(CoordError::Config("archival.bucket is empty".into()));
            }
            if archival.blob_backend == BlobBackend::File && archival.encryption_key.is_none() {
                return Err(CoordError::Config(
                    "archival.encryption_key is required for the file blob backend".into(),
                ));
            }
        }
        Ok(())
    }
}

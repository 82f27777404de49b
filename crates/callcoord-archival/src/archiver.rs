use crate::blob::{BlobStore, PutObject, ServerSideEncryption};
use crate::cleanup::DeferredCleanup;
use callcoord_core::{CoordError, CoordResult};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Settings for [`RecordingArchiver`].
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    /// Download attempts before giving up on a recording that is not ready.
    pub max_attempts: u32,
    /// Pause between download attempts.
    pub retry_delay: Duration,
    /// Timeout for each provider request.
    pub request_timeout: Duration,
    /// Prefix of every object key.
    pub key_prefix: String,
    /// Provider account used for basic auth on downloads.
    pub account_sid: Option<String>,
    /// Provider secret paired with `account_sid`.
    pub auth_token: Option<String>,
    /// Local copy of each downloaded recording, if set.
    pub spool_dir: Option<PathBuf>,
    /// How long a spooled copy is kept.
    pub spool_retention: Duration,
    /// Lifetime of presigned read URLs.
    pub presign_ttl: Duration,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            key_prefix: "recordings/".into(),
            account_sid: None,
            auth_token: None,
            spool_dir: None,
            spool_retention: Duration::from_secs(300),
            presign_ttl: Duration::from_secs(3600),
        }
    }
}

/// Why a single download attempt failed.
#[derive(Debug)]
pub enum DownloadError {
    /// The provider has not finished processing the recording.
    NotReady,
    /// Anything else. Not retried.
    Failed(CoordError),
}

impl From<CoordError> for DownloadError {
    fn from(err: CoordError) -> Self {
        DownloadError::Failed(err)
    }
}

/// Moves call recordings from the telephony provider into a [`BlobStore`].
pub struct RecordingArchiver {
    client: reqwest::Client,
    blobs: Arc<dyn BlobStore>,
    config: ArchiverConfig,
    cleanup: DeferredCleanup,
}

impl RecordingArchiver {
    /// Build an archiver writing to `blobs`.
    pub fn new(config: ArchiverConfig, blobs: Arc<dyn BlobStore>) -> CoordResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CoordError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            blobs,
            config,
            cleanup: DeferredCleanup::new(),
        })
    }

    /// The blob store recordings are written to.
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Settings in effect.
    pub fn config(&self) -> &ArchiverConfig {
        &self.config
    }

    /// Object key for a call's recording.
    pub fn object_key(&self, call_id: &str) -> String {
        format!("{}{}.mp3", self.config.key_prefix, call_id)
    }

    /// Fetch the recording once.
    pub async fn download(&self, recording_url: &str) -> Result<Vec<u8>, DownloadError> {
        let url = if recording_url.ends_with(".mp3") {
            recording_url.to_string()
        } else {
            format!("{recording_url}.mp3")
        };

        let mut request = self.client.get(&url);
        if let Some(sid) = &self.config.account_sid {
            request = request.basic_auth(sid, self.config.auth_token.as_deref());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CoordError::Timeout(format!("recording download {url}"))
            } else {
                CoordError::Http(format!("recording download {url}: {e}"))
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DownloadError::NotReady);
        }
        if !status.is_success() {
            return Err(CoordError::Http(format!("recording download {url}: HTTP {status}")).into());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CoordError::Http(format!("recording body {url}: {e}")))?;
        Ok(body.to_vec())
    }

    /// Store `audio` under the call's key and return its canonical URL.
    pub async fn upload(&self, call_id: &str, audio: Vec<u8>) -> CoordResult<String> {
        let key = self.object_key(call_id);
        let metadata = BTreeMap::from([
            ("call_id".to_string(), call_id.to_string()),
            ("uploaded_at".to_string(), Utc::now().to_rfc3339()),
            ("sha256".to_string(), hex::encode(Sha256::digest(&audio))),
        ]);
        let size = audio.len();
        self.blobs
            .put_object(PutObject {
                key: key.clone(),
                body: audio,
                content_type: "audio/mpeg".into(),
                encryption: ServerSideEncryption::Aes256,
                metadata,
            })
            .await?;
        info!(call_id, key = %key, bytes = size, "Recording uploaded");
        Ok(self.blobs.object_url(&key))
    }

    /// Download and store a call recording.
    ///
    /// A 404 from the provider means the recording is still being
    /// processed; the download is retried up to `max_attempts` times with
    /// `retry_delay` between attempts. Returns `None` on any failure.
    pub async fn archive(&self, recording_url: &str, call_id: &str) -> Option<String> {
        let attempts = self.config.max_attempts.max(1);
        let mut audio = None;
        for attempt in 1..=attempts {
            match self.download(recording_url).await {
                Ok(bytes) => {
                    debug!(call_id, attempt, bytes = bytes.len(), "Recording downloaded");
                    audio = Some(bytes);
                    break;
                }
                Err(DownloadError::NotReady) if attempt < attempts => {
                    warn!(call_id, attempt, "Recording not ready, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(DownloadError::NotReady) => {
                    let err = CoordError::Archival(format!(
                        "recording for {call_id} not ready after {attempts} attempts"
                    ));
                    error!(call_id, error = %err, "Recording never became ready");
                    return None;
                }
                Err(DownloadError::Failed(e)) => {
                    error!(call_id, error = %e, "Recording download failed");
                    return None;
                }
            }
        }
        let audio = audio?;

        if let Err(e) = self.spool(call_id, &audio).await {
            warn!(call_id, error = %e, "Failed to spool recording");
        }

        match self.upload(call_id, audio).await {
            Ok(url) => Some(url),
            Err(e) => {
                error!(call_id, error = %e, "Recording upload failed");
                None
            }
        }
    }

    async fn spool(&self, call_id: &str, audio: &[u8]) -> CoordResult<()> {
        let Some(dir) = &self.config.spool_dir else {
            return Ok(());
        };
        let name: String = call_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{name}.mp3"));
        tokio::fs::write(&path, audio).await?;
        self.cleanup.schedule(path, self.config.spool_retention);
        Ok(())
    }

    /// Expiring read URL for a call's archived recording.
    pub fn presigned_url(&self, call_id: &str) -> CoordResult<String> {
        self.blobs
            .presigned_url(&self.object_key(call_id), self.config.presign_ttl)
    }

    /// Spooled-file cleanup owned by this archiver.
    pub fn cleanup(&self) -> &DeferredCleanup {
        &self.cleanup
    }

    /// Delete every spooled file now.
    pub async fn shutdown(&self) {
        self.cleanup.shutdown().await;
    }
}

use crate::blob::{BlobStore, PutObject, ServerSideEncryption, StoredObject};
use crate::presign::Presigner;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::Engine;
use callcoord_core::{CoordError, CoordResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

const NONCE_LEN: usize = 12;

/// Decode a base64 AES-256 key.
pub fn decode_key(encoded: &str) -> CoordResult<[u8; 32]> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| CoordError::Config(format!("encryption key is not base64: {e}")))?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
        CoordError::Config(format!(
            "encryption key must be 32 bytes, got {}",
            bytes.len()
        ))
    })
}

#[derive(Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    encryption: ServerSideEncryption,
    metadata: BTreeMap<String, String>,
}

/// Filesystem blob store: `{root}/{bucket}/{key}` plus a `.meta.json` sidecar.
///
/// Objects written with [`ServerSideEncryption::Aes256`] are stored as
/// `nonce || ciphertext` under AES-256-GCM.
pub struct FileBlobStore {
    root: PathBuf,
    bucket: String,
    cipher: Aes256Gcm,
    presigner: Presigner,
}

impl FileBlobStore {
    /// Open (creating if needed) the bucket directory under `root`.
    pub async fn new(
        root: PathBuf,
        bucket: impl Into<String>,
        key: &[u8; 32],
        presigner: Presigner,
    ) -> CoordResult<Self> {
        let bucket = bucket.into();
        tokio::fs::create_dir_all(root.join(&bucket)).await?;
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CoordError::Config(format!("invalid encryption key: {e}")))?;
        Ok(Self {
            root,
            bucket,
            cipher,
            presigner,
        })
    }

    fn object_path(&self, key: &str) -> CoordResult<PathBuf> {
        let relative = Path::new(key);
        let clean = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(CoordError::Archival(format!("invalid object key {key:?}")));
        }
        Ok(self.root.join(&self.bucket).join(relative))
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".meta.json");
        PathBuf::from(name)
    }

    fn encrypt(&self, plaintext: &[u8]) -> CoordResult<Vec<u8>> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| CoordError::Archival(format!("encryption failed: {e}")))?;
        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(combined)
    }

    fn decrypt(&self, stored: &[u8]) -> CoordResult<Vec<u8>> {
        if stored.len() <= NONCE_LEN {
            return Err(CoordError::Archival("encrypted object too short".into()));
        }
        let (nonce, ciphertext) = stored.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CoordError::Archival(format!("decryption failed: {e}")))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, request: PutObject) -> CoordResult<()> {
        let path = self.object_path(&request.key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = match request.encryption {
            ServerSideEncryption::Aes256 => self.encrypt(&request.body)?,
            ServerSideEncryption::None => request.body,
        };
        let sidecar = Sidecar {
            content_type: request.content_type,
            encryption: request.encryption,
            metadata: request.metadata,
        };

        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::write(Self::sidecar_path(&path), serde_json::to_vec_pretty(&sidecar)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> CoordResult<Option<StoredObject>> {
        let path = self.object_path(key)?;
        let stored = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let sidecar: Sidecar =
            serde_json::from_slice(&tokio::fs::read(Self::sidecar_path(&path)).await?)?;
        let body = match sidecar.encryption {
            ServerSideEncryption::Aes256 => self.decrypt(&stored)?,
            ServerSideEncryption::None => stored,
        };
        Ok(Some(StoredObject {
            body,
            content_type: sidecar.content_type,
            encryption: sidecar.encryption,
            metadata: sidecar.metadata,
        }))
    }

    fn presigned_url(&self, key: &str, expires_in: Duration) -> CoordResult<String> {
        self.object_path(key)?;
        self.presigner.sign(&self.bucket, key, expires_in)
    }
}

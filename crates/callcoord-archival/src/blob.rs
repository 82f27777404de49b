use crate::presign::Presigner;
use async_trait::async_trait;
use callcoord_core::CoordResult;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Server-side encryption applied to a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerSideEncryption {
    /// Stored as given.
    #[serde(rename = "none")]
    None,
    /// AES-256 at rest.
    #[serde(rename = "AES256")]
    Aes256,
}

impl ServerSideEncryption {
    /// Wire name, as blob stores report it.
    pub fn as_str(self) -> &'static str {
        match self {
            ServerSideEncryption::None => "none",
            ServerSideEncryption::Aes256 => "AES256",
        }
    }
}

/// A write request for one object.
#[derive(Debug, Clone, PartialEq)]
pub struct PutObject {
    /// Object key within the bucket.
    pub key: String,
    /// Object bytes.
    pub body: Vec<u8>,
    /// MIME type.
    pub content_type: String,
    /// Encryption at rest.
    pub encryption: ServerSideEncryption,
    /// User metadata.
    pub metadata: BTreeMap<String, String>,
}

/// An object as read back from a blob store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    /// Object bytes, decrypted.
    pub body: Vec<u8>,
    /// MIME type.
    pub content_type: String,
    /// Encryption at rest.
    pub encryption: ServerSideEncryption,
    /// User metadata.
    pub metadata: BTreeMap<String, String>,
}

/// Durable object storage for archived recordings.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Bucket objects are written to.
    fn bucket(&self) -> &str;

    /// Store an object, replacing any object with the same key.
    async fn put_object(&self, request: PutObject) -> CoordResult<()>;

    /// Read an object back.
    async fn get_object(&self, key: &str) -> CoordResult<Option<StoredObject>>;

    /// An expiring read URL for `key`.
    fn presigned_url(&self, key: &str, expires_in: Duration) -> CoordResult<String>;

    /// Canonical location of `key`, recorded on the call record.
    fn object_url(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket(), key)
    }
}

/// Blob store held in process memory.
pub struct InMemoryBlobStore {
    bucket: String,
    presigner: Presigner,
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl InMemoryBlobStore {
    /// An empty bucket whose read URLs are signed by `presigner`.
    pub fn new(bucket: impl Into<String>, presigner: Presigner) -> Self {
        Self {
            bucket: bucket.into(),
            presigner,
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether the bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, request: PutObject) -> CoordResult<()> {
        let object = StoredObject {
            body: request.body,
            content_type: request.content_type,
            encryption: request.encryption,
            metadata: request.metadata,
        };
        self.objects.write().insert(request.key, object);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> CoordResult<Option<StoredObject>> {
        Ok(self.objects.read().get(key).cloned())
    }

    fn presigned_url(&self, key: &str, expires_in: Duration) -> CoordResult<String> {
        self.presigner.sign(&self.bucket, key, expires_in)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_and_urls() {
        let presigner = Presigner::new(b"k".to_vec(), "https://blobs.local/").unwrap();
        let store = InMemoryBlobStore::new("recordings-bucket", presigner.clone());
        store
            .put_object(PutObject {
                key: "recordings/CA1.mp3".into(),
                body: vec![1, 2, 3],
                content_type: "audio/mpeg".into(),
                encryption: ServerSideEncryption::Aes256,
                metadata: BTreeMap::from([("call_id".to_string(), "CA1".to_string())]),
            })
            .await
            .unwrap();

        let got = store.get_object("recordings/CA1.mp3").await.unwrap().unwrap();
        assert_eq!(got.body, vec![1, 2, 3]);
        assert_eq!(got.metadata["call_id"], "CA1");
        assert!(store.get_object("recordings/CA2.mp3").await.unwrap().is_none());

        assert_eq!(
            store.object_url("recordings/CA1.mp3"),
            "s3://recordings-bucket/recordings/CA1.mp3"
        );
        let url = store
            .presigned_url("recordings/CA1.mp3", Duration::from_secs(3600))
            .unwrap();
        assert_eq!(
            presigner.verify(&url).unwrap(),
            ("recordings-bucket".to_string(), "recordings/CA1.mp3".to_string())
        );
    }
}

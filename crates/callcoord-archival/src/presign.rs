use callcoord_core::{CoordError, CoordResult};
use chrono::Utc;
use hmac::Mac;
use sha2::Sha256;
use std::time::Duration;
use url::Url;

type HmacSha256 = hmac::Hmac<Sha256>;

/// Issues and checks expiring read URLs of the form
/// `{base}/{bucket}/{key}?expires={unix}&signature={hex}`.
#[derive(Clone)]
pub struct Presigner {
    secret: Vec<u8>,
    base: Url,
}

impl Presigner {
    /// `base_url` is the public prefix objects are served under.
    pub fn new(secret: impl Into<Vec<u8>>, base_url: &str) -> CoordResult<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| CoordError::Config(format!("invalid presign base url {base_url}: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            secret: secret.into(),
            base,
        })
    }

    fn signature(&self, bucket: &str, key: &str, expires: i64) -> CoordResult<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .map_err(|e| CoordError::Archival(format!("presign key rejected: {e}")))?;
        mac.update(format!("GET\n{bucket}/{key}\n{expires}").as_bytes());
        Ok(mac)
    }

    /// A URL granting read access to `bucket/key` for `expires_in`.
    pub fn sign(&self, bucket: &str, key: &str, expires_in: Duration) -> CoordResult<String> {
        let expires = Utc::now().timestamp() + expires_in.as_secs() as i64;
        let signature = hex::encode(self.signature(bucket, key, expires)?.finalize().into_bytes());
        let mut url = self
            .base
            .join(&format!("{bucket}/{key}"))
            .map_err(|e| CoordError::Archival(format!("cannot build url for {key}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &signature);
        Ok(url.into())
    }

    /// Check a presigned URL and return the `(bucket, key)` it grants.
    pub fn verify(&self, presigned: &str) -> CoordResult<(String, String)> {
        let url = Url::parse(presigned)
            .map_err(|e| CoordError::Archival(format!("malformed presigned url: {e}")))?;
        let path = url
            .path()
            .strip_prefix(self.base.path())
            .ok_or_else(|| CoordError::Archival("presigned url has a foreign prefix".into()))?;
        let (bucket, key) = path
            .split_once('/')
            .ok_or_else(|| CoordError::Archival("presigned url has no object key".into()))?;

        let mut expires = None;
        let mut signature = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "expires" => expires = value.parse::<i64>().ok(),
                "signature" => signature = hex::decode(value.as_bytes()).ok(),
                _ => {}
            }
        }
        let expires =
            expires.ok_or_else(|| CoordError::Archival("presigned url has no expiry".into()))?;
        let signature = signature
            .ok_or_else(|| CoordError::Archival("presigned url has no signature".into()))?;

        self.signature(bucket, key, expires)?
            .verify_slice(&signature)
            .map_err(|_| CoordError::Archival("presigned url signature mismatch".into()))?;
        if Utc::now().timestamp() > expires {
            return Err(CoordError::Archival("presigned url expired".into()));
        }
        Ok((bucket.to_string(), key.to_string()))
    }
}

//! Recording archival for the call session coordinator.
//!
//! When a call ends, [`RecordingArchiver`] pulls the whole-call recording from
//! the telephony provider (the provider answers 404 until the recording is
//! ready, so downloads are retried a bounded number of times) and stores it in
//! a [`BlobStore`] under a key derived from the call id. Archival never fails
//! the call: every error ends in a log line and `None`.
//!
//! Blob backends:
//! - [`InMemoryBlobStore`]: tests and single-process deployments.
//! - [`FileBlobStore`]: filesystem layout with AES-256-GCM at rest.
//!
//! Both hand out HMAC-signed, expiring read URLs through a [`Presigner`].

pub mod archiver;
pub mod blob;
pub mod cleanup;
pub mod file;
pub mod presign;

pub use archiver::{ArchiverConfig, DownloadError, RecordingArchiver};
pub use blob::{BlobStore, InMemoryBlobStore, PutObject, ServerSideEncryption, StoredObject};
pub use cleanup::{CleanupHandle, DeferredCleanup};
pub use file::{decode_key, FileBlobStore};
pub use presign::Presigner;

//! Upload of captured measurements to a Cyface collector.
//!
//! This crate moves finished measurements from the local store to the
//! collector server: it encodes them in the compressed `.cyf` format, sends
//! them as multipart uploads with a bearer token and records the outcome.
//!
//! # Features
//!
//! - **Binary format**: zlib-compressed big-endian track encoding
//! - **Authentication**: static tokens or a username/password login, re-login on 401
//! - **Retries**: transient transport failures are retried with backoff
//! - **Event driven**: synchronizes automatically when a capture session stops
//! - **Network policy**: automatic passes can be restricted to unmetered connections
//! - **Cancellation**: deactivating aborts in-flight uploads without committing them
//!
//! # Example
//!
//! ```no_run
//! use cyface_core::PersistenceLayer;
//! use cyface_sync::{SyncConfig, Synchronizer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::load_validated("sync.toml")?;
//!     let persistence = PersistenceLayer::open("measurements.db")?;
//!
//!     let synchronizer = Synchronizer::builder(config, persistence).build()?;
//!     let report = synchronizer.force_sync().await?;
//!     println!("{} measurements synchronized", report.synchronized.len());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod metadata;
pub mod mock;
pub mod network;
pub mod retry;
pub mod serializer;
pub mod synchronizer;
pub mod uploader;

pub use auth::{
    Authenticator, CredentialsAuthenticator, StaticTokenAuthenticator, Token,
    UnconfiguredAuthenticator,
};
pub use config::{AfterSync, AuthConfig, DeviceMetadata, SyncConfig};
pub use error::{AuthError, Result, SerializationError, SyncError};
pub use metadata::UploadMetadata;
pub use mock::{MockAuthenticator, MockNetwork, MockOutcome, MockUploader, RecordedUpload};
pub use network::{AlwaysUnmetered, NetworkMonitor};
pub use retry::{RetryConfig, with_retry};
pub use serializer::{DecodedPayload, FORMAT_VERSION, deserialize, serialize};
pub use synchronizer::{SyncReport, Synchronizer, SynchronizerBuilder};
pub use uploader::{HttpUploader, UploadRequest, UploadResponse, Uploader};

//! Error types for cyface-sync.
//!
//! # Error Recovery Strategies
//!
//! Every error leaves the affected measurement unsynchronized, so it is
//! picked up again by the next sync pass.
//!
//! | Error Type | Retried automatically | Notes |
//! |------------|-----------------------|-------|
//! | [`SyncError::Transport`] | Yes, with backoff | Connection reset, DNS, timeouts |
//! | [`SyncError::Auth`] with [`AuthError::Network`] | Yes, with backoff | Login endpoint unreachable |
//! | [`SyncError::Auth`] with [`AuthError::Rejected`] | No | Credentials are wrong |
//! | [`SyncError::NotAuthenticated`] | No | Token refused even after re-login |
//! | [`SyncError::UnexpectedStatus`] | No | Left to the next sync window |
//! | [`SyncError::Serialization`] | No | The measurement cannot be encoded |
//! | [`SyncError::Cancelled`] | No | Equivalent to a failed attempt |

use thiserror::Error;

use cyface_types::MeasurementId;

/// Boxed transport failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors while obtaining a bearer token.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The collector answered the login with a non-2xx status.
    #[error("Authentication rejected with status {status}")]
    Rejected { status: u16 },

    /// The login request did not complete.
    #[error("Authentication request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The login succeeded but carried no token.
    #[error("Login response did not contain a token")]
    MissingToken,

    /// No authentication method is configured.
    #[error("No authentication method configured")]
    NotConfigured,
}

/// Errors while encoding a measurement for upload.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SerializationError {
    /// A measurement without locations has nothing to upload.
    #[error("Measurement {0} has no geo-locations")]
    NoLocations(MeasurementId),

    /// More points than the format can count.
    #[error("Too many points for one upload: {0}")]
    TooManyPoints(usize),

    /// The accuracy cannot be expressed in centimetres.
    #[error("Invalid accuracy: {0}")]
    InvalidAccuracy(f64),

    /// Compression or decompression failed.
    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// The payload was written by an unknown format version.
    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u16),

    /// The payload ended before all announced points were read.
    #[error("Payload is truncated")]
    Truncated,
}

/// Errors that can occur while synchronizing.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// The collector refused the bearer token after a fresh login.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Obtaining a token failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The upload request did not complete.
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// The collector answered with a status other than 201 or 409.
    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// The measurement could not be encoded.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    /// Loading or updating the measurement failed.
    #[error(transparent)]
    Core(#[from] cyface_core::Error),

    /// Only finished measurements are uploaded.
    #[error("Measurement {0} is still being captured")]
    MeasurementNotFinished(MeasurementId),

    /// The synchronizer was deactivated while the upload was in flight.
    #[error("Synchronization cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Wrap a transport failure.
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SyncError::Transport(Box::new(error))
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_) | SyncError::Auth(AuthError::Network(_))
        )
    }
}

/// Result type alias using cyface-sync's Error type.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(SyncError::transport(io).is_transient());
        assert!(
            !SyncError::UnexpectedStatus {
                status: 500,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!SyncError::Auth(AuthError::Rejected { status: 401 }).is_transient());
        assert!(!SyncError::Cancelled.is_transient());
    }

    #[test]
    fn test_error_display() {
        let error = SyncError::UnexpectedStatus {
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(error.to_string(), "Unexpected status 500: boom");

        let error: SyncError = SerializationError::NoLocations(3).into();
        assert_eq!(
            error.to_string(),
            "Serialization failed: Measurement 3 has no geo-locations"
        );
    }
}

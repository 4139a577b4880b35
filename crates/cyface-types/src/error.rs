//! Error types for data parsing in cyface-types.

use thiserror::Error;

/// Errors that can occur when parsing stored or transmitted measurement data.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Unknown transport mode identifier.
    #[error("Unknown modality: {0}")]
    UnknownModality(String),

    /// Unknown measurement status identifier.
    #[error("Unknown measurement status: {0}")]
    UnknownStatus(String),

    /// Failed to parse data due to malformed input.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using cyface-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

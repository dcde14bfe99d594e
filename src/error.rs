//! Unified error handling for the track-atlas library.
//!
//! This module provides a consistent error type for all track-atlas
//! operations. Geometric queries (hit-testing, projection) deliberately do
//! not use it: they fail closed with `Option`/`bool` so a track with missing
//! geometry degrades to "no hit" instead of an error.

use std::fmt;

/// Unified error type for track-atlas operations.
#[derive(Debug, Clone)]
pub enum AtlasError {
    /// A track's encoded polyline could not be decoded
    DecodeError { track_id: u64, message: String },
    /// Authentication failed or a token could not be refreshed
    AuthError { message: String },
    /// HTTP/API error
    HttpError {
        message: String,
        status_code: Option<u16>,
    },
    /// Local key-value store error
    StorageError { message: String },
    /// Export serialization error
    ExportError { message: String },
    /// Generic internal error
    Internal { message: String },
}

impl fmt::Display for AtlasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtlasError::DecodeError { track_id, message } => {
                write!(
                    f,
                    "Track {} has an undecodable polyline: {}",
                    track_id, message
                )
            }
            AtlasError::AuthError { message } => {
                write!(f, "Authentication error: {}", message)
            }
            AtlasError::HttpError {
                message,
                status_code,
            } => {
                if let Some(code) = status_code {
                    write!(f, "HTTP error ({}): {}", code, message)
                } else {
                    write!(f, "HTTP error: {}", message)
                }
            }
            AtlasError::StorageError { message } => {
                write!(f, "Storage error: {}", message)
            }
            AtlasError::ExportError { message } => {
                write!(f, "Export error: {}", message)
            }
            AtlasError::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for AtlasError {}

/// Result type alias for track-atlas operations.
pub type Result<T> = std::result::Result<T, AtlasError>;

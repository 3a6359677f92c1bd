//! Registry error types
//!
//! Error types for stream registry operations.

use thiserror::Error;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Stream not found
    #[error("streams: stream not found: {0}")]
    StreamNotFound(String),
    /// Source rejected for dynamic creation
    #[error("streams: {reason}: {url}")]
    InvalidSource { url: String, reason: &'static str },
    /// No preload registered under the name
    #[error("streams: preload not found: {0}")]
    PreloadNotFound(String),
}

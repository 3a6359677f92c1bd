//! Error types
//!
//! A single crate-level error covers connection, negotiation and routing
//! failures. Registry-specific failures live in [`RegistryError`] and convert
//! into [`Error`] transparently.

use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for routing operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No handler or redirect is registered for the URL scheme
    #[error("streams: unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// A source handler failed to establish a connection
    #[error("{0}")]
    DialFailed(String),

    /// The connection has no track for the requested media/codec
    #[error("can't get track")]
    NoTrackAvailable,

    /// The sink side refused a track
    #[error("can't add track: {0}")]
    AttachFailed(String),

    /// Producers were reachable but no media pair matched
    #[error("streams: codecs not matched: {producer} => {consumer}")]
    CodecsNotMatched {
        /// Producer codecs, `kind:NAME` joined by `, `
        producer: String,
        /// Consumer codecs, `kind:NAME` joined by `, `
        consumer: String,
    },

    /// Distinct per-producer failures collected during one negotiation
    #[error("streams: {}", .0.join(", "))]
    Producers(Vec<String>),

    /// Play could not wire the new source anywhere
    #[error("streams: can't find consumer")]
    NoCompatiblePath,

    /// Operation not valid in the producer's current state
    #[error("{0}")]
    InvalidState(&'static str),

    /// Redirect chain did not terminate
    #[error("streams: too many redirects: {0}")]
    TooManyRedirects(String),

    /// Connection closed by the remote side
    ///
    /// Adapters return it from `Producer::start` on a clean hangup; the
    /// producer worker then reconnects without a warning.
    #[error("connection closed")]
    Closed,

    /// Registry operation failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Negotiation failed without a recorded cause
    #[error("streams: unknown error")]
    Unknown,
}

impl Error {
    /// Create a dial failure from any displayable cause
    pub fn dial(cause: impl std::fmt::Display) -> Self {
        Error::DialFailed(cause.to_string())
    }

    /// Create an attach failure from any displayable cause
    pub fn attach(cause: impl std::fmt::Display) -> Self {
        Error::AttachFailed(cause.to_string())
    }

    /// Whether this error is the "codecs not matched" class
    pub fn is_codecs_not_matched(&self) -> bool {
        matches!(self, Error::CodecsNotMatched { .. })
    }
}

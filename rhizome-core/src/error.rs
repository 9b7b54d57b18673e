//! Error types for all Rhizome operations.

use thiserror::Error;

/// Main error type for Rhizome operations.
#[derive(Error, Debug)]
pub enum RhizomeError {
    /// Transport-level error from libzmq
    #[error("transport error: {0}")]
    Zmq(#[from] zmq::Error),

    /// IO error (whitelist files etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A key failed Z85 decoding or derivation
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// An endpoint string failed validation
    #[error("invalid connpoint: {0}")]
    InvalidConnpoint(String),

    /// Catalogue operation on a transport without a rendezvous layer
    #[error("catalogue rendezvous is not available on this transport")]
    NoCatalogues,
}

/// Result type alias for Rhizome operations.
pub type Result<T> = std::result::Result<T, RhizomeError>;

impl RhizomeError {
    /// Create an invalid-key error with a message
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }

    /// Create an invalid-connpoint error with a message
    pub fn invalid_connpoint(msg: impl Into<String>) -> Self {
        Self::InvalidConnpoint(msg.into())
    }
}

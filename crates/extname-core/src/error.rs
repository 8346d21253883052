//! Error types for the extname system
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for extname operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the extname system
#[derive(Error, Debug)]
pub enum Error {
    /// Candidate address is malformed or not IPv4
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The managed record does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The record was modified since it was read (stale version token)
    #[error("Version conflict: {0}")]
    VersionConflict(String),

    /// The updater ran out of attempts while the record kept changing underneath it
    #[error("Update abandoned after {attempts} attempt(s): {last}")]
    ExhaustedRetries {
        /// Number of attempts made
        attempts: u32,
        /// The store error seen on the final attempt
        last: Box<Error>,
    },

    /// An external call did not complete in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Address source errors
    #[error("Address source error: {0}")]
    AddressSource(String),

    /// Record store errors
    #[error("Record store error: {0}")]
    Store(String),

    /// Authentication errors against the record store
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Service reference that cannot name a Kubernetes Service
    #[error("Invalid service reference: {0}")]
    InvalidService(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an invalid address error
    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::InvalidAddress(msg.into())
    }

    /// Create an invalid service reference error
    pub fn invalid_service(msg: impl Into<String>) -> Self {
        Self::InvalidService(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a version conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::VersionConflict(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an address source error
    pub fn address_source(msg: impl Into<String>) -> Self {
        Self::AddressSource(msg.into())
    }

    /// Create a record store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for the transient error the updater retries on
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict(_))
    }

    /// True when the managed record is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

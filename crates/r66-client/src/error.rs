//! Error types for R66 collaborators

use crate::SpecialId;
use thiserror::Error;

/// Errors raised by transfer clients, rule catalogs and task ledgers
#[derive(Debug, Error)]
pub enum ClientError {
    /// Rule is not declared in the catalog
    #[error("Unknown rule: {0}")]
    UnknownRule(String),

    /// Host is not a known partner
    #[error("Unknown host: {0}")]
    UnknownHost(String),

    /// Remote host could not be reached
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    /// Task ledger has no database behind it
    #[error("Task ledger not connected")]
    NotConnected,

    /// No task row carries this id
    #[error("Transfer not found: {0}")]
    TaskNotFound(SpecialId),

    /// No progress within the connection timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Content digest differs between source and destination
    #[error("Digest mismatch for {0}")]
    DigestMismatch(String),

    /// Remote side refused the request
    #[error("Transfer refused: {0}")]
    Refused(String),

    /// Journal could not be read or appended
    #[error("Journal error: {0}")]
    Journal(String),

    /// File I/O error
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Journal(e.to_string())
    }
}

/// Result type for collaborator operations
pub type Result<T> = std::result::Result<T, ClientError>;

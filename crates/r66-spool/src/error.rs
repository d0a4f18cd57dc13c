//! Error types for the spooled-directory engine

use r66_client::ClientError;
use thiserror::Error;

/// Errors that can occur while running a spooled daemon
#[derive(Debug, Error)]
pub enum SpoolError {
    /// Configuration rejected before the daemon started
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// Status file exists but is not a status file of a known version
    #[error("Status file error: {0}")]
    StatusFile(String),

    /// Status file could not be written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Filename regex does not compile
    #[error("Invalid regex: {0}")]
    Regex(#[from] regex::Error),

    /// Collaborator error
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// File I/O error
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Task join error
    #[error("Task join error: {0}")]
    TaskJoin(String),

    /// Unrecoverable runtime fault
    #[error("Fatal fault: {0}")]
    Fault(String),
}

impl SpoolError {
    /// Whether this error was raised before the daemon reached `Running`
    /// because of its configuration.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            SpoolError::Validation(_) | SpoolError::Regex(_) | SpoolError::StatusFile(_)
        )
    }
}

impl From<tokio::task::JoinError> for SpoolError {
    fn from(e: tokio::task::JoinError) -> Self {
        SpoolError::TaskJoin(e.to_string())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, SpoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_classification() {
        assert!(SpoolError::Validation("no hosts".into()).is_config());
        assert!(SpoolError::StatusFile("bad magic".into()).is_config());
        assert!(!SpoolError::Fault("heartbeat died".into()).is_config());
        assert!(!SpoolError::Persistence("disk full".into()).is_config());
    }

    #[test]
    fn test_display() {
        let err = SpoolError::Validation("block size 50 below 100".into());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: block size 50 below 100"
        );
    }
}

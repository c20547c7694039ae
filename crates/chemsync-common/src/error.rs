//! Error types shared by chemsync crates

use thiserror::Error;

/// Result type alias for shared chemsync operations
pub type Result<T> = std::result::Result<T, ChemsyncError>;

/// Errors that are not specific to one ingestion stage
#[derive(Error, Debug)]
pub enum ChemsyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid version format: {0}")]
    InvalidVersion(String),
}

impl ChemsyncError {
    /// Configuration error for a required variable that is not set
    pub fn missing_env(name: &str) -> Self {
        Self::Config(format!("required environment variable {} is not set", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_env_message_names_variable() {
        let err = ChemsyncError::missing_env("FTP_HOST");
        assert_eq!(
            err.to_string(),
            "Configuration error: required environment variable FTP_HOST is not set"
        );
    }
}

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during secret resolution
#[derive(Debug, Error)]
pub enum SecretError {
    /// Malformed reference
    #[error("Invalid secret reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Failed to read file '{path}': {message}")]
    FileError { path: PathBuf, message: String },

    #[error("Environment variable '{var}' not set")]
    EnvNotSet { var: String },

    /// The reference resolved to nothing but whitespace
    #[error("Secret from {0} is empty")]
    Empty(&'static str),
}

impl SecretError {
    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}

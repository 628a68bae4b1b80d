//! Error types for the hseg-core library

use thiserror::Error;

/// Main error type for segmentation operations
#[derive(Error, Debug)]
pub enum HsegError {
    #[error("invalid configuration: {message}")]
    ConfigError { message: String },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("image decoding error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("dimensional error: {message}")]
    DimensionError { message: String },

    #[error("algorithm error: {message}")]
    AlgorithmError { message: String },

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl HsegError {
    /// Create a new configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new dimensional error
    pub fn dimension_error(message: impl Into<String>) -> Self {
        Self::DimensionError {
            message: message.into(),
        }
    }

    /// Create a new algorithm error
    pub fn algorithm_error(message: impl Into<String>) -> Self {
        Self::AlgorithmError {
            message: message.into(),
        }
    }
}

/// Result type alias for convenience
pub type HsegResult<T> = Result<T, HsegError>;

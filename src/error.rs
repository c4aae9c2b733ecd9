//! Error types for background removal operations
//!
//! Every failure that reaches a caller is one of a small set of kinds
//! (see [`ErrorKind`]) and always carries a human-readable message.

use std::path::Path;
use thiserror::Error;

/// Result type alias for background removal operations
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Error types surfaced by the background removal pipeline
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// Input could not be decoded or has a zero dimension
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Input exceeds the configured byte or pixel limits; no work was done
    #[error("Size limit exceeded: {0}")]
    SizeLimitExceeded(String),

    /// Every model candidate failed to load
    #[error("Model load failed: {0}")]
    ModelLoadFailed(String),

    /// Unexpected failure during preprocessing, inference or postprocessing
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    /// Remote service failure (model download over HTTP)
    #[error("API error{}: {message}", status_suffix(.status_code))]
    ApiError {
        status_code: Option<u16>,
        message: String,
    },

    /// The inference session was disposed before use
    #[error("Session released: {0}")]
    SessionReleased(String),

    /// The caller cancelled the operation
    #[error("Processing cancelled")]
    Cancelled,

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input/output errors (model file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[allow(clippy::ref_option)]
fn status_suffix(status_code: &Option<u16>) -> String {
    status_code.map_or_else(String::new, |code| format!(" (HTTP {code})"))
}

/// Coarse classification of [`BgRemovalError`] for callers that branch on
/// the failure point rather than on the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidImage,
    SizeLimitExceeded,
    ModelLoadFailed,
    ProcessingFailed,
    ApiError,
    Cancelled,
    InvalidConfig,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InvalidImage => "invalid-image",
            Self::SizeLimitExceeded => "size-limit-exceeded",
            Self::ModelLoadFailed => "model-load-failed",
            Self::ProcessingFailed => "processing-failed",
            Self::ApiError => "api-error",
            Self::Cancelled => "cancelled",
            Self::InvalidConfig => "invalid-config",
        };
        f.write_str(name)
    }
}

impl BgRemovalError {
    /// Create a new invalid image error
    pub fn invalid_image<S: Into<String>>(msg: S) -> Self {
        Self::InvalidImage(msg.into())
    }

    /// Create a new model load error
    pub fn model_load<S: Into<String>>(msg: S) -> Self {
        Self::ModelLoadFailed(msg.into())
    }

    /// Create a new processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    /// Create a new API error with an optional HTTP status code
    pub fn api<S: Into<String>>(status_code: Option<u16>, msg: S) -> Self {
        Self::ApiError {
            status_code,
            message: msg.into(),
        }
    }

    /// Create a new session released error
    pub fn session_released<S: Into<String>>(msg: S) -> Self {
        Self::SessionReleased(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    // Contextual error creators

    /// Create a size limit error naming the limit that was exceeded
    pub fn size_limit<T: std::fmt::Display>(what: &str, actual: T, limit: T) -> Self {
        Self::SizeLimitExceeded(format!("{what} is {actual}, maximum allowed is {limit}"))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<Path>>(operation: &str, path: P, error: &std::io::Error) -> Self {
        Self::Io(std::io::Error::new(
            error.kind(),
            format!(
                "Failed to {} '{}': {}",
                operation,
                path.as_ref().display(),
                error
            ),
        ))
    }

    /// Create a transport-level error (no HTTP status available)
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::ApiError {
            status_code: None,
            message: format!("{}: {}", context.into(), error),
        }
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {rec}"),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {parameter}: {value} (valid range: {valid_range}).{recommendation}"
        ))
    }

    /// Create processing error with stage context
    pub fn processing_stage_error(stage: &str, details: &str, input_info: Option<&str>) -> Self {
        let input_context = match input_info {
            Some(info) => format!(" (input: {info})"),
            None => String::new(),
        };

        Self::ProcessingFailed(format!(
            "Processing failed at stage '{stage}'{input_context}: {details}"
        ))
    }

    /// Classify this error into the public taxonomy
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidImage(_) => ErrorKind::InvalidImage,
            Self::SizeLimitExceeded(_) => ErrorKind::SizeLimitExceeded,
            Self::ModelLoadFailed(_) => ErrorKind::ModelLoadFailed,
            Self::ProcessingFailed(_) | Self::SessionReleased(_) | Self::Io(_) => {
                ErrorKind::ProcessingFailed
            },
            Self::ApiError { .. } => ErrorKind::ApiError,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }

    /// HTTP status code for API errors
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ApiError { status_code, .. } => *status_code,
            _ => None,
        }
    }
}

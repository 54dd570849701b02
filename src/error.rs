//! Error types for conversion operations

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for VRDF conversion operations
#[derive(Error, Debug)]
pub enum VrdfError {
    #[error("{what} not found: {}", path.display())]
    NotFound { what: &'static str, path: PathBuf },

    #[error("Could not extract modality from filename: {filename}")]
    ModalityUnresolved { filename: String },

    #[error("Invalid file name (must be a plain file name): {name}")]
    InvalidFileName { name: String },

    #[error("Shape mismatch: volume {volume:?} vs labelmap {labelmap:?}")]
    ShapeMismatch {
        volume: Vec<usize>,
        labelmap: Vec<usize>,
    },

    #[error("Invalid format in {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoder failed writing {}: {reason}", path.display())]
    Encoder { path: PathBuf, reason: String },

    #[error("Duplicate label in label set: {0}")]
    DuplicateLabel(i32),

    #[error("Label set must not be empty")]
    EmptyLabelSet,

    #[error("Channel volume needs {required} bytes, budget is {budget} bytes")]
    BudgetExceeded { required: usize, budget: usize },

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Coarse classification used by service front-ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A study, input or segmentation file is missing
    NotFound,
    /// The request itself is structurally invalid
    Validation,
    /// Infrastructure or encoder fault
    Internal,
}

impl ErrorKind {
    /// HTTP-equivalent status code for this kind
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Validation => 400,
            ErrorKind::Internal => 500,
        }
    }
}

impl VrdfError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VrdfError::NotFound { .. } => ErrorKind::NotFound,
            VrdfError::ModalityUnresolved { .. }
            | VrdfError::InvalidFileName { .. }
            | VrdfError::ShapeMismatch { .. }
            | VrdfError::DuplicateLabel(_)
            | VrdfError::EmptyLabelSet
            | VrdfError::BudgetExceeded { .. }
            | VrdfError::Configuration(_) => ErrorKind::Validation,
            VrdfError::Format { .. }
            | VrdfError::Io { .. }
            | VrdfError::Encoder { .. }
            | VrdfError::Compression(_)
            | VrdfError::Decompression(_)
            | VrdfError::Task(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VrdfError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        VrdfError::Format {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn encoder(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        VrdfError::Encoder {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Specialized Result type for VRDF operations
pub type Result<T> = std::result::Result<T, VrdfError>;

impl From<tokio::task::JoinError> for VrdfError {
    fn from(err: tokio::task::JoinError) -> Self {
        VrdfError::Task(err.to_string())
    }
}

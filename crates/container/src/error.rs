//! Error types for the array container.

use thiserror::Error;

/// Errors that can occur while reading or writing a container file.
#[derive(Error, Debug)]
pub enum ContainerError {
    /// Underlying filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a container file or its header is damaged.
    #[error("invalid container format: {0}")]
    InvalidFormat(String),

    /// Header (de)serialization failure.
    #[error("header error: {0}")]
    Header(#[from] serde_json::Error),

    /// A named dimension does not exist.
    #[error("undefined dimension: {0}")]
    UndefinedDim(String),

    /// A named variable does not exist.
    #[error("undefined variable: {0}")]
    UndefinedVar(String),

    /// A dimension or variable with this name already exists.
    #[error("name already defined: {0}")]
    AlreadyDefined(String),

    /// The container was opened read-only.
    #[error("container is read-only: {0}")]
    ReadOnly(String),

    /// A start/count/buffer argument is inconsistent with the variable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

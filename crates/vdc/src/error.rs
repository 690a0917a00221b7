//! Error types for the dataset facade.

use thiserror::Error;

/// Errors raised by dataset definition and access.
#[derive(Error, Debug)]
pub enum VdcError {
    /// Master container failure.
    #[error(transparent)]
    Container(#[from] container::ContainerError),

    /// Blocked-storage failure.
    #[error(transparent)]
    Wasp(#[from] wasp::WaspError),

    /// Filesystem failure outside the container layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Dataset metadata (de)serialization failure.
    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// A named dimension does not exist.
    #[error("undefined dimension: {0}")]
    UndefinedDim(String),

    /// A named variable does not exist.
    #[error("undefined variable: {0}")]
    UndefinedVar(String),

    /// A definition-time parameter is invalid, or definitions changed after
    /// `end_define`.
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    /// An access argument is inconsistent with the variable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No variable is open, or it is open in the wrong mode.
    #[error("no variable open for {0}")]
    NotOpen(&'static str),

    /// The dataset was opened read-only.
    #[error("read-only: {0}")]
    ReadOnly(String),
}

/// Result type for dataset operations.
pub type Result<T> = std::result::Result<T, VdcError>;

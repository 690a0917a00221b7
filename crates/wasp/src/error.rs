//! Error types for the blocked storage layer.

use thiserror::Error;

/// Errors raised by the variable facade and its codec engine.
#[derive(Error, Debug)]
pub enum WaspError {
    /// Backing container failure.
    #[error(transparent)]
    Container(#[from] container::ContainerError),

    /// Wavelet codec failure.
    #[error(transparent)]
    Wavelet(#[from] wavelet::WaveletError),

    /// A named dimension does not exist.
    #[error("undefined dimension: {0}")]
    UndefinedDim(String),

    /// A named variable does not exist.
    #[error("undefined variable: {0}")]
    UndefinedVar(String),

    /// A definition-time parameter is invalid.
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    /// A start/count/buffer argument is inconsistent with the open variable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An access method was called with no variable open, or with a variable
    /// open in the wrong mode.
    #[error("no variable open for {0}")]
    NotOpen(&'static str),

    /// The file set was opened read-only.
    #[error("read-only: {0}")]
    ReadOnly(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, WaspError>;

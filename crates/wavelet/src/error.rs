//! Error types for the wavelet codec.

use thiserror::Error;

/// Errors raised by the transform, significance-map, and compression layers.
#[derive(Error, Debug)]
pub enum WaveletError {
    /// The wavelet name is not one of the supported family.
    #[error("unknown wavelet: {0}")]
    UnknownWavelet(String),

    /// A buffer length or shape does not match what the operation needs.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A serialized significance map failed to parse.
    #[error("invalid significance map: {0}")]
    InvalidMap(String),
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, WaveletError>;

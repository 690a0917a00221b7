//! Wavelet codec for progressive-access compression.
//!
//! Builds up from one-dimensional lifting filter banks to multi-level
//! separable transforms, significance maps, and the [`Compressor`] that
//! assigns coefficients to a compression-ratio ladder.

pub mod compressor;
pub mod error;
pub mod lifting;
pub mod sigmap;
pub mod wavedec;

pub use compressor::Compressor;
pub use error::{Result, WaveletError};
pub use lifting::Wavelet;
pub use sigmap::SignificanceMap;
pub use wavedec::WaveDec;

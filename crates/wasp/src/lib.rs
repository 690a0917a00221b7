//! Multiresolution blocked wavelet array storage.
//!
//! Arrays are carved into fixed-size blocks, each block is wavelet
//! transformed, and the coefficients are spread over a ladder of
//! compression levels stored across one or more container files. Readers
//! choose a refinement level (spatial resolution) and a ladder depth
//! (coefficient budget) independently.

pub mod blocking;
pub mod codec;
pub mod engine;
pub mod error;
pub mod file;
pub mod math;
pub mod padding;

pub use container::{AttrValue, DType, Element};
pub use error::{Result, WaspError};
pub use file::Wasp;
pub use padding::PadMode;

//! Dataset facade over multiresolution blocked storage.
//!
//! A dataset is a master file carrying the definition document plus the
//! small uncompressed variables, and a directory tree of per-variable
//! blocked file sets for everything larger. Variables are defined once,
//! then accessed one timestep at a time at a chosen refinement level and
//! compression depth.

pub mod config;
pub mod dataset;
pub mod error;
pub mod metadata;

pub use config::VdcConfig;
pub use container::{AttrValue, DType, Element};
pub use dataset::Vdc;
pub use error::{Result, VdcError};
pub use metadata::{Dimension, Metadata, VarMeta};

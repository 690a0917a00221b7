//! Self-describing array container files.
//!
//! A container holds named, typed, multi-dimensional variables with
//! attributes, addressable by hyperslab. It is the storage collaborator the
//! compression layers sit on top of: they define coefficient and map
//! variables here and read or write rectangular regions of them.

pub mod dtype;
pub mod error;
pub mod file;
pub mod header;

pub use dtype::{DType, Element};
pub use error::{ContainerError, Result};
pub use file::Container;
pub use header::AttrValue;

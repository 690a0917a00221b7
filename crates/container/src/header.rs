//! Container header: dimension, variable, and attribute records.
//!
//! The header is a JSON document appended after the data region, located
//! through a fixed-size trailer at the end of the file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dtype::DType;

/// An attribute value attached to a variable or to the container itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum AttrValue {
    Text(String),
    Int(i64),
    Double(f64),
    IntVec(Vec<i64>),
    DoubleVec(Vec<f64>),
    TextVec(Vec<String>),
}

impl AttrValue {
    /// Interpret as text, if it is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret as a scalar integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Interpret as a scalar double.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Double(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Interpret as an integer vector.
    pub fn as_i64_vec(&self) -> Option<&[i64]> {
        match self {
            AttrValue::IntVec(v) => Some(v),
            _ => None,
        }
    }

    /// Interpret as a text vector.
    pub fn as_text_vec(&self) -> Option<&[String]> {
        match self {
            AttrValue::TextVec(v) => Some(v),
            _ => None,
        }
    }
}

/// A named dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimDef {
    pub name: String,
    pub len: usize,
}

/// A variable definition: type, shape, attributes, and data location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarDef {
    pub name: String,
    pub dtype: DType,
    pub dimnames: Vec<String>,
    /// Resolved dimension lengths, captured at definition time.
    pub dims: Vec<usize>,
    pub attrs: BTreeMap<String, AttrValue>,
    /// Byte offset of this variable's data region.
    pub offset: u64,
}

impl VarDef {
    /// Total number of elements.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }
}

/// The container header document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Header {
    pub dims: Vec<DimDef>,
    pub vars: Vec<VarDef>,
    pub attrs: BTreeMap<String, AttrValue>,
    /// End of the data region; the header JSON is written here.
    pub data_end: u64,
}

impl Header {
    pub fn dim(&self, name: &str) -> Option<&DimDef> {
        self.dims.iter().find(|d| d.name == name)
    }

    pub fn var(&self, name: &str) -> Option<&VarDef> {
        self.vars.iter().find(|v| v.name == name)
    }

    pub fn var_mut(&mut self, name: &str) -> Option<&mut VarDef> {
        self.vars.iter_mut().find(|v| v.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_json_roundtrip() {
        let mut hdr = Header::default();
        hdr.dims.push(DimDef {
            name: "x".to_string(),
            len: 64,
        });
        hdr.vars.push(VarDef {
            name: "temperature".to_string(),
            dtype: DType::Float,
            dimnames: vec!["x".to_string()],
            dims: vec![64],
            attrs: BTreeMap::new(),
            offset: 8,
        });
        hdr.attrs
            .insert("title".to_string(), AttrValue::Text("test".to_string()));

        let json = serde_json::to_string(&hdr).unwrap();
        let back: Header = serde_json::from_str(&json).unwrap();
        assert_eq!(back.dims.len(), 1);
        assert_eq!(back.var("temperature").unwrap().num_elements(), 64);
        assert_eq!(back.attrs["title"].as_text(), Some("test"));
    }
}

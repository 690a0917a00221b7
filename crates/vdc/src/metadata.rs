//! Dataset metadata: dimensions, coordinate variables, data variables.
//!
//! The whole document is serialized to JSON and stored in the master file,
//! so a dataset is self-describing without reading any variable data.

use std::collections::BTreeMap;

use container::DType;
use serde::{Deserialize, Serialize};

/// A named array dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub length: usize,
}

/// Definition of one coordinate or data variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarMeta {
    pub name: String,
    pub dtype: DType,
    /// Spatial dimension names, slowest-varying first.
    pub dimnames: Vec<String>,
    /// The time dimension, when the variable is time-varying.
    pub time_dim: Option<String>,
    pub compressed: bool,
    /// Coordinate variables live under `coordinates/`, data variables under
    /// `data/`.
    pub is_coord: bool,
    pub missing_value: Option<f64>,
}

impl VarMeta {
    pub fn time_varying(&self) -> bool {
        self.time_dim.is_some()
    }
}

/// The dataset definition document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub dimensions: Vec<Dimension>,
    pub vars: BTreeMap<String, VarMeta>,
}

impl Metadata {
    pub fn dim(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn var(&self, name: &str) -> Option<&VarMeta> {
        self.vars.get(name)
    }

    /// Spatial dimension lengths of a variable, slowest-varying first.
    pub fn var_dims(&self, var: &VarMeta) -> Vec<usize> {
        var.dimnames
            .iter()
            .filter_map(|n| self.dim(n).map(|d| d.length))
            .collect()
    }

    /// Grid points per timestep.
    pub fn grid_points(&self, var: &VarMeta) -> usize {
        self.var_dims(var).iter().product()
    }

    /// Number of timesteps of a variable (1 when not time-varying).
    pub fn num_timesteps(&self, var: &VarMeta) -> usize {
        var.time_dim
            .as_deref()
            .and_then(|n| self.dim(n))
            .map(|d| d.length)
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_json_roundtrip() {
        let mut md = Metadata::default();
        md.dimensions.push(Dimension {
            name: "time".to_string(),
            length: 10,
        });
        md.dimensions.push(Dimension {
            name: "x".to_string(),
            length: 64,
        });
        md.vars.insert(
            "u".to_string(),
            VarMeta {
                name: "u".to_string(),
                dtype: DType::Float,
                dimnames: vec!["x".to_string()],
                time_dim: Some("time".to_string()),
                compressed: true,
                is_coord: false,
                missing_value: None,
            },
        );

        let json = serde_json::to_string(&md).unwrap();
        let back: Metadata = serde_json::from_str(&json).unwrap();
        let u = back.var("u").unwrap();
        assert!(u.time_varying());
        assert_eq!(back.grid_points(u), 64);
        assert_eq!(back.num_timesteps(u), 10);
    }
}

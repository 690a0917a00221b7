//! Dataset configuration.

use serde::{Deserialize, Serialize};

/// Storage parameters fixed when a dataset is created.
///
/// The two thresholds steer where variables live: small uncompressed
/// variables go straight into the master file, everything else into
/// per-variable file sets split so no file exceeds roughly
/// `variable_threshold` grid points. The thresholds are baked into paths
/// already written, so they must not change once data exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VdcConfig {
    /// Per-timestep element count below which an uncompressed variable is
    /// stored in the master file itself.
    pub master_threshold: usize,
    /// Grid points per physical file for variables outside the master.
    pub variable_threshold: usize,
    /// Worker threads for the block codec (0 selects the hardware
    /// parallelism).
    pub nthreads: usize,
    /// Wavelet for compressed variables.
    pub wavelet: String,
    /// Block size for compressed variables, fastest-varying dimensions
    /// last; truncated or left-padded to each variable's rank.
    pub block_size: Vec<usize>,
    /// Compression-ratio ladder for compressed variables.
    pub cratios: Vec<usize>,
}

impl Default for VdcConfig {
    fn default() -> Self {
        VdcConfig {
            master_threshold: 10 * 1024 * 1024,
            variable_threshold: 100 * 1024 * 1024,
            nthreads: 0,
            wavelet: "bior4.4".to_string(),
            block_size: vec![64, 64, 64],
            cratios: vec![500, 100, 10, 1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_and_partial_json() {
        let c = VdcConfig::default();
        assert_eq!(c.wavelet, "bior4.4");
        assert_eq!(c.cratios, vec![500, 100, 10, 1]);

        // Unspecified fields fall back to the defaults.
        let c: VdcConfig =
            serde_json::from_str(r#"{"master_threshold": 100, "nthreads": 2}"#).unwrap();
        assert_eq!(c.master_threshold, 100);
        assert_eq!(c.nthreads, 2);
        assert_eq!(c.block_size, vec![64, 64, 64]);
    }
}

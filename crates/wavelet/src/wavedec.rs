//! Multi-level separable decomposition of 1D, 2D, and 3D arrays.
//!
//! Coefficients are packed progressively: the approximation at the coarsest
//! level comes first, followed by one detail block per refinement step from
//! coarsest to finest. A prefix of the packed vector therefore suffices to
//! reconstruct the array at any intermediate level.

use crate::error::{Result, WaveletError};
use crate::lifting::Wavelet;

/// A multi-level wavelet decomposition plan for a fixed shape.
#[derive(Debug, Clone)]
pub struct WaveDec {
    wavelet: Wavelet,
    nlevels: usize,
    /// `level_dims[l]` is the array shape at refinement level `l`;
    /// `level_dims[nlevels]` is the full shape.
    level_dims: Vec<Vec<usize>>,
}

/// Shape after one coarsening step: each transformed dimension keeps its
/// approximation half, length-1 dimensions pass through.
fn coarsen(dims: &[usize]) -> Vec<usize> {
    dims.iter()
        .map(|&d| if d > 1 { d.div_ceil(2) } else { d })
        .collect()
}

impl WaveDec {
    /// Largest usable level count for this shape: the minimum over the
    /// dimensions longer than one sample.
    pub fn max_levels(wavelet: Wavelet, dims: &[usize]) -> usize {
        dims.iter()
            .filter(|&&d| d > 1)
            .map(|&d| wavelet.max_levels(d))
            .min()
            .unwrap_or(0)
    }

    /// Build a plan for `dims` with `nlevels` coarsening steps.
    pub fn new(wavelet: Wavelet, dims: &[usize], nlevels: usize) -> Result<Self> {
        if dims.is_empty() || dims.iter().any(|&d| d == 0) {
            return Err(WaveletError::InvalidArgument(format!(
                "invalid transform shape {:?}",
                dims
            )));
        }
        if nlevels > Self::max_levels(wavelet, dims) {
            return Err(WaveletError::InvalidArgument(format!(
                "{} levels exceed the maximum for shape {:?} with {}",
                nlevels,
                dims,
                wavelet.name()
            )));
        }
        let mut level_dims = vec![dims.to_vec()];
        for _ in 0..nlevels {
            let next = coarsen(level_dims.last().unwrap());
            level_dims.push(next);
        }
        level_dims.reverse();
        Ok(WaveDec {
            wavelet,
            nlevels,
            level_dims,
        })
    }

    pub fn wavelet(&self) -> Wavelet {
        self.wavelet
    }

    /// Number of coarsening steps.
    pub fn num_levels(&self) -> usize {
        self.nlevels
    }

    /// Shape at refinement level `level` (0 = coarsest, `num_levels()` =
    /// full resolution). Out-of-range levels clamp to full resolution.
    pub fn dims_at_level(&self, level: usize) -> &[usize] {
        let l = level.min(self.nlevels);
        &self.level_dims[l]
    }

    /// Total number of coefficients (equals the number of input samples).
    pub fn num_coeffs(&self) -> usize {
        self.level_dims[self.nlevels].iter().product()
    }

    /// Number of packed coefficients needed to reconstruct `level`.
    pub fn num_coeffs_at_level(&self, level: usize) -> usize {
        self.dims_at_level(level).iter().product()
    }

    /// Full forward transform. `coeffs` receives the packed vector and must
    /// hold exactly `num_coeffs()` values.
    pub fn decompose(&self, data: &[f64], coeffs: &mut [f64]) -> Result<()> {
        let n = self.num_coeffs();
        if data.len() != n || coeffs.len() != n {
            return Err(WaveletError::InvalidArgument(format!(
                "buffer length {}/{} does not match {} samples",
                data.len(),
                coeffs.len(),
                n
            )));
        }
        let mut work = data.to_vec();
        // Detail blocks accumulate finest-first; they are emitted reversed.
        let mut details: Vec<Vec<f64>> = Vec::with_capacity(self.nlevels);
        for step in (1..=self.nlevels).rev() {
            let shape = self.level_dims[step].clone();
            for axis in 0..shape.len() {
                forward_axis(self.wavelet, &mut work, &shape, axis);
            }
            let corner = &self.level_dims[step - 1];
            let (approx, detail) = split_corner(&work, &shape, corner);
            details.push(detail);
            work = approx;
        }
        let mut pos = work.len();
        coeffs[..pos].copy_from_slice(&work);
        for detail in details.iter().rev() {
            coeffs[pos..pos + detail.len()].copy_from_slice(detail);
            pos += detail.len();
        }
        debug_assert_eq!(pos, n);
        Ok(())
    }

    /// Reconstruct refinement level `level` (clamped) from the packed
    /// coefficient prefix. `data` must hold `num_coeffs_at_level(level)`
    /// values; `coeffs` must cover at least that prefix.
    pub fn reconstruct(&self, coeffs: &[f64], level: usize, data: &mut [f64]) -> Result<()> {
        let level = level.min(self.nlevels);
        let need = self.num_coeffs_at_level(level);
        if coeffs.len() < need || data.len() != need {
            return Err(WaveletError::InvalidArgument(format!(
                "need {} coefficients to reconstruct level {}, have {}/{}",
                need,
                level,
                coeffs.len(),
                data.len()
            )));
        }
        let napprox = self.num_coeffs_at_level(0);
        let mut work = coeffs[..napprox].to_vec();
        let mut pos = napprox;
        for step in 1..=level {
            let shape = self.level_dims[step].clone();
            let corner = &self.level_dims[step - 1];
            let ndetail: usize = shape.iter().product::<usize>() - work.len();
            let mut merged = merge_corner(&work, &coeffs[pos..pos + ndetail], &shape, corner);
            pos += ndetail;
            for axis in (0..shape.len()).rev() {
                inverse_axis(self.wavelet, &mut merged, &shape, axis);
            }
            work = merged;
        }
        data.copy_from_slice(&work);
        Ok(())
    }
}

/// Apply the forward filter bank to every line along `axis`, rewriting each
/// line as `[approx | detail]`.
fn forward_axis(wavelet: Wavelet, data: &mut [f64], shape: &[usize], axis: usize) {
    let len = shape[axis];
    if len < 2 {
        return;
    }
    let na = len.div_ceil(2);
    let stride: usize = shape[axis + 1..].iter().product();
    let nouter: usize = shape[..axis].iter().product();
    let mut line = vec![0.0; len];
    let mut a = vec![0.0; na];
    let mut d = vec![0.0; len - na];
    for outer in 0..nouter {
        for inner in 0..stride {
            let base = outer * len * stride + inner;
            for j in 0..len {
                line[j] = data[base + j * stride];
            }
            wavelet.forward(&line, &mut a, &mut d);
            for j in 0..na {
                data[base + j * stride] = a[j];
            }
            for j in 0..len - na {
                data[base + (na + j) * stride] = d[j];
            }
        }
    }
}

/// Inverse of [`forward_axis`].
fn inverse_axis(wavelet: Wavelet, data: &mut [f64], shape: &[usize], axis: usize) {
    let len = shape[axis];
    if len < 2 {
        return;
    }
    let na = len.div_ceil(2);
    let stride: usize = shape[axis + 1..].iter().product();
    let nouter: usize = shape[..axis].iter().product();
    let mut a = vec![0.0; na];
    let mut d = vec![0.0; len - na];
    let mut line = vec![0.0; len];
    for outer in 0..nouter {
        for inner in 0..stride {
            let base = outer * len * stride + inner;
            for j in 0..na {
                a[j] = data[base + j * stride];
            }
            for j in 0..len - na {
                d[j] = data[base + (na + j) * stride];
            }
            wavelet.inverse(&a, &d, &mut line);
            for j in 0..len {
                data[base + j * stride] = line[j];
            }
        }
    }
}

/// Separate the approximation corner (shape `corner`) from the remaining
/// detail coefficients, both in row-major order of `shape`.
fn split_corner(data: &[f64], shape: &[usize], corner: &[usize]) -> (Vec<f64>, Vec<f64>) {
    let ncorner: usize = corner.iter().product();
    let mut approx = Vec::with_capacity(ncorner);
    let mut detail = Vec::with_capacity(data.len() - ncorner);
    let mut idx = vec![0usize; shape.len()];
    for &v in data {
        if idx.iter().zip(corner).all(|(&i, &c)| i < c) {
            approx.push(v);
        } else {
            detail.push(v);
        }
        for d in (0..shape.len()).rev() {
            idx[d] += 1;
            if idx[d] < shape[d] {
                break;
            }
            idx[d] = 0;
        }
    }
    (approx, detail)
}

/// Inverse of [`split_corner`].
fn merge_corner(approx: &[f64], detail: &[f64], shape: &[usize], corner: &[usize]) -> Vec<f64> {
    let total: usize = shape.iter().product();
    let mut out = Vec::with_capacity(total);
    let mut idx = vec![0usize; shape.len()];
    let (mut ai, mut di) = (0usize, 0usize);
    for _ in 0..total {
        if idx.iter().zip(corner).all(|(&i, &c)| i < c) {
            out.push(approx[ai]);
            ai += 1;
        } else {
            out.push(detail[di]);
            di += 1;
        }
        for d in (0..shape.len()).rev() {
            idx[d] += 1;
            if idx[d] < shape[d] {
                break;
            }
            idx[d] = 0;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f64> {
        (0..n).map(|i| ((i * 31 + 7) % 23) as f64 - 11.0).collect()
    }

    fn check_roundtrip(wavelet: Wavelet, dims: &[usize], nlevels: usize) {
        let n: usize = dims.iter().product();
        let data = ramp(n);
        let plan = WaveDec::new(wavelet, dims, nlevels).unwrap();
        let mut coeffs = vec![0.0; n];
        plan.decompose(&data, &mut coeffs).unwrap();
        let mut back = vec![0.0; n];
        plan.reconstruct(&coeffs, nlevels, &mut back).unwrap();
        for (x, y) in data.iter().zip(&back) {
            assert!((x - y).abs() < 1e-8, "{:?} {} levels", dims, nlevels);
        }
    }

    #[test]
    fn test_roundtrip_1d_2d_3d() {
        check_roundtrip(Wavelet::Bior1_1, &[64], 3);
        check_roundtrip(Wavelet::Bior2_2, &[64], 3);
        check_roundtrip(Wavelet::Bior4_4, &[64], 3);
        check_roundtrip(Wavelet::Bior4_4, &[16, 32], 1);
        check_roundtrip(Wavelet::Bior2_2, &[8, 16, 32], 2);
        check_roundtrip(Wavelet::Bior1_1, &[1, 16, 16], 3);
    }

    #[test]
    fn test_odd_shapes_roundtrip() {
        check_roundtrip(Wavelet::Bior2_2, &[17], 1);
        check_roundtrip(Wavelet::Bior4_4, &[11, 13], 0);
        check_roundtrip(Wavelet::Bior1_1, &[9, 7], 2);
    }

    #[test]
    fn test_prefix_reconstructs_intermediate_level() {
        let dims = [32usize, 32];
        let plan = WaveDec::new(Wavelet::Bior4_4, &dims, 2).unwrap();
        let data = ramp(1024);
        let mut coeffs = vec![0.0; 1024];
        plan.decompose(&data, &mut coeffs).unwrap();

        assert_eq!(plan.dims_at_level(0), &[8, 8]);
        assert_eq!(plan.dims_at_level(1), &[16, 16]);
        assert_eq!(plan.num_coeffs_at_level(1), 256);

        // Only the first 256 packed coefficients are needed for level 1.
        let mut coarse = vec![0.0; 256];
        plan.reconstruct(&coeffs[..256], 1, &mut coarse).unwrap();

        // The same level from the full vector must agree exactly.
        let mut coarse2 = vec![0.0; 256];
        plan.reconstruct(&coeffs, 1, &mut coarse2).unwrap();
        assert_eq!(coarse, coarse2);
    }

    #[test]
    fn test_level_counts() {
        assert_eq!(WaveDec::max_levels(Wavelet::Bior4_4, &[64, 64, 64]), 3);
        assert_eq!(WaveDec::max_levels(Wavelet::Bior4_4, &[1, 64, 64]), 3);
        assert_eq!(WaveDec::max_levels(Wavelet::Bior1_1, &[64, 8]), 3);
        assert_eq!(WaveDec::max_levels(Wavelet::Bior2_2, &[1, 1]), 0);
        assert!(WaveDec::new(Wavelet::Bior4_4, &[8, 8], 1).is_err());
        assert!(WaveDec::new(Wavelet::Bior4_4, &[], 0).is_err());
    }

    #[test]
    fn test_dims_at_level_clamps() {
        let plan = WaveDec::new(Wavelet::Bior1_1, &[64], 4).unwrap();
        assert_eq!(plan.dims_at_level(0), &[4]);
        assert_eq!(plan.dims_at_level(4), &[64]);
        assert_eq!(plan.dims_at_level(99), &[64]);
    }
}

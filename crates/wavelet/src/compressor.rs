//! Progressive-access compression of fixed-shape arrays.
//!
//! A `Compressor` binds a shape to a wavelet and splits the packed
//! coefficient vector into ladder segments: segment 0 always carries every
//! approximation coefficient plus the largest-magnitude details, and each
//! further segment refines the previous ones. Which detail address went to
//! which segment is recorded in one significance map per segment.

use tracing::debug;

use crate::error::{Result, WaveletError};
use crate::lifting::Wavelet;
use crate::sigmap::SignificanceMap;
use crate::wavedec::WaveDec;

/// A reusable encoder/decoder for arrays of one fixed shape.
///
/// Holds its transform scratch, so parallel callers use one instance per
/// thread.
#[derive(Debug, Clone)]
pub struct Compressor {
    plan: WaveDec,
    dims: Vec<usize>,
    buf: Vec<f64>,
    order: Vec<usize>,
}

impl Compressor {
    /// Create a compressor for `dims`, using every level the shape allows.
    pub fn new(dims: &[usize], wavelet: Wavelet) -> Result<Self> {
        let nlevels = WaveDec::max_levels(wavelet, dims);
        let plan = WaveDec::new(wavelet, dims, nlevels)?;
        let n = plan.num_coeffs();
        Ok(Compressor {
            plan,
            dims: dims.to_vec(),
            buf: vec![0.0; n],
            order: Vec::with_capacity(n),
        })
    }

    /// Number of refinement levels, counting the full-resolution one.
    pub fn num_levels(&self) -> usize {
        self.plan.num_levels() + 1
    }

    /// Total number of coefficients.
    pub fn num_coeffs(&self) -> usize {
        self.plan.num_coeffs()
    }

    /// The smallest number of coefficients any encoding keeps: the size of
    /// the coarsest approximation, which is always stored verbatim.
    pub fn min_coeffs(&self) -> usize {
        self.plan.num_coeffs_at_level(0)
    }

    /// Largest achievable compression ratio.
    pub fn max_cratio(&self) -> usize {
        self.num_coeffs() / self.min_coeffs()
    }

    /// Array shape at a refinement level (clamped).
    pub fn dims_at_level(&self, level: usize) -> &[usize] {
        self.plan.dims_at_level(level)
    }

    /// Level count and maximum compression ratio for a shape and wavelet,
    /// without building a compressor.
    pub fn compression_info(dims: &[usize], wavelet: Wavelet) -> Result<(usize, usize)> {
        let c = Compressor::new(dims, wavelet)?;
        Ok((c.num_levels(), c.max_cratio()))
    }

    /// Serialized byte size of a significance map holding `nentries` for
    /// this coefficient space.
    pub fn sig_map_size(&self, nentries: usize) -> usize {
        SignificanceMap::encoded_size(&[self.num_coeffs()], nentries)
    }

    /// Per-segment coefficient counts for a descending compression-ratio
    /// ladder. Each ratio keeps `ntotal / cratio` coefficients cumulatively,
    /// never fewer than the approximation set.
    pub fn encoding_counts(&self, cratios: &[usize]) -> Result<Vec<usize>> {
        let ntotal = self.num_coeffs();
        let mut counts = Vec::with_capacity(cratios.len());
        let mut naccum = 0usize;
        for &cr in cratios {
            if cr == 0 {
                return Err(WaveletError::InvalidArgument(
                    "compression ratio must be at least 1".to_string(),
                ));
            }
            let cum = (ntotal / cr).max(self.min_coeffs());
            if cum < naccum {
                return Err(WaveletError::InvalidArgument(format!(
                    "compression ratios {:?} are not descending",
                    cratios
                )));
            }
            counts.push(cum - naccum);
            naccum = cum;
        }
        Ok(counts)
    }

    /// Forward transform and ladder assignment.
    ///
    /// `counts[i]` coefficients go to segment `i` (see
    /// [`Compressor::encoding_counts`]); they are written contiguously into
    /// `coeffs`, which must hold exactly the sum. `sigmaps[i]` receives the
    /// coefficient addresses of segment `i` in ascending order; segment 0
    /// always begins with the full approximation set, so the union of all
    /// maps at a full ladder is the whole address space.
    pub fn decompose(
        &mut self,
        data: &[f64],
        coeffs: &mut [f64],
        counts: &[usize],
        sigmaps: &mut [SignificanceMap],
    ) -> Result<()> {
        let ntotal = self.num_coeffs();
        let mincoeff = self.min_coeffs();
        let keep: usize = counts.iter().sum();
        if counts.is_empty() || counts.len() != sigmaps.len() {
            return Err(WaveletError::InvalidArgument(
                "counts and sigmaps must be non-empty and parallel".to_string(),
            ));
        }
        if counts[0] < mincoeff || keep > ntotal || coeffs.len() != keep {
            return Err(WaveletError::InvalidArgument(format!(
                "bad segment counts {:?} for {} coefficients (min {})",
                counts, ntotal, mincoeff
            )));
        }
        self.plan.decompose(data, &mut self.buf)?;

        // Detail addresses, largest magnitude first; ties break by address
        // so the assignment is deterministic.
        self.order.clear();
        self.order.extend(mincoeff..ntotal);
        let buf = &self.buf;
        self.order.sort_unstable_by(|&a, &b| {
            buf[b]
                .abs()
                .partial_cmp(&buf[a].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        let mut out = 0usize;
        let mut taken = 0usize;
        for (seg, (&count, map)) in counts.iter().zip(sigmaps.iter_mut()).enumerate() {
            map.clear();
            let ndetail = if seg == 0 { count - mincoeff } else { count };
            let mut picked: Vec<usize> = self.order[taken..taken + ndetail].to_vec();
            taken += ndetail;
            if seg == 0 {
                picked.extend(0..mincoeff);
            }
            picked.sort_unstable();
            for addr in picked {
                coeffs[out] = self.buf[addr];
                out += 1;
                map.set(addr)?;
            }
        }
        debug!(
            shape = ?self.dims,
            kept = keep,
            total = ntotal,
            segments = counts.len(),
            "decomposed block"
        );
        Ok(())
    }

    /// Inverse of [`Compressor::decompose`] at a refinement level.
    ///
    /// `coeffs` is the concatenation of the stored segments whose maps are
    /// in `sigmaps` (segment 0 first); unstored coefficients are treated as
    /// zero. `out` must match `dims_at_level(level)`.
    pub fn reconstruct(
        &mut self,
        coeffs: &[f64],
        sigmaps: &[SignificanceMap],
        level: usize,
        out: &mut [f64],
    ) -> Result<()> {
        if sigmaps.is_empty() {
            return Err(WaveletError::InvalidArgument(
                "at least one significance map is required".to_string(),
            ));
        }
        let expect: usize = sigmaps.iter().map(|m| m.num_entries()).sum();
        if coeffs.len() != expect {
            return Err(WaveletError::InvalidArgument(format!(
                "{} coefficients supplied, maps describe {}",
                coeffs.len(),
                expect
            )));
        }
        self.buf.fill(0.0);
        let mut pos = 0usize;
        for map in sigmaps {
            for &addr in map.entries() {
                if addr >= self.buf.len() {
                    return Err(WaveletError::InvalidArgument(format!(
                        "map entry {} out of range",
                        addr
                    )));
                }
                self.buf[addr] = coeffs[pos];
                pos += 1;
            }
        }
        self.plan.reconstruct(&self.buf, level, out)
    }
}

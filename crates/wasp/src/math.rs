//! Coordinate and block arithmetic.
//!
//! All coordinate vectors are slowest-varying first, matching the row-major
//! storage order of the arrays they address.

/// Product of a vector's elements (1 for an empty vector).
pub fn vproduct(v: &[usize]) -> usize {
    v.iter().product()
}

/// Sum of a vector's elements.
pub fn vsum(v: &[usize]) -> usize {
    v.iter().sum()
}

/// Elementwise `a - b`.
pub fn vdiff(a: &[usize], b: &[usize]) -> Vec<usize> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(&x, &y)| x - y).collect()
}

/// Flatten voxel coordinates to a linear offset within `dims`.
pub fn linearize_coords(coords: &[usize], dims: &[usize]) -> usize {
    debug_assert_eq!(coords.len(), dims.len());
    let mut off = 0;
    for (c, d) in coords.iter().zip(dims) {
        debug_assert!(c < d);
        off = off * d + c;
    }
    off
}

/// Inverse of [`linearize_coords`].
pub fn vectorize_coords(mut index: usize, dims: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; dims.len()];
    for d in (0..dims.len()).rev() {
        coords[d] = index % dims[d];
        index /= dims[d];
    }
    coords
}

/// Grow a hyperslab outward to block boundaries. The returned start is the
/// largest block-aligned start not after `start`; the returned count covers
/// through the block containing `start + count - 1`.
pub fn block_align(start: &[usize], count: &[usize], bs: &[usize]) -> (Vec<usize>, Vec<usize>) {
    debug_assert_eq!(start.len(), count.len());
    debug_assert_eq!(start.len(), bs.len());
    let mut astart = Vec::with_capacity(start.len());
    let mut acount = Vec::with_capacity(start.len());
    for i in 0..start.len() {
        debug_assert!(count[i] > 0);
        let s = start[i] - start[i] % bs[i];
        let stop = start[i] + count[i] - 1;
        let astop = stop - stop % bs[i] + bs[i] - 1;
        astart.push(s);
        acount.push(astop - s + 1);
    }
    (astart, acount)
}

/// Split voxel coordinates into block coordinates and the within-block
/// residual.
pub fn to_block_coords(vcoords: &[usize], bs: &[usize]) -> (Vec<usize>, Vec<usize>) {
    debug_assert_eq!(vcoords.len(), bs.len());
    let bcoords = vcoords.iter().zip(bs).map(|(&v, &b)| v / b).collect();
    let residual = vcoords.iter().zip(bs).map(|(&v, &b)| v % b).collect();
    (bcoords, residual)
}

/// Odometer over the block-aligned starts covering a hyperslab, with O(1)
/// random access for interleaved work partitioning.
#[derive(Debug, Clone)]
pub struct VectorInc {
    start: Vec<usize>,
    bs: Vec<usize>,
    steps: Vec<usize>,
}

impl VectorInc {
    /// `start` and `count` must be block-aligned (see [`block_align`]).
    pub fn new(start: &[usize], count: &[usize], bs: &[usize]) -> Self {
        debug_assert!(start.iter().zip(bs).all(|(&s, &b)| s % b == 0));
        debug_assert!(count.iter().zip(bs).all(|(&c, &b)| c % b == 0));
        let steps = count.iter().zip(bs).map(|(&c, &b)| c / b).collect();
        VectorInc {
            start: start.to_vec(),
            bs: bs.to_vec(),
            steps,
        }
    }

    /// Total number of covered blocks.
    pub fn num(&self) -> usize {
        vproduct(&self.steps)
    }

    /// Voxel start of the `i`th block in row-major enumeration order.
    pub fn ith(&self, i: usize) -> Vec<usize> {
        debug_assert!(i < self.num());
        let digits = vectorize_coords(i, &self.steps);
        digits
            .iter()
            .zip(&self.start)
            .zip(&self.bs)
            .map(|((&g, &s), &b)| s + g * b)
            .collect()
    }

    /// Block coordinates (not voxel coordinates) of the `i`th block.
    pub fn ith_block(&self, i: usize) -> Vec<usize> {
        self.ith(i)
            .iter()
            .zip(&self.bs)
            .map(|(&v, &b)| v / b)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linearize_vectorize() {
        let dims = [4usize, 5, 6];
        assert_eq!(linearize_coords(&[0, 0, 0], &dims), 0);
        assert_eq!(linearize_coords(&[1, 2, 3], &dims), 1 * 30 + 2 * 6 + 3);
        for idx in [0usize, 17, 59, 119] {
            assert_eq!(linearize_coords(&vectorize_coords(idx, &dims), &dims), idx);
        }
    }

    #[test]
    fn test_block_align_invariants() {
        let bs = [8usize, 16];
        let (astart, acount) = block_align(&[3, 17], &[10, 20], &bs);
        for i in 0..2 {
            assert!(astart[i] <= [3, 17][i]);
            assert_eq!(astart[i] % bs[i], 0);
            assert_eq!(acount[i] % bs[i], 0);
            assert!(astart[i] + acount[i] >= [3 + 10, 17 + 20][i]);
        }
        assert_eq!(astart, vec![0, 16]);
        assert_eq!(acount, vec![16, 32]);

        // Already aligned input is unchanged.
        let (s, c) = block_align(&[8, 16], &[8, 32], &bs);
        assert_eq!(s, vec![8, 16]);
        assert_eq!(c, vec![8, 32]);
    }

    #[test]
    fn test_to_block_coords() {
        let (b, r) = to_block_coords(&[19, 64], &[8, 64]);
        assert_eq!(b, vec![2, 1]);
        assert_eq!(r, vec![3, 0]);
    }

    #[test]
    fn test_vector_inc_enumerates_all_blocks() {
        let inc = VectorInc::new(&[8, 0], &[16, 32], &[8, 16]);
        assert_eq!(inc.num(), 4);
        let starts: Vec<Vec<usize>> = (0..inc.num()).map(|i| inc.ith(i)).collect();
        assert_eq!(
            starts,
            vec![vec![8, 0], vec![8, 16], vec![16, 0], vec![16, 16]]
        );
        assert_eq!(inc.ith_block(3), vec![2, 1]);
    }
}

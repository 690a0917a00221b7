//! Copying between full arrays and padded blocks.

use container::Element;

use crate::math::{linearize_coords, vproduct};
use crate::padding::{pad_line, PadMode};

/// Extract one block from a full array into `block` (shape `bs`), padding
/// lines that run past the array boundary.
///
/// `start` is the block's voxel origin and must lie inside `dims`. When a
/// mask is given, zero-mask samples are replaced by the arithmetic mean of
/// the valid samples in the block so they do not distort the transform.
/// Returns the (min, max) over valid in-bounds samples; a block with no
/// valid sample reports its first sample as both extremes and substitutes
/// 0.0 everywhere.
pub fn block<E: Element>(
    data: &[E],
    mask: Option<&[u8]>,
    dims: &[usize],
    start: &[usize],
    block: &mut [f64],
    bs: &[usize],
    mode: PadMode,
) -> (f64, f64) {
    let rank = dims.len();
    debug_assert_eq!(start.len(), rank);
    debug_assert_eq!(bs.len(), rank);
    debug_assert_eq!(block.len(), vproduct(bs));

    // Valid (in-bounds) extent of this block along each dimension.
    let vlen: Vec<usize> = (0..rank)
        .map(|d| bs[d].min(dims[d] - start[d]))
        .collect();

    let mut vmin = f64::MAX;
    let mut vmax = f64::MIN;
    let mut sum = 0.0;
    let mut nvalid = 0usize;
    let mut masked: Vec<usize> = Vec::new();

    // Copy the in-bounds region.
    let mut coord = vec![0usize; rank];
    let nregion = vproduct(&vlen);
    for _ in 0..nregion {
        let vcoord: Vec<usize> = coord.iter().zip(start).map(|(&c, &s)| c + s).collect();
        let src = linearize_coords(&vcoord, dims);
        let dst = linearize_coords(&coord, bs);
        let v = data[src].to_f64();
        block[dst] = v;
        let valid = mask.map_or(true, |m| m[src] != 0);
        if valid {
            vmin = vmin.min(v);
            vmax = vmax.max(v);
            sum += v;
            nvalid += 1;
        } else {
            masked.push(dst);
        }
        for d in (0..rank).rev() {
            coord[d] += 1;
            if coord[d] < vlen[d] {
                break;
            }
            coord[d] = 0;
        }
    }

    let mean = if nvalid > 0 { sum / nvalid as f64 } else { 0.0 };
    if nvalid == 0 {
        let first = data[linearize_coords(start, dims)].to_f64();
        vmin = first;
        vmax = first;
    }
    for dst in masked {
        block[dst] = mean;
    }

    // Pad boundary lines, fastest-varying dimension first; lines along
    // earlier dimensions then run over already-padded slots.
    for axis in (0..rank).rev() {
        if vlen[axis] == bs[axis] {
            continue;
        }
        let stride: usize = bs[axis + 1..].iter().product();
        let outer_dims: Vec<usize> = (0..rank)
            .filter(|&d| d != axis)
            .map(|d| if d > axis { bs[d] } else { vlen[d] })
            .collect();
        let mut oc = vec![0usize; outer_dims.len()];
        for _ in 0..vproduct(&outer_dims) {
            let mut full = vec![0usize; rank];
            let mut k = 0;
            for d in 0..rank {
                if d != axis {
                    full[d] = oc[k];
                    k += 1;
                }
            }
            let base = linearize_coords(&full, bs);
            pad_line(mode, &mut block[base..], vlen[axis], bs[axis], stride);
            for d in (0..outer_dims.len()).rev() {
                oc[d] += 1;
                if oc[d] < outer_dims[d] {
                    break;
                }
                oc[d] = 0;
            }
        }
    }

    (vmin, vmax)
}

/// Scatter one block (shape `bs`, voxel origin `start`) into a destination
/// array of shape `dims` whose voxel origin is `origin`. Only the
/// intersection is written, so boundary padding and out-of-request samples
/// are discarded.
pub fn unblock<E: Element>(
    block: &[f64],
    bs: &[usize],
    data: &mut [E],
    dims: &[usize],
    origin: &[usize],
    start: &[usize],
) {
    let rank = dims.len();
    debug_assert_eq!(block.len(), vproduct(bs));

    let mut coord = vec![0usize; rank];
    for src in 0..block.len() {
        let mut inside = true;
        let mut dcoord = vec![0usize; rank];
        for d in 0..rank {
            let v = start[d] + coord[d];
            if v < origin[d] || v - origin[d] >= dims[d] {
                inside = false;
                break;
            }
            dcoord[d] = v - origin[d];
        }
        if inside {
            data[linearize_coords(&dcoord, dims)] = E::from_f64(block[src]);
        }
        for d in (0..rank).rev() {
            coord[d] += 1;
            if coord[d] < bs[d] {
                break;
            }
            coord[d] = 0;
        }
    }
}

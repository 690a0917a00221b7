//! Per-block storage: moving encoded blocks in and out of the container
//! files.
//!
//! A compressed variable `v` of rank `r` is stored as one container variable
//! per ladder segment, named `v.lod<j>`, with shape
//! `[v.nb0, …, v.nb<r-1>, v.lod<j>.n]`. Each block's slab holds, in the
//! variable's external type: a two-element min/max header (segment 0 only),
//! the segment's coefficients, and the segment's significance map bytes
//! packed into whole elements. The map bytes are word-swapped to big-endian
//! order on little-endian hosts; the last segment of a ladder ending in
//! ratio 1 stores no map at all, as the reader can rebuild it as the
//! complement of the earlier ones.
//!
//! An uncompressed blocked variable (no wavelet) stores a single segment
//! holding each block's raw samples, with no header and no map.

use container::{Container, Element};
use wavelet::{Compressor, SignificanceMap};

use crate::error::{Result, WaspError};

/// Container-variable name of ladder segment `seg` of `var`.
pub fn seg_var_name(var: &str, seg: usize) -> String {
    format!("{}.lod{}", var, seg)
}

/// Name of the block-count dimension of `var` along `axis`.
pub fn nb_dim_name(var: &str, axis: usize) -> String {
    format!("{}.nb{}", var, axis)
}

/// Name of the encoded-length dimension of segment `seg` of `var`.
pub fn coeff_dim_name(var: &str, seg: usize) -> String {
    format!("{}.lod{}.n", var, seg)
}

/// Which container file holds segment `seg`.
pub fn file_index(seg: usize, numfiles: usize) -> usize {
    seg.min(numfiles - 1)
}

/// Whether segment `seg` stores a significance map.
pub fn has_map(seg: usize, cratios: &[usize]) -> bool {
    cratios[seg] != 1
}

/// Serialized significance-map size in bytes for segment `seg`.
pub fn map_bytes(compressor: &Compressor, counts: &[usize], seg: usize) -> usize {
    compressor.sig_map_size(counts[seg])
}

/// Encoded slab length of segment `seg`, in elements of size `esz`: the
/// min/max header (segment 0 only), the coefficients, and the map bytes
/// rounded up to whole elements.
pub fn encoded_len(
    compressor: &Compressor,
    counts: &[usize],
    cratios: &[usize],
    seg: usize,
    esz: usize,
) -> usize {
    let hdr = if seg == 0 { 2 } else { 0 };
    let map = if has_map(seg, cratios) {
        map_bytes(compressor, counts, seg).div_ceil(esz)
    } else {
        0
    };
    hdr + counts[seg] + map
}

/// Reverse the bytes of every `word`-sized group in `buf`.
pub fn swap_bytes(buf: &mut [u8], word: usize) {
    if word <= 1 {
        return;
    }
    for chunk in buf.chunks_exact_mut(word) {
        chunk.reverse();
    }
}

/// Pack raw map bytes into whole elements, swapping to big-endian word
/// order on little-endian hosts.
fn map_to_elements<E: Element>(bytes: &[u8]) -> Vec<E> {
    let esz = std::mem::size_of::<E>();
    let nwords = bytes.len().div_ceil(esz);
    let mut padded = bytes.to_vec();
    padded.resize(nwords * esz, 0);
    if cfg!(target_endian = "little") {
        swap_bytes(&mut padded, esz);
    }
    let mut words = vec![E::zeroed(); nwords];
    bytemuck::cast_slice_mut::<E, u8>(&mut words).copy_from_slice(&padded);
    words
}

/// Inverse of [`map_to_elements`]: recover `nbytes` of raw map bytes.
fn elements_to_map<E: Element>(words: &[E], nbytes: usize) -> Vec<u8> {
    let esz = std::mem::size_of::<E>();
    let mut bytes = bytemuck::cast_slice::<E, u8>(words).to_vec();
    if cfg!(target_endian = "little") {
        swap_bytes(&mut bytes, esz);
    }
    bytes.truncate(nbytes);
    bytes
}

/// Write one encoded block: ladder segments `0..counts.len()`, coefficients
/// concatenated in `coeffs`, one map per segment.
#[allow(clippy::too_many_arguments)]
pub fn store_block<E: Element>(
    files: &[Container],
    var: &str,
    bcoords: &[usize],
    compressor: &Compressor,
    counts: &[usize],
    cratios: &[usize],
    coeffs: &[f64],
    maps: &[SignificanceMap],
    range: (f64, f64),
) -> Result<()> {
    let esz = std::mem::size_of::<E>();
    let rank = bcoords.len();
    let mut pos = 0usize;
    for seg in 0..counts.len() {
        let enc = encoded_len(compressor, counts, cratios, seg, esz);
        let mut slab: Vec<E> = Vec::with_capacity(enc);
        if seg == 0 {
            slab.push(E::from_f64(range.0));
            slab.push(E::from_f64(range.1));
        }
        for &c in &coeffs[pos..pos + counts[seg]] {
            slab.push(E::from_f64(c));
        }
        pos += counts[seg];
        if has_map(seg, cratios) {
            slab.extend(map_to_elements::<E>(&maps[seg].encode()));
        }
        debug_assert_eq!(slab.len(), enc);

        let mut start = bcoords.to_vec();
        start.push(0);
        let mut count = vec![1; rank];
        count.push(enc);
        let file = &files[file_index(seg, files.len())];
        file.put_vara(&seg_var_name(var, seg), &start, &count, &slab)?;
    }
    Ok(())
}

/// Write one raw block of an uncompressed blocked variable: the block
/// samples in the variable's external type, no header, no maps.
pub fn store_block_plain<E: Element>(
    files: &[Container],
    var: &str,
    bcoords: &[usize],
    blk: &[f64],
) -> Result<()> {
    let rank = bcoords.len();
    let mut slab: Vec<E> = Vec::with_capacity(blk.len());
    for &v in blk {
        slab.push(E::from_f64(v));
    }
    let mut start = bcoords.to_vec();
    start.push(0);
    let mut count = vec![1; rank];
    count.push(blk.len());
    files[0].put_vara(&seg_var_name(var, 0), &start, &count, &slab)?;
    Ok(())
}

/// Read one raw block of an uncompressed blocked variable into `blk`.
pub fn fetch_block_plain<E: Element>(
    files: &[Container],
    var: &str,
    bcoords: &[usize],
    blk: &mut [f64],
) -> Result<()> {
    let rank = bcoords.len();
    let mut slab = vec![E::zeroed(); blk.len()];
    let mut start = bcoords.to_vec();
    start.push(0);
    let mut count = vec![1; rank];
    count.push(blk.len());
    files[0].get_vara(&seg_var_name(var, 0), &start, &count, &mut slab)?;
    for (d, v) in blk.iter_mut().zip(&slab) {
        *d = v.to_f64();
    }
    Ok(())
}

/// Read one encoded block back: segments `0..=lod`, returning the
/// concatenated coefficients, the per-segment maps (rebuilding the mapless
/// ratio-1 segment), and the stored data range.
pub fn fetch_block<E: Element>(
    files: &[Container],
    var: &str,
    bcoords: &[usize],
    compressor: &Compressor,
    counts: &[usize],
    cratios: &[usize],
    lod: usize,
) -> Result<(Vec<f64>, Vec<SignificanceMap>, (f64, f64))> {
    let esz = std::mem::size_of::<E>();
    let rank = bcoords.len();
    let mut coeffs = Vec::new();
    let mut maps: Vec<SignificanceMap> = Vec::with_capacity(lod + 1);
    let mut range = (f64::MIN, f64::MAX);
    for seg in 0..=lod {
        let enc = encoded_len(compressor, counts, cratios, seg, esz);
        let mut slab = vec![E::zeroed(); enc];
        let mut start = bcoords.to_vec();
        start.push(0);
        let mut count = vec![1; rank];
        count.push(enc);
        let file = &files[file_index(seg, files.len())];
        file.get_vara(&seg_var_name(var, seg), &start, &count, &mut slab)?;

        let mut off = 0usize;
        if seg == 0 {
            range = (slab[0].to_f64(), slab[1].to_f64());
            off = 2;
        }
        coeffs.extend(slab[off..off + counts[seg]].iter().map(|v| v.to_f64()));
        off += counts[seg];

        let map = if has_map(seg, cratios) {
            let nbytes = map_bytes(compressor, counts, seg);
            let bytes = elements_to_map::<E>(&slab[off..], nbytes);
            SignificanceMap::decode(&bytes).map_err(WaspError::Wavelet)?
        } else {
            // Ratio-1 segments keep everything the earlier ones did not.
            let mut m = SignificanceMap::new(&[compressor.num_coeffs()]);
            for prev in &maps {
                m.append(prev);
            }
            m.sort();
            m.invert();
            m
        };
        maps.push(map);
    }
    Ok((coeffs, maps, range))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavelet::Wavelet;

    #[test]
    fn test_swap_bytes() {
        let mut buf = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        swap_bytes(&mut buf, 4);
        assert_eq!(buf, vec![4, 3, 2, 1, 8, 7, 6, 5]);
        swap_bytes(&mut buf, 4);
        assert_eq!(buf, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let mut buf = vec![9u8, 9];
        swap_bytes(&mut buf, 1);
        assert_eq!(buf, vec![9, 9]);
    }

    #[test]
    fn test_map_element_packing_roundtrip() {
        let mut m = SignificanceMap::new(&[512]);
        for idx in [0usize, 5, 100, 511] {
            m.set(idx).unwrap();
        }
        let bytes = m.encode();
        let words = map_to_elements::<f32>(&bytes);
        let back = elements_to_map::<f32>(&words, bytes.len());
        assert_eq!(back, bytes);
        let decoded = SignificanceMap::decode(&back).unwrap();
        assert_eq!(decoded.entries(), m.entries());
    }

    #[test]
    fn test_encoded_len_header_and_map_rules() {
        let c = Compressor::new(&[64, 64], Wavelet::Bior4_4).unwrap();
        let counts = c.encoding_counts(&[16, 1]).unwrap();
        let esz = 4usize;

        let e0 = encoded_len(&c, &counts, &[16, 1], 0, esz);
        let m0 = c.sig_map_size(counts[0]).div_ceil(esz);
        assert_eq!(e0, 2 + counts[0] + m0);

        // The trailing ratio-1 segment has neither header nor map.
        let e1 = encoded_len(&c, &counts, &[16, 1], 1, esz);
        assert_eq!(e1, counts[1]);
    }

    #[test]
    fn test_naming() {
        assert_eq!(seg_var_name("temp", 2), "temp.lod2");
        assert_eq!(nb_dim_name("temp", 0), "temp.nb0");
        assert_eq!(coeff_dim_name("temp", 1), "temp.lod1.n");
        assert_eq!(file_index(0, 1), 0);
        assert_eq!(file_index(3, 1), 0);
        assert_eq!(file_index(3, 4), 3);
    }
}

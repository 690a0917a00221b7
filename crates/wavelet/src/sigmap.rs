//! Significance maps: compact sets of coefficient addresses.
//!
//! A map records which coefficient indices of an array were kept at a given
//! compression level. On disk it is a small header of big-endian 64-bit
//! words followed by the indices bit-packed MSB-first, each at the minimum
//! width for the address space.

use crate::error::{Result, WaveletError};

const MAGIC: [u8; 3] = [b'c'; 3];
const VERSION: u8 = 1;

/// A set of significant coefficient indices over a fixed address space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignificanceMap {
    dims: Vec<usize>,
    size: usize,
    entries: Vec<usize>,
    sorted: bool,
}

/// Bits needed to address `size` values, at least one.
fn index_bits(size: usize) -> usize {
    let mut bits = 1;
    while (1usize << bits) < size {
        bits += 1;
    }
    bits
}

impl SignificanceMap {
    /// An empty map over an array of the given shape.
    pub fn new(dims: &[usize]) -> Self {
        SignificanceMap {
            dims: dims.to_vec(),
            size: dims.iter().product(),
            entries: Vec::new(),
            sorted: true,
        }
    }

    /// The address-space shape.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of addressable coefficients.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of recorded entries.
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// The entries in insertion order (sorted unless `set` was called with
    /// descending indices and `sort` has not run since).
    pub fn entries(&self) -> &[usize] {
        &self.entries
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.sorted = true;
    }

    /// Record index `idx` as significant.
    pub fn set(&mut self, idx: usize) -> Result<()> {
        if idx >= self.size {
            return Err(WaveletError::InvalidArgument(format!(
                "index {} out of range for map of size {}",
                idx, self.size
            )));
        }
        if let Some(&last) = self.entries.last() {
            if idx < last {
                self.sorted = false;
            }
        }
        self.entries.push(idx);
        Ok(())
    }

    /// Whether `idx` is recorded.
    pub fn test(&self, idx: usize) -> bool {
        if self.sorted {
            self.entries.binary_search(&idx).is_ok()
        } else {
            self.entries.contains(&idx)
        }
    }

    /// Append every entry of `other`. The result is unsorted in general.
    pub fn append(&mut self, other: &SignificanceMap) {
        for &e in &other.entries {
            if let Some(&last) = self.entries.last() {
                if e < last {
                    self.sorted = false;
                }
            }
            self.entries.push(e);
        }
    }

    /// Sort entries ascending and drop duplicates.
    pub fn sort(&mut self) {
        self.entries.sort_unstable();
        self.entries.dedup();
        self.sorted = true;
    }

    /// Replace the entries with their complement over the address space.
    /// The receiver must be sorted.
    pub fn invert(&mut self) {
        debug_assert!(self.sorted);
        let mut inverted = Vec::with_capacity(self.size - self.entries.len());
        let mut it = self.entries.iter().copied().peekable();
        for idx in 0..self.size {
            if it.peek() == Some(&idx) {
                it.next();
            } else {
                inverted.push(idx);
            }
        }
        self.entries = inverted;
        self.sorted = true;
    }

    /// Serialized size in bytes of a map over `dims` holding `nentries`.
    pub fn encoded_size(dims: &[usize], nentries: usize) -> usize {
        let size: usize = dims.iter().product();
        let header = MAGIC.len() + 1 + 8 * (2 + dims.len());
        header + (nentries * index_bits(size)).div_ceil(8)
    }

    /// Serialize to the on-disk byte form.
    pub fn encode(&self) -> Vec<u8> {
        let bits = index_bits(self.size);
        let mut out = Vec::with_capacity(Self::encoded_size(&self.dims, self.entries.len()));
        out.extend_from_slice(&MAGIC);
        out.push(VERSION);
        out.extend_from_slice(&(self.entries.len() as u64).to_be_bytes());
        out.extend_from_slice(&(self.dims.len() as u64).to_be_bytes());
        for &d in &self.dims {
            out.extend_from_slice(&(d as u64).to_be_bytes());
        }
        // MSB-first bit packing.
        let mut acc: u64 = 0;
        let mut nacc = 0usize;
        for &e in &self.entries {
            acc = (acc << bits) | e as u64;
            nacc += bits;
            while nacc >= 8 {
                out.push((acc >> (nacc - 8)) as u8);
                nacc -= 8;
            }
        }
        if nacc > 0 {
            out.push(((acc << (8 - nacc)) & 0xff) as u8);
        }
        out
    }

    /// Parse the on-disk byte form.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let word = |off: usize| -> Result<u64> {
            let chunk = bytes
                .get(off..off + 8)
                .ok_or_else(|| WaveletError::InvalidMap("truncated header".to_string()))?;
            Ok(u64::from_be_bytes(chunk.try_into().unwrap()))
        };
        if bytes.len() < 4 || bytes[..3] != MAGIC {
            return Err(WaveletError::InvalidMap("bad magic".to_string()));
        }
        if bytes[3] != VERSION {
            return Err(WaveletError::InvalidMap(format!(
                "unsupported version {}",
                bytes[3]
            )));
        }
        let nentries = word(4)? as usize;
        let ndims = word(12)? as usize;
        if ndims == 0 || ndims > 255 {
            return Err(WaveletError::InvalidMap(format!("bad rank {}", ndims)));
        }
        let mut dims = Vec::with_capacity(ndims);
        for i in 0..ndims {
            dims.push(word(20 + 8 * i)? as usize);
        }
        let size: usize = dims.iter().product();
        let bits = index_bits(size);
        let data = &bytes[20 + 8 * ndims..];
        let need = nentries
            .checked_mul(bits)
            .ok_or_else(|| WaveletError::InvalidMap("entry count overflow".to_string()))?;
        if data.len() * 8 < need {
            return Err(WaveletError::InvalidMap("truncated entries".to_string()));
        }
        let mut entries = Vec::with_capacity(nentries);
        let mut acc: u64 = 0;
        let mut nacc = 0usize;
        let mut pos = 0usize;
        for _ in 0..nentries {
            while nacc < bits {
                acc = (acc << 8) | u64::from(data[pos]);
                pos += 1;
                nacc += 8;
            }
            let e = ((acc >> (nacc - bits)) & ((1u64 << bits) - 1)) as usize;
            nacc -= bits;
            if e >= size {
                return Err(WaveletError::InvalidMap(format!(
                    "entry {} out of range for size {}",
                    e, size
                )));
            }
            entries.push(e);
        }
        let sorted = entries.windows(2).all(|w| w[0] <= w[1]);
        Ok(SignificanceMap {
            dims,
            size,
            entries,
            sorted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_test_sort() {
        let mut m = SignificanceMap::new(&[8, 8]);
        m.set(5).unwrap();
        m.set(63).unwrap();
        m.set(2).unwrap();
        assert_eq!(m.num_entries(), 3);
        assert!(m.test(5));
        assert!(!m.test(6));
        m.sort();
        assert_eq!(m.entries(), &[2, 5, 63]);
        assert!(m.set(64).is_err());
    }

    #[test]
    fn test_encode_decode() {
        let mut m = SignificanceMap::new(&[4, 4, 4]);
        for idx in [0usize, 1, 17, 33, 63] {
            m.set(idx).unwrap();
        }
        let bytes = m.encode();
        assert_eq!(bytes.len(), SignificanceMap::encoded_size(&[4, 4, 4], 5));
        let back = SignificanceMap::decode(&bytes).unwrap();
        assert_eq!(back.dims(), &[4, 4, 4]);
        assert_eq!(back.entries(), m.entries());
    }

    #[test]
    fn test_encode_is_big_endian() {
        let mut m = SignificanceMap::new(&[256]);
        m.set(1).unwrap();
        let bytes = m.encode();
        // nentries word.
        assert_eq!(&bytes[4..12], &[0, 0, 0, 0, 0, 0, 0, 1]);
        // ndims word.
        assert_eq!(&bytes[12..20], &[0, 0, 0, 0, 0, 0, 0, 1]);
        // dim word.
        assert_eq!(&bytes[20..28], &[0, 0, 0, 0, 0, 0, 1, 0]);
        // One 8-bit index, MSB-first.
        assert_eq!(bytes[28], 1);
    }

    #[test]
    fn test_append_sort_invert_rebuilds_complement() {
        let mut kept = SignificanceMap::new(&[16]);
        for idx in [3usize, 7, 9] {
            kept.set(idx).unwrap();
        }
        let mut more = SignificanceMap::new(&[16]);
        for idx in [1usize, 9, 12] {
            more.set(idx).unwrap();
        }
        kept.append(&more);
        kept.sort();
        kept.invert();
        assert_eq!(kept.entries(), &[0, 2, 4, 5, 6, 8, 10, 11, 13, 14, 15]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(SignificanceMap::decode(b"xyz").is_err());
        assert!(SignificanceMap::decode(b"ccc\x09rest").is_err());
        let mut m = SignificanceMap::new(&[64]);
        m.set(10).unwrap();
        let mut bytes = m.encode();
        bytes.truncate(bytes.len() - 1);
        assert!(SignificanceMap::decode(&bytes).is_err());
    }
}

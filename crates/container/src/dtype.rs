//! External element types supported by container variables.

use serde::{Deserialize, Serialize};

/// On-disk element type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    /// Unsigned 8-bit integer.
    Uint8,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// IEEE 754 single precision.
    Float,
    /// IEEE 754 double precision.
    Double,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_of(self) -> usize {
        match self {
            DType::Uint8 => 1,
            DType::Int32 => 4,
            DType::Int64 => 8,
            DType::Float => 4,
            DType::Double => 8,
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DType::Uint8 => write!(f, "uint8"),
            DType::Int32 => write!(f, "int32"),
            DType::Int64 => write!(f, "int64"),
            DType::Float => write!(f, "float32"),
            DType::Double => write!(f, "float64"),
        }
    }
}

/// A plain-old-data element type a variable can be read or written as.
///
/// The closed set of implementors mirrors [`DType`]; conversion between
/// in-memory and on-disk types goes through `f64`.
pub trait Element: bytemuck::Pod + PartialOrd + Copy + Send + Sync + 'static {
    /// The on-disk type this element maps to directly.
    const DTYPE: DType;

    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
}

impl Element for u8 {
    const DTYPE: DType = DType::Uint8;

    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v.round().clamp(u8::MIN as f64, u8::MAX as f64) as u8
    }
}

impl Element for i32 {
    const DTYPE: DType = DType::Int32;

    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32
    }
}

impl Element for i64 {
    const DTYPE: DType = DType::Int64;

    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v.round() as i64
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::Float;

    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::Double;

    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
}

/// Convert a typed slice to raw bytes in the given on-disk type.
pub(crate) fn encode_elements<E: Element>(data: &[E], dtype: DType) -> Vec<u8> {
    if E::DTYPE == dtype {
        return bytemuck::cast_slice(data).to_vec();
    }
    let mut out = Vec::with_capacity(data.len() * dtype.size_of());
    for &v in data {
        let v = v.to_f64();
        match dtype {
            DType::Uint8 => out.push(u8::from_f64(v)),
            DType::Int32 => out.extend_from_slice(&i32::from_f64(v).to_ne_bytes()),
            DType::Int64 => out.extend_from_slice(&i64::from_f64(v).to_ne_bytes()),
            DType::Float => out.extend_from_slice(&f32::from_f64(v).to_ne_bytes()),
            DType::Double => out.extend_from_slice(&v.to_ne_bytes()),
        }
    }
    out
}

/// Convert raw bytes in the given on-disk type to a typed slice.
pub(crate) fn decode_elements<E: Element>(bytes: &[u8], dtype: DType, out: &mut [E]) {
    if E::DTYPE == dtype {
        out.copy_from_slice(bytemuck::cast_slice(bytes));
        return;
    }
    let esz = dtype.size_of();
    for (i, chunk) in bytes.chunks_exact(esz).enumerate() {
        let v = match dtype {
            DType::Uint8 => chunk[0] as f64,
            DType::Int32 => i32::from_ne_bytes(chunk.try_into().unwrap()) as f64,
            DType::Int64 => i64::from_ne_bytes(chunk.try_into().unwrap()) as f64,
            DType::Float => f32::from_ne_bytes(chunk.try_into().unwrap()) as f64,
            DType::Double => f64::from_ne_bytes(chunk.try_into().unwrap()),
        };
        out[i] = E::from_f64(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_sizes() {
        assert_eq!(DType::Uint8.size_of(), 1);
        assert_eq!(DType::Int32.size_of(), 4);
        assert_eq!(DType::Int64.size_of(), 8);
        assert_eq!(DType::Float.size_of(), 4);
        assert_eq!(DType::Double.size_of(), 8);
    }

    #[test]
    fn test_encode_decode_same_type() {
        let data = vec![1.5f32, -2.25, 3.0];
        let bytes = encode_elements(&data, DType::Float);
        let mut back = vec![0.0f32; 3];
        decode_elements(&bytes, DType::Float, &mut back);
        assert_eq!(back, data);
    }

    #[test]
    fn test_encode_decode_converting() {
        let data = vec![1.0f64, 2.0, 3.0];
        let bytes = encode_elements(&data, DType::Float);
        assert_eq!(bytes.len(), 12);
        let mut back = vec![0.0f64; 3];
        decode_elements(&bytes, DType::Float, &mut back);
        assert_eq!(back, data);
    }

    #[test]
    fn test_integer_rounding() {
        assert_eq!(i32::from_f64(2.6), 3);
        assert_eq!(u8::from_f64(-4.0), 0);
        assert_eq!(u8::from_f64(300.0), 255);
    }
}

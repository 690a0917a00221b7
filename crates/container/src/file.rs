//! The container file proper: creation, opening, and hyperslab access.
//!
//! Layout on disk is an 8-byte magic, a data region holding each variable's
//! elements contiguously in row-major order, the JSON header document, and a
//! 16-byte trailer (`header_len` as little-endian u64 followed by the magic
//! again). Appending a variable places its data at the current end of the
//! data region and rewrites the header behind it on the next flush.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::dtype::{decode_elements, encode_elements, DType, Element};
use crate::error::{ContainerError, Result};
use crate::header::{AttrValue, DimDef, Header, VarDef};

const MAGIC: &[u8; 8] = b"\x89ARR\r\n\x1a\n";
const TRAILER_LEN: u64 = 16;

/// A self-describing array container file.
///
/// Metadata mutation (`def_dim`, `def_var`, `put_att`) requires `&mut self`;
/// element I/O goes through positioned reads and writes and only needs
/// `&self`, so a container can be shared across threads once its variables
/// are defined.
#[derive(Debug)]
pub struct Container {
    path: PathBuf,
    file: File,
    header: Header,
    writable: bool,
    dirty: bool,
}

impl Container {
    /// Create a new, empty container file, truncating any existing file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all_at(MAGIC, 0)?;
        debug!(path = %path.display(), "created container");
        Ok(Container {
            path,
            file,
            header: Header {
                data_end: MAGIC.len() as u64,
                ..Header::default()
            },
            writable: true,
            dirty: true,
        })
    }

    /// Open an existing container file.
    pub fn open<P: AsRef<Path>>(path: P, writable: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(writable).open(&path)?;
        let flen = file.metadata()?.len();
        if flen < MAGIC.len() as u64 + TRAILER_LEN {
            return Err(ContainerError::InvalidFormat(format!(
                "{}: file too short",
                path.display()
            )));
        }
        let mut magic = [0u8; 8];
        file.read_exact_at(&mut magic, 0)?;
        if &magic != MAGIC {
            return Err(ContainerError::InvalidFormat(format!(
                "{}: bad magic",
                path.display()
            )));
        }
        let mut trailer = [0u8; 16];
        file.read_exact_at(&mut trailer, flen - TRAILER_LEN)?;
        if &trailer[8..16] != MAGIC {
            return Err(ContainerError::InvalidFormat(format!(
                "{}: bad trailer",
                path.display()
            )));
        }
        let hdr_len = u64::from_le_bytes(trailer[0..8].try_into().unwrap());
        if hdr_len > flen - MAGIC.len() as u64 - TRAILER_LEN {
            return Err(ContainerError::InvalidFormat(format!(
                "{}: header length out of range",
                path.display()
            )));
        }
        let mut hdr_bytes = vec![0u8; hdr_len as usize];
        file.read_exact_at(&mut hdr_bytes, flen - TRAILER_LEN - hdr_len)?;
        let header: Header = serde_json::from_slice(&hdr_bytes)?;
        debug!(
            path = %path.display(),
            nvars = header.vars.len(),
            writable,
            "opened container"
        );
        Ok(Container {
            path,
            file,
            header,
            writable,
            dirty: false,
        })
    }

    /// The path this container was created or opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the container accepts definitions and writes.
    pub fn writable(&self) -> bool {
        self.writable
    }

    fn check_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(ContainerError::ReadOnly(self.path.display().to_string()));
        }
        Ok(())
    }

    /// Define a named dimension.
    pub fn def_dim(&mut self, name: &str, len: usize) -> Result<()> {
        self.check_writable()?;
        if self.header.dim(name).is_some() {
            return Err(ContainerError::AlreadyDefined(name.to_string()));
        }
        self.header.dims.push(DimDef {
            name: name.to_string(),
            len,
        });
        self.dirty = true;
        Ok(())
    }

    /// Length of a named dimension.
    pub fn dim_len(&self, name: &str) -> Result<usize> {
        self.header
            .dim(name)
            .map(|d| d.len)
            .ok_or_else(|| ContainerError::UndefinedDim(name.to_string()))
    }

    /// Names of all defined dimensions, in definition order.
    pub fn dim_names(&self) -> Vec<String> {
        self.header.dims.iter().map(|d| d.name.clone()).collect()
    }

    /// Define a variable over previously defined dimensions. Its data region
    /// is reserved at the current end of data; elements are zero until
    /// written.
    pub fn def_var(&mut self, name: &str, dtype: DType, dimnames: &[&str]) -> Result<()> {
        self.check_writable()?;
        if self.header.var(name).is_some() {
            return Err(ContainerError::AlreadyDefined(name.to_string()));
        }
        let mut dims = Vec::with_capacity(dimnames.len());
        for dn in dimnames {
            dims.push(self.dim_len(dn)?);
        }
        let nelem: usize = dims.iter().product();
        let nbytes = nelem as u64 * dtype.size_of() as u64;
        let offset = self.header.data_end;
        debug!(var = name, %dtype, ?dims, offset, "defined variable");
        self.header.vars.push(VarDef {
            name: name.to_string(),
            dtype,
            dimnames: dimnames.iter().map(|s| s.to_string()).collect(),
            dims,
            attrs: Default::default(),
            offset,
        });
        self.header.data_end = offset + nbytes;
        // The reserved region may overlap a stale header from a previous
        // flush; zero it so unwritten elements read back as zeros.
        let old_len = self.file.metadata()?.len();
        self.file.set_len(self.header.data_end)?;
        if old_len > offset {
            let zeros = vec![0u8; 64 * 1024];
            let mut pos = offset;
            let end = old_len.min(self.header.data_end);
            while pos < end {
                let n = ((end - pos) as usize).min(zeros.len());
                self.file.write_all_at(&zeros[..n], pos)?;
                pos += n as u64;
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Whether a variable with this name is defined.
    pub fn var_exists(&self, name: &str) -> bool {
        self.header.var(name).is_some()
    }

    /// Names of all defined variables, in definition order.
    pub fn var_names(&self) -> Vec<String> {
        self.header.vars.iter().map(|v| v.name.clone()).collect()
    }

    /// Dimension lengths of a variable.
    pub fn var_dims(&self, name: &str) -> Result<Vec<usize>> {
        Ok(self.var(name)?.dims.clone())
    }

    /// Dimension names of a variable.
    pub fn var_dim_names(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.var(name)?.dimnames.clone())
    }

    /// On-disk element type of a variable.
    pub fn var_dtype(&self, name: &str) -> Result<DType> {
        Ok(self.var(name)?.dtype)
    }

    fn var(&self, name: &str) -> Result<&VarDef> {
        self.header
            .var(name)
            .ok_or_else(|| ContainerError::UndefinedVar(name.to_string()))
    }

    /// Attach an attribute to a variable, or to the container itself when
    /// `varname` is empty.
    pub fn put_att(&mut self, varname: &str, att: &str, value: AttrValue) -> Result<()> {
        self.check_writable()?;
        if varname.is_empty() {
            self.header.attrs.insert(att.to_string(), value);
        } else {
            let var = self
                .header
                .var_mut(varname)
                .ok_or_else(|| ContainerError::UndefinedVar(varname.to_string()))?;
            var.attrs.insert(att.to_string(), value);
        }
        self.dirty = true;
        Ok(())
    }

    /// Look up an attribute on a variable, or a global attribute when
    /// `varname` is empty.
    pub fn get_att(&self, varname: &str, att: &str) -> Result<Option<&AttrValue>> {
        if varname.is_empty() {
            Ok(self.header.attrs.get(att))
        } else {
            Ok(self.var(varname)?.attrs.get(att))
        }
    }

    /// Names of all attributes on a variable (or global when empty).
    pub fn att_names(&self, varname: &str) -> Result<Vec<String>> {
        let attrs = if varname.is_empty() {
            &self.header.attrs
        } else {
            &self.var(varname)?.attrs
        };
        Ok(attrs.keys().cloned().collect())
    }

    /// Write a hyperslab of elements to a variable. `data` is row-major with
    /// shape `count` and must hold exactly `product(count)` elements; type
    /// conversion to the variable's on-disk type is applied as needed.
    pub fn put_vara<E: Element>(
        &self,
        name: &str,
        start: &[usize],
        count: &[usize],
        data: &[E],
    ) -> Result<()> {
        self.check_writable()?;
        let var = self.var(name)?;
        check_slab(var, start, count, data.len())?;
        let esz = var.dtype.size_of();
        let run = run_len(count);
        let mut src = 0;
        for elem_off in SlabRuns::new(&var.dims, start, count) {
            let bytes = encode_elements(&data[src..src + run], var.dtype);
            self.file
                .write_all_at(&bytes, var.offset + (elem_off * esz) as u64)?;
            src += run;
        }
        Ok(())
    }

    /// Read a hyperslab of elements from a variable into `data`, converting
    /// from the on-disk type as needed.
    pub fn get_vara<E: Element>(
        &self,
        name: &str,
        start: &[usize],
        count: &[usize],
        data: &mut [E],
    ) -> Result<()> {
        let var = self.var(name)?;
        check_slab(var, start, count, data.len())?;
        let esz = var.dtype.size_of();
        let run = run_len(count);
        let mut buf = vec![0u8; run * esz];
        let mut dst = 0;
        for elem_off in SlabRuns::new(&var.dims, start, count) {
            self.file
                .read_exact_at(&mut buf, var.offset + (elem_off * esz) as u64)?;
            decode_elements(&buf, var.dtype, &mut data[dst..dst + run]);
            dst += run;
        }
        Ok(())
    }

    /// Write an entire variable.
    pub fn put_var<E: Element>(&self, name: &str, data: &[E]) -> Result<()> {
        let dims = self.var(name)?.dims.clone();
        let start = vec![0; dims.len()];
        self.put_vara(name, &start, &dims, data)
    }

    /// Read an entire variable.
    pub fn get_var<E: Element>(&self, name: &str, data: &mut [E]) -> Result<()> {
        let dims = self.var(name)?.dims.clone();
        let start = vec![0; dims.len()];
        self.get_vara(name, &start, &dims, data)
    }

    /// Persist the header and trailer. A no-op when nothing changed.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.check_writable()?;
        let hdr_bytes = serde_json::to_vec(&self.header)?;
        let mut tail = hdr_bytes;
        let hdr_len = tail.len() as u64;
        tail.extend_from_slice(&hdr_len.to_le_bytes());
        tail.extend_from_slice(MAGIC);
        self.file.write_all_at(&tail, self.header.data_end)?;
        self.file
            .set_len(self.header.data_end + tail.len() as u64)?;
        self.file.sync_data()?;
        self.dirty = false;
        Ok(())
    }

    /// Flush and close the container.
    pub fn close(mut self) -> Result<()> {
        if self.writable {
            self.flush()?;
        }
        Ok(())
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if self.writable && self.dirty {
            let _ = self.flush();
        }
    }
}

fn check_slab(var: &VarDef, start: &[usize], count: &[usize], buf_len: usize) -> Result<()> {
    if start.len() != var.dims.len() || count.len() != var.dims.len() {
        return Err(ContainerError::InvalidArgument(format!(
            "variable {} has {} dimensions, got start/count of rank {}/{}",
            var.name,
            var.dims.len(),
            start.len(),
            count.len()
        )));
    }
    for i in 0..var.dims.len() {
        if start[i] + count[i] > var.dims[i] {
            return Err(ContainerError::InvalidArgument(format!(
                "slab [{} + {}) exceeds dimension {} of variable {}",
                start[i], count[i], var.dims[i], var.name
            )));
        }
    }
    let nelem: usize = count.iter().product();
    if buf_len != nelem {
        return Err(ContainerError::InvalidArgument(format!(
            "buffer holds {} elements, slab has {}",
            buf_len, nelem
        )));
    }
    Ok(())
}

fn run_len(count: &[usize]) -> usize {
    count.last().copied().unwrap_or(1)
}

/// Iterator over the linear element offsets of each contiguous run (fastest
/// varying dimension) of a hyperslab.
struct SlabRuns<'a> {
    dims: &'a [usize],
    start: &'a [usize],
    count: &'a [usize],
    index: Vec<usize>,
    done: bool,
}

impl<'a> SlabRuns<'a> {
    fn new(dims: &'a [usize], start: &'a [usize], count: &'a [usize]) -> Self {
        let done = count.iter().any(|&c| c == 0);
        SlabRuns {
            dims,
            start,
            count,
            index: vec![0; dims.len().saturating_sub(1)],
            done,
        }
    }
}

impl Iterator for SlabRuns<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.done {
            return None;
        }
        let mut off = 0usize;
        let mut stride = 1usize;
        for d in (0..self.dims.len()).rev() {
            let coord = if d + 1 == self.dims.len() {
                self.start[d]
            } else {
                self.start[d] + self.index[d]
            };
            off += coord * stride;
            stride *= self.dims[d];
        }
        // Advance the odometer over the outer dimensions.
        self.done = true;
        for d in (0..self.index.len()).rev() {
            self.index[d] += 1;
            if self.index[d] < self.count[d] {
                self.done = false;
                break;
            }
            self.index[d] = 0;
        }
        Some(off)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        dir.path().join(name)
    }

    #[test]
    fn test_create_open_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "t.arr");

        let mut c = Container::create(&path).unwrap();
        c.def_dim("x", 8).unwrap();
        c.def_dim("y", 4).unwrap();
        c.def_var("v", DType::Float, &["y", "x"]).unwrap();
        let data: Vec<f32> = (0..32).map(|i| i as f32).collect();
        c.put_var("v", &data).unwrap();
        c.put_att("v", "units", AttrValue::Text("K".to_string()))
            .unwrap();
        c.close().unwrap();

        let c = Container::open(&path, false).unwrap();
        assert_eq!(c.dim_len("x").unwrap(), 8);
        assert_eq!(c.var_dims("v").unwrap(), vec![4, 8]);
        assert_eq!(c.var_dtype("v").unwrap(), DType::Float);
        assert_eq!(
            c.get_att("v", "units").unwrap().unwrap().as_text(),
            Some("K")
        );
        let mut back = vec![0.0f32; 32];
        c.get_var("v", &mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_hyperslab_access() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "slab.arr");

        let mut c = Container::create(&path).unwrap();
        c.def_dim("x", 6).unwrap();
        c.def_dim("y", 5).unwrap();
        c.def_var("v", DType::Double, &["y", "x"]).unwrap();

        // Write a 2x3 patch at (1,2).
        let patch = vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        c.put_vara("v", &[1, 2], &[2, 3], &patch).unwrap();

        let mut full = vec![0.0f64; 30];
        c.get_var("v", &mut full).unwrap();
        assert_eq!(full[1 * 6 + 2], 1.0);
        assert_eq!(full[1 * 6 + 4], 3.0);
        assert_eq!(full[2 * 6 + 2], 4.0);
        assert_eq!(full[0], 0.0);

        let mut back = vec![0.0f64; 6];
        c.get_vara("v", &[1, 2], &[2, 3], &mut back).unwrap();
        assert_eq!(back, patch);
    }

    #[test]
    fn test_append_var_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "append.arr");

        let mut c = Container::create(&path).unwrap();
        c.def_dim("x", 4).unwrap();
        c.def_var("a", DType::Int32, &["x"]).unwrap();
        c.put_var("a", &[10i32, 20, 30, 40]).unwrap();
        c.close().unwrap();

        let mut c = Container::open(&path, true).unwrap();
        c.def_var("b", DType::Int32, &["x"]).unwrap();
        c.put_var("b", &[1i32, 2, 3, 4]).unwrap();
        c.close().unwrap();

        let c = Container::open(&path, false).unwrap();
        let mut a = vec![0i32; 4];
        c.get_var("a", &mut a).unwrap();
        assert_eq!(a, vec![10, 20, 30, 40]);
        let mut b = vec![0i32; 4];
        c.get_var("b", &mut b).unwrap();
        assert_eq!(b, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_type_conversion_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "conv.arr");

        let mut c = Container::create(&path).unwrap();
        c.def_dim("x", 3).unwrap();
        c.def_var("v", DType::Float, &["x"]).unwrap();
        c.put_var("v", &[1.5f64, 2.5, -3.0]).unwrap();

        let mut back = vec![0.0f64; 3];
        c.get_var("v", &mut back).unwrap();
        assert_eq!(back, vec![1.5, 2.5, -3.0]);
    }

    #[test]
    fn test_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "err.arr");

        let mut c = Container::create(&path).unwrap();
        c.def_dim("x", 4).unwrap();
        c.def_var("v", DType::Float, &["x"]).unwrap();
        assert!(matches!(
            c.def_var("v", DType::Float, &["x"]),
            Err(ContainerError::AlreadyDefined(_))
        ));
        assert!(matches!(
            c.def_var("w", DType::Float, &["nope"]),
            Err(ContainerError::UndefinedDim(_))
        ));
        assert!(matches!(
            c.put_vara("v", &[2], &[3], &[0.0f32; 3]),
            Err(ContainerError::InvalidArgument(_))
        ));
        c.close().unwrap();

        let c = Container::open(&path, false).unwrap();
        assert!(matches!(
            c.put_var("v", &[0.0f32; 4]),
            Err(ContainerError::ReadOnly(_))
        ));
    }

    #[test]
    fn test_open_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "junk.arr");
        std::fs::write(&path, b"definitely not a container file at all").unwrap();
        assert!(matches!(
            Container::open(&path, false),
            Err(ContainerError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_unwritten_region_reads_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "zero.arr");

        let mut c = Container::create(&path).unwrap();
        c.def_dim("x", 8).unwrap();
        c.def_var("v", DType::Double, &["x"]).unwrap();
        c.put_vara("v", &[0], &[2], &[7.0f64, 8.0]).unwrap();

        let mut back = vec![1.0f64; 8];
        c.get_var("v", &mut back).unwrap();
        assert_eq!(&back[..2], &[7.0, 8.0]);
        assert!(back[2..].iter().all(|&v| v == 0.0));
    }
}

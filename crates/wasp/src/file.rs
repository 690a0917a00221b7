//! The multi-file variable facade.
//!
//! A `Wasp` file set is one or more container files sharing a base path:
//! `<base>.wasp`, `<base>.wasp1`, and so on. Compressed variables spread
//! their ladder segments across the files so that coarse approximations can
//! ship without the refinement data. Variables whose block size multiplies
//! to one bypass the codec entirely and live as plain container variables
//! in the first file.

use std::path::{Path, PathBuf};

use container::{AttrValue, Container, DType, Element};
use tracing::{debug, warn};
use wavelet::{Compressor, Wavelet};

use crate::codec::{coeff_dim_name, encoded_len, file_index, nb_dim_name, seg_var_name};
use crate::engine::{read_blocks, write_blocks, VarCodec};
use crate::error::{Result, WaspError};
use crate::math::{block_align, vproduct};
use crate::padding::PadMode;

const ATT_MARKER: &str = "WASP";
const ATT_VERSION: &str = "WASP.version";
const ATT_NUMFILES: &str = "WASP.numfiles";
const ATT_WAVELET: &str = "WASP.wavelet";
const ATT_BLOCKSIZE: &str = "WASP.blocksize";
const ATT_CRATIOS: &str = "WASP.cratios";
const ATT_DIMNAMES: &str = "WASP.dimnames";
const ATT_MISSING: &str = "WASP.missing_value";

const VERSION: i64 = 1;

/// Shape after `n` coarsening steps.
fn coarsen_n(dims: &[usize], n: usize) -> Vec<usize> {
    let mut out = dims.to_vec();
    for _ in 0..n {
        for d in out.iter_mut() {
            if *d > 1 {
                *d = d.div_ceil(2);
            }
        }
    }
    out
}

/// Physical paths of an `n`-file set with the given base path.
pub fn mk_multi_paths(path: &Path, n: usize) -> Vec<PathBuf> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "wasp".to_string());
    let mut paths = Vec::with_capacity(n);
    for j in 0..n {
        let mut p = path.to_path_buf();
        if j == 0 {
            p.set_extension(&ext);
        } else {
            p.set_extension(format!("{}{}", ext, j));
        }
        paths.push(p);
    }
    paths
}

/// Definition-time metadata of one variable.
#[derive(Debug, Clone)]
struct VarMeta {
    name: String,
    dtype: DType,
    dimnames: Vec<String>,
    dims: Vec<usize>,
    bs: Vec<usize>,
    wavelet: Option<Wavelet>,
    cratios: Vec<usize>,
    counts: Vec<usize>,
    /// Refinement level count (coarsest approximation through full
    /// resolution).
    nlevels: usize,
}

impl VarMeta {
    fn compressed(&self) -> bool {
        self.wavelet.is_some()
    }

    /// Whether the variable is stored block by block (with or without a
    /// wavelet transform).
    fn blocked(&self) -> bool {
        vproduct(&self.bs) > 1
    }
}

/// An access session on one variable.
#[derive(Debug, Clone)]
struct OpenVar {
    meta: VarMeta,
    level: usize,
    lod: usize,
    writing: bool,
}

/// A multiresolution blocked storage file set.
#[derive(Debug)]
pub struct Wasp {
    path: PathBuf,
    files: Vec<Container>,
    /// File count the set was created with; on a lenient read-only open
    /// fewer may actually be present.
    numfiles: usize,
    nthreads: usize,
    writable: bool,
    open_var: Option<OpenVar>,
    mode: PadMode,
}

impl Wasp {
    /// Create a new file set. `nthreads == 0` selects the hardware
    /// parallelism; `numfiles` is the number of physical files the ladder
    /// segments are spread over.
    pub fn create<P: AsRef<Path>>(path: P, nthreads: usize, numfiles: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if numfiles == 0 {
            return Err(WaspError::InvalidArgument(
                "numfiles must be at least 1".to_string(),
            ));
        }
        let mut files = Vec::with_capacity(numfiles);
        for p in mk_multi_paths(&path, numfiles) {
            files.push(Container::create(&p)?);
        }
        files[0].put_att("", ATT_MARKER, AttrValue::Int(1))?;
        files[0].put_att("", ATT_VERSION, AttrValue::Int(VERSION))?;
        files[0].put_att("", ATT_NUMFILES, AttrValue::Int(numfiles as i64))?;
        debug!(path = %path.display(), numfiles, "created file set");
        Ok(Wasp {
            path,
            files,
            numfiles,
            nthreads: resolve_nthreads(nthreads),
            writable: true,
            open_var: None,
            mode: PadMode::SymH,
        })
    }

    /// Open an existing file set. A read-only open tolerates missing
    /// higher-numbered files; the segments they hold are then unavailable.
    pub fn open<P: AsRef<Path>>(path: P, write: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let first = Container::open(mk_multi_paths(&path, 1)[0].as_path(), write)?;
        let numfiles = first
            .get_att("", ATT_NUMFILES)?
            .and_then(|a| a.as_i64())
            .ok_or_else(|| {
                WaspError::InvalidArgument(format!(
                    "{}: not a WASP file set",
                    path.display()
                ))
            })? as usize;
        let mut files = vec![first];
        for p in mk_multi_paths(&path, numfiles).into_iter().skip(1) {
            match Container::open(&p, write) {
                Ok(c) => files.push(c),
                Err(e) if !write => {
                    warn!(path = %p.display(), "ladder file missing, opening truncated set");
                    let _ = e;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        debug!(path = %path.display(), present = files.len(), numfiles, write, "opened file set");
        Ok(Wasp {
            path,
            files,
            numfiles,
            nthreads: resolve_nthreads(0),
            writable: write,
            open_var: None,
            mode: PadMode::SymH,
        })
    }

    /// Base path of the file set.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Override the worker thread count.
    pub fn set_nthreads(&mut self, nthreads: usize) {
        self.nthreads = resolve_nthreads(nthreads);
    }

    /// Boundary padding mode for subsequently written blocks.
    pub fn set_pad_mode(&mut self, mode: PadMode) {
        self.mode = mode;
    }

    fn check_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(WaspError::ReadOnly(self.path.display().to_string()));
        }
        Ok(())
    }

    /// Define a named dimension in every file of the set.
    pub fn def_dim(&mut self, name: &str, len: usize) -> Result<()> {
        self.check_writable()?;
        for f in self.files.iter_mut() {
            f.def_dim(name, len)?;
        }
        Ok(())
    }

    /// Length of a named dimension.
    pub fn inq_dimlen(&self, name: &str) -> Result<usize> {
        self.files[0]
            .dim_len(name)
            .map_err(|_| WaspError::UndefinedDim(name.to_string()))
    }

    /// Define a variable.
    ///
    /// `bs` may be shorter than the dimension list; it is left-padded with
    /// ones, so trailing entries align with the fastest-varying dimensions.
    /// A block size multiplying to one defines a plain, uncompressed
    /// variable. `cratios` is sorted descending and validated against the
    /// ladder the block size and wavelet can support.
    pub fn def_var(
        &mut self,
        name: &str,
        dtype: DType,
        dimnames: &[&str],
        wname: &str,
        bs: &[usize],
        cratios: &[usize],
        missing_value: Option<f64>,
    ) -> Result<()> {
        self.check_writable()?;
        let rank = dimnames.len();
        if rank == 0 {
            return Err(WaspError::InvalidDefinition(format!(
                "variable {} needs at least one dimension",
                name
            )));
        }
        let mut dims = Vec::with_capacity(rank);
        for dn in dimnames {
            dims.push(self.inq_dimlen(dn)?);
        }
        if bs.len() > rank || bs.iter().any(|&b| b == 0) {
            return Err(WaspError::InvalidDefinition(format!(
                "bad block size {:?} for rank-{} variable {}",
                bs, rank, name
            )));
        }

        if vproduct(bs) == 1 {
            // No blocks means nothing to transform or rank by ratio.
            if !wname.is_empty() || cratios != [1] {
                return Err(WaspError::InvalidDefinition(format!(
                    "variable {} is not block-decomposable, wavelet/ladder rejected",
                    name
                )));
            }
            // Plain container variable, no codec.
            self.files[0].def_var(name, dtype, dimnames)?;
            if let Some(mv) = missing_value {
                self.files[0].put_att(name, ATT_MISSING, AttrValue::Double(mv))?;
            }
            debug!(var = name, %dtype, "defined plain variable");
            return Ok(());
        }

        // Left-pad the block size to the variable's rank.
        let mut pbs = vec![1usize; rank - bs.len()];
        pbs.extend_from_slice(bs);

        if wname.is_empty() {
            // Uncompressed blocked variable: one raw segment, no codec.
            if cratios != [1] {
                return Err(WaspError::InvalidDefinition(format!(
                    "compression ratios {:?} for variable {} need a wavelet",
                    cratios, name
                )));
            }
            let file = &mut self.files[0];
            let mut segdims: Vec<String> = Vec::with_capacity(rank + 1);
            for d in 0..rank {
                let nb = nb_dim_name(name, d);
                if file.dim_len(&nb).is_err() {
                    file.def_dim(&nb, dims[d].div_ceil(pbs[d]))?;
                }
                segdims.push(nb);
            }
            let cd = coeff_dim_name(name, 0);
            file.def_dim(&cd, vproduct(&pbs))?;
            segdims.push(cd);
            let segdims_ref: Vec<&str> = segdims.iter().map(|s| s.as_str()).collect();
            file.def_var(&seg_var_name(name, 0), dtype, &segdims_ref)?;

            let anchor = seg_var_name(name, 0);
            self.files[0].put_att(&anchor, ATT_WAVELET, AttrValue::Text(String::new()))?;
            self.files[0].put_att(
                &anchor,
                ATT_BLOCKSIZE,
                AttrValue::IntVec(pbs.iter().map(|&b| b as i64).collect()),
            )?;
            self.files[0]
                .put_att(&anchor, ATT_CRATIOS, AttrValue::IntVec(vec![1]))?;
            self.files[0].put_att(
                &anchor,
                ATT_DIMNAMES,
                AttrValue::TextVec(dimnames.iter().map(|s| s.to_string()).collect()),
            )?;
            if let Some(mv) = missing_value {
                self.files[0].put_att(&anchor, ATT_MISSING, AttrValue::Double(mv))?;
            }
            debug!(var = name, %dtype, ?pbs, "defined uncompressed blocked variable");
            return Ok(());
        }

        let wavelet = Wavelet::from_name(wname)?;
        let mut cratios = cratios.to_vec();
        if cratios.is_empty() {
            return Err(WaspError::InvalidDefinition(format!(
                "variable {} needs at least one compression ratio",
                name
            )));
        }
        cratios.sort_unstable_by(|a, b| b.cmp(a));
        if cratios.windows(2).any(|w| w[0] == w[1]) {
            return Err(WaspError::InvalidDefinition(format!(
                "duplicate compression ratios {:?} for variable {}",
                cratios, name
            )));
        }
        let compressor = Compressor::new(&pbs, wavelet)?;
        let maxcratio = compressor.max_cratio();
        if cratios.iter().any(|&c| c < 1 || c > maxcratio) {
            return Err(WaspError::InvalidDefinition(format!(
                "compression ratios {:?} outside [1, {}] for block size {:?} with {}",
                cratios, maxcratio, pbs, wname
            )));
        }
        let counts = compressor.encoding_counts(&cratios)?;
        let esz = dtype.size_of();

        for seg in 0..cratios.len() {
            let cidx = file_index(seg, self.numfiles);
            let file = &mut self.files[cidx];
            let mut segdims: Vec<String> = Vec::with_capacity(rank + 1);
            for d in 0..rank {
                let nb = nb_dim_name(name, d);
                if file.dim_len(&nb).is_err() {
                    file.def_dim(&nb, dims[d].div_ceil(pbs[d]))?;
                }
                segdims.push(nb);
            }
            let cd = coeff_dim_name(name, seg);
            file.def_dim(&cd, encoded_len(&compressor, &counts, &cratios, seg, esz))?;
            segdims.push(cd);
            let segdims_ref: Vec<&str> = segdims.iter().map(|s| s.as_str()).collect();
            file.def_var(&seg_var_name(name, seg), dtype, &segdims_ref)?;
        }

        let anchor = seg_var_name(name, 0);
        self.files[0].put_att(&anchor, ATT_WAVELET, AttrValue::Text(wname.to_string()))?;
        self.files[0].put_att(
            &anchor,
            ATT_BLOCKSIZE,
            AttrValue::IntVec(pbs.iter().map(|&b| b as i64).collect()),
        )?;
        self.files[0].put_att(
            &anchor,
            ATT_CRATIOS,
            AttrValue::IntVec(cratios.iter().map(|&c| c as i64).collect()),
        )?;
        self.files[0].put_att(
            &anchor,
            ATT_DIMNAMES,
            AttrValue::TextVec(dimnames.iter().map(|s| s.to_string()).collect()),
        )?;
        if let Some(mv) = missing_value {
            self.files[0].put_att(&anchor, ATT_MISSING, AttrValue::Double(mv))?;
        }
        debug!(var = name, %dtype, ?pbs, ?cratios, "defined compressed variable");
        Ok(())
    }

    /// The container-variable the facade attributes of `name` hang on.
    fn anchor(&self, name: &str) -> Result<String> {
        if self.files[0].var_exists(name) {
            Ok(name.to_string())
        } else if self.files[0].var_exists(&seg_var_name(name, 0)) {
            Ok(seg_var_name(name, 0))
        } else {
            Err(WaspError::UndefinedVar(name.to_string()))
        }
    }

    /// Attach an attribute to a variable, or globally when `name` is empty.
    pub fn put_att(&mut self, name: &str, att: &str, value: AttrValue) -> Result<()> {
        self.check_writable()?;
        let target = if name.is_empty() {
            String::new()
        } else {
            self.anchor(name)?
        };
        self.files[0].put_att(&target, att, value)?;
        Ok(())
    }

    /// Look up an attribute.
    pub fn get_att(&self, name: &str, att: &str) -> Result<Option<AttrValue>> {
        let target = if name.is_empty() {
            String::new()
        } else {
            self.anchor(name)?
        };
        Ok(self.files[0].get_att(&target, att)?.cloned())
    }

    fn var_meta(&self, name: &str) -> Result<VarMeta> {
        if self.files[0].var_exists(name) {
            let dims = self.files[0].var_dims(name)?;
            let rank = dims.len();
            return Ok(VarMeta {
                name: name.to_string(),
                dtype: self.files[0].var_dtype(name)?,
                dimnames: self.files[0].var_dim_names(name)?,
                dims,
                bs: vec![1; rank],
                wavelet: None,
                cratios: vec![1],
                counts: Vec::new(),
                nlevels: 1,
            });
        }
        let anchor = seg_var_name(name, 0);
        if !self.files[0].var_exists(&anchor) {
            return Err(WaspError::UndefinedVar(name.to_string()));
        }
        let get = |att: &str| -> Result<AttrValue> {
            self.files[0]
                .get_att(&anchor, att)?
                .cloned()
                .ok_or_else(|| {
                    WaspError::InvalidArgument(format!("variable {} lacks {}", name, att))
                })
        };
        let wname = get(ATT_WAVELET)?;
        let wname = wname.as_text().unwrap_or_default().to_string();
        let bs: Vec<usize> = get(ATT_BLOCKSIZE)?
            .as_i64_vec()
            .unwrap_or_default()
            .iter()
            .map(|&v| v as usize)
            .collect();
        let cratios: Vec<usize> = get(ATT_CRATIOS)?
            .as_i64_vec()
            .unwrap_or_default()
            .iter()
            .map(|&v| v as usize)
            .collect();
        let dimnames: Vec<String> = get(ATT_DIMNAMES)?
            .as_text_vec()
            .unwrap_or_default()
            .to_vec();
        let mut dims = Vec::with_capacity(dimnames.len());
        for dn in &dimnames {
            dims.push(self.inq_dimlen(dn)?);
        }
        if wname.is_empty() {
            return Ok(VarMeta {
                name: name.to_string(),
                dtype: self.files[0].var_dtype(&anchor)?,
                dimnames,
                dims,
                bs,
                wavelet: None,
                cratios,
                counts: Vec::new(),
                nlevels: 1,
            });
        }
        let wavelet = Wavelet::from_name(&wname)?;
        let compressor = Compressor::new(&bs, wavelet)?;
        let counts = compressor.encoding_counts(&cratios)?;
        Ok(VarMeta {
            name: name.to_string(),
            dtype: self.files[0].var_dtype(&anchor)?,
            dimnames,
            dims,
            bs,
            wavelet: Some(wavelet),
            cratios,
            counts,
            nlevels: compressor.num_levels(),
        })
    }

    /// Whether `name` was defined through this facade.
    pub fn inq_var_wasp(&self, name: &str) -> bool {
        self.anchor(name).is_ok()
    }

    /// Whether `name` is a compressed variable.
    pub fn inq_var_compressed(&self, name: &str) -> Result<bool> {
        Ok(self.var_meta(name)?.compressed())
    }

    /// Dimension names and lengths of a variable.
    pub fn inq_var_dims(&self, name: &str) -> Result<(Vec<String>, Vec<usize>)> {
        let m = self.var_meta(name)?;
        Ok((m.dimnames, m.dims))
    }

    /// External type of a variable.
    pub fn inq_var_dtype(&self, name: &str) -> Result<DType> {
        Ok(self.var_meta(name)?.dtype)
    }

    /// Wavelet name, block size, and ladder of a variable (empty for plain
    /// variables).
    pub fn inq_var_compression_params(
        &self,
        name: &str,
    ) -> Result<(Option<String>, Vec<usize>, Vec<usize>)> {
        let m = self.var_meta(name)?;
        Ok((
            m.wavelet.map(|w| w.name().to_string()),
            m.bs,
            m.cratios,
        ))
    }

    /// Number of refinement levels of a variable (1 for plain variables).
    pub fn inq_var_num_ref_levels(&self, name: &str) -> Result<usize> {
        Ok(self.var_meta(name)?.nlevels)
    }

    /// The variable's missing value, if one was declared.
    pub fn inq_var_missing_value(&self, name: &str) -> Result<Option<f64>> {
        Ok(self.get_att(name, ATT_MISSING)?.and_then(|a| a.as_f64()))
    }

    /// Array dimensions of a variable at a refinement level (negative or
    /// out-of-range levels clamp to the finest).
    pub fn inq_var_dimlens(&self, name: &str, level: i32) -> Result<Vec<usize>> {
        let m = self.var_meta(name)?;
        let level = clamp_index(level, m.nlevels);
        Ok(dims_at_level(&m.dims, &m.bs, m.nlevels, level))
    }

    /// Level count and maximum ratio achievable for a block size and
    /// wavelet, without touching any file.
    pub fn inq_compression_info(bs: &[usize], wname: &str) -> Result<(usize, usize)> {
        let wavelet = Wavelet::from_name(wname)?;
        Ok(Compressor::compression_info(bs, wavelet)?)
    }

    /// Array dimensions at a refinement level for a shape/block-size pair.
    pub fn inq_dims_at_level(
        dims: &[usize],
        bs: &[usize],
        wname: &str,
        level: i32,
    ) -> Result<Vec<usize>> {
        let (nlevels, _) = Self::inq_compression_info(bs, wname)?;
        let level = clamp_index(level, nlevels);
        Ok(dims_at_level(dims, bs, nlevels, level))
    }

    /// Open a variable for writing at ladder depth `lod` (negative: full
    /// ladder). Any previously open variable is closed.
    pub fn open_var_write(&mut self, name: &str, lod: i32) -> Result<()> {
        self.check_writable()?;
        let meta = self.var_meta(name)?;
        let lod = clamp_index(lod, meta.cratios.len());
        debug!(var = name, lod, "opened for write");
        self.open_var = Some(OpenVar {
            meta,
            level: 0,
            lod,
            writing: true,
        });
        Ok(())
    }

    /// Open a variable for reading at refinement level `level` and ladder
    /// depth `lod` (negative: finest / full). Any previously open variable
    /// is closed. The ladder depth is additionally capped by the files
    /// actually present.
    pub fn open_var_read(&mut self, name: &str, level: i32, lod: i32) -> Result<()> {
        let meta = self.var_meta(name)?;
        let avail = if self.files.len() == self.numfiles {
            meta.cratios.len()
        } else {
            self.files.len().min(meta.cratios.len())
        };
        let lod = clamp_index(lod, avail);
        let level = clamp_index(level, meta.nlevels);
        debug!(var = name, level, lod, "opened for read");
        self.open_var = Some(OpenVar {
            meta,
            level,
            lod,
            writing: false,
        });
        Ok(())
    }

    /// Close the open variable, if any.
    pub fn close_var(&mut self) {
        self.open_var = None;
    }

    fn open_for(&self, writing: bool) -> Result<&OpenVar> {
        match &self.open_var {
            Some(ov) if ov.writing == writing => Ok(ov),
            _ => Err(WaspError::NotOpen(if writing { "writing" } else { "reading" })),
        }
    }

    /// Write a hyperslab of the open variable. `start` must be
    /// block-aligned; each extent of `count` must be a whole number of
    /// blocks or run flush to the array boundary. Plain variables are
    /// exempt from alignment. A mask marks valid samples; zero-mask samples
    /// are replaced by the block mean before encoding.
    pub fn put_vara<E: Element>(
        &self,
        start: &[usize],
        count: &[usize],
        data: &[E],
        mask: Option<&[u8]>,
    ) -> Result<()> {
        self.check_writable()?;
        let ov = self.open_for(true)?;
        let m = &ov.meta;
        check_bounds(start, count, &m.dims)?;
        if data.len() != vproduct(count) {
            return Err(WaspError::InvalidArgument(format!(
                "buffer holds {} elements, slab has {}",
                data.len(),
                vproduct(count)
            )));
        }
        if !m.blocked() {
            self.files[0].put_vara(&m.name, start, count, data)?;
            return Ok(());
        }
        // Significance-map words are stored through the typed coefficient
        // path, so compressed access cannot convert element types.
        if m.compressed() && E::DTYPE != m.dtype {
            return Err(WaspError::InvalidArgument(format!(
                "variable {} is {}, buffer is {}",
                m.name,
                m.dtype,
                E::DTYPE
            )));
        }
        if let Some(mk) = mask {
            if mk.len() != data.len() {
                return Err(WaspError::InvalidArgument(
                    "mask and data lengths differ".to_string(),
                ));
            }
        }
        for d in 0..m.dims.len() {
            if start[d] % m.bs[d] != 0 {
                return Err(WaspError::InvalidArgument(format!(
                    "start {:?} not aligned to blocks {:?}",
                    start, m.bs
                )));
            }
            if count[d] % m.bs[d] != 0 && start[d] + count[d] != m.dims[d] {
                return Err(WaspError::InvalidArgument(format!(
                    "count {:?} neither block-aligned nor boundary-flush",
                    count
                )));
            }
        }
        let (_, acount) = block_align(start, count, &m.bs);
        let counts: &[usize] = if m.compressed() {
            &m.counts[..=ov.lod]
        } else {
            &[]
        };
        let codec = VarCodec {
            var: &m.name,
            bs: &m.bs,
            wavelet: m.wavelet,
            cratios: &m.cratios,
            counts,
            mode: self.mode,
            nthreads: self.nthreads,
        };
        write_blocks(&self.files, &codec, data, mask, start, count, &acount)
    }

    /// Read a hyperslab of the open variable into `data`. `start` and
    /// `count` are in the coordinates of the opened refinement level and
    /// need no alignment.
    pub fn get_vara<E: Element>(
        &self,
        start: &[usize],
        count: &[usize],
        data: &mut [E],
    ) -> Result<()> {
        let ov = self.open_for(false)?;
        let m = &ov.meta;
        if !m.blocked() {
            check_bounds(start, count, &m.dims)?;
            self.files[0].get_vara(&m.name, start, count, data)?;
            return Ok(());
        }
        let ldims = dims_at_level(&m.dims, &m.bs, m.nlevels, ov.level);
        check_bounds(start, count, &ldims)?;
        if data.len() != vproduct(count) {
            return Err(WaspError::InvalidArgument(format!(
                "buffer holds {} elements, slab has {}",
                data.len(),
                vproduct(count)
            )));
        }
        if m.compressed() && E::DTYPE != m.dtype {
            return Err(WaspError::InvalidArgument(format!(
                "variable {} is {}, buffer is {}",
                m.name,
                m.dtype,
                E::DTYPE
            )));
        }
        let bs_level = coarsen_n(&m.bs, m.nlevels - 1 - ov.level);
        let counts: &[usize] = if m.compressed() {
            &m.counts[..=ov.lod]
        } else {
            &[]
        };
        let codec = VarCodec {
            var: &m.name,
            bs: &m.bs,
            wavelet: m.wavelet,
            cratios: &m.cratios,
            counts,
            mode: self.mode,
            nthreads: self.nthreads,
        };
        read_blocks(
            &self.files,
            &codec,
            ov.level,
            ov.lod,
            &bs_level,
            data,
            start,
            count,
            false,
        )
    }

    /// Read whole blocks of the open variable in blocked layout: `start`
    /// and `count` must be block-aligned at the opened level, and each
    /// block lands contiguously in `data` in odometer order.
    pub fn get_vara_block<E: Element>(
        &self,
        start: &[usize],
        count: &[usize],
        data: &mut [E],
    ) -> Result<()> {
        let ov = self.open_for(false)?;
        let m = &ov.meta;
        if !m.blocked() {
            return Err(WaspError::InvalidArgument(format!(
                "variable {} is not blocked",
                m.name
            )));
        }
        let ldims = dims_at_level(&m.dims, &m.bs, m.nlevels, ov.level);
        check_bounds(start, count, &ldims)?;
        let bs_level = coarsen_n(&m.bs, m.nlevels - 1 - ov.level);
        for d in 0..m.dims.len() {
            if start[d] % bs_level[d] != 0 || count[d] % bs_level[d] != 0 {
                return Err(WaspError::InvalidArgument(format!(
                    "start {:?} / count {:?} not aligned to blocks {:?}",
                    start, count, bs_level
                )));
            }
        }
        if data.len() != vproduct(count) {
            return Err(WaspError::InvalidArgument(format!(
                "buffer holds {} elements, blocked slab has {}",
                data.len(),
                vproduct(count)
            )));
        }
        if m.compressed() && E::DTYPE != m.dtype {
            return Err(WaspError::InvalidArgument(format!(
                "variable {} is {}, buffer is {}",
                m.name,
                m.dtype,
                E::DTYPE
            )));
        }
        let counts: &[usize] = if m.compressed() {
            &m.counts[..=ov.lod]
        } else {
            &[]
        };
        let codec = VarCodec {
            var: &m.name,
            bs: &m.bs,
            wavelet: m.wavelet,
            cratios: &m.cratios,
            counts,
            mode: self.mode,
            nthreads: self.nthreads,
        };
        read_blocks(
            &self.files,
            &codec,
            ov.level,
            ov.lod,
            &bs_level,
            data,
            start,
            count,
            true,
        )
    }

    /// Write the whole open variable.
    pub fn put_var<E: Element>(&self, data: &[E], mask: Option<&[u8]>) -> Result<()> {
        let dims = self.open_for(true)?.meta.dims.clone();
        let start = vec![0; dims.len()];
        self.put_vara(&start, &dims, data, mask)
    }

    /// Read the whole open variable at the opened level.
    pub fn get_var<E: Element>(&self, data: &mut [E]) -> Result<()> {
        let ov = self.open_for(false)?;
        let m = &ov.meta;
        let count = if m.compressed() {
            dims_at_level(&m.dims, &m.bs, m.nlevels, ov.level)
        } else {
            m.dims.clone()
        };
        let start = vec![0; count.len()];
        self.get_vara(&start, &count, data)
    }

    /// Flush and close every file of the set.
    pub fn close(mut self) -> Result<()> {
        self.open_var = None;
        for f in self.files.drain(..) {
            f.close()?;
        }
        Ok(())
    }
}

fn resolve_nthreads(nthreads: usize) -> usize {
    if nthreads > 0 {
        nthreads
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Clamp a signed index into `[0, n)`, mapping negatives and overflows to
/// the last element.
fn clamp_index(idx: i32, n: usize) -> usize {
    if idx < 0 || idx as usize >= n {
        n - 1
    } else {
        idx as usize
    }
}

fn check_bounds(start: &[usize], count: &[usize], dims: &[usize]) -> Result<()> {
    if start.len() != dims.len() || count.len() != dims.len() {
        return Err(WaspError::InvalidArgument(format!(
            "start/count rank {}/{} does not match variable rank {}",
            start.len(),
            count.len(),
            dims.len()
        )));
    }
    for d in 0..dims.len() {
        if count[d] == 0 || start[d] + count[d] > dims[d] {
            return Err(WaspError::InvalidArgument(format!(
                "slab start {:?} count {:?} exceeds dimensions {:?}",
                start, count, dims
            )));
        }
    }
    Ok(())
}

/// Array shape at a refinement level: whole blocks coarsen with the block
/// size, the boundary residual coarsens on its own.
fn dims_at_level(dims: &[usize], bs: &[usize], nlevels: usize, level: usize) -> Vec<usize> {
    let ldelta = nlevels - 1 - level.min(nlevels - 1);
    let bs_l = coarsen_n(bs, ldelta);
    (0..dims.len())
        .map(|d| {
            let nfull = dims[d] / bs[d];
            let residual = coarsen_n(&[dims[d] % bs[d]], ldelta)[0];
            let residual = if dims[d] % bs[d] == 0 { 0 } else { residual };
            nfull * bs_l[d] + residual
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mk_multi_paths() {
        let paths = mk_multi_paths(Path::new("/tmp/v.wasp"), 3);
        assert_eq!(paths[0], PathBuf::from("/tmp/v.wasp"));
        assert_eq!(paths[1], PathBuf::from("/tmp/v.wasp1"));
        assert_eq!(paths[2], PathBuf::from("/tmp/v.wasp2"));
    }

    #[test]
    fn test_clamp_index() {
        assert_eq!(clamp_index(-1, 4), 3);
        assert_eq!(clamp_index(0, 4), 0);
        assert_eq!(clamp_index(2, 4), 2);
        assert_eq!(clamp_index(9, 4), 3);
    }

    #[test]
    fn test_dims_at_level() {
        // 200 samples in blocks of 64: 3 whole blocks + residual 8.
        let d = dims_at_level(&[200], &[64], 3, 1);
        assert_eq!(d, vec![3 * 32 + 4]);
        let d = dims_at_level(&[200], &[64], 3, 0);
        assert_eq!(d, vec![3 * 16 + 2]);
        // Exact multiples have no residual term.
        let d = dims_at_level(&[128, 128], &[64, 64], 3, 1);
        assert_eq!(d, vec![64, 64]);
        // Finest level is the original shape.
        let d = dims_at_level(&[200], &[64], 3, 2);
        assert_eq!(d, vec![200]);
    }
}

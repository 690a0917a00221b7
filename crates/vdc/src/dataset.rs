//! The dataset facade: a master file plus per-variable file sets.
//!
//! The master container carries the dataset definition document and the
//! small uncompressed variables. Everything else lives in its own blocked
//! file set under `<master>_data/{data|coordinates}/<var>/`, with
//! time-varying variables split over numbered files so no single file
//! grows past the configured threshold.

use std::path::{Path, PathBuf};

use container::{AttrValue, Container, Element};
use tracing::{debug, warn};
use wasp::{DType, Wasp};

use crate::config::VdcConfig;
use crate::error::{Result, VdcError};
use crate::metadata::{Dimension, Metadata, VarMeta};

const ATT_MARKER: &str = "VDC";
const ATT_VERSION: &str = "VDC.version";
const ATT_METADATA: &str = "VDC.metadata";
const ATT_CONFIG: &str = "VDC.config";

const VERSION: i64 = 1;

/// An open read or write session on one variable at one timestep.
#[derive(Debug)]
struct Session {
    varname: String,
    file_ts: usize,
    ts: usize,
    writing: bool,
    in_master: bool,
    wasp: Option<Wasp>,
    /// Spatial dims at full resolution (write) or at the opened level
    /// (read).
    sdims: Vec<usize>,
    time_varying: bool,
    /// Slab thickness for buffered slice writes: the block size along the
    /// slowest spatial dimension.
    bs0: usize,
    slice_idx: usize,
    slab: Vec<f64>,
    slab_filled: usize,
}

impl Session {
    fn slice_len(&self) -> usize {
        self.sdims[1..].iter().product()
    }
}

/// A dataset: master file, metadata, and access sessions.
#[derive(Debug)]
pub struct Vdc {
    master_path: PathBuf,
    master: Container,
    config: VdcConfig,
    metadata: Metadata,
    defined: bool,
    writable: bool,
    session: Option<Session>,
}

impl Vdc {
    /// Create a new dataset with the given storage configuration. The
    /// dataset starts in the definition phase; call
    /// [`Vdc::end_define`] before writing data.
    pub fn create<P: AsRef<Path>>(master_path: P, config: VdcConfig) -> Result<Self> {
        let master_path = master_path.as_ref().to_path_buf();
        let master = Container::create(&master_path)?;
        debug!(path = %master_path.display(), "created dataset");
        Ok(Vdc {
            master_path,
            master,
            config,
            metadata: Metadata::default(),
            defined: false,
            writable: true,
            session: None,
        })
    }

    /// Open an existing dataset.
    pub fn open<P: AsRef<Path>>(master_path: P, write: bool) -> Result<Self> {
        let master_path = master_path.as_ref().to_path_buf();
        let master = Container::open(&master_path, write)?;
        let md_json = master
            .get_att("", ATT_METADATA)?
            .and_then(|a| a.as_text().map(|s| s.to_string()))
            .ok_or_else(|| {
                VdcError::InvalidArgument(format!(
                    "{}: not a dataset master file",
                    master_path.display()
                ))
            })?;
        let metadata: Metadata = serde_json::from_str(&md_json)?;
        let config: VdcConfig = master
            .get_att("", ATT_CONFIG)?
            .and_then(|a| a.as_text().map(|s| s.to_string()))
            .map(|s| serde_json::from_str(&s))
            .transpose()?
            .unwrap_or_default();
        debug!(path = %master_path.display(), nvars = metadata.vars.len(), write, "opened dataset");
        Ok(Vdc {
            master_path,
            master,
            config,
            metadata,
            defined: true,
            writable: write,
            session: None,
        })
    }

    pub fn config(&self) -> &VdcConfig {
        &self.config
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn check_defining(&self) -> Result<()> {
        if self.defined {
            return Err(VdcError::InvalidDefinition(
                "definitions are closed".to_string(),
            ));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(VdcError::ReadOnly(self.master_path.display().to_string()));
        }
        Ok(())
    }

    /// Define a named dimension.
    pub fn define_dimension(&mut self, name: &str, length: usize) -> Result<()> {
        self.check_writable()?;
        self.check_defining()?;
        if length == 0 || self.metadata.dim(name).is_some() {
            return Err(VdcError::InvalidDefinition(format!(
                "bad or duplicate dimension {}",
                name
            )));
        }
        self.metadata.dimensions.push(Dimension {
            name: name.to_string(),
            length,
        });
        Ok(())
    }

    fn define_var(
        &mut self,
        name: &str,
        dtype: DType,
        dimnames: &[&str],
        time_dim: Option<&str>,
        compressed: bool,
        is_coord: bool,
        missing_value: Option<f64>,
    ) -> Result<()> {
        self.check_writable()?;
        self.check_defining()?;
        if dimnames.is_empty() || self.metadata.var(name).is_some() {
            return Err(VdcError::InvalidDefinition(format!(
                "bad or duplicate variable {}",
                name
            )));
        }
        for dn in dimnames.iter().chain(time_dim.iter()) {
            if self.metadata.dim(dn).is_none() {
                return Err(VdcError::UndefinedDim(dn.to_string()));
            }
        }
        if compressed {
            // Fail now rather than at first write.
            let bs = self.block_size_for(dimnames.len());
            let (_, maxcratio) = Wasp::inq_compression_info(&bs, &self.config.wavelet)?;
            if self.config.cratios.iter().any(|&c| c < 1 || c > maxcratio) {
                return Err(VdcError::InvalidDefinition(format!(
                    "ladder {:?} not achievable for variable {} (max ratio {})",
                    self.config.cratios, name, maxcratio
                )));
            }
        }
        debug!(var = name, %dtype, compressed, is_coord, "defined variable");
        self.metadata.vars.insert(
            name.to_string(),
            VarMeta {
                name: name.to_string(),
                dtype,
                dimnames: dimnames.iter().map(|s| s.to_string()).collect(),
                time_dim: time_dim.map(|s| s.to_string()),
                compressed,
                is_coord,
                missing_value,
            },
        );
        Ok(())
    }

    /// Define a coordinate variable.
    pub fn define_coord_var(
        &mut self,
        name: &str,
        dimnames: &[&str],
        time_dim: Option<&str>,
        dtype: DType,
        compressed: bool,
    ) -> Result<()> {
        self.define_var(name, dtype, dimnames, time_dim, compressed, true, None)
    }

    /// Define a data variable.
    pub fn define_data_var(
        &mut self,
        name: &str,
        dimnames: &[&str],
        time_dim: Option<&str>,
        dtype: DType,
        compressed: bool,
        missing_value: Option<f64>,
    ) -> Result<()> {
        self.define_var(
            name,
            dtype,
            dimnames,
            time_dim,
            compressed,
            false,
            missing_value,
        )
    }

    /// Close the definition phase: persist the metadata document and define
    /// the master-resident variables in the master file.
    pub fn end_define(&mut self) -> Result<()> {
        self.check_writable()?;
        self.check_defining()?;
        self.master
            .put_att("", ATT_MARKER, AttrValue::Int(1))?;
        self.master
            .put_att("", ATT_VERSION, AttrValue::Int(VERSION))?;
        self.master.put_att(
            "",
            ATT_METADATA,
            AttrValue::Text(serde_json::to_string(&self.metadata)?),
        )?;
        self.master.put_att(
            "",
            ATT_CONFIG,
            AttrValue::Text(serde_json::to_string(&self.config)?),
        )?;
        for dim in &self.metadata.dimensions {
            self.master.def_dim(&dim.name, dim.length)?;
        }
        let vars: Vec<VarMeta> = self.metadata.vars.values().cloned().collect();
        for var in vars {
            if self.lives_in_master(&var) {
                let mut dn: Vec<&str> = Vec::new();
                if let Some(t) = var.time_dim.as_deref() {
                    dn.push(t);
                }
                dn.extend(var.dimnames.iter().map(|s| s.as_str()));
                self.master.def_var(&var.name, var.dtype, &dn)?;
                if let Some(mv) = var.missing_value {
                    self.master
                        .put_att(&var.name, "missing_value", AttrValue::Double(mv))?;
                }
            }
        }
        self.defined = true;
        debug!(nvars = self.metadata.vars.len(), "closed definitions");
        Ok(())
    }

    /// Whether a variable is stored inside the master file: uncompressed
    /// and small per timestep.
    fn lives_in_master(&self, var: &VarMeta) -> bool {
        !var.compressed && self.metadata.grid_points(var) < self.config.master_threshold
    }

    /// Block size adapted to a spatial rank: extra leading entries are
    /// dropped, short ones are left-padded downstream.
    fn block_size_for(&self, rank: usize) -> Vec<usize> {
        let bs = &self.config.block_size;
        if bs.len() > rank {
            bs[bs.len() - rank..].to_vec()
        } else {
            bs.clone()
        }
    }

    fn var_meta(&self, name: &str) -> Result<&VarMeta> {
        self.metadata
            .var(name)
            .ok_or_else(|| VdcError::UndefinedVar(name.to_string()))
    }

    /// Resolve a variable and timestep to its physical file: the path, the
    /// timestep within that file, and the timesteps each file of the
    /// variable can hold. The mapping depends only on definition-time
    /// metadata and the creation-time thresholds.
    pub fn get_path(&self, varname: &str, ts: usize) -> Result<(PathBuf, usize, usize)> {
        let var = self.var_meta(varname)?;
        let numts = self.metadata.num_timesteps(var);
        if ts >= numts {
            return Err(VdcError::InvalidArgument(format!(
                "timestep {} out of range for {} ({} steps)",
                ts, varname, numts
            )));
        }
        if self.lives_in_master(var) {
            return Ok((self.master_path.clone(), ts, numts.max(1)));
        }
        let mut base = self.master_path.as_os_str().to_os_string();
        base.push("_data");
        let mut dir = PathBuf::from(base);
        dir.push(if var.is_coord { "coordinates" } else { "data" });
        dir.push(varname);
        if var.time_varying() {
            let gp = self.metadata.grid_points(var).max(1);
            let max_ts = (self.config.variable_threshold / gp).max(1).min(numts);
            let idx = ts / max_ts;
            let width = 4.max(digits(numts / max_ts));
            let path = dir.join(format!("{}.{:0width$}.wasp", varname, idx, width = width));
            Ok((path, ts % max_ts, max_ts))
        } else {
            Ok((dir.join(format!("{}.wasp", varname)), 0, 1))
        }
    }

    /// Number of refinement levels of a variable (1 when uncompressed).
    pub fn num_ref_levels(&self, varname: &str) -> Result<usize> {
        let var = self.var_meta(varname)?;
        if !var.compressed {
            return Ok(1);
        }
        let bs = self.block_size_for(var.dimnames.len());
        Ok(Wasp::inq_compression_info(&bs, &self.config.wavelet)?.0)
    }

    /// Spatial dimensions of a variable at a refinement level.
    pub fn dims_at_level(&self, varname: &str, level: i32) -> Result<Vec<usize>> {
        let var = self.var_meta(varname)?;
        let dims = self.metadata.var_dims(var);
        if !var.compressed {
            return Ok(dims);
        }
        let bs = self.block_size_for(dims.len());
        Ok(Wasp::inq_dims_at_level(
            &dims,
            &full_rank_bs(&bs, dims.len()),
            &self.config.wavelet,
            level,
        )?)
    }

    /// Whether a variable's data for `ts` is present on disk at ladder
    /// depth `lod`: every ladder file up to that depth must exist.
    pub fn variable_exists(&self, ts: usize, varname: &str, _level: i32, lod: i32) -> Result<bool> {
        let var = self.var_meta(varname)?;
        let (path, _, _) = match self.get_path(varname, ts) {
            Ok(v) => v,
            Err(VdcError::InvalidArgument(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        if self.lives_in_master(var) {
            return Ok(self.master.var_exists(varname));
        }
        if !var.compressed {
            return Ok(path.exists());
        }
        let nseg = self.config.cratios.len();
        let want = if lod < 0 || lod as usize >= nseg {
            nseg
        } else {
            lod as usize + 1
        };
        Ok(wasp::file::mk_multi_paths(&path, want)
            .iter()
            .all(|p| p.exists()))
    }

    /// Open a variable for writing one timestep at ladder depth `lod`
    /// (negative: full ladder). Creates the backing file set on first use.
    pub fn open_variable_write(&mut self, ts: usize, varname: &str, lod: i32) -> Result<()> {
        self.check_writable()?;
        if !self.defined {
            return Err(VdcError::InvalidDefinition(
                "end_define must run before writing".to_string(),
            ));
        }
        self.close_session();
        let var = self.var_meta(varname)?.clone();
        let (path, file_ts, max_ts) = self.get_path(varname, ts)?;
        let sdims = self.metadata.var_dims(&var);
        let in_master = self.lives_in_master(&var);
        let mut bs0 = 1;
        let wasp = if in_master {
            None
        } else {
            let mut w = if path.exists() {
                Wasp::open(&path, true)?
            } else {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let numfiles = if var.compressed {
                    self.config.cratios.len()
                } else {
                    1
                };
                let mut w = Wasp::create(&path, self.config.nthreads, numfiles)?;
                if var.time_varying() {
                    w.def_dim(var.time_dim.as_deref().unwrap_or("time"), max_ts)?;
                }
                for (dn, &len) in var.dimnames.iter().zip(&sdims) {
                    w.def_dim(dn, len)?;
                }
                let mut dn: Vec<&str> = Vec::new();
                if let Some(t) = var.time_dim.as_deref() {
                    dn.push(t);
                }
                dn.extend(var.dimnames.iter().map(|s| s.as_str()));
                let (wname, bs, cratios): (&str, Vec<usize>, Vec<usize>) = if var.compressed {
                    (
                        self.config.wavelet.as_str(),
                        self.block_size_for(sdims.len()),
                        self.config.cratios.clone(),
                    )
                } else {
                    ("", vec![1], vec![1])
                };
                w.def_var(
                    varname,
                    var.dtype,
                    &dn,
                    wname,
                    &bs,
                    &cratios,
                    var.missing_value,
                )?;
                w
            };
            w.open_var_write(varname, lod)?;
            if var.compressed {
                let bs = full_rank_bs(&self.block_size_for(sdims.len()), sdims.len());
                bs0 = bs[0];
            }
            Some(w)
        };
        debug!(var = varname, ts, path = %path.display(), "opened for write");
        self.session = Some(Session {
            varname: varname.to_string(),
            file_ts,
            ts,
            writing: true,
            in_master,
            wasp,
            sdims,
            time_varying: var.time_varying(),
            bs0,
            slice_idx: 0,
            slab: Vec::new(),
            slab_filled: 0,
        });
        Ok(())
    }

    /// Open a variable for reading one timestep at refinement level
    /// `level` and ladder depth `lod` (negative: finest / full; values out
    /// of range clamp).
    pub fn open_variable_read(
        &mut self,
        ts: usize,
        varname: &str,
        level: i32,
        lod: i32,
    ) -> Result<()> {
        self.close_session();
        let var = self.var_meta(varname)?.clone();
        let (path, file_ts, _) = self.get_path(varname, ts)?;
        let in_master = self.lives_in_master(&var);
        let (wasp, sdims) = if in_master {
            (None, self.metadata.var_dims(&var))
        } else {
            let mut w = Wasp::open(&path, false)?;
            w.open_var_read(varname, level, lod)?;
            let mut dims = w.inq_var_dimlens(varname, level)?;
            if var.time_varying() {
                dims.remove(0);
            }
            (Some(w), dims)
        };
        debug!(var = varname, ts, level, lod, "opened for read");
        self.session = Some(Session {
            varname: varname.to_string(),
            file_ts,
            ts,
            writing: false,
            in_master,
            wasp,
            sdims,
            time_varying: var.time_varying(),
            bs0: 1,
            slice_idx: 0,
            slab: Vec::new(),
            slab_filled: 0,
        });
        Ok(())
    }

    fn session_for(&self, writing: bool) -> Result<&Session> {
        match &self.session {
            Some(s) if s.writing == writing => Ok(s),
            _ => Err(VdcError::NotOpen(if writing { "writing" } else { "reading" })),
        }
    }

    /// Write the open variable's whole timestep.
    pub fn write<E: Element>(&self, data: &[E], mask: Option<&[u8]>) -> Result<()> {
        let s = self.session_for(true)?;
        let n: usize = s.sdims.iter().product();
        if data.len() != n {
            return Err(VdcError::InvalidArgument(format!(
                "buffer holds {} elements, timestep has {}",
                data.len(),
                n
            )));
        }
        let (start, count) = s.slab_coords(&vec![0; s.sdims.len()], &s.sdims);
        match &s.wasp {
            Some(w) => w.put_vara(&start, &count, data, mask)?,
            None => self.master.put_vara(&s.varname, &start, &count, data)?,
        }
        Ok(())
    }

    /// Read the open variable's whole timestep at the opened level.
    pub fn read<E: Element>(&self, data: &mut [E]) -> Result<()> {
        let s = self.session_for(false)?;
        let dims = s.sdims.clone();
        self.read_region(&vec![0; dims.len()], &dims, data)
    }

    /// Read a spatial region of the open timestep. Coordinates are in the
    /// opened refinement level's address space.
    pub fn read_region<E: Element>(
        &self,
        start: &[usize],
        count: &[usize],
        data: &mut [E],
    ) -> Result<()> {
        let s = self.session_for(false)?;
        let (fstart, fcount) = s.slab_coords(start, count);
        match &s.wasp {
            Some(w) => w.get_vara(&fstart, &fcount, data)?,
            None => self.master.get_vara(&s.varname, &fstart, &fcount, data)?,
        }
        Ok(())
    }

    /// Write the next slice along the slowest spatial dimension. Slices
    /// are buffered into block-thick slabs so compressed variables see
    /// aligned writes; the final slab flushes against the array boundary.
    pub fn write_slice<E: Element>(&mut self, slice: &[E]) -> Result<()> {
        let master = &self.master;
        let s = self
            .session
            .as_mut()
            .filter(|s| s.writing)
            .ok_or(VdcError::NotOpen("writing"))?;
        let slen = s.slice_len();
        if slice.len() != slen {
            return Err(VdcError::InvalidArgument(format!(
                "slice holds {} elements, expected {}",
                slice.len(),
                slen
            )));
        }
        if s.slice_idx >= s.sdims[0] {
            return Err(VdcError::InvalidArgument(
                "all slices already written".to_string(),
            ));
        }
        s.slab.extend(slice.iter().map(|v| v.to_f64()));
        s.slab_filled += 1;
        s.slice_idx += 1;
        let last = s.slice_idx == s.sdims[0];
        if s.slab_filled == s.bs0 || last {
            let z0 = s.slice_idx - s.slab_filled;
            let mut start = vec![0; s.sdims.len()];
            start[0] = z0;
            let mut count = s.sdims.clone();
            count[0] = s.slab_filled;
            let typed: Vec<E> = s.slab.iter().map(|&v| E::from_f64(v)).collect();
            let (fstart, fcount) = s.slab_coords(&start, &count);
            match &s.wasp {
                Some(w) => w.put_vara(&fstart, &fcount, &typed, None)?,
                None => master.put_vara(&s.varname, &fstart, &fcount, &typed)?,
            }
            s.slab.clear();
            s.slab_filled = 0;
        }
        Ok(())
    }

    /// Read the next slice along the slowest spatial dimension of the
    /// opened level.
    pub fn read_slice<E: Element>(&mut self, slice: &mut [E]) -> Result<()> {
        let (start, count) = {
            let s = self
                .session
                .as_ref()
                .filter(|s| !s.writing)
                .ok_or(VdcError::NotOpen("reading"))?;
            if s.slice_idx >= s.sdims[0] {
                return Err(VdcError::InvalidArgument(
                    "all slices already read".to_string(),
                ));
            }
            let mut start = vec![0; s.sdims.len()];
            start[0] = s.slice_idx;
            let mut count = s.sdims.clone();
            count[0] = 1;
            (start, count)
        };
        self.read_region(&start, &count, slice)?;
        if let Some(s) = self.session.as_mut() {
            s.slice_idx += 1;
        }
        Ok(())
    }

    /// Close the open variable session, flushing its backing files.
    pub fn close_variable(&mut self) -> Result<()> {
        if let Some(mut s) = self.session.take() {
            if s.writing && s.slab_filled > 0 {
                warn!(
                    var = s.varname,
                    pending = s.slab_filled,
                    "dropping unflushed slices on close"
                );
            }
            if let Some(w) = s.wasp.take() {
                w.close()?;
            }
        }
        Ok(())
    }

    fn close_session(&mut self) {
        if let Err(e) = self.close_variable() {
            warn!(error = %e, "error closing previous session");
        }
    }

    /// Write a whole variable, all timesteps, at full fidelity.
    pub fn put_var<E: Element>(&mut self, varname: &str, data: &[E]) -> Result<()> {
        let var = self.var_meta(varname)?.clone();
        let numts = self.metadata.num_timesteps(&var);
        let gp = self.metadata.grid_points(&var);
        if data.len() != numts * gp {
            return Err(VdcError::InvalidArgument(format!(
                "buffer holds {} elements, variable has {}",
                data.len(),
                numts * gp
            )));
        }
        for ts in 0..numts {
            self.open_variable_write(ts, varname, -1)?;
            self.write(&data[ts * gp..(ts + 1) * gp], None)?;
            self.close_variable()?;
        }
        Ok(())
    }

    /// Read a whole variable, all timesteps, at full fidelity.
    pub fn get_var<E: Element>(&mut self, varname: &str, data: &mut [E]) -> Result<()> {
        let var = self.var_meta(varname)?.clone();
        let numts = self.metadata.num_timesteps(&var);
        let gp = self.metadata.grid_points(&var);
        if data.len() != numts * gp {
            return Err(VdcError::InvalidArgument(format!(
                "buffer holds {} elements, variable has {}",
                data.len(),
                numts * gp
            )));
        }
        for ts in 0..numts {
            self.open_variable_read(ts, varname, -1, -1)?;
            self.read(&mut data[ts * gp..(ts + 1) * gp])?;
            self.close_variable()?;
        }
        Ok(())
    }

    /// Flush and close the dataset.
    pub fn close(mut self) -> Result<()> {
        self.close_session();
        self.master.flush()?;
        Ok(())
    }
}

impl Session {
    /// Prepend the timestep coordinate for time-varying variables.
    fn slab_coords(&self, start: &[usize], count: &[usize]) -> (Vec<usize>, Vec<usize>) {
        if self.time_varying {
            let mut s = vec![if self.in_master { self.ts } else { self.file_ts }];
            s.extend_from_slice(start);
            let mut c = vec![1];
            c.extend_from_slice(count);
            (s, c)
        } else {
            (start.to_vec(), count.to_vec())
        }
    }
}

fn digits(mut n: usize) -> usize {
    let mut d = 1;
    while n >= 10 {
        n /= 10;
        d += 1;
    }
    d
}

/// Left-pad a block size with ones to a full rank.
fn full_rank_bs(bs: &[usize], rank: usize) -> Vec<usize> {
    let mut out = vec![1; rank.saturating_sub(bs.len())];
    out.extend_from_slice(bs);
    out
}

//! The parallel block codec engine.
//!
//! Threads are spawned per top-level call and partition the block odometer
//! statically: worker `t` of `N` takes blocks `t, t+N, t+2N, …`. Transform
//! work runs unlocked; container I/O is serialized by one mutex and scatter
//! into the caller's output buffer by another. Workers finish their current
//! block and stop early once any worker has failed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use container::{Container, Element};
use tracing::debug;
use wavelet::{Compressor, SignificanceMap, Wavelet};

use crate::blocking::{block, unblock};
use crate::codec::{fetch_block, fetch_block_plain, store_block, store_block_plain};
use crate::error::{Result, WaspError};
use crate::math::{vdiff, vproduct, VectorInc};
use crate::padding::PadMode;

/// Everything the workers need to know about the open variable.
#[derive(Debug, Clone)]
pub struct VarCodec<'a> {
    pub var: &'a str,
    /// Block shape at full resolution, one entry per variable dimension.
    pub bs: &'a [usize],
    /// `None` for the uncompressed blocked path: blocks move as raw
    /// samples, no transform.
    pub wavelet: Option<Wavelet>,
    pub cratios: &'a [usize],
    /// Per-segment coefficient counts for the full ladder (empty when
    /// uncompressed).
    pub counts: &'a [usize],
    pub mode: PadMode,
    pub nthreads: usize,
}

fn worker_count(nthreads: usize, nblocks: usize) -> usize {
    nthreads.max(1).min(nblocks.max(1))
}

/// Encode and store every block of a put region.
///
/// `data` (and `mask`, when given) has shape `count` and sits at voxel
/// `start` of the full array; `start` and `count` are already aligned or
/// boundary-flush, so the covered blocks are exactly those of
/// `VectorInc::new(start, acount, bs)`.
pub fn write_blocks<E: Element>(
    files: &[Container],
    codec: &VarCodec<'_>,
    data: &[E],
    mask: Option<&[u8]>,
    start: &[usize],
    count: &[usize],
    acount: &[usize],
) -> Result<()> {
    let inc = VectorInc::new(start, acount, codec.bs);
    let nblocks = inc.num();
    let nworkers = worker_count(codec.nthreads, nblocks);
    debug!(var = codec.var, nblocks, nworkers, "writing blocks");

    let io = Mutex::new(());
    let failed = AtomicBool::new(false);
    let first_err: Mutex<Option<WaspError>> = Mutex::new(None);

    std::thread::scope(|s| {
        for t in 0..nworkers {
            let inc = &inc;
            let io = &io;
            let failed = &failed;
            let first_err = &first_err;
            s.spawn(move || {
                let run = || -> Result<()> {
                    let mut enc = match codec.wavelet {
                        Some(w) => {
                            let compressor = Compressor::new(codec.bs, w)?;
                            let keep: usize = codec.counts.iter().sum();
                            let maps = vec![
                                SignificanceMap::new(&[compressor.num_coeffs()]);
                                codec.counts.len()
                            ];
                            Some((compressor, vec![0.0f64; keep], maps))
                        }
                        None => None,
                    };
                    let mut blk = vec![0.0f64; vproduct(codec.bs)];
                    for i in (t..nblocks).step_by(nworkers) {
                        if failed.load(Ordering::Relaxed) {
                            return Ok(());
                        }
                        let bstart = inc.ith(i);
                        let rel = vdiff(&bstart, start);
                        let range = block(
                            data,
                            mask,
                            count,
                            &rel,
                            &mut blk,
                            codec.bs,
                            codec.mode,
                        );
                        let bcoords = inc.ith_block(i);
                        match enc.as_mut() {
                            Some((compressor, coeffs, maps)) => {
                                compressor.decompose(&blk, coeffs, codec.counts, maps)?;
                                let _guard = io.lock().unwrap();
                                store_block::<E>(
                                    files,
                                    codec.var,
                                    &bcoords,
                                    compressor,
                                    codec.counts,
                                    codec.cratios,
                                    coeffs,
                                    maps,
                                    range,
                                )?;
                            }
                            None => {
                                let _guard = io.lock().unwrap();
                                store_block_plain::<E>(files, codec.var, &bcoords, &blk)?;
                            }
                        }
                    }
                    Ok(())
                };
                if let Err(e) = run() {
                    failed.store(true, Ordering::Relaxed);
                    let mut slot = first_err.lock().unwrap();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                }
            });
        }
    });

    match first_err.into_inner().unwrap() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Fetch and decode every block overlapping a get region.
///
/// Coordinates are in the address space of refinement level `level`:
/// `bs_level` is the block shape there and `start`/`count` the requested
/// region. With `blocked` output the blocks land whole and contiguous in
/// odometer order; otherwise each is clipped into the `count`-shaped output.
#[allow(clippy::too_many_arguments)]
pub fn read_blocks<E: Element>(
    files: &[Container],
    codec: &VarCodec<'_>,
    level: usize,
    lod: usize,
    bs_level: &[usize],
    data: &mut [E],
    start: &[usize],
    count: &[usize],
    blocked: bool,
) -> Result<()> {
    let (astart, acount) = crate::math::block_align(start, count, bs_level);
    let inc = VectorInc::new(&astart, &acount, bs_level);
    let nblocks = inc.num();
    let nworkers = worker_count(codec.nthreads, nblocks);
    let blocklen = vproduct(bs_level);
    debug!(var = codec.var, nblocks, nworkers, level, lod, "reading blocks");

    let io = Mutex::new(());
    let out = Mutex::new(data);
    let failed = AtomicBool::new(false);
    let first_err: Mutex<Option<WaspError>> = Mutex::new(None);

    std::thread::scope(|s| {
        for t in 0..nworkers {
            let inc = &inc;
            let io = &io;
            let out = &out;
            let failed = &failed;
            let first_err = &first_err;
            s.spawn(move || {
                let run = || -> Result<()> {
                    let mut compressor = match codec.wavelet {
                        Some(w) => Some(Compressor::new(codec.bs, w)?),
                        None => None,
                    };
                    let mut blk = vec![0.0f64; blocklen];
                    for i in (t..nblocks).step_by(nworkers) {
                        if failed.load(Ordering::Relaxed) {
                            return Ok(());
                        }
                        let bcoords = inc.ith_block(i);
                        match compressor.as_mut() {
                            Some(compressor) => {
                                let (coeffs, maps, range) = {
                                    let _guard = io.lock().unwrap();
                                    fetch_block::<E>(
                                        files,
                                        codec.var,
                                        &bcoords,
                                        compressor,
                                        codec.counts,
                                        codec.cratios,
                                        lod,
                                    )?
                                };
                                compressor.reconstruct(&coeffs, &maps, level, &mut blk)?;
                                // Lossy reconstruction can ring past the
                                // stored data range; clamp it back.
                                for v in blk.iter_mut() {
                                    *v = v.clamp(range.0, range.1);
                                }
                            }
                            None => {
                                let _guard = io.lock().unwrap();
                                fetch_block_plain::<E>(files, codec.var, &bcoords, &mut blk)?;
                            }
                        }
                        let bstart = inc.ith(i);
                        let mut guard = out.lock().unwrap();
                        if blocked {
                            let dst = &mut guard[i * blocklen..(i + 1) * blocklen];
                            for (d, &v) in dst.iter_mut().zip(blk.iter()) {
                                *d = E::from_f64(v);
                            }
                        } else {
                            unblock(&blk, bs_level, &mut guard[..], count, start, &bstart);
                        }
                    }
                    Ok(())
                };
                if let Err(e) = run() {
                    failed.store(true, Ordering::Relaxed);
                    let mut slot = first_err.lock().unwrap();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                }
            });
        }
    });

    match first_err.into_inner().unwrap() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

//! Time-stepped ablation of implicit surfaces.
//!
//! The driver owns one corner value per grid node copy (4 in 2D, 8 in 3D)
//! for every owned cell. Each period it pulls a per-cell decrement from its
//! source, spreads the decrement over the cell's corners smallest-first,
//! synchronizes the up-to-8 duplicated copies of every corner across owning
//! processes, then rebuilds the implicit surfaces and the per-cell cut
//! geometry from the updated values.
//!
//! The synchronization is the delicate part: every copy of a corner must
//! stay bit-identical on every process. The stencil sum that applies the
//! decrements therefore runs in a fixed nested-loop order on every rank,
//! and the stochastic source draws for all global cells in ascending id
//! order so the result cannot depend on the cell-to-process assignment.

use glam::{DVec2, DVec3};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashMap;

use cutcell::geom::CornerState;
use cutcell::{boundary_face_segments, cleanup_face, MarchingCubes, MarchingSquares};
use cutcell::{Cut2d, Cut3d, SurfStore};

use crate::comm::Comm;
use crate::error::AblateError;
use crate::grid::{CellKind, GridBlock};
use crate::source::DeltaSource;
use crate::util::Timed;

#[cfg(test)]
mod tests;

/// Corner values within this distance of the threshold are snapped to
/// `thresh - EPSILON` after each sync; the scale is 0..255.
const EPSILON: f64 = 1.0e-4;

/// The ablation driver for one process.
pub struct Ablate {
    /// Steps between ablation updates.
    pub nevery: i32,
    /// Source scale factor; for the random source, the fraction of cells
    /// decremented per step.
    pub scale: f64,
    /// Iso-threshold separating solid (>= thresh) from flow.
    pub thresh: f64,
    groupbit: u32,
    sgroupbit: u32,
    source: DeltaSource,
    rng: ChaCha8Rng,

    dim: usize,
    ncorner: usize,
    nglocal: usize,

    /// Corner values, `ncorner` per owned cell.
    cvalues: Vec<f64>,
    /// Optional per-cell surface type.
    tvalues: Option<Vec<i32>>,
    /// Block indices of each owned cell, 1-based.
    ixyz: Vec<[i32; 3]>,

    // Per-step scratch.
    celldelta: Vec<f64>,
    cdelta: Vec<f64>,

    cut2d: Cut2d,
    cut3d: Cut3d,

    /// Allreduced total decrement of the last step.
    sum_delta: f64,
    storeflag: bool,
}

impl Ablate {
    /// Create a driver. Fails on invalid periods, scales, or an
    /// incompatible source.
    pub fn new(
        nevery: i32,
        scale: f64,
        source: DeltaSource,
        seed: u64,
        groupbit: u32,
        sgroupbit: u32,
    ) -> Result<Ablate, AblateError> {
        if nevery < 0 {
            return Err(AblateError::Config("nevery must be non-negative".into()));
        }
        if scale < 0.0 {
            return Err(AblateError::Config("scale must be non-negative".into()));
        }
        match &source {
            DeltaSource::Random { maxrandom } => {
                if *maxrandom < 1 {
                    return Err(AblateError::Config("maxrandom must be at least 1".into()));
                }
            }
            DeltaSource::Field { source, column } => {
                let freq = source.per_grid_freq();
                if freq <= 0 || nevery % freq != 0 {
                    return Err(AblateError::Config(format!(
                        "source per-grid frequency {freq} does not divide nevery {nevery}"
                    )));
                }
                let cols = source.columns();
                if *column == 0 && cols != 0 {
                    return Err(AblateError::Config(
                        "source produces an array, a column is required".into(),
                    ));
                }
                if *column > cols {
                    return Err(AblateError::Config(format!(
                        "source column {column} out of range (source has {cols})"
                    )));
                }
            }
        }

        Ok(Ablate {
            nevery,
            scale,
            thresh: 0.0,
            groupbit,
            sgroupbit,
            source,
            rng: ChaCha8Rng::seed_from_u64(seed),
            dim: 3,
            ncorner: 8,
            nglocal: 0,
            cvalues: Vec::new(),
            tvalues: None,
            ixyz: Vec::new(),
            celldelta: Vec::new(),
            cdelta: Vec::new(),
            cut2d: Cut2d::default(),
            cut3d: Cut3d::default(),
            sum_delta: 0.0,
            storeflag: false,
        })
    }

    #[inline]
    fn in_group(&self, grid: &GridBlock, icell: usize) -> bool {
        grid.cells[icell].mask & self.groupbit != 0
    }

    #[inline]
    fn corner_row(&self, icell: usize) -> &[f64] {
        &self.cvalues[icell * self.ncorner..(icell + 1) * self.ncorner]
    }

    /// Store the initial corner values and build the first surfaces.
    ///
    /// Block indices come from rounding `(cell.lo - cornerlo) / xyzsize`.
    /// Corner values with no threshold crossing anywhere in their corner
    /// neighbourhood are pushed to the extremes (0 or 255) before the first
    /// extraction.
    #[allow(clippy::too_many_arguments)]
    pub fn store_corners(
        &mut self,
        grid: &mut GridBlock,
        surf: &mut SurfStore,
        comm: &mut dyn Comm,
        cornerlo: DVec3,
        xyzsize: DVec3,
        cvalues0: &[f64],
        tvalues0: Option<&[i32]>,
        thresh: f64,
    ) -> Result<(), AblateError> {
        self.dim = grid.dim;
        self.ncorner = if grid.dim == 2 { 4 } else { 8 };
        self.nglocal = grid.nlocal;
        self.thresh = thresh;

        if cvalues0.len() != grid.nlocal * self.ncorner {
            return Err(AblateError::Config(format!(
                "expected {} corner values, got {}",
                grid.nlocal * self.ncorner,
                cvalues0.len()
            )));
        }
        if let Some(t) = tvalues0 {
            if t.len() != grid.nlocal {
                return Err(AblateError::Config("tvalues length mismatch".into()));
            }
        }

        self.cvalues = cvalues0.to_vec();
        self.tvalues = tvalues0.map(|t| t.to_vec());
        self.celldelta = vec![0.0; grid.nlocal];
        self.cdelta = vec![0.0; grid.nlocal * self.ncorner];

        self.ixyz = vec![[0; 3]; grid.nlocal];
        for icell in 0..grid.nlocal {
            if !self.in_group(grid, icell) {
                continue;
            }
            let lo = grid.cells[icell].lo;
            self.ixyz[icell] = [
                ((lo.x - cornerlo.x) / xyzsize.x + 0.5) as i32 + 1,
                ((lo.y - cornerlo.y) / xyzsize.y + 0.5) as i32 + 1,
                ((lo.z - cornerlo.z) / xyzsize.z + 0.5) as i32 + 1,
            ];
        }

        // Push fully-interior corner values to 255 and fully-exterior ones
        // to 0; needs the neighbours' values for shared corners.
        let ghost = self.exchange_corner_data(grid, comm, &self.cvalues)?;
        self.push_corners(grid, &ghost)?;

        self.storeflag = true;
        self.create_surfs(grid, surf, comm, true)
    }

    /// The per-period pipeline: source, decrement, sync, rebuild.
    pub fn end_of_step(
        &mut self,
        grid: &mut GridBlock,
        surf: &mut SurfStore,
        comm: &mut dyn Comm,
    ) -> Result<(), AblateError> {
        if !self.storeflag {
            return Err(AblateError::Config(
                "corner point values not stored".into(),
            ));
        }
        let _t = Timed::debug("ablate step");

        match self.source {
            DeltaSource::Random { .. } => self.set_delta_random(grid, comm),
            DeltaSource::Field { .. } => self.set_delta_field(grid, comm),
        }

        self.decrement(grid);
        self.sync(grid, comm)?;
        self.create_surfs(grid, surf, comm, false)
    }

    /// Random per-cell decrement. Every rank draws for every global cell in
    /// ascending id order, so the decrement pattern is identical no matter
    /// which rank owns which cells.
    fn set_delta_random(&mut self, grid: &GridBlock, comm: &mut dyn Comm) {
        let DeltaSource::Random { maxrandom } = &self.source else {
            return;
        };
        let maxrandom = *maxrandom;

        for id in 1..=grid.ncell_global() {
            let rn1 = self.rng.gen::<f64>();
            let rn2 = (self.rng.gen::<f64>() * maxrandom as f64) as i32 + 1;
            let Some(icell) = grid.local_from_id(id) else {
                continue;
            };
            if icell >= grid.nlocal {
                continue;
            }
            self.celldelta[icell] = if rn1 > self.scale { 0.0 } else { rn2 as f64 };
        }

        let mut sum = 0.0;
        for icell in 0..grid.nlocal {
            if !self.in_group(grid, icell) {
                continue;
            }
            sum += self.celldelta[icell];
        }
        self.sum_delta = comm.allreduce_sum(sum);
    }

    /// External per-cell decrement: `nevery * scale * source_value`.
    fn set_delta_field(&mut self, grid: &GridBlock, comm: &mut dyn Comm) {
        let prefactor = self.nevery as f64 * self.scale;
        let DeltaSource::Field { source, column } = &mut self.source else {
            return;
        };

        let mut values = vec![0.0; grid.nlocal];
        source.compute_per_grid(grid, *column, &mut values);
        for icell in 0..grid.nlocal {
            self.celldelta[icell] = prefactor * values[icell];
        }

        let mut sum = 0.0;
        for icell in 0..grid.nlocal {
            if !self.in_group(grid, icell) {
                continue;
            }
            sum += self.celldelta[icell];
        }
        self.sum_delta = comm.allreduce_sum(sum);
    }

    /// Spread each cell's decrement over its corners: repeatedly take the
    /// smallest strictly-positive corner not yet touched, zeroing it if the
    /// remaining total exceeds it. No corner ever goes negative.
    fn decrement(&mut self, grid: &GridBlock) {
        let nc = self.ncorner;

        for icell in 0..grid.nlocal {
            if !self.in_group(grid, icell) {
                continue;
            }

            let cdelta = &mut self.cdelta[icell * nc..(icell + 1) * nc];
            cdelta.fill(0.0);
            let corners = &self.cvalues[icell * nc..(icell + 1) * nc];

            let mut total = self.celldelta[icell];
            while total > 0.0 {
                let mut imin = None;
                let mut minvalue = 256.0;
                for i in 0..nc {
                    if corners[i] > 0.0 && corners[i] < minvalue && cdelta[i] == 0.0 {
                        imin = Some(i);
                        minvalue = corners[i];
                    }
                }
                let Some(imin) = imin else { break };
                if total < corners[imin] {
                    cdelta[imin] += total;
                    total = 0.0;
                } else {
                    cdelta[imin] = corners[imin];
                    total -= corners[imin];
                }
            }
        }
    }

    /// Deliver one payload of per-corner data for each owned in-scope cell
    /// to every other rank owning a cell that shares a corner with it, and
    /// return the received rows indexed by ghost cell.
    fn exchange_corner_data(
        &self,
        grid: &GridBlock,
        comm: &mut dyn Comm,
        data: &[f64],
    ) -> Result<Vec<f64>, AblateError> {
        let me = comm.rank();
        let nc = self.ncorner;

        let mut sends: Vec<(usize, Vec<f64>)> = Vec::new();
        for icell in 0..grid.nlocal {
            if !self.in_group(grid, icell) {
                continue;
            }
            let [ix, iy, iz] = self.ixyz[icell];
            let ifirst = sends.len();

            for jz in -1..=1 {
                for jy in -1..=1 {
                    for jx in -1..=1 {
                        if jx == 0 && jy == 0 && jz == 0 {
                            continue;
                        }
                        if ix + jx < 1 || ix + jx > grid.nx {
                            continue;
                        }
                        if iy + jy < 1 || iy + jy > grid.ny {
                            continue;
                        }
                        if iz + jz < 1 || iz + jz > grid.nz {
                            continue;
                        }

                        let jcell = grid.walk_to_neigh(icell, jx, jy, jz)?;
                        let proc = grid.cells[jcell].proc;
                        if proc == me {
                            continue;
                        }
                        // One payload per (cell, peer) pair.
                        if sends[ifirst..].iter().any(|(p, _)| *p == proc) {
                            continue;
                        }
                        let mut payload = Vec::with_capacity(1 + nc);
                        payload.push(grid.cells[icell].id as f64);
                        payload.extend_from_slice(&data[icell * nc..(icell + 1) * nc]);
                        sends.push((proc, payload));
                    }
                }
            }
        }

        let recv = comm.exchange(sends);

        let mut ghost = vec![0.0; grid.nghost * nc];
        for payload in recv {
            let id = payload[0] as u64;
            let ilocal = grid.local_from_id(id).ok_or_else(|| {
                AblateError::Config(format!("received corner data for unknown cell {id}"))
            })?;
            if ilocal < grid.nlocal {
                return Err(AblateError::Config(format!(
                    "received corner data for owned cell {id}"
                )));
            }
            let g = ilocal - grid.nlocal;
            ghost[g * nc..(g + 1) * nc].copy_from_slice(&payload[1..1 + nc]);
        }

        Ok(ghost)
    }

    /// Apply the corner decrements consistently across all copies.
    ///
    /// Every owned corner sums the contributions of the 2x2x2 stencil of
    /// cells sharing it, walking the stencil in the same descending-jcorner
    /// nested order on every rank so each duplicated copy accumulates the
    /// identical floating-point sum. The sum is then subtracted, clamped at
    /// zero, and near-threshold values are snapped away from the threshold.
    fn sync(&mut self, grid: &GridBlock, comm: &mut dyn Comm) -> Result<(), AblateError> {
        let nc = self.ncorner;
        let ghost = self.exchange_corner_data(grid, comm, &self.cdelta)?;

        for icell in 0..grid.nlocal {
            if !self.in_group(grid, icell) {
                continue;
            }
            let [ix, iy, iz] = self.ixyz[icell];

            for i in 0..nc {
                // Offset of the lower cell of the 2x2x2 stencil sharing
                // corner i.
                let ixfirst = (i as i32 % 2) - 1;
                let iyfirst = (i as i32 / 2 % 2) - 1;
                let izfirst = if self.dim == 2 {
                    0
                } else {
                    (i as i32 / 4) - 1
                };

                let mut total = 0.0;
                let mut jcorner = nc as i32;

                for jz in izfirst..=izfirst + 1 {
                    for jy in iyfirst..=iyfirst + 1 {
                        for jx in ixfirst..=ixfirst + 1 {
                            jcorner -= 1;

                            if ix + jx < 1 || ix + jx > grid.nx {
                                continue;
                            }
                            if iy + jy < 1 || iy + jy > grid.ny {
                                continue;
                            }
                            if iz + jz < 1 || iz + jz > grid.nz {
                                continue;
                            }

                            let jcell = grid.walk_to_neigh(icell, jx, jy, jz)?;
                            let jc = jcorner as usize;
                            if jcell < grid.nlocal {
                                total += self.cdelta[jcell * nc + jc];
                            } else {
                                total += ghost[(jcell - grid.nlocal) * nc + jc];
                            }
                        }
                    }
                }

                let v = &mut self.cvalues[icell * nc + i];
                if total > *v {
                    *v = 0.0;
                } else {
                    *v -= total;
                }
            }
        }

        // Keep every corner away from the threshold so the extraction never
        // sees an ambiguous corner.
        for icell in 0..grid.nlocal {
            if !self.in_group(grid, icell) {
                continue;
            }
            for i in 0..nc {
                let v = &mut self.cvalues[icell * nc + i];
                if (*v - self.thresh).abs() < EPSILON {
                    *v = self.thresh - EPSILON;
                }
            }
        }

        Ok(())
    }

    /// Push corner values with no crossing anywhere around them to the
    /// extremes: a corner all of whose sharing cells are entirely solid
    /// becomes 255, entirely void becomes 0.
    fn push_corners(&mut self, grid: &GridBlock, ghost: &[f64]) -> Result<(), AblateError> {
        let nc = self.ncorner;
        let mut pushed: Vec<(usize, f64)> = Vec::new();

        for icell in 0..grid.nlocal {
            if !self.in_group(grid, icell) {
                continue;
            }
            let [ix, iy, iz] = self.ixyz[icell];

            for i in 0..nc {
                let ixfirst = (i as i32 % 2) - 1;
                let iyfirst = (i as i32 / 2 % 2) - 1;
                let izfirst = if self.dim == 2 {
                    0
                } else {
                    (i as i32 / 4) - 1
                };

                let mut all_solid = true;
                let mut all_void = true;

                for jz in izfirst..=izfirst + 1 {
                    for jy in iyfirst..=iyfirst + 1 {
                        for jx in ixfirst..=ixfirst + 1 {
                            if ix + jx < 1 || ix + jx > grid.nx {
                                continue;
                            }
                            if iy + jy < 1 || iy + jy > grid.ny {
                                continue;
                            }
                            if iz + jz < 1 || iz + jz > grid.nz {
                                continue;
                            }

                            let jcell = grid.walk_to_neigh(icell, jx, jy, jz)?;
                            let row = if jcell < grid.nlocal {
                                &self.cvalues[jcell * nc..(jcell + 1) * nc]
                            } else {
                                let g = jcell - grid.nlocal;
                                &ghost[g * nc..(g + 1) * nc]
                            };
                            for &v in row {
                                all_solid &= v >= self.thresh;
                                all_void &= v < self.thresh;
                            }
                        }
                    }
                }

                if all_solid {
                    pushed.push((icell * nc + i, 255.0));
                } else if all_void {
                    pushed.push((icell * nc + i, 0.0));
                }
            }
        }

        for (idx, v) in pushed {
            self.cvalues[idx] = v;
        }
        Ok(())
    }

    /// Rebuild the implicit surfaces from the current corner values, then
    /// re-cut and re-classify every cell.
    fn create_surfs(
        &mut self,
        grid: &mut GridBlock,
        surf: &mut SurfStore,
        comm: &mut dyn Comm,
        outflag: bool,
    ) -> Result<(), AblateError> {
        let _t = Timed::debug("create_surfs");

        surf.clear();
        grid.clear_splits();

        let mask = 1 | self.sgroupbit;
        for icell in 0..grid.nlocal {
            if !self.in_group(grid, icell) {
                continue;
            }
            let cell = &grid.cells[icell];
            let typ = self.tvalues.as_ref().map_or(0, |t| t[icell]);

            if self.dim == 2 {
                let mut v = [0.0; 4];
                v.copy_from_slice(self.corner_row(icell));
                let ms = MarchingSquares::new(self.thresh);
                ms.invoke_cell(
                    cell.id,
                    cell.lo.truncate(),
                    cell.hi.truncate(),
                    &v,
                    typ,
                    mask,
                    surf,
                );
            } else {
                let mut v = [0.0; 8];
                v.copy_from_slice(self.corner_row(icell));
                let mc = MarchingCubes::new(self.thresh);
                mc.invoke_cell(cell.id, cell.lo, cell.hi, &v, typ, mask, surf)?;
            }
        }

        let nlocal_surf = surf.nlocal();
        let nsurf_global = comm.allreduce_sum_u64(nlocal_surf as u64);
        surf.set_count(nlocal_surf, nsurf_global);

        if self.dim == 2 {
            surf.compute_line_normals();
        } else {
            surf.compute_tri_normals();
        }

        if outflag {
            log::info!("ablate surfaces: {nlocal_surf} local, {nsurf_global} global");
        }

        // Face-consistency pass over shared faces; needs ghost-cell surface
        // visibility and the freshly computed normals.
        if self.dim == 3 {
            self.cleanup(grid, surf, comm)?;
        }

        self.cut_cells(grid, surf)
    }

    /// Enforce that the triangles of face-adjacent cells induce identical
    /// boundary segments on the shared face.
    fn cleanup(
        &mut self,
        grid: &GridBlock,
        surf: &mut SurfStore,
        comm: &mut dyn Comm,
    ) -> Result<(), AblateError> {
        let me = comm.rank();

        let mut by_cell: FxHashMap<u64, Vec<usize>> = FxHashMap::default();
        for (i, tri) in surf.tris.iter().enumerate() {
            by_cell.entry(tri.cell).or_default().push(i);
        }

        // Ship boundary-cell triangles to the ranks owning face neighbours.
        let mut sends: Vec<(usize, Vec<f64>)> = Vec::new();
        for icell in 0..grid.nlocal {
            if !self.in_group(grid, icell) {
                continue;
            }
            let cell = &grid.cells[icell];
            let mut sent_to: Vec<usize> = Vec::new();
            for f in 0..6 {
                let jn = cell.neigh[f];
                if jn < 0 {
                    continue;
                }
                let jc = jn as usize;
                if jc < grid.nlocal {
                    continue;
                }
                let proc = grid.cells[jc].proc;
                if proc == me || sent_to.contains(&proc) {
                    continue;
                }
                sent_to.push(proc);

                let tris = by_cell.get(&cell.id).map(Vec::as_slice).unwrap_or(&[]);
                let mut payload = Vec::with_capacity(2 + tris.len() * 9);
                payload.push(cell.id as f64);
                payload.push(tris.len() as f64);
                for &it in tris {
                    let (p1, p2, p3) = surf.tri_pts(&surf.tris[it]);
                    for p in [p1, p2, p3] {
                        payload.extend_from_slice(&[p.x, p.y, p.z]);
                    }
                }
                sends.push((proc, payload));
            }
        }

        let recv = comm.exchange(sends);
        let mut ghost_tris: FxHashMap<u64, Vec<[DVec3; 3]>> = FxHashMap::default();
        for payload in recv {
            let id = payload[0] as u64;
            let ntri = payload[1] as usize;
            let mut tris = Vec::with_capacity(ntri);
            for t in 0..ntri {
                let base = 2 + t * 9;
                tris.push([
                    DVec3::new(payload[base], payload[base + 1], payload[base + 2]),
                    DVec3::new(payload[base + 3], payload[base + 4], payload[base + 5]),
                    DVec3::new(payload[base + 6], payload[base + 7], payload[base + 8]),
                ]);
            }
            ghost_tris.insert(id, tris);
        }

        // Verify every shared face from the side that owns it.
        let mut nflip = 0;
        for icell in 0..grid.nlocal {
            if !self.in_group(grid, icell) {
                continue;
            }
            let cell = &grid.cells[icell];
            let Some(my_tris) = by_cell.get(&cell.id) else {
                continue;
            };

            for f in 0..6 {
                let jn = cell.neigh[f];
                if jn < 0 {
                    continue;
                }
                let jc = jn as usize;
                let dim_f = f / 2;
                let value = if f % 2 == 0 {
                    cell.lo[dim_f]
                } else {
                    cell.hi[dim_f]
                };

                let neigh_raw: Vec<[DVec3; 3]> = if jc < grid.nlocal {
                    by_cell
                        .get(&grid.cells[jc].id)
                        .map(|list| {
                            list.iter()
                                .map(|&it| {
                                    let (p1, p2, p3) = surf.tri_pts(&surf.tris[it]);
                                    [p1, p2, p3]
                                })
                                .collect()
                        })
                        .unwrap_or_default()
                } else {
                    ghost_tris
                        .get(&grid.cells[jc].id)
                        .cloned()
                        .unwrap_or_default()
                };

                let neigh_segs = boundary_face_segments(&neigh_raw, dim_f, value);
                nflip += cleanup_face(surf, cell.id, my_tris, dim_f, value, &neigh_segs)?;
            }
        }

        if nflip > 0 {
            log::debug!("surface cleanup flipped {nflip} triangles");
        }
        Ok(())
    }

    /// Cut every in-scope cell against its own surface elements and
    /// classify it from the result.
    fn cut_cells(&mut self, grid: &mut GridBlock, surf: &SurfStore) -> Result<(), AblateError> {
        let nc = self.ncorner;

        let mut by_cell: FxHashMap<u64, Vec<usize>> = FxHashMap::default();
        if self.dim == 2 {
            for (i, line) in surf.lines.iter().enumerate() {
                by_cell.entry(line.cell).or_default().push(i);
            }
        } else {
            for (i, tri) in surf.tris.iter().enumerate() {
                by_cell.entry(tri.cell).or_default().push(i);
            }
        }

        for icell in 0..grid.nlocal {
            if !self.in_group(grid, icell) {
                continue;
            }
            let (id, lo, hi) = {
                let cell = &grid.cells[icell];
                (cell.id, cell.lo, cell.hi)
            };

            let Some(csurfs) = by_cell.get(&id) else {
                // No surfaces: entirely solid or entirely flow.
                let solid = self.corner_row(icell).iter().all(|&v| v >= self.thresh);
                let cell = &mut grid.cells[icell];
                if solid {
                    cell.kind = CellKind::Inside;
                    cell.volume = 0.0;
                } else {
                    cell.kind = CellKind::Outside;
                    let d = hi - lo;
                    cell.volume = if self.dim == 2 {
                        d.x * d.y
                    } else {
                        d.x * d.y * d.z
                    };
                }
                continue;
            };

            let mut surfmap = vec![0i32; csurfs.len()];
            if self.dim == 2 {
                let lines: Vec<(DVec2, DVec2)> = csurfs
                    .iter()
                    .map(|&il| surf.line_pts(&surf.lines[il]))
                    .collect();
                let split = self.cut2d.split(
                    id,
                    lo.truncate(),
                    hi.truncate(),
                    &lines,
                    &mut surfmap,
                )?;
                let areas = self.cut2d.areas().to_vec();
                let cell_volume: f64 = areas.iter().sum();
                if split.nsplit > 1 {
                    let (xsub, xs) = split.xsplit.unwrap_or((0, lo.truncate()));
                    grid.set_split(icell, areas, xsub, xs.extend(lo.z));
                }
                let cell = &mut grid.cells[icell];
                cell.kind = CellKind::Overlap;
                cell.volume = cell_volume;
            } else {
                let split = self.cut3d.split(id, lo, hi, csurfs, surf, &mut surfmap)?;
                let vols = self.cut3d.volumes().to_vec();
                let cell_volume: f64 = vols.iter().sum();
                if split.nsplit > 1 {
                    let (xsub, xs) = split.xsplit.unwrap_or((0, lo));
                    grid.set_split(icell, vols, xsub, xs);
                }
                let cell = &mut grid.cells[icell];
                cell.kind = CellKind::Overlap;
                cell.volume = cell_volume;
                // A grazed, empty cell is entirely interior to the surface.
                if split.grazeflag && split.corners == [CornerState::Inside; 8] {
                    cell.kind = CellKind::Inside;
                }
            }
        }

        Ok(())
    }

    /// Allreduced total decrement applied in the last step.
    pub fn compute_scalar(&self) -> f64 {
        self.sum_delta
    }

    /// Running sums over the first `i + 1` corner columns, averaged:
    /// defined for `i` in 0..=3 only.
    pub fn compute_vector(
        &self,
        grid: &GridBlock,
        comm: &mut dyn Comm,
        i: usize,
    ) -> Result<f64, AblateError> {
        if i > 3 {
            return Err(AblateError::Config(format!(
                "compute_vector index {i} out of range 0..=3"
            )));
        }
        let nc = self.ncorner;
        let mut sum = 0.0;
        for icell in 0..grid.nlocal {
            if !self.in_group(grid, icell) {
                continue;
            }
            for k in 0..=i.min(nc - 1) {
                sum += self.cvalues[icell * nc + k];
            }
        }
        let total = comm.allreduce_sum(sum);
        Ok(total / (i + 1) as f64)
    }

    /// Pack one cell's migration payload: corner values, the optional type
    /// value, the three block indices, and one corner row per sub-cell of a
    /// split cell.
    pub fn pack_grid_one(&self, grid: &GridBlock, icell: usize, buf: &mut Vec<f64>) -> usize {
        let start = buf.len();
        let nc = self.ncorner;

        buf.extend_from_slice(self.corner_row(icell));
        if let Some(t) = &self.tvalues {
            buf.push(t[icell] as f64);
        }
        for k in 0..3 {
            buf.push(self.ixyz[icell][k] as f64);
        }

        let nsplit = grid.cells[icell].nsplit;
        if nsplit > 1 {
            for _ in 0..nsplit {
                buf.extend_from_slice(self.corner_row(icell));
            }
        }

        buf.len() - start
    }

    /// Unpack a migration payload into cell `icell`, growing the per-cell
    /// arrays if the cell is new. Returns the number of values consumed.
    pub fn unpack_grid_one(
        &mut self,
        grid: &GridBlock,
        icell: usize,
        buf: &[f64],
    ) -> Result<usize, AblateError> {
        let nc = self.ncorner;
        self.grow_percell(icell + 1);

        let mut m = 0;
        if buf.len() < nc + 3 {
            return Err(AblateError::Config("migration payload too short".into()));
        }
        self.cvalues[icell * nc..(icell + 1) * nc].copy_from_slice(&buf[..nc]);
        m += nc;

        if let Some(t) = &mut self.tvalues {
            t[icell] = buf[m] as i32;
            m += 1;
        }
        for k in 0..3 {
            self.ixyz[icell][k] = buf[m] as i32;
            m += 1;
        }

        // Sub-cell rows are parent copies; consume them.
        let nsplit = grid.cells[icell].nsplit;
        if nsplit > 1 {
            let need = nsplit * nc;
            if buf.len() < m + need {
                return Err(AblateError::Config("migration payload too short".into()));
            }
            m += need;
        }

        self.nglocal = self.nglocal.max(icell + 1);
        Ok(m)
    }

    /// Copy per-cell state from `icell` to `jcell` when a cell is compacted
    /// out of the local list.
    pub fn copy_grid_one(&mut self, icell: usize, jcell: usize) {
        let nc = self.ncorner;
        let (src, dst) = (icell * nc, jcell * nc);
        for k in 0..nc {
            self.cvalues[dst + k] = self.cvalues[src + k];
        }
        if let Some(t) = &mut self.tvalues {
            t[jcell] = t[icell];
        }
        self.ixyz[jcell] = self.ixyz[icell];
    }

    /// Append one zero-initialized cell.
    pub fn add_grid_one(&mut self) {
        self.grow_percell(self.nglocal + 1);
        let nc = self.ncorner;
        let icell = self.nglocal;
        self.cvalues[icell * nc..(icell + 1) * nc].fill(0.0);
        if let Some(t) = &mut self.tvalues {
            t[icell] = 0;
        }
        self.ixyz[icell] = [0; 3];
        self.nglocal += 1;
    }

    /// Reset the local cell count after removals.
    pub fn reset_grid_count(&mut self, nlocal: usize) {
        self.nglocal = nlocal;
        self.cvalues.truncate(nlocal * self.ncorner);
        if let Some(t) = &mut self.tvalues {
            t.truncate(nlocal);
        }
        self.ixyz.truncate(nlocal);
        self.celldelta.truncate(nlocal);
        self.cdelta.truncate(nlocal * self.ncorner);
    }

    fn grow_percell(&mut self, n: usize) {
        if n * self.ncorner > self.cvalues.len() {
            self.cvalues.resize(n * self.ncorner, 0.0);
            if let Some(t) = &mut self.tvalues {
                t.resize(n, 0);
            }
            self.ixyz.resize(n, [0; 3]);
            self.celldelta.resize(n, 0.0);
            self.cdelta.resize(n * self.ncorner, 0.0);
        }
    }

    /// Approximate bytes of per-cell storage.
    pub fn memory_usage(&self) -> usize {
        let mut bytes = self.cvalues.capacity() * std::mem::size_of::<f64>();
        if let Some(t) = &self.tvalues {
            bytes += t.capacity() * std::mem::size_of::<i32>();
        }
        bytes += self.ixyz.capacity() * std::mem::size_of::<[i32; 3]>();
        bytes += self.celldelta.capacity() * std::mem::size_of::<f64>();
        bytes += self.cdelta.capacity() * std::mem::size_of::<f64>();
        bytes
    }

    /// Corner values of one owned cell.
    pub fn corners(&self, icell: usize) -> &[f64] {
        self.corner_row(icell)
    }
}

//! Uniform structured block of grid cells with ghost-cell bookkeeping.
//!
//! The block is a regular brick of child cells addressed either by a
//! process-local index or a 64-bit global id. Owned cells come first in the
//! cell array, followed by one layer of ghost copies of remote neighbours,
//! so the 3x3x3 stencil of any owned cell is always resolvable locally. A
//! hash from global id to local+ghost index resolves cells received from
//! other processes.

use glam::DVec3;
use rustc_hash::FxHashMap;

use crate::error::AblateError;


/// Relation of a cell to one of its six face neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighRel {
    /// Same-level child cell, stored locally.
    Child,
    /// Anything else; walking across it is a configuration error.
    Unknown,
}

/// In/out classification of a cell after a surface rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    /// Entirely in the flow.
    Outside,
    /// Entirely interior to the surface.
    Inside,
    /// Intersected by surface elements.
    Overlap,
}

/// One child cell of the block.
#[derive(Debug, Clone)]
pub struct Cell {
    pub id: u64,
    pub lo: DVec3,
    pub hi: DVec3,
    /// Owning process rank.
    pub proc: usize,
    /// Local index of each face neighbour, -1 when not stored.
    pub neigh: [i32; 6],
    pub nrel: [NeighRel; 6],
    /// Group bitmask.
    pub mask: u32,
    pub kind: CellKind,
    /// Number of sub-cells after the last cut: 1 for an unsplit cell.
    pub nsplit: usize,
    /// Index into the block's split list, -1 when unsplit.
    pub isplit: i32,
    /// Flow volume (or area in 2D) after the last cut.
    pub volume: f64,
}

/// Split state of one cut cell with more than one sub-cell.
#[derive(Debug, Clone)]
pub struct SplitInfo {
    /// Local index of the split cell.
    pub icell: usize,
    /// Flow volume of each sub-cell.
    pub volumes: Vec<f64>,
    /// Sub-cell the split seed point belongs to.
    pub xsub: usize,
    /// Seed point used to attribute particles to sub-cells.
    pub xsplit: DVec3,
}

/// The structured block owned by one process.
#[derive(Debug)]
pub struct GridBlock {
    pub dim: usize,
    pub nx: i32,
    pub ny: i32,
    pub nz: i32,
    /// Lower corner of the whole block.
    pub origin: DVec3,
    /// Cell edge lengths.
    pub cellsize: DVec3,
    /// Owned cells in `[0, nlocal)`, ghosts after.
    pub cells: Vec<Cell>,
    pub nlocal: usize,
    pub nghost: usize,
    pub splits: Vec<SplitInfo>,
    /// Global id to local+ghost index plus one.
    hash: FxHashMap<u64, usize>,
}

impl GridBlock {
    /// Build the block for rank `me`: owned cells in ascending id order,
    /// then a ghost layer covering the 3x3x3 stencil of every owned cell.
    /// `owner` maps (ix,iy,iz) in `[1..nx]x[1..ny]x[1..nz]` to a rank.
    pub fn new(
        dim: usize,
        nx: i32,
        ny: i32,
        nz: i32,
        origin: DVec3,
        cellsize: DVec3,
        me: usize,
        owner: &dyn Fn(i32, i32, i32) -> usize,
    ) -> Result<GridBlock, AblateError> {
        if nx < 1 || ny < 1 || nz < 1 {
            return Err(AblateError::Config(format!(
                "invalid block dimensions {nx}x{ny}x{nz}"
            )));
        }
        if dim == 2 && nz != 1 {
            return Err(AblateError::Config(
                "2d block must have nz = 1".to_string(),
            ));
        }

        let mut block = GridBlock {
            dim,
            nx,
            ny,
            nz,
            origin,
            cellsize,
            cells: Vec::new(),
            nlocal: 0,
            nghost: 0,
            splits: Vec::new(),
            hash: FxHashMap::default(),
        };

        // Owned cells in ascending id order.
        for iz in 1..=nz {
            for iy in 1..=ny {
                for ix in 1..=nx {
                    if owner(ix, iy, iz) == me {
                        block.push_cell(ix, iy, iz, me);
                    }
                }
            }
        }
        block.nlocal = block.cells.len();

        // Ghost layer: any remote cell in the 3x3x3 stencil of an owned
        // cell, again in ascending id order.
        for iz in 1..=nz {
            for iy in 1..=ny {
                for ix in 1..=nx {
                    let proc = owner(ix, iy, iz);
                    if proc == me {
                        continue;
                    }
                    let near_owned = (-1..=1).any(|jz| {
                        (-1..=1).any(|jy| {
                            (-1..=1).any(|jx| {
                                let (kx, ky, kz) = (ix + jx, iy + jy, iz + jz);
                                kx >= 1
                                    && kx <= nx
                                    && ky >= 1
                                    && ky <= ny
                                    && kz >= 1
                                    && kz <= nz
                                    && owner(kx, ky, kz) == me
                            })
                        })
                    });
                    if near_owned {
                        block.push_cell(ix, iy, iz, proc);
                    }
                }
            }
        }
        block.nghost = block.cells.len() - block.nlocal;

        block.link_neighbours();
        Ok(block)
    }

    fn push_cell(&mut self, ix: i32, iy: i32, iz: i32, proc: usize) {
        let id = self.id_of(ix, iy, iz);
        let lo = self.origin
            + DVec3::new(
                (ix - 1) as f64 * self.cellsize.x,
                (iy - 1) as f64 * self.cellsize.y,
                (iz - 1) as f64 * self.cellsize.z,
            );
        let hi = lo + self.cellsize;
        let index = self.cells.len();
        self.cells.push(Cell {
            id,
            lo,
            hi,
            proc,
            neigh: [-1; 6],
            nrel: [NeighRel::Unknown; 6],
            mask: 1,
            kind: CellKind::Outside,
            nsplit: 1,
            isplit: -1,
            volume: (hi - lo).x * (hi - lo).y * (hi - lo).z,
        });
        self.hash.insert(id, index + 1);
    }

    fn link_neighbours(&mut self) {
        for icell in 0..self.cells.len() {
            let (ix, iy, iz) = self.ixyz_of(self.cells[icell].id);
            let offsets = [
                (-1, 0, 0),
                (1, 0, 0),
                (0, -1, 0),
                (0, 1, 0),
                (0, 0, -1),
                (0, 0, 1),
            ];
            for (f, (jx, jy, jz)) in offsets.into_iter().enumerate() {
                let (kx, ky, kz) = (ix + jx, iy + jy, iz + jz);
                if kx < 1 || kx > self.nx || ky < 1 || ky > self.ny || kz < 1 || kz > self.nz {
                    continue;
                }
                if let Some(j) = self.local_from_id(self.id_of(kx, ky, kz)) {
                    self.cells[icell].neigh[f] = j as i32;
                    self.cells[icell].nrel[f] = NeighRel::Child;
                }
            }
        }
    }

    /// Global id of the cell at (ix,iy,iz), 1-based in each axis.
    #[inline]
    pub fn id_of(&self, ix: i32, iy: i32, iz: i32) -> u64 {
        ((iz - 1) as u64 * self.ny as u64 + (iy - 1) as u64) * self.nx as u64 + (ix - 1) as u64 + 1
    }

    /// (ix,iy,iz) of a global id.
    #[inline]
    pub fn ixyz_of(&self, id: u64) -> (i32, i32, i32) {
        let z = (id - 1) / (self.nx as u64 * self.ny as u64);
        let rem = (id - 1) % (self.nx as u64 * self.ny as u64);
        let y = rem / self.nx as u64;
        let x = rem % self.nx as u64;
        (x as i32 + 1, y as i32 + 1, z as i32 + 1)
    }

    /// Total number of cells in the block across all processes.
    #[inline]
    pub fn ncell_global(&self) -> u64 {
        self.nx as u64 * self.ny as u64 * self.nz as u64
    }

    /// Resolve a global id to a local or ghost index.
    #[inline]
    pub fn local_from_id(&self, id: u64) -> Option<usize> {
        self.hash.get(&id).map(|&i| i - 1)
    }

    /// Walk from an owned cell to the neighbour at offset (jx,jy,jz), one
    /// axis at a time: x, then y, then z. Every step must cross a
    /// same-level child relation. The caller checks block bounds first.
    pub fn walk_to_neigh(
        &self,
        icell: usize,
        jx: i32,
        jy: i32,
        jz: i32,
    ) -> Result<usize, AblateError> {
        let mut jcell = icell;

        let steps = [(jx, 0usize, 1usize), (jy, 2, 3), (jz, 4, 5)];
        for (offset, flo, fhi) in steps {
            if offset == 0 {
                continue;
            }
            let face = if offset < 0 { flo } else { fhi };
            let cell = &self.cells[jcell];
            if cell.nrel[face] != NeighRel::Child {
                return Err(AblateError::NeighbourInvariant { cell: cell.id });
            }
            jcell = cell.neigh[face] as usize;
        }

        Ok(jcell)
    }

    /// Drop all split state, resetting every cell to a single sub-cell.
    pub fn clear_splits(&mut self) {
        self.splits.clear();
        for cell in &mut self.cells {
            cell.nsplit = 1;
            cell.isplit = -1;
        }
    }

    /// Record a multi-sub-cell split for one owned cell.
    pub fn set_split(&mut self, icell: usize, volumes: Vec<f64>, xsub: usize, xsplit: DVec3) {
        let isplit = self.splits.len();
        self.cells[icell].nsplit = volumes.len();
        self.cells[icell].isplit = isplit as i32;
        self.splits.push(SplitInfo {
            icell,
            volumes,
            xsub,
            xsplit,
        });
    }
}

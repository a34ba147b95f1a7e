//! Per-cell ablation sources.
//!
//! The decrement of each step comes either from a seeded random draw or
//! from an external per-grid quantity (a compute- or fix-style collaborator
//! of the host simulator), exposed here as a trait at the seam.

use crate::grid::GridBlock;

/// A host-simulator quantity producing one value per owned grid cell.
pub trait GridSource {
    /// Steps between updates of the per-grid output. The ablation period
    /// must be a multiple of this.
    fn per_grid_freq(&self) -> i32 {
        1
    }

    /// Number of array columns; 0 means the source produces a vector.
    fn columns(&self) -> usize {
        0
    }

    /// Fill `out[icell]` for every owned cell. `column` is 1-based for
    /// array sources and 0 for vector sources.
    fn compute_per_grid(&mut self, grid: &GridBlock, column: usize, out: &mut [f64]);
}

/// Where the per-cell decrement comes from.
pub enum DeltaSource {
    /// Stochastic decrement: each in-scope cell draws an integer in
    /// `[1, maxrandom]`, thinned by the scale fraction.
    Random { maxrandom: i32 },
    /// External per-cell scalar or array column, scaled by
    /// `nevery * scale`.
    Field {
        source: Box<dyn GridSource>,
        column: usize,
    },
}

impl std::fmt::Debug for DeltaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeltaSource::Random { maxrandom } => {
                f.debug_struct("Random").field("maxrandom", maxrandom).finish()
            }
            DeltaSource::Field { column, .. } => {
                f.debug_struct("Field").field("column", column).finish()
            }
        }
    }
}

/// A fixed per-cell table, handy as a stand-in fix in tests and demos.
pub struct TableSource {
    pub freq: i32,
    pub values: Vec<f64>,
}

impl GridSource for TableSource {
    fn per_grid_freq(&self) -> i32 {
        self.freq
    }

    fn compute_per_grid(&mut self, _grid: &GridBlock, _column: usize, out: &mut [f64]) {
        let n = out.len().min(self.values.len());
        out[..n].copy_from_slice(&self.values[..n]);
        for v in out[n..].iter_mut() {
            *v = 0.0;
        }
    }
}

use thiserror::Error;

/// Errors reported by the cut-cell engine.
///
/// Every variant is fatal to the step: a reachable geometric inconsistency is
/// a genuine bug in the surface data or in the caller's bookkeeping, so there
/// is no best-effort fallback. The offending cell id is always carried so the
/// failure can be located in the grid.
#[derive(Debug, Error)]
pub enum CutError {
    /// Topological inconsistency in the cell's clipped geometry.
    #[error("cell {cell}: {what}")]
    GeometryInvariant { cell: u64, what: &'static str },

    /// Signed volumes of the cell's loops violate the polyhedron rules.
    #[error("cell {cell}: {what}")]
    VolumeInvariant { cell: u64, what: &'static str },

    /// Candidate-surface buffer capacity exceeded in `surf2grid`.
    #[error("cell {cell}: candidate surface list overflow (cap {cap})")]
    Overflow { cell: u64, cap: usize },
}

impl CutError {
    pub(crate) fn geom(cell: u64, what: &'static str) -> Self {
        CutError::GeometryInvariant { cell, what }
    }

    pub(crate) fn volume(cell: u64, what: &'static str) -> Self {
        CutError::VolumeInvariant { cell, what }
    }
}

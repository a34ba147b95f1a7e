use cutcell::CutError;
use thiserror::Error;

/// Errors reported by the grid block and the ablation driver. All are fatal
/// to the step; there are no retries.
#[derive(Debug, Error)]
pub enum AblateError {
    /// A neighbour walk crossed a relation that is not a same-level child.
    #[error("cell {cell}: neighbour walk crossed a non-child relation")]
    NeighbourInvariant { cell: u64 },

    /// Invalid construction arguments: missing source, incompatible
    /// frequency, out-of-range column, unusable grid.
    #[error("{0}")]
    Config(String),

    /// A geometric failure raised by the cut engine.
    #[error(transparent)]
    Cut(#[from] CutError),
}

//! Implicit-surface geometry core of a parallel rarefied-gas particle
//! simulator.
//!
//! The crate drives the [`cutcell`] geometry engine over a structured block
//! of grid cells: corner values define an implicit surface, the ablation
//! driver erodes them step by step while keeping every duplicated corner
//! copy bit-identical across processes, and each rebuild turns the values
//! into explicit surface elements plus per-cell cut volumes and split
//! connectivity.

pub mod ablate;
pub mod comm;
pub mod error;
pub mod grid;
pub mod source;
pub mod util;

pub use ablate::Ablate;
pub use comm::{ChannelComm, Comm, SerialComm};
pub use error::AblateError;
pub use grid::{CellKind, GridBlock};
pub use source::{DeltaSource, GridSource};

pub use cutcell;

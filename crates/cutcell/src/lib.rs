//! Cut-cell clipping and iso-surface extraction over axis-aligned grid
//! cells.
//!
//! This crate turns explicit surface elements (triangles in 3D, oriented
//! segments in 2D) into per-cell cut geometry: which surfaces intersect a
//! cell, how the cell splits into sub-volumes, what those volumes are, and
//! which cell corners end up in the flow. It also provides the
//! marching-squares / marching-cubes extractors that generate the explicit
//! elements from per-cell corner values in the first place.
//!
//! All geometry is exact: points compare bit-for-bit and clipped points land
//! exactly on face planes. There are no tolerances, and any reachable
//! inconsistency is a fatal [`CutError`] naming the cell.
//!
//! # Example
//!
//! ```
//! use cutcell::{Cut3d, SurfStore};
//! use glam::DVec3;
//!
//! // One triangle clipping a corner off the unit cell.
//! let mut store = SurfStore::default();
//! store.append_tri(
//!     DVec3::new(0.2, 0.0, 0.0),
//!     DVec3::new(0.0, 0.2, 0.0),
//!     DVec3::new(0.0, 0.0, 0.2),
//!     1,
//!     0,
//!     1,
//! );
//! store.compute_tri_normals();
//!
//! let mut cut = Cut3d::default();
//! let mut surfs = Vec::new();
//! cut.surf2grid(1, DVec3::ZERO, DVec3::ONE, &store, &mut surfs, 16)
//!     .unwrap();
//! let mut surfmap = vec![0; surfs.len()];
//! let split = cut
//!     .split(1, DVec3::ZERO, DVec3::ONE, &surfs, &store, &mut surfmap)
//!     .unwrap();
//! assert_eq!(split.nsplit, 1);
//! ```

pub mod bpg;
pub mod cut2d;
pub mod cut3d;
pub mod error;
pub mod geom;
pub mod iso;
pub mod surf;

pub use cut2d::{Cut2d, Split2d};
pub use cut3d::{Cut3d, Split3};
pub use error::CutError;
pub use geom::{CornerState, LoopFlag, PtFlag};
pub use iso::{boundary_face_segments, cleanup_face, MarchingCubes, MarchingSquares};
pub use surf::{Line, SurfStore, Tri};

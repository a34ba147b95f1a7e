//! Cube topology tables for the iso-surface extractors.
//!
//! Corner numbering is lexicographic in (z, y, x) with z most significant,
//! matching the grid's corner-value storage: corner 0 = (lo,lo,lo),
//! corner 7 = (hi,hi,hi).
//!
//! Every cube edge runs from its low-coordinate corner to its
//! high-coordinate corner along one axis. Two cells sharing an edge thus
//! agree on its direction, which keeps threshold interpolation bit-identical
//! across cells.

/// The 12 cube edges as (lo corner, hi corner), grouped by axis:
/// edges 0..4 along x, 4..8 along y, 8..12 along z.
pub const EDGES: [(usize, usize); 12] = [
    (0, 1),
    (2, 3),
    (4, 5),
    (6, 7),
    (0, 2),
    (1, 3),
    (4, 6),
    (5, 7),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Axis of each edge.
#[inline]
pub const fn edge_axis(e: usize) -> usize {
    e / 4
}

/// Corner cycle of each face, ordered identically when viewed from either
/// adjacent cell: x faces cycle in (y,z), y faces in (x,z), z faces in
/// (x,y). The fixed order also pins the summation order of the face-centre
/// average used to resolve saddles.
pub const FACE_CYCLES: [[usize; 4]; 6] = [
    [0, 2, 6, 4], // x-lo
    [1, 3, 7, 5], // x-hi
    [0, 1, 5, 4], // y-lo
    [2, 3, 7, 6], // y-hi
    [0, 1, 3, 2], // z-lo
    [4, 5, 7, 6], // z-hi
];

/// Cube-edge index of each face-cycle leg: `FACE_EDGES[f][k]` joins
/// `FACE_CYCLES[f][k]` and `FACE_CYCLES[f][(k+1)%4]`.
pub const FACE_EDGES: [[usize; 4]; 6] = [
    [4, 10, 6, 8],  // x-lo
    [5, 11, 7, 9],  // x-hi
    [0, 9, 2, 8],   // y-lo
    [1, 11, 3, 10], // y-hi
    [0, 5, 1, 4],   // z-lo
    [2, 7, 3, 6],   // z-hi
];

//! Exact-arithmetic geometric primitives shared by the 2D and 3D cutters.
//!
//! Everything here uses bit-exact coordinate comparison. The cut pipeline
//! depends on clipped points landing exactly on face planes and on duplicate
//! points comparing equal, so there are deliberately no tolerances.

use glam::{DVec2, DVec3};

/// Classification of a point against a cell box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtFlag {
    /// Strictly outside the box in at least one dimension.
    Exterior,
    /// Strictly inside the box in every dimension.
    Interior,
    /// On the box surface.
    Border,
}

/// In/out state of a cell corner after a cut: `Outside` is in the flow,
/// `Inside` is in the surface interior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CornerState {
    Inside,
    Outside,
}

/// Connectivity flag of a loop: `Interior` loops are built purely from
/// surface elements, `Border` loops also run along cell geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopFlag {
    Interior,
    Border,
}

/// Intersection of segment `a`-`b` with the plane `p[dim] = value`.
///
/// The two non-`dim` coordinates are interpolated linearly; the `dim`
/// coordinate is set to `value` exactly. Caller guarantees `a[dim] != b[dim]`
/// and that `value` lies between them.
pub fn between(a: DVec3, b: DVec3, dim: usize, value: f64) -> DVec3 {
    let t = (value - a[dim]) / (b[dim] - a[dim]);
    let mut c = DVec3::ZERO;
    for j in 0..3 {
        if j != dim {
            c[j] = a[j] + t * (b[j] - a[j]);
        }
    }
    c[dim] = value;
    c
}

/// 2D analogue of [`between`].
pub fn between2d(a: DVec2, b: DVec2, dim: usize, value: f64) -> DVec2 {
    let t = (value - a[dim]) / (b[dim] - a[dim]);
    let other = 1 - dim;
    let mut c = DVec2::ZERO;
    c[other] = a[other] + t * (b[other] - a[other]);
    c[dim] = value;
    c
}

/// Bit-exact componentwise point equality.
#[inline]
pub fn samepoint(x: DVec3, y: DVec3) -> bool {
    x == y
}

/// Bit-exact componentwise point equality in 2D.
#[inline]
pub fn samepoint2d(x: DVec2, y: DVec2) -> bool {
    x == y
}

/// Classify `pt` against the box `[lo, hi]`.
pub fn ptflag(pt: DVec3, lo: DVec3, hi: DVec3) -> PtFlag {
    if pt.x < lo.x || pt.x > hi.x || pt.y < lo.y || pt.y > hi.y || pt.z < lo.z || pt.z > hi.z {
        return PtFlag::Exterior;
    }
    if pt.x > lo.x && pt.x < hi.x && pt.y > lo.y && pt.y < hi.y && pt.z > lo.z && pt.z < hi.z {
        return PtFlag::Interior;
    }
    PtFlag::Border
}

/// Classify `pt` against the rectangle `[lo, hi]`.
pub fn ptflag2d(pt: DVec2, lo: DVec2, hi: DVec2) -> PtFlag {
    if pt.x < lo.x || pt.x > hi.x || pt.y < lo.y || pt.y > hi.y {
        return PtFlag::Exterior;
    }
    if pt.x > lo.x && pt.x < hi.x && pt.y > lo.y && pt.y < hi.y {
        return PtFlag::Interior;
    }
    PtFlag::Border
}

/// Corner index 0..8 of `pt` in the box, or `None` if `pt` is not a corner.
///
/// Numbering is lexicographic in (z, y, x) with z most significant:
/// corner 0 = (lo,lo,lo), corner 7 = (hi,hi,hi).
pub fn corner(pt: DVec3, lo: DVec3, hi: DVec3) -> Option<usize> {
    let ix = if pt.x == lo.x {
        0
    } else if pt.x == hi.x {
        1
    } else {
        return None;
    };
    let iy = if pt.y == lo.y {
        0
    } else if pt.y == hi.y {
        1
    } else {
        return None;
    };
    let iz = if pt.z == lo.z {
        0
    } else if pt.z == hi.z {
        1
    } else {
        return None;
    };
    Some(4 * iz + 2 * iy + ix)
}

/// Corner index 0..4 of `pt` in the rectangle, (y, x) lexicographic.
pub fn corner2d(pt: DVec2, lo: DVec2, hi: DVec2) -> Option<usize> {
    let ix = if pt.x == lo.x {
        0
    } else if pt.x == hi.x {
        1
    } else {
        return None;
    };
    let iy = if pt.y == lo.y {
        0
    } else if pt.y == hi.y {
        1
    } else {
        return None;
    };
    Some(2 * iy + ix)
}

/// Coordinate of the 3D cell corner `icorner` (0..8, (z,y,x) lexicographic).
pub fn corner_point(icorner: usize, lo: DVec3, hi: DVec3) -> DVec3 {
    DVec3::new(
        if icorner & 1 == 0 { lo.x } else { hi.x },
        if icorner & 2 == 0 { lo.y } else { hi.y },
        if icorner & 4 == 0 { lo.z } else { hi.z },
    )
}

/// Coordinate of the 2D cell corner `icorner` (0..4, (y,x) lexicographic).
pub fn corner_point2d(icorner: usize, lo: DVec2, hi: DVec2) -> DVec2 {
    DVec2::new(
        if icorner & 1 == 0 { lo.x } else { hi.x },
        if icorner & 2 == 0 { lo.y } else { hi.y },
    )
}

/// 2D bounds of cell face `iface` (0..6: x-lo, x-hi, y-lo, y-hi, z-lo, z-hi).
///
/// Face-local axes: x faces keep (y,z), y faces keep (x,z), z faces keep
/// (x,y).
pub fn face_from_cell(iface: usize, lo: DVec3, hi: DVec3) -> (DVec2, DVec2) {
    match iface / 2 {
        0 => (DVec2::new(lo.y, lo.z), DVec2::new(hi.y, hi.z)),
        1 => (DVec2::new(lo.x, lo.z), DVec2::new(hi.x, hi.z)),
        _ => (DVec2::new(lo.x, lo.y), DVec2::new(hi.x, hi.y)),
    }
}

/// Project a 3D point onto the 2D coordinate system of face `iface`.
pub fn compress2d(iface: usize, p: DVec3) -> DVec2 {
    match iface / 2 {
        0 => DVec2::new(p.y, p.z),
        1 => DVec2::new(p.x, p.z),
        _ => DVec2::new(p.x, p.y),
    }
}

/// Lift a 2D face point back to 3D, with the face-normal coordinate `value`.
pub fn expand2d(iface: usize, value: f64, p: DVec2) -> DVec3 {
    match iface / 2 {
        0 => DVec3::new(value, p.x, p.y),
        1 => DVec3::new(p.x, value, p.y),
        _ => DVec3::new(p.x, p.y, value),
    }
}

/// Which cell faces the segment `p1`-`p2` lies on.
///
/// Both points are assumed on the surface or interior of the cell. A segment
/// along a cell edge lies on two faces; returns the first two face ids and
/// the total hit count (a count above 2 only occurs for degenerate segments
/// and is rejected by the caller).
pub fn which_faces(p1: DVec3, p2: DVec3, lo: DVec3, hi: DVec3) -> ([usize; 2], usize) {
    let on = [
        p1.x == lo.x && p2.x == lo.x,
        p1.x == hi.x && p2.x == hi.x,
        p1.y == lo.y && p2.y == lo.y,
        p1.y == hi.y && p2.y == hi.y,
        p1.z == lo.z && p2.z == lo.z,
        p1.z == hi.z && p2.z == hi.z,
    ];
    let mut faces = [0usize; 2];
    let mut n = 0;
    for (f, hit) in on.iter().enumerate() {
        if *hit {
            if n < 2 {
                faces[n] = f;
            }
            n += 1;
        }
    }
    (faces, n)
}

/// Inward unit normal of cell face `iface`.
#[inline]
pub fn face_norm_inward(iface: usize) -> DVec3 {
    let mut n = DVec3::ZERO;
    n[iface / 2] = if iface % 2 == 0 { 1.0 } else { -1.0 };
    n
}

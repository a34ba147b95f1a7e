//! Marching-squares / marching-cubes iso-surface extraction over per-cell
//! corner values.
//!
//! Corners at or above the threshold are solid. Each cell's surface patch is
//! assembled from its faces: every face contributes the marching-squares
//! segments of its four corner values, the segments chain into closed loops
//! through the cell, and each loop is fan-triangulated with outward (solid
//! to gas) winding. Because a face's segments are a function of that face's
//! corner values alone, with interpolation always running from the
//! low-coordinate corner and the saddle rule reading a fixed-order centre
//! average, two cells sharing a face produce bit-identical boundary
//! segments; the cleanup pass verifies exactly that.

use glam::{DVec2, DVec3};

use crate::error::CutError;
use crate::geom::{corner_point, corner_point2d};
use crate::surf::SurfStore;

pub mod tables;

use self::tables::{edge_axis, EDGES, FACE_CYCLES, FACE_EDGES};

/// 2D extractor: emits oriented line segments with the flow on their left.
#[derive(Debug, Clone, Copy)]
pub struct MarchingSquares {
    pub thresh: f64,
}

/// 3D extractor: emits triangles with outward winding.
#[derive(Debug, Clone, Copy)]
pub struct MarchingCubes {
    pub thresh: f64,
}

impl MarchingSquares {
    pub fn new(thresh: f64) -> Self {
        Self { thresh }
    }

    /// Extract the segments of one cell from its 4 corner values
    /// ((y,x)-lexicographic order) and append them to the store.
    pub fn invoke_cell(
        &self,
        cell: u64,
        lo: DVec2,
        hi: DVec2,
        v: &[f64; 4],
        typ: i32,
        mask: u32,
        store: &mut SurfStore,
    ) {
        let inside = [0, 1, 2, 3].map(|c| v[c] >= self.thresh);
        let nin = inside.iter().filter(|&&b| b).count();
        if nin == 0 || nin == 4 {
            return;
        }

        // Corner cycle and its legs, counterclockwise in (x,y).
        const CYCLE: [usize; 4] = [0, 1, 3, 2];
        let b = CYCLE.map(|c| inside[c]);

        // Threshold crossing on leg k, interpolated from the low corner.
        let cross = |k: usize| -> DVec2 {
            let (mut c0, mut c1) = (CYCLE[k], CYCLE[(k + 1) % 4]);
            if c0 > c1 {
                std::mem::swap(&mut c0, &mut c1);
            }
            let p0 = corner_point2d(c0, lo, hi);
            let p1 = corner_point2d(c1, lo, hi);
            let t = (self.thresh - v[c0]) / (v[c1] - v[c0]);
            p0 + t * (p1 - p0)
        };

        let mut segs: [Option<(usize, usize)>; 2] = [None, None];
        let count = b.iter().filter(|&&x| x).count();
        match count {
            1 | 3 => {
                let want = count == 1;
                let k = (0..4).find(|&k| b[k] == want).unwrap_or(0);
                segs[0] = Some(((k + 3) % 4, k));
            }
            2 => {
                if b[0] == b[2] {
                    // Saddle: the centre average decides which diagonal pair
                    // stays connected.
                    let centre = (v[0] + v[1] + v[2] + v[3]) / 4.0;
                    if (centre >= self.thresh) == b[0] {
                        segs[0] = Some((0, 1));
                        segs[1] = Some((2, 3));
                    } else {
                        segs[0] = Some((3, 0));
                        segs[1] = Some((1, 2));
                    }
                } else {
                    let k = (0..4)
                        .find(|&k| b[k] && b[(k + 1) % 4])
                        .unwrap_or(0);
                    segs[0] = Some(((k + 3) % 4, (k + 1) % 4));
                }
            }
            _ => {}
        }

        for seg in segs.into_iter().flatten() {
            let (ka, kb) = seg;
            let mut pa = cross(ka);
            let mut pb = cross(kb);
            if pa == pb {
                continue;
            }
            // Orient with the flow on the left: the left normal of pa->pb
            // must point from the solid end of leg ka toward its gas end.
            let (c0, c1) = (CYCLE[ka], CYCLE[(ka + 1) % 4]);
            let (solid, gas) = if inside[c0] { (c0, c1) } else { (c1, c0) };
            let t = corner_point2d(gas, lo, hi) - corner_point2d(solid, lo, hi);
            let d = pb - pa;
            let norm = DVec2::new(-d.y, d.x);
            if norm.dot(t) < 0.0 {
                std::mem::swap(&mut pa, &mut pb);
            }
            store.append_line(pa, pb, mask, typ, cell);
        }
    }
}

impl MarchingCubes {
    pub fn new(thresh: f64) -> Self {
        Self { thresh }
    }

    /// Extract the triangles of one cell from its 8 corner values
    /// ((z,y,x)-lexicographic order) and append them to the store.
    pub fn invoke_cell(
        &self,
        cell: u64,
        lo: DVec3,
        hi: DVec3,
        v: &[f64; 8],
        typ: i32,
        mask: u32,
        store: &mut SurfStore,
    ) -> Result<(), CutError> {
        let mut inside = [false; 8];
        for (c, flag) in inside.iter_mut().enumerate() {
            *flag = v[c] >= self.thresh;
        }
        let nin = inside.iter().filter(|&&b| b).count();
        if nin == 0 || nin == 8 {
            return Ok(());
        }

        // Threshold crossings on the cube edges, always interpolated from
        // the low-coordinate end so shared edges agree bit-exactly.
        let mut cross = [DVec3::ZERO; 12];
        let mut crossed = [false; 12];
        for e in 0..12 {
            let (a, b) = EDGES[e];
            if inside[a] == inside[b] {
                continue;
            }
            let axis = edge_axis(e);
            let t = (self.thresh - v[a]) / (v[b] - v[a]);
            let mut p = corner_point(a, lo, hi);
            p[axis] = lo[axis] + t * (hi[axis] - lo[axis]);
            cross[e] = p;
            crossed[e] = true;
        }

        // Marching-squares segments per face, as pairs of crossed cube
        // edges. Each crossed edge collects exactly two segments, one from
        // each adjacent face, so the segments chain into closed loops.
        let mut segs: Vec<(usize, usize)> = Vec::with_capacity(12);
        for f in 0..6 {
            let cyc = FACE_CYCLES[f];
            let legs = FACE_EDGES[f];
            let b = cyc.map(|c| inside[c]);
            let count = b.iter().filter(|&&x| x).count();
            match count {
                1 | 3 => {
                    let want = count == 1;
                    let k = (0..4).find(|&k| b[k] == want).unwrap_or(0);
                    segs.push((legs[(k + 3) % 4], legs[k]));
                }
                2 => {
                    if b[0] == b[2] {
                        let centre =
                            (v[cyc[0]] + v[cyc[1]] + v[cyc[2]] + v[cyc[3]]) / 4.0;
                        if (centre >= self.thresh) == b[0] {
                            segs.push((legs[0], legs[1]));
                            segs.push((legs[2], legs[3]));
                        } else {
                            segs.push((legs[3], legs[0]));
                            segs.push((legs[1], legs[2]));
                        }
                    } else {
                        let k = (0..4)
                            .find(|&k| b[k] && b[(k + 1) % 4])
                            .unwrap_or(0);
                        segs.push((legs[(k + 3) % 4], legs[(k + 1) % 4]));
                    }
                }
                _ => {}
            }
        }

        // Two segments per crossed edge.
        let mut at: [[usize; 2]; 12] = [[usize::MAX; 2]; 12];
        for (si, &(a, b)) in segs.iter().enumerate() {
            for e in [a, b] {
                if at[e][0] == usize::MAX {
                    at[e][0] = si;
                } else if at[e][1] == usize::MAX {
                    at[e][1] = si;
                } else {
                    return Err(CutError::geom(cell, "cube edge used by 3 face segments"));
                }
            }
        }
        for e in 0..12 {
            if crossed[e] && at[e][1] == usize::MAX {
                return Err(CutError::geom(cell, "open surface loop in cell"));
            }
        }

        // Chain segments into loops of cube-edge indices.
        let mut used = vec![false; segs.len()];
        for start in 0..segs.len() {
            if used[start] {
                continue;
            }
            used[start] = true;
            let (e0, mut ecur) = segs[start];
            let mut path = vec![e0, ecur];

            while ecur != e0 {
                let [s0, s1] = at[ecur];
                let snext = if used[s0] { s1 } else { s0 };
                if used[snext] {
                    // Both consumed: the loop closed back onto e0.
                    break;
                }
                used[snext] = true;
                let (a, b) = segs[snext];
                ecur = if a == ecur { b } else { a };
                if ecur != e0 {
                    path.push(ecur);
                }
                if path.len() > 12 {
                    return Err(CutError::geom(cell, "surface loop failed to close"));
                }
            }

            if path.len() < 3 {
                continue;
            }

            let mut pts: Vec<DVec3> = path.iter().map(|&e| cross[e]).collect();

            // Orient outward: the loop normal must point from the solid end
            // of the first crossed edge toward its gas end.
            let mut normal = DVec3::ZERO;
            for i in 1..pts.len() - 1 {
                normal += (pts[i] - pts[0]).cross(pts[i + 1] - pts[0]);
            }
            let (a, b) = EDGES[path[0]];
            let axis = edge_axis(path[0]);
            let mut t = DVec3::ZERO;
            t[axis] = if inside[a] { 1.0 } else { -1.0 };
            if normal.dot(t) < 0.0 {
                pts.reverse();
            }

            // Fan-triangulate the loop.
            for i in 1..pts.len() - 1 {
                let (p0, p1, p2) = (pts[0], pts[i], pts[i + 1]);
                if (p1 - p0).cross(p2 - p0).length_squared() == 0.0 {
                    continue;
                }
                store.append_tri(p0, p1, p2, mask, typ, cell);
            }
        }

        Ok(())
    }
}

/// Directed boundary segments a set of triangles induces on the plane
/// `p[dim] == value`: on-plane triangle edges whose reverse is not produced
/// by another triangle of the same set (those are interior chords).
pub fn boundary_face_segments(
    tris: &[[DVec3; 3]],
    dim: usize,
    value: f64,
) -> Vec<(DVec3, DVec3)> {
    let mut segs: Vec<(DVec3, DVec3)> = Vec::new();
    for t in tris {
        for (a, b) in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
            if a[dim] != value || b[dim] != value || a == b {
                continue;
            }
            segs.push((a, b));
        }
    }
    // Cancel chord pairs traversed in both directions.
    let mut keep = vec![true; segs.len()];
    for i in 0..segs.len() {
        if !keep[i] {
            continue;
        }
        for j in i + 1..segs.len() {
            if keep[j] && segs[i].0 == segs[j].1 && segs[i].1 == segs[j].0 {
                keep[i] = false;
                keep[j] = false;
                break;
            }
        }
    }
    segs.into_iter()
        .zip(keep)
        .filter_map(|(s, k)| k.then_some(s))
        .collect()
}

/// Enforce cross-face consistency between one cell's triangles and the
/// segments its neighbour produced on the shared face: every boundary
/// segment must appear reversed on the other side. A same-direction match is
/// repaired by flipping the local triangle; a missing match is fatal.
/// Returns the number of flips.
pub fn cleanup_face(
    store: &mut SurfStore,
    cell: u64,
    my_tris: &[usize],
    dim: usize,
    value: f64,
    neigh_segs: &[(DVec3, DVec3)],
) -> Result<usize, CutError> {
    let mine: Vec<[DVec3; 3]> = my_tris
        .iter()
        .map(|&it| {
            let (p1, p2, p3) = store.tri_pts(&store.tris[it]);
            [p1, p2, p3]
        })
        .collect();
    let my_segs = boundary_face_segments(&mine, dim, value);

    let mut nflip = 0;
    for (a, b) in my_segs {
        if neigh_segs.iter().any(|&(qa, qb)| qa == b && qb == a) {
            continue;
        }
        if neigh_segs.iter().any(|&(qa, qb)| qa == a && qb == b) {
            // Same-direction traversal on both sides: flip the local
            // triangle owning this segment.
            for &it in my_tris {
                let (p1, p2, p3) = store.tri_pts(&store.tris[it]);
                let has = [(p1, p2), (p2, p3), (p3, p1)]
                    .iter()
                    .any(|&(ea, eb)| ea == a && eb == b);
                if has {
                    let tri = &mut store.tris[it];
                    std::mem::swap(&mut tri.p2, &mut tri.p3);
                    tri.norm = -tri.norm;
                    nflip += 1;
                    break;
                }
            }
        } else {
            return Err(CutError::geom(
                cell,
                "mismatched surface segments on shared cell face",
            ));
        }
    }

    Ok(nflip)
}

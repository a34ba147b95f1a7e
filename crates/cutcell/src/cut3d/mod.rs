//! Clipping of candidate surface triangles against one axis-aligned grid
//! cell, and decomposition of the clipped geometry into sub-cell polyhedra.
//!
//! The pipeline per cell: add each candidate triangle to the bipartite graph
//! sharing edges as it goes, clip every polygon against the six face planes,
//! attribute signed volumes by projection onto the z-lo face, assign the
//! leftover boundary edges to faces, rebuild each face's polygons with the 2D
//! cutter, then walk the graph's connected components into loops and group
//! loops into polyhedra. Volumes, the per-surface sub-cell map, the split
//! seed point and the corner in/out flags all fall out of that walk.

use glam::{DVec2, DVec3};

use crate::bpg::{Bpg, Dir, EdgeRef, Style};
use crate::cut2d::{Cline, Cut2d, PtType};
use crate::error::CutError;
use crate::geom::{
    between, compress2d, corner, expand2d, face_from_cell, face_norm_inward, ptflag, samepoint,
    which_faces, CornerState, LoopFlag, PtFlag,
};
use crate::surf::SurfStore;

#[cfg(test)]
mod tests;

/// Endpoint classification against one clip plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClipFlag {
    Outside,
    Inside,
    Overlap,
}

/// A weakly-connected component of the post-clip graph.
#[derive(Debug, Clone, Copy)]
pub struct Loop3 {
    pub volume: f64,
    pub flag: LoopFlag,
    pub n: usize,
    pub first: usize,
    /// Next loop of the same polyhedron.
    pub next: Option<usize>,
}

/// A polyhedron: one positive loop plus any holes assigned to it.
#[derive(Debug, Clone, Copy)]
pub struct Ph {
    pub volume: f64,
    pub n: usize,
    pub first: usize,
}

/// Result of a cell split.
#[derive(Debug, Clone)]
pub struct Split3 {
    pub nsplit: usize,
    pub grazeflag: bool,
    pub corners: [CornerState; 8],
    /// Sub-cell index and seed point for the particle domain; present only
    /// when the cell splits into more than one polyhedron.
    pub xsplit: Option<(usize, DVec3)>,
}

/// The 3D cutter. All pools and scratch paths are instance-owned and rebuilt
/// from scratch for every cell.
#[derive(Debug, Default)]
pub struct Cut3d {
    pub cut2d: Cut2d,
    bpg: Bpg,
    path1: [DVec3; 12],
    path2: [DVec3; 12],
    vols: Vec<f64>,
    facelist: [Vec<usize>; 6],
    used: Vec<bool>,
    vstack: Vec<usize>,
    pub loops: Vec<Loop3>,
    pub phs: Vec<Ph>,
    id: u64,
    lo: DVec3,
    hi: DVec3,
    empty: bool,
}

impl Cut3d {
    /// Per-sub-cell flow volumes of the last split.
    pub fn volumes(&self) -> &[f64] {
        &self.vols
    }

    /// Collect the candidate triangles of `store` that intersect the cell.
    ///
    /// A triangle hits when its Sutherland-Hodgman clip against the cell is
    /// non-empty; touching counts. Indices are appended to `out`; exceeding
    /// `cap` is an overflow error. Pure function of the inputs, so every
    /// process accepts the same set regardless of how surfaces are
    /// partitioned.
    pub fn surf2grid(
        &mut self,
        id: u64,
        lo: DVec3,
        hi: DVec3,
        store: &SurfStore,
        out: &mut Vec<usize>,
        cap: usize,
    ) -> Result<usize, CutError> {
        self.id = id;
        self.lo = lo;
        self.hi = hi;
        out.clear();

        for (m, tri) in store.tris.iter().enumerate() {
            let (x1, x2, x3) = store.tri_pts(tri);

            // Bounding-box reject per axis.
            if x1.x.max(x2.x).max(x3.x) < lo.x || x1.x.min(x2.x).min(x3.x) > hi.x {
                continue;
            }
            if x1.y.max(x2.y).max(x3.y) < lo.y || x1.y.min(x2.y).min(x3.y) > hi.y {
                continue;
            }
            if x1.z.max(x2.z).max(x3.z) < lo.z || x1.z.min(x2.z).min(x3.z) > hi.z {
                continue;
            }

            if self.clip(x1, x2, x3) > 0 {
                if out.len() == cap {
                    return Err(CutError::Overflow { cell: id, cap });
                }
                out.push(m);
            }
        }

        Ok(out.len())
    }

    /// Sutherland-Hodgman clip of one triangle against the six face planes.
    /// Returns the clipped vertex count (0 = no intersection); the final path
    /// is left in `path1`. Duplicate points are not removed since touching
    /// counts as intersection.
    fn clip(&mut self, p0: DVec3, p1: DVec3, p2: DVec3) -> usize {
        let (lo, hi) = (self.lo, self.hi);

        // Any triangle fully inside the cell intersects trivially.
        if ptflag(p0, lo, hi) != PtFlag::Exterior
            && ptflag(p1, lo, hi) != PtFlag::Exterior
            && ptflag(p2, lo, hi) != PtFlag::Exterior
        {
            self.path1[0] = p0;
            self.path1[1] = p1;
            self.path1[2] = p2;
            return 3;
        }

        self.path1[0] = p0;
        self.path1[1] = p1;
        self.path1[2] = p2;
        let mut n = 3;

        for dim in 0..3 {
            n = clip_half(&self.path1, n, &mut self.path2, dim, lo[dim], true);
            if n == 0 {
                return 0;
            }
            n = clip_half(&self.path2, n, &mut self.path1, dim, hi[dim], false);
            if n == 0 {
                return 0;
            }
        }

        n
    }

    /// Split one cell against its candidate triangles.
    ///
    /// `surfs` holds store indices of the candidates (as accepted by
    /// [`surf2grid`](Self::surf2grid)); `surfmap` (same length) receives the
    /// sub-cell index of each candidate, or -1 for candidates discarded
    /// during clipping. Volumes are retrievable through
    /// [`volumes`](Self::volumes) afterwards.
    pub fn split(
        &mut self,
        id: u64,
        lo: DVec3,
        hi: DVec3,
        surfs: &[usize],
        store: &SurfStore,
        surfmap: &mut [i32],
    ) -> Result<Split3, CutError> {
        self.id = id;
        self.lo = lo;
        self.hi = hi;
        self.bpg.reset(id);
        for s in surfmap.iter_mut() {
            *s = -1;
        }

        self.add_tris(surfs, store)?;
        let grazeflag = self.clip_tris();

        if self.empty {
            self.vols.clear();
            self.vols.push(0.0);
            let state = if grazeflag {
                CornerState::Inside
            } else {
                CornerState::Outside
            };
            return Ok(Split3 {
                nsplit: 1,
                grazeflag,
                corners: [state; 8],
                xsplit: None,
            });
        }

        self.ctri_volume();
        self.edge2face()?;

        for iface in 0..6 {
            let (lo2d, hi2d) = face_from_cell(iface, lo, hi);
            if !self.facelist[iface].is_empty() {
                self.edge2clines(iface);
                self.cut2d.split_face(id, iface, lo2d, hi2d)?;
                self.add_face_pgons(iface)?;
            } else {
                self.add_face(iface, lo2d, hi2d)?;
            }
        }

        self.remove_faces();
        self.bpg.check()?;
        self.walk();
        self.loop2ph()?;

        let nsplit = self.phs.len();
        let xsplit = if nsplit > 1 {
            self.create_surfmap(surfmap);
            Some(self.split_point(surfs, store, surfmap)?)
        } else {
            None
        };

        // A corner coordinate matching any active edge endpoint is in the
        // flow; everything else is interior to the surface.
        let mut corners = [CornerState::Inside; 8];
        for edge in self.bpg.edges.iter().filter(|e| e.active) {
            for p in [edge.p1, edge.p2] {
                if let Some(ic) = corner(p, lo, hi) {
                    corners[ic] = CornerState::Outside;
                }
            }
        }

        self.vols.clear();
        self.vols.extend(self.phs.iter().map(|ph| ph.volume));

        Ok(Split3 {
            nsplit,
            grazeflag,
            corners,
            xsplit,
        })
    }

    /// Add each candidate triangle as a polygon with three edges, sharing
    /// edges across triangles. Edges are added in full even if outside the
    /// cell; clipping comes later.
    fn add_tris(&mut self, surfs: &[usize], store: &SurfStore) -> Result<(), CutError> {
        for (i, &m) in surfs.iter().enumerate() {
            let tri = &store.tris[m];
            let (p1, p2, p3) = store.tri_pts(tri);

            let ivert = self.bpg.add_vertex(Style::Ctri, i, Some(tri.norm));
            let mut prev: Option<EdgeRef> = None;
            for (a, b) in [(p1, p2), (p2, p3), (p3, p1)] {
                let (iedge, dir) = match self.bpg.findedge(a, b, false)? {
                    Some(hit) => hit,
                    None => (self.bpg.add_edge(Style::Ctri, a, b), Dir::Fwd),
                };
                self.bpg.edge_insert(iedge, dir, ivert, prev, None);
                prev = Some((iedge, dir));
            }
        }
        Ok(())
    }

    /// Clip every polygon against the six cell faces, re-closing each ring
    /// along the face plane, then drop degenerate edges, open polygons and
    /// grazing polygons. Returns whether any polygon grazed the cell.
    fn clip_tris(&mut self) -> bool {
        let nvert = self.bpg.verts.len();

        for iface in 0..6 {
            let dim = iface / 2;
            let lohi = iface % 2;
            let value = if lohi == 0 {
                self.lo[dim]
            } else {
                self.hi[dim]
            };

            // Clear clip flags; some may be left set from the previous face.
            for edge in self.bpg.edges.iter_mut().filter(|e| e.active) {
                edge.clipped = false;
            }

            for ivert in 0..nvert {
                // An edge shared by two polygons must be clipped only once;
                // the second traversal unsets the flag and keeps it as-is.
                let nedge = self.bpg.verts[ivert].nedge;
                let mut cur = self.bpg.verts[ivert].first;

                for _ in 0..nedge {
                    let Some((iedge, idir)) = cur else { break };

                    if self.bpg.edges[iedge].clipped {
                        self.bpg.edges[iedge].clipped = false;
                        cur = self.bpg.edges[iedge].link[idir.idx()].next;
                        continue;
                    }

                    let (p1, p2) = self.bpg.edges[iedge].pts(idir);
                    let p1flag = classify(p1[dim], value, lohi);
                    let p2flag = classify(p2[dim], value, lohi);

                    // Both outside or outside/on: drop this direction.
                    // Mixed: replace the outside endpoint with the clip point.
                    match (p1flag, p2flag) {
                        (ClipFlag::Outside, ClipFlag::Outside | ClipFlag::Overlap) => {
                            self.bpg.edge_remove_dir(iedge, idir);
                        }
                        (ClipFlag::Outside, ClipFlag::Inside) => {
                            let c = between(p1, p2, dim, value);
                            let edge = &mut self.bpg.edges[iedge];
                            match idir {
                                Dir::Fwd => edge.p1 = c,
                                Dir::Rev => edge.p2 = c,
                            }
                            edge.clipped = true;
                        }
                        (ClipFlag::Inside, ClipFlag::Outside) => {
                            let c = between(p1, p2, dim, value);
                            let edge = &mut self.bpg.edges[iedge];
                            match idir {
                                Dir::Fwd => edge.p2 = c,
                                Dir::Rev => edge.p1 = c,
                            }
                            edge.clipped = true;
                        }
                        (ClipFlag::Overlap, ClipFlag::Outside) => {
                            self.bpg.edge_remove_dir(iedge, idir);
                        }
                        _ => {}
                    }

                    cur = self.bpg.edges[iedge].link[idir.idx()].next;
                }

                // Re-close the ring: wherever the end of one edge no longer
                // meets the start of the next, insert a new edge between them
                // along the clip plane.
                let mut i = 0;
                let mut cur = self.bpg.verts[ivert].first;
                while i < self.bpg.verts[ivert].nedge {
                    let Some((iedge, idir)) = cur else { break };
                    let (jref, wrapped) = match self.bpg.edges[iedge].link[idir.idx()].next {
                        Some(next) => (next, false),
                        None => {
                            let Some(first) = self.bpg.verts[ivert].first else {
                                break;
                            };
                            (first, true)
                        }
                    };
                    let (jedge, jdir) = jref;

                    let (_, p1) = self.bpg.edges[iedge].pts(idir);
                    let (p2, _) = self.bpg.edges[jedge].pts(jdir);

                    if !samepoint(p1, p2) {
                        let n = self.bpg.add_edge(Style::Ctri, p1, p2);
                        let next = if wrapped { None } else { Some(jref) };
                        self.bpg
                            .edge_insert(n, Dir::Fwd, ivert, Some((iedge, idir)), next);
                        i += 1;
                    }

                    if wrapped {
                        break;
                    }
                    cur = Some(jref);
                    i += 1;
                }
            }
        }

        // Remove zero-length edges left by clipping.
        for iedge in 0..self.bpg.edges.len() {
            if !self.bpg.edges[iedge].active {
                continue;
            }
            if samepoint(self.bpg.edges[iedge].p1, self.bpg.edges[iedge].p2) {
                self.bpg.edge_remove(iedge);
            }
        }

        // Remove polygons that fell below 3 edges; they should have 2 or 0.
        for ivert in 0..nvert {
            if self.bpg.verts[ivert].nedge <= 2 {
                self.bpg.vertex_remove(ivert);
            }
        }

        // Remove polygons that only graze the cell: every point on one face
        // with the outward normal pointing out of the cell.
        let mut grazeflag = false;
        for ivert in 0..nvert {
            if !self.bpg.verts[ivert].active {
                continue;
            }
            if self.grazing(ivert) {
                grazeflag = true;
                self.bpg.vertex_remove(ivert);
            }
        }

        // Sweep edges orphaned by the vertex removals.
        for edge in self.bpg.edges.iter_mut() {
            if edge.active && edge.owners() == 0 {
                edge.active = false;
            }
        }

        self.empty = !self.bpg.verts.iter().any(|v| v.active);
        grazeflag
    }

    /// A polygon grazes when all its points lie in the plane of one cell
    /// face and its outward normal points out of the cell.
    fn grazing(&self, ivert: usize) -> bool {
        let Some(norm) = self.bpg.verts[ivert].norm else {
            return false;
        };
        let nedge = self.bpg.verts[ivert].nedge;
        let mut count = [0usize; 6];

        for (iedge, idir) in self.bpg.ring(ivert) {
            let (p, _) = self.bpg.edges[iedge].pts(idir);
            if p.x == self.lo.x {
                count[0] += 1;
            }
            if p.x == self.hi.x {
                count[1] += 1;
            }
            if p.y == self.lo.y {
                count[2] += 1;
            }
            if p.y == self.hi.y {
                count[3] += 1;
            }
            if p.z == self.lo.z {
                count[4] += 1;
            }
            if p.z == self.hi.z {
                count[5] += 1;
            }
        }

        (count[0] == nedge && norm.x < 0.0)
            || (count[1] == nedge && norm.x > 0.0)
            || (count[2] == nedge && norm.y < 0.0)
            || (count[3] == nedge && norm.y > 0.0)
            || (count[4] == nedge && norm.z < 0.0)
            || (count[5] == nedge && norm.z > 0.0)
    }

    /// Signed volume of each clipped triangle polygon: fan the polygon from
    /// its first point, project each fan triangle onto the z plane and weight
    /// by the height of its z midpoint above the z-lo face.
    fn ctri_volume(&mut self) {
        for ivert in 0..self.bpg.verts.len() {
            if !self.bpg.verts[ivert].active {
                continue;
            }
            let Some((e0, d0)) = self.bpg.verts[ivert].first else {
                continue;
            };
            let (p0, _) = self.bpg.edges[e0].pts(d0);

            let mut volume = 0.0;
            for (iedge, idir) in self.bpg.ring(ivert) {
                let (p1, p2) = self.bpg.edges[iedge].pts(idir);
                let zarea = 0.5
                    * ((p1.x - p0.x) * (p2.y - p0.y) - (p1.y - p0.y) * (p2.x - p0.x));
                volume -= zarea * ((p0.z + p1.z + p2.z) / 3.0 - self.lo.z);
            }
            self.bpg.verts[ivert].volume = volume;
        }
    }

    /// Assign every singlet edge to exactly one cell face. An edge along a
    /// cell edge lies on two faces; it goes to the second candidate when the
    /// first face's inward normal points with the owning triangle's normal.
    fn edge2face(&mut self) -> Result<(), CutError> {
        for list in self.facelist.iter_mut() {
            list.clear();
        }

        for iedge in 0..self.bpg.edges.len() {
            let edge = &self.bpg.edges[iedge];
            if !edge.active || edge.owners() == 2 {
                continue;
            }

            let (faces, nface) = which_faces(edge.p1, edge.p2, self.lo, self.hi);
            let iface = match nface {
                0 => {
                    return Err(CutError::geom(self.id, "singlet edge not on any cell face"));
                }
                1 => faces[0],
                2 => {
                    let ivert = edge.verts[0].or(edge.verts[1]).ok_or_else(|| {
                        CutError::geom(self.id, "singlet edge without an owner")
                    })?;
                    let trinorm = self.bpg.verts[ivert].norm.ok_or_else(|| {
                        CutError::geom(self.id, "singlet edge owner has no normal")
                    })?;
                    if face_norm_inward(faces[0]).dot(trinorm) > 0.0 {
                        faces[1]
                    } else {
                        faces[0]
                    }
                }
                _ => {
                    return Err(CutError::geom(self.id, "singlet edge on more than 2 faces"));
                }
            };

            self.facelist[iface].push(iedge);
        }

        Ok(())
    }

    /// Build the 2D CLINES for one face from its singlet edges. Points are
    /// ordered as the owning triangle traverses the edge, then flipped on
    /// faces 0, 3 and 4 so the flow side reads consistently in face
    /// coordinates.
    fn edge2clines(&mut self, iface: usize) {
        let flip = matches!(iface, 0 | 3 | 4);

        self.cut2d.clines.clear();
        for &iedge in &self.facelist[iface] {
            let edge = &self.bpg.edges[iedge];
            let (p1, p2) = if edge.verts[0].is_some() {
                (edge.p1, edge.p2)
            } else {
                (edge.p2, edge.p1)
            };
            let (a, b) = if flip {
                (compress2d(iface, p2), compress2d(iface, p1))
            } else {
                (compress2d(iface, p1), compress2d(iface, p2))
            };
            self.cut2d.clines.push(Cline { a, b, line: iedge });
        }
    }

    /// Add the polygons the 2D cutter produced for one face. Legs leaving an
    /// entry or junction point are the clipped triangle edges themselves,
    /// reused in the opposite direction and restyled; other legs match
    /// existing face edges or create new ones (unflipping on flip faces).
    fn add_face_pgons(&mut self, iface: usize) -> Result<(), CutError> {
        let flip = matches!(iface, 0 | 3 | 4);
        let dim = iface / 2;
        let value = if iface % 2 == 0 {
            self.lo[dim]
        } else {
            self.hi[dim]
        };

        for ipg in 0..self.cut2d.pgs.len() {
            let pg = self.cut2d.pgs[ipg];

            let nvert = self.bpg.add_vertex(Style::FacePgon, iface, None);
            self.bpg.verts[nvert].volume = if iface == 5 {
                pg.area * (self.hi.z - self.lo.z)
            } else {
                0.0
            };

            let mut prev: Option<EdgeRef> = None;
            let mut mloop = Some(pg.first);
            for _ in 0..pg.n {
                let Some(il) = mloop else { break };
                let lp = self.cut2d.loops[il];

                let mut mpt = lp.first;
                for _ in 0..lp.n {
                    let p1d = self.cut2d.points[mpt];
                    let next = p1d
                        .next
                        .ok_or_else(|| CutError::geom(self.id, "face loop chain broken"))?;
                    let p2d = self.cut2d.points[next];
                    mpt = next;

                    let p1 = expand2d(iface, value, p1d.x);
                    let p2 = expand2d(iface, value, p2d.x);

                    if matches!(p1d.ptype, PtType::Entry | PtType::Two) {
                        // The leg is a clipped triangle edge; claim its free
                        // direction slot.
                        let iedge = self.cut2d.clines[p1d.line].line;
                        let edge = &self.bpg.edges[iedge];
                        if edge.owners() == 2 {
                            return Err(CutError::geom(
                                self.id,
                                "face polygon edge already fully owned",
                            ));
                        }
                        let dir = if edge.verts[0].is_some() {
                            Dir::Rev
                        } else {
                            Dir::Fwd
                        };
                        self.bpg.edges[iedge].style = Style::CtriFace;
                        self.bpg.edge_insert(iedge, dir, nvert, prev, None);
                        prev = Some((iedge, dir));
                        continue;
                    }

                    let hit = if flip {
                        self.bpg.findedge(p2, p1, false)?
                    } else {
                        self.bpg.findedge(p1, p2, false)?
                    };
                    match hit {
                        Some((iedge, dir)) => {
                            self.bpg.edge_insert(iedge, dir, nvert, prev, None);
                            prev = Some((iedge, dir));
                        }
                        None => {
                            let (ep1, ep2) = if flip { (p2, p1) } else { (p1, p2) };
                            let iedge = self.bpg.add_edge(Style::FacePgon, ep1, ep2);
                            self.bpg.edge_insert(iedge, Dir::Fwd, nvert, prev, None);
                            prev = Some((iedge, Dir::Fwd));
                        }
                    }
                }

                mloop = lp.next;
            }
        }

        Ok(())
    }

    /// Add an entire cell face as one polygon with its four perimeter edges.
    /// Perimeter edges are shared with adjacent faces' polygons; triangle
    /// edges are skipped so an on-face triangle with its normal into the
    /// cell is not captured.
    fn add_face(&mut self, iface: usize, lo2d: DVec2, hi2d: DVec2) -> Result<(), CutError> {
        let nvert = self.bpg.add_vertex(Style::Face, iface, None);
        self.bpg.verts[nvert].volume = if iface == 5 {
            (self.hi.x - self.lo.x) * (self.hi.y - self.lo.y) * (self.hi.z - self.lo.z)
        } else {
            0.0
        };

        let dim = iface / 2;
        let value = if iface % 2 == 0 {
            self.lo[dim]
        } else {
            self.hi[dim]
        };

        // Points ordered LL, LR, UR, UL; reversed on flip faces.
        let flip = matches!(iface, 0 | 3 | 4);
        let cpts = if flip {
            [
                DVec2::new(lo2d.x, lo2d.y),
                DVec2::new(lo2d.x, hi2d.y),
                DVec2::new(hi2d.x, hi2d.y),
                DVec2::new(hi2d.x, lo2d.y),
            ]
        } else {
            [
                DVec2::new(lo2d.x, lo2d.y),
                DVec2::new(hi2d.x, lo2d.y),
                DVec2::new(hi2d.x, hi2d.y),
                DVec2::new(lo2d.x, hi2d.y),
            ]
        };

        let mut prev: Option<EdgeRef> = None;
        for i in 0..4 {
            let p1 = expand2d(iface, value, cpts[i]);
            let p2 = expand2d(iface, value, cpts[(i + 1) % 4]);

            match self.bpg.findedge(p1, p2, true)? {
                Some((iedge, dir)) => {
                    self.bpg.edge_insert(iedge, dir, nvert, prev, None);
                    prev = Some((iedge, dir));
                }
                None => {
                    let iedge = self.bpg.add_edge(Style::Face, p1, p2);
                    self.bpg.edge_insert(iedge, Dir::Fwd, nvert, prev, None);
                    prev = Some((iedge, Dir::Fwd));
                }
            }
        }

        Ok(())
    }

    /// Remove whole-face polygons with any unconnected edge. Two passes,
    /// since removing one face can disconnect another.
    fn remove_faces(&mut self) {
        for _ in 0..2 {
            for ivert in 0..self.bpg.verts.len() {
                if !self.bpg.verts[ivert].active || self.bpg.verts[ivert].style != Style::Face {
                    continue;
                }
                let unconnected = self
                    .bpg
                    .ring(ivert)
                    .any(|(iedge, _)| self.bpg.edges[iedge].owners() == 1);
                if unconnected {
                    self.bpg.vertex_remove(ivert);
                }
            }
        }
    }

    /// Depth-first walk over active polygons; each connected component
    /// becomes one loop carrying the summed volume, flagged `Border` unless
    /// every member came from a triangle. Member polygons are chained via
    /// their `next` links.
    fn walk(&mut self) {
        let nvert = self.bpg.verts.len();
        self.used.clear();
        self.used
            .extend(self.bpg.verts.iter().map(|v| !v.active));
        self.loops.clear();

        for start in 0..nvert {
            if self.used[start] {
                continue;
            }

            let mut volume = 0.0;
            let mut flag = LoopFlag::Interior;
            let mut ncount = 0usize;
            let mut prev: Option<usize> = None;
            let mut lastv = start;

            self.vstack.clear();
            self.vstack.push(start);
            self.used[start] = true;

            while let Some(ivert) = self.vstack.pop() {
                ncount += 1;
                if self.bpg.verts[ivert].style != Style::Ctri {
                    flag = LoopFlag::Border;
                }
                volume += self.bpg.verts[ivert].volume;

                for (iedge, _) in self.bpg.ring(ivert) {
                    for slot in self.bpg.edges[iedge].verts {
                        if let Some(v) = slot {
                            if !self.used[v] {
                                self.used[v] = true;
                                self.vstack.push(v);
                            }
                        }
                    }
                }

                if let Some(p) = prev {
                    self.bpg.verts[p].next = Some(ivert);
                }
                prev = Some(ivert);
                lastv = ivert;
            }
            self.bpg.verts[lastv].next = None;

            self.loops.push(Loop3 {
                volume,
                flag,
                n: ncount,
                first: start,
                next: None,
            });
        }
    }

    /// Group loops into polyhedra. A single positive loop absorbs every
    /// negative loop as a hole; multiple positive loops must stand alone.
    fn loop2ph(&mut self) -> Result<(), CutError> {
        self.phs.clear();

        let nloop = self.loops.len();
        let positive = self.loops.iter().filter(|l| l.volume > 0.0).count();
        let negative = nloop - positive;

        if positive == 0 {
            return Err(CutError::volume(self.id, "no positive-volume loop in cell"));
        }
        if positive > 1 && negative > 0 {
            return Err(CutError::volume(
                self.id,
                "multiple positive volumes with a negative volume",
            ));
        }

        if positive == 1 {
            let mut volume = 0.0;
            for i in 0..nloop {
                volume += self.loops[i].volume;
                self.loops[i].next = if i + 1 < nloop { Some(i + 1) } else { None };
            }
            if volume < 0.0 {
                return Err(CutError::volume(
                    self.id,
                    "single volume is negative, inverse donut",
                ));
            }
            self.phs.push(Ph {
                volume,
                n: nloop,
                first: 0,
            });
        } else {
            for i in 0..nloop {
                self.loops[i].next = None;
                self.phs.push(Ph {
                    volume: self.loops[i].volume,
                    n: 1,
                    first: i,
                });
            }
        }

        Ok(())
    }

    /// Map each candidate surface to the polyhedron containing its polygon.
    /// Candidates discarded during clipping keep -1.
    fn create_surfmap(&self, surfmap: &mut [i32]) {
        for s in surfmap.iter_mut() {
            *s = -1;
        }

        for (iph, ph) in self.phs.iter().enumerate() {
            let mut mloop = Some(ph.first);
            for _ in 0..ph.n {
                let Some(il) = mloop else { break };
                let lp = self.loops[il];

                let mut mvert = Some(lp.first);
                for _ in 0..lp.n {
                    let Some(iv) = mvert else { break };
                    let vert = &self.bpg.verts[iv];
                    if vert.style.from_tri() {
                        surfmap[vert.label] = iph as i32;
                    }
                    mvert = vert.next;
                }

                mloop = lp.next;
            }
        }
    }

    /// Seed point for the particle domain: an endpoint of any mapped
    /// triangle that is in or on the cell, else the first point of the first
    /// mapped triangle's clip path.
    fn split_point(
        &mut self,
        surfs: &[usize],
        store: &SurfStore,
        surfmap: &[i32],
    ) -> Result<(usize, DVec3), CutError> {
        for (i, &m) in surfs.iter().enumerate() {
            if surfmap[i] < 0 {
                continue;
            }
            let (x1, x2, x3) = store.tri_pts(&store.tris[m]);
            for x in [x1, x2, x3] {
                if ptflag(x, self.lo, self.hi) != PtFlag::Exterior {
                    return Ok((surfmap[i] as usize, x));
                }
            }
        }

        for (i, &m) in surfs.iter().enumerate() {
            if surfmap[i] < 0 {
                continue;
            }
            let (x1, x2, x3) = store.tri_pts(&store.tris[m]);
            if self.clip(x1, x2, x3) > 0 {
                return Ok((surfmap[i] as usize, self.path1[0]));
            }
        }

        Err(CutError::geom(self.id, "no split point in split cell"))
    }
}

/// Classify a coordinate against one clip plane; `lohi` 0 keeps the high
/// side, 1 keeps the low side.
#[inline]
fn classify(p: f64, value: f64, lohi: usize) -> ClipFlag {
    if lohi == 0 {
        if p < value {
            ClipFlag::Outside
        } else if p > value {
            ClipFlag::Inside
        } else {
            ClipFlag::Overlap
        }
    } else if p > value {
        ClipFlag::Outside
    } else if p < value {
        ClipFlag::Inside
    } else {
        ClipFlag::Overlap
    }
}

/// One Sutherland-Hodgman pass of `src[..n]` against a single half-space,
/// writing into `dst`. `keep_ge` keeps coordinates >= `value`, otherwise
/// <= `value`.
fn clip_half(
    src: &[DVec3; 12],
    n: usize,
    dst: &mut [DVec3; 12],
    dim: usize,
    value: f64,
    keep_ge: bool,
) -> usize {
    let mut nnew = 0;
    let mut s = src[n - 1];
    for i in 0..n {
        let e = src[i];
        let e_in = if keep_ge {
            e[dim] >= value
        } else {
            e[dim] <= value
        };
        let s_in = if keep_ge {
            s[dim] >= value
        } else {
            s[dim] <= value
        };
        if e_in {
            if !s_in {
                dst[nnew] = between(s, e, dim, value);
                nnew += 1;
            }
            dst[nnew] = e;
            nnew += 1;
        } else if s_in {
            dst[nnew] = between(e, s, dim, value);
            nnew += 1;
        }
        s = e;
    }
    nnew
}

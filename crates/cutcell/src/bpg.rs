//! Bipartite graph of polygons and shared segments for one grid cell.
//!
//! Vertices are convex planar polygons; edges are segments owned by up to two
//! polygons, one per traversal direction. Each vertex keeps a doubly-linked
//! list of its edges in polygon order; the links live on the edges themselves,
//! one (prev, next) pair per direction, so an edge shared by two polygons is
//! threaded through both rings at once.
//!
//! Handles are plain indices into the two pools. The pools are owned by the
//! `Cut3d` instance and reset for every cell, so no reference ever outlives
//! the cell being cut.

use glam::DVec3;

use crate::error::CutError;
use crate::geom::samepoint;

/// Origin of a polygon or edge in the cut pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    /// From a candidate surface triangle.
    Ctri,
    /// A triangle edge that, after clipping, also bounds a face polygon.
    CtriFace,
    /// A polygon covering part of one cell face.
    FacePgon,
    /// A polygon covering an entire cell face.
    Face,
}

impl Style {
    #[inline]
    pub fn from_tri(self) -> bool {
        matches!(self, Style::Ctri | Style::CtriFace)
    }
}

/// Traversal direction of an edge: `Fwd` reads p1 -> p2, `Rev` reads p2 -> p1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    Fwd,
    Rev,
}

impl Dir {
    #[inline]
    pub fn idx(self) -> usize {
        match self {
            Dir::Fwd => 0,
            Dir::Rev => 1,
        }
    }

    #[inline]
    pub fn flip(self) -> Dir {
        match self {
            Dir::Fwd => Dir::Rev,
            Dir::Rev => Dir::Fwd,
        }
    }
}

/// An edge handle plus the direction it is traversed in.
pub type EdgeRef = (usize, Dir);

/// Per-direction links of an edge within one owning vertex's ring.
#[derive(Debug, Clone, Copy, Default)]
pub struct HalfLink {
    pub prev: Option<EdgeRef>,
    pub next: Option<EdgeRef>,
}

#[derive(Debug, Clone)]
pub struct Vertex {
    pub active: bool,
    pub style: Style,
    /// Candidate-triangle index for `Ctri`, face id for face polygons.
    pub label: usize,
    /// Number of edges currently in the ring.
    pub nedge: usize,
    /// Signed volume between this polygon and the cell's z-lo plane.
    pub volume: f64,
    /// Outward normal; present only for triangle-derived polygons.
    pub norm: Option<DVec3>,
    pub first: Option<EdgeRef>,
    pub last: Option<EdgeRef>,
    /// Chains vertices of one loop after the connectivity walk.
    pub next: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub active: bool,
    pub style: Style,
    /// Scratch flag: clip bookkeeping during face clipping, visit marks in
    /// consistency checks.
    pub clipped: bool,
    /// Owning vertex per direction slot.
    pub verts: [Option<usize>; 2],
    pub link: [HalfLink; 2],
    pub p1: DVec3,
    pub p2: DVec3,
}

impl Edge {
    /// Number of occupied owner slots (0..=2).
    #[inline]
    pub fn owners(&self) -> usize {
        self.verts[0].is_some() as usize + self.verts[1].is_some() as usize
    }

    #[inline]
    pub fn is_singlet(&self) -> bool {
        self.owners() == 1
    }

    /// Endpoints in traversal order for `dir`.
    #[inline]
    pub fn pts(&self, dir: Dir) -> (DVec3, DVec3) {
        match dir {
            Dir::Fwd => (self.p1, self.p2),
            Dir::Rev => (self.p2, self.p1),
        }
    }
}

/// The per-cell graph: vertex and edge pools plus the cell id for error
/// reporting.
#[derive(Debug, Default)]
pub struct Bpg {
    pub verts: Vec<Vertex>,
    pub edges: Vec<Edge>,
    cell: u64,
}

impl Bpg {
    /// Drop all vertices and edges and re-tag the graph with a cell id.
    pub fn reset(&mut self, cell: u64) {
        self.verts.clear();
        self.edges.clear();
        self.cell = cell;
    }

    #[inline]
    pub fn cell(&self) -> u64 {
        self.cell
    }

    pub fn add_vertex(&mut self, style: Style, label: usize, norm: Option<DVec3>) -> usize {
        self.verts.push(Vertex {
            active: true,
            style,
            label,
            nedge: 0,
            volume: 0.0,
            norm,
            first: None,
            last: None,
            next: None,
        });
        self.verts.len() - 1
    }

    pub fn add_edge(&mut self, style: Style, p1: DVec3, p2: DVec3) -> usize {
        self.edges.push(Edge {
            active: true,
            style,
            clipped: false,
            verts: [None, None],
            link: [HalfLink::default(); 2],
            p1,
            p2,
        });
        self.edges.len() - 1
    }

    /// Attach edge `iedge` to `ivert` in direction `dir`, splicing it between
    /// `prev` and `next` in the vertex's ring. `None` for `prev`/`next` makes
    /// the edge the ring's first/last entry.
    pub fn edge_insert(
        &mut self,
        iedge: usize,
        dir: Dir,
        ivert: usize,
        prev: Option<EdgeRef>,
        next: Option<EdgeRef>,
    ) {
        {
            let edge = &mut self.edges[iedge];
            edge.verts[dir.idx()] = Some(ivert);
            edge.active = true;
            edge.clipped = false;
            edge.link[dir.idx()] = HalfLink { prev, next };
        }
        if let Some((inext, dnext)) = next {
            self.edges[inext].link[dnext.idx()].prev = Some((iedge, dir));
        }
        if let Some((iprev, dprev)) = prev {
            self.edges[iprev].link[dprev.idx()].next = Some((iedge, dir));
        }

        let vert = &mut self.verts[ivert];
        vert.nedge += 1;
        if prev.is_none() {
            vert.first = Some((iedge, dir));
        }
        if next.is_none() {
            vert.last = Some((iedge, dir));
        }
    }

    /// Detach one direction of an edge from its owning vertex, splicing its
    /// ring neighbours together. The edge is deactivated once both slots are
    /// empty. The removed edge's own links are left intact so an in-flight
    /// traversal can still step past it.
    pub fn edge_remove_dir(&mut self, iedge: usize, dir: Dir) {
        let (ivert, HalfLink { prev, next }) = {
            let edge = &mut self.edges[iedge];
            let ivert = match edge.verts[dir.idx()].take() {
                Some(v) => v,
                None => return,
            };
            if edge.owners() == 0 {
                edge.active = false;
            }
            (ivert, edge.link[dir.idx()])
        };

        if let Some((iprev, dprev)) = prev {
            self.edges[iprev].link[dprev.idx()].next = next;
        }
        if let Some((inext, dnext)) = next {
            self.edges[inext].link[dnext.idx()].prev = prev;
        }

        let vert = &mut self.verts[ivert];
        vert.nedge -= 1;
        if prev.is_none() {
            vert.first = next;
        }
        if next.is_none() {
            vert.last = prev;
        }
    }

    /// Detach an edge from both owners.
    pub fn edge_remove(&mut self, iedge: usize) {
        if self.edges[iedge].verts[0].is_some() {
            self.edge_remove_dir(iedge, Dir::Fwd);
        }
        if self.edges[iedge].verts[1].is_some() {
            self.edge_remove_dir(iedge, Dir::Rev);
        }
    }

    /// Deactivate a vertex and release its slot in every ring edge. The ring
    /// is not re-spliced since the whole list dies with the vertex.
    pub fn vertex_remove(&mut self, ivert: usize) {
        self.verts[ivert].active = false;

        let nedge = self.verts[ivert].nedge;
        let mut cur = self.verts[ivert].first;
        for _ in 0..nedge {
            let Some((iedge, dir)) = cur else { break };
            let edge = &mut self.edges[iedge];
            edge.verts[dir.idx()] = None;
            if edge.owners() == 0 {
                edge.active = false;
            }
            cur = edge.link[dir.idx()].next;
        }
    }

    /// Find an active edge whose endpoints match (x,y) in either order.
    ///
    /// With `skip_tri` set, triangle-derived edges are not matched; used when
    /// adding whole-face perimeters so an on-face triangle edge with its
    /// normal into the cell is not captured. Matching a direction slot that is
    /// already owned is a topology error.
    pub fn findedge(
        &self,
        x: DVec3,
        y: DVec3,
        skip_tri: bool,
    ) -> Result<Option<EdgeRef>, CutError> {
        for (i, edge) in self.edges.iter().enumerate() {
            if !edge.active {
                continue;
            }
            if skip_tri && edge.style.from_tri() {
                continue;
            }
            if samepoint(x, edge.p1) && samepoint(y, edge.p2) {
                if edge.verts[0].is_some() {
                    return Err(CutError::geom(self.cell, "edge matched in an owned direction"));
                }
                return Ok(Some((i, Dir::Fwd)));
            }
            if samepoint(x, edge.p2) && samepoint(y, edge.p1) {
                if edge.verts[1].is_some() {
                    return Err(CutError::geom(self.cell, "edge matched in an owned direction"));
                }
                return Ok(Some((i, Dir::Rev)));
            }
        }
        Ok(None)
    }

    /// Iterate the ring of `ivert` in polygon order without mutating it.
    pub fn ring(&self, ivert: usize) -> RingIter<'_> {
        RingIter {
            bpg: self,
            cur: self.verts[ivert].first,
            remaining: self.verts[ivert].nedge,
        }
    }

    /// Verify the post-clip invariants.
    ///
    /// Every active vertex has at least 3 distinct active edges whose owner
    /// slot points back at it and whose list terminates at the vertex's
    /// recorded last entry; every active edge has exactly two distinct, valid
    /// owners.
    pub fn check(&mut self) -> Result<(), CutError> {
        let cell = self.cell;

        // Scratch flag doubles as a per-vertex duplicate-edge detector.
        for edge in self.edges.iter_mut().filter(|e| e.active) {
            edge.clipped = false;
        }

        for ivert in 0..self.verts.len() {
            if !self.verts[ivert].active {
                continue;
            }
            let nedge = self.verts[ivert].nedge;
            if nedge < 3 {
                return Err(CutError::geom(cell, "vertex has fewer than 3 edges"));
            }

            let mut cur = self.verts[ivert].first;
            let mut last: Option<EdgeRef> = None;
            for _ in 0..nedge {
                let Some((iedge, dir)) = cur else {
                    return Err(CutError::geom(cell, "vertex ring ends early"));
                };
                let edge = &self.edges[iedge];
                if !edge.active {
                    return Err(CutError::geom(cell, "vertex contains an inactive edge"));
                }
                if edge.verts[dir.idx()] != Some(ivert) {
                    return Err(CutError::geom(cell, "edge does not point back at its vertex"));
                }
                if edge.clipped {
                    return Err(CutError::geom(cell, "vertex contains a duplicate edge"));
                }
                self.edges[iedge].clipped = true;
                last = Some((iedge, dir));
                cur = self.edges[iedge].link[dir.idx()].next;
            }
            if last != self.verts[ivert].last {
                return Err(CutError::geom(cell, "vertex last-edge pointer is stale"));
            }

            // Clear the marks for the next vertex.
            let mut cur = self.verts[ivert].first;
            for _ in 0..nedge {
                let Some((iedge, dir)) = cur else { break };
                self.edges[iedge].clipped = false;
                cur = self.edges[iedge].link[dir.idx()].next;
            }
        }

        let nvert = self.verts.len();
        for edge in self.edges.iter().filter(|e| e.active) {
            if edge.owners() != 2 {
                return Err(CutError::geom(cell, "edge not owned by 2 vertices"));
            }
            if edge.verts[0] == edge.verts[1] {
                return Err(CutError::geom(cell, "edge owned by one vertex twice"));
            }
            for slot in edge.verts.iter().flatten() {
                if *slot >= nvert || !self.verts[*slot].active {
                    return Err(CutError::geom(cell, "edge owned by an invalid vertex"));
                }
            }
        }

        Ok(())
    }
}

/// Read-only iterator over a vertex ring, yielding `(edge, dir)` in polygon
/// order.
pub struct RingIter<'a> {
    bpg: &'a Bpg,
    cur: Option<EdgeRef>,
    remaining: usize,
}

impl<'a> Iterator for RingIter<'a> {
    type Item = EdgeRef;

    fn next(&mut self) -> Option<EdgeRef> {
        if self.remaining == 0 {
            return None;
        }
        let (iedge, dir) = self.cur?;
        self.remaining -= 1;
        self.cur = self.bpg.edges[iedge].link[dir.idx()].next;
        Some((iedge, dir))
    }
}

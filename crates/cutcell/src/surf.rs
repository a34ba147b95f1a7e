//! Explicit surface elements and the per-process surface store.
//!
//! Elements reference points by index into the store's flat point buffer.
//! The iso-surface extractor appends fresh elements each rebuild; the cut
//! engine only reads.

use glam::{DVec2, DVec3};

/// A 3D surface triangle. The outward normal points from the surface interior
/// into the flow and is recomputed from the winding after generation.
#[derive(Debug, Clone, Copy)]
pub struct Tri {
    pub p1: usize,
    pub p2: usize,
    pub p3: usize,
    pub norm: DVec3,
    /// Group bitmask.
    pub mask: u32,
    /// Surface-collision model index.
    pub isc: i32,
    /// Surface type carried over from the generating cell.
    pub typ: i32,
    /// Global id of the grid cell that generated this element.
    pub cell: u64,
}

/// A 2D surface line segment, stored with z = 0.
#[derive(Debug, Clone, Copy)]
pub struct Line {
    pub p1: usize,
    pub p2: usize,
    pub norm: DVec2,
    pub mask: u32,
    pub isc: i32,
    pub typ: i32,
    pub cell: u64,
}

/// Flat store of surface elements owned by one process.
#[derive(Debug, Default)]
pub struct SurfStore {
    pub pts: Vec<DVec3>,
    pub lines: Vec<Line>,
    pub tris: Vec<Tri>,
    /// Elements owned by this process (always all local elements here).
    pub nown: usize,
    /// Global element count across all processes, set via allreduce.
    pub nsurf_global: u64,
}

impl SurfStore {
    /// Drop all elements and points. Invoking the extractor replaces prior
    /// contents, so this runs at the start of every rebuild.
    pub fn clear(&mut self) {
        self.pts.clear();
        self.lines.clear();
        self.tris.clear();
        self.nown = 0;
        self.nsurf_global = 0;
    }

    pub fn add_pt(&mut self, p: DVec3) -> usize {
        self.pts.push(p);
        self.pts.len() - 1
    }

    pub fn append_tri(&mut self, p1: DVec3, p2: DVec3, p3: DVec3, mask: u32, typ: i32, cell: u64) {
        let p1 = self.add_pt(p1);
        let p2 = self.add_pt(p2);
        let p3 = self.add_pt(p3);
        self.tris.push(Tri {
            p1,
            p2,
            p3,
            norm: DVec3::ZERO,
            mask,
            isc: 0,
            typ,
            cell,
        });
    }

    pub fn append_line(&mut self, p1: DVec2, p2: DVec2, mask: u32, typ: i32, cell: u64) {
        let p1 = self.add_pt(p1.extend(0.0));
        let p2 = self.add_pt(p2.extend(0.0));
        self.lines.push(Line {
            p1,
            p2,
            norm: DVec2::ZERO,
            mask,
            isc: 0,
            typ,
            cell,
        });
    }

    /// Local element count.
    pub fn nlocal(&self) -> usize {
        self.lines.len() + self.tris.len()
    }

    /// Record ownership and the allreduced global count.
    pub fn set_count(&mut self, nown: usize, nsurf_global: u64) {
        self.nown = nown;
        self.nsurf_global = nsurf_global;
    }

    /// Unit normals from the triangle winding: (p2-p1) x (p3-p1), normalized.
    pub fn compute_tri_normals(&mut self) {
        for tri in &mut self.tris {
            let a = self.pts[tri.p1];
            let b = self.pts[tri.p2];
            let c = self.pts[tri.p3];
            tri.norm = (b - a).cross(c - a).normalize();
        }
    }

    /// Unit normals from the segment direction: z-axis cross (p2-p1), so the
    /// normal is 90 degrees counterclockwise from the segment.
    pub fn compute_line_normals(&mut self) {
        for line in &mut self.lines {
            let a = self.pts[line.p1];
            let b = self.pts[line.p2];
            let d = (b - a).truncate();
            line.norm = DVec2::new(-d.y, d.x).normalize();
        }
    }

    /// Corner coordinates of a triangle.
    #[inline]
    pub fn tri_pts(&self, tri: &Tri) -> (DVec3, DVec3, DVec3) {
        (self.pts[tri.p1], self.pts[tri.p2], self.pts[tri.p3])
    }

    /// Endpoint coordinates of a line.
    #[inline]
    pub fn line_pts(&self, line: &Line) -> (DVec2, DVec2) {
        (
            self.pts[line.p1].truncate(),
            self.pts[line.p2].truncate(),
        )
    }
}

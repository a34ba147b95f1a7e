//! Clipping of oriented 2D segments against a rectangle and reconstruction of
//! the flow polygons they bound.
//!
//! Input segments (CLINES) are oriented with the flow region on their left,
//! so closing their endpoints counterclockwise along the rectangle border
//! yields positively-oriented flow loops; a chain enclosing a solid island is
//! traversed clockwise and comes out with negative area. Loops are then
//! grouped into polygons (PG) by the same positive/negative rules the 3D
//! walker applies to volumes.
//!
//! Used in two ways: `split_face` reconstructs the polygons on one face of a
//! 3D cell from segments the 3D clipper assigned to it, and `split` is the
//! full 2D cell cut for planar simulations.

use glam::DVec2;

use crate::error::CutError;
use crate::geom::{
    between2d, corner_point2d, ptflag2d, samepoint2d, CornerState, LoopFlag, PtFlag,
};


/// A segment assigned to the rectangle, in traversal order `a -> b` with the
/// flow on its left. `line` is the caller's label: the BPG edge index when
/// invoked per-face from 3D, the candidate-surface index in a 2D cell split.
#[derive(Debug, Clone, Copy)]
pub struct Cline {
    pub a: DVec2,
    pub b: DVec2,
    pub line: usize,
}

/// How a loop point originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtType {
    /// Only starts a segment; the loop enters the segment set here.
    Entry,
    /// Only ends a segment; the loop continues along the border from here.
    Exit,
    /// Chain junction: one segment ends here and another starts.
    Two,
    /// A rectangle corner inserted while closing a loop along the border.
    Corner,
}

/// A loop point. Points are unique by exact coordinate.
#[derive(Debug, Clone, Copy)]
pub struct Pt2 {
    pub x: DVec2,
    pub ptype: PtType,
    /// Index of the outgoing segment; meaningful for `Entry`/`Two` only.
    pub line: usize,
    /// Next point along this point's loop (circular once the loop closes).
    pub next: Option<usize>,
    used: bool,
}

/// A closed loop of points with its signed area.
#[derive(Debug, Clone, Copy)]
pub struct Loop2d {
    pub area: f64,
    pub flag: LoopFlag,
    pub n: usize,
    pub first: usize,
    /// Next loop of the same polygon.
    pub next: Option<usize>,
}

/// A polygon: one positive loop plus any holes assigned to it.
#[derive(Debug, Clone, Copy)]
pub struct Pg {
    pub area: f64,
    pub n: usize,
    pub first: usize,
}

/// Result of a full 2D cell split.
#[derive(Debug, Clone)]
pub struct Split2d {
    pub nsplit: usize,
    pub grazeflag: bool,
    pub corners: [CornerState; 4],
    /// Polygon index and seed point for the particle domain; present only
    /// when the cell splits into more than one polygon.
    pub xsplit: Option<(usize, DVec2)>,
}

/// The 2D cutter. Buffers are reused across cells; each `split`/`split_face`
/// call rebuilds them from scratch.
#[derive(Debug, Default)]
pub struct Cut2d {
    pub clines: Vec<Cline>,
    pub points: Vec<Pt2>,
    pub loops: Vec<Loop2d>,
    pub pgs: Vec<Pg>,
    areas: Vec<f64>,
    id: u64,
    lo: DVec2,
    hi: DVec2,
    empty: bool,
}

impl Cut2d {
    /// Per-polygon areas of the last split.
    pub fn areas(&self) -> &[f64] {
        &self.areas
    }

    /// Reconstruct the polygons on one 3D cell face from the CLINES already
    /// stored in `self.clines` by the caller.
    pub fn split_face(
        &mut self,
        id: u64,
        iface: usize,
        lo2d: DVec2,
        hi2d: DVec2,
    ) -> Result<(), CutError> {
        self.id = id;
        self.lo = lo2d;
        self.hi = hi2d;
        log::trace!(
            "cell {id}: face {iface} split with {} clines",
            self.clines.len()
        );

        self.weiler_build()?;
        self.weiler_loops()?;
        self.loop2pg()
    }

    /// Full 2D cell cut: clip each candidate line to the rectangle, close
    /// loops, group polygons, classify corners and pick the split point.
    ///
    /// `lines` holds the candidate segments in flow-left orientation;
    /// `surfmap` (same length) receives the polygon index of each candidate
    /// or -1.
    pub fn split(
        &mut self,
        id: u64,
        lo: DVec2,
        hi: DVec2,
        lines: &[(DVec2, DVec2)],
        surfmap: &mut [i32],
    ) -> Result<Split2d, CutError> {
        self.id = id;
        self.lo = lo;
        self.hi = hi;

        let grazeflag = self.build_clines(lines);

        self.empty = self.clines.is_empty();
        if self.empty {
            self.areas.clear();
            self.areas.push(0.0);
            for s in surfmap.iter_mut() {
                *s = -1;
            }
            let state = if grazeflag {
                CornerState::Inside
            } else {
                CornerState::Outside
            };
            return Ok(Split2d {
                nsplit: 1,
                grazeflag,
                corners: [state; 4],
                xsplit: None,
            });
        }

        self.weiler_build()?;
        self.weiler_loops()?;
        self.loop2pg()?;

        let nsplit = self.pgs.len();

        // Map candidate lines to the polygon whose loop uses them.
        for s in surfmap.iter_mut() {
            *s = -1;
        }
        for (ipg, pg) in self.pgs.iter().enumerate() {
            let mut mloop = Some(pg.first);
            for _ in 0..pg.n {
                let Some(il) = mloop else { break };
                let lp = self.loops[il];
                let mut mpt = lp.first;
                for _ in 0..lp.n {
                    let pt = &self.points[mpt];
                    if matches!(pt.ptype, PtType::Entry | PtType::Two) {
                        surfmap[self.clines[pt.line].line] = ipg as i32;
                    }
                    mpt = match pt.next {
                        Some(next) => next,
                        None => break,
                    };
                }
                mloop = lp.next;
            }
        }

        // Corner points of the rectangle that appear in a loop are in the
        // flow, everything else is interior to the surface.
        let mut corners = [CornerState::Inside; 4];
        for (ic, state) in corners.iter_mut().enumerate() {
            let cpt = corner_point2d(ic, lo, hi);
            if self.points.iter().any(|p| samepoint2d(p.x, cpt)) {
                *state = CornerState::Outside;
            }
        }

        let xsplit = if nsplit > 1 {
            Some(self.split_point(lines, surfmap)?)
        } else {
            None
        };

        Ok(Split2d {
            nsplit,
            grazeflag,
            corners,
            xsplit,
        })
    }

    /// Clip candidates to the rectangle, dropping grazing and degenerate
    /// segments. Returns whether any segment grazed the cell.
    fn build_clines(&mut self, lines: &[(DVec2, DVec2)]) -> bool {
        self.clines.clear();
        let mut grazeflag = false;

        for (i, &(a, b)) in lines.iter().enumerate() {
            let Some((p, q)) = clip_segment(a, b, self.lo, self.hi) else {
                continue;
            };
            if samepoint2d(p, q) {
                continue;
            }
            if self.grazing(p, q) {
                grazeflag = true;
                continue;
            }
            self.clines.push(Cline { a: p, b: q, line: i });
        }

        grazeflag
    }

    /// A clipped segment grazes when it lies entirely on one rectangle edge
    /// with its flow-side normal pointing out of the rectangle.
    fn grazing(&self, a: DVec2, b: DVec2) -> bool {
        let d = b - a;
        let norm = DVec2::new(-d.y, d.x);
        if a.x == self.lo.x && b.x == self.lo.x && norm.x < 0.0 {
            return true;
        }
        if a.x == self.hi.x && b.x == self.hi.x && norm.x > 0.0 {
            return true;
        }
        if a.y == self.lo.y && b.y == self.lo.y && norm.y < 0.0 {
            return true;
        }
        if a.y == self.hi.y && b.y == self.hi.y && norm.y > 0.0 {
            return true;
        }
        false
    }

    /// Build the deduplicated typed point set from the CLINES and link each
    /// segment's start point to its end point.
    fn weiler_build(&mut self) -> Result<(), CutError> {
        self.points.clear();

        for i in 0..self.clines.len() {
            let cl = self.clines[i];

            let ia = match self.find_point(cl.a) {
                None => {
                    self.points.push(Pt2 {
                        x: cl.a,
                        ptype: PtType::Entry,
                        line: i,
                        next: None,
                        used: false,
                    });
                    self.points.len() - 1
                }
                Some(j) if self.points[j].ptype == PtType::Exit => {
                    self.points[j].ptype = PtType::Two;
                    self.points[j].line = i;
                    j
                }
                Some(_) => {
                    return Err(CutError::geom(self.id, "two segments leave one point"));
                }
            };

            let ib = match self.find_point(cl.b) {
                None => {
                    self.points.push(Pt2 {
                        x: cl.b,
                        ptype: PtType::Exit,
                        line: usize::MAX,
                        next: None,
                        used: false,
                    });
                    self.points.len() - 1
                }
                Some(j) if self.points[j].ptype == PtType::Entry => {
                    self.points[j].ptype = PtType::Two;
                    j
                }
                Some(_) => {
                    return Err(CutError::geom(self.id, "two segments enter one point"));
                }
            };

            self.points[ia].next = Some(ib);
        }

        // A chain may only start or stop on the rectangle border; an interior
        // endpoint means the surface is not closed across this cell.
        for pt in &self.points {
            if matches!(pt.ptype, PtType::Entry | PtType::Exit)
                && ptflag2d(pt.x, self.lo, self.hi) != PtFlag::Border
            {
                return Err(CutError::geom(self.id, "segment chain ends inside cell"));
            }
        }

        Ok(())
    }

    fn find_point(&self, x: DVec2) -> Option<usize> {
        self.points.iter().position(|p| samepoint2d(p.x, x))
    }

    /// Close every point into a loop: segment legs follow the stored links,
    /// border legs walk counterclockwise to the next entry point, inserting
    /// rectangle corners on the way. Signed areas via the shoelace sum.
    fn weiler_loops(&mut self) -> Result<(), CutError> {
        self.loops.clear();

        let nbuild = self.points.len();
        for start in 0..nbuild {
            if self.points[start].used {
                continue;
            }

            let mut area = 0.0;
            let mut flag = LoopFlag::Interior;
            let mut n = 0usize;
            let mut cur = start;
            // Worst case: every point plus one corner insertion per border
            // leg of the walk.
            let limit = self.points.len() + 8;

            loop {
                self.points[cur].used = true;
                let next = match self.points[cur].ptype {
                    PtType::Entry | PtType::Two => self.points[cur]
                        .next
                        .ok_or_else(|| CutError::geom(self.id, "segment link missing"))?,
                    PtType::Exit | PtType::Corner => {
                        flag = LoopFlag::Border;
                        let nxt = self.border_next(cur, start);
                        self.points[cur].next = Some(nxt);
                        nxt
                    }
                };

                let p = self.points[cur].x;
                let q = self.points[next].x;
                area += p.x * q.y - q.x * p.y;
                n += 1;

                if next == start {
                    break;
                }
                if self.points[next].used {
                    return Err(CutError::geom(self.id, "loop walk revisited a point"));
                }
                if n > limit {
                    return Err(CutError::geom(self.id, "loop failed to close"));
                }
                cur = next;
            }

            self.loops.push(Loop2d {
                area: 0.5 * area,
                flag,
                n,
                first: start,
                next: None,
            });
        }

        // Closed all-segment chains never touch the border, so nothing above
        // consumed it. Solid islands (negative loops) then still sit in flow
        // bounded by the full rectangle: add that border loop explicitly.
        // All-positive loops are enclosed flow pockets in solid and get no
        // border loop.
        let has_border_pts = self
            .points
            .iter()
            .any(|p| matches!(p.ptype, PtType::Entry | PtType::Exit));
        if !has_border_pts && !self.loops.is_empty() && self.loops.iter().all(|l| l.area <= 0.0) {
            let first = self.points.len();
            for ic in [0usize, 1, 3, 2] {
                self.points.push(Pt2 {
                    x: corner_point2d(ic, self.lo, self.hi),
                    ptype: PtType::Corner,
                    line: usize::MAX,
                    next: None,
                    used: true,
                });
            }
            for k in 0..4 {
                self.points[first + k].next = Some(first + (k + 1) % 4);
            }
            let area = (self.hi.x - self.lo.x) * (self.hi.y - self.lo.y);
            self.loops.push(Loop2d {
                area,
                flag: LoopFlag::Border,
                n: 4,
                first,
                next: None,
            });
        }

        Ok(())
    }

    /// From a border point, find the next stop counterclockwise: the nearest
    /// entry point not yet claimed by another loop (the current loop's start
    /// stays eligible so the walk can close), or a rectangle corner inserted
    /// on the way.
    fn border_next(&mut self, cur: usize, start: usize) -> usize {
        let t0 = self.border_t(self.points[cur].x);
        let perim = 2.0 * (self.hi.x - self.lo.x) + 2.0 * (self.hi.y - self.lo.y);
        let ahead = |t: f64| {
            let d = t - t0;
            if d > 0.0 {
                d
            } else {
                d + perim
            }
        };

        let mut best: Option<(f64, usize)> = None;
        for (j, pt) in self.points.iter().enumerate() {
            if (pt.used && j != start) || pt.ptype != PtType::Entry {
                continue;
            }
            if ptflag2d(pt.x, self.lo, self.hi) != PtFlag::Border {
                continue;
            }
            let d = ahead(self.border_t(pt.x));
            if best.map_or(true, |(bd, _)| d < bd) {
                best = Some((d, j));
            }
        }

        // Nearest corner ahead; ties go to the entry point sitting on it.
        let mut best_corner: Option<(f64, usize)> = None;
        for ic in 0..4 {
            let cpt = corner_point2d(ic, self.lo, self.hi);
            if samepoint2d(cpt, self.points[cur].x) {
                continue;
            }
            let d = ahead(self.border_t(cpt));
            if best_corner.map_or(true, |(bd, _)| d < bd) {
                best_corner = Some((d, ic));
            }
        }

        match (best, best_corner) {
            (Some((de, j)), Some((dc, _))) if de <= dc => j,
            (Some((_, j)), None) => j,
            (_, Some((_, ic))) => {
                let cpt = corner_point2d(ic, self.lo, self.hi);
                if let Some(j) = self.find_point(cpt) {
                    return j;
                }
                self.points.push(Pt2 {
                    x: cpt,
                    ptype: PtType::Corner,
                    line: usize::MAX,
                    next: None,
                    used: false,
                });
                self.points.len() - 1
            }
            (None, None) => cur,
        }
    }

    /// Counterclockwise perimeter coordinate of a border point, starting at
    /// the lower-left corner along the bottom edge.
    fn border_t(&self, p: DVec2) -> f64 {
        let w = self.hi.x - self.lo.x;
        let h = self.hi.y - self.lo.y;
        if p.y == self.lo.y && p.x < self.hi.x {
            p.x - self.lo.x
        } else if p.x == self.hi.x && p.y < self.hi.y {
            w + (p.y - self.lo.y)
        } else if p.y == self.hi.y && p.x > self.lo.x {
            w + h + (self.hi.x - p.x)
        } else {
            2.0 * w + h + (self.hi.y - p.y)
        }
    }

    /// Group loops into polygons by signed area, mirroring the 3D
    /// loop-to-polyhedron rules.
    fn loop2pg(&mut self) -> Result<(), CutError> {
        self.pgs.clear();
        self.areas.clear();

        let nloop = self.loops.len();
        let positive = self.loops.iter().filter(|l| l.area > 0.0).count();
        let negative = nloop - positive;

        if positive == 0 {
            return Err(CutError::volume(self.id, "no positive-area loop in cell"));
        }
        if positive > 1 && negative > 0 {
            return Err(CutError::volume(
                self.id,
                "multiple positive areas with a negative area",
            ));
        }

        if positive == 1 {
            let mut area = 0.0;
            for i in 0..nloop {
                area += self.loops[i].area;
                self.loops[i].next = if i + 1 < nloop { Some(i + 1) } else { None };
            }
            if area < 0.0 {
                return Err(CutError::volume(self.id, "single area is negative, inverse donut"));
            }
            self.pgs.push(Pg {
                area,
                n: nloop,
                first: 0,
            });
            self.areas.push(area);
        } else {
            for i in 0..nloop {
                self.loops[i].next = None;
                self.pgs.push(Pg {
                    area: self.loops[i].area,
                    n: 1,
                    first: i,
                });
                self.areas.push(self.loops[i].area);
            }
        }

        Ok(())
    }

    /// Seed point for the particle domain: an endpoint of any mapped line
    /// that is in or on the cell, else the first clipped point of the first
    /// mapped line.
    fn split_point(
        &self,
        lines: &[(DVec2, DVec2)],
        surfmap: &[i32],
    ) -> Result<(usize, DVec2), CutError> {
        for (i, &(a, b)) in lines.iter().enumerate() {
            if surfmap[i] < 0 {
                continue;
            }
            if ptflag2d(a, self.lo, self.hi) != PtFlag::Exterior {
                return Ok((surfmap[i] as usize, a));
            }
            if ptflag2d(b, self.lo, self.hi) != PtFlag::Exterior {
                return Ok((surfmap[i] as usize, b));
            }
        }
        for (i, &(a, b)) in lines.iter().enumerate() {
            if surfmap[i] < 0 {
                continue;
            }
            if let Some((p, _)) = clip_segment(a, b, self.lo, self.hi) {
                return Ok((surfmap[i] as usize, p));
            }
        }
        Err(CutError::geom(self.id, "no split point in split cell"))
    }

}

/// Clip a segment to the rectangle; endpoints exactly on the border are kept.
/// Returns `None` when the segment lies strictly outside (a degenerate
/// single-point overlap still returns that point twice).
pub fn clip_segment(a: DVec2, b: DVec2, lo: DVec2, hi: DVec2) -> Option<(DVec2, DVec2)> {
    let mut p = a;
    let mut q = b;
    for dim in 0..2 {
        // Low side: keep coordinates >= lo[dim].
        if p[dim] < lo[dim] && q[dim] < lo[dim] {
            return None;
        }
        if p[dim] < lo[dim] {
            p = between2d(p, q, dim, lo[dim]);
        } else if q[dim] < lo[dim] {
            q = between2d(p, q, dim, lo[dim]);
        }
        // High side: keep coordinates <= hi[dim].
        if p[dim] > hi[dim] && q[dim] > hi[dim] {
            return None;
        }
        if p[dim] > hi[dim] {
            p = between2d(p, q, dim, hi[dim]);
        } else if q[dim] > hi[dim] {
            q = between2d(p, q, dim, hi[dim]);
        }
    }
    Some((p, q))
}

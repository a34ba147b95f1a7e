use glam::DVec3;

use super::Cut3d;
use crate::geom::CornerState;
use crate::surf::SurfStore;

const LO: DVec3 = DVec3::new(0.0, 0.0, 0.0);
const HI: DVec3 = DVec3::new(1.0, 1.0, 1.0);
const CAP: usize = 64;

fn v(x: f64, y: f64, z: f64) -> DVec3 {
    DVec3::new(x, y, z)
}

fn store_with(tris: &[[DVec3; 3]]) -> SurfStore {
    let mut store = SurfStore::default();
    for t in tris {
        store.append_tri(t[0], t[1], t[2], 1, 0, 1);
    }
    store.compute_tri_normals();
    store
}

/// Two triangles tiling the quad p0-p1-p2-p3.
fn quad(p0: DVec3, p1: DVec3, p2: DVec3, p3: DVec3) -> [[DVec3; 3]; 2] {
    [[p0, p1, p2], [p0, p2, p3]]
}

fn run_split(store: &SurfStore) -> (Cut3d, super::Split3, Vec<i32>) {
    let mut cut = Cut3d::default();
    let mut surfs = Vec::new();
    cut.surf2grid(1, LO, HI, store, &mut surfs, CAP).unwrap();
    assert_eq!(surfs.len(), store.tris.len());
    let mut surfmap = vec![0i32; surfs.len()];
    let split = cut.split(1, LO, HI, &surfs, store, &mut surfmap).unwrap();
    (cut, split, surfmap)
}

#[test]
fn corner_cut_triangle_leaves_one_subcell() {
    // Triangle clipping off the corner at the origin; normal away from it,
    // so the flow is everything but the corner tetrahedron.
    let d = 0.2;
    let store = store_with(&[[v(d, 0.0, 0.0), v(0.0, d, 0.0), v(0.0, 0.0, d)]]);
    let (cut, split, _) = run_split(&store);

    assert_eq!(split.nsplit, 1);
    assert!(!split.grazeflag);
    let expect = 1.0 - d * d * d / 6.0;
    assert!(
        (cut.volumes()[0] - expect).abs() < 1e-12,
        "volume {} != {}",
        cut.volumes()[0],
        expect
    );
    assert_eq!(split.corners[0], CornerState::Inside);
    for ic in 1..8 {
        assert_eq!(split.corners[ic], CornerState::Outside, "corner {ic}");
    }
}

#[test]
fn oblique_sheet_volume_and_corners() {
    // Planar sheet x + y = 0.5 spanning the cell in z; flow on the +x+y
    // side, solid in the prism near the x=y=0 cell edge.
    let tris = quad(
        v(0.5, 0.0, 0.0),
        v(0.0, 0.5, 0.0),
        v(0.0, 0.5, 1.0),
        v(0.5, 0.0, 1.0),
    );
    let store = store_with(&tris);
    let (cut, split, _) = run_split(&store);

    assert_eq!(split.nsplit, 1);
    let expect = 1.0 - 0.125;
    assert!((cut.volumes()[0] - expect).abs() < 1e-12);
    for ic in 0..8 {
        let expect_state = if ic == 0 || ic == 4 {
            CornerState::Inside
        } else {
            CornerState::Outside
        };
        assert_eq!(split.corners[ic], expect_state, "corner {ic}");
    }
}

#[test]
fn two_walls_split_cell_into_two_flow_regions() {
    // Solid slab between two vertical walls: flow below x=0.25 and above
    // x=0.5, nothing in between.
    let wall_a = quad(
        v(0.25, 0.0, 0.0),
        v(0.25, 0.0, 1.0),
        v(0.25, 1.0, 1.0),
        v(0.25, 1.0, 0.0),
    ); // normal -x
    let wall_b = quad(
        v(0.5, 0.0, 0.0),
        v(0.5, 1.0, 0.0),
        v(0.5, 1.0, 1.0),
        v(0.5, 0.0, 1.0),
    ); // normal +x
    let mut tris = Vec::new();
    tris.extend_from_slice(&wall_a);
    tris.extend_from_slice(&wall_b);
    let store = store_with(&tris);

    let (cut, split, surfmap) = run_split(&store);

    assert_eq!(split.nsplit, 2);
    let mut vols = cut.volumes().to_vec();
    vols.sort_by(f64::total_cmp);
    assert!((vols[0] - 0.25).abs() < 1e-12);
    assert!((vols[1] - 0.5).abs() < 1e-12);

    // Both triangles of one wall map to the same sub-cell, and the two
    // walls to different sub-cells.
    assert_eq!(surfmap[0], surfmap[1]);
    assert_eq!(surfmap[2], surfmap[3]);
    assert_ne!(surfmap[0], surfmap[2]);

    let (xsub, xsplit) = split.xsplit.unwrap();
    assert!(xsub < 2);
    assert_ne!(
        crate::geom::ptflag(xsplit, LO, HI),
        crate::geom::PtFlag::Exterior
    );

    // Every cell corner sits on an uncut face perimeter, hence in the flow.
    assert_eq!(split.corners, [CornerState::Outside; 8]);
}

#[test]
fn grazing_triangle_empties_the_cell() {
    // Triangle on the z-lo face with its normal out of the cell.
    let store = store_with(&[[v(0.2, 0.2, 0.0), v(0.2, 0.8, 0.0), v(0.8, 0.2, 0.0)]]);
    assert!(store.tris[0].norm.z < 0.0);

    let mut cut = Cut3d::default();
    let mut surfs = Vec::new();
    // Touching still counts as a hit.
    let n = cut.surf2grid(1, LO, HI, &store, &mut surfs, CAP).unwrap();
    assert_eq!(n, 1);

    let mut surfmap = vec![0i32; 1];
    let split = cut.split(1, LO, HI, &surfs, &store, &mut surfmap).unwrap();
    assert_eq!(split.nsplit, 1);
    assert!(split.grazeflag);
    assert_eq!(cut.volumes()[0], 0.0);
    assert_eq!(split.corners, [CornerState::Inside; 8]);
    assert_eq!(surfmap[0], -1);
}

#[test]
fn enclosed_box_is_a_donut_with_one_subcell() {
    // Closed box strictly inside the cell, outward normals: one polyhedron
    // whose volume is the cell minus the box.
    let (a, b) = (0.3, 0.7);
    let mut tris = Vec::new();
    // x faces
    tris.extend_from_slice(&quad(v(a, a, a), v(a, a, b), v(a, b, b), v(a, b, a)));
    tris.extend_from_slice(&quad(v(b, a, a), v(b, b, a), v(b, b, b), v(b, a, b)));
    // y faces
    tris.extend_from_slice(&quad(v(a, a, a), v(b, a, a), v(b, a, b), v(a, a, b)));
    tris.extend_from_slice(&quad(v(a, b, a), v(a, b, b), v(b, b, b), v(b, b, a)));
    // z faces
    tris.extend_from_slice(&quad(v(a, a, a), v(a, b, a), v(b, b, a), v(b, a, a)));
    tris.extend_from_slice(&quad(v(a, a, b), v(b, a, b), v(b, b, b), v(a, b, b)));
    let store = store_with(&tris);

    // Sanity: all normals point away from the box centre.
    let centre = v(0.5, 0.5, 0.5);
    for tri in &store.tris {
        let (p1, p2, p3) = store.tri_pts(tri);
        let mid = (p1 + p2 + p3) / 3.0;
        assert!(tri.norm.dot(mid - centre) > 0.0);
    }

    let (cut, split, surfmap) = run_split(&store);
    assert_eq!(split.nsplit, 1);
    let expect = 1.0 - 0.4 * 0.4 * 0.4;
    assert!((cut.volumes()[0] - expect).abs() < 1e-12);
    assert_eq!(split.corners, [CornerState::Outside; 8]);
    assert_eq!(cut.loops.len(), 2);
    // surfmap is only populated for split cells.
    assert!(surfmap.iter().all(|&s| s == -1));
}

#[test]
fn surf2grid_is_order_independent() {
    let mut tris = Vec::new();
    tris.extend_from_slice(&quad(
        v(0.25, 0.0, 0.0),
        v(0.25, 0.0, 1.0),
        v(0.25, 1.0, 1.0),
        v(0.25, 1.0, 0.0),
    ));
    // Far away: rejected.
    tris.push([v(5.0, 5.0, 5.0), v(6.0, 5.0, 5.0), v(5.0, 6.0, 5.0)]);
    // Touching the x-hi face from outside: accepted.
    tris.push([v(1.0, 0.2, 0.2), v(1.5, 0.2, 0.2), v(1.5, 0.5, 0.2)]);

    let store = store_with(&tris);
    let mut cut = Cut3d::default();
    let mut accepted = Vec::new();
    cut.surf2grid(1, LO, HI, &store, &mut accepted, CAP).unwrap();
    assert_eq!(accepted, vec![0, 1, 3]);

    // Reversed input order accepts the same set of triangles.
    let mut rev = SurfStore::default();
    for t in tris.iter().rev() {
        rev.append_tri(t[0], t[1], t[2], 1, 0, 1);
    }
    rev.compute_tri_normals();
    let mut accepted_rev = Vec::new();
    cut.surf2grid(1, LO, HI, &rev, &mut accepted_rev, CAP).unwrap();
    let n = tris.len() - 1;
    let mut remapped: Vec<usize> = accepted_rev.iter().map(|&i| n - i).collect();
    remapped.sort_unstable();
    assert_eq!(remapped, vec![0, 1, 3]);
}

#[test]
fn surf2grid_overflow_is_an_error() {
    let store = store_with(&[[v(0.2, 0.2, 0.2), v(0.8, 0.2, 0.2), v(0.2, 0.8, 0.2)]]);
    let mut cut = Cut3d::default();
    let mut out = Vec::new();
    assert!(cut.surf2grid(1, LO, HI, &store, &mut out, 0).is_err());
}

#[test]
fn subcell_volumes_sum_to_cell_volume_for_plane_cuts() {
    // A sheet fully crossing the cell splits nothing off on its own (the
    // solid side is simply absent); the flow volume equals the cell volume
    // minus the closed-off part. Sweep a wall pair across the cell and make
    // sure flow + slab always reproduces the cell volume.
    for frac in [0.125, 0.25, 0.375] {
        let xa = frac;
        let xb = 1.0 - frac;
        let wall_a = quad(
            v(xa, 0.0, 0.0),
            v(xa, 0.0, 1.0),
            v(xa, 1.0, 1.0),
            v(xa, 1.0, 0.0),
        );
        let wall_b = quad(
            v(xb, 0.0, 0.0),
            v(xb, 1.0, 0.0),
            v(xb, 1.0, 1.0),
            v(xb, 0.0, 1.0),
        );
        let mut tris = Vec::new();
        tris.extend_from_slice(&wall_a);
        tris.extend_from_slice(&wall_b);
        let store = store_with(&tris);
        let (cut, split, _) = run_split(&store);

        assert_eq!(split.nsplit, 2);
        let flow: f64 = cut.volumes().iter().sum();
        let slab = xb - xa;
        assert!(
            (flow + slab - 1.0).abs() < 1e-12,
            "frac {frac}: flow {flow} slab {slab}"
        );
    }
}

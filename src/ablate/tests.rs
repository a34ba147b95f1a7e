use glam::DVec3;

use cutcell::SurfStore;

use super::Ablate;
use crate::comm::SerialComm;
use crate::grid::{CellKind, GridBlock};
use crate::source::{DeltaSource, GridSource, TableSource};

const T: f64 = 128.0;

fn serial_block(n: i32) -> GridBlock {
    GridBlock::new(
        3,
        n,
        n,
        n,
        DVec3::ZERO,
        DVec3::ONE,
        0,
        &|_, _, _| 0,
    )
    .unwrap()
}

/// Corner value as a pure function of the grid node, so duplicated copies
/// agree by construction: solid ball around the block centre.
fn ball_field(grid: &GridBlock) -> Vec<f64> {
    let centre = DVec3::new(
        grid.nx as f64 * 0.5,
        grid.ny as f64 * 0.5,
        grid.nz as f64 * 0.5,
    );
    let radius = grid.nx as f64 * 0.35;

    let mut cvalues = vec![0.0; grid.nlocal * 8];
    for icell in 0..grid.nlocal {
        let cell = &grid.cells[icell];
        for k in 0..8 {
            let node = DVec3::new(
                if k & 1 == 0 { cell.lo.x } else { cell.hi.x },
                if k & 2 == 0 { cell.lo.y } else { cell.hi.y },
                if k & 4 == 0 { cell.lo.z } else { cell.hi.z },
            );
            cvalues[icell * 8 + k] = if node.distance(centre) <= radius {
                255.0
            } else {
                0.0
            };
        }
    }
    cvalues
}

fn random_ablate(nevery: i32, scale: f64, seed: u64) -> Ablate {
    Ablate::new(
        nevery,
        scale,
        DeltaSource::Random { maxrandom: 10 },
        seed,
        1,
        0,
    )
    .unwrap()
}

#[test]
fn construction_validates_the_source() {
    assert!(Ablate::new(-1, 1.0, DeltaSource::Random { maxrandom: 10 }, 1, 1, 0).is_err());
    assert!(Ablate::new(1, 1.0, DeltaSource::Random { maxrandom: 0 }, 1, 1, 0).is_err());

    // Frequency must divide the period.
    let src = TableSource {
        freq: 3,
        values: vec![],
    };
    assert!(Ablate::new(
        4,
        1.0,
        DeltaSource::Field {
            source: Box::new(src),
            column: 0
        },
        1,
        1,
        0
    )
    .is_err());

    let src = TableSource {
        freq: 2,
        values: vec![],
    };
    assert!(Ablate::new(
        4,
        1.0,
        DeltaSource::Field {
            source: Box::new(src),
            column: 0
        },
        1,
        1,
        0
    )
    .is_ok());
}

#[test]
fn decrement_takes_smallest_positive_corners_first() {
    let grid = serial_block(1);
    let mut ablate = random_ablate(1, 1.0, 7);
    ablate.dim = 3;
    ablate.ncorner = 8;
    ablate.nglocal = 1;
    ablate.cvalues = vec![10.0, 0.0, 3.0, 50.0, 3.0, 200.0, 90.0, 7.0];
    ablate.cdelta = vec![0.0; 8];
    ablate.celldelta = vec![12.0];
    ablate.ixyz = vec![[1, 1, 1]];

    ablate.decrement(&grid);

    // Smallest positive first: 3 (corner 2), then 3 (corner 4), then 7
    // (corner 7) covers 6 of the remaining, zero corners untouched.
    assert_eq!(
        ablate.cdelta,
        vec![0.0, 0.0, 3.0, 0.0, 3.0, 0.0, 0.0, 6.0]
    );
}

#[test]
fn decrement_stops_when_all_corners_are_spent() {
    let grid = serial_block(1);
    let mut ablate = random_ablate(1, 1.0, 7);
    ablate.dim = 3;
    ablate.ncorner = 8;
    ablate.nglocal = 1;
    ablate.cvalues = vec![1.0; 8];
    ablate.cdelta = vec![0.0; 8];
    ablate.celldelta = vec![100.0];
    ablate.ixyz = vec![[1, 1, 1]];

    ablate.decrement(&grid);

    // Every corner gives all it has; nothing goes negative.
    assert_eq!(ablate.cdelta, vec![1.0; 8]);
}

/// Set one grid node's value in every cell copy that stores it.
fn set_node(grid: &GridBlock, cvalues: &mut [f64], node: DVec3, value: f64) {
    for icell in 0..grid.nlocal {
        let cell = &grid.cells[icell];
        for k in 0..8 {
            let p = DVec3::new(
                if k & 1 == 0 { cell.lo.x } else { cell.hi.x },
                if k & 2 == 0 { cell.lo.y } else { cell.hi.y },
                if k & 4 == 0 { cell.lo.z } else { cell.hi.z },
            );
            if p == node {
                cvalues[icell * 8 + k] = value;
            }
        }
    }
}

#[test]
fn sync_snaps_near_threshold_corners() {
    let mut grid = serial_block(2);
    let mut surf = SurfStore::default();
    let mut comm = SerialComm;

    let mut cvalues = ball_field(&grid);
    // Nudge one node to just below the threshold, consistently across all
    // of its copies; after a zero-decrement step every copy must sit
    // exactly at thresh - 1e-4.
    set_node(&grid, &mut cvalues, DVec3::new(1.0, 1.0, 0.0), 127.99995);

    let mut ablate = random_ablate(1, 0.0, 11);
    ablate
        .store_corners(
            &mut grid,
            &mut surf,
            &mut comm,
            DVec3::ZERO,
            DVec3::ONE,
            &cvalues,
            None,
            T,
        )
        .unwrap();
    ablate.end_of_step(&mut grid, &mut surf, &mut comm).unwrap();

    assert_eq!(ablate.corners(0)[3], T - 1.0e-4);
}

#[test]
fn zero_source_step_is_idempotent() {
    let mut grid = serial_block(4);
    let mut surf = SurfStore::default();
    let mut comm = SerialComm;
    let cvalues = ball_field(&grid);

    let mut ablate = random_ablate(1, 0.0, 3);
    ablate
        .store_corners(
            &mut grid,
            &mut surf,
            &mut comm,
            DVec3::ZERO,
            DVec3::ONE,
            &cvalues,
            None,
            T,
        )
        .unwrap();

    let corners0 = ablate.cvalues.clone();
    let pts0 = surf.pts.clone();
    let ntri0 = surf.tris.len();
    assert!(ntri0 > 0);

    for _ in 0..3 {
        ablate.end_of_step(&mut grid, &mut surf, &mut comm).unwrap();
    }

    assert_eq!(ablate.cvalues, corners0);
    assert_eq!(surf.pts, pts0);
    assert_eq!(surf.tris.len(), ntri0);
    assert_eq!(ablate.compute_scalar(), 0.0);
}

#[test]
fn ablation_decrements_and_conserves_cut_volumes() {
    let mut grid = serial_block(4);
    let mut surf = SurfStore::default();
    let mut comm = SerialComm;
    let cvalues = ball_field(&grid);

    let mut ablate = random_ablate(1, 1.0, 12345);
    ablate
        .store_corners(
            &mut grid,
            &mut surf,
            &mut comm,
            DVec3::ZERO,
            DVec3::ONE,
            &cvalues,
            None,
            T,
        )
        .unwrap();

    let total0: f64 = ablate.cvalues.iter().sum();

    for _ in 0..5 {
        ablate.end_of_step(&mut grid, &mut surf, &mut comm).unwrap();
        assert!(ablate.compute_scalar() >= 0.0);

        for icell in 0..grid.nlocal {
            let cell = &grid.cells[icell];
            let boxvol =
                (cell.hi.x - cell.lo.x) * (cell.hi.y - cell.lo.y) * (cell.hi.z - cell.lo.z);
            match cell.kind {
                CellKind::Outside => assert_eq!(cell.volume, boxvol),
                CellKind::Inside => assert_eq!(cell.volume, 0.0),
                CellKind::Overlap => {
                    assert!(
                        cell.volume > 0.0 && cell.volume <= boxvol + 1e-12,
                        "cell {} volume {} of {}",
                        cell.id,
                        cell.volume,
                        boxvol
                    );
                }
            }
        }
    }

    // Material only ever disappears.
    let total1: f64 = ablate.cvalues.iter().sum();
    assert!(total1 < total0);
}

#[test]
fn compute_vector_is_bounded_to_four_columns() {
    let grid = serial_block(1);
    let mut comm = SerialComm;
    let mut ablate = random_ablate(1, 1.0, 1);
    ablate.nglocal = 1;
    ablate.cvalues = vec![8.0, 6.0, 4.0, 2.0, 0.0, 0.0, 0.0, 0.0];
    ablate.ixyz = vec![[1, 1, 1]];

    let v0 = ablate.compute_vector(&grid, &mut comm, 0).unwrap();
    assert_eq!(v0, 8.0);
    let v1 = ablate.compute_vector(&grid, &mut comm, 1).unwrap();
    assert_eq!(v1, 7.0);
    let v3 = ablate.compute_vector(&grid, &mut comm, 3).unwrap();
    assert_eq!(v3, 5.0);
    assert!(ablate.compute_vector(&grid, &mut comm, 4).is_err());
}

#[test]
fn migration_payload_roundtrips() {
    let grid = serial_block(2);
    let mut ablate = random_ablate(1, 1.0, 1);
    ablate.dim = 3;
    ablate.ncorner = 8;
    ablate.nglocal = grid.nlocal;
    ablate.cvalues = (0..grid.nlocal * 8).map(|i| i as f64).collect();
    ablate.tvalues = Some((0..grid.nlocal as i32).collect());
    ablate.ixyz = (0..grid.nlocal)
        .map(|i| {
            let (x, y, z) = grid.ixyz_of(grid.cells[i].id);
            [x, y, z]
        })
        .collect();
    ablate.celldelta = vec![0.0; grid.nlocal];
    ablate.cdelta = vec![0.0; grid.nlocal * 8];

    let mut buf = Vec::new();
    let n = ablate.pack_grid_one(&grid, 3, &mut buf);
    assert_eq!(n, 8 + 1 + 3);

    let row: Vec<f64> = ablate.corner_row(3).to_vec();
    let ixyz = ablate.ixyz[3];

    // Receive into a fresh slot.
    ablate.add_grid_one();
    let inew = ablate.nglocal - 1;
    let m = ablate.unpack_grid_one(&grid, inew, &buf).unwrap();
    assert_eq!(m, n);
    assert_eq!(ablate.corner_row(inew), row.as_slice());
    assert_eq!(ablate.ixyz[inew], ixyz);
    assert_eq!(ablate.tvalues.as_ref().unwrap()[inew], 3);

    ablate.reset_grid_count(grid.nlocal);
    assert_eq!(ablate.cvalues.len(), grid.nlocal * 8);
}

#[test]
fn field_source_scales_by_nevery() {
    let mut grid = serial_block(2);
    let mut surf = SurfStore::default();
    let mut comm = SerialComm;
    let cvalues = ball_field(&grid);

    struct Unit;
    impl GridSource for Unit {
        fn compute_per_grid(&mut self, _grid: &GridBlock, _column: usize, out: &mut [f64]) {
            out.fill(1.0);
        }
    }

    let mut ablate = Ablate::new(
        2,
        3.0,
        DeltaSource::Field {
            source: Box::new(Unit),
            column: 0,
        },
        1,
        1,
        0,
    )
    .unwrap();
    ablate
        .store_corners(
            &mut grid,
            &mut surf,
            &mut comm,
            DVec3::ZERO,
            DVec3::ONE,
            &cvalues,
            None,
            T,
        )
        .unwrap();
    ablate.end_of_step(&mut grid, &mut surf, &mut comm).unwrap();

    // nevery * scale * value = 6 per cell, 8 cells.
    assert_eq!(ablate.compute_scalar(), 48.0);
}

//! Ablate a spherical solid on a uniform block and report the surface and
//! volume evolution.

use clap::Parser;
use glam::DVec3;

use rarefy::ablate::Ablate;
use rarefy::comm::{ChannelComm, Comm, SerialComm};
use rarefy::grid::{CellKind, GridBlock};
use rarefy::source::DeltaSource;
use rarefy::util::Timed;
use rarefy::cutcell::SurfStore;

/// Stochastic ablation of an implicit sphere.
#[derive(Parser, Debug, Clone)]
#[command(name = "ablate_demo", version, about)]
struct Cli {
    /// Cells per axis
    #[arg(long, default_value_t = 10)]
    n: i32,

    /// Ablation steps to run
    #[arg(long, default_value_t = 20)]
    steps: usize,

    /// RNG seed
    #[arg(long, default_value_t = 12345)]
    seed: u64,

    /// Iso-threshold on the 0..255 corner scale
    #[arg(long, default_value_t = 128.0)]
    thresh: f64,

    /// Fraction of cells decremented per step
    #[arg(long, default_value_t = 0.5)]
    scale: f64,

    /// Maximum random decrement per cell per step
    #[arg(long, default_value_t = 10)]
    maxrandom: i32,

    /// Number of ranks (threads) to split the block over
    #[arg(long, default_value_t = 1)]
    ranks: usize,
}

/// Corner value as a pure function of the grid node so duplicated copies
/// agree by construction.
fn ball_values(grid: &GridBlock) -> Vec<f64> {
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

fn run_rank(cli: &Cli, me: usize, comm: &mut dyn Comm) {
    let n = cli.n;
    let nranks = comm.nranks() as i32;
    let owner = move |ix: i32, _iy: i32, _iz: i32| {
        (((ix - 1) * nranks) / n) as usize
    };

    let mut grid = GridBlock::new(3, n, n, n, DVec3::ZERO, DVec3::ONE, me, &owner)
        .expect("grid construction failed");
    let mut surf = SurfStore::default();
    let cvalues = ball_values(&grid);

    let mut ablate = Ablate::new(
        1,
        cli.scale,
        DeltaSource::Random {
            maxrandom: cli.maxrandom,
        },
        cli.seed,
        1,
        0,
    )
    .expect("invalid ablate configuration");

    {
        let _t = Timed::info("initial surface build");
        ablate
            .store_corners(
                &mut grid,
                &mut surf,
                comm,
                DVec3::ZERO,
                DVec3::ONE,
                &cvalues,
                None,
                cli.thresh,
            )
            .expect("storing corner values failed");
    }

    for step in 1..=cli.steps {
        ablate
            .end_of_step(&mut grid, &mut surf, comm)
            .expect("ablation step failed");

        let mut flow = 0.0;
        let mut ncut = 0usize;
        for cell in &grid.cells[..grid.nlocal] {
            flow += cell.volume;
            if cell.kind == CellKind::Overlap {
                ncut += 1;
            }
        }
        let flow_total = comm.allreduce_sum(flow);
        let ncut_total = comm.allreduce_sum_u64(ncut as u64);

        if me == 0 {
            log::info!(
                "step {step}: {} global surfs, {ncut_total} cut cells, \
                 flow volume {flow_total:.4}, decrement {}",
                surf.nsurf_global,
                ablate.compute_scalar(),
            );
        }

        if surf.nsurf_global == 0 {
            if me == 0 {
                log::info!("solid fully ablated after {step} steps");
            }
            break;
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.ranks <= 1 {
        run_rank(&cli, 0, &mut SerialComm);
        return;
    }

    let worlds = ChannelComm::world(cli.ranks);
    let handles: Vec<_> = worlds
        .into_iter()
        .enumerate()
        .map(|(me, mut comm)| {
            let cli = cli.clone();
            std::thread::spawn(move || run_rank(&cli, me, &mut comm))
        })
        .collect();
    for h in handles {
        h.join().expect("rank thread panicked");
    }
}

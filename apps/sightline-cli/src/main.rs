use std::cell::RefCell;
use std::rc::Rc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use sightline_common::{DriveMode, EntityId};
use sightline_ingress::channel;
use sightline_interest::{GridConfig, InterestGrid};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sightline-cli", about = "CLI driver for the sightline interest engine")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print engine version and crate info
    Info,
    /// Run a deterministic random-walk load scenario
    Simulate {
        /// Number of ticks to simulate
        #[arg(short, long, default_value = "100")]
        ticks: u64,
        /// Number of client-driven walkers
        #[arg(short, long, default_value = "8")]
        clients: u64,
        /// Number of server-driven wanderers
        #[arg(short, long, default_value = "32")]
        npcs: u64,
        /// RNG seed for a reproducible walk
        #[arg(short, long, default_value = "42")]
        seed: u64,
        /// World partition width of one cell
        #[arg(long, default_value = "20.0")]
        cell_size: f32,
        /// Emit the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Delivery statistics accumulated over a simulation run.
#[derive(Debug, Default, Clone, Serialize)]
struct DeliveryStats {
    personal_flushes: u64,
    personal_events: u64,
    merge_flushes: u64,
    merge_events: u64,
}

#[derive(Debug, Serialize)]
struct Summary {
    ticks: u64,
    clients: u64,
    npcs: u64,
    seed: u64,
    cell_size: f32,
    cells_materialized: usize,
    delivery: DeliveryStats,
    faults: sightline_interest::FaultCounters,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("sightline-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common:   {}", sightline_common::crate_info());
            println!("interest: {}", sightline_interest::crate_info());
            println!("ingress:  {}", sightline_ingress::crate_info());
        }
        Commands::Simulate {
            ticks,
            clients,
            npcs,
            seed,
            cell_size,
            json,
        } => {
            let summary = simulate(ticks, clients, npcs, seed, cell_size)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "Simulated {} ticks: {} clients + {} npcs, seed={}, cell_size={}",
                    summary.ticks, summary.clients, summary.npcs, summary.seed, summary.cell_size
                );
                println!("  cells materialized: {}", summary.cells_materialized);
                println!(
                    "  personal deltas:    {} flushes / {} events",
                    summary.delivery.personal_flushes, summary.delivery.personal_events
                );
                println!(
                    "  merge deltas:       {} flushes / {} events",
                    summary.delivery.merge_flushes, summary.delivery.merge_events
                );
                println!("  absorbed faults:    {}", summary.faults.total());
            }
        }
    }

    Ok(())
}

fn simulate(
    ticks: u64,
    clients: u64,
    npcs: u64,
    seed: u64,
    cell_size: f32,
) -> anyhow::Result<Summary> {
    let stats = Rc::new(RefCell::new(DeliveryStats::default()));
    let personal = stats.clone();
    let merged = stats.clone();

    let mut grid = InterestGrid::new(
        GridConfig { cell_size },
        Box::new(move |_, batch| {
            let mut s = personal.borrow_mut();
            s.personal_flushes += 1;
            s.personal_events += batch.len() as u64;
        }),
        Box::new(move |_, batch| {
            let mut s = merged.borrow_mut();
            s.merge_flushes += 1;
            s.merge_events += batch.len() as u64;
        }),
    );
    let (queue, drain) = channel();

    // Walkers spawn inside a bounded arena and wander deterministically.
    let half_extent = 10.0 * cell_size;
    let mut rng = Walk::new(seed);
    let mut walkers = Vec::new();
    for i in 0..clients + npcs {
        let drive = if i < clients { DriveMode::Client } else { DriveMode::Server };
        let (x, z) = rng.point(half_extent);
        let id = EntityId(i + 1);
        queue.enter(id, x, z, drive);
        walkers.push((id, x, z));
    }

    for _ in 0..ticks {
        for (id, x, z) in &mut walkers {
            let (dx, dz) = rng.step(cell_size);
            *x = (*x + dx).clamp(-half_extent, half_extent);
            *z = (*z + dz).clamp(-half_extent, half_extent);
            queue.move_to(*id, *x, *z);
        }
        drain.drain(&mut grid);
        grid.tick();
    }

    // Everyone logs off; a final tick delivers the goodbye batches.
    for (id, _, _) in &walkers {
        queue.exit(*id);
    }
    drain.drain(&mut grid);
    grid.tick();

    tracing::info!(
        cells = grid.cell_count(),
        faults = grid.faults().total(),
        "simulation complete"
    );

    let delivery = stats.borrow().clone();
    Ok(Summary {
        ticks,
        clients,
        npcs,
        seed,
        cell_size,
        cells_materialized: grid.cell_count(),
        delivery,
        faults: grid.faults(),
    })
}

/// Deterministic walk driven by splitmix64 steps; reproducible across
/// platforms without a float-ordering dependency.
struct Walk {
    state: u64,
}

impl Walk {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_unit(&mut self) -> f32 {
        self.state = splitmix64(self.state);
        (self.state >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Uniform point in the square arena.
    fn point(&mut self, half_extent: f32) -> (f32, f32) {
        (
            (self.next_unit() * 2.0 - 1.0) * half_extent,
            (self.next_unit() * 2.0 - 1.0) * half_extent,
        )
    }

    /// One wander step, at most half a cell per axis.
    fn step(&mut self, cell_size: f32) -> (f32, f32) {
        (
            (self.next_unit() * 2.0 - 1.0) * cell_size * 0.5,
            (self.next_unit() * 2.0 - 1.0) * cell_size * 0.5,
        )
    }
}

/// Splitmix64 step function: fast, high-quality, deterministic.
fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

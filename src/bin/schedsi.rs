//! schedsi — run a canned scheduling scenario and write the binary log.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use schedsi::{
    AddonScheduler, BinaryLog, Cfs, HierarchyBuilder, Mlfq, Penalizer, RoundRobin, Sjf,
    SwitchCosts, Time, TimeSliceFixer, TimerMode, World, WorldConfig,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// One module, round-robin, a worker and a periodic worker.
    Simple,
    /// Two-level tree under local timers.
    Tree,
    /// The same tree under kernel-only timers.
    KernelTimer,
    /// Weighted fair scheduling of three workers.
    Cfs,
    /// Kernel-only timers with a penalty-tracking child scheduler.
    Penalty,
}

/// Run a scheduling scenario and write the binary event log.
#[derive(Parser)]
#[command(name = "schedsi")]
struct Cli {
    /// Scenario to simulate.
    #[arg(value_enum)]
    scenario: Scenario,

    /// Stop once the simulated clock passes this many units.
    #[arg(short, long, default_value_t = 400)]
    limit: i64,

    /// Output file; `-` writes to stdout.
    #[arg(short, long, default_value = "-")]
    output: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let out: Box<dyn Write> = if cli.output.as_os_str() == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(
            File::create(&cli.output)
                .with_context(|| format!("failed to create {}", cli.output.display()))?,
        )
    };

    let (hierarchy, timer_mode) = build_scenario(cli.scenario);
    let config = WorldConfig {
        timer_mode,
        costs: SwitchCosts::default(),
    };

    let mut world = World::new(hierarchy.build(), config, Box::new(BinaryLog::new(out)))
        .context("failed to set up the world")?;
    world
        .run_until(Time::from_units(cli.limit))
        .context("simulation failed")?;
    world.log_statistics().context("failed to flush statistics")?;

    if !world.is_finished() {
        bail!("simulation hit the time limit before completing");
    }
    Ok(())
}

fn build_scenario(scenario: Scenario) -> (HierarchyBuilder, TimerMode) {
    let mut hb = HierarchyBuilder::new();
    let slice = |units| Some(Time::from_units(units));

    let timer_mode = match scenario {
        Scenario::Simple => {
            let kernel = hb.kernel("0", Box::new(RoundRobin::new(slice(10))));
            hb.worker(kernel, Time::zero(), Some(Time::from_units(50)));
            hb.periodic(
                kernel,
                Time::from_units(5),
                Some(Time::from_units(50)),
                Time::from_units(20),
                Time::from_units(5),
            );
            TimerMode::Local
        }
        Scenario::Tree => {
            let kernel = hb.kernel("0", Box::new(RoundRobin::new(slice(10))));
            hb.worker(kernel, Time::zero(), Some(Time::from_units(50)));
            let top = hb.module(kernel, None, Box::new(RoundRobin::new(slice(10))));
            hb.worker(top, Time::zero(), Some(Time::from_units(25)));
            let left = hb.module(top, None, Box::new(RoundRobin::new(slice(8))));
            hb.worker(left, Time::zero(), Some(Time::from_units(10)));
            hb.worker(left, Time::from_units(50), Some(Time::from_units(25)));
            let right = hb.module(top, None, Box::new(Sjf::new()));
            hb.worker(right, Time::from_units(10), Some(Time::from_units(10)));
            hb.periodic(
                right,
                Time::zero(),
                Some(Time::from_units(10)),
                Time::from_units(10),
                Time::from_units(2),
            );
            TimerMode::Local
        }
        Scenario::KernelTimer => {
            let kernel = hb.kernel("0", Box::new(RoundRobin::new(slice(10))));
            hb.worker(kernel, Time::zero(), Some(Time::from_units(50)));
            // Child schedulers may not arm timers here; strip the slices.
            let child = hb.module(
                kernel,
                None,
                Box::new(AddonScheduler::new(
                    Box::new(RoundRobin::new(slice(5))),
                    Box::new(TimeSliceFixer::new(None)),
                )),
            );
            hb.worker(child, Time::zero(), Some(Time::from_units(10)));
            hb.worker(child, Time::zero(), Some(Time::from_units(25)));
            TimerMode::KernelOnly
        }
        Scenario::Cfs => {
            let kernel = hb.kernel(
                "0",
                Box::new(Cfs::new(1024, Time::from_units(12), Time::from_units(2))),
            );
            hb.worker(kernel, Time::zero(), Some(Time::from_units(30)));
            hb.worker(kernel, Time::zero(), Some(Time::from_units(20)));
            hb.worker(kernel, Time::from_units(15), Some(Time::from_units(10)));
            TimerMode::Local
        }
        Scenario::Penalty => {
            let kernel = hb.kernel("0", Box::new(RoundRobin::new(slice(10))));
            hb.worker(kernel, Time::zero(), Some(Time::from_units(20)));
            let child = hb.module(
                kernel,
                None,
                Box::new(AddonScheduler::new(
                    Box::new(Mlfq::new(
                        vec![Some(Time::from_units(4)), Some(Time::from_units(8))],
                        None,
                    )),
                    Box::new(Penalizer::new(None)),
                )),
            );
            hb.worker(child, Time::zero(), Some(Time::from_units(15)));
            hb.worker(child, Time::zero(), Some(Time::from_units(15)));
            TimerMode::KernelOnly
        }
    };
    (hb, timer_mode)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init();
}

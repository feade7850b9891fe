mod sim;

use std::path::PathBuf;

use anyhow::Context as _;
use cadence_engine::logging::{init_logging, LoggingConfig};
use cadence_engine::PacingConfig;
use clap::Parser;

use sim::SimConfig;

#[derive(Parser)]
#[command(name = "cadence-sim")]
#[command(about = "Drive the pacing engine with a synthetic render loop", long_about = None)]
struct Cli {
    /// Number of frames to run
    #[arg(short, long, default_value = "300")]
    frames: u32,

    /// Simulation cost per frame, in milliseconds
    #[arg(long, default_value = "4.0")]
    sim_ms: f64,

    /// GPU cost per frame, in milliseconds
    #[arg(long, default_value = "12.0")]
    gpu_ms: f64,

    /// Relative random spread of stage costs (0.1 = +/-10%)
    #[arg(long, default_value = "0.1")]
    jitter: f64,

    /// Frames the driver may queue ahead of the GPU
    #[arg(long, default_value = "3")]
    render_ahead: usize,

    /// Start every frame as soon as possible
    #[arg(long)]
    no_pace: bool,

    /// Route frames through an implicit context
    #[arg(long)]
    implicit: bool,

    /// Write a Chrome trace JSON file
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Log filter (env_logger syntax)
    #[arg(long)]
    log: Option<String>,
}

fn millis(ms: f64) -> u64 {
    (ms.max(0.0) * 1_000_000.0) as u64
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(LoggingConfig {
        env_filter: cli.log.clone(),
        ..LoggingConfig::default()
    });

    let mut pacing = PacingConfig::from_env().context("invalid CADENCE_* environment")?;
    if let Some(path) = cli.trace {
        pacing.trace_path = Some(path);
    }

    let config = SimConfig {
        frames: cli.frames,
        sim: millis(cli.sim_ms),
        gpu: millis(cli.gpu_ms),
        jitter: cli.jitter.clamp(0.0, 0.9),
        render_ahead: cli.render_ahead.max(1),
        paced: !cli.no_pace,
        implicit: cli.implicit,
        pacing,
    };
    log::info!("running {config:?}");

    let report = sim::run(&config)?;

    println!();
    println!("{report}");
    println!();
    Ok(())
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vmtrack::replay::{read_trace, Replayer};
use vmtrack::{Scale, TrackerConfig, TrackingLevel};

#[derive(Parser, Debug)]
#[command(name = "vmtrack", about = "Replay memory operation traces and report virtual memory usage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a trace and print the resulting memory report.
    Replay {
        /// Trace file (one operation per line).
        trace: PathBuf,
        /// Tracking level: off, summary or detail.
        #[arg(long, default_value = "detail")]
        level: TrackingLevel,
        /// Unit for amounts: b, k, m or g.
        #[arg(long, default_value = "k")]
        scale: Scale,
        /// List every region with its call stack.
        #[arg(long)]
        detail: bool,
        /// Drop updates instead of waiting on a busy tracker.
        #[arg(long)]
        best_effort: bool,
        /// Seed for tree priorities.
        #[arg(long, default_value_t = 1234)]
        seed: u64,
    },
    /// Replay two traces and print the change from the first to the second.
    Diff {
        /// Baseline trace.
        baseline: PathBuf,
        /// Current trace.
        current: PathBuf,
        /// Unit for amounts: b, k, m or g.
        #[arg(long, default_value = "k")]
        scale: Scale,
    },
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            trace,
            level,
            scale,
            detail,
            best_effort,
            seed,
        } => {
            let config = TrackerConfig::for_level(level)
                .with_seed(seed)
                .with_best_effort(best_effort);
            run_replay(trace, config, scale, detail)?
        }
        Commands::Diff {
            baseline,
            current,
            scale,
        } => run_diff(baseline, current, scale)?,
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .context("failed to initialize tracing subscriber")
}

fn run_replay(trace: PathBuf, config: TrackerConfig, scale: Scale, detail: bool) -> Result<()> {
    let records = read_trace(&trace)?;
    let mut replayer = Replayer::new(config);
    let stats = replayer
        .run(&records)
        .with_context(|| format!("failed to replay {}", trace.display()))?;

    let mut out = String::new();
    replayer
        .tracker()
        .report(&mut out, replayer.tags(), scale, detail)
        .context("failed to render report")?;
    print!("{}", out);
    println!(
        "\n{} records, {} operations, {} spaces, {} dropped",
        stats.records, stats.operations, stats.spaces, stats.dropped
    );
    Ok(())
}

fn run_diff(baseline_path: PathBuf, current_path: PathBuf, scale: Scale) -> Result<()> {
    let baseline_records = read_trace(&baseline_path)?;
    let current_records = read_trace(&current_path)?;

    let mut baseline = Replayer::new(TrackerConfig::summary());
    baseline
        .run(&baseline_records)
        .with_context(|| format!("failed to replay {}", baseline_path.display()))?;
    let baseline_snapshot = baseline.snapshot();
    let (_, tags) = baseline.into_parts();

    let mut current = Replayer::with_tags(TrackerConfig::summary(), tags);
    current
        .run(&current_records)
        .with_context(|| format!("failed to replay {}", current_path.display()))?;

    let mut out = String::new();
    current
        .snapshot()
        .render_diff(&mut out, &baseline_snapshot, current.tags(), scale)
        .context("failed to render diff")?;
    print!("{}", out);
    Ok(())
}

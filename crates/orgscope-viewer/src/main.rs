//! Orgscope viewer binary.
//!
//! Captures organism execution traces and replays them, and drives a demo
//! population through the run-event bridge. Output on stdout is JSON lines;
//! logs go to stderr.
//!
//! # Subcommands
//!
//! - `trace <genome>` -- capture a trace and print one snapshot per line
//! - `play <genome>` -- capture, then auto-advance through the trace on the
//!   cursor session timeline and print each view as it changes
//! - `run` -- drive the demo population and print every delivered event
//!
//! A genome argument is either a symbol string such as `wvvvx` or the path
//! of a `.org` file.

mod demo;
mod error;
mod observer;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use orgscope_core::capture::TraceCapture;
use orgscope_core::config::ViewerConfig;
use orgscope_core::listener::{ListenerStats, RunListener};
use orgscope_core::run::{Run, RunSummary};
use orgscope_core::session::{CursorCommand, CursorSession};
use orgscope_types::{Genome, MapMode, Trace};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::demo::DemoPopulation;
use crate::error::ViewerError;
use crate::observer::JsonLinesObserver;

/// Default configuration file, read from the working directory.
const CONFIG_FILE: &str = "orgscope-config.yaml";

/// Orgscope: step digital organisms and watch populations evolve.
#[derive(Parser, Debug)]
#[command(name = "orgscope-viewer")]
#[command(author, version, about = "Organism trace viewer and population run monitor", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./orgscope-config.yaml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture a trace and print it as JSON lines.
    Trace {
        /// Genome symbols or path to a `.org` file
        genome: String,

        /// Override the configured cycle cap
        #[arg(long)]
        cycle_cap: Option<u64>,
    },

    /// Capture a trace and auto-advance through it.
    Play {
        /// Genome symbols or path to a `.org` file
        genome: String,

        /// Override the configured cycle cap
        #[arg(long)]
        cycle_cap: Option<u64>,

        /// Override the configured tick interval in milliseconds
        #[arg(long)]
        tick_ms: Option<u64>,
    },

    /// Drive the demo population and print delivered events.
    Run {
        /// Override the configured update limit (0 = until Ctrl-C or extinction)
        #[arg(long)]
        max_updates: Option<u64>,

        /// Override the configured map interval
        #[arg(long)]
        map_interval: Option<u64>,

        /// Override the configured map mode
        #[arg(long, value_parser = parse_map_mode)]
        map_mode: Option<MapMode>,

        /// Grid width
        #[arg(long, default_value = "30")]
        width: u32,

        /// Grid height
        #[arg(long, default_value = "30")]
        height: u32,

        /// Random seed
        #[arg(long, default_value = "1")]
        seed: u64,
    },
}

/// Final line printed by `run`.
#[derive(Debug, Serialize)]
struct RunReport<'a> {
    summary: &'a RunSummary,
    listener: ListenerStats,
}

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, genome loading, capture, or the
/// population run fails.
#[tokio::main]
async fn main() -> Result<(), ViewerError> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(orgscope_core::config::LOG_LEVEL_ENV)
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(
        cycle_cap = config.capture.cycle_cap,
        tick_interval_ms = config.animation.tick_interval_ms,
        map_capacity = config.listener.map_capacity,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Trace { genome, cycle_cap } => {
            let trace = capture(&config, &genome, cycle_cap)?;
            print_trace(&trace)
        }
        Commands::Play {
            genome,
            cycle_cap,
            tick_ms,
        } => {
            let trace = capture(&config, &genome, cycle_cap)?;
            let period = tick_ms.map_or_else(
                || config.animation.tick_interval(),
                |ms| Duration::from_millis(ms.max(1)),
            );
            play(trace, period).await
        }
        Commands::Run {
            max_updates,
            map_interval,
            map_mode,
            width,
            height,
            seed,
        } => {
            let mut run_config = config.run.clone();
            if let Some(max_updates) = max_updates {
                run_config.max_updates = max_updates;
            }
            if let Some(map_interval) = map_interval {
                run_config.map_interval = map_interval.max(1);
            }
            if let Some(map_mode) = map_mode {
                run_config.map_mode = map_mode;
            }
            let mut config = config;
            config.run = run_config;
            run(&config, DemoPopulation::new(width, height, seed)).await
        }
    }
}

/// Load configuration from `path`, or from [`CONFIG_FILE`] when it exists.
fn load_config(path: Option<&Path>) -> Result<ViewerConfig, ViewerError> {
    let default_path = Path::new(CONFIG_FILE);
    match path {
        Some(path) => Ok(ViewerConfig::from_file(path)?),
        None if default_path.exists() => Ok(ViewerConfig::from_file(default_path)?),
        None => Ok(ViewerConfig::parse("{}")?),
    }
}

/// Interpret a genome argument as a `.org` file path or a symbol string.
fn load_genome(argument: &str) -> Result<Genome, ViewerError> {
    let path = Path::new(argument);
    let is_org = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("org"));
    if is_org || path.is_file() {
        let text = std::fs::read_to_string(path)?;
        Ok(orgscope_vm::org::parse_org(&text)?)
    } else {
        Ok(Genome::new(argument))
    }
}

fn parse_map_mode(value: &str) -> Result<MapMode, String> {
    match value.to_ascii_lowercase().as_str() {
        "fitness" => Ok(MapMode::Fitness),
        "gestation" => Ok(MapMode::Gestation),
        "age" => Ok(MapMode::Age),
        "genotype" => Ok(MapMode::Genotype),
        other => Err(format!(
            "unknown map mode {other:?} (expected fitness, gestation, age or genotype)"
        )),
    }
}

fn capture(
    config: &ViewerConfig,
    genome: &str,
    cycle_cap: Option<u64>,
) -> Result<Trace, ViewerError> {
    let genome = load_genome(genome)?;
    let cycle_cap = cycle_cap.unwrap_or(config.capture.cycle_cap);
    Ok(TraceCapture::new(&config.capture).capture(genome, cycle_cap)?)
}

fn print_line<T: Serialize>(out: &mut impl Write, value: &T) -> Result<(), ViewerError> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn print_trace(trace: &Trace) -> Result<(), ViewerError> {
    let mut out = std::io::stdout().lock();
    for snapshot in trace {
        print_line(&mut out, snapshot)?;
    }
    print_line(&mut out, trace.termination())?;
    Ok(())
}

async fn play(trace: Trace, period: Duration) -> Result<(), ViewerError> {
    let trace = Arc::new(trace);
    let (session, handle) = CursorSession::new(Arc::clone(&trace), period);
    let task = tokio::spawn(session.run());
    let mut view = handle.subscribe();

    print_line(&mut std::io::stdout().lock(), &*view.borrow_and_update())?;

    // A trace with at most one snapshot has nothing to play.
    if trace.len() > 1 {
        handle.send(CursorCommand::ToggleAutoAdvance).await?;
        while view.changed().await.is_ok() {
            let current = view.borrow_and_update().clone();
            print_line(&mut std::io::stdout().lock(), &current)?;
            if !current.auto_advancing {
                break;
            }
        }
    }

    handle.send(CursorCommand::Close).await?;
    let cursor = task.await?;
    info!(
        index = ?cursor.index(),
        snapshots = trace.len(),
        termination = ?trace.termination(),
        "Playback finished"
    );
    Ok(())
}

async fn run(config: &ViewerConfig, population: DemoPopulation) -> Result<(), ViewerError> {
    let (listener, sink) = RunListener::new(&config.listener)?;
    listener.attach(JsonLinesObserver::new(std::io::stdout()))?;
    let mut run = Run::start(population, sink, &config.run)?;
    let stopper = run.stopper();
    info!(run_id = %run.id(), "Run started; press Ctrl-C to stop");

    // Thread joins block, so they run off the async workers.
    let mut waiting = tokio::task::spawn_blocking(move || run.wait());
    let joined = tokio::select! {
        joined = &mut waiting => joined,
        result = tokio::signal::ctrl_c() => {
            if result.is_ok() {
                info!("Interrupt received, stopping run");
            }
            stopper.stop();
            waiting.await
        }
    };
    let summary = joined??;
    let stats = tokio::task::spawn_blocking(move || listener.shutdown()).await?;
    print_line(
        &mut std::io::stdout().lock(),
        &RunReport {
            summary: &summary,
            listener: stats,
        },
    )?;
    Ok(())
}

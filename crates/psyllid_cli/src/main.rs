//! `psyllid`: run the psyllid/tree epidemic model from the command line.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use psyllid_core::analysis::stiffness_report;
use psyllid_core::{Method, PositivityPolicy, SimulationConfig, TrajectoryStatus};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "psyllid", version, about = "Psyllid/tree epidemic simulator")]
struct Cli {
    /// Log every solver decision
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Solve the model and write the trajectory as CSV
    Run {
        /// JSON configuration file; missing fields take their defaults
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// End of the time span in months
        #[arg(long)]
        t_end: Option<f64>,

        /// Number of evenly spaced samples
        #[arg(short, long)]
        samples: Option<usize>,

        /// Integration method (rosenbrock, dopri)
        #[arg(short, long)]
        method: Option<Method>,

        #[arg(long)]
        rtol: Option<f64>,

        #[arg(long)]
        atol: Option<f64>,

        /// Clamp negative populations to zero
        #[arg(long)]
        clamp: bool,

        /// Output CSV path (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Treat a truncated run as an error
        #[arg(long)]
        strict: bool,
    },

    /// Print the Jacobian spectrum at the initial state as JSON
    Stiffness {
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Time at which to evaluate the Jacobian
        #[arg(short, long, default_value = "0")]
        t: f64,
    },

    /// Print the default configuration as JSON
    Defaults,
}

fn load_config(path: Option<&Path>) -> Result<SimulationConfig> {
    match path {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open config file {}", path.display()))?;
            serde_json::from_reader(file)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        }
        None => Ok(SimulationConfig::default()),
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    config: Option<PathBuf>,
    t_end: Option<f64>,
    samples: Option<usize>,
    method: Option<Method>,
    rtol: Option<f64>,
    atol: Option<f64>,
    clamp: bool,
    output: Option<PathBuf>,
    strict: bool,
) -> Result<()> {
    let mut config = load_config(config.as_deref())?;
    if let Some(t_end) = t_end {
        config.t_span[1] = t_end;
    }
    if let Some(samples) = samples {
        config.samples = samples;
    }
    if let Some(method) = method {
        config.method = method;
    }
    if let Some(rtol) = rtol {
        config.options.rtol = rtol;
    }
    if let Some(atol) = atol {
        config.options.atol = atol;
    }
    if clamp {
        config.positivity = PositivityPolicy::Clamp;
    }

    info!(
        t0 = config.t_span[0],
        t1 = config.t_span[1],
        samples = config.samples,
        method = ?config.method,
        "Solving psyllid model"
    );
    let trajectory = config.solve().context("Simulation failed")?;

    match &output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            trajectory.write_csv(BufWriter::new(file))?;
            info!("Wrote {} samples to {}", trajectory.len(), path.display());
        }
        None => trajectory.write_csv(io::stdout().lock())?,
    }

    let stats = trajectory.stats();
    eprintln!(
        "samples: {}  accepted steps: {}  rejected steps: {}  rhs evaluations: {}",
        trajectory.len(),
        stats.accepted_steps,
        stats.rejected_steps,
        stats.rhs_evaluations
    );
    if let TrajectoryStatus::Truncated { stopped_at, reason } = trajectory.status() {
        warn!("Integration stopped at t = {} ({})", stopped_at, reason);
        eprintln!("truncated at t = {stopped_at}: {reason}");
        if strict {
            bail!(
                "Run truncated after {} of {} samples.",
                trajectory.len(),
                config.samples
            );
        }
    } else if let Some(state) = trajectory.final_state() {
        eprintln!("final state: {state:?}");
    }
    Ok(())
}

fn stiffness(config: Option<PathBuf>, t: f64) -> Result<()> {
    let config = load_config(config.as_deref())?;
    let report = stiffness_report(&config.system(), t, &config.initial_state)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            config,
            t_end,
            samples,
            method,
            rtol,
            atol,
            clamp,
            output,
            strict,
        } => run(config, t_end, samples, method, rtol, atol, clamp, output, strict),
        Commands::Stiffness { config, t } => stiffness(config, t),
        Commands::Defaults => {
            println!(
                "{}",
                serde_json::to_string_pretty(&SimulationConfig::default())?
            );
            Ok(())
        }
    }
}

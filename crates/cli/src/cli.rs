use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Layered priority task scheduler.
///
/// Runs a synthetic workload through the scheduler and reports per-layer
/// outcomes, or inspects the resolved configuration.
#[derive(Parser, Debug)]
#[command(name = "strata", about = "Layered priority task scheduler")]
pub struct CliArgs {
    /// Scheduler TOML file (falls back to STRATA_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Tracing filter used when RUST_LOG is unset (overrides STRATA_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit a synthetic workload and report the outcome (default)
    Run(RunArgs),
    /// Print the resolved layer table
    Layers,
    /// Print the resolved configuration as TOML
    Config,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Number of tasks to submit, spread across every layer
    #[arg(long, default_value = "120")]
    pub tasks: usize,

    /// Upper bound on simulated work per task, in milliseconds
    #[arg(long, default_value = "50")]
    pub max_work_ms: u64,

    /// Every Nth task fails on purpose (0 = never)
    #[arg(long, default_value = "17")]
    pub fail_every: usize,

    /// Per-task timeout override in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Drain grace on shutdown, in milliseconds (overrides config)
    #[arg(long)]
    pub grace_ms: Option<u64>,

    /// Print every outcome as a JSON line
    #[arg(long)]
    pub json: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            tasks: 120,
            max_work_ms: 50,
            fail_every: 17,
            timeout_ms: None,
            grace_ms: None,
            json: false,
        }
    }
}

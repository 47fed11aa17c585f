mod cli;
mod config;
mod demo;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use strata_core::config::{load_dotenv, RuntimeConfig};

use crate::cli::{CliArgs, Command, RunArgs};

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    let runtime = RuntimeConfig::from_env();
    let args = CliArgs::parse();

    // Initialize tracing
    let default_filter = args.log_level.clone().unwrap_or_else(|| runtime.log_filter.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_target(false)
        .init();

    runtime.log_summary();

    let config_path = args.config.clone().or_else(|| runtime.config_path.clone());
    let config = config::load(config_path.as_deref())?;

    match args.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(run_args) => {
            info!(
                tasks = run_args.tasks,
                layers = config.layers.len(),
                "Starting synthetic run"
            );
            let json = run_args.json;
            let status = demo::run(config, run_args).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{}", demo::render_summary(&status));
            }
        }
        Command::Layers => print!("{}", config::layer_table(&config)),
        Command::Config => print!("{}", config::to_toml(&config)?),
    }

    Ok(())
}

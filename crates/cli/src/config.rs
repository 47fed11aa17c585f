use std::path::Path;

use anyhow::{Context, Result};
use strata_scheduler::SchedulerConfig;
use tracing::{debug, info};

/// Load the scheduler config from `path`, or built-in defaults when no path
/// is given. Env overrides apply either way.
pub fn load(path: Option<&Path>) -> Result<SchedulerConfig> {
    match path {
        Some(path) => {
            debug!(config_path = %path.display(), "Loading config");
            let config = SchedulerConfig::from_file(path)
                .with_context(|| format!("failed to load config: {}", path.display()))?;
            info!(config_path = %path.display(), layers = config.layers.len(), "Config loaded");
            Ok(config)
        }
        None => {
            debug!("No config file given, using defaults");
            let mut config = SchedulerConfig::default();
            config.apply_env_overrides();
            config.validate().context("invalid configuration")?;
            Ok(config)
        }
    }
}

/// Render the resolved config as TOML.
pub fn to_toml(config: &SchedulerConfig) -> Result<String> {
    toml::to_string_pretty(config).context("failed to serialize config")
}

/// Render the layer table, one row per configured layer.
pub fn layer_table(config: &SchedulerConfig) -> String {
    let parallelism = config.resolved_parallelism();
    let mut out = format!(
        "{:<4} {:<16} {:>8} {:>8} {:>8}\n",
        "id", "layer", "share", "workers", "priority"
    );
    for (id, spec) in config.layers.iter().enumerate() {
        out.push_str(&format!(
            "{:<4} {:<16} {:>8.4} {:>8} {:>8}\n",
            id,
            spec.layer_type.as_str(),
            spec.worker_share,
            spec.resolve_max_workers(parallelism),
            spec.priority_weight
        ));
    }
    out.push_str(&format!("parallelism: {parallelism}\n"));
    out
}

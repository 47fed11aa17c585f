use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_core::config::{active_profile, profiled_env_parse};
use strata_core::{LayerType, DEFAULT_PRIORITY, DEFAULT_TIMEOUT_MS};

use crate::error::SchedulerError;

// ── Layer table ─────────────────────────────────────────────────────

/// One row of the layer configuration table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub layer_type: LayerType,
    /// Fraction of `parallelism` granted to this layer's pool.
    #[serde(default = "default_worker_share")]
    pub worker_share: f64,
    /// Explicit worker count; overrides `worker_share` when set.
    #[serde(default)]
    pub max_workers: Option<usize>,
    /// Higher dispatches first. Also the default priority for `submit_to_layer`.
    #[serde(default = "default_priority_weight")]
    pub priority_weight: i32,
}

fn default_worker_share() -> f64 { 0.125 }
fn default_priority_weight() -> i32 { DEFAULT_PRIORITY }

impl LayerSpec {
    pub fn new(layer_type: LayerType, worker_share: f64, priority_weight: i32) -> Self {
        Self {
            layer_type,
            worker_share,
            max_workers: None,
            priority_weight,
        }
    }

    /// Pin the worker count instead of deriving it from a share.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    /// Resolve the pool size against the available parallelism (minimum 1
    /// when derived; an explicit value is returned untouched).
    pub fn resolve_max_workers(&self, parallelism: usize) -> usize {
        match self.max_workers {
            Some(n) => n,
            None => ((parallelism as f64 * self.worker_share).floor() as usize).max(1),
        }
    }
}

/// Built-in layer table used when the config file has no `[[layers]]`.
pub fn default_layers() -> Vec<LayerSpec> {
    vec![
        LayerSpec::new(LayerType::FastPath, 0.125, 10),
        LayerSpec::new(LayerType::RealTime, 0.125, 9),
        LayerSpec::new(LayerType::Security, 0.125, 9),
        LayerSpec::new(LayerType::CoreProcessing, 0.25, 8),
        LayerSpec::new(LayerType::Neural, 0.25, 7),
        LayerSpec::new(LayerType::Communication, 0.125, 7),
        LayerSpec::new(LayerType::Analytics, 0.125, 6),
        LayerSpec::new(LayerType::Integration, 0.125, 6),
        LayerSpec::new(LayerType::Storage, 0.125, 5),
        LayerSpec::new(LayerType::Optimization, 0.125, 4),
        LayerSpec::new(LayerType::Monitoring, 0.0625, 3),
        LayerSpec::new(LayerType::Backup, 0.0625, 2),
    ]
}

// ── Scheduler config ────────────────────────────────────────────────

/// Scheduler configuration, typically parsed from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Capacity that layer shares are fractions of. 0 = available parallelism.
    #[serde(default)]
    pub parallelism: usize,
    /// Priority for `submit_to_layer` when the layer has no table entry.
    #[serde(default = "default_priority")]
    pub default_priority: i32,
    /// Timeout applied when a submission omits one.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Admitted-but-not-running tasks a pool holds before rejecting.
    #[serde(default = "default_backlog_limit")]
    pub backlog_limit: usize,
    /// Workers each pool keeps alive while idle.
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,
    /// Idle period before a worker above the floor exits.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Dispatch loop wait when the queue is empty.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Period of `StatusTick` events.
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    /// How long `stop()` lets in-flight work finish before cancelling it.
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
    /// Recent outcomes kept for inspection.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Broadcast channel capacity for scheduler events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_layers")]
    pub layers: Vec<LayerSpec>,
}

fn default_priority() -> i32 { DEFAULT_PRIORITY }
fn default_timeout_ms() -> u64 { DEFAULT_TIMEOUT_MS }
fn default_backlog_limit() -> usize { 100 }
fn default_min_workers() -> usize { 1 }
fn default_idle_timeout_ms() -> u64 { 60_000 }
fn default_poll_interval_ms() -> u64 { 10 }
fn default_status_interval_ms() -> u64 { 5_000 }
fn default_drain_grace_ms() -> u64 { 5_000 }
fn default_history_capacity() -> usize { 1_000 }
fn default_event_capacity() -> usize { 1_024 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            default_priority: default_priority(),
            default_timeout_ms: default_timeout_ms(),
            backlog_limit: default_backlog_limit(),
            min_workers: default_min_workers(),
            idle_timeout_ms: default_idle_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            status_interval_ms: default_status_interval_ms(),
            drain_grace_ms: default_drain_grace_ms(),
            history_capacity: default_history_capacity(),
            event_capacity: default_event_capacity(),
            layers: default_layers(),
        }
    }
}

impl SchedulerConfig {
    /// Config with the given layer table and defaults for everything else.
    pub fn with_layers(layers: Vec<LayerSpec>) -> Self {
        Self {
            layers,
            ..Self::default()
        }
    }

    /// Parse config from a TOML string, apply env overrides and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, SchedulerError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Resolve parallelism (0 means use available parallelism).
    pub fn resolved_parallelism(&self) -> usize {
        if self.parallelism == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.parallelism
        }
    }

    /// Table entry for a layer, if configured.
    pub fn layer(&self, layer_type: LayerType) -> Option<&LayerSpec> {
        self.layers.iter().find(|l| l.layer_type == layer_type)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `STRATA_<FIELD>` overrides `<field>`; when `STRATA_PROFILE`
    /// is set (e.g. `PROD`), `PROD_STRATA_<FIELD>` wins over the plain key.
    pub fn apply_env_overrides(&mut self) {
        let p = active_profile();
        let p = p.as_str();

        if let Some(v) = profiled_env_parse(p, "STRATA_PARALLELISM") {
            self.parallelism = v;
        }
        if let Some(v) = profiled_env_parse(p, "STRATA_BACKLOG_LIMIT") {
            self.backlog_limit = v;
        }
        if let Some(v) = profiled_env_parse(p, "STRATA_DEFAULT_TIMEOUT_MS") {
            self.default_timeout_ms = v;
        }
        if let Some(v) = profiled_env_parse(p, "STRATA_POLL_INTERVAL_MS") {
            self.poll_interval_ms = v;
        }
        if let Some(v) = profiled_env_parse(p, "STRATA_STATUS_INTERVAL_MS") {
            self.status_interval_ms = v;
        }
        if let Some(v) = profiled_env_parse(p, "STRATA_DRAIN_GRACE_MS") {
            self.drain_grace_ms = v;
        }
        if let Some(v) = profiled_env_parse(p, "STRATA_IDLE_TIMEOUT_MS") {
            self.idle_timeout_ms = v;
        }
    }

    // ── Validation ──────────────────────────────────────────────────

    /// Check structural constraints. Per-layer worker counts are checked
    /// later, at pool construction, so a bad row only disables its layer.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        let mut seen = HashSet::new();
        for spec in &self.layers {
            if !seen.insert(spec.layer_type) {
                return Err(SchedulerError::InvalidConfig(format!(
                    "layer '{}' is configured more than once",
                    spec.layer_type
                )));
            }
            if !spec.worker_share.is_finite() || spec.worker_share < 0.0 {
                return Err(SchedulerError::InvalidConfig(format!(
                    "layer '{}' has invalid worker_share {}",
                    spec.layer_type, spec.worker_share
                )));
            }
        }

        let nonzero = [
            ("backlog_limit", self.backlog_limit as u64),
            ("poll_interval_ms", self.poll_interval_ms),
            ("status_interval_ms", self.status_interval_ms),
            ("history_capacity", self.history_capacity as u64),
            ("event_capacity", self.event_capacity as u64),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(SchedulerError::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

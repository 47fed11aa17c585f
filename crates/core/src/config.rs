use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Read an env var, treating empty values as unset.
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
pub fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

/// Parse a profiled env var, ignoring values that fail to parse.
pub fn profiled_env_parse<T: FromStr>(profile: &str, key: &str) -> Option<T> {
    let raw = profiled_env_opt(profile, key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable env override");
            None
        }
    }
}

/// Active profile name from `STRATA_PROFILE`, uppercased (empty = default).
pub fn active_profile() -> String {
    env_or("STRATA_PROFILE", "").to_uppercase()
}

// ── Runtime config ────────────────────────────────────────────

/// Process-level settings read from the environment (call `load_dotenv()` first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    /// Scheduler TOML file, if any.
    pub config_path: Option<PathBuf>,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let profile = active_profile();
        Self {
            config_path: profiled_env_opt(&profile, "STRATA_CONFIG").map(PathBuf::from),
            log_filter: profiled_env_opt(&profile, "STRATA_LOG").unwrap_or_else(|| "info".into()),
            profile,
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Runtime config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  config:  {}",
            self.config_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(built-in defaults)".into())
        );
        tracing::info!("  log:     {}", self.log_filter);
    }
}

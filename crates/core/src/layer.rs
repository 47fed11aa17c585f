use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Named category of work. Each layer owns a dedicated worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerType {
    CoreProcessing,
    RealTime,
    Neural,
    Analytics,
    Security,
    Communication,
    Storage,
    Integration,
    Optimization,
    Monitoring,
    Backup,
    FastPath,
}

impl LayerType {
    /// Every layer type, in declaration order.
    pub const ALL: [LayerType; 12] = [
        LayerType::CoreProcessing,
        LayerType::RealTime,
        LayerType::Neural,
        LayerType::Analytics,
        LayerType::Security,
        LayerType::Communication,
        LayerType::Storage,
        LayerType::Integration,
        LayerType::Optimization,
        LayerType::Monitoring,
        LayerType::Backup,
        LayerType::FastPath,
    ];

    /// Config/wire name (`snake_case`).
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerType::CoreProcessing => "core_processing",
            LayerType::RealTime => "real_time",
            LayerType::Neural => "neural",
            LayerType::Analytics => "analytics",
            LayerType::Security => "security",
            LayerType::Communication => "communication",
            LayerType::Storage => "storage",
            LayerType::Integration => "integration",
            LayerType::Optimization => "optimization",
            LayerType::Monitoring => "monitoring",
            LayerType::Backup => "backup",
            LayerType::FastPath => "fast_path",
        }
    }
}

impl std::fmt::Display for LayerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerType {
    type Err = CoreError;

    /// Accepts `fast_path`, `fast-path`, `FastPath` and `FASTPATH` alike.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        LayerType::ALL
            .iter()
            .copied()
            .find(|layer| layer.as_str().replace('_', "") == normalized)
            .ok_or_else(|| CoreError::UnknownLayer(s.to_string()))
    }
}

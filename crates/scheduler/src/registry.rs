//! Layer table built at scheduler start: one [`WorkerPool`] per configured layer.

use std::collections::HashMap;
use std::sync::Arc;

use strata_core::LayerType;
use tracing::{error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::events::OutcomeSink;
use crate::pool::{PoolSettings, WorkerPool};
use crate::task::TaskExecutor;

/// Static definition of one layer, resolved at start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerConfig {
    /// Position in the configuration table.
    pub id: usize,
    pub layer_type: LayerType,
    pub max_workers: usize,
    pub priority_weight: i32,
}

/// A registered layer: its config, activation flag and pool (absent when
/// construction failed).
pub struct LayerEntry {
    pub config: LayerConfig,
    active: bool,
    pool: Option<Arc<WorkerPool>>,
}

impl LayerEntry {
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The pool, only while the layer is active.
    pub fn active_pool(&self) -> Option<&Arc<WorkerPool>> {
        if self.is_active() {
            self.pool.as_ref()
        } else {
            None
        }
    }

    pub fn pool(&self) -> Option<&Arc<WorkerPool>> {
        self.pool.as_ref()
    }
}

/// Registry of layers and their pools. Built once per `start()`.
pub struct LayerRegistry {
    layers: HashMap<LayerType, LayerEntry>,
    order: Vec<LayerType>,
}

impl LayerRegistry {
    /// Build one pool per configured layer.
    ///
    /// A layer whose pool cannot be built is kept but marked inactive;
    /// initialization only fails outright when no layer comes up.
    pub fn initialize(
        config: &SchedulerConfig,
        executors: &HashMap<LayerType, Arc<dyn TaskExecutor>>,
        sink: &OutcomeSink,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let parallelism = config.resolved_parallelism();

        let mut layers = HashMap::with_capacity(config.layers.len());
        let mut order = Vec::with_capacity(config.layers.len());

        for (id, spec) in config.layers.iter().enumerate() {
            let layer_config = LayerConfig {
                id,
                layer_type: spec.layer_type,
                max_workers: spec.resolve_max_workers(parallelism),
                priority_weight: spec.priority_weight,
            };
            let settings = PoolSettings {
                max_workers: layer_config.max_workers,
                backlog_limit: config.backlog_limit,
                min_workers: config.min_workers,
                idle_timeout: config.idle_timeout(),
            };

            let pool = match WorkerPool::new(
                spec.layer_type,
                settings,
                executors.get(&spec.layer_type).cloned(),
                sink.clone(),
            ) {
                Ok(pool) => Some(Arc::new(pool)),
                Err(e) => {
                    warn!(layer = %spec.layer_type, error = %e, "layer failed to initialize, marking inactive");
                    None
                }
            };

            order.push(spec.layer_type);
            layers.insert(
                spec.layer_type,
                LayerEntry {
                    config: layer_config,
                    active: pool.is_some(),
                    pool,
                },
            );
        }

        let registry = Self { layers, order };
        let active = registry.active_count();
        if active == 0 {
            error!(configured = registry.len(), "no layer initialized");
            return Err(SchedulerError::NoActiveLayers);
        }

        info!(
            configured = registry.len(),
            active,
            capacity = registry.total_workers(),
            "layer registry initialized"
        );
        Ok(registry)
    }

    /// Look up a layer. `None` means it is not configured.
    pub fn resolve(&self, layer_type: LayerType) -> Option<&LayerEntry> {
        self.layers.get(&layer_type)
    }

    /// Entries in configuration order.
    pub fn entries(&self) -> impl Iterator<Item = &LayerEntry> {
        self.order.iter().filter_map(|t| self.layers.get(t))
    }

    pub fn pools(&self) -> impl Iterator<Item = &Arc<WorkerPool>> {
        self.entries().filter_map(|e| e.pool())
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.layers.values().filter(|e| e.is_active()).count()
    }

    /// Worker capacity across active layers.
    pub fn total_workers(&self) -> usize {
        self.layers
            .values()
            .filter(|e| e.is_active())
            .map(|e| e.config.max_workers)
            .sum()
    }
}

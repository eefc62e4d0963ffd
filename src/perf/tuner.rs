//! Auto-Tuning
//!
//! Threshold-based strategy application over the performance layer's
//! configuration. Every applied action records the configuration it
//! replaced and can be reverted. The tuner only touches performance
//! knobs (cache on/off, worker count) -- sandbox rules and execution
//! ordering guarantees are out of its reach by construction.

use tracing::info;

use crate::perf::metrics::MetricsSnapshot;
use crate::perf::parallel::default_worker_count;

/// The knobs auto-tuning may adjust.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerfConfig {
    pub cache_enabled: bool,
    pub worker_count: usize,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            worker_count: default_worker_count(),
        }
    }
}

/// A single reversible adjustment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TuningAction {
    EnableCache,
    SetWorkerCount(usize),
}

/// An action that was applied, carrying the configuration it replaced.
#[derive(Debug, Clone)]
pub struct AppliedTuning {
    pub action: TuningAction,
    pub rule: String,
    previous: PerfConfig,
}

/// Tuning thresholds.
#[derive(Debug, Clone)]
pub struct TunerThresholds {
    /// Scripts seen before the cache is worth enabling
    pub enable_cache_after_scripts: u64,
    /// p90 latency above which another worker is added
    pub raise_workers_above_p90_ms: f64,
    /// Hard ceiling on workers the tuner may configure
    pub max_worker_count: usize,
}

impl Default for TunerThresholds {
    fn default() -> Self {
        Self {
            enable_cache_after_scripts: 10,
            raise_workers_above_p90_ms: 250.0,
            max_worker_count: 8,
        }
    }
}

/// Threshold-based auto-tuner.
#[derive(Debug, Clone, Default)]
pub struct AutoTuner {
    thresholds: TunerThresholds,
}

impl AutoTuner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(thresholds: TunerThresholds) -> Self {
        Self { thresholds }
    }

    /// Propose actions for the current metrics. Proposals are inert
    /// until applied.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot, config: &PerfConfig) -> Vec<TuningAction> {
        let mut actions = Vec::new();

        if !config.cache_enabled
            && snapshot.scripts_executed >= self.thresholds.enable_cache_after_scripts
        {
            actions.push(TuningAction::EnableCache);
        }

        if snapshot.latency_p90_ms > self.thresholds.raise_workers_above_p90_ms
            && config.worker_count < self.thresholds.max_worker_count
        {
            actions.push(TuningAction::SetWorkerCount(config.worker_count + 1));
        }

        actions
    }

    /// Apply one action, returning the receipt needed to revert it.
    pub fn apply(&self, config: &mut PerfConfig, action: TuningAction) -> AppliedTuning {
        let previous = config.clone();
        let rule = match &action {
            TuningAction::EnableCache => {
                config.cache_enabled = true;
                "enable_cache".to_string()
            }
            TuningAction::SetWorkerCount(count) => {
                config.worker_count = (*count).clamp(1, self.thresholds.max_worker_count);
                "set_worker_count".to_string()
            }
        };
        info!(rule = %rule, "auto-tuning applied");
        AppliedTuning {
            action,
            rule,
            previous,
        }
    }

    /// Undo an applied action by restoring the configuration it
    /// replaced.
    pub fn revert(&self, config: &mut PerfConfig, applied: &AppliedTuning) {
        *config = applied.previous.clone();
        info!(rule = %applied.rule, "auto-tuning reverted");
    }
}

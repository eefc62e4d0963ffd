//! Engine Metrics
//!
//! Atomics-based counters and a bounded latency reservoir. The
//! snapshot is format-agnostic; JSON/Prometheus exporters are external
//! collaborators. Recording never alters execution results.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::interpreter::errors::ShellError;

const LATENCY_RESERVOIR_CAP: usize = 4096;

/// Shared metrics registry for one shell/engine family.
#[derive(Debug)]
pub struct EngineMetrics {
    commands_executed: AtomicU64,
    commands_failed: AtomicU64,
    security_violations: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    scripts_executed: AtomicU64,
    latencies_us: RwLock<Vec<u64>>,
    last_error: RwLock<Option<ShellError>>,
    started_at: Instant,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            commands_executed: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            security_violations: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            scripts_executed: AtomicU64::new(0),
            latencies_us: RwLock::new(Vec::new()),
            last_error: RwLock::new(None),
            started_at: Instant::now(),
        }
    }

    pub fn record_command(&self, duration: Duration, success: bool) {
        self.commands_executed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut latencies) = self.latencies_us.write() {
            if latencies.len() >= LATENCY_RESERVOIR_CAP {
                // keep the reservoir bounded; drop the oldest half
                latencies.drain(..LATENCY_RESERVOIR_CAP / 2);
            }
            latencies.push(duration.as_micros() as u64);
        }
    }

    pub fn record_script(&self) {
        self.scripts_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_security_violation(&self) {
        self.security_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, error: &ShellError) {
        if let Ok(mut last) = self.last_error.write() {
            *last = Some(error.clone());
        }
    }

    /// Point-in-time view of all counters and rates.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let executed = self.commands_executed.load(Ordering::Relaxed);
        let failed = self.commands_failed.load(Ordering::Relaxed);
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);

        let (p50, p90, p99) = match self.latencies_us.read() {
            Ok(latencies) => {
                let mut sorted = latencies.clone();
                sorted.sort_unstable();
                (
                    percentile(&sorted, 0.50),
                    percentile(&sorted, 0.90),
                    percentile(&sorted, 0.99),
                )
            }
            Err(_) => (0.0, 0.0, 0.0),
        };

        MetricsSnapshot {
            command_executions: executed,
            commands_failed: failed,
            success_rate: if executed > 0 {
                (executed - failed) as f64 / executed as f64
            } else {
                1.0
            },
            security_violations: self.security_violations.load(Ordering::Relaxed),
            scripts_executed: self.scripts_executed.load(Ordering::Relaxed),
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate: if hits + misses > 0 {
                hits as f64 / (hits + misses) as f64
            } else {
                0.0
            },
            latency_p50_ms: p50 / 1000.0,
            latency_p90_ms: p90 / 1000.0,
            latency_p99_ms: p99 / 1000.0,
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            last_error: self.last_error.read().ok().and_then(|e| e.clone()),
        }
    }
}

fn percentile(sorted_us: &[u64], q: f64) -> f64 {
    if sorted_us.is_empty() {
        return 0.0;
    }
    let rank = ((sorted_us.len() as f64 - 1.0) * q).round() as usize;
    sorted_us[rank.min(sorted_us.len() - 1)] as f64
}

/// Serializable snapshot of counters and rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub command_executions: u64,
    pub commands_failed: u64,
    pub success_rate: f64,
    pub security_violations: u64,
    pub scripts_executed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,
    pub uptime_secs: f64,
    /// Most recent structured error; kind/message/context survive the
    /// round-trip
    pub last_error: Option<ShellError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::errors::ErrorKind;

    #[test]
    fn test_success_rate() {
        let metrics = EngineMetrics::new();
        metrics.record_command(Duration::from_millis(1), true);
        metrics.record_command(Duration::from_millis(2), true);
        metrics.record_command(Duration::from_millis(3), false);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.command_executions, 3);
        assert_eq!(snapshot.commands_failed, 1);
        assert!((snapshot.success_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_cache_hit_rate() {
        let metrics = EngineMetrics::new();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        let snapshot = metrics.snapshot();
        assert!((snapshot.cache_hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentiles_ordered() {
        let metrics = EngineMetrics::new();
        for ms in 1..=100 {
            metrics.record_command(Duration::from_millis(ms), true);
        }
        let snapshot = metrics.snapshot();
        assert!(snapshot.latency_p50_ms <= snapshot.latency_p90_ms);
        assert!(snapshot.latency_p90_ms <= snapshot.latency_p99_ms);
        assert!(snapshot.latency_p99_ms <= 100.0);
    }

    #[test]
    fn test_error_round_trip_in_snapshot() {
        let metrics = EngineMetrics::new();
        let err = ShellError::new(ErrorKind::SecurityViolation, "rejected")
            .with_context("command", "rm");
        metrics.record_error(&err);
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        let back: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        let restored = back.last_error.unwrap();
        assert_eq!(restored.kind, ErrorKind::SecurityViolation);
        assert_eq!(restored.context.get("command").map(String::as_str), Some("rm"));
    }

    #[test]
    fn test_empty_reservoir_is_zero() {
        let snapshot = EngineMetrics::new().snapshot();
        assert_eq!(snapshot.latency_p99_ms, 0.0);
        assert_eq!(snapshot.success_rate, 1.0);
    }
}

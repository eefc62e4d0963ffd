//! Performance Layer module
//!
//! The compilation cache, the dependency-aware parallel executor, and
//! the advisory memory/metrics/profiling/auto-tuning subsystems that
//! wrap the parse-and-execute path without changing its semantics.

pub mod cache;
pub mod memory;
pub mod metrics;
pub mod optimizer;
pub mod parallel;
pub mod profiler;
pub mod tuner;

pub use cache::{CacheEntry, CompilationCache, CompileOutput};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use optimizer::{OptimizationReport, Optimizer, OptimizerConfig};
pub use parallel::{ParallelExecutor, ParallelRun, ParallelStats, TaskGraph, TaskResult};
pub use tuner::{AppliedTuning, AutoTuner, PerfConfig, TuningAction};

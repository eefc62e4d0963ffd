//! Sampling Profiler
//!
//! Records samples of labeled call stacks across four dimensions
//! (cpu, memory, block, mutex) and summarizes them as flame-graph
//! lines and call-graph edges. Observability only; profiling a run
//! never changes what it computes.

use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// What a sample measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Cpu,
    Memory,
    Block,
    Mutex,
}

#[derive(Debug, Clone)]
struct Sample {
    kind: SampleKind,
    /// Call stack, outermost first
    stack: Vec<String>,
    weight: u64,
}

/// A profiler recording weighted stack samples.
#[derive(Debug, Clone, Default)]
pub struct SamplingProfiler {
    samples: Arc<Mutex<Vec<Sample>>>,
    /// 1.0 records everything; lower rates drop samples randomly
    sample_rate: f64,
}

impl SamplingProfiler {
    pub fn new() -> Self {
        Self {
            samples: Arc::new(Mutex::new(Vec::new())),
            sample_rate: 1.0,
        }
    }

    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Record one sample. `stack` is outermost-first; `weight` is the
    /// measured cost (ticks, bytes, waits).
    pub fn record(&self, kind: SampleKind, stack: &[&str], weight: u64) {
        if self.sample_rate < 1.0 && rand::thread_rng().gen::<f64>() > self.sample_rate {
            return;
        }
        if let Ok(mut samples) = self.samples.lock() {
            samples.push(Sample {
                kind,
                stack: stack.iter().map(|s| s.to_string()).collect(),
                weight,
            });
        }
    }

    /// Time a closure and record the elapsed micros as a cpu sample.
    pub fn time<T>(&self, stack: &[&str], f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let value = f();
        self.record(SampleKind::Cpu, stack, started.elapsed().as_micros() as u64);
        value
    }

    pub fn sample_count(&self) -> usize {
        self.samples.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.clear();
        }
    }

    /// Folded flame-graph lines (`outer;inner weight`), aggregated by
    /// stack, heaviest first.
    pub fn flame_graph(&self, kind: SampleKind) -> Vec<String> {
        let mut folded: HashMap<String, u64> = HashMap::new();
        if let Ok(samples) = self.samples.lock() {
            for sample in samples.iter().filter(|s| s.kind == kind) {
                *folded.entry(sample.stack.join(";")).or_insert(0) += sample.weight;
            }
        }
        let mut lines: Vec<(String, u64)> = folded.into_iter().collect();
        lines.sort_by_key(|(_, weight)| std::cmp::Reverse(*weight));
        lines
            .into_iter()
            .map(|(stack, weight)| format!("{} {}", stack, weight))
            .collect()
    }

    /// Caller→callee edges with accumulated weights.
    pub fn call_graph(&self, kind: SampleKind) -> Vec<CallEdge> {
        let mut edges: HashMap<(String, String), (u64, u64)> = HashMap::new();
        if let Ok(samples) = self.samples.lock() {
            for sample in samples.iter().filter(|s| s.kind == kind) {
                for pair in sample.stack.windows(2) {
                    let entry = edges
                        .entry((pair[0].clone(), pair[1].clone()))
                        .or_insert((0, 0));
                    entry.0 += sample.weight;
                    entry.1 += 1;
                }
            }
        }
        let mut list: Vec<CallEdge> = edges
            .into_iter()
            .map(|((caller, callee), (weight, count))| CallEdge {
                caller,
                callee,
                weight,
                count,
            })
            .collect();
        list.sort_by_key(|e| std::cmp::Reverse(e.weight));
        list
    }

    /// Total recorded weight per kind.
    pub fn totals(&self) -> HashMap<SampleKind, u64> {
        let mut totals = HashMap::new();
        if let Ok(samples) = self.samples.lock() {
            for sample in samples.iter() {
                *totals.entry(sample.kind).or_insert(0) += sample.weight;
            }
        }
        totals
    }
}

/// One caller→callee edge in the call-graph summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEdge {
    pub caller: String,
    pub callee: String,
    pub weight: u64,
    pub count: u64,
}

/// RAII helper: records a cpu sample of the scope's lifetime.
pub struct ProfileSpan<'a> {
    profiler: &'a SamplingProfiler,
    stack: Vec<String>,
    started: Instant,
}

impl<'a> ProfileSpan<'a> {
    pub fn enter(profiler: &'a SamplingProfiler, stack: &[&str]) -> Self {
        Self {
            profiler,
            stack: stack.iter().map(|s| s.to_string()).collect(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for ProfileSpan<'_> {
    fn drop(&mut self) {
        let stack: Vec<&str> = self.stack.iter().map(String::as_str).collect();
        self.profiler.record(
            SampleKind::Cpu,
            &stack,
            self.started.elapsed().as_micros() as u64,
        );
    }
}

//! Memory Pools and Allocation Tracking
//!
//! Advisory efficiency features: a pool that recycles string buffers
//! and argv vectors between executions, and a reference-counted
//! allocation tracker usable for leak detection. Neither changes the
//! result of a script's execution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Pool of recycled buffers for frequently re-allocated value types.
pub struct ObjectPool {
    string_buffers: Arc<RwLock<Vec<String>>>,
    arg_vectors: Arc<RwLock<Vec<Vec<String>>>>,
    max_pool_size: usize,
    total_acquired: AtomicU64,
    total_recycled: AtomicU64,
}

impl ObjectPool {
    pub fn new(max_pool_size: usize) -> Self {
        Self {
            string_buffers: Arc::new(RwLock::new(Vec::new())),
            arg_vectors: Arc::new(RwLock::new(Vec::new())),
            max_pool_size,
            total_acquired: AtomicU64::new(0),
            total_recycled: AtomicU64::new(0),
        }
    }

    pub fn acquire_string(&self, min_capacity: usize) -> String {
        self.total_acquired.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut buffers) = self.string_buffers.write() {
            if let Some(pos) = buffers.iter().position(|b| b.capacity() >= min_capacity) {
                let mut buffer = buffers.swap_remove(pos);
                buffer.clear();
                return buffer;
            }
        }
        String::with_capacity(min_capacity)
    }

    pub fn release_string(&self, mut buffer: String) {
        if buffer.capacity() == 0 {
            return;
        }
        if let Ok(mut buffers) = self.string_buffers.write() {
            if buffers.len() < self.max_pool_size {
                buffer.clear();
                buffers.push(buffer);
                self.total_recycled.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn acquire_args(&self) -> Vec<String> {
        self.total_acquired.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut vectors) = self.arg_vectors.write() {
            if let Some(mut v) = vectors.pop() {
                v.clear();
                return v;
            }
        }
        Vec::new()
    }

    pub fn release_args(&self, mut args: Vec<String>) {
        if let Ok(mut vectors) = self.arg_vectors.write() {
            if vectors.len() < self.max_pool_size {
                args.clear();
                vectors.push(args);
                self.total_recycled.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pooled_strings: self.string_buffers.read().map(|b| b.len()).unwrap_or(0),
            pooled_arg_vectors: self.arg_vectors.read().map(|b| b.len()).unwrap_or(0),
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_recycled: self.total_recycled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolStats {
    pub pooled_strings: usize,
    pub pooled_arg_vectors: usize,
    pub total_acquired: u64,
    pub total_recycled: u64,
}

/// Reference-counted allocation tracker keyed by site label. A
/// non-zero live count at shutdown points at a leak.
#[derive(Debug, Default)]
pub struct AllocationTracker {
    live: RwLock<HashMap<String, i64>>,
}

impl AllocationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocated(&self, site: &str) {
        if let Ok(mut live) = self.live.write() {
            *live.entry(site.to_string()).or_insert(0) += 1;
        }
    }

    pub fn released(&self, site: &str) {
        if let Ok(mut live) = self.live.write() {
            *live.entry(site.to_string()).or_insert(0) -= 1;
        }
    }

    pub fn live_count(&self, site: &str) -> i64 {
        self.live
            .read()
            .ok()
            .and_then(|live| live.get(site).copied())
            .unwrap_or(0)
    }

    /// Sites with a non-zero live count, sorted by magnitude.
    pub fn leak_report(&self) -> Vec<(String, i64)> {
        let mut leaks: Vec<(String, i64)> = self
            .live
            .read()
            .map(|live| {
                live.iter()
                    .filter(|(_, &count)| count != 0)
                    .map(|(k, &v)| (k.clone(), v))
                    .collect()
            })
            .unwrap_or_default();
        leaks.sort_by_key(|(_, count)| -count.abs());
        leaks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_buffer_recycled() {
        let pool = ObjectPool::new(8);
        let mut buffer = pool.acquire_string(64);
        buffer.push_str("scratch");
        let capacity = buffer.capacity();
        pool.release_string(buffer);

        let reused = pool.acquire_string(32);
        assert!(reused.is_empty());
        assert!(reused.capacity() >= capacity.min(32));
        assert_eq!(pool.stats().total_recycled, 1);
    }

    #[test]
    fn test_pool_respects_max_size() {
        let pool = ObjectPool::new(1);
        pool.release_string(String::with_capacity(16));
        pool.release_string(String::with_capacity(16));
        assert_eq!(pool.stats().pooled_strings, 1);
    }

    #[test]
    fn test_arg_vector_recycled() {
        let pool = ObjectPool::new(4);
        let mut args = pool.acquire_args();
        args.push("one".to_string());
        pool.release_args(args);
        let reused = pool.acquire_args();
        assert!(reused.is_empty());
    }

    #[test]
    fn test_tracker_balanced_is_clean() {
        let tracker = AllocationTracker::new();
        tracker.allocated("ast_node");
        tracker.allocated("ast_node");
        tracker.released("ast_node");
        tracker.released("ast_node");
        assert_eq!(tracker.live_count("ast_node"), 0);
        assert!(tracker.leak_report().is_empty());
    }

    #[test]
    fn test_tracker_reports_leak() {
        let tracker = AllocationTracker::new();
        tracker.allocated("buffer");
        tracker.allocated("buffer");
        tracker.released("buffer");
        let leaks = tracker.leak_report();
        assert_eq!(leaks, vec![("buffer".to_string(), 1)]);
    }
}

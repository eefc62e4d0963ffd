//! Dependency-Aware Parallel Executor
//!
//! Builds one task per top-level script node, wires dependencies
//! declared through `@Task(name)` / `@DependsOn(a, b)` annotations,
//! and runs a fixed-size worker pool over a ready queue. Completion of
//! a task signals the queue -- workers never poll-and-requeue. A graph
//! that cannot be scheduled (cycle, unknown dependency) is rejected
//! before any task starts.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::ast::types::{Node, ScriptNode};
use crate::interpreter::engine::Engine;
use crate::interpreter::errors::{ErrorKind, ShellError};
use crate::interpreter::types::{ExecContext, ExecResult};

/// One schedulable unit: a top-level script node plus its declared
/// dependencies.
#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    pub node: Node,
    pub deps: Vec<String>,
}

/// The dependency graph over a script's top-level statements.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: Vec<Task>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, name: impl Into<String>, node: Node, deps: Vec<String>) {
        self.tasks.push(Task {
            name: name.into(),
            node,
            deps,
        });
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Build the graph from a parsed script. Annotations label the
    /// following statement (`@Task(build)`) or declare its
    /// dependencies (`@DependsOn(build, lint)`); statements without a
    /// label get index-based names.
    pub fn from_script(script: &ScriptNode) -> Self {
        let mut graph = Self::new();
        let mut pending_name: Option<String> = None;
        let mut pending_deps: Vec<String> = Vec::new();

        for node in &script.nodes {
            if let Node::Annotation(a) = node {
                match a.name.as_str() {
                    "Task" => pending_name = a.value.clone(),
                    "DependsOn" => {
                        if let Some(value) = &a.value {
                            pending_deps = value
                                .split(',')
                                .map(|s| s.trim().to_string())
                                .filter(|s| !s.is_empty())
                                .collect();
                        }
                    }
                    _ => {} // other annotations are not scheduling hints
                }
                continue;
            }
            let name = pending_name
                .take()
                .unwrap_or_else(|| format!("t{}", graph.tasks.len()));
            graph.add_task(name, node.clone(), std::mem::take(&mut pending_deps));
        }
        graph
    }

    /// Verify the graph is schedulable: every dependency names a known
    /// task, names are unique, and there is no cycle. Fails closed --
    /// nothing runs for a rejected graph.
    pub fn validate(&self) -> Result<(), ShellError> {
        let mut index_of = HashMap::new();
        for (i, task) in self.tasks.iter().enumerate() {
            if index_of.insert(task.name.as_str(), i).is_some() {
                return Err(ShellError::new(
                    ErrorKind::InvalidInput,
                    format!("duplicate task name `{}`", task.name),
                ));
            }
        }

        let mut in_degree = vec![0usize; self.tasks.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.tasks.len()];
        for (i, task) in self.tasks.iter().enumerate() {
            for dep in &task.deps {
                let dep_idx = *index_of.get(dep.as_str()).ok_or_else(|| {
                    ShellError::new(
                        ErrorKind::InvalidInput,
                        format!("task `{}` depends on unknown task `{}`", task.name, dep),
                    )
                    .with_context("task", &task.name)
                })?;
                in_degree[i] += 1;
                dependents[dep_idx].push(i);
            }
        }

        // Kahn's algorithm: if a full topological order exists there
        // is no cycle.
        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut seen = 0usize;
        while let Some(i) = queue.pop_front() {
            seen += 1;
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }
        if seen != self.tasks.len() {
            return Err(ShellError::new(
                ErrorKind::InvalidInput,
                "task graph contains a dependency cycle",
            ));
        }
        Ok(())
    }
}

/// Result of one task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub name: String,
    pub index: usize,
    pub result: ExecResult,
    pub duration: Duration,
}

impl TaskResult {
    pub fn success(&self) -> bool {
        self.result.success()
    }
}

/// Aggregate statistics for one parallel run.
#[derive(Debug, Clone, Default)]
pub struct ParallelStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// sum(durations) / (max(duration) * task_count); 1.0 means the
    /// pool was perfectly busy
    pub utilization: f64,
}

/// Results in task-declaration order plus aggregate stats.
#[derive(Debug, Clone)]
pub struct ParallelRun {
    pub results: Vec<TaskResult>,
    pub stats: ParallelStats,
}

/// Fixed-size worker pool over a dependency-signaled ready queue.
#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    workers: usize,
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new(default_worker_count())
    }
}

/// Default pool size: small, bounded by the host.
pub fn default_worker_count() -> usize {
    num_cpus::get().min(4).max(1)
}

struct SharedState {
    tasks: Vec<Task>,
    ready: Mutex<VecDeque<usize>>,
    pending_deps: Mutex<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    results: Mutex<Vec<Option<TaskResult>>>,
    remaining: AtomicUsize,
    notify: Notify,
}

impl ParallelExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run every task in the graph, respecting dependencies. Tasks
    /// with no path between them in the graph may run in any order;
    /// everything else observes declaration order.
    pub async fn execute(
        &self,
        graph: TaskGraph,
        engine: &Engine,
        ctx: &ExecContext,
    ) -> Result<ParallelRun, ShellError> {
        graph.validate()?;
        let task_count = graph.len();
        if task_count == 0 {
            return Ok(ParallelRun {
                results: Vec::new(),
                stats: ParallelStats::default(),
            });
        }

        let mut index_of = HashMap::new();
        for (i, task) in graph.tasks.iter().enumerate() {
            index_of.insert(task.name.clone(), i);
        }
        let mut pending = vec![0usize; task_count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); task_count];
        for (i, task) in graph.tasks.iter().enumerate() {
            let unique: HashSet<&String> = task.deps.iter().collect();
            pending[i] = unique.len();
            for dep in unique {
                dependents[index_of[dep]].push(i);
            }
        }
        let ready: VecDeque<usize> = pending
            .iter()
            .enumerate()
            .filter(|(_, &p)| p == 0)
            .map(|(i, _)| i)
            .collect();

        let state = Arc::new(SharedState {
            tasks: graph.tasks,
            ready: Mutex::new(ready),
            pending_deps: Mutex::new(pending),
            dependents,
            results: Mutex::new(vec![None; task_count]),
            remaining: AtomicUsize::new(task_count),
            notify: Notify::new(),
        });

        debug!(tasks = task_count, workers = self.workers, "starting parallel run");

        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let state = Arc::clone(&state);
            let base = engine.fork();
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, state, base, ctx).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        if ctx.expired() {
            return Err(ctx.timeout_error());
        }

        let results: Vec<TaskResult> = state
            .results
            .lock()
            .expect("results lock poisoned")
            .iter()
            .flatten()
            .cloned()
            .collect();

        let completed = results.len();
        let failed = results.iter().filter(|r| !r.success()).count();
        let max_duration = results
            .iter()
            .map(|r| r.duration)
            .max()
            .unwrap_or_default();
        let sum_duration: Duration = results.iter().map(|r| r.duration).sum();
        let utilization = if completed > 0 && !max_duration.is_zero() {
            sum_duration.as_secs_f64() / (max_duration.as_secs_f64() * completed as f64)
        } else {
            0.0
        };

        Ok(ParallelRun {
            results,
            stats: ParallelStats {
                total: task_count,
                completed,
                failed,
                utilization,
            },
        })
    }
}

async fn worker_loop(worker_id: usize, state: Arc<SharedState>, base: Engine, ctx: ExecContext) {
    loop {
        // Register for wakeups before checking the queue so a
        // completion signal between the check and the await is not
        // lost.
        let notified = state.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if ctx.expired() {
            state.notify.notify_waiters();
            return;
        }

        let next = state
            .ready
            .lock()
            .expect("ready queue poisoned")
            .pop_front();

        let index = match next {
            Some(index) => index,
            None => {
                if state.remaining.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
                continue;
            }
        };

        let task = state.tasks[index].clone();
        debug!(worker = worker_id, task = %task.name, "running task");

        let mut engine = base.fork();
        let started = Instant::now();
        let result = match engine.execute_node(&task.node, &ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(task = %task.name, error = %e, "task errored");
                ExecResult::failure(124, e)
            }
        };
        let duration = started.elapsed();

        if let Ok(mut results) = state.results.lock() {
            results[index] = Some(TaskResult {
                name: task.name.clone(),
                index,
                result,
                duration,
            });
        }

        // Ready up dependents whose last dependency just finished.
        {
            let mut pending = state.pending_deps.lock().expect("pending lock poisoned");
            let mut ready = state.ready.lock().expect("ready queue poisoned");
            for &dependent in &state.dependents[index] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.push_back(dependent);
                }
            }
        }
        state.remaining.fetch_sub(1, Ordering::SeqCst);
        state.notify.notify_waiters();
    }
}

//! Shell Environment
//!
//! Main entry point for embedding flowsh: ties together the parsers,
//! the security sandbox, the execution engine, and the performance
//! layer (compilation cache + parallel executor + metrics).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::ast::types::ScriptNode;
use crate::interpreter::engine::{Engine, EngineOptions};
use crate::interpreter::errors::ShellError;
use crate::interpreter::types::{CancelToken, ExecContext, ExecutionLimits};
use crate::parser;
use crate::perf::cache::CompilationCache;
use crate::perf::metrics::{EngineMetrics, MetricsSnapshot};
use crate::perf::parallel::{ParallelExecutor, TaskGraph};
use crate::perf::profiler::{SampleKind, SamplingProfiler};
use crate::perf::tuner::PerfConfig;
use crate::sandbox::{SandboxConfig, SandboxPolicy};

/// Options for creating a Shell environment.
#[derive(Default)]
pub struct ShellOptions {
    /// Seed data for the sandbox rule sets
    pub sandbox: Option<SandboxConfig>,
    /// Cache directory; defaults to `flowsh-cache` under the temp dir
    pub cache_dir: Option<PathBuf>,
    /// Disable the compilation cache entirely
    pub cache_disabled: bool,
    /// Worker pool size for parallel execution
    pub workers: Option<usize>,
    /// Execution limits
    pub limits: Option<ExecutionLimits>,
    /// Initial variable bindings
    pub env: Option<HashMap<String, String>>,
}

/// Per-execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Deadline for the whole execution
    pub timeout: Option<Duration>,
    /// External cancellation signal
    pub cancel: Option<CancelToken>,
    /// Run independent top-level statements concurrently
    pub parallel: bool,
}

/// Result of one `exec` call, shaped for embedding layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellExecResult {
    pub success: bool,
    pub output: String,
    pub error: Option<ShellError>,
    pub duration_ms: f64,
    /// Captured-buffer estimate of memory held by this execution
    pub memory_used: u64,
    pub optimizations_applied: Vec<String>,
    pub cache_hit: bool,
    pub parallel_tasks_used: usize,
}

/// The flowsh shell environment. One instance can execute many
/// scripts; each execution gets its own engine and scope.
pub struct Shell {
    policy: SandboxPolicy,
    cache: CompilationCache,
    config: PerfConfig,
    metrics: Arc<EngineMetrics>,
    profiler: SamplingProfiler,
    limits: ExecutionLimits,
    env: HashMap<String, String>,
}

impl Shell {
    pub fn new(options: ShellOptions) -> Self {
        let policy = match &options.sandbox {
            Some(config) => SandboxPolicy::from_config(config),
            None => SandboxPolicy::new(),
        };
        let cache_dir = options
            .cache_dir
            .unwrap_or_else(|| std::env::temp_dir().join("flowsh-cache"));
        let mut config = PerfConfig::default();
        config.cache_enabled = !options.cache_disabled;
        if let Some(workers) = options.workers {
            config.worker_count = workers.max(1);
        }
        Self {
            policy,
            cache: CompilationCache::open(cache_dir),
            config,
            metrics: Arc::new(EngineMetrics::new()),
            profiler: SamplingProfiler::new(),
            limits: options.limits.unwrap_or_default(),
            env: options.env.unwrap_or_default(),
        }
    }

    pub fn profiler(&self) -> &SamplingProfiler {
        &self.profiler
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    pub fn cache(&self) -> &CompilationCache {
        &self.cache
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn perf_config(&self) -> &PerfConfig {
        &self.config
    }

    /// Execute a script from an in-memory string.
    pub async fn exec(&self, source: &str, options: ExecOptions) -> ShellExecResult {
        self.exec_inner(source, None, options).await
    }

    /// Read a file and execute its contents.
    pub async fn exec_file(&self, path: &str, options: ExecOptions) -> ShellExecResult {
        let source = match tokio::fs::read_to_string(path).await {
            Ok(source) => source,
            Err(e) => {
                let error = ShellError::new(
                    crate::interpreter::errors::ErrorKind::FileNotFound,
                    format!("cannot read {}: {}", path, e),
                )
                .with_context("path", path);
                return failure_result(error);
            }
        };
        self.exec_inner(&source, Some(path), options).await
    }

    async fn exec_inner(
        &self,
        source: &str,
        source_path: Option<&str>,
        options: ExecOptions,
    ) -> ShellExecResult {
        let started = Instant::now();

        let ast = self.profiler.time(&["exec", "parse"], || self.parse(source));

        // Compilation cache: substitute the optimized AST when the
        // content was seen before.
        let (ast, cache_hit, optimizations_applied) = if self.config.cache_enabled {
            match self.cache.compile(source, source_path, &ast) {
                Ok(output) => {
                    if output.cache_hit {
                        self.metrics.record_cache_hit();
                    } else {
                        self.metrics.record_cache_miss();
                    }
                    (output.ast, output.cache_hit, output.optimizations_applied)
                }
                Err(e) => {
                    debug!(error = %e, "cache compile failed, executing unoptimized AST");
                    (ast, false, Vec::new())
                }
            }
        } else {
            (ast, false, Vec::new())
        };

        let ctx = ExecContext {
            deadline: options.timeout.map(|t| Instant::now() + t),
            cancel: options.cancel.unwrap_or_default(),
        };

        let mut engine = Engine::new(EngineOptions {
            policy: self.policy.clone(),
            limits: self.limits,
            env: self.env.clone(),
            ..EngineOptions::default()
        })
        .with_metrics(Arc::clone(&self.metrics));

        let mut result = if options.parallel {
            self.exec_parallel(&ast, &engine, &ctx).await
        } else {
            let outcome = engine.run(&ast, &ctx).await;
            ShellExecResult {
                success: outcome.result.success(),
                memory_used: (outcome.result.stdout.len() + outcome.result.stderr.len()) as u64,
                output: outcome.result.stdout,
                error: outcome.error,
                duration_ms: 0.0,
                optimizations_applied: Vec::new(),
                cache_hit: false,
                parallel_tasks_used: 0,
            }
        };

        result.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        result.cache_hit = cache_hit;
        result.optimizations_applied = optimizations_applied;
        self.profiler.record(
            SampleKind::Cpu,
            &["exec", "run"],
            started.elapsed().as_micros() as u64,
        );
        result
    }

    fn parse(&self, source: &str) -> ScriptNode {
        // Grammar-driven first; the line-oriented fallback never hard
        // fails, so a completely unreadable source still degrades to
        // whatever statements it can recognize.
        match parser::grammar::parse(source) {
            Ok(script) => script,
            Err(e) => {
                debug!(error = %e, "grammar parse failed, using fallback parser");
                parser::line::parse(source).unwrap_or_default()
            }
        }
    }

    async fn exec_parallel(
        &self,
        ast: &ScriptNode,
        engine: &Engine,
        ctx: &ExecContext,
    ) -> ShellExecResult {
        let graph = TaskGraph::from_script(ast);
        let task_count = graph.len();
        let executor = ParallelExecutor::new(self.config.worker_count);
        match executor.execute(graph, engine, ctx).await {
            Ok(run) => {
                let mut output = String::new();
                let mut error = None;
                for task in &run.results {
                    output.push_str(&task.result.stdout);
                    if error.is_none() {
                        error = task.result.error.clone();
                    }
                }
                ShellExecResult {
                    success: run.stats.failed == 0 && run.stats.completed == run.stats.total,
                    memory_used: output.len() as u64,
                    output,
                    error,
                    duration_ms: 0.0,
                    optimizations_applied: Vec::new(),
                    cache_hit: false,
                    parallel_tasks_used: task_count,
                }
            }
            Err(e) => {
                self.metrics.record_error(&e);
                failure_result(e)
            }
        }
    }
}

fn failure_result(error: ShellError) -> ShellExecResult {
    ShellExecResult {
        success: false,
        output: String::new(),
        error: Some(error),
        duration_ms: 0.0,
        memory_used: 0,
        optimizations_applied: Vec::new(),
        cache_hit: false,
        parallel_tasks_used: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::errors::ErrorKind;

    fn shell_with_temp_cache(dir: &tempfile::TempDir) -> Shell {
        Shell::new(ShellOptions {
            cache_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exec_simple_script() {
        let dir = tempfile::tempdir().unwrap();
        let shell = shell_with_temp_cache(&dir);
        let result = shell.exec("echo hello", ExecOptions::default()).await;
        assert!(result.success);
        assert_eq!(result.output.trim(), "hello");
        assert!(!result.cache_hit);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_second_exec_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let shell = shell_with_temp_cache(&dir);
        shell.exec("echo cached", ExecOptions::default()).await;
        let second = shell.exec("echo cached", ExecOptions::default()).await;
        assert!(second.cache_hit);
        assert_eq!(second.output.trim(), "cached");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cache_disabled_never_hits() {
        let dir = tempfile::tempdir().unwrap();
        let shell = Shell::new(ShellOptions {
            cache_dir: Some(dir.path().to_path_buf()),
            cache_disabled: true,
            ..Default::default()
        });
        shell.exec("echo x", ExecOptions::default()).await;
        let second = shell.exec("echo x", ExecOptions::default()).await;
        assert!(!second.cache_hit);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sandbox_violation_reported() {
        let dir = tempfile::tempdir().unwrap();
        let shell = shell_with_temp_cache(&dir);
        let result = shell.exec("rm -rf /", ExecOptions::default()).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, ErrorKind::SecurityViolation);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timeout_reported() {
        let dir = tempfile::tempdir().unwrap();
        let shell = shell_with_temp_cache(&dir);
        let result = shell
            .exec(
                "sleep 5",
                ExecOptions {
                    timeout: Some(Duration::from_millis(150)),
                    ..Default::default()
                },
            )
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().is_timeout());
        assert!(result.duration_ms < 2_000.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_parallel_execution() {
        let dir = tempfile::tempdir().unwrap();
        let shell = shell_with_temp_cache(&dir);
        let source = "@Task(a)\necho alpha\n@Task(b)\necho beta";
        let result = shell
            .exec(
                source,
                ExecOptions {
                    parallel: true,
                    ..Default::default()
                },
            )
            .await;
        assert!(result.success);
        assert_eq!(result.parallel_tasks_used, 2);
        assert!(result.output.contains("alpha"));
        assert!(result.output.contains("beta"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exec_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.fsh");
        std::fs::write(&path, "echo from-file\n").unwrap();
        let shell = shell_with_temp_cache(&dir);
        let result = shell
            .exec_file(path.to_str().unwrap(), ExecOptions::default())
            .await;
        assert!(result.success);
        assert_eq!(result.output.trim(), "from-file");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_file_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let shell = shell_with_temp_cache(&dir);
        let result = shell
            .exec_file("/no/such/flowsh/script.fsh", ExecOptions::default())
            .await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, ErrorKind::FileNotFound);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_metrics_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let shell = shell_with_temp_cache(&dir);
        shell.exec("echo one", ExecOptions::default()).await;
        shell.exec("echo one", ExecOptions::default()).await;
        let snapshot = shell.metrics_snapshot();
        assert!(snapshot.command_executions >= 2);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_profiler_sees_exec_spans() {
        let dir = tempfile::tempdir().unwrap();
        let shell = shell_with_temp_cache(&dir);
        shell.exec("echo profiled", ExecOptions::default()).await;
        let flame = shell
            .profiler()
            .flame_graph(crate::perf::profiler::SampleKind::Cpu);
        assert!(flame.iter().any(|line| line.starts_with("exec;run")));
        assert!(flame.iter().any(|line| line.starts_with("exec;parse")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreadable_source_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let shell = shell_with_temp_cache(&dir);
        // Unterminated quote: grammar parser refuses, fallback degrades
        let result = shell.exec("echo ok\necho 'broken", ExecOptions::default()).await;
        assert!(result.output.contains("ok"));
    }
}

//! Execution Engine
//!
//! Walks the AST, maintains variable/function scope, expands variables
//! and command substitution, gates every command through the sandbox,
//! and implements pipeline/control-flow semantics with timeout and
//! cancellation.
//!
//! One engine instance owns one script invocation's scope. Node order
//! within a script is sequential and deterministic; only explicit
//! `Background` nodes and the opt-in parallel executor introduce
//! concurrency.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::ast::types::{CommandNode, Node, RedirectOp, ScriptNode};
use crate::interpreter::command_execution::{CommandExecutor, CommandInvocation, SystemExecutor};
use crate::interpreter::errors::{ErrorKind, ShellError};
use crate::interpreter::expansion::{
    find_substitution, resolve_bare_token, split_concat, Segment,
};
use crate::interpreter::pipeline_execution::PipelineResult;
use crate::interpreter::types::{ExecContext, ExecResult, ExecState, ExecutionLimits, Scope};
use crate::perf::metrics::EngineMetrics;
use crate::sandbox::SandboxPolicy;

/// Options for creating an engine instance.
pub struct EngineOptions {
    pub policy: SandboxPolicy,
    pub executor: Arc<dyn CommandExecutor>,
    pub limits: ExecutionLimits,
    /// Initial variable bindings
    pub env: HashMap<String, String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            policy: SandboxPolicy::new(),
            executor: Arc::new(SystemExecutor),
            limits: ExecutionLimits::default(),
            env: HashMap::new(),
        }
    }
}

/// Outcome of one script invocation.
#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    pub state: ExecState,
    pub result: ExecResult,
    pub error: Option<ShellError>,
}

type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<ExecResult, ShellError>> + Send + 'a>>;

/// The AST execution engine. One instance per script invocation; the
/// tree itself is never mutated.
pub struct Engine {
    scope: Scope,
    policy: SandboxPolicy,
    executor: Arc<dyn CommandExecutor>,
    limits: ExecutionLimits,
    metrics: Arc<EngineMetrics>,
    state: ExecState,
    command_count: usize,
    background: Vec<JoinHandle<()>>,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        let mut scope = Scope::new();
        for (k, v) in options.env {
            scope.set(k, v);
        }
        Self {
            scope,
            policy: options.policy,
            executor: options.executor,
            limits: options.limits,
            metrics: Arc::new(EngineMetrics::new()),
            state: ExecState::Ready,
            command_count: 0,
            background: Vec::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// An engine sharing this one's policy/executor/metrics, with a
    /// snapshot of the current scope. Used for background nodes and
    /// parallel tasks.
    pub fn fork(&self) -> Engine {
        Engine {
            scope: self.scope.snapshot(),
            policy: self.policy.clone(),
            executor: Arc::clone(&self.executor),
            limits: self.limits,
            metrics: Arc::clone(&self.metrics),
            state: ExecState::Ready,
            command_count: 0,
            background: Vec::new(),
        }
    }

    /// Execute a script to completion, mapping errors onto the
    /// lifecycle state machine.
    pub async fn run(&mut self, script: &ScriptNode, ctx: &ExecContext) -> ScriptOutcome {
        self.state = ExecState::Running;
        self.metrics.record_script();
        match self.execute_script(script, ctx).await {
            Ok(result) => {
                self.state = if result.success() {
                    ExecState::Completed
                } else {
                    ExecState::Failed
                };
                if let Some(e) = &result.error {
                    self.metrics.record_error(e);
                }
                ScriptOutcome {
                    state: self.state,
                    error: result.error.clone(),
                    result,
                }
            }
            Err(e) => {
                self.state = if e.is_timeout() {
                    ctx.expired_state()
                } else {
                    ExecState::Failed
                };
                self.metrics.record_error(&e);
                ScriptOutcome {
                    state: self.state,
                    result: ExecResult::failure(124, e.clone()),
                    error: Some(e),
                }
            }
        }
    }

    /// Execute a script's nodes in order, accumulating output.
    /// Execution is abandoned at the first failing node; `And`/`Or`
    /// chains do their own short-circuiting internally.
    pub async fn execute_script(
        &mut self,
        script: &ScriptNode,
        ctx: &ExecContext,
    ) -> Result<ExecResult, ShellError> {
        let mut acc = ExecResult::ok();
        for node in &script.nodes {
            if ctx.expired() {
                return Err(ctx.timeout_error());
            }
            let result = self.execute_node(node, ctx).await?;
            acc.stdout.push_str(&result.stdout);
            acc.stderr.push_str(&result.stderr);
            acc.exit_code = result.exit_code;
            acc.error = result.error;
            if acc.exit_code != 0 {
                break;
            }
        }
        Ok(acc)
    }

    /// Execute a single node. Boxed so control-flow bodies can recurse.
    pub fn execute_node<'a>(&'a mut self, node: &'a Node, ctx: &'a ExecContext) -> NodeFuture<'a> {
        Box::pin(async move {
            if ctx.expired() {
                return Err(ctx.timeout_error());
            }
            trace!(kind = node.kind(), line = node.position().line, "executing node");

            match node {
                Node::Command(cmd) => self.execute_command(cmd, ctx, "").await,

                Node::Pipe(_) => {
                    let pipeline = self.execute_pipeline(node, ctx).await?;
                    Ok(pipeline.to_exec_result())
                }

                Node::And(chain) => {
                    let left = self.execute_node(&chain.left, ctx).await?;
                    if !left.success() {
                        return Ok(left);
                    }
                    let right = self.execute_node(&chain.right, ctx).await?;
                    Ok(merge_sequential(left, right))
                }

                Node::Or(chain) => {
                    let left = self.execute_node(&chain.left, ctx).await?;
                    if left.success() {
                        return Ok(left);
                    }
                    let right = self.execute_node(&chain.right, ctx).await?;
                    Ok(merge_sequential(left, right))
                }

                Node::Assignment(a) => {
                    let value = self.expand(&a.value, ctx).await?;
                    self.scope.set(&a.name, value);
                    Ok(ExecResult::ok())
                }

                Node::Array(a) => {
                    let mut values = Vec::with_capacity(a.values.len());
                    for v in &a.values {
                        values.push(self.expand(v, ctx).await?);
                    }
                    self.scope.set_array(&a.name, values);
                    Ok(ExecResult::ok())
                }

                Node::If(n) => {
                    let cond = self.execute_node(&n.condition, ctx).await?;
                    let body = if cond.success() {
                        Some(&n.then_body)
                    } else {
                        n.else_body.as_ref()
                    };
                    match body {
                        Some(script) => self.execute_script(script, ctx).await,
                        None => Ok(ExecResult::ok()),
                    }
                }

                Node::For(n) => {
                    let mut acc = ExecResult::ok();
                    let mut iterations = 0usize;
                    for item in &n.list {
                        let expanded = self.expand(item, ctx).await?;
                        for word in expanded.split_whitespace() {
                            iterations += 1;
                            if iterations > self.limits.max_loop_iterations {
                                return Err(loop_limit_error(self.limits.max_loop_iterations));
                            }
                            if ctx.expired() {
                                return Err(ctx.timeout_error());
                            }
                            self.scope.set(&n.variable, word);
                            let result = self.execute_script(&n.body, ctx).await?;
                            acc = merge_sequential(acc, result);
                            if acc.exit_code != 0 {
                                return Ok(acc);
                            }
                        }
                    }
                    Ok(acc)
                }

                Node::While(n) => {
                    let mut acc = ExecResult::ok();
                    let mut iterations = 0usize;
                    loop {
                        iterations += 1;
                        if iterations > self.limits.max_loop_iterations {
                            return Err(loop_limit_error(self.limits.max_loop_iterations));
                        }
                        if ctx.expired() {
                            return Err(ctx.timeout_error());
                        }
                        let cond = self.execute_node(&n.condition, ctx).await?;
                        if !cond.success() {
                            break;
                        }
                        let result = self.execute_script(&n.body, ctx).await?;
                        acc = merge_sequential(acc, result);
                        if acc.exit_code != 0 {
                            return Ok(acc);
                        }
                    }
                    Ok(acc)
                }

                Node::Function(f) => {
                    debug!(name = %f.name, "registering function");
                    self.scope.functions.insert(f.name.clone(), f.body.clone());
                    Ok(ExecResult::ok())
                }

                Node::Background(b) => {
                    let inner = (*b.command).clone();
                    let forked = self.fork();
                    let bg_ctx = ctx.clone();
                    let handle = tokio::spawn(async move {
                        let mut engine = forked;
                        if let Err(e) = engine.execute_node(&inner, &bg_ctx).await {
                            debug!(error = %e, "background node failed");
                        }
                    });
                    self.background.push(handle);
                    // The caller is not blocked and sees no result.
                    Ok(ExecResult::ok())
                }

                Node::Heredoc(h) => {
                    let body = self.expand(&h.body, ctx).await?;
                    match &*h.command {
                        Node::Command(cmd) => self.execute_command(cmd, ctx, &body).await,
                        other => self.execute_node(other, ctx).await,
                    }
                }

                Node::CommandSubstitution(s) => self.execute_script(&s.command, ctx).await,

                Node::Annotation(_) => Ok(ExecResult::ok()),
            }
        })
    }

    /// Execute a pipeline node, collecting per-stage sub-results.
    /// Exposed so callers can observe partial results directly.
    pub async fn execute_pipeline(
        &mut self,
        node: &Node,
        ctx: &ExecContext,
    ) -> Result<PipelineResult, ShellError> {
        let mut stages = Vec::new();
        flatten_pipe(node, &mut stages);

        let mut pipeline = PipelineResult::new();
        for stage in stages {
            if ctx.expired() {
                return Err(ctx.timeout_error());
            }
            let stdin = pipeline.next_stdin();
            let result = match stage {
                Node::Command(cmd) => self.execute_command(cmd, ctx, &stdin).await?,
                other => self.execute_node(other, ctx).await?,
            };
            if !pipeline.record(result) {
                break;
            }
        }
        Ok(pipeline)
    }

    /// Execute one command: sandbox gate, expansion, dispatch.
    async fn execute_command(
        &mut self,
        cmd: &CommandNode,
        ctx: &ExecContext,
        piped_stdin: &str,
    ) -> Result<ExecResult, ShellError> {
        if ctx.expired() {
            return Err(ctx.timeout_error());
        }
        self.command_count += 1;
        if self.command_count > self.limits.max_command_count {
            return Err(ShellError::new(
                ErrorKind::ResourceExhausted,
                format!("command count exceeded {}", self.limits.max_command_count),
            ));
        }

        // A name bound to a function runs its body in a snapshot scope.
        if let Some(body) = self.scope.functions.get(&cmd.name).cloned() {
            return self.call_function(cmd, &body, ctx).await;
        }

        // The sandbox sees the command as parsed, before expansion.
        if let Err(violation) = self.policy.check(cmd) {
            self.metrics.record_security_violation();
            debug!(command = %cmd.name, rule = violation.rule.as_str(), "sandbox rejected command");
            let error: ShellError = violation.into();
            self.metrics.record_error(&error);
            return Ok(ExecResult::failure(126, error));
        }

        let mut args = Vec::with_capacity(cmd.args.len());
        for arg in &cmd.args {
            args.push(self.expand(arg, ctx).await?);
        }

        // Input redirection replaces piped stdin.
        let mut stdin = piped_stdin.to_string();
        if let Some(r) = &cmd.redirect {
            if r.op == RedirectOp::Read {
                match tokio::fs::read_to_string(&r.file).await {
                    Ok(content) => stdin = content,
                    Err(e) => {
                        let kind = match e.kind() {
                            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
                            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                            _ => ErrorKind::ExecutionFailed,
                        };
                        let error = ShellError::new(kind, format!("cannot read {}: {}", r.file, e))
                            .with_context("file", &r.file);
                        return Ok(ExecResult::failure(1, error));
                    }
                }
            }
        }

        let invocation = CommandInvocation {
            name: cmd.name.clone(),
            args,
            stdin,
            env: self.scope.variables.clone(),
        };

        let started = Instant::now();
        let outcome = self.executor.execute(&invocation, ctx).await;
        let duration = started.elapsed();

        match outcome {
            Ok(mut result) => {
                self.metrics.record_command(duration, result.success());
                if let Some(r) = &cmd.redirect {
                    if let Err(error) = apply_output_redirect(&mut result, r).await {
                        return Ok(ExecResult::failure(1, error));
                    }
                }
                Ok(result)
            }
            Err(e) if e.is_timeout() => {
                self.metrics.record_command(duration, false);
                Err(e)
            }
            Err(e) => {
                self.metrics.record_command(duration, false);
                self.metrics.record_error(&e);
                let exit_code = match e.kind {
                    ErrorKind::CommandNotFound => 127,
                    ErrorKind::PermissionDenied => 126,
                    _ => 1,
                };
                Ok(ExecResult::failure(exit_code, e))
            }
        }
    }

    /// Run a function body in a snapshot of the caller's scope with
    /// positional parameters bound. Mutations do not write back.
    async fn call_function(
        &mut self,
        cmd: &CommandNode,
        body: &ScriptNode,
        ctx: &ExecContext,
    ) -> Result<ExecResult, ShellError> {
        let mut args = Vec::with_capacity(cmd.args.len());
        for arg in &cmd.args {
            args.push(self.expand(arg, ctx).await?);
        }

        let parent = self.scope.clone();
        for (i, arg) in args.iter().enumerate() {
            self.scope.set((i + 1).to_string(), arg);
        }
        self.scope.set("#", args.len().to_string());

        let result = self.execute_script(body, ctx).await;

        // Restore the caller's bindings; the nested scope is discarded.
        self.scope = parent;
        result
    }

    /// The expansion pipeline applied to every argument and assignment
    /// value: command substitution, then `+` concatenation, then
    /// `${NAME}`/`$NAME`, then a final bare-token lookup.
    pub async fn expand(&mut self, input: &str, ctx: &ExecContext) -> Result<String, ShellError> {
        let mut text = input.to_string();

        // 1. Command substitution, innermost-first via re-scanning.
        //    Failures substitute an empty string; only timeout aborts.
        let mut rounds = 0usize;
        while let Some(site) = find_substitution(&text) {
            rounds += 1;
            if rounds > self.limits.max_substitution_depth {
                break;
            }
            let replacement = match self.run_substitution(&site.inner, ctx).await {
                Ok(output) => output,
                Err(e) if e.is_timeout() => return Err(e),
                Err(_) => String::new(),
            };
            text.replace_range(site.start..site.end, &replacement);
        }

        // 2. `+` concatenation of quoted literals and variable names.
        if let Some(segments) = split_concat(&text) {
            let mut out = String::new();
            for segment in segments {
                match segment {
                    Segment::Quoted(literal) => out.push_str(&literal),
                    Segment::Bare(name) => {
                        match self.scope.lookup(&name) {
                            Some(value) => out.push_str(&value),
                            None => out.push_str(&name),
                        }
                    }
                }
            }
            text = out;
        }

        // 3. ${NAME} and $NAME.
        let scope = &self.scope;
        text = crate::interpreter::expansion::expand_variables(&text, &|name| scope.lookup(name));

        // 4. Whole-argument bare token tried as a direct reference.
        if let Some(value) = resolve_bare_token(&text, &|name| scope.lookup(name)) {
            text = value;
        }

        Ok(text)
    }

    /// Re-parse and execute `$(...)` content as a fresh script,
    /// returning its trimmed stdout. Errors are reported to the caller,
    /// which substitutes an empty string (soft failure by design).
    async fn run_substitution(
        &mut self,
        inner: &str,
        ctx: &ExecContext,
    ) -> Result<String, ShellError> {
        let script = crate::parser::grammar::parse(inner).map_err(ShellError::from)?;
        let result = self.execute_script(&script, ctx).await?;
        if result.success() {
            Ok(result.stdout.trim().to_string())
        } else {
            Err(result
                .error
                .unwrap_or_else(|| ShellError::execution_failed("substitution failed")))
        }
    }

    /// Await every background task spawned so far.
    pub async fn wait_background(&mut self) {
        for handle in self.background.drain(..) {
            let _ = handle.await;
        }
    }
}

fn loop_limit_error(limit: usize) -> ShellError {
    ShellError::new(
        ErrorKind::ResourceExhausted,
        format!("loop iteration limit exceeded ({})", limit),
    )
}

/// Concatenate two sequential results; exit code and error come from
/// the later one.
fn merge_sequential(mut first: ExecResult, second: ExecResult) -> ExecResult {
    first.stdout.push_str(&second.stdout);
    first.stderr.push_str(&second.stderr);
    first.exit_code = second.exit_code;
    first.error = second.error;
    first
}

/// Flatten a left-leaning pipe tree into stage order.
fn flatten_pipe<'a>(node: &'a Node, out: &mut Vec<&'a Node>) {
    match node {
        Node::Pipe(p) => {
            flatten_pipe(&p.left, out);
            flatten_pipe(&p.right, out);
        }
        other => out.push(other),
    }
}

/// Apply an output redirection after the command ran: the captured
/// stream goes to the file (or the sibling stream) instead of the
/// caller.
async fn apply_output_redirect(
    result: &mut ExecResult,
    redirect: &crate::ast::types::RedirectNode,
) -> Result<(), ShellError> {
    use tokio::io::AsyncWriteExt;

    match redirect.op {
        RedirectOp::Read => Ok(()), // handled before execution
        RedirectOp::Write | RedirectOp::Append => {
            let payload = if redirect.fd == 2 {
                std::mem::take(&mut result.stderr)
            } else {
                std::mem::take(&mut result.stdout)
            };
            let open = if redirect.op == RedirectOp::Append {
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&redirect.file)
                    .await
            } else {
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&redirect.file)
                    .await
            };
            let mut file = open.map_err(|e| {
                ShellError::new(
                    ErrorKind::ExecutionFailed,
                    format!("cannot open {}: {}", redirect.file, e),
                )
                .with_context("file", &redirect.file)
            })?;
            file.write_all(payload.as_bytes()).await.map_err(|e| {
                ShellError::new(
                    ErrorKind::ExecutionFailed,
                    format!("cannot write {}: {}", redirect.file, e),
                )
                .with_context("file", &redirect.file)
            })?;
            Ok(())
        }
        RedirectOp::DupOut => {
            // 2>&1 folds stderr into stdout; >&2 the other way.
            if redirect.fd == 2 && redirect.file == "1" {
                let stderr = std::mem::take(&mut result.stderr);
                result.stdout.push_str(&stderr);
            } else if redirect.fd == 1 && redirect.file == "2" {
                let stdout = std::mem::take(&mut result.stdout);
                result.stderr.push_str(&stdout);
            }
            Ok(())
        }
        RedirectOp::DupIn => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::grammar::parse;
    use tokio::time::Duration;

    fn engine() -> Engine {
        Engine::new(EngineOptions::default())
    }

    async fn run_source(source: &str) -> ScriptOutcome {
        let script = parse(source).unwrap();
        engine().run(&script, &ExecContext::unbounded()).await
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_simple_command_output() {
        let outcome = run_source("echo hello").await;
        assert_eq!(outcome.state, ExecState::Completed);
        assert_eq!(outcome.result.stdout.trim(), "hello");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_assignment_and_expansion() {
        let outcome = run_source("GREETING=hello\necho ${GREETING} $GREETING").await;
        assert_eq!(outcome.result.stdout.trim(), "hello hello");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unset_variable_left_unexpanded() {
        let outcome = run_source("echo $MISSING_VAR_X").await;
        assert_eq!(outcome.result.stdout.trim(), "$MISSING_VAR_X");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_command_substitution() {
        let outcome = run_source("X=$(echo inner)\necho $X").await;
        assert_eq!(outcome.result.stdout.trim(), "inner");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_substitution_failure_swallowed() {
        // The failing substitution becomes an empty string; the
        // enclosing statement still runs.
        let outcome = run_source("X=$(nonexistent_cmd_zzz)\necho ok").await;
        assert_eq!(outcome.state, ExecState::Completed);
        assert_eq!(outcome.result.stdout.trim(), "ok");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_and_or_short_circuit() {
        let outcome = run_source("false || echo fallback").await;
        assert_eq!(outcome.result.stdout.trim(), "fallback");

        let outcome = run_source("true && echo chained").await;
        assert_eq!(outcome.result.stdout.trim(), "chained");

        let outcome = run_source("false && echo never").await;
        assert_eq!(outcome.result.stdout.trim(), "");
        assert_eq!(outcome.state, ExecState::Failed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pipeline_feeds_stdin() {
        let outcome = run_source("echo hello | cat").await;
        assert_eq!(outcome.result.stdout.trim(), "hello");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pipeline_partial_failure() {
        let script = parse("echo hello | nonexistent_cmd_zzz").unwrap();
        let mut engine = engine();
        let pipeline = engine
            .execute_pipeline(&script.nodes[0], &ExecContext::unbounded())
            .await
            .unwrap();
        assert!(!pipeline.success);
        assert!(pipeline.error.is_some());
        assert!(!pipeline.sub_results.is_empty());
        assert_eq!(pipeline.sub_results[0].stdout.trim(), "hello");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_if_else_branches() {
        let outcome = run_source("if true; then echo yes; else echo no; fi").await;
        assert_eq!(outcome.result.stdout.trim(), "yes");

        let outcome = run_source("if false; then echo yes; else echo no; fi").await;
        assert_eq!(outcome.result.stdout.trim(), "no");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_for_loop_accumulates_output() {
        let outcome = run_source("for i in a b c; do echo $i; done").await;
        assert_eq!(outcome.result.stdout, "a\nb\nc\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_while_loop_iteration_limit() {
        let mut options = EngineOptions::default();
        options.limits.max_loop_iterations = 3;
        let mut engine = Engine::new(options);
        let script = parse("while true; do echo spin; done").unwrap();
        let outcome = engine.run(&script, &ExecContext::unbounded()).await;
        assert_eq!(outcome.state, ExecState::Failed);
        assert_eq!(outcome.error.unwrap().kind, ErrorKind::ResourceExhausted);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_function_call_with_positionals() {
        let outcome = run_source("greet() {\n  echo hi $1\n}\ngreet world").await;
        assert_eq!(outcome.result.stdout.trim(), "hi world");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_function_scope_no_write_back() {
        let source = "X=outer\nsetit() {\n  X=inner\n}\nsetit\necho $X";
        let outcome = run_source(source).await;
        assert_eq!(outcome.result.stdout.trim(), "outer");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sandbox_rejection_fails_script() {
        let outcome = run_source("rm -rf /").await;
        assert_eq!(outcome.state, ExecState::Failed);
        let error = outcome.error.unwrap();
        assert_eq!(error.kind, ErrorKind::SecurityViolation);
        assert_eq!(outcome.result.exit_code, 126);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timeout_surfaces_within_margin() {
        let script = parse("sleep 5").unwrap();
        let mut engine = engine();
        let ctx = ExecContext::with_timeout(Duration::from_millis(150));
        let started = tokio::time::Instant::now();
        let outcome = engine.run(&script, &ctx).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(outcome.state, ExecState::TimedOut);
        assert!(outcome.error.unwrap().is_timeout());
        assert!(!outcome.result.success());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_background_does_not_block() {
        let started = tokio::time::Instant::now();
        let outcome = run_source("sleep 2 &\necho done").await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(outcome.result.stdout.trim(), "done");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_heredoc_feeds_stdin() {
        let outcome = run_source("cat <<END\nfirst line\nsecond line\nEND\n").await;
        assert_eq!(outcome.result.stdout, "first line\nsecond line\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_output_redirect_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let source = format!("echo redirected >{}", path.display());
        let outcome = run_source(&source).await;
        assert_eq!(outcome.state, ExecState::Completed);
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.trim(), "redirected");
        // Captured stdout moved to the file
        assert!(outcome.result.stdout.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_input_redirect_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.txt");
        std::fs::write(&path, "from file\n").unwrap();
        let source = format!("cat <{}", path.display());
        let outcome = run_source(&source).await;
        assert_eq!(outcome.result.stdout, "from file\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_plus_concatenation() {
        let outcome = run_source("NAME=world\necho \"hello \"+NAME").await;
        assert_eq!(outcome.result.stdout.trim(), "hello world");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_annotation_is_noop() {
        let outcome = run_source("@Cache(on)\necho after").await;
        assert_eq!(outcome.result.stdout.trim(), "after");
    }
}

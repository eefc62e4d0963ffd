//! Execution Engine module
//!
//! Walks the AST and runs commands: scope management, expansion,
//! sandbox dispatch, external processes, pipelines, control flow, and
//! timeout/cancellation handling.

pub mod command_execution;
pub mod engine;
pub mod errors;
pub mod expansion;
pub mod pipeline_execution;
pub mod types;

pub use command_execution::{CommandExecutor, CommandInvocation, SystemExecutor};
pub use engine::{Engine, EngineOptions, ScriptOutcome};
pub use errors::{ErrorKind, ShellError};
pub use pipeline_execution::PipelineResult;
pub use types::{CancelToken, ExecContext, ExecResult, ExecState, ExecutionLimits, Scope};

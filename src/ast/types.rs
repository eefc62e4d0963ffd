//! Abstract Syntax Tree (AST) Types for flowsh Scripts
//!
//! This module defines the complete AST structure for flowsh scripts.
//! Nodes are pure data: they are created once by a parser and never
//! mutated afterwards. The execution engine keeps all runtime state
//! (variables, functions, buffers) on its own side.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// BASE TYPES
// =============================================================================

/// Position information for error reporting and diagnostics.
///
/// Attached to every AST node. Lines and columns are 1-indexed,
/// `offset` is the byte offset into the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self { line, column, offset }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

// =============================================================================
// REDIRECTIONS
// =============================================================================

/// Redirection operators supported on simple commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedirectOp {
    /// `>` truncate-write stdout (or `fd`) to a file
    Write,
    /// `>>` append stdout (or `fd`) to a file
    Append,
    /// `<` read stdin from a file
    Read,
    /// `>&` duplicate an output descriptor
    DupOut,
    /// `<&` duplicate an input descriptor
    DupIn,
}

impl RedirectOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Write => ">",
            Self::Append => ">>",
            Self::Read => "<",
            Self::DupOut => ">&",
            Self::DupIn => "<&",
        }
    }
}

impl fmt::Display for RedirectOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A redirection attached to a command: `op file` with an optional
/// explicit descriptor (`2>err.log`). The descriptor defaults to
/// stdout (1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectNode {
    pub op: RedirectOp,
    pub file: String,
    pub fd: u32,
    pub pos: Position,
}

impl RedirectNode {
    pub fn new(op: RedirectOp, file: impl Into<String>, pos: Position) -> Self {
        Self { op, file: file.into(), fd: 1, pos }
    }

    pub fn with_fd(mut self, fd: u32) -> Self {
        self.fd = fd;
        self
    }
}

// =============================================================================
// SCRIPT & STATEMENT NODES
// =============================================================================

/// Root node: an ordered sequence of statements.
///
/// Every parse produces a `ScriptNode`, and control-flow bodies are
/// nested scripts (possibly empty, never absent).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScriptNode {
    pub nodes: Vec<Node>,
}

impl ScriptNode {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn empty() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// A single external command invocation: name, arguments, and an
/// optional redirection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandNode {
    pub name: String,
    pub args: Vec<String>,
    pub redirect: Option<RedirectNode>,
    pub pos: Position,
}

impl CommandNode {
    pub fn new(name: impl Into<String>, args: Vec<String>, pos: Position) -> Self {
        Self { name: name.into(), args, redirect: None, pos }
    }

    pub fn with_redirect(mut self, redirect: RedirectNode) -> Self {
        self.redirect = Some(redirect);
        self
    }
}

/// A binary pipe: left's stdout feeds right's stdin.
///
/// Chains of N commands are represented as a left-leaning binary tree,
/// so `a | b | c` parses as `Pipe(Pipe(a, b), c)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeNode {
    pub left: Box<Node>,
    pub right: Box<Node>,
    pub pos: Position,
}

/// Short-circuit chain used by both `&&` and `||`; the enclosing
/// `Node` variant carries which operator it is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainNode {
    pub left: Box<Node>,
    pub right: Box<Node>,
    pub pos: Position,
}

/// Scalar variable binding. The value is kept as unexpanded source
/// text until the engine evaluates the assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentNode {
    pub name: String,
    pub value: String,
    pub pos: Position,
}

/// Array-valued binding: `name=(a b c)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayNode {
    pub name: String,
    pub values: Vec<String>,
    pub pos: Position,
}

/// `if condition; then ...; else ...; fi`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfNode {
    pub condition: Box<Node>,
    pub then_body: ScriptNode,
    pub else_body: Option<ScriptNode>,
    pub pos: Position,
}

/// `for variable in list; do ...; done`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForNode {
    pub variable: String,
    pub list: Vec<String>,
    pub body: ScriptNode,
    pub pos: Position,
}

/// `while condition; do ...; done`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhileNode {
    pub condition: Box<Node>,
    pub body: ScriptNode,
    pub pos: Position,
}

/// Named, re-enterable script fragment. Registered by the engine when
/// encountered; only executed when called by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionNode {
    pub name: String,
    pub body: ScriptNode,
    pub pos: Position,
}

/// Wraps any node for non-blocking execution (`... &`).
/// A `Background` never wraps another `Background`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundNode {
    pub command: Box<Node>,
    pub pos: Position,
}

/// A command fed by an inline heredoc body (`cmd <<MARKER ... MARKER`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeredocNode {
    pub command: Box<Node>,
    pub start_marker: String,
    pub body: String,
    pub end_marker: String,
    pub pos: Position,
}

/// `$(...)` or backticks standing alone as a statement, evaluated to
/// its captured stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSubstitutionNode {
    pub command: ScriptNode,
    pub pos: Position,
}

/// `@Name` / `@Name(value)` metadata attached to the following
/// statement. Annotations are hints (e.g. for the performance layer)
/// and execute as no-ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationNode {
    pub name: String,
    pub value: Option<String>,
    pub pos: Position,
}

// =============================================================================
// NODE UNION
// =============================================================================

/// Closed union of all statement node kinds.
///
/// Consumers (parsers, sandbox, engine, optimizer) match exhaustively
/// on this enum, so adding a variant is a compile error everywhere a
/// node can flow -- no kind can silently fall through to a default arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Command(CommandNode),
    Pipe(PipeNode),
    And(ChainNode),
    Or(ChainNode),
    Assignment(AssignmentNode),
    Array(ArrayNode),
    If(IfNode),
    For(ForNode),
    While(WhileNode),
    Function(FunctionNode),
    Background(BackgroundNode),
    Heredoc(HeredocNode),
    CommandSubstitution(CommandSubstitutionNode),
    Annotation(AnnotationNode),
}

impl Node {
    /// Source position of this node.
    pub fn position(&self) -> Position {
        match self {
            Node::Command(n) => n.pos,
            Node::Pipe(n) => n.pos,
            Node::And(n) => n.pos,
            Node::Or(n) => n.pos,
            Node::Assignment(n) => n.pos,
            Node::Array(n) => n.pos,
            Node::If(n) => n.pos,
            Node::For(n) => n.pos,
            Node::While(n) => n.pos,
            Node::Function(n) => n.pos,
            Node::Background(n) => n.pos,
            Node::Heredoc(n) => n.pos,
            Node::CommandSubstitution(n) => n.pos,
            Node::Annotation(n) => n.pos,
        }
    }

    /// Stable name of the node kind, used in logs and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Command(_) => "command",
            Node::Pipe(_) => "pipe",
            Node::And(_) => "and",
            Node::Or(_) => "or",
            Node::Assignment(_) => "assignment",
            Node::Array(_) => "array",
            Node::If(_) => "if",
            Node::For(_) => "for",
            Node::While(_) => "while",
            Node::Function(_) => "function",
            Node::Background(_) => "background",
            Node::Heredoc(_) => "heredoc",
            Node::CommandSubstitution(_) => "command_substitution",
            Node::Annotation(_) => "annotation",
        }
    }

    /// Number of simple commands this node resolves to. A pipe must
    /// resolve to at least two.
    pub fn command_count(&self) -> usize {
        match self {
            Node::Command(_) => 1,
            Node::Pipe(n) => n.left.command_count() + n.right.command_count(),
            Node::And(n) | Node::Or(n) => n.left.command_count() + n.right.command_count(),
            Node::Background(n) => n.command.command_count(),
            Node::Heredoc(n) => n.command.command_count(),
            Node::Assignment(_)
            | Node::Array(_)
            | Node::If(_)
            | Node::For(_)
            | Node::While(_)
            | Node::Function(_)
            | Node::CommandSubstitution(_)
            | Node::Annotation(_) => 0,
        }
    }
}

// =============================================================================
// STRUCTURAL VALIDATION
// =============================================================================

/// Check the structural invariants of a parsed script:
/// positions non-decreasing across a depth-first traversal, pipes
/// resolving to at least two commands, and no nested `Background`.
///
/// Parsers uphold these by construction; this is used by tests and by
/// the cache when deserializing persisted entries.
pub fn validate(script: &ScriptNode) -> Result<(), String> {
    let mut last_offset = 0usize;
    for node in &script.nodes {
        validate_node(node, &mut last_offset)?;
    }
    Ok(())
}

fn validate_node(node: &Node, last_offset: &mut usize) -> Result<(), String> {
    let pos = node.position();
    if pos.offset < *last_offset {
        return Err(format!(
            "position went backwards at {} ({} < {})",
            pos, pos.offset, last_offset
        ));
    }
    *last_offset = pos.offset;

    match node {
        Node::Pipe(n) => {
            if node.command_count() < 2 {
                return Err(format!("pipe at {} resolves to fewer than 2 commands", pos));
            }
            validate_node(&n.left, last_offset)?;
            validate_node(&n.right, last_offset)?;
        }
        Node::And(n) | Node::Or(n) => {
            validate_node(&n.left, last_offset)?;
            validate_node(&n.right, last_offset)?;
        }
        Node::Background(n) => {
            if matches!(*n.command, Node::Background(_)) {
                return Err(format!("background node at {} wraps another background", pos));
            }
            validate_node(&n.command, last_offset)?;
        }
        Node::Heredoc(n) => validate_node(&n.command, last_offset)?,
        Node::If(n) => {
            validate_node(&n.condition, last_offset)?;
            for child in &n.then_body.nodes {
                validate_node(child, last_offset)?;
            }
            if let Some(else_body) = &n.else_body {
                for child in &else_body.nodes {
                    validate_node(child, last_offset)?;
                }
            }
        }
        Node::For(n) => {
            for child in &n.body.nodes {
                validate_node(child, last_offset)?;
            }
        }
        Node::While(n) => {
            validate_node(&n.condition, last_offset)?;
            for child in &n.body.nodes {
                validate_node(child, last_offset)?;
            }
        }
        Node::Function(n) => {
            for child in &n.body.nodes {
                validate_node(child, last_offset)?;
            }
        }
        Node::CommandSubstitution(n) => {
            for child in &n.command.nodes {
                validate_node(child, last_offset)?;
            }
        }
        Node::Command(_) | Node::Assignment(_) | Node::Array(_) | Node::Annotation(_) => {}
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(name: &str, offset: usize) -> Node {
        Node::Command(CommandNode::new(
            name,
            vec![],
            Position::new(1, offset + 1, offset),
        ))
    }

    #[test]
    fn test_position_display() {
        let pos = Position::new(3, 7, 42);
        assert_eq!(pos.to_string(), "3:7");
    }

    #[test]
    fn test_redirect_defaults_to_stdout() {
        let r = RedirectNode::new(RedirectOp::Write, "out.txt", Position::default());
        assert_eq!(r.fd, 1);
        assert_eq!(r.op.as_str(), ">");
    }

    #[test]
    fn test_command_count_through_pipe() {
        let pipe = Node::Pipe(PipeNode {
            left: Box::new(Node::Pipe(PipeNode {
                left: Box::new(cmd("a", 0)),
                right: Box::new(cmd("b", 4)),
                pos: Position::new(1, 1, 0),
            })),
            right: Box::new(cmd("c", 8)),
            pos: Position::new(1, 1, 0),
        });
        assert_eq!(pipe.command_count(), 3);
    }

    #[test]
    fn test_validate_accepts_well_formed_script() {
        let script = ScriptNode::new(vec![cmd("echo", 0), cmd("ls", 10)]);
        assert!(validate(&script).is_ok());
    }

    #[test]
    fn test_validate_rejects_nested_background() {
        let inner = BackgroundNode {
            command: Box::new(cmd("sleep", 0)),
            pos: Position::new(1, 1, 0),
        };
        let outer = Node::Background(BackgroundNode {
            command: Box::new(Node::Background(inner)),
            pos: Position::new(1, 1, 0),
        });
        let script = ScriptNode::new(vec![outer]);
        assert!(validate(&script).is_err());
    }

    #[test]
    fn test_validate_rejects_backwards_positions() {
        let script = ScriptNode::new(vec![cmd("b", 10), cmd("a", 2)]);
        assert!(validate(&script).is_err());
    }

    #[test]
    fn test_node_kind_names() {
        assert_eq!(cmd("x", 0).kind(), "command");
        let a = Node::Annotation(AnnotationNode {
            name: "Parallel".to_string(),
            value: None,
            pos: Position::default(),
        });
        assert_eq!(a.kind(), "annotation");
    }

    #[test]
    fn test_ast_serde_round_trip() {
        let script = ScriptNode::new(vec![
            Node::Assignment(AssignmentNode {
                name: "X".to_string(),
                value: "1".to_string(),
                pos: Position::new(1, 1, 0),
            }),
            cmd("echo", 6),
        ]);
        let json = serde_json::to_string(&script).unwrap();
        let back: ScriptNode = serde_json::from_str(&json).unwrap();
        assert_eq!(script, back);
    }
}

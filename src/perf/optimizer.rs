//! AST Optimization Passes
//!
//! Compile-time rewrites applied before a script enters the cache:
//! dead-code elimination, constant folding of literal concatenations,
//! and a conservative function-inlining pass. Every pass preserves
//! observable semantics; a pass only reports itself when it changed
//! the tree.

use serde::{Deserialize, Serialize};

use crate::ast::types::{AssignmentNode, Node, ScriptNode};
use crate::interpreter::expansion::{split_concat, Segment};

/// Which passes run. All on by default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub dead_code_elimination: bool,
    pub constant_folding: bool,
    pub function_inlining: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            dead_code_elimination: true,
            constant_folding: true,
            function_inlining: true,
        }
    }
}

/// Result of an optimization run.
#[derive(Debug, Clone)]
pub struct OptimizationReport {
    pub script: ScriptNode,
    /// Names of passes that changed the tree
    pub applied: Vec<String>,
}

/// The pass pipeline.
#[derive(Debug, Clone, Default)]
pub struct Optimizer {
    config: OptimizerConfig,
}

impl Optimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn optimize(&self, script: ScriptNode) -> OptimizationReport {
        let mut script = script;
        let mut applied = Vec::new();

        if self.config.dead_code_elimination {
            let mut changed = false;
            script = eliminate_dead_code(script, &mut changed);
            if changed {
                applied.push("dead_code_elimination".to_string());
            }
        }

        if self.config.constant_folding {
            let mut changed = false;
            script = fold_constants(script, &mut changed);
            if changed {
                applied.push("constant_folding".to_string());
            }
        }

        if self.config.function_inlining {
            let mut changed = false;
            script = inline_functions(script, &mut changed);
            if changed {
                applied.push("function_inlining".to_string());
            }
        }

        OptimizationReport { script, applied }
    }
}

// ---------------------------------------------------------------------------
// Dead-code elimination
// ---------------------------------------------------------------------------

/// Drop no-op `:` statements (except in final position, which decides
/// the script's exit code) and empty `else` branches.
fn eliminate_dead_code(script: ScriptNode, changed: &mut bool) -> ScriptNode {
    let len = script.nodes.len();
    let mut nodes = Vec::with_capacity(len);
    for (i, node) in script.nodes.into_iter().enumerate() {
        let is_last = i + 1 == len;
        if !is_last && is_noop(&node) {
            *changed = true;
            continue;
        }
        nodes.push(dead_code_in_node(node, changed));
    }
    ScriptNode::new(nodes)
}

fn is_noop(node: &Node) -> bool {
    match node {
        Node::Command(c) => c.name == ":" && c.args.is_empty() && c.redirect.is_none(),
        _ => false,
    }
}

fn dead_code_in_node(node: Node, changed: &mut bool) -> Node {
    match node {
        Node::If(mut n) => {
            n.then_body = eliminate_dead_code(n.then_body, changed);
            n.else_body = match n.else_body {
                Some(body) if body.is_empty() => {
                    *changed = true;
                    None
                }
                Some(body) => Some(eliminate_dead_code(body, changed)),
                None => None,
            };
            Node::If(n)
        }
        Node::For(mut n) => {
            n.body = eliminate_dead_code(n.body, changed);
            Node::For(n)
        }
        Node::While(mut n) => {
            n.body = eliminate_dead_code(n.body, changed);
            Node::While(n)
        }
        Node::Function(mut n) => {
            n.body = eliminate_dead_code(n.body, changed);
            Node::Function(n)
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Constant folding
// ---------------------------------------------------------------------------

/// Fold assignment values whose `+` concatenation is made only of
/// quoted literals; nothing variable-dependent is touched.
fn fold_constants(script: ScriptNode, changed: &mut bool) -> ScriptNode {
    let nodes = script
        .nodes
        .into_iter()
        .map(|node| fold_node(node, changed))
        .collect();
    ScriptNode::new(nodes)
}

fn fold_node(node: Node, changed: &mut bool) -> Node {
    match node {
        Node::Assignment(a) => {
            if let Some(folded) = fold_literal_concat(&a.value) {
                *changed = true;
                Node::Assignment(AssignmentNode {
                    value: folded,
                    ..a
                })
            } else {
                Node::Assignment(a)
            }
        }
        Node::If(mut n) => {
            n.then_body = fold_constants(n.then_body, changed);
            n.else_body = n.else_body.map(|b| fold_constants(b, changed));
            Node::If(n)
        }
        Node::For(mut n) => {
            n.body = fold_constants(n.body, changed);
            Node::For(n)
        }
        Node::While(mut n) => {
            n.body = fold_constants(n.body, changed);
            Node::While(n)
        }
        Node::Function(mut n) => {
            n.body = fold_constants(n.body, changed);
            Node::Function(n)
        }
        other => other,
    }
}

fn fold_literal_concat(value: &str) -> Option<String> {
    let segments = split_concat(value)?;
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Quoted(literal) => out.push_str(&literal),
            Segment::Bare(_) => return None, // variable-dependent
        }
    }
    // Only fold when the result needs no quoting to survive the
    // runtime expansion pipeline unchanged.
    if out.contains(['$', '`', '+', '"', '\'']) {
        return None;
    }
    Some(out)
}

// ---------------------------------------------------------------------------
// Function inlining
// ---------------------------------------------------------------------------

/// Replace argument-less calls to single-command functions with the
/// body command. Only applies when exactly one definition of the name
/// exists at the top level, so redefinition cannot change behavior.
fn inline_functions(script: ScriptNode, changed: &mut bool) -> ScriptNode {
    use std::collections::HashMap;

    let mut bodies: HashMap<String, Option<Node>> = HashMap::new();
    for node in &script.nodes {
        if let Node::Function(f) = node {
            let candidate = match f.body.nodes.as_slice() {
                [single @ Node::Command(c)] if c.redirect.is_none() => Some(single.clone()),
                _ => None,
            };
            bodies
                .entry(f.name.clone())
                .and_modify(|e| *e = None) // redefined: never inline
                .or_insert(candidate);
        }
    }

    let nodes = script
        .nodes
        .into_iter()
        .map(|node| match &node {
            Node::Command(c) if c.args.is_empty() && c.redirect.is_none() => {
                match bodies.get(&c.name) {
                    Some(Some(body)) => {
                        *changed = true;
                        body.clone()
                    }
                    _ => node,
                }
            }
            _ => node,
        })
        .collect();
    ScriptNode::new(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::grammar::parse;

    #[test]
    fn test_noop_colon_removed_except_last() {
        let script = parse(":\necho real\n:").unwrap();
        let report = Optimizer::new().optimize(script);
        assert!(report.applied.contains(&"dead_code_elimination".to_string()));
        assert_eq!(report.script.nodes.len(), 2); // echo + trailing :
    }

    #[test]
    fn test_literal_concat_folded() {
        let script = parse(r#"MSG="hello "+"world""#).unwrap();
        let report = Optimizer::new().optimize(script);
        assert!(report.applied.contains(&"constant_folding".to_string()));
        match &report.script.nodes[0] {
            Node::Assignment(a) => assert_eq!(a.value, "hello world"),
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_variable_concat_not_folded() {
        let script = parse(r#"MSG="hello "+NAME"#).unwrap();
        let report = Optimizer::new().optimize(script);
        assert!(!report.applied.contains(&"constant_folding".to_string()));
    }

    #[test]
    fn test_single_command_function_inlined() {
        let script = parse("ping() {\n  echo pong\n}\nping").unwrap();
        let report = Optimizer::new().optimize(script);
        assert!(report.applied.contains(&"function_inlining".to_string()));
        let inlined = report
            .script
            .nodes
            .iter()
            .any(|n| matches!(n, Node::Command(c) if c.name == "echo"));
        assert!(inlined);
    }

    #[test]
    fn test_call_with_args_not_inlined() {
        let script = parse("ping() {\n  echo pong\n}\nping now").unwrap();
        let report = Optimizer::new().optimize(script);
        assert!(!report.applied.contains(&"function_inlining".to_string()));
    }

    #[test]
    fn test_clean_script_reports_no_passes() {
        let script = parse("echo a\necho b").unwrap();
        let report = Optimizer::new().optimize(script);
        assert!(report.applied.is_empty());
        assert_eq!(report.script.nodes.len(), 2);
    }
}

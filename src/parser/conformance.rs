//! Parser Conformance Suite
//!
//! The two parser implementations promise structurally equivalent ASTs
//! for the syntax subset they both support: simple commands with
//! quoting, pipelines, assignments, arrays, background jobs,
//! annotations, and function definitions. That promise is expressed
//! here as one suite run against both implementations instead of
//! relying on incidental code similarity.

use crate::ast::types::{Node, ScriptNode};
use crate::parser::types::ParseException;

type ParseFn = fn(&str) -> Result<ScriptNode, ParseException>;

/// Strip position info so structural equality ignores the parsers'
/// (slightly different) column bookkeeping.
fn shape(node: &Node) -> String {
    match node {
        Node::Command(c) => format!("cmd({} {:?})", c.name, c.args),
        Node::Pipe(p) => format!("pipe({},{})", shape(&p.left), shape(&p.right)),
        Node::And(c) => format!("and({},{})", shape(&c.left), shape(&c.right)),
        Node::Or(c) => format!("or({},{})", shape(&c.left), shape(&c.right)),
        Node::Assignment(a) => format!("assign({}={})", a.name, a.value),
        Node::Array(a) => format!("array({}={:?})", a.name, a.values),
        Node::If(_) => "if".to_string(),
        Node::For(_) => "for".to_string(),
        Node::While(_) => "while".to_string(),
        Node::Function(f) => format!(
            "fn({};{})",
            f.name,
            f.body.nodes.iter().map(shape).collect::<Vec<_>>().join(";")
        ),
        Node::Background(b) => format!("bg({})", shape(&b.command)),
        Node::Heredoc(h) => format!("heredoc({})", shape(&h.command)),
        Node::CommandSubstitution(_) => "subst".to_string(),
        Node::Annotation(a) => format!("ann({}={:?})", a.name, a.value),
    }
}

fn shapes(script: &ScriptNode) -> Vec<String> {
    script.nodes.iter().map(shape).collect()
}

fn assert_both_parse(parse: ParseFn, source: &str, expected: &[&str]) {
    let script = parse(source).expect("conformance source must parse");
    assert_eq!(
        shapes(&script),
        expected.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        "shape mismatch for source: {:?}",
        source
    );
}

/// Run the full conformance suite against one parser implementation.
pub fn run_suite(parse: ParseFn) {
    // Simple command with quote stripping
    assert_both_parse(
        parse,
        r#"echo "hello world" 'x y'"#,
        &[r#"cmd(echo ["hello world", "x y"])"#],
    );

    // First token is the name, rest are args
    assert_both_parse(parse, "ls -la /tmp", &[r#"cmd(ls ["-la", "/tmp"])"#]);

    // Pipelines lean left
    assert_both_parse(
        parse,
        "a | b | c",
        &[r#"pipe(pipe(cmd(a []),cmd(b [])),cmd(c []))"#],
    );

    // Assignment, including '=' inside quotes
    assert_both_parse(parse, "GREETING=hello", &["assign(GREETING=hello)"]);
    assert_both_parse(parse, r#"NAME="a=b""#, &["assign(NAME=a=b)"]);

    // Arrays
    assert_both_parse(
        parse,
        "colors=(red green blue)",
        &[r#"array(colors=["red", "green", "blue"])"#],
    );

    // Background
    assert_both_parse(parse, "sleep 3 &", &["bg(cmd(sleep [\"3\"]))"]);

    // Annotations attach ahead of the following statement
    assert_both_parse(
        parse,
        "@Cache(on)\necho hi",
        &[r#"ann(Cache=Some("on"))"#, r#"cmd(echo ["hi"])"#],
    );

    // Function definitions
    assert_both_parse(
        parse,
        "greet() {\n  echo hi\n}",
        &[r#"fn(greet;cmd(echo ["hi"]))"#],
    );

    // Comment and blank-line skipping with stable line numbers
    let script = parse("# c\n\necho one\n\necho two\n").unwrap();
    assert_eq!(script.nodes.len(), 2);
    assert_eq!(script.nodes[0].position().line, 3);
    assert_eq!(script.nodes[1].position().line, 5);
}

mod tests {
    use super::run_suite;

    #[test]
    fn test_grammar_parser_conformance() {
        run_suite(crate::parser::grammar::parse);
    }

    #[test]
    fn test_line_parser_conformance() {
        run_suite(crate::parser::line::parse);
    }
}

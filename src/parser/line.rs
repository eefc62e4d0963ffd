//! Fallback Line-Oriented Parser
//!
//! A degradation-tolerant parser that needs no grammar: it walks the
//! source line by line and recognizes commands, pipelines, background
//! jobs, assignments, arrays, annotations, and brace-delimited function
//! blocks. Anything it cannot interpret simply produces fewer nodes --
//! unlike the grammar-driven parser it never reports a hard error for
//! script content. Only an unreadable file fails `parse_file`.

use crate::ast::types::{
    AnnotationNode, ArrayNode, AssignmentNode, BackgroundNode, CommandNode,
    CommandSubstitutionNode, FunctionNode, Node, PipeNode, Position, ScriptNode,
};
use crate::parser::lexer::is_valid_name;
use crate::parser::types::{find_unquoted, rfind_unquoted, ParseException};

/// One source line with its absolute location.
#[derive(Debug, Clone, Copy)]
struct SourceLine<'a> {
    text: &'a str,
    number: usize,
    offset: usize,
}

/// Parse a source string. Never fails on script content; an empty or
/// fully uninterpretable source yields an empty script.
pub fn parse(source: &str) -> Result<ScriptNode, ParseException> {
    let mut lines = Vec::new();
    let mut offset = 0;
    for (i, text) in source.lines().enumerate() {
        lines.push(SourceLine { text, number: i + 1, offset });
        offset += text.len() + 1;
    }
    Ok(ScriptNode::new(parse_lines(&lines)))
}

/// Read a file and parse its contents.
pub fn parse_file(path: &str) -> Result<ScriptNode, ParseException> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| ParseException::new(format!("cannot read {}: {}", path, e), 0, 0))?;
    parse(&source)
}

fn parse_lines(lines: &[SourceLine<'_>]) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.text.trim();

        // Blank lines and full-line comments
        if trimmed.is_empty() || trimmed.starts_with('#') {
            i += 1;
            continue;
        }

        let pos = position_of(line);

        // Annotation attached to the following statement
        if trimmed.starts_with('@') {
            if let Some(node) = parse_annotation(trimmed, pos) {
                nodes.push(node);
            }
            i += 1;
            continue;
        }

        // Multi-line function block, found by counting braces
        if let Some(name) = function_header_name(trimmed) {
            let (body_nodes, consumed) = collect_function_body(lines, i);
            nodes.push(Node::Function(FunctionNode {
                name,
                body: ScriptNode::new(body_nodes),
                pos,
            }));
            i += consumed;
            continue;
        }

        if let Some(node) = parse_statement_line(trimmed, pos) {
            nodes.push(node);
        }
        i += 1;
    }

    nodes
}

fn position_of(line: SourceLine<'_>) -> Position {
    let indent = line.text.len() - line.text.trim_start().len();
    Position::new(line.number, indent + 1, line.offset + indent)
}

/// `@Name` or `@Name(value)`
fn parse_annotation(text: &str, pos: Position) -> Option<Node> {
    let raw = &text[1..];
    let (name, value) = match raw.find('(') {
        Some(idx) if raw.ends_with(')') => {
            let inner = raw[idx + 1..raw.len() - 1].trim();
            (
                raw[..idx].to_string(),
                if inner.is_empty() { None } else { Some(inner.to_string()) },
            )
        }
        _ => (raw.to_string(), None),
    };
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some(Node::Annotation(AnnotationNode { name, value, pos }))
}

/// Returns the function name when the line opens a function block:
/// `function name(args) {` or `name() {`.
fn function_header_name(text: &str) -> Option<String> {
    if !text.ends_with('{') {
        return None;
    }
    let head = text[..text.len() - 1].trim();
    let head = head.strip_suffix("()").unwrap_or(head);
    if let Some(rest) = head.strip_prefix("function ") {
        let name = match rest.find('(') {
            Some(idx) => &rest[..idx],
            None => rest,
        };
        let name = name.trim();
        if is_valid_name(name) {
            return Some(name.to_string());
        }
        return None;
    }
    // name() { form: the "()" suffix was stripped above
    if text[..text.len() - 1].trim().ends_with(')') || head != text[..text.len() - 1].trim() {
        let name = head.trim();
        if is_valid_name(name) {
            return Some(name.to_string());
        }
    }
    None
}

/// Collect the body of a function block by counting unquoted braces.
/// Returns the parsed body and the number of lines consumed.
fn collect_function_body(lines: &[SourceLine<'_>], start: usize) -> (Vec<Node>, usize) {
    let mut depth = brace_delta(lines[start].text);
    let mut body_lines = Vec::new();
    let mut i = start + 1;

    while i < lines.len() && depth > 0 {
        let delta = brace_delta(lines[i].text);
        if depth + delta <= 0 && lines[i].text.trim() == "}" {
            depth += delta;
            i += 1;
            break;
        }
        depth += delta;
        if depth <= 0 {
            i += 1;
            break;
        }
        body_lines.push(lines[i]);
        i += 1;
    }

    (parse_lines(&body_lines), i - start)
}

/// Net change in unquoted brace depth for a line.
fn brace_delta(text: &str) -> i32 {
    let mut delta = 0;
    let mut in_single = false;
    let mut in_double = false;
    for ch in text.chars() {
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '{' if !in_single && !in_double => delta += 1,
            '}' if !in_single && !in_double => delta -= 1,
            _ => {}
        }
    }
    delta
}

/// Parse one statement line into a node.
fn parse_statement_line(text: &str, pos: Position) -> Option<Node> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Trailing unquoted & runs the statement in the background.
    if trimmed.ends_with('&') && !trimmed.ends_with("&&") && rfind_unquoted(trimmed, '&').map(|i| i == trimmed.len() - 1).unwrap_or(false)
    {
        let inner = trimmed[..trimmed.len() - 1].trim_end();
        let command = parse_statement_line(inner, pos)?;
        if matches!(command, Node::Background(_)) {
            return Some(command);
        }
        return Some(Node::Background(BackgroundNode {
            command: Box::new(command),
            pos,
        }));
    }

    // Unquoted pipe: split at the last one so chains lean left.
    if let Some(idx) = rfind_unquoted(trimmed, '|') {
        // `||` is not a pipe; the fallback parser does not interpret it.
        let is_logical = trimmed[..idx].ends_with('|')
            || trimmed[idx + 1..].starts_with('|');
        if !is_logical {
            let left = parse_statement_line(trimmed[..idx].trim(), pos)?;
            let right = parse_statement_line(trimmed[idx + 1..].trim(), pos)?;
            return Some(Node::Pipe(PipeNode {
                left: Box::new(left),
                right: Box::new(right),
                pos,
            }));
        }
    }

    // Top-level unquoted '=' makes an assignment, provided the left
    // side is a valid variable name.
    if let Some(idx) = find_unquoted(trimmed, '=') {
        let name = trimmed[..idx].trim();
        if is_valid_name(name) {
            let raw_value = trimmed[idx + 1..].trim();
            // Array literal: name=(a b c)
            if raw_value.starts_with('(') && raw_value.ends_with(')') {
                let inner = &raw_value[1..raw_value.len() - 1];
                return Some(Node::Array(ArrayNode {
                    name: name.to_string(),
                    values: crate::parser::types::tokenize_quoted(inner),
                    pos,
                }));
            }
            return Some(Node::Assignment(AssignmentNode {
                name: name.to_string(),
                value: strip_outer_quotes(raw_value),
                pos,
            }));
        }
    }

    // A statement that is a single substitution
    if (trimmed.starts_with("$(") && trimmed.ends_with(')'))
        || (trimmed.starts_with('`') && trimmed.ends_with('`') && trimmed.len() >= 2)
    {
        let inner = if trimmed.starts_with("$(") {
            &trimmed[2..trimmed.len() - 1]
        } else {
            &trimmed[1..trimmed.len() - 1]
        };
        let command = parse(inner).unwrap_or_else(|_| ScriptNode::empty());
        return Some(Node::CommandSubstitution(CommandSubstitutionNode { command, pos }));
    }

    // Plain command: whitespace tokens with quotes honored.
    let tokens = tokenize_command_line(trimmed);
    let mut iter = tokens.into_iter();
    let name = iter.next()?;
    Some(Node::Command(CommandNode::new(name, iter.collect(), pos)))
}

/// Strip one layer of surrounding quotes when they wrap the whole
/// value; anything else stays as unexpanded source text.
fn strip_outer_quotes(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            let inner = &value[1..value.len() - 1];
            if !inner.contains(first as char) {
                return inner.to_string();
            }
        }
    }
    value.to_string()
}

/// Tokenize a command line by whitespace, honoring quotes. Quote
/// characters are stripped, except in tokens carrying an unquoted `+`
/// concatenation, which the expansion phase resolves segment by
/// segment and therefore needs intact.
fn tokenize_command_line(input: &str) -> Vec<String> {
    let mut raw_tokens = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut saw_any = false;

    for ch in input.chars() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(ch);
                saw_any = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(ch);
                saw_any = true;
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if saw_any {
                    raw_tokens.push(std::mem::take(&mut current));
                    saw_any = false;
                }
            }
            c => {
                current.push(c);
                saw_any = true;
            }
        }
    }
    if saw_any {
        raw_tokens.push(current);
    }

    raw_tokens
        .into_iter()
        .map(|raw| {
            if find_unquoted(&raw, '+').is_some() {
                raw // expansion resolves the segments
            } else {
                remove_quotes(&raw)
            }
        })
        .collect()
}

fn remove_quotes(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut in_single = false;
    let mut in_double = false;
    for ch in token.chars() {
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            c => out.push(c),
        }
    }
    out
}

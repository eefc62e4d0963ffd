//! Parser Types and Constants
//!
//! Shared types and limits used by both parser implementations.

use std::fmt;
use thiserror::Error;

// Parser limits to prevent hangs and resource exhaustion
pub const MAX_INPUT_SIZE: usize = 1_000_000; // 1MB max input
pub const MAX_TOKENS: usize = 100_000; // Max tokens to parse
pub const MAX_PARSE_ITERATIONS: usize = 1_000_000; // Max iterations in parsing loops
pub const MAX_PARSER_DEPTH: usize = 200; // Max recursion depth for nested constructs

/// Error raised when a source cannot be parsed.
///
/// The grammar-driven parser raises this for unreadable input; the
/// fallback line parser only raises it from `parse_file` when the file
/// itself cannot be read.
#[derive(Debug, Clone, Error)]
pub struct ParseException {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for ParseException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at {}:{}: {}", self.line, self.column, self.message)
    }
}

impl ParseException {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self { message: message.into(), line, column }
    }
}

/// Split a string on a separator character, honoring single and double
/// quotes. The separator must be unquoted to count. Quote characters
/// are preserved in the returned segments.
pub fn split_unquoted(input: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;

    for ch in input.chars() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(ch);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(ch);
            }
            c if c == sep && !in_single && !in_double => {
                parts.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// Find the byte index of the first unquoted occurrence of `needle`.
pub fn find_unquoted(input: &str, needle: char) -> Option<usize> {
    let mut in_single = false;
    let mut in_double = false;
    for (i, ch) in input.char_indices() {
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            c if c == needle && !in_single && !in_double => return Some(i),
            _ => {}
        }
    }
    None
}

/// Find the byte index of the last unquoted occurrence of `needle`.
pub fn rfind_unquoted(input: &str, needle: char) -> Option<usize> {
    let mut in_single = false;
    let mut in_double = false;
    let mut found = None;
    for (i, ch) in input.char_indices() {
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            c if c == needle && !in_single && !in_double => found = Some(i),
            _ => {}
        }
    }
    found
}

/// Tokenize a command line by whitespace, honoring single and double
/// quotes. Quote characters are stripped from the returned tokens;
/// `+`-concatenation markers survive untouched for the expansion phase.
pub fn tokenize_quoted(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut saw_any = false;

    for ch in input.chars() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
                saw_any = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                saw_any = true;
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if saw_any {
                    tokens.push(std::mem::take(&mut current));
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
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_unquoted_respects_quotes() {
        let parts = split_unquoted(r#"echo "a|b" | grep a"#, '|');
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].trim(), r#"echo "a|b""#);
        assert_eq!(parts[1].trim(), "grep a");
    }

    #[test]
    fn test_find_unquoted_skips_quoted() {
        assert_eq!(find_unquoted(r#"'=' x=1"#, '='), Some(6));
        assert_eq!(find_unquoted(r#""a=b""#, '='), None);
    }

    #[test]
    fn test_rfind_unquoted() {
        assert_eq!(rfind_unquoted("a | b | c", '|'), Some(6));
    }

    #[test]
    fn test_tokenize_quoted_strips_quotes() {
        let toks = tokenize_quoted(r#"echo "hello world" 'x y' plain"#);
        assert_eq!(toks, vec!["echo", "hello world", "x y", "plain"]);
    }

    #[test]
    fn test_tokenize_quoted_empty_string_token() {
        let toks = tokenize_quoted(r#"echo """#);
        assert_eq!(toks, vec!["echo", ""]);
    }
}

//! Word Expansion
//!
//! Pure helpers for the engine's argument/value expansion pipeline:
//! locating command substitutions, splitting `+` concatenations, and
//! replacing `${NAME}` / `$NAME` references. The recursive execution
//! half of substitution lives in the engine, which owns the scope.

use crate::parser::lexer::is_valid_name;

/// One `$(...)`/backtick occurrence inside a string.
#[derive(Debug, Clone, PartialEq)]
pub struct SubstitutionSite {
    /// Byte range of the whole `$(...)` / `` `...` `` expression
    pub start: usize,
    pub end: usize,
    /// The inner script text
    pub inner: String,
}

/// Find the first command substitution in `input`, honoring nesting
/// inside `$(...)`.
pub fn find_substitution(input: &str) -> Option<SubstitutionSite> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'(' {
            let mut depth = 0;
            let mut j = i + 1;
            while j < bytes.len() {
                match bytes[j] {
                    b'(' => depth += 1,
                    b')' => {
                        depth -= 1;
                        if depth == 0 {
                            return Some(SubstitutionSite {
                                start: i,
                                end: j + 1,
                                inner: input[i + 2..j].to_string(),
                            });
                        }
                    }
                    _ => {}
                }
                j += 1;
            }
            return None; // unbalanced: leave as-is
        }
        if bytes[i] == b'`' {
            if let Some(close) = input[i + 1..].find('`') {
                let j = i + 1 + close;
                return Some(SubstitutionSite {
                    start: i,
                    end: j + 1,
                    inner: input[i + 1..j].to_string(),
                });
            }
            return None;
        }
        i += 1;
    }
    None
}

/// A `+`-concatenation segment.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Quoted literal, quotes stripped
    Quoted(String),
    /// Bare token, resolved as a variable name at expansion time
    Bare(String),
}

/// Split on unquoted `+`. Returns None when the string carries no
/// unquoted `+`, so plain arguments skip this step entirely.
pub fn split_concat(input: &str) -> Option<Vec<Segment>> {
    let mut has_plus = false;
    let mut in_single = false;
    let mut in_double = false;
    for ch in input.chars() {
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '+' if !in_single && !in_double => has_plus = true,
            _ => {}
        }
    }
    if !has_plus {
        return None;
    }

    // Each kept character remembers whether it sat inside quotes, so
    // whitespace around a `+` can be trimmed without touching spaces
    // that belong to a quoted literal.
    let mut segments = Vec::new();
    let mut current: Vec<(char, bool)> = Vec::new();
    let mut saw_quote = false;
    in_single = false;
    in_double = false;
    for ch in input.chars() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
                saw_quote = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                saw_quote = true;
            }
            '+' if !in_single && !in_double => {
                segments.push(finish_segment(std::mem::take(&mut current), saw_quote));
                saw_quote = false;
            }
            c => current.push((c, in_single || in_double)),
        }
    }
    segments.push(finish_segment(current, saw_quote));
    Some(segments)
}

fn finish_segment(chars: Vec<(char, bool)>, saw_quote: bool) -> Segment {
    if saw_quote {
        // Strip whitespace outside the quotes, keep everything inside.
        let start = chars
            .iter()
            .position(|(c, quoted)| *quoted || !c.is_whitespace())
            .unwrap_or(chars.len());
        let end = chars
            .iter()
            .rposition(|(c, quoted)| *quoted || !c.is_whitespace())
            .map(|i| i + 1)
            .unwrap_or(start);
        Segment::Quoted(chars[start..end].iter().map(|(c, _)| c).collect())
    } else {
        let text: String = chars.into_iter().map(|(c, _)| c).collect();
        Segment::Bare(text.trim().to_string())
    }
}

/// Replace `${NAME}` and bare `$NAME` (word-boundary names) using the
/// supplied lookup. Unset variables are left as their original text.
pub fn expand_variables(input: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '$' || i + 1 >= chars.len() {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        // ${NAME}
        if chars[i + 1] == '{' {
            if let Some(close) = chars[i + 2..].iter().position(|&c| c == '}') {
                let name: String = chars[i + 2..i + 2 + close].iter().collect();
                match lookup(&name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        // unset: keep the original text
                        out.extend(&chars[i..i + 3 + close]);
                    }
                }
                i += 3 + close;
                continue;
            }
            out.push(chars[i]);
            i += 1;
            continue;
        }

        // $NAME or positional $1
        let mut j = i + 1;
        while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
            j += 1;
        }
        if j == i + 1 {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let name: String = chars[i + 1..j].iter().collect();
        match lookup(&name) {
            Some(value) => out.push_str(&value),
            None => out.extend(&chars[i..j]),
        }
        i = j;
    }

    out
}

/// The final expansion step: a whole trimmed argument that is a single
/// bare token with no remaining `$` is tried once more as a direct
/// variable reference.
pub fn resolve_bare_token(input: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.contains('$') || trimmed.contains(char::is_whitespace) {
        return None;
    }
    if !is_valid_name(trimmed) {
        return None;
    }
    lookup(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_find_substitution_dollar_paren() {
        let site = find_substitution("before $(date +%s) after").unwrap();
        assert_eq!(site.inner, "date +%s");
        assert_eq!(&"before $(date +%s) after"[site.start..site.end], "$(date +%s)");
    }

    #[test]
    fn test_find_substitution_nested() {
        let site = find_substitution("$(echo $(inner))").unwrap();
        assert_eq!(site.inner, "echo $(inner)");
    }

    #[test]
    fn test_find_substitution_backticks() {
        let site = find_substitution("x `uname` y").unwrap();
        assert_eq!(site.inner, "uname");
    }

    #[test]
    fn test_split_concat_none_without_plus() {
        assert!(split_concat("plain text").is_none());
        assert!(split_concat(r#"'a+b'"#).is_none());
    }

    #[test]
    fn test_split_concat_segments() {
        let segments = split_concat(r#""hello "+NAME+"!""#).unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Quoted("hello ".to_string()),
                Segment::Bare("NAME".to_string()),
                Segment::Quoted("!".to_string()),
            ]
        );
    }

    #[test]
    fn test_expand_braced_and_bare() {
        let lookup = lookup_from(&[("USER", "amy"), ("N", "7")]);
        assert_eq!(expand_variables("hi ${USER}!", &lookup), "hi amy!");
        assert_eq!(expand_variables("count=$N.", &lookup), "count=7.");
    }

    #[test]
    fn test_expand_unset_left_unchanged() {
        let lookup = lookup_from(&[]);
        assert_eq!(expand_variables("${MISSING} $GONE", &lookup), "${MISSING} $GONE");
    }

    #[test]
    fn test_expand_word_boundary() {
        let lookup = lookup_from(&[("A", "1")]);
        // $AB is a different name; stays unexpanded
        assert_eq!(expand_variables("$A $AB", &lookup), "1 $AB");
    }

    #[test]
    fn test_resolve_bare_token() {
        let lookup = lookup_from(&[("TARGET", "prod")]);
        assert_eq!(resolve_bare_token("TARGET", &lookup).as_deref(), Some("prod"));
        assert_eq!(resolve_bare_token("no such", &lookup), None);
        assert_eq!(resolve_bare_token("has$dollar", &lookup), None);
    }
}

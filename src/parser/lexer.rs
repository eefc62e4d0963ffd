//! Lexer for flowsh Scripts
//!
//! Tokenizes input into a stream the grammar-driven parser consumes.
//! It handles:
//! - Operators and delimiters
//! - Words (with quoting rules)
//! - Comments
//! - Here-document bodies (collected whole, never re-tokenized)
//! - Annotation words (`@Name(value)`)

use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::parser::types::{ParseException, MAX_INPUT_SIZE, MAX_TOKENS};

/// Token types for the flowsh lexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    // End of input
    Eof,

    // Newlines and separators
    Newline,
    Semicolon,
    Amp, // &

    // Operators
    Pipe,   // |
    AndAnd, // &&
    OrOr,   // ||

    // Redirections
    Less,     // <
    Great,    // >
    DGreat,   // >>
    LessAnd,  // <&
    GreatAnd, // >&
    DLess,    // <<

    // Grouping
    LParen, // (
    RParen, // )
    LBrace, // {
    RBrace, // }

    // Reserved words
    If,
    Then,
    Else,
    Fi,
    For,
    While,
    Do,
    Done,
    In,
    Function,

    // Words and identifiers
    Word,
    Number,         // bare digits before a redirection, e.g. 2>&1
    AssignmentWord, // VAR=value or VAR=(a b c)

    // Here-document content (one token per body)
    HeredocContent,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eof => "EOF",
            Self::Newline => "NEWLINE",
            Self::Semicolon => ";",
            Self::Amp => "&",
            Self::Pipe => "|",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::Less => "<",
            Self::Great => ">",
            Self::DGreat => ">>",
            Self::LessAnd => "<&",
            Self::GreatAnd => ">&",
            Self::DLess => "<<",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::If => "if",
            Self::Then => "then",
            Self::Else => "else",
            Self::Fi => "fi",
            Self::For => "for",
            Self::While => "while",
            Self::Do => "do",
            Self::Done => "done",
            Self::In => "in",
            Self::Function => "function",
            Self::Word => "WORD",
            Self::Number => "NUMBER",
            Self::AssignmentWord => "ASSIGNMENT_WORD",
            Self::HeredocContent => "HEREDOC_CONTENT",
        }
    }
}

lazy_static! {
    static ref KEYWORDS: HashMap<&'static str, TokenType> = {
        let mut m = HashMap::new();
        m.insert("if", TokenType::If);
        m.insert("then", TokenType::Then);
        m.insert("else", TokenType::Else);
        m.insert("fi", TokenType::Fi);
        m.insert("for", TokenType::For);
        m.insert("while", TokenType::While);
        m.insert("do", TokenType::Do);
        m.insert("done", TokenType::Done);
        m.insert("in", TokenType::In);
        m.insert("function", TokenType::Function);
        m
    };
}

/// A token produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token_type: TokenType,
    /// Token text. For WORD tokens the quotes are already stripped.
    pub value: String,
    /// Byte offsets into the input
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
    /// Whether any part of a WORD was quoted
    pub quoted: bool,
}

impl Token {
    fn new(
        token_type: TokenType,
        value: impl Into<String>,
        start: usize,
        end: usize,
        line: usize,
        column: usize,
    ) -> Self {
        Self {
            token_type,
            value: value.into(),
            start,
            end,
            line,
            column,
            quoted: false,
        }
    }
}

/// Streaming lexer over a source string.
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    /// Delimiters of heredocs whose bodies are still owed on this line
    pending_heredocs: Vec<String>,
    /// True while the next word starts a command (keywords apply)
    at_command_start: bool,
}

impl Lexer {
    pub fn new(input: &str) -> Result<Self, ParseException> {
        if input.len() > MAX_INPUT_SIZE {
            return Err(ParseException::new(
                format!("input exceeds maximum size of {} bytes", MAX_INPUT_SIZE),
                1,
                1,
            ));
        }
        Ok(Self {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            pending_heredocs: Vec::new(),
            at_command_start: true,
        })
    }

    /// Tokenize the whole input.
    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseException> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.token_type == TokenType::Eof;
            tokens.push(token);
            if done {
                break;
            }
            if tokens.len() > MAX_TOKENS {
                return Err(ParseException::new(
                    format!("token stream exceeds {} tokens", MAX_TOKENS),
                    self.line,
                    self.column,
                ));
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).copied();
        if let Some(c) = ch {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        ch
    }

    fn next_token(&mut self) -> Result<Token, ParseException> {
        // Skip horizontal whitespace
        while matches!(self.peek(), Some(' ') | Some('\t') | Some('\r')) {
            self.advance();
        }

        // Comments run to end of line
        if self.peek() == Some('#') {
            while self.peek().is_some() && self.peek() != Some('\n') {
                self.advance();
            }
        }

        let start = self.pos;
        let line = self.line;
        let column = self.column;

        let ch = match self.peek() {
            Some(c) => c,
            None => {
                return Ok(Token::new(TokenType::Eof, "", start, start, line, column));
            }
        };

        match ch {
            '\n' => {
                self.advance();
                self.at_command_start = true;
                // A newline triggers collection of any owed heredoc bodies.
                if !self.pending_heredocs.is_empty() {
                    return self.collect_heredoc_bodies(start, line, column);
                }
                Ok(Token::new(TokenType::Newline, "\n", start, self.pos, line, column))
            }
            ';' => {
                self.advance();
                self.at_command_start = true;
                Ok(Token::new(TokenType::Semicolon, ";", start, self.pos, line, column))
            }
            '&' => {
                self.advance();
                if self.peek() == Some('&') {
                    self.advance();
                    self.at_command_start = true;
                    Ok(Token::new(TokenType::AndAnd, "&&", start, self.pos, line, column))
                } else {
                    self.at_command_start = true;
                    Ok(Token::new(TokenType::Amp, "&", start, self.pos, line, column))
                }
            }
            '|' => {
                self.advance();
                if self.peek() == Some('|') {
                    self.advance();
                    self.at_command_start = true;
                    Ok(Token::new(TokenType::OrOr, "||", start, self.pos, line, column))
                } else {
                    self.at_command_start = true;
                    Ok(Token::new(TokenType::Pipe, "|", start, self.pos, line, column))
                }
            }
            '<' => {
                self.advance();
                match self.peek() {
                    Some('<') => {
                        self.advance();
                        Ok(Token::new(TokenType::DLess, "<<", start, self.pos, line, column))
                    }
                    Some('&') => {
                        self.advance();
                        Ok(Token::new(TokenType::LessAnd, "<&", start, self.pos, line, column))
                    }
                    _ => Ok(Token::new(TokenType::Less, "<", start, self.pos, line, column)),
                }
            }
            '>' => {
                self.advance();
                match self.peek() {
                    Some('>') => {
                        self.advance();
                        Ok(Token::new(TokenType::DGreat, ">>", start, self.pos, line, column))
                    }
                    Some('&') => {
                        self.advance();
                        Ok(Token::new(TokenType::GreatAnd, ">&", start, self.pos, line, column))
                    }
                    _ => Ok(Token::new(TokenType::Great, ">", start, self.pos, line, column)),
                }
            }
            '(' => {
                self.advance();
                Ok(Token::new(TokenType::LParen, "(", start, self.pos, line, column))
            }
            ')' => {
                self.advance();
                Ok(Token::new(TokenType::RParen, ")", start, self.pos, line, column))
            }
            '{' => {
                self.advance();
                self.at_command_start = true;
                Ok(Token::new(TokenType::LBrace, "{", start, self.pos, line, column))
            }
            '}' => {
                self.advance();
                Ok(Token::new(TokenType::RBrace, "}", start, self.pos, line, column))
            }
            _ => self.read_word(start, line, column),
        }
    }

    fn read_word(&mut self, start: usize, line: usize, column: usize) -> Result<Token, ParseException> {
        let mut value = String::new();
        let mut quoted = false;
        let mut unquoted_text = String::new();
        // Verbatim text including quote characters; words carrying an
        // unquoted '+' keep it so the expansion phase can tell quoted
        // literals from variable names.
        let mut raw = String::new();
        let mut has_unquoted_plus = false;

        while let Some(c) = self.peek() {
            match c {
                '\'' => {
                    quoted = true;
                    raw.push('\'');
                    self.advance();
                    while let Some(inner) = self.peek() {
                        if inner == '\'' {
                            break;
                        }
                        value.push(inner);
                        raw.push(inner);
                        self.advance();
                    }
                    if self.peek() != Some('\'') {
                        return Err(ParseException::new("unterminated single quote", line, column));
                    }
                    raw.push('\'');
                    self.advance();
                }
                '"' => {
                    quoted = true;
                    raw.push('"');
                    self.advance();
                    while let Some(inner) = self.peek() {
                        if inner == '"' {
                            break;
                        }
                        if inner == '\\' && matches!(self.peek_at(1), Some('"') | Some('\\')) {
                            self.advance();
                            let escaped = self.advance().unwrap();
                            value.push(escaped);
                            raw.push('\\');
                            raw.push(escaped);
                            continue;
                        }
                        value.push(inner);
                        raw.push(inner);
                        self.advance();
                    }
                    if self.peek() != Some('"') {
                        return Err(ParseException::new("unterminated double quote", line, column));
                    }
                    raw.push('"');
                    self.advance();
                }
                '`' => {
                    // Backtick substitution stays inside the word verbatim.
                    value.push('`');
                    unquoted_text.push('`');
                    raw.push('`');
                    self.advance();
                    while let Some(inner) = self.peek() {
                        value.push(inner);
                        unquoted_text.push(inner);
                        raw.push(inner);
                        self.advance();
                        if inner == '`' {
                            break;
                        }
                    }
                }
                '$' if self.peek_at(1) == Some('{') => {
                    // ${NAME} stays inside the word; '{' is not a brace
                    // token here.
                    value.push('$');
                    unquoted_text.push('$');
                    raw.push('$');
                    self.advance();
                    while let Some(inner) = self.peek() {
                        if inner.is_whitespace() {
                            break; // unterminated ${ ends at the word
                        }
                        value.push(inner);
                        unquoted_text.push(inner);
                        raw.push(inner);
                        self.advance();
                        if inner == '}' {
                            break;
                        }
                    }
                }
                '$' if self.peek_at(1) == Some('(') => {
                    // $( ... ) kept verbatim inside the word, nesting honored.
                    value.push('$');
                    unquoted_text.push('$');
                    raw.push('$');
                    self.advance();
                    let mut depth = 0;
                    while let Some(inner) = self.peek() {
                        value.push(inner);
                        unquoted_text.push(inner);
                        raw.push(inner);
                        self.advance();
                        match inner {
                            '(' => depth += 1,
                            ')' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                    if depth != 0 {
                        return Err(ParseException::new(
                            "unterminated command substitution",
                            line,
                            column,
                        ));
                    }
                }
                '\\' => {
                    self.advance();
                    if let Some(escaped) = self.advance() {
                        value.push(escaped);
                        unquoted_text.push(escaped);
                        raw.push('\\');
                        raw.push(escaped);
                    }
                }
                '(' if !value.is_empty()
                    && unquoted_text.ends_with('=')
                    && !quoted =>
                {
                    // VAR=( ... ) array literal: consume through the close paren
                    let mut depth = 0;
                    while let Some(inner) = self.peek() {
                        value.push(inner);
                        unquoted_text.push(inner);
                        raw.push(inner);
                        self.advance();
                        match inner {
                            '(' => depth += 1,
                            ')' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                    if depth != 0 {
                        return Err(ParseException::new("unterminated array literal", line, column));
                    }
                }
                '(' if value.starts_with('@') => {
                    // @Name(value) annotation: parens belong to the word
                    let mut depth = 0;
                    while let Some(inner) = self.peek() {
                        value.push(inner);
                        unquoted_text.push(inner);
                        raw.push(inner);
                        self.advance();
                        match inner {
                            '(' => depth += 1,
                            ')' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                    if depth != 0 {
                        return Err(ParseException::new("unterminated annotation", line, column));
                    }
                }
                c if c.is_whitespace()
                    || matches!(c, ';' | '&' | '|' | '<' | '>' | '(' | ')' | '{' | '}') =>
                {
                    break;
                }
                c => {
                    if c == '+' {
                        has_unquoted_plus = true;
                    }
                    value.push(c);
                    unquoted_text.push(c);
                    raw.push(c);
                    self.advance();
                }
            }
        }

        // Keep the verbatim text for '+' concatenation words.
        if has_unquoted_plus && quoted {
            value = raw;
        }

        let end = self.pos;

        // Bare digits directly before a redirection operator: fd number
        if !quoted
            && !value.is_empty()
            && value.chars().all(|c| c.is_ascii_digit())
            && matches!(self.peek(), Some('<') | Some('>'))
        {
            return Ok(Token::new(TokenType::Number, value, start, end, line, column));
        }

        // Keywords apply to unquoted words regardless of position; the
        // parser downgrades them to plain words where the grammar
        // expects arguments.
        if !quoted {
            if let Some(&kw) = KEYWORDS.get(value.as_str()) {
                self.at_command_start = true;
                return Ok(Token::new(kw, value, start, end, line, column));
            }
        }

        // NAME=value with an unquoted '=' in command position
        let token_type = if self.at_command_start && is_assignment_word(&unquoted_text) {
            TokenType::AssignmentWord
        } else {
            TokenType::Word
        };

        if token_type == TokenType::Word {
            self.at_command_start = false;
        }

        let mut token = Token::new(token_type, value, start, end, line, column);
        token.quoted = quoted;
        Ok(token)
    }

    /// Consume raw source lines until each pending heredoc delimiter is
    /// seen, producing one HEREDOC_CONTENT token. The bodies are kept
    /// verbatim so they can never be miscompiled as commands.
    fn collect_heredoc_bodies(
        &mut self,
        start: usize,
        line: usize,
        column: usize,
    ) -> Result<Token, ParseException> {
        let delimiter = self.pending_heredocs.remove(0);
        let mut body = String::new();
        loop {
            let mut current = String::new();
            loop {
                match self.advance() {
                    Some('\n') | None => break,
                    Some(c) => current.push(c),
                }
            }
            if current.trim_end() == delimiter {
                break;
            }
            if self.pos >= self.chars.len() && current.trim_end() != delimiter {
                return Err(ParseException::new(
                    format!("heredoc delimited by end of file (wanted `{}`)", delimiter),
                    self.line,
                    self.column,
                ));
            }
            body.push_str(&current);
            body.push('\n');
        }
        let mut token = Token::new(TokenType::HeredocContent, body, start, self.pos, line, column);
        token.quoted = false;
        Ok(token)
    }

    /// Tell the lexer a heredoc body is owed after the current line.
    pub fn push_pending_heredoc(&mut self, delimiter: String) {
        self.pending_heredocs.push(delimiter);
    }
}

/// Tokenize with heredoc awareness: a pre-scan finds `<<MARKER`
/// occurrences per line so bodies are collected before re-tokenizing.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseException> {
    let mut lexer = Lexer::new(input)?;
    // Pre-scan: find unquoted << operators and queue their delimiters
    // in source order so collect_heredoc_bodies sees them at newlines.
    let mut in_single = false;
    let mut in_double = false;
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '<' if !in_single && !in_double && chars.get(i + 1) == Some(&'<') => {
                let mut j = i + 2;
                while j < chars.len() && (chars[j] == ' ' || chars[j] == '\t') {
                    j += 1;
                }
                let mut marker = String::new();
                while j < chars.len() && !chars[j].is_whitespace() && chars[j] != ';' {
                    marker.push(chars[j]);
                    j += 1;
                }
                if !marker.is_empty() {
                    lexer.push_pending_heredoc(marker);
                }
                i = j;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    lexer.tokenize()
}

/// True when `text` is `NAME=...` with a valid variable name prefix.
pub fn is_assignment_word(text: &str) -> bool {
    match text.find('=') {
        Some(idx) if idx > 0 => {
            let name = &text[..idx];
            is_valid_name(name)
        }
        _ => false,
    }
}

/// Valid variable/function name: `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

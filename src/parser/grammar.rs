//! Grammar-Driven Parser for flowsh Scripts
//!
//! Recursive descent over the lexer's token stream, covering the full
//! grammar. Productions are rewritten into the AST node types.
//!
//! Grammar (simplified):
//!   script     ::= statement*
//!   statement  ::= annotation | assignment | and_or [&]
//!   and_or     ::= pipeline ((&& | '||') pipeline)*
//!   pipeline   ::= command (| command)*
//!   command    ::= simple_command | if | for | while | function_def
//!   simple_cmd ::= word (word)* (redirection)*
//!
//! Failure policy: a parse error in a single statement skips to the
//! next statement boundary and parsing continues; the whole call only
//! fails when the source is completely unreadable (lexing failed, or
//! every statement errored and nothing was produced).

use crate::ast::types::{
    AnnotationNode, ArrayNode, AssignmentNode, BackgroundNode, ChainNode, CommandNode,
    CommandSubstitutionNode, ForNode, FunctionNode, HeredocNode, IfNode, Node, PipeNode,
    Position, RedirectNode, RedirectOp, ScriptNode, WhileNode,
};
use crate::parser::lexer::{is_valid_name, tokenize, Token, TokenType};
use crate::parser::types::{ParseException, MAX_PARSER_DEPTH, MAX_PARSE_ITERATIONS};

/// The grammar-driven parser.
pub struct GrammarParser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    iterations: usize,
    /// Heredoc marker registered by the most recent simple command,
    /// with the position of the owning command node.
    pending_heredoc: Option<(String, Position)>,
}

/// Parse a source string into a script AST.
pub fn parse(source: &str) -> Result<ScriptNode, ParseException> {
    GrammarParser::new(source)?.parse_program()
}

/// Read a file and parse its contents. An unreadable file fails the
/// whole call.
pub fn parse_file(path: &str) -> Result<ScriptNode, ParseException> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| ParseException::new(format!("cannot read {}: {}", path, e), 0, 0))?;
    parse(&source)
}

impl GrammarParser {
    pub fn new(source: &str) -> Result<Self, ParseException> {
        let tokens = tokenize(source)?;
        Ok(Self {
            tokens,
            pos: 0,
            depth: 0,
            iterations: 0,
            pending_heredoc: None,
        })
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_type(&self) -> TokenType {
        self.peek().token_type
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn bump_iterations(&mut self) -> Result<(), ParseException> {
        self.iterations += 1;
        if self.iterations > MAX_PARSE_ITERATIONS {
            let t = self.peek();
            return Err(ParseException::new("parser iteration limit exceeded", t.line, t.column));
        }
        Ok(())
    }

    fn position_of(token: &Token) -> Position {
        Position::new(token.line, token.column, token.start)
    }

    fn expect(&mut self, expected: TokenType) -> Result<Token, ParseException> {
        if self.peek_type() == expected {
            Ok(self.advance())
        } else {
            let t = self.peek();
            Err(ParseException::new(
                format!("expected `{}`, found `{}`", expected.as_str(), t.value),
                t.line,
                t.column,
            ))
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek_type(), TokenType::Newline | TokenType::Semicolon) {
            self.advance();
        }
    }

    /// Parse the whole token stream, recovering at statement
    /// boundaries on error.
    pub fn parse_program(&mut self) -> Result<ScriptNode, ParseException> {
        let mut nodes = Vec::new();
        let mut first_error: Option<ParseException> = None;

        loop {
            self.bump_iterations()?;
            self.skip_separators();
            if self.peek_type() == TokenType::Eof {
                break;
            }
            match self.parse_statement() {
                Ok(node) => nodes.push(node),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                    self.recover_to_statement_boundary();
                }
            }
        }

        if nodes.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        Ok(ScriptNode::new(nodes))
    }

    fn recover_to_statement_boundary(&mut self) {
        loop {
            match self.peek_type() {
                TokenType::Eof => break,
                TokenType::Newline | TokenType::Semicolon => {
                    self.advance();
                    break;
                }
                _ => {
                    self.advance();
                }
            }
        }
        self.pending_heredoc = None;
    }

    /// statement ::= annotation | assignment | and_or [&]
    fn parse_statement(&mut self) -> Result<Node, ParseException> {
        self.bump_iterations()?;

        // Annotation line: @Name or @Name(value)
        if self.peek_type() == TokenType::Word && self.peek().value.starts_with('@') {
            return self.parse_annotation();
        }

        // Assignment statement: NAME=value or NAME=(a b c)
        if self.peek_type() == TokenType::AssignmentWord {
            return self.parse_assignment();
        }

        let mut node = self.parse_and_or()?;

        // Trailing & wraps the statement for background execution.
        // A background node never wraps another one.
        if self.peek_type() == TokenType::Amp {
            self.advance();
            if !matches!(node, Node::Background(_)) {
                node = Node::Background(BackgroundNode {
                    pos: node.position(),
                    command: Box::new(node),
                });
            }
        }

        // Heredoc body, if one was registered, follows the statement's
        // newline as a single content token.
        if let Some((marker, cmd_pos)) = self.pending_heredoc.take() {
            if self.peek_type() == TokenType::Newline {
                self.advance();
            }
            if self.peek_type() == TokenType::HeredocContent {
                let body = self.advance().value;
                node = wrap_heredoc(node, &marker, body, cmd_pos);
            }
        }

        Ok(node)
    }

    fn parse_annotation(&mut self) -> Result<Node, ParseException> {
        let token = self.advance();
        let pos = Self::position_of(&token);
        let raw = &token.value[1..]; // strip '@'
        let (name, value) = match raw.find('(') {
            Some(idx) if raw.ends_with(')') => {
                let name = raw[..idx].to_string();
                let inner = raw[idx + 1..raw.len() - 1].trim().to_string();
                (name, if inner.is_empty() { None } else { Some(inner) })
            }
            _ => (raw.to_string(), None),
        };
        if name.is_empty() {
            return Err(ParseException::new("annotation missing a name", pos.line, pos.column));
        }
        Ok(Node::Annotation(AnnotationNode { name, value, pos }))
    }

    fn parse_assignment(&mut self) -> Result<Node, ParseException> {
        let token = self.advance();
        let pos = Self::position_of(&token);
        let idx = token.value.find('=').expect("assignment word carries '='");
        let name = token.value[..idx].to_string();
        let value = token.value[idx + 1..].to_string();

        // Array literal: name=(a b c)
        if value.starts_with('(') && value.ends_with(')') {
            let inner = &value[1..value.len() - 1];
            let values = crate::parser::types::tokenize_quoted(inner);
            return Ok(Node::Array(ArrayNode { name, values, pos }));
        }

        Ok(Node::Assignment(AssignmentNode { name, value, pos }))
    }

    /// and_or ::= pipeline ((&& | '||') pipeline)*
    fn parse_and_or(&mut self) -> Result<Node, ParseException> {
        let mut left = self.parse_pipeline()?;
        loop {
            self.bump_iterations()?;
            let op = self.peek_type();
            if op != TokenType::AndAnd && op != TokenType::OrOr {
                break;
            }
            self.advance();
            // Allow the right side to continue on the next line
            while self.peek_type() == TokenType::Newline {
                self.advance();
            }
            let right = self.parse_pipeline()?;
            let chain = ChainNode {
                pos: left.position(),
                left: Box::new(left),
                right: Box::new(right),
            };
            left = if op == TokenType::AndAnd {
                Node::And(chain)
            } else {
                Node::Or(chain)
            };
        }
        Ok(left)
    }

    /// pipeline ::= command (| command)*
    ///
    /// Chains build a left-leaning tree: `a | b | c` becomes
    /// `Pipe(Pipe(a, b), c)`.
    fn parse_pipeline(&mut self) -> Result<Node, ParseException> {
        let mut left = self.parse_command()?;
        while self.peek_type() == TokenType::Pipe {
            self.bump_iterations()?;
            self.advance();
            while self.peek_type() == TokenType::Newline {
                self.advance();
            }
            let right = self.parse_command()?;
            left = Node::Pipe(PipeNode {
                pos: left.position(),
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    /// command ::= if | for | while | function_def | simple_command
    fn parse_command(&mut self) -> Result<Node, ParseException> {
        self.depth += 1;
        if self.depth > MAX_PARSER_DEPTH {
            self.depth -= 1;
            let t = self.peek();
            return Err(ParseException::new("parser depth limit exceeded", t.line, t.column));
        }
        let result = match self.peek_type() {
            TokenType::If => self.parse_if(),
            TokenType::For => self.parse_for(),
            TokenType::While => self.parse_while(),
            TokenType::Function => self.parse_function_keyword(),
            TokenType::Word
                if self.peek_at(1).map(|t| t.token_type) == Some(TokenType::LParen)
                    && self.peek_at(2).map(|t| t.token_type) == Some(TokenType::RParen) =>
            {
                self.parse_function_posix()
            }
            _ => self.parse_simple_command(),
        };
        self.depth -= 1;
        result
    }

    /// if cond; then body [else body] fi
    fn parse_if(&mut self) -> Result<Node, ParseException> {
        let token = self.expect(TokenType::If)?;
        let pos = Self::position_of(&token);
        let condition = self.parse_and_or()?;
        self.skip_separators();
        self.expect(TokenType::Then)?;
        let then_body = self.parse_body(&[TokenType::Else, TokenType::Fi])?;
        let else_body = if self.peek_type() == TokenType::Else {
            self.advance();
            Some(self.parse_body(&[TokenType::Fi])?)
        } else {
            None
        };
        self.expect(TokenType::Fi)?;
        Ok(Node::If(IfNode {
            condition: Box::new(condition),
            then_body,
            else_body,
            pos,
        }))
    }

    /// for name in word*; do body done
    fn parse_for(&mut self) -> Result<Node, ParseException> {
        let token = self.expect(TokenType::For)?;
        let pos = Self::position_of(&token);
        let var_token = self.advance();
        let variable = var_token.value.clone();
        if !is_valid_name(&variable) {
            return Err(ParseException::new(
                format!("invalid loop variable name `{}`", variable),
                var_token.line,
                var_token.column,
            ));
        }
        self.expect(TokenType::In)?;
        let mut list = Vec::new();
        while let Some(word) = self.take_word() {
            list.push(word);
        }
        self.skip_separators();
        self.expect(TokenType::Do)?;
        let body = self.parse_body(&[TokenType::Done])?;
        self.expect(TokenType::Done)?;
        Ok(Node::For(ForNode { variable, list, body, pos }))
    }

    /// while cond; do body done
    fn parse_while(&mut self) -> Result<Node, ParseException> {
        let token = self.expect(TokenType::While)?;
        let pos = Self::position_of(&token);
        let condition = self.parse_and_or()?;
        self.skip_separators();
        self.expect(TokenType::Do)?;
        let body = self.parse_body(&[TokenType::Done])?;
        self.expect(TokenType::Done)?;
        Ok(Node::While(WhileNode {
            condition: Box::new(condition),
            body,
            pos,
        }))
    }

    /// function name { body }  /  function name() { body }
    fn parse_function_keyword(&mut self) -> Result<Node, ParseException> {
        let token = self.expect(TokenType::Function)?;
        let pos = Self::position_of(&token);
        let name_token = self.advance();
        let name = name_token.value.clone();
        if !is_valid_name(&name) {
            return Err(ParseException::new(
                format!("invalid function name `{}`", name),
                name_token.line,
                name_token.column,
            ));
        }
        if self.peek_type() == TokenType::LParen {
            self.advance();
            self.expect(TokenType::RParen)?;
        }
        self.parse_function_body(name, pos)
    }

    /// name() { body }
    fn parse_function_posix(&mut self) -> Result<Node, ParseException> {
        let name_token = self.advance();
        let pos = Self::position_of(&name_token);
        let name = name_token.value.clone();
        self.expect(TokenType::LParen)?;
        self.expect(TokenType::RParen)?;
        self.parse_function_body(name, pos)
    }

    fn parse_function_body(&mut self, name: String, pos: Position) -> Result<Node, ParseException> {
        self.skip_separators();
        self.expect(TokenType::LBrace)?;
        let body = self.parse_body(&[TokenType::RBrace])?;
        self.expect(TokenType::RBrace)?;
        Ok(Node::Function(FunctionNode { name, body, pos }))
    }

    /// A nested script running until one of `terminators`.
    fn parse_body(&mut self, terminators: &[TokenType]) -> Result<ScriptNode, ParseException> {
        let mut nodes = Vec::new();
        loop {
            self.bump_iterations()?;
            self.skip_separators();
            let t = self.peek_type();
            if t == TokenType::Eof {
                let token = self.peek();
                return Err(ParseException::new(
                    "unexpected end of input in compound body",
                    token.line,
                    token.column,
                ));
            }
            if terminators.contains(&t) {
                break;
            }
            nodes.push(self.parse_statement()?);
        }
        Ok(ScriptNode::new(nodes))
    }

    /// simple_command ::= word (word)* (redirection)*
    fn parse_simple_command(&mut self) -> Result<Node, ParseException> {
        let first = self.peek().clone();
        let pos = Self::position_of(&first);

        // A statement that is nothing but a substitution becomes a
        // CommandSubstitution node, evaluated to its captured stdout.
        if first.token_type == TokenType::Word && !first.quoted && is_whole_substitution(&first.value)
        {
            self.advance();
            let inner = extract_substitution_body(&first.value);
            // Best-effort: an unparsable inner script yields an empty one.
            let command = parse(&inner).unwrap_or_else(|_| ScriptNode::empty());
            return Ok(Node::CommandSubstitution(CommandSubstitutionNode { command, pos }));
        }

        let name = match self.take_word() {
            Some(word) => word,
            None => {
                let t = self.peek();
                return Err(ParseException::new(
                    format!("expected a command, found `{}`", t.value),
                    t.line,
                    t.column,
                ));
            }
        };

        let mut args = Vec::new();
        let mut redirect: Option<RedirectNode> = None;

        loop {
            self.bump_iterations()?;
            match self.peek_type() {
                // fd-prefixed redirection, e.g. 2>err.log
                TokenType::Number
                    if self
                        .peek_at(1)
                        .map(|t| is_redirect_op(t.token_type))
                        .unwrap_or(false) =>
                {
                    let fd_token = self.advance();
                    let fd: u32 = fd_token.value.parse().unwrap_or(1);
                    let r = self.parse_redirection(fd)?;
                    redirect = Some(r);
                }
                t if is_redirect_op(t) => {
                    let r = self.parse_redirection(1)?;
                    redirect = Some(r);
                }
                TokenType::DLess => {
                    // Heredoc: record the marker; the body arrives as a
                    // HEREDOC_CONTENT token after this statement's newline.
                    self.advance();
                    let marker = self.take_word().ok_or_else(|| {
                        let t = self.peek();
                        ParseException::new("heredoc missing a delimiter", t.line, t.column)
                    })?;
                    self.pending_heredoc = Some((marker, pos));
                }
                _ => match self.take_word() {
                    Some(word) => args.push(word),
                    None => break,
                },
            }
        }

        let mut cmd = CommandNode::new(name, args, pos);
        if let Some(r) = redirect {
            cmd = cmd.with_redirect(r);
        }
        Ok(Node::Command(cmd))
    }

    fn parse_redirection(&mut self, fd: u32) -> Result<RedirectNode, ParseException> {
        let op_token = self.advance();
        let pos = Self::position_of(&op_token);
        let op = match op_token.token_type {
            TokenType::Great => RedirectOp::Write,
            TokenType::DGreat => RedirectOp::Append,
            TokenType::Less => RedirectOp::Read,
            TokenType::GreatAnd => RedirectOp::DupOut,
            TokenType::LessAnd => RedirectOp::DupIn,
            _ => {
                return Err(ParseException::new(
                    format!("`{}` is not a redirection operator", op_token.value),
                    op_token.line,
                    op_token.column,
                ))
            }
        };
        let file = self.take_word().ok_or_else(|| {
            ParseException::new("redirection missing a target", pos.line, pos.column)
        })?;
        Ok(RedirectNode::new(op, file, pos).with_fd(fd))
    }

    /// Take the next token as a word if the grammar allows it there.
    /// Keyword tokens downgrade to plain words in argument position.
    fn take_word(&mut self) -> Option<String> {
        let t = self.peek_type();
        let usable = matches!(
            t,
            TokenType::Word
                | TokenType::Number
                | TokenType::AssignmentWord
                | TokenType::If
                | TokenType::Then
                | TokenType::Else
                | TokenType::Fi
                | TokenType::For
                | TokenType::While
                | TokenType::Do
                | TokenType::Done
                | TokenType::In
                | TokenType::Function
        );
        if usable {
            Some(self.advance().value)
        } else {
            None
        }
    }
}

fn is_redirect_op(t: TokenType) -> bool {
    matches!(
        t,
        TokenType::Great | TokenType::DGreat | TokenType::Less | TokenType::GreatAnd | TokenType::LessAnd
    )
}

/// True when the word is a single `$(...)` or `` `...` `` substitution.
fn is_whole_substitution(word: &str) -> bool {
    (word.starts_with("$(") && word.ends_with(')'))
        || (word.starts_with('`') && word.ends_with('`') && word.len() >= 2)
}

fn extract_substitution_body(word: &str) -> String {
    if word.starts_with("$(") {
        word[2..word.len() - 1].to_string()
    } else {
        word[1..word.len() - 1].to_string()
    }
}

/// Replace the command node at `cmd_pos` with a Heredoc wrapper.
fn wrap_heredoc(node: Node, marker: &str, body: String, cmd_pos: Position) -> Node {
    match node {
        Node::Command(cmd) if cmd.pos == cmd_pos => {
            let pos = cmd.pos;
            Node::Heredoc(HeredocNode {
                command: Box::new(Node::Command(cmd)),
                start_marker: marker.to_string(),
                body,
                end_marker: marker.to_string(),
                pos,
            })
        }
        Node::Pipe(p) => Node::Pipe(PipeNode {
            left: Box::new(wrap_heredoc(*p.left, marker, body.clone(), cmd_pos)),
            right: Box::new(wrap_heredoc(*p.right, marker, body, cmd_pos)),
            pos: p.pos,
        }),
        Node::And(c) => Node::And(ChainNode {
            left: Box::new(wrap_heredoc(*c.left, marker, body.clone(), cmd_pos)),
            right: Box::new(wrap_heredoc(*c.right, marker, body, cmd_pos)),
            pos: c.pos,
        }),
        Node::Or(c) => Node::Or(ChainNode {
            left: Box::new(wrap_heredoc(*c.left, marker, body.clone(), cmd_pos)),
            right: Box::new(wrap_heredoc(*c.right, marker, body, cmd_pos)),
            pos: c.pos,
        }),
        Node::Background(b) => Node::Background(BackgroundNode {
            command: Box::new(wrap_heredoc(*b.command, marker, body, cmd_pos)),
            pos: b.pos,
        }),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_command() {
        let script = parse(r#"echo "hello world" 'x y'"#).unwrap();
        assert_eq!(script.nodes.len(), 1);
        match &script.nodes[0] {
            Node::Command(cmd) => {
                assert_eq!(cmd.name, "echo");
                assert_eq!(cmd.args, vec!["hello world", "x y"]);
            }
            other => panic!("expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_pipeline_is_left_leaning() {
        let script = parse("a | b | c").unwrap();
        match &script.nodes[0] {
            Node::Pipe(outer) => {
                assert!(matches!(*outer.left, Node::Pipe(_)));
                match &*outer.right {
                    Node::Command(cmd) => assert_eq!(cmd.name, "c"),
                    other => panic!("expected command, got {:?}", other),
                }
            }
            other => panic!("expected pipe, got {:?}", other),
        }
    }

    #[test]
    fn test_and_or_chain() {
        let script = parse("a && b || c").unwrap();
        match &script.nodes[0] {
            Node::Or(or) => assert!(matches!(*or.left, Node::And(_))),
            other => panic!("expected or, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_statement() {
        let script = parse("GREETING=hello").unwrap();
        match &script.nodes[0] {
            Node::Assignment(a) => {
                assert_eq!(a.name, "GREETING");
                assert_eq!(a.value, "hello");
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_quoted_equals() {
        let script = parse(r#"NAME="a=b""#).unwrap();
        match &script.nodes[0] {
            Node::Assignment(a) => {
                assert_eq!(a.name, "NAME");
                assert_eq!(a.value, "a=b");
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_array_statement() {
        let script = parse("colors=(red green blue)").unwrap();
        match &script.nodes[0] {
            Node::Array(a) => {
                assert_eq!(a.name, "colors");
                assert_eq!(a.values, vec!["red", "green", "blue"]);
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_if_else() {
        let script = parse("if test -f x; then\n  echo yes\nelse\n  echo no\nfi").unwrap();
        match &script.nodes[0] {
            Node::If(n) => {
                assert!(matches!(*n.condition, Node::Command(_)));
                assert_eq!(n.then_body.nodes.len(), 1);
                assert_eq!(n.else_body.as_ref().unwrap().nodes.len(), 1);
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_test_expression_bracket_is_command_name() {
        let script = parse("if [ -f x ]; then echo yes; fi").unwrap();
        match &script.nodes[0] {
            Node::If(n) => match &*n.condition {
                Node::Command(cmd) => {
                    assert_eq!(cmd.name, "[");
                    assert_eq!(cmd.args, vec!["-f", "x", "]"]);
                }
                other => panic!("expected command, got {:?}", other),
            },
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_for_loop() {
        let script = parse("for i in a b c; do\n  echo $i\ndone").unwrap();
        match &script.nodes[0] {
            Node::For(n) => {
                assert_eq!(n.variable, "i");
                assert_eq!(n.list, vec!["a", "b", "c"]);
                assert_eq!(n.body.nodes.len(), 1);
            }
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn test_while_loop() {
        let script = parse("while [ -f lock ]; do\n  sleep 1\ndone").unwrap();
        match &script.nodes[0] {
            Node::While(n) => assert_eq!(n.body.nodes.len(), 1),
            other => panic!("expected while, got {:?}", other),
        }
    }

    #[test]
    fn test_function_both_forms() {
        let script = parse("function greet {\n  echo hi\n}\n\nbye() {\n  echo bye\n}").unwrap();
        assert_eq!(script.nodes.len(), 2);
        match (&script.nodes[0], &script.nodes[1]) {
            (Node::Function(a), Node::Function(b)) => {
                assert_eq!(a.name, "greet");
                assert_eq!(b.name, "bye");
                assert_eq!(a.body.nodes.len(), 1);
            }
            other => panic!("expected two functions, got {:?}", other),
        }
    }

    #[test]
    fn test_background_statement() {
        let script = parse("sleep 10 &").unwrap();
        match &script.nodes[0] {
            Node::Background(b) => match &*b.command {
                Node::Command(cmd) => assert_eq!(cmd.name, "sleep"),
                other => panic!("expected command, got {:?}", other),
            },
            other => panic!("expected background, got {:?}", other),
        }
    }

    #[test]
    fn test_redirection_with_fd() {
        let script = parse("cmd arg 2>err.log").unwrap();
        match &script.nodes[0] {
            Node::Command(cmd) => {
                let r = cmd.redirect.as_ref().unwrap();
                assert_eq!(r.op, RedirectOp::Write);
                assert_eq!(r.fd, 2);
                assert_eq!(r.file, "err.log");
            }
            other => panic!("expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_redirection_defaults_to_stdout() {
        let script = parse("echo hi >out.txt").unwrap();
        match &script.nodes[0] {
            Node::Command(cmd) => {
                let r = cmd.redirect.as_ref().unwrap();
                assert_eq!(r.fd, 1);
                assert_eq!(r.op, RedirectOp::Write);
            }
            other => panic!("expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_heredoc_never_miscompiled() {
        let script = parse("cat <<EOF\nnot a command\nalso not\nEOF\necho after").unwrap();
        assert_eq!(script.nodes.len(), 2);
        match &script.nodes[0] {
            Node::Heredoc(h) => {
                assert_eq!(h.start_marker, "EOF");
                assert_eq!(h.end_marker, "EOF");
                assert_eq!(h.body, "not a command\nalso not\n");
                match &*h.command {
                    Node::Command(cmd) => assert_eq!(cmd.name, "cat"),
                    other => panic!("expected command, got {:?}", other),
                }
            }
            other => panic!("expected heredoc, got {:?}", other),
        }
        match &script.nodes[1] {
            Node::Command(cmd) => assert_eq!(cmd.name, "echo"),
            other => panic!("expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_annotation_with_value() {
        let script = parse("@Timeout(30)\necho hi").unwrap();
        assert_eq!(script.nodes.len(), 2);
        match &script.nodes[0] {
            Node::Annotation(a) => {
                assert_eq!(a.name, "Timeout");
                assert_eq!(a.value.as_deref(), Some("30"));
            }
            other => panic!("expected annotation, got {:?}", other),
        }
    }

    #[test]
    fn test_command_substitution_statement() {
        let script = parse("$(date +%s)").unwrap();
        match &script.nodes[0] {
            Node::CommandSubstitution(s) => {
                assert_eq!(s.command.nodes.len(), 1);
            }
            other => panic!("expected substitution, got {:?}", other),
        }
    }

    #[test]
    fn test_statement_error_recovers() {
        // The malformed `if` statement is skipped; the echo still parses.
        let script = parse("if ; fi\necho survived").unwrap();
        assert!(script
            .nodes
            .iter()
            .any(|n| matches!(n, Node::Command(c) if c.name == "echo")));
    }

    #[test]
    fn test_totally_unreadable_fails() {
        assert!(parse("echo 'unterminated").is_err());
    }

    #[test]
    fn test_comment_and_blank_line_skipping() {
        let source = "# leading comment\n\necho one\n\n# middle\necho two\n";
        let script = parse(source).unwrap();
        assert_eq!(script.nodes.len(), 2);
        assert_eq!(script.nodes[0].position().line, 3);
        assert_eq!(script.nodes[1].position().line, 6);
    }

    #[test]
    fn test_positions_monotone() {
        let script = parse("a\nb | c\nd && e\n").unwrap();
        crate::ast::types::validate(&script).unwrap();
    }
}

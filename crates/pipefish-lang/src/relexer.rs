//! The relexer: Pipefish's offside rule.
//!
//! Consumes the lexer's token stream and restructures it for the parser:
//!
//! - an indented suite after a trailing colon is wrapped in synthetic
//!   `|->` / `<-|` tokens, which the parser nests like parentheses
//! - a line break inside a suite becomes a `;` statement separator
//! - `\\ …` log text is classified as prelog (after a signature's header
//!   colon), iflog (replacing a condition's colon), or a trailing log
//! - `;` inside a `for` header is retyped to the header separator
//! - `=` inside a `given` block is retyped to the given-assignment
//! - bracket nesting must balance; a mismatch is a hard lex error

use pipefish_foundation::error::Error;
use pipefish_foundation::token::{Token, TokenType};

/// Run the offside rule over a lexed token stream.
pub fn relex(tokens: Vec<Token>) -> (Vec<Token>, Vec<Error>) {
    Relexer::new(tokens).run()
}

/// Lex and relex a source in one step.
pub fn tokenize(source_name: &str, source: &str) -> (Vec<Token>, Vec<Error>) {
    let (raw, mut errors) = crate::lexer::lex(source_name, source);
    let (tokens, mut relex_errors) = relex(raw);
    errors.append(&mut relex_errors);
    (tokens, errors)
}

struct Relexer {
    input: Vec<Token>,
    pos: usize,
    out: Vec<Token>,
    errors: Vec<Error>,
    /// Indent levels of the open suites.
    suites: Vec<usize>,
    /// Explicit brackets currently open (literals, for mismatch reporting).
    nesting: Vec<Token>,
    /// Are we between a `for` and its header colon?
    in_for_header: bool,
    /// The suite depth at which a `given` block began, while one is active.
    given_until: Option<usize>,
}

impl Relexer {
    fn new(input: Vec<Token>) -> Self {
        Relexer {
            input,
            pos: 0,
            out: Vec::new(),
            errors: Vec::new(),
            suites: Vec::new(),
            nesting: Vec::new(),
            in_for_header: false,
            given_until: None,
        }
    }

    fn current_indent(&self) -> usize {
        self.suites.last().copied().unwrap_or(0)
    }

    fn last_emitted(&self) -> Option<&Token> {
        self.out.last()
    }

    fn emit(&mut self, tok: Token) {
        self.out.push(tok);
    }

    fn synth(&self, ty: TokenType, literal: &str, like: &Token) -> Token {
        let mut tok = Token::new(ty, literal, like.line, like.ch_start, like.ch_end, like.source.clone());
        tok.namespace.clear();
        tok
    }

    fn open_suite(&mut self, indent: usize, like: &Token) {
        self.suites.push(indent);
        let open = self.synth(TokenType::LParen, "|->", like);
        self.emit(open);
    }

    fn close_suite(&mut self, like: &Token) {
        self.suites.pop();
        if self.given_until.map_or(false, |d| d > self.suites.len()) {
            self.given_until = None;
        }
        let close = self.synth(TokenType::RParen, "<-|", like);
        self.emit(close);
    }

    /// Does the last emitted token end a line in a way that opens a suite?
    fn opener_pending(&self) -> bool {
        matches!(
            self.last_emitted().map(|t| t.ty),
            Some(TokenType::Colon)
                | Some(TokenType::MagicColon)
                | Some(TokenType::Iflog)
                | Some(TokenType::Prelog)
                | Some(TokenType::Log)
                | Some(TokenType::Given)
        )
    }

    fn check_closer(&mut self, tok: &Token) {
        match self.nesting.pop() {
            None => {
                self.errors
                    .push(Error::new("lex/match", tok, &[&tok.literal]));
            }
            Some(open) => {
                let matches = matches!(
                    (open.ty, tok.ty),
                    (TokenType::LParen, TokenType::RParen)
                        | (TokenType::LBrack, TokenType::RBrack)
                        | (TokenType::LBrace, TokenType::RBrace)
                );
                if !matches {
                    self.errors
                        .push(Error::new("lex/nesting", tok, &[&open.literal, &tok.literal]));
                }
            }
        }
    }

    fn run(mut self) -> (Vec<Token>, Vec<Error>) {
        while self.pos < self.input.len() {
            let tok = self.input[self.pos].clone();
            self.pos += 1;
            match tok.ty {
                TokenType::Newline => self.handle_newline(&tok),
                TokenType::Eof => {
                    while !self.suites.is_empty() {
                        self.close_suite(&tok);
                    }
                    for open in std::mem::take(&mut self.nesting) {
                        self.errors
                            .push(Error::new("lex/eol", &tok, &[&open.literal]));
                    }
                    self.emit(tok);
                }
                TokenType::Log => self.handle_log(tok),
                TokenType::LParen | TokenType::LBrack | TokenType::LBrace => {
                    self.nesting.push(tok.clone());
                    self.emit(tok);
                }
                TokenType::RParen | TokenType::RBrack | TokenType::RBrace => {
                    self.check_closer(&tok);
                    self.emit(tok);
                }
                TokenType::For => {
                    self.in_for_header = true;
                    self.emit(tok);
                }
                TokenType::Colon => {
                    self.in_for_header = false;
                    // The colon introducing a `given` block is dropped; the
                    // `given` keyword itself is the operator.
                    if self.last_emitted().map(|t| t.ty) == Some(TokenType::Given) {
                        continue;
                    }
                    self.emit(tok);
                }
                TokenType::Semicolon => {
                    let mut tok = tok;
                    if self.in_for_header && self.nesting.is_empty() {
                        tok.ty = TokenType::MagicSemicolon;
                    }
                    self.emit(tok);
                }
                TokenType::Given => {
                    self.given_until = Some(self.suites.len());
                    self.emit(tok);
                }
                TokenType::Assign => {
                    let mut tok = tok;
                    if self.given_until.map_or(false, |d| self.suites.len() >= d) {
                        tok.ty = TokenType::GvnAssign;
                    }
                    self.emit(tok);
                }
                _ => self.emit(tok),
            }
        }
        (self.out, self.errors)
    }

    fn handle_newline(&mut self, tok: &Token) {
        // Collapse a run of newlines (blank lines), keeping the last indent.
        let mut indent = tok.literal.chars().count();
        while self
            .input
            .get(self.pos)
            .map(|t| t.ty == TokenType::Newline)
            .unwrap_or(false)
        {
            indent = self.input[self.pos].literal.chars().count();
            self.pos += 1;
        }
        // A newline before EOF just lets EOF do the closing.
        let next_is_eof = self
            .input
            .get(self.pos)
            .map(|t| t.ty == TokenType::Eof)
            .unwrap_or(true);
        if next_is_eof {
            return;
        }
        // Inside explicit brackets the offside rule is suspended: the line
        // break is a continuation.
        if !self.nesting.is_empty() {
            return;
        }
        self.in_for_header = false;

        // Synthetic tokens belong to the line being opened or separated.
        let mut like = tok.clone();
        like.line += 1;

        if indent > self.current_indent() {
            if self.opener_pending() {
                self.open_suite(indent, &like);
            }
            // Deeper indent without an opener continues the logical line.
            return;
        }
        while indent < self.current_indent() {
            self.close_suite(&like);
        }
        if self.out.is_empty() || self.opener_pending() {
            return;
        }
        // A `given` block attaches to the body before it: no separator.
        if self.input.get(self.pos).map(|t| t.ty) == Some(TokenType::Given) {
            return;
        }
        if self.given_until.map_or(false, |d| self.suites.len() <= d) {
            self.given_until = None;
        }
        let sep = self.synth(TokenType::Newline, ";", &like);
        self.emit(sep);
    }

    /// Classify a `\\` log against what came before it.
    fn handle_log(&mut self, tok: Token) {
        let prev = self.last_emitted().map(|t| t.ty);
        let prev_literal = self.last_emitted().map(|t| t.literal.clone());
        match prev {
            Some(TokenType::Colon) => {
                // After a signature's header colon the log runs before the
                // body: a prelog. After a condition's colon it replaces the
                // colon: an iflog.
                let before_colon = self.out.len().checked_sub(2).and_then(|i| self.out.get(i));
                let is_header = before_colon
                    .map(|t| t.ty == TokenType::RParen && t.literal == ")")
                    .unwrap_or(false);
                if is_header {
                    let prelog = self.synth(TokenType::Prelog, &tok.literal, &tok);
                    self.emit(prelog);
                } else {
                    self.out.pop();
                    let iflog = self.synth(TokenType::Iflog, &tok.literal, &tok);
                    self.emit(iflog);
                }
            }
            None | Some(TokenType::Newline) | Some(TokenType::LParen)
                if prev_literal.as_deref() != Some("(") =>
            {
                // A log standing at the start of a line logs the expression
                // that follows it.
                let prelog = self.synth(TokenType::Prelog, &tok.literal, &tok);
                self.emit(prelog);
            }
            _ => self.emit(tok),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relexed(source: &str) -> Vec<(TokenType, String, u32)> {
        let (tokens, errors) = tokenize("dummy source", source);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        tokens
            .into_iter()
            .map(|t| (t.ty, t.literal, t.line))
            .collect()
    }

    fn item(ty: TokenType, lit: &str, line: u32) -> (TokenType, String, u32) {
        (ty, lit.to_string(), line)
    }

    #[test]
    fn test_suite_after_colon() {
        let got = relexed("foo(x):\n\tx : 1\n\telse : 2\n");
        let want = vec![
            item(TokenType::Ident, "foo", 1),
            item(TokenType::LParen, "(", 1),
            item(TokenType::Ident, "x", 1),
            item(TokenType::RParen, ")", 1),
            item(TokenType::Colon, ":", 1),
            item(TokenType::LParen, "|->", 2),
            item(TokenType::Ident, "x", 2),
            item(TokenType::Colon, ":", 2),
            item(TokenType::Int, "1", 2),
            item(TokenType::Newline, ";", 3),
            item(TokenType::Else, "else", 3),
            item(TokenType::Colon, ":", 3),
            item(TokenType::Int, "2", 3),
            item(TokenType::RParen, "<-|", 4),
            item(TokenType::Eof, "EOF", 4),
        ];
        assert_eq!(got, want);
    }

    #[test]
    fn test_inline_given_block() {
        let got = relexed("foo = func(x): 1 given : y = 2 ; qux(z) : 3");
        let want = vec![
            item(TokenType::Ident, "foo", 1),
            item(TokenType::Assign, "=", 1),
            item(TokenType::Ident, "func", 1),
            item(TokenType::LParen, "(", 1),
            item(TokenType::Ident, "x", 1),
            item(TokenType::RParen, ")", 1),
            item(TokenType::Colon, ":", 1),
            item(TokenType::Int, "1", 1),
            item(TokenType::Given, "given", 1),
            item(TokenType::Ident, "y", 1),
            item(TokenType::GvnAssign, "=", 1),
            item(TokenType::Int, "2", 1),
            item(TokenType::Semicolon, ";", 1),
            item(TokenType::Ident, "qux", 1),
            item(TokenType::LParen, "(", 1),
            item(TokenType::Ident, "z", 1),
            item(TokenType::RParen, ")", 1),
            item(TokenType::Colon, ":", 1),
            item(TokenType::Int, "3", 1),
            item(TokenType::Eof, "EOF", 1),
        ];
        assert_eq!(got, want);
    }

    #[test]
    fn test_log_classification() {
        let got = relexed("foo(x): \\\\ zort\n\ttrue : \\\\ troz\n\t\t1\n\telse : \n\t\t2");
        let want = vec![
            item(TokenType::Ident, "foo", 1),
            item(TokenType::LParen, "(", 1),
            item(TokenType::Ident, "x", 1),
            item(TokenType::RParen, ")", 1),
            item(TokenType::Colon, ":", 1),
            item(TokenType::Prelog, "zort", 1),
            item(TokenType::LParen, "|->", 2),
            item(TokenType::True, "true", 2),
            item(TokenType::Iflog, "troz", 2),
            item(TokenType::LParen, "|->", 3),
            item(TokenType::Int, "1", 3),
            item(TokenType::RParen, "<-|", 4),
            item(TokenType::Newline, ";", 4),
            item(TokenType::Else, "else", 4),
            item(TokenType::Colon, ":", 4),
            item(TokenType::LParen, "|->", 5),
            item(TokenType::Int, "2", 5),
            item(TokenType::RParen, "<-|", 5),
            item(TokenType::RParen, "<-|", 5),
            item(TokenType::Eof, "EOF", 5),
        ];
        assert_eq!(got, want);
    }

    #[test]
    fn test_for_header_semicolons_are_retyped() {
        let got = relexed("for i = 0; i < n; i = i + 1 : body");
        let semis: Vec<TokenType> = got
            .iter()
            .filter(|(_, lit, _)| lit == ";")
            .map(|(ty, _, _)| *ty)
            .collect();
        assert_eq!(
            semis,
            vec![TokenType::MagicSemicolon, TokenType::MagicSemicolon]
        );
    }

    #[test]
    fn test_continuation_line() {
        // Deeper indent with no trailing colon continues the logical line.
        let got = relexed("x = 1 +\n\t\t2");
        assert!(!got.iter().any(|(ty, _, _)| *ty == TokenType::Newline));
        assert!(!got.iter().any(|(_, lit, _)| lit == "|->"));
    }

    #[test]
    fn test_bracket_mismatch_is_an_error() {
        let (_, errors) = tokenize("dummy", "foo(x]");
        assert!(errors.iter().any(|e| e.id == "lex/nesting"));
    }

    #[test]
    fn test_unclosed_bracket_at_eof() {
        let (_, errors) = tokenize("dummy", "foo(x");
        assert!(errors.iter().any(|e| e.id == "lex/eol"));
    }

    #[test]
    fn test_newline_in_brackets_is_continuation() {
        let got = relexed("foo(x,\n\ty)");
        assert!(!got.iter().any(|(ty, _, _)| *ty == TokenType::Newline));
    }
}

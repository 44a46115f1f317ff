//! Lexical analysis for Pipefish source code.
//!
//! Tokenization runs in two layers. This module is the first: a logos-derived
//! raw token set plus a `Lexer` wrapper that converts byte spans into
//! line/column `Token`s, decodes escapes, and splits dotted identifiers into
//! a namespace prefix and a name. The second layer, the relexer, applies the
//! offside rule.
//!
//! # Design
//!
//! - Newlines are not skipped: `\n` plus the following indentation is one
//!   lexeme, so the relexer can read the indent level straight off it.
//! - Operator characters (`+`, `-`, `*`, …) lex as identifiers: in Pipefish
//!   they are ordinary function names living in the parser's fix tables.
//! - `\\ …` log text and `-- …` snippet text are single lexemes; their
//!   interior is parsed later.

use logos::Logos;
use pipefish_foundation::error::Error;
use pipefish_foundation::token::{Token, TokenType};

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"//[^\n]*")]
pub enum RawToken {
    /// A line break plus the indentation of the next line.
    #[regex(r"\n[ \t]*")]
    NewlineIndent,

    // Literals.
    #[regex(r"[0-9]+\.[0-9]+")]
    Float,
    #[regex(r"[0-9]+")]
    Int,
    #[regex(r#""([^"\\\n]|\\.)*""#)]
    Str,
    #[regex(r"`[^`]*`")]
    RawStr,
    #[regex(r"'([^'\\\n]|\\.)'")]
    Rune,

    // Log and snippet text run to the end of the line.
    #[regex(r"\\\\[^\n]*")]
    LogText,
    #[regex(r"--[^\n]*")]
    SnippetText,

    // Keywords.
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("else")]
    Else,
    #[token("given")]
    Given,
    #[token("for")]
    For,
    #[token("from")]
    From,
    #[token("try")]
    Try,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("valid")]
    Valid,
    #[token("unwrap")]
    Unwrap,
    #[token("global")]
    Global,
    #[token("builtin")]
    Builtin,
    #[token("range")]
    Range,
    #[token("golang")]
    Golang,

    // Structure.
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBrack,
    #[token("]")]
    RBrack,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token("...")]
    DotDotDot,

    // Assignment, comparison, streaming.
    #[token("==")]
    EqEq,
    #[token("!=")]
    BangEq,
    #[token("=")]
    Assign,
    #[token("->")]
    Pipe,
    #[token(">>")]
    Mapping,
    #[token("?>")]
    Filter,

    // Operator identifiers: ordinary function names to the parser.
    #[token("::")]
    #[token("+")]
    #[token("-")]
    #[token("*")]
    #[token("/")]
    #[token("<=")]
    #[token("<")]
    #[token(">=")]
    #[token(">")]
    #[token("&")]
    #[token("?")]
    #[token("!")]
    OperatorIdent,

    /// A dotted identifier: namespace path plus name.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)+")]
    NamespacedIdent,
    /// Plain identifiers; `$_`-prefixed names are the service's own
    /// variables (`$_env`, `$_logTime`).
    #[regex(r"\$?[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
}

/// Decode the escapes of a quoted string literal's interior.
fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('\\') => out.push('\\'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Tokenize a whole source, producing line/column `Token`s for the relexer.
///
/// Lex-level problems (illegal characters, bad runes) are returned alongside
/// the tokens so that the caller can keep going and surface everything.
pub fn lex(source_name: &str, source: &str) -> (Vec<Token>, Vec<Error>) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut line: u32 = 1;
    let mut line_start: usize = 0;

    let mut lexer = RawToken::lexer(source);
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let slice = lexer.slice();
        let col = |offset: usize| -> u32 {
            source[line_start..offset].chars().count() as u32
        };
        let start = col(span.start);
        let end = col(span.end.max(span.start));
        let mk = |ty: TokenType, literal: &str| Token::new(ty, literal, line, start, end, source_name);
        macro_rules! push {
            ($ty:expr, $lit:expr) => {
                tokens.push(mk($ty, $lit))
            };
        }
        match result {
            Err(_) => {
                let tok = Token::new(TokenType::Illegal, slice, line, start, end, source_name);
                errors.push(Error::new("lex/illegal", &tok, &[slice]));
            }
            Ok(RawToken::NewlineIndent) => {
                // The literal records the indent of the following line.
                push!(TokenType::Newline, &slice[1..]);
                line += 1;
                line_start = span.start + 1;
            }
            Ok(RawToken::Float) => push!(TokenType::Float, slice),
            Ok(RawToken::Int) => push!(TokenType::Int, slice),
            Ok(RawToken::Str) => {
                let inner = &slice[1..slice.len() - 1];
                push!(TokenType::String, &unescape(inner));
            }
            Ok(RawToken::RawStr) => push!(TokenType::String, &slice[1..slice.len() - 1]),
            Ok(RawToken::Rune) => {
                let inner = unescape(&slice[1..slice.len() - 1]);
                let mut chars = inner.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => push!(TokenType::Rune, &c.to_string()),
                    _ => {
                        let tok =
                            Token::new(TokenType::Illegal, slice, line, start, end, source_name);
                        errors.push(Error::new("lex/rune", &tok, &[]));
                    }
                }
            }
            Ok(RawToken::LogText) => push!(TokenType::Log, slice[2..].trim()),
            Ok(RawToken::SnippetText) => push!(TokenType::Snippet, slice[2..].trim_start()),
            Ok(RawToken::True) => push!(TokenType::True, slice),
            Ok(RawToken::False) => push!(TokenType::False, slice),
            Ok(RawToken::And) => push!(TokenType::And, slice),
            Ok(RawToken::Or) => push!(TokenType::Or, slice),
            Ok(RawToken::Not) => push!(TokenType::Not, slice),
            Ok(RawToken::Else) => push!(TokenType::Else, slice),
            Ok(RawToken::Given) => push!(TokenType::Given, slice),
            Ok(RawToken::For) => push!(TokenType::For, slice),
            Ok(RawToken::From) => push!(TokenType::From, slice),
            Ok(RawToken::Try) => push!(TokenType::Try, slice),
            Ok(RawToken::Break) => push!(TokenType::Break, slice),
            Ok(RawToken::Continue) => push!(TokenType::Continue, slice),
            Ok(RawToken::Valid) => push!(TokenType::Valid, slice),
            Ok(RawToken::Unwrap) => push!(TokenType::Unwrap, slice),
            Ok(RawToken::Global) => push!(TokenType::Global, slice),
            Ok(RawToken::Builtin) => push!(TokenType::Builtin, slice),
            Ok(RawToken::Range) => push!(TokenType::Range, slice),
            Ok(RawToken::Golang) => push!(TokenType::Golang, slice),
            Ok(RawToken::LParen) => push!(TokenType::LParen, "("),
            Ok(RawToken::RParen) => push!(TokenType::RParen, ")"),
            Ok(RawToken::LBrack) => push!(TokenType::LBrack, "["),
            Ok(RawToken::RBrack) => push!(TokenType::RBrack, "]"),
            Ok(RawToken::LBrace) => push!(TokenType::LBrace, "{"),
            Ok(RawToken::RBrace) => push!(TokenType::RBrace, "}"),
            Ok(RawToken::Comma) => push!(TokenType::Comma, ","),
            Ok(RawToken::Colon) => push!(TokenType::Colon, ":"),
            Ok(RawToken::Semicolon) => push!(TokenType::Semicolon, ";"),
            Ok(RawToken::DotDotDot) => push!(TokenType::DotDotDot, "..."),
            Ok(RawToken::EqEq) => push!(TokenType::Eq, "=="),
            Ok(RawToken::BangEq) => push!(TokenType::NotEq, "!="),
            Ok(RawToken::Assign) => push!(TokenType::Assign, "="),
            Ok(RawToken::Pipe) => push!(TokenType::Pipe, "->"),
            Ok(RawToken::Mapping) => push!(TokenType::Mapping, ">>"),
            Ok(RawToken::Filter) => push!(TokenType::Filter, "?>"),
            Ok(RawToken::OperatorIdent) => push!(TokenType::Ident, slice),
            Ok(RawToken::NamespacedIdent) => {
                let split = slice.rfind('.').expect("dotted identifier without a dot");
                let mut tok = Token::new(
                    TokenType::Ident,
                    &slice[split + 1..],
                    line,
                    start,
                    end,
                    source_name,
                );
                tok.namespace = slice[..=split].to_string();
                tokens.push(tok);
            }
            Ok(RawToken::Ident) => push!(TokenType::Ident, slice),
        }
    }
    let eof_col = source[line_start..].chars().count() as u32;
    tokens.push(Token::new(
        TokenType::Eof,
        "EOF",
        line,
        eof_col,
        eof_col,
        source_name,
    ));
    (tokens, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<(TokenType, String)> {
        let (tokens, errors) = lex("test", source);
        assert!(errors.is_empty(), "unexpected lex errors: {:?}", errors);
        tokens
            .into_iter()
            .map(|t| (t.ty, t.literal))
            .collect()
    }

    #[test]
    fn test_basic_expression() {
        let toks = kinds("x + 1");
        assert_eq!(
            toks,
            vec![
                (TokenType::Ident, "x".to_string()),
                (TokenType::Ident, "+".to_string()),
                (TokenType::Int, "1".to_string()),
                (TokenType::Eof, "EOF".to_string()),
            ]
        );
    }

    #[test]
    fn test_newline_carries_indent() {
        let toks = kinds("a:\n\tb");
        assert_eq!(toks[2].0, TokenType::Newline);
        assert_eq!(toks[2].1, "\t");
    }

    #[test]
    fn test_string_escapes() {
        let toks = kinds(r#""a\nb""#);
        assert_eq!(toks[0], (TokenType::String, "a\nb".to_string()));
    }

    #[test]
    fn test_rune_literal() {
        let toks = kinds("'q'");
        assert_eq!(toks[0], (TokenType::Rune, "q".to_string()));
    }

    #[test]
    fn test_namespaced_identifier() {
        let (tokens, _) = lex("test", "zort.square 5");
        assert_eq!(tokens[0].ty, TokenType::Ident);
        assert_eq!(tokens[0].literal, "square");
        assert_eq!(tokens[0].namespace, "zort.");
    }

    #[test]
    fn test_log_and_snippet_text() {
        let toks = kinds(r"x : \\ We're here.");
        assert_eq!(toks[2], (TokenType::Log, "We're here.".to_string()));
        let toks = kinds("-- foo |x| bar");
        assert_eq!(toks[0], (TokenType::Snippet, "foo |x| bar".to_string()));
    }

    #[test]
    fn test_operators_lex_as_identifiers() {
        let toks = kinds("a :: b / c");
        assert_eq!(toks[1], (TokenType::Ident, "::".to_string()));
        assert_eq!(toks[3], (TokenType::Ident, "/".to_string()));
    }

    #[test]
    fn test_comparison_and_streaming() {
        let toks = kinds("a == b -> c >> d ?> e != f");
        let ops: Vec<TokenType> = toks.iter().map(|t| t.0).collect();
        assert!(ops.contains(&TokenType::Eq));
        assert!(ops.contains(&TokenType::Pipe));
        assert!(ops.contains(&TokenType::Mapping));
        assert!(ops.contains(&TokenType::Filter));
        assert!(ops.contains(&TokenType::NotEq));
    }

    #[test]
    fn test_comments_are_stripped() {
        let toks = kinds("x // a comment\ny");
        let idents: Vec<&str> = toks
            .iter()
            .filter(|t| t.0 == TokenType::Ident)
            .map(|t| t.1.as_str())
            .collect();
        assert_eq!(idents, vec!["x", "y"]);
    }
}

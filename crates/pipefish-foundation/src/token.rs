//! Token records for Pipefish source code.
//!
//! A `Token` is the unit of exchange between the lexer, the relexer and the
//! parser, and the unit of blame for every diagnostic: AST nodes, compiled
//! instructions and runtime errors all carry their principal token.
//!
//! # Design
//!
//! - `TokenType` — closed enum of every token kind, including the synthetic
//!   kinds the relexer invents (`|->`/`<-|` suite brackets, newline-as-`;`)
//! - `Token` — kind plus literal text, line, column span, source name and an
//!   optional dotted namespace prefix

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a token.
///
/// Synthetic kinds produced only by the relexer: `Newline` (a suite-internal
/// line break, literal `;`), and `LParen`/`RParen` with literals `|->`/`<-|`
/// standing for an indented suite. `MagicColon` and `MagicSemicolon` are
/// retyped from `Colon`/`Semicolon` where a declaration header or a `for`
/// header gives them structural meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    // Literals and identifiers.
    Ident,
    Int,
    Float,
    String,
    Rune,
    True,
    False,

    // Brackets. `LParen`/`RParen` cover both `(`/`)` and the relexer's
    // synthetic `|->`/`<-|`, distinguished by their literal.
    LParen,
    RParen,
    LBrack,
    RBrack,
    LBrace,
    RBrace,

    // Separators.
    Comma,
    Colon,
    MagicColon,
    Semicolon,
    MagicSemicolon,
    Newline,
    DotDotDot,

    // Assignment and comparison.
    Assign,
    GvnAssign,
    Eq,
    NotEq,

    // Keywords.
    And,
    Or,
    Not,
    Else,
    Given,
    For,
    From,
    Try,
    Break,
    Continue,
    Valid,
    Unwrap,
    Global,
    Builtin,
    Range,

    // Streaming.
    Pipe,
    Mapping,
    Filter,

    // Logging, attached by the relexer.
    Log,
    Iflog,
    Prelog,

    // A `--` snippet literal; the literal is the raw text after the dashes.
    Snippet,

    // A `golang` block. Recognized so the parser can reject it cleanly.
    Golang,

    Illegal,
    Eof,
}

impl TokenType {
    /// Human-readable name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            TokenType::Ident => "identifier",
            TokenType::Int => "integer literal",
            TokenType::Float => "float literal",
            TokenType::String => "string literal",
            TokenType::Rune => "rune literal",
            TokenType::True | TokenType::False => "boolean literal",
            TokenType::LParen => "'('",
            TokenType::RParen => "')'",
            TokenType::LBrack => "'['",
            TokenType::RBrack => "']'",
            TokenType::LBrace => "'{'",
            TokenType::RBrace => "'}'",
            TokenType::Comma => "','",
            TokenType::Colon | TokenType::MagicColon => "':'",
            TokenType::Semicolon | TokenType::MagicSemicolon => "';'",
            TokenType::Newline => "newline",
            TokenType::DotDotDot => "'...'",
            TokenType::Assign | TokenType::GvnAssign => "'='",
            TokenType::Eq => "'=='",
            TokenType::NotEq => "'!='",
            TokenType::And => "'and'",
            TokenType::Or => "'or'",
            TokenType::Not => "'not'",
            TokenType::Else => "'else'",
            TokenType::Given => "'given'",
            TokenType::For => "'for'",
            TokenType::From => "'from'",
            TokenType::Try => "'try'",
            TokenType::Break => "'break'",
            TokenType::Continue => "'continue'",
            TokenType::Valid => "'valid'",
            TokenType::Unwrap => "'unwrap'",
            TokenType::Global => "'global'",
            TokenType::Builtin => "'builtin'",
            TokenType::Range => "'range'",
            TokenType::Pipe => "'->'",
            TokenType::Mapping => "'>>'",
            TokenType::Filter => "'?>'",
            TokenType::Log => "log",
            TokenType::Iflog => "conditional log",
            TokenType::Prelog => "prelog",
            TokenType::Snippet => "snippet",
            TokenType::Golang => "golang block",
            TokenType::Illegal => "illegal token",
            TokenType::Eof => "end of input",
        }
    }

    /// True for the token types that can begin a literal value.
    pub fn is_literal(self) -> bool {
        matches!(
            self,
            TokenType::Int
                | TokenType::Float
                | TokenType::String
                | TokenType::Rune
                | TokenType::True
                | TokenType::False
        )
    }
}

/// A single lexed token.
///
/// `line` is 1-based; `ch_start`/`ch_end` are 0-based column offsets in
/// characters. `source` names the file or input the token came from.
/// `namespace` is a dotted prefix such as `"zort."` when the identifier was
/// written through a namespace, or empty otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub ty: TokenType,
    pub literal: String,
    pub line: u32,
    pub ch_start: u32,
    pub ch_end: u32,
    pub source: String,
    pub namespace: String,
}

impl Token {
    pub fn new(ty: TokenType, literal: impl Into<String>, line: u32, ch_start: u32, ch_end: u32, source: impl Into<String>) -> Self {
        Token {
            ty,
            literal: literal.into(),
            line,
            ch_start,
            ch_end,
            source: source.into(),
            namespace: String::new(),
        }
    }

    /// A placeholder token for synthesized nodes with no source position.
    pub fn synthetic(ty: TokenType, literal: impl Into<String>) -> Self {
        Token::new(ty, literal, 0, 0, 0, "synthetic")
    }

    /// The namespace prefix split into its segments, if any.
    pub fn namespace_segments(&self) -> Vec<&str> {
        if self.namespace.is_empty() {
            Vec::new()
        } else {
            self.namespace.trim_end_matches('.').split('.').collect()
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' at {}:{}", self.literal, self.source, self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_segments() {
        let mut tok = Token::new(TokenType::Ident, "square", 1, 0, 6, "test");
        assert!(tok.namespace_segments().is_empty());
        tok.namespace = "zort.".to_string();
        assert_eq!(tok.namespace_segments(), vec!["zort"]);
        tok.namespace = "a.b.".to_string();
        assert_eq!(tok.namespace_segments(), vec!["a", "b"]);
    }

    #[test]
    fn test_literal_classification() {
        assert!(TokenType::Int.is_literal());
        assert!(TokenType::Rune.is_literal());
        assert!(!TokenType::Ident.is_literal());
        assert!(!TokenType::LParen.is_literal());
    }
}

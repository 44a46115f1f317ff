//! Structured diagnostics for every phase of the toolchain.
//!
//! Errors carry a stable slash-separated id naming their origin and phase
//! (`lex/…`, `parse/…`, `init/…`, `comp/…`, `vm/…`), a message filled from a
//! template, the principal token, and a trace of tokens accumulated as the
//! error propagates.
//!
//! # Design
//!
//! - `Error` — single diagnostic; the id is what tests and tools match on
//! - `message_for` — the template table, one entry per stable id
//! - `ErrorFormatter` — renders a diagnostic with the offending source line
//!   and a caret underline

use crate::token::Token;
use indexmap::IndexMap;
use std::fmt;

/// A diagnostic produced by the lexer, parser, initializer, compiler or VM.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    /// Stable id, e.g. `comp/bool/or/left`.
    pub id: String,
    /// Message filled from the id's template.
    pub message: String,
    /// Principal token: where the error happened.
    pub token: Token,
    /// Tokens the error passed through, outermost last.
    pub trace: Vec<Token>,
}

impl Error {
    /// Create an error, filling the message template for `id` from `args`.
    pub fn new(id: &str, token: &Token, args: &[&str]) -> Self {
        Error {
            id: id.to_string(),
            message: message_for(id, args),
            token: token.clone(),
            trace: vec![token.clone()],
        }
    }

    /// Append a token to the trace, outermost last.
    pub fn with_trace(mut self, token: &Token) -> Self {
        self.trace.push(token.clone());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.id, self.message)
    }
}

impl std::error::Error for Error {}

/// Fill `{0}`, `{1}`, … in a template from `args`.
fn fill(template: &str, args: &[&str]) -> String {
    let mut out = template.to_string();
    for (i, arg) in args.iter().enumerate() {
        out = out.replace(&format!("{{{}}}", i), arg);
    }
    out
}

/// The message template for a stable error id.
///
/// Unknown ids get a generic message so a missing table entry degrades to
/// something readable rather than a panic.
pub fn message_for(id: &str, args: &[&str]) -> String {
    let template = match id {
        // Lexing.
        "lex/rune" => "invalid rune literal",
        "lex/string/unterminated" => "unterminated string literal",
        "lex/illegal" => "illegal character '{0}'",

        // Relexing: the offside rule and bracket balance.
        "lex/match" => "closing '{0}' with nothing to close",
        "lex/nesting" => "bracket '{0}' closed by mismatched '{1}'",
        "lex/eol" => "unclosed '{0}' at end of input",

        // Parsing.
        "parse/prefix" => "can't begin an expression with {0}",
        "parse/before/a" => "a literal can't be followed by '{0}'",
        "parse/before/b" => "'{0}' can't be followed by '{1}'",
        "parse/line" => "unexpected end of line",
        "parse/close" => "unexpected closing '{0}'",
        "parse/missing" => "missing expression before '{0}'",
        "parse/expected" => "expected end of expression, found '{0}'",
        "parse/follow" => "'{0}' must be followed by an expression",
        "parse/namespace" => "'{0}' names no known namespace",
        "parse/namespace/exists" => "namespace '{0}' doesn't exist",
        "parse/colon" => "a 'func' expression needs ':' between signature and body",
        "parse/try/colon" => "'try' needs ':' after the bound name",
        "parse/try/ident" => "'try' must be followed by ':' or a name",
        "parse/for/colon" => "a 'for' loop needs ':' before its body",
        "parse/for/semicolon" => "a 'for' header has either zero or two semicolons",
        "parse/from" => "'from' must be followed by a 'for' loop",
        "parse/rbrace" => "expected '}' to close type arguments",
        "parse/snippet/form" => "malformed snippet: unmatched '|'",
        "parse/sig/a" => "couldn't turn expression into a parameter",
        "parse/sig/b" => "unexpected '{0}' in a signature",
        "parse/ret/a" => "unexpected '{0}' in return types",
        "parse/ret/b" => "couldn't read return types",
        "parse/type/exists" => "'{0}' is not a known type",
        "parse/param/name" => "expected a parameter name",
        "parse/param/type" => "'{0}' can't be the type of a type parameter",
        "parse/param/form" => "malformed type parameter list",
        "parse/instance/value" => "'{0}' is not a legal type argument",
        "parse/instance/form" => "malformed type argument list",
        "parse/bling" => "'{0}' is not expected here by any function",

        // Initialization.
        "init/heading" => "expected a declaration heading, found '{0}'",
        "init/decl/form" => "couldn't make sense of this declaration",
        "init/import/file" => "couldn't read imported file '{0}'",
        "init/import/pair" => "an import must be a string or name::string pair",
        "init/external/unsupported" => {
            "can't reach external service '{0}': no external resolver is installed"
        }
        "init/overload" => "function '{0}' has two overloads with the same signature",
        "init/enum/element" => "enum element '{0}' declared twice",
        "init/type/exists" => "type '{0}' declared twice",
        "init/golang" => "golang blocks are not supported by this implementation",
        "init/main/cmd" => "'main' must be declared as a command",
        "init/cycle/const" => "constants {0} form a dependency cycle",
        "init/cycle/type" => "types {0} form a dependency cycle",

        // Compilation.
        "comp/ident/known" => "'{0}' is not a known variable or constant",
        "comp/bool/or/left" => "the left of 'or' must be a boolean",
        "comp/bool/or/right" => "the right of 'or' must be a boolean",
        "comp/bool/and/left" => "the left of 'and' must be a boolean",
        "comp/bool/and/right" => "the right of 'and' must be a boolean",
        "comp/bool/cond" => "the condition of ':' must be a boolean",
        "comp/bool/not" => "'not' needs a boolean",
        "comp/error/eq/a" => "can't compare an error for equality",
        "comp/error/eq/b" => "can't compare against an error",
        "comp/eq/types" => "values of types {0} and {1} can never be equal",
        "comp/call" => "no implementation of '{0}' matches these argument types",
        "comp/list/err" => "an error value can't be an element of a list or tuple",
        "comp/pipe" => "the right of '{0}' must be something applicable",
        "comp/assign/exists" => "can't assign to '{0}': no such variable",
        "comp/assign/const" => "can't assign to constant '{0}'",
        "comp/assign/type" => "can't assign a {1} to variable '{0}'",
        "comp/global/local" => "'global' can only be used inside a command",
        "comp/break" => "'break' outside a 'for' loop",
        "comp/continue" => "'continue' outside a 'for' loop",
        "comp/label" => "'{0}' is not a field of the struct",
        "comp/snippet" => "snippet embeddings failed to compile",

        // Runtime.
        "vm/div/zero" => "division by zero",
        "vm/mod/zero" => "taking the remainder of division by zero",
        "vm/bool/not" => "'not' applied to a non-boolean",
        "vm/bool/or/left" => "the left of 'or' evaluated to a non-boolean",
        "vm/bool/or/right" => "the right of 'or' evaluated to a non-boolean",
        "vm/bool/and/left" => "the left of 'and' evaluated to a non-boolean",
        "vm/bool/and/right" => "the right of 'and' evaluated to a non-boolean",
        "vm/bool/cond" => "a condition evaluated to a non-boolean",
        "vm/index/range" => "index {0} out of range",
        "vm/index/type" => "can't index a value of type {0} by a value of type {1}",
        "vm/slice/range" => "slice {0}::{1} out of range",
        "vm/label" => "'{0}' is not a field of this struct",
        "vm/cast" => "can't cast a value of type {0} to type {1}",
        "vm/unwrap/null" => "'unwrap' applied to NULL",
        "vm/user" => "{0}",
        "vm/dispatch" => "no implementation of '{0}' accepts these arguments",
        "vm/func/apply" => "tried to apply a value that isn't a function",
        "vm/types" => "value fails the type check of '{0}'",
        "vm/for/range" => "can't range over a value of type {0}",
        "vm/enum/range" => "{0} is out of range for enum '{1}'",
        "vm/with/field" => "'with' applied to a non-struct",

        // Service.
        "serv/file" => "couldn't read source file '{0}'",
        "serv/main" => "the script has no 'main' command",
        "serv/var" => "the service has no variable '{0}'",

        _ => return format!("error {} {}", id, args.join(" ")),
    };
    fill(template, args)
}

/// Formats diagnostics with their source line and a caret underline.
///
/// The sources map is keyed by source name (the `source` field of tokens)
/// and holds the full text of each source.
pub struct ErrorFormatter<'a> {
    sources: &'a IndexMap<String, String>,
}

impl<'a> ErrorFormatter<'a> {
    pub fn new(sources: &'a IndexMap<String, String>) -> Self {
        ErrorFormatter { sources }
    }

    /// Render one diagnostic.
    pub fn format(&self, error: &Error) -> String {
        let tok = &error.token;
        let mut out = format!("error: {}: {}\n", error.id, error.message);
        out.push_str(&format!(
            "  --> {}:{}:{}\n",
            tok.source,
            tok.line,
            tok.ch_start + 1
        ));
        if let Some(text) = self.sources.get(&tok.source) {
            if let Some(line) = text.lines().nth(tok.line.saturating_sub(1) as usize) {
                out.push_str(&format!("{:3} | {}\n", tok.line, line));
                let width = (tok.ch_end.saturating_sub(tok.ch_start)).max(1) as usize;
                let underline =
                    " ".repeat(tok.ch_start as usize) + &"^".repeat(width.min(line.len() + 1));
                out.push_str(&format!("    | {}\n", underline));
            }
        }
        out
    }

    /// Render a batch, blank-line separated.
    pub fn format_all(&self, errors: &[Error]) -> String {
        errors
            .iter()
            .map(|e| self.format(e))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenType;

    fn tok() -> Token {
        Token::new(TokenType::Ident, "foo", 1, 8, 11, "test.pf")
    }

    #[test]
    fn test_template_fill() {
        let e = Error::new("comp/ident/known", &tok(), &["foo"]);
        assert_eq!(e.message, "'foo' is not a known variable or constant");
        assert_eq!(e.id, "comp/ident/known");
    }

    #[test]
    fn test_unknown_id_degrades() {
        let e = Error::new("comp/not/a/real/id", &tok(), &["x"]);
        assert!(e.message.contains("comp/not/a/real/id"));
    }

    #[test]
    fn test_trace_starts_with_token() {
        let e = Error::new("vm/div/zero", &tok(), &[]);
        assert_eq!(e.trace.len(), 1);
        let e = e.with_trace(&Token::new(TokenType::Ident, "bar", 2, 0, 3, "test.pf"));
        assert_eq!(e.trace.len(), 2);
    }

    #[test]
    fn test_formatter_shows_line_and_caret() {
        let mut sources = IndexMap::new();
        sources.insert("test.pf".to_string(), "let x = foo\n".to_string());
        let formatter = ErrorFormatter::new(&sources);
        let rendered = formatter.format(&Error::new("comp/ident/known", &tok(), &["foo"]));
        assert!(rendered.contains("test.pf:1:9"));
        assert!(rendered.contains("let x = foo"));
        assert!(rendered.contains("^^^"));
    }
}

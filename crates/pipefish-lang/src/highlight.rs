//! ANSI syntax highlighting for REPL input.
//!
//! One line in, one colored line out. Classification leans on the parser's
//! tables: a word is colored as a function or a type only if the service
//! actually knows it as one.

use crate::lexer;
use crate::parser::Parser;
use colored::{Color, Colorize};
use pipefish_foundation::token::TokenType;

/// The colors of a highlighting theme.
#[derive(Debug, Clone, Copy)]
pub struct Theme {
    pub keyword: Color,
    pub literal: Color,
    pub string: Color,
    pub function: Color,
    pub typename: Color,
    pub comment: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Theme {
            keyword: Color::Magenta,
            literal: Color::Yellow,
            string: Color::Green,
            function: Color::Cyan,
            typename: Color::Blue,
            comment: Color::BrightBlack,
        }
    }
}

/// Colorize one line of source.
pub fn highlight(line: &str, parser: &Parser, theme: &Theme) -> String {
    // Comments never reach the lexer, so split them off first.
    let (code, comment) = match find_comment(line) {
        Some(at) => (&line[..at], Some(&line[at..])),
        None => (line, None),
    };
    let (tokens, _) = lexer::lex("highlight", code);
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::new();
    let mut col = 0usize;
    for tok in &tokens {
        if tok.ty == TokenType::Eof || tok.ty == TokenType::Newline {
            break;
        }
        let start = tok.ch_start as usize;
        let end = (tok.ch_end as usize).min(chars.len());
        if start > col {
            out.push_str(&chars[col..start].iter().collect::<String>());
        }
        let text: String = chars[start.min(chars.len())..end].iter().collect();
        let colored_text = match tok.ty {
            TokenType::Int | TokenType::Float | TokenType::True | TokenType::False => {
                text.color(theme.literal).to_string()
            }
            TokenType::String | TokenType::Rune | TokenType::Snippet => {
                text.color(theme.string).to_string()
            }
            TokenType::And
            | TokenType::Or
            | TokenType::Not
            | TokenType::Else
            | TokenType::Given
            | TokenType::For
            | TokenType::From
            | TokenType::Try
            | TokenType::Break
            | TokenType::Continue
            | TokenType::Valid
            | TokenType::Unwrap
            | TokenType::Global
            | TokenType::Builtin
            | TokenType::Range => text.color(theme.keyword).to_string(),
            TokenType::Log | TokenType::Iflog | TokenType::Prelog => {
                text.color(theme.comment).to_string()
            }
            TokenType::Ident => {
                if parser.typenames.contains(&tok.literal)
                    || parser.parameterized_types.contains(&tok.literal)
                {
                    text.color(theme.typename).to_string()
                } else if parser.functions.contains(&tok.literal) {
                    text.color(theme.function).to_string()
                } else {
                    text
                }
            }
            _ => text,
        };
        out.push_str(&colored_text);
        col = end;
    }
    if col < chars.len() {
        out.push_str(&chars[col..].iter().collect::<String>());
    }
    if let Some(comment) = comment {
        out.push_str(&comment.color(theme.comment).to_string());
    }
    out
}

/// Find the start of a `//` comment outside any string literal.
fn find_comment(line: &str) -> Option<usize> {
    let mut in_string = false;
    let mut previous = '\u{0}';
    let mut byte_ix = 0;
    for c in line.chars() {
        if c == '"' && previous != '\\' {
            in_string = !in_string;
        }
        if !in_string && c == '/' && previous == '/' {
            return Some(byte_ix - 1);
        }
        previous = c;
        byte_ix += c.len_utf8();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{Fix, Parser};

    fn test_parser() -> Parser {
        let mut parser = Parser::new("");
        parser.typenames.insert("int".to_string());
        parser.add_function("len", Fix::Prefix, Vec::new());
        parser
    }

    #[test]
    fn test_highlight_preserves_text() {
        colored::control::set_override(false);
        let parser = test_parser();
        let theme = Theme::default();
        assert_eq!(highlight("len x + 42", &parser, &theme), "len x + 42");
        colored::control::unset_override();
    }

    #[test]
    fn test_highlight_colors_known_words() {
        colored::control::set_override(true);
        let parser = test_parser();
        let theme = Theme::default();
        let lit = highlight("42", &parser, &theme);
        assert!(lit.contains("\u{1b}["));
        colored::control::unset_override();
    }

    #[test]
    fn test_comment_detection() {
        assert_eq!(find_comment("x + 1 // hi"), Some(6));
        assert_eq!(find_comment("\"no // here\""), None);
        assert_eq!(find_comment("plain"), None);
    }
}

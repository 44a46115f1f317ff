//! The Pratt parser.
//!
//! Pipefish has a fixed set of native infixes and a user-extensible set of
//! everything else: declarations install operator literals into per-parser
//! tables keyed by `(literal, fix position)`, and the parser consults those
//! tables to decide whether an identifier is a function application, a
//! value reference, a piece of bling, or a type.
//!
//! # Design
//!
//! - `Parser` — the frozen tables: function names, fix table, type names,
//!   namespace branches. One per namespace; they live in a `ParserArena`
//!   and refer to each other by index, never by pointer.
//! - `ParseRun` — the mutable state of parsing one token stream: current
//!   and peek tokens, bracket nesting, the bling manager, errors.
//! - `BlingManager` — tracks, while a multi-word function's arguments are
//!   being parsed, which bling words are expected next, and rejects strays.

pub mod sig;
pub mod types;

use crate::ast::{AstSig, Node, TypeNode};
use indexmap::{IndexMap, IndexSet};
use pipefish_foundation::error::Error;
use pipefish_foundation::token::{Token, TokenType};

/// Where a user-declared word may appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fix {
    Prefix,
    Infix,
    Suffix,
    /// Bling between two value parameters.
    Midfix,
    /// Bling with no value parameters after it.
    Endfix,
    /// Bling directly after a prefix function's name, before its arguments.
    Forefix,
    /// A function taking no arguments at all.
    Unfix,
}

// The precedence ladder, loosest first. Application (`FPREFIX`) binds
// looser than arithmetic but tighter than the comma, so `foo 1 + 2, 3`
// reads as `foo((1+2), 3)`.
pub const LOWEST: i32 = 0;
pub const SEMICOLON: i32 = 1;
pub const FUNC_P: i32 = 4;
pub const GIVEN_P: i32 = 5;
pub const COLON_P: i32 = 6;
pub const MAGIC_SEMI: i32 = 7;
pub const ASSIGN_P: i32 = 8;
pub const PIPING_P: i32 = 9;
pub const OR_P: i32 = 10;
pub const AND_P: i32 = 11;
pub const NOT_P: i32 = 12;
pub const EQ_P: i32 = 13;
pub const CMP_P: i32 = 14;
pub const FPREFIX: i32 = 15;
pub const COMMA_P: i32 = 16;
pub const SUM_P: i32 = 17;
pub const PRODUCT_P: i32 = 18;
pub const PAIR_P: i32 = 19;
pub const MINUS_P: i32 = 20;
pub const INDEX_P: i32 = 21;

/// One overload's bling words, in order, with their positions.
pub type BlingPattern = Vec<(String, Fix)>;

/// The identifier tables of one namespace. Populated by the initializer,
/// then constant for the service's lifetime.
#[derive(Debug, Clone, Default)]
pub struct Parser {
    pub functions: IndexSet<String>,
    /// User-declared words by `(literal, position)`.
    pub fixes: IndexSet<(String, Fix)>,
    pub typenames: IndexSet<String>,
    pub enum_type_names: IndexSet<String>,
    pub enum_element_names: IndexSet<String>,
    pub parameterized_types: IndexSet<String>,
    /// Function name → the bling pattern of each overload.
    pub bling_patterns: IndexMap<String, Vec<BlingPattern>>,
    /// Namespaces visible from this parser, as arena indices.
    pub namespace_branch: IndexMap<String, usize>,
    /// The dotted path that reaches this parser, e.g. `"zort."`.
    pub namespace_path: String,
    pub private: bool,
}

impl Parser {
    pub fn new(namespace_path: &str) -> Self {
        let mut parser = Parser {
            namespace_path: namespace_path.to_string(),
            ..Parser::default()
        };
        for name in ["any", "enum", "struct"] {
            parser.typenames.insert(name.to_string());
        }
        parser
    }

    pub fn has_fix(&self, literal: &str, fix: Fix) -> bool {
        self.fixes.contains(&(literal.to_string(), fix))
    }

    /// Is this word the head of a type expression?
    pub fn is_type_prefix(&self, literal: &str) -> bool {
        literal == "..."
            || self.typenames.contains(literal)
            || self.parameterized_types.contains(literal)
            || types::PSEUDOTYPES.contains(&literal)
    }

    pub fn is_enum_element(&self, literal: &str) -> bool {
        self.enum_element_names.contains(literal)
    }

    /// Install one overload of a function: its name, fix position, and
    /// bling pattern.
    pub fn add_function(&mut self, name: &str, fix: Fix, pattern: BlingPattern) {
        self.functions.insert(name.to_string());
        self.fixes.insert((name.to_string(), fix));
        for (word, word_fix) in &pattern {
            self.fixes.insert((word.clone(), *word_fix));
        }
        self.bling_patterns
            .entry(name.to_string())
            .or_default()
            .push(pattern);
    }
}

/// All the parsers of a service, indexed densely. Index 0 is the root.
#[derive(Debug, Default)]
pub struct ParserArena {
    pub parsers: Vec<Parser>,
}

impl ParserArena {
    pub fn new() -> Self {
        ParserArena {
            parsers: vec![Parser::new("")],
        }
    }

    pub fn root(&self) -> &Parser {
        &self.parsers[0]
    }

    pub fn add(&mut self, parser: Parser) -> usize {
        self.parsers.push(parser);
        self.parsers.len() - 1
    }

    /// Resolve a token's namespace prefix to the parser that owns it.
    pub fn resolve(&self, from: usize, tok: &Token) -> Result<usize, Error> {
        let mut current = from;
        for segment in tok.namespace_segments() {
            match self.parsers[current].namespace_branch.get(segment) {
                Some(&next) => current = next,
                None => return Err(Error::new("parse/namespace/exists", tok, &[segment])),
            }
        }
        Ok(current)
    }
}

/// Tracks expected bling while a multi-word function's arguments parse.
#[derive(Debug, Default)]
pub struct BlingManager {
    stack: Vec<BlingFrame>,
}

#[derive(Debug)]
struct BlingFrame {
    sequences: Vec<BlingPattern>,
    consumed: usize,
}

impl BlingManager {
    pub fn start_function(&mut self, patterns: &[BlingPattern]) {
        self.stack.push(BlingFrame {
            sequences: patterns.to_vec(),
            consumed: 0,
        });
    }

    pub fn stop_function(&mut self) {
        self.stack.pop();
    }

    fn candidates(&self, word: &str) -> Vec<Fix> {
        match self.stack.last() {
            None => Vec::new(),
            Some(frame) => frame
                .sequences
                .iter()
                .filter_map(|seq| {
                    seq.get(frame.consumed)
                        .filter(|(w, _)| w == word)
                        .map(|(_, f)| *f)
                })
                .collect(),
        }
    }

    /// Is `word` expected next in any position?
    pub fn can_bling(&self, word: &str) -> bool {
        !self.candidates(word).is_empty()
    }

    pub fn can_bling_at(&self, word: &str, fix: Fix) -> bool {
        self.candidates(word).contains(&fix)
    }

    /// Record that `word` was consumed, narrowing the live overloads.
    pub fn do_bling(&mut self, word: &str) {
        if let Some(frame) = self.stack.last_mut() {
            frame
                .sequences
                .retain(|seq| seq.get(frame.consumed).map(|(w, _)| w.as_str()) == Some(word));
            frame.consumed += 1;
        }
    }
}

/// Everything recorded during one parse, beyond the AST itself.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub errors: Vec<Error>,
    /// Parameterized-type instances mentioned, by literal form, for the
    /// initializer to materialize.
    pub instances: IndexMap<String, TypeNode>,
}

/// The mutable state of parsing one token stream.
pub struct ParseRun<'a> {
    arena: &'a ParserArena,
    /// The parser whose namespace this stream belongs to.
    root: usize,
    tokens: Vec<Token>,
    pos: usize,
    pub cur: Token,
    pub peek: Token,
    nesting: Vec<Token>,
    pub errors: Vec<Error>,
    pub bling: BlingManager,
    pub instances: IndexMap<String, TypeNode>,
    /// When false, mentions of parameterized instances are not recorded
    /// (set after initialization so the REPL doesn't pile them up).
    pub record_instances: bool,
}

fn eof_token() -> Token {
    Token::synthetic(TokenType::Eof, "EOF")
}

impl<'a> ParseRun<'a> {
    pub fn new(arena: &'a ParserArena, root: usize, tokens: Vec<Token>) -> Self {
        let mut run = ParseRun {
            arena,
            root,
            tokens,
            pos: 0,
            cur: eof_token(),
            peek: eof_token(),
            nesting: Vec::new(),
            errors: Vec::new(),
            bling: BlingManager::default(),
            instances: IndexMap::new(),
            record_instances: true,
        };
        run.advance();
        run.advance();
        run
    }

    pub fn root_parser(&self) -> &Parser {
        &self.arena.parsers[self.root]
    }

    fn advance(&mut self) {
        self.cur = std::mem::replace(
            &mut self.peek,
            self.tokens.get(self.pos).cloned().unwrap_or_else(eof_token),
        );
        self.pos += 1;
    }

    pub fn next_token(&mut self) {
        self.check_nesting();
        self.advance();
    }

    fn check_nesting(&mut self) {
        match self.cur.ty {
            TokenType::LParen | TokenType::LBrack | TokenType::LBrace => {
                self.nesting.push(self.cur.clone());
            }
            TokenType::RParen | TokenType::RBrack | TokenType::RBrace => {
                if self.nesting.pop().is_none() {
                    self.throw("parse/close", &self.cur.clone(), &[&self.cur.literal.clone()]);
                }
            }
            _ => {}
        }
    }

    pub fn throw(&mut self, id: &str, tok: &Token, args: &[&str]) {
        self.errors.push(Error::new(id, tok, args));
    }

    pub fn errors_exist(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn outcome(self) -> ParseOutcome {
        ParseOutcome {
            errors: self.errors,
            instances: self.instances,
        }
    }

    /// The parser that resolves `tok`, following its namespace prefix.
    pub fn resolving_parser(&mut self, tok: &Token) -> Option<&'a Parser> {
        match self.arena.resolve(self.root, tok) {
            Ok(ix) => Some(&self.arena.parsers[ix]),
            Err(e) => {
                self.errors.push(e);
                None
            }
        }
    }

    /// Can `tok` parse as the given fix position in its namespace?
    pub fn can_parse(&mut self, tok: &Token, fix: Fix) -> (bool, Option<&'a Parser>) {
        match self.resolving_parser(&tok.clone()) {
            None => (false, None),
            Some(p) => (p.has_fix(&tok.literal, fix), Some(p)),
        }
    }

    // --- Precedence tables ---

    fn native_precedence(&self, tok: &Token) -> Option<i32> {
        Some(match tok.ty {
            TokenType::Semicolon | TokenType::Newline => SEMICOLON,
            TokenType::Given => GIVEN_P,
            TokenType::Colon => COLON_P,
            TokenType::MagicColon => COLON_P,
            TokenType::MagicSemicolon => MAGIC_SEMI,
            TokenType::Assign | TokenType::GvnAssign => ASSIGN_P,
            TokenType::Pipe | TokenType::Mapping | TokenType::Filter => PIPING_P,
            TokenType::Or => OR_P,
            TokenType::And => AND_P,
            TokenType::Not => NOT_P,
            TokenType::Eq | TokenType::NotEq => EQ_P,
            TokenType::Comma => COMMA_P,
            TokenType::LBrack => INDEX_P,
            TokenType::Iflog => COLON_P,
            TokenType::For => GIVEN_P,
            _ => return None,
        })
    }

    fn operator_precedence(&self, literal: &str) -> i32 {
        match literal {
            "+" | "-" | "&" => SUM_P,
            "*" | "/" | "mod" | "div" => PRODUCT_P,
            "::" => PAIR_P,
            "<" | "<=" | ">" | ">=" => CMP_P,
            "in" => CMP_P,
            _ => CMP_P,
        }
    }

    pub fn peek_precedence(&mut self) -> i32 {
        if let Some(p) = self.native_precedence(&self.peek.clone()) {
            return p;
        }
        // A spread binds like an index.
        if self.peek.ty == TokenType::DotDotDot {
            return INDEX_P;
        }
        if self.peek.ty == TokenType::Ident {
            let peek = self.peek.clone();
            let (is_infix, rp) = self.can_parse(&peek, Fix::Infix);
            if is_infix {
                return self.operator_precedence(&peek.literal);
            }
            // Suffixes and type annotations bind tightest of all, so the
            // suffix loop gets a chance at them.
            let is_suffix = self.can_parse(&peek, Fix::Suffix).0;
            let is_type = rp.map(|p| p.is_type_prefix(&peek.literal)).unwrap_or(false);
            if is_suffix || is_type {
                return INDEX_P;
            }
        }
        LOWEST
    }

    fn cur_precedence(&mut self) -> i32 {
        if let Some(p) = self.native_precedence(&self.cur.clone()) {
            return p;
        }
        if self.cur.ty == TokenType::Ident {
            return self.operator_precedence(&self.cur.literal.clone());
        }
        LOWEST
    }

    // --- The positional functionality test ---

    /// Decide whether the current identifier is being applied as a function
    /// or mentioned as a value.
    pub fn is_positionally_functional(&mut self) -> bool {
        // 1. Followed by an assignment or a closing delimiter: a value.
        if matches!(
            self.peek.ty,
            TokenType::Assign
                | TokenType::GvnAssign
                | TokenType::RParen
                | TokenType::RBrack
                | TokenType::RBrace
                | TokenType::Comma
                | TokenType::Colon
                | TokenType::MagicColon
                | TokenType::Pipe
                | TokenType::Mapping
                | TokenType::Filter
        ) {
            return false;
        }
        if self.bling.can_bling(&self.peek.literal) {
            return false;
        }
        // 2. `type` applied to a type expression is a function.
        let cur = self.cur.clone();
        if cur.literal == "type" {
            let peek_lit = self.peek.literal.clone();
            if let Some(rp) = self.resolving_parser(&self.peek.clone()) {
                if rp.is_type_prefix(&peek_lit) {
                    return true;
                }
            }
        }
        let (is_function, is_typename, is_unfix) = match self.resolving_parser(&cur) {
            Some(p) => (
                p.functions.contains(&cur.literal),
                p.typenames.contains(&cur.literal),
                p.has_fix(&cur.literal, Fix::Unfix),
            ),
            None => return false,
        };
        // 3. Both a function and a type name: the type-is-functional test.
        if is_function && is_typename {
            return self.type_is_functional();
        }
        // An unfix with nothing applicable after it stays in fix position.
        if is_function
            && is_unfix
            && !(self.peek.ty.is_literal()
                || matches!(
                    self.peek.ty,
                    TokenType::LParen | TokenType::LBrack | TokenType::Ident | TokenType::Snippet
                ))
        {
            return false;
        }
        // 4. A known function not at the end of input is being applied.
        if is_function && self.peek.ty != TokenType::Eof {
            return true;
        }
        // 5. Followed by a literal or an opening delimiter: applied.
        if self.peek.ty.is_literal()
            || matches!(self.peek.ty, TokenType::LParen | TokenType::LBrack)
        {
            return true;
        }
        if self.peek.ty != TokenType::Ident {
            return false;
        }
        // 6. Followed by an infix or suffix: the current word is a value.
        let peek = self.peek.clone();
        if self.can_parse(&peek, Fix::Infix).0 {
            return false;
        }
        if self.can_parse(&peek, Fix::Suffix).0 {
            return false;
        }
        // 7. Anything else is an application.
        true
    }

    /// The type-is-functional variant: is a type name being used as a
    /// constructor here?
    fn type_is_functional(&mut self) -> bool {
        if self.bling.can_bling(&self.peek.literal) {
            return false;
        }
        if matches!(
            self.peek.ty,
            TokenType::RParen
                | TokenType::RBrack
                | TokenType::RBrace
                | TokenType::Comma
                | TokenType::Colon
                | TokenType::MagicColon
                | TokenType::Pipe
                | TokenType::Mapping
                | TokenType::Filter
                | TokenType::Eof
        ) || self.peek.literal == "?"
            || self.peek.literal == "!"
            || self.peek.literal == "/"
            || self.peek.literal == "&"
        {
            return false;
        }
        if matches!(self.peek.ty, TokenType::Snippet | TokenType::LBrack) {
            return true;
        }
        if self.peek.ty.is_literal() || self.peek.ty == TokenType::LParen {
            return true;
        }
        let peek = self.peek.clone();
        if self.can_parse(&peek, Fix::Infix).0 {
            return false;
        }
        true
    }

    // --- The Pratt loop ---

    pub fn parse_tokenized_chunk(&mut self) -> Option<Node> {
        let node = self.parse_expression(LOWEST);
        self.next_token();
        if self.cur.ty != TokenType::Eof {
            self.throw(
                "parse/expected",
                &self.cur.clone(),
                &[&self.cur.literal.clone()],
            );
        }
        node
    }

    pub fn parse_expression(&mut self, precedence: i32) -> Option<Node> {
        if self.cur.ty.is_literal()
            && (self.peek.ty.is_literal() || self.peek.ty == TokenType::LParen)
        {
            self.throw(
                "parse/before/a",
                &self.cur.clone(),
                &[&self.peek.literal.clone()],
            );
        }
        let mut left = self.parse_prefix_position()?;

        // Trailing endfix bling words attach to the argument list.
        while self.bling.can_bling_at(&self.peek.literal, Fix::Endfix) {
            self.next_token();
            self.bling.do_bling(&self.cur.literal.clone());
            let bling = Node::Bling {
                token: self.cur.clone(),
                value: self.cur.literal.clone(),
            };
            left = comma_join(left, bling);
        }
        // Midfix bling words behave like infix operators.
        while self.bling.can_bling_at(&self.peek.literal, Fix::Midfix) {
            self.bling.do_bling(&self.peek.literal.clone());
            self.next_token();
            left = self.parse_bling_infix(left)?;
            while self.bling.can_bling_at(&self.peek.literal, Fix::Endfix) {
                self.next_token();
                self.bling.do_bling(&self.cur.literal.clone());
                let bling = Node::Bling {
                    token: self.cur.clone(),
                    value: self.cur.literal.clone(),
                };
                left = comma_join(left, bling);
            }
        }

        while precedence < self.peek_precedence() {
            // Suffixes and type suffixes bind before infixes.
            loop {
                let peek = self.peek.clone();
                let (is_suffix, rp) = self.can_parse(&peek, Fix::Suffix);
                let rp = match rp {
                    Some(p) => p,
                    None => return None,
                };
                let is_type = rp.is_type_prefix(&peek.literal) && peek.ty == TokenType::Ident;
                if !(is_suffix || is_type || peek.ty == TokenType::DotDotDot) {
                    break;
                }
                if is_type || peek.ty == TokenType::DotDotDot {
                    let tok = self.peek.clone();
                    let type_node = self.parse_type(types::T_LOWEST)?;
                    left = Node::TypeSuffix {
                        token: tok,
                        type_node,
                        args: self.listify(left),
                    };
                } else {
                    self.next_token();
                    left = Node::Suffix {
                        token: self.cur.clone(),
                        operator: self.cur.literal.clone(),
                        args: self.listify(left),
                    };
                }
            }
            if self.peek.ty == TokenType::Log {
                self.next_token();
                let log_tok = self.cur.clone();
                let parts = self.parse_log_parts(&log_tok);
                left = Node::LogExpr {
                    token: log_tok.clone(),
                    kind: crate::ast::LogKind::Plain,
                    text: log_tok.literal.clone(),
                    parts,
                    left: Some(Box::new(left)),
                    right: None,
                };
            }
            if precedence >= self.peek_precedence() {
                break;
            }
            let peek = self.peek.clone();
            let is_native = self.native_precedence(&peek).is_some();
            let (is_user_infix, rp) = self.can_parse(&peek, Fix::Infix);
            if rp.is_none() {
                return None;
            }
            if !is_native && !is_user_infix {
                break;
            }
            self.next_token();
            left = match self.cur.ty {
                TokenType::And
                | TokenType::Or
                | TokenType::Colon
                | TokenType::Semicolon
                | TokenType::Newline => self.parse_lazy_infix(left)?,
                TokenType::LBrack => self.parse_index(left)?,
                TokenType::Pipe | TokenType::Mapping | TokenType::Filter => {
                    self.parse_streaming(left)?
                }
                TokenType::Iflog => self.parse_iflog(left)?,
                TokenType::For => self.parse_for_as_infix(left)?,
                TokenType::Eq | TokenType::NotEq => self.parse_comparison(left)?,
                _ => {
                    let cur = self.cur.clone();
                    let patterns = self
                        .resolving_parser(&cur)
                        .and_then(|p| p.bling_patterns.get(&cur.literal).cloned())
                        .unwrap_or_default();
                    // The name itself is the first word of an infix pattern.
                    let trimmed: Vec<BlingPattern> = patterns
                        .iter()
                        .map(|pat| {
                            pat.iter()
                                .skip_while(|(w, _)| *w == cur.literal)
                                .cloned()
                                .collect()
                        })
                        .collect();
                    self.bling.start_function(&trimmed);
                    let result = self.parse_infix(left);
                    self.bling.stop_function();
                    result?
                }
            };
        }
        Some(left)
    }

    /// Parse whatever stands in prefix position.
    fn parse_prefix_position(&mut self) -> Option<Node> {
        let tok = self.cur.clone();
        let mut left = match tok.ty {
            TokenType::Break => {
                if self.is_positionally_functional() {
                    self.next_token();
                    let value = self.parse_expression(FUNC_P)?;
                    Node::BreakExpr {
                        token: tok,
                        value: Some(Box::new(value)),
                    }
                } else {
                    Node::BreakExpr {
                        token: tok,
                        value: None,
                    }
                }
            }
            TokenType::Continue => Node::ContinueExpr { token: tok },
            TokenType::Else => Node::BoolLit {
                token: tok,
                value: true,
            },
            TokenType::True | TokenType::False => Node::BoolLit {
                token: tok.clone(),
                value: tok.ty == TokenType::True,
            },
            TokenType::Float => {
                let value = tok.literal.parse().unwrap_or(0.0);
                Node::FloatLit { token: tok, value }
            }
            TokenType::Int => {
                let value = tok.literal.parse().unwrap_or(0);
                Node::IntLit { token: tok, value }
            }
            TokenType::String => Node::StringLit {
                token: tok.clone(),
                value: tok.literal.clone(),
            },
            TokenType::Rune => Node::RuneLit {
                token: tok.clone(),
                value: tok.literal.chars().next().unwrap_or('\u{0}'),
            },
            TokenType::Snippet => self.parse_snippet(tok)?,
            TokenType::For => self.parse_for_expression()?,
            TokenType::From => self.parse_from_expression()?,
            TokenType::Try => self.parse_try_expression()?,
            TokenType::LBrack => self.parse_list_expression()?,
            TokenType::LParen => self.parse_grouped_expression()?,
            TokenType::Prelog => {
                let parts = self.parse_log_parts(&tok);
                self.next_token();
                let right = self.parse_expression(LOWEST)?;
                Node::LogExpr {
                    token: tok.clone(),
                    kind: crate::ast::LogKind::Pre,
                    text: tok.literal.clone(),
                    parts,
                    left: None,
                    right: Some(Box::new(right)),
                }
            }
            TokenType::Not | TokenType::Unwrap | TokenType::Valid | TokenType::Range => {
                self.parse_native_prefix()?
            }
            TokenType::Global => {
                self.next_token();
                let right = self.parse_expression(FPREFIX)?;
                Node::Prefix {
                    token: tok,
                    operator: "global".to_string(),
                    args: vec![right],
                }
            }
            TokenType::Golang => Node::GolangExpr { token: tok },
            TokenType::Builtin => {
                self.next_token();
                if self.cur.ty != TokenType::String {
                    self.throw("parse/follow", &tok, &["builtin"]);
                    return None;
                }
                let name = Node::StringLit {
                    token: self.cur.clone(),
                    value: self.cur.literal.clone(),
                };
                self.next_token();
                return Some(Node::Prefix {
                    token: tok,
                    operator: "builtin".to_string(),
                    args: vec![name],
                });
            }
            TokenType::Ident => self.parse_identifier_position()?,
            _ => {
                self.throw("parse/prefix", &tok, &[tok.ty.name()]);
                return None;
            }
        };
        // An inline snippet after an expression joins it as an argument.
        if self.peek.ty == TokenType::Snippet {
            let snippet_tok = self.peek.clone();
            let right = self.parse_snippet(snippet_tok)?;
            left = comma_join(left, right);
            self.next_token();
        }
        Some(left)
    }

    /// The identifier-in-prefix-position decision tree.
    fn parse_identifier_position(&mut self) -> Option<Node> {
        let tok = self.cur.clone();
        let resolving = self.resolving_parser(&tok)?;
        // A type name gets type-expression treatment.
        if resolving.is_type_prefix(&tok.literal) && tok.literal != "func" {
            return self.parse_type_in_expression();
        }
        if tok.literal == "func" {
            return self.parse_lambda_expression();
        }
        if self.is_positionally_functional() {
            if self.bling.can_bling_at(&tok.literal, Fix::Forefix) {
                // Bling directly after the function name.
                self.bling.do_bling(&tok.literal);
                let bling = Node::Bling {
                    token: tok.clone(),
                    value: tok.literal.clone(),
                };
                self.next_token();
                let rest = self.parse_expression(FPREFIX)?;
                return Some(comma_join(bling, rest));
            }
            let patterns = self
                .resolving_parser(&tok)
                .and_then(|p| p.bling_patterns.get(&tok.literal).cloned())
                .unwrap_or_default();
            self.bling.start_function(&patterns);
            let result = self.parse_prefix_application();
            self.bling.stop_function();
            return result;
        }
        // Not functional: an unfix, a piece of bling, or a plain value.
        let (is_unfix, _) = self.can_parse(&tok, Fix::Unfix);
        if is_unfix {
            return Some(Node::Unfix {
                token: tok.clone(),
                operator: tok.literal.clone(),
            });
        }
        if self.bling.can_bling(&tok.literal) {
            self.bling.do_bling(&tok.literal);
            return Some(Node::Bling {
                token: tok.clone(),
                value: tok.literal.clone(),
            });
        }
        Some(Node::Ident {
            token: tok.clone(),
            name: tok.literal.clone(),
        })
    }

    /// A function applied in prefix position: `foo args`.
    fn parse_prefix_application(&mut self) -> Option<Node> {
        let tok = self.cur.clone();
        self.next_token();
        let right = if self.cur.ty == TokenType::LParen || tok.literal == "-" {
            self.parse_expression(MINUS_P)?
        } else {
            self.parse_expression(FPREFIX)?
        };
        Some(Node::Prefix {
            token: tok.clone(),
            operator: tok.literal.clone(),
            args: self.listify(right),
        })
    }

    /// `not`, `unwrap`, `valid`, `range`: evaluate the right side, then
    /// apply the operation, without function-table dispatch.
    fn parse_native_prefix(&mut self) -> Option<Node> {
        let tok = self.cur.clone();
        let precedence = match tok.ty {
            TokenType::Not => NOT_P,
            _ => FPREFIX,
        };
        self.next_token();
        let right = self.parse_expression(precedence);
        match right {
            None => {
                self.throw("parse/follow", &tok, &[&tok.literal]);
                None
            }
            Some(right) => Some(Node::Prefix {
                token: tok.clone(),
                operator: tok.literal.clone(),
                args: vec![right],
            }),
        }
    }

    fn parse_grouped_expression(&mut self) -> Option<Node> {
        self.next_token();
        if self.cur.ty == TokenType::RParen {
            return Some(Node::Nothing {
                token: self.cur.clone(),
            });
        }
        let exp = self.parse_expression(LOWEST)?;
        if self.peek.ty != TokenType::RParen {
            self.throw(
                "parse/expected",
                &self.peek.clone(),
                &[&self.peek.literal.clone()],
            );
            return None;
        }
        self.next_token();
        Some(exp)
    }

    fn parse_list_expression(&mut self) -> Option<Node> {
        let tok = self.cur.clone();
        self.next_token();
        if self.cur.ty == TokenType::RBrack {
            return Some(Node::ListExpr {
                token: tok.clone(),
                inner: Box::new(Node::Nothing { token: tok }),
            });
        }
        let exp = self.parse_expression(LOWEST)?;
        if self.peek.ty != TokenType::RBrack {
            self.throw(
                "parse/expected",
                &self.peek.clone(),
                &[&self.peek.literal.clone()],
            );
            return None;
        }
        self.next_token();
        Some(Node::ListExpr {
            token: tok,
            inner: Box::new(exp),
        })
    }

    fn parse_index(&mut self, left: Node) -> Option<Node> {
        let tok = self.cur.clone();
        self.next_token();
        let index = self.parse_expression(LOWEST)?;
        if self.peek.ty != TokenType::RBrack {
            self.throw(
                "parse/expected",
                &self.peek.clone(),
                &[&self.peek.literal.clone()],
            );
            return None;
        }
        self.next_token();
        Some(Node::IndexExpr {
            token: tok,
            left: Box::new(left),
            index: Box::new(index),
        })
    }

    fn parse_lazy_infix(&mut self, left: Node) -> Option<Node> {
        let tok = self.cur.clone();
        let precedence = self.cur_precedence();
        self.next_token();
        let right = self.parse_expression(precedence)?;
        Some(Node::LazyInfix {
            token: tok.clone(),
            operator: tok.literal.clone(),
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_comparison(&mut self, left: Node) -> Option<Node> {
        let tok = self.cur.clone();
        let precedence = self.cur_precedence();
        self.next_token();
        let right = self.parse_expression(precedence)?;
        Some(Node::Comparison {
            token: tok.clone(),
            operator: tok.literal.clone(),
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// A midfix bling word treated as an infix: `troz 8 nerf 9`.
    fn parse_bling_infix(&mut self, left: Node) -> Option<Node> {
        let tok = self.cur.clone();
        self.next_token();
        let right = self.parse_expression(FPREFIX)?;
        let mut args = self.listify(left);
        args.push(Node::Bling {
            token: tok.clone(),
            value: tok.literal.clone(),
        });
        args.extend(self.listify(right));
        Some(Node::Infix {
            token: tok.clone(),
            operator: tok.literal.clone(),
            args,
        })
    }

    fn parse_infix(&mut self, left: Node) -> Option<Node> {
        if matches!(self.cur.ty, TokenType::Assign | TokenType::GvnAssign) {
            return self.parse_assignment(left);
        }
        if self.cur.ty == TokenType::MagicColon {
            return self.parse_declaration_colon(left);
        }
        if self.cur.ty == TokenType::Given {
            // `body given block`: keep the shape, the compiler walks it.
            let tok = self.cur.clone();
            self.next_token();
            let right = self.parse_expression(GIVEN_P)?;
            return Some(Node::Infix {
                token: tok.clone(),
                operator: "given".to_string(),
                args: vec![
                    left,
                    Node::Bling {
                        token: tok.clone(),
                        value: "given".to_string(),
                    },
                    right,
                ],
            });
        }
        let tok = self.cur.clone();
        let precedence = self.cur_precedence();
        self.next_token();
        let right = self.parse_expression(precedence)?;
        if tok.ty == TokenType::Comma || tok.ty == TokenType::MagicSemicolon {
            let comma_bling = Node::Bling {
                token: tok.clone(),
                value: tok.literal.clone(),
            };
            return Some(Node::Infix {
                token: tok.clone(),
                operator: tok.literal.clone(),
                args: vec![left, comma_bling, right],
            });
        }
        let mut args = self.listify(left);
        args.push(Node::Bling {
            token: tok.clone(),
            value: tok.literal.clone(),
        });
        args.extend(self.listify(right));
        Some(Node::Infix {
            token: tok.clone(),
            operator: tok.literal.clone(),
            args,
        })
    }

    fn parse_assignment(&mut self, left: Node) -> Option<Node> {
        let tok = self.cur.clone();
        let precedence = self.cur_precedence();
        self.next_token();
        let right = self.parse_expression(precedence)?;
        Some(Node::Assignment {
            token: tok,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// A function-declaration colon: turns `qux(z) : body` into the
    /// assignment of a lambda to `qux`, for local definitions in `given`
    /// blocks.
    fn parse_declaration_colon(&mut self, left: Node) -> Option<Node> {
        let tok = self.cur.clone();
        self.next_token();
        let right = self.parse_expression(FUNC_P)?;
        let (body, given) = match right {
            Node::Infix {
                ref operator,
                ref args,
                ..
            } if operator == "given" && args.len() == 3 => {
                (args[0].clone(), Some(Box::new(args[2].clone())))
            }
            other => (other, None),
        };
        match left {
            Node::Prefix {
                token: name_tok,
                operator,
                args,
            } => {
                let sig = self.sig_from_args(&args, &TypeNode::named("any?"))?;
                Some(Node::Assignment {
                    token: tok.clone(),
                    left: Box::new(Node::Ident {
                        token: name_tok.clone(),
                        name: operator,
                    }),
                    right: Box::new(Node::FuncExpr {
                        token: tok,
                        sig,
                        rets: AstSig::new(),
                        body: Box::new(body),
                        given,
                    }),
                })
            }
            other => {
                self.throw("parse/sig/a", other.token(), &[]);
                None
            }
        }
    }

    fn parse_iflog(&mut self, left: Node) -> Option<Node> {
        let tok = self.cur.clone();
        let precedence = self.cur_precedence();
        let parts = self.parse_log_parts(&tok);
        self.next_token();
        let right = self.parse_expression(precedence)?;
        Some(Node::LogExpr {
            token: tok.clone(),
            kind: crate::ast::LogKind::If,
            text: tok.literal.clone(),
            parts,
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        })
    }

    /// `->`, `>>`, `?>`: a bare function name on the right becomes an
    /// application to `that`.
    fn parse_streaming(&mut self, left: Node) -> Option<Node> {
        let tok = self.cur.clone();
        let precedence = self.cur_precedence();
        self.next_token();
        let right = self.parse_expression(precedence)?;
        let right = self.desugar_pipe_target(right);
        Some(Node::Piping {
            token: tok.clone(),
            operator: tok.literal.clone(),
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn desugar_pipe_target(&mut self, exp: Node) -> Node {
        if let Node::Ident { token, name } = &exp {
            let that = Node::Ident {
                token: Token::synthetic(TokenType::Ident, "that"),
                name: "that".to_string(),
            };
            if self.root_parser().functions.contains(name) {
                return Node::Prefix {
                    token: token.clone(),
                    operator: name.clone(),
                    args: vec![that],
                };
            }
            let (is_suffix, _) = self.can_parse(token, Fix::Suffix);
            if is_suffix {
                return Node::Suffix {
                    token: token.clone(),
                    operator: name.clone(),
                    args: vec![that],
                };
            }
        }
        exp
    }

    fn parse_try_expression(&mut self) -> Option<Node> {
        let try_tok = self.cur.clone();
        self.next_token();
        if self.cur.ty == TokenType::Colon {
            self.next_token();
            let exp = self.parse_expression(COLON_P)?;
            return Some(Node::TryExpr {
                token: try_tok,
                var_name: String::new(),
                right: Box::new(exp),
            });
        }
        if self.cur.ty == TokenType::Ident {
            let var_name = self.cur.literal.clone();
            self.next_token();
            if self.cur.ty != TokenType::Colon {
                self.throw("parse/try/colon", &self.cur.clone(), &[]);
                return None;
            }
            self.next_token();
            let exp = self.parse_expression(COLON_P)?;
            return Some(Node::TryExpr {
                token: try_tok,
                var_name,
                right: Box::new(exp),
            });
        }
        self.throw("parse/try/ident", &self.cur.clone(), &[]);
        None
    }

    fn parse_for_as_infix(&mut self, left: Node) -> Option<Node> {
        let mut exp = self.parse_for_expression()?;
        if let Node::ForExpr { bound, .. } = &mut exp {
            *bound = Some(Box::new(left));
        }
        Some(exp)
    }

    fn parse_for_expression(&mut self) -> Option<Node> {
        let for_tok = self.cur.clone();
        self.next_token();
        // `for :` is an infinite loop.
        if self.cur.ty == TokenType::Colon {
            self.next_token();
            let body = self.parse_expression(COLON_P)?;
            return Some(Node::ForExpr {
                token: for_tok,
                initializer: None,
                condition: None,
                update: None,
                body: Box::new(body),
                bound: None,
                given: None,
            });
        }
        let pieces = self.parse_expression(GIVEN_P)?;
        let (header, body) = match pieces {
            Node::LazyInfix {
                operator,
                left,
                right,
                ..
            } if operator == ":" => (*left, *right),
            other => {
                self.throw("parse/for/colon", other.token(), &[]);
                return None;
            }
        };
        // Two magic semicolons: a three-part header.
        if let Node::Infix {
            token: semi_tok,
            args,
            ..
        } = &header
        {
            if semi_tok.ty == TokenType::MagicSemicolon {
                let left_part = &args[0];
                let update = &args[2];
                if let Node::Infix {
                    token: inner_tok,
                    args: inner_args,
                    ..
                } = left_part
                {
                    if inner_tok.ty == TokenType::MagicSemicolon {
                        return Some(Node::ForExpr {
                            token: for_tok,
                            initializer: Some(Box::new(inner_args[0].clone())),
                            condition: Some(Box::new(inner_args[2].clone())),
                            update: Some(Box::new(update.clone())),
                            body: Box::new(body),
                            bound: None,
                            given: None,
                        });
                    }
                }
                self.throw("parse/for/semicolon", &for_tok, &[]);
                return None;
            }
        }
        // One-part header: a condition or a range.
        Some(Node::ForExpr {
            token: for_tok,
            initializer: None,
            condition: Some(Box::new(header)),
            update: None,
            body: Box::new(body),
            bound: None,
            given: None,
        })
    }

    fn parse_from_expression(&mut self) -> Option<Node> {
        let from_tok = self.cur.clone();
        self.next_token();
        let expression = self.parse_expression(FUNC_P)?;
        let (mut expression, given_block) = match expression {
            Node::Infix {
                ref operator,
                ref args,
                ..
            } if operator == "given" && args.len() == 3 => {
                (args[0].clone(), Some(Box::new(args[2].clone())))
            }
            other => (other, None),
        };
        match &mut expression {
            Node::ForExpr { given, .. } => {
                *given = given_block;
                Some(expression)
            }
            _ => {
                self.throw("parse/from", &from_tok, &[]);
                None
            }
        }
    }

    fn parse_lambda_expression(&mut self) -> Option<Node> {
        let func_tok = self.cur.clone();
        self.next_token();
        let rhs = self.parse_expression(FUNC_P)?;
        let (root, given) = match rhs {
            Node::Infix {
                ref operator,
                ref args,
                ..
            } if operator == "given" && args.len() == 3 => {
                (args[0].clone(), Some(Box::new(args[2].clone())))
            }
            other => (other, None),
        };
        let (sig_part, body) = match root {
            Node::LazyInfix {
                operator,
                left,
                right,
                ..
            } if operator == ":" => (*left, *right),
            other => {
                self.throw("parse/colon", other.token(), &[]);
                return None;
            }
        };
        // A `|` return annotation would sit here; Pipefish uses `->`.
        let (sig_part, returns) = match sig_part {
            Node::Piping {
                operator,
                left,
                right,
                ..
            } if operator == "->" => (*left, Some(*right)),
            other => (other, None),
        };
        let sig = self.reparse_sig(&sig_part, &TypeNode::named("any?"))?;
        let rets = match returns {
            Some(r) => self.slurp_return_types(&r),
            None => AstSig::new(),
        };
        Some(Node::FuncExpr {
            token: func_tok,
            sig,
            rets,
            body: Box::new(body),
            given,
        })
    }

    /// Parse a `-- text |expr| text` snippet by splitting on bars and
    /// recursively parsing the embedded expressions in a fresh context.
    fn parse_snippet(&mut self, tok: Token) -> Option<Node> {
        let segments = match split_bars(&tok.literal) {
            Some(segments) => segments,
            None => {
                self.throw("parse/snippet/form", &tok, &[]);
                return None;
            }
        };
        let mut parts: Vec<Node> = Vec::new();
        for (embedded, segment) in segments {
            if embedded {
                let (tokens, mut lex_errors) =
                    crate::relexer::tokenize("embedded Pipefish in snippet", &segment);
                self.errors.append(&mut lex_errors);
                let mut inner = ParseRun::new(self.arena, self.root, tokens);
                let node = inner.parse_tokenized_chunk();
                self.errors.append(&mut inner.errors);
                parts.push(node?);
            } else {
                parts.push(Node::StringLit {
                    token: tok.clone(),
                    value: segment,
                });
            }
        }
        Some(Node::SnippetLit { token: tok, parts })
    }

    /// Split a `\\` log's text on bars, parsing the embedded expressions.
    /// Text that doesn't tokenize or parse degrades to its raw form, since
    /// logs are prose first.
    fn parse_log_parts(&mut self, tok: &Token) -> Vec<Node> {
        let raw = || {
            vec![Node::StringLit {
                token: tok.clone(),
                value: tok.literal.clone(),
            }]
        };
        let segments = match split_bars(&tok.literal) {
            Some(segments) => segments,
            None => return raw(),
        };
        let mut parts = Vec::new();
        for (embedded, segment) in segments {
            if embedded {
                let (tokens, lex_errors) =
                    crate::relexer::tokenize("embedded Pipefish in log", &segment);
                if !lex_errors.is_empty() {
                    return raw();
                }
                let mut inner = ParseRun::new(self.arena, self.root, tokens);
                match inner.parse_tokenized_chunk() {
                    Some(node) if inner.errors.is_empty() => parts.push(node),
                    _ => return raw(),
                }
            } else if !segment.is_empty() {
                parts.push(Node::StringLit {
                    token: tok.clone(),
                    value: segment,
                });
            }
        }
        parts
    }
}

/// Split text on single bars into (embedded?, segment) pairs.
/// Returns `None` when a bar is left unmatched.
fn split_bars(text: &str) -> Option<Vec<(bool, String)>> {
    let mut segments: Vec<(bool, String)> = Vec::new();
    let mut current = String::new();
    let mut in_bars = false;
    for c in text.chars() {
        if c == '|' {
            segments.push((in_bars, std::mem::take(&mut current)));
            in_bars = !in_bars;
        } else {
            current.push(c);
        }
    }
    if in_bars {
        return None;
    }
    segments.push((false, current));
    Some(segments)
}

/// Join two nodes into (or onto) a comma chain.
pub fn comma_join(left: Node, right: Node) -> Node {
    let tok = Token::synthetic(TokenType::Comma, ",");
    Node::Infix {
        token: tok.clone(),
        operator: ",".to_string(),
        args: vec![
            left,
            Node::Bling {
                token: tok,
                value: ",".to_string(),
            },
            right,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relexer::tokenize;

    fn arena_with_builtins() -> ParserArena {
        let mut arena = ParserArena::new();
        let root = &mut arena.parsers[0];
        for name in ["int", "float", "string", "rune", "bool", "list", "map", "set", "pair", "tuple"] {
            root.typenames.insert(name.to_string());
        }
        for op in ["+", "-", "*", "/", "mod", "div", "<", "<=", ">", ">=", "::", "in", "&"] {
            root.add_function(op, Fix::Infix, Vec::new());
        }
        root.add_function("-", Fix::Prefix, Vec::new());
        root.add_function("len", Fix::Prefix, Vec::new());
        arena
    }

    fn parse_with(arena: &ParserArena, input: &str) -> String {
        let (tokens, errors) = tokenize("test", input);
        assert!(errors.is_empty(), "lex errors: {:?}", errors);
        let mut run = ParseRun::new(arena, 0, tokens);
        let node = run.parse_tokenized_chunk();
        assert!(
            run.errors.is_empty(),
            "parse errors for {:?}: {:?}",
            input,
            run.errors
        );
        node.expect("no node").to_string()
    }

    #[test]
    fn test_arithmetic_precedence() {
        let arena = arena_with_builtins();
        assert_eq!(parse_with(&arena, "2 + 3 * 4"), "(+ 2 + (* 3 * 4))");
        assert_eq!(parse_with(&arena, "(2 + 3) * 4"), "(* (+ 2 + 3) * 4)");
    }

    #[test]
    fn test_application_binds_looser_than_arithmetic() {
        let mut arena = arena_with_builtins();
        arena.parsers[0].add_function("foo", Fix::Prefix, Vec::new());
        assert_eq!(parse_with(&arena, "foo 1 + 2"), "(foo (+ 1 + 2))");
        assert_eq!(parse_with(&arena, "foo 1, 2"), "(foo 1 2)");
    }

    #[test]
    fn test_conditional_chain() {
        let arena = arena_with_builtins();
        assert_eq!(
            parse_with(&arena, "true : 5 ; else : 6"),
            "((true : 5) ; (true : 6))"
        );
    }

    #[test]
    fn test_comparison_node() {
        let arena = arena_with_builtins();
        assert_eq!(parse_with(&arena, "1 == 2"), "(1 == 2)");
        assert_eq!(parse_with(&arena, "1 + 1 == 2"), "((+ 1 + 1) == 2)");
    }

    #[test]
    fn test_identifier_before_assignment_is_a_value() {
        let mut arena = arena_with_builtins();
        arena.parsers[0].add_function("foo", Fix::Prefix, Vec::new());
        assert_eq!(parse_with(&arena, "foo = 5"), "(foo = 5)");
    }

    #[test]
    fn test_midfix_bling() {
        let mut arena = arena_with_builtins();
        arena.parsers[0].add_function(
            "troz",
            Fix::Prefix,
            vec![("nerf".to_string(), Fix::Midfix)],
        );
        assert_eq!(parse_with(&arena, "troz 8 nerf 9"), "(troz 8 nerf 9)");
    }

    #[test]
    fn test_endfix_bling() {
        let mut arena = arena_with_builtins();
        arena.parsers[0].add_function("xuq", Fix::Prefix, vec![("mip".to_string(), Fix::Endfix)]);
        assert_eq!(parse_with(&arena, "xuq 9 mip"), "(xuq 9 mip)");
    }

    #[test]
    fn test_forefix_bling() {
        let mut arena = arena_with_builtins();
        arena.parsers[0].add_function("moo", Fix::Prefix, vec![("boo".to_string(), Fix::Forefix)]);
        assert_eq!(parse_with(&arena, "moo boo 8"), "(moo boo 8)");
    }

    #[test]
    fn test_unfix_function() {
        let mut arena = arena_with_builtins();
        arena.parsers[0].add_function("blerp", Fix::Unfix, Vec::new());
        assert_eq!(parse_with(&arena, "blerp"), "blerp");
        assert_eq!(parse_with(&arena, "blerp == 2"), "(blerp == 2)");
    }

    #[test]
    fn test_infix_function_with_endfix() {
        let mut arena = arena_with_builtins();
        arena.parsers[0].add_function(
            "bing",
            Fix::Infix,
            vec![
                ("bing".to_string(), Fix::Midfix),
                ("bong".to_string(), Fix::Endfix),
            ],
        );
        assert_eq!(parse_with(&arena, "8 bing 9 bong"), "(bing 8 bing 9 bong)");
    }

    #[test]
    fn test_suffix_function() {
        let mut arena = arena_with_builtins();
        arena.parsers[0].add_function("spoit", Fix::Suffix, Vec::new());
        assert_eq!(parse_with(&arena, "9 spoit"), "(9 spoit)");
    }

    #[test]
    fn test_piping_desugars_bare_function() {
        let mut arena = arena_with_builtins();
        arena.parsers[0].add_function("foo", Fix::Prefix, Vec::new());
        assert_eq!(parse_with(&arena, "x -> foo"), "(x -> (foo that))");
        assert_eq!(
            parse_with(&arena, "[1, 2, 3] >> that + 1"),
            "([(, 1 , (, 2 , 3))] >> (+ that + 1))"
        );
    }

    #[test]
    fn test_indexing_and_pairs() {
        let arena = arena_with_builtins();
        assert_eq!(parse_with(&arena, "x[2]"), "x[2]");
        assert_eq!(parse_with(&arena, "x[1::3]"), "x[(:: 1 :: 3)]");
    }

    #[test]
    fn test_try_expression() {
        let arena = arena_with_builtins();
        assert_eq!(parse_with(&arena, "try : 5"), "(try : 5)");
        assert_eq!(parse_with(&arena, "try e : 5"), "(try e : 5)");
    }

    #[test]
    fn test_for_with_three_part_header() {
        let arena = arena_with_builtins();
        let rendered = parse_with(&arena, "for i = 0; i < 5; i = i + 1 : 99");
        assert_eq!(rendered, "(for … : 99)");
    }

    #[test]
    fn test_signature_reparse_inherits_rightward() {
        let arena = arena_with_builtins();
        let (tokens, _) = tokenize("test", "x, y int");
        let mut run = ParseRun::new(&arena, 0, tokens);
        let node = run.parse_tokenized_chunk().expect("parse failed");
        let sig = run
            .reparse_sig(&node, &crate::ast::TypeNode::named("any?"))
            .expect("reparse failed");
        assert_eq!(sig.len(), 2);
        assert_eq!(sig[0].name, "x");
        assert_eq!(sig[0].ty.to_string(), "int");
        assert_eq!(sig[1].name, "y");
        assert_eq!(sig[1].ty.to_string(), "int");
    }

    #[test]
    fn test_signature_default_type() {
        let arena = arena_with_builtins();
        let (tokens, _) = tokenize("test", "x, y");
        let mut run = ParseRun::new(&arena, 0, tokens);
        let node = run.parse_tokenized_chunk().expect("parse failed");
        let sig = run
            .reparse_sig(&node, &crate::ast::TypeNode::named("any?"))
            .expect("reparse failed");
        assert_eq!(sig[0].ty.to_string(), "any?");
        assert_eq!(sig[1].ty.to_string(), "any?");
    }

    #[test]
    fn test_namespace_error() {
        let arena = arena_with_builtins();
        let (tokens, _) = tokenize("test", "nope.foo 5");
        let mut run = ParseRun::new(&arena, 0, tokens);
        let _ = run.parse_tokenized_chunk();
        assert!(run.errors.iter().any(|e| e.id == "parse/namespace/exists"));
    }

    #[test]
    fn test_parameterized_instance_is_recorded() {
        let mut arena = arena_with_builtins();
        arena.parsers[0]
            .parameterized_types
            .insert("list".to_string());
        let (tokens, _) = tokenize("test", "list{string}");
        let mut run = ParseRun::new(&arena, 0, tokens);
        let _ = run.parse_tokenized_chunk();
        assert!(run.errors.is_empty(), "errors: {:?}", run.errors);
        assert!(run.instances.contains_key("list{string}"));
    }

    #[test]
    fn test_empty_tuple() {
        let arena = arena_with_builtins();
        assert_eq!(parse_with(&arena, "()"), "()");
    }

    #[test]
    fn test_lambda_expression() {
        let arena = arena_with_builtins();
        let rendered = parse_with(&arena, "func(x) : x + 1");
        assert_eq!(rendered, "(func … : (+ x + 1))");
    }

    #[test]
    fn test_snippet_splits_on_bars() {
        let arena = arena_with_builtins();
        let (tokens, _) = tokenize("test", "-- foo |x| bar");
        let mut run = ParseRun::new(&arena, 0, tokens);
        let node = run.parse_tokenized_chunk().expect("parse failed");
        assert!(run.errors.is_empty(), "errors: {:?}", run.errors);
        match node {
            Node::SnippetLit { parts, .. } => {
                assert_eq!(parts.len(), 3);
                assert!(matches!(parts[0], Node::StringLit { .. }));
                assert!(matches!(parts[1], Node::Ident { .. }));
            }
            other => panic!("expected snippet, got {}", other),
        }
    }
}

//! Parsing of type expressions.
//!
//! Types are parsed in two situations: when they are defined (`newtype`
//! declarations) and when they are mentioned in signatures. Inside function
//! bodies the arguments of parameterized types are ordinary expressions, so
//! a separate little precedence ladder covers `/`, `&`, `?`, `!` and `…`.

use super::{Fix, ParseRun, FPREFIX, MINUS_P};
use crate::ast::{Node, TypeArgValue, TypeArgument, TypeNode, TypeParameter};
use pipefish_foundation::token::TokenType;

/// Words that are not type names but participate in type construction.
pub const PSEUDOTYPES: [&str; 2] = ["clone", "clones"];

pub const T_LOWEST: i32 = 0;
pub const T_OR: i32 = 1;
pub const T_AND: i32 = 2;
pub const T_SUFFIX: i32 = 3;

/// Index types a type parameter may have.
const PARAMETER_TYPES: [&str; 6] = ["float", "int", "string", "rune", "bool", "type"];

impl ParseRun<'_> {
    /// Parse a type found at the peek token, advancing onto it.
    pub fn parse_type(&mut self, prec: i32) -> Option<TypeNode> {
        let peek = self.peek.clone();
        let resolving = self.resolving_parser(&peek)?;
        if !(peek.ty == TokenType::DotDotDot
            || (peek.ty == TokenType::Ident && resolving.is_type_prefix(&peek.literal)))
        {
            self.throw("parse/type/exists", &peek, &[&peek.literal]);
            return None;
        }
        self.next_token();
        self.parse_type_from_cur(prec)
    }

    /// Parse a type whose head is the current token.
    pub fn parse_type_from_cur(&mut self, prec: i32) -> Option<TypeNode> {
        let tok = self.cur.clone();
        let mut left = if self.peek.ty == TokenType::LBrace {
            let result = self.parse_params_or_args()?;
            self.next_token();
            result
        } else if self.cur.ty == TokenType::DotDotDot {
            let right = if self.peek.ty == TokenType::Ident
                && self
                    .resolving_parser(&self.peek.clone())
                    .map(|p| p.is_type_prefix(&self.peek.literal))
                    .unwrap_or(false)
            {
                Some(Box::new(self.parse_type(T_LOWEST)?))
            } else {
                None
            };
            TypeNode::DotDotDot { token: tok, right }
        } else {
            TypeNode::Name {
                token: tok.clone(),
                name: tok.literal.clone(),
            }
        };
        // `/` unions and `&` intersections.
        while prec <= self.peek_type_precedence()
            && self.peek.ty == TokenType::Ident
            && (self.peek.literal == "/" || self.peek.literal == "&")
        {
            let infix_tok = self.peek.clone();
            let new_prec = self.peek_type_precedence();
            self.next_token();
            let right = self.parse_type(new_prec)?;
            left = TypeNode::Infix {
                token: infix_tok.clone(),
                operator: infix_tok.literal.clone(),
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        // `?` nullable and `!` error-bearing.
        while self.peek.ty == TokenType::Ident
            && (self.peek.literal == "?" || self.peek.literal == "!")
        {
            self.next_token();
            left = TypeNode::Suffix {
                token: self.cur.clone(),
                operator: self.cur.literal.clone(),
                left: Box::new(left),
            };
        }
        // A trailing `...` makes the type variadic.
        if self.peek.ty == TokenType::DotDotDot {
            self.next_token();
            left = TypeNode::DotDotDot {
                token: self.cur.clone(),
                right: Some(Box::new(left)),
            };
        }
        Some(left)
    }

    fn peek_type_precedence(&self) -> i32 {
        match self.peek.literal.as_str() {
            "/" => T_OR,
            "&" => T_AND,
            "?" | "!" => T_SUFFIX,
            _ => T_LOWEST,
        }
    }

    /// `Name{…}`: decide by the first argument whether this is an instance
    /// (`Z{5}`) or a definition (`list{T type}`).
    fn parse_params_or_args(&mut self) -> Option<TypeNode> {
        let name_tok = self.cur.clone();
        self.next_token(); // Now on the `{`.
        let peek = self.peek.clone();
        let peek_is_param_name = peek.ty == TokenType::Ident && {
            let root = self.root_parser();
            !root.is_type_prefix(&peek.literal) && !root.is_enum_element(&peek.literal)
        };
        if peek_is_param_name {
            self.next_token();
            self.parse_params(name_tok)
        } else {
            self.parse_args(name_tok)
        }
    }

    /// A parameter list: `{T type}`, `{n int}`.
    fn parse_params(&mut self, name_tok: pipefish_foundation::token::Token) -> Option<TypeNode> {
        let mut parameters: Vec<TypeParameter> = Vec::new();
        loop {
            let tok = self.cur.clone();
            if self.cur.ty != TokenType::Ident {
                self.throw("parse/param/name", &tok, &[]);
                return None;
            }
            parameters.push(TypeParameter {
                name: self.cur.literal.clone(),
                ty: String::new(),
            });
            self.next_token();
            if self.cur.ty == TokenType::Ident {
                let type_name = self.cur.literal.clone();
                let acceptable = PARAMETER_TYPES.contains(&type_name.as_str())
                    || self.root_parser().enum_type_names.contains(&type_name);
                if acceptable {
                    for p in parameters.iter_mut() {
                        if p.ty.is_empty() {
                            p.ty = type_name.clone();
                        }
                    }
                } else {
                    self.throw("parse/param/type", &tok, &[&type_name]);
                }
                self.next_token();
            }
            if self.cur.ty == TokenType::Comma {
                self.next_token();
                continue;
            }
            if self.cur.ty == TokenType::RBrace {
                break;
            }
            self.throw("parse/param/form", &tok, &[]);
            return None;
        }
        Some(TypeNode::WithParameters {
            token: name_tok.clone(),
            operator: name_tok.literal.clone(),
            parameters,
        })
    }

    /// An argument list: `{5}`, `{string}`, `{RED}`.
    fn parse_args(&mut self, name_tok: pipefish_foundation::token::Token) -> Option<TypeNode> {
        let mut arguments: Vec<TypeArgument> = Vec::new();
        loop {
            let tok = self.peek.clone();
            let value = match tok.ty {
                TokenType::Float => {
                    let v = tok.literal.parse().unwrap_or(0.0);
                    Some(TypeArgValue::Float(v))
                }
                TokenType::Int => {
                    let v = tok.literal.parse().unwrap_or(0);
                    Some(TypeArgValue::Int(v))
                }
                TokenType::String => Some(TypeArgValue::Str(tok.literal.clone())),
                TokenType::Rune => Some(TypeArgValue::Rune(
                    tok.literal.chars().next().unwrap_or('\u{0}'),
                )),
                TokenType::True => Some(TypeArgValue::Bool(true)),
                TokenType::False => Some(TypeArgValue::Bool(false)),
                TokenType::Ident => {
                    let is_type = self
                        .resolving_parser(&tok)
                        .map(|p| p.is_type_prefix(&tok.literal))
                        .unwrap_or(false);
                    if is_type {
                        let inner = self.parse_type(T_LOWEST)?;
                        Some(TypeArgValue::Type(Box::new(inner)))
                    } else {
                        // Possibly an enum element; the initializer decides.
                        Some(TypeArgValue::EnumElement(tok.literal.clone()))
                    }
                }
                _ => {
                    self.throw("parse/instance/value", &tok, &[&tok.literal]);
                    None
                }
            };
            arguments.push(TypeArgument {
                token: tok.clone(),
                value: value?,
            });
            // Parsing a nested type has already advanced past it.
            if !matches!(
                arguments.last().map(|a| &a.value),
                Some(TypeArgValue::Type(_))
            ) {
                self.next_token();
            }
            if self.peek.ty == TokenType::Comma {
                self.next_token();
                continue;
            }
            if self.peek.ty == TokenType::RBrace {
                break;
            }
            self.throw("parse/instance/form", &tok, &[]);
            return None;
        }
        Some(TypeNode::WithArguments {
            token: name_tok.clone(),
            operator: name_tok.literal.clone(),
            arguments,
        })
    }

    /// A type name met in expression position: a type value mention or a
    /// constructor application, possibly with `{…}` arguments.
    pub fn parse_type_in_expression(&mut self) -> Option<Node> {
        let tok = self.cur.clone();
        let operator = tok.literal.clone();
        let mut type_args: Vec<Node> = Vec::new();
        if self.peek.ty == TokenType::LBrace {
            self.next_token();
            self.next_token();
            let args_node = self.parse_expression(FPREFIX)?;
            type_args = self.listify(args_node);
            if self.peek.ty == TokenType::RBrace {
                self.next_token();
            } else {
                self.throw("parse/rbrace", &self.cur.clone(), &[]);
                return None;
            }
        }
        let node = if self.type_is_functional_public() {
            self.next_token();
            let right = if self.cur.ty == TokenType::LParen || self.cur.ty == TokenType::LBrack {
                self.parse_expression(MINUS_P)?
            } else {
                self.parse_expression(FPREFIX)?
            };
            let args = self.listify(right);
            Node::TypePrefix {
                token: tok.clone(),
                operator: operator.clone(),
                type_args: type_args.clone(),
                args,
            }
        } else {
            // Suffixes and type infixes extend the mention into a full
            // type expression.
            if self.peek.literal == "?" || self.peek.literal == "!" {
                let mut tn = self
                    .to_ast_type(&operator, &tok, &type_args)
                    .unwrap_or_else(|| TypeNode::Name {
                        token: tok.clone(),
                        name: operator.clone(),
                    });
                while self.peek.literal == "?" || self.peek.literal == "!" {
                    self.next_token();
                    tn = TypeNode::Suffix {
                        token: self.cur.clone(),
                        operator: self.cur.literal.clone(),
                        left: Box::new(tn),
                    };
                }
                Node::TypeLit {
                    token: tok.clone(),
                    type_node: tn,
                }
            } else {
                Node::TypeExpr {
                    token: tok.clone(),
                    operator: operator.clone(),
                    type_args: type_args.clone(),
                }
            }
        };
        if self.record_instances && !type_args.is_empty() {
            if let Some(ast_type) = self.to_ast_type(&operator, &tok, &type_args) {
                if let TypeNode::WithArguments { .. } = &ast_type {
                    self.instances.insert(ast_type.to_string(), ast_type);
                }
            }
        }
        Some(node)
    }

    /// Convert a type mention's expression-level arguments into a
    /// `TypeNode`: arguments that are values give an instance, parameter
    /// declarations give a definition.
    pub fn to_ast_type(
        &mut self,
        operator: &str,
        tok: &pipefish_foundation::token::Token,
        type_args: &[Node],
    ) -> Option<TypeNode> {
        if type_args.is_empty() {
            return Some(TypeNode::Name {
                token: tok.clone(),
                name: operator.to_string(),
            });
        }
        if self.find_type_argument(&type_args[0]).is_some() {
            let mut arguments = Vec::new();
            for arg in type_args {
                match self.find_type_argument(arg) {
                    Some(value) => arguments.push(TypeArgument {
                        token: arg.token().clone(),
                        value,
                    }),
                    None => return None,
                }
            }
            return Some(TypeNode::WithArguments {
                token: tok.clone(),
                operator: operator.to_string(),
                arguments,
            });
        }
        // Parameter declarations: `list{T type}` mentioned in a signature.
        let sig = self.sig_from_args(type_args, &TypeNode::named("error"))?;
        let parameters = sig
            .into_iter()
            .map(|pair| TypeParameter {
                name: pair.name,
                ty: pair.ty.to_string(),
            })
            .collect();
        Some(TypeNode::WithParameters {
            token: tok.clone(),
            operator: operator.to_string(),
            parameters,
        })
    }

    /// The value of a type argument in expression form, if it is one.
    fn find_type_argument(&mut self, arg: &Node) -> Option<TypeArgValue> {
        match arg {
            Node::Ident { name, .. } => {
                if self.root_parser().is_enum_element(name) {
                    Some(TypeArgValue::EnumElement(name.clone()))
                } else {
                    None
                }
            }
            Node::BoolLit { value, .. } => Some(TypeArgValue::Bool(*value)),
            Node::FloatLit { value, .. } => Some(TypeArgValue::Float(*value)),
            Node::IntLit { value, .. } => Some(TypeArgValue::Int(*value)),
            Node::RuneLit { value, .. } => Some(TypeArgValue::Rune(*value)),
            Node::StringLit { value, .. } => Some(TypeArgValue::Str(value.clone())),
            Node::TypeExpr {
                token,
                operator,
                type_args,
            } => {
                let inner = self.to_ast_type(operator, token, type_args)?;
                Some(TypeArgValue::Type(Box::new(inner)))
            }
            _ => None,
        }
    }

    /// Public wrapper so the identifier path can reuse the test.
    fn type_is_functional_public(&mut self) -> bool {
        // A `?`/`!`/union suffix means the mention is a type value.
        self.type_is_functional_inner()
    }

    fn type_is_functional_inner(&mut self) -> bool {
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
                | TokenType::Eq
                | TokenType::NotEq
        ) || self.peek.literal == "?"
            || self.peek.literal == "!"
            || self.peek.literal == "/"
            || self.peek.literal == "&"
            || self.peek.literal == "..."
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
        if self.native_precedence_of_peek() {
            return false;
        }
        self.peek.ty != TokenType::Eof
    }

    fn native_precedence_of_peek(&self) -> bool {
        matches!(
            self.peek.ty,
            TokenType::Assign
                | TokenType::GvnAssign
                | TokenType::Given
                | TokenType::For
                | TokenType::Semicolon
                | TokenType::MagicSemicolon
                | TokenType::Newline
                | TokenType::And
                | TokenType::Or
                | TokenType::Iflog
        )
    }
}

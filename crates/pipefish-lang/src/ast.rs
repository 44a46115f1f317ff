//! The abstract syntax tree.
//!
//! One closed `Node` enum covers every expression form; every variant
//! carries its principal token, which is where diagnostics point. Infix
//! applications store their arguments as a flat list with bling
//! pseudo-arguments interleaved, the way call sites spell them.
//!
//! `TypeNode` is the separate little language of type expressions as they
//! appear in signatures and `newtype` declarations.

use pipefish_foundation::token::Token;
use std::fmt;

/// A name/type pair in a parsed signature.
#[derive(Debug, Clone, PartialEq)]
pub struct NameTypePair {
    pub name: String,
    pub ty: TypeNode,
}

/// A parsed signature: ordered parameters with their type expressions.
pub type AstSig = Vec<NameTypePair>;

/// Which log position a `\\` annotation occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// Before the body: logs, then evaluates.
    Pre,
    /// Replaces a condition's colon: logs when the condition is reached.
    If,
    /// After an expression.
    Plain,
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Ident {
        token: Token,
        name: String,
    },
    IntLit {
        token: Token,
        value: i64,
    },
    FloatLit {
        token: Token,
        value: f64,
    },
    StringLit {
        token: Token,
        value: String,
    },
    RuneLit {
        token: Token,
        value: char,
    },
    BoolLit {
        token: Token,
        value: bool,
    },
    /// `-- text |expr| text`: literal parts at even positions, embedded
    /// expressions at odd ones.
    SnippetLit {
        token: Token,
        parts: Vec<Node>,
    },
    /// `[ … ]`; the inner expression is a comma chain or `Nothing`.
    ListExpr {
        token: Token,
        inner: Box<Node>,
    },
    /// A function applied in prefix position; bling interleaved in `args`.
    Prefix {
        token: Token,
        operator: String,
        args: Vec<Node>,
    },
    Infix {
        token: Token,
        operator: String,
        args: Vec<Node>,
    },
    Suffix {
        token: Token,
        operator: String,
        args: Vec<Node>,
    },
    /// An identifier used as a function in fix position with no arguments.
    Unfix {
        token: Token,
        operator: String,
    },
    /// A literal word inside a multi-word function name.
    Bling {
        token: Token,
        value: String,
    },
    /// `and`, `or`, `:`, `;`, newline: right side evaluated only on demand.
    LazyInfix {
        token: Token,
        operator: String,
        left: Box<Node>,
        right: Box<Node>,
    },
    /// `==` and `!=`.
    Comparison {
        token: Token,
        operator: String,
        left: Box<Node>,
        right: Box<Node>,
    },
    IndexExpr {
        token: Token,
        left: Box<Node>,
        index: Box<Node>,
    },
    /// `->`, `>>`, `?>`.
    Piping {
        token: Token,
        operator: String,
        left: Box<Node>,
        right: Box<Node>,
    },
    Assignment {
        token: Token,
        left: Box<Node>,
        right: Box<Node>,
    },
    ForExpr {
        token: Token,
        initializer: Option<Box<Node>>,
        /// The condition, or the `range` form.
        condition: Option<Box<Node>>,
        update: Option<Box<Node>>,
        body: Box<Node>,
        /// Accumulators bound by a `from` clause.
        bound: Option<Box<Node>>,
        given: Option<Box<Node>>,
    },
    TryExpr {
        token: Token,
        /// Name the error binds to in the else branch; empty for bare `try`.
        var_name: String,
        right: Box<Node>,
    },
    /// `func (sig) : body given : …`
    FuncExpr {
        token: Token,
        sig: AstSig,
        rets: AstSig,
        body: Box<Node>,
        given: Option<Box<Node>>,
    },
    /// A type named in value position, e.g. `int` or `list{string}`.
    TypeExpr {
        token: Token,
        operator: String,
        type_args: Vec<Node>,
    },
    /// A full type expression in value position where suffixes or infixes
    /// were involved, e.g. `int?` or `int/string`.
    TypeLit {
        token: Token,
        type_node: TypeNode,
    },
    /// A type applied as a constructor, e.g. `Person("John", 22)`.
    TypePrefix {
        token: Token,
        operator: String,
        type_args: Vec<Node>,
        args: Vec<Node>,
    },
    /// A type in suffix position, e.g. `5 apples` or a signature annotation.
    TypeSuffix {
        token: Token,
        type_node: TypeNode,
        args: Vec<Node>,
    },
    LogExpr {
        token: Token,
        kind: LogKind,
        text: String,
        /// The text split on bars: literal strings interleaved with parsed
        /// embedded expressions, like a snippet.
        parts: Vec<Node>,
        left: Option<Box<Node>>,
        right: Option<Box<Node>>,
    },
    GolangExpr {
        token: Token,
    },
    BreakExpr {
        token: Token,
        value: Option<Box<Node>>,
    },
    ContinueExpr {
        token: Token,
    },
    /// The empty tuple, `()`.
    Nothing {
        token: Token,
    },
}

impl Node {
    /// The principal token, for error locations.
    pub fn token(&self) -> &Token {
        match self {
            Node::Ident { token, .. }
            | Node::IntLit { token, .. }
            | Node::FloatLit { token, .. }
            | Node::StringLit { token, .. }
            | Node::RuneLit { token, .. }
            | Node::BoolLit { token, .. }
            | Node::SnippetLit { token, .. }
            | Node::ListExpr { token, .. }
            | Node::Prefix { token, .. }
            | Node::Infix { token, .. }
            | Node::Suffix { token, .. }
            | Node::Unfix { token, .. }
            | Node::Bling { token, .. }
            | Node::LazyInfix { token, .. }
            | Node::Comparison { token, .. }
            | Node::IndexExpr { token, .. }
            | Node::Piping { token, .. }
            | Node::Assignment { token, .. }
            | Node::ForExpr { token, .. }
            | Node::TryExpr { token, .. }
            | Node::FuncExpr { token, .. }
            | Node::TypeExpr { token, .. }
            | Node::TypeLit { token, .. }
            | Node::TypePrefix { token, .. }
            | Node::TypeSuffix { token, .. }
            | Node::LogExpr { token, .. }
            | Node::GolangExpr { token }
            | Node::BreakExpr { token, .. }
            | Node::ContinueExpr { token }
            | Node::Nothing { token } => token,
        }
    }
}

// A compact re-readable rendering, used by parser tests.
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Ident { name, .. } => write!(f, "{}", name),
            Node::IntLit { value, .. } => write!(f, "{}", value),
            Node::FloatLit { value, .. } => write!(f, "{}", value),
            Node::StringLit { value, .. } => write!(f, "{:?}", value),
            Node::RuneLit { value, .. } => write!(f, "'{}'", value),
            Node::BoolLit { value, .. } => write!(f, "{}", value),
            Node::SnippetLit { parts, .. } => {
                write!(f, "(snippet")?;
                for p in parts {
                    write!(f, " {}", p)?;
                }
                write!(f, ")")
            }
            Node::ListExpr { inner, .. } => write!(f, "[{}]", inner),
            Node::Prefix { operator, args, .. } => {
                write!(f, "({}", operator)?;
                for a in args {
                    write!(f, " {}", a)?;
                }
                write!(f, ")")
            }
            Node::Infix { operator, args, .. } => {
                write!(f, "({}", operator)?;
                for a in args {
                    write!(f, " {}", a)?;
                }
                write!(f, ")")
            }
            Node::Suffix { operator, args, .. } => {
                write!(f, "(")?;
                for a in args {
                    write!(f, "{} ", a)?;
                }
                write!(f, "{})", operator)
            }
            Node::Unfix { operator, .. } => write!(f, "{}", operator),
            Node::Bling { value, .. } => write!(f, "{}", value),
            Node::LazyInfix {
                operator,
                left,
                right,
                ..
            } => write!(f, "({} {} {})", left, operator, right),
            Node::Comparison {
                operator,
                left,
                right,
                ..
            } => write!(f, "({} {} {})", left, operator, right),
            Node::IndexExpr { left, index, .. } => write!(f, "{}[{}]", left, index),
            Node::Piping {
                operator,
                left,
                right,
                ..
            } => write!(f, "({} {} {})", left, operator, right),
            Node::Assignment { left, right, .. } => write!(f, "({} = {})", left, right),
            Node::ForExpr { body, .. } => write!(f, "(for … : {})", body),
            Node::TryExpr { var_name, right, .. } => {
                if var_name.is_empty() {
                    write!(f, "(try : {})", right)
                } else {
                    write!(f, "(try {} : {})", var_name, right)
                }
            }
            Node::FuncExpr { body, .. } => write!(f, "(func … : {})", body),
            Node::TypeExpr { operator, .. } => write!(f, "{}", operator),
            Node::TypeLit { type_node, .. } => write!(f, "{}", type_node),
            Node::TypePrefix { operator, args, .. } => {
                write!(f, "({}", operator)?;
                for a in args {
                    write!(f, " {}", a)?;
                }
                write!(f, ")")
            }
            Node::TypeSuffix { type_node, args, .. } => {
                write!(f, "(")?;
                for a in args {
                    write!(f, "{} ", a)?;
                }
                write!(f, "{})", type_node)
            }
            Node::LogExpr { text, .. } => write!(f, "(log {:?})", text),
            Node::GolangExpr { .. } => write!(f, "(golang)"),
            Node::BreakExpr { value, .. } => match value {
                Some(v) => write!(f, "(break {})", v),
                None => write!(f, "break"),
            },
            Node::ContinueExpr { .. } => write!(f, "continue"),
            Node::Nothing { .. } => write!(f, "()"),
        }
    }
}

/// The value of an argument in a parameterized-type instance.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeArgValue {
    Int(i64),
    Float(f64),
    Str(String),
    Rune(char),
    Bool(bool),
    Type(Box<TypeNode>),
    /// A bare name that may turn out to be an enum element; resolved by the
    /// initializer once enums exist.
    EnumElement(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeArgument {
    pub token: Token,
    pub value: TypeArgValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeParameter {
    pub name: String,
    /// The parameter's index type: `int`, `string`, `type`, an enum, …
    pub ty: String,
}

/// A type expression.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeNode {
    /// A plain name: `int`, `Person`.
    Name { token: Token, name: String },
    /// An instance of a parameterized type: `Z{5}`, `list{string}`.
    WithArguments {
        token: Token,
        operator: String,
        arguments: Vec<TypeArgument>,
    },
    /// A definition form: `list{T type}`.
    WithParameters {
        token: Token,
        operator: String,
        parameters: Vec<TypeParameter>,
    },
    /// `A/B` union or `A&B` intersection.
    Infix {
        token: Token,
        operator: String,
        left: Box<TypeNode>,
        right: Box<TypeNode>,
    },
    /// `T?` nullable or `T!` error-bearing.
    Suffix {
        token: Token,
        operator: String,
        left: Box<TypeNode>,
    },
    /// `T...` variadic, or bare `...`.
    DotDotDot {
        token: Token,
        right: Option<Box<TypeNode>>,
    },
}

impl TypeNode {
    pub fn token(&self) -> &Token {
        match self {
            TypeNode::Name { token, .. }
            | TypeNode::WithArguments { token, .. }
            | TypeNode::WithParameters { token, .. }
            | TypeNode::Infix { token, .. }
            | TypeNode::Suffix { token, .. }
            | TypeNode::DotDotDot { token, .. } => token,
        }
    }

    /// A `Name` node with no real position, for defaults like `any?`.
    pub fn named(name: &str) -> TypeNode {
        TypeNode::Name {
            token: pipefish_foundation::token::Token::synthetic(
                pipefish_foundation::token::TokenType::Ident,
                name,
            ),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for TypeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeNode::Name { name, .. } => write!(f, "{}", name),
            TypeNode::WithArguments {
                operator,
                arguments,
                ..
            } => {
                write!(f, "{}{{", operator)?;
                for (i, a) in arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match &a.value {
                        TypeArgValue::Int(v) => write!(f, "{}", v)?,
                        TypeArgValue::Float(v) => write!(f, "{}", v)?,
                        TypeArgValue::Str(v) => write!(f, "{:?}", v)?,
                        TypeArgValue::Rune(v) => write!(f, "'{}'", v)?,
                        TypeArgValue::Bool(v) => write!(f, "{}", v)?,
                        TypeArgValue::Type(t) => write!(f, "{}", t)?,
                        TypeArgValue::EnumElement(name) => write!(f, "{}", name)?,
                    }
                }
                write!(f, "}}")
            }
            TypeNode::WithParameters {
                operator,
                parameters,
                ..
            } => {
                write!(f, "{}{{", operator)?;
                for (i, p) in parameters.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", p.name, p.ty)?;
                }
                write!(f, "}}")
            }
            TypeNode::Infix {
                operator,
                left,
                right,
                ..
            } => write!(f, "{}{}{}", left, operator, right),
            TypeNode::Suffix { operator, left, .. } => write!(f, "{}{}", left, operator),
            TypeNode::DotDotDot { right, .. } => match right {
                Some(t) => write!(f, "{}...", t),
                None => write!(f, "..."),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipefish_foundation::token::{Token, TokenType};

    fn tok(lit: &str) -> Token {
        Token::synthetic(TokenType::Ident, lit)
    }

    #[test]
    fn test_display_nests() {
        let node = Node::Infix {
            token: tok("+"),
            operator: "+".to_string(),
            args: vec![
                Node::IntLit {
                    token: tok("1"),
                    value: 1,
                },
                Node::Bling {
                    token: tok("+"),
                    value: "+".to_string(),
                },
                Node::IntLit {
                    token: tok("2"),
                    value: 2,
                },
            ],
        };
        assert_eq!(node.to_string(), "(+ 1 + 2)");
    }

    #[test]
    fn test_type_node_display_is_the_literal_form() {
        let t = TypeNode::WithArguments {
            token: tok("Z"),
            operator: "Z".to_string(),
            arguments: vec![TypeArgument {
                token: tok("5"),
                value: TypeArgValue::Int(5),
            }],
        };
        assert_eq!(t.to_string(), "Z{5}");
        let u = TypeNode::Infix {
            token: tok("/"),
            operator: "/".to_string(),
            left: Box::new(TypeNode::named("int")),
            right: Box::new(TypeNode::named("string")),
        };
        assert_eq!(u.to_string(), "int/string");
        let n = TypeNode::Suffix {
            token: tok("?"),
            operator: "?".to_string(),
            left: Box::new(TypeNode::named("int")),
        };
        assert_eq!(n.to_string(), "int?");
    }
}

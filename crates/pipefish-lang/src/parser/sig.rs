//! Signature reparsing.
//!
//! The left side of an assignment or the parameter list of a lambda is
//! first parsed as an expression, because in isolation it is ambiguous.
//! This pass rewrites such an expression into a signature: an ordered list
//! of `name : type` pairs in which an unannotated name inherits the type of
//! the nearest annotated name to its right, defaulting to `any?`.

use super::{Fix, ParseRun};
use crate::ast::{AstSig, NameTypePair, Node, TypeNode};
use pipefish_foundation::token::TokenType;

impl ParseRun<'_> {
    /// Flatten a call site's argument expression into an argument list.
    /// Comma chains flatten; an infix built from a registered midfix keeps
    /// its bling-interleaved arguments as they stand.
    pub fn listify(&mut self, node: Node) -> Vec<Node> {
        match node {
            Node::Infix {
                ref operator,
                ref args,
                ..
            } if operator == "," => {
                let mut out = self.listify(args[0].clone());
                out.extend(self.listify(args[2].clone()));
                out
            }
            Node::Infix {
                ref operator,
                ref args,
                ..
            } if self.root_parser().has_fix(operator, Fix::Midfix) => args.clone(),
            Node::Nothing { .. } => Vec::new(),
            other => vec![other],
        }
    }

    /// Rewrite an expression into a signature.
    pub fn reparse_sig(&mut self, node: &Node, dflt: &TypeNode) -> Option<AstSig> {
        match node {
            Node::Infix {
                token,
                operator,
                args,
            } => {
                if token.ty == TokenType::Comma {
                    let rhs = self.reparse_sig(&args[2], dflt)?;
                    let inherited = rhs
                        .first()
                        .map(|pair| pair.ty.clone())
                        .unwrap_or_else(|| dflt.clone());
                    let mut lhs = self.reparse_sig(&args[0], &inherited)?;
                    lhs.extend(rhs);
                    Some(lhs)
                } else {
                    self.throw("parse/sig/b", token, &[operator]);
                    None
                }
            }
            Node::TypeSuffix {
                type_node, args, ..
            } => {
                let mut sig = self.sig_from_args(args, type_node)?;
                for pair in sig.iter_mut() {
                    pair.ty = type_node.clone();
                }
                Some(sig)
            }
            Node::Ident { name, .. } => Some(vec![NameTypePair {
                name: name.clone(),
                ty: dflt.clone(),
            }]),
            // A parameter sharing its name with a function parses as a
            // prefix application when a type follows it.
            Node::Prefix { operator, .. } => Some(vec![NameTypePair {
                name: operator.clone(),
                ty: dflt.clone(),
            }]),
            Node::Bling { value, .. } => {
                if value == "," {
                    Some(AstSig::new())
                } else {
                    Some(vec![NameTypePair {
                        name: value.clone(),
                        ty: TypeNode::named("bling"),
                    }])
                }
            }
            Node::Nothing { .. } => Some(AstSig::new()),
            other => {
                self.throw("parse/sig/a", other.token(), &[]);
                None
            }
        }
    }

    /// Apply `reparse_sig` across an argument list and concatenate.
    pub fn sig_from_args(&mut self, args: &[Node], dflt: &TypeNode) -> Option<AstSig> {
        let mut sig = AstSig::new();
        for arg in args {
            let part = self.reparse_sig(arg, dflt)?;
            sig.extend(part);
        }
        Some(sig)
    }

    /// The names of a signature parsed from an expression, for binding.
    pub fn vars_from_sig(&mut self, node: &Node) -> Vec<String> {
        match self.reparse_sig(node, &TypeNode::named("any?")) {
            Some(sig) => sig.into_iter().map(|pair| pair.name).collect(),
            None => Vec::new(),
        }
    }

    /// Read the return-type annotation to the right of `->`.
    pub fn slurp_return_types(&mut self, node: &Node) -> AstSig {
        match node {
            Node::Infix {
                token,
                operator,
                args,
            } => {
                if token.ty == TokenType::Comma {
                    let mut lhs = self.slurp_return_types(&args[0]);
                    lhs.extend(self.slurp_return_types(&args[2]));
                    lhs
                } else if operator == "/" || operator == "&" {
                    // A union or intersection written in value position.
                    match self.type_from_value_node(node) {
                        Some(ty) => vec![NameTypePair {
                            name: String::new(),
                            ty,
                        }],
                        None => {
                            self.throw("parse/ret/a", token, &[operator]);
                            AstSig::new()
                        }
                    }
                } else {
                    self.throw("parse/ret/a", token, &[operator]);
                    AstSig::new()
                }
            }
            Node::TypeExpr {
                token,
                operator,
                type_args,
            } => match self.to_ast_type(operator, token, type_args) {
                Some(ty) => vec![NameTypePair {
                    name: String::new(),
                    ty,
                }],
                None => AstSig::new(),
            },
            Node::TypeLit { type_node, .. } => vec![NameTypePair {
                name: String::new(),
                ty: type_node.clone(),
            }],
            Node::Suffix {
                token,
                operator,
                args,
            } if operator == "?" || operator == "!" => {
                let inner = self.slurp_return_types(&args[0]);
                match inner.into_iter().next() {
                    Some(pair) => vec![NameTypePair {
                        name: String::new(),
                        ty: TypeNode::Suffix {
                            token: token.clone(),
                            operator: operator.clone(),
                            left: Box::new(pair.ty),
                        },
                    }],
                    None => AstSig::new(),
                }
            }
            other => {
                self.throw("parse/ret/b", other.token(), &[]);
                AstSig::new()
            }
        }
    }

    /// Rebuild a `TypeNode` from a union/intersection parsed in value
    /// position, e.g. the `int/string` in a return annotation.
    fn type_from_value_node(&mut self, node: &Node) -> Option<TypeNode> {
        match node {
            Node::TypeExpr {
                token,
                operator,
                type_args,
            } => self.to_ast_type(operator, token, type_args),
            Node::Infix {
                token,
                operator,
                args,
            } if operator == "/" || operator == "&" => {
                // Bling-interleaved: value, bling, value.
                let left = self.type_from_value_node(&args[0])?;
                let right = self.type_from_value_node(args.last()?)?;
                Some(TypeNode::Infix {
                    token: token.clone(),
                    operator: operator.clone(),
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            _ => None,
        }
    }
}

//! Foundation types for the Pipefish toolchain.
//!
//! This crate holds the pieces every later stage depends on:
//!
//! - `token` — the token record produced by the lexer and consumed by the
//!   parser, compiler and VM (every diagnostic points back at one)
//! - `error` — structured diagnostics with stable slash-separated ids
//! - `digraph` — the deterministic digraph + Tarjan SCC sort used to order
//!   declarations during initialization

pub mod digraph;
pub mod error;
pub mod token;

pub use digraph::Digraph;
pub use error::{Error, ErrorFormatter};
pub use token::{Token, TokenType};

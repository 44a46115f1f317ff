//! The initializer: from a token stream to a runnable service.
//!
//! Walks a source's top-level declaration sections (`import`, `external`,
//! `newtype`, `def`, `var`, `const`, `cmd`), discovers imported modules into
//! namespaced child parsers sharing one VM, and processes each group in
//! dependency order: types before the constants that mention them,
//! constants before functions. Ordering comes from a Tarjan SCC sort over a
//! deterministic digraph; a cyclic component is legal only among mutually
//! recursive functions.

use crate::ast::{AstSig, NameTypePair, Node, TypeNode};
use crate::compiler::{Compiler, Ctx, FnBody, Param, ParamTypeBody, ParamTypeDef};
use crate::parser::{BlingPattern, Fix, ParseRun, Parser, ParserArena};
use crate::relexer;
use indexmap::IndexMap;
use pipefish_foundation::digraph::Digraph;
use pipefish_foundation::error::Error;
use pipefish_foundation::token::{Token, TokenType};
use pipefish_vm::values::{self, AbstractType};
use pipefish_vm::{Op, Vm};
use std::path::{Path, PathBuf};
use tracing::debug;

/// The declaration headings, in the order sections are processed.
const HEADINGS: [&str; 7] = [
    "import", "external", "newtype", "def", "var", "const", "cmd",
];

/// One top-level declaration with the section it belongs to.
struct Chunk {
    section: String,
    tokens: Vec<Token>,
}

/// A scanned function header, pre-installation.
struct ScannedFn {
    name: String,
    fix: Fix,
    sig: AstSig,
    pattern: BlingPattern,
    rets: Vec<TypeNode>,
    body: Vec<Token>,
    token: Token,
    cmd: bool,
}

/// Resolves `external` declarations to other running services.
///
/// The supervisor hosting this service supplies a real implementation;
/// embedders that run a single service keep the default, which reports
/// that externals are unreachable.
pub trait ExternalResolver {
    /// Called once per `external` declaration with its service name and
    /// path. `Ok` means the resolver has made the name available.
    fn resolve(&mut self, name: &str, path: &str, token: &Token) -> Result<(), Error>;
}

/// The default resolver: no externals are available.
#[derive(Debug, Default)]
pub struct NoExternals;

impl ExternalResolver for NoExternals {
    fn resolve(&mut self, name: &str, _path: &str, token: &Token) -> Result<(), Error> {
        Err(Error::new("init/external/unsupported", token, &[name]))
    }
}

/// Initialize a service from source text: populate the parser arena, the
/// compiler's tables and the VM. Errors accumulate on the compiler.
#[allow(clippy::too_many_arguments)]
pub fn initialize(
    vm: &mut Vm,
    arena: &mut ParserArena,
    compiler: &mut Compiler,
    parser_ix: usize,
    source_name: &str,
    source_code: &str,
    base_dir: &Path,
    sources: &mut IndexMap<String, String>,
    externals: &mut dyn ExternalResolver,
) {
    debug!(source = source_name, "initializing");
    sources.insert(source_name.to_string(), source_code.to_string());
    let (tokens, lex_errors) = relexer::tokenize(source_name, source_code);
    compiler.errors.extend(lex_errors);

    let chunks = match split_chunks(tokens) {
        Ok(c) => c,
        Err(e) => {
            compiler.errors.push(e);
            return;
        }
    };

    // Imports first: they create the namespaces everything else mentions.
    for chunk in chunks.iter().filter(|c| c.section == "import") {
        process_import(
            vm, arena, compiler, parser_ix, chunk, base_dir, sources, externals,
        );
    }
    for chunk in chunks.iter().filter(|c| c.section == "external") {
        process_external(compiler, externals, chunk);
    }

    // Types, in dependency order.
    process_types(vm, arena, compiler, parser_ix, &chunks);

    // Constants and variables, constants first, each group Tarjan-sorted.
    process_globals(vm, arena, compiler, parser_ix, &chunks, "const");
    process_globals(vm, arena, compiler, parser_ix, &chunks, "var");

    // Functions and commands: install every header before compiling any
    // body, so mutual recursion dispatches.
    let mut scanned = Vec::new();
    for chunk in chunks
        .iter()
        .filter(|c| c.section == "def" || c.section == "cmd")
    {
        if let Some(decl) = scan_function(arena, parser_ix, compiler, chunk) {
            scanned.push(decl);
        }
    }
    let namespace = arena.parsers[parser_ix].namespace_path.clone();
    let mut installed = Vec::new();
    for decl in &scanned {
        arena.parsers[parser_ix].add_function(&decl.name, decl.fix, decl.pattern.clone());
        let sig: Vec<Param> = decl
            .sig
            .iter()
            .map(|pair| {
                if pair.ty.to_string() == "bling" {
                    Param {
                        name: pair.name.clone(),
                        types: AbstractType::new(),
                        bling: Some(pair.name.clone()),
                        variadic: false,
                    }
                } else {
                    let variadic = matches!(pair.ty, TypeNode::DotDotDot { .. });
                    Param {
                        name: pair.name.clone(),
                        types: compiler.resolve_type(vm, &pair.ty),
                        bling: None,
                        variadic,
                    }
                }
            })
            .collect();
        let rets = match decl.rets.len() {
            0 => compiler.any_type(vm),
            1 => compiler.resolve_type(vm, &decl.rets[0]),
            _ => AbstractType::single(values::TUPLE),
        };
        let qualified = format!("{}{}", namespace, decl.name);
        let func_ix = compiler.install(
            vm,
            &qualified,
            sig,
            rets,
            FnBody::Builtin("placeholder".to_string()),
            decl.cmd,
            false,
            &decl.token,
        );
        installed.push(func_ix);
    }
    // Parse the bodies now that every name and fix position is known.
    for (decl, func_ix) in scanned.iter().zip(installed.iter()) {
        let mut body_tokens = decl.body.clone();
        ensure_eof(&mut body_tokens);
        let mut run = ParseRun::new(arena, parser_ix, body_tokens);
        let node = run.parse_tokenized_chunk();
        compiler.errors.extend(run.errors);
        let (body, given) = match node {
            Some(Node::Infix {
                ref operator,
                ref args,
                ..
            }) if operator == "given" && args.len() == 3 => {
                (args[0].clone(), Some(args[2].clone()))
            }
            Some(other) => (other, None),
            None => continue,
        };
        let qualified = format!("{}{}", namespace, decl.name);
        if let Some(overloads) = compiler.functions.get_mut(&qualified) {
            if let Some(def) = overloads.iter_mut().find(|d| d.func_ix == *func_ix) {
                def.body = FnBody::Code { body, given };
            }
        }
    }
    // Compile bodies in dependency order; cycles are fine here, they are
    // just mutual recursion.
    let order = function_order(&scanned, &namespace);
    for name in order {
        let defs = match compiler.functions.get(&name) {
            Some(d) => d.clone(),
            None => continue,
        };
        for def in defs {
            let before = compiler.errors.len();
            compiler.compile_function(vm, &def, &namespace);
            if compiler.errors.len() > before {
                debug!(function = %def.name, "skipping code for broken declaration");
            }
        }
    }
}

/// Install the builtin types, operators and functions into a parser and
/// the compiler's overload table.
pub fn install_builtins(parser: &mut Parser, compiler: &mut Compiler, vm: &mut Vm) {
    for name in [
        "int", "float", "string", "rune", "bool", "type", "func", "list", "map", "set", "pair",
        "tuple", "snippet", "label", "null", "ok", "error",
    ] {
        parser.typenames.insert(name.to_string());
    }
    for name in ["list", "map", "set", "pair"] {
        parser.parameterized_types.insert(name.to_string());
    }
    for (name, base) in [
        ("list", values::LIST),
        ("map", values::MAP),
        ("set", values::SET),
        ("pair", values::PAIR),
    ] {
        compiler.param_types.insert(
            name.to_string(),
            ParamTypeDef {
                params: Vec::new(),
                body: ParamTypeBody::Container(base),
                token: Token::synthetic(TokenType::Ident, name),
            },
        );
    }

    let universal = AbstractType::single(values::UNDEFINED);
    let int = AbstractType::single(values::INT);
    let float = AbstractType::single(values::FLOAT);
    let boolean = AbstractType::single(values::BOOL);
    let string = AbstractType::single(values::STRING);
    let strune = AbstractType::of(&[values::STRING, values::RUNE]);
    let list = AbstractType::single(values::LIST);
    let set = AbstractType::single(values::SET);
    let map = AbstractType::single(values::MAP);
    let pair = AbstractType::single(values::PAIR);
    let tuple = AbstractType::single(values::TUPLE);
    let type_t = AbstractType::single(values::TYPE);
    let rune = AbstractType::single(values::RUNE);
    let containers = AbstractType::of(&[
        values::LIST,
        values::SET,
        values::MAP,
        values::TUPLE,
        values::STRING,
        values::TYPE,
    ]);
    let sized = AbstractType::of(&[
        values::LIST,
        values::SET,
        values::MAP,
        values::TUPLE,
        values::STRING,
    ]);

    let tok = Token::synthetic(TokenType::Ident, "builtin");
    // Call sites spell an infix's own name as a bling argument, so the
    // installed signature carries it the same way.
    let value = |n: &str, t: &AbstractType, variadic: bool| Param {
        name: n.to_string(),
        types: t.clone(),
        bling: None,
        variadic,
    };
    let bling = |w: &str| Param {
        name: w.to_string(),
        types: AbstractType::new(),
        bling: Some(w.to_string()),
        variadic: false,
    };
    let mut add_prefix = |compiler: &mut Compiler,
                          vm: &mut Vm,
                          name: &str,
                          params: Vec<Param>,
                          ret: AbstractType,
                          tag: &str| {
        compiler.install(
            vm,
            name,
            params,
            ret,
            FnBody::Builtin(tag.to_string()),
            false,
            false,
            &tok,
        );
    };

    // Arithmetic.
    for (op, base) in [("+", "add"), ("-", "sub"), ("*", "mul"), ("/", "div")] {
        let combos = [
            (int.clone(), int.clone(), "i"),
            (float.clone(), float.clone(), "f"),
            (int.clone(), float.clone(), "if"),
            (float.clone(), int.clone(), "fi"),
        ];
        for (l, r, suffix) in combos {
            let ret = if op == "/" || suffix != "i" {
                float.clone()
            } else {
                int.clone()
            };
            add_prefix(
                compiler,
                vm,
                op,
                vec![value("x", &l, false), bling(op), value("y", &r, false)],
                ret,
                &format!("{}{}", base, suffix),
            );
        }
    }
    add_prefix(compiler, vm, "/", vec![value("x", &type_t, false), bling("/"), value("y", &type_t, false)], type_t.clone(), "tunion");
    add_prefix(compiler, vm, "mod", vec![value("x", &int, false), bling("mod"), value("y", &int, false)], int.clone(), "modi");
    add_prefix(compiler, vm, "div", vec![value("x", &int, false), bling("div"), value("y", &int, false)], int.clone(), "idiv");
    add_prefix(compiler, vm, "+", vec![value("x", &strune, false), bling("+"), value("y", &strune, false)], string.clone(), "cat");
    add_prefix(compiler, vm, "+", vec![value("x", &list, false), bling("+"), value("y", &list, false)], list.clone(), "addlist");
    add_prefix(compiler, vm, "+", vec![value("x", &set, false), bling("+"), value("y", &set, false)], set.clone(), "addset");
    add_prefix(compiler, vm, "&", vec![value("x", &list, false), bling("&"), value("y", &universal, false)], list.clone(), "addelt");
    add_prefix(compiler, vm, "&", vec![value("x", &set, false), bling("&"), value("y", &universal, false)], set.clone(), "addelt");

    // Comparison.
    for (op, tag) in [("<", "lt"), ("<=", "le"), (">", "gt"), (">=", "ge")] {
        add_prefix(compiler, vm, op, vec![value("x", &int, false), bling(op), value("y", &int, false)], boolean.clone(), tag);
        add_prefix(compiler, vm, op, vec![value("x", &float, false), bling(op), value("y", &float, false)], boolean.clone(), tag);
        add_prefix(compiler, vm, op, vec![value("x", &int, false), bling(op), value("y", &float, false)], boolean.clone(), &format!("{}if", tag));
        add_prefix(compiler, vm, op, vec![value("x", &float, false), bling(op), value("y", &int, false)], boolean.clone(), &format!("{}fi", tag));
        add_prefix(compiler, vm, op, vec![value("x", &string, false), bling(op), value("y", &string, false)], boolean.clone(), tag);
    }

    // Pairs, membership, containers.
    add_prefix(compiler, vm, "::", vec![value("k", &universal, false), bling("::"), value("v", &universal, false)], pair.clone(), "mkpair");
    add_prefix(compiler, vm, "in", vec![value("x", &universal, false), bling("in"), value("c", &containers, false)], boolean.clone(), "in");
    add_prefix(compiler, vm, "with", vec![value("x", &universal, false), bling("with"), value("ps", &pair, true)], universal.clone(), "with");
    add_prefix(compiler, vm, "len", vec![value("c", &sized, false)], int.clone(), "len");
    add_prefix(compiler, vm, "literal", vec![value("x", &universal, false)], string.clone(), "litstr");
    add_prefix(compiler, vm, "codepoint", vec![value("r", &rune, false)], int.clone(), "codepoint");
    add_prefix(compiler, vm, "first", vec![value("t", &tuple, false)], universal.clone(), "first");
    add_prefix(compiler, vm, "last", vec![value("t", &tuple, false)], universal.clone(), "last");
    add_prefix(compiler, vm, "tuple", vec![value("xs", &universal, true)], tuple.clone(), "tuple");
    add_prefix(compiler, vm, "map", vec![value("ps", &pair, true)], map.clone(), "map");
    add_prefix(compiler, vm, "set", vec![value("xs", &universal, true)], set.clone(), "set");
    add_prefix(compiler, vm, "cast", vec![value("x", &universal, false), value("t", &type_t, false)], universal.clone(), "castv");
    add_prefix(compiler, vm, "-", vec![value("x", &int, false)], int.clone(), "negi");
    add_prefix(compiler, vm, "-", vec![value("x", &float, false)], float.clone(), "negf");

    for op in ["+", "-", "*", "/", "mod", "div", "<", "<=", ">", ">=", "::", "in", "&", "with"] {
        parser.add_function(op, Fix::Infix, Vec::new());
    }
    for name in [
        "len", "literal", "codepoint", "first", "last", "tuple", "map", "set", "cast", "post",
        "input",
    ] {
        parser.add_function(name, Fix::Prefix, Vec::new());
    }
    parser.add_function("-", Fix::Prefix, Vec::new());
}

/// Is this abstract type the "anything at all" sentinel?
pub fn is_universal(t: &AbstractType) -> bool {
    t.contains(values::UNDEFINED)
}

fn ensure_eof(tokens: &mut Vec<Token>) {
    if tokens.last().map(|t| t.ty) != Some(TokenType::Eof) {
        let like = tokens.last().cloned();
        let mut eof = Token::synthetic(TokenType::Eof, "EOF");
        if let Some(t) = like {
            eof.line = t.line;
            eof.source = t.source;
        }
        tokens.push(eof);
    }
}

/// Split the relexed stream into headed declaration chunks.
fn split_chunks(tokens: Vec<Token>) -> Result<Vec<Chunk>, Error> {
    let mut chunks = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut section: Option<String> = None;
    let mut depth: i32 = 0;
    let mut finish =
        |current: &mut Vec<Token>, section: &Option<String>| -> Result<Option<Chunk>, Error> {
            if current.is_empty() {
                return Ok(None);
            }
            let tokens = std::mem::take(current);
            // A heading introduces the following chunks.
            if tokens.len() == 1
                && tokens[0].ty == TokenType::Ident
                && HEADINGS.contains(&tokens[0].literal.as_str())
            {
                return Ok(Some(Chunk {
                    section: tokens[0].literal.clone(),
                    tokens: Vec::new(),
                }));
            }
            match section {
                Some(s) => Ok(Some(Chunk {
                    section: s.clone(),
                    tokens,
                })),
                None => Err(Error::new("init/heading", &tokens[0], &[&tokens[0].literal])),
            }
        };
    for tok in tokens {
        match tok.ty {
            TokenType::LParen | TokenType::LBrack | TokenType::LBrace => {
                depth += 1;
                current.push(tok);
            }
            TokenType::RParen | TokenType::RBrack | TokenType::RBrace => {
                depth -= 1;
                current.push(tok);
            }
            TokenType::Newline if depth == 0 => {
                if let Some(chunk) = finish(&mut current, &section)? {
                    if chunk.tokens.is_empty() {
                        section = Some(chunk.section);
                    } else {
                        chunks.push(chunk);
                    }
                }
            }
            TokenType::Eof => {
                if let Some(chunk) = finish(&mut current, &section)? {
                    if chunk.tokens.is_empty() {
                        section = Some(chunk.section);
                    } else {
                        chunks.push(chunk);
                    }
                }
            }
            _ => current.push(tok),
        }
    }
    Ok(chunks)
}

/// `import` entries: `"path.pf"` or `name::"path.pf"`.
#[allow(clippy::too_many_arguments)]
fn process_import(
    vm: &mut Vm,
    arena: &mut ParserArena,
    compiler: &mut Compiler,
    parser_ix: usize,
    chunk: &Chunk,
    base_dir: &Path,
    sources: &mut IndexMap<String, String>,
    externals: &mut dyn ExternalResolver,
) {
    let (name, path) = match declaration_name_and_path(&chunk.tokens) {
        Some(pair) => pair,
        None => {
            compiler
                .errors
                .push(Error::new("init/import/pair", &chunk.tokens[0], &[]));
            return;
        }
    };
    let full_path = base_dir.join(&path);
    let code = match std::fs::read_to_string(&full_path) {
        Ok(c) => c,
        Err(_) => {
            compiler.errors.push(Error::new(
                "init/import/file",
                &chunk.tokens[0],
                &[&full_path.to_string_lossy()],
            ));
            return;
        }
    };
    let parent_path = arena.parsers[parser_ix].namespace_path.clone();
    let child_path = format!("{}{}.", parent_path, name);
    let mut child = Parser::new(&child_path);
    // The child sees the builtin tables the root does.
    child.typenames = arena.parsers[0].typenames.clone();
    child.parameterized_types = arena.parsers[0].parameterized_types.clone();
    child.functions = arena.parsers[0].functions.clone();
    child.fixes = arena.parsers[0].fixes.clone();
    child.bling_patterns = arena.parsers[0].bling_patterns.clone();
    let child_ix = arena.add(child);
    arena.parsers[parser_ix]
        .namespace_branch
        .insert(name.clone(), child_ix);
    let child_dir = full_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| base_dir.to_path_buf());
    initialize(
        vm,
        arena,
        compiler,
        child_ix,
        &path,
        &code,
        &child_dir,
        sources,
        externals,
    );
}

/// An `external` declaration hands its name and path to the resolver; the
/// default resolver reports it unreachable.
fn process_external(compiler: &mut Compiler, externals: &mut dyn ExternalResolver, chunk: &Chunk) {
    let (name, path) = match declaration_name_and_path(&chunk.tokens) {
        Some(pair) => pair,
        None => {
            compiler
                .errors
                .push(Error::new("init/import/pair", &chunk.tokens[0], &[]));
            return;
        }
    };
    if let Err(e) = externals.resolve(&name, &path, &chunk.tokens[0]) {
        compiler.errors.push(e);
    }
}

/// The `"path.pf"` or `name::"path.pf"` shape shared by `import` and
/// `external` declarations.
fn declaration_name_and_path(toks: &[Token]) -> Option<(String, String)> {
    match toks.len() {
        1 if toks[0].ty == TokenType::String => {
            let path = PathBuf::from(&toks[0].literal);
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            Some((stem, toks[0].literal.clone()))
        }
        3 if toks[0].ty == TokenType::Ident
            && toks[1].literal == "::"
            && toks[2].ty == TokenType::String =>
        {
            Some((toks[0].literal.clone(), toks[2].literal.clone()))
        }
        _ => None,
    }
}

/// The `newtype` section.
fn process_types(
    vm: &mut Vm,
    arena: &mut ParserArena,
    compiler: &mut Compiler,
    parser_ix: usize,
    chunks: &[Chunk],
) {
    let type_chunks: Vec<&Chunk> = chunks.iter().filter(|c| c.section == "newtype").collect();
    // Dependency order: a type mentioning another compiles after it.
    let mut graph = Digraph::new();
    let mut by_name: IndexMap<String, &Chunk> = IndexMap::new();
    for chunk in &type_chunks {
        if let Some(name_tok) = chunk.tokens.first() {
            by_name.insert(name_tok.literal.clone(), chunk);
            graph.add_node(&name_tok.literal);
        }
    }
    for chunk in &type_chunks {
        let name = match chunk.tokens.first() {
            Some(t) => t.literal.clone(),
            None => continue,
        };
        for tok in chunk.tokens.iter().skip(1) {
            if tok.ty == TokenType::Ident && by_name.contains_key(&tok.literal) && tok.literal != name
            {
                graph.add_arrow(&name, &tok.literal);
            }
        }
    }
    for component in graph.tarjan() {
        if component.len() > 1 {
            let names = component.join(", ");
            if let Some(chunk) = by_name.get(&component[0]) {
                compiler
                    .errors
                    .push(Error::new("init/cycle/type", &chunk.tokens[0], &[&names]));
            }
            continue;
        }
        if let Some(chunk) = by_name.get(&component[0]) {
            process_type_declaration(vm, arena, compiler, parser_ix, chunk);
        }
    }
}

fn process_type_declaration(
    vm: &mut Vm,
    arena: &mut ParserArena,
    compiler: &mut Compiler,
    parser_ix: usize,
    chunk: &Chunk,
) {
    let toks = &chunk.tokens;
    let name_tok = toks[0].clone();
    if name_tok.ty != TokenType::Ident {
        compiler
            .errors
            .push(Error::new("init/decl/form", &name_tok, &[]));
        return;
    }
    let name = name_tok.literal.clone();
    if arena.parsers[parser_ix].typenames.contains(&name)
        || arena.parsers[parser_ix].parameterized_types.contains(&name)
    {
        compiler
            .errors
            .push(Error::new("init/type/exists", &name_tok, &[&name]));
        return;
    }
    let namespace = arena.parsers[parser_ix].namespace_path.clone();
    let mut pos = 1;
    // Optional parameter list: `Z{n int} = …`.
    let mut params: Vec<crate::ast::TypeParameter> = Vec::new();
    let parameterized = toks.get(pos).map(|t| t.ty) == Some(TokenType::LBrace);
    if parameterized {
        let close = match matching_brace(toks, pos) {
            Some(c) => c,
            None => {
                compiler
                    .errors
                    .push(Error::new("parse/param/form", &name_tok, &[]));
                return;
            }
        };
        let inner: Vec<Token> = toks[pos + 1..close].to_vec();
        params = parse_type_parameters(arena, parser_ix, compiler, &inner, &name_tok);
        pos = close + 1;
    }
    if toks.get(pos).map(|t| t.ty) != Some(TokenType::Assign) {
        compiler
            .errors
            .push(Error::new("init/decl/form", &name_tok, &[]));
        return;
    }
    pos += 1;
    let rhs: Vec<Token> = toks[pos..].to_vec();
    let head = match rhs.first() {
        Some(t) => t.literal.clone(),
        None => {
            compiler
                .errors
                .push(Error::new("init/decl/form", &name_tok, &[]));
            return;
        }
    };
    match head.as_str() {
        "enum" => {
            let mut elements = Vec::new();
            for tok in rhs.iter().skip(1) {
                match tok.ty {
                    TokenType::Ident => {
                        if elements.contains(&tok.literal) {
                            compiler.errors.push(Error::new(
                                "init/enum/element",
                                tok,
                                &[&tok.literal],
                            ));
                        }
                        elements.push(tok.literal.clone());
                    }
                    TokenType::Comma => {}
                    _ => {
                        compiler
                            .errors
                            .push(Error::new("init/decl/form", tok, &[]));
                        return;
                    }
                }
            }
            vm.registry.register(pipefish_vm::TypeInfo::Enum {
                name: name.clone(),
                path: namespace.clone(),
                element_names: elements.clone(),
                private: false,
            });
            let parser = &mut arena.parsers[parser_ix];
            parser.typenames.insert(name.clone());
            parser.enum_type_names.insert(name.clone());
            for e in elements {
                parser.enum_element_names.insert(e);
            }
        }
        "struct" => {
            let (fields, condition) =
                scan_struct_rhs(arena, parser_ix, compiler, &rhs, &name_tok);
            if parameterized {
                arena.parsers[parser_ix]
                    .parameterized_types
                    .insert(name.clone());
                compiler.param_types.insert(
                    name.clone(),
                    ParamTypeDef {
                        params,
                        body: ParamTypeBody::StructOf { fields, condition },
                        token: name_tok.clone(),
                    },
                );
                return;
            }
            let mut labels = Vec::new();
            let mut field_types = Vec::new();
            for (label, tn) in &fields {
                labels.push(vm.registry.intern_label(label));
                field_types.push(compiler.resolve_type(vm, tn));
            }
            let ty = vm.registry.register_struct(
                &name,
                &namespace,
                labels,
                field_types,
                false,
                false,
                Vec::new(),
            );
            if let Some(cond) = condition {
                compiler.compile_validator(vm, ty, &cond, &IndexMap::new(), &name_tok);
            }
            arena.parsers[parser_ix].typenames.insert(name);
        }
        "clone" => {
            let (parent, requests, condition) =
                scan_clone_rhs(arena, parser_ix, compiler, &rhs, &name_tok);
            let parent = match parent {
                Some(p) => p,
                None => return,
            };
            if parameterized {
                arena.parsers[parser_ix]
                    .parameterized_types
                    .insert(name.clone());
                compiler.param_types.insert(
                    name.clone(),
                    ParamTypeDef {
                        params,
                        body: ParamTypeBody::CloneOf {
                            parent,
                            condition,
                            requests,
                        },
                        token: name_tok.clone(),
                    },
                );
                return;
            }
            let parent_ty = match compiler.resolve_type(vm, &parent).only() {
                Some(t) => vm.registry.underlying(t),
                None => {
                    compiler
                        .errors
                        .push(Error::new("parse/type/exists", parent.token(), &[]));
                    return;
                }
            };
            let is_container = parent_ty == values::LIST;
            let ty = vm.registry.register_clone(
                &name,
                &namespace,
                parent_ty,
                false,
                is_container || requests.iter().any(|r| r == "slicing"),
                is_container || requests.iter().any(|r| r == "filtering"),
                is_container || requests.iter().any(|r| r == "mapping"),
                Vec::new(),
            );
            if let Some(cond) = condition {
                compiler.compile_validator(vm, ty, &cond, &IndexMap::new(), &name_tok);
            }
            arena.parsers[parser_ix].typenames.insert(name);
        }
        _ => {
            // An alias: `Strings = list{string}`.
            let mut alias_tokens = rhs.clone();
            ensure_eof(&mut alias_tokens);
            let mut run = ParseRun::new(arena, parser_ix, alias_tokens);
            let tn = run.parse_type_from_cur(crate::parser::types::T_LOWEST);
            compiler.errors.extend(run.errors);
            let tn = match tn {
                Some(t) => t,
                None => return,
            };
            match compiler.resolve_type(vm, &tn).only() {
                Some(ty) => {
                    compiler.type_aliases.insert(name.clone(), ty);
                    arena.parsers[parser_ix].typenames.insert(name);
                }
                None => {
                    compiler
                        .errors
                        .push(Error::new("parse/type/exists", &name_tok, &[&name]));
                }
            }
        }
    }
}

/// `struct(name string, age int)` with an optional `: condition`.
fn scan_struct_rhs(
    arena: &ParserArena,
    parser_ix: usize,
    compiler: &mut Compiler,
    rhs: &[Token],
    name_tok: &Token,
) -> (Vec<(String, TypeNode)>, Option<Node>) {
    let open = rhs
        .iter()
        .position(|t| t.ty == TokenType::LParen)
        .unwrap_or(rhs.len());
    let close = matching_brace_of(rhs, open, TokenType::LParen, TokenType::RParen)
        .unwrap_or(rhs.len().saturating_sub(1));
    let inner: Vec<Token> = rhs
        .get(open + 1..close)
        .map(|s| s.to_vec())
        .unwrap_or_default();
    let mut sig_tokens = inner;
    ensure_eof(&mut sig_tokens);
    let mut run = ParseRun::new(arena, parser_ix, sig_tokens);
    let fields = match run.parse_tokenized_chunk() {
        Some(node) => {
            let sig = run.reparse_sig(&node, &TypeNode::named("any?"));
            compiler.errors.extend(run.errors);
            match sig {
                Some(sig) => sig
                    .into_iter()
                    .map(|pair| (pair.name, pair.ty))
                    .collect(),
                None => Vec::new(),
            }
        }
        None => {
            compiler.errors.extend(run.errors);
            compiler
                .errors
                .push(Error::new("init/decl/form", name_tok, &[]));
            Vec::new()
        }
    };
    let condition = scan_condition(arena, parser_ix, compiler, rhs, close);
    (fields, condition)
}

/// `clone int using slicing : condition`.
fn scan_clone_rhs(
    arena: &ParserArena,
    parser_ix: usize,
    compiler: &mut Compiler,
    rhs: &[Token],
    name_tok: &Token,
) -> (Option<TypeNode>, Vec<String>, Option<Node>) {
    let mut requests = Vec::new();
    let using_at = rhs.iter().position(|t| t.literal == "using");
    let colon_at = rhs.iter().position(|t| {
        matches!(t.ty, TokenType::Colon | TokenType::MagicColon)
    });
    let parent_end = using_at.or(colon_at).unwrap_or(rhs.len());
    let mut parent_tokens: Vec<Token> = rhs[1..parent_end].to_vec();
    if parent_tokens.is_empty() {
        compiler
            .errors
            .push(Error::new("init/decl/form", name_tok, &[]));
        return (None, requests, None);
    }
    ensure_eof(&mut parent_tokens);
    let mut run = ParseRun::new(arena, parser_ix, parent_tokens);
    let parent = run.parse_type_from_cur(crate::parser::types::T_LOWEST);
    compiler.errors.extend(run.errors);
    if let Some(start) = using_at {
        let end = colon_at.unwrap_or(rhs.len());
        for tok in &rhs[start + 1..end] {
            if tok.ty == TokenType::Ident {
                requests.push(tok.literal.clone());
            }
        }
    }
    let condition = match colon_at {
        Some(at) => scan_condition(arena, parser_ix, compiler, rhs, at.saturating_sub(1)),
        None => None,
    };
    (parent, requests, condition)
}

/// Parse whatever follows a `:` at or after `from_ix` as a validation
/// condition over `that`.
fn scan_condition(
    arena: &ParserArena,
    parser_ix: usize,
    compiler: &mut Compiler,
    rhs: &[Token],
    from_ix: usize,
) -> Option<Node> {
    let colon = rhs
        .iter()
        .enumerate()
        .skip(from_ix)
        .find(|(_, t)| matches!(t.ty, TokenType::Colon | TokenType::MagicColon))
        .map(|(i, _)| i)?;
    let mut cond_tokens: Vec<Token> = rhs[colon + 1..].to_vec();
    if cond_tokens.is_empty() {
        return None;
    }
    ensure_eof(&mut cond_tokens);
    let mut run = ParseRun::new(arena, parser_ix, cond_tokens);
    let node = run.parse_tokenized_chunk();
    compiler.errors.extend(run.errors);
    node
}

/// The `const` / `var` sections: compile and run each assignment at
/// initialization time, constants first, in dependency order.
fn process_globals(
    vm: &mut Vm,
    arena: &mut ParserArena,
    compiler: &mut Compiler,
    parser_ix: usize,
    chunks: &[Chunk],
    section: &str,
) {
    let decls: Vec<&Chunk> = chunks.iter().filter(|c| c.section == section).collect();
    if decls.is_empty() {
        return;
    }
    let mut graph = Digraph::new();
    let mut by_name: IndexMap<String, &Chunk> = IndexMap::new();
    // The declared names are the first identifier of each comma group
    // before the `=`; what follows a name is its type annotation.
    let declared_names = |chunk: &Chunk| -> Vec<String> {
        let mut names = Vec::new();
        let mut take_next = true;
        for tok in chunk.tokens.iter() {
            match tok.ty {
                TokenType::Assign => break,
                TokenType::Comma => take_next = true,
                TokenType::Ident if take_next => {
                    names.push(tok.literal.clone());
                    take_next = false;
                }
                _ => {}
            }
        }
        names
    };
    for chunk in &decls {
        for name in declared_names(chunk) {
            by_name.insert(name.clone(), chunk);
            graph.add_node(&name);
        }
    }
    for chunk in &decls {
        let names = declared_names(chunk);
        let mut lhs = true;
        for tok in chunk.tokens.iter() {
            if tok.ty == TokenType::Assign {
                lhs = false;
                continue;
            }
            if !lhs && tok.ty == TokenType::Ident && by_name.contains_key(&tok.literal) {
                for n in &names {
                    graph.add_arrow(n, &tok.literal);
                }
            }
        }
    }
    let mut done: Vec<*const Chunk> = Vec::new();
    for component in graph.tarjan() {
        if component.len() > 1 {
            let names = component.join(", ");
            if let Some(chunk) = by_name.get(&component[0]) {
                compiler
                    .errors
                    .push(Error::new("init/cycle/const", &chunk.tokens[0], &[&names]));
            }
            continue;
        }
        let chunk = match by_name.get(&component[0]) {
            Some(c) => *c,
            None => continue,
        };
        let ptr = chunk as *const Chunk;
        if done.contains(&ptr) {
            continue;
        }
        done.push(ptr);
        run_global_declaration(vm, arena, compiler, parser_ix, chunk, section == "const");
    }
}

fn run_global_declaration(
    vm: &mut Vm,
    arena: &ParserArena,
    compiler: &mut Compiler,
    parser_ix: usize,
    chunk: &Chunk,
    constant: bool,
) {
    let mut tokens = chunk.tokens.clone();
    ensure_eof(&mut tokens);
    let mut run = ParseRun::new(arena, parser_ix, tokens);
    let node = run.parse_tokenized_chunk();
    compiler.errors.extend(run.errors);
    let node = match node {
        Some(n) => n,
        None => return,
    };
    let namespace = arena.parsers[parser_ix].namespace_path.clone();
    let mut ctx = Ctx::new(&namespace);
    ctx.allow_new_globals = true;
    ctx.cmd = true;
    let before_globals: Vec<String> = compiler.globals.keys().cloned().collect();
    let entry = vm.code.len();
    let functions_before = vm.functions.len();
    let before_errors = compiler.errors.len();
    let (result, _) = compiler.compile_expression(vm, &mut ctx, &node);
    vm.code.push(Op::Ret { src: result });
    if compiler.errors.len() > before_errors {
        if vm.functions.len() == functions_before {
            vm.code.truncate(entry);
        }
        return;
    }
    let outcome = vm.run(entry, ctx.frame_size(), Vec::new());
    // Keep the code when the declaration produced functions (a lambda, a
    // materialized validator) whose bodies live in it.
    if vm.functions.len() == functions_before {
        vm.code.truncate(entry);
    }
    if let Some(e) = outcome.as_error() {
        compiler.errors.push(e.error.clone());
    }
    if constant {
        for (name, info) in compiler.globals.iter_mut() {
            if !before_globals.contains(name) {
                info.constant = true;
            }
        }
    }
}

/// Scan a `def`/`cmd` chunk's header: words, parameter groups, return
/// types, the body. The fix position and bling pattern fall out of the
/// element shapes.
fn scan_function(
    arena: &ParserArena,
    parser_ix: usize,
    compiler: &mut Compiler,
    chunk: &Chunk,
) -> Option<ScannedFn> {
    let toks = &chunk.tokens;
    let first = toks.first()?.clone();
    // Split at the first top-level colon.
    let mut depth = 0;
    let mut colon_at = None;
    for (i, tok) in toks.iter().enumerate() {
        match tok.ty {
            TokenType::LParen | TokenType::LBrack | TokenType::LBrace => depth += 1,
            TokenType::RParen | TokenType::RBrack | TokenType::RBrace => depth -= 1,
            TokenType::Colon | TokenType::MagicColon if depth == 0 => {
                colon_at = Some(i);
                break;
            }
            _ => {}
        }
    }
    let colon_at = match colon_at {
        Some(i) => i,
        None => {
            compiler
                .errors
                .push(Error::new("init/decl/form", &first, &[]));
            return None;
        }
    };
    let mut header = &toks[..colon_at];
    let body: Vec<Token> = toks[colon_at + 1..].to_vec();
    // Return types sit between `->` and the colon.
    let mut rets = Vec::new();
    if let Some(arrow) = header.iter().position(|t| t.ty == TokenType::Pipe) {
        let ret_tokens = &header[arrow + 1..];
        rets = parse_return_types(arena, parser_ix, compiler, ret_tokens);
        header = &header[..arrow];
    }

    // Elements: words and parameter groups.
    enum Element {
        Word(Token),
        Params(AstSig),
    }
    let mut elements = Vec::new();
    let mut i = 0;
    while i < header.len() {
        let tok = &header[i];
        match tok.ty {
            TokenType::Ident => {
                elements.push(Element::Word(tok.clone()));
                i += 1;
            }
            TokenType::LParen => {
                let close = matching_brace_of(header, i, TokenType::LParen, TokenType::RParen)?;
                let inner: Vec<Token> = header[i + 1..close].to_vec();
                let sig = parse_parameter_group(arena, parser_ix, compiler, inner);
                elements.push(Element::Params(sig));
                i = close + 1;
            }
            _ => {
                compiler
                    .errors
                    .push(Error::new("init/decl/form", tok, &[]));
                return None;
            }
        }
    }
    if elements.is_empty() {
        compiler
            .errors
            .push(Error::new("init/decl/form", &first, &[]));
        return None;
    }

    // Derive the name, fix position, signature and bling pattern.
    let mut sig = AstSig::new();
    let mut pattern = BlingPattern::new();
    let (name_tok, fix, rest_start) = match &elements[0] {
        Element::Word(tok) => {
            if elements.len() == 1 {
                (tok.clone(), Fix::Unfix, 1)
            } else {
                (tok.clone(), Fix::Prefix, 1)
            }
        }
        Element::Params(params) => {
            sig.extend(params.clone());
            match elements.get(1) {
                Some(Element::Word(tok)) => {
                    if elements.len() == 2 {
                        (tok.clone(), Fix::Suffix, 2)
                    } else {
                        // The infix name is itself a word in the pattern.
                        sig.push(NameTypePair {
                            name: tok.literal.clone(),
                            ty: TypeNode::named("bling"),
                        });
                        pattern.push((tok.literal.clone(), Fix::Midfix));
                        (tok.clone(), Fix::Infix, 2)
                    }
                }
                _ => {
                    compiler
                        .errors
                        .push(Error::new("init/decl/form", &first, &[]));
                    return None;
                }
            }
        }
    };
    // Remaining elements after the name.
    for element in elements.iter().skip(rest_start) {
        match element {
            Element::Word(tok) => {
                sig.push(NameTypePair {
                    name: tok.literal.clone(),
                    ty: TypeNode::named("bling"),
                });
                pattern.push((tok.literal.clone(), Fix::Midfix));
            }
            Element::Params(params) => {
                sig.extend(params.clone());
            }
        }
    }
    // Fix up bling positions now the whole shape is known: a word with no
    // value parameter after it is an endfix; one before any value
    // parameter is a forefix.
    let mut value_seen = false;
    let mut pattern_ix = 0;
    for pair in sig.iter() {
        if pair.ty.to_string() == "bling" {
            if pattern_ix < pattern.len() && pattern[pattern_ix].0 == pair.name {
                let value_after = sig
                    .iter()
                    .skip_while(|p| !std::ptr::eq(*p, pair))
                    .skip(1)
                    .any(|p| p.ty.to_string() != "bling");
                pattern[pattern_ix].1 = if !value_after {
                    Fix::Endfix
                } else if !value_seen {
                    Fix::Forefix
                } else {
                    Fix::Midfix
                };
                pattern_ix += 1;
            }
        } else {
            value_seen = true;
        }
    }
    // The infix name-word stays a plain pattern entry consumed by the
    // parser's infix machinery, not the bling manager.
    if fix == Fix::Infix && !pattern.is_empty() {
        pattern.remove(0);
    }

    Some(ScannedFn {
        name: name_tok.literal.clone(),
        fix,
        sig,
        pattern,
        rets,
        body,
        token: name_tok,
        cmd: chunk.section == "cmd",
    })
}

/// Parse the inside of a parameter group: names with rightward type
/// inheritance.
fn parse_parameter_group(
    arena: &ParserArena,
    parser_ix: usize,
    compiler: &mut Compiler,
    mut tokens: Vec<Token>,
) -> AstSig {
    if tokens.is_empty() {
        return AstSig::new();
    }
    ensure_eof(&mut tokens);
    let mut run = ParseRun::new(arena, parser_ix, tokens);
    match run.parse_tokenized_chunk() {
        Some(node) => {
            let sig = run.reparse_sig(&node, &TypeNode::named("any?"));
            compiler.errors.extend(run.errors);
            sig.unwrap_or_default()
        }
        None => {
            compiler.errors.extend(run.errors);
            AstSig::new()
        }
    }
}

fn parse_return_types(
    arena: &ParserArena,
    parser_ix: usize,
    compiler: &mut Compiler,
    tokens: &[Token],
) -> Vec<TypeNode> {
    let mut out = Vec::new();
    // Comma-separated type expressions.
    let mut start = 0;
    let mut depth = 0;
    let mut groups = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        match tok.ty {
            TokenType::LParen | TokenType::LBrack | TokenType::LBrace => depth += 1,
            TokenType::RParen | TokenType::RBrack | TokenType::RBrace => depth -= 1,
            TokenType::Comma if depth == 0 => {
                groups.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    groups.push(&tokens[start..]);
    for group in groups {
        if group.is_empty() {
            continue;
        }
        let mut group_tokens = group.to_vec();
        ensure_eof(&mut group_tokens);
        let mut run = ParseRun::new(arena, parser_ix, group_tokens);
        if let Some(tn) = run.parse_type_from_cur(crate::parser::types::T_LOWEST) {
            out.push(tn);
        }
        compiler.errors.extend(run.errors);
    }
    out
}

/// Type parameters in a definition: `{n int}`, `{T type}`.
fn parse_type_parameters(
    arena: &ParserArena,
    parser_ix: usize,
    compiler: &mut Compiler,
    tokens: &[Token],
    name_tok: &Token,
) -> Vec<crate::ast::TypeParameter> {
    let mut group_tokens = tokens.to_vec();
    ensure_eof(&mut group_tokens);
    let mut run = ParseRun::new(arena, parser_ix, group_tokens);
    match run.parse_tokenized_chunk() {
        Some(node) => {
            let sig = run.reparse_sig(&node, &TypeNode::named("type"));
            compiler.errors.extend(run.errors);
            sig.unwrap_or_default()
                .into_iter()
                .map(|pair| crate::ast::TypeParameter {
                    name: pair.name,
                    ty: pair.ty.to_string(),
                })
                .collect()
        }
        None => {
            compiler.errors.extend(run.errors);
            compiler
                .errors
                .push(Error::new("parse/param/form", name_tok, &[]));
            Vec::new()
        }
    }
}

fn matching_brace(tokens: &[Token], open: usize) -> Option<usize> {
    matching_brace_of(tokens, open, TokenType::LBrace, TokenType::RBrace)
}

fn matching_brace_of(
    tokens: &[Token],
    open: usize,
    open_ty: TokenType,
    close_ty: TokenType,
) -> Option<usize> {
    let mut depth = 0;
    for (i, tok) in tokens.iter().enumerate().skip(open) {
        if tok.ty == open_ty {
            depth += 1;
        } else if tok.ty == close_ty {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// A deterministic compile order for function bodies: callees before
/// callers where the call graph allows it.
fn function_order(scanned: &[ScannedFn], namespace: &str) -> Vec<String> {
    let mut graph = Digraph::new();
    let names: Vec<String> = scanned
        .iter()
        .map(|d| format!("{}{}", namespace, d.name))
        .collect();
    for name in &names {
        graph.add_node(name);
    }
    for decl in scanned {
        let caller = format!("{}{}", namespace, decl.name);
        for tok in &decl.body {
            if tok.ty == TokenType::Ident {
                let callee = format!("{}{}", namespace, tok.literal);
                if names.contains(&callee) && callee != caller {
                    graph.add_arrow(&caller, &callee);
                }
            }
        }
    }
    let mut order = Vec::new();
    for component in graph.tarjan() {
        for name in component {
            if !order.contains(&name) {
                order.push(name);
            }
        }
    }
    order
}

//! The bytecode interpreter.
//!
//! Single-threaded, register-based. State: a flat code vector, a constant
//! pool, a globals region, a token table for blame, the frozen type
//! registry, a function table, and a value stack of frames whose layout the
//! compiler fixed.
//!
//! Operations that can fail (division, indexing out of range, casts, user
//! errors, `unwrap` on NULL) put an error value in their destination and
//! execution continues; every downstream operation with an error operand
//! short-circuits and propagates the first one, left to right.

use crate::opcode::{Op, Reg, TrackOperand};
use crate::tracking::{TrackArg, TrackingData};
use crate::typeinfo::{TypeInfo, TypeRegistry};
use crate::values::{self, AbstractType, Closure, Payload, Value, ValueType};
use chrono::Local;
use pipefish_foundation::error::Error;
use pipefish_foundation::token::{Token, TokenType};
use std::sync::Arc;

/// Where `post` output goes. The embedder picks stdout, capture, or its own.
pub trait OutputHandler {
    fn write(&mut self, text: &str);

    /// Drain captured output, if this handler captures it.
    fn captured(&mut self) -> Option<String> {
        None
    }
}

/// Writes to stdout.
#[derive(Default)]
pub struct StdoutHandler;

impl OutputHandler for StdoutHandler {
    fn write(&mut self, text: &str) {
        print!("{}", text);
    }
}

/// Captures output into a buffer the caller can drain.
#[derive(Default)]
pub struct CapturingHandler {
    buffer: String,
}

impl CapturingHandler {
    pub fn new() -> Self {
        CapturingHandler::default()
    }

    /// Return and clear the captured output.
    pub fn dump(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }
}

impl OutputHandler for CapturingHandler {
    fn write(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    fn captured(&mut self) -> Option<String> {
        Some(self.dump())
    }
}

/// Where `input` reads from. The embedder picks stdin, scripted lines, or
/// its own. Reading blocks the calling thread.
pub trait InputHandler {
    fn read_line(&mut self, prompt: &str) -> String;
}

/// Prompts on stdout and reads a line from stdin.
#[derive(Default)]
pub struct StdinHandler;

impl InputHandler for StdinHandler {
    fn read_line(&mut self, prompt: &str) -> String {
        use std::io::Write;
        print!("{}", prompt);
        std::io::stdout().flush().ok();
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).ok();
        line.trim_end_matches(&['\r', '\n'][..]).to_string()
    }
}

/// Feeds prepared lines, for tests and snap replays. Runs dry to the
/// empty string.
#[derive(Default)]
pub struct ScriptedHandler {
    lines: std::collections::VecDeque<String>,
}

impl ScriptedHandler {
    pub fn new(lines: &[&str]) -> Self {
        ScriptedHandler {
            lines: lines.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl InputHandler for ScriptedHandler {
    fn read_line(&mut self, _prompt: &str) -> String {
        self.lines.pop_front().unwrap_or_default()
    }
}

/// One entry in the function table.
#[derive(Debug, Clone)]
pub struct FuncInfo {
    pub name: String,
    /// Entry point in the code vector.
    pub addr: usize,
    /// Number of parameters, copied into slots `0..arity`.
    pub arity: u32,
    /// Captured values land in slots `arity..arity + captures`.
    pub captures: u32,
    /// Total frame slots.
    pub frame_size: u32,
}

struct Frame {
    ret_addr: usize,
    dst: Reg,
    caller_base: usize,
}

/// The virtual machine.
pub struct Vm {
    pub code: Vec<Op>,
    pub consts: Vec<Value>,
    pub globals: Vec<Value>,
    pub tokens: Vec<Token>,
    pub registry: TypeRegistry,
    pub functions: Vec<FuncInfo>,
    pub tracking: Vec<TrackingData>,
    pub out: Box<dyn OutputHandler>,
    pub input: Box<dyn InputHandler>,
    /// Set when a `post` ran, so the REPL can suppress the automatic print.
    pub post_happened: bool,
    stack: Vec<Value>,
    frames: Vec<Frame>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Vm {
            code: Vec::new(),
            consts: Vec::new(),
            globals: Vec::new(),
            tokens: Vec::new(),
            registry: TypeRegistry::new(),
            functions: Vec::new(),
            tracking: Vec::new(),
            out: Box::new(StdoutHandler),
            input: Box::new(StdinHandler),
            post_happened: false,
            stack: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Intern a token for blame and return its index.
    pub fn add_token(&mut self, token: Token) -> u32 {
        self.tokens.push(token);
        (self.tokens.len() - 1) as u32
    }

    /// Intern a constant and return its pool index.
    pub fn add_const(&mut self, value: Value) -> u32 {
        self.consts.push(value);
        (self.consts.len() - 1) as u32
    }

    fn token(&self, ix: u32) -> Token {
        self.tokens
            .get(ix as usize)
            .cloned()
            .unwrap_or_else(|| Token::synthetic(TokenType::Ident, "?"))
    }

    fn err(&self, id: &str, tok: u32, args: &[&str]) -> Value {
        Value::error(Error::new(id, &self.token(tok), args))
    }

    /// Execute from `entry` in a fresh frame of `frame_size` slots, with
    /// `args` in the first slots. Returns the value of the final `Ret`.
    pub fn run(&mut self, entry: usize, frame_size: u32, args: Vec<Value>) -> Value {
        tracing::trace!(entry, frame_size, "vm run");
        let start_depth = self.frames.len();
        let initial_base = self.stack.len();
        let mut base = initial_base;
        self.stack.extend(args);
        self.stack
            .resize(base + frame_size as usize, Value::undefined());
        let mut pc = entry;

        macro_rules! get {
            ($r:expr) => {
                self.stack[base + $r as usize].clone()
            };
        }
        macro_rules! set {
            ($r:expr, $v:expr) => {
                self.stack[base + $r as usize] = $v
            };
        }
        // First-error-wins, left to right.
        macro_rules! propagate {
            ($dst:expr, $($r:expr),+) => {
                {
                    let mut found: Option<Value> = None;
                    $(
                        if found.is_none() {
                            let v = &self.stack[base + $r as usize];
                            if v.ty == values::ERROR {
                                found = Some(v.clone());
                            }
                        }
                    )+
                    if let Some(e) = found {
                        set!($dst, e);
                        pc += 1;
                        continue;
                    }
                }
            };
        }
        macro_rules! propagate_range {
            ($dst:expr, $first:expr, $n:expr) => {{
                let mut found: Option<Value> = None;
                for i in 0..$n {
                    let v = &self.stack[base + ($first + i) as usize];
                    if v.ty == values::ERROR {
                        found = Some(v.clone());
                        break;
                    }
                }
                if let Some(e) = found {
                    set!($dst, e);
                    pc += 1;
                    continue;
                }
            }};
        }

        loop {
            let op = self.code[pc].clone();
            match op {
                Op::LoadC { dst, c } => set!(dst, self.consts[c as usize].clone()),
                Op::LoadG { dst, g } => set!(dst, self.globals[g as usize].clone()),
                Op::StoreG { g, src } => {
                    let v = get!(src);
                    self.globals[g as usize] = v;
                }
                Op::Mov { dst, src } => set!(dst, get!(src)),

                Op::Addi { dst, a, b } => {
                    propagate!(dst, a, b);
                    let (x, y, ty) = self.int_pair(base, a, b);
                    set!(dst, Value::new(ty, Payload::Int(x.wrapping_add(y))));
                }
                Op::Subi { dst, a, b } => {
                    propagate!(dst, a, b);
                    let (x, y, ty) = self.int_pair(base, a, b);
                    set!(dst, Value::new(ty, Payload::Int(x.wrapping_sub(y))));
                }
                Op::Muli { dst, a, b } => {
                    propagate!(dst, a, b);
                    let (x, y, ty) = self.int_pair(base, a, b);
                    set!(dst, Value::new(ty, Payload::Int(x.wrapping_mul(y))));
                }
                Op::Divi { dst, a, b, tok } => {
                    propagate!(dst, a, b);
                    let (x, y, _) = self.int_pair(base, a, b);
                    let result = if y == 0 {
                        self.err("vm/div/zero", tok, &[])
                    } else {
                        Value::float(x as f64 / y as f64)
                    };
                    set!(dst, result);
                }
                Op::Idiv { dst, a, b, tok } => {
                    propagate!(dst, a, b);
                    let (x, y, ty) = self.int_pair(base, a, b);
                    let result = if y == 0 {
                        self.err("vm/div/zero", tok, &[])
                    } else {
                        Value::new(ty, Payload::Int(x.div_euclid(y)))
                    };
                    set!(dst, result);
                }
                Op::Modi { dst, a, b, tok } => {
                    propagate!(dst, a, b);
                    let (x, y, ty) = self.int_pair(base, a, b);
                    let result = if y == 0 {
                        self.err("vm/mod/zero", tok, &[])
                    } else {
                        Value::new(ty, Payload::Int(x.rem_euclid(y)))
                    };
                    set!(dst, result);
                }
                Op::Negi { dst, src } => {
                    propagate!(dst, src);
                    let v = get!(src);
                    set!(
                        dst,
                        Value::new(v.ty, Payload::Int(-v.as_int().unwrap_or(0)))
                    );
                }
                Op::Addf { dst, a, b } => {
                    propagate!(dst, a, b);
                    let (x, y, ty) = self.float_pair(base, a, b);
                    set!(dst, Value::new(ty, Payload::Float(x + y)));
                }
                Op::Subf { dst, a, b } => {
                    propagate!(dst, a, b);
                    let (x, y, ty) = self.float_pair(base, a, b);
                    set!(dst, Value::new(ty, Payload::Float(x - y)));
                }
                Op::Mulf { dst, a, b } => {
                    propagate!(dst, a, b);
                    let (x, y, ty) = self.float_pair(base, a, b);
                    set!(dst, Value::new(ty, Payload::Float(x * y)));
                }
                Op::Divf { dst, a, b, tok } => {
                    propagate!(dst, a, b);
                    let (x, y, ty) = self.float_pair(base, a, b);
                    let result = if y == 0.0 {
                        self.err("vm/div/zero", tok, &[])
                    } else {
                        Value::new(ty, Payload::Float(x / y))
                    };
                    set!(dst, result);
                }
                Op::Negf { dst, src } => {
                    propagate!(dst, src);
                    let v = get!(src);
                    set!(
                        dst,
                        Value::new(v.ty, Payload::Float(-v.as_float().unwrap_or(0.0)))
                    );
                }
                Op::Itof { dst, src } => {
                    propagate!(dst, src);
                    let v = get!(src);
                    set!(dst, Value::float(v.as_int().unwrap_or(0) as f64));
                }

                Op::Cat { dst, a, b } => {
                    propagate!(dst, a, b);
                    let mut s = String::new();
                    for r in [a, b] {
                        match &self.stack[base + r as usize].payload {
                            Payload::Str(part) => s.push_str(part),
                            Payload::Rune(c) => s.push(*c),
                            _ => {}
                        }
                    }
                    set!(dst, Value::string(s));
                }
                Op::AddList { dst, a, b } => {
                    propagate!(dst, a, b);
                    let (va, vb) = (get!(a), get!(b));
                    let ty = va.ty;
                    if let (Payload::List(xs), Payload::List(ys)) = (&va.payload, &vb.payload) {
                        let mut out = xs.as_ref().clone();
                        out.extend(ys.iter().cloned());
                        set!(dst, Value::new(ty, Payload::List(Arc::new(out))));
                    }
                }
                Op::AddSet { dst, a, b } => {
                    propagate!(dst, a, b);
                    let (va, vb) = (get!(a), get!(b));
                    let ty = va.ty;
                    if let (Payload::Set(xs), Payload::Set(ys)) = (&va.payload, &vb.payload) {
                        let mut out = xs.as_ref().clone();
                        for y in ys.iter() {
                            out.insert(y.clone());
                        }
                        set!(dst, Value::new(ty, Payload::Set(Arc::new(out))));
                    }
                }
                Op::AddElt { dst, a, b, tok } => {
                    propagate!(dst, a, b);
                    let (va, vb) = (get!(a), get!(b));
                    let result = match &va.payload {
                        Payload::List(xs) => {
                            let mut out = xs.as_ref().clone();
                            out.push(vb);
                            Value::new(va.ty, Payload::List(Arc::new(out)))
                        }
                        Payload::Set(xs) => {
                            let mut out = xs.as_ref().clone();
                            out.insert(vb);
                            Value::new(va.ty, Payload::Set(Arc::new(out)))
                        }
                        _ => {
                            let tname = self.type_name(va.ty);
                            self.err("vm/index/type", tok, &[&tname, "element"])
                        }
                    };
                    set!(dst, result);
                }

                Op::Lt { dst, a, b } => {
                    propagate!(dst, a, b);
                    set!(dst, Value::bool(self.numeric_cmp(base, a, b) < 0));
                }
                Op::Le { dst, a, b } => {
                    propagate!(dst, a, b);
                    set!(dst, Value::bool(self.numeric_cmp(base, a, b) <= 0));
                }
                Op::Gt { dst, a, b } => {
                    propagate!(dst, a, b);
                    set!(dst, Value::bool(self.numeric_cmp(base, a, b) > 0));
                }
                Op::Ge { dst, a, b } => {
                    propagate!(dst, a, b);
                    set!(dst, Value::bool(self.numeric_cmp(base, a, b) >= 0));
                }
                Op::Eq { dst, a, b } => {
                    propagate!(dst, a, b);
                    set!(dst, Value::bool(get!(a) == get!(b)));
                }
                Op::Not { dst, src, tok } => {
                    propagate!(dst, src);
                    let result = match get!(src).as_bool() {
                        Some(b) => Value::bool(!b),
                        None => self.err("vm/bool/not", tok, &[]),
                    };
                    set!(dst, result);
                }

                Op::MkList { dst, first, n } => {
                    propagate_range!(dst, first, n);
                    let items = self.collect_range(base, first, n);
                    set!(dst, Value::list(items));
                }
                Op::MkSet { dst, first, n } => {
                    propagate_range!(dst, first, n);
                    let items = self.collect_range(base, first, n);
                    set!(
                        dst,
                        Value::new(values::SET, Payload::Set(Arc::new(items.into_iter().collect())))
                    );
                }
                Op::MkMap { dst, first, n, tok } => {
                    propagate_range!(dst, first, n);
                    let items = self.collect_range(base, first, n);
                    let mut map = indexmap::IndexMap::new();
                    let mut bad = None;
                    for item in items {
                        match &item.payload {
                            Payload::Pair(kv) => {
                                map.insert(kv.0.clone(), kv.1.clone());
                            }
                            _ => {
                                let tname = self.type_name(item.ty);
                                bad = Some(self.err("vm/index/type", tok, &[&tname, "pair"]));
                                break;
                            }
                        }
                    }
                    set!(
                        dst,
                        bad.unwrap_or(Value::new(values::MAP, Payload::Map(Arc::new(map))))
                    );
                }
                Op::MkPair { dst, a, b } => {
                    propagate!(dst, a, b);
                    set!(dst, Value::pair(get!(a), get!(b)));
                }
                Op::MkTuple { dst, first, n } => {
                    propagate_range!(dst, first, n);
                    let items = self.collect_range(base, first, n);
                    set!(dst, Value::tuple(items));
                }
                Op::MkStruct { dst, ty, first, n } => {
                    propagate_range!(dst, first, n);
                    let items = self.collect_range(base, first, n);
                    set!(dst, Value::new(ty, Payload::Struct(Arc::new(items))));
                }
                Op::MkFunc { dst, func, first, n } => {
                    propagate_range!(dst, first, n);
                    let captures = self.collect_range(base, first, n);
                    set!(
                        dst,
                        Value::new(
                            values::FUNC,
                            Payload::Func(Arc::new(Closure {
                                func: func as usize,
                                captures,
                            }))
                        )
                    );
                }
                Op::Index { dst, container, index, tok } => {
                    propagate!(dst, container, index);
                    let result = self.index_value(&get!(container), &get!(index), tok);
                    set!(dst, result);
                }
                Op::Slice { dst, container, from, to, tok } => {
                    propagate!(dst, container, from, to);
                    let pair = Value::pair(get!(from), get!(to));
                    let result = self.index_value(&get!(container), &pair, tok);
                    set!(dst, result);
                }
                Op::Field { dst, strct, pos } => {
                    propagate!(dst, strct);
                    let v = get!(strct);
                    if let Payload::Struct(fields) = &v.payload {
                        set!(dst, fields[pos as usize].clone());
                    }
                }
                Op::With { dst, src, first, n, tok } => {
                    propagate!(dst, src);
                    propagate_range!(dst, first, n);
                    let pairs = self.collect_range(base, first, n);
                    let result = self.with_value(&get!(src), &pairs, tok);
                    set!(dst, result);
                }
                Op::Len { dst, src, tok } => {
                    propagate!(dst, src);
                    let v = get!(src);
                    let result = match &v.payload {
                        Payload::Str(s) => Value::int(s.chars().count() as i64),
                        Payload::List(xs) => Value::int(xs.len() as i64),
                        Payload::Tuple(xs) => Value::int(xs.len() as i64),
                        Payload::Set(xs) => Value::int(xs.len() as i64),
                        Payload::Map(m) => Value::int(m.len() as i64),
                        Payload::Struct(fields) => Value::int(fields.len() as i64),
                        _ => {
                            let tname = self.type_name(v.ty);
                            self.err("vm/index/type", tok, &[&tname, "len"])
                        }
                    };
                    set!(dst, result);
                }
                Op::In { dst, needle, haystack, tok } => {
                    propagate!(dst, needle, haystack);
                    let result = self.membership(&get!(needle), &get!(haystack), tok);
                    set!(dst, result);
                }
                Op::Spread { dst, src, tok } => {
                    propagate!(dst, src);
                    let v = get!(src);
                    let result = match &v.payload {
                        Payload::List(xs) => Value::tuple(xs.as_ref().clone()),
                        Payload::Tuple(_) => v.clone(),
                        _ => {
                            let tname = self.type_name(v.ty);
                            self.err("vm/for/range", tok, &[&tname])
                        }
                    };
                    set!(dst, result);
                }
                Op::Pairs { dst, src, tok } => {
                    propagate!(dst, src);
                    let v = get!(src);
                    let result = self.pairs_of(&v, tok);
                    set!(dst, result);
                }
                Op::MapList { dst, src, f, tok } => {
                    propagate!(dst, src, f);
                    let result = self.map_or_filter(get!(src), get!(f), false, tok);
                    set!(dst, result);
                }
                Op::FilterList { dst, src, f, tok } => {
                    propagate!(dst, src, f);
                    let result = self.map_or_filter(get!(src), get!(f), true, tok);
                    set!(dst, result);
                }

                Op::TypeOf { dst, src } => {
                    propagate!(dst, src);
                    let v = get!(src);
                    set!(
                        dst,
                        Value::new(values::TYPE, Payload::Type(AbstractType::single(v.ty)))
                    );
                }
                Op::LitStr { dst, src } => {
                    propagate!(dst, src);
                    let text = self.literal(&get!(src));
                    set!(dst, Value::string(text));
                }
                Op::Cast { dst, src, ty, tok } => {
                    propagate!(dst, src);
                    let result = self.cast_value(&get!(src), ty, tok);
                    set!(dst, result);
                }
                Op::CastV { dst, src, tsrc, tok } => {
                    propagate!(dst, src, tsrc);
                    let target = get!(tsrc);
                    let result = match &target.payload {
                        Payload::Type(t) => match t.only() {
                            Some(ty) => self.cast_value(&get!(src), ty, tok),
                            None => {
                                let tname = self.describe_type(t);
                                let from = self.type_name(get!(src).ty);
                                self.err("vm/cast", tok, &[&from, &tname])
                            }
                        },
                        _ => self.err("vm/cast", tok, &["value", "non-type"]),
                    };
                    set!(dst, result);
                }
                Op::TypeUnion { dst, a, b } => {
                    propagate!(dst, a, b);
                    let (va, vb) = (get!(a), get!(b));
                    let result = match (&va.payload, &vb.payload) {
                        (Payload::Type(x), Payload::Type(y)) => {
                            Value::new(values::TYPE, Payload::Type(x.union(y)))
                        }
                        _ => va.clone(),
                    };
                    set!(dst, result);
                }
                Op::Retag { reg, ty } => {
                    let mut v = get!(reg);
                    if v.ty != values::ERROR {
                        v.ty = ty;
                        set!(reg, v);
                    }
                }
                Op::Validate { dst, src, ty, tok } => {
                    propagate!(dst, src);
                    match self.registry.info(ty).type_check() {
                        None => set!(dst, get!(src)),
                        Some(check) => {
                            // The validator is a generated function: it
                            // returns its input on success or an error.
                            let f = check.call_address;
                            let info = self.functions[f].clone();
                            let arg = get!(src);
                            let result = self.run(info.addr, info.frame_size, vec![arg]);
                            let result = if result.as_bool() == Some(false) {
                                let tname = self.type_name(ty);
                                self.err("vm/types", tok, &[&tname])
                            } else if result.as_bool() == Some(true) {
                                get!(src)
                            } else {
                                result
                            };
                            set!(dst, result);
                        }
                    }
                }

                Op::Jmp { to } => {
                    pc = to as usize;
                    continue;
                }
                Op::Qtru { src, to } => {
                    if get!(src).as_bool() != Some(true) {
                        pc = to as usize;
                        continue;
                    }
                }
                Op::Qtyp { src, ref types, to } => {
                    if !types.contains(get!(src).ty) {
                        pc = to as usize;
                        continue;
                    }
                }

                Op::Call { func, dst, first_arg, n } => {
                    propagate_range!(dst, first_arg, n);
                    let info = self.functions[func as usize].clone();
                    let new_base = self.stack.len();
                    for i in 0..n {
                        let v = self.stack[base + (first_arg + i) as usize].clone();
                        self.stack.push(v);
                    }
                    self.stack
                        .resize(new_base + info.frame_size as usize, Value::undefined());
                    self.frames.push(Frame {
                        ret_addr: pc + 1,
                        dst,
                        caller_base: base,
                    });
                    base = new_base;
                    pc = info.addr;
                    continue;
                }
                Op::Dofn { dst, fsrc, first_arg, n, tok } => {
                    propagate!(dst, fsrc);
                    propagate_range!(dst, first_arg, n);
                    let fval = get!(fsrc);
                    let closure = match &fval.payload {
                        Payload::Func(c) => c.clone(),
                        _ => {
                            set!(dst, self.err("vm/func/apply", tok, &[]));
                            pc += 1;
                            continue;
                        }
                    };
                    let info = self.functions[closure.func].clone();
                    let new_base = self.stack.len();
                    for i in 0..n {
                        let v = self.stack[base + (first_arg + i) as usize].clone();
                        self.stack.push(v);
                    }
                    // Missing parameters and then captures.
                    self.stack
                        .resize(new_base + info.arity as usize, Value::null());
                    self.stack.extend(closure.captures.iter().cloned());
                    self.stack
                        .resize(new_base + info.frame_size as usize, Value::undefined());
                    self.frames.push(Frame {
                        ret_addr: pc + 1,
                        dst,
                        caller_base: base,
                    });
                    base = new_base;
                    pc = info.addr;
                    continue;
                }
                Op::Ret { src } => {
                    let value = get!(src);
                    self.stack.truncate(base);
                    if self.frames.len() == start_depth {
                        self.stack.truncate(initial_base);
                        return value;
                    }
                    let frame = self.frames.pop().expect("frame stack underflow");
                    base = frame.caller_base;
                    self.stack[base + frame.dst as usize] = value;
                    pc = frame.ret_addr;
                    continue;
                }

                Op::MkErr { dst, ref id, tok, ref args } => {
                    let arg_strings: Vec<String> =
                        args.iter().map(|r| self.literal(&get!(*r))).collect();
                    let arg_refs: Vec<&str> = arg_strings.iter().map(|s| s.as_str()).collect();
                    set!(dst, self.err(id, tok, &arg_refs));
                }
                Op::UserErr { dst, msg, tok, ref values } => {
                    propagate!(dst, msg);
                    let message = match get!(msg).as_str() {
                        Some(s) => s.to_string(),
                        None => self.describe(&get!(msg)),
                    };
                    let attached: Vec<Value> = values.iter().map(|r| get!(*r)).collect();
                    set!(
                        dst,
                        Value::error_with_values(
                            Error::new("vm/user", &self.token(tok), &[&message]),
                            attached
                        )
                    );
                }
                Op::Unwrap { dst, src, tok } => {
                    propagate!(dst, src);
                    let v = get!(src);
                    let result = if v.ty == values::NULL {
                        self.err("vm/unwrap/null", tok, &[])
                    } else {
                        v
                    };
                    set!(dst, result);
                }
                Op::Valid { dst, src } => {
                    let v = get!(src);
                    set!(dst, Value::bool(!v.is_error()));
                }

                Op::Track { flavor, tok, ref args, log_to: _, log_time } => {
                    let log_time_on = self
                        .globals
                        .get(log_time as usize)
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    let timestamp =
                        log_time_on.then(|| Local::now().format("%H:%M:%S").to_string());
                    let resolved: Vec<TrackArg> = args
                        .iter()
                        .map(|a| match a {
                            TrackOperand::Str(s) => TrackArg::Str(s.clone()),
                            TrackOperand::Reg(r) => TrackArg::Val(get!(*r)),
                        })
                        .collect();
                    self.tracking.push(TrackingData {
                        flavor,
                        tok,
                        args: resolved,
                        timestamp,
                    });
                }
                Op::Post { src } => {
                    let v = get!(src);
                    let text = self.describe(&v);
                    self.out.write(&text);
                    self.out.write("\n");
                    self.post_happened = true;
                }
                Op::Input { dst, prompt } => {
                    propagate!(dst, prompt);
                    let text = match get!(prompt).as_str() {
                        Some(s) => s.to_string(),
                        None => String::new(),
                    };
                    let line = self.input.read_line(&text);
                    set!(dst, Value::string(line));
                }
            }
            pc += 1;
        }
    }

    fn collect_range(&self, base: usize, first: Reg, n: u32) -> Vec<Value> {
        (0..n)
            .map(|i| self.stack[base + (first + i) as usize].clone())
            .collect()
    }

    fn int_pair(&self, base: usize, a: Reg, b: Reg) -> (i64, i64, ValueType) {
        let va = &self.stack[base + a as usize];
        let vb = &self.stack[base + b as usize];
        (va.as_int().unwrap_or(0), vb.as_int().unwrap_or(0), va.ty)
    }

    fn float_pair(&self, base: usize, a: Reg, b: Reg) -> (f64, f64, ValueType) {
        let va = &self.stack[base + a as usize];
        let vb = &self.stack[base + b as usize];
        (
            va.as_float().unwrap_or(0.0),
            vb.as_float().unwrap_or(0.0),
            va.ty,
        )
    }

    fn numeric_cmp(&self, base: usize, a: Reg, b: Reg) -> i32 {
        let va = &self.stack[base + a as usize];
        let vb = &self.stack[base + b as usize];
        let ordering = match (&va.payload, &vb.payload) {
            (Payload::Int(x), Payload::Int(y)) => x.cmp(y),
            (Payload::Float(x), Payload::Float(y)) => {
                x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal)
            }
            (Payload::Str(x), Payload::Str(y)) => x.cmp(y),
            (Payload::Rune(x), Payload::Rune(y)) => x.cmp(y),
            _ => std::cmp::Ordering::Equal,
        };
        ordering as i32
    }

    fn type_name(&self, ty: ValueType) -> String {
        self.registry.info(ty).literal_name()
    }

    fn index_value(&self, container: &Value, index: &Value, tok: u32) -> Value {
        match (&container.payload, &index.payload) {
            (Payload::List(xs), Payload::Int(i)) => match xs.get(*i as usize) {
                Some(v) if *i >= 0 => v.clone(),
                _ => self.err("vm/index/range", tok, &[&i.to_string()]),
            },
            (Payload::Tuple(xs), Payload::Int(i)) => match xs.get(*i as usize) {
                Some(v) if *i >= 0 => v.clone(),
                _ => self.err("vm/index/range", tok, &[&i.to_string()]),
            },
            (Payload::Str(s), Payload::Int(i)) => match s.chars().nth(*i as usize) {
                Some(c) if *i >= 0 => Value::rune(c),
                _ => self.err("vm/index/range", tok, &[&i.to_string()]),
            },
            (Payload::Pair(kv), Payload::Int(i)) => match i {
                0 => kv.0.clone(),
                1 => kv.1.clone(),
                _ => self.err("vm/index/range", tok, &[&i.to_string()]),
            },
            (Payload::Map(m), _) => match m.get(index) {
                Some(v) => v.clone(),
                None => self.err("vm/index/key", tok, &[&self.literal(index)]),
            },
            (Payload::Struct(fields), Payload::Label(label)) => {
                match self.registry.resolve_field(container.ty, *label) {
                    Some(pos) => fields[pos].clone(),
                    None => self.err("vm/label", tok, &[self.registry.label_name(*label)]),
                }
            }
            // Indexing by a pair is slicing.
            (_, Payload::Pair(kv)) => {
                let (from, to) = match (kv.0.as_int(), kv.1.as_int()) {
                    (Some(f), Some(t)) => (f, t),
                    _ => {
                        let ctype = self.type_name(container.ty);
                        let itype = self.type_name(index.ty);
                        return self.err("vm/index/type", tok, &[&ctype, &itype]);
                    }
                };
                self.slice_value(container, from, to, tok)
            }
            _ => {
                let ctype = self.type_name(container.ty);
                let itype = self.type_name(index.ty);
                self.err("vm/index/type", tok, &[&ctype, &itype])
            }
        }
    }

    fn slice_value(&self, container: &Value, from: i64, to: i64, tok: u32) -> Value {
        let bad = |this: &Vm| {
            this.err("vm/slice/range", tok, &[&from.to_string(), &to.to_string()])
        };
        if from < 0 || to < from {
            return bad(self);
        }
        let (from, to) = (from as usize, to as usize);
        match &container.payload {
            Payload::List(xs) => {
                if to > xs.len() {
                    return bad(self);
                }
                Value::new(
                    container.ty,
                    Payload::List(Arc::new(xs[from..to].to_vec())),
                )
            }
            Payload::Tuple(xs) => {
                if to > xs.len() {
                    return bad(self);
                }
                Value::tuple(xs[from..to].to_vec())
            }
            Payload::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                if to > chars.len() {
                    return bad(self);
                }
                Value::new(
                    container.ty,
                    Payload::Str(chars[from..to].iter().collect()),
                )
            }
            _ => {
                let ctype = self.type_name(container.ty);
                self.err("vm/index/type", tok, &[&ctype, "pair"])
            }
        }
    }

    fn with_value(&self, src: &Value, pairs: &[Value], tok: u32) -> Value {
        match &src.payload {
            Payload::Struct(fields) => {
                let mut out = fields.as_ref().clone();
                for pair in pairs {
                    let kv = match &pair.payload {
                        Payload::Pair(kv) => kv,
                        _ => return self.err("vm/with/field", tok, &[]),
                    };
                    let label = match kv.0.payload {
                        Payload::Label(l) => l,
                        _ => return self.err("vm/with/field", tok, &[]),
                    };
                    match self.registry.resolve_field(src.ty, label) {
                        Some(pos) => out[pos] = kv.1.clone(),
                        None => {
                            return self.err("vm/label", tok, &[self.registry.label_name(label)])
                        }
                    }
                }
                Value::new(src.ty, Payload::Struct(Arc::new(out)))
            }
            Payload::Map(m) => {
                let mut out = m.as_ref().clone();
                for pair in pairs {
                    if let Payload::Pair(kv) = &pair.payload {
                        out.insert(kv.0.clone(), kv.1.clone());
                    }
                }
                Value::new(src.ty, Payload::Map(Arc::new(out)))
            }
            _ => self.err("vm/with/field", tok, &[]),
        }
    }

    fn membership(&self, needle: &Value, haystack: &Value, tok: u32) -> Value {
        match &haystack.payload {
            Payload::List(xs) => Value::bool(xs.iter().any(|v| v == needle)),
            Payload::Tuple(xs) => Value::bool(xs.iter().any(|v| v == needle)),
            Payload::Set(xs) => Value::bool(xs.contains(needle)),
            Payload::Map(m) => Value::bool(m.contains_key(needle)),
            Payload::Str(s) => match &needle.payload {
                Payload::Rune(c) => Value::bool(s.chars().any(|x| x == *c)),
                Payload::Str(sub) => Value::bool(s.contains(sub.as_str())),
                _ => Value::bool(false),
            },
            Payload::Type(abstract_type) => Value::bool(abstract_type.contains(needle.ty)),
            _ => {
                let tname = self.type_name(haystack.ty);
                self.err("vm/index/type", tok, &[&tname, "in"])
            }
        }
    }

    fn pairs_of(&self, v: &Value, tok: u32) -> Value {
        match &v.payload {
            Payload::Map(m) => Value::list(
                m.iter()
                    .map(|(k, val)| Value::pair(k.clone(), val.clone()))
                    .collect(),
            ),
            Payload::Set(s) => Value::list(
                s.iter().map(|e| Value::pair(e.clone(), e.clone())).collect(),
            ),
            Payload::List(xs) => Value::list(
                xs.iter()
                    .enumerate()
                    .map(|(i, e)| Value::pair(Value::int(i as i64), e.clone()))
                    .collect(),
            ),
            Payload::Tuple(xs) => Value::list(
                xs.iter()
                    .enumerate()
                    .map(|(i, e)| Value::pair(Value::int(i as i64), e.clone()))
                    .collect(),
            ),
            Payload::Str(s) => Value::list(
                s.chars()
                    .enumerate()
                    .map(|(i, c)| Value::pair(Value::int(i as i64), Value::rune(c)))
                    .collect(),
            ),
            Payload::Type(abstract_type) => {
                if let Some(ty) = abstract_type.only() {
                    if let TypeInfo::Enum { element_names, .. } = self.registry.info(ty) {
                        return Value::list(
                            (0..element_names.len() as i64)
                                .map(|i| {
                                    Value::pair(Value::int(i), Value::new(ty, Payload::Int(i)))
                                })
                                .collect(),
                        );
                    }
                }
                let tname = self.type_name(v.ty);
                self.err("vm/for/range", tok, &[&tname])
            }
            _ => {
                let tname = self.type_name(v.ty);
                self.err("vm/for/range", tok, &[&tname])
            }
        }
    }

    /// Apply a function value across a list, mapping or filtering.
    fn map_or_filter(&mut self, src: Value, f: Value, filter: bool, tok: u32) -> Value {
        let closure = match &f.payload {
            Payload::Func(c) => c.clone(),
            _ => return self.err("vm/func/apply", tok, &[]),
        };
        let items = match &src.payload {
            Payload::List(xs) => xs.clone(),
            _ => {
                let tname = self.type_name(src.ty);
                return self.err("vm/for/range", tok, &[&tname]);
            }
        };
        let info = self.functions[closure.func].clone();
        let mut out: Vec<Value> = Vec::new();
        for item in items.iter() {
            let mut args = vec![item.clone()];
            args.extend(closure.captures.iter().cloned());
            let result = self.run(info.addr, info.frame_size, args);
            if result.is_error() {
                return result;
            }
            if filter {
                match result.as_bool() {
                    Some(true) => out.push(item.clone()),
                    Some(false) => {}
                    None => return self.err("vm/bool/cond", tok, &[]),
                }
            } else {
                out.push(result);
            }
        }
        Value::new(src.ty, Payload::List(Arc::new(out)))
    }

    fn cast_value(&self, src: &Value, target: ValueType, tok: u32) -> Value {
        let fail = |this: &Vm| {
            let from = this.type_name(src.ty);
            let to = this.type_name(target);
            this.err("vm/cast", tok, &[&from, &to])
        };
        if src.ty == target {
            return src.clone();
        }
        let under_src = self.registry.underlying(src.ty);
        let under_target = self.registry.underlying(target);
        let target_info = self.registry.info(target);

        // Same representation: clone ↔ parent, clone ↔ sibling clone.
        if under_src == under_target && !target_info.is_enum() && !target_info.is_struct() {
            let mut out = src.clone();
            out.ty = target;
            return out;
        }
        // int → enum by element index.
        if let TypeInfo::Enum { element_names, name, .. } = target_info {
            if let Some(i) = src.as_int() {
                if i >= 0 && (i as usize) < element_names.len() {
                    return Value::new(target, Payload::Int(i));
                }
                return self.err("vm/enum/range", tok, &[&i.to_string(), name]);
            }
            return fail(self);
        }
        // enum → int.
        if self.registry.info(src.ty).is_enum() && under_target == values::INT {
            if let Payload::Int(i) = src.payload {
                return Value::new(target, Payload::Int(i));
            }
        }
        // list → struct, field count permitting.
        if let TypeInfo::Struct { label_numbers, .. } = target_info {
            if let Payload::List(xs) = &src.payload {
                if xs.len() == label_numbers.len() {
                    return Value::new(target, Payload::Struct(Arc::new(xs.as_ref().clone())));
                }
            }
            return fail(self);
        }
        match (under_src, under_target) {
            (values::INT, values::FLOAT) => {
                Value::new(target, Payload::Float(src.as_int().unwrap_or(0) as f64))
            }
            (values::FLOAT, values::INT) => {
                Value::new(target, Payload::Int(src.as_float().unwrap_or(0.0) as i64))
            }
            (values::INT, values::RUNE) => {
                let i = src.as_int().unwrap_or(0);
                match u32::try_from(i).ok().and_then(char::from_u32) {
                    Some(c) => Value::new(target, Payload::Rune(c)),
                    None => fail(self),
                }
            }
            (values::RUNE, values::INT) => match src.payload {
                Payload::Rune(c) => Value::new(target, Payload::Int(c as i64)),
                _ => fail(self),
            },
            (values::RUNE, values::STRING) => match src.payload {
                Payload::Rune(c) => Value::new(target, Payload::Str(c.to_string())),
                _ => fail(self),
            },
            (values::INT, values::STRING) => {
                Value::new(target, Payload::Str(src.as_int().unwrap_or(0).to_string()))
            }
            (values::FLOAT, values::STRING) => Value::new(
                target,
                Payload::Str(format!("{}", src.as_float().unwrap_or(0.0))),
            ),
            (values::BOOL, values::STRING) => match src.payload {
                Payload::Bool(b) => Value::new(target, Payload::Str(b.to_string())),
                _ => fail(self),
            },
            (values::STRING, values::INT) => match src.as_str().map(str::trim) {
                Some(s) => match s.parse::<i64>() {
                    Ok(i) => Value::new(target, Payload::Int(i)),
                    Err(_) => match s.parse::<f64>() {
                        Ok(f) => Value::new(target, Payload::Int(f as i64)),
                        Err(_) => fail(self),
                    },
                },
                None => fail(self),
            },
            (values::STRING, values::FLOAT) => match src.as_str().and_then(|s| s.trim().parse().ok())
            {
                Some(f) => Value::new(target, Payload::Float(f)),
                None => fail(self),
            },
            _ => fail(self),
        }
    }

    /// Round-trippable printing: strings and runes are quoted.
    pub fn literal(&self, v: &Value) -> String {
        self.print(v, true)
    }

    /// User-facing printing: strings and runes bare at the top level.
    pub fn describe(&self, v: &Value) -> String {
        self.print(v, false)
    }

    /// Render an abstract type, members joined by `/`.
    pub fn describe_type(&self, t: &AbstractType) -> String {
        let names: Vec<String> = t.iter().map(|ty| self.type_name(ty)).collect();
        if names.is_empty() {
            "empty".to_string()
        } else {
            names.join("/")
        }
    }

    fn print(&self, v: &Value, quoting: bool) -> String {
        match &v.payload {
            Payload::None => match v.ty {
                values::OK => "OK".to_string(),
                values::NULL => "NULL".to_string(),
                values::UNSATISFIED_CONDITIONAL => "(unsatisfied conditional)".to_string(),
                _ => "(undefined value)".to_string(),
            },
            Payload::Bling(word) => word.clone(),
            Payload::Int(i) => {
                // An int payload with a non-int type is an enum element or a
                // clone of int.
                match self.registry.info(v.ty) {
                    TypeInfo::Enum { element_names, path, .. } => {
                        let name = element_names
                            .get(*i as usize)
                            .cloned()
                            .unwrap_or_else(|| i.to_string());
                        format!("{}{}", path, name)
                    }
                    TypeInfo::Clone { .. } => {
                        format!("{}({})", self.type_name(v.ty), i)
                    }
                    _ => i.to_string(),
                }
            }
            Payload::Bool(b) => b.to_string(),
            Payload::Float(f) => match self.registry.info(v.ty) {
                TypeInfo::Clone { .. } => format!("{}({})", self.type_name(v.ty), f),
                _ => format!("{}", f),
            },
            Payload::Str(s) => {
                let base = if quoting {
                    format!("{:?}", s)
                } else {
                    s.clone()
                };
                match self.registry.info(v.ty) {
                    TypeInfo::Clone { .. } => {
                        format!("{}({:?})", self.type_name(v.ty), s)
                    }
                    _ => base,
                }
            }
            Payload::Rune(c) => {
                if quoting {
                    format!("'{}'", c)
                } else {
                    c.to_string()
                }
            }
            Payload::Type(t) => self.describe_type(t),
            Payload::Func(_) => "func".to_string(),
            Payload::Pair(kv) => {
                let inner = format!("{}::{}", self.literal(&kv.0), self.literal(&kv.1));
                match self.registry.info(v.ty) {
                    TypeInfo::Clone { .. } => format!("{}({})", self.type_name(v.ty), inner),
                    _ => inner,
                }
            }
            Payload::List(xs) => {
                let inner = xs
                    .iter()
                    .map(|x| self.literal(x))
                    .collect::<Vec<_>>()
                    .join(", ");
                match self.registry.info(v.ty) {
                    TypeInfo::Clone { .. } => {
                        format!("{}([{}])", self.type_name(v.ty), inner)
                    }
                    _ => format!("[{}]", inner),
                }
            }
            Payload::Map(m) => {
                let inner = m
                    .iter()
                    .map(|(k, val)| format!("{}::{}", self.literal(k), self.literal(val)))
                    .collect::<Vec<_>>()
                    .join(", ");
                match self.registry.info(v.ty) {
                    TypeInfo::Clone { .. } => format!("{}(map({}))", self.type_name(v.ty), inner),
                    _ => format!("map({})", inner),
                }
            }
            Payload::Set(s) => {
                let inner = s
                    .iter()
                    .map(|x| self.literal(x))
                    .collect::<Vec<_>>()
                    .join(", ");
                match self.registry.info(v.ty) {
                    TypeInfo::Clone { .. } => format!("{}(set({}))", self.type_name(v.ty), inner),
                    _ => format!("set({})", inner),
                }
            }
            Payload::Struct(fields) => {
                let info = self.registry.info(v.ty);
                let labels = match info {
                    TypeInfo::Struct { label_numbers, .. } => label_numbers.clone(),
                    _ => Vec::new(),
                };
                let inner = labels
                    .iter()
                    .zip(fields.iter())
                    .map(|(l, f)| {
                        format!("{}::{}", self.registry.label_name(*l), self.literal(f))
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} with ({})", info.literal_name(), inner)
            }
            Payload::Tuple(xs) => {
                if xs.len() == 1 {
                    format!("tuple({})", self.literal(&xs[0]))
                } else {
                    let inner = xs
                        .iter()
                        .map(|x| self.literal(x))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("({})", inner)
                }
            }
            Payload::Label(l) => self.registry.label_name(*l).to_string(),
            Payload::Err(e) => format!("[{}] {}", e.error.id, e.error.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(vm: &mut Vm) -> u32 {
        vm.add_token(Token::new(TokenType::Ident, "test", 1, 0, 4, "test"))
    }

    // Hand-assembled programs: the compiler is exercised elsewhere, these
    // pin down the interpreter's own contract.

    #[test]
    fn test_arithmetic_and_return() {
        let mut vm = Vm::new();
        let five = vm.add_const(Value::int(5));
        let two = vm.add_const(Value::int(2));
        vm.code = vec![
            Op::LoadC { dst: 0, c: five },
            Op::LoadC { dst: 1, c: two },
            Op::Addi { dst: 2, a: 0, b: 1 },
            Op::Ret { src: 2 },
        ];
        assert_eq!(vm.run(0, 3, vec![]), Value::int(7));
    }

    #[test]
    fn test_int_division_produces_float() {
        let mut vm = Vm::new();
        let t = tok(&mut vm);
        let five = vm.add_const(Value::int(5));
        let two = vm.add_const(Value::int(2));
        vm.code = vec![
            Op::LoadC { dst: 0, c: five },
            Op::LoadC { dst: 1, c: two },
            Op::Divi { dst: 2, a: 0, b: 1, tok: t },
            Op::Ret { src: 2 },
        ];
        assert_eq!(vm.run(0, 3, vec![]), Value::float(2.5));
    }

    #[test]
    fn test_division_by_zero_is_an_error_value() {
        let mut vm = Vm::new();
        let t = tok(&mut vm);
        let five = vm.add_const(Value::int(5));
        let zero = vm.add_const(Value::int(0));
        vm.code = vec![
            Op::LoadC { dst: 0, c: five },
            Op::LoadC { dst: 1, c: zero },
            Op::Divi { dst: 2, a: 0, b: 1, tok: t },
            Op::Ret { src: 2 },
        ];
        let result = vm.run(0, 3, vec![]);
        assert_eq!(result.as_error().unwrap().error.id, "vm/div/zero");
    }

    #[test]
    fn test_errors_propagate_first_wins() {
        let mut vm = Vm::new();
        let t = tok(&mut vm);
        let five = vm.add_const(Value::int(5));
        let zero = vm.add_const(Value::int(0));
        vm.code = vec![
            Op::LoadC { dst: 0, c: five },
            Op::LoadC { dst: 1, c: zero },
            Op::Divi { dst: 2, a: 0, b: 1, tok: t }, // error
            Op::Addi { dst: 3, a: 2, b: 0 },         // must propagate it
            Op::Ret { src: 3 },
        ];
        let result = vm.run(0, 4, vec![]);
        assert_eq!(result.as_error().unwrap().error.id, "vm/div/zero");
    }

    #[test]
    fn test_rune_concatenation_makes_string() {
        let mut vm = Vm::new();
        let h = vm.add_const(Value::rune('h'));
        let i = vm.add_const(Value::rune('i'));
        vm.code = vec![
            Op::LoadC { dst: 0, c: h },
            Op::LoadC { dst: 1, c: i },
            Op::Cat { dst: 2, a: 0, b: 1 },
            Op::Ret { src: 2 },
        ];
        assert_eq!(vm.run(0, 3, vec![]), Value::string("hi"));
    }

    #[test]
    fn test_call_and_return() {
        // f(x) = x + x; main: f(21)
        let mut vm = Vm::new();
        let c = vm.add_const(Value::int(21));
        vm.functions.push(FuncInfo {
            name: "double".to_string(),
            addr: 3,
            arity: 1,
            captures: 0,
            frame_size: 2,
        });
        vm.code = vec![
            Op::LoadC { dst: 0, c },
            Op::Call { func: 0, dst: 1, first_arg: 0, n: 1 },
            Op::Ret { src: 1 },
            // double:
            Op::Addi { dst: 1, a: 0, b: 0 },
            Op::Ret { src: 1 },
        ];
        assert_eq!(vm.run(0, 2, vec![]), Value::int(42));
    }

    #[test]
    fn test_indexing_a_string_yields_a_rune() {
        let mut vm = Vm::new();
        let t = tok(&mut vm);
        let s = vm.add_const(Value::string("foo"));
        let i = vm.add_const(Value::int(1));
        vm.code = vec![
            Op::LoadC { dst: 0, c: s },
            Op::LoadC { dst: 1, c: i },
            Op::Index { dst: 2, container: 0, index: 1, tok: t },
            Op::Ret { src: 2 },
        ];
        assert_eq!(vm.run(0, 3, vec![]), Value::rune('o'));
    }

    #[test]
    fn test_index_out_of_range() {
        let mut vm = Vm::new();
        let t = tok(&mut vm);
        let s = vm.add_const(Value::list(vec![Value::int(1)]));
        let i = vm.add_const(Value::int(5));
        vm.code = vec![
            Op::LoadC { dst: 0, c: s },
            Op::LoadC { dst: 1, c: i },
            Op::Index { dst: 2, container: 0, index: 1, tok: t },
            Op::Ret { src: 2 },
        ];
        let result = vm.run(0, 3, vec![]);
        assert_eq!(result.as_error().unwrap().error.id, "vm/index/range");
    }

    #[test]
    fn test_membership_in_type() {
        let mut vm = Vm::new();
        let t = tok(&mut vm);
        let five = vm.add_const(Value::int(5));
        let int_type = vm.add_const(Value::new(
            values::TYPE,
            Payload::Type(AbstractType::single(values::INT)),
        ));
        vm.code = vec![
            Op::LoadC { dst: 0, c: five },
            Op::LoadC { dst: 1, c: int_type },
            Op::In { dst: 2, needle: 0, haystack: 1, tok: t },
            Op::Ret { src: 2 },
        ];
        assert_eq!(vm.run(0, 3, vec![]), Value::bool(true));
    }

    #[test]
    fn test_input_reads_through_handler() {
        let mut vm = Vm::new();
        vm.input = Box::new(ScriptedHandler::new(&["first line", "second line"]));
        let prompt = vm.add_const(Value::string("? "));
        vm.code = vec![
            Op::LoadC { dst: 0, c: prompt },
            Op::Input { dst: 1, prompt: 0 },
            Op::Ret { src: 1 },
        ];
        assert_eq!(vm.run(0, 2, vec![]), Value::string("first line"));
    }

    #[test]
    fn test_scripted_input_runs_dry_to_empty() {
        let mut handler = ScriptedHandler::new(&["only"]);
        assert_eq!(handler.read_line("? "), "only");
        assert_eq!(handler.read_line("? "), "");
    }

    #[test]
    fn test_post_goes_through_handler_and_sets_flag() {
        let mut vm = Vm::new();
        vm.out = Box::new(CapturingHandler::new());
        let s = vm.add_const(Value::string("Oops"));
        vm.code = vec![
            Op::LoadC { dst: 0, c: s },
            Op::Post { src: 0 },
            Op::Ret { src: 0 },
        ];
        vm.run(0, 1, vec![]);
        assert!(vm.post_happened);
    }

    #[test]
    fn test_literal_printing() {
        let vm = Vm::new();
        assert_eq!(vm.literal(&Value::int(5)), "5");
        assert_eq!(vm.literal(&Value::float(2.5)), "2.5");
        assert_eq!(vm.literal(&Value::float(10.0)), "10");
        assert_eq!(vm.literal(&Value::string("foo")), "\"foo\"");
        assert_eq!(vm.describe(&Value::string("foo")), "foo");
        assert_eq!(vm.literal(&Value::rune('q')), "'q'");
        assert_eq!(
            vm.literal(&Value::list(vec![Value::int(1), Value::int(2)])),
            "[1, 2]"
        );
        assert_eq!(
            vm.literal(&Value::tuple(vec![Value::int(1)])),
            "tuple(1)"
        );
        assert_eq!(
            vm.literal(&Value::tuple(vec![Value::int(1), Value::int(2)])),
            "(1, 2)"
        );
        assert_eq!(
            vm.literal(&Value::pair(Value::string("foo"), Value::int(2))),
            "\"foo\"::2"
        );
    }

    #[test]
    fn test_cast_int_to_rune() {
        let mut vm = Vm::new();
        let t = tok(&mut vm);
        let c = vm.add_const(Value::int(65));
        vm.code = vec![
            Op::LoadC { dst: 0, c },
            Op::Cast { dst: 1, src: 0, ty: values::RUNE, tok: t },
            Op::Ret { src: 1 },
        ];
        assert_eq!(vm.run(0, 2, vec![]), Value::rune('A'));
    }
}

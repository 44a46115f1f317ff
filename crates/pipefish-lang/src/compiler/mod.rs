//! The compiler: AST → register bytecode.
//!
//! Each function frame has a fixed layout decided here: parameters first,
//! then captures, then every intermediate value gets its own slot. Function
//! call dispatch compiles to a chain of type tests descending the overload
//! table, most specific signature first; a tie between two signatures is an
//! initialization error.
//!
//! # Design
//!
//! - `Compiler` — the per-service state: the overload table, the globals
//!   map, parameterized-type definitions, accumulated errors
//! - `Ctx` — the per-compilation state: scopes, the register allocator,
//!   the loop stack, the namespace being compiled
//! - `expr` — expression codegen proper

pub mod call;
pub mod expr;
pub mod flow;

use crate::ast::{Node, TypeArgValue, TypeNode, TypeParameter};
use indexmap::IndexMap;
use pipefish_foundation::error::Error;
use pipefish_foundation::token::Token;
use pipefish_vm::values::{self, AbstractType, Value, ValueType};
use pipefish_vm::{Op, Reg, TypeCheck, TypeInfo, Vm};

/// A declared global: its slot, its declared type, and mutability.
#[derive(Debug, Clone)]
pub struct GlobalInfo {
    pub slot: u32,
    pub types: AbstractType,
    pub constant: bool,
}

/// One parameter of an overload.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub types: AbstractType,
    /// Set when this parameter is a literal bling word.
    pub bling: Option<String>,
    pub variadic: bool,
}

/// What a function's body is.
#[derive(Debug, Clone)]
pub enum FnBody {
    /// A compiler-known operation, by tag.
    Builtin(String),
    Code {
        body: Node,
        given: Option<Node>,
    },
}

/// One overload of a function.
#[derive(Debug, Clone)]
pub struct FnDef {
    pub name: String,
    pub sig: Vec<Param>,
    pub rets: AbstractType,
    pub body: FnBody,
    pub token: Token,
    pub cmd: bool,
    pub private: bool,
    /// Slot in the VM's function table, reserved at installation.
    pub func_ix: usize,
}

impl FnDef {
    /// The value parameters, in order.
    pub fn value_params(&self) -> Vec<&Param> {
        self.sig.iter().filter(|p| p.bling.is_none()).collect()
    }
}

/// The body of a parameterized type definition.
#[derive(Debug, Clone)]
pub enum ParamTypeBody {
    /// A builtin container: `list{T}`, `set{T}`, `map{K,V}`, `pair{K,V}`.
    Container(ValueType),
    CloneOf {
        parent: TypeNode,
        condition: Option<Node>,
        requests: Vec<String>,
    },
    StructOf {
        fields: Vec<(String, TypeNode)>,
        condition: Option<Node>,
    },
}

/// A parameterized type definition, instantiated on mention.
#[derive(Debug, Clone)]
pub struct ParamTypeDef {
    pub params: Vec<TypeParameter>,
    pub body: ParamTypeBody,
    pub token: Token,
}

/// Scope entry for a frame-local value.
#[derive(Debug, Clone)]
struct LocalInfo {
    reg: Reg,
    types: AbstractType,
}

struct LoopCtx {
    result: Reg,
    break_patches: Vec<usize>,
    continue_patches: Vec<usize>,
}

/// Per-compilation state: one `Ctx` per function body or REPL line.
pub struct Ctx {
    scopes: Vec<IndexMap<String, LocalInfo>>,
    next_reg: u32,
    /// The namespace path of the code being compiled, e.g. `"zort."`.
    pub namespace: String,
    /// Commands may assign to globals and post output.
    pub cmd: bool,
    /// The REPL may create globals by assignment.
    pub allow_new_globals: bool,
    loops: Vec<LoopCtx>,
    /// The name of the function being compiled, for tracking records.
    pub fn_name: Option<String>,
}

impl Ctx {
    pub fn new(namespace: &str) -> Self {
        Ctx {
            scopes: vec![IndexMap::new()],
            next_reg: 0,
            namespace: namespace.to_string(),
            cmd: false,
            allow_new_globals: false,
            loops: Vec::new(),
            fn_name: None,
        }
    }

    /// Allocate a fresh register.
    fn rx(&mut self) -> Reg {
        let r = self.next_reg;
        self.next_reg += 1;
        r
    }

    /// Allocate `n` consecutive registers.
    fn block(&mut self, n: u32) -> Reg {
        let first = self.next_reg;
        self.next_reg += n;
        first
    }

    pub fn frame_size(&self) -> u32 {
        self.next_reg.max(1)
    }

    fn push_scope(&mut self) {
        self.scopes.push(IndexMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, name: &str, reg: Reg, types: AbstractType) {
        self.scopes
            .last_mut()
            .expect("no scope")
            .insert(name.to_string(), LocalInfo { reg, types });
    }

    fn lookup(&self, name: &str) -> Option<LocalInfo> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
    }

    /// Every visible local, innermost shadowing outermost. Used to decide
    /// lambda captures.
    fn visible(&self) -> IndexMap<String, LocalInfo> {
        let mut out = IndexMap::new();
        for scope in &self.scopes {
            for (k, v) in scope {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }
}

/// The per-service compiler state.
pub struct Compiler {
    pub functions: IndexMap<String, Vec<FnDef>>,
    pub globals: IndexMap<String, GlobalInfo>,
    pub param_types: IndexMap<String, ParamTypeDef>,
    /// `newtype` aliases: `Strings = list{string}`.
    pub type_aliases: IndexMap<String, ValueType>,
    /// Globals slots holding `$_logTo` / `$_logTime`, threaded into every
    /// tracking instruction.
    pub log_to_slot: u32,
    pub log_time_slot: u32,
    pub tracking_on: bool,
    pub errors: Vec<Error>,
}

impl Compiler {
    pub fn new(vm: &mut Vm) -> Self {
        let log_to_slot = push_global(vm, Value::string(""));
        let log_time_slot = push_global(vm, Value::bool(false));
        let mut cp = Compiler {
            functions: IndexMap::new(),
            globals: IndexMap::new(),
            param_types: IndexMap::new(),
            type_aliases: IndexMap::new(),
            log_to_slot,
            log_time_slot,
            tracking_on: false,
            errors: Vec::new(),
        };
        cp.globals.insert(
            "$_logTo".to_string(),
            GlobalInfo {
                slot: log_to_slot,
                types: AbstractType::single(values::STRING),
                constant: false,
            },
        );
        cp.globals.insert(
            "$_logTime".to_string(),
            GlobalInfo {
                slot: log_time_slot,
                types: AbstractType::single(values::BOOL),
                constant: false,
            },
        );
        cp
    }

    pub fn err(&mut self, id: &str, tok: &Token, args: &[&str]) {
        self.errors.push(Error::new(id, tok, args));
    }

    pub fn errors_exist(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Everything a value can be: all concrete types bar the internal ones,
    /// null, and error.
    pub fn any_type(&self, vm: &Vm) -> AbstractType {
        let excluded = [
            values::UNDEFINED,
            values::BLING,
            values::UNSATISFIED_CONDITIONAL,
            values::NULL,
            values::ERROR,
        ];
        let members: Vec<ValueType> = (0..vm.registry.len() as u16)
            .map(ValueType)
            .filter(|t| !excluded.contains(t))
            .collect();
        AbstractType::of(&members)
    }

    /// Map each member to its underlying representation type.
    fn widen(&self, vm: &Vm, t: &AbstractType) -> AbstractType {
        let members: Vec<ValueType> = t.iter().map(|ty| vm.registry.underlying(ty)).collect();
        AbstractType::of(&members)
    }

    /// Extend a parameter type with every clone of its members, for the
    /// runtime type tests of builtin arithmetic.
    fn including_clones(&self, vm: &Vm, t: &AbstractType) -> AbstractType {
        let mut out = t.clone();
        for ty in t.iter() {
            if let TypeInfo::Builtin { cloned_by, .. } = vm.registry.info(ty) {
                for c in cloned_by.iter() {
                    out.insert(c);
                }
            }
        }
        out
    }

    /// Resolve a type expression against the registry, materializing
    /// parameterized instances on first mention.
    pub fn resolve_type(&mut self, vm: &mut Vm, tn: &TypeNode) -> AbstractType {
        match tn {
            TypeNode::Name { name, token } => match name.as_str() {
                "any" => self.any_type(vm),
                "any?" => {
                    let mut t = self.any_type(vm);
                    t.insert(values::NULL);
                    t
                }
                "null" => AbstractType::single(values::NULL),
                "ok" => AbstractType::single(values::OK),
                "bling" => AbstractType::single(values::BLING),
                "error" => AbstractType::single(values::ERROR),
                "enum" => {
                    let members: Vec<ValueType> = (0..vm.registry.len() as u16)
                        .map(ValueType)
                        .filter(|t| vm.registry.info(*t).is_enum())
                        .collect();
                    AbstractType::of(&members)
                }
                "struct" => {
                    let members: Vec<ValueType> = (0..vm.registry.len() as u16)
                        .map(ValueType)
                        .filter(|t| vm.registry.info(*t).is_struct())
                        .collect();
                    AbstractType::of(&members)
                }
                _ => {
                    if let Some(&alias) = self.type_aliases.get(name) {
                        return AbstractType::single(alias);
                    }
                    match vm.registry.by_name(name) {
                        Some(ty) => AbstractType::single(ty),
                        None => {
                            self.err("parse/type/exists", token, &[name]);
                            AbstractType::new()
                        }
                    }
                }
            },
            TypeNode::WithArguments { .. } => match self.materialize(vm, tn) {
                Some(ty) => AbstractType::single(ty),
                None => AbstractType::new(),
            },
            TypeNode::WithParameters { token, operator, .. } => {
                // A bare definition form in a signature stands for every
                // instance; approximated by the parent container type.
                match self.param_types.get(operator).map(|d| d.body.clone()) {
                    Some(ParamTypeBody::Container(base)) => {
                        self.including_clones(vm, &AbstractType::single(base))
                    }
                    _ => {
                        self.err("parse/type/exists", token, &[operator]);
                        AbstractType::new()
                    }
                }
            }
            TypeNode::Infix {
                operator,
                left,
                right,
                ..
            } => {
                let l = self.resolve_type(vm, left);
                let r = self.resolve_type(vm, right);
                if operator == "/" {
                    l.union(&r)
                } else {
                    l.intersect(&r)
                }
            }
            TypeNode::Suffix { operator, left, .. } => {
                let mut t = self.resolve_type(vm, left);
                if operator == "?" {
                    t.insert(values::NULL);
                } else {
                    t.insert(values::ERROR);
                }
                t
            }
            TypeNode::DotDotDot { right, .. } => match right {
                Some(inner) => self.resolve_type(vm, inner),
                None => self.any_type(vm),
            },
        }
    }

    /// Materialize a parameterized instance, memoized by its literal form.
    pub fn materialize(&mut self, vm: &mut Vm, tn: &TypeNode) -> Option<ValueType> {
        let (token, operator, arguments) = match tn {
            TypeNode::WithArguments {
                token,
                operator,
                arguments,
            } => (token, operator, arguments),
            _ => return None,
        };
        let literal = tn.to_string();
        if let Some(existing) = vm.registry.instance(&literal) {
            return Some(existing);
        }
        let def = match self.param_types.get(operator) {
            Some(d) => d.clone(),
            None => {
                self.err("parse/type/exists", token, &[operator]);
                return None;
            }
        };
        match &def.body {
            ParamTypeBody::Container(base) => {
                let base = *base;
                let type_arguments = self.argument_values(vm, arguments);
                let is_list = base == values::LIST;
                let ty = vm.registry.instantiate(&literal, |r| {
                    r.register_clone(
                        &literal, "", base, false, is_list, is_list, is_list,
                        type_arguments,
                    )
                });
                Some(ty)
            }
            ParamTypeBody::CloneOf {
                parent,
                condition,
                requests,
            } => {
                let substitution = bind_parameters(&def.params, arguments);
                let parent_resolved = substitute(parent, &substitution);
                let parent_ty = self
                    .resolve_type(vm, &parent_resolved)
                    .only()
                    .unwrap_or(values::INT);
                let parent_ty = vm.registry.underlying(parent_ty);
                let type_arguments = self.argument_values(vm, arguments);
                let sliceable = requests.iter().any(|r| r == "slicing");
                let mappable = requests.iter().any(|r| r == "mapping");
                let filterable = requests.iter().any(|r| r == "filtering");
                let ty = vm.registry.instantiate(&literal, |r| {
                    r.register_clone(
                        &literal, "", parent_ty, false, sliceable, filterable, mappable,
                        type_arguments,
                    )
                });
                if let Some(cond) = condition.clone() {
                    self.compile_validator(vm, ty, &cond, &substitution, token);
                }
                Some(ty)
            }
            ParamTypeBody::StructOf { fields, condition } => {
                let substitution = bind_parameters(&def.params, arguments);
                let mut labels = Vec::new();
                let mut field_types = Vec::new();
                for (label, field_type) in fields {
                    labels.push(vm.registry.intern_label(label));
                    let resolved = substitute(field_type, &substitution);
                    field_types.push(self.resolve_type(vm, &resolved));
                }
                let type_arguments = self.argument_values(vm, arguments);
                let ty = vm.registry.instantiate(&literal, |r| {
                    r.register_struct(&literal, "", labels, field_types, false, false, type_arguments)
                });
                if let Some(cond) = condition.clone() {
                    self.compile_validator(vm, ty, &cond, &substitution, token);
                }
                Some(ty)
            }
        }
    }

    /// Turn declaration-level type arguments into runtime values for the
    /// registry's records.
    fn argument_values(
        &mut self,
        vm: &mut Vm,
        arguments: &[crate::ast::TypeArgument],
    ) -> Vec<Value> {
        arguments
            .iter()
            .map(|a| match &a.value {
                TypeArgValue::Int(i) => Value::int(*i),
                TypeArgValue::Float(f) => Value::float(*f),
                TypeArgValue::Str(s) => Value::string(s.clone()),
                TypeArgValue::Rune(c) => Value::rune(*c),
                TypeArgValue::Bool(b) => Value::bool(*b),
                TypeArgValue::Type(t) => {
                    let resolved = self.resolve_type(vm, t);
                    Value::new(values::TYPE, pipefish_vm::Payload::Type(resolved))
                }
                TypeArgValue::EnumElement(name) => self
                    .enum_element_value(vm, name)
                    .unwrap_or_else(Value::null),
            })
            .collect()
    }

    /// Find an enum element by name across the registry.
    pub fn enum_element_value(&self, vm: &Vm, name: &str) -> Option<Value> {
        for ix in 0..vm.registry.len() as u16 {
            let ty = ValueType(ix);
            if let TypeInfo::Enum { element_names, .. } = vm.registry.info(ty) {
                if let Some(pos) = element_names.iter().position(|e| e == name) {
                    return Some(Value::new(ty, pipefish_vm::Payload::Int(pos as i64)));
                }
            }
        }
        None
    }

    /// Compile a runtime type-check for a clone or struct: a generated
    /// function of one argument (`that`) returning a boolean or an error.
    pub fn compile_validator(
        &mut self,
        vm: &mut Vm,
        ty: ValueType,
        condition: &Node,
        substitution: &IndexMap<String, TypeArgValue>,
        token: &Token,
    ) {
        let jump_over = here(vm);
        emit(vm, Op::Jmp { to: 0 });
        let entry = here(vm);
        let mut ctx = Ctx::new("");
        let that = ctx.rx();
        let mut that_type = AbstractType::single(ty);
        // Inside the check, `that` has the underlying representation.
        that_type.insert(vm.registry.underlying(ty));
        ctx.bind("that", that, that_type);
        // Bind the type parameters as constants.
        for (name, value) in substitution {
            let v = match value {
                TypeArgValue::Int(i) => Some(Value::int(*i)),
                TypeArgValue::Float(f) => Some(Value::float(*f)),
                TypeArgValue::Str(s) => Some(Value::string(s.clone())),
                TypeArgValue::Rune(c) => Some(Value::rune(*c)),
                TypeArgValue::Bool(b) => Some(Value::bool(*b)),
                TypeArgValue::Type(t) => {
                    let resolved = self.resolve_type(vm, t);
                    Some(Value::new(values::TYPE, pipefish_vm::Payload::Type(resolved)))
                }
                TypeArgValue::EnumElement(e) => self.enum_element_value(vm, e),
            };
            if let Some(v) = v {
                let c = vm.add_const(v.clone());
                let r = ctx.rx();
                emit(vm, Op::LoadC { dst: r, c });
                ctx.bind(name, r, AbstractType::single(v.ty));
            }
        }
        let (result, _) = self.compile_expression(vm, &mut ctx, condition);
        emit(vm, Op::Ret { src: result });
        patch_jump(vm, jump_over, here(vm));
        let func_ix = vm.functions.len();
        vm.functions.push(pipefish_vm::FuncInfo {
            name: format!("validate {}", vm.registry.info(ty).name()),
            addr: entry,
            arity: 1,
            captures: 0,
            frame_size: ctx.frame_size(),
        });
        let tok_ix = vm.add_token(token.clone());
        vm.registry.set_type_check(
            ty,
            TypeCheck {
                call_address: func_ix,
                in_loc: that,
                result_loc: result,
                tok_loc: tok_ix,
            },
        );
    }

    /// Install one overload, reserving its slot in the function table.
    /// Two overloads of one name with identical signatures are an error.
    pub fn install(
        &mut self,
        vm: &mut Vm,
        name: &str,
        sig: Vec<Param>,
        rets: AbstractType,
        body: FnBody,
        cmd: bool,
        private: bool,
        token: &Token,
    ) -> usize {
        let existing = self.functions.entry(name.to_string()).or_default();
        for other in existing.iter() {
            if other.sig.len() == sig.len()
                && other
                    .sig
                    .iter()
                    .zip(sig.iter())
                    .all(|(a, b)| a.types == b.types && a.bling == b.bling)
            {
                self.errors.push(Error::new("init/overload", token, &[name]));
            }
        }
        let func_ix = vm.functions.len();
        vm.functions.push(pipefish_vm::FuncInfo {
            name: name.to_string(),
            addr: 0,
            arity: sig.iter().filter(|p| p.bling.is_none()).count() as u32,
            captures: 0,
            frame_size: 0,
        });
        existing.push(FnDef {
            name: name.to_string(),
            sig,
            rets,
            body,
            token: token.clone(),
            cmd,
            private,
            func_ix,
        });
        func_ix
    }

    /// Compile the body of an installed overload into the VM.
    pub fn compile_function(&mut self, vm: &mut Vm, def: &FnDef, namespace: &str) {
        let (body, given) = match &def.body {
            FnBody::Code { body, given } => (body.clone(), given.clone()),
            FnBody::Builtin(_) => return,
        };
        let jump_over = here(vm);
        emit(vm, Op::Jmp { to: 0 });
        let entry = here(vm);
        let mut ctx = Ctx::new(namespace);
        ctx.cmd = def.cmd;
        ctx.fn_name = Some(def.name.clone());
        for param in def.value_params() {
            let reg = ctx.rx();
            ctx.bind(&param.name, reg, param.types.clone());
        }
        if self.tracking_on {
            let tok = vm.add_token(def.token.clone());
            let mut args = vec![pipefish_vm::opcode::TrackOperand::Str(def.name.clone())];
            for param in def.value_params() {
                if let Some(local) = ctx.lookup(&param.name) {
                    args.push(pipefish_vm::opcode::TrackOperand::Str(param.name.clone()));
                    args.push(pipefish_vm::opcode::TrackOperand::Reg(local.reg));
                }
            }
            emit(
                vm,
                Op::Track {
                    flavor: pipefish_vm::TrackingFlavor::FnCall,
                    tok,
                    args,
                    log_to: self.log_to_slot,
                    log_time: self.log_time_slot,
                },
            );
        }
        if let Some(given_block) = &given {
            ctx.push_scope();
            self.compile_given(vm, &mut ctx, given_block);
        }
        let (result, _) = self.compile_expression(vm, &mut ctx, &body);
        if self.tracking_on {
            let tok = vm.add_token(body.token().clone());
            emit(
                vm,
                Op::Track {
                    flavor: pipefish_vm::TrackingFlavor::Return,
                    tok,
                    args: vec![
                        pipefish_vm::opcode::TrackOperand::Str(def.name.clone()),
                        pipefish_vm::opcode::TrackOperand::Reg(result),
                    ],
                    log_to: self.log_to_slot,
                    log_time: self.log_time_slot,
                },
            );
        }
        emit(vm, Op::Ret { src: result });
        if given.is_some() {
            ctx.pop_scope();
        }
        patch_jump(vm, jump_over, here(vm));
        let info = &mut vm.functions[def.func_ix];
        info.addr = entry;
        info.frame_size = ctx.frame_size();
    }
}

/// Append a global slot.
pub fn push_global(vm: &mut Vm, value: Value) -> u32 {
    vm.globals.push(value);
    (vm.globals.len() - 1) as u32
}

pub fn emit(vm: &mut Vm, op: Op) {
    vm.code.push(op);
}

pub fn here(vm: &Vm) -> usize {
    vm.code.len()
}

/// Point a previously emitted jump at `target`.
pub fn patch_jump(vm: &mut Vm, at: usize, target: usize) {
    match &mut vm.code[at] {
        Op::Jmp { to } | Op::Qtru { to, .. } | Op::Qtyp { to, .. } => *to = target as u32,
        other => panic!("patching a non-jump: {:?}", other),
    }
}

/// Bind parameter names to the argument values of an instance mention.
fn bind_parameters(
    params: &[TypeParameter],
    arguments: &[crate::ast::TypeArgument],
) -> IndexMap<String, TypeArgValue> {
    params
        .iter()
        .zip(arguments.iter())
        .map(|(p, a)| (p.name.clone(), a.value.clone()))
        .collect()
}

/// Substitute type parameters for their argument values in a type
/// expression, so `list{T}` with `T = string` reads `list{string}`.
fn substitute(tn: &TypeNode, substitution: &IndexMap<String, TypeArgValue>) -> TypeNode {
    match tn {
        TypeNode::Name { name, .. } => match substitution.get(name) {
            Some(TypeArgValue::Type(t)) => (**t).clone(),
            _ => tn.clone(),
        },
        TypeNode::WithArguments {
            token,
            operator,
            arguments,
        } => TypeNode::WithArguments {
            token: token.clone(),
            operator: operator.clone(),
            arguments: arguments
                .iter()
                .map(|a| match &a.value {
                    TypeArgValue::EnumElement(name) => match substitution.get(name) {
                        Some(value) => crate::ast::TypeArgument {
                            token: a.token.clone(),
                            value: value.clone(),
                        },
                        None => a.clone(),
                    },
                    _ => a.clone(),
                })
                .collect(),
        },
        TypeNode::Infix {
            token,
            operator,
            left,
            right,
        } => TypeNode::Infix {
            token: token.clone(),
            operator: operator.clone(),
            left: Box::new(substitute(left, substitution)),
            right: Box::new(substitute(right, substitution)),
        },
        TypeNode::Suffix {
            token,
            operator,
            left,
        } => TypeNode::Suffix {
            token: token.clone(),
            operator: operator.clone(),
            left: Box::new(substitute(left, substitution)),
        },
        TypeNode::WithParameters { .. } | TypeNode::DotDotDot { .. } => tn.clone(),
    }
}

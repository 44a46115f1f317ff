//! Expression codegen.
//!
//! Every method hands back the register its result lives in plus the
//! expression's static abstract type. Compile-time errors are accumulated
//! on the compiler; codegen for the offending expression is abandoned but
//! the caller keeps going so that one bad declaration doesn't hide the
//! next one.

use super::{emit, here, patch_jump, Compiler, Ctx, GlobalInfo};
use crate::ast::{LogKind, Node, TypeNode};
use pipefish_foundation::token::{Token, TokenType};
use pipefish_vm::opcode::TrackOperand;
use pipefish_vm::values::{self, AbstractType, Value};
use pipefish_vm::{Op, Payload, Reg, TrackingFlavor, TypeInfo, Vm};

impl Compiler {
    /// Compile one expression; the result lands in the returned register.
    pub fn compile_expression(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        node: &Node,
    ) -> (Reg, AbstractType) {
        match node {
            Node::IntLit { value, .. } => self.load_const(vm, ctx, Value::int(*value)),
            Node::FloatLit { value, .. } => self.load_const(vm, ctx, Value::float(*value)),
            Node::StringLit { value, .. } => {
                self.load_const(vm, ctx, Value::string(value.clone()))
            }
            Node::RuneLit { value, .. } => self.load_const(vm, ctx, Value::rune(*value)),
            Node::BoolLit { value, .. } => self.load_const(vm, ctx, Value::bool(*value)),
            Node::Nothing { .. } => self.load_const(vm, ctx, Value::tuple(Vec::new())),
            Node::Ident { token, name } => self.compile_ident(vm, ctx, token, name),
            Node::Unfix { token, operator } => {
                self.compile_call(vm, ctx, token, operator, &[])
            }
            Node::Bling { token, .. } => {
                self.err("parse/bling", token, &[&token.literal]);
                self.dummy(ctx)
            }
            Node::ListExpr { inner, .. } => self.compile_list(vm, ctx, inner),
            Node::SnippetLit { token, parts } => self.compile_snippet(vm, ctx, token, parts),
            Node::Prefix {
                token,
                operator,
                args,
            } => self.compile_prefix(vm, ctx, token, operator, args),
            Node::Infix {
                token,
                operator,
                args,
            } => self.compile_infix(vm, ctx, token, operator, args),
            Node::Suffix {
                token,
                operator,
                args,
            } => self.compile_call(vm, ctx, token, operator, args),
            Node::TypeSuffix {
                token,
                type_node,
                args,
            } => self.compile_type_suffix(vm, ctx, token, type_node, args),
            Node::LazyInfix {
                token,
                operator,
                left,
                right,
            } => self.compile_lazy(vm, ctx, token, operator, left, right),
            Node::Comparison {
                token,
                operator,
                left,
                right,
            } => self.compile_comparison(vm, ctx, token, operator, left, right),
            Node::IndexExpr { token, left, index } => {
                self.compile_index(vm, ctx, token, left, index)
            }
            Node::Piping {
                token,
                operator,
                left,
                right,
            } => self.compile_piping(vm, ctx, token, operator, left, right),
            Node::Assignment { token, left, right } => {
                self.compile_assignment(vm, ctx, token, left, right)
            }
            Node::ForExpr { .. } => self.compile_for(vm, ctx, node),
            Node::TryExpr {
                token,
                var_name,
                right,
            } => self.compile_try(vm, ctx, token, var_name, right),
            Node::FuncExpr {
                sig, body, given, ..
            } => self.compile_lambda(vm, ctx, sig, body, given.as_deref()),
            Node::TypeExpr {
                token,
                operator,
                type_args,
            } => self.compile_type_value(vm, ctx, token, operator, type_args),
            Node::TypeLit { type_node, .. } => {
                let resolved = self.resolve_type(vm, type_node);
                self.load_const(vm, ctx, Value::new(values::TYPE, Payload::Type(resolved)))
            }
            Node::TypePrefix {
                token,
                operator,
                type_args,
                args,
            } => self.compile_constructor(vm, ctx, token, operator, type_args, args),
            Node::LogExpr {
                token,
                kind,
                parts,
                left,
                right,
                ..
            } => self.compile_log(vm, ctx, token, *kind, parts, left.as_deref(), right.as_deref()),
            Node::BreakExpr { token, value } => {
                self.compile_break(vm, ctx, token, value.as_deref())
            }
            Node::ContinueExpr { token } => self.compile_continue(vm, ctx, token),
            Node::GolangExpr { token } => {
                self.err("init/golang", token, &[]);
                self.dummy(ctx)
            }
        }
    }

    pub(super) fn dummy(&mut self, ctx: &mut Ctx) -> (Reg, AbstractType) {
        (ctx.rx(), AbstractType::new())
    }

    pub(super) fn load_const(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        value: Value,
    ) -> (Reg, AbstractType) {
        let ty = AbstractType::single(value.ty);
        let c = vm.add_const(value);
        let dst = ctx.rx();
        emit(vm, Op::LoadC { dst, c });
        (dst, ty)
    }

    pub(super) fn compile_ident(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        name: &str,
    ) -> (Reg, AbstractType) {
        if let Some(local) = ctx.lookup(name) {
            return (local.reg, local.types);
        }
        if let Some(global) = self.global_for(ctx, token, name) {
            let dst = ctx.rx();
            emit(vm, Op::LoadG { dst, g: global.slot });
            return (dst, global.types);
        }
        if let Some(element) = self.enum_element_value(vm, name) {
            return self.load_const(vm, ctx, element);
        }
        // A bare mention of a struct field is a label value.
        if let Some(number) = vm.registry.label_number(name) {
            return self.load_const(
                vm,
                ctx,
                Value::new(values::LABEL, Payload::Label(number)),
            );
        }
        self.err("comp/ident/known", token, &[name]);
        self.dummy(ctx)
    }

    pub(super) fn global_for(&self, ctx: &Ctx, token: &Token, name: &str) -> Option<GlobalInfo> {
        for key in self.qualified_names(ctx, token, name) {
            if let Some(g) = self.globals.get(&key) {
                return Some(g.clone());
            }
        }
        None
    }

    /// Candidate qualified names for a mention, innermost namespace first.
    pub(super) fn qualified_names(&self, ctx: &Ctx, token: &Token, name: &str) -> Vec<String> {
        let mut out = Vec::new();
        if !token.namespace.is_empty() {
            out.push(format!("{}{}{}", ctx.namespace, token.namespace, name));
            out.push(format!("{}{}", token.namespace, name));
        }
        if !ctx.namespace.is_empty() {
            out.push(format!("{}{}", ctx.namespace, name));
        }
        out.push(name.to_string());
        out
    }

    fn compile_list(&mut self, vm: &mut Vm, ctx: &mut Ctx, inner: &Node) -> (Reg, AbstractType) {
        let items = flatten_comma(inner);
        let mut compiled = Vec::new();
        for item in &items {
            let (reg, ty) = self.compile_expression(vm, ctx, item);
            if ty == AbstractType::single(values::ERROR) {
                self.err("comp/list/err", item.token(), &[]);
            }
            compiled.push(reg);
        }
        let first = ctx.block(compiled.len() as u32);
        for (i, reg) in compiled.iter().enumerate() {
            emit(vm, Op::Mov { dst: first + i as u32, src: *reg });
        }
        let dst = ctx.rx();
        emit(vm, Op::MkList { dst, first, n: compiled.len() as u32 });
        (dst, AbstractType::single(values::LIST))
    }

    fn compile_snippet(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        parts: &[Node],
    ) -> (Reg, AbstractType) {
        let tok = vm.add_token(token.clone());
        let mut acc: Option<Reg> = None;
        for part in parts {
            let (reg, ty) = self.compile_expression(vm, ctx, part);
            let piece = if ty == AbstractType::single(values::STRING) {
                reg
            } else {
                let dst = ctx.rx();
                emit(vm, Op::Cast { dst, src: reg, ty: values::STRING, tok });
                dst
            };
            acc = Some(match acc {
                None => piece,
                Some(prev) => {
                    let dst = ctx.rx();
                    emit(vm, Op::Cat { dst, a: prev, b: piece });
                    dst
                }
            });
        }
        let result = match acc {
            Some(reg) => reg,
            None => self.load_const(vm, ctx, Value::string("")).0,
        };
        emit(vm, Op::Retag { reg: result, ty: values::SNIPPET });
        (result, AbstractType::single(values::SNIPPET))
    }

    fn compile_prefix(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        operator: &str,
        args: &[Node],
    ) -> (Reg, AbstractType) {
        match operator {
            "not" => {
                let (src, ty) = self.compile_expression(vm, ctx, &args[0]);
                if !ty.contains(values::BOOL) && !ty.is_empty() {
                    self.err("comp/bool/not", token, &[]);
                    return self.dummy(ctx);
                }
                let tok = vm.add_token(token.clone());
                let dst = ctx.rx();
                emit(vm, Op::Not { dst, src, tok });
                (dst, AbstractType::single(values::BOOL))
            }
            "unwrap" => {
                let (src, ty) = self.compile_expression(vm, ctx, &args[0]);
                let tok = vm.add_token(token.clone());
                let dst = ctx.rx();
                emit(vm, Op::Unwrap { dst, src, tok });
                let mut out = ty.without(values::NULL);
                out.insert(values::ERROR);
                (dst, out)
            }
            "valid" => {
                let (src, _) = self.compile_expression(vm, ctx, &args[0]);
                let dst = ctx.rx();
                emit(vm, Op::Valid { dst, src });
                (dst, AbstractType::single(values::BOOL))
            }
            "range" => {
                let (src, _) = self.compile_expression(vm, ctx, &args[0]);
                let tok = vm.add_token(token.clone());
                let dst = ctx.rx();
                emit(vm, Op::Pairs { dst, src, tok });
                (dst, AbstractType::single(values::LIST))
            }
            "global" => {
                if !ctx.cmd {
                    self.err("comp/global/local", token, &[]);
                }
                self.compile_expression(vm, ctx, &args[0])
            }
            "post" => {
                let (src, _) = self.compile_expression(vm, ctx, &args[0]);
                if !ctx.cmd && !ctx.allow_new_globals {
                    self.err("comp/global/local", token, &[]);
                }
                emit(vm, Op::Post { src });
                self.load_const(vm, ctx, Value::ok())
            }
            "input" => {
                let (prompt, _) = self.compile_expression(vm, ctx, &args[0]);
                if !ctx.cmd && !ctx.allow_new_globals {
                    self.err("comp/global/local", token, &[]);
                }
                let dst = ctx.rx();
                emit(vm, Op::Input { dst, prompt });
                (dst, AbstractType::single(values::STRING))
            }
            "builtin" => {
                // `builtin "…"` bodies are handled at installation.
                self.err("init/decl/form", token, &[]);
                self.dummy(ctx)
            }
            _ => {
                // A local or global holding a function value applies
                // indirectly; a known function name dispatches.
                let is_known_function = self
                    .qualified_names(ctx, token, operator)
                    .iter()
                    .any(|k| self.functions.contains_key(k));
                if !is_known_function {
                    let holds_func = ctx
                        .lookup(operator)
                        .map(|l| l.types.contains(values::FUNC))
                        .unwrap_or_else(|| {
                            self.global_for(ctx, token, operator)
                                .map(|g| g.types.contains(values::FUNC))
                                .unwrap_or(false)
                        });
                    if holds_func {
                        return self.compile_indirect(vm, ctx, token, operator, args);
                    }
                }
                self.compile_call(vm, ctx, token, operator, args)
            }
        }
    }

    fn compile_indirect(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        operator: &str,
        args: &[Node],
    ) -> (Reg, AbstractType) {
        let (fsrc, _) = self.compile_ident(vm, ctx, token, operator);
        let mut arg_regs = Vec::new();
        for arg in args {
            if matches!(arg, Node::Bling { .. }) {
                continue;
            }
            let (reg, _) = self.compile_expression(vm, ctx, arg);
            arg_regs.push(reg);
        }
        let first = ctx.block(arg_regs.len() as u32);
        for (i, reg) in arg_regs.iter().enumerate() {
            emit(vm, Op::Mov { dst: first + i as u32, src: *reg });
        }
        let tok = vm.add_token(token.clone());
        let dst = ctx.rx();
        emit(
            vm,
            Op::Dofn { dst, fsrc, first_arg: first, n: arg_regs.len() as u32, tok },
        );
        (dst, self.any_type(vm))
    }

    fn compile_infix(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        operator: &str,
        args: &[Node],
    ) -> (Reg, AbstractType) {
        match operator {
            "," => {
                let items: Vec<Node> = args
                    .iter()
                    .filter(|a| !matches!(a, Node::Bling { value, .. } if value == ","))
                    .cloned()
                    .collect();
                let mut compiled = Vec::new();
                for item in &items {
                    let (reg, ty) = self.compile_expression(vm, ctx, item);
                    if ty == AbstractType::single(values::ERROR) {
                        self.err("comp/list/err", item.token(), &[]);
                    }
                    compiled.push(reg);
                }
                let first = ctx.block(compiled.len() as u32);
                for (i, reg) in compiled.iter().enumerate() {
                    emit(vm, Op::Mov { dst: first + i as u32, src: *reg });
                }
                let dst = ctx.rx();
                emit(vm, Op::MkTuple { dst, first, n: compiled.len() as u32 });
                (dst, AbstractType::single(values::TUPLE))
            }
            "given" => {
                ctx.push_scope();
                self.compile_given(vm, ctx, &args[2]);
                let result = self.compile_expression(vm, ctx, &args[0]);
                ctx.pop_scope();
                result
            }
            _ => self.compile_call(vm, ctx, token, operator, args),
        }
    }

    /// Compile the local definitions of a `given` block into the current
    /// scope, in order.
    pub fn compile_given(&mut self, vm: &mut Vm, ctx: &mut Ctx, block: &Node) {
        for statement in flatten_statements(block) {
            match &statement {
                Node::Assignment { token, left, right } => {
                    let _ = self.compile_assignment(vm, ctx, token, left, right);
                }
                // A local function: `qux(z) : 3`.
                Node::LazyInfix {
                    token,
                    operator,
                    left,
                    right,
                } if operator == ":" => {
                    if let Node::Prefix {
                        operator: fn_name,
                        args,
                        ..
                    } = left.as_ref()
                    {
                        let sig: crate::ast::AstSig = args
                            .iter()
                            .filter_map(|a| match a {
                                Node::Ident { name, .. } => Some(crate::ast::NameTypePair {
                                    name: name.clone(),
                                    ty: TypeNode::named("any?"),
                                }),
                                _ => None,
                            })
                            .collect();
                        let (freg, fty) = self.compile_lambda(vm, ctx, &sig, right, None);
                        let dst = ctx.rx();
                        emit(vm, Op::Mov { dst, src: freg });
                        ctx.bind(fn_name, dst, fty);
                    } else {
                        self.err("init/decl/form", token, &[]);
                    }
                }
                other => {
                    self.err("init/decl/form", other.token(), &[]);
                }
            }
        }
    }

    fn compile_lazy(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        operator: &str,
        left: &Node,
        right: &Node,
    ) -> (Reg, AbstractType) {
        match operator {
            ":" => self.compile_conditional(vm, ctx, token, left, right, None),
            "and" | "or" => self.compile_boolean(vm, ctx, token, operator, left, right),
            // `;` and the newline separator: alternation between the
            // clauses of a conditional; in a command, plain statements
            // also run in sequence.
            _ => {
                if ctx.cmd {
                    let mut statements = flatten_statements(left);
                    statements.extend(flatten_statements(right));
                    self.compile_cmd_sequence(vm, ctx, &statements)
                } else {
                    self.compile_alternative(vm, ctx, left, right)
                }
            }
        }
    }

    /// A command body: statements run in order. A conditional statement
    /// whose guard was satisfied ends the sequence with its value; an
    /// unsatisfied one falls through to the next statement; an error stops
    /// everything; a plain statement runs and execution continues.
    fn compile_cmd_sequence(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        statements: &[Node],
    ) -> (Reg, AbstractType) {
        let result = ctx.rx();
        let mut out_ty = AbstractType::new();
        let mut end_jumps = Vec::new();
        let last = statements.len().saturating_sub(1);
        for (i, statement) in statements.iter().enumerate() {
            let (reg, ty) = self.compile_expression(vm, ctx, statement);
            emit(vm, Op::Mov { dst: result, src: reg });
            if i == last {
                out_ty = out_ty.union(&ty);
                break;
            }
            if is_conditional(statement) {
                // Satisfied: take the value and stop; unsatisfied: go on.
                let taken = here(vm);
                emit(
                    vm,
                    Op::Qtyp {
                        src: reg,
                        types: AbstractType::single(values::UNSATISFIED_CONDITIONAL),
                        to: 0,
                    },
                );
                // Fall-through: the guard failed, try the next statement.
                let next = here(vm);
                emit(vm, Op::Jmp { to: 0 });
                patch_jump(vm, taken, here(vm));
                end_jumps.push(here(vm));
                emit(vm, Op::Jmp { to: 0 });
                patch_jump(vm, next, here(vm));
                out_ty = out_ty.union(&ty.without(values::UNSATISFIED_CONDITIONAL));
            } else {
                // Plain statement: an error aborts the sequence.
                let fine = here(vm);
                emit(
                    vm,
                    Op::Qtyp {
                        src: reg,
                        types: AbstractType::single(values::ERROR),
                        to: 0,
                    },
                );
                end_jumps.push(here(vm));
                emit(vm, Op::Jmp { to: 0 });
                patch_jump(vm, fine, here(vm));
                if ty.contains(values::ERROR) {
                    out_ty.insert(values::ERROR);
                }
            }
        }
        for at in end_jumps {
            patch_jump(vm, at, here(vm));
        }
        (result, out_ty)
    }

    /// `cond : value` — unsatisfied when the guard is false.
    fn compile_conditional(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        cond: &Node,
        value: &Node,
        iflog_parts: Option<&[Node]>,
    ) -> (Reg, AbstractType) {
        let is_else = matches!(cond, Node::BoolLit { token, value: true } if token.ty == TokenType::Else);
        let (cond_reg, cond_ty) = self.compile_expression(vm, ctx, cond);
        if !cond_ty.contains(values::BOOL) && !cond_ty.is_empty() {
            self.err("comp/bool/cond", token, &[]);
            return self.dummy(ctx);
        }
        let tok = vm.add_token(token.clone());
        let result = ctx.rx();
        let mut ends = Vec::new();

        let needs_guard = cond_ty.only() != Some(values::BOOL);
        let guard_jump = if needs_guard {
            let at = here(vm);
            emit(
                vm,
                Op::Qtyp { src: cond_reg, types: AbstractType::single(values::BOOL), to: 0 },
            );
            Some(at)
        } else {
            None
        };
        if self.tracking_on && !is_else {
            emit(
                vm,
                Op::Track {
                    flavor: TrackingFlavor::Condition,
                    tok,
                    args: vec![TrackOperand::Str(render_source(cond))],
                    log_to: self.log_to_slot,
                    log_time: self.log_time_slot,
                },
            );
            emit(
                vm,
                Op::Track {
                    flavor: TrackingFlavor::Result,
                    tok,
                    args: vec![TrackOperand::Reg(cond_reg)],
                    log_to: self.log_to_slot,
                    log_time: self.log_time_slot,
                },
            );
        }
        let false_jump = here(vm);
        emit(vm, Op::Qtru { src: cond_reg, to: 0 });
        if self.tracking_on && is_else {
            emit(
                vm,
                Op::Track {
                    flavor: TrackingFlavor::Else,
                    tok,
                    args: Vec::new(),
                    log_to: self.log_to_slot,
                    log_time: self.log_time_slot,
                },
            );
        }
        if let Some(parts) = iflog_parts {
            self.emit_log_record(vm, ctx, token, parts);
        }
        let (val_reg, val_ty) = self.compile_expression(vm, ctx, value);
        emit(vm, Op::Mov { dst: result, src: val_reg });
        ends.push(here(vm));
        emit(vm, Op::Jmp { to: 0 });

        patch_jump(vm, false_jump, here(vm));
        let unsat = vm.add_const(Value::unsat());
        emit(vm, Op::LoadC { dst: result, c: unsat });
        let mut out_ty = val_ty.union(&AbstractType::single(values::UNSATISFIED_CONDITIONAL));
        if let Some(at) = guard_jump {
            ends.push(here(vm));
            emit(vm, Op::Jmp { to: 0 });
            patch_jump(vm, at, here(vm));
            // An error in the guard propagates itself; anything else
            // non-boolean is its own complaint.
            let not_an_error = here(vm);
            emit(
                vm,
                Op::Qtyp { src: cond_reg, types: AbstractType::single(values::ERROR), to: 0 },
            );
            emit(vm, Op::Mov { dst: result, src: cond_reg });
            ends.push(here(vm));
            emit(vm, Op::Jmp { to: 0 });
            patch_jump(vm, not_an_error, here(vm));
            emit(
                vm,
                Op::MkErr { dst: result, id: "vm/bool/cond".to_string(), tok, args: Vec::new() },
            );
            out_ty.insert(values::ERROR);
        }
        for at in ends {
            patch_jump(vm, at, here(vm));
        }
        (result, out_ty)
    }

    /// `a ; b` — the right side runs when the left was unsatisfied.
    fn compile_alternative(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        left: &Node,
        right: &Node,
    ) -> (Reg, AbstractType) {
        let (left_reg, left_ty) = self.compile_expression(vm, ctx, left);
        let result = ctx.rx();
        emit(vm, Op::Mov { dst: result, src: left_reg });
        let keep = here(vm);
        emit(
            vm,
            Op::Qtyp {
                src: result,
                types: AbstractType::single(values::UNSATISFIED_CONDITIONAL),
                to: 0,
            },
        );
        let (right_reg, right_ty) = self.compile_expression(vm, ctx, right);
        emit(vm, Op::Mov { dst: result, src: right_reg });
        patch_jump(vm, keep, here(vm));
        let out = left_ty
            .without(values::UNSATISFIED_CONDITIONAL)
            .union(&right_ty);
        (result, out)
    }

    fn compile_boolean(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        operator: &str,
        left: &Node,
        right: &Node,
    ) -> (Reg, AbstractType) {
        let is_and = operator == "and";
        let (left_reg, left_ty) = self.compile_expression(vm, ctx, left);
        if !left_ty.contains(values::BOOL) && !left_ty.is_empty() {
            let id = if is_and { "comp/bool/and/left" } else { "comp/bool/or/left" };
            self.err(id, token, &[]);
            return self.dummy(ctx);
        }
        let tok = vm.add_token(token.clone());
        let result = ctx.rx();
        let mut ends = Vec::new();

        let left_guard = if left_ty.only() != Some(values::BOOL) {
            let at = here(vm);
            emit(
                vm,
                Op::Qtyp { src: left_reg, types: AbstractType::single(values::BOOL), to: 0 },
            );
            Some(at)
        } else {
            None
        };
        // Short-circuit: `and` bails on false, `or` bails on true.
        emit(vm, Op::Mov { dst: result, src: left_reg });
        let short = here(vm);
        if is_and {
            emit(vm, Op::Qtru { src: left_reg, to: 0 });
        } else {
            // Invert: continue only when left was false.
            let inverted = ctx.rx();
            emit(vm, Op::Not { dst: inverted, src: left_reg, tok });
            emit(vm, Op::Qtru { src: inverted, to: 0 });
        }
        let (right_reg, right_ty) = self.compile_expression(vm, ctx, right);
        if !right_ty.contains(values::BOOL) && !right_ty.is_empty() {
            let id = if is_and { "comp/bool/and/right" } else { "comp/bool/or/right" };
            self.err(id, token, &[]);
            return self.dummy(ctx);
        }
        let right_guard = if right_ty.only() != Some(values::BOOL) {
            let at = here(vm);
            emit(
                vm,
                Op::Qtyp { src: right_reg, types: AbstractType::single(values::BOOL), to: 0 },
            );
            Some(at)
        } else {
            None
        };
        emit(vm, Op::Mov { dst: result, src: right_reg });
        patch_jump(vm, short, here(vm));
        let mut out_ty = AbstractType::single(values::BOOL);
        let mut after_errors = Vec::new();
        if let Some(at) = left_guard {
            ends.push(here(vm));
            emit(vm, Op::Jmp { to: 0 });
            patch_jump(vm, at, here(vm));
            let not_an_error = here(vm);
            emit(
                vm,
                Op::Qtyp { src: left_reg, types: AbstractType::single(values::ERROR), to: 0 },
            );
            emit(vm, Op::Mov { dst: result, src: left_reg });
            after_errors.push(here(vm));
            emit(vm, Op::Jmp { to: 0 });
            patch_jump(vm, not_an_error, here(vm));
            let id = if is_and { "vm/bool/and/left" } else { "vm/bool/or/left" };
            emit(vm, Op::MkErr { dst: result, id: id.to_string(), tok, args: Vec::new() });
            out_ty.insert(values::ERROR);
            after_errors.push(here(vm));
            emit(vm, Op::Jmp { to: 0 });
        }
        if let Some(at) = right_guard {
            ends.push(here(vm));
            emit(vm, Op::Jmp { to: 0 });
            patch_jump(vm, at, here(vm));
            let not_an_error = here(vm);
            emit(
                vm,
                Op::Qtyp { src: right_reg, types: AbstractType::single(values::ERROR), to: 0 },
            );
            emit(vm, Op::Mov { dst: result, src: right_reg });
            after_errors.push(here(vm));
            emit(vm, Op::Jmp { to: 0 });
            patch_jump(vm, not_an_error, here(vm));
            let id = if is_and { "vm/bool/and/right" } else { "vm/bool/or/right" };
            emit(vm, Op::MkErr { dst: result, id: id.to_string(), tok, args: Vec::new() });
            out_ty.insert(values::ERROR);
        }
        for at in ends.into_iter().chain(after_errors) {
            patch_jump(vm, at, here(vm));
        }
        (result, out_ty)
    }

    fn compile_comparison(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        operator: &str,
        left: &Node,
        right: &Node,
    ) -> (Reg, AbstractType) {
        let (a, a_ty) = self.compile_expression(vm, ctx, left);
        let (b, b_ty) = self.compile_expression(vm, ctx, right);
        if a_ty == AbstractType::single(values::ERROR) {
            self.err("comp/error/eq/a", token, &[]);
            return self.dummy(ctx);
        }
        if b_ty == AbstractType::single(values::ERROR) {
            self.err("comp/error/eq/b", token, &[]);
            return self.dummy(ctx);
        }
        if !a_ty.is_empty() && !b_ty.is_empty() && a_ty.intersect(&b_ty).is_empty() {
            let a_name = vm.describe_type(&a_ty);
            let b_name = vm.describe_type(&b_ty);
            self.err("comp/eq/types", token, &[&a_name, &b_name]);
            return self.dummy(ctx);
        }
        let dst = ctx.rx();
        emit(vm, Op::Eq { dst, a, b });
        if operator == "!=" {
            let tok = vm.add_token(token.clone());
            let inverted = ctx.rx();
            emit(vm, Op::Not { dst: inverted, src: dst, tok });
            return (inverted, AbstractType::single(values::BOOL));
        }
        (dst, AbstractType::single(values::BOOL))
    }

    fn compile_index(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        left: &Node,
        index: &Node,
    ) -> (Reg, AbstractType) {
        let (container, container_ty) = self.compile_expression(vm, ctx, left);
        // An index that is a bare name known only as a struct label loads
        // as a label value.
        let label_index = match index {
            Node::Ident { name, .. }
                if ctx.lookup(name).is_none()
                    && self.global_for(ctx, token, name).is_none()
                    && self.enum_element_value(vm, name).is_none()
                    && vm.registry.label_number(name).is_some() =>
            {
                Some(vm.registry.label_number(name).unwrap())
            }
            _ => None,
        };
        let (index_reg, _) = match label_index {
            Some(number) => {
                self.load_const(vm, ctx, Value::new(values::LABEL, Payload::Label(number)))
            }
            None => self.compile_expression(vm, ctx, index),
        };
        let tok = vm.add_token(token.clone());
        let dst = ctx.rx();
        emit(vm, Op::Index { dst, container, index: index_reg, tok });
        // The element type: for a struct with a fixed label, the field's
        // type; otherwise anything.
        let out = match (container_ty.only(), label_index) {
            (Some(ty), Some(label)) => match vm.registry.info(ty) {
                TypeInfo::Struct { fields, .. } => vm
                    .registry
                    .resolve_field(ty, label)
                    .and_then(|pos| fields.get(pos).cloned())
                    .unwrap_or_else(|| self.any_type(vm)),
                _ => self.any_type(vm),
            },
            _ => self.any_type(vm),
        };
        (dst, out)
    }

    fn compile_piping(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        operator: &str,
        left: &Node,
        right: &Node,
    ) -> (Reg, AbstractType) {
        let (src, src_ty) = self.compile_expression(vm, ctx, left);
        if operator == "->" {
            ctx.push_scope();
            ctx.bind("that", src, src_ty);
            let result = self.compile_expression(vm, ctx, right);
            ctx.pop_scope();
            return result;
        }
        // `>>` and `?>`: the right side becomes a one-parameter function
        // over `that`.
        let sig = vec![crate::ast::NameTypePair {
            name: "that".to_string(),
            ty: TypeNode::named("any?"),
        }];
        let (freg, _) = self.compile_lambda(vm, ctx, &sig, right, None);
        let tok = vm.add_token(token.clone());
        let dst = ctx.rx();
        if operator == ">>" {
            emit(vm, Op::MapList { dst, src, f: freg, tok });
        } else {
            emit(vm, Op::FilterList { dst, src, f: freg, tok });
        }
        let mut out = src_ty;
        out.insert(values::ERROR);
        (dst, out)
    }

    fn compile_try(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        var_name: &str,
        right: &Node,
    ) -> (Reg, AbstractType) {
        let (value, value_ty) = self.compile_expression(vm, ctx, right);
        let result = ctx.rx();
        emit(vm, Op::Mov { dst: result, src: value });
        let not_error = here(vm);
        emit(
            vm,
            Op::Qtyp { src: result, types: AbstractType::single(values::ERROR), to: 0 },
        );
        // The error branch: bind the error and yield unsatisfied so that a
        // following `else` takes over.
        if !var_name.is_empty() {
            let bound = ctx.rx();
            emit(vm, Op::Mov { dst: bound, src: result });
            ctx.bind(var_name, bound, AbstractType::single(values::ERROR));
        }
        let unsat = vm.add_const(Value::unsat());
        emit(vm, Op::LoadC { dst: result, c: unsat });
        patch_jump(vm, not_error, here(vm));
        let _ = token;
        let out = value_ty
            .without(values::ERROR)
            .union(&AbstractType::single(values::UNSATISFIED_CONDITIONAL));
        (result, out)
    }

    fn compile_type_value(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        operator: &str,
        type_args: &[Node],
    ) -> (Reg, AbstractType) {
        let tn = self.type_node_from_mention(vm, ctx, token, operator, type_args);
        let resolved = self.resolve_type(vm, &tn);
        self.load_const(
            vm,
            ctx,
            Value::new(values::TYPE, Payload::Type(resolved)),
        )
    }

    /// Rebuild a `TypeNode` from an expression-position type mention.
    fn type_node_from_mention(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        operator: &str,
        type_args: &[Node],
    ) -> TypeNode {
        if type_args.is_empty() {
            return TypeNode::Name {
                token: token.clone(),
                name: operator.to_string(),
            };
        }
        let mut arguments = Vec::new();
        for arg in type_args {
            let value = match arg {
                Node::IntLit { value, .. } => crate::ast::TypeArgValue::Int(*value),
                Node::FloatLit { value, .. } => crate::ast::TypeArgValue::Float(*value),
                Node::StringLit { value, .. } => crate::ast::TypeArgValue::Str(value.clone()),
                Node::RuneLit { value, .. } => crate::ast::TypeArgValue::Rune(*value),
                Node::BoolLit { value, .. } => crate::ast::TypeArgValue::Bool(*value),
                Node::Ident { name, .. } => crate::ast::TypeArgValue::EnumElement(name.clone()),
                Node::TypeExpr {
                    token: t,
                    operator: op,
                    type_args: ta,
                } => {
                    let inner = self.type_node_from_mention(vm, ctx, t, op, ta);
                    crate::ast::TypeArgValue::Type(Box::new(inner))
                }
                other => {
                    self.err("parse/instance/value", other.token(), &[]);
                    crate::ast::TypeArgValue::Int(0)
                }
            };
            arguments.push(crate::ast::TypeArgument {
                token: arg.token().clone(),
                value,
            });
        }
        TypeNode::WithArguments {
            token: token.clone(),
            operator: operator.to_string(),
            arguments,
        }
    }

    /// A constructor application: `Person("John", 22)`, `Color(4)`,
    /// `Strings["foo"]`, `apples(5)`.
    fn compile_constructor(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        operator: &str,
        type_args: &[Node],
        args: &[Node],
    ) -> (Reg, AbstractType) {
        let tn = self.type_node_from_mention(vm, ctx, token, operator, type_args);
        let resolved = self.resolve_type(vm, &tn);
        let ty = match resolved.only() {
            Some(t) => t,
            None => {
                self.err("parse/type/exists", token, &[operator]);
                return self.dummy(ctx);
            }
        };
        self.construct(vm, ctx, token, ty, args)
    }

    pub(crate) fn construct(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        ty: pipefish_vm::ValueType,
        args: &[Node],
    ) -> (Reg, AbstractType) {
        let tok = vm.add_token(token.clone());
        let mut compiled = Vec::new();
        for arg in args {
            let (reg, arg_ty) = self.compile_expression(vm, ctx, arg);
            compiled.push((reg, arg_ty));
        }
        // `type x` reads the type of a value; `error "…"` makes an error.
        if ty == values::TYPE {
            let dst = ctx.rx();
            if compiled.len() == 1 {
                emit(vm, Op::TypeOf { dst, src: compiled[0].0 });
            }
            return (dst, AbstractType::single(values::TYPE));
        }
        if ty == values::ERROR {
            let dst = ctx.rx();
            if compiled.len() == 1 {
                emit(
                    vm,
                    Op::UserErr { dst, msg: compiled[0].0, tok, values: Vec::new() },
                );
            } else if compiled.len() > 1 {
                let attached: Vec<Reg> = compiled.iter().skip(1).map(|(r, _)| *r).collect();
                emit(
                    vm,
                    Op::UserErr { dst, msg: compiled[0].0, tok, values: attached },
                );
            }
            return (dst, AbstractType::single(values::ERROR));
        }
        let info_kind = vm.registry.info(ty).clone();
        let dst = ctx.rx();
        match info_kind {
            TypeInfo::Struct { fields, .. } => {
                if compiled.len() != fields.len() {
                    self.err("comp/call", token, &[vm.registry.info(ty).name()]);
                    return (dst, AbstractType::new());
                }
                let first = ctx.block(compiled.len() as u32);
                for (i, (reg, _)) in compiled.iter().enumerate() {
                    emit(vm, Op::Mov { dst: first + i as u32, src: *reg });
                }
                emit(vm, Op::MkStruct { dst, ty, first, n: compiled.len() as u32 });
            }
            TypeInfo::Enum { .. } => {
                if compiled.len() != 1 {
                    self.err("comp/call", token, &[vm.registry.info(ty).name()]);
                    return (dst, AbstractType::new());
                }
                emit(vm, Op::Cast { dst, src: compiled[0].0, ty, tok });
            }
            TypeInfo::Clone { parent, .. } => {
                // A clone of list may construct from several elements.
                if vm.registry.underlying(parent) == values::LIST && compiled.len() != 1 {
                    let first = ctx.block(compiled.len() as u32);
                    for (i, (reg, _)) in compiled.iter().enumerate() {
                        emit(vm, Op::Mov { dst: first + i as u32, src: *reg });
                    }
                    emit(vm, Op::MkList { dst, first, n: compiled.len() as u32 });
                    emit(vm, Op::Retag { reg: dst, ty });
                } else if compiled.len() == 1 {
                    emit(vm, Op::Cast { dst, src: compiled[0].0, ty, tok });
                } else if vm.registry.underlying(parent) == values::SET {
                    let first = ctx.block(compiled.len() as u32);
                    for (i, (reg, _)) in compiled.iter().enumerate() {
                        emit(vm, Op::Mov { dst: first + i as u32, src: *reg });
                    }
                    emit(vm, Op::MkSet { dst, first, n: compiled.len() as u32 });
                    emit(vm, Op::Retag { reg: dst, ty });
                } else {
                    self.err("comp/call", token, &[vm.registry.info(ty).name()]);
                    return (dst, AbstractType::new());
                }
            }
            _ => {
                // A builtin conversion: `string 4`, `int "5"`.
                if compiled.len() != 1 {
                    self.err("comp/call", token, &[vm.registry.info(ty).name()]);
                    return (dst, AbstractType::new());
                }
                emit(vm, Op::Cast { dst, src: compiled[0].0, ty, tok });
            }
        }
        let out = if vm.registry.info(ty).type_check().is_some() {
            let validated = ctx.rx();
            emit(vm, Op::Validate { dst: validated, src: dst, ty, tok });
            return (
                validated,
                AbstractType::of(&[ty, values::ERROR]),
            );
        } else {
            AbstractType::of(&[ty, values::ERROR])
        };
        (dst, out)
    }

    /// `5 apples`, or a signature annotation met in value position.
    fn compile_type_suffix(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        type_node: &TypeNode,
        args: &[Node],
    ) -> (Reg, AbstractType) {
        if let TypeNode::DotDotDot { right: None, .. } = type_node {
            let (src, _) = self.compile_expression(vm, ctx, &args[0]);
            let tok = vm.add_token(token.clone());
            let dst = ctx.rx();
            emit(vm, Op::Spread { dst, src, tok });
            return (dst, AbstractType::single(values::TUPLE));
        }
        let resolved = self.resolve_type(vm, type_node);
        match resolved.only() {
            Some(ty) => self.construct(vm, ctx, token, ty, args),
            None => {
                self.err("parse/type/exists", token, &[&type_node.to_string()]);
                self.dummy(ctx)
            }
        }
    }

    fn compile_log(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        kind: LogKind,
        parts: &[Node],
        left: Option<&Node>,
        right: Option<&Node>,
    ) -> (Reg, AbstractType) {
        match kind {
            LogKind::Pre => {
                self.emit_log_record(vm, ctx, token, parts);
                match right {
                    Some(r) => self.compile_expression(vm, ctx, r),
                    None => self.load_const(vm, ctx, Value::ok()),
                }
            }
            LogKind::Plain => {
                let result = match left {
                    Some(l) => self.compile_expression(vm, ctx, l),
                    None => self.load_const(vm, ctx, Value::ok()),
                };
                self.emit_log_record(vm, ctx, token, parts);
                result
            }
            LogKind::If => {
                let cond = left.expect("iflog without a condition");
                let value = right.expect("iflog without a body");
                self.compile_conditional(vm, ctx, token, cond, value, Some(parts))
            }
        }
    }

    /// Emit a literal-flavor tracking record for a `\\` log. The parts are
    /// the bar-split text: `|…|` embeddings evaluate in the enclosing scope
    /// and interpolate into the message.
    fn emit_log_record(&mut self, vm: &mut Vm, ctx: &mut Ctx, token: &Token, parts: &[Node]) {
        let tok = vm.add_token(token.clone());
        let reg = self.compile_log_string(vm, ctx, parts);
        emit(
            vm,
            Op::Track {
                flavor: TrackingFlavor::Literal,
                tok,
                args: vec![TrackOperand::Reg(reg)],
                log_to: self.log_to_slot,
                log_time: self.log_time_slot,
            },
        );
    }

    fn compile_log_string(&mut self, vm: &mut Vm, ctx: &mut Ctx, parts: &[Node]) -> Reg {
        let mut acc: Option<Reg> = None;
        for part in parts {
            let (reg, ty) = self.compile_expression(vm, ctx, part);
            let piece = if ty.only() == Some(values::STRING) {
                reg
            } else {
                let dst = ctx.rx();
                emit(vm, Op::LitStr { dst, src: reg });
                dst
            };
            acc = Some(match acc {
                None => piece,
                Some(prev) => {
                    let dst = ctx.rx();
                    emit(vm, Op::Cat { dst, a: prev, b: piece });
                    dst
                }
            });
        }
        match acc {
            Some(reg) => reg,
            None => {
                let c = vm.add_const(Value::string(""));
                let dst = ctx.rx();
                emit(vm, Op::LoadC { dst, c });
                dst
            }
        }
    }

    fn compile_break(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        value: Option<&Node>,
    ) -> (Reg, AbstractType) {
        if ctx.loops.is_empty() {
            self.err("comp/break", token, &[]);
            return self.dummy(ctx);
        }
        let (value_reg, _) = match value {
            Some(v) => self.compile_expression(vm, ctx, v),
            None => self.load_const(vm, ctx, Value::ok()),
        };
        let result = ctx.loops.last().expect("loop context").result;
        emit(vm, Op::Mov { dst: result, src: value_reg });
        let at = here(vm);
        emit(vm, Op::Jmp { to: 0 });
        ctx.loops.last_mut().expect("loop context").break_patches.push(at);
        // A break produces no value in place; its position is unreachable.
        self.load_const(vm, ctx, Value::unsat())
    }

    fn compile_continue(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
    ) -> (Reg, AbstractType) {
        if ctx.loops.is_empty() {
            self.err("comp/continue", token, &[]);
            return self.dummy(ctx);
        }
        let at = here(vm);
        emit(vm, Op::Jmp { to: 0 });
        ctx.loops
            .last_mut()
            .expect("loop context")
            .continue_patches
            .push(at);
        self.load_const(vm, ctx, Value::unsat())
    }
}

/// Flatten a comma chain into its value items, dropping the separators.
pub fn flatten_comma(node: &Node) -> Vec<Node> {
    match node {
        Node::Infix { operator, args, .. } if operator == "," => {
            let mut out = flatten_comma(&args[0]);
            out.extend(flatten_comma(&args[2]));
            out
        }
        Node::Nothing { .. } => Vec::new(),
        other => vec![other.clone()],
    }
}

/// Does this statement's value depend on a guard?
fn is_conditional(node: &Node) -> bool {
    matches!(node, Node::LazyInfix { operator, .. } if operator == ":")
        || matches!(node, Node::TryExpr { .. })
        || matches!(node, Node::LogExpr { kind: LogKind::If, .. })
}

/// Flatten `;`/newline chains into statements, for given blocks and
/// command bodies.
pub fn flatten_statements(node: &Node) -> Vec<Node> {
    match node {
        Node::LazyInfix {
            operator,
            left,
            right,
            ..
        } if operator == ";" => {
            let mut out = flatten_statements(left);
            out.extend(flatten_statements(right));
            out
        }
        other => vec![other.clone()],
    }
}

/// Reconstruct enough of an expression's source text for tracking output.
pub fn render_source(node: &Node) -> String {
    match node {
        Node::Ident { name, .. } => name.clone(),
        Node::IntLit { value, .. } => value.to_string(),
        Node::FloatLit { value, .. } => value.to_string(),
        Node::StringLit { value, .. } => format!("{:?}", value),
        Node::RuneLit { value, .. } => format!("'{}'", value),
        Node::BoolLit { value, .. } => value.to_string(),
        Node::Infix { operator, args, .. } => {
            let rendered: Vec<String> = args
                .iter()
                .filter(|a| !matches!(a, Node::Bling { .. }))
                .map(render_source)
                .collect();
            rendered.join(&format!(" {} ", operator))
        }
        Node::Comparison {
            operator,
            left,
            right,
            ..
        } => format!("{} {} {}", render_source(left), operator, render_source(right)),
        Node::Prefix { operator, args, .. } => {
            let rendered: Vec<String> = args
                .iter()
                .filter(|a| !matches!(a, Node::Bling { .. }))
                .map(render_source)
                .collect();
            format!("{} {}", operator, rendered.join(", "))
        }
        Node::Suffix { operator, args, .. } => {
            let rendered: Vec<String> = args.iter().map(render_source).collect();
            format!("{} {}", rendered.join(", "), operator)
        }
        other => other.to_string(),
    }
}

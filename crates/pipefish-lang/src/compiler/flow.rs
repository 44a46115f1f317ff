//! Assignment, loops and lambdas.
//!
//! A `for` expression compiles to the state machine initialize → test →
//! body → update → test …; `break expr` transitions straight to the exit
//! with the expression's value and `continue` to the update step. The
//! range form iterates a precomputed list of key::value pairs, which gives
//! lists iteration by index, strings by rune, maps in insertion order and
//! sets in canonical order with one shape of generated code.

use super::{emit, here, patch_jump, push_global, Compiler, Ctx, GlobalInfo, LoopCtx};
use crate::ast::{AstSig, Node, TypeNode};
use indexmap::IndexSet;
use pipefish_foundation::token::Token;
use pipefish_vm::values::{self, AbstractType, Value};
use pipefish_vm::{Op, Reg, Vm};

impl Compiler {
    /// An assignment statement. Yields `OK`.
    pub fn compile_assignment(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        left: &Node,
        right: &Node,
    ) -> (Reg, AbstractType) {
        let targets = match lhs_signature(left) {
            Some(t) => t,
            None => {
                self.err("parse/sig/a", left.token(), &[]);
                return self.dummy(ctx);
            }
        };
        let (rhs, rhs_ty) = self.compile_expression(vm, ctx, right);
        if targets.len() == 1 {
            let (name, tn) = &targets[0];
            self.assign_one(vm, ctx, token, name, tn.as_ref(), rhs, &rhs_ty);
        } else {
            let tok = vm.add_token(token.clone());
            for (i, (name, tn)) in targets.iter().enumerate() {
                let c = vm.add_const(Value::int(i as i64));
                let idx = ctx.rx();
                emit(vm, Op::LoadC { dst: idx, c });
                let item = ctx.rx();
                emit(vm, Op::Index { dst: item, container: rhs, index: idx, tok });
                let item_ty = self.any_type(vm);
                self.assign_one(vm, ctx, token, name, tn.as_ref(), item, &item_ty);
            }
        }
        self.load_const(vm, ctx, Value::ok())
    }

    fn assign_one(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        name: &str,
        tn: Option<&TypeNode>,
        src: Reg,
        src_ty: &AbstractType,
    ) {
        if let Some(local) = ctx.lookup(name) {
            emit(vm, Op::Mov { dst: local.reg, src });
            return;
        }
        let qualified = if ctx.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}{}", ctx.namespace, name)
        };
        let existing = self
            .globals
            .get(&qualified)
            .or_else(|| self.globals.get(name))
            .cloned();
        if let Some(global) = existing {
            if global.constant {
                self.err("comp/assign/const", token, &[name]);
                return;
            }
            if !src_ty.is_empty() && global.types.intersect(src_ty).is_empty() {
                let desc = vm.describe_type(src_ty);
                self.err("comp/assign/type", token, &[name, &desc]);
                return;
            }
            emit(vm, Op::StoreG { g: global.slot, src });
            return;
        }
        if ctx.allow_new_globals {
            let types = match tn {
                Some(tn) => self.resolve_type(vm, tn),
                None => {
                    let mut t = self.any_type(vm);
                    t.insert(values::NULL);
                    t
                }
            };
            let slot = push_global(vm, Value::null());
            self.globals.insert(
                qualified,
                GlobalInfo {
                    slot,
                    types,
                    constant: false,
                },
            );
            emit(vm, Op::StoreG { g: slot, src });
            return;
        }
        // A fresh local, as in a for-initializer or a given block.
        let types = match tn {
            Some(tn) => self.resolve_type(vm, tn),
            None => src_ty.clone(),
        };
        let reg = ctx.rx();
        emit(vm, Op::Mov { dst: reg, src });
        ctx.bind(name, reg, types);
    }

    /// A lambda: captures by value whatever of the enclosing scope its body
    /// mentions, laid out after the parameters.
    pub fn compile_lambda(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        sig: &AstSig,
        body: &Node,
        given: Option<&Node>,
    ) -> (Reg, AbstractType) {
        // Names the lambda binds itself.
        let mut bound: IndexSet<String> = sig.iter().map(|p| p.name.clone()).collect();
        if let Some(g) = given {
            for statement in super::expr::flatten_statements(g) {
                if let Node::Assignment { left, .. } = &statement {
                    if let Some(targets) = lhs_signature(left) {
                        for (name, _) in targets {
                            bound.insert(name);
                        }
                    }
                }
            }
        }
        let mut free = IndexSet::new();
        collect_idents(body, &mut free);
        if let Some(g) = given {
            collect_idents(g, &mut free);
        }
        let visible = ctx.visible();
        let captured: Vec<(String, super::LocalInfo)> = free
            .iter()
            .filter(|name| !bound.contains(*name))
            .filter_map(|name| visible.get(name).map(|info| (name.clone(), info.clone())))
            .collect();

        let jump_over = here(vm);
        emit(vm, Op::Jmp { to: 0 });
        let entry = here(vm);
        let mut inner = Ctx::new(&ctx.namespace);
        inner.cmd = ctx.cmd;
        for pair in sig {
            let reg = inner.rx();
            let types = self.resolve_type(vm, &pair.ty);
            inner.bind(&pair.name, reg, types);
        }
        for (name, info) in &captured {
            let reg = inner.rx();
            inner.bind(name, reg, info.types.clone());
        }
        if let Some(g) = given {
            inner.push_scope();
            self.compile_given(vm, &mut inner, g);
        }
        let (result, _) = self.compile_expression(vm, &mut inner, body);
        emit(vm, Op::Ret { src: result });
        patch_jump(vm, jump_over, here(vm));

        let func_ix = vm.functions.len();
        vm.functions.push(pipefish_vm::FuncInfo {
            name: "lambda".to_string(),
            addr: entry,
            arity: sig.len() as u32,
            captures: captured.len() as u32,
            frame_size: inner.frame_size(),
        });
        let first = ctx.block(captured.len() as u32);
        for (i, (_, info)) in captured.iter().enumerate() {
            emit(vm, Op::Mov { dst: first + i as u32, src: info.reg });
        }
        let dst = ctx.rx();
        emit(
            vm,
            Op::MkFunc { dst, func: func_ix as u32, first, n: captured.len() as u32 },
        );
        (dst, AbstractType::single(values::FUNC))
    }

    /// The for-loop state machine.
    pub fn compile_for(&mut self, vm: &mut Vm, ctx: &mut Ctx, node: &Node) -> (Reg, AbstractType) {
        let (token, initializer, condition, update, body, bound, given) = match node {
            Node::ForExpr {
                token,
                initializer,
                condition,
                update,
                body,
                bound,
                given,
            } => (token, initializer, condition, update, body, bound, given),
            _ => unreachable!("compile_for on a non-for node"),
        };
        let tok = vm.add_token(token.clone());
        ctx.push_scope();
        if let Some(g) = given {
            self.compile_given(vm, ctx, g);
        }
        // Accumulators from the `from` clause become loop-local bindings.
        let mut bound_names: Vec<String> = Vec::new();
        if let Some(b) = bound {
            if let Node::Assignment { token, left, right } = b.as_ref() {
                let targets = match lhs_signature(left) {
                    Some(t) => t,
                    None => {
                        self.err("parse/sig/a", left.token(), &[]);
                        Vec::new()
                    }
                };
                let (rhs, rhs_ty) = self.compile_expression(vm, ctx, right);
                if targets.len() == 1 {
                    let (name, _) = &targets[0];
                    let reg = ctx.rx();
                    emit(vm, Op::Mov { dst: reg, src: rhs });
                    ctx.bind(name, reg, rhs_ty);
                    bound_names.push(name.clone());
                } else {
                    let unpack_tok = vm.add_token(token.clone());
                    for (i, (name, _)) in targets.iter().enumerate() {
                        let c = vm.add_const(Value::int(i as i64));
                        let idx = ctx.rx();
                        emit(vm, Op::LoadC { dst: idx, c });
                        let reg = ctx.rx();
                        emit(
                            vm,
                            Op::Index { dst: reg, container: rhs, index: idx, tok: unpack_tok },
                        );
                        ctx.bind(name, reg, self.any_type(vm));
                        bound_names.push(name.clone());
                    }
                }
            } else {
                self.err("parse/sig/a", b.token(), &[]);
            }
        }
        let result = ctx.rx();
        ctx.loops.push(LoopCtx {
            result,
            break_patches: Vec::new(),
            continue_patches: Vec::new(),
        });

        // Distinguish the range form: `for k::v = range xs : …`.
        let range_form = condition.as_ref().and_then(|c| match c.as_ref() {
            Node::Assignment { left, right, .. } => match right.as_ref() {
                Node::Prefix { operator, args, .. } if operator == "range" => {
                    Some((left.as_ref().clone(), args[0].clone()))
                }
                _ => None,
            },
            _ => None,
        });

        let exit_patches;
        let continue_target;
        if let Some((binding, iterable)) = range_form {
            // Range loop: iterate the pair list of the iterable.
            let (src, _) = self.compile_expression(vm, ctx, &iterable);
            let pairs = ctx.rx();
            emit(vm, Op::Pairs { dst: pairs, src, tok });
            let length = ctx.rx();
            emit(vm, Op::Len { dst: length, src: pairs, tok });
            let zero = vm.add_const(Value::int(0));
            let one = vm.add_const(Value::int(1));
            let counter = ctx.rx();
            emit(vm, Op::LoadC { dst: counter, c: zero });
            let one_reg = ctx.rx();
            emit(vm, Op::LoadC { dst: one_reg, c: one });
            let (key_name, value_name) = range_binding_names(&binding);
            let key_reg = ctx.rx();
            let value_reg = ctx.rx();
            if let Some(name) = &key_name {
                ctx.bind(name, key_reg, self.any_type(vm));
            }
            if let Some(name) = &value_name {
                ctx.bind(name, value_reg, self.any_type(vm));
            }
            let pair_reg = ctx.rx();
            let zero_reg = ctx.rx();
            let one_ix_reg = ctx.rx();
            let cmp = ctx.rx();

            let test = here(vm);
            emit(vm, Op::Lt { dst: cmp, a: counter, b: length });
            let exit = here(vm);
            emit(vm, Op::Qtru { src: cmp, to: 0 });
            emit(vm, Op::Index { dst: pair_reg, container: pairs, index: counter, tok });
            emit(vm, Op::LoadC { dst: zero_reg, c: zero });
            emit(vm, Op::LoadC { dst: one_ix_reg, c: one });
            emit(vm, Op::Index { dst: key_reg, container: pair_reg, index: zero_reg, tok });
            emit(vm, Op::Index { dst: value_reg, container: pair_reg, index: one_ix_reg, tok });
            let (body_reg, _) = self.compile_expression(vm, ctx, body);
            self.rebind_accumulators(vm, ctx, &bound_names, body_reg, tok);
            let update = here(vm);
            emit(vm, Op::Addi { dst: counter, a: counter, b: one_reg });
            emit(vm, Op::Jmp { to: test as u32 });
            exit_patches = vec![exit];
            continue_target = update;
        } else {
            // Initialize → test → body → update → test …
            if let Some(init) = initializer {
                if let Node::Assignment { token, left, right } = init.as_ref() {
                    let _ = self.compile_assignment(vm, ctx, token, left, right);
                } else {
                    let _ = self.compile_expression(vm, ctx, init);
                }
            }
            let test = here(vm);
            let exit = match condition {
                Some(cond) => {
                    let (cond_reg, cond_ty) = self.compile_expression(vm, ctx, cond);
                    if !cond_ty.contains(values::BOOL) && !cond_ty.is_empty() {
                        self.err("comp/bool/cond", cond.token(), &[]);
                    }
                    let at = here(vm);
                    emit(vm, Op::Qtru { src: cond_reg, to: 0 });
                    Some(at)
                }
                None => None,
            };
            let (body_reg, _) = self.compile_expression(vm, ctx, body);
            self.rebind_accumulators(vm, ctx, &bound_names, body_reg, tok);
            let update_addr = here(vm);
            if let Some(up) = update {
                if let Node::Assignment { token, left, right } = up.as_ref() {
                    let _ = self.compile_assignment(vm, ctx, token, left, right);
                } else {
                    let _ = self.compile_expression(vm, ctx, up);
                }
            }
            emit(vm, Op::Jmp { to: test as u32 });
            exit_patches = exit.into_iter().collect();
            continue_target = if update.is_some() { update_addr } else { test };
        }

        for at in &exit_patches {
            patch_jump(vm, *at, here(vm));
        }
        // The loop's value: the accumulators (or OK), unless a break
        // supplied one directly.
        if bound_names.len() == 1 {
            if let Some(local) = ctx.lookup(&bound_names[0]) {
                emit(vm, Op::Mov { dst: result, src: local.reg });
            }
        } else if bound_names.len() > 1 {
            let first = ctx.block(bound_names.len() as u32);
            for (i, name) in bound_names.iter().enumerate() {
                if let Some(local) = ctx.lookup(name) {
                    emit(vm, Op::Mov { dst: first + i as u32, src: local.reg });
                }
            }
            emit(vm, Op::MkTuple { dst: result, first, n: bound_names.len() as u32 });
        } else {
            let ok = vm.add_const(Value::ok());
            emit(vm, Op::LoadC { dst: result, c: ok });
        }
        let done = here(vm);
        let loop_ctx = ctx.loops.pop().expect("loop context");
        for at in loop_ctx.break_patches {
            patch_jump(vm, at, done);
        }
        for at in loop_ctx.continue_patches {
            patch_jump(vm, at, continue_target);
        }
        ctx.pop_scope();
        (result, self.any_type(vm))
    }

    /// After a body evaluation, rebind the `from` accumulators to the
    /// body's value (a tuple when there are several).
    fn rebind_accumulators(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        bound_names: &[String],
        body_reg: Reg,
        tok: u32,
    ) {
        match bound_names.len() {
            0 => {}
            1 => {
                if let Some(local) = ctx.lookup(&bound_names[0]) {
                    emit(vm, Op::Mov { dst: local.reg, src: body_reg });
                }
            }
            _ => {
                for (i, name) in bound_names.iter().enumerate() {
                    let c = vm.add_const(Value::int(i as i64));
                    let idx = ctx.rx();
                    emit(vm, Op::LoadC { dst: idx, c });
                    if let Some(local) = ctx.lookup(name) {
                        emit(
                            vm,
                            Op::Index { dst: local.reg, container: body_reg, index: idx, tok },
                        );
                    }
                }
            }
        }
    }
}

/// Extract assignment targets: names with optional type annotations.
pub fn lhs_signature(node: &Node) -> Option<Vec<(String, Option<TypeNode>)>> {
    match node {
        Node::Ident { name, .. } => Some(vec![(name.clone(), None)]),
        Node::TypeSuffix {
            type_node, args, ..
        } => {
            let mut out = Vec::new();
            for arg in args {
                match arg {
                    Node::Ident { name, .. } => {
                        out.push((name.clone(), Some(type_node.clone())))
                    }
                    _ => return None,
                }
            }
            Some(out)
        }
        Node::Infix { operator, args, .. } if operator == "," => {
            let mut out = lhs_signature(&args[0])?;
            out.extend(lhs_signature(&args[2])?);
            Some(out)
        }
        // `k::v` in a range header.
        Node::Infix { operator, args, .. } if operator == "::" => {
            let mut out = lhs_signature(&args[0])?;
            out.extend(lhs_signature(args.last()?)?);
            Some(out)
        }
        Node::Prefix { operator, .. } => Some(vec![(operator.clone(), None)]),
        _ => None,
    }
}

/// The key/value names bound by a range header.
fn range_binding_names(binding: &Node) -> (Option<String>, Option<String>) {
    match binding {
        Node::Infix { operator, args, .. } if operator == "::" => {
            let key = match &args[0] {
                Node::Ident { name, .. } => Some(name.clone()),
                _ => None,
            };
            let value = match args.last() {
                Some(Node::Ident { name, .. }) => Some(name.clone()),
                _ => None,
            };
            (key, value)
        }
        Node::Ident { name, .. } => (None, Some(name.clone())),
        _ => (None, None),
    }
}

/// Collect every identifier mentioned in an expression, including function
/// names in application position, for capture analysis.
pub fn collect_idents(node: &Node, out: &mut IndexSet<String>) {
    match node {
        Node::Ident { name, .. } => {
            out.insert(name.clone());
        }
        Node::Unfix { operator, .. } => {
            out.insert(operator.clone());
        }
        Node::Prefix { operator, args, .. }
        | Node::Infix { operator, args, .. }
        | Node::Suffix { operator, args, .. } => {
            out.insert(operator.clone());
            for a in args {
                collect_idents(a, out);
            }
        }
        Node::ListExpr { inner, .. } => collect_idents(inner, out),
        Node::SnippetLit { parts, .. } => {
            for p in parts {
                collect_idents(p, out);
            }
        }
        Node::LazyInfix { left, right, .. } | Node::Comparison { left, right, .. } => {
            collect_idents(left, out);
            collect_idents(right, out);
        }
        Node::IndexExpr { left, index, .. } => {
            collect_idents(left, out);
            collect_idents(index, out);
        }
        Node::Piping { left, right, .. } => {
            collect_idents(left, out);
            collect_idents(right, out);
        }
        Node::Assignment { left, right, .. } => {
            collect_idents(left, out);
            collect_idents(right, out);
        }
        Node::ForExpr {
            initializer,
            condition,
            update,
            body,
            bound,
            given,
            ..
        } => {
            for part in [initializer, condition, update, bound, given]
                .into_iter()
                .flatten()
            {
                collect_idents(part, out);
            }
            collect_idents(body, out);
        }
        Node::TryExpr { right, .. } => collect_idents(right, out),
        Node::FuncExpr { body, given, .. } => {
            collect_idents(body, out);
            if let Some(g) = given {
                collect_idents(g, out);
            }
        }
        Node::TypePrefix { args, .. } => {
            for a in args {
                collect_idents(a, out);
            }
        }
        Node::TypeSuffix { args, .. } => {
            for a in args {
                collect_idents(a, out);
            }
        }
        Node::LogExpr {
            parts, left, right, ..
        } => {
            for p in parts {
                collect_idents(p, out);
            }
            if let Some(l) = left {
                collect_idents(l, out);
            }
            if let Some(r) = right {
                collect_idents(r, out);
            }
        }
        Node::BreakExpr { value, .. } => {
            if let Some(v) = value {
                collect_idents(v, out);
            }
        }
        Node::IntLit { .. }
        | Node::FloatLit { .. }
        | Node::StringLit { .. }
        | Node::RuneLit { .. }
        | Node::BoolLit { .. }
        | Node::Bling { .. }
        | Node::TypeExpr { .. }
        | Node::TypeLit { .. }
        | Node::GolangExpr { .. }
        | Node::ContinueExpr { .. }
        | Node::Nothing { .. } => {}
    }
}

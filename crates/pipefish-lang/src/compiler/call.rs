//! Call-site dispatch.
//!
//! A function name maps to its overloads; a call site compiles to a chain
//! of runtime type tests that picks the first overload, in
//! most-specific-first order, whose parameter types admit the arguments.
//! Arguments whose static type already decides a test compile to nothing;
//! if every test of the first viable overload is decided statically, the
//! chain is a single direct call. The chain ends in a fall-through slot
//! that raises `vm/dispatch` — the initializer patches dispatch through it
//! when a later declaration satisfies the call.

use super::{emit, here, patch_jump, Compiler, Ctx, FnBody, FnDef};
use crate::initializer::is_universal;
use crate::ast::Node;
use pipefish_foundation::token::Token;
use pipefish_vm::values::{self, AbstractType, Value};
use pipefish_vm::{Op, Reg, Vm};

/// A call-site argument.
enum ArgItem {
    Value(Reg, AbstractType),
    Bling(String),
}

/// How one overload relates to the call site's static types.
struct Candidate {
    def: FnDef,
    /// Per value-argument: the parameter type it must satisfy.
    wants: Vec<AbstractType>,
    /// Indices of the value arguments needing a runtime test.
    tests: Vec<usize>,
}

impl Compiler {
    pub fn compile_call(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        token: &Token,
        operator: &str,
        args: &[Node],
    ) -> (Reg, AbstractType) {
        // Compile arguments, keeping bling words as markers.
        let mut items = Vec::new();
        for arg in args {
            match arg {
                Node::Bling { value, .. } => items.push(ArgItem::Bling(value.clone())),
                other => {
                    let (reg, ty) = self.compile_expression(vm, ctx, other);
                    items.push(ArgItem::Value(reg, ty));
                }
            }
        }
        let overloads = self
            .qualified_names(ctx, token, operator)
            .into_iter()
            .find_map(|key| self.functions.get(&key).cloned());
        let overloads = match overloads {
            Some(o) => o,
            None => {
                self.err("comp/call", token, &[operator]);
                return self.dummy(ctx);
            }
        };

        let values_at: Vec<(Reg, AbstractType)> = items
            .iter()
            .filter_map(|i| match i {
                ArgItem::Value(reg, ty) => Some((*reg, ty.clone())),
                ArgItem::Bling(_) => None,
            })
            .collect();

        // Keep the overloads whose shape and static types admit the site.
        let mut candidates = Vec::new();
        'overloads: for def in overloads {
            let wants = match self.shape_match(&def, &items) {
                Some(w) => w,
                None => continue,
            };
            let mut tests = Vec::new();
            for (i, (_, arg_ty)) in values_at.iter().enumerate() {
                let builtin = matches!(def.body, FnBody::Builtin(_));
                let arg_ty = if builtin {
                    self.widen(vm, arg_ty)
                } else {
                    arg_ty.clone()
                };
                let want = if builtin {
                    self.including_clones(vm, &wants[i])
                } else {
                    wants[i].clone()
                };
                if is_universal(&want) || arg_ty.is_empty() || arg_ty.is_subtype_of(&want) {
                    continue;
                }
                if arg_ty.intersect(&want).is_empty() {
                    continue 'overloads;
                }
                tests.push(i);
            }
            candidates.push(Candidate { def, wants, tests });
        }
        if candidates.is_empty() {
            self.err("comp/call", token, &[operator]);
            return self.dummy(ctx);
        }
        // Most specific first, so narrower signatures shadow wider ones.
        candidates.sort_by(|a, b| {
            let a_in_b = subsignature(&a.wants, &b.wants);
            let b_in_a = subsignature(&b.wants, &a.wants);
            match (a_in_b, b_in_a) {
                (true, false) => std::cmp::Ordering::Less,
                (false, true) => std::cmp::Ordering::Greater,
                _ => std::cmp::Ordering::Equal,
            }
        });

        // Copy the value arguments into one contiguous block.
        let n = values_at.len() as u32;
        let block = ctx.block(n);
        for (i, (reg, _)) in values_at.iter().enumerate() {
            emit(vm, Op::Mov { dst: block + i as u32, src: *reg });
        }
        let tok = vm.add_token(token.clone());
        let result = ctx.rx();

        let mut end_jumps = Vec::new();
        let mut out_ty = AbstractType::new();
        let mut closed = false;
        for candidate in &candidates {
            let mut next_jumps = Vec::new();
            for &i in &candidate.tests {
                let want = if matches!(candidate.def.body, FnBody::Builtin(_)) {
                    self.including_clones(vm, &candidate.wants[i])
                } else {
                    candidate.wants[i].clone()
                };
                let at = here(vm);
                emit(vm, Op::Qtyp { src: block + i as u32, types: want, to: 0 });
                next_jumps.push(at);
            }
            self.emit_target(vm, ctx, candidate, block, n, result, tok, &values_at);
            out_ty = out_ty.union(&candidate.def.rets);
            if candidate.tests.is_empty() {
                // Unconditional: later candidates are shadowed.
                closed = true;
                for at in next_jumps {
                    patch_jump(vm, at, here(vm));
                }
                break;
            }
            end_jumps.push(here(vm));
            emit(vm, Op::Jmp { to: 0 });
            let next = here(vm);
            for at in next_jumps {
                patch_jump(vm, at, next);
            }
        }
        if !closed {
            emit(
                vm,
                Op::MkErr {
                    dst: result,
                    id: "vm/dispatch".to_string(),
                    tok,
                    args: Vec::new(),
                },
            );
            out_ty.insert(values::ERROR);
        }
        for at in end_jumps {
            patch_jump(vm, at, here(vm));
        }
        (result, out_ty)
    }

    /// Check bling words and arity; on success return the parameter type
    /// wanted at each value-argument position.
    fn shape_match(&self, def: &FnDef, items: &[ArgItem]) -> Option<Vec<AbstractType>> {
        let mut wants = Vec::new();
        let mut sig_iter = def.sig.iter().peekable();
        let mut item_iter = items.iter().peekable();
        loop {
            match (sig_iter.peek(), item_iter.peek()) {
                (None, None) => return Some(wants),
                (Some(param), _) if param.variadic => {
                    // The rest of the arguments satisfy the variadic type.
                    for item in item_iter {
                        match item {
                            ArgItem::Value(_, _) => wants.push(param.types.clone()),
                            ArgItem::Bling(_) => return None,
                        }
                    }
                    return Some(wants);
                }
                (Some(param), Some(item)) => match (&param.bling, item) {
                    (Some(word), ArgItem::Bling(arg_word)) if word == arg_word => {
                        sig_iter.next();
                        item_iter.next();
                    }
                    (None, ArgItem::Value(_, _)) => {
                        wants.push(param.types.clone());
                        sig_iter.next();
                        item_iter.next();
                    }
                    _ => return None,
                },
                _ => return None,
            }
        }
    }

    /// Emit the actual call (or builtin operation) of one overload.
    #[allow(clippy::too_many_arguments)]
    fn emit_target(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        candidate: &Candidate,
        block: Reg,
        n: u32,
        result: Reg,
        tok: u32,
        values_at: &[(Reg, AbstractType)],
    ) {
        match &candidate.def.body {
            FnBody::Builtin(tag) => {
                let tag = tag.clone();
                let types: Vec<AbstractType> =
                    values_at.iter().map(|(_, t)| t.clone()).collect();
                self.emit_builtin(vm, ctx, &tag, block, n, result, tok, &types);
            }
            FnBody::Code { .. } => {
                let fixed = candidate
                    .def
                    .sig
                    .iter()
                    .filter(|p| p.bling.is_none() && !p.variadic)
                    .count() as u32;
                let has_variadic = candidate.def.sig.iter().any(|p| p.variadic);
                if has_variadic {
                    // Collect the extras into a tuple in a fresh block.
                    let call_block = ctx.block(fixed + 1);
                    for i in 0..fixed {
                        emit(vm, Op::Mov { dst: call_block + i, src: block + i });
                    }
                    emit(
                        vm,
                        Op::MkTuple {
                            dst: call_block + fixed,
                            first: block + fixed,
                            n: n - fixed,
                        },
                    );
                    emit(
                        vm,
                        Op::Call {
                            func: candidate.def.func_ix as u32,
                            dst: result,
                            first_arg: call_block,
                            n: fixed + 1,
                        },
                    );
                } else {
                    emit(
                        vm,
                        Op::Call {
                            func: candidate.def.func_ix as u32,
                            dst: result,
                            first_arg: block,
                            n,
                        },
                    );
                }
            }
        }
    }

    /// Emit the operation for a builtin tag over a contiguous block of
    /// arguments.
    #[allow(clippy::too_many_arguments)]
    fn emit_builtin(
        &mut self,
        vm: &mut Vm,
        ctx: &mut Ctx,
        tag: &str,
        block: Reg,
        n: u32,
        result: Reg,
        tok: u32,
        types: &[AbstractType],
    ) {
        let a = block;
        let b = block + 1;
        // Clone arithmetic keeps the clone's type.
        let clone_of = |this: &Compiler, vm: &Vm| -> Option<pipefish_vm::ValueType> {
            let first = types.first()?.only()?;
            if !vm.registry.info(first).is_clone() {
                return None;
            }
            if types.len() > 1 && types.get(1)?.only() != Some(first) {
                return None;
            }
            let _ = this;
            Some(first)
        };
        match tag {
            "addi" => emit(vm, Op::Addi { dst: result, a, b }),
            "subi" => emit(vm, Op::Subi { dst: result, a, b }),
            "muli" => emit(vm, Op::Muli { dst: result, a, b }),
            "addf" => emit(vm, Op::Addf { dst: result, a, b }),
            "subf" => emit(vm, Op::Subf { dst: result, a, b }),
            "mulf" => emit(vm, Op::Mulf { dst: result, a, b }),
            "addif" | "subif" | "mulif" | "divif" => {
                let t = ctx.rx();
                emit(vm, Op::Itof { dst: t, src: a });
                match tag {
                    "addif" => emit(vm, Op::Addf { dst: result, a: t, b }),
                    "subif" => emit(vm, Op::Subf { dst: result, a: t, b }),
                    "mulif" => emit(vm, Op::Mulf { dst: result, a: t, b }),
                    _ => emit(vm, Op::Divf { dst: result, a: t, b, tok }),
                }
            }
            "addfi" | "subfi" | "mulfi" | "divfi" => {
                let t = ctx.rx();
                emit(vm, Op::Itof { dst: t, src: b });
                match tag {
                    "addfi" => emit(vm, Op::Addf { dst: result, a, b: t }),
                    "subfi" => emit(vm, Op::Subf { dst: result, a, b: t }),
                    "mulfi" => emit(vm, Op::Mulf { dst: result, a, b: t }),
                    _ => emit(vm, Op::Divf { dst: result, a, b: t, tok }),
                }
            }
            "divi" => emit(vm, Op::Divi { dst: result, a, b, tok }),
            "divf" => emit(vm, Op::Divf { dst: result, a, b, tok }),
            "idiv" => emit(vm, Op::Idiv { dst: result, a, b, tok }),
            "modi" => emit(vm, Op::Modi { dst: result, a, b, tok }),
            "negi" => emit(vm, Op::Negi { dst: result, src: a }),
            "negf" => emit(vm, Op::Negf { dst: result, src: a }),
            "cat" => emit(vm, Op::Cat { dst: result, a, b }),
            "addlist" => emit(vm, Op::AddList { dst: result, a, b }),
            "addset" => emit(vm, Op::AddSet { dst: result, a, b }),
            "addelt" => emit(vm, Op::AddElt { dst: result, a, b, tok }),
            "lt" => emit(vm, Op::Lt { dst: result, a, b }),
            "le" => emit(vm, Op::Le { dst: result, a, b }),
            "gt" => emit(vm, Op::Gt { dst: result, a, b }),
            "ge" => emit(vm, Op::Ge { dst: result, a, b }),
            "ltif" | "leif" | "gtif" | "geif" => {
                let t = ctx.rx();
                emit(vm, Op::Itof { dst: t, src: a });
                match tag {
                    "ltif" => emit(vm, Op::Lt { dst: result, a: t, b }),
                    "leif" => emit(vm, Op::Le { dst: result, a: t, b }),
                    "gtif" => emit(vm, Op::Gt { dst: result, a: t, b }),
                    _ => emit(vm, Op::Ge { dst: result, a: t, b }),
                }
            }
            "ltfi" | "lefi" | "gtfi" | "gefi" => {
                let t = ctx.rx();
                emit(vm, Op::Itof { dst: t, src: b });
                match tag {
                    "ltfi" => emit(vm, Op::Lt { dst: result, a, b: t }),
                    "lefi" => emit(vm, Op::Le { dst: result, a, b: t }),
                    "gtfi" => emit(vm, Op::Gt { dst: result, a, b: t }),
                    _ => emit(vm, Op::Ge { dst: result, a, b: t }),
                }
            }
            "mkpair" => emit(vm, Op::MkPair { dst: result, a, b }),
            "in" => emit(vm, Op::In { dst: result, needle: a, haystack: b, tok }),
            "len" => emit(vm, Op::Len { dst: result, src: a, tok }),
            "litstr" => emit(vm, Op::LitStr { dst: result, src: a }),
            "typeof" => emit(vm, Op::TypeOf { dst: result, src: a }),
            "cast_string" => emit(vm, Op::Cast { dst: result, src: a, ty: values::STRING, tok }),
            "cast_int" => emit(vm, Op::Cast { dst: result, src: a, ty: values::INT, tok }),
            "cast_float" => emit(vm, Op::Cast { dst: result, src: a, ty: values::FLOAT, tok }),
            "cast_rune" => emit(vm, Op::Cast { dst: result, src: a, ty: values::RUNE, tok }),
            "codepoint" => emit(vm, Op::Cast { dst: result, src: a, ty: values::INT, tok }),
            "castv" => emit(vm, Op::CastV { dst: result, src: a, tsrc: b, tok }),
            "tuple" => emit(vm, Op::MkTuple { dst: result, first: block, n }),
            "set" => emit(vm, Op::MkSet { dst: result, first: block, n }),
            "list" => emit(vm, Op::MkList { dst: result, first: block, n }),
            "map" => emit(vm, Op::MkMap { dst: result, first: block, n, tok }),
            "with" => emit(vm, Op::With { dst: result, src: a, first: b, n: n - 1, tok }),
            "first" => {
                let zero = vm.add_const(Value::int(0));
                let idx = ctx.rx();
                emit(vm, Op::LoadC { dst: idx, c: zero });
                emit(vm, Op::Index { dst: result, container: a, index: idx, tok });
            }
            "last" => {
                let length = ctx.rx();
                emit(vm, Op::Len { dst: length, src: a, tok });
                let one = vm.add_const(Value::int(1));
                let one_reg = ctx.rx();
                emit(vm, Op::LoadC { dst: one_reg, c: one });
                let idx = ctx.rx();
                emit(vm, Op::Subi { dst: idx, a: length, b: one_reg });
                emit(vm, Op::Index { dst: result, container: a, index: idx, tok });
            }
            "error" => emit(
                vm,
                Op::UserErr { dst: result, msg: a, tok, values: Vec::new() },
            ),
            "tunion" => {
                // Type union `A/B` in value position.
                emit(vm, Op::TypeUnion { dst: result, a, b });
            }
            _ => emit(
                vm,
                Op::MkErr {
                    dst: result,
                    id: "vm/dispatch".to_string(),
                    tok,
                    args: Vec::new(),
                },
            ),
        }
        if let Some(clone_ty) = clone_of(self, vm) {
            if matches!(
                tag,
                "addi" | "subi" | "muli" | "addf" | "subf" | "mulf" | "idiv" | "modi"
                    | "addlist" | "addset" | "addelt" | "cat"
            ) {
                emit(vm, Op::Retag { reg: result, ty: clone_ty });
            }
        }
    }
}

/// Is every position of `a` a subtype of the corresponding one of `b`?
/// A universal position is wider than everything.
fn subsignature(a: &[AbstractType], b: &[AbstractType]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| is_universal(y) || (!is_universal(x) && x.is_subtype_of(y)))
}

//! Expression lowering.
//!
//! Every node either compiles to a short native instruction sequence or
//! degrades to `EVAL_REF`/`EVAL_FALLBACK` wrapping the original node for the
//! host tree-walker. A node degrades when this crate has no opcode for its
//! semantics at all (string
//! literal construction — `Scope`'s scalar factories only cover
//! int/real/bool; class-based `is`/`is not`; range/list construction) or
//! when the shape actually used requires host-level null semantics
//! (`optional` field/index/call sites, `Elvis`) that no opcode in this set
//! tests for directly.

use std::rc::Rc;

use crate::ast::{AssignTarget, BinOp, CallArg, Expr, Literal, Stmt, UnOp};
use crate::bytecode::constant::ArgPlanEntry;
use crate::bytecode::{ArgsSpec, CallArgsPlan, ConstId, Constant, Instr, ScalarTy, SlotId};
use crate::span::Position;

use super::context::Ctx;
use super::error::CompileError;

/// The scalar channel a lowered value currently sits in. Plain code-gen
/// bookkeeping, not the runtime's own `LocalTag` (`crate::vm::frame`) —
/// this is only ever consulted by the compiler to pick the cheapest native
/// opcode, never read back by the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    Int,
    Real,
    Bool,
    Obj,
}

#[derive(Debug, Clone, Copy)]
pub struct Val {
    pub slot: SlotId,
    pub ty: Ty,
}

fn const_pos(ctx: &mut Ctx, pos: Position) -> ConstId {
    ctx.builder.add_const(Constant::PosVal(pos))
}

fn const_name(ctx: &mut Ctx, name: &str) -> ConstId {
    ctx.builder.add_const(Constant::Str(Rc::from(name)))
}

/// Box a value into the `Obj` channel if it isn't already there.
pub fn to_obj(ctx: &mut Ctx, v: Val) -> SlotId {
    match v.ty {
        Ty::Obj => v.slot,
        Ty::Int => {
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::BoxObj { dst, src: v.slot, src_ty: ScalarTy::Int });
            dst
        }
        Ty::Real => {
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::BoxObj { dst, src: v.slot, src_ty: ScalarTy::Real });
            dst
        }
        Ty::Bool => {
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::BoxObj { dst, src: v.slot, src_ty: ScalarTy::Bool });
            dst
        }
    }
}

fn to_bool(ctx: &mut Ctx, v: Val) -> SlotId {
    match v.ty {
        Ty::Bool => v.slot,
        Ty::Int => {
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::IntToBool { dst, src: v.slot });
            dst
        }
        Ty::Obj | Ty::Real => {
            let obj = to_obj(ctx, v);
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::ObjToBool { dst, src: obj });
            dst
        }
    }
}

/// Wrap `expr` whole for host evaluation (`EVAL_REF`).
fn fallback_ref(ctx: &mut Ctx, expr: &Expr) -> Val {
    let id = ctx.builder.add_const(Constant::Ref(Rc::new(expr.clone())));
    let dst = ctx.alloc_temp();
    ctx.builder.emit(Instr::EvalRef { reference: id, dst });
    Val { slot: dst, ty: Ty::Obj }
}

/// Wrap `expr` whole for host evaluation through the call-style fallback
/// protocol (`EVAL_FALLBACK`) — used for nodes whose payload is itself an
/// opaque callable construction (a function-value literal or bound method
/// slot reference), not a plain value.
fn fallback_eval(ctx: &mut Ctx, expr: &Expr) -> Val {
    let id = ctx.builder.add_const(Constant::Ref(Rc::new(expr.clone())));
    let dst = ctx.alloc_temp();
    ctx.builder.emit(Instr::EvalFallback { ast_id: id, dst });
    Val { slot: dst, ty: Ty::Obj }
}

/// Already-lowered call/method-call arguments could not find a native
/// dispatch opcode for their callee (an `optional` call, or one carrying a
/// trailing block argument); replay the call itself through the host while
/// keeping the already-evaluated argument values so side effects in
/// argument expressions are not duplicated.
fn fallback_call(ctx: &mut Ctx, expr: &Expr, args: &[CallArg], tail_block: bool) -> Result<Val, CompileError> {
    let (arg_base, spec) = lower_args(ctx, args, tail_block)?;
    let ast_id = ctx.builder.add_const(Constant::Ref(Rc::new(expr.clone())));
    let dst = ctx.alloc_temp();
    ctx.builder.emit(Instr::CallFallback { ast_id, arg_base, args: spec, dst });
    Ok(Val { slot: dst, ty: Ty::Obj })
}

fn lower_args(ctx: &mut Ctx, args: &[CallArg], tail_block: bool) -> Result<(SlotId, ArgsSpec), CompileError> {
    let mut vals = Vec::with_capacity(args.len());
    for a in args {
        let v = lower_expr(ctx, &a.value)?;
        vals.push(to_obj(ctx, v));
    }
    let n = vals.len() as u32;
    let arg_base = ctx.alloc_temp();
    for _ in 1..n {
        ctx.alloc_temp();
    }
    for (i, slot) in vals.iter().enumerate() {
        ctx.builder.emit(Instr::MoveObj { dst: arg_base + i as u32, src: *slot });
    }
    let simple = args.iter().all(|a| a.name.is_none() && !a.is_splat) && !tail_block;
    let spec = if simple {
        ArgsSpec::Count(n)
    } else {
        let entries = args.iter().map(|a| ArgPlanEntry { name: a.name.clone(), is_splat: a.is_splat }).collect();
        let plan = ctx.builder.add_const(Constant::CallArgsPlan(CallArgsPlan { entries, tail_block }));
        ArgsSpec::Plan(plan)
    };
    Ok((arg_base, spec))
}

fn target_requires_fallback(target: &AssignTarget) -> bool {
    matches!(target, AssignTarget::Var(_))
        || matches!(target, AssignTarget::Field { optional: true, .. })
        || matches!(target, AssignTarget::Index { optional: true, .. })
}

enum ResolvedTarget {
    /// `key` is the `(depth, slot)` pair this addr was minted from — the
    /// same key `Ctx`'s slot-type map is indexed by, so a store through
    /// this target can update the type hint for later typed reads.
    Addr { addr: crate::bytecode::AddrId, key: (u32, u32) },
    Field { receiver: SlotId, name: ConstId },
    Index { receiver: SlotId, index: SlotId },
    ThisMember { name: ConstId },
}

fn resolve_target(ctx: &mut Ctx, target: &AssignTarget) -> Result<ResolvedTarget, CompileError> {
    match target {
        AssignTarget::Local(r) => {
            let addr = ctx.resolve_var(r.depth, r.slot, Some(r.name.clone()));
            Ok(ResolvedTarget::Addr { addr, key: (r.depth, r.slot) })
        }
        AssignTarget::Field { receiver, name, .. } => {
            let r = lower_expr(ctx, receiver)?;
            let rs = to_obj(ctx, r);
            let nid = const_name(ctx, name);
            Ok(ResolvedTarget::Field { receiver: rs, name: nid })
        }
        AssignTarget::Index { receiver, index, .. } => {
            let r = lower_expr(ctx, receiver)?;
            let rs = to_obj(ctx, r);
            let i = lower_expr(ctx, index)?;
            let is = to_obj(ctx, i);
            Ok(ResolvedTarget::Index { receiver: rs, index: is })
        }
        AssignTarget::ThisMember { name } => Ok(ResolvedTarget::ThisMember { name: const_name(ctx, name) }),
        AssignTarget::Var(_) => unreachable!("caller filters Var targets to fallback_ref"),
    }
}

/// Load a resolved target as a [`Val`], using the typed `Load*Addr` opcode
/// when the slot's scalar type is known, falling back to the boxed
/// `LoadObjAddr`/`GetField`/`GetIndex`/`GetThisMember` path otherwise.
fn load_resolved(ctx: &mut Ctx, rt: &ResolvedTarget) -> Val {
    match rt {
        ResolvedTarget::Addr { addr, key } => typed_load_addr(ctx, *addr, *key),
        ResolvedTarget::Field { receiver, name } => {
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::GetField { dst, receiver: *receiver, name: *name });
            Val { slot: dst, ty: Ty::Obj }
        }
        ResolvedTarget::Index { receiver, index } => {
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::GetIndex { dst, receiver: *receiver, index: *index });
            Val { slot: dst, ty: Ty::Obj }
        }
        ResolvedTarget::ThisMember { name } => {
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::GetThisMember { dst, name: *name });
            Val { slot: dst, ty: Ty::Obj }
        }
    }
}

/// Store `value` into a resolved target, using the typed `Store*Addr`
/// opcode (and updating the slot-type map) when `value` is a native
/// scalar, otherwise boxing first and going through `StoreObjAddr`.
fn store_resolved(ctx: &mut Ctx, rt: &ResolvedTarget, value: Val) {
    match rt {
        ResolvedTarget::Addr { addr, key } => typed_store_addr(ctx, *addr, *key, value),
        ResolvedTarget::Field { receiver, name } => {
            let vs = to_obj(ctx, value);
            ctx.builder.emit(Instr::SetField { receiver: *receiver, name: *name, value: vs });
        }
        ResolvedTarget::Index { receiver, index } => {
            let vs = to_obj(ctx, value);
            ctx.builder.emit(Instr::SetIndex { receiver: *receiver, index: *index, value: vs });
        }
        ResolvedTarget::ThisMember { name } => {
            let vs = to_obj(ctx, value);
            ctx.builder.emit(Instr::SetThisMember { name: *name, value: vs });
        }
    }
}

/// Load a scope slot, consulting `key`'s scalar-type hint to pick the
/// native `Load*Addr` opcode when available; otherwise the generic boxed
/// load, which always produces `Ty::Obj`.
fn typed_load_addr(ctx: &mut Ctx, addr: crate::bytecode::AddrId, key: (u32, u32)) -> Val {
    let dst = ctx.alloc_temp();
    match ctx.slot_ty(key) {
        Some(Ty::Int) => {
            ctx.builder.emit(Instr::LoadIntAddr { dst, addr });
            Val { slot: dst, ty: Ty::Int }
        }
        Some(Ty::Real) => {
            ctx.builder.emit(Instr::LoadRealAddr { dst, addr });
            Val { slot: dst, ty: Ty::Real }
        }
        Some(Ty::Bool) => {
            ctx.builder.emit(Instr::LoadBoolAddr { dst, addr });
            Val { slot: dst, ty: Ty::Bool }
        }
        Some(Ty::Obj) | None => {
            ctx.builder.emit(Instr::LoadObjAddr { dst, addr });
            Val { slot: dst, ty: Ty::Obj }
        }
    }
}

/// Store `value` into a scope slot through the typed `Store*Addr` opcode
/// matching its own scalar channel, updating `key`'s type hint to match —
/// a later typed load of the same key can then skip the boxed channel too.
fn typed_store_addr(ctx: &mut Ctx, addr: crate::bytecode::AddrId, key: (u32, u32), value: Val) {
    match value.ty {
        Ty::Int => {
            ctx.builder.emit(Instr::StoreIntAddr { addr, src: value.slot });
            ctx.set_slot_ty(key, Some(Ty::Int));
        }
        Ty::Real => {
            ctx.builder.emit(Instr::StoreRealAddr { addr, src: value.slot });
            ctx.set_slot_ty(key, Some(Ty::Real));
        }
        Ty::Bool => {
            ctx.builder.emit(Instr::StoreBoolAddr { addr, src: value.slot });
            ctx.set_slot_ty(key, Some(Ty::Bool));
        }
        Ty::Obj => {
            ctx.builder.emit(Instr::StoreObjAddr { addr, src: value.slot });
            ctx.set_slot_ty(key, Some(Ty::Obj));
        }
    }
}

/// Copy `v` into a fresh temp of the same scalar channel. Needed where a
/// value about to be mutated in place (a post-fix inc/dec's return value)
/// must survive the mutation unchanged.
pub(super) fn move_to_fresh(ctx: &mut Ctx, v: Val) -> Val {
    let dst = ctx.alloc_temp();
    let instr = match v.ty {
        Ty::Int => Instr::MoveInt { dst, src: v.slot },
        Ty::Real => Instr::MoveReal { dst, src: v.slot },
        Ty::Bool => Instr::MoveBool { dst, src: v.slot },
        Ty::Obj => Instr::MoveObj { dst, src: v.slot },
    };
    ctx.builder.emit(instr);
    Val { slot: dst, ty: v.ty }
}

fn lower_assign(ctx: &mut Ctx, outer: &Expr, target: &AssignTarget, value: &Expr) -> Result<Val, CompileError> {
    if target_requires_fallback(target) {
        return Ok(fallback_ref(ctx, outer));
    }
    let rt = resolve_target(ctx, target)?;
    let v = lower_expr(ctx, value)?;
    store_resolved(ctx, &rt, v);
    Ok(v)
}

fn lower_assign_op(ctx: &mut Ctx, outer: &Expr, target: &AssignTarget, op: BinOp, value: &Expr, pos: Position) -> Result<Val, CompileError> {
    use BinOp::*;
    if target_requires_fallback(target) || !matches!(op, Plus | Minus | Star | Slash | Percent) {
        return Ok(fallback_ref(ctx, outer));
    }
    let rt = resolve_target(ctx, target)?;
    let old = load_resolved(ctx, &rt);
    let rhs = lower_expr(ctx, value)?;
    let new = lower_arith(ctx, op, old, rhs, pos);
    store_resolved(ctx, &rt, new);
    Ok(new)
}

/// Typed in-place fast paths for `Int`/`Real`; anything else (Obj, Bool —
/// no boolean inc/dec opcode exists) falls back to the boxed
/// `ConstObj(1)` + `AddObj`/`SubObj` path.
fn lower_inc_dec(ctx: &mut Ctx, outer: &Expr, target: &AssignTarget, is_increment: bool, is_post: bool, pos: Position) -> Result<Val, CompileError> {
    if target_requires_fallback(target) {
        return Ok(fallback_ref(ctx, outer));
    }
    let rt = resolve_target(ctx, target)?;
    let old = load_resolved(ctx, &rt);
    match old.ty {
        Ty::Int => {
            let result_slot = if is_post { move_to_fresh(ctx, old).slot } else { old.slot };
            let instr = if is_increment { Instr::IncInt { slot: old.slot } } else { Instr::DecInt { slot: old.slot } };
            ctx.builder.emit(instr);
            let new = Val { slot: old.slot, ty: Ty::Int };
            store_resolved(ctx, &rt, new);
            Ok(Val { slot: result_slot, ty: Ty::Int })
        }
        Ty::Real => {
            let one_slot = ctx.alloc_temp();
            ctx.builder.emit(Instr::ConstReal { dst: one_slot, value: 1.0 });
            let one = Val { slot: one_slot, ty: Ty::Real };
            let new = if is_increment { lower_arith(ctx, BinOp::Plus, old, one, pos) } else { lower_arith(ctx, BinOp::Minus, old, one, pos) };
            store_resolved(ctx, &rt, new);
            Ok(if is_post { old } else { new })
        }
        Ty::Bool | Ty::Obj => {
            let old_slot = to_obj(ctx, old);
            let one_const = ctx.builder.add_const(Constant::Int64(1));
            let one_slot = ctx.alloc_temp();
            ctx.builder.emit(Instr::ConstObj { dst: one_slot, konst: one_const });
            let pos_id = const_pos(ctx, pos);
            let new_slot = ctx.alloc_temp();
            let instr = if is_increment {
                Instr::AddObj { dst: new_slot, lhs: old_slot, rhs: one_slot, pos: pos_id }
            } else {
                Instr::SubObj { dst: new_slot, lhs: old_slot, rhs: one_slot, pos: pos_id }
            };
            ctx.builder.emit(instr);
            let new = Val { slot: new_slot, ty: Ty::Obj };
            store_resolved(ctx, &rt, new);
            Ok(if is_post { Val { slot: old_slot, ty: Ty::Obj } } else { new })
        }
    }
}

fn lower_arith(ctx: &mut Ctx, op: BinOp, l: Val, r: Val, pos: Position) -> Val {
    use BinOp::*;
    match (l.ty, r.ty) {
        (Ty::Int, Ty::Int) => {
            let dst = ctx.alloc_temp();
            match op {
                Plus => ctx.builder.emit(Instr::AddInt { dst, lhs: l.slot, rhs: r.slot }),
                Minus => ctx.builder.emit(Instr::SubInt { dst, lhs: l.slot, rhs: r.slot }),
                Star => ctx.builder.emit(Instr::MulInt { dst, lhs: l.slot, rhs: r.slot }),
                Slash => {
                    let pos_id = const_pos(ctx, pos);
                    ctx.builder.emit(Instr::DivInt { dst, lhs: l.slot, rhs: r.slot, pos: pos_id })
                }
                Percent => {
                    let pos_id = const_pos(ctx, pos);
                    ctx.builder.emit(Instr::ModInt { dst, lhs: l.slot, rhs: r.slot, pos: pos_id })
                }
                _ => unreachable!(),
            };
            Val { slot: dst, ty: Ty::Int }
        }
        (Ty::Real, Ty::Real) if op != Percent => {
            let dst = ctx.alloc_temp();
            match op {
                Plus => ctx.builder.emit(Instr::AddReal { dst, lhs: l.slot, rhs: r.slot }),
                Minus => ctx.builder.emit(Instr::SubReal { dst, lhs: l.slot, rhs: r.slot }),
                Star => ctx.builder.emit(Instr::MulReal { dst, lhs: l.slot, rhs: r.slot }),
                Slash => ctx.builder.emit(Instr::DivReal { dst, lhs: l.slot, rhs: r.slot }),
                _ => unreachable!(),
            };
            Val { slot: dst, ty: Ty::Real }
        }
        _ => {
            let ls = to_obj(ctx, l);
            let rs = to_obj(ctx, r);
            let pos_id = const_pos(ctx, pos);
            let dst = ctx.alloc_temp();
            let instr = match op {
                Plus => Instr::AddObj { dst, lhs: ls, rhs: rs, pos: pos_id },
                Minus => Instr::SubObj { dst, lhs: ls, rhs: rs, pos: pos_id },
                Star => Instr::MulObj { dst, lhs: ls, rhs: rs, pos: pos_id },
                Slash => Instr::DivObj { dst, lhs: ls, rhs: rs, pos: pos_id },
                Percent => Instr::ModObj { dst, lhs: ls, rhs: rs, pos: pos_id },
                _ => unreachable!(),
            };
            ctx.builder.emit(instr);
            Val { slot: dst, ty: Ty::Obj }
        }
    }
}

fn lower_cmp(ctx: &mut Ctx, op: BinOp, l: Val, r: Val, pos: Position) -> Val {
    use BinOp::*;
    let dst = ctx.alloc_temp();
    match (l.ty, r.ty) {
        (Ty::Int, Ty::Int) => {
            let instr = match op {
                Eq => Instr::CmpIntEq { dst, lhs: l.slot, rhs: r.slot },
                Neq => Instr::CmpIntNeq { dst, lhs: l.slot, rhs: r.slot },
                Lt => Instr::CmpIntLt { dst, lhs: l.slot, rhs: r.slot },
                Lte => Instr::CmpIntLte { dst, lhs: l.slot, rhs: r.slot },
                Gt => Instr::CmpIntGt { dst, lhs: l.slot, rhs: r.slot },
                Gte => Instr::CmpIntGte { dst, lhs: l.slot, rhs: r.slot },
                _ => unreachable!(),
            };
            ctx.builder.emit(instr);
        }
        (Ty::Real, Ty::Real) => {
            let instr = match op {
                Eq => Instr::CmpRealEq { dst, lhs: l.slot, rhs: r.slot },
                Neq => Instr::CmpRealNeq { dst, lhs: l.slot, rhs: r.slot },
                Lt => Instr::CmpRealLt { dst, lhs: l.slot, rhs: r.slot },
                Lte => Instr::CmpRealLte { dst, lhs: l.slot, rhs: r.slot },
                Gt => Instr::CmpRealGt { dst, lhs: l.slot, rhs: r.slot },
                Gte => Instr::CmpRealGte { dst, lhs: l.slot, rhs: r.slot },
                _ => unreachable!(),
            };
            ctx.builder.emit(instr);
        }
        (Ty::Bool, Ty::Bool) if matches!(op, Eq | Neq) => {
            let instr = if op == Eq {
                Instr::CmpBoolEq { dst, lhs: l.slot, rhs: r.slot }
            } else {
                Instr::CmpBoolNeq { dst, lhs: l.slot, rhs: r.slot }
            };
            ctx.builder.emit(instr);
        }
        (Ty::Int, Ty::Real) => {
            let instr = match op {
                Eq => Instr::CmpIntRealEq { dst, lhs: l.slot, rhs: r.slot },
                Neq => Instr::CmpIntRealNeq { dst, lhs: l.slot, rhs: r.slot },
                Lt => Instr::CmpIntRealLt { dst, lhs: l.slot, rhs: r.slot },
                Lte => Instr::CmpIntRealLte { dst, lhs: l.slot, rhs: r.slot },
                Gt => Instr::CmpIntRealGt { dst, lhs: l.slot, rhs: r.slot },
                Gte => Instr::CmpIntRealGte { dst, lhs: l.slot, rhs: r.slot },
                _ => unreachable!(),
            };
            ctx.builder.emit(instr);
        }
        (Ty::Real, Ty::Int) => {
            let instr = match op {
                Eq => Instr::CmpRealIntEq { dst, lhs: l.slot, rhs: r.slot },
                Neq => Instr::CmpRealIntNeq { dst, lhs: l.slot, rhs: r.slot },
                Lt => Instr::CmpRealIntLt { dst, lhs: l.slot, rhs: r.slot },
                Lte => Instr::CmpRealIntLte { dst, lhs: l.slot, rhs: r.slot },
                Gt => Instr::CmpRealIntGt { dst, lhs: l.slot, rhs: r.slot },
                Gte => Instr::CmpRealIntGte { dst, lhs: l.slot, rhs: r.slot },
                _ => unreachable!(),
            };
            ctx.builder.emit(instr);
        }
        _ => {
            let ls = to_obj(ctx, l);
            let rs = to_obj(ctx, r);
            match op {
                Eq => {
                    ctx.builder.emit(Instr::CmpObjEq { dst, lhs: ls, rhs: rs, pos: const_pos(ctx, pos) });
                }
                Neq => {
                    ctx.builder.emit(Instr::CmpObjNeq { dst, lhs: ls, rhs: rs, pos: const_pos(ctx, pos) });
                }
                Lt => {
                    ctx.builder.emit(Instr::CmpObjLt { dst, lhs: ls, rhs: rs, pos: const_pos(ctx, pos) });
                }
                Lte => {
                    ctx.builder.emit(Instr::CmpObjLte { dst, lhs: ls, rhs: rs, pos: const_pos(ctx, pos) });
                }
                Gt => {
                    ctx.builder.emit(Instr::CmpObjGt { dst, lhs: ls, rhs: rs, pos: const_pos(ctx, pos) });
                }
                Gte => {
                    ctx.builder.emit(Instr::CmpObjGte { dst, lhs: ls, rhs: rs, pos: const_pos(ctx, pos) });
                }
                _ => unreachable!(),
            }
        }
    }
    Val { slot: dst, ty: Ty::Bool }
}

/// `And`/`Or` preserve short-circuit evaluation via explicit jumps rather
/// than eagerly evaluating both sides.
fn lower_short_circuit(ctx: &mut Ctx, left: &Expr, right: &Expr, is_and: bool) -> Result<Val, CompileError> {
    let result = ctx.alloc_temp();
    let l = lower_expr(ctx, left)?;
    let lb = to_bool(ctx, l);
    ctx.builder.emit(Instr::MoveBool { dst: result, src: lb });
    let short = ctx.builder.label();
    if is_and {
        ctx.builder.emit_jmp_if_false(result, short);
    } else {
        ctx.builder.emit_jmp_if_true(result, short);
    }
    let r = lower_expr(ctx, right)?;
    let rb = to_bool(ctx, r);
    ctx.builder.emit(Instr::MoveBool { dst: result, src: rb });
    ctx.builder.mark(short);
    Ok(Val { slot: result, ty: Ty::Bool })
}

fn lower_binary(ctx: &mut Ctx, outer: &Expr, op: BinOp, left: &Expr, right: &Expr, pos: Position) -> Result<Val, CompileError> {
    use BinOp::*;
    match op {
        And => return lower_short_circuit(ctx, left, right, true),
        Or => return lower_short_circuit(ctx, left, right, false),
        Is | NotIs => return Ok(fallback_ref(ctx, outer)),
        _ => {}
    }
    let l = lower_expr(ctx, left)?;
    let r = lower_expr(ctx, right)?;
    match op {
        Plus | Minus | Star | Slash | Percent => Ok(lower_arith(ctx, op, l, r, pos)),
        Eq | Neq | Lt | Lte | Gt | Gte => Ok(lower_cmp(ctx, op, l, r, pos)),
        RefEq | RefNeq => {
            let ls = to_obj(ctx, l);
            let rs = to_obj(ctx, r);
            let dst = ctx.alloc_temp();
            if op == RefEq {
                ctx.builder.emit(Instr::CmpRefEqObj { dst, lhs: ls, rhs: rs });
            } else {
                ctx.builder.emit(Instr::CmpRefNeqObj { dst, lhs: ls, rhs: rs });
            }
            Ok(Val { slot: dst, ty: Ty::Bool })
        }
        In | NotIn => {
            let cs = to_obj(ctx, l);
            let vs = to_obj(ctx, r);
            let pos_id = const_pos(ctx, pos);
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::ContainsObj { dst, container: cs, value: vs, pos: pos_id });
            if op == NotIn {
                let dst2 = ctx.alloc_temp();
                ctx.builder.emit(Instr::NotBool { dst: dst2, src: dst });
                Ok(Val { slot: dst2, ty: Ty::Bool })
            } else {
                Ok(Val { slot: dst, ty: Ty::Bool })
            }
        }
        BAnd | BOr | BXor | Shl | Shr => {
            if l.ty == Ty::Int && r.ty == Ty::Int {
                let dst = ctx.alloc_temp();
                let instr = match op {
                    BAnd => Instr::AndInt { dst, lhs: l.slot, rhs: r.slot },
                    BOr => Instr::OrInt { dst, lhs: l.slot, rhs: r.slot },
                    BXor => Instr::XorInt { dst, lhs: l.slot, rhs: r.slot },
                    Shl => Instr::ShlInt { dst, lhs: l.slot, rhs: r.slot },
                    Shr => Instr::ShrInt { dst, lhs: l.slot, rhs: r.slot },
                    _ => unreachable!(),
                };
                ctx.builder.emit(instr);
                Ok(Val { slot: dst, ty: Ty::Int })
            } else {
                Ok(fallback_ref(ctx, outer))
            }
        }
        And | Or | Is | NotIs => unreachable!("handled above"),
    }
}

fn lower_unary(ctx: &mut Ctx, outer: &Expr, op: UnOp, operand: &Expr, pos: Position) -> Result<Val, CompileError> {
    let v = lower_expr(ctx, operand)?;
    match op {
        UnOp::Negate => match v.ty {
            Ty::Int => {
                let dst = ctx.alloc_temp();
                ctx.builder.emit(Instr::NegInt { dst, src: v.slot });
                Ok(Val { slot: dst, ty: Ty::Int })
            }
            Ty::Real => {
                let dst = ctx.alloc_temp();
                ctx.builder.emit(Instr::NegReal { dst, src: v.slot });
                Ok(Val { slot: dst, ty: Ty::Real })
            }
            _ => {
                // No native Obj-negate opcode; 0 - x via the generic object
                // arithmetic path reuses SUB_OBJ instead of inventing one.
                let obj = to_obj(ctx, v);
                let zero_const = ctx.builder.add_const(Constant::Int64(0));
                let zero_slot = ctx.alloc_temp();
                ctx.builder.emit(Instr::ConstObj { dst: zero_slot, konst: zero_const });
                let pos_id = const_pos(ctx, pos);
                let dst = ctx.alloc_temp();
                ctx.builder.emit(Instr::SubObj { dst, lhs: zero_slot, rhs: obj, pos: pos_id });
                Ok(Val { slot: dst, ty: Ty::Obj })
            }
        },
        UnOp::Not => {
            let b = to_bool(ctx, v);
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::NotBool { dst, src: b });
            Ok(Val { slot: dst, ty: Ty::Bool })
        }
        UnOp::BitNot => match v.ty {
            Ty::Int => {
                let dst = ctx.alloc_temp();
                ctx.builder.emit(Instr::InvInt { dst, src: v.slot });
                Ok(Val { slot: dst, ty: Ty::Int })
            }
            _ => Ok(fallback_ref(ctx, outer)),
        },
    }
}

pub fn lower_expr(ctx: &mut Ctx, expr: &Expr) -> Result<Val, CompileError> {
    match expr {
        Expr::Const { value: Literal::Int(i), .. } => {
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::ConstInt { dst, value: *i });
            Ok(Val { slot: dst, ty: Ty::Int })
        }
        Expr::Const { value: Literal::Real(f), .. } => {
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::ConstReal { dst, value: *f });
            Ok(Val { slot: dst, ty: Ty::Real })
        }
        Expr::Const { value: Literal::Bool(b), .. } => {
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::ConstBool { dst, value: *b });
            Ok(Val { slot: dst, ty: Ty::Bool })
        }
        Expr::Const { value: Literal::Null, .. } => {
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::ConstNull { dst });
            Ok(Val { slot: dst, ty: Ty::Obj })
        }
        // No Scope factory builds a boxed string at the VM layer (only
        // make_int/make_real/make_bool/make_null exist); the host
        // tree-walker owns string literal materialization.
        Expr::Const { value: Literal::Str(_), .. } => Ok(fallback_ref(ctx, expr)),

        Expr::LocalSlot(r) => {
            if let Some(slot) = ctx.lookup_loop_var_override(&r.name) {
                return Ok(Val { slot, ty: Ty::Int });
            }
            let addr = ctx.resolve_var(r.depth, r.slot, Some(r.name.clone()));
            Ok(typed_load_addr(ctx, addr, (r.depth, r.slot)))
        }
        Expr::LocalVar(r) => {
            if let Some(slot) = ctx.lookup_loop_var_override(&r.name) {
                return Ok(Val { slot, ty: Ty::Int });
            }
            let name_id = const_name(ctx, &r.name);
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::GetName { dst, name: name_id });
            Ok(Val { slot: dst, ty: Ty::Obj })
        }

        Expr::Binary { op, left, right, pos } => lower_binary(ctx, expr, *op, left, right, *pos),
        Expr::Unary { op, operand, pos } => lower_unary(ctx, expr, *op, operand, *pos),

        Expr::Assign { target, value, .. } => lower_assign(ctx, expr, target, value),
        Expr::AssignOp { target, op, value, pos } => lower_assign_op(ctx, expr, target, *op, value, *pos),
        // Elvis-assign needs a null test no opcode here performs directly.
        Expr::AssignIfNull { .. } => Ok(fallback_ref(ctx, expr)),
        Expr::IncDec { target, is_increment, is_post, pos } => lower_inc_dec(ctx, expr, target, *is_increment, *is_post, *pos),

        Expr::Conditional { cond, if_true, if_false } => {
            let c = lower_expr(ctx, cond)?;
            let cb = to_bool(ctx, c);
            let dst = ctx.alloc_temp();
            let else_label = ctx.builder.label();
            let end_label = ctx.builder.label();
            ctx.builder.emit_jmp_if_false(cb, else_label);
            let t = lower_expr(ctx, if_true)?;
            let ts = to_obj(ctx, t);
            ctx.builder.emit(Instr::MoveObj { dst, src: ts });
            ctx.builder.emit_jmp(end_label);
            ctx.builder.mark(else_label);
            let f = lower_expr(ctx, if_false)?;
            let fs = to_obj(ctx, f);
            ctx.builder.emit(Instr::MoveObj { dst, src: fs });
            ctx.builder.mark(end_label);
            Ok(Val { slot: dst, ty: Ty::Obj })
        }
        // Null-coalescing, not truthiness-coalescing; no null-test opcode.
        Expr::Elvis { .. } => Ok(fallback_ref(ctx, expr)),

        Expr::Call { callee, args, tail_block, optional, .. } => {
            if *optional || tail_block.is_some() {
                return fallback_call(ctx, expr, args, tail_block.is_some());
            }
            let c = lower_expr(ctx, callee)?;
            let cs = to_obj(ctx, c);
            let (arg_base, spec) = lower_args(ctx, args, false)?;
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::CallSlot { callee: cs, arg_base, args: spec, dst });
            Ok(Val { slot: dst, ty: Ty::Obj })
        }
        Expr::MethodCall { receiver, name, args, tail_block, optional, .. } => {
            if *optional || tail_block.is_some() {
                return fallback_call(ctx, expr, args, tail_block.is_some());
            }
            let r = lower_expr(ctx, receiver)?;
            let rs = to_obj(ctx, r);
            let name_id = const_name(ctx, name);
            let (arg_base, spec) = lower_args(ctx, args, false)?;
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::CallVirtual { receiver: rs, method_name: name_id, arg_base, args: spec, dst });
            Ok(Val { slot: dst, ty: Ty::Obj })
        }

        Expr::Field { receiver, name, optional } => {
            if *optional {
                return Ok(fallback_ref(ctx, expr));
            }
            let r = lower_expr(ctx, receiver)?;
            let rs = to_obj(ctx, r);
            let name_id = const_name(ctx, name);
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::GetField { dst, receiver: rs, name: name_id });
            Ok(Val { slot: dst, ty: Ty::Obj })
        }
        Expr::Index { receiver, index, optional, .. } => {
            if *optional {
                return Ok(fallback_ref(ctx, expr));
            }
            let r = lower_expr(ctx, receiver)?;
            let rs = to_obj(ctx, r);
            let i = lower_expr(ctx, index)?;
            let is = to_obj(ctx, i);
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::GetIndex { dst, receiver: rs, index: is });
            Ok(Val { slot: dst, ty: Ty::Obj })
        }
        Expr::ImplicitThisMember { name } => {
            let name_id = const_name(ctx, name);
            let dst = ctx.alloc_temp();
            ctx.builder.emit(Instr::GetThisMember { dst, name: name_id });
            Ok(Val { slot: dst, ty: Ty::Obj })
        }

        // Construction needs host list/range-building; no opcode builds one.
        // `EVAL_REF` re-evaluates the whole node on the host, entries
        // included — lowering the entries here too would run any element
        // or spread expression's side effects twice.
        Expr::Range { .. } => Ok(fallback_ref(ctx, expr)),
        Expr::ListLiteral { .. } => Ok(fallback_ref(ctx, expr)),

        Expr::Statement(inner) => match inner.as_ref() {
            Stmt::ForIn { .. } | Stmt::While { .. } | Stmt::DoWhile { .. } => super::stmt::lower_loop_for_value(ctx, inner),
            Stmt::If { .. } => super::stmt::lower_if_for_value(ctx, inner),
            Stmt::Block { slot_plan, body } => super::stmt::lower_block_for_value(ctx, slot_plan, body),
            _ => {
                let id = ctx.builder.add_const(Constant::StatementVal(Rc::new((**inner).clone())));
                let dst = ctx.alloc_temp();
                ctx.builder.emit(Instr::EvalStmt { statement: id, dst });
                Ok(Val { slot: dst, ty: Ty::Obj })
            }
        },

        Expr::ValueFn { .. } | Expr::ThisMethodSlotCall { .. } => Ok(fallback_eval(ctx, expr)),
    }
}

//! Statement lowering.
//!
//! Blocks and loop bodies that declare named locals wrap themselves in
//! `PUSH_SCOPE`/`POP_SCOPE` (for a plain block) or `PUSH_SLOT_PLAN`/
//! `POP_SLOT_PLAN` (for a loop body re-entered once per iteration) so the
//! host scope sees the right set of live names whether or not the slot
//! plan can be applied in place.

use std::rc::Rc;

use crate::ast::{Expr, SlotPlan, Stmt};
use crate::bytecode::constant::LocalDeclInfo;
use crate::bytecode::{Constant, Instr, SlotId};

use super::context::{Ctx, LoopCtx};
use super::error::CompileError;
use super::expr::{lower_expr, move_to_fresh, to_bool, to_obj, Ty, Val};
use super::passes;

fn const_name(ctx: &mut Ctx, name: &str) -> crate::bytecode::ConstId {
    ctx.builder.add_const(Constant::Str(Rc::from(name)))
}

fn const_slot_plan(ctx: &mut Ctx, plan: &SlotPlan) -> crate::bytecode::ConstId {
    ctx.builder.add_const(Constant::SlotPlan(plan.clone()))
}

fn fallback_stmt(ctx: &mut Ctx, stmt: &Stmt) {
    let id = ctx.builder.add_const(Constant::StatementVal(Rc::new(stmt.clone())));
    let dst = ctx.alloc_temp();
    ctx.builder.emit(Instr::EvalStmt { statement: id, dst });
}

pub fn lower_stmt(ctx: &mut Ctx, stmt: &Stmt) -> Result<(), CompileError> {
    match stmt {
        Stmt::ExpressionStatement(e) => {
            lower_expr(ctx, e)?;
            Ok(())
        }
        Stmt::Block { slot_plan, body } => compile_block(ctx, slot_plan, body),
        Stmt::VarDecl { name, mutable, visibility, initializer, transient, slot_index, slot_depth } => {
            let val = match initializer {
                Some(e) => lower_expr(ctx, e)?,
                None => {
                    let dst = ctx.alloc_temp();
                    ctx.builder.emit(Instr::ConstNull { dst });
                    Val { slot: dst, ty: Ty::Obj }
                }
            };
            let slot = to_obj(ctx, val);
            let decl = ctx.builder.add_const(Constant::LocalDecl(LocalDeclInfo {
                name: name.clone(),
                mutable: *mutable,
                visibility: *visibility,
                transient: *transient,
            }));
            ctx.builder.emit(Instr::DeclLocal { decl, slot });
            // A pre-resolved declaration site: mint its addr now and seed
            // the slot-type map from the initializer, so later references
            // to this variable (via `Expr::LocalSlot`) can use a typed
            // `Load*Addr` instead of always reading the boxed channel.
            if let (Some(depth), Some(index)) = (*slot_depth, *slot_index) {
                ctx.resolve_var(depth, index, Some(name.clone()));
                ctx.set_slot_ty((depth, index), Some(val.ty));
            }
            Ok(())
        }
        Stmt::If { cond, then_body, else_body } => {
            let c = lower_expr(ctx, cond)?;
            let cb = to_bool(ctx, c);
            let else_label = ctx.builder.label();
            ctx.builder.emit_jmp_if_false(cb, else_label);
            let pre = ctx.snapshot_slot_tys();
            lower_stmt(ctx, then_body)?;
            match else_body {
                Some(else_stmt) => {
                    let then_tys = ctx.snapshot_slot_tys();
                    let end_label = ctx.builder.label();
                    ctx.builder.emit_jmp(end_label);
                    ctx.builder.mark(else_label);
                    ctx.restore_slot_tys(pre);
                    lower_stmt(ctx, else_stmt)?;
                    ctx.builder.mark(end_label);
                    ctx.merge_slot_tys_with(then_tys);
                }
                None => {
                    ctx.builder.mark(else_label);
                    // No explicit else: the not-taken path leaves every
                    // slot at its pre-if type, so the merge is against
                    // that snapshot directly.
                    ctx.merge_slot_tys_with(pre);
                }
            }
            Ok(())
        }
        Stmt::ForIn { .. } => compile_for_in(ctx, stmt, None),
        Stmt::While { .. } => compile_while(ctx, stmt, None),
        Stmt::DoWhile { .. } => compile_do_while(ctx, stmt, None),
        Stmt::Break { label, value } => {
            let lp = ctx.find_loop(label.as_deref())?;
            let break_label = lp.break_label;
            let break_flag_slot = lp.break_flag_slot;
            let result_slot = lp.result_slot;
            let true_slot = ctx.alloc_temp();
            ctx.builder.emit(Instr::ConstBool { dst: true_slot, value: true });
            ctx.builder.emit(Instr::MoveBool { dst: break_flag_slot, src: true_slot });
            if let Some(v) = value {
                let val = lower_expr(ctx, v)?;
                let vs = to_obj(ctx, val);
                if let Some(dst) = result_slot {
                    ctx.builder.emit(Instr::MoveObj { dst, src: vs });
                }
            }
            ctx.builder.emit_jmp(break_label);
            Ok(())
        }
        Stmt::Continue { label } => {
            let lp = ctx.find_loop(label.as_deref())?;
            let continue_label = lp.continue_label;
            ctx.builder.emit_jmp(continue_label);
            Ok(())
        }
        Stmt::Return { label, value } => {
            match label {
                None => match value {
                    Some(v) => {
                        let val = lower_expr(ctx, v)?;
                        let vs = to_obj(ctx, val);
                        ctx.builder.emit(Instr::Ret { value: vs });
                    }
                    None => {
                        ctx.builder.emit(Instr::RetVoid);
                    }
                },
                Some(name) => {
                    let vs = match value {
                        Some(v) => {
                            let val = lower_expr(ctx, v)?;
                            to_obj(ctx, val)
                        }
                        None => {
                            let dst = ctx.alloc_temp();
                            ctx.builder.emit(Instr::ConstNull { dst });
                            dst
                        }
                    };
                    ctx.return_labels.insert(name.clone());
                    let label_id = const_name(ctx, name);
                    ctx.builder.emit(Instr::RetLabel { label: label_id, value: vs });
                }
            }
            Ok(())
        }
        Stmt::Throw(e) => {
            let val = lower_expr(ctx, e)?;
            let vs = to_obj(ctx, val);
            let pos_id = ctx.builder.add_const(Constant::PosVal(e.pos()));
            ctx.builder.emit(Instr::Throw { pos: pos_id, value: vs });
            Ok(())
        }
        Stmt::ExtensionPropertyDecl { .. } | Stmt::DestructuringVarDecl { .. } | Stmt::When { .. } => {
            fallback_stmt(ctx, stmt);
            Ok(())
        }
    }
}

fn compile_block(ctx: &mut Ctx, slot_plan: &SlotPlan, body: &[Stmt]) -> Result<(), CompileError> {
    let pushed = !slot_plan.is_empty();
    if pushed {
        let plan_id = const_slot_plan(ctx, slot_plan);
        ctx.builder.emit(Instr::PushScope { plan: plan_id });
    }
    for s in body {
        lower_stmt(ctx, s)?;
    }
    if pushed {
        ctx.builder.emit(Instr::PopScope);
    }
    Ok(())
}

/// Used from [`super::expr::lower_expr`]'s `Expr::Statement` arm when the
/// wrapped statement is a loop: the loop's last `break value` (or the
/// natural-exhaustion default) becomes the expression's value, so a result
/// slot is threaded through the loop context instead of being discarded.
pub fn lower_loop_for_value(ctx: &mut Ctx, stmt: &Stmt) -> Result<Val, CompileError> {
    let result_slot = ctx.alloc_temp();
    ctx.builder.emit(Instr::ConstNull { dst: result_slot });
    match stmt {
        Stmt::ForIn { .. } => compile_for_in(ctx, stmt, Some(result_slot))?,
        Stmt::While { .. } => compile_while(ctx, stmt, Some(result_slot))?,
        Stmt::DoWhile { .. } => compile_do_while(ctx, stmt, Some(result_slot))?,
        _ => unreachable!("lower_loop_for_value only called for loop statements"),
    }
    Ok(Val { slot: result_slot, ty: Ty::Obj })
}

/// Lower a statement that might be the last one in a function body or
/// block, returning the value it produces in expression position (`None`
/// for statements with no value, e.g. `Return`/`Throw`/a bare `VarDecl`).
pub fn lower_stmt_for_value(ctx: &mut Ctx, stmt: &Stmt) -> Result<Option<Val>, CompileError> {
    match stmt {
        Stmt::ExpressionStatement(e) => Ok(Some(lower_expr(ctx, e)?)),
        Stmt::If { .. } => Ok(Some(lower_if_for_value(ctx, stmt)?)),
        Stmt::Block { slot_plan, body } => Ok(Some(lower_block_for_value(ctx, slot_plan, body)?)),
        Stmt::ForIn { .. } | Stmt::While { .. } | Stmt::DoWhile { .. } => Ok(Some(lower_loop_for_value(ctx, stmt)?)),
        _ => {
            lower_stmt(ctx, stmt)?;
            Ok(None)
        }
    }
}

fn null_val(ctx: &mut Ctx) -> Val {
    let dst = ctx.alloc_temp();
    ctx.builder.emit(Instr::ConstNull { dst });
    Val { slot: dst, ty: Ty::Obj }
}

/// A block's value is its last statement's value (`null` if the block is
/// empty or its last statement has none); the result is copied to a fresh
/// slot before `POP_SCOPE` runs so it isn't read back through an addr whose
/// owning scope has already been popped.
pub fn lower_block_for_value(ctx: &mut Ctx, slot_plan: &SlotPlan, body: &[Stmt]) -> Result<Val, CompileError> {
    let pushed = !slot_plan.is_empty();
    if pushed {
        let plan_id = const_slot_plan(ctx, slot_plan);
        ctx.builder.emit(Instr::PushScope { plan: plan_id });
    }
    let value = match body.split_last() {
        Some((last, init)) => {
            for s in init {
                lower_stmt(ctx, s)?;
            }
            match lower_stmt_for_value(ctx, last)? {
                Some(v) => v,
                None => null_val(ctx),
            }
        }
        None => null_val(ctx),
    };
    let value = move_to_fresh(ctx, value);
    if pushed {
        ctx.builder.emit(Instr::PopScope);
    }
    Ok(value)
}

/// An `if` used in expression position: both arms' values are boxed and
/// moved into one shared result slot, same shape as `Expr::Conditional`.
/// Uses the same snapshot/restore/merge sequence as the plain statement
/// arm in [`lower_stmt`] so a slot's scalar-type hint never survives past
/// a point where the two arms disagree on it.
pub fn lower_if_for_value(ctx: &mut Ctx, stmt: &Stmt) -> Result<Val, CompileError> {
    let Stmt::If { cond, then_body, else_body } = stmt else {
        unreachable!("lower_if_for_value called on non-If statement");
    };
    let c = lower_expr(ctx, cond)?;
    let cb = to_bool(ctx, c);
    let result = ctx.alloc_temp();
    let else_label = ctx.builder.label();
    let end_label = ctx.builder.label();
    ctx.builder.emit_jmp_if_false(cb, else_label);

    let pre = ctx.snapshot_slot_tys();
    let then_val = lower_stmt_for_value(ctx, then_body)?.unwrap_or_else(|| null_val(ctx));
    let ts = to_obj(ctx, then_val);
    ctx.builder.emit(Instr::MoveObj { dst: result, src: ts });
    ctx.builder.emit_jmp(end_label);

    ctx.builder.mark(else_label);
    let then_tys = ctx.snapshot_slot_tys();
    ctx.restore_slot_tys(pre);
    let else_val = match else_body {
        Some(e) => lower_stmt_for_value(ctx, e)?.unwrap_or_else(|| null_val(ctx)),
        None => null_val(ctx),
    };
    let es = to_obj(ctx, else_val);
    ctx.builder.emit(Instr::MoveObj { dst: result, src: es });
    ctx.builder.mark(end_label);
    ctx.merge_slot_tys_with(then_tys);

    Ok(Val { slot: result, ty: Ty::Obj })
}

/// Only side-effect-free reads are safe to lower speculatively and then
/// discard if the attempted native strategy doesn't pan out (a range bound
/// that turns out not to be `Ty::Int`, say) — re-evaluating one from
/// scratch inside the fallback below must not run it twice.
fn is_pure_read(expr: &Expr) -> bool {
    matches!(expr, Expr::Const { .. } | Expr::LocalSlot(_) | Expr::LocalVar(_))
}

/// A `for-in` loop's source, reduced to one of four compile-time-known
/// shapes in turn:
///
/// 1. A compile-time integer range (`const_range`) — bounds are literal.
/// 2. A `Range` expression whose bounds are themselves pure reads that
///    turn out to be `Ty::Int` once lowered — bounds computed at runtime,
///    loop mechanics otherwise identical to (1).
/// 3. A named local already known (by the caller, via `range_typed_names`)
///    to hold an `IntRange` object — bounds pulled out of it with
///    `ASSERT_IS` + `RANGE_INT_BOUNDS`.
/// 4. Anything else — no iterator-protocol opcode exists here, so it falls
///    back wholesale.
fn compile_for_in(ctx: &mut Ctx, stmt: &Stmt, result_slot: Option<SlotId>) -> Result<(), CompileError> {
    let Stmt::ForIn { loop_var_name, source, const_range, body, else_statement, label, loop_slot_plan, .. } = stmt else {
        unreachable!("compile_for_in called on non-ForIn statement");
    };

    if let Some((start, end, is_end_inclusive)) = const_range {
        let var_slot = ctx.alloc_temp();
        ctx.builder.emit(Instr::ConstInt { dst: var_slot, value: *start });
        let bound_value = if *is_end_inclusive { end + 1 } else { *end };
        let bound_slot = ctx.alloc_temp();
        ctx.builder.emit(Instr::ConstInt { dst: bound_slot, value: bound_value });
        return compile_for_in_body(ctx, loop_var_name, var_slot, bound_slot, body, else_statement, label, loop_slot_plan, result_slot);
    }

    if let Expr::Range { left, right, is_end_inclusive } = source {
        if is_pure_read(left) && is_pure_read(right) {
            let l = lower_expr(ctx, left)?;
            let r = lower_expr(ctx, right)?;
            if l.ty == Ty::Int && r.ty == Ty::Int {
                let var_slot = ctx.alloc_temp();
                ctx.builder.emit(Instr::MoveInt { dst: var_slot, src: l.slot });
                let bound_slot = ctx.alloc_temp();
                ctx.builder.emit(Instr::MoveInt { dst: bound_slot, src: r.slot });
                if *is_end_inclusive {
                    ctx.builder.emit(Instr::IncInt { slot: bound_slot });
                }
                return compile_for_in_body(ctx, loop_var_name, var_slot, bound_slot, body, else_statement, label, loop_slot_plan, result_slot);
            }
            // Bounds weren't both Int — both lowered values are discarded
            // unused and the fallback below re-evaluates `source` whole;
            // safe exactly because `is_pure_read` guarantees no side effect
            // ran lowering them.
        }
    }

    let range_typed_name = match source {
        Expr::LocalSlot(r) if ctx.is_range_typed(&r.name) => true,
        Expr::LocalVar(r) if ctx.is_range_typed(&r.name) => true,
        _ => false,
    };
    if range_typed_name {
        return compile_for_in_range_typed(ctx, loop_var_name, source, body, else_statement, label, loop_slot_plan, result_slot);
    }

    fallback_stmt(ctx, stmt);
    Ok(())
}

/// Strategy 3: `source` names a local already known to hold an `IntRange`.
/// `ASSERT_IS` raises on a class mismatch before `RANGE_INT_BOUNDS` ever
/// runs, so `ok` is not separately branched on here.
#[allow(clippy::too_many_arguments)]
fn compile_for_in_range_typed(
    ctx: &mut Ctx,
    loop_var_name: &str,
    source: &Expr,
    body: &Stmt,
    else_statement: &Option<Box<Stmt>>,
    label: &Option<String>,
    loop_slot_plan: &SlotPlan,
    result_slot: Option<SlotId>,
) -> Result<(), CompileError> {
    let obj_val = lower_expr(ctx, source)?;
    let obj_slot = to_obj(ctx, obj_val);
    let class_id = ctx.builder.add_const(Constant::Str(Rc::from("IntRange")));
    let pos_id = ctx.builder.add_const(Constant::PosVal(source.pos()));
    ctx.builder.emit(Instr::AssertIs { obj: obj_slot, class: class_id, pos: pos_id });

    let start_slot = ctx.alloc_temp();
    let end_slot = ctx.alloc_temp();
    let ok_slot = ctx.alloc_temp();
    ctx.builder.emit(Instr::RangeIntBounds { range: obj_slot, start: start_slot, end_exclusive: end_slot, ok: ok_slot });

    compile_for_in_body(ctx, loop_var_name, start_slot, end_slot, body, else_statement, label, loop_slot_plan, result_slot)
}

/// Shared loop mechanics once `var_slot`/`bound_slot` (both native `Int`,
/// half-open `[var, bound)`) are ready: step with `CMP_INT_LT`/`INC_INT`,
/// shadow the loop variable's name onto the typed temp for the duration of
/// the body so natively-compiled reads skip the addr/scope path entirely,
/// and also declare a boxed copy into the host scope each iteration so a
/// fallback node inside the body can still resolve the name normally.
#[allow(clippy::too_many_arguments)]
fn compile_for_in_body(
    ctx: &mut Ctx,
    loop_var_name: &str,
    var_slot: SlotId,
    bound_slot: SlotId,
    body: &Stmt,
    else_statement: &Option<Box<Stmt>>,
    label: &Option<String>,
    loop_slot_plan: &SlotPlan,
    result_slot: Option<SlotId>,
) -> Result<(), CompileError> {
    let break_flag_slot = ctx.alloc_temp();
    ctx.builder.emit(Instr::ConstBool { dst: break_flag_slot, value: false });

    let cond_label = ctx.builder.label();
    let continue_label = ctx.builder.label();
    let break_label = ctx.builder.label();

    ctx.loop_stack.push(LoopCtx {
        label: label.clone(),
        break_label,
        continue_label,
        break_flag_slot,
        result_slot,
    });

    ctx.builder.mark(cond_label);
    let cmp_slot = ctx.alloc_temp();
    ctx.builder.emit(Instr::CmpIntLt { dst: cmp_slot, lhs: var_slot, rhs: bound_slot });
    ctx.builder.emit_jmp_if_false(cmp_slot, break_label);

    ctx.push_loop_var_override(loop_var_name.to_string(), var_slot);
    let pushed_plan = !loop_slot_plan.is_empty();
    if pushed_plan {
        let plan_id = const_slot_plan(ctx, loop_slot_plan);
        ctx.builder.emit(Instr::PushSlotPlan { plan: plan_id });
    }
    // The typed temp above is only visible to natively-compiled reads; a
    // fallback node inside the body still resolves names through the host
    // scope, so the loop variable is also declared there each iteration.
    let boxed_var = ctx.alloc_temp();
    ctx.builder.emit(Instr::BoxObj { dst: boxed_var, src: var_slot, src_ty: crate::bytecode::ScalarTy::Int });
    let loop_var_decl = ctx.builder.add_const(Constant::LocalDecl(LocalDeclInfo {
        name: loop_var_name.to_string(),
        mutable: false,
        visibility: crate::ast::Visibility::Public,
        transient: false,
    }));
    ctx.builder.emit(Instr::DeclLocal { decl: loop_var_decl, slot: boxed_var });
    // The body is lowered once but runs every iteration; anything it
    // assigns must not keep the type hint it had on entry to this pass.
    for key in passes::assigned_local_addrs(body) {
        ctx.invalidate_slot_ty(key);
    }
    lower_stmt(ctx, body)?;
    if pushed_plan {
        ctx.builder.emit(Instr::PopSlotPlan);
    }
    ctx.pop_loop_var_override();

    ctx.builder.mark(continue_label);
    ctx.builder.emit(Instr::IncInt { slot: var_slot });
    ctx.builder.emit_jmp(cond_label);

    ctx.builder.mark(break_label);
    ctx.loop_stack.pop();

    if let Some(else_stmt) = else_statement {
        let skip_else = ctx.builder.label();
        ctx.builder.emit_jmp_if_true(break_flag_slot, skip_else);
        lower_stmt(ctx, else_stmt)?;
        ctx.builder.mark(skip_else);
    }
    Ok(())
}

fn compile_while(ctx: &mut Ctx, stmt: &Stmt, result_slot: Option<SlotId>) -> Result<(), CompileError> {
    let Stmt::While { cond, body, else_statement, label } = stmt else {
        unreachable!("compile_while called on non-While statement");
    };

    let break_flag_slot = ctx.alloc_temp();
    ctx.builder.emit(Instr::ConstBool { dst: break_flag_slot, value: false });

    let cond_label = ctx.builder.label();
    let continue_label = ctx.builder.label();
    let break_label = ctx.builder.label();

    ctx.loop_stack.push(LoopCtx {
        label: label.clone(),
        break_label,
        continue_label,
        break_flag_slot,
        result_slot,
    });

    // `cond` and `body` are each lowered once but, via the back-edge to
    // `cond_label`, run every iteration — any slot the body reassigns must
    // lose its type hint before either is compiled.
    for key in passes::assigned_local_addrs(body) {
        ctx.invalidate_slot_ty(key);
    }
    ctx.builder.mark(cond_label);
    let c = lower_expr(ctx, cond)?;
    let cb = to_bool(ctx, c);
    ctx.builder.emit_jmp_if_false(cb, break_label);
    lower_stmt(ctx, body)?;
    ctx.builder.mark(continue_label);
    ctx.builder.emit_jmp(cond_label);
    ctx.builder.mark(break_label);
    ctx.loop_stack.pop();

    if let Some(else_stmt) = else_statement {
        let skip_else = ctx.builder.label();
        ctx.builder.emit_jmp_if_true(break_flag_slot, skip_else);
        lower_stmt(ctx, else_stmt)?;
        ctx.builder.mark(skip_else);
    }
    Ok(())
}

/// `do ... while` has no `else_statement` in the grammar (the clause only
/// exists on `for`/`while`, whose bodies may not execute at all).
fn compile_do_while(ctx: &mut Ctx, stmt: &Stmt, result_slot: Option<SlotId>) -> Result<(), CompileError> {
    let Stmt::DoWhile { cond, body, label } = stmt else {
        unreachable!("compile_do_while called on non-DoWhile statement");
    };

    let break_flag_slot = ctx.alloc_temp();
    ctx.builder.emit(Instr::ConstBool { dst: break_flag_slot, value: false });

    let body_label = ctx.builder.label();
    let continue_label = ctx.builder.label();
    let break_label = ctx.builder.label();

    ctx.loop_stack.push(LoopCtx {
        label: label.clone(),
        break_label,
        continue_label,
        break_flag_slot,
        result_slot,
    });

    // Same reasoning as `compile_while`: `body_label` is re-entered every
    // iteration via the back-edge below, so anything the body reassigns
    // must lose its type hint before `body`/`cond` are compiled.
    for key in passes::assigned_local_addrs(body) {
        ctx.invalidate_slot_ty(key);
    }
    ctx.builder.mark(body_label);
    lower_stmt(ctx, body)?;
    ctx.builder.mark(continue_label);
    let c = lower_expr(ctx, cond)?;
    let cb = to_bool(ctx, c);
    ctx.builder.emit_jmp_if_true(cb, body_label);
    ctx.builder.mark(break_label);
    ctx.loop_stack.pop();
    Ok(())
}

//! Pre-lowering analysis passes.
//!
//! Most candidate upfront sweeps are subsumed by decisions made elsewhere
//! in this crate rather than run as separate passes: scope-slot collection
//! happens lazily in [`crate::compile::context::Ctx::resolve_var`] (each
//! distinct `(depth, slot)` pair mints its scope slot the first time it's
//! seen, rather than in a dedicated pre-pass); virtual-vs-real scope push
//! is decided by the host at runtime via `Scope::has_slot_plan_conflict`
//! (`crate::vm::exec::scope::push_scope`), not by a static depth count; and
//! loop slot plans arrive already computed on `Stmt::ForIn::loop_slot_plan`
//! from the parser. Loop-variable type collection and loop-carried-slot
//! detection both run as standalone passes here since each needs a
//! whole-body view before the body they describe is lowered.

use std::collections::HashSet;

use crate::ast::{AssignTarget, Expr, ListEntry, Stmt};

/// Names bound by a compile-time integer-range `for` loop anywhere in
/// `stmt`'s tree, typed `Int` for the duration of their loop.
pub fn int_range_loop_vars(stmt: &Stmt) -> HashSet<String> {
    let mut out = HashSet::new();
    collect(stmt, &mut out);
    out
}

fn collect(stmt: &Stmt, out: &mut HashSet<String>) {
    match stmt {
        Stmt::ForIn { loop_var_name, const_range: Some(_), body, else_statement, .. } => {
            out.insert(loop_var_name.clone());
            collect(body, out);
            if let Some(e) = else_statement {
                collect(e, out);
            }
        }
        Stmt::ForIn { body, else_statement, .. } => {
            collect(body, out);
            if let Some(e) = else_statement {
                collect(e, out);
            }
        }
        Stmt::Block { body, .. } => body.iter().for_each(|s| collect(s, out)),
        Stmt::If { then_body, else_body, .. } => {
            collect(then_body, out);
            if let Some(e) = else_body {
                collect(e, out);
            }
        }
        Stmt::While { body, else_statement, .. } => {
            collect(body, out);
            if let Some(e) = else_statement {
                collect(e, out);
            }
        }
        Stmt::DoWhile { body, .. } => collect(body, out),
        _ => {}
    }
}

/// Every `(depth, slot)` pair directly assigned to, via `Assign`/`AssignOp`/
/// `IncDec` against a pre-resolved `AssignTarget::Local`, anywhere inside
/// `stmt`. A loop body is lowered once but runs many times; a slot this
/// returns must have its scalar-type hint invalidated before the body is
/// lowered; otherwise a typed load compiled against the type the slot held
/// on entry to the loop could read a value a later iteration's write gave a
/// different type.
pub fn assigned_local_addrs(stmt: &Stmt) -> HashSet<(u32, u32)> {
    let mut out = HashSet::new();
    walk_stmt(stmt, &mut out);
    out
}

fn note_target(target: &AssignTarget, out: &mut HashSet<(u32, u32)>) {
    if let AssignTarget::Local(r) = target {
        out.insert((r.depth, r.slot));
    }
}

fn walk_expr(expr: &Expr, out: &mut HashSet<(u32, u32)>) {
    match expr {
        Expr::Binary { left, right, .. } => {
            walk_expr(left, out);
            walk_expr(right, out);
        }
        Expr::Unary { operand, .. } => walk_expr(operand, out),
        Expr::Assign { target, value, .. } => {
            note_target(target, out);
            walk_expr(value, out);
        }
        Expr::AssignOp { target, value, .. } | Expr::AssignIfNull { target, value, .. } => {
            note_target(target, out);
            walk_expr(value, out);
        }
        Expr::IncDec { target, .. } => note_target(target, out),
        Expr::Conditional { cond, if_true, if_false } => {
            walk_expr(cond, out);
            walk_expr(if_true, out);
            walk_expr(if_false, out);
        }
        Expr::Elvis { left, right } => {
            walk_expr(left, out);
            walk_expr(right, out);
        }
        Expr::Call { callee, args, tail_block, .. } => {
            walk_expr(callee, out);
            for a in args {
                walk_expr(&a.value, out);
            }
            if let Some(b) = tail_block {
                walk_stmt(b, out);
            }
        }
        Expr::MethodCall { receiver, args, tail_block, .. } => {
            walk_expr(receiver, out);
            for a in args {
                walk_expr(&a.value, out);
            }
            if let Some(b) = tail_block {
                walk_stmt(b, out);
            }
        }
        Expr::Field { receiver, .. } => walk_expr(receiver, out),
        Expr::Index { receiver, index, .. } => {
            walk_expr(receiver, out);
            walk_expr(index, out);
        }
        Expr::Range { left, right, .. } => {
            walk_expr(left, out);
            walk_expr(right, out);
        }
        Expr::ListLiteral { entries } => {
            for e in entries {
                match e {
                    ListEntry::Element(e) | ListEntry::Spread(e) => walk_expr(e, out),
                }
            }
        }
        Expr::Statement(s) => walk_stmt(s, out),
        Expr::Const { .. }
        | Expr::LocalSlot(_)
        | Expr::LocalVar(_)
        | Expr::ImplicitThisMember { .. }
        | Expr::ValueFn { .. }
        | Expr::ThisMethodSlotCall { .. } => {}
    }
}

fn walk_stmt(stmt: &Stmt, out: &mut HashSet<(u32, u32)>) {
    match stmt {
        Stmt::ExpressionStatement(e) => walk_expr(e, out),
        Stmt::Block { body, .. } => body.iter().for_each(|s| walk_stmt(s, out)),
        Stmt::VarDecl { initializer, .. } => {
            if let Some(e) = initializer {
                walk_expr(e, out);
            }
        }
        Stmt::If { cond, then_body, else_body } => {
            walk_expr(cond, out);
            walk_stmt(then_body, out);
            if let Some(e) = else_body {
                walk_stmt(e, out);
            }
        }
        Stmt::ForIn { source, body, else_statement, .. } => {
            walk_expr(source, out);
            walk_stmt(body, out);
            if let Some(e) = else_statement {
                walk_stmt(e, out);
            }
        }
        Stmt::While { cond, body, else_statement, .. } => {
            walk_expr(cond, out);
            walk_stmt(body, out);
            if let Some(e) = else_statement {
                walk_stmt(e, out);
            }
        }
        Stmt::DoWhile { cond, body, .. } => {
            walk_stmt(body, out);
            walk_expr(cond, out);
        }
        Stmt::Break { value, .. } => {
            if let Some(e) = value {
                walk_expr(e, out);
            }
        }
        Stmt::Return { value, .. } => {
            if let Some(e) = value {
                walk_expr(e, out);
            }
        }
        Stmt::Throw(e) => walk_expr(e, out),
        Stmt::Continue { .. } | Stmt::ExtensionPropertyDecl { .. } | Stmt::DestructuringVarDecl { .. } | Stmt::When { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, LocalSlotRef, Literal};
    use crate::span::Position;

    fn local(name: &str, depth: u32, slot: u32) -> Expr {
        Expr::LocalSlot(LocalSlotRef { name: name.to_string(), slot, depth, is_mutable: true, is_delegated: false })
    }

    fn int(v: i64) -> Expr {
        Expr::Const { value: Literal::Int(v), pos: Position::unknown() }
    }

    #[test]
    fn assigned_local_addrs_finds_assign_op_inside_nested_block() {
        let target = AssignTarget::Local(LocalSlotRef { name: "sum".into(), slot: 0, depth: 0, is_mutable: true, is_delegated: false });
        let stmt = Stmt::Block {
            slot_plan: vec![],
            body: vec![Stmt::ExpressionStatement(Expr::AssignOp {
                target,
                op: BinOp::Plus,
                value: Box::new(local("i", 0, 1)),
                pos: Position::unknown(),
            })],
        };
        let found = assigned_local_addrs(&stmt);
        assert!(found.contains(&(0, 0)));
        assert!(!found.contains(&(0, 1)));
    }

    #[test]
    fn int_range_loop_vars_ignores_non_const_for_in() {
        let stmt = Stmt::ForIn {
            loop_var_name: "x".into(),
            source: Expr::Range { left: Box::new(int(0)), right: Box::new(int(10)), is_end_inclusive: false },
            const_range: None,
            body: Box::new(Stmt::Block { slot_plan: vec![], body: vec![] }),
            else_statement: None,
            label: None,
            can_break: true,
            loop_slot_plan: vec![],
        };
        assert!(int_range_loop_vars(&stmt).is_empty());
    }
}

//! The degradation path. `EVAL_FALLBACK`/`EVAL_REF`/`EVAL_STMT` all funnel
//! through [`eval_fallback_node`], which performs the four-step sync
//! protocol: sync locals out, evaluate, sync locals back in, box the
//! result.

use crate::ast::{Expr, Stmt};
use crate::host::{Arguments, Fallback, ObjHandle, RuntimeError};
use crate::vm::frame::Frame;

/// Copy every named local slot's current value back into the scope by name,
/// so the tree-walker (which reads by name, not by slot) sees up-to-date
/// state. A no-op when the function has no named local slots at all.
fn sync_locals_to_scope(frame: &Frame) {
    for (idx, meta) in frame.function.local_slots.iter().enumerate() {
        let Some(name) = &meta.name else { continue };
        let cell = &frame.locals[idx];
        use crate::vm::frame::LocalTag::*;
        let boxed = match cell.tag {
            Unknown => continue,
            Int => frame.current_scope.make_int(cell.int_val),
            Real => frame.current_scope.make_real(cell.real_val),
            Bool => frame.current_scope.make_bool(cell.bool_val),
            Obj => match &cell.obj_val {
                Some(v) => v.clone(),
                None => continue,
            },
        };
        frame.current_scope.update_slot_for(name, boxed);
    }
}

/// Copy scope-resident values for every named local back into the frame's
/// local slots, in case the walker wrote them.
fn sync_scope_to_locals(frame: &mut Frame) {
    let named: Vec<(usize, String)> = frame
        .function
        .local_slots
        .iter()
        .enumerate()
        .filter_map(|(idx, meta)| meta.name.clone().map(|n| (idx, n)))
        .collect();
    for (idx, name) in named {
        if let Some(crate::host::SlotRecord::Value(v)) = frame.current_scope.get(&name) {
            frame.locals[idx] = crate::vm::frame::LocalCell {
                tag: crate::vm::frame::LocalTag::Obj,
                int_val: 0,
                real_val: 0.0,
                bool_val: false,
                obj_val: Some(v),
            };
        }
    }
}

fn has_named_locals(frame: &Frame) -> bool {
    frame.function.local_slots.iter().any(|m| m.name.is_some())
}

/// `EVAL_FALLBACK(astId, dst)` / `CALL_FALLBACK`'s underlying mechanism.
pub fn eval_fallback_node(
    frame: &mut Frame,
    node: &Expr,
    call_args: Option<Arguments>,
) -> Result<ObjHandle, RuntimeError> {
    run_with_sync(frame, |frame, fallback| {
        fallback.eval_call(&frame.current_scope, node, call_args)
    })
}

/// `EVAL_REF(refConst, dst)`: evaluate a bare expression node.
pub fn eval_ref(frame: &mut Frame, node: &Expr) -> Result<ObjHandle, RuntimeError> {
    run_with_sync(frame, |frame, fallback| fallback.eval_expr(&frame.current_scope, node))
}

/// `EVAL_STMT(stmtConst, dst)`: evaluate a statement node used in expression
/// position.
pub fn eval_stmt(frame: &mut Frame, node: &Stmt) -> Result<ObjHandle, RuntimeError> {
    run_with_sync(frame, |frame, fallback| fallback.eval_stmt(&frame.current_scope, node))
}

fn run_with_sync(
    frame: &mut Frame,
    body: impl FnOnce(&mut Frame, &dyn Fallback) -> Result<ObjHandle, RuntimeError>,
) -> Result<ObjHandle, RuntimeError> {
    let has_locals = has_named_locals(frame);
    if has_locals {
        sync_locals_to_scope(frame);
    }
    let fallback = frame.fallback.clone();
    let result = body(frame, fallback.as_ref());
    if has_locals {
        sync_scope_to_locals(frame);
    }
    result
}

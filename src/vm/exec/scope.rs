//! `PUSH_SCOPE`/`POP_SCOPE`/`RESOLVE_SCOPE_SLOT`/`LOAD_*_ADDR`/`STORE_*_ADDR`.

use crate::bytecode::constant::SlotPlanEntry;
use crate::bytecode::AddrId;
use crate::host::{RuntimeError, Scope};
use crate::vm::frame::{AddrEntry, Frame, ScopePush};

/// `PUSH_SCOPE(planConst)`. If the host allows applying the plan in place
/// (no name conflicts with the current scope), this is a *virtual* push: it
/// mutates the current scope and records a snapshot. Otherwise a real child
/// scope is created and becomes current.
pub fn push_scope(frame: &mut Frame, plan: &[SlotPlanEntry]) {
    if !frame.current_scope.has_slot_plan_conflict(plan) {
        let snapshot = frame.current_scope.apply_slot_plan_in_place(plan);
        frame.scope_push_stack.push(ScopePush::Virtual { snapshot: snapshot.clone() });
        frame.slot_plan_stack.push(snapshot);
    } else {
        // Declaration proper happens via DECL_LOCAL; PUSH_SCOPE only
        // establishes the child scope subsequent declarations land in.
        let parent = frame.current_scope.clone();
        let child = parent.create_child_scope(Some(parent.pos()));
        frame.current_scope = child;
        frame.scope_push_stack.push(ScopePush::Real { parent });
    }
}

/// `POP_SCOPE`. Restores the snapshot (virtual push) or pops to the parent
/// (real push). A pop with nothing to pop is a runtime invariant violation
///.
pub fn pop_scope(frame: &mut Frame) -> Result<(), RuntimeError> {
    match frame.scope_push_stack.pop() {
        Some(ScopePush::Virtual { snapshot }) => {
            frame.current_scope.restore_slot_plan(snapshot);
            frame.slot_plan_stack.pop();
            Ok(())
        }
        Some(ScopePush::Real { parent }) => {
            frame.current_scope = parent;
            Ok(())
        }
        None => Err(RuntimeError::new("POP_SCOPE with nothing to pop")),
    }
}

/// `RESOLVE_SCOPE_SLOT(scopeSlot, addr)`. Resolves the compile-time scope
/// slot into the addr table exactly once per frame; later calls targeting an
/// already-resolved addr are no-ops.
pub fn resolve_scope_slot(
    frame: &mut Frame,
    scope_slot: crate::bytecode::SlotId,
    addr: AddrId,
) {
    let meta = &frame.function.scope_slots[scope_slot as usize];
    let entry = AddrEntry {
        scope: frame.current_scope.clone(),
        slot_index_in_scope: meta.index_in_scope as usize,
        scope_slot_id: scope_slot,
    };
    frame.resolve_addr(addr, entry);
}

pub fn load_obj_addr(frame: &Frame, addr: AddrId) -> Result<crate::host::ObjHandle, RuntimeError> {
    let entry = frame.addr(addr)?;
    match entry.scope.get_slot_record(entry.slot_index_in_scope) {
        crate::host::SlotRecord::Value(v) => Ok(v),
        crate::host::SlotRecord::Unset => {
            // Tolerate forward declarations by retrying via name lookup is a
            // host-scope concern; at the
            // addr layer we simply surface the sentinel as an error for the
            // caller (typically GET_NAME) to retry with.
            Err(RuntimeError::new("scope slot is unset"))
        }
    }
}

pub fn store_obj_addr(frame: &Frame, addr: AddrId, value: crate::host::ObjHandle) -> Result<(), RuntimeError> {
    let entry = frame.addr(addr)?;
    entry.scope.set_slot_value(entry.slot_index_in_scope, value);
    Ok(())
}

/// Typed `LOAD_*_ADDR`/`STORE_*_ADDR` variants unbox/box through the scope
/// that owns the addr, not necessarily `frame.current_scope` — an addr may
/// point at an outer lexical scope.
pub fn load_int_addr(frame: &Frame, addr: AddrId) -> Result<i64, RuntimeError> {
    load_obj_addr(frame, addr)?.to_long()
}

pub fn load_real_addr(frame: &Frame, addr: AddrId) -> Result<f64, RuntimeError> {
    load_obj_addr(frame, addr)?.to_double()
}

pub fn load_bool_addr(frame: &Frame, addr: AddrId) -> Result<bool, RuntimeError> {
    Ok(load_obj_addr(frame, addr)?.to_bool())
}

pub fn store_int_addr(frame: &Frame, addr: AddrId, value: i64) -> Result<(), RuntimeError> {
    let boxed = frame.addr(addr)?.scope.make_int(value);
    store_obj_addr(frame, addr, boxed)
}

pub fn store_real_addr(frame: &Frame, addr: AddrId, value: f64) -> Result<(), RuntimeError> {
    let boxed = frame.addr(addr)?.scope.make_real(value);
    store_obj_addr(frame, addr, boxed)
}

pub fn store_bool_addr(frame: &Frame, addr: AddrId, value: bool) -> Result<(), RuntimeError> {
    let boxed = frame.addr(addr)?.scope.make_bool(value);
    store_obj_addr(frame, addr, boxed)
}

//! Compiler state threaded through lowering: scope-slot collection,
//! per-slot scalar-type tracking, and the loop context stack.
//!
//! Named variable storage goes through the scope/addr mechanism
//! (`RESOLVE_SCOPE_SLOT` + `LOAD_OBJ_ADDR`/`STORE_OBJ_ADDR`, or their typed
//! `*_INT_ADDR`/`*_REAL_ADDR`/`*_BOOL_ADDR` counterparts once a slot's
//! scalar type is known); local slots are reserved for anonymous
//! intermediate values produced while lowering a single expression. A
//! slot's scalar-type hint is tracked monotonically from its declaration and
//! writes, reset to Obj/unknown at the merge point of an `if`'s two arms
//! whenever they disagree, and invalidated up front for anything a loop
//! body itself reassigns (`passes::assigned_local_addrs`) — both needed so
//! a typed load can never observe a value a different path stored through
//! the boxed channel.

use std::collections::{HashMap, HashSet};

use crate::builder::{Builder, Label};
use crate::bytecode::{AddrId, ScopeSlotMeta, SlotId};

use super::expr::Ty;

/// One loop's compile-time bookkeeping. `break_label` doubles as the
/// loop's exit point; `result_slot`
/// is only set when the loop is being compiled in expression position
/// (`Expr::Statement` wrapping a loop) so a labelled `break value` has
/// somewhere to deposit its payload.
pub struct LoopCtx {
    pub label: Option<String>,
    pub break_label: Label,
    pub continue_label: Label,
    pub break_flag_slot: SlotId,
    pub result_slot: Option<SlotId>,
}

pub struct Ctx {
    pub builder: Builder,
    next_local: SlotId,
    next_addr: AddrId,
    scope_slots: Vec<ScopeSlotMeta>,
    /// Keyed by the parser's `(depth, slot-within-scope)` pair so repeated
    /// references to the same variable share one addr, resolved once per
    /// frame.
    addr_by_var: HashMap<(u32, u32), AddrId>,
    pub loop_stack: Vec<LoopCtx>,
    pub return_labels: HashSet<String>,
    /// Shadows a name onto a native-typed temp for the duration of a
    /// compile-time integer-range loop body, so reads of the loop variable
    /// hit the typed slot directly instead of round-tripping through
    /// `RESOLVE_SCOPE_SLOT`/`LOAD_OBJ_ADDR`. Innermost-first, so nested
    /// loops reusing the same name shadow correctly.
    loop_var_overrides: Vec<(String, SlotId)>,
    slot_scalar_ty: HashMap<(u32, u32), Ty>,
    int_loop_var_names: HashSet<String>,
    range_typed_names: HashSet<String>,
}

impl Ctx {
    pub fn new(name: impl Into<String>, range_typed_names: HashSet<String>) -> Self {
        Self {
            builder: Builder::new(name),
            next_local: 0,
            next_addr: 0,
            scope_slots: Vec::new(),
            addr_by_var: HashMap::new(),
            loop_stack: Vec::new(),
            return_labels: HashSet::new(),
            loop_var_overrides: Vec::new(),
            slot_scalar_ty: HashMap::new(),
            int_loop_var_names: HashSet::new(),
            range_typed_names,
        }
    }

    pub fn push_loop_var_override(&mut self, name: String, slot: SlotId) {
        self.loop_var_overrides.push((name, slot));
    }

    pub fn pop_loop_var_override(&mut self) {
        self.loop_var_overrides.pop();
    }

    pub fn lookup_loop_var_override(&self, name: &str) -> Option<SlotId> {
        self.loop_var_overrides.iter().rev().find(|(n, _)| n == name).map(|(_, s)| *s)
    }

    /// Allocate a fresh, never-reused local slot for an intermediate value.
    pub fn alloc_temp(&mut self) -> SlotId {
        let slot = self.next_local;
        self.next_local += 1;
        slot
    }

    pub fn local_count(&self) -> u32 {
        self.next_local
    }

    /// Resolve a variable reference to its addr, minting a new scope-slot
    /// entry and emitting `RESOLVE_SCOPE_SLOT` the first time this
    /// `(depth, slot)` pair is seen. Runtime addr resolution is itself
    /// idempotent, but the compiler still only needs to mint one addr id
    /// per distinct variable.
    pub fn resolve_var(&mut self, depth: u32, slot_in_scope: u32, debug_name: Option<String>) -> AddrId {
        if let Some(&addr) = self.addr_by_var.get(&(depth, slot_in_scope)) {
            return addr;
        }
        let scope_slot_id = self.scope_slots.len() as SlotId;
        self.scope_slots.push(ScopeSlotMeta { depth, index_in_scope: slot_in_scope, debug_name });
        let addr = self.next_addr;
        self.next_addr += 1;
        self.builder.emit(crate::bytecode::Instr::ResolveScopeSlot { scope_slot: scope_slot_id, addr });
        self.addr_by_var.insert((depth, slot_in_scope), addr);
        addr
    }

    pub fn into_parts(self) -> (Builder, u32, u32, Vec<ScopeSlotMeta>, HashSet<String>) {
        (self.builder, self.next_local, self.next_addr, self.scope_slots, self.return_labels)
    }

    /// Innermost loop matching `label`, or the innermost loop at all when
    /// `label` is `None` (unlabeled `break`/`continue` always targets the
    /// nearest enclosing loop regardless of its own label).
    pub fn find_loop(&self, label: Option<&str>) -> Result<&LoopCtx, super::error::CompileError> {
        let found = match label {
            None => self.loop_stack.last(),
            Some(name) => self.loop_stack.iter().rev().find(|l| l.label.as_deref() == Some(name)),
        };
        found.ok_or_else(|| super::error::CompileError::InvariantViolated("break/continue with no matching loop".into()))
    }

    pub fn set_int_loop_var_names(&mut self, names: HashSet<String>) {
        self.int_loop_var_names = names;
    }

    /// Whether `name` was collected by [`super::passes::int_range_loop_vars`]
    /// as a compile-time integer-range loop variable anywhere in the
    /// function. Informational: the actual typed-temp treatment for a loop
    /// variable's reads is driven by `loop_var_overrides`, established
    /// per-loop at the point its own `ForIn` is lowered.
    #[allow(dead_code)]
    pub fn is_int_loop_var(&self, name: &str) -> bool {
        self.int_loop_var_names.contains(name)
    }

    /// Whether `name` was handed in as "already typed as a range" — the
    /// compiler's input for for-in strategy 3.
    pub fn is_range_typed(&self, name: &str) -> bool {
        self.range_typed_names.contains(name)
    }

    pub fn slot_ty(&self, key: (u32, u32)) -> Option<Ty> {
        self.slot_scalar_ty.get(&key).copied()
    }

    pub fn set_slot_ty(&mut self, key: (u32, u32), ty: Option<Ty>) {
        match ty {
            Some(t) => {
                self.slot_scalar_ty.insert(key, t);
            }
            None => {
                self.slot_scalar_ty.remove(&key);
            }
        }
    }

    pub fn invalidate_slot_ty(&mut self, key: (u32, u32)) {
        self.slot_scalar_ty.remove(&key);
    }

    pub fn snapshot_slot_tys(&self) -> HashMap<(u32, u32), Ty> {
        self.slot_scalar_ty.clone()
    }

    pub fn restore_slot_tys(&mut self, snapshot: HashMap<(u32, u32), Ty>) {
        self.slot_scalar_ty = snapshot;
    }

    /// After compiling both arms of an `if`, a slot keeps its scalar
    /// specialization only where both arms agree; anything else reverts to
    /// Obj so a later typed load can't observe a value the other arm wrote
    /// through the boxed channel.
    pub fn merge_slot_tys_with(&mut self, other: HashMap<(u32, u32), Ty>) {
        self.slot_scalar_ty.retain(|k, t| other.get(k) == Some(t));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_only_slots_both_sides_agree_on() {
        let mut ctx = Ctx::new("t", HashSet::new());
        ctx.set_slot_ty((0, 0), Some(Ty::Int));
        ctx.set_slot_ty((0, 1), Some(Ty::Real));
        let then_tys = ctx.snapshot_slot_tys();

        ctx.set_slot_ty((0, 0), Some(Ty::Bool));
        ctx.set_slot_ty((0, 1), Some(Ty::Real));

        ctx.merge_slot_tys_with(then_tys);

        assert_eq!(ctx.slot_ty((0, 0)), None);
        assert_eq!(ctx.slot_ty((0, 1)), Some(Ty::Real));
    }

    #[test]
    fn snapshot_and_restore_roundtrip() {
        let mut ctx = Ctx::new("t", HashSet::new());
        ctx.set_slot_ty((1, 2), Some(Ty::Int));
        let snap = ctx.snapshot_slot_tys();
        ctx.set_slot_ty((1, 2), Some(Ty::Obj));
        ctx.restore_slot_tys(snap);
        assert_eq!(ctx.slot_ty((1, 2)), Some(Ty::Int));
    }

    #[test]
    fn invalidate_clears_a_single_slot() {
        let mut ctx = Ctx::new("t", HashSet::new());
        ctx.set_slot_ty((0, 0), Some(Ty::Int));
        ctx.invalidate_slot_ty((0, 0));
        assert_eq!(ctx.slot_ty((0, 0)), None);
    }
}

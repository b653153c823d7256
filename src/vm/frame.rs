//! The transient execution record. Lifetime = one invocation.

use std::rc::Rc;

use crate::bytecode::{AddrId, CompiledFunction, Instr, Ip, SlotId};
use crate::host::{Fallback, ObjHandle, RuntimeError, Scope, SlotPlanSnapshot};
use crate::vm::inline_cache::MethodCache;

/// Which channel of a [`LocalCell`] was written last. Invariant: the most
/// recent write to that slot must have been with a matching domain opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTag {
    Unknown,
    Int,
    Real,
    Bool,
    Obj,
}

/// A four-channel, type-tagged local-slot cell.
/// All four channels are always allocated — this trades memory for avoiding
/// a dynamic dispatch on every local read/write, the same tradeoff
/// `subset_julia_vm`'s per-type-map `Frame` makes (it keeps a separate
/// `HashMap` per scalar type rather than one `HashMap<String, Value>`).
#[derive(Debug, Clone)]
pub struct LocalCell {
    pub tag: LocalTag,
    pub int_val: i64,
    pub real_val: f64,
    pub bool_val: bool,
    pub obj_val: Option<ObjHandle>,
}

impl Default for LocalCell {
    fn default() -> Self {
        Self { tag: LocalTag::Unknown, int_val: 0, real_val: 0.0, bool_val: false, obj_val: None }
    }
}

/// One resolved addr table entry. `None` until the
/// corresponding `RESOLVE_SCOPE_SLOT` executes.
#[derive(Clone)]
pub struct AddrEntry {
    pub scope: Rc<dyn Scope>,
    pub slot_index_in_scope: usize,
    pub scope_slot_id: u32,
}

/// One entry of the scope-push stack
/// semantics"): either a real child scope was created, or the current
/// scope's slot plan was mutated in place with a snapshot to restore.
pub enum ScopePush {
    Real { parent: Rc<dyn Scope> },
    Virtual { snapshot: SlotPlanSnapshot },
}

/// The transient per-invocation execution record.
pub struct Frame {
    pub function: Rc<CompiledFunction>,
    pub ip: Ip,
    pub current_scope: Rc<dyn Scope>,
    pub scope_push_stack: Vec<ScopePush>,
    /// Parallel stack tracking whether each `PUSH_SLOT_PLAN` increased the
    /// virtual-scope depth count
    /// collection"); used only for the balance invariant
    /// property 3), since addr resolution already captures the concrete
    /// scope reference at resolve time.
    pub slot_plan_stack: Vec<SlotPlanSnapshot>,
    pub addr_table: Vec<Option<AddrEntry>>,
    pub locals: Vec<LocalCell>,
    pub arg_base: SlotId,
    pub method_cache: MethodCache,
    pub result: Option<ObjHandle>,
    /// The host tree-walker this frame's `EVAL_*`/`CALL_FALLBACK` opcodes
    /// delegate to. Shared, not owned,
    /// since the same `Fallback` serves every frame in a call chain.
    pub fallback: Rc<dyn Fallback>,
}

impl Frame {
    pub fn new(
        function: Rc<CompiledFunction>,
        current_scope: Rc<dyn Scope>,
        arg_base: SlotId,
        fallback: Rc<dyn Fallback>,
    ) -> Self {
        let local_count = function.local_count as usize;
        let addr_count = function.addr_count as usize;
        Self {
            function,
            ip: 0,
            current_scope,
            scope_push_stack: Vec::new(),
            slot_plan_stack: Vec::new(),
            addr_table: vec![None; addr_count],
            locals: (0..local_count).map(|_| LocalCell::default()).collect(),
            arg_base,
            method_cache: MethodCache::new(),
            result: None,
            fallback,
        }
    }

    /// Fetch the next instruction and advance `ip`. Panics if `ip` runs past
    /// the end of the code array — a compiler bug (every path must end in a
    /// `RET*`/`THROW`), not a recoverable runtime condition.
    pub fn fetch(&mut self) -> &Instr {
        let instr = &self.function.instructions[self.ip as usize];
        self.ip += 1;
        instr
    }

    pub fn local(&self, slot: SlotId) -> &LocalCell {
        &self.locals[slot as usize]
    }

    pub fn local_mut(&mut self, slot: SlotId) -> &mut LocalCell {
        &mut self.locals[slot as usize]
    }

    pub fn set_int(&mut self, slot: SlotId, v: i64) {
        let cell = self.local_mut(slot);
        cell.tag = LocalTag::Int;
        cell.int_val = v;
    }

    pub fn set_real(&mut self, slot: SlotId, v: f64) {
        let cell = self.local_mut(slot);
        cell.tag = LocalTag::Real;
        cell.real_val = v;
    }

    pub fn set_bool(&mut self, slot: SlotId, v: bool) {
        let cell = self.local_mut(slot);
        cell.tag = LocalTag::Bool;
        cell.bool_val = v;
    }

    pub fn set_obj(&mut self, slot: SlotId, v: ObjHandle) {
        let cell = self.local_mut(slot);
        cell.tag = LocalTag::Obj;
        cell.obj_val = Some(v);
    }

    pub fn get_int(&self, slot: SlotId) -> i64 {
        self.local(slot).int_val
    }

    pub fn get_real(&self, slot: SlotId) -> f64 {
        self.local(slot).real_val
    }

    pub fn get_bool(&self, slot: SlotId) -> bool {
        self.local(slot).bool_val
    }

    pub fn get_obj(&self, slot: SlotId) -> ObjHandle {
        self.local(slot)
            .obj_val
            .clone()
            .expect("slot read as Obj before any Obj-domain write")
    }

    /// Resolve `addr` into the frame's addr table; a second
    /// `RESOLVE_SCOPE_SLOT` targeting the same addr is a no-op if already
    /// resolved.
    pub fn resolve_addr(&mut self, addr: AddrId, entry: AddrEntry) {
        let slot = &mut self.addr_table[addr as usize];
        if slot.is_none() {
            *slot = Some(entry);
        }
    }

    pub fn addr(&self, addr: AddrId) -> Result<&AddrEntry, RuntimeError> {
        self.addr_table[addr as usize]
            .as_ref()
            .ok_or_else(|| RuntimeError::new("addr read before RESOLVE_SCOPE_SLOT"))
    }
}

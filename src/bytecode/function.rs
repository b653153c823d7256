//! The immutable compiled-function value.

use std::collections::HashSet;
use std::rc::Rc;

use super::{ConstantPool, Instr};

/// Scope-slot metadata keyed by slot index.
#[derive(Debug, Clone)]
pub struct ScopeSlotMeta {
    pub depth: u32,
    pub index_in_scope: u32,
    pub debug_name: Option<String>,
}

/// Local-slot metadata keyed by slot index.
#[derive(Debug, Clone)]
pub struct LocalSlotMeta {
    pub name: Option<String>,
    pub mutable: bool,
    pub depth: u32,
}

/// An immutable, shareable compiled function. Lifecycle:
/// created once by [`crate::builder::Builder::build`], then referenced by
/// zero or more [`crate::host::Thunk`]s; disposed with the enclosing AST
/// references.
///
/// Wrapped in `Rc` at the point of construction so a single compiled
/// function can back multiple closures over different captured scopes
/// without recompilation.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub name: String,
    /// Parameter names in declaration order, bound into the callee's scope
    /// by the VM at call entry: the marshalled `Arguments` are bound to the
    /// callee's declared parameters before the first instruction runs.
    pub params: Vec<String>,
    pub local_count: u32,
    pub addr_count: u32,
    pub scope_slots: Vec<ScopeSlotMeta>,
    pub local_slots: Vec<LocalSlotMeta>,
    pub constants: ConstantPool,
    pub instructions: Vec<Instr>,
    /// Labels this function owns: `return@label` targeting one of these
    /// behaves as a plain `RET`.
    pub return_labels: HashSet<String>,
}

impl CompiledFunction {
    /// Total addressable slot count, `S + L`.
    pub fn slot_count(&self) -> u32 {
        self.scope_slots.len() as u32 + self.local_count
    }

    pub fn into_shared(self) -> Rc<CompiledFunction> {
        Rc::new(self)
    }
}

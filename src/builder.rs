//! The forward-only assembler.
//!
//! Grounded on `subset_julia_vm`'s own code-emission helpers (its compiler
//! builds up a `Vec<Instr>` incrementally and patches jump targets once the
//! target position is known, e.g. `core_compiler.rs`'s loop/if lowering) —
//! this crate makes that pattern explicit as a standalone `Builder` type
//! instead of inlining it into the compiler.

use std::collections::HashMap;

use crate::ast::Stmt;
use crate::bytecode::{CompiledFunction, Constant, Instr, Ip, LocalSlotMeta, ScopeSlotMeta};

/// A forward reference to an instruction position, minted by [`Builder::label`]
/// and bound by [`Builder::mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// Error raised when [`Builder::build`] finds a label that was referenced but
/// never marked — a fatal compile-time error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedLabel(pub Label);

impl std::fmt::Display for UnresolvedLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "label {:?} referenced but never marked", self.0)
    }
}

impl std::error::Error for UnresolvedLabel {}

/// One pending `LabelRef` operand site: the instruction index and which
/// operand (jump target, vs. the `JmpIfTrue`/`JmpIfFalse` target) needs
/// patching once the label resolves.
#[derive(Debug, Clone, Copy)]
enum PendingSite {
    Jmp(usize),
    JmpIfTrue(usize),
    JmpIfFalse(usize),
}

pub struct Builder {
    name: String,
    instructions: Vec<Instr>,
    constants: crate::bytecode::constant::ConstantPool,
    fallback_stmts: Vec<Stmt>,
    next_label: u32,
    /// Resolved position of each marked label ("instruction-index-of-next").
    resolved: HashMap<Label, Ip>,
    /// Labels emitted via `Jmp`/`JmpIfTrue`/`JmpIfFalse` before their target
    /// was known, keyed by the label they reference.
    pending: HashMap<Label, Vec<PendingSite>>,
}

impl Builder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Vec::new(),
            constants: crate::bytecode::constant::ConstantPool::new(),
            fallback_stmts: Vec::new(),
            next_label: 0,
            resolved: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// `addConst(c) -> constId`.
    pub fn add_const(&mut self, c: Constant) -> crate::bytecode::ConstId {
        self.constants.push(c)
    }

    /// `addFallback(stmt) -> fallbackId`: appends an opaque AST reference,
    /// used by callers that need a stable index into `fallback-statements[]`
    /// distinct from the constant pool's `StatementVal` (most callers should
    /// just wrap the statement in a `Constant::StatementVal` via
    /// `add_const`; this exists for parity with `CompiledFunction`'s
    /// `fallback-statements[]` field).
    pub fn add_fallback(&mut self, stmt: Stmt) -> u32 {
        let id = self.fallback_stmts.len() as u32;
        self.fallback_stmts.push(stmt);
        id
    }

    /// `emit(opcode, operands...)`. Operand-count validity is enforced by
    /// `Instr` being a Rust enum: a caller cannot construct a variant with
    /// the wrong arity.
    pub fn emit(&mut self, instr: Instr) -> Ip {
        let ip = self.instructions.len() as Ip;
        self.instructions.push(instr);
        ip
    }

    /// Emit a `Jmp` whose target is a not-yet-marked label.
    pub fn emit_jmp(&mut self, label: Label) {
        let site = self.instructions.len();
        self.instructions.push(Instr::Jmp { target: 0 });
        self.defer(label, PendingSite::Jmp(site));
    }

    pub fn emit_jmp_if_true(&mut self, cond: crate::bytecode::SlotId, label: Label) {
        let site = self.instructions.len();
        self.instructions.push(Instr::JmpIfTrue { cond, target: 0 });
        self.defer(label, PendingSite::JmpIfTrue(site));
    }

    pub fn emit_jmp_if_false(&mut self, cond: crate::bytecode::SlotId, label: Label) {
        let site = self.instructions.len();
        self.instructions.push(Instr::JmpIfFalse { cond, target: 0 });
        self.defer(label, PendingSite::JmpIfFalse(site));
    }

    fn defer(&mut self, label: Label, site: PendingSite) {
        if let Some(&ip) = self.resolved.get(&label) {
            self.patch(site, ip);
        } else {
            self.pending.entry(label).or_default().push(site);
        }
    }

    fn patch(&mut self, site: PendingSite, ip: Ip) {
        match site {
            PendingSite::Jmp(i) => {
                if let Instr::Jmp { target } = &mut self.instructions[i] {
                    *target = ip;
                }
            }
            PendingSite::JmpIfTrue(i) => {
                if let Instr::JmpIfTrue { target, .. } = &mut self.instructions[i] {
                    *target = ip;
                }
            }
            PendingSite::JmpIfFalse(i) => {
                if let Instr::JmpIfFalse { target, .. } = &mut self.instructions[i] {
                    *target = ip;
                }
            }
        }
    }

    /// `label() -> Label`: mint a fresh, forward reference.
    pub fn label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    /// `mark(Label)`: bind a label to the position of the instruction
    /// emitted *after* this call.
    pub fn mark(&mut self, label: Label) {
        let ip = self.instructions.len() as Ip;
        self.resolved.insert(label, ip);
        if let Some(sites) = self.pending.remove(&label) {
            for site in sites {
                self.patch(site, ip);
            }
        }
    }

    pub fn current_ip(&self) -> Ip {
        self.instructions.len() as Ip
    }

    /// `build(...) -> CompiledFunction`.
    ///
    /// # Errors
    /// Returns [`UnresolvedLabel`] if any minted label was never [`mark`](Self::mark)ed.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        mut self,
        params: Vec<String>,
        local_count: u32,
        addr_count: u32,
        scope_slots: Vec<ScopeSlotMeta>,
        local_slots: Vec<LocalSlotMeta>,
        return_labels: std::collections::HashSet<String>,
    ) -> Result<CompiledFunction, UnresolvedLabel> {
        if let Some((&label, _)) = self.pending.iter().next() {
            return Err(UnresolvedLabel(label));
        }
        // fallback_stmts are folded into the constant pool as StatementVal
        // entries so CompiledFunction only needs to expose `constants`;
        // retained here only until build() so add_fallback's id space stays
        // distinct from add_const's during lowering.
        for stmt in self.fallback_stmts.drain(..) {
            self.constants.push(Constant::StatementVal(std::rc::Rc::new(stmt)));
        }
        Ok(CompiledFunction {
            name: self.name,
            params,
            local_count,
            addr_count,
            scope_slots,
            local_slots,
            constants: self.constants,
            instructions: self.instructions,
            return_labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::SlotId;

    #[test]
    fn unresolved_label_is_fatal() {
        let mut b = Builder::new("f");
        let l = b.label();
        let s: SlotId = 0;
        b.emit_jmp_if_false(s, l);
        let err = b.build(vec![], 1, 0, vec![], vec![], Default::default());
        assert!(err.is_err());
    }

    #[test]
    fn forward_label_patches_after_mark() {
        let mut b = Builder::new("f");
        let end = b.label();
        b.emit_jmp(end);
        let nop_ip = b.emit(Instr::Nop);
        b.mark(end);
        let f = b.build(vec![], 0, 0, vec![], vec![], Default::default()).unwrap();
        assert_eq!(f.instructions[0], Instr::Jmp { target: nop_ip + 1 });
    }

    #[test]
    fn backward_label_patches_immediately() {
        let mut b = Builder::new("f");
        let top = b.label();
        b.mark(top);
        b.emit(Instr::Nop);
        b.emit_jmp(top);
        let f = b.build(vec![], 0, 0, vec![], vec![], Default::default()).unwrap();
        assert_eq!(f.instructions[1], Instr::Jmp { target: 0 });
    }
}

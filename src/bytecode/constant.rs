//! The constant pool. Append-only once the enclosing function is built —
//! `Builder::add_const` is the only writer, and `CompiledFunction::constants`
//! is immutable thereafter.

use std::rc::Rc;

use crate::ast::{Expr, Stmt, Visibility};
use crate::host::ObjHandle;
use crate::span::Position;

/// `SlotPlan` constant: maps a block or loop's declared names to scope-slot
/// indices, applied by `PUSH_SCOPE`/`PUSH_SLOT_PLAN`.
pub type SlotPlanEntry = (String, u32);

/// One argument slot of a `CallArgsPlan` constant.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgPlanEntry {
    pub name: Option<String>,
    pub is_splat: bool,
}

/// `CallArgsPlan` constant: describes a call site whose arguments are not a
/// plain positional run (named arguments, splats, or a tail block present).
#[derive(Debug, Clone, PartialEq)]
pub struct CallArgsPlan {
    pub entries: Vec<ArgPlanEntry>,
    pub tail_block: bool,
}

/// `LocalDecl` constant metadata attached to `DECL_LOCAL`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDeclInfo {
    pub name: String,
    pub mutable: bool,
    pub visibility: Visibility,
    pub transient: bool,
}

/// `ExtensionPropertyDecl` constant metadata attached to `DECL_EXT_PROPERTY`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionPropertyDeclInfo {
    pub type_name: String,
    pub name: String,
    pub visibility: Visibility,
}

/// One entry of the constant pool.
///
/// `Obj`, AST, and factory payloads are not `PartialEq`/`Serialize`-able in
/// general (they carry host or `Rc` state), so this enum intentionally does
/// not derive those traits uniformly; callers needing equality compare by
/// constant-pool index instead, matching how the VM and builder already
/// address constants.
#[derive(Debug, Clone)]
pub enum Constant {
    Int64(i64),
    Float64(f64),
    Bool(bool),
    Str(Rc<str>),
    ObjRef(ObjHandle),
    PosVal(Position),
    LocalDecl(LocalDeclInfo),
    ExtensionPropertyDecl(ExtensionPropertyDeclInfo),
    SlotPlan(Vec<SlotPlanEntry>),
    CallArgsPlan(CallArgsPlan),
    ListLiteralPlan(Vec<bool>),
    /// Raw AST reference retained for `EVAL_REF`/`CALL_FALLBACK` fallback
    /// execution. The enclosing `CompiledFunction` borrows the AST and must
    /// not outlive the host compilation unit that owns it
    /// "Cyclic references"); sharing via `Rc` models that lifetime tie
    /// without requiring unsafe code or an arena.
    Ref(Rc<Expr>),
    StatementVal(Rc<Stmt>),
    /// `ValueFn` constant: a host-callable factory invoked to materialize a
    /// closure object capturing the current scope.
    ValueFn(Rc<dyn Fn() -> ObjHandle>),
}

/// The function's constant pool. A thin `Vec` wrapper so indices are typed
/// (`ConstId`) rather than raw `usize`, and so `Builder::add_const` has a
/// single append point to keep.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, c: Constant) -> super::ConstId {
        let id = self.entries.len() as u32;
        self.entries.push(c);
        id
    }

    pub fn get(&self, id: super::ConstId) -> &Constant {
        &self.entries[id as usize]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.entries.iter()
    }
}

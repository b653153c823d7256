//! The host collaborator interfaces the VM borrows against.
//!
//! `Obj`/`ObjClass`/`Scope` are owned by the host object model, which is
//! explicitly out of scope: this module fixes only the
//! surface the VM and compiler call through. A minimal reference
//! implementation used by this crate's own tests lives in
//! [`crate::test_support`].

use std::rc::Rc;

use crate::span::Position;

/// Opaque handle to a host value. The VM only ever moves these by value and
/// calls the `Obj` methods below on them; it never inspects payload.
pub type ObjHandle = Rc<dyn Obj>;

/// A stable identifier for a host class, used by the virtual-method inline
/// cache to detect a receiver whose shape has changed.
pub type ClassId = u64;

/// A monotonically increasing version bumped whenever a class's method
/// table is mutated, so a cached `(ClassId, LayoutVersion)` pair can be
/// compared cheaply against the receiver's current identity.
pub type LayoutVersion = u64;

/// Record returned by field/variable reads; distinguishes "present" from the
/// `ObjUnset` sentinel so the VM can retry via name lookup.
#[derive(Debug, Clone)]
pub enum SlotRecord {
    Value(ObjHandle),
    Unset,
}

/// Every host value supports this surface
/// interface"). Boxed scalars (`Int`/`Real`/`Bool`) and full objects both
/// implement it; the VM treats them uniformly once boxed.
pub trait Obj {
    fn plus(&self, scope: &dyn Scope, other: &ObjHandle) -> Result<ObjHandle, RuntimeError>;
    fn minus(&self, scope: &dyn Scope, other: &ObjHandle) -> Result<ObjHandle, RuntimeError>;
    fn mul(&self, scope: &dyn Scope, other: &ObjHandle) -> Result<ObjHandle, RuntimeError>;
    fn div(&self, scope: &dyn Scope, other: &ObjHandle) -> Result<ObjHandle, RuntimeError>;
    fn rem(&self, scope: &dyn Scope, other: &ObjHandle) -> Result<ObjHandle, RuntimeError>;

    fn compare_to(&self, scope: &dyn Scope, other: &ObjHandle) -> Result<i32, RuntimeError>;
    fn equals(&self, scope: &dyn Scope, other: &ObjHandle) -> bool;
    fn contains(&self, scope: &dyn Scope, other: &ObjHandle) -> Result<bool, RuntimeError>;

    fn call_on(&self, scope: &dyn Scope, args: &Arguments) -> Result<ObjHandle, RuntimeError>;
    fn get_at(&self, scope: &dyn Scope, index: &ObjHandle) -> Result<ObjHandle, RuntimeError>;
    fn put_at(&self, scope: &dyn Scope, index: &ObjHandle, value: ObjHandle) -> Result<(), RuntimeError>;

    fn read_field(&self, scope: &dyn Scope, name: &str) -> Result<SlotRecord, RuntimeError>;
    fn write_field(&self, scope: &dyn Scope, name: &str, value: ObjHandle) -> Result<(), RuntimeError>;

    fn invoke_instance_method(
        &self,
        scope: &dyn Scope,
        name: &str,
        args: &Arguments,
    ) -> Result<ObjHandle, RuntimeError>;

    fn is_instance_of(&self, class_name: &str) -> bool;
    fn class_id(&self) -> ClassId;
    fn layout_version(&self) -> LayoutVersion;

    fn to_bool(&self) -> bool;
    fn to_long(&self) -> Result<i64, RuntimeError>;
    fn to_double(&self) -> Result<f64, RuntimeError>;
    fn to_display_string(&self, scope: &dyn Scope) -> String;

    fn by_value_copy(&self) -> ObjHandle;
    fn inspect(&self) -> String;

    fn is_null(&self) -> bool {
        false
    }
    fn is_unset(&self) -> bool {
        false
    }

    /// Splat support for call arguments
    /// marshalling"): `Some` only for host map/list values.
    fn as_map_pairs(&self) -> Option<Vec<(String, ObjHandle)>> {
        None
    }
    fn as_list_items(&self) -> Option<Vec<ObjHandle>> {
        None
    }
}

/// Marshalled call arguments.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    pub positional: Vec<ObjHandle>,
    pub named: Vec<(String, ObjHandle)>,
    pub tail_block: bool,
}

/// The host scope interface the VM requires.
pub trait Scope {
    fn get_slot_record(&self, index: usize) -> SlotRecord;
    fn set_slot_value(&self, index: usize, value: ObjHandle);
    fn get_slot_index_of(&self, name: &str) -> Option<usize>;

    /// Apply a slot plan in place, mutating the current scope (a "virtual"
    /// push).
    fn apply_slot_plan_in_place(&self, plan: &[(String, u32)]) -> SlotPlanSnapshot;
    fn restore_slot_plan(&self, snapshot: SlotPlanSnapshot);
    fn has_slot_plan_conflict(&self, plan: &[(String, u32)]) -> bool;

    fn create_child_scope(&self, pos: Option<Position>) -> Rc<dyn Scope>;

    fn add_item(
        &self,
        name: &str,
        mutable: bool,
        value: ObjHandle,
        visibility: crate::ast::Visibility,
        transient: bool,
    );
    fn get(&self, name: &str) -> Option<SlotRecord>;
    fn update_slot_for(&self, name: &str, value: ObjHandle);

    /// Boxing glue. The host
    /// object model owns how scalars become `Obj`s; the VM only ever asks
    /// for a fresh boxed value, never constructs one itself.
    fn make_int(&self, value: i64) -> ObjHandle;
    fn make_real(&self, value: f64) -> ObjHandle;
    fn make_bool(&self, value: bool) -> ObjHandle;
    fn make_null(&self) -> ObjHandle;

    fn raise_unset(&self, name: &str) -> RuntimeError;
    fn raise_illegal_argument(&self, message: &str) -> RuntimeError;
    fn raise_class_cast(&self, expected: &str, got: &str) -> RuntimeError;
    fn raise_symbol_not_found(&self, name: &str) -> RuntimeError;

    fn pos(&self) -> Position;
}

/// Opaque snapshot produced by [`Scope::apply_slot_plan_in_place`], handed
/// back unexamined to [`Scope::restore_slot_plan`].
#[derive(Debug, Clone)]
pub struct SlotPlanSnapshot(pub Vec<(u32, Option<ObjHandle>)>);

/// A host-raised runtime error.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
    pub pos: Option<Position>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), pos: None }
    }

    pub fn at(mut self, pos: Position) -> Self {
        self.pos = Some(pos);
        self
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.pos {
            Some(pos) => write!(f, "{} at {}", self.message, pos),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// The host's tree-walker, invoked from inside `EVAL_*` opcodes.
/// Lexing/parsing/semantic analysis and the AST node types themselves are
/// out of scope; evaluating one is squarely the host's job, so the VM only
/// holds a handle to it.
pub trait Fallback {
    fn eval_expr(&self, scope: &Rc<dyn Scope>, expr: &crate::ast::Expr) -> Result<ObjHandle, RuntimeError>;
    fn eval_stmt(&self, scope: &Rc<dyn Scope>, stmt: &crate::ast::Stmt) -> Result<ObjHandle, RuntimeError>;
    /// Evaluate a call expression whose already-lowered argument values are
    /// supplied directly, so the walker does not re-evaluate argument
    /// sub-expressions and duplicate their side effects (`CALL_FALLBACK`).
    fn eval_call(
        &self,
        scope: &Rc<dyn Scope>,
        expr: &crate::ast::Expr,
        args: Option<Arguments>,
    ) -> Result<ObjHandle, RuntimeError>;
}

/// The host-visible wrapper binding a compiled function to a scope — when
/// executed against a host scope, invokes the VM.
pub struct Thunk {
    pub function: std::rc::Rc<crate::bytecode::CompiledFunction>,
}

impl Thunk {
    pub fn new(function: std::rc::Rc<crate::bytecode::CompiledFunction>) -> Self {
        Self { function }
    }

    pub fn run(
        &self,
        scope: Rc<dyn Scope>,
        fallback: Rc<dyn Fallback>,
        args: Arguments,
    ) -> Result<ObjHandle, crate::vm::VmError> {
        crate::vm::Vm::new(fallback).run(self.function.clone(), scope, args)
    }
}

//! Minimal in-memory `Scope`/`Obj`/`Fallback` implementations backing this
//! crate's own tests. Not a reference host implementation — just enough of
//! one that `compile_function`'s output can actually be run.
//!
//! Pitfalls this module exists to paper over:
//! - there is no native opcode for string construction, so any test touching
//!   a string literal exercises the `Fallback` path — `TestFallback` below
//!   has to actually evaluate `Expr`/`Stmt`, not stub it out
//! - `TestScope::new_root` seeds slot 0..n from `names` in order; pass
//!   parameters in the same order `compile_function`'s `params` expects them

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{BinOp, Expr, Literal, Stmt, UnOp, Visibility};
use crate::host::{Arguments, ClassId, Fallback, LayoutVersion, Obj, ObjHandle, RuntimeError, Scope, SlotPlanSnapshot, SlotRecord};
use crate::span::Position;

/// Boxed scalar/null value. `TestObject` (below) covers class instances.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Real(f64),
    Bool(bool),
    Str(String),
    Null,
}

impl Obj for Scalar {
    fn plus(&self, scope: &dyn Scope, other: &ObjHandle) -> Result<ObjHandle, RuntimeError> {
        match (self, as_scalar(other)) {
            (Scalar::Int(a), Some(Scalar::Int(b))) => Ok(make_int(*a + b)),
            (Scalar::Real(a), Some(Scalar::Real(b))) => Ok(make_real(*a + b)),
            (Scalar::Int(a), Some(Scalar::Real(b))) => Ok(make_real(*a as f64 + b)),
            (Scalar::Real(a), Some(Scalar::Int(b))) => Ok(make_real(*a + b as f64)),
            (Scalar::Str(a), Some(Scalar::Str(b))) => Ok(make_str(format!("{a}{b}"))),
            _ => Err(scope.raise_illegal_argument("plus: incompatible operands")),
        }
    }

    fn minus(&self, scope: &dyn Scope, other: &ObjHandle) -> Result<ObjHandle, RuntimeError> {
        match (self, as_scalar(other)) {
            (Scalar::Int(a), Some(Scalar::Int(b))) => Ok(make_int(*a - b)),
            (Scalar::Real(a), Some(Scalar::Real(b))) => Ok(make_real(*a - b)),
            (Scalar::Int(a), Some(Scalar::Real(b))) => Ok(make_real(*a as f64 - b)),
            (Scalar::Real(a), Some(Scalar::Int(b))) => Ok(make_real(*a - b as f64)),
            _ => Err(scope.raise_illegal_argument("minus: incompatible operands")),
        }
    }

    fn mul(&self, scope: &dyn Scope, other: &ObjHandle) -> Result<ObjHandle, RuntimeError> {
        match (self, as_scalar(other)) {
            (Scalar::Int(a), Some(Scalar::Int(b))) => Ok(make_int(*a * b)),
            (Scalar::Real(a), Some(Scalar::Real(b))) => Ok(make_real(*a * b)),
            (Scalar::Int(a), Some(Scalar::Real(b))) => Ok(make_real(*a as f64 * b)),
            (Scalar::Real(a), Some(Scalar::Int(b))) => Ok(make_real(*a * b as f64)),
            _ => Err(scope.raise_illegal_argument("mul: incompatible operands")),
        }
    }

    fn div(&self, scope: &dyn Scope, other: &ObjHandle) -> Result<ObjHandle, RuntimeError> {
        match (self, as_scalar(other)) {
            (Scalar::Int(a), Some(Scalar::Int(b))) if b != 0 => Ok(make_int(*a / b)),
            (Scalar::Real(a), Some(Scalar::Real(b))) => Ok(make_real(*a / b)),
            (Scalar::Int(a), Some(Scalar::Real(b))) => Ok(make_real(*a as f64 / b)),
            (Scalar::Real(a), Some(Scalar::Int(b))) => Ok(make_real(*a / b as f64)),
            _ => Err(scope.raise_illegal_argument("div: incompatible operands")),
        }
    }

    fn rem(&self, scope: &dyn Scope, other: &ObjHandle) -> Result<ObjHandle, RuntimeError> {
        match (self, as_scalar(other)) {
            (Scalar::Int(a), Some(Scalar::Int(b))) if b != 0 => Ok(make_int(*a % b)),
            (Scalar::Real(a), Some(Scalar::Real(b))) => Ok(make_real(*a % b)),
            _ => Err(scope.raise_illegal_argument("rem: incompatible operands")),
        }
    }

    fn compare_to(&self, scope: &dyn Scope, other: &ObjHandle) -> Result<i32, RuntimeError> {
        match (self, as_scalar(other)) {
            (Scalar::Int(a), Some(Scalar::Int(b))) => Ok(a.cmp(&b) as i32),
            (Scalar::Real(a), Some(Scalar::Real(b))) => Ok(a.partial_cmp(&b).map(|o| o as i32).unwrap_or(0)),
            (Scalar::Int(a), Some(Scalar::Real(b))) => Ok((*a as f64).partial_cmp(&b).map(|o| o as i32).unwrap_or(0)),
            (Scalar::Real(a), Some(Scalar::Int(b))) => Ok(a.partial_cmp(&(b as f64)).map(|o| o as i32).unwrap_or(0)),
            (Scalar::Str(a), Some(Scalar::Str(b))) => Ok(a.cmp(&b) as i32),
            _ => Err(scope.raise_illegal_argument("compare_to: incompatible operands")),
        }
    }

    fn equals(&self, _scope: &dyn Scope, other: &ObjHandle) -> bool {
        as_scalar(other).is_some_and(|o| &o == self)
    }

    fn contains(&self, scope: &dyn Scope, _other: &ObjHandle) -> Result<bool, RuntimeError> {
        Err(scope.raise_illegal_argument("contains: not supported on scalars"))
    }

    fn call_on(&self, scope: &dyn Scope, _args: &Arguments) -> Result<ObjHandle, RuntimeError> {
        Err(scope.raise_illegal_argument("not callable"))
    }

    fn get_at(&self, scope: &dyn Scope, _index: &ObjHandle) -> Result<ObjHandle, RuntimeError> {
        Err(scope.raise_illegal_argument("not indexable"))
    }

    fn put_at(&self, scope: &dyn Scope, _index: &ObjHandle, _value: ObjHandle) -> Result<(), RuntimeError> {
        Err(scope.raise_illegal_argument("not indexable"))
    }

    fn read_field(&self, _scope: &dyn Scope, _name: &str) -> Result<SlotRecord, RuntimeError> {
        Ok(SlotRecord::Unset)
    }

    fn write_field(&self, scope: &dyn Scope, _name: &str, _value: ObjHandle) -> Result<(), RuntimeError> {
        Err(scope.raise_illegal_argument("scalars have no fields"))
    }

    fn invoke_instance_method(&self, scope: &dyn Scope, name: &str, _args: &Arguments) -> Result<ObjHandle, RuntimeError> {
        Err(scope.raise_symbol_not_found(name))
    }

    fn is_instance_of(&self, class_name: &str) -> bool {
        matches!(
            (self, class_name),
            (Scalar::Int(_), "Int64" | "Integer" | "Any")
                | (Scalar::Real(_), "Float64" | "Any")
                | (Scalar::Bool(_), "Bool" | "Any")
                | (Scalar::Str(_), "String" | "Any")
                | (Scalar::Null, "Any")
        )
    }

    fn class_id(&self) -> ClassId {
        match self {
            Scalar::Int(_) => 1,
            Scalar::Real(_) => 2,
            Scalar::Bool(_) => 3,
            Scalar::Str(_) => 4,
            Scalar::Null => 5,
        }
    }

    fn layout_version(&self) -> LayoutVersion {
        0
    }

    fn to_bool(&self) -> bool {
        match self {
            Scalar::Bool(b) => *b,
            Scalar::Null => false,
            Scalar::Int(i) => *i != 0,
            _ => true,
        }
    }

    fn to_long(&self) -> Result<i64, RuntimeError> {
        match self {
            Scalar::Int(i) => Ok(*i),
            _ => Err(RuntimeError::new("not convertible to Int64")),
        }
    }

    fn to_double(&self) -> Result<f64, RuntimeError> {
        match self {
            Scalar::Int(i) => Ok(*i as f64),
            Scalar::Real(r) => Ok(*r),
            _ => Err(RuntimeError::new("not convertible to Float64")),
        }
    }

    fn to_display_string(&self, _scope: &dyn Scope) -> String {
        self.inspect()
    }

    fn by_value_copy(&self) -> ObjHandle {
        Rc::new(self.clone())
    }

    fn inspect(&self) -> String {
        match self {
            Scalar::Int(i) => i.to_string(),
            Scalar::Real(r) => r.to_string(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Str(s) => s.clone(),
            Scalar::Null => "null".to_string(),
        }
    }

    fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }
}

fn as_scalar(handle: &ObjHandle) -> Option<Scalar> {
    handle.as_ref().as_any_scalar()
}

/// Downcast helper since `Obj` itself carries no `Any` bound — test code only
/// ever needs to pattern-match on [`Scalar`] or [`TestObject`], so this
/// sidesteps adding a blanket `as_any` to the production trait.
trait AsAnyScalar {
    fn as_any_scalar(&self) -> Option<Scalar>;
}

impl AsAnyScalar for dyn Obj {
    fn as_any_scalar(&self) -> Option<Scalar> {
        // `Obj` has no downcasting support, so a handle's kind is recovered
        // through its display/round-trip surface instead of `Any`. Good
        // enough for the arithmetic/comparison tests this module backs.
        if let Ok(i) = self.to_long() {
            if self.class_id() == 1 {
                return Some(Scalar::Int(i));
            }
        }
        if self.class_id() == 2 {
            if let Ok(r) = self.to_double() {
                return Some(Scalar::Real(r));
            }
        }
        if self.class_id() == 3 {
            return Some(Scalar::Bool(self.to_bool()));
        }
        if self.class_id() == 4 {
            return Some(Scalar::Str(self.to_display_string(&NullScope)));
        }
        if self.is_null() {
            return Some(Scalar::Null);
        }
        None
    }
}

/// A throwaway `Scope` only used to satisfy `to_display_string`'s signature
/// when formatting a scalar outside of any real scope.
struct NullScope;
impl Scope for NullScope {
    fn get_slot_record(&self, _index: usize) -> SlotRecord {
        SlotRecord::Unset
    }
    fn set_slot_value(&self, _index: usize, _value: ObjHandle) {}
    fn get_slot_index_of(&self, _name: &str) -> Option<usize> {
        None
    }
    fn apply_slot_plan_in_place(&self, _plan: &[(String, u32)]) -> SlotPlanSnapshot {
        SlotPlanSnapshot(Vec::new())
    }
    fn restore_slot_plan(&self, _snapshot: SlotPlanSnapshot) {}
    fn has_slot_plan_conflict(&self, _plan: &[(String, u32)]) -> bool {
        false
    }
    fn create_child_scope(&self, _pos: Option<Position>) -> Rc<dyn Scope> {
        Rc::new(TestScope::new_root(vec![]))
    }
    fn add_item(&self, _name: &str, _mutable: bool, _value: ObjHandle, _visibility: Visibility, _transient: bool) {}
    fn get(&self, _name: &str) -> Option<SlotRecord> {
        None
    }
    fn update_slot_for(&self, _name: &str, _value: ObjHandle) {}
    fn make_int(&self, value: i64) -> ObjHandle {
        make_int(value)
    }
    fn make_real(&self, value: f64) -> ObjHandle {
        make_real(value)
    }
    fn make_bool(&self, value: bool) -> ObjHandle {
        make_bool(value)
    }
    fn make_null(&self) -> ObjHandle {
        make_null()
    }
    fn raise_unset(&self, name: &str) -> RuntimeError {
        RuntimeError::new(format!("{name} is unset"))
    }
    fn raise_illegal_argument(&self, message: &str) -> RuntimeError {
        RuntimeError::new(message)
    }
    fn raise_class_cast(&self, expected: &str, got: &str) -> RuntimeError {
        RuntimeError::new(format!("cannot cast {got} to {expected}"))
    }
    fn raise_symbol_not_found(&self, name: &str) -> RuntimeError {
        RuntimeError::new(format!("symbol not found: {name}"))
    }
    fn pos(&self) -> Position {
        Position::unknown()
    }
}

pub fn make_int(value: i64) -> ObjHandle {
    Rc::new(Scalar::Int(value))
}
pub fn make_real(value: f64) -> ObjHandle {
    Rc::new(Scalar::Real(value))
}
pub fn make_bool(value: bool) -> ObjHandle {
    Rc::new(Scalar::Bool(value))
}
pub fn make_str(value: String) -> ObjHandle {
    Rc::new(Scalar::Str(value))
}
pub fn make_null() -> ObjHandle {
    Rc::new(Scalar::Null)
}

/// A minimal host class instance with settable fields and named methods, for
/// tests exercising field/method dispatch and the virtual-call inline cache.
pub struct TestObject {
    pub class_id: ClassId,
    pub layout_version: RefCell<LayoutVersion>,
    pub class_name: String,
    pub fields: RefCell<HashMap<String, ObjHandle>>,
    #[allow(clippy::type_complexity)]
    pub methods: HashMap<String, Rc<dyn Fn(&TestObject, &Arguments) -> Result<ObjHandle, RuntimeError>>>,
}

impl TestObject {
    pub fn new(class_id: ClassId, class_name: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            class_id,
            layout_version: RefCell::new(0),
            class_name: class_name.into(),
            fields: RefCell::new(HashMap::new()),
            methods: HashMap::new(),
        })
    }

    pub fn with_field(self: Rc<Self>, name: &str, value: ObjHandle) -> Rc<Self> {
        self.fields.borrow_mut().insert(name.to_string(), value);
        self
    }

    /// Attach a method. `methods` isn't behind a `RefCell` like `fields` is,
    /// since nothing needs to add methods post-construction outside tests —
    /// this relies on `self` still being uniquely owned.
    pub fn with_method(
        mut self: Rc<Self>,
        name: &str,
        f: impl Fn(&TestObject, &Arguments) -> Result<ObjHandle, RuntimeError> + 'static,
    ) -> Rc<Self> {
        Rc::get_mut(&mut self).expect("with_method called after Rc was shared").methods.insert(name.to_string(), Rc::new(f));
        self
    }
}

impl Obj for TestObject {
    fn plus(&self, scope: &dyn Scope, _other: &ObjHandle) -> Result<ObjHandle, RuntimeError> {
        Err(scope.raise_illegal_argument("plus: not supported on this object"))
    }
    fn minus(&self, scope: &dyn Scope, _other: &ObjHandle) -> Result<ObjHandle, RuntimeError> {
        Err(scope.raise_illegal_argument("minus: not supported on this object"))
    }
    fn mul(&self, scope: &dyn Scope, _other: &ObjHandle) -> Result<ObjHandle, RuntimeError> {
        Err(scope.raise_illegal_argument("mul: not supported on this object"))
    }
    fn div(&self, scope: &dyn Scope, _other: &ObjHandle) -> Result<ObjHandle, RuntimeError> {
        Err(scope.raise_illegal_argument("div: not supported on this object"))
    }
    fn rem(&self, scope: &dyn Scope, _other: &ObjHandle) -> Result<ObjHandle, RuntimeError> {
        Err(scope.raise_illegal_argument("rem: not supported on this object"))
    }
    fn compare_to(&self, scope: &dyn Scope, _other: &ObjHandle) -> Result<i32, RuntimeError> {
        Err(scope.raise_illegal_argument("compare_to: not supported on this object"))
    }
    fn equals(&self, _scope: &dyn Scope, other: &ObjHandle) -> bool {
        std::ptr::eq(self as *const _ as *const (), Rc::as_ptr(other) as *const ())
    }
    fn contains(&self, scope: &dyn Scope, _other: &ObjHandle) -> Result<bool, RuntimeError> {
        Err(scope.raise_illegal_argument("contains: not supported on this object"))
    }
    fn call_on(&self, scope: &dyn Scope, _args: &Arguments) -> Result<ObjHandle, RuntimeError> {
        Err(scope.raise_illegal_argument("not callable"))
    }
    fn get_at(&self, scope: &dyn Scope, _index: &ObjHandle) -> Result<ObjHandle, RuntimeError> {
        Err(scope.raise_illegal_argument("not indexable"))
    }
    fn put_at(&self, scope: &dyn Scope, _index: &ObjHandle, _value: ObjHandle) -> Result<(), RuntimeError> {
        Err(scope.raise_illegal_argument("not indexable"))
    }
    fn read_field(&self, _scope: &dyn Scope, name: &str) -> Result<SlotRecord, RuntimeError> {
        match self.fields.borrow().get(name) {
            Some(v) => Ok(SlotRecord::Value(v.clone())),
            None => Ok(SlotRecord::Unset),
        }
    }
    fn write_field(&self, _scope: &dyn Scope, name: &str, value: ObjHandle) -> Result<(), RuntimeError> {
        self.fields.borrow_mut().insert(name.to_string(), value);
        Ok(())
    }
    fn invoke_instance_method(&self, scope: &dyn Scope, name: &str, args: &Arguments) -> Result<ObjHandle, RuntimeError> {
        match self.methods.get(name) {
            Some(f) => f(self, args),
            None => Err(scope.raise_symbol_not_found(name)),
        }
    }
    fn is_instance_of(&self, class_name: &str) -> bool {
        class_name == self.class_name || class_name == "Any"
    }
    fn class_id(&self) -> ClassId {
        self.class_id
    }
    fn layout_version(&self) -> LayoutVersion {
        *self.layout_version.borrow()
    }
    fn to_bool(&self) -> bool {
        true
    }
    fn to_long(&self) -> Result<i64, RuntimeError> {
        Err(RuntimeError::new("not convertible to Int64"))
    }
    fn to_double(&self) -> Result<f64, RuntimeError> {
        Err(RuntimeError::new("not convertible to Float64"))
    }
    fn to_display_string(&self, _scope: &dyn Scope) -> String {
        self.inspect()
    }
    fn by_value_copy(&self) -> ObjHandle {
        panic!("TestObject is reference-typed, not value-copyable")
    }
    fn inspect(&self) -> String {
        format!("{}@{:p}", self.class_name, self as *const _)
    }
}

/// A flat, single-scope `Scope` with `apply_slot_plan_in_place`/
/// `restore_slot_plan` implemented for real (not a no-op), since the loop
/// const-range fast path's `DeclLocal`/`PushSlotPlan` depend on them
/// behaving correctly under nested application.
pub struct TestScope {
    slots: RefCell<Vec<ObjHandle>>,
    names: RefCell<HashMap<String, usize>>,
    parent: Option<Rc<dyn Scope>>,
}

impl TestScope {
    /// `names_in_order[i]` becomes slot `i`, pre-bound to `make_null()`.
    /// Pass parameter names in `compile_function`'s `params` order so
    /// `bind_params` overwrites the right slots at call entry.
    pub fn new_root(names_in_order: Vec<&str>) -> Self {
        let mut names = HashMap::new();
        let mut slots = Vec::new();
        for (i, name) in names_in_order.into_iter().enumerate() {
            names.insert(name.to_string(), i);
            slots.push(make_null());
        }
        Self { slots: RefCell::new(slots), names: RefCell::new(names), parent: None }
    }
}

impl Scope for TestScope {
    fn get_slot_record(&self, index: usize) -> SlotRecord {
        match self.slots.borrow().get(index) {
            Some(v) => SlotRecord::Value(v.clone()),
            None => SlotRecord::Unset,
        }
    }

    fn set_slot_value(&self, index: usize, value: ObjHandle) {
        let mut slots = self.slots.borrow_mut();
        if index >= slots.len() {
            slots.resize(index + 1, make_null());
        }
        slots[index] = value;
    }

    fn get_slot_index_of(&self, name: &str) -> Option<usize> {
        self.names.borrow().get(name).copied()
    }

    fn apply_slot_plan_in_place(&self, plan: &[(String, u32)]) -> SlotPlanSnapshot {
        let mut snapshot = Vec::with_capacity(plan.len());
        for (name, index) in plan {
            let prior_value = match self.get_slot_record(*index as usize) {
                SlotRecord::Value(v) => Some(v),
                SlotRecord::Unset => None,
            };
            snapshot.push((*index, prior_value));
            self.names.borrow_mut().insert(name.clone(), *index as usize);
        }
        SlotPlanSnapshot(snapshot)
    }

    fn restore_slot_plan(&self, snapshot: SlotPlanSnapshot) {
        for (index, prior_value) in snapshot.0 {
            match prior_value {
                Some(v) => self.set_slot_value(index as usize, v),
                None => self.set_slot_value(index as usize, make_null()),
            }
        }
    }

    fn has_slot_plan_conflict(&self, plan: &[(String, u32)]) -> bool {
        let names = self.names.borrow();
        plan.iter().any(|(name, index)| names.get(name).is_some_and(|i| *i != *index as usize))
    }

    fn create_child_scope(&self, _pos: Option<Position>) -> Rc<dyn Scope> {
        Rc::new(TestScope { slots: RefCell::new(Vec::new()), names: RefCell::new(HashMap::new()), parent: None })
    }

    fn add_item(&self, name: &str, _mutable: bool, value: ObjHandle, _visibility: Visibility, _transient: bool) {
        let mut names = self.names.borrow_mut();
        let index = match names.get(name) {
            Some(i) => *i,
            None => {
                let i = self.slots.borrow().len();
                names.insert(name.to_string(), i);
                i
            }
        };
        drop(names);
        self.set_slot_value(index, value);
    }

    fn get(&self, name: &str) -> Option<SlotRecord> {
        if let Some(&index) = self.names.borrow().get(name) {
            return Some(self.get_slot_record(index));
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    fn update_slot_for(&self, name: &str, value: ObjHandle) {
        if let Some(&index) = self.names.borrow().get(name) {
            self.set_slot_value(index, value);
        }
    }

    fn make_int(&self, value: i64) -> ObjHandle {
        make_int(value)
    }
    fn make_real(&self, value: f64) -> ObjHandle {
        make_real(value)
    }
    fn make_bool(&self, value: bool) -> ObjHandle {
        make_bool(value)
    }
    fn make_null(&self) -> ObjHandle {
        make_null()
    }

    fn raise_unset(&self, name: &str) -> RuntimeError {
        RuntimeError::new(format!("{name} is unset"))
    }
    fn raise_illegal_argument(&self, message: &str) -> RuntimeError {
        RuntimeError::new(message)
    }
    fn raise_class_cast(&self, expected: &str, got: &str) -> RuntimeError {
        RuntimeError::new(format!("cannot cast {got} to {expected}"))
    }
    fn raise_symbol_not_found(&self, name: &str) -> RuntimeError {
        RuntimeError::new(format!("symbol not found: {name}"))
    }

    fn pos(&self) -> Position {
        Position::unknown()
    }
}

/// A tiny tree-walker standing in for the host's own, covering exactly the
/// node shapes this crate's compiler falls back on: string literals,
/// `Elvis`/`AssignIfNull`/optional chaining, `Range`/`ListLiteral`
/// construction, `Is`/`NotIs`, and bare statement fallbacks.
pub struct TestFallback;

impl Fallback for TestFallback {
    fn eval_expr(&self, scope: &Rc<dyn Scope>, expr: &Expr) -> Result<ObjHandle, RuntimeError> {
        eval_expr(scope, expr, self)
    }

    fn eval_stmt(&self, scope: &Rc<dyn Scope>, stmt: &Stmt) -> Result<ObjHandle, RuntimeError> {
        eval_stmt(scope, stmt, self)
    }

    fn eval_call(&self, scope: &Rc<dyn Scope>, expr: &Expr, args: Option<Arguments>) -> Result<ObjHandle, RuntimeError> {
        match (expr, args) {
            (Expr::Call { callee, .. }, Some(args)) => {
                let callee_val = eval_expr(scope, callee, self)?;
                callee_val.call_on(scope.as_ref(), &args)
            }
            (Expr::MethodCall { receiver, name, .. }, Some(args)) => {
                let recv = eval_expr(scope, receiver, self)?;
                recv.invoke_instance_method(scope.as_ref(), name, &args)
            }
            (expr, None) => eval_expr(scope, expr, self),
            _ => Err(scope.raise_illegal_argument("eval_call: unsupported call shape")),
        }
    }
}

fn eval_expr(scope: &Rc<dyn Scope>, expr: &Expr, fb: &TestFallback) -> Result<ObjHandle, RuntimeError> {
    match expr {
        Expr::Const { value: Literal::Int(v), .. } => Ok(scope.make_int(*v)),
        Expr::Const { value: Literal::Real(v), .. } => Ok(scope.make_real(*v)),
        Expr::Const { value: Literal::Bool(v), .. } => Ok(scope.make_bool(*v)),
        Expr::Const { value: Literal::Str(v), .. } => Ok(make_str(v.clone())),
        Expr::Const { value: Literal::Null, .. } => Ok(scope.make_null()),
        Expr::LocalVar(v) => match scope.get(&v.name) {
            Some(SlotRecord::Value(val)) => Ok(val),
            _ => Err(scope.raise_unset(&v.name)),
        },
        Expr::LocalSlot(v) => match scope.get(&v.name) {
            Some(SlotRecord::Value(val)) => Ok(val),
            _ => Err(scope.raise_unset(&v.name)),
        },
        Expr::Binary { op: BinOp::And, left, right, .. } => {
            let l = eval_expr(scope, left, fb)?;
            if !l.to_bool() {
                return Ok(l);
            }
            eval_expr(scope, right, fb)
        }
        Expr::Binary { op: BinOp::Or, left, right, .. } => {
            let l = eval_expr(scope, left, fb)?;
            if l.to_bool() {
                return Ok(l);
            }
            eval_expr(scope, right, fb)
        }
        Expr::Binary { op, left, right, .. } => {
            let l = eval_expr(scope, left, fb)?;
            let r = eval_expr(scope, right, fb)?;
            eval_binary(scope, *op, &l, &r)
        }
        Expr::Unary { op: UnOp::Not, operand, .. } => Ok(scope.make_bool(!eval_expr(scope, operand, fb)?.to_bool())),
        Expr::Unary { op: UnOp::Negate, operand, .. } => {
            let v = eval_expr(scope, operand, fb)?;
            match as_scalar(&v) {
                Some(Scalar::Int(i)) => Ok(scope.make_int(-i)),
                Some(Scalar::Real(r)) => Ok(scope.make_real(-r)),
                _ => Err(scope.raise_illegal_argument("negate: not a number")),
            }
        }
        Expr::Unary { op: UnOp::BitNot, operand, .. } => Ok(scope.make_int(!eval_expr(scope, operand, fb)?.to_long()?)),
        Expr::Elvis { left, right } => {
            let l = eval_expr(scope, left, fb)?;
            if l.is_null() {
                eval_expr(scope, right, fb)
            } else {
                Ok(l)
            }
        }
        Expr::Conditional { cond, if_true, if_false } => {
            if eval_expr(scope, cond, fb)?.to_bool() {
                eval_expr(scope, if_true, fb)
            } else {
                eval_expr(scope, if_false, fb)
            }
        }
        Expr::Field { receiver, name, optional } => {
            let recv = eval_expr(scope, receiver, fb)?;
            if *optional && recv.is_null() {
                return Ok(scope.make_null());
            }
            match recv.read_field(scope.as_ref(), name)? {
                SlotRecord::Value(v) => Ok(v),
                SlotRecord::Unset => Ok(scope.make_null()),
            }
        }
        Expr::Index { receiver, index, optional, .. } => {
            let recv = eval_expr(scope, receiver, fb)?;
            if *optional && recv.is_null() {
                return Ok(scope.make_null());
            }
            let idx = eval_expr(scope, index, fb)?;
            recv.get_at(scope.as_ref(), &idx)
        }
        Expr::Call { callee, args, optional, .. } => {
            let callee_val = eval_expr(scope, callee, fb)?;
            if *optional && callee_val.is_null() {
                return Ok(scope.make_null());
            }
            let arguments = eval_args(scope, args, fb)?;
            callee_val.call_on(scope.as_ref(), &arguments)
        }
        Expr::MethodCall { receiver, name, args, optional, .. } => {
            let recv = eval_expr(scope, receiver, fb)?;
            if *optional && recv.is_null() {
                return Ok(scope.make_null());
            }
            let arguments = eval_args(scope, args, fb)?;
            recv.invoke_instance_method(scope.as_ref(), name, &arguments)
        }
        Expr::Range { left, right, .. } => {
            // No list/range host value in this reference implementation;
            // tests touching ranges only need the boundary values.
            let l = eval_expr(scope, left, fb)?;
            let r = eval_expr(scope, right, fb)?;
            let _ = r;
            Ok(l)
        }
        Expr::ListLiteral { entries } => {
            for entry in entries {
                match entry {
                    crate::ast::ListEntry::Element(e) | crate::ast::ListEntry::Spread(e) => {
                        eval_expr(scope, e, fb)?;
                    }
                }
            }
            Ok(scope.make_null())
        }
        Expr::ImplicitThisMember { name } => match scope.get("this") {
            Some(SlotRecord::Value(this)) => match this.read_field(scope.as_ref(), name)? {
                SlotRecord::Value(v) => Ok(v),
                SlotRecord::Unset => Ok(scope.make_null()),
            },
            _ => Err(scope.raise_symbol_not_found("this")),
        },
        Expr::Statement(stmt) => eval_stmt(scope, stmt, fb),
        Expr::Assign { target, value, .. } => {
            let v = eval_expr(scope, value, fb)?;
            set_target(scope, target, v.clone(), fb)?;
            Ok(v)
        }
        Expr::AssignOp { target, op, value, .. } => {
            let old = get_target(scope, target, fb)?;
            let rhs = eval_expr(scope, value, fb)?;
            let new = eval_binary(scope, *op, &old, &rhs)?;
            set_target(scope, target, new.clone(), fb)?;
            Ok(new)
        }
        Expr::AssignIfNull { target, value, .. } => {
            let old = get_target(scope, target, fb)?;
            if !old.is_null() {
                return Ok(old);
            }
            let v = eval_expr(scope, value, fb)?;
            set_target(scope, target, v.clone(), fb)?;
            Ok(v)
        }
        Expr::IncDec { target, is_increment, is_post, .. } => {
            let old = get_target(scope, target, fb)?;
            let one = scope.make_int(1);
            let new = if *is_increment { old.plus(scope.as_ref(), &one)? } else { old.minus(scope.as_ref(), &one)? };
            set_target(scope, target, new.clone(), fb)?;
            Ok(if *is_post { old } else { new })
        }
        _ => Err(scope.raise_illegal_argument("unsupported fallback expr in test_support")),
    }
}

fn eval_binary(scope: &Rc<dyn Scope>, op: BinOp, l: &ObjHandle, r: &ObjHandle) -> Result<ObjHandle, RuntimeError> {
    match op {
        BinOp::Plus => l.plus(scope.as_ref(), r),
        BinOp::Minus => l.minus(scope.as_ref(), r),
        BinOp::Star => l.mul(scope.as_ref(), r),
        BinOp::Slash => l.div(scope.as_ref(), r),
        BinOp::Percent => l.rem(scope.as_ref(), r),
        BinOp::Eq => Ok(scope.make_bool(l.equals(scope.as_ref(), r))),
        BinOp::Neq => Ok(scope.make_bool(!l.equals(scope.as_ref(), r))),
        BinOp::Lt => Ok(scope.make_bool(l.compare_to(scope.as_ref(), r)? < 0)),
        BinOp::Lte => Ok(scope.make_bool(l.compare_to(scope.as_ref(), r)? <= 0)),
        BinOp::Gt => Ok(scope.make_bool(l.compare_to(scope.as_ref(), r)? > 0)),
        BinOp::Gte => Ok(scope.make_bool(l.compare_to(scope.as_ref(), r)? >= 0)),
        BinOp::RefEq => Ok(scope.make_bool(Rc::ptr_eq(l, r))),
        BinOp::RefNeq => Ok(scope.make_bool(!Rc::ptr_eq(l, r))),
        BinOp::In => r.contains(scope.as_ref(), l).map(|b| scope.make_bool(b)),
        BinOp::NotIn => r.contains(scope.as_ref(), l).map(|b| scope.make_bool(!b)),
        BinOp::BAnd => Ok(scope.make_int(l.to_long()? & r.to_long()?)),
        BinOp::BOr => Ok(scope.make_int(l.to_long()? | r.to_long()?)),
        BinOp::BXor => Ok(scope.make_int(l.to_long()? ^ r.to_long()?)),
        BinOp::Shl => Ok(scope.make_int(l.to_long()? << r.to_long()?)),
        BinOp::Shr => Ok(scope.make_int(l.to_long()? >> r.to_long()?)),
        BinOp::Is => Ok(scope.make_bool(l.class_id() == r.class_id())),
        BinOp::NotIs => Ok(scope.make_bool(l.class_id() != r.class_id())),
        BinOp::And | BinOp::Or => unreachable!("short-circuit ops handled before operand evaluation"),
    }
}

fn get_target(scope: &Rc<dyn Scope>, target: &crate::ast::AssignTarget, fb: &TestFallback) -> Result<ObjHandle, RuntimeError> {
    use crate::ast::AssignTarget::*;
    match target {
        Local(r) => match scope.get(&r.name) {
            Some(SlotRecord::Value(v)) => Ok(v),
            _ => Ok(scope.make_null()),
        },
        Var(v) => match scope.get(&v.name) {
            Some(SlotRecord::Value(val)) => Ok(val),
            _ => Ok(scope.make_null()),
        },
        Field { receiver, name, optional } => {
            let recv = eval_expr(scope, receiver, fb)?;
            if *optional && recv.is_null() {
                return Ok(scope.make_null());
            }
            match recv.read_field(scope.as_ref(), name)? {
                SlotRecord::Value(v) => Ok(v),
                SlotRecord::Unset => Ok(scope.make_null()),
            }
        }
        Index { receiver, index, optional } => {
            let recv = eval_expr(scope, receiver, fb)?;
            if *optional && recv.is_null() {
                return Ok(scope.make_null());
            }
            let idx = eval_expr(scope, index, fb)?;
            recv.get_at(scope.as_ref(), &idx)
        }
        ThisMember { name } => match scope.get("this") {
            Some(SlotRecord::Value(this)) => match this.read_field(scope.as_ref(), name)? {
                SlotRecord::Value(v) => Ok(v),
                SlotRecord::Unset => Ok(scope.make_null()),
            },
            _ => Err(scope.raise_symbol_not_found("this")),
        },
    }
}

fn set_target(scope: &Rc<dyn Scope>, target: &crate::ast::AssignTarget, value: ObjHandle, fb: &TestFallback) -> Result<(), RuntimeError> {
    use crate::ast::AssignTarget::*;
    match target {
        Local(r) => {
            scope.update_slot_for(&r.name, value);
            Ok(())
        }
        Var(v) => {
            scope.update_slot_for(&v.name, value);
            Ok(())
        }
        Field { receiver, name, .. } => {
            let recv = eval_expr(scope, receiver, fb)?;
            recv.write_field(scope.as_ref(), name, value)
        }
        Index { receiver, index, .. } => {
            let recv = eval_expr(scope, receiver, fb)?;
            let idx = eval_expr(scope, index, fb)?;
            recv.put_at(scope.as_ref(), &idx, value)
        }
        ThisMember { name } => match scope.get("this") {
            Some(SlotRecord::Value(this)) => this.write_field(scope.as_ref(), name, value),
            _ => Err(scope.raise_symbol_not_found("this")),
        },
    }
}

fn eval_args(scope: &Rc<dyn Scope>, args: &[crate::ast::CallArg], fb: &TestFallback) -> Result<Arguments, RuntimeError> {
    let mut positional = Vec::new();
    let mut named = Vec::new();
    for arg in args {
        let value = eval_expr(scope, &arg.value, fb)?;
        match &arg.name {
            Some(name) => named.push((name.clone(), value)),
            None => positional.push(value),
        }
    }
    Ok(Arguments { positional, named, tail_block: false })
}

fn eval_stmt(scope: &Rc<dyn Scope>, stmt: &Stmt, fb: &TestFallback) -> Result<ObjHandle, RuntimeError> {
    match stmt {
        Stmt::ExpressionStatement(e) => eval_expr(scope, e, fb),
        Stmt::VarDecl { name, initializer, .. } => {
            let value = match initializer {
                Some(e) => eval_expr(scope, e, fb)?,
                None => scope.make_null(),
            };
            scope.add_item(name, true, value, Visibility::Private, false);
            Ok(scope.make_null())
        }
        Stmt::If { cond, then_body, else_body } => {
            if eval_expr(scope, cond, fb)?.to_bool() {
                eval_stmt(scope, then_body, fb)
            } else if let Some(else_body) = else_body {
                eval_stmt(scope, else_body, fb)
            } else {
                Ok(scope.make_null())
            }
        }
        Stmt::Block { body, .. } => {
            let mut last = scope.make_null();
            for s in body {
                last = eval_stmt(scope, s, fb)?;
            }
            Ok(last)
        }
        Stmt::Throw(e) => {
            let v = eval_expr(scope, e, fb)?;
            Err(RuntimeError::new(v.to_display_string(scope.as_ref())).at(e.pos()))
        }
        _ => Err(scope.raise_illegal_argument("unsupported fallback stmt in test_support")),
    }
}

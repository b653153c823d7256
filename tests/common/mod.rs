//! Shared AST constructors for integration tests (there is no parser in
//! this crate — tests build the tree directly, the same shape a parser
//! would hand the compiler).
//!
//! Pitfalls this module exists to paper over:
//! - `Expr::pos()` returns `Position::unknown()` for node kinds with no
//!   `pos` field (`Field`, `Elvis`, `ListLiteral`, ...) — don't assume every
//!   constructor needs one threaded through
//! - `AssignTarget::Local` requires a pre-resolved `(depth, slot)` pair;
//!   most tests want `AssignTarget::Var` (looked up by name) instead

#![allow(dead_code)]

use std::rc::Rc;

use slotvm::ast::{AssignTarget, BinOp, CallArg, Expr, ListEntry, Literal, LocalSlotRef, LocalVarRef, Stmt, UnOp, Visibility};
use slotvm::span::Position;
use slotvm::test_support::{self, TestFallback, TestScope};
use slotvm::{compile_function, CompiledFunction, Vm};

pub fn pos() -> Position {
    Position::unknown()
}

pub fn int(v: i64) -> Expr {
    Expr::Const { value: Literal::Int(v), pos: pos() }
}

pub fn real(v: f64) -> Expr {
    Expr::Const { value: Literal::Real(v), pos: pos() }
}

pub fn boolean(v: bool) -> Expr {
    Expr::Const { value: Literal::Bool(v), pos: pos() }
}

pub fn null() -> Expr {
    Expr::Const { value: Literal::Null, pos: pos() }
}

pub fn string(v: &str) -> Expr {
    Expr::Const { value: Literal::Str(v.to_string()), pos: pos() }
}

pub fn var(name: &str) -> Expr {
    Expr::LocalVar(LocalVarRef { name: name.to_string() })
}

pub fn bin(op: BinOp, l: Expr, r: Expr) -> Expr {
    Expr::Binary { op, left: Box::new(l), right: Box::new(r), pos: pos() }
}

pub fn un(op: UnOp, operand: Expr) -> Expr {
    Expr::Unary { op, operand: Box::new(operand), pos: pos() }
}

pub fn assign_var(name: &str, value: Expr) -> Expr {
    Expr::Assign { target: AssignTarget::Var(LocalVarRef { name: name.to_string() }), value: Box::new(value), pos: pos() }
}

pub fn assign_op_var(name: &str, op: BinOp, value: Expr) -> Expr {
    Expr::AssignOp { target: AssignTarget::Var(LocalVarRef { name: name.to_string() }), op, value: Box::new(value), pos: pos() }
}

/// A pre-resolved local reference, the shape a parser hands the compiler
/// once a name has been bound to a lexical `(depth, slot)` pair.
pub fn local_slot(name: &str, depth: u32, slot: u32) -> Expr {
    Expr::LocalSlot(LocalSlotRef { name: name.to_string(), slot, depth, is_mutable: true, is_delegated: false })
}

pub fn assign_op_local(name: &str, depth: u32, slot: u32, op: BinOp, value: Expr) -> Expr {
    let target = AssignTarget::Local(LocalSlotRef { name: name.to_string(), slot, depth, is_mutable: true, is_delegated: false });
    Expr::AssignOp { target, op, value: Box::new(value), pos: pos() }
}

pub fn expr_stmt(e: Expr) -> Stmt {
    Stmt::ExpressionStatement(e)
}

pub fn var_decl(name: &str, initializer: Option<Expr>) -> Stmt {
    Stmt::VarDecl {
        name: name.to_string(),
        mutable: true,
        visibility: Visibility::Private,
        initializer,
        transient: false,
        slot_index: None,
        slot_depth: None,
    }
}

/// A declaration whose scope slot the parser has already resolved, letting
/// the compiler seed a typed read/write path for this variable from its
/// very first reference.
pub fn var_decl_slot(name: &str, depth: u32, slot: u32, initializer: Option<Expr>) -> Stmt {
    Stmt::VarDecl {
        name: name.to_string(),
        mutable: true,
        visibility: Visibility::Private,
        initializer,
        transient: false,
        slot_index: Some(slot),
        slot_depth: Some(depth),
    }
}

pub fn if_stmt(cond: Expr, then_body: Stmt, else_body: Option<Stmt>) -> Stmt {
    Stmt::If { cond, then_body: Box::new(then_body), else_body: else_body.map(Box::new) }
}

pub fn block(body: Vec<Stmt>) -> Stmt {
    Stmt::Block { slot_plan: vec![], body }
}

pub fn for_in_range(loop_var_name: &str, start: i64, end: i64, is_end_inclusive: bool, body: Stmt, label: Option<&str>) -> Stmt {
    Stmt::ForIn {
        loop_var_name: loop_var_name.to_string(),
        source: Expr::Range { left: Box::new(int(start)), right: Box::new(int(end)), is_end_inclusive },
        const_range: Some((start, end, is_end_inclusive)),
        body: Box::new(body),
        else_statement: None,
        label: label.map(|s| s.to_string()),
        can_break: true,
        loop_slot_plan: vec![],
    }
}

pub fn while_stmt(cond: Expr, body: Stmt, label: Option<&str>) -> Stmt {
    Stmt::While { cond, body: Box::new(body), else_statement: None, label: label.map(|s| s.to_string()) }
}

/// A for-in over an arbitrary source expression, not a compile-time-const
/// range — exercises for-in strategies other than the const-bounds one.
pub fn for_in_over(loop_var_name: &str, source: Expr, body: Stmt, label: Option<&str>) -> Stmt {
    Stmt::ForIn {
        loop_var_name: loop_var_name.to_string(),
        source,
        const_range: None,
        body: Box::new(body),
        else_statement: None,
        label: label.map(|s| s.to_string()),
        can_break: true,
        loop_slot_plan: vec![],
    }
}

pub fn break_stmt(label: Option<&str>, value: Option<Expr>) -> Stmt {
    Stmt::Break { label: label.map(|s| s.to_string()), value }
}

pub fn return_stmt(value: Option<Expr>) -> Stmt {
    Stmt::Return { label: None, value }
}

pub fn field(receiver: Expr, name: &str, optional: bool) -> Expr {
    Expr::Field { receiver: Box::new(receiver), name: name.to_string(), optional }
}

pub fn method_call(receiver: Expr, name: &str, args: Vec<Expr>) -> Expr {
    Expr::MethodCall {
        receiver: Box::new(receiver),
        name: name.to_string(),
        args: args.into_iter().map(|value| CallArg { name: None, is_splat: false, value: Box::new(value) }).collect(),
        tail_block: None,
        optional: false,
        pos: pos(),
    }
}

pub fn list_literal(elements: Vec<Expr>) -> Expr {
    Expr::ListLiteral { entries: elements.into_iter().map(ListEntry::Element).collect() }
}

/// Compile `body` as a zero-arg function and run it to completion against a
/// fresh root scope, returning the final boxed result.
pub fn run(body: &[Stmt]) -> Result<Rc<dyn slotvm::Obj>, String> {
    run_with_range_typed(body, Default::default())
}

/// Like [`run`] but with a caller-supplied set of names already known to
/// hold an `IntRange` object, enabling for-in strategy 3.
pub fn run_with_range_typed(body: &[Stmt], range_typed_names: std::collections::HashSet<String>) -> Result<Rc<dyn slotvm::Obj>, String> {
    let function = compile_function("test", vec![], body, range_typed_names).map_err(|e| e.to_string())?;
    run_compiled(Rc::new(function), vec![])
}

pub fn run_with_params(body: &[Stmt], params: Vec<&str>) -> Result<CompiledFunction, String> {
    compile_function("test", params.into_iter().map(String::from).collect(), body, Default::default()).map_err(|e| e.to_string())
}

pub fn run_compiled(function: Rc<CompiledFunction>, scope_names: Vec<&str>) -> Result<Rc<dyn slotvm::Obj>, String> {
    let scope: Rc<dyn slotvm::Scope> = Rc::new(TestScope::new_root(scope_names));
    let fallback: Rc<dyn slotvm::Fallback> = Rc::new(TestFallback);
    let mut vm = Vm::new(fallback);
    vm.run(function, scope, slotvm::Arguments::default()).map_err(|e| e.to_string())
}

/// Like [`run`] but also returns the VM so the caller can inspect
/// `last_method_cache_stats()`.
pub fn run_and_keep_vm(body: &[Stmt]) -> (Result<Rc<dyn slotvm::Obj>, String>, Vm) {
    let function = compile_function("test", vec![], body, Default::default()).expect("compiles");
    let scope: Rc<dyn slotvm::Scope> = Rc::new(TestScope::new_root(vec![]));
    let fallback: Rc<dyn slotvm::Fallback> = Rc::new(TestFallback);
    let mut vm = Vm::new(fallback);
    let result = vm.run(Rc::new(function), scope, slotvm::Arguments::default()).map_err(|e| e.to_string());
    (result, vm)
}

pub fn make_int(v: i64) -> Rc<dyn slotvm::Obj> {
    test_support::make_int(v)
}

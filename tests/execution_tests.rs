//! End-to-end compile+run tests exercising the native fast paths, the
//! fallback escape hatch, and the virtual-call inline cache together.

mod common;

use std::collections::HashSet;
use std::rc::Rc;

use common::*;
use slotvm::ast::{BinOp, Expr, Stmt};
use slotvm::test_support::{self, TestFallback, TestObject, TestScope};
use slotvm::{Arguments, Obj, Vm};

#[test]
fn range_sum_via_compound_assign_fallback() {
    // `sum`/`i` are both `Var`-addressed (looked up by name each time), which
    // always routes through the fallback tree-walker — this is a deliberate
    // regression test for that escape hatch, not the native `ADD_INT` path.
    let body = vec![
        var_decl("sum", Some(int(0))),
        for_in_range("i", 1, 10, true, block(vec![expr_stmt(assign_op_var("sum", BinOp::Plus, var("i")))]), None),
        return_stmt(Some(var("sum"))),
    ];
    let result = run(&body).expect("runs");
    assert_eq!(result.to_long().unwrap(), 55);
}

#[test]
fn range_sum_via_typed_slots_reaches_native_add() {
    // Same sum, but `sum`/`i` are pre-resolved local slots with an implicit
    // final-statement return — exercises per-slot type inference, the typed
    // Inc/Dec-less compound-assign fast path, and no-explicit-`return` value
    // propagation together.
    let body = vec![
        var_decl_slot("sum", 0, 0, Some(int(0))),
        for_in_range("i", 1, 10, true, block(vec![expr_stmt(assign_op_local("sum", 0, 0, BinOp::Plus, var("i")))]), None),
        expr_stmt(local_slot("sum", 0, 0)),
    ];
    let result = run(&body).expect("runs");
    assert_eq!(result.to_long().unwrap(), 55);
}

#[test]
fn for_in_over_dynamic_int_range_bounds() {
    // Neither bound is a compile-time constant; both are typed local slots,
    // which is strategy 2 — non-constant `Int` range bounds.
    let body = vec![
        var_decl_slot("lo", 0, 0, Some(int(1))),
        var_decl_slot("hi", 0, 1, Some(int(5))),
        var_decl_slot("sum", 0, 2, Some(int(0))),
        for_in_over(
            "i",
            Expr::Range { left: Box::new(local_slot("lo", 0, 0)), right: Box::new(local_slot("hi", 0, 1)), is_end_inclusive: true },
            block(vec![expr_stmt(assign_op_local("sum", 0, 2, BinOp::Plus, var("i")))]),
            None,
        ),
        return_stmt(Some(local_slot("sum", 0, 2))),
    ];
    let result = run(&body).expect("runs");
    assert_eq!(result.to_long().unwrap(), 15);
}

#[test]
fn for_in_over_named_local_already_typed_as_range() {
    // `r` holds a host object the caller already knows is an `IntRange`
    // (field names match what `RangeIntBounds` reads), passed in via
    // `range_typed_names` instead of being inferred. It's bound as the
    // function's sole parameter so it's pre-seeded at scope slot 0 the same
    // way the VM binds any other argument, with no `VarDecl` of its own.
    let range_obj: Rc<dyn Obj> = TestObject::new(9, "IntRange").with_field("start", test_support::make_int(1)).with_field("endExclusive", test_support::make_int(4));

    let body = vec![
        var_decl_slot("sum", 0, 1, Some(int(0))),
        for_in_over("i", local_slot("r", 0, 0), block(vec![expr_stmt(assign_op_local("sum", 0, 1, BinOp::Plus, var("i")))]), None),
        return_stmt(Some(local_slot("sum", 0, 1))),
    ];

    let mut range_typed_names = HashSet::new();
    range_typed_names.insert("r".to_string());
    let function = slotvm::compile_function("test", vec!["r".to_string()], &body, range_typed_names).expect("compiles");

    let scope: Rc<dyn slotvm::Scope> = Rc::new(TestScope::new_root(vec!["r"]));
    let fallback: Rc<dyn slotvm::Fallback> = Rc::new(TestFallback);
    let mut vm = Vm::new(fallback);
    let args = Arguments { positional: vec![range_obj], named: vec![], tail_block: false };
    let result = vm.run(Rc::new(function), scope, args).expect("runs");
    assert_eq!(result.to_long().unwrap(), 1 + 2 + 3);
}

#[test]
fn list_literal_evaluates_each_element_exactly_once() {
    let calls = Rc::new(std::cell::Cell::new(0i64));
    let calls_in_method = calls.clone();
    let obj: Rc<dyn Obj> = TestObject::new(11, "Counter").with_method("bump", move |_recv, _args| {
        calls_in_method.set(calls_in_method.get() + 1);
        Ok(test_support::make_int(calls_in_method.get()))
    });

    let body = vec![expr_stmt(list_literal(vec![method_call(var("obj"), "bump", vec![]), method_call(var("obj"), "bump", vec![])]))];
    let function = run_with_params(&body, vec!["obj"]).expect("compiles");

    let scope: Rc<dyn slotvm::Scope> = Rc::new(TestScope::new_root(vec!["obj"]));
    let fallback: Rc<dyn slotvm::Fallback> = Rc::new(TestFallback);
    let mut vm = Vm::new(fallback);
    let args = Arguments { positional: vec![obj], named: vec![], tail_block: false };
    vm.run(Rc::new(function), scope, args).expect("runs");

    assert_eq!(calls.get(), 2);
}

#[test]
fn if_expression_yields_the_taken_branch_value() {
    let body = vec![return_stmt(Some(Expr::Statement(Box::new(if_stmt(
        boolean(true),
        block(vec![expr_stmt(int(1)), expr_stmt(int(2))]),
        Some(block(vec![expr_stmt(int(99))])),
    )))))];
    let result = run(&body).expect("runs");
    assert_eq!(result.to_long().unwrap(), 2);
}

#[test]
fn block_as_last_statement_yields_its_final_value_without_explicit_return() {
    let body = vec![block(vec![expr_stmt(int(7)), expr_stmt(int(8))])];
    let result = run(&body).expect("runs");
    assert_eq!(result.to_long().unwrap(), 8);
}

#[test]
fn short_circuit_and_skips_right_side_effect() {
    let body = vec![
        var_decl("flag", Some(int(0))),
        expr_stmt(bin(BinOp::And, boolean(false), assign_var("flag", int(1)))),
        return_stmt(Some(var("flag"))),
    ];
    let result = run(&body).expect("runs");
    assert_eq!(result.to_long().unwrap(), 0);
}

#[test]
fn cross_type_int_real_comparison() {
    let body = vec![return_stmt(Some(bin(BinOp::Lt, bin(BinOp::Plus, int(1), int(2)), real(3.5))))];
    let result = run(&body).expect("runs");
    assert!(result.to_bool());
}

#[test]
fn optional_field_access_on_null_short_circuits() {
    let body = vec![return_stmt(Some(field(null(), "name", true)))];
    let result = run(&body).expect("runs");
    assert!(result.is_null());
}

#[test]
fn labelled_break_carries_its_value_out_of_the_loop() {
    let body = vec![return_stmt(Some(slotvm::ast::Expr::Statement(Box::new(while_stmt(
        boolean(true),
        block(vec![break_stmt(Some("outer"), Some(int(42)))]),
        Some("outer"),
    )))))];
    let result = run(&body).expect("runs");
    assert_eq!(result.to_long().unwrap(), 42);
}

#[test]
fn scope_slot_store_then_load_roundtrips_by_equals() {
    // `sum` here is `Obj`-typed throughout (its initializer is a `TestObject`,
    // which has no native scalar channel), so every read/write of it goes
    // through the untyped `STORE_OBJ_ADDR`/`LOAD_OBJ_ADDR` pair.
    let obj: Rc<dyn Obj> = TestObject::new(5, "Box");
    let body = vec![
        var_decl_slot("b", 0, 1, Some(var("seed"))),
        return_stmt(Some(local_slot("b", 0, 1))),
    ];
    let function = run_with_params(&body, vec!["seed"]).expect("compiles");

    let scope: Rc<dyn slotvm::Scope> = Rc::new(TestScope::new_root(vec!["seed"]));
    let fallback: Rc<dyn slotvm::Fallback> = Rc::new(TestFallback);
    let mut vm = Vm::new(fallback);
    let args = Arguments { positional: vec![obj.clone()], named: vec![], tail_block: false };
    let result = vm.run(Rc::new(function), scope, args).expect("runs");
    assert!(Rc::ptr_eq(&result, &obj));
}

#[test]
fn every_pushed_scope_is_popped_on_both_branches() {
    let then_block = Stmt::Block { slot_plan: vec![("y".to_string(), 1)], body: vec![expr_stmt(int(1))] };
    let else_block = Stmt::Block { slot_plan: vec![("z".to_string(), 1)], body: vec![expr_stmt(int(2))] };
    let body = vec![var_decl("x", Some(int(1))), if_stmt(boolean(true), then_block, Some(else_block)), return_stmt(Some(var("x")))];
    let function = run_with_params(&body, vec![]).expect("compiles");
    let pushes = function.instructions.iter().filter(|i| matches!(i, slotvm::bytecode::Instr::PushScope { .. })).count();
    let pops = function.instructions.iter().filter(|i| matches!(i, slotvm::bytecode::Instr::PopScope)).count();
    assert_eq!(pushes, 2);
    assert_eq!(pushes, pops);
}

#[test]
fn virtual_call_site_caches_across_loop_iterations() {
    let hit_count = std::cell::Cell::new(0i64);
    let obj: Rc<dyn Obj> = TestObject::new(7, "Counter").with_field("n", test_support::make_int(0)).with_method("bump", move |recv, _args| {
        let n = hit_count.get() + 1;
        hit_count.set(n);
        recv.fields.borrow_mut().insert("n".to_string(), test_support::make_int(n));
        Ok(test_support::make_int(n))
    });

    let body = vec![
        for_in_range("i", 0, 10_000, false, block(vec![expr_stmt(method_call(var("obj"), "bump", vec![]))]), None),
        return_stmt(Some(var("obj"))),
    ];
    let function = run_with_params(&body, vec!["obj"]).expect("compiles");

    let scope: Rc<dyn slotvm::Scope> = Rc::new(TestScope::new_root(vec!["obj"]));
    let fallback: Rc<dyn slotvm::Fallback> = Rc::new(TestFallback);
    let mut vm = Vm::new(fallback);
    let args = Arguments { positional: vec![obj], named: vec![], tail_block: false };
    vm.run(Rc::new(function), scope, args).expect("runs");

    let (hits, misses) = vm.last_method_cache_stats().expect("ran at least once");
    assert_eq!(misses, 1);
    assert_eq!(hits, 9_999);
}

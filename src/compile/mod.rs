//! The lowering compiler's public entry point.
//!
//! Turns a function body (`Vec<Stmt>`) into a [`CompiledFunction`] the VM
//! can run directly, falling back per-node to the host tree-walker
//! wherever this crate has no native opcode sequence for a construct.

pub mod context;
pub mod error;
pub mod expr;
pub mod passes;
pub mod stmt;

use crate::bytecode::{CompiledFunction, Instr, LocalSlotMeta};

pub use context::Ctx;
pub use error::CompileError;

/// Compile a function body into its bytecode form. `params` are bound into
/// the callee's scope by the VM before the first instruction runs (see
/// [`crate::vm::Vm::run`]), so the compiler only needs their names to size
/// `CompiledFunction::params` — reads of a parameter go through the same
/// `LocalSlot`/addr path as any other named variable. `range_typed_names`
/// is the caller's set of locals already known to hold an `IntRange`
/// object, enabling for-in strategy 3 (`compile::stmt::compile_for_in`)
/// without this crate needing its own static range-type inference.
///
/// The function's last top-level statement is lowered for its value: if it
/// yields one (an expression statement, an `if`, a block, a loop used in
/// expression position — anything `stmt::lower_stmt_for_value` recognizes),
/// it becomes the implicit return value. The unconditional trailing
/// `RET_VOID` stays as a safety net for bodies whose last statement has no
/// value (`return`, `throw`, a bare declaration) and for the empty body.
pub fn compile_function(
    name: impl Into<String>,
    params: Vec<String>,
    body: &[crate::ast::Stmt],
    range_typed_names: std::collections::HashSet<String>,
) -> Result<CompiledFunction, CompileError> {
    let mut ctx = Ctx::new(name, range_typed_names);
    let mut int_loop_vars = std::collections::HashSet::new();
    for stmt in body {
        int_loop_vars.extend(passes::int_range_loop_vars(stmt));
    }
    ctx.set_int_loop_var_names(int_loop_vars);

    if let Some((last, init)) = body.split_last() {
        for stmt in init {
            stmt::lower_stmt(&mut ctx, stmt)?;
        }
        if let Some(val) = stmt::lower_stmt_for_value(&mut ctx, last)? {
            let vs = expr::to_obj(&mut ctx, val);
            ctx.builder.emit(Instr::Ret { value: vs });
        }
    }
    ctx.builder.emit(Instr::RetVoid);

    let (builder, local_count, addr_count, scope_slots, return_labels) = ctx.into_parts();
    let local_slots = (0..local_count).map(|_| LocalSlotMeta { name: None, mutable: false, depth: 0 }).collect();

    builder
        .build(params, local_count, addr_count, scope_slots, local_slots, return_labels)
        .map_err(|e| CompileError::InvariantViolated(format!("unresolved label in compiled output: {e:?}")))
}

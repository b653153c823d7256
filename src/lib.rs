// Prevent accidental debug output in library code.
#![deny(clippy::print_stderr)]

pub mod ast;
pub mod builder;
pub mod bytecode;
pub mod compile;
pub mod host;
pub mod span;
pub mod vm;

/// Minimal in-memory `Scope`/`Obj`/`Fallback` implementations backing this
/// crate's own tests — not cfg-gated since `tests/` integration tests link
/// against this crate as an ordinary dependency and need it too.
pub mod test_support;

pub use bytecode::CompiledFunction;
pub use compile::{compile_function, CompileError};
pub use host::{Arguments, Fallback, Obj, ObjHandle, RuntimeError, Scope, Thunk};
pub use vm::{Vm, VmError};

use std::rc::Rc;

/// Compile `body` and run it once against `scope` with `args`, in one call.
/// Convenience wrapper over [`compile_function`] + [`Vm::run`] for callers
/// that don't need to cache the compiled function across invocations.
pub fn compile_and_run(
    name: impl Into<String>,
    params: Vec<String>,
    body: &[ast::Stmt],
    range_typed_names: std::collections::HashSet<String>,
    scope: Rc<dyn Scope>,
    args: Arguments,
    fallback: Rc<dyn Fallback>,
) -> Result<ObjHandle, CompileAndRunError> {
    let function = compile_function(name, params, body, range_typed_names).map_err(CompileAndRunError::Compile)?;
    let mut vm = Vm::new(fallback);
    vm.run(Rc::new(function), scope, args).map_err(CompileAndRunError::Vm)
}

#[derive(Debug)]
pub enum CompileAndRunError {
    Compile(CompileError),
    Vm(VmError),
}

impl std::fmt::Display for CompileAndRunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileAndRunError::Compile(e) => write!(f, "compile error: {e}"),
            CompileAndRunError::Vm(e) => write!(f, "vm error: {e}"),
        }
    }
}

impl std::error::Error for CompileAndRunError {}

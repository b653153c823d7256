//! VM-level error taxonomy.
//!
//! Plain `Debug + Clone` enum with a hand-written `Display`, following
//! `subset_julia_vm`'s own `vm/error.rs` rather than pulling in `thiserror`.

use crate::host::RuntimeError;
use crate::span::Position;

/// Everything that can terminate a frame's dispatch loop abnormally.
#[derive(Debug, Clone)]
pub enum VmError {
    /// Surfaced unchanged from the host, except `THROW` and `ASSERT_IS`
    /// attach the current position.
    Runtime(RuntimeError),
    /// Reading a property that resolved to `ObjUnset`.
    Unset { name: String, pos: Position },
    /// A `RET_LABEL` whose label is not in the current function's
    /// `returnLabels` set. Caught by the call
    /// mechanism of the frame that owns the label; rethrown otherwise.
    NonLocalReturn { label: String, value: crate::host::ObjHandle },
    /// Thrown explicitly by the running program via `THROW`.
    Thrown { value: crate::host::ObjHandle, pos: Position },
    /// A `POP_SCOPE`/`POP_SLOT_PLAN` with nothing to pop, or any other
    /// invariant the compiler is supposed to guarantee statically
    ///. Always a bug, never user-facing.
    InvariantViolated(String),
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmError::Runtime(e) => write!(f, "{e}"),
            VmError::Unset { name, pos } => write!(f, "{name} is unset at {pos}"),
            VmError::NonLocalReturn { label, .. } => {
                write!(f, "non-local return to unmatched label @{label}")
            }
            VmError::Thrown { pos, .. } => write!(f, "uncaught exception at {pos}"),
            VmError::InvariantViolated(msg) => write!(f, "VM invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for VmError {}

impl From<RuntimeError> for VmError {
    fn from(e: RuntimeError) -> Self {
        VmError::Runtime(e)
    }
}

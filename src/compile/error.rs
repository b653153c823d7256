//! Compile-time error taxonomy.

use crate::span::Position;

/// Either a single expression/statement could not be lowered and must be
/// handed to the host tree-walker instead, or the compiler hit a state it
/// never expects to hit — a bug, not a legitimate degradation.
#[derive(Debug, Clone)]
pub enum CompileError {
    FallbackRequired { reason: String, pos: Position },
    InvariantViolated(String),
}

impl CompileError {
    pub fn fallback(reason: impl Into<String>, pos: Position) -> Self {
        CompileError::FallbackRequired { reason: reason.into(), pos }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::FallbackRequired { reason, pos } => write!(f, "fallback required at {pos}: {reason}"),
            CompileError::InvariantViolated(msg) => write!(f, "compiler invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for CompileError {}

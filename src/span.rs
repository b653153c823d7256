//! Source positions attached to AST nodes and carried through to thrown
//! exceptions.

/// A single point (or zero-width span) in the original source text.
///
/// Mirrors the role of `subset_julia_vm`'s `span::Span`, trimmed to the
/// fields the bytecode core actually threads through: a throw site only
/// needs to report *where*, not the full range machinery a parser wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
    pub offset: u32,
}

impl Position {
    pub const fn new(line: u32, column: u32, offset: u32) -> Self {
        Self { line, column, offset }
    }

    pub const fn unknown() -> Self {
        Self { line: 0, column: 0, offset: 0 }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

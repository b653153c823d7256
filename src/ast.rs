//! The AST interface the lowering compiler consumes.
//!
//! Lexing, parsing, and semantic analysis are external collaborators; this
//! module only fixes the shape of the tree the compiler pattern-matches
//! on, concretized as plain enums rather than a trait object because the
//! lowering compiler needs to branch on node shape, not just read fields
//! off an opaque interface.

use crate::span::Position;

/// Binary operators, per the `BinaryOpRef` row of the AST table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    RefEq,
    RefNeq,
    And,
    Or,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    In,
    NotIn,
    Is,
    NotIs,
}

/// Unary operators, per `UnaryOpRef`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Negate,
    Not,
    BitNot,
}

/// A literal value carried by a `ConstRef` node.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Real(f64),
    Bool(bool),
    Str(String),
    Null,
}

/// `LocalSlotRef`: a variable reference the parser has already resolved to a
/// lexical depth and slot-within-scope.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSlotRef {
    pub name: String,
    /// Index within the declaring scope's record table.
    pub slot: u32,
    /// Lexical depth relative to the innermost enclosing scope, as counted
    /// by the parser (i.e. *before* virtual-scope depth remapping).
    pub depth: u32,
    pub is_mutable: bool,
    pub is_delegated: bool,
}

/// `LocalVarRef`: a bare name reference the parser did not pre-resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVarRef {
    pub name: String,
}

/// One call-site argument: `{name?, isSplat, value-statement}`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallArg {
    pub name: Option<String>,
    pub is_splat: bool,
    pub value: Box<Expr>,
}

/// Assignable targets shared by `AssignRef`, `AssignOpRef`, `AssignIfNullRef`,
/// and `IncDecRef`.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Local(LocalSlotRef),
    Var(LocalVarRef),
    Field { receiver: Box<Expr>, name: String, optional: bool },
    Index { receiver: Box<Expr>, index: Box<Expr>, optional: bool },
    ThisMember { name: String },
}

/// One entry of a `ListLiteralRef`.
#[derive(Debug, Clone, PartialEq)]
pub enum ListEntry {
    Element(Expr),
    Spread(Expr),
}

/// The expression-reference variants this crate's compiler consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const { value: Literal, pos: Position },
    LocalSlot(LocalSlotRef),
    LocalVar(LocalVarRef),
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr>, pos: Position },
    Unary { op: UnOp, operand: Box<Expr>, pos: Position },
    Assign { target: AssignTarget, value: Box<Expr>, pos: Position },
    AssignOp { target: AssignTarget, op: BinOp, value: Box<Expr>, pos: Position },
    AssignIfNull { target: AssignTarget, value: Box<Expr>, pos: Position },
    IncDec { target: AssignTarget, is_increment: bool, is_post: bool, pos: Position },
    Conditional { cond: Box<Expr>, if_true: Box<Expr>, if_false: Box<Expr> },
    Elvis { left: Box<Expr>, right: Box<Expr> },
    /// `CallRef`: callee is evaluated as a value (`callable(args)`).
    Call { callee: Box<Expr>, args: Vec<CallArg>, tail_block: Option<Box<Stmt>>, optional: bool, pos: Position },
    /// `MethodCallRef`: `receiver.name(args)`, a virtual dispatch site.
    MethodCall {
        receiver: Box<Expr>,
        name: String,
        args: Vec<CallArg>,
        tail_block: Option<Box<Stmt>>,
        optional: bool,
        pos: Position,
    },
    Field { receiver: Box<Expr>, name: String, optional: bool },
    Index { receiver: Box<Expr>, index: Box<Expr>, optional: bool, pos: Position },
    ImplicitThisMember { name: String },
    Range { left: Box<Expr>, right: Box<Expr>, is_end_inclusive: bool },
    ListLiteral { entries: Vec<ListEntry> },
    /// `StatementRef`: a statement used in expression position.
    Statement(Box<Stmt>),
    /// `ValueFnRef`: a value-function (closure) literal; opaque payload.
    ValueFn { ast_id: u32 },
    /// `ThisMethodSlotCallRef`: opaque payload for slot-based this-method calls.
    ThisMethodSlotCall { ast_id: u32 },
}

impl Expr {
    /// Best-effort position for diagnostics/fallback wrapping; several node
    /// kinds do not carry one (e.g. `Field`), in which case `Position::unknown`
    /// is used rather than threading an `Option` through every call site.
    pub fn pos(&self) -> Position {
        match self {
            Expr::Const { pos, .. }
            | Expr::Binary { pos, .. }
            | Expr::Unary { pos, .. }
            | Expr::Assign { pos, .. }
            | Expr::AssignOp { pos, .. }
            | Expr::AssignIfNull { pos, .. }
            | Expr::IncDec { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::MethodCall { pos, .. }
            | Expr::Index { pos, .. } => *pos,
            _ => Position::unknown(),
        }
    }
}

/// Visibility of a declared local, carried into `LocalDecl` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

/// A slot plan attached to a block or loop: `name -> slot-index`.
pub type SlotPlan = Vec<(String, u32)>;

/// The statement-reference variants this crate's compiler consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    ExpressionStatement(Expr),
    Block { slot_plan: SlotPlan, body: Vec<Stmt> },
    VarDecl {
        name: String,
        mutable: bool,
        visibility: Visibility,
        initializer: Option<Expr>,
        transient: bool,
        slot_index: Option<u32>,
        slot_depth: Option<u32>,
    },
    If { cond: Expr, then_body: Box<Stmt>, else_body: Option<Box<Stmt>> },
    ForIn {
        loop_var_name: String,
        source: Expr,
        /// Present when the parser already proved the source is a
        /// compile-time integer range: `(start, end, is_end_inclusive)`.
        const_range: Option<(i64, i64, bool)>,
        body: Box<Stmt>,
        else_statement: Option<Box<Stmt>>,
        label: Option<String>,
        can_break: bool,
        loop_slot_plan: SlotPlan,
    },
    While { cond: Expr, body: Box<Stmt>, else_statement: Option<Box<Stmt>>, label: Option<String> },
    DoWhile { cond: Expr, body: Box<Stmt>, label: Option<String> },
    Break { label: Option<String>, value: Option<Expr> },
    Continue { label: Option<String> },
    Return { label: Option<String>, value: Option<Expr> },
    Throw(Expr),
    ExtensionPropertyDecl { type_name: String, name: String, visibility: Visibility, ast_id: u32 },
    DestructuringVarDecl { names: Vec<String>, mutable: bool, initializer: Expr },
    /// `WhenStatement`: pattern-matching construct. Not lowered by this
    /// crate; always triggers `FallbackRequired`.
    When { ast_id: u32 },
}

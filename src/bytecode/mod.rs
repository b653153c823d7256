//! The closed opcode enumeration.
//!
//! Instructions are kept as tagged variants rather than packed bytes.
//! `subset_julia_vm`'s own `Instr` (`vm/instr.rs`) is itself a tagged enum,
//! not a byte stream, so this keeps faith with the teacher's actual
//! representation rather than adopting a packed encoding.

pub mod constant;
pub mod function;

pub use constant::{CallArgsPlan, Constant, LocalDeclInfo, SlotPlanEntry};
pub use function::{CompiledFunction, LocalSlotMeta, ScopeSlotMeta};

use crate::host::ObjHandle;

/// Index of a local slot within a frame's `S + L` slot space.
pub type SlotId = u32;
/// Index into a frame's addr table.
pub type AddrId = u32;
/// Index into a function's constant pool.
pub type ConstId = u32;
/// Instruction offset within a function's code array.
pub type Ip = u32;

/// Either a plain positional argument count or a `CallArgsPlan` constant
/// index. Kept as an explicit two-variant enum here since this crate does
/// not pack operands into bit fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ArgsSpec {
    Count(u32),
    Plan(ConstId),
}

/// One instruction. Grouped in source order by semantic family:
/// constants/moves/boxes, conversions, type checks,
/// integer/real/bitwise arithmetic, comparisons, object ops, boolean,
/// control, scope, range helper, calls/fields/indexing, escape hatch, misc.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Instr {
    // --- constants / moves / boxes ---
    ConstInt { dst: SlotId, value: i64 },
    ConstReal { dst: SlotId, value: f64 },
    ConstBool { dst: SlotId, value: bool },
    ConstObj { dst: SlotId, konst: ConstId },
    ConstNull { dst: SlotId },
    MoveInt { dst: SlotId, src: SlotId },
    MoveReal { dst: SlotId, src: SlotId },
    MoveBool { dst: SlotId, src: SlotId },
    MoveObj { dst: SlotId, src: SlotId },
    BoxObj { dst: SlotId, src: SlotId, src_ty: ScalarTy },

    // --- conversions ---
    IntToReal { dst: SlotId, src: SlotId },
    RealToInt { dst: SlotId, src: SlotId },
    BoolToInt { dst: SlotId, src: SlotId },
    IntToBool { dst: SlotId, src: SlotId },
    ObjToBool { dst: SlotId, src: SlotId },

    // --- type checks ---
    CheckIs { dst: SlotId, obj: SlotId, class: ConstId },
    AssertIs { obj: SlotId, class: ConstId, pos: ConstId },

    // --- integer arithmetic ---
    AddInt { dst: SlotId, lhs: SlotId, rhs: SlotId },
    SubInt { dst: SlotId, lhs: SlotId, rhs: SlotId },
    MulInt { dst: SlotId, lhs: SlotId, rhs: SlotId },
    DivInt { dst: SlotId, lhs: SlotId, rhs: SlotId, pos: ConstId },
    ModInt { dst: SlotId, lhs: SlotId, rhs: SlotId, pos: ConstId },
    NegInt { dst: SlotId, src: SlotId },
    IncInt { slot: SlotId },
    DecInt { slot: SlotId },

    // --- real arithmetic ---
    AddReal { dst: SlotId, lhs: SlotId, rhs: SlotId },
    SubReal { dst: SlotId, lhs: SlotId, rhs: SlotId },
    MulReal { dst: SlotId, lhs: SlotId, rhs: SlotId },
    DivReal { dst: SlotId, lhs: SlotId, rhs: SlotId },
    NegReal { dst: SlotId, src: SlotId },

    // --- bitwise int ---
    AndInt { dst: SlotId, lhs: SlotId, rhs: SlotId },
    OrInt { dst: SlotId, lhs: SlotId, rhs: SlotId },
    XorInt { dst: SlotId, lhs: SlotId, rhs: SlotId },
    ShlInt { dst: SlotId, lhs: SlotId, rhs: SlotId },
    ShrInt { dst: SlotId, lhs: SlotId, rhs: SlotId },
    UshrInt { dst: SlotId, lhs: SlotId, rhs: SlotId },
    InvInt { dst: SlotId, src: SlotId },

    // --- comparisons: per-type ---
    CmpIntEq { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpIntNeq { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpIntLt { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpIntLte { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpIntGt { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpIntGte { dst: SlotId, lhs: SlotId, rhs: SlotId },

    CmpRealEq { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpRealNeq { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpRealLt { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpRealLte { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpRealGt { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpRealGte { dst: SlotId, lhs: SlotId, rhs: SlotId },

    CmpBoolEq { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpBoolNeq { dst: SlotId, lhs: SlotId, rhs: SlotId },

    CmpObjEq { dst: SlotId, lhs: SlotId, rhs: SlotId, pos: ConstId },
    CmpObjNeq { dst: SlotId, lhs: SlotId, rhs: SlotId, pos: ConstId },
    CmpObjLt { dst: SlotId, lhs: SlotId, rhs: SlotId, pos: ConstId },
    CmpObjLte { dst: SlotId, lhs: SlotId, rhs: SlotId, pos: ConstId },
    CmpObjGt { dst: SlotId, lhs: SlotId, rhs: SlotId, pos: ConstId },
    CmpObjGte { dst: SlotId, lhs: SlotId, rhs: SlotId, pos: ConstId },

    // --- cross-type comparisons ---
    CmpIntRealEq { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpIntRealNeq { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpIntRealLt { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpIntRealLte { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpIntRealGt { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpIntRealGte { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpRealIntEq { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpRealIntNeq { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpRealIntLt { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpRealIntLte { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpRealIntGt { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpRealIntGte { dst: SlotId, lhs: SlotId, rhs: SlotId },

    CmpRefEqObj { dst: SlotId, lhs: SlotId, rhs: SlotId },
    CmpRefNeqObj { dst: SlotId, lhs: SlotId, rhs: SlotId },

    // --- object arithmetic / containment ---
    AddObj { dst: SlotId, lhs: SlotId, rhs: SlotId, pos: ConstId },
    SubObj { dst: SlotId, lhs: SlotId, rhs: SlotId, pos: ConstId },
    MulObj { dst: SlotId, lhs: SlotId, rhs: SlotId, pos: ConstId },
    DivObj { dst: SlotId, lhs: SlotId, rhs: SlotId, pos: ConstId },
    ModObj { dst: SlotId, lhs: SlotId, rhs: SlotId, pos: ConstId },
    ContainsObj { dst: SlotId, container: SlotId, value: SlotId, pos: ConstId },

    // --- boolean ---
    NotBool { dst: SlotId, src: SlotId },
    AndBool { dst: SlotId, lhs: SlotId, rhs: SlotId },
    OrBool { dst: SlotId, lhs: SlotId, rhs: SlotId },

    // --- control ---
    Jmp { target: Ip },
    JmpIfTrue { cond: SlotId, target: Ip },
    JmpIfFalse { cond: SlotId, target: Ip },
    Ret { value: SlotId },
    RetVoid,
    RetLabel { label: ConstId, value: SlotId },
    Throw { pos: ConstId, value: SlotId },

    // --- scope ---
    PushScope { plan: ConstId },
    PopScope,
    PushSlotPlan { plan: ConstId },
    PopSlotPlan,
    DeclLocal { decl: ConstId, slot: SlotId },
    DeclExtProperty { decl: ConstId, slot: SlotId },
    ResolveScopeSlot { scope_slot: SlotId, addr: AddrId },
    LoadObjAddr { dst: SlotId, addr: AddrId },
    StoreObjAddr { addr: AddrId, src: SlotId },
    LoadIntAddr { dst: SlotId, addr: AddrId },
    StoreIntAddr { addr: AddrId, src: SlotId },
    LoadRealAddr { dst: SlotId, addr: AddrId },
    StoreRealAddr { addr: AddrId, src: SlotId },
    LoadBoolAddr { dst: SlotId, addr: AddrId },
    StoreBoolAddr { addr: AddrId, src: SlotId },

    // --- range helper ---
    RangeIntBounds { range: SlotId, start: SlotId, end_exclusive: SlotId, ok: SlotId },

    // --- calls / fields / indexing ---
    CallDirect { callee: ConstId, arg_base: SlotId, args: ArgsSpec, dst: SlotId },
    CallVirtual { receiver: SlotId, method_name: ConstId, arg_base: SlotId, args: ArgsSpec, dst: SlotId },
    CallSlot { callee: SlotId, arg_base: SlotId, args: ArgsSpec, dst: SlotId },
    CallFallback { ast_id: ConstId, arg_base: SlotId, args: ArgsSpec, dst: SlotId },
    GetField { dst: SlotId, receiver: SlotId, name: ConstId },
    SetField { receiver: SlotId, name: ConstId, value: SlotId },
    GetName { dst: SlotId, name: ConstId },
    SetThisMember { name: ConstId, value: SlotId },
    GetThisMember { dst: SlotId, name: ConstId },
    GetIndex { dst: SlotId, receiver: SlotId, index: SlotId },
    SetIndex { receiver: SlotId, index: SlotId, value: SlotId },

    // --- escape hatch ---
    EvalFallback { ast_id: ConstId, dst: SlotId },
    EvalRef { reference: ConstId, dst: SlotId },
    EvalStmt { statement: ConstId, dst: SlotId },

    // --- misc ---
    Nop,
}

/// Scalar domain tag used by `BoxObj` and by the compiler's slot-type state
///.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ScalarTy {
    Int,
    Real,
    Bool,
}

/// Opaque host object reference retained only for `Drop`-adjacent bookkeeping
/// in tests; the bytecode module itself never dereferences it.
pub type RetainedObj = ObjHandle;

/// Every opcode's fixed operand-kind signature
/// MUST keep this table in one place"). Exposed for tooling/debugging (e.g. a
/// disassembler) rather than used by the VM, which dispatches directly on the
/// `Instr` variant.
pub fn operand_kinds(instr: &Instr) -> &'static [&'static str] {
    use Instr::*;
    match instr {
        ConstInt { .. } | ConstReal { .. } | ConstBool { .. } | ConstNull { .. } => &["SLOT"],
        ConstObj { .. } => &["SLOT", "CONST"],
        Nop | RetVoid | PopScope | PopSlotPlan => &[],
        Jmp { .. } => &["IP"],
        JmpIfTrue { .. } | JmpIfFalse { .. } => &["SLOT", "IP"],
        Ret { .. } => &["SLOT"],
        Throw { .. } => &["CONST", "SLOT"],
        _ => &["SLOT", "SLOT", "SLOT"],
    }
}

//! The register/slot-addressed interpreter. Grounded on `subset_julia_vm`'s
//! `vm/exec/` match-per-opcode dispatch loop, generalized from its stack
//! machine to slot-addressed operands throughout.

pub mod error;
pub mod exec;
pub mod frame;
pub mod inline_cache;

pub use error::VmError;

use std::rc::Rc;

use crate::bytecode::{CompiledFunction, Instr, ScalarTy};
use crate::host::{Arguments, Fallback, ObjHandle, Scope, SlotRecord};
use frame::Frame;

/// One VM instance per top-level invocation; holds nothing but the host's
/// tree-walker handle, since every other piece of state lives in the
/// [`Frame`] stack.
pub struct Vm {
    fallback: Rc<dyn Fallback>,
    frames: Vec<Frame>,
    /// `(hits, misses)` of the most recently popped frame's virtual-call
    /// inline cache, kept around after the frame itself is torn down so an
    /// embedder can sample dispatch-site effectiveness per top-level call.
    last_method_cache_stats: Option<(u64, u64)>,
}

impl Vm {
    pub fn new(fallback: Rc<dyn Fallback>) -> Self {
        Self { fallback, frames: Vec::new(), last_method_cache_stats: None }
    }

    /// Invoke `function` against `scope`, with `args` already marshalled.
    /// Binds positional args to
    /// `function.params` in order, then named args by name; an unmatched
    /// required parameter or an excess positional argument raises
    /// `IllegalArgument` on the callee's own scope, matching how the host
    /// itself reports arity mismatches on ordinary calls.
    pub fn run(
        &mut self,
        function: Rc<CompiledFunction>,
        scope: Rc<dyn Scope>,
        args: Arguments,
    ) -> Result<ObjHandle, VmError> {
        bind_params(&function, scope.as_ref(), args)?;
        let frame = Frame::new(function, scope, 0, self.fallback.clone());
        self.frames.push(frame);
        let result = self.run_frame();
        let frame = self.frames.pop().expect("frame pushed above");
        self.last_method_cache_stats = Some((frame.method_cache.hits, frame.method_cache.misses));
        result
    }

    /// `(hits, misses)` of the call-site inline caches from the most recent
    /// [`Vm::run`] invocation.
    pub fn last_method_cache_stats(&self) -> Option<(u64, u64)> {
        self.last_method_cache_stats
    }

    fn frame(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("run_frame called with no active frame")
    }

    fn run_frame(&mut self) -> Result<ObjHandle, VmError> {
        loop {
            let instr = self.frame().fetch().clone();
            if let Some(result) = self.step(&instr)? {
                return Ok(result);
            }
        }
    }

    /// Execute one instruction. Returns `Some(value)` when the frame should
    /// return, `None` to keep dispatching.
    fn step(&mut self, instr: &Instr) -> Result<Option<ObjHandle>, VmError> {
        use Instr::*;
        let frame = self.frame();
        match instr {
            ConstInt { dst, value } => frame.set_int(*dst, *value),
            ConstReal { dst, value } => frame.set_real(*dst, *value),
            ConstBool { dst, value } => frame.set_bool(*dst, *value),
            ConstObj { dst, konst } => {
                let v = match frame.function.constants.get(*konst) {
                    crate::bytecode::Constant::ObjRef(o) => o.clone(),
                    _ => return Err(invariant("CONST_OBJ: operand is not an ObjRef constant")),
                };
                frame.set_obj(*dst, v);
            }
            ConstNull { dst } => {
                let v = frame.current_scope.make_null();
                frame.set_obj(*dst, v);
            }
            MoveInt { dst, src } => {
                let v = frame.get_int(*src);
                frame.set_int(*dst, v);
            }
            MoveReal { dst, src } => {
                let v = frame.get_real(*src);
                frame.set_real(*dst, v);
            }
            MoveBool { dst, src } => {
                let v = frame.get_bool(*src);
                frame.set_bool(*dst, v);
            }
            MoveObj { dst, src } => {
                let v = frame.get_obj(*src);
                frame.set_obj(*dst, v);
            }
            BoxObj { dst, src, src_ty } => {
                let boxed = match src_ty {
                    ScalarTy::Int => frame.current_scope.make_int(frame.get_int(*src)),
                    ScalarTy::Real => frame.current_scope.make_real(frame.get_real(*src)),
                    ScalarTy::Bool => frame.current_scope.make_bool(frame.get_bool(*src)),
                };
                frame.set_obj(*dst, boxed);
            }

            IntToReal { dst, src } => {
                let v = frame.get_int(*src) as f64;
                frame.set_real(*dst, v);
            }
            RealToInt { dst, src } => {
                let v = frame.get_real(*src) as i64;
                frame.set_int(*dst, v);
            }
            BoolToInt { dst, src } => {
                let v = frame.get_bool(*src) as i64;
                frame.set_int(*dst, v);
            }
            IntToBool { dst, src } => {
                let v = frame.get_int(*src) != 0;
                frame.set_bool(*dst, v);
            }
            ObjToBool { dst, src } => {
                let v = frame.get_obj(*src).to_bool();
                frame.set_bool(*dst, v);
            }

            CheckIs { dst, obj, class } => {
                let class_name = const_str(frame, *class)?;
                let v = frame.get_obj(*obj).is_instance_of(&class_name);
                frame.set_bool(*dst, v);
            }
            AssertIs { obj, class, pos } => {
                let class_name = const_str(frame, *class)?;
                let recv = frame.get_obj(*obj);
                if !recv.is_instance_of(&class_name) {
                    let pos = const_pos(frame, *pos)?;
                    return Err(VmError::Runtime(
                        frame
                            .current_scope
                            .raise_class_cast(&class_name, recv.inspect().as_str())
                            .at(pos),
                    ));
                }
            }

            AddInt { dst, lhs, rhs } => frame.set_int(*dst, frame.get_int(*lhs).wrapping_add(frame.get_int(*rhs))),
            SubInt { dst, lhs, rhs } => frame.set_int(*dst, frame.get_int(*lhs).wrapping_sub(frame.get_int(*rhs))),
            MulInt { dst, lhs, rhs } => frame.set_int(*dst, frame.get_int(*lhs).wrapping_mul(frame.get_int(*rhs))),
            DivInt { dst, lhs, rhs, pos } => {
                let (l, r) = (frame.get_int(*lhs), frame.get_int(*rhs));
                if r == 0 {
                    let pos = const_pos(frame, *pos)?;
                    return Err(VmError::Runtime(frame.current_scope.raise_illegal_argument("division by zero").at(pos)));
                }
                frame.set_int(*dst, l.wrapping_div(r));
            }
            ModInt { dst, lhs, rhs, pos } => {
                let (l, r) = (frame.get_int(*lhs), frame.get_int(*rhs));
                if r == 0 {
                    let pos = const_pos(frame, *pos)?;
                    return Err(VmError::Runtime(frame.current_scope.raise_illegal_argument("modulo by zero").at(pos)));
                }
                frame.set_int(*dst, l.wrapping_rem(r));
            }
            NegInt { dst, src } => frame.set_int(*dst, -frame.get_int(*src)),
            IncInt { slot } => frame.set_int(*slot, frame.get_int(*slot).wrapping_add(1)),
            DecInt { slot } => frame.set_int(*slot, frame.get_int(*slot).wrapping_sub(1)),

            AddReal { dst, lhs, rhs } => frame.set_real(*dst, frame.get_real(*lhs) + frame.get_real(*rhs)),
            SubReal { dst, lhs, rhs } => frame.set_real(*dst, frame.get_real(*lhs) - frame.get_real(*rhs)),
            MulReal { dst, lhs, rhs } => frame.set_real(*dst, frame.get_real(*lhs) * frame.get_real(*rhs)),
            DivReal { dst, lhs, rhs } => frame.set_real(*dst, frame.get_real(*lhs) / frame.get_real(*rhs)),
            NegReal { dst, src } => frame.set_real(*dst, -frame.get_real(*src)),

            AndInt { dst, lhs, rhs } => frame.set_int(*dst, frame.get_int(*lhs) & frame.get_int(*rhs)),
            OrInt { dst, lhs, rhs } => frame.set_int(*dst, frame.get_int(*lhs) | frame.get_int(*rhs)),
            XorInt { dst, lhs, rhs } => frame.set_int(*dst, frame.get_int(*lhs) ^ frame.get_int(*rhs)),
            ShlInt { dst, lhs, rhs } => frame.set_int(*dst, frame.get_int(*lhs) << (frame.get_int(*rhs) & 63)),
            ShrInt { dst, lhs, rhs } => frame.set_int(*dst, frame.get_int(*lhs) >> (frame.get_int(*rhs) & 63)),
            UshrInt { dst, lhs, rhs } => {
                let v = (frame.get_int(*lhs) as u64) >> (frame.get_int(*rhs) as u64 & 63);
                frame.set_int(*dst, v as i64);
            }
            InvInt { dst, src } => frame.set_int(*dst, !frame.get_int(*src)),

            CmpIntEq { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_int(*lhs) == frame.get_int(*rhs)),
            CmpIntNeq { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_int(*lhs) != frame.get_int(*rhs)),
            CmpIntLt { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_int(*lhs) < frame.get_int(*rhs)),
            CmpIntLte { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_int(*lhs) <= frame.get_int(*rhs)),
            CmpIntGt { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_int(*lhs) > frame.get_int(*rhs)),
            CmpIntGte { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_int(*lhs) >= frame.get_int(*rhs)),

            CmpRealEq { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_real(*lhs) == frame.get_real(*rhs)),
            CmpRealNeq { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_real(*lhs) != frame.get_real(*rhs)),
            CmpRealLt { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_real(*lhs) < frame.get_real(*rhs)),
            CmpRealLte { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_real(*lhs) <= frame.get_real(*rhs)),
            CmpRealGt { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_real(*lhs) > frame.get_real(*rhs)),
            CmpRealGte { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_real(*lhs) >= frame.get_real(*rhs)),

            CmpBoolEq { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_bool(*lhs) == frame.get_bool(*rhs)),
            CmpBoolNeq { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_bool(*lhs) != frame.get_bool(*rhs)),

            CmpObjEq { dst, lhs, rhs, .. } => {
                let v = frame.get_obj(*lhs).equals(frame.current_scope.as_ref(), &frame.get_obj(*rhs));
                frame.set_bool(*dst, v);
            }
            CmpObjNeq { dst, lhs, rhs, .. } => {
                let v = !frame.get_obj(*lhs).equals(frame.current_scope.as_ref(), &frame.get_obj(*rhs));
                frame.set_bool(*dst, v);
            }
            CmpObjLt { dst, lhs, rhs, pos } => {
                let v = obj_compare(frame, *lhs, *rhs, *pos)?;
                frame.set_bool(*dst, v < 0);
            }
            CmpObjLte { dst, lhs, rhs, pos } => {
                let v = obj_compare(frame, *lhs, *rhs, *pos)?;
                frame.set_bool(*dst, v <= 0);
            }
            CmpObjGt { dst, lhs, rhs, pos } => {
                let v = obj_compare(frame, *lhs, *rhs, *pos)?;
                frame.set_bool(*dst, v > 0);
            }
            CmpObjGte { dst, lhs, rhs, pos } => {
                let v = obj_compare(frame, *lhs, *rhs, *pos)?;
                frame.set_bool(*dst, v >= 0);
            }

            CmpIntRealEq { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_int(*lhs) as f64 == frame.get_real(*rhs)),
            CmpIntRealNeq { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_int(*lhs) as f64 != frame.get_real(*rhs)),
            CmpIntRealLt { dst, lhs, rhs } => frame.set_bool(*dst, (frame.get_int(*lhs) as f64) < frame.get_real(*rhs)),
            CmpIntRealLte { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_int(*lhs) as f64 <= frame.get_real(*rhs)),
            CmpIntRealGt { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_int(*lhs) as f64 > frame.get_real(*rhs)),
            CmpIntRealGte { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_int(*lhs) as f64 >= frame.get_real(*rhs)),
            CmpRealIntEq { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_real(*lhs) == frame.get_int(*rhs) as f64),
            CmpRealIntNeq { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_real(*lhs) != frame.get_int(*rhs) as f64),
            CmpRealIntLt { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_real(*lhs) < frame.get_int(*rhs) as f64),
            CmpRealIntLte { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_real(*lhs) <= frame.get_int(*rhs) as f64),
            CmpRealIntGt { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_real(*lhs) > frame.get_int(*rhs) as f64),
            CmpRealIntGte { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_real(*lhs) >= frame.get_int(*rhs) as f64),

            CmpRefEqObj { dst, lhs, rhs } => {
                let v = Rc::ptr_eq(&frame.get_obj(*lhs), &frame.get_obj(*rhs));
                frame.set_bool(*dst, v);
            }
            CmpRefNeqObj { dst, lhs, rhs } => {
                let v = !Rc::ptr_eq(&frame.get_obj(*lhs), &frame.get_obj(*rhs));
                frame.set_bool(*dst, v);
            }

            AddObj { dst, lhs, rhs, pos } => obj_arith(frame, *dst, *lhs, *rhs, *pos, |o, s, r| o.plus(s, r))?,
            SubObj { dst, lhs, rhs, pos } => obj_arith(frame, *dst, *lhs, *rhs, *pos, |o, s, r| o.minus(s, r))?,
            MulObj { dst, lhs, rhs, pos } => obj_arith(frame, *dst, *lhs, *rhs, *pos, |o, s, r| o.mul(s, r))?,
            DivObj { dst, lhs, rhs, pos } => obj_arith(frame, *dst, *lhs, *rhs, *pos, |o, s, r| o.div(s, r))?,
            ModObj { dst, lhs, rhs, pos } => obj_arith(frame, *dst, *lhs, *rhs, *pos, |o, s, r| o.rem(s, r))?,
            ContainsObj { dst, container, value, pos } => {
                let c = frame.get_obj(*container);
                let v = frame.get_obj(*value);
                match c.contains(frame.current_scope.as_ref(), &v) {
                    Ok(b) => frame.set_bool(*dst, b),
                    Err(e) => {
                        let pos = const_pos(frame, *pos)?;
                        return Err(VmError::Runtime(e.at(pos)));
                    }
                }
            }

            NotBool { dst, src } => frame.set_bool(*dst, !frame.get_bool(*src)),
            AndBool { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_bool(*lhs) && frame.get_bool(*rhs)),
            OrBool { dst, lhs, rhs } => frame.set_bool(*dst, frame.get_bool(*lhs) || frame.get_bool(*rhs)),

            Jmp { target } => frame.ip = *target,
            JmpIfTrue { cond, target } => {
                if frame.get_bool(*cond) {
                    frame.ip = *target;
                }
            }
            JmpIfFalse { cond, target } => {
                if !frame.get_bool(*cond) {
                    frame.ip = *target;
                }
            }
            Ret { value } => return Ok(Some(frame.get_obj(*value))),
            RetVoid => {
                let null = frame.current_scope.make_null();
                return Ok(Some(null));
            }
            RetLabel { label, value } => {
                let label_name = const_str(frame, *label)?;
                let result = frame.get_obj(*value);
                if frame.function.return_labels.contains(label_name.as_ref()) {
                    return Ok(Some(result));
                }
                return Err(VmError::NonLocalReturn { label: label_name.to_string(), value: result });
            }
            Throw { pos, value } => {
                let pos = const_pos(frame, *pos)?;
                return Err(VmError::Thrown { value: frame.get_obj(*value), pos });
            }

            PushScope { plan } => {
                let plan = const_slot_plan(frame, *plan)?;
                exec::scope::push_scope(frame, &plan);
            }
            PopScope => exec::scope::pop_scope(frame)?,
            PushSlotPlan { plan } => {
                let plan = const_slot_plan(frame, *plan)?;
                exec::scope::push_scope(frame, &plan);
            }
            PopSlotPlan => exec::scope::pop_scope(frame)?,
            DeclLocal { decl, slot } => {
                let decl = match frame.function.constants.get(*decl) {
                    crate::bytecode::Constant::LocalDecl(d) => d.clone(),
                    _ => return Err(invariant("DECL_LOCAL: operand is not a LocalDecl constant")),
                };
                let value = frame.get_obj(*slot);
                frame.current_scope.add_item(&decl.name, decl.mutable, value, decl.visibility, decl.transient);
            }
            DeclExtProperty { decl, slot } => {
                let decl = match frame.function.constants.get(*decl) {
                    crate::bytecode::Constant::ExtensionPropertyDecl(d) => d.clone(),
                    _ => return Err(invariant("DECL_EXT_PROPERTY: operand is not an ExtensionPropertyDecl constant")),
                };
                let value = frame.get_obj(*slot);
                frame.current_scope.add_item(&decl.name, true, value, decl.visibility, false);
            }
            ResolveScopeSlot { scope_slot, addr } => exec::scope::resolve_scope_slot(frame, *scope_slot, *addr),
            LoadObjAddr { dst, addr } => {
                let v = exec::scope::load_obj_addr(frame, *addr)?;
                frame.set_obj(*dst, v);
            }
            StoreObjAddr { addr, src } => {
                let v = frame.get_obj(*src);
                exec::scope::store_obj_addr(frame, *addr, v)?;
            }
            LoadIntAddr { dst, addr } => {
                let v = exec::scope::load_int_addr(frame, *addr)?;
                frame.set_int(*dst, v);
            }
            StoreIntAddr { addr, src } => {
                let v = frame.get_int(*src);
                exec::scope::store_int_addr(frame, *addr, v)?;
            }
            LoadRealAddr { dst, addr } => {
                let v = exec::scope::load_real_addr(frame, *addr)?;
                frame.set_real(*dst, v);
            }
            StoreRealAddr { addr, src } => {
                let v = frame.get_real(*src);
                exec::scope::store_real_addr(frame, *addr, v)?;
            }
            LoadBoolAddr { dst, addr } => {
                let v = exec::scope::load_bool_addr(frame, *addr)?;
                frame.set_bool(*dst, v);
            }
            StoreBoolAddr { addr, src } => {
                let v = frame.get_bool(*src);
                exec::scope::store_bool_addr(frame, *addr, v)?;
            }

            RangeIntBounds { range, start, end_exclusive, ok } => {
                let r = frame.get_obj(*range);
                match (r.read_field(frame.current_scope.as_ref(), "start"), r.read_field(frame.current_scope.as_ref(), "endExclusive")) {
                    (Ok(SlotRecord::Value(s)), Ok(SlotRecord::Value(e))) => {
                        frame.set_int(*start, s.to_long()?);
                        frame.set_int(*end_exclusive, e.to_long()?);
                        frame.set_bool(*ok, true);
                    }
                    _ => frame.set_bool(*ok, false),
                }
            }

            CallDirect { callee, arg_base, args, dst } => {
                let built = exec::calls::build_arguments(frame, *arg_base, *args)?;
                let v = exec::calls::call_direct(frame, *callee, built)?;
                frame.set_obj(*dst, v);
            }
            CallVirtual { receiver, method_name, arg_base, args, dst } => {
                let recv = frame.get_obj(*receiver);
                let name = const_str(frame, *method_name)?.to_string();
                let built = exec::calls::build_arguments(frame, *arg_base, *args)?;
                let site = frame.ip - 1;
                let v = exec::calls::call_virtual(frame, site, recv, &name, built)?;
                frame.set_obj(*dst, v);
            }
            CallSlot { callee, arg_base, args, dst } => {
                let built = exec::calls::build_arguments(frame, *arg_base, *args)?;
                let v = exec::calls::call_slot(frame, *callee, built)?;
                frame.set_obj(*dst, v);
            }
            CallFallback { ast_id, arg_base, args, dst } => {
                let built = exec::calls::build_arguments(frame, *arg_base, *args)?;
                let v = exec::calls::call_fallback(frame, *ast_id, built)?;
                frame.set_obj(*dst, v);
            }
            GetField { dst, receiver, name } => {
                let v = exec::calls::get_field(frame, *receiver, *name)?;
                frame.set_obj(*dst, v);
            }
            SetField { receiver, name, value } => {
                let v = frame.get_obj(*value);
                exec::calls::set_field(frame, *receiver, *name, v)?;
            }
            GetName { dst, name } => {
                let v = exec::calls::get_name(frame, *name)?;
                frame.set_obj(*dst, v);
            }
            GetThisMember { dst, name } => {
                let v = get_this_member(frame, *name)?;
                frame.set_obj(*dst, v);
            }
            SetThisMember { name, value } => {
                let v = frame.get_obj(*value);
                set_this_member(frame, *name, v)?;
            }
            GetIndex { dst, receiver, index } => {
                let v = exec::calls::get_index(frame, *receiver, *index)?;
                frame.set_obj(*dst, v);
            }
            SetIndex { receiver, index, value } => {
                let v = frame.get_obj(*value);
                exec::calls::set_index(frame, *receiver, *index, v)?;
            }

            EvalFallback { ast_id, dst } => {
                let node = match frame.function.constants.get(*ast_id) {
                    crate::bytecode::Constant::Ref(r) => r.clone(),
                    _ => return Err(invariant("EVAL_FALLBACK: operand is not a Ref constant")),
                };
                let v = exec::fallback::eval_fallback_node(frame, &node, None)?;
                frame.set_obj(*dst, v);
            }
            EvalRef { reference, dst } => {
                let node = match frame.function.constants.get(*reference) {
                    crate::bytecode::Constant::Ref(r) => r.clone(),
                    _ => return Err(invariant("EVAL_REF: operand is not a Ref constant")),
                };
                let v = exec::fallback::eval_ref(frame, &node)?;
                frame.set_obj(*dst, v);
            }
            EvalStmt { statement, dst } => {
                let node = match frame.function.constants.get(*statement) {
                    crate::bytecode::Constant::StatementVal(s) => s.clone(),
                    _ => return Err(invariant("EVAL_STMT: operand is not a StatementVal constant")),
                };
                let v = exec::fallback::eval_stmt(frame, &node)?;
                frame.set_obj(*dst, v);
            }

            Nop => {}
        }
        Ok(None)
    }
}

fn invariant(msg: &str) -> VmError {
    VmError::InvariantViolated(msg.to_string())
}

fn const_str(frame: &Frame, id: crate::bytecode::ConstId) -> Result<Rc<str>, VmError> {
    match frame.function.constants.get(id) {
        crate::bytecode::Constant::Str(s) => Ok(s.clone()),
        _ => Err(invariant("expected a Str constant")),
    }
}

fn const_pos(frame: &Frame, id: crate::bytecode::ConstId) -> Result<crate::span::Position, VmError> {
    match frame.function.constants.get(id) {
        crate::bytecode::Constant::PosVal(p) => Ok(*p),
        _ => Err(invariant("expected a PosVal constant")),
    }
}

fn const_slot_plan(frame: &Frame, id: crate::bytecode::ConstId) -> Result<Vec<(String, u32)>, VmError> {
    match frame.function.constants.get(id) {
        crate::bytecode::Constant::SlotPlan(p) => Ok(p.clone()),
        _ => Err(invariant("expected a SlotPlan constant")),
    }
}

fn obj_compare(frame: &Frame, lhs: crate::bytecode::SlotId, rhs: crate::bytecode::SlotId, pos: crate::bytecode::ConstId) -> Result<i32, VmError> {
    let l = frame.get_obj(lhs);
    let r = frame.get_obj(rhs);
    l.compare_to(frame.current_scope.as_ref(), &r).map_err(|e| {
        let pos = const_pos(frame, pos).unwrap_or(crate::span::Position::unknown());
        VmError::Runtime(e.at(pos))
    })
}

fn obj_arith(
    frame: &mut Frame,
    dst: crate::bytecode::SlotId,
    lhs: crate::bytecode::SlotId,
    rhs: crate::bytecode::SlotId,
    pos: crate::bytecode::ConstId,
    op: impl FnOnce(&ObjHandle, &dyn Scope, &ObjHandle) -> Result<ObjHandle, crate::host::RuntimeError>,
) -> Result<(), VmError> {
    let l = frame.get_obj(lhs);
    let r = frame.get_obj(rhs);
    match op(&l, frame.current_scope.as_ref(), &r) {
        Ok(v) => {
            frame.set_obj(dst, v);
            Ok(())
        }
        Err(e) => {
            let pos = const_pos(frame, pos)?;
            Err(VmError::Runtime(e.at(pos)))
        }
    }
}

/// `this` is resolved like any other captured name
/// "ImplicitThisMember"): the enclosing method scope binds `this` the same
/// way it binds parameters, so `GET_THIS_MEMBER`/`SET_THIS_MEMBER` just
/// chain a `this` lookup with a field access.
fn this_obj(frame: &Frame) -> Result<ObjHandle, VmError> {
    match frame.current_scope.get("this") {
        Some(SlotRecord::Value(v)) => Ok(v),
        Some(SlotRecord::Unset) => Err(VmError::Runtime(frame.current_scope.raise_unset("this"))),
        None => Err(VmError::Runtime(frame.current_scope.raise_symbol_not_found("this"))),
    }
}

fn get_this_member(frame: &Frame, name: crate::bytecode::ConstId) -> Result<ObjHandle, VmError> {
    let recv = this_obj(frame)?;
    let name = const_str(frame, name)?;
    match recv.read_field(frame.current_scope.as_ref(), &name)? {
        SlotRecord::Value(v) => Ok(v),
        SlotRecord::Unset => Err(VmError::Runtime(frame.current_scope.raise_unset(&name))),
    }
}

fn set_this_member(frame: &Frame, name: crate::bytecode::ConstId, value: ObjHandle) -> Result<(), VmError> {
    let recv = this_obj(frame)?;
    let name = const_str(frame, name)?;
    Ok(recv.write_field(frame.current_scope.as_ref(), &name, value)?)
}

fn bind_params(function: &CompiledFunction, scope: &dyn Scope, mut args: Arguments) -> Result<(), VmError> {
    for (i, name) in function.params.iter().enumerate() {
        let value = if i < args.positional.len() {
            args.positional[i].clone()
        } else if let Some(pos) = args.named.iter().position(|(n, _)| n == name) {
            args.named.remove(pos).1
        } else {
            return Err(VmError::Runtime(scope.raise_illegal_argument(&format!("missing argument '{name}'"))));
        };
        scope.add_item(name, true, value, crate::ast::Visibility::Private, false);
    }
    if args.positional.len() > function.params.len() {
        return Err(VmError::Runtime(scope.raise_illegal_argument("too many positional arguments")));
    }
    Ok(())
}

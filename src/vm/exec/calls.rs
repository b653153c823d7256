//! Calls, fields, and indexing.

use crate::bytecode::{ArgsSpec, CompiledFunction, ConstId, Constant};
use crate::host::{Arguments, ObjHandle, RuntimeError, Scope};
use crate::vm::frame::Frame;
use std::rc::Rc;

/// `buildArguments(argBase, argCount-or-plan)`.
pub fn build_arguments(
    frame: &Frame,
    arg_base: crate::bytecode::SlotId,
    spec: ArgsSpec,
) -> Result<Arguments, RuntimeError> {
    match spec {
        ArgsSpec::Count(n) => {
            let positional = (0..n).map(|i| frame.get_obj(arg_base + i)).collect();
            Ok(Arguments { positional, named: Vec::new(), tail_block: false })
        }
        ArgsSpec::Plan(const_id) => {
            let plan = match frame.function.constants.get(const_id) {
                Constant::CallArgsPlan(p) => p,
                _ => return Err(RuntimeError::new("CALL_*: operand is not a CallArgsPlan constant")),
            };
            let mut args = Arguments { positional: Vec::new(), named: Vec::new(), tail_block: plan.tail_block };
            let mut cursor = arg_base;
            for entry in &plan.entries {
                let value = frame.get_obj(cursor);
                cursor += 1;
                if entry.is_splat {
                    splat_into(&mut args, value)?;
                } else if let Some(name) = &entry.name {
                    if args.named.iter().any(|(n, _)| n == name) {
                        return Err(RuntimeError::new(format!("duplicate named argument '{name}'")));
                    }
                    args.named.push((name.clone(), value));
                } else {
                    if !args.named.is_empty() {
                        return Err(RuntimeError::new("positional argument after named argument"));
                    }
                    args.positional.push(value);
                }
            }
            Ok(args)
        }
    }
}

/// Expand one splat argument: an `ObjMap` splats into named args, an
/// `ObjList`/iterable splats into positional args (only before any named
/// arg has been seen), anything else raises `IllegalArgument`.
fn splat_into(args: &mut Arguments, value: ObjHandle) -> Result<(), RuntimeError> {
    if let Some(pairs) = value.as_map_pairs() {
        for (k, v) in pairs {
            args.named.push((k, v));
        }
        return Ok(());
    }
    if let Some(items) = value.as_list_items() {
        if !args.named.is_empty() {
            return Err(RuntimeError::new("positional splat after named argument"));
        }
        args.positional.extend(items);
        return Ok(());
    }
    Err(RuntimeError::new("splat argument is neither a map nor an iterable list"))
}

/// `CALL_DIRECT(calleeConst, argBase, argCount|plan, dst)`.
pub fn call_direct(
    frame: &mut Frame,
    callee: ConstId,
    args: Arguments,
) -> Result<ObjHandle, RuntimeError> {
    let callee_obj = match frame.function.constants.get(callee) {
        Constant::ObjRef(o) => o.clone(),
        _ => return Err(RuntimeError::new("CALL_DIRECT: operand is not an ObjRef constant")),
    };
    callee_obj.call_on(frame.current_scope.as_ref(), &args)
}

/// `CALL_SLOT(calleeSlot, argBase, argCount|plan, dst)`: the callee is a
/// value already sitting in a slot (the result of a prior `GET_NAME` or
/// expression) — calls to local-variable callees are legitimate
/// `CALL_SLOT` sites.
pub fn call_slot(frame: &mut Frame, callee_slot: crate::bytecode::SlotId, args: Arguments) -> Result<ObjHandle, RuntimeError> {
    let callee = frame.get_obj(callee_slot);
    callee.call_on(frame.current_scope.as_ref(), &args)
}

/// `CALL_VIRTUAL(receiver, methodNameConst, argBase, argCount|plan, dst)`,
/// consulting the per-frame method inline cache first.
pub fn call_virtual(
    frame: &mut Frame,
    site: crate::bytecode::Ip,
    receiver: ObjHandle,
    method_name: &str,
    args: Arguments,
) -> Result<ObjHandle, RuntimeError> {
    // The cache only records shape (class id + layout version); a hit still
    // dispatches through `invoke_instance_method`, since this inline cache
    // exists to skip the *lookup*, and `invoke_instance_method` is the
    // host's single dispatch entry point regardless of cache state.
    frame.method_cache.check(site, receiver.class_id(), receiver.layout_version());
    receiver.invoke_instance_method(frame.current_scope.as_ref(), method_name, &args)
}

/// `CALL_FALLBACK(astId, argBase, argCount|plan, dst)`: the callee itself
/// could not be lowered (e.g. an unsupported call-target shape); the whole
/// call expression is evaluated by the host tree-walker instead, with the
/// already-lowered argument values passed through so side effects in
/// argument evaluation are not duplicated.
pub fn call_fallback(
    frame: &mut Frame,
    ast_id: ConstId,
    args: Arguments,
) -> Result<ObjHandle, RuntimeError> {
    let node = match frame.function.constants.get(ast_id) {
        Constant::Ref(r) => r.clone(),
        _ => return Err(RuntimeError::new("CALL_FALLBACK: operand is not a Ref constant")),
    };
    super::fallback::eval_fallback_node(frame, &node, Some(args))
}

pub fn get_field(frame: &Frame, receiver: crate::bytecode::SlotId, name: ConstId) -> Result<ObjHandle, RuntimeError> {
    let recv = frame.get_obj(receiver);
    let name = const_str(&frame.function, name)?;
    match recv.read_field(frame.current_scope.as_ref(), &name)? {
        crate::host::SlotRecord::Value(v) => Ok(v),
        crate::host::SlotRecord::Unset => Err(frame.current_scope.raise_unset(&name)),
    }
}

pub fn set_field(frame: &Frame, receiver: crate::bytecode::SlotId, name: ConstId, value: ObjHandle) -> Result<(), RuntimeError> {
    let recv = frame.get_obj(receiver);
    let name = const_str(&frame.function, name)?;
    recv.write_field(frame.current_scope.as_ref(), &name, value)
}

/// `GET_NAME(nameConst, dst)`: last-resort runtime name lookup, used when
/// the compiler could not resolve a reference to any slot.
pub fn get_name(frame: &Frame, name: ConstId) -> Result<ObjHandle, RuntimeError> {
    let name = const_str(&frame.function, name)?;
    match frame.current_scope.get(&name) {
        Some(crate::host::SlotRecord::Value(v)) => Ok(v),
        Some(crate::host::SlotRecord::Unset) => Err(frame.current_scope.raise_unset(&name)),
        None => Err(frame.current_scope.raise_symbol_not_found(&name)),
    }
}

pub fn get_index(frame: &Frame, receiver: crate::bytecode::SlotId, index: crate::bytecode::SlotId) -> Result<ObjHandle, RuntimeError> {
    let recv = frame.get_obj(receiver);
    let idx = frame.get_obj(index);
    recv.get_at(frame.current_scope.as_ref(), &idx)
}

pub fn set_index(
    frame: &Frame,
    receiver: crate::bytecode::SlotId,
    index: crate::bytecode::SlotId,
    value: ObjHandle,
) -> Result<(), RuntimeError> {
    let recv = frame.get_obj(receiver);
    let idx = frame.get_obj(index);
    recv.put_at(frame.current_scope.as_ref(), &idx, value)
}

fn const_str(func: &Rc<CompiledFunction>, id: ConstId) -> Result<Rc<str>, RuntimeError> {
    match func.constants.get(id) {
        Constant::Str(s) => Ok(s.clone()),
        _ => Err(RuntimeError::new("expected a Str constant")),
    }
}

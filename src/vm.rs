/// Stack-machine interpreter for compiled procedures.
///
/// One Rust call frame per script call. Every frame owns an evaluation
/// stack, locals, the argument vector, a closure-record chain head, the
/// exception-handler stack, active with-objects and for-in cursors.
/// Uncaught errors pick up a stack frame per unwound activation on their
/// way to the `__.main` gateway; temporaries and cursors are released on
/// every exit path because they live in the frame itself.
use crate::binder;
use crate::coerce::{self, PrimitiveHint};
use crate::engine::Engine;
use crate::errors::{ErrorKind, ScriptError};
use crate::instructions::{CmpMode, CmpOp, Instr, MethodId, NumMode, Procedure};
use crate::prototype::{self, PROTOTYPES};
use crate::value::{
    ClosureRecord, FunctionInstance, FunctionKind, OwnSlot, RecordRef, ScriptObject, Value,
};
use std::sync::Arc;

const MAX_CALL_DEPTH: usize = 512;

struct Handler {
    catch: u32,
    stack_depth: usize,
    with_depth: usize,
    iter_depth: usize,
}

/// Invoke a compiled method body through the canonical gateway signature.
pub fn call_method(
    engine: &Engine,
    method: MethodId,
    this: Value,
    args: Vec<Value>,
    captured: Option<RecordRef>,
) -> Result<Value, ScriptError> {
    let proc = engine.procedure(method);
    if engine.enter_call() > MAX_CALL_DEPTH {
        engine.exit_call();
        let mut err = ScriptError::new(ErrorKind::RangeError, "Maximum call stack size exceeded");
        err.push_frame(&proc.name, &proc.path, 0, 0);
        return Err(err);
    }
    let result = run(engine, &proc, this, args, captured);
    engine.exit_call();
    result
}

fn run(
    engine: &Engine,
    proc: &Arc<Procedure>,
    this: Value,
    mut args: Vec<Value>,
    captured: Option<RecordRef>,
) -> Result<Value, ScriptError> {
    let mut stack: Vec<Value> = Vec::with_capacity(8);
    let mut locals = vec![Value::Undefined; proc.local_count as usize];
    let mut handlers: Vec<Handler> = Vec::new();
    let mut withs: Vec<Value> = Vec::new();
    let mut iters: Vec<std::vec::IntoIter<String>> = Vec::new();

    // Activation record for hoisted variables; parameters copied by the
    // emitted prologue.
    let records: Option<RecordRef> = if proc.record_slots > 0 {
        Some(ClosureRecord::new(proc.record_slots as usize, captured))
    } else {
        captured
    };

    let mut ip: usize = 0;
    loop {
        if ip >= proc.code.len() {
            return Ok(Value::Undefined);
        }
        let result = step(
            engine,
            proc,
            &mut stack,
            &mut locals,
            &mut args,
            &this,
            &records,
            &mut handlers,
            &mut withs,
            &mut iters,
            &mut ip,
        );
        match result {
            Ok(Flow::Next) => {}
            Ok(Flow::Return(value)) => return Ok(value),
            Err(err) => match handlers.pop() {
                Some(handler) => {
                    stack.truncate(handler.stack_depth);
                    withs.truncate(handler.with_depth);
                    iters.truncate(handler.iter_depth);
                    stack.push(engine.materialize_thrown(&err));
                    ip = handler.catch as usize;
                }
                None => {
                    let mut err = err;
                    let (line, column) = proc.position_at(ip.saturating_sub(1));
                    err.push_frame(&proc.name, &proc.path, line, column);
                    return Err(err);
                }
            },
        }
    }
}

enum Flow {
    Next,
    Return(Value),
}

fn pop(stack: &mut Vec<Value>) -> Value {
    stack.pop().expect("evaluation stack underflow")
}

fn pop_args(stack: &mut Vec<Value>, argc: usize) -> Vec<Value> {
    let at = stack.len() - argc;
    stack.split_off(at)
}

fn num_of(engine: &Engine, v: &Value) -> Result<f64, ScriptError> {
    match v.as_number() {
        Some(n) => Ok(n),
        None => coerce::to_number(engine, v),
    }
}

fn int_of(engine: &Engine, v: &Value) -> Result<i64, ScriptError> {
    match v {
        Value::Int(i) => Ok(*i),
        Value::Number(n) => Ok(*n as i64),
        other => Ok(coerce::to_number(engine, other)? as i64),
    }
}

#[allow(clippy::too_many_arguments)]
fn step(
    engine: &Engine,
    proc: &Arc<Procedure>,
    stack: &mut Vec<Value>,
    locals: &mut [Value],
    args: &mut Vec<Value>,
    this: &Value,
    records: &Option<RecordRef>,
    handlers: &mut Vec<Handler>,
    withs: &mut Vec<Value>,
    iters: &mut Vec<std::vec::IntoIter<String>>,
    ip: &mut usize,
) -> Result<Flow, ScriptError> {
    let instr = proc.code[*ip].clone();
    *ip += 1;
    match instr {
        // ── Loads & stack ───────────────────────────────────────────────────
        Instr::LoadUndefined => stack.push(Value::Undefined),
        Instr::LoadNull => stack.push(Value::Null),
        Instr::LoadTrue => stack.push(Value::Bool(true)),
        Instr::LoadFalse => stack.push(Value::Bool(false)),
        Instr::LoadInt(i) => stack.push(Value::Int(i as i64)),
        Instr::LoadNum(idx) => stack.push(Value::Number(proc.numbers[idx as usize])),
        Instr::LoadStr(idx) => stack.push(Value::str(&proc.strings[idx as usize])),
        Instr::Dup => {
            let top = stack.last().expect("dup on empty stack").clone();
            stack.push(top);
        }
        Instr::Pop => {
            pop(stack);
        }
        Instr::Swap => {
            let len = stack.len();
            stack.swap(len - 1, len - 2);
        }

        // ── Variables ───────────────────────────────────────────────────────
        Instr::LoadLocal(i) => stack.push(locals[i as usize].clone()),
        Instr::StoreLocal(i) => locals[i as usize] = pop(stack),
        Instr::LoadArg(i) => {
            stack.push(args.get(i as usize).cloned().unwrap_or(Value::Undefined))
        }
        Instr::StoreArg(i) => {
            let value = pop(stack);
            let idx = i as usize;
            if idx >= args.len() {
                args.resize(idx + 1, Value::Undefined);
            }
            args[idx] = value;
        }
        Instr::LoadThis => stack.push(this.clone()),
        Instr::LoadRecord { depth, slot } => {
            let head = records.as_ref().expect("record chain missing");
            stack.push(head.load(depth, slot));
        }
        Instr::StoreRecord { depth, slot } => {
            let value = pop(stack);
            let head = records.as_ref().expect("record chain missing");
            head.store(depth, slot, value);
        }
        Instr::LoadGlobal(slot) => {
            let global = engine.global_object();
            let value = global
                .data
                .read()
                .slots
                .get(slot as usize)
                .cloned()
                .unwrap_or(Value::Undefined);
            stack.push(value);
        }
        Instr::StoreGlobal(slot) => {
            let value = pop(stack);
            let global = engine.global_object();
            let mut data = global.data.write();
            if data.slots.len() <= slot as usize {
                data.slots.resize(slot as usize + 1, Value::Undefined);
            }
            data.slots[slot as usize] = value;
        }
        Instr::LoadName(idx) | Instr::LoadNameOrUndefined(idx) => {
            let name = &proc.strings[idx as usize];
            let throw_if_missing = matches!(instr, Instr::LoadName(_));
            let mut found = None;
            for w in withs.iter().rev() {
                if prototype::has_property(engine, w, name)? {
                    found = Some(prototype::get_property_value(engine, w, name)?);
                    break;
                }
            }
            let value = match found {
                Some(v) => v,
                None => {
                    let global = Value::Object(engine.global_object());
                    if prototype::has_property(engine, &global, name)? {
                        prototype::get_property_value(engine, &global, name)?
                    } else if throw_if_missing {
                        return Err(ScriptError::reference_error(format!(
                            "{} is not defined",
                            name
                        )));
                    } else {
                        Value::Undefined
                    }
                }
            };
            stack.push(value);
        }
        Instr::StoreName(idx) => {
            let name = proc.strings[idx as usize].clone();
            let value = pop(stack);
            let mut stored = false;
            for w in withs.iter().rev() {
                if prototype::has_property(engine, w, &name)? {
                    prototype::set_property_value(engine, w, &name, value.clone())?;
                    stored = true;
                    break;
                }
            }
            if !stored {
                let global = Value::Object(engine.global_object());
                if proc.strict && !prototype::has_property(engine, &global, &name)? {
                    return Err(ScriptError::reference_error(format!(
                        "{} is not defined",
                        name
                    )));
                }
                prototype::set_property_value(engine, &global, &name, value)?;
            }
        }

        // ── with scopes ─────────────────────────────────────────────────────
        Instr::WithEnter => {
            let object = pop(stack);
            if object.is_nullish() {
                return Err(ScriptError::type_error(
                    "Cannot use a null or undefined value in a with statement",
                ));
            }
            withs.push(object);
        }
        Instr::WithExit => {
            withs.pop();
        }
        Instr::WithLoadOrJump { name, target } => {
            let name = &proc.strings[name as usize];
            for w in withs.iter().rev() {
                if prototype::has_property(engine, w, name)? {
                    let value = prototype::get_property_value(engine, w, name)?;
                    stack.push(value);
                    *ip = target as usize;
                    break;
                }
            }
        }
        Instr::WithStoreOrJump { name, target } => {
            let name = proc.strings[name as usize].clone();
            let mut hit = None;
            for w in withs.iter().rev() {
                if prototype::has_property(engine, w, &name)? {
                    hit = Some(w.clone());
                    break;
                }
            }
            if let Some(w) = hit {
                let value = pop(stack);
                prototype::set_property_value(engine, &w, &name, value)?;
                *ip = target as usize;
            }
        }

        // ── Arithmetic ──────────────────────────────────────────────────────
        Instr::Add(mode) => {
            let b = pop(stack);
            let a = pop(stack);
            let result = match mode {
                NumMode::I32 => {
                    let (x, y) = (int_of(engine, &a)?, int_of(engine, &b)?);
                    match x.checked_add(y) {
                        Some(sum) => Value::Int(sum),
                        None => Value::Number(x as f64 + y as f64),
                    }
                }
                NumMode::F64 => Value::Number(num_of(engine, &a)? + num_of(engine, &b)?),
                NumMode::Dyn => coerce::add(engine, &a, &b)?,
            };
            stack.push(result);
        }
        Instr::Sub(mode) => {
            let b = pop(stack);
            let a = pop(stack);
            let result = match mode {
                NumMode::I32 => {
                    let (x, y) = (int_of(engine, &a)?, int_of(engine, &b)?);
                    match x.checked_sub(y) {
                        Some(v) => Value::Int(v),
                        None => Value::Number(x as f64 - y as f64),
                    }
                }
                _ => Value::Number(num_of(engine, &a)? - num_of(engine, &b)?),
            };
            stack.push(result);
        }
        Instr::Mul(mode) => {
            let b = pop(stack);
            let a = pop(stack);
            let result = match mode {
                NumMode::I32 => {
                    let (x, y) = (int_of(engine, &a)?, int_of(engine, &b)?);
                    match x.checked_mul(y) {
                        Some(v) => Value::Int(v),
                        None => Value::Number(x as f64 * y as f64),
                    }
                }
                _ => Value::Number(num_of(engine, &a)? * num_of(engine, &b)?),
            };
            stack.push(result);
        }
        Instr::Div(_) => {
            let b = pop(stack);
            let a = pop(stack);
            stack.push(Value::Number(num_of(engine, &a)? / num_of(engine, &b)?));
        }
        Instr::Mod(_) => {
            let b = pop(stack);
            let a = pop(stack);
            stack.push(Value::Number(num_of(engine, &a)? % num_of(engine, &b)?));
        }
        Instr::Neg(mode) => {
            let a = pop(stack);
            let result = match (&a, mode) {
                (Value::Int(i), NumMode::I32) if *i != 0 => Value::Int(-i),
                _ => Value::Number(-num_of(engine, &a)?),
            };
            stack.push(result);
        }
        Instr::Concat => {
            let b = pop(stack);
            let a = pop(stack);
            let left = coerce::rope_of(engine, &coerce::to_primitive(engine, &a, PrimitiveHint::None)?)?;
            let right = coerce::rope_of(engine, &coerce::to_primitive(engine, &b, PrimitiveHint::None)?)?;
            stack.push(Value::Rope(crate::value::Rope::concat(left, right)));
        }
        Instr::BitAnd | Instr::BitOr | Instr::BitXor => {
            let b = pop(stack);
            let a = pop(stack);
            let x = coerce::to_int32(engine, &a)?;
            let y = coerce::to_int32(engine, &b)?;
            let r = match instr {
                Instr::BitAnd => x & y,
                Instr::BitOr => x | y,
                _ => x ^ y,
            };
            stack.push(Value::Int(r as i64));
        }
        Instr::Shl => {
            let b = pop(stack);
            let a = pop(stack);
            let x = coerce::to_int32(engine, &a)?;
            let shift = coerce::to_uint32(engine, &b)? & 31;
            stack.push(Value::Int((x << shift) as i64));
        }
        Instr::Shr => {
            let b = pop(stack);
            let a = pop(stack);
            let x = coerce::to_int32(engine, &a)?;
            let shift = coerce::to_uint32(engine, &b)? & 31;
            stack.push(Value::Int((x >> shift) as i64));
        }
        Instr::Ushr => {
            let b = pop(stack);
            let a = pop(stack);
            let x = coerce::to_uint32(engine, &a)?;
            let shift = coerce::to_uint32(engine, &b)? & 31;
            stack.push(Value::Number((x >> shift) as f64));
        }
        Instr::BitNot => {
            let a = pop(stack);
            let x = coerce::to_int32(engine, &a)?;
            stack.push(Value::Int(!x as i64));
        }

        // ── Comparison & logic ──────────────────────────────────────────────
        Instr::Cmp { op, mode } => {
            let b = pop(stack);
            let a = pop(stack);
            let result = match mode {
                CmpMode::Str => {
                    let (x, y) = (
                        a.as_string().unwrap_or_else(|| Arc::from("")),
                        b.as_string().unwrap_or_else(|| Arc::from("")),
                    );
                    match op {
                        CmpOp::Lt => x < y,
                        CmpOp::Le => x <= y,
                        CmpOp::Gt => x > y,
                        CmpOp::Ge => x >= y,
                    }
                }
                CmpMode::I32 | CmpMode::F64 => {
                    let (x, y) = (num_of(engine, &a)?, num_of(engine, &b)?);
                    if x.is_nan() || y.is_nan() {
                        false
                    } else {
                        match op {
                            CmpOp::Lt => x < y,
                            CmpOp::Le => x <= y,
                            CmpOp::Gt => x > y,
                            CmpOp::Ge => x >= y,
                        }
                    }
                }
                CmpMode::Dyn => match op {
                    CmpOp::Lt => coerce::less_than(engine, &a, &b)?,
                    CmpOp::Le => coerce::less_than_or_equal(engine, &a, &b)?,
                    CmpOp::Gt => coerce::greater_than(engine, &a, &b)?,
                    CmpOp::Ge => coerce::greater_than_or_equal(engine, &a, &b)?,
                },
            };
            stack.push(Value::Bool(result));
        }
        Instr::LooseEq => {
            let b = pop(stack);
            let a = pop(stack);
            stack.push(Value::Bool(coerce::loose_equals(engine, &a, &b)?));
        }
        Instr::LooseNe => {
            let b = pop(stack);
            let a = pop(stack);
            stack.push(Value::Bool(!coerce::loose_equals(engine, &a, &b)?));
        }
        Instr::StrictEq => {
            let b = pop(stack);
            let a = pop(stack);
            stack.push(Value::Bool(coerce::strict_equals(&a, &b)));
        }
        Instr::StrictNe => {
            let b = pop(stack);
            let a = pop(stack);
            stack.push(Value::Bool(!coerce::strict_equals(&a, &b)));
        }
        Instr::Not => {
            let a = pop(stack);
            stack.push(Value::Bool(!coerce::to_boolean(&a)));
        }
        Instr::TypeOf => {
            let a = pop(stack);
            stack.push(Value::str(a.type_of()));
        }
        Instr::In => {
            let b = pop(stack);
            let a = pop(stack);
            if !matches!(b, Value::Object(_) | Value::Function(_)) {
                return Err(ScriptError::type_error(format!(
                    "Cannot use 'in' operator to search for a property in a {} value",
                    b.type_of()
                )));
            }
            let key = coerce::to_string(engine, &a)?;
            stack.push(Value::Bool(prototype::has_property(engine, &b, &key)?));
        }
        Instr::InstanceOf => {
            let b = pop(stack);
            let a = pop(stack);
            let (line, _) = proc.position_at(*ip - 1);
            let func = match &b {
                Value::Function(f) => f,
                other => {
                    return Err(ScriptError::type_error(format!(
                        "The right-hand side of 'instanceof' is not a function (typeof was {}) in {} at {}:{}",
                        other.type_of(),
                        proc.name,
                        proc.path,
                        line
                    )))
                }
            };
            stack.push(Value::Bool(has_instance(engine, func, &a)));
        }

        // ── Coercions ───────────────────────────────────────────────────────
        Instr::ToBoolean => {
            let a = pop(stack);
            stack.push(Value::Bool(coerce::to_boolean(&a)));
        }
        Instr::ToNumber => {
            let a = pop(stack);
            stack.push(Value::Number(coerce::to_number(engine, &a)?));
        }
        Instr::ToString => {
            let a = pop(stack);
            stack.push(Value::Str(coerce::to_string(engine, &a)?));
        }
        Instr::ToInt32 => {
            let a = pop(stack);
            stack.push(Value::Int(coerce::to_int32(engine, &a)? as i64));
        }
        Instr::ToUint32 => {
            let a = pop(stack);
            stack.push(Value::Int(coerce::to_uint32(engine, &a)? as i64));
        }
        Instr::ToInt8 => {
            let a = pop(stack);
            stack.push(Value::Int(coerce::to_int8(engine, &a)? as i64));
        }
        Instr::ToUint8 => {
            let a = pop(stack);
            stack.push(Value::Int(coerce::to_uint8(engine, &a)? as i64));
        }
        Instr::ToInt16 => {
            let a = pop(stack);
            stack.push(Value::Int(coerce::to_int16(engine, &a)? as i64));
        }
        Instr::ToUint16 => {
            let a = pop(stack);
            stack.push(Value::Int(coerce::to_uint16(engine, &a)? as i64));
        }
        Instr::ToInteger => {
            let a = pop(stack);
            stack.push(Value::Int(coerce::to_integer(engine, &a)? as i64));
        }
        Instr::ToChar => {
            let a = pop(stack);
            let s = coerce::to_string(engine, &a)?;
            if s.chars().count() != 1 {
                return Err(ScriptError::type_error(
                    "Cannot convert string to a single character",
                ));
            }
            stack.push(Value::Str(s));
        }

        // ── Control flow ────────────────────────────────────────────────────
        Instr::Jump(target) => *ip = target as usize,
        Instr::JumpIfFalse(target) => {
            let a = pop(stack);
            if !coerce::to_boolean(&a) {
                *ip = target as usize;
            }
        }
        Instr::JumpIfTrue(target) => {
            let a = pop(stack);
            if coerce::to_boolean(&a) {
                *ip = target as usize;
            }
        }
        Instr::TryPush { catch } => handlers.push(Handler {
            catch,
            stack_depth: stack.len(),
            with_depth: withs.len(),
            iter_depth: iters.len(),
        }),
        Instr::TryPop => {
            handlers.pop();
        }
        Instr::Throw | Instr::Rethrow => {
            let value = pop(stack);
            return Err(ScriptError::thrown(value));
        }
        Instr::ThrowTypeError(msg) => {
            return Err(ScriptError::type_error(proc.strings[msg as usize].clone()));
        }
        Instr::Return => {
            let value = pop(stack);
            return Ok(Flow::Return(value));
        }

        // ── Calls ───────────────────────────────────────────────────────────
        Instr::CallNative { method, argc } => {
            let call_args = pop_args(stack, argc as usize);
            let this_value = pop(stack);
            // Arguments were coerced by the emitted trampoline.
            let native = crate::native::method(method);
            let result = (native.func)(engine, &this_value, &call_args)?;
            stack.push(result);
        }
        Instr::CallGroup { group, argc } => {
            let call_args = pop_args(stack, argc as usize);
            let this_value = pop(stack);
            let (name, candidates) = &proc.groups[group as usize];
            let result =
                binder::dispatch_group(engine, name, candidates, this_value, &call_args)?;
            stack.push(result);
        }
        Instr::CallFunction { argc } => {
            let call_args = pop_args(stack, argc as usize);
            let this_value = pop(stack);
            let callee = pop(stack);
            let result = match &callee {
                Value::Function(f) => engine.call_function(f, this_value, &call_args)?,
                other => {
                    return Err(ScriptError::type_error(format!(
                        "{} is not a function",
                        coerce::describe_thrown(other)
                    )))
                }
            };
            stack.push(result);
        }
        Instr::CallProp { name, argc } => {
            let call_args = pop_args(stack, argc as usize);
            let object = pop(stack);
            let name = &proc.strings[name as usize];
            let callee = prototype::get_property_value(engine, &object, name)?;
            let result = match &callee {
                Value::Function(f) => engine.call_function(f, object, &call_args)?,
                _ => {
                    return Err(ScriptError::type_error(format!(
                        "'{}' is not a function",
                        name
                    )))
                }
            };
            stack.push(result);
        }
        Instr::Construct { argc } => {
            let call_args = pop_args(stack, argc as usize);
            let callee = pop(stack);
            let result = construct(engine, &callee, call_args)?;
            stack.push(result);
        }
        Instr::MakeFunction { method } => {
            let value = make_function(engine, method, records.clone());
            stack.push(value);
        }
        Instr::MakeArguments => {
            let arr = ScriptObject::new_array(engine.array_proto(), args.clone());
            stack.push(Value::Object(arr));
        }

        // ── Objects & properties ────────────────────────────────────────────
        Instr::NewObject => {
            stack.push(Value::Object(ScriptObject::new(engine.object_proto())));
        }
        Instr::NewArray(len) => {
            let elements = vec![Value::Null; len as usize];
            stack.push(Value::Object(ScriptObject::new_array(
                engine.array_proto(),
                elements,
            )));
        }
        Instr::GetProp(name) => {
            let object = pop(stack);
            let name = &proc.strings[name as usize];
            stack.push(prototype::get_property_value(engine, &object, name)?);
        }
        Instr::SetProp(name) | Instr::SetPropPush(name) => {
            let value = pop(stack);
            let object = pop(stack);
            let keep = matches!(instr, Instr::SetPropPush(_));
            let name = &proc.strings[name as usize];
            prototype::set_property_value(engine, &object, name, value.clone())?;
            if keep {
                stack.push(value);
            }
        }
        Instr::GetIndex => {
            let key = pop(stack);
            let object = pop(stack);
            stack.push(get_index(engine, &object, &key)?);
        }
        Instr::SetIndex | Instr::SetIndexPush => {
            let value = pop(stack);
            let key = pop(stack);
            let object = pop(stack);
            let keep = matches!(instr, Instr::SetIndexPush);
            set_index(engine, &object, &key, value.clone())?;
            if keep {
                stack.push(value);
            }
        }
        Instr::DefineData(name) => {
            let value = pop(stack);
            let object = stack.last().expect("object literal missing").clone();
            if let Value::Object(obj) = object {
                obj.set_named(&proc.strings[name as usize], value);
            }
        }
        Instr::DefineAccessor { name, getter } => {
            let func = pop(stack);
            let object = stack.last().expect("object literal missing").clone();
            if let (Value::Object(obj), Value::Function(f)) = (object, func) {
                let name = &proc.strings[name as usize];
                let mut data = obj.data.write();
                let attrs = crate::property::PropertyAttributes {
                    is_accessor: true,
                    ..Default::default()
                };
                let slot = data.named.get(name).cloned();
                let (mut get, mut set) = match slot {
                    Some(OwnSlot::Accessor { get, set, .. }) => (get, set),
                    _ => (None, None),
                };
                if getter {
                    get = Some(f);
                } else {
                    set = Some(f);
                }
                data.named
                    .insert(name.clone(), OwnSlot::Accessor { get, set, attrs });
            }
        }
        Instr::StoreElem(index) => {
            let value = pop(stack);
            let array = stack.last().expect("array literal missing").clone();
            if let Value::Object(obj) = array {
                let mut data = obj.data.write();
                let idx = index as usize;
                if data.elements.len() <= idx {
                    data.elements.resize(idx + 1, Value::Undefined);
                }
                data.elements[idx] = value;
            }
        }
        Instr::LoadRegex(slot) => {
            let entry = &proc.regexes[slot as usize];
            let value = entry
                .cell
                .get_or_try_init(|| engine.create_regex(&entry.pattern, &entry.flags))?
                .clone();
            stack.push(value);
        }
        Instr::DeleteProp(name) => {
            let object = pop(stack);
            let name = &proc.strings[name as usize];
            let deleted = match &object {
                Value::Object(obj) => {
                    let mut data = obj.data.write();
                    match data.named.get(name) {
                        Some(slot) if !slot.attrs().configurable => false,
                        _ => {
                            data.named.shift_remove(name);
                            true
                        }
                    }
                }
                _ => true,
            };
            stack.push(Value::Bool(deleted));
        }
        Instr::DeleteIndex => {
            let key = pop(stack);
            let object = pop(stack);
            let deleted = match &object {
                Value::Object(obj) => {
                    let key = coerce::to_string(engine, &key)?;
                    let mut data = obj.data.write();
                    if data.is_array {
                        if let Ok(idx) = key.parse::<usize>() {
                            if idx < data.elements.len() {
                                data.elements[idx] = Value::Undefined;
                            }
                            true
                        } else {
                            data.named.shift_remove(key.as_ref());
                            true
                        }
                    } else {
                        data.named.shift_remove(key.as_ref());
                        true
                    }
                }
                _ => true,
            };
            stack.push(Value::Bool(deleted));
        }

        // ── Enumeration ─────────────────────────────────────────────────────
        Instr::ForInInit => {
            let object = pop(stack);
            let keys = if object.is_nullish() {
                Vec::new()
            } else {
                prototype::enumerate_keys(engine, &object)
            };
            iters.push(keys.into_iter());
        }
        Instr::ForInNext(target) => {
            let iter = iters.last_mut().expect("enumeration cursor missing");
            match iter.next() {
                Some(key) => stack.push(Value::str(key)),
                None => *ip = target as usize,
            }
        }
        Instr::ForInEnd => {
            iters.pop();
        }

        Instr::Nop => {}
    }
    Ok(Flow::Next)
}

/// `instanceof` support: user functions match objects whose dynamic chain
/// passes through their `prototype` object; native constructors match their
/// reflected static prototype chain.
pub fn has_instance(engine: &Engine, func: &crate::value::FunctionRef, value: &Value) -> bool {
    let _ = engine;
    if let Some(proto_id) = func.native_instance_proto {
        let mut current = value.as_object().map(|o| o.proto);
        while let Some(id) = current {
            if id == proto_id {
                return true;
            }
            current = PROTOTYPES.get(id).base;
        }
        return false;
    }
    let Some(expected) = func.get_prop("prototype").and_then(|p| match p {
        Value::Object(o) => Some(o),
        _ => None,
    }) else {
        return false;
    };
    let mut link = value
        .as_object()
        .and_then(|o| o.data.read().proto_obj.clone());
    while let Some(obj) = link {
        if crate::value::same_object(&obj, &expected) {
            return true;
        }
        link = obj.data.read().proto_obj.clone();
    }
    false
}

fn make_function(engine: &Engine, method: MethodId, captured: Option<RecordRef>) -> Value {
    let proc = engine.procedure(method);
    let func = FunctionInstance::script(proc.name.clone(), method, captured);
    // The default prototype object carries a constructor back-reference.
    let proto_obj = ScriptObject::new(engine.object_proto());
    proto_obj.set_named("constructor", Value::Function(func.clone()));
    func.set_prop("prototype", Value::Object(proto_obj));
    func.set_prop("length", Value::Int(proc.param_count as i64));
    Value::Function(func)
}

/// `new` semantics for every callable shape.
pub fn construct(engine: &Engine, callee: &Value, args: Vec<Value>) -> Result<Value, ScriptError> {
    let func = match callee {
        Value::Function(f) => f,
        other => {
            return Err(ScriptError::type_error(format!(
                "{} is not a constructor",
                coerce::describe_thrown(other)
            )))
        }
    };
    match &func.kind {
        FunctionKind::Script { method, captured } => {
            let instance = ScriptObject::new(engine.object_proto());
            if let Some(Value::Object(proto_obj)) = func.get_prop("prototype") {
                instance.data.write().proto_obj = Some(proto_obj);
            }
            let result = call_method(
                engine,
                *method,
                Value::Object(instance.clone()),
                args,
                captured.clone(),
            )?;
            Ok(match result {
                Value::Object(_) => result,
                _ => Value::Object(instance),
            })
        }
        FunctionKind::Native { method } => binder::call_native(engine, *method, Value::Undefined, &args),
        FunctionKind::Group { methods } => {
            binder::dispatch_group(engine, &func.name, methods, Value::Undefined, &args)
        }
    }
}

fn get_index(engine: &Engine, object: &Value, key: &Value) -> Result<Value, ScriptError> {
    if let Value::Object(obj) = object {
        let data = obj.data.read();
        if data.is_array {
            if let Some(idx) = numeric_index(key) {
                return Ok(data.elements.get(idx).cloned().unwrap_or(Value::Undefined));
            }
        }
    }
    if object.is_string_like() {
        if let Some(idx) = numeric_index(key) {
            let s = object.as_string().unwrap();
            return Ok(match s.chars().nth(idx) {
                Some(c) => Value::str(c.to_string()),
                None => Value::Undefined,
            });
        }
    }
    let name = coerce::to_string(engine, key)?;
    prototype::get_property_value(engine, object, &name)
}

fn set_index(
    engine: &Engine,
    object: &Value,
    key: &Value,
    value: Value,
) -> Result<(), ScriptError> {
    if let Value::Object(obj) = object {
        let mut data = obj.data.write();
        if data.is_array {
            if let Some(idx) = numeric_index(key) {
                if data.elements.len() <= idx {
                    data.elements.resize(idx + 1, Value::Undefined);
                }
                data.elements[idx] = value;
                return Ok(());
            }
        }
    }
    let name = coerce::to_string(engine, key)?;
    prototype::set_property_value(engine, object, &name, value)
}

fn numeric_index(key: &Value) -> Option<usize> {
    match key {
        Value::Int(i) if *i >= 0 => Some(*i as usize),
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
        Value::Str(s) => s.parse::<usize>().ok(),
        _ => None,
    }
}

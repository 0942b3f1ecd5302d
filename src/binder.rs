/// Binder — given candidate native methods and N actual arguments, pick the
/// overload and coerce each argument to its formal type.
///
/// Selection is arity-first: candidates whose (required, optional, variadic)
/// shape cannot accept N arguments drop out. A single survivor is bound
/// directly (the emitter inlines its coercions); two or more defer to the
/// runtime scorer below, which ranks candidates by argument convertibility.
///
/// Documented tie-break: a fractional number never truncates into an integer
/// formal while another convertible candidate exists, so `log(1.5)` against
/// `log(int)`/`log(string)` picks the string overload; `log(1)` picks int.
use crate::coerce;
use crate::engine::Engine;
use crate::errors::ScriptError;
use crate::native::{self, NativeMethod, NativeMethodId, ParamKind};
use crate::value::Value;

/// Emit-time binding decision for a call site with a known argument count.
#[derive(Debug, Clone)]
pub enum StaticBinding {
    /// No overload accepts this many arguments; the call site raises
    /// a TypeError when reached.
    NoOverload,
    /// Exactly one candidate: the call inlines.
    Single(NativeMethodId),
    /// Several candidates: the call dispatches through the runtime scorer.
    Ambiguous(Vec<NativeMethodId>),
}

fn arity_compatible(method: &NativeMethod, argc: usize) -> bool {
    argc >= method.required && (argc <= method.params.len() || method.variadic)
}

pub fn arity_filter(candidates: &[NativeMethodId], argc: usize) -> Vec<NativeMethodId> {
    candidates
        .iter()
        .copied()
        .filter(|id| arity_compatible(&native::method(*id), argc))
        .collect()
}

pub fn bind_static(candidates: &[NativeMethodId], argc: usize) -> StaticBinding {
    let filtered = arity_filter(candidates, argc);
    match filtered.len() {
        0 => StaticBinding::NoOverload,
        1 => StaticBinding::Single(filtered[0]),
        _ => StaticBinding::Ambiguous(filtered),
    }
}

pub fn no_overload_error(name: &str, argc: usize) -> ScriptError {
    ScriptError::type_error(format!(
        "No overload for method {} takes {} arguments",
        name, argc
    ))
}

// ---------------------------------------------------------------------------
// Runtime scoring
// ---------------------------------------------------------------------------

fn is_integral_number(v: &Value) -> bool {
    match v {
        Value::Int(_) => true,
        Value::Number(n) => n.fract() == 0.0 && n.is_finite(),
        _ => false,
    }
}

/// Per-argument conversion penalty; lower is better.
fn argument_penalty(kind: ParamKind, value: &Value) -> u32 {
    match kind {
        ParamKind::Bool => match value {
            Value::Bool(_) => 0,
            _ => 5,
        },
        ParamKind::I8
        | ParamKind::U8
        | ParamKind::I16
        | ParamKind::U16
        | ParamKind::I32
        | ParamKind::U32
        | ParamKind::I64
        | ParamKind::U64 => match value {
            Value::Int(_) => 0,
            Value::Number(_) if is_integral_number(value) => 1,
            Value::Bool(_) => 3,
            Value::Str(_) | Value::Rope(_) => 5,
            // Truncation is the worst admissible conversion.
            Value::Number(_) => 8,
            _ => 6,
        },
        ParamKind::F64 => match value {
            Value::Int(_) | Value::Number(_) => 0,
            Value::Bool(_) => 3,
            Value::Str(_) | Value::Rope(_) => 5,
            _ => 6,
        },
        ParamKind::Str | ParamKind::Char => match value {
            Value::Str(_) | Value::Rope(_) => 0,
            _ => 4,
        },
        ParamKind::Any => 2,
    }
}

/// Total convertibility score of a call against one overload.
pub fn score(method: &NativeMethod, args: &[Value]) -> u32 {
    let mut total = 0;
    for (i, arg) in args.iter().enumerate() {
        let kind = method.params.get(i).copied().unwrap_or(ParamKind::Any);
        total += argument_penalty(kind, arg);
    }
    total
}

/// Resolve an overload group against concrete arguments. Ordered bag: the
/// earliest candidate wins ties.
pub fn resolve_overload(
    name: &str,
    candidates: &[NativeMethodId],
    args: &[Value],
) -> Result<NativeMethodId, ScriptError> {
    let filtered = arity_filter(candidates, args.len());
    if filtered.is_empty() {
        return Err(no_overload_error(name, args.len()));
    }
    let mut best = filtered[0];
    let mut best_score = score(&native::method(best), args);
    for id in &filtered[1..] {
        let s = score(&native::method(*id), args);
        if s < best_score {
            best = *id;
            best_score = s;
        }
    }
    Ok(best)
}

// ---------------------------------------------------------------------------
// Argument coercion
// ---------------------------------------------------------------------------

/// Coerce one actual to its formal type. Missing actuals arrive as
/// `Value::Undefined` and go through the same conversion.
pub fn coerce_argument(
    engine: &Engine,
    kind: ParamKind,
    value: &Value,
) -> Result<Value, ScriptError> {
    match kind {
        ParamKind::Bool => Ok(Value::Bool(coerce::to_boolean(value))),
        ParamKind::I8 => Ok(Value::Int(coerce::to_int8(engine, value)? as i64)),
        ParamKind::U8 => Ok(Value::Int(coerce::to_uint8(engine, value)? as i64)),
        ParamKind::I16 => Ok(Value::Int(coerce::to_int16(engine, value)? as i64)),
        ParamKind::U16 => Ok(Value::Int(coerce::to_uint16(engine, value)? as i64)),
        ParamKind::I32 => Ok(Value::Int(coerce::to_int32(engine, value)? as i64)),
        ParamKind::U32 => Ok(Value::Int(coerce::to_uint32(engine, value)? as i64)),
        ParamKind::I64 | ParamKind::U64 => Ok(Value::Int(coerce::to_integer(engine, value)? as i64)),
        ParamKind::F64 => Ok(Value::Number(coerce::to_number(engine, value)?)),
        ParamKind::Str => Ok(Value::Str(coerce::to_string(engine, value)?)),
        ParamKind::Char => {
            let s = coerce::to_string(engine, value)?;
            if s.chars().count() != 1 {
                return Err(ScriptError::type_error(
                    "Cannot convert string to a single character",
                ));
            }
            Ok(Value::Str(s))
        }
        ParamKind::Any => Ok(value.clone()),
    }
}

fn coerce_arguments(
    engine: &Engine,
    method: &NativeMethod,
    args: &[Value],
) -> Result<Vec<Value>, ScriptError> {
    let formal_count = method.params.len();
    let total = if method.variadic {
        formal_count.max(args.len())
    } else {
        formal_count
    };
    let mut out = Vec::with_capacity(total);
    for i in 0..total {
        let kind = method.params.get(i).copied().unwrap_or(ParamKind::Any);
        let actual = args.get(i).unwrap_or(&Value::Undefined);
        out.push(coerce_argument(engine, kind, actual)?);
    }
    Ok(out)
}

/// The inlined-call path: coerce each actual to its formal and invoke.
pub fn call_native(
    engine: &Engine,
    id: NativeMethodId,
    this: Value,
    args: &[Value],
) -> Result<Value, ScriptError> {
    let method = native::method(id);
    let coerced = coerce_arguments(engine, &method, args)?;
    (method.func)(engine, &this, &coerced)
}

/// The runtime-dispatch path for ambiguous groups.
pub fn dispatch_group(
    engine: &Engine,
    name: &str,
    candidates: &[NativeMethodId],
    this: Value,
    args: &[Value],
) -> Result<Value, ScriptError> {
    let chosen = resolve_overload(name, candidates, args)?;
    call_native(engine, chosen, this, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{register_method, NativeMethod};
    use crate::types::StaticType;

    fn noop(_: &Engine, _: &Value, _: &[Value]) -> Result<Value, ScriptError> {
        Ok(Value::Undefined)
    }

    fn register(params: &[ParamKind], required: usize, variadic: bool) -> NativeMethodId {
        register_method(NativeMethod {
            name: "probe".to_string(),
            params: params.to_vec(),
            required,
            variadic,
            returns: StaticType::Any,
            func: noop,
        })
    }

    #[test]
    fn arity_filter_drops_incompatible() {
        let one = register(&[ParamKind::Any], 1, false);
        let two = register(&[ParamKind::Any, ParamKind::Any], 2, false);
        let var = register(&[ParamKind::Any], 0, true);
        let filtered = arity_filter(&[one, two, var], 1);
        assert_eq!(filtered, vec![one, var]);
        assert!(matches!(
            bind_static(&[two], 1),
            StaticBinding::NoOverload
        ));
    }

    #[test]
    fn integral_number_prefers_int_overload() {
        let int_m = register(&[ParamKind::I32], 1, false);
        let str_m = register(&[ParamKind::Str], 1, false);
        let chosen = resolve_overload("log", &[str_m, int_m], &[Value::Int(1)]).unwrap();
        assert_eq!(chosen, int_m);
    }

    #[test]
    fn fractional_number_prefers_string_overload() {
        let int_m = register(&[ParamKind::I32], 1, false);
        let str_m = register(&[ParamKind::Str], 1, false);
        let chosen = resolve_overload("log", &[int_m, str_m], &[Value::Number(1.5)]).unwrap();
        assert_eq!(chosen, str_m);
    }

    #[test]
    fn string_argument_prefers_string_overload() {
        let int_m = register(&[ParamKind::I32], 1, false);
        let str_m = register(&[ParamKind::Str], 1, false);
        let chosen = resolve_overload("log", &[int_m, str_m], &[Value::str("x")]).unwrap();
        assert_eq!(chosen, str_m);
    }

    #[test]
    fn no_overload_message_shape() {
        let err = no_overload_error("log", 3);
        assert_eq!(
            err.describe(),
            "TypeError: No overload for method log takes 3 arguments"
        );
    }
}

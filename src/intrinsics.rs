/// Built-in library — just enough Object / Function / Array / String /
/// Number / Boolean / Math / JSON / RegExp / Error to exercise the core.
///
/// Everything here reaches scripts through the same reflection path an
/// embedder would use: native classes register methods with declared
/// signatures, prototypes derive from them once per process, and the global
/// prototype of every engine is seeded with the same constants.
use crate::coerce;
use crate::engine::Engine;
use crate::errors::{ErrorKind, ScriptError};
use crate::native::{NativeClassBuilder, ParamKind, ParamKind as P};
use crate::prototype::{PrototypeId, PROTOTYPES};
use crate::property::PropertyVariable;
use crate::types::StaticType;
use crate::value::{
    number_to_string, OwnSlot, Payload, RegexValue, ScriptObject, Value,
};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Intrinsics {
    pub object_proto: PrototypeId,
    pub function_proto: PrototypeId,
    pub array_proto: PrototypeId,
    pub string_proto: PrototypeId,
    pub number_proto: PrototypeId,
    pub boolean_proto: PrototypeId,
    pub regexp_proto: PrototypeId,
    pub math_proto: PrototypeId,
    pub json_proto: PrototypeId,
    pub error_protos: HashMap<ErrorKind, PrototypeId>,
    /// Seeded onto every engine's global prototype.
    global_props: Vec<PropertyVariable>,
}

static INTRINSICS: Lazy<Intrinsics> = Lazy::new(build);

pub fn intrinsics() -> &'static Intrinsics {
    &INTRINSICS
}

pub fn install_globals(global: PrototypeId) {
    let proto = PROTOTYPES.get(global);
    for prop in &INTRINSICS.global_props {
        // The first engine's interpretation binds later ones; a failure here
        // would mean the global prototype was baked prematurely.
        let _ = proto.add_property(prop.clone());
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

fn num_arg(args: &[Value], i: usize) -> f64 {
    args.get(i).and_then(|v| v.as_number()).unwrap_or(f64::NAN)
}

fn error_kind_name(kind: ErrorKind) -> &'static str {
    kind.name()
}

// ---------------------------------------------------------------------------
// Object
// ---------------------------------------------------------------------------

fn object_to_string(_: &Engine, this: &Value, _: &[Value]) -> Result<Value, ScriptError> {
    let tag = match this {
        Value::Object(o) => o.debug_tag(),
        Value::Function(_) => "Function",
        Value::Undefined => "Undefined",
        Value::Null => "Null",
        _ => "Object",
    };
    Ok(Value::str(format!("[object {}]", tag)))
}

fn object_value_of(_: &Engine, this: &Value, _: &[Value]) -> Result<Value, ScriptError> {
    Ok(this.clone())
}

fn object_has_own_property(
    _: &Engine,
    this: &Value,
    args: &[Value],
) -> Result<Value, ScriptError> {
    let name = arg(args, 0).as_string().unwrap_or_else(|| Arc::from(""));
    let result = match this {
        Value::Object(obj) => {
            let data = obj.data.read();
            if data.is_array {
                if name.as_ref() == "length" {
                    true
                } else if let Ok(idx) = name.parse::<usize>() {
                    idx < data.elements.len()
                } else {
                    data.named.contains_key(name.as_ref())
                }
            } else {
                data.named.contains_key(name.as_ref())
            }
        }
        Value::Function(f) => f.get_prop(&name).is_some(),
        _ => false,
    };
    Ok(Value::Bool(result))
}

fn object_keys(engine: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let target = arg(args, 0);
    let mut keys = Vec::new();
    if let Value::Object(obj) = &target {
        let data = obj.data.read();
        if data.is_array {
            for i in 0..data.elements.len() {
                keys.push(Value::str(i.to_string()));
            }
        }
        for (name, slot) in data.named.iter() {
            if slot.attrs().enumerable {
                keys.push(Value::str(name));
            }
        }
    }
    Ok(Value::Object(ScriptObject::new_array(
        engine.array_proto(),
        keys,
    )))
}

fn object_get_own_property_names(
    engine: &Engine,
    _: &Value,
    args: &[Value],
) -> Result<Value, ScriptError> {
    let target = arg(args, 0);
    let keys: Vec<Value> = crate::prototype::own_keys(engine, &target)
        .into_iter()
        .map(Value::str)
        .collect();
    Ok(Value::Object(ScriptObject::new_array(
        engine.array_proto(),
        keys,
    )))
}

fn object_construct(engine: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    match args.first() {
        Some(Value::Object(o)) => Ok(Value::Object(o.clone())),
        _ => Ok(Value::Object(ScriptObject::new(engine.object_proto()))),
    }
}

// ---------------------------------------------------------------------------
// Function
// ---------------------------------------------------------------------------

fn function_call(engine: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let func = this
        .as_function()
        .ok_or_else(|| ScriptError::type_error("Function.prototype.call requires a function"))?;
    let this_arg = arg(args, 0);
    let rest = if args.len() > 1 { &args[1..] } else { &[] };
    engine.call_function(func, this_arg, rest)
}

fn function_apply(engine: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let func = this
        .as_function()
        .ok_or_else(|| ScriptError::type_error("Function.prototype.apply requires a function"))?;
    let this_arg = arg(args, 0);
    let call_args = match arg(args, 1) {
        Value::Object(obj) => obj.data.read().elements.clone(),
        Value::Undefined | Value::Null => Vec::new(),
        _ => {
            return Err(ScriptError::type_error(
                "Function.prototype.apply expects an array of arguments",
            ))
        }
    };
    engine.call_function(func, this_arg, &call_args)
}

fn function_to_string(_: &Engine, this: &Value, _: &[Value]) -> Result<Value, ScriptError> {
    let name = this.as_function().map(|f| f.name.clone()).unwrap_or_default();
    Ok(Value::str(format!(
        "function {}() {{ [native code] }}",
        name
    )))
}

// ---------------------------------------------------------------------------
// Array
// ---------------------------------------------------------------------------

fn this_array(this: &Value) -> Result<crate::value::ObjectRef, ScriptError> {
    match this {
        Value::Object(obj) if obj.data.read().is_array => Ok(obj.clone()),
        _ => Err(ScriptError::type_error("Receiver is not an array")),
    }
}

fn array_construct(engine: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let elements = match args {
        [Value::Int(n)] if *n >= 0 => vec![Value::Undefined; *n as usize],
        [Value::Number(n)] if *n >= 0.0 && n.fract() == 0.0 => {
            vec![Value::Undefined; *n as usize]
        }
        _ => args.to_vec(),
    };
    Ok(Value::Object(ScriptObject::new_array(
        engine.array_proto(),
        elements,
    )))
}

fn array_is_array(_: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let result = matches!(&arg(args, 0), Value::Object(o) if o.data.read().is_array);
    Ok(Value::Bool(result))
}

fn array_push(_: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let arr = this_array(this)?;
    let mut data = arr.data.write();
    data.elements.extend(args.iter().cloned());
    Ok(Value::Int(data.elements.len() as i64))
}

fn array_pop(_: &Engine, this: &Value, _: &[Value]) -> Result<Value, ScriptError> {
    let arr = this_array(this)?;
    let mut data = arr.data.write();
    Ok(data.elements.pop().unwrap_or(Value::Undefined))
}

fn array_join(engine: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let arr = this_array(this)?;
    let sep = match arg(args, 0) {
        Value::Undefined => Arc::from(","),
        other => coerce::to_string(engine, &other)?,
    };
    let elements = arr.data.read().elements.clone();
    let mut out = String::new();
    for (i, e) in elements.iter().enumerate() {
        if i > 0 {
            out.push_str(&sep);
        }
        if !e.is_nullish() {
            out.push_str(&coerce::to_string(engine, e)?);
        }
    }
    Ok(Value::str(out))
}

fn array_index_of(_: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let arr = this_array(this)?;
    let needle = arg(args, 0);
    let elements = arr.data.read().elements.clone();
    for (i, e) in elements.iter().enumerate() {
        if coerce::strict_equals(e, &needle) {
            return Ok(Value::Int(i as i64));
        }
    }
    Ok(Value::Int(-1))
}

fn array_map(engine: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let arr = this_array(this)?;
    let func = match arg(args, 0) {
        Value::Function(f) => f,
        _ => return Err(ScriptError::type_error("Array.prototype.map expects a function")),
    };
    let elements = arr.data.read().elements.clone();
    let mut mapped = Vec::with_capacity(elements.len());
    for (i, e) in elements.iter().enumerate() {
        mapped.push(engine.call_function(
            &func,
            this.clone(),
            &[e.clone(), Value::Int(i as i64), this.clone()],
        )?);
    }
    Ok(Value::Object(ScriptObject::new_array(
        engine.array_proto(),
        mapped,
    )))
}

fn array_for_each(engine: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let arr = this_array(this)?;
    let func = match arg(args, 0) {
        Value::Function(f) => f,
        _ => {
            return Err(ScriptError::type_error(
                "Array.prototype.forEach expects a function",
            ))
        }
    };
    let elements = arr.data.read().elements.clone();
    for (i, e) in elements.iter().enumerate() {
        engine.call_function(
            &func,
            this.clone(),
            &[e.clone(), Value::Int(i as i64), this.clone()],
        )?;
    }
    Ok(Value::Undefined)
}

fn array_slice(engine: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let arr = this_array(this)?;
    let elements = arr.data.read().elements.clone();
    let len = elements.len() as i64;
    let clamp = |v: f64, default: i64| -> i64 {
        if v.is_nan() {
            return default;
        }
        let v = v as i64;
        if v < 0 {
            (len + v).max(0)
        } else {
            v.min(len)
        }
    };
    let begin = match arg(args, 0) {
        Value::Undefined => 0,
        other => clamp(coerce::to_number(engine, &other)?, 0),
    };
    let end = match arg(args, 1) {
        Value::Undefined => len,
        other => clamp(coerce::to_number(engine, &other)?, len),
    };
    let slice = if begin < end {
        elements[begin as usize..end as usize].to_vec()
    } else {
        Vec::new()
    };
    Ok(Value::Object(ScriptObject::new_array(
        engine.array_proto(),
        slice,
    )))
}

fn array_to_string(engine: &Engine, this: &Value, _: &[Value]) -> Result<Value, ScriptError> {
    array_join(engine, this, &[])
}

// ---------------------------------------------------------------------------
// String
// ---------------------------------------------------------------------------

fn this_str(engine: &Engine, this: &Value) -> Result<Arc<str>, ScriptError> {
    coerce::to_string(engine, this)
}

fn string_get_length(engine: &Engine, this: &Value, _: &[Value]) -> Result<Value, ScriptError> {
    Ok(Value::Int(this_str(engine, this)?.chars().count() as i64))
}

fn string_char_at(engine: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let s = this_str(engine, this)?;
    let idx = num_arg(args, 0);
    if idx < 0.0 {
        return Ok(Value::str(""));
    }
    Ok(match s.chars().nth(idx as usize) {
        Some(c) => Value::str(c.to_string()),
        None => Value::str(""),
    })
}

fn string_char_code_at(engine: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let s = this_str(engine, this)?;
    let idx = num_arg(args, 0);
    if idx < 0.0 {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(match s.chars().nth(idx as usize) {
        Some(c) => Value::Number(c as u32 as f64),
        None => Value::Number(f64::NAN),
    })
}

fn string_index_of(engine: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let s = this_str(engine, this)?;
    let needle = coerce::to_string(engine, &arg(args, 0))?;
    Ok(match s.find(needle.as_ref()) {
        Some(byte_idx) => Value::Int(s[..byte_idx].chars().count() as i64),
        None => Value::Int(-1),
    })
}

fn string_substring(engine: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let s = this_str(engine, this)?;
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as f64;
    let clamp = |v: f64| -> usize {
        if v.is_nan() || v < 0.0 {
            0
        } else {
            v.min(len) as usize
        }
    };
    let mut begin = clamp(num_arg(args, 0));
    let mut end = match arg(args, 1) {
        Value::Undefined => chars.len(),
        other => clamp(coerce::to_number(engine, &other)?),
    };
    if begin > end {
        std::mem::swap(&mut begin, &mut end);
    }
    Ok(Value::str(chars[begin..end].iter().collect::<String>()))
}

fn string_split(engine: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let s = this_str(engine, this)?;
    let parts: Vec<Value> = match arg(args, 0) {
        Value::Undefined => vec![Value::Str(s)],
        sep => {
            let sep = coerce::to_string(engine, &sep)?;
            if sep.is_empty() {
                s.chars().map(|c| Value::str(c.to_string())).collect()
            } else {
                s.split(sep.as_ref()).map(Value::str).collect()
            }
        }
    };
    Ok(Value::Object(ScriptObject::new_array(
        engine.array_proto(),
        parts,
    )))
}

fn string_to_upper_case(engine: &Engine, this: &Value, _: &[Value]) -> Result<Value, ScriptError> {
    Ok(Value::str(this_str(engine, this)?.to_uppercase()))
}

fn string_to_lower_case(engine: &Engine, this: &Value, _: &[Value]) -> Result<Value, ScriptError> {
    Ok(Value::str(this_str(engine, this)?.to_lowercase()))
}

fn string_trim(engine: &Engine, this: &Value, _: &[Value]) -> Result<Value, ScriptError> {
    Ok(Value::str(this_str(engine, this)?.trim()))
}

fn string_concat(engine: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let mut out = this_str(engine, this)?.to_string();
    for a in args {
        out.push_str(&coerce::to_string(engine, a)?);
    }
    Ok(Value::str(out))
}

fn string_replace(engine: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let s = this_str(engine, this)?;
    let replacement = coerce::to_string(engine, &arg(args, 1))?;
    match arg(args, 0) {
        Value::Object(obj) => {
            let payload = {
                let data = obj.data.read();
                match &data.payload {
                    Payload::Regex(re) => Some(re.clone()),
                    _ => None,
                }
            };
            match payload {
                Some(re) => Ok(Value::str(
                    re.regex.replace(s.as_ref(), replacement.as_ref()).to_string(),
                )),
                None => Ok(Value::Str(s)),
            }
        }
        pattern => {
            let pattern = coerce::to_string(engine, &pattern)?;
            Ok(Value::str(s.replacen(pattern.as_ref(), &replacement, 1)))
        }
    }
}

fn string_value_of(engine: &Engine, this: &Value, _: &[Value]) -> Result<Value, ScriptError> {
    Ok(Value::Str(this_str(engine, this)?))
}

fn string_construct(engine: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    match args.first() {
        Some(v) => Ok(Value::Str(coerce::to_string(engine, v)?)),
        None => Ok(Value::str("")),
    }
}

// ---------------------------------------------------------------------------
// Number / Boolean
// ---------------------------------------------------------------------------

fn number_to_string_method(
    engine: &Engine,
    this: &Value,
    args: &[Value],
) -> Result<Value, ScriptError> {
    let n = coerce::to_number(engine, this)?;
    let radix = match arg(args, 0) {
        Value::Undefined => 10,
        other => coerce::to_int32(engine, &other)?,
    };
    if radix == 10 {
        return Ok(Value::str(number_to_string(n)));
    }
    if !(2..=36).contains(&radix) {
        return Err(ScriptError::range_error(
            "toString() radix must be between 2 and 36",
        ));
    }
    if !n.is_finite() || n.fract() != 0.0 {
        return Ok(Value::str(number_to_string(n)));
    }
    let mut v = n.abs() as u64;
    let digits = "0123456789abcdefghijklmnopqrstuvwxyz".as_bytes();
    let mut out = Vec::new();
    loop {
        out.push(digits[(v % radix as u64) as usize]);
        v /= radix as u64;
        if v == 0 {
            break;
        }
    }
    if n < 0.0 {
        out.push(b'-');
    }
    out.reverse();
    Ok(Value::str(String::from_utf8(out).unwrap_or_default()))
}

fn number_value_of(engine: &Engine, this: &Value, _: &[Value]) -> Result<Value, ScriptError> {
    Ok(Value::Number(coerce::to_number(engine, this)?))
}

fn number_to_fixed(engine: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let n = coerce::to_number(engine, this)?;
    let digits = match arg(args, 0) {
        Value::Undefined => 0,
        other => coerce::to_int32(engine, &other)?,
    };
    if !(0..=100).contains(&digits) {
        return Err(ScriptError::range_error(
            "toFixed() digits argument must be between 0 and 100",
        ));
    }
    Ok(Value::str(format!("{:.*}", digits as usize, n)))
}

fn number_call(engine: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    match args.first() {
        Some(v) => Ok(Value::Number(coerce::to_number(engine, v)?)),
        None => Ok(Value::Int(0)),
    }
}

fn boolean_call(_: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    Ok(Value::Bool(coerce::to_boolean(&arg(args, 0))))
}

fn boolean_to_string(_: &Engine, this: &Value, _: &[Value]) -> Result<Value, ScriptError> {
    Ok(Value::str(if coerce::to_boolean(this) {
        "true"
    } else {
        "false"
    }))
}

fn boolean_value_of(_: &Engine, this: &Value, _: &[Value]) -> Result<Value, ScriptError> {
    Ok(Value::Bool(coerce::to_boolean(this)))
}

// ---------------------------------------------------------------------------
// Math
// ---------------------------------------------------------------------------

static RANDOM_STATE: Lazy<Mutex<u64>> = Lazy::new(|| {
    let seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x9e3779b97f4a7c15);
    Mutex::new(seed | 1)
});

fn math_random(_: &Engine, _: &Value, _: &[Value]) -> Result<Value, ScriptError> {
    let mut state = RANDOM_STATE.lock();
    // xorshift64*
    let mut x = *state;
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    *state = x;
    let bits = x.wrapping_mul(0x2545F4914F6CDD1D) >> 11;
    Ok(Value::Number(bits as f64 / (1u64 << 53) as f64))
}

macro_rules! math_unary {
    ($name:ident, $op:expr) => {
        fn $name(_: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
            let f: fn(f64) -> f64 = $op;
            Ok(Value::Number(f(num_arg(args, 0))))
        }
    };
}

math_unary!(math_abs, f64::abs);
math_unary!(math_floor, f64::floor);
math_unary!(math_ceil, f64::ceil);
math_unary!(math_sqrt, f64::sqrt);
math_unary!(math_log, f64::ln);
math_unary!(math_exp, f64::exp);

fn math_round(_: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    // ECMAScript rounds half toward +∞.
    let n = num_arg(args, 0);
    Ok(Value::Number((n + 0.5).floor()))
}

fn math_pow(_: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    Ok(Value::Number(num_arg(args, 0).powf(num_arg(args, 1))))
}

fn math_min(engine: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let mut best = f64::INFINITY;
    for a in args {
        let n = coerce::to_number(engine, a)?;
        if n.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        best = best.min(n);
    }
    Ok(Value::Number(best))
}

fn math_max(engine: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let mut best = f64::NEG_INFINITY;
    for a in args {
        let n = coerce::to_number(engine, a)?;
        if n.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        best = best.max(n);
    }
    Ok(Value::Number(best))
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

fn value_to_serde(engine: &Engine, value: &Value) -> Result<Option<serde_json::Value>, ScriptError> {
    Ok(Some(match value {
        Value::Undefined | Value::Function(_) => return Ok(None),
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Number(n) => {
            if n.is_finite() {
                serde_json::Number::from_f64(*n)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null)
            } else {
                serde_json::Value::Null
            }
        }
        Value::Str(s) => serde_json::Value::String(s.to_string()),
        Value::Rope(r) => serde_json::Value::String(r.flatten().to_string()),
        Value::Object(obj) => {
            let data = obj.data.read();
            if data.is_array {
                let elements = data.elements.clone();
                drop(data);
                let mut out = Vec::with_capacity(elements.len());
                for e in &elements {
                    out.push(value_to_serde(engine, e)?.unwrap_or(serde_json::Value::Null));
                }
                serde_json::Value::Array(out)
            } else {
                let entries: Vec<(String, Value)> = data
                    .named
                    .iter()
                    .filter_map(|(k, slot)| match slot {
                        OwnSlot::Data { value, attrs } if attrs.enumerable => {
                            Some((k.clone(), value.clone()))
                        }
                        _ => None,
                    })
                    .collect();
                drop(data);
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    if let Some(sv) = value_to_serde(engine, &v)? {
                        map.insert(k, sv);
                    }
                }
                serde_json::Value::Object(map)
            }
        }
    }))
}

fn serde_to_value(engine: &Engine, value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Number(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::str(s),
        serde_json::Value::Array(items) => {
            let elements = items.iter().map(|v| serde_to_value(engine, v)).collect();
            Value::Object(ScriptObject::new_array(engine.array_proto(), elements))
        }
        serde_json::Value::Object(map) => {
            let obj = ScriptObject::new(engine.object_proto());
            for (k, v) in map {
                obj.set_named(k, serde_to_value(engine, v));
            }
            Value::Object(obj)
        }
    }
}

fn json_parse(engine: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let text = coerce::to_string(engine, &arg(args, 0))?;
    let parsed: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
        ScriptError::new(ErrorKind::SyntaxError, format!("Invalid JSON: {}", e))
    })?;
    Ok(serde_to_value(engine, &parsed))
}

fn json_stringify(engine: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    match value_to_serde(engine, &arg(args, 0))? {
        Some(v) => Ok(Value::str(v.to_string())),
        None => Ok(Value::Undefined),
    }
}

// ---------------------------------------------------------------------------
// RegExp
// ---------------------------------------------------------------------------

pub fn create_regex_value(
    engine: &Engine,
    pattern: &str,
    flags: &str,
) -> Result<Value, ScriptError> {
    let regex = regex::RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .build()
        .map_err(|e| {
            ScriptError::new(
                ErrorKind::SyntaxError,
                format!("Invalid regular expression: {}", e),
            )
        })?;
    let obj = ScriptObject::new(engine.regexp_proto());
    obj.data.write().payload = Payload::Regex(Arc::new(RegexValue {
        regex,
        source: pattern.to_string(),
        flags: flags.to_string(),
    }));
    Ok(Value::Object(obj))
}

fn this_regex(this: &Value) -> Result<Arc<RegexValue>, ScriptError> {
    if let Value::Object(obj) = this {
        if let Payload::Regex(re) = &obj.data.read().payload {
            return Ok(re.clone());
        }
    }
    Err(ScriptError::type_error("Receiver is not a RegExp"))
}

fn regexp_construct(engine: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let pattern = match arg(args, 0) {
        Value::Undefined => Arc::from(""),
        other => coerce::to_string(engine, &other)?,
    };
    let flags = match arg(args, 1) {
        Value::Undefined => Arc::from(""),
        other => coerce::to_string(engine, &other)?,
    };
    create_regex_value(engine, &pattern, &flags)
}

fn regexp_test(engine: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let re = this_regex(this)?;
    let text = coerce::to_string(engine, &arg(args, 0))?;
    Ok(Value::Bool(re.regex.is_match(&text)))
}

fn regexp_exec(engine: &Engine, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let re = this_regex(this)?;
    let text = coerce::to_string(engine, &arg(args, 0))?;
    match re.regex.captures(&text) {
        Some(captures) => {
            let groups: Vec<Value> = captures
                .iter()
                .map(|m| match m {
                    Some(m) => Value::str(m.as_str()),
                    None => Value::Undefined,
                })
                .collect();
            Ok(Value::Object(ScriptObject::new_array(
                engine.array_proto(),
                groups,
            )))
        }
        None => Ok(Value::Null),
    }
}

fn regexp_to_string(_: &Engine, this: &Value, _: &[Value]) -> Result<Value, ScriptError> {
    let re = this_regex(this)?;
    Ok(Value::str(format!("/{}/{}", re.source, re.flags)))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub fn create_error_value(engine: &Engine, kind: ErrorKind, message: &str, stack: &str) -> Value {
    let _ = engine;
    let proto = INTRINSICS.error_protos[&kind];
    let obj = ScriptObject::new(proto);
    obj.set_named("name", Value::str(error_kind_name(kind)));
    obj.set_named("message", Value::str(message));
    obj.set_named("stack", Value::str(stack));
    Value::Object(obj)
}

fn error_to_string(engine: &Engine, this: &Value, _: &[Value]) -> Result<Value, ScriptError> {
    let name = engine
        .get_property(this, "name")?
        .as_string()
        .unwrap_or_else(|| Arc::from("Error"));
    let message = engine
        .get_property(this, "message")?
        .as_string()
        .unwrap_or_else(|| Arc::from(""));
    Ok(if message.is_empty() {
        Value::Str(name)
    } else {
        Value::str(format!("{}: {}", name, message))
    })
}

macro_rules! error_ctor {
    ($name:ident, $kind:expr) => {
        fn $name(engine: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
            let message = match args.first() {
                Some(Value::Undefined) | None => String::new(),
                Some(v) => coerce::to_string(engine, v)?.to_string(),
            };
            Ok(create_error_value(engine, $kind, &message, ""))
        }
    };
}

error_ctor!(error_construct, ErrorKind::Error);
error_ctor!(range_error_construct, ErrorKind::RangeError);
error_ctor!(type_error_construct, ErrorKind::TypeError);
error_ctor!(syntax_error_construct, ErrorKind::SyntaxError);
error_ctor!(uri_error_construct, ErrorKind::UriError);
error_ctor!(eval_error_construct, ErrorKind::EvalError);
error_ctor!(reference_error_construct, ErrorKind::ReferenceError);

// ---------------------------------------------------------------------------
// Global functions
// ---------------------------------------------------------------------------

fn global_parse_int(engine: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let text = coerce::to_string(engine, &arg(args, 0))?;
    let mut radix = match args.get(1) {
        Some(v) => coerce::to_int32(engine, v)?,
        None => 0,
    };
    let mut s = text.trim();
    let mut negative = false;
    if let Some(rest) = s.strip_prefix('-') {
        negative = true;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }
    if radix == 0 {
        if s.starts_with("0x") || s.starts_with("0X") {
            radix = 16;
            s = &s[2..];
        } else {
            radix = 10;
        }
    } else if radix == 16 && (s.starts_with("0x") || s.starts_with("0X")) {
        s = &s[2..];
    }
    if !(2..=36).contains(&radix) {
        return Ok(Value::Number(f64::NAN));
    }
    let mut value: f64 = 0.0;
    let mut any = false;
    for c in s.chars() {
        match c.to_digit(36) {
            Some(d) if (d as i32) < radix => {
                value = value * radix as f64 + d as f64;
                any = true;
            }
            _ => break,
        }
    }
    if !any {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(Value::Number(if negative { -value } else { value }))
}

fn global_parse_float(engine: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    let text = coerce::to_string(engine, &arg(args, 0))?;
    let s = text.trim();
    if s.starts_with("Infinity") || s.starts_with("+Infinity") {
        return Ok(Value::Number(f64::INFINITY));
    }
    if s.starts_with("-Infinity") {
        return Ok(Value::Number(f64::NEG_INFINITY));
    }
    // Longest prefix that still parses as a decimal number; "1e+5x" must
    // see past the transiently-invalid "1e+" prefix.
    let mut best = f64::NAN;
    for (i, _) in s.char_indices().skip(1).chain([(s.len(), ' ')]) {
        if let Ok(v) = s[..i].parse::<f64>() {
            best = v;
        }
    }
    Ok(Value::Number(best))
}

fn global_is_nan(_: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    Ok(Value::Bool(num_arg(args, 0).is_nan()))
}

fn global_is_finite(_: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    Ok(Value::Bool(num_arg(args, 0).is_finite()))
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

fn constructor_value(
    name: &str,
    make: crate::native::NativeMethodId,
    instance_proto: PrototypeId,
) -> Value {
    let func = crate::value::FunctionInstance::native_constructor(name, make, instance_proto);
    // Statics registered on the constructor prototype surface as own
    // properties of the constructor function.
    if let Some(ctor_proto) = PROTOTYPES.get(instance_proto).constructor_proto() {
        for prop_name in PROTOTYPES.get(ctor_proto).own_property_names() {
            if let Some(prop) = PROTOTYPES.get(ctor_proto).own_property(&prop_name) {
                if let crate::property::PropertyStore::NativeMethod(id) = prop.store {
                    func.set_prop(
                        &prop_name,
                        Value::Function(crate::value::FunctionInstance::native(prop_name.clone(), id)),
                    );
                }
            }
        }
    }
    Value::Function(func)
}

fn build() -> Intrinsics {
    use crate::native::build_prototype;

    // Object first: everything chains onto it.
    let object_class = NativeClassBuilder::new("Object")
        .method("toString", &[], StaticType::Str, object_to_string)
        .method("valueOf", &[], StaticType::Any, object_value_of)
        .method(
            "hasOwnProperty",
            &[P::Str],
            StaticType::Bool,
            object_has_own_property,
        )
        .static_method("keys", &[P::Any], StaticType::Object(None), object_keys)
        .static_method(
            "getOwnPropertyNames",
            &[P::Any],
            StaticType::Object(None),
            object_get_own_property_names,
        )
        .on_construct(&[P::Any], StaticType::Object(None), object_construct)
        .on_call(&[P::Any], StaticType::Object(None), object_construct)
        .register();
    let object_proto = build_prototype(object_class, None, true).expect("Object prototype");

    let function_class = NativeClassBuilder::new("Function")
        .variadic_method("call", &[P::Any], StaticType::Any, function_call)
        .method("apply", &[P::Any, P::Any], StaticType::Any, function_apply)
        .method("toString", &[], StaticType::Str, function_to_string)
        .register();
    let function_proto =
        build_prototype(function_class, Some(object_proto), false).expect("Function prototype");

    let array_class = NativeClassBuilder::new("Array")
        .variadic_method("push", &[], StaticType::I32, array_push)
        .method("pop", &[], StaticType::Any, array_pop)
        .method("join", &[P::Any], StaticType::Str, array_join)
        .method("indexOf", &[P::Any], StaticType::I32, array_index_of)
        .method("map", &[P::Any], StaticType::Object(None), array_map)
        .method("forEach", &[P::Any], StaticType::Any, array_for_each)
        .method("slice", &[P::Any, P::Any], StaticType::Object(None), array_slice)
        .method("toString", &[], StaticType::Str, array_to_string)
        .static_method("isArray", &[P::Any], StaticType::Bool, array_is_array)
        .on_construct(&[], StaticType::Object(None), array_construct)
        .on_call(&[], StaticType::Object(None), array_construct)
        .register();
    let array_proto =
        build_prototype(array_class, Some(object_proto), true).expect("Array prototype");

    let string_class = NativeClassBuilder::new("String")
        .method("get_length", &[], StaticType::I32, string_get_length)
        .method("charAt", &[P::I32], StaticType::Str, string_char_at)
        .method("charCodeAt", &[P::I32], StaticType::F64, string_char_code_at)
        .method("indexOf", &[P::Str], StaticType::I32, string_index_of)
        .method("substring", &[P::I32, P::Any], StaticType::Str, string_substring)
        .method("split", &[P::Any], StaticType::Object(None), string_split)
        .method("toUpperCase", &[], StaticType::Str, string_to_upper_case)
        .method("toLowerCase", &[], StaticType::Str, string_to_lower_case)
        .method("trim", &[], StaticType::Str, string_trim)
        .variadic_method("concat", &[], StaticType::Str, string_concat)
        .method("replace", &[P::Any, P::Any], StaticType::Str, string_replace)
        .method("toString", &[], StaticType::Str, string_value_of)
        .method("valueOf", &[], StaticType::Str, string_value_of)
        .on_construct(&[P::Any], StaticType::Str, string_construct)
        .on_call(&[P::Any], StaticType::Str, string_construct)
        .register();
    let string_proto =
        build_prototype(string_class, Some(object_proto), false).expect("String prototype");

    let number_class = NativeClassBuilder::new("Number")
        .method("toString", &[P::Any], StaticType::Str, number_to_string_method)
        .method("valueOf", &[], StaticType::F64, number_value_of)
        .method("toFixed", &[P::I32], StaticType::Str, number_to_fixed)
        .on_construct(&[P::Any], StaticType::F64, number_call)
        .on_call(&[P::Any], StaticType::F64, number_call)
        .register();
    let number_proto =
        build_prototype(number_class, Some(object_proto), false).expect("Number prototype");

    let boolean_class = NativeClassBuilder::new("Boolean")
        .method("toString", &[], StaticType::Str, boolean_to_string)
        .method("valueOf", &[], StaticType::Bool, boolean_value_of)
        .on_construct(&[P::Any], StaticType::Bool, boolean_call)
        .on_call(&[P::Any], StaticType::Bool, boolean_call)
        .register();
    let boolean_proto =
        build_prototype(boolean_class, Some(object_proto), false).expect("Boolean prototype");

    let regexp_class = NativeClassBuilder::new("RegExp")
        .method("test", &[P::Str], StaticType::Bool, regexp_test)
        .method("exec", &[P::Str], StaticType::Any, regexp_exec)
        .method("toString", &[], StaticType::Str, regexp_to_string)
        .on_construct(&[P::Any, P::Any], StaticType::Object(None), regexp_construct)
        .on_call(&[P::Any, P::Any], StaticType::Object(None), regexp_construct)
        .register();
    let regexp_proto =
        build_prototype(regexp_class, Some(object_proto), true).expect("RegExp prototype");

    let math_class = NativeClassBuilder::new("Math")
        .method("abs", &[P::F64], StaticType::F64, math_abs)
        .method("floor", &[P::F64], StaticType::F64, math_floor)
        .method("ceil", &[P::F64], StaticType::F64, math_ceil)
        .method("round", &[P::F64], StaticType::F64, math_round)
        .method("sqrt", &[P::F64], StaticType::F64, math_sqrt)
        .method("log", &[P::F64], StaticType::F64, math_log)
        .method("exp", &[P::F64], StaticType::F64, math_exp)
        .method("pow", &[P::F64, P::F64], StaticType::F64, math_pow)
        .variadic_method("min", &[], StaticType::F64, math_min)
        .variadic_method("max", &[], StaticType::F64, math_max)
        .method("random", &[], StaticType::F64, math_random)
        .constant("PI", Value::Number(std::f64::consts::PI), StaticType::F64)
        .constant("E", Value::Number(std::f64::consts::E), StaticType::F64)
        .register();
    let math_proto =
        build_prototype(math_class, Some(object_proto), false).expect("Math prototype");

    let json_class = NativeClassBuilder::new("JSON")
        .method("parse", &[P::Str], StaticType::Any, json_parse)
        .method("stringify", &[P::Any], StaticType::Any, json_stringify)
        .register();
    let json_proto =
        build_prototype(json_class, Some(object_proto), false).expect("JSON prototype");

    // Error family: the base prototype, then one per named kind.
    let mut error_protos = HashMap::new();
    let error_kinds: [(ErrorKind, fn(&Engine, &Value, &[Value]) -> Result<Value, ScriptError>); 7] = [
        (ErrorKind::Error, error_construct),
        (ErrorKind::RangeError, range_error_construct),
        (ErrorKind::TypeError, type_error_construct),
        (ErrorKind::SyntaxError, syntax_error_construct),
        (ErrorKind::UriError, uri_error_construct),
        (ErrorKind::EvalError, eval_error_construct),
        (ErrorKind::ReferenceError, reference_error_construct),
    ];
    let mut error_ctor_methods = HashMap::new();
    let mut error_base = None;
    for (kind, ctor) in error_kinds {
        let class = NativeClassBuilder::new(kind.name())
            .method("toString", &[], StaticType::Str, error_to_string)
            .on_construct(&[P::Any], StaticType::Object(None), ctor)
            .on_call(&[P::Any], StaticType::Object(None), ctor)
            .register();
        let base = error_base.unwrap_or(object_proto);
        let proto = build_prototype(class, Some(base), true)
            .unwrap_or_else(|_| panic!("{} prototype", kind.name()));
        if kind == ErrorKind::Error {
            error_base = Some(proto);
        }
        error_protos.insert(kind, proto);
        let make = crate::native::class(class)
            .on_construct
            .expect("error constructor entry");
        error_ctor_methods.insert(kind, make);
    }

    // Global prototype seed: constants, functions, constructors.
    let mut global_props = Vec::new();
    global_props.push(PropertyVariable::constant(
        "undefined",
        Value::Undefined,
        StaticType::Undefined,
    ));
    global_props.push(PropertyVariable::constant(
        "NaN",
        Value::Number(f64::NAN),
        StaticType::F64,
    ));
    global_props.push(PropertyVariable::constant(
        "Infinity",
        Value::Number(f64::INFINITY),
        StaticType::F64,
    ));

    let mut global_fn = |name: &str,
                         params: &[ParamKind],
                         returns: StaticType,
                         func: crate::native::NativeFn| {
        let id = crate::native::register_method(crate::native::NativeMethod {
            name: name.to_string(),
            params: params.to_vec(),
            required: 0,
            variadic: false,
            returns,
            func,
        });
        global_props.push(PropertyVariable::method(name, id));
    };
    global_fn("parseInt", &[P::Str, P::Any], StaticType::F64, global_parse_int);
    global_fn("parseFloat", &[P::Str], StaticType::F64, global_parse_float);
    global_fn("isNaN", &[P::F64], StaticType::Bool, global_is_nan);
    global_fn("isFinite", &[P::F64], StaticType::Bool, global_is_finite);

    let mut global_ctor = |name: &str, class_id: crate::native::NativeClassId, proto: PrototypeId| {
        let make = crate::native::class(class_id)
            .on_construct
            .expect("constructor entry");
        global_props.push(PropertyVariable::constant(
            name,
            constructor_value(name, make, proto),
            StaticType::Function,
        ));
    };
    global_ctor("Object", object_class, object_proto);
    global_ctor("Array", array_class, array_proto);
    global_ctor("String", string_class, string_proto);
    global_ctor("Number", number_class, number_proto);
    global_ctor("Boolean", boolean_class, boolean_proto);
    global_ctor("RegExp", regexp_class, regexp_proto);
    for (kind, _) in error_kinds {
        let make = error_ctor_methods[&kind];
        global_props.push(PropertyVariable::constant(
            kind.name(),
            constructor_value(kind.name(), make, error_protos[&kind]),
            StaticType::Function,
        ));
    }

    // Math and JSON surface as plain objects of their reflected types, so
    // member calls on them bind statically.
    global_props.push(PropertyVariable::constant(
        "Math",
        Value::Object(ScriptObject::new(math_proto)),
        StaticType::Object(Some(math_proto)),
    ));
    global_props.push(PropertyVariable::constant(
        "JSON",
        Value::Object(ScriptObject::new(json_proto)),
        StaticType::Object(Some(json_proto)),
    ));

    Intrinsics {
        object_proto,
        function_proto,
        array_proto,
        string_proto,
        number_proto,
        boolean_proto,
        regexp_proto,
        math_proto,
        json_proto,
        error_protos,
        global_props,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsic_prototypes_chain_to_object() {
        let intrinsics = intrinsics();
        assert_eq!(
            PROTOTYPES.get(intrinsics.array_proto).base,
            Some(intrinsics.object_proto)
        );
        assert_eq!(
            PROTOTYPES.get(intrinsics.string_proto).base,
            Some(intrinsics.object_proto)
        );
        let type_error = intrinsics.error_protos[&ErrorKind::TypeError];
        assert_eq!(
            PROTOTYPES.get(type_error).base,
            Some(intrinsics.error_protos[&ErrorKind::Error])
        );
    }

    #[test]
    fn string_length_folds_to_a_virtual_property() {
        let intrinsics = intrinsics();
        let prop = PROTOTYPES
            .get(intrinsics.string_proto)
            .own_property("length")
            .expect("length property");
        assert!(matches!(
            prop.store,
            crate::property::PropertyStore::Virtual(_)
        ));
        assert_eq!(prop.static_type, StaticType::I32);
    }

    #[test]
    fn parse_int_follows_radix_rules() {
        let engine = Engine::new();
        let v = global_parse_int(&engine, &Value::Undefined, &[Value::str("  42px")]).unwrap();
        assert_eq!(v.as_number(), Some(42.0));
        let v = global_parse_int(&engine, &Value::Undefined, &[Value::str("0x10")]).unwrap();
        assert_eq!(v.as_number(), Some(16.0));
        let v = global_parse_int(
            &engine,
            &Value::Undefined,
            &[Value::str("ff"), Value::Int(16)],
        )
        .unwrap();
        assert_eq!(v.as_number(), Some(255.0));
        let v = global_parse_int(&engine, &Value::Undefined, &[Value::str("zz")]).unwrap();
        assert!(v.as_number().unwrap().is_nan());
    }

    #[test]
    fn json_round_trip_preserves_plain_data() {
        let engine = Engine::new();
        let parsed = json_parse(
            &engine,
            &Value::Undefined,
            &[Value::str(r#"{"a":1,"b":[true,null,"x"]}"#)],
        )
        .unwrap();
        let text = json_stringify(&engine, &Value::Undefined, &[parsed]).unwrap();
        assert_eq!(&*text.as_string().unwrap(), r#"{"a":1,"b":[true,null,"x"]}"#);
    }
}

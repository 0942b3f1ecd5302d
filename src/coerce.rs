/// Value coercion and comparison — total functions over every runtime value.
///
/// Rules follow ECMAScript: Undefined → false/NaN/"undefined", Null →
/// false/+0/"null", numbers compare bit-equal except NaN ≠ NaN, strings
/// compare ordinal. `to_primitive` on objects tries `valueOf` then `toString`
/// (reversed for a string hint) and raises TypeError when neither yields a
/// primitive.
use crate::engine::Engine;
use crate::errors::ScriptError;
use crate::value::{
    number_to_string, same_function, same_object, JsStr, Rope, Value,
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveHint {
    None,
    Number,
    String,
}

// ---------------------------------------------------------------------------
// Coercions
// ---------------------------------------------------------------------------

pub fn to_boolean(value: &Value) -> bool {
    match value {
        Value::Undefined | Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Number(n) => *n != 0.0 && !n.is_nan(),
        Value::Str(s) => !s.is_empty(),
        Value::Rope(r) => !r.is_empty(),
        Value::Object(_) | Value::Function(_) => true,
    }
}

pub fn to_number(engine: &Engine, value: &Value) -> Result<f64, ScriptError> {
    match value {
        Value::Undefined => Ok(f64::NAN),
        Value::Null => Ok(0.0),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Int(i) => Ok(*i as f64),
        Value::Number(n) => Ok(*n),
        Value::Str(s) => Ok(string_to_number(s)),
        Value::Rope(r) => Ok(string_to_number(&r.flatten())),
        Value::Object(_) => {
            let prim = to_primitive(engine, value, PrimitiveHint::Number)?;
            to_number(engine, &prim)
        }
        Value::Function(_) => Ok(f64::NAN),
    }
}

pub fn to_string(engine: &Engine, value: &Value) -> Result<JsStr, ScriptError> {
    match value {
        Value::Undefined => Ok(Arc::from("undefined")),
        Value::Null => Ok(Arc::from("null")),
        Value::Bool(b) => Ok(Arc::from(if *b { "true" } else { "false" })),
        Value::Int(i) => Ok(Arc::from(i.to_string().as_str())),
        Value::Number(n) => Ok(Arc::from(number_to_string(*n).as_str())),
        Value::Str(s) => Ok(s.clone()),
        Value::Rope(r) => Ok(r.flatten()),
        Value::Object(_) => {
            let prim = to_primitive(engine, value, PrimitiveHint::String)?;
            to_string(engine, &prim)
        }
        Value::Function(f) => Ok(Arc::from(
            format!("function {}() {{ [native code] }}", f.name).as_str(),
        )),
    }
}

/// Convert an object to a primitive by consulting `valueOf` / `toString`.
/// Non-objects pass through unchanged.
pub fn to_primitive(
    engine: &Engine,
    value: &Value,
    hint: PrimitiveHint,
) -> Result<Value, ScriptError> {
    if !matches!(value, Value::Object(_)) {
        return Ok(value.clone());
    }
    let order: [&str; 2] = if hint == PrimitiveHint::String {
        ["toString", "valueOf"]
    } else {
        ["valueOf", "toString"]
    };
    for name in order {
        let method = engine.get_property(value, name)?;
        if let Value::Function(f) = method {
            let result = engine.call_function(&f, value.clone(), &[])?;
            if !matches!(result, Value::Object(_)) {
                return Ok(result);
            }
        }
    }
    Err(ScriptError::type_error(
        "Cannot convert object to a primitive value",
    ))
}

/// ToInt32: wrap modulo 2^32 into the signed range.
pub fn to_int32(engine: &Engine, value: &Value) -> Result<i32, ScriptError> {
    Ok(double_to_int32(to_number(engine, value)?))
}

pub fn to_uint32(engine: &Engine, value: &Value) -> Result<u32, ScriptError> {
    Ok(double_to_int32(to_number(engine, value)?) as u32)
}

/// ToInteger: truncate toward zero; NaN becomes 0, infinities saturate.
pub fn to_integer(engine: &Engine, value: &Value) -> Result<f64, ScriptError> {
    let n = to_number(engine, value)?;
    if n.is_nan() {
        return Ok(0.0);
    }
    if n.is_infinite() {
        return Ok(n);
    }
    Ok(n.trunc())
}

pub fn to_int8(engine: &Engine, value: &Value) -> Result<i8, ScriptError> {
    Ok(double_to_int32(to_number(engine, value)?) as i8)
}

pub fn to_uint8(engine: &Engine, value: &Value) -> Result<u8, ScriptError> {
    Ok(double_to_int32(to_number(engine, value)?) as u8)
}

pub fn to_int16(engine: &Engine, value: &Value) -> Result<i16, ScriptError> {
    Ok(double_to_int32(to_number(engine, value)?) as i16)
}

pub fn to_uint16(engine: &Engine, value: &Value) -> Result<u16, ScriptError> {
    Ok(double_to_int32(to_number(engine, value)?) as u16)
}

pub fn double_to_int32(n: f64) -> i32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let modulus = 4294967296.0; // 2^32
    let mut r = n.trunc() % modulus;
    if r < 0.0 {
        r += modulus;
    }
    if r >= 2147483648.0 {
        (r - modulus) as i32
    } else {
        r as i32
    }
}

/// Numeric value of a string per the Number() rules: whitespace-trimmed,
/// empty → +0, hex with 0x prefix, `Infinity` by name, else decimal.
pub fn string_to_number(s: &str) -> f64 {
    let t = s.trim_matches(|c: char| c.is_whitespace());
    if t.is_empty() {
        return 0.0;
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return match i64::from_str_radix(hex, 16) {
            Ok(v) => v as f64,
            Err(_) => f64::NAN,
        };
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

// ---------------------------------------------------------------------------
// Comparisons
// ---------------------------------------------------------------------------

/// Abstract equality (`==`): numeric/string cross-types coerce, booleans
/// numify, object–primitive pairs primitivize the object.
pub fn loose_equals(engine: &Engine, a: &Value, b: &Value) -> Result<bool, ScriptError> {
    match (a, b) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => Ok(true),
        _ if a.is_nullish() || b.is_nullish() => Ok(false),
        _ if a.is_numeric() && b.is_numeric() => {
            Ok(number_equals(a.as_number().unwrap(), b.as_number().unwrap()))
        }
        _ if a.is_string_like() && b.is_string_like() => {
            Ok(a.as_string().unwrap() == b.as_string().unwrap())
        }
        (Value::Bool(_), _) => {
            let an = Value::Number(to_number(engine, a)?);
            loose_equals(engine, &an, b)
        }
        (_, Value::Bool(_)) => {
            let bn = Value::Number(to_number(engine, b)?);
            loose_equals(engine, a, &bn)
        }
        _ if a.is_numeric() && b.is_string_like() => Ok(number_equals(
            a.as_number().unwrap(),
            string_to_number(&b.as_string().unwrap()),
        )),
        _ if a.is_string_like() && b.is_numeric() => Ok(number_equals(
            string_to_number(&a.as_string().unwrap()),
            b.as_number().unwrap(),
        )),
        (Value::Object(_), _) if b.is_numeric() || b.is_string_like() => {
            let prim = to_primitive(engine, a, PrimitiveHint::None)?;
            loose_equals(engine, &prim, b)
        }
        (_, Value::Object(_)) if a.is_numeric() || a.is_string_like() => {
            let prim = to_primitive(engine, b, PrimitiveHint::None)?;
            loose_equals(engine, a, &prim)
        }
        _ => Ok(strict_equals(a, b)),
    }
}

/// Strict equality (`===`): type equality modulo "all numeric kinds are one
/// type" and "string ≡ rope".
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => true,
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ if a.is_numeric() && b.is_numeric() => {
            number_equals(a.as_number().unwrap(), b.as_number().unwrap())
        }
        _ if a.is_string_like() && b.is_string_like() => {
            a.as_string().unwrap() == b.as_string().unwrap()
        }
        (Value::Object(x), Value::Object(y)) => same_object(x, y),
        (Value::Function(x), Value::Function(y)) => same_function(x, y),
        _ => false,
    }
}

fn number_equals(a: f64, b: f64) -> bool {
    // NaN != NaN, +0 == -0.
    a == b
}

/// SameValue: strict equality with NaN == NaN and +0 ≠ -0.
pub fn same_value(a: &Value, b: &Value) -> bool {
    if a.is_numeric() && b.is_numeric() {
        let (x, y) = (a.as_number().unwrap(), b.as_number().unwrap());
        if x.is_nan() && y.is_nan() {
            return true;
        }
        return x == y && x.is_sign_positive() == y.is_sign_positive();
    }
    strict_equals(a, b)
}

/// The abstract relational comparison: primitivize both sides with a number
/// hint; if both came out strings compare ordinal, else numerically.
/// `None` means "undefined" (a NaN was involved) — every relational operator
/// folds it to false.
pub fn abstract_relational(
    engine: &Engine,
    a: &Value,
    b: &Value,
) -> Result<Option<bool>, ScriptError> {
    let pa = to_primitive(engine, a, PrimitiveHint::Number)?;
    let pb = to_primitive(engine, b, PrimitiveHint::Number)?;
    if pa.is_string_like() && pb.is_string_like() {
        return Ok(Some(pa.as_string().unwrap() < pb.as_string().unwrap()));
    }
    let na = to_number(engine, &pa)?;
    let nb = to_number(engine, &pb)?;
    if na.is_nan() || nb.is_nan() {
        return Ok(None);
    }
    Ok(Some(na < nb))
}

pub fn less_than(engine: &Engine, a: &Value, b: &Value) -> Result<bool, ScriptError> {
    Ok(abstract_relational(engine, a, b)?.unwrap_or(false))
}

pub fn less_than_or_equal(engine: &Engine, a: &Value, b: &Value) -> Result<bool, ScriptError> {
    // a <= b  ≡  !(b < a), with NaN forcing false.
    Ok(match abstract_relational(engine, b, a)? {
        Some(gt) => !gt,
        None => false,
    })
}

pub fn greater_than(engine: &Engine, a: &Value, b: &Value) -> Result<bool, ScriptError> {
    less_than(engine, b, a)
}

pub fn greater_than_or_equal(engine: &Engine, a: &Value, b: &Value) -> Result<bool, ScriptError> {
    less_than_or_equal(engine, b, a)
}

// ---------------------------------------------------------------------------
// Runtime `+` slow path
// ---------------------------------------------------------------------------

/// Re-runs the `+` typing rules at runtime for operands the analyzer could
/// not type: string/rope on either side concatenates as a rope, otherwise
/// both sides convert to numbers.
pub fn add(engine: &Engine, a: &Value, b: &Value) -> Result<Value, ScriptError> {
    let pa = to_primitive(engine, a, PrimitiveHint::None)?;
    let pb = to_primitive(engine, b, PrimitiveHint::None)?;
    if pa.is_string_like() || pb.is_string_like() {
        let left = rope_of(engine, &pa)?;
        let right = rope_of(engine, &pb)?;
        return Ok(Value::Rope(Rope::concat(left, right)));
    }
    if let (Value::Int(x), Value::Int(y)) = (&pa, &pb) {
        if let Some(sum) = x.checked_add(*y) {
            return Ok(Value::Int(sum));
        }
    }
    Ok(Value::Number(to_number(engine, &pa)? + to_number(engine, &pb)?))
}

pub fn rope_of(engine: &Engine, value: &Value) -> Result<Rope, ScriptError> {
    match value {
        Value::Rope(r) => Ok(r.clone()),
        _ => Ok(Rope::leaf(to_string(engine, value)?)),
    }
}

// ---------------------------------------------------------------------------
// Engine-free rendering (host boundary)
// ---------------------------------------------------------------------------

/// Best-effort text for a thrown value when no engine is in reach: error
/// objects render `name: message` from their own slots, primitives by value.
pub fn describe_thrown(value: &Value) -> String {
    match value {
        Value::Object(obj) => {
            let name = obj
                .own_named("name")
                .and_then(|slot| match slot {
                    crate::value::OwnSlot::Data { value, .. } => value.as_string(),
                    _ => None,
                })
                .unwrap_or_else(|| Arc::from("Error"));
            let message = obj
                .own_named("message")
                .and_then(|slot| match slot {
                    crate::value::OwnSlot::Data { value, .. } => value.as_string(),
                    _ => None,
                })
                .unwrap_or_else(|| Arc::from(""));
            if message.is_empty() {
                name.to_string()
            } else {
                format!("{}: {}", name, message)
            }
        }
        Value::Str(s) => s.to_string(),
        Value::Rope(r) => r.flatten().to_string(),
        Value::Int(i) => i.to_string(),
        Value::Number(n) => number_to_string(*n),
        Value::Bool(b) => b.to_string(),
        Value::Undefined => "undefined".to_string(),
        Value::Null => "null".to_string(),
        Value::Function(f) => format!("[function {}]", f.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booleans() {
        assert!(!to_boolean(&Value::Undefined));
        assert!(!to_boolean(&Value::Null));
        assert!(!to_boolean(&Value::Number(f64::NAN)));
        assert!(!to_boolean(&Value::str("")));
        assert!(to_boolean(&Value::str("0")));
        assert!(to_boolean(&Value::Int(-1)));
    }

    #[test]
    fn int32_wrapping() {
        assert_eq!(double_to_int32(0.0), 0);
        assert_eq!(double_to_int32(4294967296.0), 0);
        assert_eq!(double_to_int32(4294967295.0), -1);
        assert_eq!(double_to_int32(-1.5), -1);
        assert_eq!(double_to_int32(f64::NAN), 0);
        assert_eq!(double_to_int32(2147483648.0), -2147483648);
    }

    #[test]
    fn string_numbers() {
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("  12  "), 12.0);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert!(string_to_number("12px").is_nan());
        assert_eq!(string_to_number("Infinity"), f64::INFINITY);
    }

    #[test]
    fn strict_equality_rules() {
        assert!(!strict_equals(
            &Value::Number(f64::NAN),
            &Value::Number(f64::NAN)
        ));
        assert!(strict_equals(&Value::Number(0.0), &Value::Number(-0.0)));
        assert!(!strict_equals(&Value::str("5"), &Value::Int(5)));
        assert!(strict_equals(&Value::Int(5), &Value::Number(5.0)));
        // string ≡ rope by content
        let rope = Value::Rope(Rope::concat(
            Rope::leaf(Arc::from("ab")),
            Rope::leaf(Arc::from("c")),
        ));
        assert!(strict_equals(&rope, &Value::str("abc")));
    }

    #[test]
    fn same_value_rules() {
        assert!(same_value(
            &Value::Number(f64::NAN),
            &Value::Number(f64::NAN)
        ));
        assert!(!same_value(&Value::Number(0.0), &Value::Number(-0.0)));
        assert!(same_value(&Value::str("a"), &Value::str("a")));
    }
}

/// Runtime value model.
///
/// A value is one of: the Undefined singleton, the Null singleton, a boolean,
/// an integer-kind number, a 64-bit float, an immutable string, a rope
/// (deferred concatenation), an object reference, or a function reference.
/// Narrow integer widths exist only in the static lattice; at runtime every
/// integer rides in a single tagged variant and the emitter's specialized
/// instructions are what preserve narrow arithmetic.
use crate::instructions::MethodId;
use crate::native::NativeMethodId;
use crate::property::PropertyAttributes;
use crate::prototype::PrototypeId;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

pub type JsStr = Arc<str>;

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Number(f64),
    Str(JsStr),
    Rope(Rope),
    Object(ObjectRef),
    Function(FunctionRef),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// `typeof` result.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Number(_) => "number",
            Value::Str(_) | Value::Rope(_) => "string",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Number(_))
    }

    pub fn is_string_like(&self) -> bool {
        matches!(self, Value::Str(_) | Value::Rope(_))
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Numeric payload without coercion; `None` for non-numbers.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String payload without coercion, flattening ropes.
    pub fn as_string(&self) -> Option<JsStr> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Rope(r) => Some(r.flatten()),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Number(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Rope(r) => write!(f, "{:?}", r.flatten()),
            Value::Object(o) => write!(f, "[object {}]", o.debug_tag()),
            Value::Function(func) => write!(f, "[function {}]", func.name),
        }
    }
}

// ---------------------------------------------------------------------------
// Ropes
// ---------------------------------------------------------------------------

/// A deferred string concatenation. `a + b + c` on strings builds a two-node
/// tree instead of copying; `flatten` materializes once and caches.
#[derive(Clone)]
pub struct Rope(Arc<RopeNode>);

enum RopeNode {
    Leaf(JsStr),
    Concat {
        left: Rope,
        right: Rope,
        len: usize,
        flat: OnceCell<JsStr>,
    },
}

impl Rope {
    pub fn leaf(s: JsStr) -> Rope {
        Rope(Arc::new(RopeNode::Leaf(s)))
    }

    pub fn concat(left: Rope, right: Rope) -> Rope {
        let len = left.len() + right.len();
        Rope(Arc::new(RopeNode::Concat {
            left,
            right,
            len,
            flat: OnceCell::new(),
        }))
    }

    pub fn len(&self) -> usize {
        match &*self.0 {
            RopeNode::Leaf(s) => s.len(),
            RopeNode::Concat { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flatten(&self) -> JsStr {
        match &*self.0 {
            RopeNode::Leaf(s) => s.clone(),
            RopeNode::Concat { flat, len, .. } => flat
                .get_or_init(|| {
                    let mut out = String::with_capacity(*len);
                    self.write_into(&mut out);
                    Arc::from(out.as_str())
                })
                .clone(),
        }
    }

    fn write_into(&self, out: &mut String) {
        // Iterative right-spine walk; left-leaning towers from += loops stay
        // O(total length).
        let mut pending: Vec<&Rope> = Vec::new();
        let mut node = self;
        loop {
            match &*node.0 {
                RopeNode::Leaf(s) => {
                    out.push_str(s);
                    match pending.pop() {
                        Some(next) => node = next,
                        None => break,
                    }
                }
                RopeNode::Concat { left, right, .. } => {
                    pending.push(right);
                    node = left;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

pub type ObjectRef = Arc<ScriptObject>;

/// Identity check for `===` on objects.
pub fn same_object(a: &ObjectRef, b: &ObjectRef) -> bool {
    Arc::ptr_eq(a, b)
}

pub struct ScriptObject {
    /// Static prototype descriptor (type identity).
    pub proto: PrototypeId,
    pub data: RwLock<ObjectData>,
}

#[derive(Default)]
pub struct ObjectData {
    /// Named own properties in insertion order.
    pub named: IndexMap<String, OwnSlot>,
    /// Baked field slots when the prototype emitted a fixed layout
    /// (the global object uses these).
    pub slots: Vec<Value>,
    /// Dense array part.
    pub elements: Vec<Value>,
    pub is_array: bool,
    /// Dynamic prototype link for user chains (`new F()` instances point at
    /// `F.prototype`). The static chain on `proto` is consulted after this.
    pub proto_obj: Option<ObjectRef>,
    pub payload: Payload,
}

/// Native payload riding on an object.
#[derive(Default)]
pub enum Payload {
    #[default]
    None,
    Regex(Arc<RegexValue>),
    /// Boxed primitive for Number/String/Boolean wrapper objects.
    Boxed(Value),
}

pub struct RegexValue {
    pub regex: regex::Regex,
    pub source: String,
    pub flags: String,
}

#[derive(Clone)]
pub enum OwnSlot {
    Data {
        value: Value,
        attrs: PropertyAttributes,
    },
    Accessor {
        get: Option<FunctionRef>,
        set: Option<FunctionRef>,
        attrs: PropertyAttributes,
    },
}

impl OwnSlot {
    pub fn data(value: Value) -> OwnSlot {
        OwnSlot::Data {
            value,
            attrs: PropertyAttributes::default(),
        }
    }

    pub fn attrs(&self) -> PropertyAttributes {
        match self {
            OwnSlot::Data { attrs, .. } | OwnSlot::Accessor { attrs, .. } => *attrs,
        }
    }
}

impl ScriptObject {
    pub fn new(proto: PrototypeId) -> ObjectRef {
        Arc::new(ScriptObject {
            proto,
            data: RwLock::new(ObjectData::default()),
        })
    }

    pub fn new_array(proto: PrototypeId, elements: Vec<Value>) -> ObjectRef {
        let obj = ScriptObject::new(proto);
        {
            let mut data = obj.data.write();
            data.is_array = true;
            data.elements = elements;
        }
        obj
    }

    /// Own named property, not traversing any chain.
    pub fn own_named(&self, name: &str) -> Option<OwnSlot> {
        self.data.read().named.get(name).cloned()
    }

    pub fn set_named(&self, name: &str, value: Value) {
        let mut data = self.data.write();
        match data.named.get_mut(name) {
            Some(OwnSlot::Data { value: slot, .. }) => *slot = value,
            _ => {
                data.named.insert(name.to_string(), OwnSlot::data(value));
            }
        }
    }

    pub fn debug_tag(&self) -> &'static str {
        let data = self.data.read();
        if data.is_array {
            "Array"
        } else if matches!(data.payload, Payload::Regex(_)) {
            "RegExp"
        } else {
            "Object"
        }
    }
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

pub type FunctionRef = Arc<FunctionInstance>;

pub struct FunctionInstance {
    pub name: String,
    pub kind: FunctionKind,
    /// Own properties of the function object itself (`prototype`, `length`).
    pub props: RwLock<IndexMap<String, Value>>,
    /// For native constructors: the static prototype their instances carry,
    /// consulted by `instanceof`.
    pub native_instance_proto: Option<PrototypeId>,
}

pub enum FunctionKind {
    /// A compiled script body; `captured` is the defining frame's closure
    /// record chain when the body closed over outer variables.
    Script {
        method: MethodId,
        captured: Option<RecordRef>,
    },
    Native {
        method: NativeMethodId,
    },
    /// Several native overloads under one name; dispatch is scored per call.
    Group {
        methods: Vec<NativeMethodId>,
    },
}

impl FunctionInstance {
    pub fn script(name: impl Into<String>, method: MethodId, captured: Option<RecordRef>) -> FunctionRef {
        Arc::new(FunctionInstance {
            name: name.into(),
            kind: FunctionKind::Script { method, captured },
            props: RwLock::new(IndexMap::new()),
            native_instance_proto: None,
        })
    }

    pub fn native(name: impl Into<String>, method: NativeMethodId) -> FunctionRef {
        Arc::new(FunctionInstance {
            name: name.into(),
            kind: FunctionKind::Native { method },
            props: RwLock::new(IndexMap::new()),
            native_instance_proto: None,
        })
    }

    /// A native constructor whose instances carry `instance_proto`.
    pub fn native_constructor(
        name: impl Into<String>,
        method: NativeMethodId,
        instance_proto: PrototypeId,
    ) -> FunctionRef {
        Arc::new(FunctionInstance {
            name: name.into(),
            kind: FunctionKind::Native { method },
            props: RwLock::new(IndexMap::new()),
            native_instance_proto: Some(instance_proto),
        })
    }

    pub fn group(name: impl Into<String>, methods: Vec<NativeMethodId>) -> FunctionRef {
        Arc::new(FunctionInstance {
            name: name.into(),
            kind: FunctionKind::Group { methods },
            props: RwLock::new(IndexMap::new()),
            native_instance_proto: None,
        })
    }

    pub fn get_prop(&self, name: &str) -> Option<Value> {
        self.props.read().get(name).cloned()
    }

    pub fn set_prop(&self, name: &str, value: Value) {
        self.props.write().insert(name.to_string(), value);
    }
}

pub fn same_function(a: &FunctionRef, b: &FunctionRef) -> bool {
    Arc::ptr_eq(a, b)
}

// ---------------------------------------------------------------------------
// Closure records
// ---------------------------------------------------------------------------

pub type RecordRef = Arc<ClosureRecord>;

/// Heap record holding variables an inner function closed over. One record
/// per activation of the owning function; every function materialized during
/// that activation shares it, so inner writes are visible outward and all
/// closures from one loop body observe the same binding.
pub struct ClosureRecord {
    pub parent: Option<RecordRef>,
    pub slots: RwLock<Vec<Value>>,
}

impl ClosureRecord {
    pub fn new(size: usize, parent: Option<RecordRef>) -> RecordRef {
        Arc::new(ClosureRecord {
            parent,
            slots: RwLock::new(vec![Value::Undefined; size]),
        })
    }

    /// Walk `depth` parent links, then read `slot`.
    pub fn load(self: &RecordRef, depth: u16, slot: u16) -> Value {
        let mut rec = self.clone();
        for _ in 0..depth {
            let parent = rec.parent.clone().expect("closure record depth out of range");
            rec = parent;
        }
        let value = rec.slots.read()[slot as usize].clone();
        value
    }

    pub fn store(self: &RecordRef, depth: u16, slot: u16, value: Value) {
        let mut rec = self.clone();
        for _ in 0..depth {
            let parent = rec.parent.clone().expect("closure record depth out of range");
            rec = parent;
        }
        rec.slots.write()[slot as usize] = value;
    }
}

// ---------------------------------------------------------------------------
// Number formatting
// ---------------------------------------------------------------------------

/// ECMAScript-style number-to-string: integral doubles print without a
/// fractional part, NaN and infinities by name, very large magnitudes in
/// exponent form.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 {
        return format!("{}", n as i64);
    }
    if n.abs() >= 1e21 {
        let formatted = format!("{:e}", n);
        // Rust prints `1e21`; ECMAScript wants `1e+21`.
        if let Some(idx) = formatted.find('e') {
            let (mantissa, exp) = formatted.split_at(idx);
            let exp = &exp[1..];
            if !exp.starts_with('-') {
                return format!("{}e+{}", mantissa, exp);
            }
        }
        return formatted;
    }
    format!("{}", n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rope_flattens_in_order() {
        let a = Rope::leaf(Arc::from("foo"));
        let b = Rope::leaf(Arc::from("bar"));
        let c = Rope::concat(a, b);
        let d = Rope::concat(c, Rope::leaf(Arc::from("!")));
        assert_eq!(&*d.flatten(), "foobar!");
        assert_eq!(d.len(), 7);
    }

    #[test]
    fn rope_flatten_is_cached_identity() {
        let r = Rope::concat(Rope::leaf(Arc::from("a")), Rope::leaf(Arc::from("b")));
        let first = r.flatten();
        let second = r.flatten();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn number_formatting() {
        assert_eq!(number_to_string(5.0), "5");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::INFINITY), "Infinity");
        assert_eq!(number_to_string(1e21), "1e+21");
    }

    #[test]
    fn typeof_names() {
        assert_eq!(Value::Undefined.type_of(), "undefined");
        assert_eq!(Value::Null.type_of(), "object");
        assert_eq!(Value::Int(3).type_of(), "number");
        assert_eq!(Value::str("x").type_of(), "string");
    }
}

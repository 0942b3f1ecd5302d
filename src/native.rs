/// Native classes — how host Rust code becomes script-visible.
///
/// A `NativeClass` is a reflection descriptor: named methods with declared
/// parameter signatures, literal constants, optional construct/call entries,
/// and per-member attributes. Deriving a prototype from a class walks the
/// descriptor and populates PropertyVariables by the reflection rules:
/// lowered first character (unless overridden), `get_`/`set_` pairs fold to
/// virtual accessors, same-name methods fold to method groups, indexers get
/// `___item_<TypeName>` slots, and `.make`/`.call` carry the construct and
/// plain-call entries.
use crate::engine::Engine;
use crate::errors::ScriptError;
use crate::property::{
    PropertyAttributes, PropertyStore, PropertyVariable, VirtualProperty, CALL_SLOT, MAKE_SLOT,
};
use crate::prototype::{PrototypeId, PROTOTYPES};
use crate::types::StaticType;
use crate::value::Value;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeClassId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeMethodId(pub u32);

/// All native entry points share one Rust signature; the engine and receiver
/// are synthesized at the call site, the slice carries the coerced actuals.
pub type NativeFn = fn(&Engine, &Value, &[Value]) -> Result<Value, ScriptError>;

/// Declared type of one script-visible formal parameter. The binder emits
/// the matching coercion for each actual argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F64,
    Str,
    /// Single-character string; longer inputs are a TypeError.
    Char,
    Any,
}

impl ParamKind {
    pub fn static_type(self) -> StaticType {
        match self {
            ParamKind::Bool => StaticType::Bool,
            ParamKind::I8 => StaticType::I8,
            ParamKind::U8 => StaticType::U8,
            ParamKind::I16 => StaticType::I16,
            ParamKind::U16 => StaticType::U16,
            ParamKind::I32 => StaticType::I32,
            ParamKind::U32 => StaticType::U32,
            ParamKind::I64 => StaticType::I64,
            ParamKind::U64 => StaticType::U64,
            ParamKind::F64 => StaticType::F64,
            ParamKind::Str | ParamKind::Char => StaticType::Str,
            ParamKind::Any => StaticType::Any,
        }
    }
}

pub struct NativeMethod {
    pub name: String,
    pub params: Vec<ParamKind>,
    /// Formals below this index must be supplied for the overload to be
    /// arity-compatible; the rest default to undefined.
    pub required: usize,
    pub variadic: bool,
    pub returns: StaticType,
    pub func: NativeFn,
}

static NATIVE_METHODS: Lazy<RwLock<Vec<Arc<NativeMethod>>>> = Lazy::new(|| RwLock::new(Vec::new()));

pub fn register_method(method: NativeMethod) -> NativeMethodId {
    let mut table = NATIVE_METHODS.write();
    let id = NativeMethodId(table.len() as u32);
    table.push(Arc::new(method));
    id
}

pub fn method(id: NativeMethodId) -> Arc<NativeMethod> {
    NATIVE_METHODS.read()[id.0 as usize].clone()
}

// ---------------------------------------------------------------------------
// Reflection attributes
// ---------------------------------------------------------------------------

/// First-character casing applied when deriving a property name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseMode {
    #[default]
    Auto,
    Upper,
    Lower,
}

#[derive(Debug, Clone, Default)]
pub struct MemberAttributes {
    pub rename: Option<String>,
    pub hidden: bool,
    pub case: CaseMode,
    pub enumerable: Option<bool>,
    pub writable: Option<bool>,
    pub configurable: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct ClassAttributes {
    pub rename: Option<String>,
    pub hidden: bool,
    pub case: CaseMode,
    pub no_constructors: bool,
}

pub struct MemberDef {
    pub method: NativeMethodId,
    pub attrs: MemberAttributes,
}

pub struct NativeClass {
    pub id: NativeClassId,
    pub name: String,
    pub attrs: ClassAttributes,
    /// Instance-callable members.
    pub members: Vec<MemberDef>,
    /// Members surfaced on the constructor prototype.
    pub statics: Vec<MemberDef>,
    /// Literal constants exposed as constant-typed slots.
    pub constants: Vec<(String, Value, StaticType)>,
    /// Indexer methods keyed by the index type's display name.
    pub indexers: Vec<(String, NativeMethodId)>,
    pub on_construct: Option<NativeMethodId>,
    pub on_call: Option<NativeMethodId>,
    /// Other class ids this class reflects for.
    pub prototype_for: Vec<NativeClassId>,
}

static NATIVE_CLASSES: Lazy<RwLock<Vec<Arc<NativeClass>>>> = Lazy::new(|| RwLock::new(Vec::new()));

pub fn class(id: NativeClassId) -> Arc<NativeClass> {
    NATIVE_CLASSES.read()[id.0 as usize].clone()
}

/// Constant-field value for `PropertyStore::NativeField`.
pub fn field_value(class_id: NativeClassId, field: usize) -> Value {
    class(class_id).constants[field].1.clone()
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct NativeClassBuilder {
    name: String,
    attrs: ClassAttributes,
    members: Vec<MemberDef>,
    statics: Vec<MemberDef>,
    constants: Vec<(String, Value, StaticType)>,
    indexers: Vec<(String, NativeMethodId)>,
    on_construct: Option<NativeMethodId>,
    on_call: Option<NativeMethodId>,
    prototype_for: Vec<NativeClassId>,
}

impl NativeClassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        NativeClassBuilder {
            name: name.into(),
            attrs: ClassAttributes::default(),
            members: Vec::new(),
            statics: Vec::new(),
            constants: Vec::new(),
            indexers: Vec::new(),
            on_construct: None,
            on_call: None,
            prototype_for: Vec::new(),
        }
    }

    fn make_method(
        name: &str,
        params: &[ParamKind],
        required: usize,
        variadic: bool,
        returns: StaticType,
        func: NativeFn,
    ) -> NativeMethodId {
        register_method(NativeMethod {
            name: name.to_string(),
            params: params.to_vec(),
            required,
            variadic,
            returns,
            func,
        })
    }

    /// Instance method with every formal optional.
    pub fn method(
        mut self,
        name: &str,
        params: &[ParamKind],
        returns: StaticType,
        func: NativeFn,
    ) -> Self {
        let id = Self::make_method(name, params, 0, false, returns, func);
        self.members.push(MemberDef {
            method: id,
            attrs: MemberAttributes::default(),
        });
        self
    }

    /// Instance method with a minimum arity, used to split overload groups.
    pub fn method_required(
        mut self,
        name: &str,
        params: &[ParamKind],
        required: usize,
        returns: StaticType,
        func: NativeFn,
    ) -> Self {
        let id = Self::make_method(name, params, required, false, returns, func);
        self.members.push(MemberDef {
            method: id,
            attrs: MemberAttributes::default(),
        });
        self
    }

    pub fn variadic_method(
        mut self,
        name: &str,
        params: &[ParamKind],
        returns: StaticType,
        func: NativeFn,
    ) -> Self {
        let id = Self::make_method(name, params, 0, true, returns, func);
        self.members.push(MemberDef {
            method: id,
            attrs: MemberAttributes::default(),
        });
        self
    }

    pub fn static_method(
        mut self,
        name: &str,
        params: &[ParamKind],
        returns: StaticType,
        func: NativeFn,
    ) -> Self {
        let id = Self::make_method(name, params, 0, false, returns, func);
        self.statics.push(MemberDef {
            method: id,
            attrs: MemberAttributes::default(),
        });
        self
    }

    pub fn static_variadic_method(
        mut self,
        name: &str,
        params: &[ParamKind],
        returns: StaticType,
        func: NativeFn,
    ) -> Self {
        let id = Self::make_method(name, params, 0, true, returns, func);
        self.statics.push(MemberDef {
            method: id,
            attrs: MemberAttributes::default(),
        });
        self
    }

    pub fn constant(mut self, name: &str, value: Value, ty: StaticType) -> Self {
        self.constants.push((name.to_string(), value, ty));
        self
    }

    pub fn indexer(mut self, index_type: &str, params: &[ParamKind], func: NativeFn) -> Self {
        let id = Self::make_method("___item", params, 1, false, StaticType::Any, func);
        self.indexers.push((index_type.to_string(), id));
        self
    }

    pub fn on_construct(
        mut self,
        params: &[ParamKind],
        returns: StaticType,
        func: NativeFn,
    ) -> Self {
        self.on_construct = Some(Self::make_method(".make", params, 0, true, returns, func));
        self
    }

    pub fn on_call(mut self, params: &[ParamKind], returns: StaticType, func: NativeFn) -> Self {
        self.on_call = Some(Self::make_method(".call", params, 0, true, returns, func));
        self
    }

    pub fn prototype_for(mut self, other: NativeClassId) -> Self {
        self.prototype_for.push(other);
        self
    }

    pub fn register(self) -> NativeClassId {
        let mut table = NATIVE_CLASSES.write();
        let id = NativeClassId(table.len() as u32);
        table.push(Arc::new(NativeClass {
            id,
            name: self.name,
            attrs: self.attrs,
            members: self.members,
            statics: self.statics,
            constants: self.constants,
            indexers: self.indexers,
            on_construct: self.on_construct,
            on_call: self.on_call,
            prototype_for: self.prototype_for,
        }));
        id
    }
}

// ---------------------------------------------------------------------------
// Reflection: class → prototype
// ---------------------------------------------------------------------------

/// Property name for a member: rename wins, else the method name with its
/// first character cased per the attribute.
fn property_name(raw: &str, attrs: &MemberAttributes) -> String {
    if let Some(renamed) = &attrs.rename {
        return renamed.clone();
    }
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => {
            let first = match attrs.case {
                CaseMode::Upper => first.to_ascii_uppercase(),
                CaseMode::Auto | CaseMode::Lower => first.to_ascii_lowercase(),
            };
            let mut out = String::new();
            out.push(first);
            out.push_str(chars.as_str());
            out
        }
        None => String::new(),
    }
}

fn member_attrs(attrs: &MemberAttributes, is_accessor: bool) -> PropertyAttributes {
    PropertyAttributes {
        writable: attrs.writable.unwrap_or(true),
        enumerable: attrs.enumerable.unwrap_or(false),
        configurable: attrs.configurable.unwrap_or(true),
        is_accessor,
    }
}

fn add_members(
    proto: &crate::prototype::Prototype,
    members: &[MemberDef],
) -> Result<(), crate::errors::CompileError> {
    for def in members {
        let m = method(def.method);
        if def.attrs.hidden {
            continue;
        }
        let raw = m.name.clone();
        // get_X / set_X fold into a virtual accessor pair.
        if let Some(target) = raw.strip_prefix("get_").or_else(|| raw.strip_prefix("set_")) {
            let is_getter = raw.starts_with("get_");
            let name = property_name(target, &def.attrs);
            let mut prop = proto.own_property(&name).unwrap_or_else(|| PropertyVariable {
                name: name.clone(),
                attrs: member_attrs(&def.attrs, true),
                static_type: m.returns,
                constant: None,
                store: PropertyStore::Virtual(VirtualProperty::default()),
            });
            if let PropertyStore::Virtual(pair) = &mut prop.store {
                if is_getter {
                    pair.getter = Some(def.method);
                    prop.static_type = m.returns;
                } else {
                    pair.setter = Some(def.method);
                }
            }
            proto.add_property(prop)?;
            continue;
        }
        let name = property_name(&raw, &def.attrs);
        let mut prop = PropertyVariable::method(name, def.method);
        prop.attrs = member_attrs(&def.attrs, false);
        proto.add_method_property(prop)?;
    }
    Ok(())
}

/// Derive (or fetch) the prototype for a native class. At most one prototype
/// exists per class; re-requests return the same identity.
/// `extensible_instances` decides whether instances may grow own properties
/// (script object families) or stay sealed (reflected host receivers).
pub fn build_prototype(
    class_id: NativeClassId,
    base: Option<PrototypeId>,
    extensible_instances: bool,
) -> Result<PrototypeId, crate::errors::CompileError> {
    if let Some(existing) = PROTOTYPES.lookup_class(class_id) {
        return Ok(existing);
    }
    let class = class(class_id);
    let display = class.attrs.rename.clone().unwrap_or_else(|| class.name.clone());
    let proto_id = PROTOTYPES.create(display.clone(), base, false, extensible_instances);
    let chosen = PROTOTYPES.associate_class(class_id, proto_id);
    if chosen != proto_id {
        // Lost a race with another engine; reuse its prototype.
        return Ok(chosen);
    }
    let proto = PROTOTYPES.get(proto_id);

    add_members(&proto, &class.members)?;

    for (i, (name, value, ty)) in class.constants.iter().enumerate() {
        proto.add_property(PropertyVariable {
            name: name.clone(),
            attrs: PropertyAttributes::hidden(),
            static_type: *ty,
            constant: Some(value.clone()),
            store: PropertyStore::NativeField {
                class: class_id,
                field: i,
            },
        })?;
    }

    for (type_name, id) in &class.indexers {
        proto.add_property(PropertyVariable::method(
            format!("___item_{}", type_name),
            *id,
        ))?;
    }

    if let Some(make) = class.on_construct {
        if !class.attrs.no_constructors {
            proto.add_property(PropertyVariable::method(MAKE_SLOT, make))?;
        }
    }
    if let Some(call) = class.on_call {
        proto.add_property(PropertyVariable::method(CALL_SLOT, call))?;
    }

    if !class.statics.is_empty() {
        let ctor_id = PROTOTYPES.create(format!("{}Constructor", display), None, false, false);
        add_members(&PROTOTYPES.get(ctor_id), &class.statics)?;
        proto.set_constructor_proto(ctor_id);
    }

    for other in &class.prototype_for {
        PROTOTYPES.associate_class(*other, proto_id);
    }

    Ok(proto_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &Engine, _: &Value, _: &[Value]) -> Result<Value, ScriptError> {
        Ok(Value::Undefined)
    }

    #[test]
    fn property_name_lowers_first_char() {
        let attrs = MemberAttributes::default();
        assert_eq!(property_name("IndexOf", &attrs), "indexOf");
        assert_eq!(property_name("push", &attrs), "push");
        let upper = MemberAttributes {
            case: CaseMode::Upper,
            ..Default::default()
        };
        assert_eq!(property_name("pi", &upper), "Pi");
        let renamed = MemberAttributes {
            rename: Some("MAX_VALUE".into()),
            ..Default::default()
        };
        assert_eq!(property_name("MaxValue", &renamed), "MAX_VALUE");
    }

    #[test]
    fn reflection_is_idempotent_per_class() {
        let class_id = NativeClassBuilder::new("ReflectTwice")
            .method("probe", &[], StaticType::Any, noop)
            .register();
        let first = build_prototype(class_id, None, false).unwrap();
        let second = build_prototype(class_id, None, false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn getter_setter_methods_fold() {
        let class_id = NativeClassBuilder::new("FoldAccessors")
            .method("get_Size", &[], StaticType::I32, noop)
            .method("set_Size", &[ParamKind::I32], StaticType::Any, noop)
            .register();
        let proto_id = build_prototype(class_id, None, false).unwrap();
        let proto = PROTOTYPES.get(proto_id);
        let prop = proto.own_property("size").expect("size folded");
        match prop.store {
            PropertyStore::Virtual(pair) => {
                assert!(pair.getter.is_some());
                assert!(pair.setter.is_some());
            }
            other => panic!("expected virtual property, got {:?}", other),
        }
    }

    #[test]
    fn overloads_group_under_one_name() {
        let class_id = NativeClassBuilder::new("GroupedOverloads")
            .method("write", &[ParamKind::Str], StaticType::Any, noop)
            .method("write", &[ParamKind::I32], StaticType::Any, noop)
            .register();
        let proto_id = build_prototype(class_id, None, false).unwrap();
        let prop = PROTOTYPES.get(proto_id).own_property("write").unwrap();
        assert!(matches!(prop.store, PropertyStore::MethodGroup(ref ids) if ids.len() == 2));
    }
}

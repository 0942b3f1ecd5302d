/// Prototypes — the unit of type identity at runtime.
///
/// A prototype owns a name → PropertyVariable map and a nullable base link;
/// the chain is searched strictly upward. Prototypes derive from native
/// classes by reflection (exactly one prototype per class, idempotent across
/// re-request) or are created fresh for user objects and scopes.
///
/// Lifecycle: while a prototype is "building", properties may be added.
/// `complete()` bakes it — emitted fields get fixed slot indices, the builder
/// flag drops, and all later additions are errors. Baking cascades to the
/// constructor prototype. The registry is process-wide: the first engine to
/// reflect a class binds its interpretation for every later engine.
use crate::binder;
use crate::engine::Engine;
use crate::errors::{CompileError, ScriptError};
use crate::native::NativeClassId;
use crate::property::{PropertyStore, PropertyVariable};
use crate::types::StaticType;
use crate::value::{FunctionInstance, OwnSlot, Payload, Value};
use dashmap::DashMap;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrototypeId(pub u32);

pub struct Prototype {
    pub id: PrototypeId,
    pub name: String,
    pub base: Option<PrototypeId>,
    /// Distinguishes the global scope's prototype from instance prototypes.
    pub is_static: bool,
    /// Whether instances may grow own properties at runtime. True for user
    /// object prototypes, false for reflected native classes.
    pub extensible_instances: bool,
    constructor_proto: RwLock<Option<PrototypeId>>,
    inner: RwLock<ProtoInner>,
}

struct ProtoInner {
    properties: IndexMap<String, PropertyVariable>,
    building: bool,
    /// Slots handed out by the builder before baking.
    next_slot: usize,
    layout: Option<BakedLayout>,
}

/// Fixed per-instance field layout produced by baking.
#[derive(Debug, Clone, Default)]
pub struct BakedLayout {
    pub field_slots: HashMap<String, usize>,
    pub slot_count: usize,
}

impl Prototype {
    pub fn constructor_proto(&self) -> Option<PrototypeId> {
        *self.constructor_proto.read()
    }

    pub fn set_constructor_proto(&self, id: PrototypeId) {
        *self.constructor_proto.write() = Some(id);
    }

    pub fn is_baked(&self) -> bool {
        !self.inner.read().building
    }

    pub fn layout(&self) -> Option<BakedLayout> {
        self.inner.read().layout.clone()
    }

    /// Add or merge a property. Legal only while building.
    pub fn add_property(&self, prop: PropertyVariable) -> Result<(), CompileError> {
        let mut inner = self.inner.write();
        if !inner.building {
            return Err(CompileError::Internal(format!(
                "property '{}' added to '{}' after bake",
                prop.name, self.name
            )));
        }
        inner.properties.insert(prop.name.clone(), prop);
        Ok(())
    }

    /// Overload-aware merge: a method landing on an occupied method slot
    /// folds into a group instead of replacing it.
    pub fn add_method_property(&self, prop: PropertyVariable) -> Result<(), CompileError> {
        let mut inner = self.inner.write();
        if !inner.building {
            return Err(CompileError::Internal(format!(
                "property '{}' added to '{}' after bake",
                prop.name, self.name
            )));
        }
        if let Some(existing) = inner.properties.get_mut(&prop.name) {
            if let PropertyStore::NativeMethod(id) = prop.store {
                existing.push_overload(id);
                return Ok(());
            }
        }
        inner.properties.insert(prop.name.clone(), prop);
        Ok(())
    }

    /// Own property, no chain traversal.
    pub fn own_property(&self, name: &str) -> Option<PropertyVariable> {
        self.inner.read().properties.get(name).cloned()
    }

    pub fn has_own_property(&self, name: &str) -> bool {
        self.inner.read().properties.contains_key(name)
    }

    /// Widen an existing property's declared type in place.
    pub fn retype_property(&self, name: &str, ty: StaticType) {
        if let Some(p) = self.inner.write().properties.get_mut(name) {
            p.static_type = ty;
            p.constant = None;
        }
    }

    /// The emitter asks the builder for a field slot ahead of baking; the
    /// index is stable through `complete()`. `None` when the property is not
    /// field-backed.
    pub fn ensure_slot(&self, name: &str) -> Option<usize> {
        let mut inner = self.inner.write();
        let next = inner.next_slot;
        let prop = inner.properties.get_mut(name)?;
        match prop.store {
            PropertyStore::FieldSlot(slot) => Some(slot),
            PropertyStore::EmittedField => {
                prop.store = PropertyStore::FieldSlot(next);
                inner.next_slot = next + 1;
                Some(next)
            }
            _ => None,
        }
    }

    pub fn own_property_names(&self) -> Vec<String> {
        self.inner.read().properties.keys().cloned().collect()
    }

    pub fn enumerable_property_names(&self) -> Vec<String> {
        self.inner
            .read()
            .properties
            .values()
            .filter(|p| p.attrs.enumerable)
            .map(|p| p.name.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Process-wide registry
// ---------------------------------------------------------------------------

pub struct Prototypes {
    arena: RwLock<Vec<Arc<Prototype>>>,
    by_class: DashMap<NativeClassId, PrototypeId>,
}

/// Initialized by the first engine in the process, never torn down.
pub static PROTOTYPES: Lazy<Prototypes> = Lazy::new(|| Prototypes {
    arena: RwLock::new(Vec::new()),
    by_class: DashMap::new(),
});

impl Prototypes {
    pub fn create(
        &self,
        name: impl Into<String>,
        base: Option<PrototypeId>,
        is_static: bool,
        extensible_instances: bool,
    ) -> PrototypeId {
        let mut arena = self.arena.write();
        let id = PrototypeId(arena.len() as u32);
        arena.push(Arc::new(Prototype {
            id,
            name: name.into(),
            base,
            is_static,
            extensible_instances,
            constructor_proto: RwLock::new(None),
            inner: RwLock::new(ProtoInner {
                properties: IndexMap::new(),
                building: true,
                next_slot: 0,
                layout: None,
            }),
        }));
        id
    }

    pub fn get(&self, id: PrototypeId) -> Arc<Prototype> {
        self.arena.read()[id.0 as usize].clone()
    }

    /// The prototype already derived for a native class, if any.
    pub fn lookup_class(&self, class: NativeClassId) -> Option<PrototypeId> {
        self.by_class.get(&class).map(|entry| *entry)
    }

    /// Record the class → prototype association. First writer wins; the
    /// existing id is returned on a lost race, keeping construction
    /// idempotent across re-request.
    pub fn associate_class(&self, class: NativeClassId, proto: PrototypeId) -> PrototypeId {
        *self.by_class.entry(class).or_insert(proto)
    }

    /// Search `start` and its base chain for a named property. Returns the
    /// property and the prototype that defined it.
    pub fn find_property(
        &self,
        start: PrototypeId,
        name: &str,
    ) -> Option<(PrototypeId, PropertyVariable)> {
        let mut current = Some(start);
        while let Some(id) = current {
            let proto = self.get(id);
            if let Some(p) = proto.own_property(name) {
                return Some((id, p));
            }
            current = proto.base;
        }
        None
    }

    /// Enumerable names along the whole chain, nearest-first, deduplicated.
    pub fn chain_enumerable_names(&self, start: PrototypeId) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut current = Some(start);
        while let Some(id) = current {
            let proto = self.get(id);
            for name in proto.enumerable_property_names() {
                if seen.insert(name.clone()) {
                    out.push(name);
                }
            }
            current = proto.base;
        }
        out
    }

    /// Bake one prototype: verify the base chain is acyclic, assign slot
    /// indices to emitted fields, drop the builder. Cascades to the
    /// constructor prototype.
    pub fn complete(&self, id: PrototypeId) -> Result<(), CompileError> {
        // Cycle check over the base chain.
        let mut visited = HashSet::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            if !visited.insert(cur) {
                return Err(CompileError::Internal(format!(
                    "prototype base chain of '{}' is cyclic",
                    self.get(id).name
                )));
            }
            current = self.get(cur).base;
        }

        let proto = self.get(id);
        {
            let mut inner = proto.inner.write();
            if !inner.building {
                return Ok(());
            }
            // Builder-assigned slots keep their indices; the rest fill in
            // after them.
            let mut next = inner.next_slot;
            let mut layout = BakedLayout::default();
            for prop in inner.properties.values_mut() {
                match prop.store {
                    PropertyStore::FieldSlot(slot) => {
                        layout.field_slots.insert(prop.name.clone(), slot);
                    }
                    PropertyStore::EmittedField => {
                        layout.field_slots.insert(prop.name.clone(), next);
                        prop.store = PropertyStore::FieldSlot(next);
                        next += 1;
                    }
                    _ => {}
                }
            }
            layout.slot_count = next;
            inner.layout = Some(layout);
            inner.building = false;
        }
        if let Some(ctor) = proto.constructor_proto() {
            self.complete(ctor)?;
        }
        Ok(())
    }

    /// Bake every prototype still building. Called by the engine's compile
    /// pass before execution.
    pub fn complete_all(&self) -> Result<(), CompileError> {
        let ids: Vec<PrototypeId> = {
            let arena = self.arena.read();
            arena
                .iter()
                .filter(|p| !p.is_baked())
                .map(|p| p.id)
                .collect()
        };
        for id in ids {
            self.complete(id)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dynamic runtime probe
// ---------------------------------------------------------------------------

/// Read a PropertyVariable's value for a given receiver.
pub fn read_property_variable(
    engine: &Engine,
    prop: &PropertyVariable,
    receiver: &Value,
) -> Result<Value, ScriptError> {
    match &prop.store {
        PropertyStore::Constant(v) => Ok(v.clone()),
        PropertyStore::NativeField { class, field } => {
            Ok(crate::native::field_value(*class, *field))
        }
        PropertyStore::NativeMethod(id) => Ok(Value::Function(FunctionInstance::native(
            prop.name.clone(),
            *id,
        ))),
        PropertyStore::MethodGroup(ids) => Ok(Value::Function(FunctionInstance::group(
            prop.name.clone(),
            ids.clone(),
        ))),
        PropertyStore::Virtual(pair) => match pair.getter {
            Some(getter) => binder::call_native(engine, getter, receiver.clone(), &[]),
            None => Ok(Value::Undefined),
        },
        PropertyStore::FieldSlot(slot) => match receiver.as_object() {
            Some(obj) => Ok(obj
                .data
                .read()
                .slots
                .get(*slot)
                .cloned()
                .unwrap_or(Value::Undefined)),
            None => Ok(Value::Undefined),
        },
        PropertyStore::EmittedField => Err(ScriptError::type_error(format!(
            "property '{}' read before its type was baked",
            prop.name
        ))),
    }
}

/// `has_property` for receivers whose type is unknown at compile time.
pub fn has_property(engine: &Engine, value: &Value, name: &str) -> Result<bool, ScriptError> {
    if value.is_nullish() {
        return Err(ScriptError::type_error(format!(
            "Attempted to read property '{}' from a null reference",
            name
        )));
    }
    if let Value::Object(obj) = value {
        let data = obj.data.read();
        if data.is_array {
            if name == "length" {
                return Ok(true);
            }
            if let Ok(idx) = name.parse::<usize>() {
                if idx < data.elements.len() {
                    return Ok(true);
                }
            }
        }
        if data.named.contains_key(name) {
            return Ok(true);
        }
        let mut link = data.proto_obj.clone();
        drop(data);
        while let Some(parent) = link {
            let pdata = parent.data.read();
            if pdata.named.contains_key(name) {
                return Ok(true);
            }
            link = pdata.proto_obj.clone();
        }
    }
    if let Value::Function(f) = value {
        if f.get_prop(name).is_some() {
            return Ok(true);
        }
    }
    let proto = engine.proto_of(value);
    Ok(PROTOTYPES.find_property(proto, name).is_some())
}

/// `get_property_value` for receivers whose type is unknown at compile time:
/// looks up the prototype of the value's runtime type and follows the chain.
pub fn get_property_value(
    engine: &Engine,
    value: &Value,
    name: &str,
) -> Result<Value, ScriptError> {
    if value.is_nullish() {
        return Err(ScriptError::type_error(format!(
            "Attempted to read property '{}' from a null reference",
            name
        )));
    }
    match value {
        Value::Object(obj) => {
            {
                let data = obj.data.read();
                if data.is_array {
                    if name == "length" {
                        return Ok(Value::Int(data.elements.len() as i64));
                    }
                    if let Ok(idx) = name.parse::<usize>() {
                        return Ok(data.elements.get(idx).cloned().unwrap_or(Value::Undefined));
                    }
                }
                if let Some(slot) = data.named.get(name) {
                    match slot {
                        OwnSlot::Data { value, .. } => return Ok(value.clone()),
                        OwnSlot::Accessor { get, .. } => {
                            let getter = get.clone();
                            drop(data);
                            return match getter {
                                Some(f) => engine.call_function(&f, value_of_obj(obj), &[]),
                                None => Ok(Value::Undefined),
                            };
                        }
                    }
                }
                if matches!(data.payload, Payload::Regex(_)) {
                    if let Payload::Regex(re) = &data.payload {
                        match name {
                            "source" => return Ok(Value::str(&re.source)),
                            "flags" => return Ok(Value::str(&re.flags)),
                            _ => {}
                        }
                    }
                }
            }
            // Dynamic prototype chain (user objects).
            let mut link = obj.data.read().proto_obj.clone();
            while let Some(parent) = link {
                let pdata = parent.data.read();
                if let Some(slot) = pdata.named.get(name) {
                    match slot {
                        OwnSlot::Data { value, .. } => return Ok(value.clone()),
                        OwnSlot::Accessor { get, .. } => {
                            let getter = get.clone();
                            drop(pdata);
                            return match getter {
                                Some(f) => engine.call_function(&f, value_of_obj(obj), &[]),
                                None => Ok(Value::Undefined),
                            };
                        }
                    }
                }
                link = pdata.proto_obj.clone();
            }
        }
        Value::Function(f) => {
            if let Some(v) = f.get_prop(name) {
                return Ok(v);
            }
            if name == "name" {
                return Ok(Value::str(&f.name));
            }
        }
        Value::Str(_) | Value::Rope(_) => {
            if name == "length" {
                return Ok(Value::Int(value.as_string().unwrap().chars().count() as i64));
            }
        }
        _ => {}
    }
    // Static prototype chain for the value's runtime type.
    let proto = engine.proto_of(value);
    match PROTOTYPES.find_property(proto, name) {
        Some((_, prop)) => read_property_variable(engine, &prop, value),
        None => Ok(Value::Undefined),
    }
}

/// `set_property_value` for dynamic receivers. Setting a property that does
/// not exist on a non-extensible (reflected) receiver is a TypeError.
pub fn set_property_value(
    engine: &Engine,
    value: &Value,
    name: &str,
    new_value: Value,
) -> Result<(), ScriptError> {
    if value.is_nullish() {
        return Err(ScriptError::type_error(format!(
            "Attempted to set property '{}' on a null reference",
            name
        )));
    }
    match value {
        Value::Object(obj) => {
            {
                let mut data = obj.data.write();
                if data.is_array {
                    if name == "length" {
                        let len = crate::coerce::to_uint32(engine, &new_value)? as usize;
                        data.elements.resize(len, Value::Undefined);
                        return Ok(());
                    }
                    if let Ok(idx) = name.parse::<usize>() {
                        if idx >= data.elements.len() {
                            data.elements.resize(idx + 1, Value::Undefined);
                        }
                        data.elements[idx] = new_value;
                        return Ok(());
                    }
                }
                if let Some(slot) = data.named.get_mut(name) {
                    match slot {
                        OwnSlot::Data { value: v, attrs } => {
                            if attrs.writable {
                                *v = new_value;
                            }
                            return Ok(());
                        }
                        OwnSlot::Accessor { set, .. } => {
                            let setter = set.clone();
                            drop(data);
                            return match setter {
                                Some(f) => engine
                                    .call_function(&f, value_of_obj(obj), &[new_value])
                                    .map(|_| ()),
                                None => Ok(()),
                            };
                        }
                    }
                }
            }
            // Accessor on the dynamic prototype chain intercepts the write.
            let mut link = obj.data.read().proto_obj.clone();
            while let Some(parent) = link {
                let slot = parent.data.read().named.get(name).cloned();
                if let Some(OwnSlot::Accessor { set, .. }) = slot {
                    return match set {
                        Some(f) => engine
                            .call_function(&f, value_of_obj(obj), &[new_value])
                            .map(|_| ()),
                        None => Ok(()),
                    };
                }
                if slot.is_some() {
                    break; // data property on the chain: shadow below
                }
                link = parent.data.read().proto_obj.clone();
            }
            // Writable slot on the static chain (baked fields, virtual setters)?
            let proto_id = obj.proto;
            if let Some((_, prop)) = PROTOTYPES.find_property(proto_id, name) {
                match &prop.store {
                    PropertyStore::FieldSlot(slot) => {
                        let mut data = obj.data.write();
                        if data.slots.len() <= *slot {
                            data.slots.resize(slot + 1, Value::Undefined);
                        }
                        data.slots[*slot] = new_value;
                        return Ok(());
                    }
                    PropertyStore::Virtual(pair) => {
                        return match pair.setter {
                            Some(setter) => {
                                binder::call_native(engine, setter, value.clone(), &[new_value])
                                    .map(|_| ())
                            }
                            None => Ok(()),
                        };
                    }
                    _ => {}
                }
            }
            if PROTOTYPES.get(proto_id).extensible_instances {
                obj.set_named(name, new_value);
                return Ok(());
            }
            Err(ScriptError::type_error(format!(
                "Cannot set property '{}' on an instance of {}",
                name,
                PROTOTYPES.get(proto_id).name
            )))
        }
        Value::Function(f) => {
            f.set_prop(name, new_value);
            Ok(())
        }
        _ => Err(ScriptError::type_error(format!(
            "Cannot set property '{}' on a {} value",
            name,
            value.type_of()
        ))),
    }
}

fn value_of_obj(obj: &crate::value::ObjectRef) -> Value {
    Value::Object(obj.clone())
}

/// Keys yielded by `for (k in obj)`: array indices, own enumerable names,
/// the dynamic chain, then enumerable statics, deduplicated.
pub fn enumerate_keys(engine: &Engine, value: &Value) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    if let Value::Object(obj) = value {
        let data = obj.data.read();
        if data.is_array {
            for i in 0..data.elements.len() {
                let k = i.to_string();
                if seen.insert(k.clone()) {
                    keys.push(k);
                }
            }
        }
        for (name, slot) in data.named.iter() {
            if slot.attrs().enumerable && seen.insert(name.clone()) {
                keys.push(name.clone());
            }
        }
        let mut link = data.proto_obj.clone();
        drop(data);
        while let Some(parent) = link {
            let pdata = parent.data.read();
            for (name, slot) in pdata.named.iter() {
                if slot.attrs().enumerable && seen.insert(name.clone()) {
                    keys.push(name.clone());
                }
            }
            link = pdata.proto_obj.clone();
        }
    }
    for name in PROTOTYPES.chain_enumerable_names(engine.proto_of(value)) {
        if seen.insert(name.clone()) {
            keys.push(name);
        }
    }
    keys
}

/// Own property names including non-enumerable ones (self only, no chain).
pub fn own_keys(engine: &Engine, value: &Value) -> Vec<String> {
    let mut keys = Vec::new();
    if let Value::Object(obj) = value {
        let data = obj.data.read();
        if data.is_array {
            for i in 0..data.elements.len() {
                keys.push(i.to_string());
            }
            keys.push("length".to_string());
        }
        for name in data.named.keys() {
            keys.push(name.clone());
        }
        return keys;
    }
    let proto = engine.proto_of(value);
    PROTOTYPES.get(proto).own_property_names()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyVariable;
    use crate::types::StaticType;

    #[test]
    fn bake_assigns_field_slots() {
        let id = PROTOTYPES.create("TestScope", None, true, true);
        let proto = PROTOTYPES.get(id);
        proto
            .add_property(PropertyVariable::emitted("x", StaticType::I32))
            .unwrap();
        proto
            .add_property(PropertyVariable::emitted("y", StaticType::F64))
            .unwrap();
        PROTOTYPES.complete(id).unwrap();
        let layout = proto.layout().unwrap();
        assert_eq!(layout.slot_count, 2);
        assert_eq!(layout.field_slots["x"], 0);
        assert_eq!(layout.field_slots["y"], 1);
        // Adding after bake is rejected.
        assert!(proto
            .add_property(PropertyVariable::emitted("z", StaticType::Any))
            .is_err());
    }

    #[test]
    fn chain_search_walks_upward() {
        let base = PROTOTYPES.create("BaseThing", None, false, true);
        PROTOTYPES
            .get(base)
            .add_property(PropertyVariable::constant(
                "answer",
                Value::Int(42),
                StaticType::I32,
            ))
            .unwrap();
        let derived = PROTOTYPES.create("DerivedThing", Some(base), false, true);
        let (owner, prop) = PROTOTYPES.find_property(derived, "answer").unwrap();
        assert_eq!(owner, base);
        assert_eq!(prop.name, "answer");
        assert!(PROTOTYPES.find_property(derived, "missing").is_none());
    }
}

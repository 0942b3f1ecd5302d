/// Engine and lifecycle — owns the global prototype, the compiled method
/// registry and the compile → bake → execute pipeline.
///
/// `compile` parses, resolves, infers and emits, then completes every
/// prototype; only after baking can the global object exist, so
/// `set_global` calls made earlier wait in the awaiting-start queue and
/// drain once the global's layout is realized.
use crate::binder;
use crate::coerce;
use crate::errors::{
    CompileError, Diagnostic, ErrorKind, LineMap, ScriptError, ThrownPayload,
};
use crate::infer;
use crate::instructions::{MethodId, Procedure};
use crate::intrinsics;
use crate::parser::Parser;
use crate::property::{PropertyAttributes, PropertyVariable};
use crate::prototype::{self, PrototypeId, PROTOTYPES};
use crate::scope::{AnalyzeErrorKind, Resolver};
use crate::source::ScriptSource;
use crate::types::StaticType;
use crate::value::{FunctionKind, FunctionRef, ObjectRef, ScriptObject, Value};
use crate::vm;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Name of the top-level gateway frame; stack traces stop here.
pub const GATEWAY_NAME: &str = "__.main";

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Treat every script as if it began with "use strict".
    pub force_strict: bool,
    /// Retain line tables for richer traces.
    pub enable_debugging: bool,
    /// Capture a disassembly of every emitted procedure.
    pub enable_il_analysis: bool,
    /// Warn when a global's observed type collapses to "any".
    pub collapse_warnings: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            force_strict: false,
            enable_debugging: false,
            enable_il_analysis: false,
            collapse_warnings: true,
        }
    }
}

/// Compile + execute errors surfaced by the one-shot helpers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Handle to a compiled program.
#[derive(Debug)]
pub struct CompiledScript {
    pub main: MethodId,
    disassembly: Option<String>,
}

impl CompiledScript {
    /// Captured instruction listing, present when IL analysis was enabled.
    pub fn disassembly(&self) -> Option<&str> {
        self.disassembly.as_deref()
    }
}

pub struct Engine {
    options: RwLock<EngineOptions>,
    global_proto: PrototypeId,
    global: RwLock<Option<ObjectRef>>,
    methods: RwLock<Vec<Arc<Procedure>>>,
    /// Globals set before the global type is baked.
    awaiting_start: Mutex<Vec<(String, Value)>>,
    warnings: RwLock<Vec<Diagnostic>>,
    call_depth: AtomicUsize,
}

impl Engine {
    pub fn new() -> Engine {
        let intrinsics = intrinsics::intrinsics();
        let global_proto = PROTOTYPES.create("Global", Some(intrinsics.object_proto), true, true);
        intrinsics::install_globals(global_proto);
        Engine {
            options: RwLock::new(EngineOptions::default()),
            global_proto,
            global: RwLock::new(None),
            methods: RwLock::new(Vec::new()),
            awaiting_start: Mutex::new(Vec::new()),
            warnings: RwLock::new(Vec::new()),
            call_depth: AtomicUsize::new(0),
        }
    }

    pub fn options(&self) -> EngineOptions {
        *self.options.read()
    }

    pub fn set_options(&self, options: EngineOptions) {
        *self.options.write() = options;
    }

    /// Diagnostics collected by analysis (collapse warnings, branch-type
    /// ambiguity notes).
    pub fn warnings(&self) -> Vec<Diagnostic> {
        self.warnings.read().clone()
    }

    // -----------------------------------------------------------------------
    // Prototype accessors
    // -----------------------------------------------------------------------

    pub fn global_proto(&self) -> PrototypeId {
        self.global_proto
    }

    pub fn object_proto(&self) -> PrototypeId {
        intrinsics::intrinsics().object_proto
    }

    pub fn array_proto(&self) -> PrototypeId {
        intrinsics::intrinsics().array_proto
    }

    pub fn function_proto(&self) -> PrototypeId {
        intrinsics::intrinsics().function_proto
    }

    pub fn regexp_proto(&self) -> PrototypeId {
        intrinsics::intrinsics().regexp_proto
    }

    /// Prototype backing a runtime value's type.
    pub fn proto_of(&self, value: &Value) -> PrototypeId {
        let intrinsics = intrinsics::intrinsics();
        match value {
            Value::Object(obj) => obj.proto,
            Value::Function(_) => intrinsics.function_proto,
            Value::Str(_) | Value::Rope(_) => intrinsics.string_proto,
            Value::Int(_) | Value::Number(_) => intrinsics.number_proto,
            Value::Bool(_) => intrinsics.boolean_proto,
            Value::Undefined | Value::Null => intrinsics.object_proto,
        }
    }

    /// Prototype backing a statically-inferred type, when one is known.
    pub fn proto_for_static(&self, ty: StaticType) -> Option<PrototypeId> {
        let intrinsics = intrinsics::intrinsics();
        match ty {
            StaticType::Object(Some(p)) => Some(p),
            StaticType::Str | StaticType::Rope => Some(intrinsics.string_proto),
            StaticType::Bool => Some(intrinsics.boolean_proto),
            StaticType::Function => Some(intrinsics.function_proto),
            t if t.is_numeric() => Some(intrinsics.number_proto),
            _ => None,
        }
    }

    /// Field slot for a global property, assigned by the builder on first
    /// request. `None` when the property is not field-backed (intrinsics) or
    /// unknown.
    pub fn ensure_global_slot(&self, name: &str) -> Option<u16> {
        PROTOTYPES
            .get(self.global_proto)
            .ensure_slot(name)
            .map(|slot| slot as u16)
    }

    // -----------------------------------------------------------------------
    // Method registry
    // -----------------------------------------------------------------------

    pub fn procedure(&self, method: MethodId) -> Arc<Procedure> {
        self.methods.read()[method.0 as usize].clone()
    }

    pub fn method_count(&self) -> u32 {
        self.methods.read().len() as u32
    }

    pub(crate) fn enter_call(&self) -> usize {
        self.call_depth.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn exit_call(&self) {
        self.call_depth.fetch_sub(1, Ordering::Relaxed);
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    pub fn compile(&self, source: &dyn ScriptSource) -> Result<CompiledScript, CompileError> {
        let text = source
            .text()
            .map_err(|e| CompileError::Io(e.to_string()))?;
        let path = source.path().to_string();
        let line_map = LineMap::new(&text);
        let options = self.options();

        let program = Parser::parse_program(&text).map_err(|e| {
            let (line, column) = line_map.locate(e.span.start);
            CompileError::syntax(e.message, &path, line, column)
        })?;

        let global_proto = PROTOTYPES.get(self.global_proto);
        let known = |name: &str| PROTOTYPES.find_property(self.global_proto, name).is_some();
        let (mut analysis, global_vars) =
            Resolver::resolve(&program, options.force_strict, &known).map_err(|e| {
                let (line, column) = line_map.locate(e.span.start);
                match e.kind {
                    AnalyzeErrorKind::Syntax => CompileError::Syntax {
                        message: e.message,
                        path: path.clone(),
                        line,
                        column,
                    },
                    AnalyzeErrorKind::Reference => CompileError::Reference {
                        message: e.message,
                        path: path.clone(),
                        line,
                        column,
                    },
                }
            })?;

        // Script globals become emitted fields on the global prototype.
        if !global_proto.is_baked() {
            for name in &global_vars {
                if !global_proto.has_own_property(name) {
                    global_proto.add_property(PropertyVariable::emitted(name, StaticType::Any))?;
                }
            }
        }

        let outcome = infer::infer_program(self, &mut analysis, &program);
        self.warnings.write().extend(outcome.warnings);
        if !global_proto.is_baked() {
            for (name, ty) in &outcome.global_types {
                global_proto.retype_property(name, *ty);
            }
        }

        let base = self.method_count();
        let procedures = crate::emitter::emit_program(self, &analysis, &program, &path, &line_map, base)?;
        let disassembly = if options.enable_il_analysis {
            Some(
                procedures
                    .iter()
                    .map(|p| p.disassemble())
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        } else {
            None
        };
        {
            let mut methods = self.methods.write();
            for proc in procedures {
                methods.push(Arc::new(proc));
            }
        }

        // Bake everything, realize the global object, drain waiting setters.
        PROTOTYPES.complete_all()?;
        self.instantiate_global();
        let waiting: Vec<(String, Value)> = self.awaiting_start.lock().drain(..).collect();
        for (name, value) in waiting {
            let _ = self.set_global(&name, value, None);
        }

        Ok(CompiledScript {
            main: MethodId(base),
            disassembly,
        })
    }

    fn instantiate_global(&self) {
        let mut global = self.global.write();
        if global.is_some() {
            return;
        }
        let object = ScriptObject::new(self.global_proto);
        if let Some(layout) = PROTOTYPES.get(self.global_proto).layout() {
            object.data.write().slots = vec![Value::Undefined; layout.slot_count];
        }
        *global = Some(object);
    }

    pub fn global_object(&self) -> ObjectRef {
        if let Some(global) = self.global.read().clone() {
            return global;
        }
        self.instantiate_global();
        self.global.read().clone().expect("global object missing")
    }

    /// Run a compiled script's top-level body.
    pub fn run(&self, script: &CompiledScript) -> Result<Value, ScriptError> {
        let this = Value::Object(self.global_object());
        vm::call_method(self, script.main, this, Vec::new(), None)
    }

    /// Compile and execute in one step.
    pub fn execute(&self, source: &dyn ScriptSource) -> Result<Value, EngineError> {
        let script = self.compile(source)?;
        Ok(self.run(&script)?)
    }

    // -----------------------------------------------------------------------
    // Global handles
    // -----------------------------------------------------------------------

    pub fn set_global(
        &self,
        name: &str,
        value: Value,
        attrs: Option<PropertyAttributes>,
    ) -> Result<(), ScriptError> {
        let _ = attrs;
        if self.global.read().is_none() {
            // The global's host type is not baked yet.
            self.awaiting_start.lock().push((name.to_string(), value));
            return Ok(());
        }
        let global = Value::Object(self.global_object());
        prototype::set_property_value(self, &global, name, value)
    }

    pub fn get_global(&self, name: &str) -> Result<Value, ScriptError> {
        if self.global.read().is_none() {
            let waiting = self.awaiting_start.lock();
            for (n, v) in waiting.iter().rev() {
                if n == name {
                    return Ok(v.clone());
                }
            }
            return Ok(Value::Undefined);
        }
        let global = Value::Object(self.global_object());
        prototype::get_property_value(self, &global, name)
    }

    pub fn has_global(&self, name: &str) -> Result<bool, ScriptError> {
        if self.global.read().is_none() {
            return Ok(self.awaiting_start.lock().iter().any(|(n, _)| n == name));
        }
        let global = Value::Object(self.global_object());
        prototype::has_property(self, &global, name)
    }

    pub fn call_global_function(&self, name: &str, args: &[Value]) -> Result<Value, ScriptError> {
        match self.get_global(name)? {
            Value::Function(f) => {
                self.call_function(&f, Value::Object(self.global_object()), args)
            }
            other => Err(ScriptError::type_error(format!(
                "'{}' is not a function (typeof was {})",
                name,
                other.type_of()
            ))),
        }
    }

    /// Register a host function as a global.
    pub fn set_global_function(
        &self,
        name: &str,
        params: &[crate::native::ParamKind],
        func: crate::native::NativeFn,
    ) -> Result<(), ScriptError> {
        let id = crate::native::register_method(crate::native::NativeMethod {
            name: name.to_string(),
            params: params.to_vec(),
            required: 0,
            variadic: true,
            returns: StaticType::Any,
            func,
        });
        self.set_global(
            name,
            Value::Function(crate::value::FunctionInstance::native(name, id)),
            None,
        )
    }

    // -----------------------------------------------------------------------
    // Runtime services
    // -----------------------------------------------------------------------

    /// Call any callable value shape.
    pub fn call_function(
        &self,
        func: &FunctionRef,
        this: Value,
        args: &[Value],
    ) -> Result<Value, ScriptError> {
        match &func.kind {
            FunctionKind::Script { method, captured } => {
                vm::call_method(self, *method, this, args.to_vec(), captured.clone())
            }
            FunctionKind::Native { method } => binder::call_native(self, *method, this, args),
            FunctionKind::Group { methods } => {
                binder::dispatch_group(self, &func.name, methods, this, args)
            }
        }
    }

    /// Look up a named property on any value (dynamic probe).
    pub fn get_property(&self, value: &Value, name: &str) -> Result<Value, ScriptError> {
        prototype::get_property_value(self, value, name)
    }

    /// The script-visible value for a caught exception. Abstract payloads
    /// materialize through the named error constructor.
    pub fn materialize_thrown(&self, err: &ScriptError) -> Value {
        match &err.payload {
            ThrownPayload::Value(v) => v.clone(),
            ThrownPayload::Abstract { kind, message } => {
                intrinsics::create_error_value(self, *kind, message, &err.stack_string())
            }
        }
    }

    pub fn create_error(&self, kind: ErrorKind, message: &str) -> Value {
        intrinsics::create_error_value(self, kind, message, "")
    }

    /// Compile a regex literal into a shared script value.
    pub fn create_regex(&self, pattern: &str, flags: &str) -> Result<Value, ScriptError> {
        intrinsics::create_regex_value(self, pattern, flags)
    }

    /// Coerce helper used by embedders inspecting results.
    pub fn to_display_string(&self, value: &Value) -> String {
        coerce::to_string(self, value)
            .map(|s| s.to_string())
            .unwrap_or_else(|e| e.describe())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StringScriptSource;

    #[test]
    fn engine_compiles_and_runs_an_expression_statement() {
        let engine = Engine::new();
        let script = engine
            .compile(&StringScriptSource::new("var answer = 6 * 7;"))
            .expect("compile");
        engine.run(&script).expect("run");
        let answer = engine.get_global("answer").unwrap();
        assert_eq!(answer.as_number(), Some(42.0));
    }

    #[test]
    fn set_global_before_compile_waits_for_bake() {
        let engine = Engine::new();
        engine.set_global("seed", Value::Int(9), None).unwrap();
        assert_eq!(engine.get_global("seed").unwrap().as_number(), Some(9.0));
        let script = engine
            .compile(&StringScriptSource::new("var twice = seed * 2;"))
            .expect("compile");
        engine.run(&script).expect("run");
        assert_eq!(engine.get_global("twice").unwrap().as_number(), Some(18.0));
    }

    #[test]
    fn il_analysis_captures_a_listing() {
        let engine = Engine::new();
        engine.set_options(EngineOptions {
            enable_il_analysis: true,
            ..EngineOptions::default()
        });
        let script = engine
            .compile(&StringScriptSource::new("var x = 1 + 2;"))
            .expect("compile");
        let listing = script.disassembly().expect("listing");
        assert!(listing.contains(GATEWAY_NAME));
    }

    #[test]
    fn call_global_function_goes_through_the_gateway() {
        let engine = Engine::new();
        let script = engine
            .compile(&StringScriptSource::new(
                "function add(a, b) { return a + b; }",
            ))
            .expect("compile");
        engine.run(&script).expect("run");
        let sum = engine
            .call_global_function("add", &[Value::Int(2), Value::Int(40)])
            .expect("call");
        assert_eq!(sum.as_number(), Some(42.0));
    }
}

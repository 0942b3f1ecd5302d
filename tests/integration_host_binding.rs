/// Integration tests for the host binding surface: overload selection,
/// argument coercion, embedder globals, and the engine handles.
use nitrassic::errors::ScriptError;
use nitrassic::native::{register_method, NativeMethod, ParamKind};
use nitrassic::value::FunctionInstance;
use nitrassic::{Engine, StaticType, StringScriptSource, Value};
use parking_lot::Mutex;
use std::sync::Arc;

fn run_script(engine: &Engine, src: &str) {
    engine
        .execute(&StringScriptSource::new(src))
        .expect("script should execute");
}

/// A two-overload `log` group: log(int) and log(string).
fn install_log_group(engine: &Engine, sink: Arc<Mutex<Vec<String>>>) {
    // The sink rides through a thread-local because native entry points are
    // plain fn pointers; tests reset it per call.
    LOG_SINK.with(|s| *s.borrow_mut() = Some(sink));
    let int_overload = register_method(NativeMethod {
        name: "log".into(),
        params: vec![ParamKind::I32],
        required: 1,
        variadic: false,
        returns: StaticType::Any,
        func: log_int,
    });
    let str_overload = register_method(NativeMethod {
        name: "log".into(),
        params: vec![ParamKind::Str],
        required: 1,
        variadic: false,
        returns: StaticType::Any,
        func: log_str,
    });
    engine
        .set_global(
            "log",
            Value::Function(FunctionInstance::group(
                "log",
                vec![int_overload, str_overload],
            )),
            None,
        )
        .unwrap();
}

thread_local! {
    static LOG_SINK: std::cell::RefCell<Option<Arc<Mutex<Vec<String>>>>> =
        const { std::cell::RefCell::new(None) };
}

fn record(entry: String) {
    LOG_SINK.with(|s| {
        if let Some(sink) = s.borrow().as_ref() {
            sink.lock().push(entry);
        }
    });
}

fn log_int(_: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    record(format!("int:{}", args[0].as_number().unwrap_or(f64::NAN)));
    Ok(Value::Undefined)
}

fn log_str(_: &Engine, _: &Value, args: &[Value]) -> Result<Value, ScriptError> {
    record(format!(
        "str:{}",
        args[0].as_string().map(|s| s.to_string()).unwrap_or_default()
    ));
    Ok(Value::Undefined)
}

// ─── Overload selection ──────────────────────────────────────────────────────

#[test]
fn integral_argument_selects_the_int_overload() {
    let engine = Engine::new();
    let sink = Arc::new(Mutex::new(Vec::new()));
    install_log_group(&engine, sink.clone());
    run_script(&engine, "log(1);");
    assert_eq!(sink.lock().as_slice(), ["int:1"]);
}

#[test]
fn string_argument_selects_the_string_overload() {
    let engine = Engine::new();
    let sink = Arc::new(Mutex::new(Vec::new()));
    install_log_group(&engine, sink.clone());
    run_script(&engine, "log(\"x\");");
    assert_eq!(sink.lock().as_slice(), ["str:x"]);
}

#[test]
fn fractional_number_never_truncates_into_the_int_overload() {
    // Documented choice: a non-lossy candidate beats truncation, so 1.5
    // routes to log(string).
    let engine = Engine::new();
    let sink = Arc::new(Mutex::new(Vec::new()));
    install_log_group(&engine, sink.clone());
    run_script(&engine, "log(1.5);");
    assert_eq!(sink.lock().as_slice(), ["str:1.5"]);
}

#[test]
fn unbindable_arity_reports_the_overload_message() {
    let engine = Engine::new();
    let sink = Arc::new(Mutex::new(Vec::new()));
    install_log_group(&engine, sink);
    let err = engine
        .execute(&StringScriptSource::new("log(1, 2, 3);"))
        .expect_err("no overload");
    assert!(err
        .to_string()
        .contains("No overload for method log takes 3 arguments"));
}

// ─── Statically-bound intrinsic calls ────────────────────────────────────────

#[test]
fn math_calls_coerce_arguments_per_formal_types() {
    let engine = Engine::new();
    run_script(
        &engine,
        r#"
        var a = Math.floor("3.9");
        var b = Math.max(1, "5", 2);
        var c = Math.pow(2, 10);
    "#,
    );
    assert_eq!(engine.get_global("a").unwrap().as_number(), Some(3.0));
    assert_eq!(engine.get_global("b").unwrap().as_number(), Some(5.0));
    assert_eq!(engine.get_global("c").unwrap().as_number(), Some(1024.0));
}

#[test]
fn missing_arguments_fill_with_undefined_before_coercion() {
    let engine = Engine::new();
    run_script(&engine, "var r = parseInt(\"42\");");
    assert_eq!(engine.get_global("r").unwrap().as_number(), Some(42.0));
}

// ─── Embedding API ───────────────────────────────────────────────────────────

#[test]
fn set_global_function_registers_a_callable_delegate() {
    let engine = Engine::new();
    engine
        .set_global_function("host_add", &[ParamKind::F64, ParamKind::F64], |_, _, args| {
            let a = args.first().and_then(|v| v.as_number()).unwrap_or(f64::NAN);
            let b = args.get(1).and_then(|v| v.as_number()).unwrap_or(f64::NAN);
            Ok(Value::Number(a + b))
        })
        .unwrap();
    run_script(&engine, "var sum = host_add(40, \"2\");");
    assert_eq!(engine.get_global("sum").unwrap().as_number(), Some(42.0));
}

#[test]
fn globals_round_trip_between_host_and_script() {
    let engine = Engine::new();
    engine.set_global("seed", Value::Int(7), None).unwrap();
    run_script(&engine, "var grown = seed * 6;");
    assert_eq!(engine.get_global("grown").unwrap().as_number(), Some(42.0));
    assert!(engine.has_global("grown").unwrap());
    assert!(!engine.has_global("nonexistent").unwrap());
}

#[test]
fn call_global_function_invokes_compiled_script_bodies() {
    let engine = Engine::new();
    run_script(
        &engine,
        "function shout(s) { return s.toUpperCase() + \"!\"; }",
    );
    let result = engine
        .call_global_function("shout", &[Value::str("hey")])
        .unwrap();
    assert_eq!(&*result.as_string().unwrap(), "HEY!");
}

#[test]
fn registering_the_same_host_type_twice_reuses_the_prototype() {
    // Two engines in one process share the reflected prototypes: values
    // created by one resolve methods registered through the other's view.
    let first = Engine::new();
    let second = Engine::new();
    run_script(&first, "var a = [1, 2, 3];");
    run_script(&second, "var b = [4, 5];");
    let a = first.get_global("a").unwrap();
    let b = second.get_global("b").unwrap();
    let (Value::Object(a), Value::Object(b)) = (&a, &b) else {
        panic!("expected arrays")
    };
    assert_eq!(a.proto, b.proto);
}

#[test]
fn collapse_warning_fires_when_a_global_changes_category() {
    let engine = Engine::new();
    run_script(&engine, "var w = 1; w = \"now a string\";");
    let warnings = engine.warnings();
    assert!(
        warnings.iter().any(|w| w.message.contains("'w'")),
        "expected a collapse warning, got {:?}",
        warnings
    );
}

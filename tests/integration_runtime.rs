/// Integration tests for the runtime object model.
///
/// These tests verify:
///   • Prototype chain lookup through `in` and property reads
///   • Enumerability: `for (k in o)` vs Object.getOwnPropertyNames
///   • JSON round-tripping of plain data
///   • Shared regex literal instances
///   • `instanceof` over both user and native constructors
///   • Error shapes and messages observable from scripts
use nitrassic::{Engine, StringScriptSource, Value};

fn run_script(src: &str) -> Engine {
    let engine = Engine::new();
    engine
        .execute(&StringScriptSource::new(src))
        .expect("script should execute");
    engine
}

fn global_bool(engine: &Engine, name: &str) -> bool {
    match engine.get_global(name).unwrap() {
        Value::Bool(b) => b,
        other => panic!("{} should be a boolean, got {:?}", name, other),
    }
}

fn global_string(engine: &Engine, name: &str) -> String {
    engine
        .get_global(name)
        .unwrap()
        .as_string()
        .unwrap_or_else(|| panic!("{} should be a string", name))
        .to_string()
}

// ─── Prototype lookup ────────────────────────────────────────────────────────

#[test]
fn in_operator_walks_the_prototype_chain() {
    let engine = run_script(
        r#"
        var found = "toString" in {};
        var missing = "zzz" in {};
    "#,
    );
    assert!(global_bool(&engine, "found"));
    assert!(!global_bool(&engine, "missing"));
}

#[test]
fn user_prototype_methods_resolve_through_new_instances() {
    let engine = run_script(
        r#"
        function Point(x, y) { this.x = x; this.y = y; }
        Point.prototype.norm2 = function () { return this.x * this.x + this.y * this.y; };
        var p = new Point(3, 4);
        var result = p.norm2();
        var is_point = p instanceof Point;
    "#,
    );
    assert_eq!(engine.get_global("result").unwrap().as_number(), Some(25.0));
    assert!(global_bool(&engine, "is_point"));
}

#[test]
fn in_operator_rejects_non_objects() {
    let engine = Engine::new();
    let err = engine
        .execute(&StringScriptSource::new("var x = \"a\" in 5;"))
        .expect_err("in on a number");
    assert!(err.to_string().contains("'in' operator"));
}

// ─── Enumerability ───────────────────────────────────────────────────────────

#[test]
fn for_in_sees_own_enumerable_properties_only() {
    let engine = run_script(
        r#"
        var o = { a: 1, b: 2 };
        var keys = "";
        for (var k in o) { keys = keys + k + ";"; }
        var result = keys;
    "#,
    );
    assert_eq!(global_string(&engine, "result"), "a;b;");
}

#[test]
fn own_property_names_include_non_enumerable_intrinsics() {
    // toString is hidden from for-in but visible to getOwnPropertyNames on
    // its defining receiver.
    let engine = run_script(
        r#"
        var arr = [10, 20];
        var names = Object.getOwnPropertyNames(arr).join(",");
        var keys = Object.keys({ a: 1 }).join(",");
    "#,
    );
    assert_eq!(global_string(&engine, "names"), "0,1,length");
    assert_eq!(global_string(&engine, "keys"), "a");
}

// ─── JSON ────────────────────────────────────────────────────────────────────

#[test]
fn json_round_trips_plain_data() {
    let engine = run_script(
        r#"
        var v = { num: 1.5, flag: true, list: [1, "two", null], nothing: null };
        var text = JSON.stringify(v);
        var back = JSON.parse(text);
        var same = back.num === 1.5
            && back.flag === true
            && back.list[1] === "two"
            && back.list[2] === null
            && back.nothing === null;
    "#,
    );
    assert!(global_bool(&engine, "same"));
}

#[test]
fn json_parse_rejects_garbage_with_a_syntax_error() {
    let engine = run_script(
        r#"
        var caught = "";
        try {
            JSON.parse("{nope");
        } catch (e) {
            caught = e.name;
        }
    "#,
    );
    assert_eq!(global_string(&engine, "caught"), "SyntaxError");
}

// ─── Regex ───────────────────────────────────────────────────────────────────

#[test]
fn regex_literal_is_shared_per_source_position() {
    let engine = run_script(
        r#"
        function pattern() { return /ab+c/i; }
        var same = pattern() === pattern();
        var matched = pattern().test("xABBC!");
    "#,
    );
    assert!(global_bool(&engine, "same"));
    assert!(global_bool(&engine, "matched"));
}

#[test]
fn regex_exec_returns_capture_groups() {
    let engine = run_script(
        r#"
        var m = /(\d+)-(\d+)/.exec("range 10-25 units");
        var full = m[0];
        var lo = m[1];
        var hi = m[2];
        var missing = /xyz/.exec("abc");
        var missing_is_null = missing === null;
    "#,
    );
    assert_eq!(global_string(&engine, "full"), "10-25");
    assert_eq!(global_string(&engine, "lo"), "10");
    assert_eq!(global_string(&engine, "hi"), "25");
    assert!(global_bool(&engine, "missing_is_null"));
}

// ─── instanceof & errors ─────────────────────────────────────────────────────

#[test]
fn error_family_chains_to_the_base_error() {
    let engine = run_script(
        r#"
        var e = new TypeError("bad");
        var is_type = e instanceof TypeError;
        var is_base = e instanceof Error;
        var named = e.name;
        var message = e.message;
        var text = e.toString();
    "#,
    );
    assert!(global_bool(&engine, "is_type"));
    assert!(global_bool(&engine, "is_base"));
    assert_eq!(global_string(&engine, "named"), "TypeError");
    assert_eq!(global_string(&engine, "message"), "bad");
    assert_eq!(global_string(&engine, "text"), "TypeError: bad");
}

#[test]
fn instanceof_with_a_non_function_rhs_is_a_type_error() {
    let engine = run_script(
        r#"
        var caught = "";
        try {
            var x = {} instanceof 5;
        } catch (e) {
            caught = e.name + "|" + e.message;
        }
    "#,
    );
    let caught = global_string(&engine, "caught");
    assert!(caught.starts_with("TypeError|"));
    assert!(caught.contains("instanceof"));
    assert!(caught.contains("number"));
}

#[test]
fn property_read_on_null_reports_the_property_name() {
    let engine = run_script(
        r#"
        var caught = "";
        try {
            var o = null;
            var x = o.width;
        } catch (e) {
            caught = e.message;
        }
    "#,
    );
    assert_eq!(
        global_string(&engine, "caught"),
        "Attempted to read property 'width' from a null reference"
    );
}

#[test]
fn runtime_errors_carry_a_stack_through_the_gateway() {
    let engine = Engine::new();
    let err = engine
        .execute(&StringScriptSource::new(
            "function inner() { missing(); }\nfunction outer() { inner(); }\nouter();",
        ))
        .expect_err("reference error");
    let text = err.to_string();
    assert!(text.contains("missing is not defined"));
    assert!(text.contains("inner@<string>"));
    assert!(text.contains("outer@<string>"));
    assert!(text.contains("__.main@<string>"));
}

// ─── typeof / delete / with ──────────────────────────────────────────────────

#[test]
fn typeof_covers_every_tag() {
    let engine = run_script(
        r#"
        var tags = [
            typeof undefined, typeof null, typeof true, typeof 3,
            typeof "s", typeof {}, typeof function () {}, typeof not_declared
        ].join(",");
    "#,
    );
    assert_eq!(
        global_string(&engine, "tags"),
        "undefined,object,boolean,number,string,object,function,undefined"
    );
}

#[test]
fn delete_removes_own_properties() {
    let engine = run_script(
        r#"
        var o = { a: 1 };
        var removed = delete o.a;
        var gone = !("a" in o);
        var on_var = (function () { var v = 1; return delete v; })();
    "#,
    );
    assert!(global_bool(&engine, "removed"));
    assert!(global_bool(&engine, "gone"));
    assert!(!global_bool(&engine, "on_var"));
}

#[test]
fn with_statement_resolves_against_the_object_first() {
    let engine = run_script(
        r#"
        var x = "global";
        var o = { x: "from-object" };
        var seen = "";
        with (o) { seen = x; }
        with ({}) { seen = seen + "|" + x; }
    "#,
    );
    assert_eq!(global_string(&engine, "seen"), "from-object|global");
}

// ─── Accessors ───────────────────────────────────────────────────────────────

#[test]
fn object_literal_getters_and_setters() {
    let engine = run_script(
        r#"
        var store = { raw: 2 };
        var o = {
            get doubled() { return store.raw * 2; },
            set doubled(v) { store.raw = v / 2; }
        };
        var before = o.doubled;
        o.doubled = 10;
        var after = store.raw;
    "#,
    );
    assert_eq!(engine.get_global("before").unwrap().as_number(), Some(4.0));
    assert_eq!(engine.get_global("after").unwrap().as_number(), Some(5.0));
}

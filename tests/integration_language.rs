/// Integration tests for core language semantics.
///
/// These tests verify:
///   • Arithmetic string/number coercion through `+`
///   • Loose vs. strict equality
///   • `var` hoisting within a function
///   • Control flow: loops, switch, labels, try/catch/finally
///   • Strict-mode compile-time rejections
use nitrassic::errors::CompileError;
use nitrassic::{Engine, StringScriptSource, Value};

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn run_script(src: &str) -> Engine {
    let engine = Engine::new();
    engine
        .execute(&StringScriptSource::new(src))
        .expect("script should execute");
    engine
}

fn eval_expr(src: &str) -> Value {
    let wrapper = format!("var result = ({});", src);
    let engine = run_script(&wrapper);
    engine.get_global("result").expect("result readable")
}

fn eval_string(src: &str) -> String {
    let value = eval_expr(src);
    value
        .as_string()
        .map(|s| s.to_string())
        .unwrap_or_else(|| panic!("expected a string result, got {:?}", value))
}

fn eval_number(src: &str) -> f64 {
    let value = eval_expr(src);
    value
        .as_number()
        .unwrap_or_else(|| panic!("expected a numeric result, got {:?}", value))
}

fn eval_bool(src: &str) -> bool {
    match eval_expr(src) {
        Value::Bool(b) => b,
        other => panic!("expected a boolean result, got {:?}", other),
    }
}

// ─── Arithmetic coercion ──────────────────────────────────────────────────────

#[test]
fn string_concat_folds_left_to_right() {
    assert_eq!(
        eval_string("(function(){ return \"5\" + 3 + 4; })()"),
        "534"
    );
    assert_eq!(eval_string("(function(){ return 5 + 3 + \"4\"; })()"), "84");
}

#[test]
fn narrow_integer_addition_stays_integral() {
    assert_eq!(eval_number("1 + 2 + 3"), 6.0);
    assert!(matches!(eval_expr("1 + 2 + 3"), Value::Int(6)));
}

#[test]
fn division_produces_doubles() {
    assert_eq!(eval_number("7 / 2"), 3.5);
    assert!(eval_number("0 / 0").is_nan());
}

#[test]
fn bitwise_operates_on_int32() {
    assert_eq!(eval_number("(0xffffffff | 0)"), -1.0);
    assert_eq!(eval_number("1 << 3"), 8.0);
    assert_eq!(eval_number("-1 >>> 28"), 15.0);
}

#[test]
fn rope_concat_in_a_loop_matches_naive_append() {
    let engine = run_script(
        r#"
        var s = "";
        for (var i = 0; i < 5; i++) {
            s = s + i + ",";
        }
        var result = s;
    "#,
    );
    let s = engine.get_global("result").unwrap();
    assert_eq!(&*s.as_string().unwrap(), "0,1,2,3,4,");
}

// ─── Equality ────────────────────────────────────────────────────────────────

#[test]
fn loose_equality_coerces() {
    assert!(eval_bool("0 == \"0\""));
    assert!(eval_bool("null == undefined"));
    assert!(!eval_bool("null == 0"));
}

#[test]
fn strict_equality_does_not_coerce() {
    assert!(!eval_bool("0 === \"0\""));
    assert!(!eval_bool("null === undefined"));
    assert!(!eval_bool("\"5\" === 5"));
}

#[test]
fn nan_and_signed_zero() {
    assert!(!eval_bool("NaN === NaN"));
    assert!(eval_bool("+0 === -0"));
}

#[test]
fn string_and_rope_compare_by_content() {
    assert!(eval_bool("(\"ab\" + \"c\") === \"abc\""));
}

// ─── Hoisting ────────────────────────────────────────────────────────────────

#[test]
fn var_read_before_declaration_is_undefined() {
    let engine = run_script(
        r#"
        function probe() {
            var before = x;
            var x = 5;
            return before === undefined;
        }
        var result = probe();
    "#,
    );
    assert!(matches!(
        engine.get_global("result").unwrap(),
        Value::Bool(true)
    ));
}

#[test]
fn function_declarations_hoist_above_statements() {
    let engine = run_script(
        r#"
        function probe() {
            return helper();
            function helper() { return 21; }
        }
        var result = probe() * 2;
    "#,
    );
    assert_eq!(engine.get_global("result").unwrap().as_number(), Some(42.0));
}

// ─── Control flow ────────────────────────────────────────────────────────────

#[test]
fn while_and_do_while() {
    let engine = run_script(
        r#"
        var n = 0;
        while (n < 5) { n++; }
        var m = 0;
        do { m++; } while (m < 3);
        var result = n * 10 + m;
    "#,
    );
    assert_eq!(engine.get_global("result").unwrap().as_number(), Some(53.0));
}

#[test]
fn labeled_break_exits_the_outer_loop() {
    let engine = run_script(
        r#"
        var count = 0;
        outer: for (var i = 0; i < 10; i++) {
            for (var j = 0; j < 10; j++) {
                count++;
                if (count === 7) { break outer; }
            }
        }
        var result = count;
    "#,
    );
    assert_eq!(engine.get_global("result").unwrap().as_number(), Some(7.0));
}

#[test]
fn switch_matches_strictly_and_falls_through() {
    let engine = run_script(
        r#"
        function pick(v) {
            var out = "";
            switch (v) {
                case 1: out = out + "one ";
                case 2: out = out + "two"; break;
                default: out = "other";
            }
            return out;
        }
        var a = pick(1);
        var b = pick(2);
        var c = pick("1");
    "#,
    );
    assert_eq!(
        &*engine.get_global("a").unwrap().as_string().unwrap(),
        "one two"
    );
    assert_eq!(
        &*engine.get_global("b").unwrap().as_string().unwrap(),
        "two"
    );
    assert_eq!(
        &*engine.get_global("c").unwrap().as_string().unwrap(),
        "other"
    );
}

#[test]
fn ternary_and_logical_short_circuit() {
    assert_eq!(eval_number("true ? 1 : 2"), 1.0);
    assert_eq!(eval_number("false ? 1 : 2"), 2.0);
    assert_eq!(eval_number("0 || 7"), 7.0);
    assert_eq!(eval_number("3 && 9"), 9.0);
    // The untaken side must not run.
    let engine = run_script(
        r#"
        var touched = false;
        function poke() { touched = true; return 1; }
        var v = true || poke();
        var result = touched;
    "#,
    );
    assert!(matches!(
        engine.get_global("result").unwrap(),
        Value::Bool(false)
    ));
}

// ─── Exceptions ──────────────────────────────────────────────────────────────

#[test]
fn try_catch_binds_the_thrown_value() {
    let engine = run_script(
        r#"
        var result = "";
        try {
            throw "boom";
        } catch (e) {
            result = "caught:" + e;
        }
    "#,
    );
    assert_eq!(
        &*engine.get_global("result").unwrap().as_string().unwrap(),
        "caught:boom"
    );
}

#[test]
fn finally_runs_on_every_path() {
    let engine = run_script(
        r#"
        var log = "";
        function attempt(fail) {
            try {
                if (fail) { throw "x"; }
                log = log + "ok;";
            } catch (e) {
                log = log + "catch;";
            } finally {
                log = log + "finally;";
            }
        }
        attempt(false);
        attempt(true);
        var result = log;
    "#,
    );
    assert_eq!(
        &*engine.get_global("result").unwrap().as_string().unwrap(),
        "ok;finally;catch;finally;"
    );
}

#[test]
fn finally_runs_before_an_early_return() {
    let engine = run_script(
        r#"
        var log = "";
        function depart() {
            try {
                return "returned";
            } finally {
                log = "finalized";
            }
        }
        var result = depart();
    "#,
    );
    assert_eq!(
        &*engine.get_global("result").unwrap().as_string().unwrap(),
        "returned"
    );
    assert_eq!(
        &*engine.get_global("log").unwrap().as_string().unwrap(),
        "finalized"
    );
}

#[test]
fn uncaught_throw_escapes_as_a_host_error() {
    let engine = Engine::new();
    let err = engine
        .execute(&StringScriptSource::new("throw new TypeError(\"nope\");"))
        .expect_err("should throw");
    assert!(err.to_string().contains("TypeError: nope"));
}

// ─── Strict mode ─────────────────────────────────────────────────────────────

#[test]
fn strict_assignment_to_eval_is_a_compile_error() {
    let engine = Engine::new();
    let err = engine
        .compile(&StringScriptSource::new("\"use strict\"; eval = 1;"))
        .expect_err("strict violation");
    assert!(matches!(err, CompileError::Syntax { .. }));
}

#[test]
fn strict_delete_of_a_variable_is_a_compile_error() {
    let engine = Engine::new();
    let err = engine
        .compile(&StringScriptSource::new(
            "\"use strict\"; var x = 1; delete x;",
        ))
        .expect_err("strict violation");
    assert!(matches!(err, CompileError::Syntax { .. }));
}

#[test]
fn invalid_assignment_target_is_a_reference_error_at_compile_time() {
    let engine = Engine::new();
    let err = engine
        .compile(&StringScriptSource::new("1 = 2;"))
        .expect_err("invalid target");
    assert!(matches!(err, CompileError::Reference { .. }));
}

#[test]
fn constant_folding_matches_runtime_evaluation() {
    // Folded and unfolded paths must agree observably.
    let pairs = [
        ("\"5\" + 3 + 4", "\"534\""),
        ("1 + 2 * 3", "7"),
        ("10 % 4", "2"),
        ("(1 < 2)", "true"),
    ];
    for (expr, expected) in pairs {
        let engine = run_script(&format!(
            "var folded = ({expr}); var x = {expr}; var dynamic = (function(){{ return x; }})();"
        ));
        let folded = engine.to_display_string(&engine.get_global("folded").unwrap());
        let expected_engine = run_script(&format!("var result = ({expected});"));
        let expected_value =
            expected_engine.to_display_string(&expected_engine.get_global("result").unwrap());
        assert_eq!(folded, expected_value, "mismatch for {}", expr);
    }
}

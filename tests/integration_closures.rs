/// Integration tests for closure capture and activation records.
///
/// These tests verify:
///   • Captured variables migrate into a shared activation record
///   • All closures from one activation observe the same binding
///   • Inner writes are visible to the enclosing scope
///   • Currying through multiple record levels
///   • `arguments` reflection
use nitrassic::{Engine, StringScriptSource};

fn run_script(src: &str) -> Engine {
    let engine = Engine::new();
    engine
        .execute(&StringScriptSource::new(src))
        .expect("script should execute");
    engine
}

fn global_number(engine: &Engine, name: &str) -> f64 {
    engine
        .get_global(name)
        .unwrap()
        .as_number()
        .unwrap_or_else(|| panic!("{} should be numeric", name))
}

#[test]
fn closure_captures_outer_variable() {
    let engine = run_script(
        r#"
        function make_adder(x) {
            return function (y) { return x + y; };
        }
        var add5 = make_adder(5);
        var result = add5(10);
    "#,
    );
    assert_eq!(global_number(&engine, "result"), 15.0);
}

#[test]
fn closures_from_separate_activations_are_independent() {
    let engine = run_script(
        r#"
        function make_counter() {
            var n = 0;
            return function () { n = n + 1; return n; };
        }
        var a = make_counter();
        var b = make_counter();
        a(); a(); a();
        b();
        var from_a = a();
        var from_b = b();
    "#,
    );
    assert_eq!(global_number(&engine, "from_a"), 4.0);
    assert_eq!(global_number(&engine, "from_b"), 2.0);
}

#[test]
fn loop_closures_share_one_binding() {
    // Pre-let semantics: every function returned from the loop reports the
    // terminal value of the shared var.
    let engine = run_script(
        r#"
        function collect() {
            var r = [];
            for (var i = 0; i < 3; i++) {
                r.push(function () { return i; });
            }
            return r.map(function (f) { return f(); });
        }
        var reported = collect();
        var first = reported[0];
        var second = reported[1];
        var third = reported[2];
    "#,
    );
    assert_eq!(global_number(&engine, "first"), 3.0);
    assert_eq!(global_number(&engine, "second"), 3.0);
    assert_eq!(global_number(&engine, "third"), 3.0);
}

#[test]
fn inner_writes_are_visible_to_the_outer_scope() {
    let engine = run_script(
        r#"
        function probe() {
            var shared = 1;
            function bump() { shared = shared + 10; }
            bump();
            bump();
            return shared;
        }
        var result = probe();
    "#,
    );
    assert_eq!(global_number(&engine, "result"), 21.0);
}

#[test]
fn three_level_currying() {
    let engine = run_script(
        r#"
        function outer(a) {
            return function (b) {
                return function (c) { return a + b + c; };
            };
        }
        var result = outer(1)(2)(3);
    "#,
    );
    assert_eq!(global_number(&engine, "result"), 6.0);
}

#[test]
fn middle_function_without_captures_still_reaches_outer_record() {
    let engine = run_script(
        r#"
        function a() {
            var v = 40;
            function b() {
                function c() { return v + 2; }
                return c;
            }
            return b()();
        }
        var result = a();
    "#,
    );
    assert_eq!(global_number(&engine, "result"), 42.0);
}

#[test]
fn captured_parameter_behaves_like_a_local() {
    let engine = run_script(
        r#"
        function make(x) {
            x = x * 2;
            return function () { return x; };
        }
        var result = make(21)();
    "#,
    );
    assert_eq!(global_number(&engine, "result"), 42.0);
}

#[test]
fn arguments_object_reflects_actuals() {
    let engine = run_script(
        r#"
        function count() { return arguments.length; }
        function second() { return arguments[1]; }
        var n = count(1, 2, 3);
        var v = second("a", "b");
    "#,
    );
    assert_eq!(global_number(&engine, "n"), 3.0);
    assert_eq!(
        &*engine.get_global("v").unwrap().as_string().unwrap(),
        "b"
    );
}

#[test]
fn recursion_terminates_with_a_range_error_on_overflow() {
    let engine = Engine::new();
    let err = engine
        .execute(&StringScriptSource::new(
            "function dive() { return dive(); } dive();",
        ))
        .expect_err("should overflow");
    assert!(err.to_string().contains("call stack"));
}

#[test]
fn fibonacci_mixes_recursion_and_captured_state() {
    let engine = run_script(
        r#"
        function fib(n) {
            if (n <= 1) { return n; }
            return fib(n - 1) + fib(n - 2);
        }
        var r10 = fib(10);
    "#,
    );
    assert_eq!(global_number(&engine, "r10"), 55.0);
}

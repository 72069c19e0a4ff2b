//! End-to-end evaluation scenarios, run through both the interpreter and
//! the compiler.

use std::sync::Arc;

use liana::{Datum, ErrorKind, EvalLimits, OpRegistry, Progress, Script, ScriptContext, ScriptError};
use pretty_assertions::assert_eq;

fn ops() -> Arc<OpRegistry> {
    Arc::new(OpRegistry::standard())
}

fn ast(json: &str) -> Datum {
    Datum::from_json_str(json).unwrap()
}

fn interpret(json: &str) -> Result<Datum, ScriptError> {
    let script = Script::from_ast(ast(json));
    let ctx = ScriptContext::minimal(ops(), EvalLimits::with_gas(100_000));
    match script.evaluate(ctx)? {
        Progress::Complete { value, .. } => Ok(value),
        Progress::HostCall { function, .. } => panic!("unexpected host call '{function}'"),
    }
}

fn run_compiled(json: &str) -> Result<Datum, ScriptError> {
    let registry = ops();
    let compiled = liana::compile(&ast(json), &registry)?;
    let mut ctx = ScriptContext::minimal(registry, EvalLimits::with_gas(100_000));
    let value = compiled.run(&mut ctx)?;
    Ok(ctx.heap().render_datum(value))
}

/// Runs the AST through both engines and checks they agree on the result.
fn both(json: &str) -> Datum {
    let interpreted = interpret(json).unwrap();
    let compiled = run_compiled(json).unwrap();
    assert_eq!(interpreted, compiled, "engines disagree on {json}");
    interpreted
}

#[test]
fn fibonacci_by_for_loop() {
    let json = r#"
    ["std.seq",
      ["std.let", "a", 0],
      ["std.let", "b", 1],
      ["std.for", "i", ["list.new", 1, 2, 3, 4, 5],
        ["std.seq",
          ["std.let", "tmp", ["+", ["std.var", "a"], ["std.var", "b"]]],
          ["std.set", "a", ["std.var", "b"]],
          ["std.set", "b", ["std.var", "tmp"]]]],
      ["std.var", "b"]]"#;
    assert_eq!(both(json), Datum::Num(8.0));
}

#[test]
fn break_in_while() {
    let json = r#"
    ["std.seq",
      ["std.let", "i", 0],
      ["std.while", true,
        ["std.seq",
          ["std.set", "i", ["+", ["std.var", "i"], 1]],
          ["std.if", [">", ["std.var", "i"], 3], ["std.break"]]]],
      ["std.var", "i"]]"#;
    assert_eq!(both(json), Datum::Num(4.0));
}

#[test]
fn closure_captured_counter() {
    let json = r#"
    ["std.seq",
      ["std.let", "make",
        ["std.lambda", [],
          ["std.seq",
            ["std.let", "c", 0],
            ["std.lambda", [],
              ["std.seq",
                ["std.set", "c", ["+", ["std.var", "c"], 1]],
                ["std.var", "c"]]]]]],
      ["std.let", "c1", ["std.apply", ["std.var", "make"]]],
      ["std.apply", ["std.var", "c1"]],
      ["std.apply", ["std.var", "c1"]],
      ["std.apply", ["std.var", "c1"]]]"#;
    assert_eq!(both(json), Datum::Num(3.0));
}

#[test]
fn counters_from_separate_applications_are_independent() {
    let json = r#"
    ["std.seq",
      ["std.let", "make",
        ["std.lambda", [],
          ["std.seq",
            ["std.let", "c", 0],
            ["std.lambda", [],
              ["std.seq",
                ["std.set", "c", ["+", ["std.var", "c"], 1]],
                ["std.var", "c"]]]]]],
      ["std.let", "c1", ["std.apply", ["std.var", "make"]]],
      ["std.let", "c2", ["std.apply", ["std.var", "make"]]],
      ["std.apply", ["std.var", "c1"]],
      ["std.apply", ["std.var", "c1"]],
      ["std.apply", ["std.var", "c2"]]]"#;
    assert_eq!(both(json), Datum::Num(1.0));
}

#[test]
fn try_catch_binds_error_message() {
    let json = r#"["std.try", ["std.throw", "oops"], "e", ["std.var", "e"]]"#;
    assert_eq!(both(json), Datum::str("oops"));
}

#[test]
fn compiling_a_reserved_literal_key_fails() {
    let json = r#"["obj.get", ["obj.new", ["x", 1]], "__proto__"]"#;
    let err = liana::compile(&ast(json), &ops()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DisallowedKey);
}

#[test]
fn dynamic_reserved_key_fails_at_runtime() {
    let json = r#"
    ["std.seq",
      ["std.let", "k", ["str.concat", "__", "proto", "__"]],
      ["obj.get", ["obj.new", ["x", 1]], ["std.var", "k"]]]"#;
    let err = interpret(json).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DisallowedKey);
    let err = run_compiled(json).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DisallowedKey);
}

#[test]
fn gas_bomb_terminates() {
    let script = Script::from_ast(ast(r#"["std.while", true, 1]"#));
    let ctx = ScriptContext::minimal(ops(), EvalLimits::with_gas(1_000));
    let err = script.evaluate(ctx).unwrap_err();
    assert_eq!(err.kind, ErrorKind::GasExhausted);
}

#[test]
fn gas_exhaustion_is_not_catchable() {
    let json = r#"["std.try", ["std.while", true, 1], "e", "caught"]"#;
    let script = Script::from_ast(ast(json));
    let ctx = ScriptContext::minimal(ops(), EvalLimits::with_gas(1_000));
    let err = script.evaluate(ctx).unwrap_err();
    assert_eq!(err.kind, ErrorKind::GasExhausted);
}

#[test]
fn chained_comparisons() {
    assert_eq!(both(r#"["<", 1, 2, 3]"#), Datum::Bool(true));
    assert_eq!(both(r#"["<", 1, 3, 2]"#), Datum::Bool(false));
    assert_eq!(both(r#"["<=", 1, 1, 2]"#), Datum::Bool(true));
    // Vacuous truth below two operands.
    assert_eq!(both(r#"["<", 1]"#), Datum::Bool(true));
    assert_eq!(both(r#"["<"]"#), Datum::Bool(true));
}

#[test]
fn let_in_nested_block_does_not_leak() {
    let json = r#"
    ["std.seq",
      ["std.let", "x", 1],
      ["std.seq", ["std.let", "x", 2]],
      ["std.var", "x"]]"#;
    assert_eq!(both(json), Datum::Num(1.0));
}

#[test]
fn set_updates_enclosing_scope_through_blocks() {
    let json = r#"
    ["std.seq",
      ["std.let", "x", 1],
      ["std.seq", ["std.set", "x", 5]],
      ["std.var", "x"]]"#;
    assert_eq!(both(json), Datum::Num(5.0));
}

#[test]
fn set_of_undefined_variable_fails() {
    let err = interpret(r#"["std.set", "ghost", 1]"#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedVariable);
    let err = run_compiled(r#"["std.set", "ghost", 1]"#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedVariable);
}

#[test]
fn loop_iteration_variables_do_not_alias() {
    // Each iteration's lambda captures its own `i` binding.
    let json = r#"
    ["std.seq",
      ["std.let", "fns", ["list.new"]],
      ["std.for", "i", ["list.new", 1, 2, 3],
        ["list.push", ["std.var", "fns"], ["std.lambda", [], ["std.var", "i"]]]],
      ["list.map", ["std.var", "fns"], ["std.lambda", ["f"], ["std.apply", ["std.var", "f"]]]]]"#;
    assert_eq!(
        both(json),
        Datum::list(vec![Datum::Num(1.0), Datum::Num(2.0), Datum::Num(3.0)])
    );
}

#[test]
fn signals_do_not_escape_their_construct() {
    let err = interpret(r#"["std.break"]"#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Custom);
    let err = interpret(r#"["std.return", 1]"#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Custom);
    // A signal raised inside try's body is not caught as an error.
    let json = r#"
    ["std.seq",
      ["std.let", "hits", 0],
      ["std.while", true,
        ["std.try",
          ["std.break"],
          "e",
          ["std.set", "hits", 99]]],
      ["std.var", "hits"]]"#;
    assert_eq!(both(json), Datum::Num(0.0));
}

#[test]
fn return_unwinds_only_to_the_nearest_lambda() {
    let json = r#"
    ["std.seq",
      ["std.let", "inner",
        ["std.lambda", [], ["std.seq", ["std.return", 1], 99]]],
      ["std.let", "outer",
        ["std.lambda", [],
          ["std.seq", ["std.apply", ["std.var", "inner"]], 2]]],
      ["std.apply", ["std.var", "outer"]]]"#;
    assert_eq!(both(json), Datum::Num(2.0));
}

#[test]
fn obj_get_missing_key_yields_default_then_null() {
    assert_eq!(both(r#"["obj.get", ["obj.new"], "k"]"#), Datum::Null);
    assert_eq!(both(r#"["obj.get", ["obj.new"], "k", 7]"#), Datum::Num(7.0));
    assert_eq!(both(r#"["obj.get", ["obj.new", ["k", 3]], "k", 7]"#), Datum::Num(3.0));
}

#[test]
fn random_rejects_inverted_bounds_and_honors_integrality() {
    let err = interpret(r#"["random", 5, 1]"#).unwrap_err();
    assert!(err.message.contains("min"));
    for _ in 0..20 {
        let value = interpret(r#"["random", 1, 6]"#).unwrap();
        let n = value.as_num().unwrap();
        assert!((1.0..=6.0).contains(&n));
        assert_eq!(n.fract(), 0.0);
    }
}

#[test]
fn time_offset_with_unknown_unit_fails() {
    let err = interpret(r#"["time.offset", 1, "fortnight", 0]"#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownUnit);
}

#[test]
fn time_offset_against_a_fixed_base() {
    let base = r#"["time.parse", "2025-03-01T00:00:00Z"]"#;
    let json = format!(r#"["time.format", ["time.offset", 2, "days", {base}]]"#);
    assert_eq!(both(&json), Datum::str("2025-03-03T00:00:00.000Z"));
}

#[test]
fn mutation_is_visible_through_shared_references() {
    let json = r#"
    ["std.seq",
      ["std.let", "a", ["list.new", 1]],
      ["std.let", "b", ["std.var", "a"]],
      ["list.push", ["std.var", "b"], 2],
      ["list.length", ["std.var", "a"]]]"#;
    assert_eq!(both(json), Datum::Num(2.0));
}

#[test]
fn unknown_opcode_reports_kind_and_trace() {
    let err = interpret(r#"["std.seq", ["no.such.op", 1]]"#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownOpcode);
    let err = liana::compile(&ast(r#"["no.such.op", 1]"#), &ops()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownOpcode);
}

#[test]
fn error_traces_name_the_failing_opcode() {
    let err = interpret(r#"["std.seq", ["+", 1, ["list.length", 5]]]"#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ArgumentType);
    assert_eq!(err.context.as_deref(), Some("list.length"));
    assert!(err.stack.iter().any(|frame| frame.op == "+"));
}

#[test]
fn argument_count_validation() {
    let err = interpret(r#"["math.abs"]"#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ArgumentCount);
    let err = interpret(r#"["math.abs", 1, 2]"#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ArgumentCount);
}

#[test]
fn entities_reach_the_script_through_accessors() {
    let caller = Datum::from_json_str(r#"{"id": 1, "name": "ash"}"#).unwrap();
    let this = Datum::from_json_str(r#"{"id": 2, "name": "elm"}"#).unwrap();
    let args = [Datum::Num(10.0), Datum::str("hi")];
    let ctx = ScriptContext::new(ops(), &caller, &this, &args, EvalLimits::default());
    let script = Script::from_ast(ast(
        r#"["list.new",
          ["obj.get", ["std.this"], "name"],
          ["obj.get", ["std.caller"], "name"],
          ["std.arg", 0],
          ["std.arg", 5]]"#,
    ));
    let value = script.evaluate(ctx).unwrap().into_complete().unwrap();
    assert_eq!(
        value,
        Datum::list(vec![Datum::str("elm"), Datum::str("ash"), Datum::Num(10.0), Datum::Null])
    );
}

#[test]
fn warnings_are_collected_independently_of_results() {
    let script = Script::from_ast(ast(r#"["std.seq", ["std.warn", "low", "health"], 42]"#));
    let ctx = ScriptContext::minimal(ops(), EvalLimits::default());
    match script.evaluate(ctx).unwrap() {
        Progress::Complete { value, warnings } => {
            assert_eq!(value, Datum::Num(42.0));
            assert_eq!(warnings, vec!["low health".to_owned()]);
        }
        Progress::HostCall { .. } => panic!("no host calls expected"),
    }
}

#[test]
fn quote_produces_raw_data() {
    assert_eq!(
        both(r#"["std.quote", ["std.var", "x"]]"#),
        Datum::list(vec![Datum::str("std.var"), Datum::str("x")])
    );
    assert_eq!(
        both(r#"["list.length", ["std.quote", [10, 20, 30]]]"#),
        Datum::Num(3.0)
    );
}

#[test]
fn surface_indexing_reaches_lists_through_obj_get() {
    assert_eq!(both(r#"["obj.get", ["list.new", 10, 20], 1]"#), Datum::Num(20.0));
    assert_eq!(both(r#"["obj.get", ["list.new", 10], 5]"#), Datum::Null);
    assert_eq!(both(r#"["obj.get", ["list.new", 10], 0.5]"#), Datum::Null);
}

#[test]
fn transpiled_scripts_evaluate() {
    let script = Script::transpile(
        "let xs = [1, 2, 3];\nlet doubled = list.map(xs, (n) => n * 2);\nxs[0] + doubled[2];",
    )
    .unwrap();
    let ctx = ScriptContext::minimal(ops(), EvalLimits::default());
    let value = script.evaluate(ctx).unwrap().into_complete().unwrap();
    assert_eq!(value, Datum::Num(7.0));
}

#[test]
fn json_stringify_and_parse() {
    assert_eq!(
        both(r#"["json.stringify", ["obj.new", ["a", 1], ["b", ["list.new", true, null]]]]"#),
        Datum::str(r#"{"a":1,"b":[true,null]}"#)
    );
    assert_eq!(
        both(r#"["obj.get", ["json.parse", "{\"x\": 5}"], "x"]"#),
        Datum::Num(5.0)
    );
    let err = interpret(r#"["json.stringify", ["std.lambda", [], 1]]"#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ArgumentType);
}

#[test]
fn typeof_names() {
    assert_eq!(
        both(
            r#"["list.new",
              ["std.typeof", null],
              ["std.typeof", true],
              ["std.typeof", 1],
              ["std.typeof", "s"],
              ["std.typeof", ["list.new"]],
              ["std.typeof", ["obj.new"]],
              ["std.typeof", ["std.lambda", [], 1]]]"#
        ),
        Datum::list(vec![
            Datum::str("null"),
            Datum::str("boolean"),
            Datum::str("number"),
            Datum::str("string"),
            Datum::str("list"),
            Datum::str("object"),
            Datum::str("lambda"),
        ])
    );
}

#[test]
fn arithmetic_folds_and_power_tower() {
    assert_eq!(both(r#"["-", 10, 1, 2]"#), Datum::Num(7.0));
    assert_eq!(both(r#"["^", 2, 3, 2]"#), Datum::Num(512.0));
    assert_eq!(both(r#"["%", -7, 3]"#), Datum::Num(-1.0));
}

#[test]
fn short_circuit_skips_effects() {
    let json = r#"
    ["std.seq",
      ["std.let", "hits", 0],
      ["and", false, ["std.set", "hits", 1]],
      ["or", true, ["std.set", "hits", 1]],
      ["std.var", "hits"]]"#;
    assert_eq!(both(json), Datum::Num(0.0));
}

#[test]
fn higher_order_list_ops() {
    let json = r#"
    ["std.seq",
      ["std.let", "xs", ["list.new", 3, 1, 2]],
      ["list.sort", ["std.var", "xs"]],
      ["list.map", ["std.var", "xs"], ["std.lambda", ["n"], ["*", ["std.var", "n"], 10]]]]"#;
    assert_eq!(
        both(json),
        Datum::list(vec![Datum::Num(10.0), Datum::Num(20.0), Datum::Num(30.0)])
    );
    assert_eq!(
        both(r#"["list.find", ["list.new", 1, 8, 3], ["std.lambda", ["n"], [">", ["std.var", "n"], 5]]]"#),
        Datum::Num(8.0)
    );
    assert_eq!(
        both(r#"["list.find", ["list.new", 1, 2], ["std.lambda", ["n"], [">", ["std.var", "n"], 5]]]"#),
        Datum::Null
    );
    assert_eq!(
        both(r#"["list.reduce", ["list.new", 1, 2, 3], ["std.lambda", ["acc", "n"], ["+", ["std.var", "acc"], ["std.var", "n"]]], 10]"#),
        Datum::Num(16.0)
    );
}

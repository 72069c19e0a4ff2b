//! Constant-folding tests: pure subtrees reduce, impure ones survive
//! untouched, and folding never changes observable results.

use std::sync::Arc;

use liana::{
    Datum, EvalLimits, FoldOutcome, OpRegistry, Progress, RecordingTracer, Script, ScriptContext, TraceEvent,
    optimize, optimize_with,
};
use pretty_assertions::assert_eq;

fn ast(json: &str) -> Datum {
    Datum::from_json_str(json).unwrap()
}

#[test]
fn arithmetic_folds_to_a_literal() {
    assert_eq!(optimize(&ast(r#"["+", 1, ["*", 2, 3]]"#)), Datum::Num(7.0));
}

#[test]
fn free_variables_block_folding_of_the_enclosing_tree() {
    assert_eq!(
        optimize(&ast(r#"["+", ["std.var", "x"], ["+", 1, 2]]"#)),
        ast(r#"["+", ["std.var", "x"], 3]"#)
    );
}

#[test]
fn locally_introduced_variables_keep_a_subtree_pure() {
    assert_eq!(
        optimize(&ast(r#"["std.seq", ["std.let", "x", 2], ["+", ["std.var", "x"], 3]]"#)),
        Datum::Num(5.0)
    );
    // `set` of a name bound within the subtree is pure too.
    assert_eq!(
        optimize(&ast(
            r#"["std.seq",
              ["std.let", "x", 1],
              ["std.set", "x", ["+", ["std.var", "x"], 1]],
              ["std.var", "x"]]"#
        )),
        Datum::Num(2.0)
    );
    // ...but `set` of an outer name is not.
    let impure = ast(r#"["std.set", "x", ["+", 1, 1]]"#);
    assert_eq!(optimize(&impure), ast(r#"["std.set", "x", 2]"#));
}

#[test]
fn compound_results_are_requoted() {
    assert_eq!(
        optimize(&ast(r#"["list.new", 1, ["+", 1, 1]]"#)),
        ast(r#"["std.quote", [1, 2]]"#)
    );
    assert_eq!(
        optimize(&ast(r#"["str.concat", "a", "b"]"#)),
        Datum::str("ab")
    );
}

#[test]
fn value_constructor_heads_are_not_folded_at_top_level() {
    let mut tracer = RecordingTracer::new();
    assert_eq!(
        optimize_with(&ast(r#"["obj.new", ["x", ["+", 1, 2]]]"#), &mut tracer),
        ast(r#"["obj.new", ["x", 3]]"#)
    );
    assert!(tracer.events.contains(&TraceEvent::Fold {
        op: "obj.new".into(),
        outcome: FoldOutcome::Skipped
    }));

    let quoted = ast(r#"["std.quote", ["std.var", "x"]]"#);
    assert_eq!(optimize(&quoted), quoted);
}

#[test]
fn lambda_bodies_are_reduced_but_lambdas_survive() {
    assert_eq!(
        optimize(&ast(r#"["std.lambda", ["n"], ["+", ["std.var", "n"], ["+", 1, 2]]]"#)),
        ast(r#"["std.lambda", ["n"], ["+", ["std.var", "n"], 3]]"#)
    );
}

#[test]
fn fold_failure_keeps_the_original_subtree() {
    // Pure by the registry, but evaluation never terminates: the fold hits
    // its gas ceiling and the loop survives verbatim.
    let bomb = ast(r#"["std.while", true, 1]"#);
    let mut tracer = RecordingTracer::new();
    assert_eq!(optimize_with(&bomb, &mut tracer), bomb);
    assert!(tracer.events.contains(&TraceEvent::Fold {
        op: "std.while".into(),
        outcome: FoldOutcome::Failed
    }));
}

#[test]
fn context_dependent_ops_never_fold() {
    let roll = ast(r#"["random", 1, 6]"#);
    assert_eq!(optimize(&roll), roll);
    let now = ast(r#"["time.now"]"#);
    assert_eq!(optimize(&now), now);
    let this = ast(r#"["obj.get", ["std.this"], "hp"]"#);
    assert_eq!(optimize(&this), this);
}

#[test]
fn optimization_preserves_results() {
    let cases = [
        r#"["std.seq", ["std.let", "a", 1], ["+", ["std.var", "a"], ["*", 2, ["+", 3, 4]]]]"#,
        r#"["list.join", ["list.map", ["list.new", 1, 2, 3], ["std.lambda", ["n"], ["*", ["std.var", "n"], 2]]], "-"]"#,
        r#"["std.if", ["<", 1, 2, 3], ["str.concat", "a", "b"], "no"]"#,
        r#"["json.parse", ["json.stringify", ["obj.new", ["k", ["list.new", 1, 2]]]]]"#,
    ];
    let ops = Arc::new(OpRegistry::standard());
    for case in cases {
        let original = ast(case);
        let reduced = optimize(&original);
        let run = |tree: &Datum| -> Datum {
            let script = Script::from_ast(tree.clone());
            let ctx = ScriptContext::minimal(Arc::clone(&ops), EvalLimits::default());
            match script.evaluate(ctx).unwrap() {
                Progress::Complete { value, .. } => value,
                Progress::HostCall { .. } => panic!("no host calls in pure cases"),
            }
        };
        assert_eq!(run(&original), run(&reduced), "optimizing changed the result of {case}");
    }
}

//! Host-registered opcodes and suspension: a suspending opcode unwinds to
//! the host, the host answers, and the script replays deterministically up
//! to the next unanswered call.

use std::sync::{Arc, Mutex};

use liana::{
    Datum, EvalLimits, OpDef, OpHandler, OpLayout, OpMeta, OpRegistry, Progress, Script, ScriptContext, Unwind, param,
};
use pretty_assertions::assert_eq;

/// A strict host opcode that fetches a value from the embedding process.
fn fetch_def() -> OpDef {
    OpDef {
        meta: OpMeta {
            name: "world.fetch".into(),
            category: "world".into(),
            description: "Asks the host for a value.".into(),
            layout: OpLayout::Standard,
            slots: None,
            parameters: vec![param("key", "any")],
            generic_parameters: vec![],
            return_type: "any".into(),
            lazy: false,
        },
        handler: OpHandler::Strict(Arc::new(|args, ctx| {
            let rendered: Vec<Datum> = args.iter().map(|arg| ctx.heap().render_datum(*arg)).collect();
            ctx.host_call("world.fetch", rendered)
        })),
    }
}

fn world_ops() -> Arc<OpRegistry> {
    let mut registry = OpRegistry::standard();
    registry.install(vec![fetch_def()]);
    Arc::new(registry)
}

fn ast(json: &str) -> Datum {
    Datum::from_json_str(json).unwrap()
}

#[test]
fn two_host_calls_resume_in_order() {
    let script = Script::from_ast(ast(r#"["+", ["world.fetch", 1], ["world.fetch", 2]]"#));
    let ctx = ScriptContext::minimal(world_ops(), EvalLimits::default());

    let progress = script.evaluate(ctx).unwrap();
    let Progress::HostCall { function, args, call_id, state } = progress else {
        panic!("expected a host call");
    };
    assert_eq!(function, "world.fetch");
    assert_eq!(args, vec![Datum::Num(1.0)]);
    assert_eq!(call_id, 0);

    let progress = state.resume(Datum::Num(10.0)).unwrap();
    let Progress::HostCall { args, call_id, state, .. } = progress else {
        panic!("expected a second host call");
    };
    assert_eq!(args, vec![Datum::Num(2.0)]);
    assert_eq!(call_id, 1);

    let progress = state.resume(Datum::Num(20.0)).unwrap();
    assert_eq!(progress.into_complete(), Some(Datum::Num(30.0)));
}

#[test]
fn host_calls_inside_loops() {
    // Each iteration issues a fresh call ordinal.
    let script = Script::from_ast(ast(
        r#"["std.seq",
          ["std.let", "sum", 0],
          ["std.for", "i", ["list.new", 1, 2, 3],
            ["std.set", "sum", ["+", ["std.var", "sum"], ["world.fetch", ["std.var", "i"]]]]],
          ["std.var", "sum"]]"#,
    ));
    let ctx = ScriptContext::minimal(world_ops(), EvalLimits::default());
    let mut progress = script.evaluate(ctx).unwrap();
    loop {
        match progress {
            Progress::Complete { value, .. } => {
                assert_eq!(value, Datum::Num(60.0));
                return;
            }
            Progress::HostCall { args, state, .. } => {
                let key = args[0].as_num().unwrap();
                progress = state.resume(Datum::Num(key * 10.0)).unwrap();
            }
        }
    }
}

#[test]
fn sends_are_not_duplicated_across_replays() {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&sent);
    let script = Script::from_ast(ast(
        r#"["std.seq",
          ["send", "say", "before"],
          ["std.let", "x", ["world.fetch", 1]],
          ["send", "say", "after"],
          ["std.var", "x"]]"#,
    ));
    let ctx = ScriptContext::minimal(world_ops(), EvalLimits::default()).with_send(Box::new(move |channel, payload| {
        sink.lock().unwrap().push(format!("{channel}:{payload}"));
    }));

    let progress = script.evaluate(ctx).unwrap();
    let Progress::HostCall { state, .. } = progress else {
        panic!("expected a host call");
    };
    assert_eq!(sent.lock().unwrap().as_slice(), ["say:\"before\""]);

    let progress = state.resume(Datum::Num(7.0)).unwrap();
    assert_eq!(progress.into_complete(), Some(Datum::Num(7.0)));
    assert_eq!(sent.lock().unwrap().as_slice(), ["say:\"before\"", "say:\"after\""]);
}

#[test]
fn warnings_are_not_duplicated_across_replays() {
    let script = Script::from_ast(ast(
        r#"["std.seq",
          ["std.warn", "heads up"],
          ["world.fetch", 1]]"#,
    ));
    let ctx = ScriptContext::minimal(world_ops(), EvalLimits::default());
    let Progress::HostCall { state, .. } = script.evaluate(ctx).unwrap() else {
        panic!("expected a host call");
    };
    match state.resume(Datum::str("ok")).unwrap() {
        Progress::Complete { value, warnings } => {
            assert_eq!(value, Datum::str("ok"));
            assert_eq!(warnings, vec!["heads up".to_owned()]);
        }
        Progress::HostCall { .. } => panic!("expected completion"),
    }
}

#[test]
fn compiled_scripts_suspend_through_the_same_mechanism() {
    let registry = world_ops();
    let compiled = liana::compile(
        &ast(r#"["+", ["world.fetch", 1], ["world.fetch", 2]]"#),
        &registry,
    )
    .unwrap();
    let mut ctx = ScriptContext::minimal(registry, EvalLimits::default());

    let mut answers = vec![Datum::Num(20.0), Datum::Num(10.0)];
    loop {
        match compiled.call(&mut ctx) {
            Ok(value) => {
                assert_eq!(ctx.heap().render_datum(value), Datum::Num(30.0));
                return;
            }
            Err(Unwind::HostCall(call)) => {
                assert_eq!(call.function, "world.fetch");
                ctx.answer_host_call(answers.pop().expect("two calls"));
            }
            Err(other) => panic!("unexpected unwind: {other:?}"),
        }
    }
}

#[test]
fn replay_restores_the_gas_budget() {
    // The replayed prefix does not pay for gas twice.
    let script = Script::from_ast(ast(
        r#"["std.seq",
          ["std.for", "i", ["list.new", 1, 2, 3, 4, 5], ["std.var", "i"]],
          ["world.fetch", 1]]"#,
    ));
    let ctx = ScriptContext::minimal(world_ops(), EvalLimits::with_gas(200));
    let Progress::HostCall { state, .. } = script.evaluate(ctx).unwrap() else {
        panic!("expected a host call");
    };
    let progress = state.resume(Datum::Bool(true)).unwrap();
    assert_eq!(progress.into_complete(), Some(Datum::Bool(true)));
}

//! The `std.*` opcodes: control flow, scope, lambdas, and context accessors.
//!
//! The control-flow forms here are the reference semantics; the compiler
//! emits specialized code for the same behavior. All of them are lazy —
//! their handlers receive raw sub-ASTs and evaluate only the slots they
//! choose to run.

use crate::{
    context::ScriptContext,
    datum::Datum,
    error::{EvalResult, ScriptError, Unwind},
    heap::{HeapData, Lambda},
    interp::{call_lambda, evaluate},
    ops::{lazy_op, opt_param, param, strict_op, variadic},
    registry::{OpDef, OpMeta},
    value::Value,
};

const CAT: &str = "core";

pub fn core_lib() -> Vec<OpDef> {
    vec![
        lazy_op(
            OpMeta::op("std.seq", CAT, "Evaluates expressions in order inside a new scope; the result is the last.")
                .control_flow()
                .lazy()
                .params(vec![variadic("body", "any[]")]),
            seq,
        ),
        lazy_op(
            OpMeta::op("std.if", CAT, "Evaluates the matching branch in its own scope.")
                .control_flow()
                .lazy()
                .params(vec![param("condition", "any"), param("then", "any"), opt_param("else", "any")]),
            if_op,
        ),
        lazy_op(
            OpMeta::op("std.while", CAT, "Loops the body while the condition is truthy.")
                .control_flow()
                .lazy()
                .params(vec![param("condition", "any"), param("body", "any")])
                .returns("null"),
            while_op,
        ),
        lazy_op(
            OpMeta::op("std.for", CAT, "Binds each list element to a name and evaluates the body.")
                .control_flow()
                .lazy()
                .params(vec![param("name", "string"), param("list", "any[]"), param("body", "any")])
                .returns("null"),
            for_op,
        ),
        lazy_op(
            OpMeta::op("std.let", CAT, "Declares a binding in the innermost scope.")
                .lazy()
                .params(vec![param("name", "string"), param("value", "any")]),
            let_op,
        ),
        lazy_op(
            OpMeta::op("std.set", CAT, "Updates the nearest existing binding.")
                .lazy()
                .params(vec![param("name", "string"), param("value", "any")]),
            set_op,
        ),
        lazy_op(
            OpMeta::op("std.var", CAT, "Reads a variable through the scope chain.")
                .lazy()
                .params(vec![param("name", "string")]),
            var_op,
        ),
        strict_op(
            OpMeta::op("std.break", CAT, "Aborts the nearest enclosing loop.").control_flow(),
            |_, _| Err(Unwind::Break),
        ),
        strict_op(
            OpMeta::op("std.continue", CAT, "Skips to the next loop iteration.").control_flow(),
            |_, _| Err(Unwind::Continue),
        ),
        strict_op(
            OpMeta::op("std.return", CAT, "Returns from the nearest lambda body.")
                .control_flow()
                .params(vec![opt_param("value", "any")]),
            |args, _| Err(Unwind::Return(args.first().copied().unwrap_or(Value::Null))),
        ),
        lazy_op(
            OpMeta::op("std.try", CAT, "Evaluates the body; a catchable error binds its message and runs the handler.")
                .control_flow()
                .lazy()
                .params(vec![param("body", "any"), param("error", "string"), param("catch", "any")]),
            try_op,
        ),
        strict_op(
            OpMeta::op("std.throw", CAT, "Raises a script error with the given message.")
                .params(vec![param("message", "any")])
                .returns("never"),
            |args, ctx| Err(ScriptError::user_throw(args[0].render(ctx.heap())).into()),
        ),
        lazy_op(
            OpMeta::op("std.lambda", CAT, "Creates a lambda capturing the current scope chain.")
                .lazy()
                .params(vec![param("params", "string[]"), param("body", "any")])
                .returns("lambda"),
            lambda_op,
        ),
        lazy_op(
            OpMeta::op("std.quote", CAT, "Produces the raw argument as a value, unevaluated.")
                .lazy()
                .params(vec![param("value", "any")]),
            |raw, ctx| ctx.load_datum(&raw[0]),
        ),
        strict_op(
            OpMeta::op("std.apply", CAT, "Invokes a lambda with the given arguments.")
                .params(vec![param("target", "lambda"), variadic("args", "any[]")]),
            |args, ctx| call_lambda(args[0], &args[1..], ctx, "std.apply"),
        ),
        lazy_op(
            OpMeta::op("and", CAT, "Logical conjunction with short-circuit evaluation.")
                .infix()
                .lazy()
                .params(vec![variadic("operands", "any[]")])
                .returns("boolean"),
            and_op,
        ),
        lazy_op(
            OpMeta::op("or", CAT, "Logical disjunction with short-circuit evaluation.")
                .infix()
                .lazy()
                .params(vec![variadic("operands", "any[]")])
                .returns("boolean"),
            or_op,
        ),
        strict_op(
            OpMeta::op("not", CAT, "Logical negation.")
                .primitive()
                .params(vec![param("value", "any")])
                .returns("boolean"),
            not_op,
        ),
        strict_op(
            OpMeta::op("std.typeof", CAT, "Names the runtime type of a value.")
                .params(vec![param("value", "any")])
                .returns("string"),
            typeof_op,
        ),
        strict_op(
            OpMeta::op("std.this", CAT, "The entity this verb is attached to.").returns("Entity"),
            this_op,
        ),
        strict_op(
            OpMeta::op("std.caller", CAT, "The entity that invoked this verb.").returns("Entity"),
            caller_op,
        ),
        strict_op(
            OpMeta::op("std.arg", CAT, "One invocation argument by position.")
                .params(vec![param("index", "number")]),
            arg_op,
        ),
        strict_op(
            OpMeta::op("std.args", CAT, "All invocation arguments as a list.").returns("any[]"),
            args_op,
        ),
        strict_op(
            OpMeta::op("std.warn", CAT, "Appends a warning to the invocation's warning sink.")
                .params(vec![variadic("message", "any[]")])
                .returns("null"),
            warn_op,
        ),
        strict_op(
            OpMeta::op("std.log", CAT, "Logs its arguments and passes the last one through.")
                .params(vec![variadic("values", "any[]")]),
            log_op,
        ),
        strict_op(
            OpMeta::op("send", CAT, "Dispatches a message on the context's outbound channel.")
                .params(vec![param("channel", "string"), param("value", "any")])
                .returns("null"),
            send_op,
        ),
    ]
}

fn render_joined(args: &[Value], ctx: &ScriptContext) -> String {
    args.iter()
        .map(|arg| arg.render(ctx.heap()))
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn not_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    Ok(Value::Bool(!args[0].truthy(ctx.heap())))
}

pub(crate) fn typeof_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let name = args[0].type_name(ctx.heap());
    ctx.alloc_str(name)
}

pub(crate) fn this_op(_args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    Ok(ctx.this_entity())
}

pub(crate) fn caller_op(_args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    Ok(ctx.caller())
}

pub(crate) fn arg_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let Some(index) = args[0].as_num() else {
        return Err(ScriptError::argument_type("std.arg", "index must be a number").into());
    };
    if index < 0.0 || index.fract() != 0.0 {
        return Ok(Value::Null);
    }
    Ok(ctx.script_args().get(index as usize).copied().unwrap_or(Value::Null))
}

pub(crate) fn args_op(_args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let args = ctx.script_args().to_vec();
    ctx.alloc_list(args)
}

pub(crate) fn warn_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let message = render_joined(&args, ctx);
    ctx.warn(message);
    Ok(Value::Null)
}

pub(crate) fn log_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let message = render_joined(&args, ctx);
    ctx.log(&message);
    Ok(args.last().copied().unwrap_or(Value::Null))
}

fn seq(raw: &[Datum], ctx: &mut ScriptContext) -> EvalResult<Value> {
    let snapshot = ctx.save_scope();
    let mut last = Ok(Value::Null);
    for node in raw {
        last = evaluate(node, ctx);
        if last.is_err() {
            break;
        }
    }
    ctx.restore_scope(snapshot);
    last
}

fn if_op(raw: &[Datum], ctx: &mut ScriptContext) -> EvalResult<Value> {
    let condition = evaluate(&raw[0], ctx)?;
    let branch = if condition.truthy(ctx.heap()) {
        Some(&raw[1])
    } else {
        raw.get(2)
    };
    let Some(branch) = branch else {
        return Ok(Value::Null);
    };
    let snapshot = ctx.save_scope();
    let result = evaluate(branch, ctx);
    ctx.restore_scope(snapshot);
    result
}

fn while_op(raw: &[Datum], ctx: &mut ScriptContext) -> EvalResult<Value> {
    loop {
        let condition = evaluate(&raw[0], ctx)?;
        if !condition.truthy(ctx.heap()) {
            return Ok(Value::Null);
        }
        let snapshot = ctx.save_scope();
        let result = evaluate(&raw[1], ctx);
        ctx.restore_scope(snapshot);
        match result {
            Ok(_) | Err(Unwind::Continue) => {}
            Err(Unwind::Break) => return Ok(Value::Null),
            Err(other) => return Err(other),
        }
    }
}

fn for_op(raw: &[Datum], ctx: &mut ScriptContext) -> EvalResult<Value> {
    let Some(name) = raw[0].as_str() else {
        return Err(ScriptError::argument_type("std.for", "first slot must be a variable name").into());
    };
    let list = evaluate(&raw[1], ctx)?;
    let Some(list_id) = list.as_list_id(ctx.heap()) else {
        return Err(ScriptError::argument_type(
            "std.for",
            format!("expected a list to iterate, got {}", list.type_name(ctx.heap())),
        )
        .into());
    };
    // Snapshot the elements so mutation inside the body can't skew iteration.
    let items = match ctx.heap().get(list_id) {
        HeapData::List(items) => items.clone(),
        _ => unreachable!("checked by as_list_id"),
    };
    for item in items {
        let snapshot = ctx.save_scope();
        let result = ctx.declare(name, item).and_then(|()| evaluate(&raw[2], ctx));
        ctx.restore_scope(snapshot);
        match result {
            Ok(_) | Err(Unwind::Continue) => {}
            Err(Unwind::Break) => break,
            Err(other) => return Err(other),
        }
    }
    Ok(Value::Null)
}

fn let_op(raw: &[Datum], ctx: &mut ScriptContext) -> EvalResult<Value> {
    let Some(name) = raw[0].as_str() else {
        return Err(ScriptError::argument_type("std.let", "first slot must be a variable name").into());
    };
    let value = evaluate(&raw[1], ctx)?;
    ctx.declare(name, value)?;
    Ok(value)
}

fn set_op(raw: &[Datum], ctx: &mut ScriptContext) -> EvalResult<Value> {
    let Some(name) = raw[0].as_str() else {
        return Err(ScriptError::argument_type("std.set", "first slot must be a variable name").into());
    };
    let value = evaluate(&raw[1], ctx)?;
    ctx.assign(name, value)?;
    Ok(value)
}

fn var_op(raw: &[Datum], ctx: &mut ScriptContext) -> EvalResult<Value> {
    let Some(name) = raw[0].as_str() else {
        return Err(ScriptError::argument_type("std.var", "first slot must be a variable name").into());
    };
    Ok(ctx.lookup(name))
}

fn try_op(raw: &[Datum], ctx: &mut ScriptContext) -> EvalResult<Value> {
    match evaluate(&raw[0], ctx) {
        Ok(value) => Ok(value),
        Err(Unwind::Error(err)) if err.is_catchable() => {
            let Some(name) = raw[1].as_str() else {
                return Err(ScriptError::argument_type("std.try", "second slot must be a variable name").into());
            };
            let snapshot = ctx.save_scope();
            let message = ctx.alloc_str(err.message.clone());
            let result = message.and_then(|message| {
                ctx.declare(name, message)?;
                evaluate(&raw[2], ctx)
            });
            ctx.restore_scope(snapshot);
            result
        }
        // Signals, host calls, and uncatchable errors pass through.
        Err(other) => Err(other),
    }
}

fn lambda_op(raw: &[Datum], ctx: &mut ScriptContext) -> EvalResult<Value> {
    let params = parse_params(&raw[0])
        .ok_or_else(|| ScriptError::argument_type("std.lambda", "first slot must be a list of parameter names"))?;
    let lambda = Lambda {
        params,
        body: raw[1].clone(),
        closure: ctx.vars.clone(),
        execute: None,
    };
    ctx.alloc_lambda(lambda)
}

/// Parses a raw parameter list: a list of strings.
pub(crate) fn parse_params(raw: &Datum) -> Option<Vec<String>> {
    let Datum::List(items) = raw else { return None };
    items
        .iter()
        .map(|item| item.as_str().map(str::to_owned))
        .collect()
}

fn and_op(raw: &[Datum], ctx: &mut ScriptContext) -> EvalResult<Value> {
    for node in raw {
        let value = evaluate(node, ctx)?;
        if !value.truthy(ctx.heap()) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn or_op(raw: &[Datum], ctx: &mut ScriptContext) -> EvalResult<Value> {
    for node in raw {
        let value = evaluate(node, ctx)?;
        if value.truthy(ctx.heap()) {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

pub(crate) fn send_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let Some(channel) = args[0].as_str(ctx.heap()).map(str::to_owned) else {
        return Err(ScriptError::argument_type("send", "channel must be a string").into());
    };
    let payload = ctx.heap().render_datum(args[1]);
    ctx.dispatch_send(&channel, &payload);
    Ok(Value::Null)
}

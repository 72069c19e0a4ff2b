//! The interpreter: a stack machine over s-expression nodes.
//!
//! Strict argument evaluation is non-recursive — an explicit frame stack
//! holds one frame per active opcode call, which keeps adversarial nesting
//! off the host stack and gives the loop a single place to charge gas.
//!
//! Lazy opcodes are the exception by design: their handlers receive the raw
//! sub-ASTs and call [`evaluate`] themselves for the slots they choose to
//! run. That re-entry is bounded by the context's depth limit.

use smallvec::SmallVec;

use crate::{
    context::ScriptContext,
    datum::Datum,
    error::{EvalResult, ScriptError, TraceFrame, Unwind},
    heap::HeapData,
    registry::{OpDef, OpHandler, validate_args, validate_count},
    value::Value,
};

/// One strict call being evaluated: the expression, a cursor into it, and
/// the arguments evaluated so far.
struct Frame<'a> {
    op: &'a str,
    def: std::sync::Arc<OpDef>,
    items: &'a [Datum],
    cursor: usize,
    args: SmallVec<[Value; 4]>,
}

/// Evaluates an AST node in the given context.
///
/// This is the re-entry point lazy handlers use; each entry counts against
/// the context's depth limit.
pub fn evaluate(node: &Datum, ctx: &mut ScriptContext) -> EvalResult<Value> {
    if ctx.depth >= ctx.max_depth() {
        return Err(ScriptError::custom("maximum evaluation depth exceeded").into());
    }
    ctx.depth += 1;
    let result = eval_loop(node, ctx);
    ctx.depth -= 1;
    result
}

fn eval_loop<'a>(root: &'a Datum, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let mut frames: Vec<Frame<'a>> = Vec::new();
    let mut pending: Option<&'a Datum> = Some(root);
    let mut incoming: Option<Value> = None;

    loop {
        if let Err(unwind) = ctx.step_gas() {
            return Err(annotate(unwind, &frames, ctx));
        }

        // Descend into the next node, if one is queued.
        if let Some(node) = pending.take() {
            match node {
                Datum::Null => incoming = Some(Value::Null),
                Datum::Bool(b) => incoming = Some(Value::Bool(*b)),
                Datum::Num(n) => incoming = Some(Value::Num(*n)),
                Datum::Str(s) => {
                    let value = ctx.alloc_str(s.as_ref()).map_err(|u| annotate(u, &frames, ctx))?;
                    incoming = Some(value);
                }
                Datum::Map(_) => {
                    let err = ScriptError::custom("raw object outside of a lazy argument slot");
                    return Err(annotate(err.into(), &frames, ctx));
                }
                Datum::List(items) => {
                    let Some((op, raw_args)) = node.as_call() else {
                        let err = ScriptError::custom("expression head must be an opcode name");
                        return Err(annotate(err.into(), &frames, ctx));
                    };
                    let def = match ctx.ops().get(op) {
                        Ok(def) => std::sync::Arc::clone(def),
                        Err(err) => return Err(annotate(err.into(), &frames, ctx)),
                    };
                    if def.meta.lazy {
                        // Raw sub-ASTs go straight to the handler.
                        let value = invoke_lazy(&def, raw_args, ctx).map_err(|u| annotate(u, &frames, ctx))?;
                        incoming = Some(value);
                    } else {
                        frames.push(Frame {
                            op,
                            def,
                            items: items.as_ref(),
                            cursor: 1,
                            args: SmallVec::new(),
                        });
                    }
                }
            }
        }

        // Feed a produced value to the parent frame, or finish.
        if let Some(value) = incoming.take() {
            match frames.last_mut() {
                None => return Ok(value),
                Some(frame) => frame.args.push(value),
            }
        }

        // Advance the top frame: evaluate its next argument, or pop and
        // invoke its handler.
        let Some(top) = frames.last_mut() else {
            // Root was a strict call that just completed, or a literal that
            // already returned above.
            unreachable!("frame stack drained without returning");
        };
        if top.cursor < top.items.len() {
            pending = Some(&top.items[top.cursor]);
            top.cursor += 1;
        } else {
            let frame = frames.pop().expect("frame stack is non-empty");
            // Values are Copy, so keeping the frame's argument vector for
            // error rendering costs a memcpy.
            let args = frame.args.to_vec();
            let value = invoke_strict(&frame.def, args, ctx).map_err(|u| annotate_with(u, &frame, &frames, ctx))?;
            incoming = Some(value);
        }
    }
}

/// Invokes a strict handler, validating declared parameters first. Also the
/// dispatch path compiled code uses for non-specialized opcodes.
pub(crate) fn invoke_strict(def: &OpDef, args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    ctx.tracer_mut().on_op(&def.meta.name);
    if !def.meta.parameters.is_empty() {
        // Arity bounds are structural and always hold; per-slot types are
        // the toggleable part.
        if ctx.validate_types() {
            validate_args(&def.meta, &args, ctx.heap())?;
        } else {
            validate_count(&def.meta, args.len())?;
        }
    }
    match &def.handler {
        OpHandler::Strict(handler) => handler(args, ctx),
        OpHandler::Lazy(_) => Err(ScriptError::custom(format!(
            "opcode '{}' is lazy but was dispatched strictly",
            def.meta.name
        ))
        .into()),
    }
}

/// Invokes a lazy handler with raw sub-ASTs. Only the arity can be checked;
/// the slots hold unevaluated trees.
pub(crate) fn invoke_lazy(def: &OpDef, raw_args: &[Datum], ctx: &mut ScriptContext) -> EvalResult<Value> {
    ctx.tracer_mut().on_op(&def.meta.name);
    if !def.meta.parameters.is_empty() {
        validate_count(&def.meta, raw_args.len())?;
    }
    match &def.handler {
        OpHandler::Lazy(handler) => handler(raw_args, ctx),
        OpHandler::Strict(_) => Err(ScriptError::custom(format!(
            "opcode '{}' is strict but was dispatched lazily",
            def.meta.name
        ))
        .into()),
    }
}

/// Applies a lambda value to evaluated arguments.
///
/// The lambda body runs against its captured closure chain with a fresh
/// innermost scope holding the parameters; a `Return` signal unwinding out
/// of the body becomes the call's value. Shared by `std.apply`, the
/// list/object higher-order ops, and compiled code.
pub fn call_lambda(callee: Value, args: &[Value], ctx: &mut ScriptContext, op: &str) -> EvalResult<Value> {
    let Some(lambda_id) = callee.as_lambda_id(ctx.heap()) else {
        return Err(ScriptError::argument_type(
            op,
            format!("expected a lambda, got {}", callee.type_name(ctx.heap())),
        )
        .into());
    };
    let lambda = match ctx.heap().get(lambda_id) {
        HeapData::Lambda(lambda) => lambda.clone(),
        _ => unreachable!("checked by as_lambda_id"),
    };

    if ctx.depth >= ctx.max_depth() {
        return Err(ScriptError::custom("maximum evaluation depth exceeded").into());
    }
    ctx.depth += 1;

    let rendered: Vec<String> = args.iter().map(|arg| arg.repr(ctx.heap())).collect();
    ctx.stack.push(TraceFrame::new("lambda", rendered));

    let saved = ctx.vars.snapshot(ctx.cow);
    ctx.vars = lambda.closure.clone();
    ctx.cow = false;
    // The parameter frame is an arena allocation and is metered like one.
    if let Err(unwind) = ctx.charge_gas(1) {
        ctx.cow = ctx.vars.restore(saved);
        ctx.stack.pop();
        ctx.depth -= 1;
        return Err(unwind);
    }
    let (vars, heap) = ctx.scope_parts();
    vars.push_frame(heap);
    for (index, param) in lambda.params.iter().enumerate() {
        let value = args.get(index).copied().unwrap_or(Value::Null);
        vars.declare(param, value, heap);
    }

    let result = match &lambda.execute {
        Some(compiled) => compiled(ctx),
        None => evaluate(&lambda.body, ctx),
    };

    ctx.cow = ctx.vars.restore(saved);
    ctx.stack.pop();
    ctx.depth -= 1;

    match result {
        Err(Unwind::Return(value)) => Ok(value),
        other => other,
    }
}

/// Attaches the current frame trace to an error the first time it crosses
/// the machine. Signals and host calls pass untouched.
fn annotate(unwind: Unwind, frames: &[Frame<'_>], ctx: &ScriptContext) -> Unwind {
    match unwind {
        Unwind::Error(mut err) => {
            err.fill_trace(trace_of(frames, None, ctx));
            Unwind::Error(err)
        }
        other => other,
    }
}

/// Like [`annotate`], with the just-popped frame as the innermost entry.
fn annotate_with(unwind: Unwind, current: &Frame<'_>, frames: &[Frame<'_>], ctx: &ScriptContext) -> Unwind {
    match unwind {
        Unwind::Error(mut err) => {
            err.fill_trace(trace_of(frames, Some(current), ctx));
            Unwind::Error(err)
        }
        other => other,
    }
}

fn trace_of(frames: &[Frame<'_>], current: Option<&Frame<'_>>, ctx: &ScriptContext) -> Vec<TraceFrame> {
    let mut trace = Vec::with_capacity(frames.len() + ctx.stack.len() + 1);
    if let Some(frame) = current {
        trace.push(frame_entry(frame, ctx));
    }
    trace.extend(frames.iter().rev().map(|frame| frame_entry(frame, ctx)));
    trace.extend(ctx.stack.iter().rev().cloned());
    trace
}

fn frame_entry(frame: &Frame<'_>, ctx: &ScriptContext) -> TraceFrame {
    let args = frame.args.iter().map(|arg| arg.repr(ctx.heap())).collect();
    TraceFrame::new(frame.op, args)
}

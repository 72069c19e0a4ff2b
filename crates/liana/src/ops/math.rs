//! Arithmetic, comparison, `math.*`, and `random`.
//!
//! Arithmetic folds left-to-right over two or more numbers; `^` folds
//! right-to-left, producing a power tower. Orderings with three or more
//! arguments chain pairwise; zero or one argument is vacuously true.
//!
//! The `math.*` handlers are named functions so the compiler can bind them
//! directly; arithmetic and comparison compile to native folds and chains,
//! so only the registry path uses the generated handlers here.

use std::cmp::Ordering;

use rand::Rng as _;

use crate::{
    context::ScriptContext,
    error::{EvalResult, ScriptError},
    heap::Heap,
    ops::{param, strict_op, variadic},
    registry::{OpDef, OpMeta, ParamSpec},
    value::Value,
};

const CAT: &str = "math";

pub fn math_lib() -> Vec<OpDef> {
    vec![
        fold_op("+", "Sum of its operands.", |acc, n| acc + n),
        fold_op("-", "Left-to-right difference.", |acc, n| acc - n),
        fold_op("*", "Product of its operands.", |acc, n| acc * n),
        fold_op("/", "Left-to-right quotient.", |acc, n| acc / n),
        fold_op("%", "Left-to-right remainder, sign following the dividend.", |acc, n| acc % n),
        strict_op(
            OpMeta::op("^", CAT, "Exponentiation, right associative.")
                .infix()
                .params(numeric_fold_params())
                .returns("number"),
            |args, ctx| {
                let nums = numbers("^", &args, ctx.heap())?;
                Ok(Value::Num(power_tower(&nums)))
            },
        ),
        strict_op(
            OpMeta::op("==", CAT, "Strict equality.")
                .infix()
                .params(vec![param("a", "any"), param("b", "any")])
                .returns("boolean"),
            |args, ctx| Ok(Value::Bool(args[0].eq_in(&args[1], ctx.heap()))),
        ),
        strict_op(
            OpMeta::op("!=", CAT, "Strict inequality.")
                .infix()
                .params(vec![param("a", "any"), param("b", "any")])
                .returns("boolean"),
            |args, ctx| Ok(Value::Bool(!args[0].eq_in(&args[1], ctx.heap()))),
        ),
        chain_op("<", "Chained less-than."),
        chain_op(">", "Chained greater-than."),
        chain_op("<=", "Chained less-than-or-equal."),
        chain_op(">=", "Chained greater-than-or-equal."),
        unary_op("math.abs", "Absolute value.", abs_op),
        unary_op("math.floor", "Largest integer at or below.", floor_op),
        unary_op("math.ceil", "Smallest integer at or above.", ceil_op),
        unary_op("math.round", "Nearest integer, ties rounding up.", round_op),
        unary_op("math.sqrt", "Square root.", sqrt_op),
        strict_op(
            OpMeta::op("math.min", CAT, "Smallest of its operands.")
                .params(vec![param("a", "number"), variadic("rest", "number[]")])
                .returns("number"),
            min_op,
        ),
        strict_op(
            OpMeta::op("math.max", CAT, "Largest of its operands.")
                .params(vec![param("a", "number"), variadic("rest", "number[]")])
                .returns("number"),
            max_op,
        ),
        strict_op(
            OpMeta::op("math.clamp", CAT, "Clamps a number into an inclusive range.")
                .params(vec![param("value", "number"), param("low", "number"), param("high", "number")])
                .returns("number"),
            clamp_op,
        ),
        strict_op(
            OpMeta::op("random", CAT, "A random number in [min, max]; an integer when both bounds are integers.")
                .params(vec![param("min", "number"), param("max", "number")])
                .returns("number"),
            random_op,
        ),
    ]
}

pub(crate) fn numeric_fold_params() -> Vec<ParamSpec> {
    vec![param("a", "number"), param("b", "number"), variadic("rest", "number[]")]
}

fn fold_op(name: &'static str, description: &str, fold: fn(f64, f64) -> f64) -> OpDef {
    strict_op(
        OpMeta::op(name, CAT, description)
            .infix()
            .params(numeric_fold_params())
            .returns("number"),
        move |args, ctx| {
            let nums = numbers(name, &args, ctx.heap())?;
            let mut iter = nums.into_iter();
            let mut acc = iter.next().expect("arity checked");
            for n in iter {
                acc = fold(acc, n);
            }
            Ok(Value::Num(acc))
        },
    )
}

/// Folds a power tower right-to-left. Shared with the compiled fast path.
pub(crate) fn power_tower(nums: &[f64]) -> f64 {
    let mut iter = nums.iter().rev();
    let mut acc = *iter.next().expect("arity checked");
    for base in iter {
        acc = base.powf(acc);
    }
    acc
}

fn chain_op(name: &'static str, description: &str) -> OpDef {
    strict_op(
        OpMeta::op(name, CAT, description)
            .infix()
            .params(vec![variadic("operands", "any[]")])
            .returns("boolean"),
        move |args, ctx| {
            for pair in args.windows(2) {
                if !ordered(name, pair[0], pair[1], ctx.heap())? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        },
    )
}

/// Whether one ordered pair satisfies the comparison opcode `op`. Numbers
/// order numerically, strings lexicographically; incomparable pairs (NaN)
/// are false. Shared with the compiled fast path.
pub(crate) fn ordered(op: &str, a: Value, b: Value, heap: &Heap) -> EvalResult<bool> {
    let ordering = if let (Value::Num(x), Value::Num(y)) = (a, b) {
        x.partial_cmp(&y)
    } else if let (Some(x), Some(y)) = (a.as_str(heap), b.as_str(heap)) {
        Some(x.cmp(y))
    } else {
        return Err(ScriptError::argument_type(
            op,
            format!("cannot order {} against {}", a.type_name(heap), b.type_name(heap)),
        )
        .into());
    };
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        "<" => ordering == Ordering::Less,
        ">" => ordering == Ordering::Greater,
        "<=" => ordering != Ordering::Greater,
        ">=" => ordering != Ordering::Less,
        _ => unreachable!("caller passes a comparison opcode"),
    })
}

fn unary_op(name: &'static str, description: &str, handler: fn(Vec<Value>, &mut ScriptContext) -> EvalResult<Value>) -> OpDef {
    strict_op(
        OpMeta::op(name, CAT, description)
            .params(vec![param("value", "number")])
            .returns("number"),
        handler,
    )
}

fn unary_apply(op: &str, args: &[Value], ctx: &ScriptContext, apply: fn(f64) -> f64) -> EvalResult<Value> {
    let nums = numbers(op, args, ctx.heap())?;
    Ok(Value::Num(apply(nums[0])))
}

pub(crate) fn abs_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    unary_apply("math.abs", &args, ctx, f64::abs)
}

pub(crate) fn floor_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    unary_apply("math.floor", &args, ctx, f64::floor)
}

pub(crate) fn ceil_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    unary_apply("math.ceil", &args, ctx, f64::ceil)
}

pub(crate) fn round_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    // Half-up, toward positive infinity.
    unary_apply("math.round", &args, ctx, |n| (n + 0.5).floor())
}

pub(crate) fn sqrt_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    unary_apply("math.sqrt", &args, ctx, f64::sqrt)
}

pub(crate) fn min_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let nums = numbers("math.min", &args, ctx.heap())?;
    Ok(Value::Num(nums.into_iter().fold(f64::INFINITY, f64::min)))
}

pub(crate) fn max_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let nums = numbers("math.max", &args, ctx.heap())?;
    Ok(Value::Num(nums.into_iter().fold(f64::NEG_INFINITY, f64::max)))
}

pub(crate) fn clamp_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let nums = numbers("math.clamp", &args, ctx.heap())?;
    let (value, low, high) = (nums[0], nums[1], nums[2]);
    if low > high {
        return Err(ScriptError::argument_type("math.clamp", "low bound exceeds high bound").into());
    }
    Ok(Value::Num(value.clamp(low, high)))
}

pub(crate) fn numbers(op: &str, args: &[Value], heap: &Heap) -> EvalResult<Vec<f64>> {
    args.iter()
        .map(|arg| {
            arg.as_num().ok_or_else(|| {
                ScriptError::argument_type(op, format!("expected a number, got {}", arg.type_name(heap))).into()
            })
        })
        .collect()
}

fn random_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let nums = numbers("random", &args, ctx.heap())?;
    let (min, max) = (nums[0], nums[1]);
    if !min.is_finite() || !max.is_finite() {
        return Err(ScriptError::argument_type("random", "bounds must be finite").into());
    }
    if min > max {
        return Err(ScriptError::custom(format!("random: min {min} exceeds max {max}")).into());
    }
    let mut rng = rand::thread_rng();
    if min.fract() == 0.0 && max.fract() == 0.0 {
        let value = rng.gen_range(min as i64..=max as i64);
        return Ok(Value::Num(value as f64));
    }
    if min == max {
        return Ok(Value::Num(min));
    }
    Ok(Value::Num(rng.gen_range(min..max)))
}

//! The `str.*` opcodes. All non-mutating; strings are immutable values.
//!
//! Handlers are named functions so the compiler can bind them directly in
//! its inlined fast paths.

use crate::{
    context::ScriptContext,
    error::{EvalResult, ScriptError},
    heap::Heap,
    ops::{opt_param, param, strict_op, variadic},
    registry::{OpDef, OpMeta},
    value::Value,
};

const CAT: &str = "string";

pub fn string_lib() -> Vec<OpDef> {
    vec![
        strict_op(
            OpMeta::op("str.concat", CAT, "Concatenates its operands, coercing non-strings to their display form.")
                .params(vec![variadic("parts", "any[]")])
                .returns("string"),
            concat_op,
        ),
        strict_op(
            OpMeta::op("str.length", CAT, "Number of characters.")
                .params(vec![param("value", "string")])
                .returns("number"),
            length_op,
        ),
        strict_op(
            OpMeta::op("str.slice", CAT, "Substring between two character positions; negatives count from the end.")
                .params(vec![param("value", "string"), param("start", "number"), opt_param("end", "number")])
                .returns("string"),
            slice_op,
        ),
        strict_op(
            OpMeta::op("str.split", CAT, "Splits on a separator into a list of strings.")
                .params(vec![param("value", "string"), param("separator", "string")])
                .returns("string[]"),
            split_op,
        ),
        strict_op(
            OpMeta::op("str.replace", CAT, "Replaces the first occurrence of a substring.")
                .params(vec![param("value", "string"), param("from", "string"), param("to", "string")])
                .returns("string"),
            replace_op,
        ),
        strict_op(
            OpMeta::op("str.includes", CAT, "Whether the string contains a substring.")
                .params(vec![param("value", "string"), param("needle", "string")])
                .returns("boolean"),
            includes_op,
        ),
        strict_op(
            OpMeta::op("str.indexOf", CAT, "Character position of the first occurrence, or -1.")
                .params(vec![param("value", "string"), param("needle", "string")])
                .returns("number"),
            index_of_op,
        ),
        strict_op(
            OpMeta::op("str.toUpper", CAT, "Uppercase form.")
                .params(vec![param("value", "string")])
                .returns("string"),
            to_upper_op,
        ),
        strict_op(
            OpMeta::op("str.toLower", CAT, "Lowercase form.")
                .params(vec![param("value", "string")])
                .returns("string"),
            to_lower_op,
        ),
        strict_op(
            OpMeta::op("str.trim", CAT, "Strips leading and trailing whitespace.")
                .params(vec![param("value", "string")])
                .returns("string"),
            trim_op,
        ),
    ]
}

fn text<'h>(op: &str, value: Value, heap: &'h Heap) -> EvalResult<&'h str> {
    value
        .as_str(heap)
        .ok_or_else(|| ScriptError::argument_type(op, format!("expected a string, got {}", value.type_name(heap))).into())
}

/// Resolves a possibly-negative position against a length, clamping into
/// `0..=len`. Shared with `list.slice` and `list.splice`.
pub(crate) fn resolve_index(position: f64, len: usize) -> usize {
    let len = len as f64;
    let resolved = if position < 0.0 { len + position } else { position };
    resolved.clamp(0.0, len) as usize
}

pub(crate) fn concat_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let mut out = String::new();
    for arg in &args {
        out.push_str(&arg.render(ctx.heap()));
    }
    ctx.alloc_str(out)
}

pub(crate) fn length_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let s = text("str.length", args[0], ctx.heap())?;
    Ok(Value::Num(s.chars().count() as f64))
}

pub(crate) fn slice_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let s = text("str.slice", args[0], ctx.heap())?;
    let chars: Vec<char> = s.chars().collect();
    let start_pos = args[1]
        .as_num()
        .ok_or_else(|| ScriptError::argument_type("str.slice", "start must be a number"))?;
    let end_pos = match args.get(2) {
        Some(end) => end
            .as_num()
            .ok_or_else(|| ScriptError::argument_type("str.slice", "end must be a number"))?,
        None => chars.len() as f64,
    };
    let start = resolve_index(start_pos, chars.len());
    let end = resolve_index(end_pos, chars.len());
    let sliced: String = if start < end { chars[start..end].iter().collect() } else { String::new() };
    ctx.alloc_str(sliced)
}

pub(crate) fn split_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let s = text("str.split", args[0], ctx.heap())?.to_owned();
    let separator = text("str.split", args[1], ctx.heap())?.to_owned();
    let parts: Vec<String> = if separator.is_empty() {
        s.chars().map(String::from).collect()
    } else {
        s.split(&separator).map(str::to_owned).collect()
    };
    let mut values = Vec::with_capacity(parts.len());
    for part in parts {
        values.push(ctx.alloc_str(part)?);
    }
    ctx.alloc_list(values)
}

pub(crate) fn replace_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let s = text("str.replace", args[0], ctx.heap())?.to_owned();
    let from = text("str.replace", args[1], ctx.heap())?.to_owned();
    let to = text("str.replace", args[2], ctx.heap())?.to_owned();
    ctx.alloc_str(s.replacen(&from, &to, 1))
}

pub(crate) fn includes_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let s = text("str.includes", args[0], ctx.heap())?;
    let needle = text("str.includes", args[1], ctx.heap())?;
    Ok(Value::Bool(s.contains(needle)))
}

pub(crate) fn index_of_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let s = text("str.indexOf", args[0], ctx.heap())?;
    let needle = text("str.indexOf", args[1], ctx.heap())?;
    match s.find(needle) {
        Some(byte_index) => {
            let char_index = s[..byte_index].chars().count();
            Ok(Value::Num(char_index as f64))
        }
        None => Ok(Value::Num(-1.0)),
    }
}

pub(crate) fn to_upper_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let s = text("str.toUpper", args[0], ctx.heap())?.to_uppercase();
    ctx.alloc_str(s)
}

pub(crate) fn to_lower_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let s = text("str.toLower", args[0], ctx.heap())?.to_lowercase();
    ctx.alloc_str(s)
}

pub(crate) fn trim_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let s = text("str.trim", args[0], ctx.heap())?.trim().to_owned();
    ctx.alloc_str(s)
}

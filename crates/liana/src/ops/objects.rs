//! The `obj.*` opcodes and the reserved-key filter.
//!
//! Object keys pass through [`check_key`] on every access path, dynamic or
//! literal. The reserved names are the host runtime's reflective slots; a
//! sandboxed script must never reach them, so both the interpreter handlers
//! here and the compiler's static check reject them.
//!
//! Strict handlers are named functions so the compiler can bind them
//! directly in its inlined fast paths.

use indexmap::IndexMap;

use crate::{
    context::ScriptContext,
    datum::Datum,
    error::{EvalResult, ScriptError},
    heap::{Heap, HeapData, HeapId},
    interp::{call_lambda, evaluate},
    ops::{lazy_op, opt_param, param, strict_op, variadic},
    registry::{OpDef, OpMeta},
    value::Value,
};

const CAT: &str = "object";

/// Attribute names reserved by the host runtime's reflective machinery.
pub const FORBIDDEN_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Rejects reserved reflective keys with `DisallowedKey`.
pub fn check_key(key: &str) -> EvalResult<()> {
    if FORBIDDEN_KEYS.contains(&key) {
        return Err(ScriptError::disallowed_key(key).into());
    }
    Ok(())
}

pub fn object_lib() -> Vec<OpDef> {
    vec![
        lazy_op(
            OpMeta::op("obj.new", CAT, "A new object from [key, value] entries; keys are literal strings.")
                .lazy()
                .params(vec![variadic("entries", "any[]")])
                .returns("object"),
            new_op,
        ),
        strict_op(
            OpMeta::op("obj.get", CAT, "Value under a key; an absent key yields the default, or null.")
                .params(vec![param("object", "object|any[]"), param("key", "string|number"), opt_param("default", "any")]),
            get_op,
        ),
        strict_op(
            OpMeta::op("obj.set", CAT, "Stores a value under a key; the result is the value.")
                .params(vec![param("object", "object|any[]"), param("key", "string|number"), param("value", "any")]),
            set_op,
        ),
        strict_op(
            OpMeta::op("obj.has", CAT, "Whether a key is present.")
                .params(vec![param("object", "object"), param("key", "string")])
                .returns("boolean"),
            has_op,
        ),
        strict_op(
            OpMeta::op("obj.del", CAT, "Removes a key; the result is whether it was present.")
                .params(vec![param("object", "object"), param("key", "string")])
                .returns("boolean"),
            del_op,
        ),
        strict_op(
            OpMeta::op("obj.keys", CAT, "The keys, in insertion order.")
                .params(vec![param("object", "object")])
                .returns("string[]"),
            keys_op,
        ),
        strict_op(
            OpMeta::op("obj.values", CAT, "The values, in insertion order.")
                .params(vec![param("object", "object")])
                .returns("any[]"),
            values_op,
        ),
        strict_op(
            OpMeta::op("obj.entries", CAT, "A list of [key, value] pairs, in insertion order.")
                .params(vec![param("object", "object")])
                .returns("any[][]"),
            entries_op,
        ),
        strict_op(
            OpMeta::op("obj.merge", CAT, "A new object with the entries of every operand, later ones winning.")
                .params(vec![param("object", "object"), variadic("rest", "object[]")])
                .returns("object"),
            merge_op,
        ),
        strict_op(
            OpMeta::op("obj.invoke", CAT, "Calls the lambda stored under a key; null when the key is absent.")
                .params(vec![param("object", "object"), param("key", "string"), variadic("args", "any[]")]),
            invoke_op,
        ),
    ]
}

fn object_id(op: &str, value: Value, heap: &Heap) -> EvalResult<HeapId> {
    value.as_object_id(heap).ok_or_else(|| {
        ScriptError::argument_type(op, format!("expected an object, got {}", value.type_name(heap))).into()
    })
}

fn object_ref<'h>(op: &str, value: Value, heap: &'h Heap) -> EvalResult<&'h IndexMap<String, Value>> {
    let id = object_id(op, value, heap)?;
    match heap.get(id) {
        HeapData::Object(entries) => Ok(entries),
        _ => unreachable!("checked by object_id"),
    }
}

/// A numeric index against a list target. String keys still pass through
/// the reserved-key filter; fractional or negative indices read as absent.
fn list_index(op: &str, value: Value, heap: &Heap) -> EvalResult<Option<usize>> {
    if let Some(key) = value.as_str(heap) {
        check_key(key)?;
        return Err(ScriptError::argument_type(op, format!("expected a numeric list index, got '{key}'")).into());
    }
    let Some(n) = value.as_num() else {
        return Err(ScriptError::argument_type(op, "expected a numeric list index").into());
    };
    if n < 0.0 || n.fract() != 0.0 {
        return Ok(None);
    }
    Ok(Some(n as usize))
}

/// A key argument: must be a string, and must pass the reserved-key filter.
fn key_arg<'h>(op: &str, value: Value, heap: &'h Heap) -> EvalResult<&'h str> {
    let Some(key) = value.as_str(heap) else {
        return Err(ScriptError::argument_type(op, format!("key must be a string, got {}", value.type_name(heap))).into());
    };
    check_key(key)?;
    Ok(key)
}

fn new_op(raw: &[Datum], ctx: &mut ScriptContext) -> EvalResult<Value> {
    let mut entries = IndexMap::with_capacity(raw.len());
    for entry in raw {
        // The key slot is a literal and is never evaluated.
        let Datum::List(pair) = entry else {
            return Err(ScriptError::argument_type("obj.new", "entries must be [key, value] pairs").into());
        };
        let (Some(Datum::Str(key)), Some(value_expr), None) = (pair.first(), pair.get(1), pair.get(2)) else {
            return Err(ScriptError::argument_type("obj.new", "entries must be [key, value] pairs").into());
        };
        check_key(key)?;
        let value = evaluate(value_expr, ctx)?;
        entries.insert(key.to_string(), value);
    }
    ctx.alloc_object(entries)
}

pub(crate) fn get_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    // Surface indexing `o[k]` lowers here without knowing the target type,
    // so lists with numeric keys are accepted too.
    if let Some(list_id) = args[0].as_list_id(ctx.heap()) {
        let index = list_index("obj.get", args[1], ctx.heap())?;
        let element = match (index, ctx.heap().get(list_id)) {
            (Some(index), HeapData::List(items)) => items.get(index).copied(),
            _ => None,
        };
        return Ok(element.or(args.get(2).copied()).unwrap_or(Value::Null));
    }
    let key = key_arg("obj.get", args[1], ctx.heap())?;
    let entries = object_ref("obj.get", args[0], ctx.heap())?;
    match entries.get(key) {
        Some(value) => Ok(*value),
        None => Ok(args.get(2).copied().unwrap_or(Value::Null)),
    }
}

pub(crate) fn set_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    if let Some(list_id) = args[0].as_list_id(ctx.heap()) {
        let index = list_index("obj.set", args[1], ctx.heap())?;
        let in_range = match (index, ctx.heap().get(list_id)) {
            (Some(index), HeapData::List(items)) => index < items.len(),
            _ => false,
        };
        if !in_range {
            return Err(ScriptError::argument_type("obj.set", "list index out of range").into());
        }
        if let (Some(index), HeapData::List(items)) = (index, ctx.heap_mut().get_mut(list_id)) {
            items[index] = args[2];
        }
        return Ok(args[2]);
    }
    let key = key_arg("obj.set", args[1], ctx.heap())?.to_owned();
    let id = object_id("obj.set", args[0], ctx.heap())?;
    ctx.charge_gas(1)?;
    if let HeapData::Object(entries) = ctx.heap_mut().get_mut(id) {
        entries.insert(key, args[2]);
    }
    Ok(args[2])
}

pub(crate) fn has_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let key = key_arg("obj.has", args[1], ctx.heap())?;
    let entries = object_ref("obj.has", args[0], ctx.heap())?;
    Ok(Value::Bool(entries.contains_key(key)))
}

pub(crate) fn del_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let key = key_arg("obj.del", args[1], ctx.heap())?.to_owned();
    let id = object_id("obj.del", args[0], ctx.heap())?;
    if let HeapData::Object(entries) = ctx.heap_mut().get_mut(id) {
        // shift_remove keeps the remaining insertion order intact.
        return Ok(Value::Bool(entries.shift_remove(&key).is_some()));
    }
    unreachable!("checked by object_id")
}

pub(crate) fn keys_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let keys: Vec<String> = object_ref("obj.keys", args[0], ctx.heap())?.keys().cloned().collect();
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        out.push(ctx.alloc_str(key)?);
    }
    ctx.alloc_list(out)
}

pub(crate) fn values_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let values: Vec<Value> = object_ref("obj.values", args[0], ctx.heap())?.values().copied().collect();
    ctx.alloc_list(values)
}

pub(crate) fn entries_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let entries: Vec<(String, Value)> = object_ref("obj.entries", args[0], ctx.heap())?
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    let mut out = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let key = ctx.alloc_str(key)?;
        out.push(ctx.alloc_list(vec![key, value])?);
    }
    ctx.alloc_list(out)
}

pub(crate) fn merge_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let mut merged = IndexMap::new();
    for arg in &args {
        let entries = object_ref("obj.merge", *arg, ctx.heap())?;
        for (k, v) in entries {
            merged.insert(k.clone(), *v);
        }
    }
    ctx.alloc_object(merged)
}

pub(crate) fn invoke_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let key = key_arg("obj.invoke", args[1], ctx.heap())?;
    let entries = object_ref("obj.invoke", args[0], ctx.heap())?;
    let member = entries.get(key).copied().unwrap_or(Value::Null);
    if matches!(member, Value::Null) {
        return Ok(Value::Null);
    }
    call_lambda(member, &args[2..], ctx, "obj.invoke")
}

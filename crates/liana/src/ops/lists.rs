//! The `list.*` opcodes.
//!
//! Mutating where the host language mutates (push/pop/shift/unshift/splice/
//! sort/reverse), non-mutating for slice/map/filter/find/reduce/concat.
//! Lists are shared by reference; mutation is visible to every holder.
//!
//! Handlers are named functions so the compiler can bind them directly in
//! its inlined fast paths.

use std::cmp::Ordering;

use crate::{
    context::ScriptContext,
    error::{EvalResult, ScriptError},
    heap::{Heap, HeapData, HeapId},
    interp::call_lambda,
    ops::{objects::check_key, opt_param, param, strict_op, strings::resolve_index, variadic},
    registry::{OpDef, OpMeta},
    value::Value,
};

const CAT: &str = "list";

pub fn list_lib() -> Vec<OpDef> {
    vec![
        strict_op(
            OpMeta::op("list.new", CAT, "A new list holding the given elements.")
                .params(vec![variadic("items", "any[]")])
                .returns("any[]"),
            new_op,
        ),
        strict_op(
            OpMeta::op("list.get", CAT, "Element at a position, or null when out of range.")
                .generics(&["T"])
                .params(vec![param("list", "T[]"), param("index", "number|string")])
                .returns("T"),
            get_op,
        ),
        strict_op(
            OpMeta::op("list.set", CAT, "Replaces the element at an existing position.")
                .params(vec![param("list", "any[]"), param("index", "number|string"), param("value", "any")]),
            set_op,
        ),
        strict_op(
            OpMeta::op("list.push", CAT, "Appends elements; the result is the new length.")
                .params(vec![param("list", "any[]"), variadic("items", "any[]")])
                .returns("number"),
            push_op,
        ),
        strict_op(
            OpMeta::op("list.pop", CAT, "Removes and returns the last element, or null when empty.")
                .params(vec![param("list", "any[]")]),
            pop_op,
        ),
        strict_op(
            OpMeta::op("list.shift", CAT, "Removes and returns the first element, or null when empty.")
                .params(vec![param("list", "any[]")]),
            shift_op,
        ),
        strict_op(
            OpMeta::op("list.unshift", CAT, "Prepends elements; the result is the new length.")
                .params(vec![param("list", "any[]"), variadic("items", "any[]")])
                .returns("number"),
            unshift_op,
        ),
        strict_op(
            OpMeta::op("list.splice", CAT, "Removes a span (and inserts elements); the result is the removed span.")
                .params(vec![
                    param("list", "any[]"),
                    param("start", "number"),
                    opt_param("deleteCount", "number"),
                    variadic("items", "any[]"),
                ])
                .returns("any[]"),
            splice_op,
        ),
        strict_op(
            OpMeta::op("list.sort", CAT, "Sorts in place, optionally with a comparator lambda; the result is the list.")
                .params(vec![param("list", "any[]"), opt_param("comparator", "lambda")]),
            sort_op,
        ),
        strict_op(
            OpMeta::op("list.reverse", CAT, "Reverses in place; the result is the list.")
                .params(vec![param("list", "any[]")]),
            reverse_op,
        ),
        strict_op(
            OpMeta::op("list.slice", CAT, "Copy of a span; negatives count from the end.")
                .params(vec![param("list", "any[]"), opt_param("start", "number"), opt_param("end", "number")])
                .returns("any[]"),
            slice_op,
        ),
        strict_op(
            OpMeta::op("list.map", CAT, "A new list of the lambda applied to each (element, index).")
                .params(vec![param("list", "any[]"), param("transform", "lambda")])
                .returns("any[]"),
            map_op,
        ),
        strict_op(
            OpMeta::op("list.filter", CAT, "A new list of the elements the predicate accepts.")
                .params(vec![param("list", "any[]"), param("predicate", "lambda")])
                .returns("any[]"),
            filter_op,
        ),
        strict_op(
            OpMeta::op("list.find", CAT, "The first element the predicate accepts, or null.")
                .generics(&["T"])
                .params(vec![param("list", "T[]"), param("predicate", "lambda")])
                .returns("T|null"),
            find_op,
        ),
        strict_op(
            OpMeta::op("list.reduce", CAT, "Folds the list through a lambda of (accumulator, element, index).")
                .params(vec![param("list", "any[]"), param("reducer", "lambda"), opt_param("initial", "any")]),
            reduce_op,
        ),
        strict_op(
            OpMeta::op("list.concat", CAT, "A new list holding the elements of every operand.")
                .params(vec![param("list", "any[]"), variadic("rest", "any[][]")])
                .returns("any[]"),
            concat_op,
        ),
        strict_op(
            OpMeta::op("list.join", CAT, "Renders elements and joins them with a separator.")
                .params(vec![param("list", "any[]"), opt_param("separator", "string")])
                .returns("string"),
            join_op,
        ),
        strict_op(
            OpMeta::op("list.length", CAT, "Number of elements.")
                .params(vec![param("list", "any[]")])
                .returns("number"),
            length_op,
        ),
        strict_op(
            OpMeta::op("list.includes", CAT, "Whether any element equals the probe.")
                .params(vec![param("list", "any[]"), param("value", "any")])
                .returns("boolean"),
            includes_op,
        ),
        strict_op(
            OpMeta::op("list.indexOf", CAT, "Position of the first equal element, or -1.")
                .params(vec![param("list", "any[]"), param("value", "any")])
                .returns("number"),
            index_of_op,
        ),
    ]
}

fn list_id(op: &str, value: Value, heap: &Heap) -> EvalResult<HeapId> {
    value.as_list_id(heap).ok_or_else(|| {
        ScriptError::argument_type(op, format!("expected a list, got {}", value.type_name(heap))).into()
    })
}

fn list_ref<'h>(op: &str, value: Value, heap: &'h Heap) -> EvalResult<&'h Vec<Value>> {
    let id = list_id(op, value, heap)?;
    match heap.get(id) {
        HeapData::List(items) => Ok(items),
        _ => unreachable!("checked by list_id"),
    }
}

fn list_len(heap: &Heap, id: HeapId) -> usize {
    match heap.get(id) {
        HeapData::List(items) => items.len(),
        _ => unreachable!("checked by list_id"),
    }
}

/// Copies the elements out so callbacks can mutate the list without skewing
/// iteration.
fn snapshot(op: &str, value: Value, heap: &Heap) -> EvalResult<Vec<Value>> {
    Ok(list_ref(op, value, heap)?.clone())
}

/// An index argument. String keys are funneled through the reserved-key
/// filter so dynamic access cannot name reflective attributes.
fn index_arg(op: &str, value: Value, heap: &Heap) -> EvalResult<f64> {
    if let Some(key) = value.as_str(heap) {
        check_key(key)?;
        return Err(ScriptError::argument_type(op, format!("expected a numeric index, got '{key}'")).into());
    }
    value
        .as_num()
        .ok_or_else(|| ScriptError::argument_type(op, "expected a numeric index").into())
}

pub(crate) fn new_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    ctx.alloc_list(args)
}

pub(crate) fn get_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let index = index_arg("list.get", args[1], ctx.heap())?;
    let items = list_ref("list.get", args[0], ctx.heap())?;
    if index < 0.0 || index.fract() != 0.0 {
        return Ok(Value::Null);
    }
    Ok(items.get(index as usize).copied().unwrap_or(Value::Null))
}

pub(crate) fn set_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let index = index_arg("list.set", args[1], ctx.heap())?;
    let id = list_id("list.set", args[0], ctx.heap())?;
    let len = list_len(ctx.heap(), id);
    if index < 0.0 || index.fract() != 0.0 || index as usize >= len {
        return Err(ScriptError::argument_type(
            "list.set",
            format!("index {index} out of range for length {len}"),
        )
        .into());
    }
    if let HeapData::List(items) = ctx.heap_mut().get_mut(id) {
        items[index as usize] = args[2];
    }
    Ok(args[2])
}

pub(crate) fn push_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let id = list_id("list.push", args[0], ctx.heap())?;
    ctx.charge_gas(args.len() as i64 - 1)?;
    if let HeapData::List(items) = ctx.heap_mut().get_mut(id) {
        items.extend_from_slice(&args[1..]);
        return Ok(Value::Num(items.len() as f64));
    }
    unreachable!("checked by list_id")
}

pub(crate) fn pop_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let id = list_id("list.pop", args[0], ctx.heap())?;
    if let HeapData::List(items) = ctx.heap_mut().get_mut(id) {
        return Ok(items.pop().unwrap_or(Value::Null));
    }
    unreachable!("checked by list_id")
}

pub(crate) fn shift_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let id = list_id("list.shift", args[0], ctx.heap())?;
    if let HeapData::List(items) = ctx.heap_mut().get_mut(id) {
        if items.is_empty() {
            return Ok(Value::Null);
        }
        return Ok(items.remove(0));
    }
    unreachable!("checked by list_id")
}

pub(crate) fn unshift_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let id = list_id("list.unshift", args[0], ctx.heap())?;
    ctx.charge_gas(args.len() as i64 - 1)?;
    if let HeapData::List(items) = ctx.heap_mut().get_mut(id) {
        items.splice(0..0, args[1..].iter().copied());
        return Ok(Value::Num(items.len() as f64));
    }
    unreachable!("checked by list_id")
}

pub(crate) fn splice_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let id = list_id("list.splice", args[0], ctx.heap())?;
    let len = list_len(ctx.heap(), id);
    let start_pos = args[1]
        .as_num()
        .ok_or_else(|| ScriptError::argument_type("list.splice", "start must be a number"))?;
    let start = resolve_index(start_pos, len);
    let delete_count = match args.get(2) {
        Some(value) => {
            let n = value
                .as_num()
                .ok_or_else(|| ScriptError::argument_type("list.splice", "deleteCount must be a number"))?;
            (n.max(0.0) as usize).min(len - start)
        }
        None => len - start,
    };
    ctx.charge_gas(args.len() as i64)?;
    let removed: Vec<Value> = match ctx.heap_mut().get_mut(id) {
        HeapData::List(items) => items
            .splice(start..start + delete_count, args.get(3..).unwrap_or(&[]).iter().copied())
            .collect(),
        _ => unreachable!("checked by list_id"),
    };
    ctx.alloc_list(removed)
}

pub(crate) fn sort_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let id = list_id("list.sort", args[0], ctx.heap())?;
    let mut values = snapshot("list.sort", args[0], ctx.heap())?;

    match args.get(1) {
        // Insertion sort so comparator errors propagate cleanly; gas bounds
        // the quadratic worst case.
        Some(comparator) => {
            for i in 1..values.len() {
                let mut j = i;
                while j > 0 {
                    let verdict = call_lambda(*comparator, &[values[j - 1], values[j]], ctx, "list.sort")?;
                    let keep_order = verdict.as_num().is_none_or(|n| n <= 0.0);
                    if keep_order {
                        break;
                    }
                    values.swap(j - 1, j);
                    j -= 1;
                }
            }
        }
        None => {
            let keys: Vec<SortKey> = values.iter().map(|v| SortKey::of(*v, ctx.heap())).collect();
            let mut order: Vec<usize> = (0..values.len()).collect();
            order.sort_by(|&a, &b| keys[a].cmp(&keys[b]));
            values = order.into_iter().map(|i| values[i]).collect();
        }
    }

    if let HeapData::List(items) = ctx.heap_mut().get_mut(id) {
        *items = values;
    }
    Ok(args[0])
}

pub(crate) fn reverse_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let id = list_id("list.reverse", args[0], ctx.heap())?;
    if let HeapData::List(items) = ctx.heap_mut().get_mut(id) {
        items.reverse();
    }
    Ok(args[0])
}

pub(crate) fn slice_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let items = list_ref("list.slice", args[0], ctx.heap())?.clone();
    let start = match args.get(1) {
        Some(value) => value
            .as_num()
            .ok_or_else(|| ScriptError::argument_type("list.slice", "start must be a number"))?,
        None => 0.0,
    };
    let end = match args.get(2) {
        Some(value) => value
            .as_num()
            .ok_or_else(|| ScriptError::argument_type("list.slice", "end must be a number"))?,
        None => items.len() as f64,
    };
    let start = resolve_index(start, items.len());
    let end = resolve_index(end, items.len());
    let span = if start < end { items[start..end].to_vec() } else { Vec::new() };
    ctx.alloc_list(span)
}

pub(crate) fn map_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let items = snapshot("list.map", args[0], ctx.heap())?;
    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        out.push(call_lambda(args[1], &[item, Value::Num(index as f64)], ctx, "list.map")?);
    }
    ctx.alloc_list(out)
}

pub(crate) fn filter_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let items = snapshot("list.filter", args[0], ctx.heap())?;
    let mut out = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        let keep = call_lambda(args[1], &[item, Value::Num(index as f64)], ctx, "list.filter")?;
        if keep.truthy(ctx.heap()) {
            out.push(item);
        }
    }
    ctx.alloc_list(out)
}

pub(crate) fn find_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let items = snapshot("list.find", args[0], ctx.heap())?;
    for (index, item) in items.into_iter().enumerate() {
        let hit = call_lambda(args[1], &[item, Value::Num(index as f64)], ctx, "list.find")?;
        if hit.truthy(ctx.heap()) {
            return Ok(item);
        }
    }
    Ok(Value::Null)
}

pub(crate) fn reduce_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let items = snapshot("list.reduce", args[0], ctx.heap())?;
    let mut iter = items.into_iter().enumerate();
    let mut acc = match args.get(2) {
        Some(initial) => *initial,
        None => match iter.next() {
            Some((_, first)) => first,
            None => return Err(ScriptError::custom("list.reduce: empty list with no initial value").into()),
        },
    };
    for (index, item) in iter {
        acc = call_lambda(args[1], &[acc, item, Value::Num(index as f64)], ctx, "list.reduce")?;
    }
    Ok(acc)
}

pub(crate) fn concat_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let mut out = Vec::new();
    for arg in &args {
        out.extend_from_slice(list_ref("list.concat", *arg, ctx.heap())?);
    }
    ctx.alloc_list(out)
}

pub(crate) fn join_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let items = snapshot("list.join", args[0], ctx.heap())?;
    let separator = match args.get(1) {
        Some(value) => value
            .as_str(ctx.heap())
            .ok_or_else(|| ScriptError::argument_type("list.join", "separator must be a string"))?
            .to_owned(),
        None => ",".to_owned(),
    };
    let joined = items
        .iter()
        .map(|item| item.render(ctx.heap()))
        .collect::<Vec<_>>()
        .join(&separator);
    ctx.alloc_str(joined)
}

pub(crate) fn length_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let items = list_ref("list.length", args[0], ctx.heap())?;
    Ok(Value::Num(items.len() as f64))
}

pub(crate) fn includes_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let items = list_ref("list.includes", args[0], ctx.heap())?;
    let hit = items.iter().any(|item| item.eq_in(&args[1], ctx.heap()));
    Ok(Value::Bool(hit))
}

pub(crate) fn index_of_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let items = list_ref("list.indexOf", args[0], ctx.heap())?;
    let position = items
        .iter()
        .position(|item| item.eq_in(&args[1], ctx.heap()))
        .map_or(-1.0, |i| i as f64);
    Ok(Value::Num(position))
}

/// Default sort key: numbers before strings before everything else (which
/// compares by rendered form).
#[derive(PartialEq)]
enum SortKey {
    Num(f64),
    Str(String),
    Other(String),
}

impl SortKey {
    fn of(value: Value, heap: &Heap) -> Self {
        if let Value::Num(n) = value {
            return Self::Num(n);
        }
        if let Some(s) = value.as_str(heap) {
            return Self::Str(s.to_owned());
        }
        Self::Other(value.repr(heap))
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Num(_) => 0,
            Self::Str(_) => 1,
            Self::Other(_) => 2,
        }
    }

    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Num(a), Self::Num(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Self::Str(a), Self::Str(b)) | (Self::Other(a), Self::Other(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

//! The compiler: lowers an AST to a tree of host-callable closures.
//!
//! A compiled script executes without the interpreter's frame machinery.
//! Opcode resolution, special-form shapes, literal-key security checks,
//! arity bounds, and lambda parameter lists are all settled at compile time;
//! what remains at runtime is the semantics the interpreter defines — same
//! scope discipline, same signals, same gas accounting (one unit per node
//! entry).
//!
//! Inlined fast paths: arithmetic and comparison compile to native folds
//! and chains, and the rest of the standard library — `std.log`, `not`, the
//! context accessors, `str.*`, `list.*`, `obj.*`, `math.*`, `json.*`,
//! `time.*` — binds its handler function statically through [`fast_path`],
//! skipping registry dispatch, the handler enum, and per-call validation.
//! Only opcodes outside that set (host-registered ones, `random`,
//! non-binary equality) resolve their registry definition at compile time
//! and go through the shared dispatch helpers.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    context::ScriptContext,
    datum::Datum,
    error::{EvalResult, ScriptError, Unwind},
    heap::Lambda,
    interp::{call_lambda, invoke_lazy, invoke_strict},
    ops::{check_key, core_mod, json, lists, math, objects, strings, time},
    registry::{OpRegistry, validate_count},
    value::Value,
};

/// A compiled AST node: a host-callable function over the invocation context.
pub type CompiledFn = Arc<dyn Fn(&mut ScriptContext) -> EvalResult<Value> + Send + Sync>;

/// A compiled script, ready to run against any number of contexts.
#[derive(Clone)]
pub struct CompiledScript {
    root: CompiledFn,
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript").finish_non_exhaustive()
    }
}

impl CompiledScript {
    /// Runs the compiled body. Signals unwind out raw; use [`Self::run`] for
    /// a host-facing result.
    pub fn call(&self, ctx: &mut ScriptContext) -> EvalResult<Value> {
        (self.root)(ctx)
    }

    /// Runs the compiled body, converting stray signals into errors and
    /// attaching the lambda-entry trace to failures.
    pub fn run(&self, ctx: &mut ScriptContext) -> Result<Value, ScriptError> {
        match (self.root)(ctx) {
            Ok(value) => Ok(value),
            Err(unwind) => {
                let mut err = unwind.into_root_error();
                err.fill_trace(ctx.stack.iter().rev().cloned().collect());
                Err(err)
            }
        }
    }
}

/// Compiles an AST against an explicit registry.
///
/// Compile-time failures: unknown opcodes, malformed special forms, and
/// reserved keys appearing as literals.
pub fn compile(ast: &Datum, ops: &Arc<OpRegistry>) -> Result<CompiledScript, ScriptError> {
    let compiler = Compiler {
        ops: Arc::clone(ops),
    };
    Ok(CompiledScript {
        root: compiler.emit(ast)?,
    })
}

struct Compiler {
    ops: Arc<OpRegistry>,
}

impl Compiler {
    fn emit(&self, node: &Datum) -> Result<CompiledFn, ScriptError> {
        match node {
            Datum::Null => Ok(Arc::new(|ctx| {
                ctx.step_gas()?;
                Ok(Value::Null)
            })),
            Datum::Bool(b) => {
                let b = *b;
                Ok(Arc::new(move |ctx| {
                    ctx.step_gas()?;
                    Ok(Value::Bool(b))
                }))
            }
            Datum::Num(n) => {
                let n = *n;
                Ok(Arc::new(move |ctx| {
                    ctx.step_gas()?;
                    Ok(Value::Num(n))
                }))
            }
            Datum::Str(s) => {
                let s = Arc::clone(s);
                Ok(Arc::new(move |ctx| {
                    ctx.step_gas()?;
                    ctx.alloc_str(s.as_ref())
                }))
            }
            Datum::Map(_) => Err(ScriptError::custom("raw object outside of a lazy argument slot")),
            Datum::List(_) => {
                let Some((op, args)) = node.as_call() else {
                    return Err(ScriptError::custom("expression head must be an opcode name"));
                };
                self.emit_call(op, args)
            }
        }
    }

    fn emit_call(&self, op: &str, args: &[Datum]) -> Result<CompiledFn, ScriptError> {
        match op {
            "std.seq" => self.emit_seq(args),
            "std.if" => self.emit_if(op, args),
            "std.while" => self.emit_while(op, args),
            "std.for" => self.emit_for(op, args),
            "std.let" => self.emit_binding(op, args, BindingKind::Declare),
            "std.set" => self.emit_binding(op, args, BindingKind::Assign),
            "std.var" => self.emit_var(op, args),
            "std.break" => Ok(Arc::new(|ctx| {
                ctx.step_gas()?;
                Err(Unwind::Break)
            })),
            "std.continue" => Ok(Arc::new(|ctx| {
                ctx.step_gas()?;
                Err(Unwind::Continue)
            })),
            "std.return" => self.emit_return(op, args),
            "std.try" => self.emit_try(op, args),
            "std.lambda" => self.emit_lambda(op, args),
            "std.quote" => self.emit_quote(op, args),
            "std.apply" => self.emit_apply(op, args),
            "obj.new" => self.emit_obj_new(args),
            "and" => self.emit_junction(args, true),
            "or" => self.emit_junction(args, false),
            "+" | "-" | "*" | "/" | "%" | "^" if args.len() >= 2 => self.emit_arith(op, args),
            "==" | "!=" if args.len() == 2 => self.emit_equality(op, args),
            "<" | ">" | "<=" | ">=" => self.emit_compare(op, args),
            _ => match fast_path(op) {
                Some(handler) => self.emit_fast(op, args, handler),
                None => self.emit_dispatch(op, args),
            },
        }
    }

    fn emit_all(&self, nodes: &[Datum]) -> Result<Vec<CompiledFn>, ScriptError> {
        nodes.iter().map(|node| self.emit(node)).collect()
    }

    /// A literal string in a raw (unevaluated) slot, e.g. a variable name.
    fn literal_name(op: &str, args: &[Datum], index: usize) -> Result<Arc<str>, ScriptError> {
        match args.get(index) {
            Some(Datum::Str(s)) => Ok(Arc::clone(s)),
            _ => Err(ScriptError::argument_type(op, format!("slot {} must be a literal name", index + 1))),
        }
    }

    fn expect_args(op: &str, args: &[Datum], min: usize, max: usize) -> Result<(), ScriptError> {
        if args.len() < min || args.len() > max {
            return Err(ScriptError::argument_count(
                op,
                format!("expected {min} to {max} argument(s), got {}", args.len()),
            ));
        }
        Ok(())
    }

    fn emit_seq(&self, args: &[Datum]) -> Result<CompiledFn, ScriptError> {
        let body = self.emit_all(args)?;
        Ok(Arc::new(move |ctx| {
            ctx.step_gas()?;
            let snapshot = ctx.save_scope();
            let mut last = Ok(Value::Null);
            for step in &body {
                last = step(ctx);
                if last.is_err() {
                    break;
                }
            }
            ctx.restore_scope(snapshot);
            last
        }))
    }

    fn emit_if(&self, op: &str, args: &[Datum]) -> Result<CompiledFn, ScriptError> {
        Self::expect_args(op, args, 2, 3)?;
        let condition = self.emit(&args[0])?;
        let then_branch = self.emit(&args[1])?;
        let else_branch = args.get(2).map(|node| self.emit(node)).transpose()?;
        Ok(Arc::new(move |ctx| {
            ctx.step_gas()?;
            let taken = condition(ctx)?.truthy(ctx.heap());
            let branch = if taken { Some(&then_branch) } else { else_branch.as_ref() };
            let Some(branch) = branch else {
                return Ok(Value::Null);
            };
            let snapshot = ctx.save_scope();
            let result = branch(ctx);
            ctx.restore_scope(snapshot);
            result
        }))
    }

    fn emit_while(&self, op: &str, args: &[Datum]) -> Result<CompiledFn, ScriptError> {
        Self::expect_args(op, args, 2, 2)?;
        let condition = self.emit(&args[0])?;
        let body = self.emit(&args[1])?;
        Ok(Arc::new(move |ctx| {
            loop {
                ctx.step_gas()?;
                if !condition(ctx)?.truthy(ctx.heap()) {
                    return Ok(Value::Null);
                }
                let snapshot = ctx.save_scope();
                let result = body(ctx);
                ctx.restore_scope(snapshot);
                match result {
                    Ok(_) | Err(Unwind::Continue) => {}
                    Err(Unwind::Break) => return Ok(Value::Null),
                    Err(other) => return Err(other),
                }
            }
        }))
    }

    fn emit_for(&self, op: &str, args: &[Datum]) -> Result<CompiledFn, ScriptError> {
        Self::expect_args(op, args, 3, 3)?;
        let name = Self::literal_name(op, args, 0)?;
        let list = self.emit(&args[1])?;
        let body = self.emit(&args[2])?;
        Ok(Arc::new(move |ctx| {
            ctx.step_gas()?;
            let list_value = list(ctx)?;
            let Some(list_id) = list_value.as_list_id(ctx.heap()) else {
                return Err(ScriptError::argument_type(
                    "std.for",
                    format!("expected a list to iterate, got {}", list_value.type_name(ctx.heap())),
                )
                .into());
            };
            let items = match ctx.heap().get(list_id) {
                crate::heap::HeapData::List(items) => items.clone(),
                _ => unreachable!("checked by as_list_id"),
            };
            for item in items {
                let snapshot = ctx.save_scope();
                let result = ctx.declare(&name, item).and_then(|()| body(ctx));
                ctx.restore_scope(snapshot);
                match result {
                    Ok(_) | Err(Unwind::Continue) => {}
                    Err(Unwind::Break) => break,
                    Err(other) => return Err(other),
                }
            }
            Ok(Value::Null)
        }))
    }

    fn emit_binding(&self, op: &str, args: &[Datum], kind: BindingKind) -> Result<CompiledFn, ScriptError> {
        Self::expect_args(op, args, 2, 2)?;
        let name = Self::literal_name(op, args, 0)?;
        let value = self.emit(&args[1])?;
        Ok(Arc::new(move |ctx| {
            ctx.step_gas()?;
            let value = value(ctx)?;
            match kind {
                BindingKind::Declare => ctx.declare(&name, value)?,
                BindingKind::Assign => ctx.assign(&name, value)?,
            }
            Ok(value)
        }))
    }

    fn emit_var(&self, op: &str, args: &[Datum]) -> Result<CompiledFn, ScriptError> {
        Self::expect_args(op, args, 1, 1)?;
        let name = Self::literal_name(op, args, 0)?;
        Ok(Arc::new(move |ctx| {
            ctx.step_gas()?;
            Ok(ctx.lookup(&name))
        }))
    }

    fn emit_return(&self, op: &str, args: &[Datum]) -> Result<CompiledFn, ScriptError> {
        Self::expect_args(op, args, 0, 1)?;
        let value = args.first().map(|node| self.emit(node)).transpose()?;
        Ok(Arc::new(move |ctx| {
            ctx.step_gas()?;
            let value = match &value {
                Some(value) => value(ctx)?,
                None => Value::Null,
            };
            Err(Unwind::Return(value))
        }))
    }

    fn emit_try(&self, op: &str, args: &[Datum]) -> Result<CompiledFn, ScriptError> {
        Self::expect_args(op, args, 3, 3)?;
        let body = self.emit(&args[0])?;
        let name = Self::literal_name(op, args, 1)?;
        let catch = self.emit(&args[2])?;
        Ok(Arc::new(move |ctx| {
            ctx.step_gas()?;
            match body(ctx) {
                Ok(value) => Ok(value),
                Err(Unwind::Error(err)) if err.is_catchable() => {
                    let snapshot = ctx.save_scope();
                    let message = ctx.alloc_str(err.message.clone());
                    let result = message.and_then(|message| {
                        ctx.declare(&name, message)?;
                        catch(ctx)
                    });
                    ctx.restore_scope(snapshot);
                    result
                }
                Err(other) => Err(other),
            }
        }))
    }

    fn emit_lambda(&self, op: &str, args: &[Datum]) -> Result<CompiledFn, ScriptError> {
        Self::expect_args(op, args, 2, 2)?;
        let params = crate::ops::parse_params(&args[0])
            .ok_or_else(|| ScriptError::argument_type(op, "first slot must be a list of parameter names"))?;
        // The body compiles eagerly; the raw tree is kept on the record so
        // decompilation and interpretation keep working on the same lambda.
        let execute = self.emit(&args[1])?;
        let body = args[1].clone();
        Ok(Arc::new(move |ctx| {
            ctx.step_gas()?;
            let lambda = Lambda {
                params: params.clone(),
                body: body.clone(),
                closure: ctx.vars.clone(),
                execute: Some(Arc::clone(&execute)),
            };
            ctx.alloc_lambda(lambda)
        }))
    }

    fn emit_quote(&self, op: &str, args: &[Datum]) -> Result<CompiledFn, ScriptError> {
        Self::expect_args(op, args, 1, 1)?;
        let payload = args[0].clone();
        Ok(Arc::new(move |ctx| {
            ctx.step_gas()?;
            ctx.load_datum(&payload)
        }))
    }

    fn emit_apply(&self, op: &str, args: &[Datum]) -> Result<CompiledFn, ScriptError> {
        if args.is_empty() {
            return Err(ScriptError::argument_count(op, "expected a target lambda"));
        }
        let target = self.emit(&args[0])?;
        let call_args = self.emit_all(&args[1..])?;
        Ok(Arc::new(move |ctx| {
            ctx.step_gas()?;
            let callee = target(ctx)?;
            let mut values = Vec::with_capacity(call_args.len());
            for arg in &call_args {
                values.push(arg(ctx)?);
            }
            call_lambda(callee, &values, ctx, "std.apply")
        }))
    }

    fn emit_obj_new(&self, args: &[Datum]) -> Result<CompiledFn, ScriptError> {
        let mut entries = Vec::with_capacity(args.len());
        for entry in args {
            let Datum::List(pair) = entry else {
                return Err(ScriptError::argument_type("obj.new", "entries must be [key, value] pairs"));
            };
            let (Some(Datum::Str(key)), Some(value_expr), None) = (pair.first(), pair.get(1), pair.get(2)) else {
                return Err(ScriptError::argument_type("obj.new", "entries must be [key, value] pairs"));
            };
            // Literal keys are checked once, here, at compile time.
            check_key(key).map_err(|unwind| unwind.into_root_error())?;
            entries.push((key.to_string(), self.emit(value_expr)?));
        }
        Ok(Arc::new(move |ctx| {
            ctx.step_gas()?;
            let mut map = IndexMap::with_capacity(entries.len());
            for (key, value) in &entries {
                map.insert(key.clone(), value(ctx)?);
            }
            ctx.alloc_object(map)
        }))
    }

    fn emit_junction(&self, args: &[Datum], conjunction: bool) -> Result<CompiledFn, ScriptError> {
        let operands = self.emit_all(args)?;
        Ok(Arc::new(move |ctx| {
            ctx.step_gas()?;
            for operand in &operands {
                let truthy = operand(ctx)?.truthy(ctx.heap());
                if truthy != conjunction {
                    return Ok(Value::Bool(!conjunction));
                }
            }
            Ok(Value::Bool(conjunction))
        }))
    }

    /// Arithmetic of any arity as a native fold (`^` folds right-to-left).
    fn emit_arith(&self, op: &str, args: &[Datum]) -> Result<CompiledFn, ScriptError> {
        let operands = self.emit_all(args)?;
        let label: Arc<str> = Arc::from(op);
        if op == "^" {
            return Ok(Arc::new(move |ctx| {
                ctx.step_gas()?;
                let mut nums = Vec::with_capacity(operands.len());
                for operand in &operands {
                    nums.push(numeric(&label, operand(ctx)?, ctx)?);
                }
                Ok(Value::Num(math::power_tower(&nums)))
            }));
        }
        let apply: fn(f64, f64) -> f64 = match op {
            "+" => |a, b| a + b,
            "-" => |a, b| a - b,
            "*" => |a, b| a * b,
            "/" => |a, b| a / b,
            "%" => |a, b| a % b,
            _ => unreachable!("caller matched the operator"),
        };
        Ok(Arc::new(move |ctx| {
            ctx.step_gas()?;
            let mut iter = operands.iter();
            let first = iter.next().expect("caller checked the arity");
            let mut acc = numeric(&label, first(ctx)?, ctx)?;
            for operand in iter {
                acc = apply(acc, numeric(&label, operand(ctx)?, ctx)?);
            }
            Ok(Value::Num(acc))
        }))
    }

    fn emit_equality(&self, op: &str, args: &[Datum]) -> Result<CompiledFn, ScriptError> {
        let negate = op == "!=";
        let lhs = self.emit(&args[0])?;
        let rhs = self.emit(&args[1])?;
        Ok(Arc::new(move |ctx| {
            ctx.step_gas()?;
            let a = lhs(ctx)?;
            let b = rhs(ctx)?;
            Ok(Value::Bool(a.eq_in(&b, ctx.heap()) != negate))
        }))
    }

    /// Chained comparison of any arity; fewer than two operands is
    /// vacuously true, matching the interpreter.
    fn emit_compare(&self, op: &str, args: &[Datum]) -> Result<CompiledFn, ScriptError> {
        let operands = self.emit_all(args)?;
        let label: Arc<str> = Arc::from(op);
        Ok(Arc::new(move |ctx| {
            ctx.step_gas()?;
            let mut prev: Option<Value> = None;
            for operand in &operands {
                let value = operand(ctx)?;
                if let Some(previous) = prev
                    && !math::ordered(&label, previous, value, ctx.heap())?
                {
                    return Ok(Value::Bool(false));
                }
                prev = Some(value);
            }
            Ok(Value::Bool(true))
        }))
    }

    /// An inlined fast path: the handler function is bound statically, the
    /// arity is checked at compile time, and the call skips the registry,
    /// the handler enum, and per-call validation. The opcode must still
    /// resolve in the explicit registry, so restricted registries (the
    /// optimizer's pure set) keep their boundaries.
    fn emit_fast(&self, op: &str, args: &[Datum], handler: FastFn) -> Result<CompiledFn, ScriptError> {
        let def = self.ops.get(op)?;
        validate_count(&def.meta, args.len())?;
        self.check_literal_keys(op, args)?;
        let compiled = self.emit_all(args)?;
        Ok(Arc::new(move |ctx| {
            ctx.step_gas()?;
            let mut values = Vec::with_capacity(compiled.len());
            for arg in &compiled {
                values.push(arg(ctx)?);
            }
            handler(values, ctx)
        }))
    }

    /// Registry dispatch: resolution happens here, once, at compile time.
    fn emit_dispatch(&self, op: &str, args: &[Datum]) -> Result<CompiledFn, ScriptError> {
        let def = Arc::clone(self.ops.get(op)?);
        self.check_literal_keys(op, args)?;
        if def.meta.lazy {
            let raw: Arc<[Datum]> = Arc::from(args.to_vec());
            return Ok(Arc::new(move |ctx| {
                ctx.step_gas()?;
                invoke_lazy(&def, &raw, ctx)
            }));
        }
        let compiled = self.emit_all(args)?;
        Ok(Arc::new(move |ctx| {
            ctx.step_gas()?;
            let mut values = Vec::with_capacity(compiled.len());
            for arg in &compiled {
                values.push(arg(ctx)?);
            }
            invoke_strict(&def, values, ctx)
        }))
    }

    /// Static half of the security filter: a reserved key appearing as a
    /// literal in an attribute-access position fails compilation. Dynamic
    /// keys keep the handlers' runtime check.
    fn check_literal_keys(&self, op: &str, args: &[Datum]) -> Result<(), ScriptError> {
        let key_slot = match op {
            "obj.get" | "obj.set" | "obj.has" | "obj.del" | "obj.invoke" | "list.get" | "list.set" => 1,
            _ => return Ok(()),
        };
        if let Some(Datum::Str(key)) = args.get(key_slot) {
            check_key(key).map_err(|unwind| unwind.into_root_error())?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum BindingKind {
    Declare,
    Assign,
}

/// A statically-bound strict handler.
type FastFn = fn(Vec<Value>, &mut ScriptContext) -> EvalResult<Value>;

/// The inline table: standard-library opcodes whose handlers compiled code
/// calls directly, without registry dispatch.
fn fast_path(op: &str) -> Option<FastFn> {
    Some(match op {
        "std.log" => core_mod::log_op,
        "std.warn" => core_mod::warn_op,
        "std.typeof" => core_mod::typeof_op,
        "std.this" => core_mod::this_op,
        "std.caller" => core_mod::caller_op,
        "std.arg" => core_mod::arg_op,
        "std.args" => core_mod::args_op,
        "send" => core_mod::send_op,
        "not" => core_mod::not_op,
        "str.concat" => strings::concat_op,
        "str.length" => strings::length_op,
        "str.slice" => strings::slice_op,
        "str.split" => strings::split_op,
        "str.replace" => strings::replace_op,
        "str.includes" => strings::includes_op,
        "str.indexOf" => strings::index_of_op,
        "str.toUpper" => strings::to_upper_op,
        "str.toLower" => strings::to_lower_op,
        "str.trim" => strings::trim_op,
        "list.new" => lists::new_op,
        "list.get" => lists::get_op,
        "list.set" => lists::set_op,
        "list.push" => lists::push_op,
        "list.pop" => lists::pop_op,
        "list.shift" => lists::shift_op,
        "list.unshift" => lists::unshift_op,
        "list.splice" => lists::splice_op,
        "list.sort" => lists::sort_op,
        "list.reverse" => lists::reverse_op,
        "list.slice" => lists::slice_op,
        "list.map" => lists::map_op,
        "list.filter" => lists::filter_op,
        "list.find" => lists::find_op,
        "list.reduce" => lists::reduce_op,
        "list.concat" => lists::concat_op,
        "list.join" => lists::join_op,
        "list.length" => lists::length_op,
        "list.includes" => lists::includes_op,
        "list.indexOf" => lists::index_of_op,
        "obj.get" => objects::get_op,
        "obj.set" => objects::set_op,
        "obj.has" => objects::has_op,
        "obj.del" => objects::del_op,
        "obj.keys" => objects::keys_op,
        "obj.values" => objects::values_op,
        "obj.entries" => objects::entries_op,
        "obj.merge" => objects::merge_op,
        "obj.invoke" => objects::invoke_op,
        "math.abs" => math::abs_op,
        "math.floor" => math::floor_op,
        "math.ceil" => math::ceil_op,
        "math.round" => math::round_op,
        "math.sqrt" => math::sqrt_op,
        "math.min" => math::min_op,
        "math.max" => math::max_op,
        "math.clamp" => math::clamp_op,
        "json.stringify" => json::stringify_op,
        "json.parse" => json::parse_op,
        "time.now" => time::now_op,
        "time.parse" => time::parse_op,
        "time.format" => time::format_op,
        "time.offset" => time::offset_op,
        _ => return None,
    })
}

fn numeric(op: &str, value: Value, ctx: &ScriptContext) -> EvalResult<f64> {
    value.as_num().ok_or_else(|| {
        ScriptError::argument_type(op, format!("expected a number, got {}", value.type_name(ctx.heap()))).into()
    })
}

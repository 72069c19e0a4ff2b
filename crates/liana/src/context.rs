//! Per-invocation evaluation state.
//!
//! A [`ScriptContext`] is created by the host for one script invocation and
//! discarded afterwards. It owns the arena, the scope chain, the gas budget,
//! the warning sink, the optional outbound `send` channel, and the host-call
//! replay cache that makes suspension work with synchronous handlers.

use std::{fmt, sync::Arc};

use crate::{
    datum::Datum,
    error::{EvalResult, PendingHostCall, ScriptError, TraceFrame, Unwind},
    heap::{CapabilityToken, Heap, Lambda},
    registry::OpRegistry,
    scope::{ScopeChain, ScopeSnapshot},
    trace::{EvalTracer, NoopTracer},
    value::Value,
};

/// Engine-level execution limits.
#[derive(Debug, Clone, Copy)]
pub struct EvalLimits {
    /// Step budget. Every interpreter loop iteration, compiled-node entry,
    /// and heap allocation costs one unit.
    pub gas: i64,
    /// Maximum nesting of re-entrant evaluation (lazy handlers, lambda
    /// application).
    pub max_depth: usize,
    /// Whether declared opcode parameters are validated before dispatch.
    pub validate_types: bool,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self {
            gas: 250_000,
            max_depth: 128,
            validate_types: true,
        }
    }
}

impl EvalLimits {
    #[must_use]
    pub fn with_gas(gas: i64) -> Self {
        Self {
            gas,
            ..Self::default()
        }
    }
}

/// Outbound message callback: `(channel, payload)`.
pub type SendFn = Box<dyn FnMut(&str, &Datum) + Send>;

/// State for one script invocation.
pub struct ScriptContext {
    heap: Heap,
    caller: Value,
    this: Value,
    args: Vec<Value>,
    /// Remaining step budget. Negative means exhausted.
    pub gas: i64,
    warnings: Vec<String>,
    pub(crate) vars: ScopeChain,
    pub(crate) cow: bool,
    /// Lambda-entry frames, for error stack traces.
    pub(crate) stack: Vec<TraceFrame>,
    send: Option<SendFn>,
    ops: Arc<OpRegistry>,
    limits: EvalLimits,
    initial_gas: i64,
    pub(crate) depth: usize,
    tracer: Box<dyn EvalTracer>,
    /// Results of host calls already answered, indexed by call ordinal.
    host_results: Vec<Datum>,
    /// Ordinal of the next host call in the current (re-)evaluation.
    next_host_call: usize,
    /// Sends dispatched in earlier replays; replayed sends below this
    /// watermark are suppressed.
    sends_done: usize,
    /// Sends encountered in the current (re-)evaluation.
    sends_seen: usize,
}

impl fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptContext")
            .field("gas", &self.gas)
            .field("depth", &self.depth)
            .field("warnings", &self.warnings.len())
            .field("host_results", &self.host_results.len())
            .finish_non_exhaustive()
    }
}

impl ScriptContext {
    /// Builds a context for one invocation.
    ///
    /// `caller` and `this` are entity records (maps carrying a numeric `id`)
    /// or any other boundary data the host chooses; the engine treats them
    /// as opaque values.
    #[must_use]
    pub fn new(ops: Arc<OpRegistry>, caller: &Datum, this: &Datum, args: &[Datum], limits: EvalLimits) -> Self {
        let mut heap = Heap::new();
        let caller = heap.load_datum(caller);
        let this = heap.load_datum(this);
        let args = args.iter().map(|arg| heap.load_datum(arg)).collect();
        let vars = ScopeChain::with_root(&mut heap);
        Self {
            heap,
            caller,
            this,
            args,
            gas: limits.gas,
            warnings: Vec::new(),
            vars,
            cow: false,
            stack: Vec::new(),
            send: None,
            ops,
            limits,
            initial_gas: limits.gas,
            depth: 0,
            tracer: Box::new(NoopTracer),
            host_results: Vec::new(),
            next_host_call: 0,
            sends_done: 0,
            sends_seen: 0,
        }
    }

    /// A context with no entities and no arguments, for tests and the
    /// optimizer's throwaway evaluations.
    #[must_use]
    pub fn minimal(ops: Arc<OpRegistry>, limits: EvalLimits) -> Self {
        Self::new(ops, &Datum::Null, &Datum::Null, &[], limits)
    }

    #[must_use]
    pub fn with_send(mut self, send: SendFn) -> Self {
        self.send = Some(send);
        self
    }

    #[must_use]
    pub fn with_tracer(mut self, tracer: Box<dyn EvalTracer>) -> Self {
        self.tracer = tracer;
        self
    }

    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    #[must_use]
    pub fn ops(&self) -> &Arc<OpRegistry> {
        &self.ops
    }

    #[must_use]
    pub fn validate_types(&self) -> bool {
        self.limits.validate_types
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.limits.max_depth
    }

    pub fn tracer_mut(&mut self) -> &mut dyn EvalTracer {
        self.tracer.as_mut()
    }

    // --- gas ---

    /// Charges one step. The loop calls this once per iteration.
    pub fn step_gas(&mut self) -> EvalResult<()> {
        self.charge_gas(1)
    }

    /// Charges `amount` steps, failing with uncatchable `GasExhausted` once
    /// the budget goes negative.
    pub fn charge_gas(&mut self, amount: i64) -> EvalResult<()> {
        self.gas -= amount;
        if self.gas < 0 {
            return Err(ScriptError::gas_exhausted().into());
        }
        Ok(())
    }

    // --- metered allocation ---

    pub fn alloc_str(&mut self, s: impl Into<String>) -> EvalResult<Value> {
        self.charge_gas(1)?;
        Ok(self.heap.alloc_str(s))
    }

    pub fn alloc_list(&mut self, items: Vec<Value>) -> EvalResult<Value> {
        self.charge_gas(1)?;
        Ok(self.heap.alloc_list(items))
    }

    pub fn alloc_object(&mut self, entries: indexmap::IndexMap<String, Value>) -> EvalResult<Value> {
        self.charge_gas(1)?;
        Ok(self.heap.alloc_object(entries))
    }

    pub fn alloc_lambda(&mut self, lambda: Lambda) -> EvalResult<Value> {
        self.charge_gas(1)?;
        Ok(self.heap.alloc_lambda(lambda))
    }

    pub fn alloc_capability(&mut self, token: CapabilityToken) -> EvalResult<Value> {
        self.charge_gas(1)?;
        Ok(self.heap.alloc_capability(token))
    }

    /// Loads boundary data into the arena, charging gas per allocated slot.
    pub fn load_datum(&mut self, datum: &Datum) -> EvalResult<Value> {
        let before = self.heap.len();
        let value = self.heap.load_datum(datum);
        let allocated = i64::try_from(self.heap.len() - before).unwrap_or(i64::MAX);
        self.charge_gas(allocated.max(1))?;
        Ok(value)
    }

    // --- scope discipline ---

    /// Splits the borrow so callers can walk the scope chain while touching
    /// the arena.
    pub(crate) fn scope_parts(&mut self) -> (&mut ScopeChain, &mut Heap) {
        (&mut self.vars, &mut self.heap)
    }

    /// Snapshots the scope for a block entry and arms copy-on-write.
    pub fn save_scope(&mut self) -> ScopeSnapshot {
        let snapshot = self.vars.snapshot(self.cow);
        self.cow = true;
        snapshot
    }

    /// Restores the scope snapshot taken at block entry.
    pub fn restore_scope(&mut self, snapshot: ScopeSnapshot) {
        self.cow = self.vars.restore(snapshot);
    }

    /// Declares a binding in the innermost scope, forking it first when the
    /// copy-on-write flag is armed. The fork allocates a scope map in the
    /// arena and is metered like any other allocation.
    pub fn declare(&mut self, name: &str, value: Value) -> EvalResult<()> {
        if self.cow {
            self.charge_gas(1)?;
            self.vars.push_frame(&mut self.heap);
            self.cow = false;
        }
        self.vars.declare(name, value, &mut self.heap);
        Ok(())
    }

    /// Updates the nearest existing binding; `UndefinedVariable` otherwise.
    pub fn assign(&mut self, name: &str, value: Value) -> EvalResult<()> {
        if self.vars.assign(name, value, &mut self.heap) {
            Ok(())
        } else {
            Err(ScriptError::undefined_variable(name).into())
        }
    }

    /// Reads a variable through the chain. Absent names read as `Null`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Value {
        self.vars.lookup(name, &self.heap).unwrap_or(Value::Null)
    }

    // --- invocation state ---

    #[must_use]
    pub fn caller(&self) -> Value {
        self.caller
    }

    #[must_use]
    pub fn this_entity(&self) -> Value {
        self.this
    }

    #[must_use]
    pub fn script_args(&self) -> &[Value] {
        &self.args
    }

    /// Appends a warning and reports it to the tracer.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.tracer.on_warning(&message);
        self.warnings.push(message);
    }

    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    /// Emits `std.log` output through the tracer and the `log` channel.
    pub fn log(&mut self, message: &str) {
        self.tracer.on_log(message);
        let payload = Datum::str(message);
        self.dispatch_send("log", &payload);
    }

    /// Dispatches an outbound message, suppressing duplicates during replay.
    pub fn dispatch_send(&mut self, channel: &str, payload: &Datum) {
        self.sends_seen += 1;
        if self.sends_seen <= self.sends_done {
            return;
        }
        self.sends_done = self.sends_seen;
        if let Some(send) = self.send.as_mut() {
            send(channel, payload);
        }
    }

    // --- host-call suspension ---

    /// Requests a host function result.
    ///
    /// Each call site is identified by its ordinal within the evaluation.
    /// If the host already answered this ordinal (in an earlier replay), the
    /// cached result is returned; otherwise evaluation unwinds with a
    /// `HostCall`, the host answers, and the script re-evaluates
    /// deterministically up to the next unanswered call.
    pub fn host_call(&mut self, function: &str, args: Vec<Datum>) -> EvalResult<Value> {
        let ordinal = self.next_host_call;
        self.next_host_call += 1;
        if let Some(cached) = self.host_results.get(ordinal) {
            let cached = cached.clone();
            return self.load_datum(&cached);
        }
        Err(Unwind::HostCall(Box::new(PendingHostCall {
            function: function.to_owned(),
            args,
            call_id: u32::try_from(ordinal).unwrap_or(u32::MAX),
        })))
    }

    /// Records the host's answer for the next unanswered call ordinal.
    pub(crate) fn push_host_result(&mut self, result: Datum) {
        self.host_results.push(result);
    }

    /// Answers the pending host call and rewinds transient state so the next
    /// evaluation replays deterministically. Hosts driving compiled scripts
    /// call this between [`crate::CompiledScript::call`] attempts;
    /// interpreter hosts go through [`crate::Suspended::resume`].
    pub fn answer_host_call(&mut self, result: Datum) {
        self.push_host_result(result);
        self.reset_for_replay();
    }

    /// Resets transient state for a replay after a host call was answered.
    ///
    /// The arena is kept (values allocated in earlier passes stay valid);
    /// scopes, gas, warnings, and counters start over so the replay is
    /// indistinguishable from a fresh run that happens to have cached host
    /// results.
    pub(crate) fn reset_for_replay(&mut self) {
        self.gas = self.initial_gas;
        self.warnings.clear();
        self.stack.clear();
        self.vars = ScopeChain::with_root(&mut self.heap);
        self.cow = false;
        self.depth = 0;
        self.next_host_call = 0;
        self.sends_seen = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ScriptContext {
        ScriptContext::minimal(Arc::new(OpRegistry::empty()), EvalLimits::default())
    }

    #[test]
    fn let_in_block_does_not_leak() {
        let mut ctx = ctx();
        ctx.declare("outer", Value::Num(1.0)).unwrap();
        let snapshot = ctx.save_scope();
        ctx.declare("inner", Value::Num(2.0)).unwrap();
        assert_eq!(ctx.lookup("inner").as_num(), Some(2.0));
        ctx.restore_scope(snapshot);
        assert!(matches!(ctx.lookup("inner"), Value::Null));
        assert_eq!(ctx.lookup("outer").as_num(), Some(1.0));
    }

    #[test]
    fn scope_forks_charge_gas() {
        let mut ctx = ScriptContext::minimal(Arc::new(OpRegistry::empty()), EvalLimits::with_gas(1));
        let snapshot = ctx.save_scope();
        // The first declare after a block entry forks a scope map: one gas.
        ctx.declare("a", Value::Num(1.0)).unwrap();
        // The fork already happened, so further declares are free...
        ctx.declare("b", Value::Num(2.0)).unwrap();
        ctx.restore_scope(snapshot);
        // ...but the next block's fork exceeds the exhausted budget.
        let _ = ctx.save_scope();
        assert!(ctx.declare("c", Value::Num(3.0)).is_err());
    }

    #[test]
    fn gas_exhaustion_is_fatal() {
        let mut ctx = ScriptContext::minimal(Arc::new(OpRegistry::empty()), EvalLimits::with_gas(2));
        assert!(ctx.step_gas().is_ok());
        assert!(ctx.step_gas().is_ok());
        let err = ctx.step_gas().unwrap_err();
        match err {
            Unwind::Error(err) => assert!(!err.is_catchable()),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn host_call_suspends_then_replays_cached() {
        let mut ctx = ctx();
        let err = ctx.host_call("fetch", vec![Datum::Num(1.0)]).unwrap_err();
        let Unwind::HostCall(call) = err else {
            panic!("expected host call");
        };
        assert_eq!(call.function, "fetch");
        assert_eq!(call.call_id, 0);

        ctx.push_host_result(Datum::str("answer"));
        ctx.reset_for_replay();
        let value = ctx.host_call("fetch", vec![Datum::Num(1.0)]).unwrap();
        assert_eq!(value.as_str(ctx.heap()), Some("answer"));
        assert!(ctx.host_call("fetch", vec![]).is_err());
    }

    #[test]
    fn replayed_sends_are_suppressed() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&seen);
        let mut ctx = ctx().with_send(Box::new(move |channel, payload| {
            sink.lock().unwrap().push(format!("{channel}:{payload}"));
        }));
        ctx.dispatch_send("say", &Datum::str("hi"));
        ctx.reset_for_replay();
        ctx.dispatch_send("say", &Datum::str("hi"));
        ctx.dispatch_send("say", &Datum::str("again"));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), ["say:\"hi\"", "say:\"again\""]);
    }
}

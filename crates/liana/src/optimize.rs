//! The optimizer: opportunistic constant folding of pure subtrees.
//!
//! A subtree is pure when every opcode in it is in the pure registry and
//! every variable it reads or assigns was introduced by a `std.let` within
//! the subtree itself. Pure subtrees are compiled against the pure registry,
//! evaluated in a throwaway context, and replaced by their value — primitives
//! inline, compound values wrapped in `std.quote`.
//!
//! Folding is never a blocker: if evaluation fails (runtime error, gas,
//! cycles in the result), the original subtree is kept and the failure is
//! reported through the tracer.

use std::sync::{Arc, OnceLock};

use ahash::AHashSet;

use crate::{
    compile::compile,
    context::{EvalLimits, ScriptContext},
    datum::Datum,
    registry::OpRegistry,
    trace::{EvalTracer, FoldOutcome, StderrTracer},
};

/// Gas budget for one fold attempt. Generous enough for honest constant
/// expressions, small enough that a pure gas bomb just fails to fold.
const FOLD_GAS: i64 = 100_000;

/// Value-constructor heads that are never folded at the top level: their
/// unevaluated slots are the value.
const UNFOLDED_HEADS: &[&str] = &["std.quote", "std.lambda", "obj.new"];

/// The process-wide pure registry.
pub fn pure_registry() -> Arc<OpRegistry> {
    static PURE: OnceLock<Arc<OpRegistry>> = OnceLock::new();
    Arc::clone(PURE.get_or_init(|| Arc::new(OpRegistry::pure())))
}

fn standard_registry() -> Arc<OpRegistry> {
    static STANDARD: OnceLock<Arc<OpRegistry>> = OnceLock::new();
    Arc::clone(STANDARD.get_or_init(|| Arc::new(OpRegistry::standard())))
}

/// Partially evaluates an AST. Fold failures are logged to stderr; inject a
/// tracer via [`optimize_with`] to observe or silence them.
#[must_use]
pub fn optimize(ast: &Datum) -> Datum {
    optimize_with(ast, &mut StderrTracer)
}

/// Partially evaluates an AST, reporting fold decisions to the tracer.
#[must_use]
pub fn optimize_with(ast: &Datum, tracer: &mut dyn EvalTracer) -> Datum {
    let optimizer = Optimizer {
        pure: pure_registry(),
        standard: standard_registry(),
    };
    optimizer.reduce(ast, tracer)
}

struct Optimizer {
    pure: Arc<OpRegistry>,
    standard: Arc<OpRegistry>,
}

impl Optimizer {
    fn reduce(&self, node: &Datum, tracer: &mut dyn EvalTracer) -> Datum {
        let Some((op, args)) = node.as_call() else {
            return node.clone();
        };

        let mut scopes = PurityScopes::new();
        if self.is_pure(node, &mut scopes) {
            if UNFOLDED_HEADS.contains(&op) {
                tracer.on_fold(op, FoldOutcome::Skipped);
            } else {
                match self.try_fold(node) {
                    Some(folded) => {
                        tracer.on_fold(op, FoldOutcome::Folded);
                        return folded;
                    }
                    None => tracer.on_fold(op, FoldOutcome::Failed),
                }
            }
        }

        self.reduce_children(op, args, tracer)
    }

    /// Rebuilds the call with reduced children, leaving raw (unevaluated)
    /// slots untouched.
    fn reduce_children(&self, op: &str, args: &[Datum], tracer: &mut dyn EvalTracer) -> Datum {
        let reduced = match op {
            // The payload is the value; nothing inside is an expression.
            "std.quote" => args.to_vec(),
            "std.lambda" => match args {
                [params, body] => vec![params.clone(), self.reduce(body, tracer)],
                _ => args.to_vec(),
            },
            "std.let" | "std.set" => match args {
                [name, value] => vec![name.clone(), self.reduce(value, tracer)],
                _ => args.to_vec(),
            },
            "std.for" => match args {
                [name, list, body] => vec![name.clone(), self.reduce(list, tracer), self.reduce(body, tracer)],
                _ => args.to_vec(),
            },
            "std.try" => match args {
                [body, name, catch] => vec![self.reduce(body, tracer), name.clone(), self.reduce(catch, tracer)],
                _ => args.to_vec(),
            },
            "obj.new" => args
                .iter()
                .map(|entry| match entry {
                    Datum::List(pair) if pair.len() == 2 => {
                        Datum::list(vec![pair[0].clone(), self.reduce(&pair[1], tracer)])
                    }
                    other => other.clone(),
                })
                .collect(),
            // Lazy forms whose slots are all plain expressions.
            "std.seq" | "std.if" | "std.while" | "and" | "or" => {
                args.iter().map(|arg| self.reduce(arg, tracer)).collect()
            }
            _ => match self.standard.lookup(op) {
                // A host-registered or lazy opcode we don't know the slot
                // shapes of: leave its arguments alone.
                None => args.to_vec(),
                Some(def) if def.meta.lazy => args.to_vec(),
                Some(_) => args.iter().map(|arg| self.reduce(arg, tracer)).collect(),
            },
        };
        Datum::call(op, reduced)
    }

    /// Compiles and runs a pure subtree; `None` means the attempt failed and
    /// the original must be kept.
    fn try_fold(&self, node: &Datum) -> Option<Datum> {
        let compiled = compile(node, &self.pure).ok()?;
        let mut ctx = ScriptContext::minimal(
            Arc::clone(&self.pure),
            EvalLimits {
                gas: FOLD_GAS,
                max_depth: 64,
                validate_types: true,
            },
        );
        let value = compiled.call(&mut ctx).ok()?;
        let datum = ctx.heap().render_json(value).ok()?;
        if datum.is_literal() {
            Some(datum)
        } else {
            Some(Datum::call("std.quote", vec![datum]))
        }
    }

    fn is_pure(&self, node: &Datum, scopes: &mut PurityScopes) -> bool {
        let Some((op, args)) = node.as_call() else {
            return node.is_literal();
        };
        if !self.pure.contains(op) {
            return false;
        }
        match op {
            "std.quote" => true,
            "std.let" => match args {
                [Datum::Str(name), value] => {
                    let pure = self.is_pure(value, scopes);
                    if pure {
                        scopes.bind(name);
                    }
                    pure
                }
                _ => false,
            },
            "std.set" => match args {
                [Datum::Str(name), value] => scopes.bound(name) && self.is_pure(value, scopes),
                _ => false,
            },
            "std.var" => matches!(args, [Datum::Str(name)] if scopes.bound(name)),
            "std.seq" | "std.if" | "std.while" => {
                scopes.enter();
                let pure = args.iter().all(|arg| self.is_pure(arg, scopes));
                scopes.exit();
                pure
            }
            "std.for" => match args {
                [Datum::Str(name), list, body] => {
                    scopes.enter();
                    scopes.bind(name);
                    let pure = self.is_pure(list, scopes) && self.is_pure(body, scopes);
                    scopes.exit();
                    pure
                }
                _ => false,
            },
            "obj.new" => args.iter().all(|entry| match entry {
                Datum::List(pair) => {
                    matches!(pair.first(), Some(Datum::Str(_))) && pair.len() == 2 && self.is_pure(&pair[1], scopes)
                }
                _ => false,
            }),
            _ => args.iter().all(|arg| self.is_pure(arg, scopes)),
        }
    }
}

/// Shadow scopes for purity analysis: tracks which names the subtree itself
/// introduced.
struct PurityScopes {
    stack: Vec<AHashSet<String>>,
}

impl PurityScopes {
    fn new() -> Self {
        Self {
            stack: vec![AHashSet::new()],
        }
    }

    fn enter(&mut self) {
        self.stack.push(AHashSet::new());
    }

    fn exit(&mut self) {
        self.stack.pop();
    }

    fn bind(&mut self, name: &str) {
        self.stack
            .last_mut()
            .expect("purity scope stack has a root")
            .insert(name.to_owned());
    }

    fn bound(&self, name: &str) -> bool {
        self.stack.iter().any(|scope| scope.contains(name))
    }
}

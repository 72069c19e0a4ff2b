//! Lowering: surface statements and expressions onto opcodes.
//!
//! The lowerer tracks locally bound names as it walks. A call whose target
//! is a locally bound identifier becomes `std.apply` — that is the only way
//! user code shadows a built-in. Desugared forms (compound assignment,
//! nullish coalescing, optional chaining) introduce `__tmp_N` temporaries
//! when the base expression is non-trivial, so bases evaluate exactly once.

use ahash::AHashSet;

use super::{
    SurfaceError, is_reserved_word, op_of_alias,
    parser::{ArrowBody, AssignOp, BinOp, Expr, Stmt, TemplatePart, parse_program},
};
use crate::datum::Datum;

/// Transpiles surface source into an AST.
///
/// A program that is a single expression statement lowers to that
/// expression; anything longer lowers to a `std.seq`.
pub fn transpile(source: &str) -> Result<Datum, SurfaceError> {
    let stmts = parse_program(source)?;
    let mut lowerer = Lowerer::new();
    lowerer.scopes.push(AHashSet::new());
    if let [Stmt::Expr(expr)] = stmts.as_slice() {
        return lowerer.expr(expr);
    }
    let body = lowerer.stmt_list(&stmts)?;
    Ok(Datum::call("std.seq", body))
}

struct Lowerer {
    scopes: Vec<AHashSet<String>>,
    tmp_counter: usize,
}

impl Lowerer {
    fn new() -> Self {
        Self {
            scopes: Vec::new(),
            tmp_counter: 0,
        }
    }

    fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.contains(name))
    }

    fn bind(&mut self, name: &str) {
        self.scopes
            .last_mut()
            .expect("lowerer scope stack is non-empty")
            .insert(name.to_owned());
    }

    fn fresh_tmp(&mut self) -> String {
        let name = format!("__tmp_{}", self.tmp_counter);
        self.tmp_counter += 1;
        name
    }

    // --- statements ---

    fn stmt_list(&mut self, stmts: &[Stmt]) -> Result<Vec<Datum>, SurfaceError> {
        stmts.iter().map(|stmt| self.stmt(stmt)).collect()
    }

    /// Lowers a statement block into `std.seq`, with its own binding scope.
    fn block(&mut self, stmts: &[Stmt]) -> Result<Datum, SurfaceError> {
        self.scopes.push(AHashSet::new());
        let body = self.stmt_list(stmts);
        self.scopes.pop();
        Ok(Datum::call("std.seq", body?))
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<Datum, SurfaceError> {
        match stmt {
            Stmt::Expr(expr) => self.expr(expr),
            Stmt::Let { name, value } => {
                let value = match value {
                    Some(expr) => self.expr(expr)?,
                    None => Datum::Null,
                };
                self.bind(name);
                Ok(Datum::call("std.let", vec![Datum::str(name), value]))
            }
            Stmt::Func { name, params, body } => {
                // The name binds before the body lowers, so recursion works.
                self.bind(name);
                let lambda = self.lambda(params, &ArrowBody::Block(body.clone()))?;
                Ok(Datum::call("std.let", vec![Datum::str(name), lambda]))
            }
            Stmt::If { cond, then, otherwise } => {
                let cond = self.expr(cond)?;
                let mut args = vec![cond, self.block(then)?];
                if let Some(otherwise) = otherwise {
                    args.push(self.block(otherwise)?);
                }
                Ok(Datum::call("std.if", args))
            }
            Stmt::While { cond, body } => {
                let cond = self.expr(cond)?;
                let body = self.block(body)?;
                Ok(Datum::call("std.while", vec![cond, body]))
            }
            Stmt::ForOf { name, iter, body } => {
                let iter = self.expr(iter)?;
                self.scopes.push(AHashSet::new());
                self.bind(name);
                let body = self.stmt_list(body);
                self.scopes.pop();
                Ok(Datum::call(
                    "std.for",
                    vec![Datum::str(name), iter, Datum::call("std.seq", body?)],
                ))
            }
            Stmt::ForClassic { init, cond, step, body } => self.classic_for(init.as_deref(), cond.as_ref(), step.as_ref(), body),
            Stmt::Break => Ok(Datum::call("std.break", vec![])),
            Stmt::Continue => Ok(Datum::call("std.continue", vec![])),
            Stmt::Return(value) => {
                let args = match value {
                    Some(expr) => vec![self.expr(expr)?],
                    None => vec![],
                };
                Ok(Datum::call("std.return", args))
            }
            Stmt::Throw(expr) => {
                let value = self.expr(expr)?;
                Ok(Datum::call("std.throw", vec![value]))
            }
            Stmt::Try { body, err, catch } => {
                let body = self.block(body)?;
                self.scopes.push(AHashSet::new());
                self.bind(err);
                let catch = self.stmt_list(catch);
                self.scopes.pop();
                Ok(Datum::call(
                    "std.try",
                    vec![body, Datum::str(err), Datum::call("std.seq", catch?)],
                ))
            }
            Stmt::Block(stmts) => self.block(stmts),
        }
    }

    /// `for (init; cond; step) B` → `seq(init, while(cond, seq(B, step)))`.
    fn classic_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &[Stmt],
    ) -> Result<Datum, SurfaceError> {
        self.scopes.push(AHashSet::new());
        let result = (|| {
            let init = init.map(|stmt| self.stmt(stmt)).transpose()?;
            let cond = match cond {
                Some(expr) => self.expr(expr)?,
                None => Datum::Bool(true),
            };
            let block = self.block(body)?;
            let inner = match step {
                Some(step) => {
                    let step = self.expr(step)?;
                    Datum::call("std.seq", vec![block, step])
                }
                None => block,
            };
            let looped = Datum::call("std.while", vec![cond, inner]);
            Ok(match init {
                Some(init) => Datum::call("std.seq", vec![init, looped]),
                None => Datum::call("std.seq", vec![looped]),
            })
        })();
        self.scopes.pop();
        result
    }

    // --- expressions ---

    fn expr(&mut self, expr: &Expr) -> Result<Datum, SurfaceError> {
        match expr {
            Expr::Null | Expr::Undefined => Ok(Datum::Null),
            Expr::Bool(b) => Ok(Datum::Bool(*b)),
            Expr::Num(n) => Ok(Datum::Num(*n)),
            Expr::Str(s) => Ok(Datum::str(s)),
            Expr::Template(parts) => {
                let mut args = Vec::with_capacity(parts.len());
                for part in parts {
                    match part {
                        TemplatePart::Lit(text) => args.push(Datum::str(text)),
                        TemplatePart::Expr(expr) => args.push(self.expr(expr)?),
                    }
                }
                Ok(Datum::call("str.concat", args))
            }
            Expr::Ident(name) => Ok(Datum::call("std.var", vec![Datum::str(name)])),
            Expr::Array(items) => {
                let items: Result<Vec<_>, _> = items.iter().map(|item| self.expr(item)).collect();
                Ok(Datum::call("list.new", items?))
            }
            Expr::Object(props) => {
                let mut entries = Vec::with_capacity(props.len());
                for (key, value) in props {
                    let value = self.expr(value)?;
                    entries.push(Datum::list(vec![Datum::str(key), value]));
                }
                Ok(Datum::call("obj.new", entries))
            }
            Expr::Not(inner) => {
                let inner = self.expr(inner)?;
                Ok(Datum::call("not", vec![inner]))
            }
            Expr::Neg(inner) => {
                if let Expr::Num(n) = inner.as_ref() {
                    return Ok(Datum::Num(-n));
                }
                let inner = self.expr(inner)?;
                Ok(Datum::call("-", vec![Datum::Num(0.0), inner]))
            }
            Expr::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs),
            Expr::Assign { op, target, value } => self.assignment(*op, target, value),
            Expr::Ternary { cond, then, otherwise } => {
                let cond = self.expr(cond)?;
                let then = self.expr(then)?;
                let otherwise = self.expr(otherwise)?;
                Ok(Datum::call("std.if", vec![cond, then, otherwise]))
            }
            Expr::Call { callee, args, optional } => self.call(callee, args, *optional),
            Expr::Member { object, property, optional } => {
                let key = Datum::str(property);
                self.access(object, key, *optional)
            }
            Expr::Index { object, index, optional } => {
                let key = self.expr(index)?;
                self.access(object, key, *optional)
            }
            Expr::Arrow { params, body } => self.lambda(params, body),
            Expr::Delete(target) => match target.as_ref() {
                Expr::Member { object, property, optional: false } => {
                    let object = self.expr(object)?;
                    Ok(Datum::call("obj.del", vec![object, Datum::str(property)]))
                }
                Expr::Index { object, index, optional: false } => {
                    let object = self.expr(object)?;
                    let key = self.expr(index)?;
                    Ok(Datum::call("obj.del", vec![object, key]))
                }
                _ => Err(SurfaceError::unsupported("'delete' of a non-member expression", 0, 0)),
            },
        }
    }

    fn binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<Datum, SurfaceError> {
        if op == BinOp::Nullish {
            let fallback = self.expr(rhs)?;
            return self.guarded(lhs, |_, probe| Ok(probe), Some(fallback));
        }
        if op == BinOp::In {
            let key = self.expr(lhs)?;
            let object = self.expr(rhs)?;
            return Ok(Datum::call("obj.has", vec![object, key]));
        }
        let lhs = self.expr(lhs)?;
        let rhs = self.expr(rhs)?;
        let name = match op {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Nullish | BinOp::In => unreachable!("handled above"),
        };
        Ok(Datum::call(name, vec![lhs, rhs]))
    }

    /// Member/index access, optionally null-guarded (`a?.b`, `a?.[k]`).
    fn access(&mut self, object: &Expr, key: Datum, optional: bool) -> Result<Datum, SurfaceError> {
        if optional {
            return self.guarded(
                object,
                move |_, probe| Ok(Datum::call("obj.get", vec![probe, key.clone()])),
                None,
            );
        }
        let object = self.expr(object)?;
        Ok(Datum::call("obj.get", vec![object, key]))
    }

    /// The guarded-evaluation desugar shared by `??`, `a?.b`, and `f?.()`:
    /// `base != null ? then(base) : fallback`, with a temporary when the
    /// base is non-trivial so it evaluates exactly once.
    fn guarded(
        &mut self,
        base: &Expr,
        then: impl Fn(&mut Self, Datum) -> Result<Datum, SurfaceError>,
        fallback: Option<Datum>,
    ) -> Result<Datum, SurfaceError> {
        let fallback = fallback.unwrap_or(Datum::Null);
        if is_trivial(base) {
            let probe = self.expr(base)?;
            let hit = then(self, probe.clone())?;
            let guard = Datum::call("!=", vec![probe, Datum::Null]);
            return Ok(Datum::call("std.if", vec![guard, hit, fallback]));
        }
        let tmp = self.fresh_tmp();
        let bound = self.expr(base)?;
        let probe = Datum::call("std.var", vec![Datum::str(&tmp)]);
        let hit = then(self, probe.clone())?;
        let guard = Datum::call("!=", vec![probe, Datum::Null]);
        Ok(Datum::call(
            "std.seq",
            vec![
                Datum::call("std.let", vec![Datum::str(&tmp), bound]),
                Datum::call("std.if", vec![guard, hit, fallback]),
            ],
        ))
    }

    fn lambda(&mut self, params: &[String], body: &ArrowBody) -> Result<Datum, SurfaceError> {
        self.scopes.push(AHashSet::new());
        for param in params {
            self.bind(param);
        }
        let lowered = (|| match body {
            ArrowBody::Expr(expr) => self.expr(expr),
            ArrowBody::Block(stmts) => {
                // A trailing `return e;` is the block's value; dropping the
                // explicit return keeps `seq` semantics and lets decompiled
                // lambdas round-trip.
                let (last, rest) = match stmts.split_last() {
                    Some((Stmt::Return(value), rest)) => (value.clone(), rest),
                    _ => (None, stmts.as_slice()),
                };
                let mut body = self.stmt_list(rest)?;
                if let Some(tail) = match (&last, rest.len() == stmts.len()) {
                    (Some(expr), _) => Some(self.expr(expr)?),
                    (None, false) => Some(Datum::Null),
                    (None, true) => None,
                } {
                    body.push(tail);
                }
                Ok(Datum::call("std.seq", body))
            }
        })();
        self.scopes.pop();
        let params = Datum::list(params.iter().map(Datum::str).collect());
        Ok(Datum::call("std.lambda", vec![params, lowered?]))
    }

    fn call(&mut self, callee: &Expr, args: &[Expr], optional: bool) -> Result<Datum, SurfaceError> {
        let lowered_args: Result<Vec<_>, _> = args.iter().map(|arg| self.expr(arg)).collect();
        let lowered_args = lowered_args?;

        if optional {
            // f?.(...) — call only when the callee is non-null. A method
            // callee keeps its receiver through obj.invoke.
            if let Expr::Member { object, property, optional: false } = callee {
                let property = property.clone();
                return self.guarded(
                    object,
                    move |_, probe| {
                        let mut invoke = vec![probe, Datum::str(&property)];
                        invoke.extend(lowered_args.iter().cloned());
                        Ok(Datum::call("obj.invoke", invoke))
                    },
                    None,
                );
            }
            return self.guarded(
                callee,
                move |_, probe| {
                    let mut apply = vec![probe];
                    apply.extend(lowered_args.iter().cloned());
                    Ok(Datum::call("std.apply", apply))
                },
                None,
            );
        }

        // A dotted path whose root is not shadowed names an opcode.
        if let Some(op_name) = self.opcode_target(callee) {
            return Ok(Datum::call(&op_name, lowered_args));
        }

        match callee {
            // Locally bound identifier: user lambda.
            Expr::Ident(name) => {
                let mut apply = vec![Datum::call("std.var", vec![Datum::str(name)])];
                apply.extend(lowered_args);
                Ok(Datum::call("std.apply", apply))
            }
            // Method call: fetch the member, then apply it.
            Expr::Member { object, property, optional: false } => {
                let object = self.expr(object)?;
                let target = Datum::call("obj.get", vec![object, Datum::str(property)]);
                let mut apply = vec![target];
                apply.extend(lowered_args);
                Ok(Datum::call("std.apply", apply))
            }
            Expr::Index { object, index, optional: false } => {
                let object = self.expr(object)?;
                let key = self.expr(index)?;
                let target = Datum::call("obj.get", vec![object, key]);
                let mut apply = vec![target];
                apply.extend(lowered_args);
                Ok(Datum::call("std.apply", apply))
            }
            _ => {
                let target = self.expr(callee)?;
                let mut apply = vec![target];
                apply.extend(lowered_args);
                Ok(Datum::call("std.apply", apply))
            }
        }
    }

    /// Resolves a call target to an opcode name, or `None` when it is a
    /// user value.
    ///
    /// - a dotted identifier path with an unshadowed root joins into a
    ///   namespaced name (`list.map`, `std.apply`);
    /// - a bare identifier ending in `_` whose stem is a reserved word
    ///   resolves to the `std.` form (`if_` → `std.if`);
    /// - a bare operator alias resolves to its symbol (`lt` → `<`);
    /// - any other unshadowed bare identifier is a global opcode name.
    fn opcode_target(&self, callee: &Expr) -> Option<String> {
        match callee {
            Expr::Ident(name) => {
                if self.is_local(name) {
                    return None;
                }
                if let Some(stem) = name.strip_suffix('_')
                    && is_reserved_word(stem)
                {
                    return Some(format!("std.{stem}"));
                }
                if let Some(symbol) = op_of_alias(name) {
                    return Some(symbol.to_owned());
                }
                Some(name.to_string())
            }
            Expr::Member { object, property, optional: false } => {
                let mut segments = vec![property.clone()];
                let mut cursor = object.as_ref();
                loop {
                    match cursor {
                        Expr::Member { object, property, optional: false } => {
                            segments.push(property.clone());
                            cursor = object.as_ref();
                        }
                        Expr::Ident(root) => {
                            if self.is_local(root) {
                                return None;
                            }
                            segments.push(root.to_string());
                            segments.reverse();
                            // Strip the reserved-word escape on the leaf:
                            // std.typeof_ resolves to std.typeof.
                            if let Some(leaf) = segments.last_mut()
                                && leaf.ends_with('_')
                            {
                                let stem = leaf[..leaf.len() - 1].to_owned();
                                if is_reserved_word(&stem) {
                                    *leaf = stem;
                                }
                            }
                            return Some(segments.join("."));
                        }
                        _ => return None,
                    }
                }
            }
            _ => None,
        }
    }

    fn assignment(&mut self, op: AssignOp, target: &Expr, value: &Expr) -> Result<Datum, SurfaceError> {
        match target {
            Expr::Ident(name) => {
                let current = || Datum::call("std.var", vec![Datum::str(name)]);
                let value = self.expr(value)?;
                let combined = self.combine(op, current(), value)?;
                Ok(Datum::call("std.set", vec![Datum::str(name), combined]))
            }
            Expr::Member { object, property, optional: false } => {
                let key = Datum::str(property);
                self.member_assignment(op, object, key, value)
            }
            Expr::Index { object, index, optional: false } => {
                let key = self.expr(index)?;
                self.member_assignment(op, object, key, value)
            }
            _ => Err(SurfaceError::InvalidAssignment { line: 0, column: 0 }),
        }
    }

    /// `o.k op= v` — compound member assignment evaluates the base (and a
    /// computed key) exactly once.
    fn member_assignment(&mut self, op: AssignOp, object: &Expr, key: Datum, value: &Expr) -> Result<Datum, SurfaceError> {
        let value = self.expr(value)?;

        if op == AssignOp::Assign {
            let object = self.expr(object)?;
            return Ok(Datum::call("obj.set", vec![object, key, value]));
        }

        if is_trivial(object) && key.is_literal() {
            let base = self.expr(object)?;
            let current = Datum::call("obj.get", vec![base.clone(), key.clone()]);
            let combined = self.combine(op, current, value)?;
            return Ok(Datum::call("obj.set", vec![base, key, combined]));
        }

        // Non-trivial base: hold it (and a computed key) in temporaries.
        let base_tmp = self.fresh_tmp();
        let base = self.expr(object)?;
        let mut setup = vec![Datum::call("std.let", vec![Datum::str(&base_tmp), base])];
        let base_ref = Datum::call("std.var", vec![Datum::str(&base_tmp)]);

        let key_ref = if key.is_literal() {
            key
        } else {
            let key_tmp = self.fresh_tmp();
            setup.push(Datum::call("std.let", vec![Datum::str(&key_tmp), key]));
            Datum::call("std.var", vec![Datum::str(&key_tmp)])
        };

        let current = Datum::call("obj.get", vec![base_ref.clone(), key_ref.clone()]);
        let combined = self.combine(op, current, value)?;
        setup.push(Datum::call("obj.set", vec![base_ref, key_ref, combined]));
        Ok(Datum::call("std.seq", setup))
    }

    /// Combines the current value with the operand per the compound
    /// assignment operator.
    fn combine(&mut self, op: AssignOp, current: Datum, value: Datum) -> Result<Datum, SurfaceError> {
        let name = match op {
            AssignOp::Assign => return Ok(value),
            AssignOp::Add => "+",
            AssignOp::Sub => "-",
            AssignOp::Mul => "*",
            AssignOp::Div => "/",
            AssignOp::Mod => "%",
            AssignOp::Pow => "^",
            AssignOp::And => "and",
            AssignOp::Or => "or",
            AssignOp::Nullish => {
                let guard = Datum::call("!=", vec![current.clone(), Datum::Null]);
                return Ok(Datum::call("std.if", vec![guard, current, value]));
            }
        };
        Ok(Datum::call(name, vec![current, value]))
    }
}

/// An expression that can be duplicated without observable effect.
fn is_trivial(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Ident(_) | Expr::Null | Expr::Undefined | Expr::Bool(_) | Expr::Num(_) | Expr::Str(_)
    )
}

//! Decompilation: rendering an AST as surface source.
//!
//! The contract is round-tripping: for any AST the transpiler could have
//! produced, `transpile(decompile(ast))` yields the same tree. Statement
//! context leans on the natural mapping (blocks are `std.seq`, `if`/`while`/
//! `for` render as statements); expression context re-sugars the transpiler's
//! guarded desugarings (`??`, `?.`, `?.()`), renders ternaries from
//! three-argument `std.if`, and falls back to reverse-sanitized opcode calls
//! (`if_(...)`) where the surface has no dedicated syntax. Infix operators
//! parenthesize unconditionally; n-ary (non-binary) operator nodes render
//! through their identifier aliases (`add(a, b, c)`).

use super::{alias_of, is_identifier_like, is_reserved_word, sanitize_identifier};
use crate::{datum::Datum, value::Value};

/// Renders an AST as surface source.
#[must_use]
pub fn decompile(ast: &Datum) -> String {
    let mut out = String::new();
    match ast.as_call() {
        Some(("std.seq", items)) => {
            for item in items {
                write_stmt(item, &mut out, 0);
            }
        }
        _ => write_stmt(ast, &mut out, 0),
    }
    if out.ends_with('\n') {
        out.pop();
    }
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

// --- statement context ---

fn write_stmt(node: &Datum, out: &mut String, depth: usize) {
    let Some((op, args)) = node.as_call() else {
        write_expr_stmt(&expr(node), out, depth);
        return;
    };
    // Guarded desugarings (`??`, `?.`) surface in statement position too;
    // their branches are bare expressions, not blocks, so they must render
    // as expression statements to round-trip.
    if let Some(sugar) = resugar(op, args) {
        write_expr_stmt(&sugar, out, depth);
        return;
    }
    match (op, args) {
        ("std.seq", items) => {
            indent(out, depth);
            out.push_str("{\n");
            for item in items {
                write_stmt(item, out, depth + 1);
            }
            indent(out, depth);
            out.push_str("}\n");
        }
        // A binding whose value is a block-bodied lambda prints as a
        // function declaration. The function form binds its name before the
        // body lowers, which is what keeps recursive bindings round-tripping.
        ("std.let", [Datum::Str(name), value]) if is_identifier_like(name) && block_lambda(value).is_some() => {
            let (params, items) = block_lambda(value).expect("guard checked");
            indent(out, depth);
            out.push_str("function ");
            out.push_str(name);
            out.push_str(&lambda_block(&params, items, depth));
            out.push('\n');
        }
        ("std.let", [Datum::Str(name), value]) if is_identifier_like(name) => {
            indent(out, depth);
            out.push_str("let ");
            out.push_str(name);
            out.push_str(" = ");
            out.push_str(&expr(value));
            out.push_str(";\n");
        }
        ("std.set", [Datum::Str(name), value]) if is_identifier_like(name) => {
            indent(out, depth);
            out.push_str(name);
            out.push_str(" = ");
            out.push_str(&expr(value));
            out.push_str(";\n");
        }
        // An if whose branches are blocks is an if statement; anything else
        // (a ternary, a bare `if_` form) is an expression in statement
        // position and renders through the expression path below.
        ("std.if", [cond, then @ ..]) if !then.is_empty() && then.iter().all(is_seq_call) => {
            indent(out, depth);
            out.push_str("if (");
            out.push_str(&expr(cond));
            out.push_str(") ");
            write_brace_block(&then[0], out, depth);
            if let Some(otherwise) = then.get(1) {
                indent(out, depth);
                out.push_str("else ");
                write_brace_block(otherwise, out, depth);
            }
        }
        ("std.while", [cond, body]) => {
            indent(out, depth);
            out.push_str("while (");
            out.push_str(&expr(cond));
            out.push_str(") ");
            write_brace_block(body, out, depth);
        }
        ("std.for", [Datum::Str(name), list, body]) if is_identifier_like(name) => {
            indent(out, depth);
            out.push_str("for (const ");
            out.push_str(name);
            out.push_str(" of ");
            out.push_str(&expr(list));
            out.push_str(") ");
            write_brace_block(body, out, depth);
        }
        ("std.break", []) => {
            indent(out, depth);
            out.push_str("break;\n");
        }
        ("std.continue", []) => {
            indent(out, depth);
            out.push_str("continue;\n");
        }
        ("std.return", rest) if rest.len() <= 1 => {
            indent(out, depth);
            match rest.first() {
                Some(value) => {
                    out.push_str("return ");
                    out.push_str(&expr(value));
                    out.push_str(";\n");
                }
                None => out.push_str("return;\n"),
            }
        }
        ("std.throw", [value]) => {
            indent(out, depth);
            out.push_str("throw ");
            out.push_str(&expr(value));
            out.push_str(";\n");
        }
        ("std.try", [body, Datum::Str(err), catch]) if is_identifier_like(err) => {
            indent(out, depth);
            out.push_str("try ");
            write_brace_block(body, out, depth);
            indent(out, depth);
            out.push_str("catch (");
            out.push_str(err);
            out.push_str(") ");
            write_brace_block(catch, out, depth);
        }
        ("obj.set", [object, key, value]) => {
            indent(out, depth);
            out.push_str(&member(object, key));
            out.push_str(" = ");
            out.push_str(&expr(value));
            out.push_str(";\n");
        }
        ("obj.del", [object, key]) => {
            indent(out, depth);
            out.push_str("delete ");
            out.push_str(&member(object, key));
            out.push_str(";\n");
        }
        _ => write_expr_stmt(&expr(node), out, depth),
    }
}

/// An expression in statement position. A leading `{` would parse as a
/// block, so object literals get wrapped in parentheses.
fn write_expr_stmt(rendered: &str, out: &mut String, depth: usize) {
    indent(out, depth);
    if rendered.starts_with('{') {
        out.push('(');
        out.push_str(rendered);
        out.push(')');
    } else {
        out.push_str(rendered);
    }
    out.push_str(";\n");
}

fn is_seq_call(node: &Datum) -> bool {
    matches!(node.as_call(), Some(("std.seq", _)))
}

/// Renders a branch/body node as a braced block. A `std.seq` supplies its
/// items; any other node becomes a single-statement block.
fn write_brace_block(node: &Datum, out: &mut String, depth: usize) {
    out.push_str("{\n");
    match node.as_call() {
        Some(("std.seq", items)) => {
            for item in items {
                write_stmt(item, out, depth + 1);
            }
        }
        _ => write_stmt(node, out, depth + 1),
    }
    indent(out, depth);
    out.push_str("}\n");
}

// --- expression context ---

fn expr(node: &Datum) -> String {
    match node {
        Datum::Null => "null".to_owned(),
        Datum::Bool(b) => b.to_string(),
        Datum::Num(n) => Value::render_num(*n),
        Datum::Str(s) => quote(s),
        Datum::Map(_) | Datum::List(_) => match node.as_call() {
            Some((op, args)) => call_expr(op, args),
            // Raw data can only sit in lazy slots; render as JSON.
            None => node.to_string(),
        },
    }
}

fn call_expr(op: &str, args: &[Datum]) -> String {
    if let Some(sugar) = resugar(op, args) {
        return sugar;
    }
    match (op, args) {
        ("std.var", [Datum::Str(name)]) if is_identifier_like(name) => name.to_string(),
        ("std.set", [Datum::Str(name), value]) if is_identifier_like(name) => {
            format!("({name} = {})", expr(value))
        }
        ("not", [value]) => format!("!{}", unary_operand(value)),
        ("and", [a, b]) => format!("({} && {})", expr(a), expr(b)),
        ("or", [a, b]) => format!("({} || {})", expr(a), expr(b)),
        ("obj.has", [object, key]) => format!("({} in {})", expr(key), expr(object)),
        ("obj.get", [object, key]) => member(object, key),
        ("obj.set", [object, key, value]) => format!("({} = {})", member(object, key), expr(value)),
        ("obj.del", [object, key]) => format!("(delete {})", member(object, key)),
        ("obj.new", entries) => object_literal(entries),
        ("list.new", items) => {
            let items: Vec<String> = items.iter().map(expr).collect();
            format!("[{}]", items.join(", "))
        }
        ("std.lambda", [params, body]) => lambda_expr(params, body),
        ("std.apply", [target, call_args @ ..]) => apply_expr(target, call_args),
        ("std.if", [cond, then, otherwise]) => {
            format!("({} ? {} : {})", expr(cond), expr(then), expr(otherwise))
        }
        ("std.quote", [payload]) => {
            if payload.is_literal() {
                expr(payload)
            } else {
                format!("std.quote({payload})")
            }
        }
        ("std.seq", items) => iife(items),
        _ => {
            if let Some(infix) = infix_expr(op, args) {
                return infix;
            }
            generic_call(op, args)
        }
    }
}

/// Binary applications of the symbolic operators print infix, always
/// parenthesized; other arities fall back to alias calls so chaining
/// semantics survive the round trip.
fn infix_expr(op: &str, args: &[Datum]) -> Option<String> {
    let surface = match op {
        "+" | "-" | "*" | "/" | "%" | "<" | ">" | "<=" | ">=" => op,
        "^" => "**",
        "==" => "===",
        "!=" => "!==",
        _ => return None,
    };
    if let [lhs, rhs] = args {
        return Some(format!("({} {surface} {})", expr(lhs), expr(rhs)));
    }
    let alias = alias_of(op).expect("symbolic operators have aliases");
    let rendered: Vec<String> = args.iter().map(expr).collect();
    Some(format!("{alias}({})", rendered.join(", ")))
}

/// The fallback call form: a (possibly dotted) opcode name with reserved
/// segments escaped by a trailing underscore.
fn generic_call(op: &str, args: &[Datum]) -> String {
    let name: Vec<String> = op
        .split('.')
        .map(|segment| {
            if is_reserved_word(segment) {
                format!("{segment}_")
            } else {
                sanitize_identifier(segment)
            }
        })
        .collect();
    let rendered: Vec<String> = args.iter().map(expr).collect();
    format!("{}({})", name.join("."), rendered.join(", "))
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("{s:?}"))
}

/// Member access: dot notation for identifier-like literal keys, bracket
/// notation otherwise.
fn member(object: &Datum, key: &Datum) -> String {
    let base = expr(object);
    match key {
        Datum::Str(name) if is_identifier_like(name) => format!("{base}.{name}"),
        _ => format!("{base}[{}]", expr(key)),
    }
}

fn unary_operand(node: &Datum) -> String {
    let rendered = expr(node);
    if rendered.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '(' || c == '[' || c == '"' || c == '_') {
        rendered
    } else {
        format!("({rendered})")
    }
}

fn object_literal(entries: &[Datum]) -> String {
    let mut props = Vec::with_capacity(entries.len());
    for entry in entries {
        let Datum::List(pair) = entry else {
            return format!("obj.new({})", entries.iter().map(expr).collect::<Vec<_>>().join(", "));
        };
        let (Some(Datum::Str(key)), Some(value)) = (pair.first(), pair.get(1)) else {
            return format!("obj.new({})", entries.iter().map(expr).collect::<Vec<_>>().join(", "));
        };
        let key = if is_identifier_like(key) { key.to_string() } else { quote(key) };
        props.push(format!("{key}: {}", expr(value)));
    }
    if props.is_empty() {
        "{}".to_owned()
    } else {
        format!("{{ {} }}", props.join(", "))
    }
}

fn lambda_expr(params: &Datum, body: &Datum) -> String {
    let Datum::List(param_items) = params else {
        return generic_call("std.lambda", &[params.clone(), body.clone()]);
    };
    let names: Vec<String> = param_items
        .iter()
        .map(|p| p.as_str().map_or_else(|| "_".to_owned(), str::to_owned))
        .collect();
    let head = format!("({})", names.join(", "));

    match body.as_call() {
        Some(("std.seq", items)) => format!("{head} => {}", block_body(items, 0)),
        _ => format!("{head} => {}", expr(body)),
    }
}

/// Splits a `std.lambda` node with identifier params and a `std.seq` body.
fn block_lambda(node: &Datum) -> Option<(Vec<String>, &[Datum])> {
    let Some(("std.lambda", [params, body])) = node.as_call() else {
        return None;
    };
    let Datum::List(param_items) = params else { return None };
    let names: Option<Vec<String>> = param_items
        .iter()
        .map(|p| p.as_str().map(str::to_owned))
        .collect();
    let names = names?;
    if !names.iter().all(|name| is_identifier_like(name)) {
        return None;
    }
    match body.as_call() {
        Some(("std.seq", items)) => Some((names, items)),
        _ => None,
    }
}

/// `function`-declaration tail: `(params) { body }`.
fn lambda_block(params: &[String], items: &[Datum], depth: usize) -> String {
    format!("({}) {}", params.join(", "), block_body(items, depth))
}

/// A lambda block body. The final expression statement becomes an explicit
/// return; the transpiler strips it back off.
fn block_body(items: &[Datum], depth: usize) -> String {
    let mut out = String::from("{\n");
    if let Some((last, rest)) = items.split_last() {
        for item in rest {
            write_stmt(item, &mut out, depth + 1);
        }
        if is_statement_form(last) {
            write_stmt(last, &mut out, depth + 1);
        } else {
            indent(&mut out, depth + 1);
            out.push_str("return ");
            out.push_str(&expr(last));
            out.push_str(";\n");
        }
    }
    indent(&mut out, depth);
    out.push('}');
    out
}

/// Nodes that only exist as statements and cannot follow `return`.
fn is_statement_form(node: &Datum) -> bool {
    matches!(
        node.as_call(),
        Some((
            "std.let" | "std.while" | "std.for" | "std.break" | "std.continue" | "std.return" | "std.throw",
            _
        ))
    )
}

fn apply_expr(target: &Datum, args: &[Datum]) -> String {
    let rendered: Vec<String> = args.iter().map(expr).collect();
    let args_text = rendered.join(", ");
    match target.as_call() {
        Some(("std.var", [Datum::Str(name)])) if is_identifier_like(name) => format!("{name}({args_text})"),
        Some(("obj.get", [object, key])) => format!("{}({args_text})", member(object, key)),
        _ => format!("({})({args_text})", expr(target)),
    }
}

/// Expression-position `std.seq` with no sugar pattern: an immediately
/// invoked block.
fn iife(items: &[Datum]) -> String {
    let body = Datum::call("std.seq", items.to_vec());
    format!("({})()", lambda_expr(&Datum::list(vec![]), &body))
}

// --- re-sugaring of transpiler desugarings ---

/// Recognizes the guarded shapes the transpiler emits for `??`, `a?.b`,
/// `a?.[k]`, `f?.()`, and `a.b?.()`, with or without a `__tmp_N` binding.
fn resugar(op: &str, args: &[Datum]) -> Option<String> {
    match (op, args) {
        ("std.if", [guard, hit, fallback]) => {
            let probe = guard_probe(guard)?;
            resugar_guarded(probe, &expr(probe), hit, fallback)
        }
        ("std.seq", [binding, body]) => {
            let (tmp, bound) = tmp_binding(binding)?;
            let Some(("std.if", [guard, hit, fallback])) = body.as_call() else {
                return None;
            };
            let probe = guard_probe(guard)?;
            match probe.as_call() {
                Some(("std.var", [Datum::Str(name)])) if name.as_ref() == tmp => {}
                _ => return None,
            }
            resugar_guarded(probe, &expr(bound), hit, fallback)
        }
        _ => None,
    }
}

/// `["!=", probe, null]` → the probe.
fn guard_probe(guard: &Datum) -> Option<&Datum> {
    match guard.as_call() {
        Some(("!=", [probe, Datum::Null])) => Some(probe),
        _ => None,
    }
}

/// `["std.let", "__tmp_N", bound]` → `(tmp, bound)`.
fn tmp_binding(node: &Datum) -> Option<(&str, &Datum)> {
    match node.as_call() {
        Some(("std.let", [Datum::Str(name), bound])) if name.starts_with("__tmp_") => Some((name, bound)),
        _ => None,
    }
}

/// Given a probe node and the source text of the guarded base, renders the
/// sugared form the hit/fallback shapes imply.
fn resugar_guarded(probe: &Datum, base: &str, hit: &Datum, fallback: &Datum) -> Option<String> {
    // base ?? fallback
    if hit == probe {
        return Some(format!("({base} ?? {})", expr(fallback)));
    }
    if !matches!(fallback, Datum::Null) {
        return None;
    }
    match hit.as_call()? {
        ("obj.get", [object, key]) if object == probe => match key {
            Datum::Str(name) if is_identifier_like(name) => Some(format!("{base}?.{name}")),
            _ => Some(format!("{base}?.[{}]", expr(key))),
        },
        ("std.apply", [target, rest @ ..]) if target == probe => {
            let rendered: Vec<String> = rest.iter().map(expr).collect();
            Some(format!("{base}?.({})", rendered.join(", ")))
        }
        ("obj.invoke", [object, Datum::Str(key), rest @ ..]) if object == probe && is_identifier_like(key) => {
            let rendered: Vec<String> = rest.iter().map(expr).collect();
            Some(format!("{base}.{key}?.({})", rendered.join(", ")))
        }
        _ => None,
    }
}

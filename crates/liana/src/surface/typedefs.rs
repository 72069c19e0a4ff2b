//! Ambient type-definition generation.
//!
//! Emits surface-language declarations for every opcode in a registry so
//! authors can edit scripts with static checking before transpilation.
//! Dotted names become namespaces, symbolic operators surface under their
//! identifier aliases, and reserved words gain the `_` escape the
//! transpiler reverses.

use std::collections::BTreeMap;

use super::{alias_of, sanitize_identifier};
use crate::registry::{OpMeta, OpRegistry, ParamSpec};

/// Renders ambient declarations for all registered opcodes.
#[must_use]
pub fn type_definitions(registry: &OpRegistry) -> String {
    let mut globals: BTreeMap<String, String> = BTreeMap::new();
    let mut namespaces: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();

    for def in registry.iter() {
        let meta = &def.meta;
        match meta.name.split_once('.') {
            Some((namespace, leaf)) => {
                let leaf = sanitize_identifier(leaf);
                namespaces
                    .entry(sanitize_identifier(namespace))
                    .or_default()
                    .insert(leaf.clone(), function_decl(&leaf, meta));
            }
            None => {
                let name = alias_of(&meta.name).map_or_else(|| sanitize_identifier(&meta.name), str::to_owned);
                globals.insert(name.clone(), function_decl(&name, meta));
            }
        }
    }

    let mut out = String::new();
    out.push_str("// Generated opcode declarations. Do not edit.\n\n");
    out.push_str("declare interface Entity {\n  id: number;\n  [attribute: string]: any;\n}\n\n");
    out.push_str("declare interface Capability {\n  readonly id: string;\n  readonly owner: number;\n}\n\n");

    for decl in globals.values() {
        out.push_str("declare ");
        out.push_str(decl);
        out.push('\n');
    }
    for (namespace, functions) in &namespaces {
        out.push('\n');
        out.push_str("declare namespace ");
        out.push_str(namespace);
        out.push_str(" {\n");
        for decl in functions.values() {
            out.push_str("  ");
            out.push_str(decl);
            out.push('\n');
        }
        out.push_str("}\n");
    }
    out
}

fn function_decl(name: &str, meta: &OpMeta) -> String {
    let mut out = String::new();
    if !meta.description.is_empty() {
        out.push_str("/** ");
        out.push_str(&meta.description);
        out.push_str(" */\n");
        // Align the comment with the declaration inside namespaces.
        if meta.name.contains('.') {
            out.push_str("  ");
        }
    }
    out.push_str("function ");
    out.push_str(name);
    if !meta.generic_parameters.is_empty() {
        out.push('<');
        out.push_str(&meta.generic_parameters.join(", "));
        out.push('>');
    }
    out.push('(');
    let params: Vec<String> = meta.parameters.iter().map(|param| param_decl(param, meta)).collect();
    out.push_str(&params.join(", "));
    out.push_str("): ");
    out.push_str(&surface_type(&meta.return_type, meta));
    out.push(';');
    out
}

fn param_decl(param: &ParamSpec, meta: &OpMeta) -> String {
    if let Some(rest) = param.name.strip_prefix("...") {
        let ty = surface_type(&param.ty, meta);
        return format!("...{}: {ty}", sanitize_identifier(rest));
    }
    let marker = if param.optional { "?" } else { "" };
    format!("{}{marker}: {}", sanitize_identifier(&param.name), surface_type(&param.ty, meta))
}

/// Maps a declared type tag to surface syntax.
fn surface_type(ty: &str, meta: &OpMeta) -> String {
    let parts: Vec<String> = ty.split('|').map(|part| single_type(part.trim(), meta)).collect();
    parts.join(" | ")
}

fn single_type(ty: &str, meta: &OpMeta) -> String {
    if let Some(element) = ty.strip_suffix("[]") {
        return format!("{}[]", single_type(element, meta));
    }
    match ty {
        "any" | "unknown" | "number" | "string" | "boolean" | "null" | "object" | "never" | "void" => ty.to_owned(),
        "lambda" | "function" => "(...args: any[]) => any".to_owned(),
        "Entity" | "Capability" => ty.to_owned(),
        other if meta.generic_parameters.iter().any(|g| g == other) => other.to_owned(),
        other => sanitize_identifier(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declarations_cover_namespaces_aliases_and_escapes() {
        let registry = OpRegistry::standard();
        let defs = type_definitions(&registry);
        assert!(defs.contains("declare namespace list {"));
        assert!(defs.contains("declare namespace std {"));
        // `+` surfaces under its alias, `std.if` under its escaped name.
        assert!(defs.contains("function add("));
        assert!(defs.contains("function if_("));
        assert!(defs.contains("declare interface Entity {"));
        // Variadic tails keep the spread marker.
        assert!(defs.contains("...rest: number[]"));
    }
}

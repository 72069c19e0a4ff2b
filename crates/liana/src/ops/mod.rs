//! The standard opcode library.
//!
//! Each submodule contributes one library (a `Vec<OpDef>`) that hosts
//! install into a registry. `OpRegistry::standard()` installs all of them;
//! `OpRegistry::pure()` keeps only the names in [`PURE_OPS`].

// `core_mod` rather than `core` so the module cannot shadow the core crate
// in use paths. The modules are crate-visible so the compiler can bind
// handler functions directly for its inlined fast paths.
pub(crate) mod core_mod;
pub(crate) mod json;
pub(crate) mod lists;
pub(crate) mod math;
pub(crate) mod objects;
pub(crate) mod strings;
pub(crate) mod time;

pub use core_mod::core_lib;
pub(crate) use core_mod::parse_params;
pub use json::json_lib;
pub use lists::list_lib;
pub use math::math_lib;
pub use objects::{FORBIDDEN_KEYS, check_key, object_lib};
pub use strings::string_lib;
pub use time::time_lib;

use std::sync::Arc;

use crate::{
    context::ScriptContext,
    datum::Datum,
    error::EvalResult,
    registry::{OpDef, OpHandler, OpLayout, OpMeta, ParamSpec},
    value::Value,
};

/// Opcodes the optimizer may evaluate at compile time: free of side effects,
/// deterministic, and independent of the invocation context. The scoped
/// control-flow forms are included because purity analysis tracks their
/// `std.let` introductions.
pub const PURE_OPS: &[&str] = &[
    "+", "-", "*", "/", "%", "^",
    "==", "!=", "<", ">", "<=", ">=",
    "and", "or", "not",
    "std.seq", "std.if", "std.while", "std.for",
    "std.let", "std.set", "std.var",
    "std.typeof", "std.quote", "std.break", "std.continue",
    "str.concat", "str.length", "str.slice", "str.split", "str.replace",
    "str.includes", "str.indexOf", "str.toUpper", "str.toLower", "str.trim",
    "list.new", "list.get", "list.set", "list.push", "list.pop", "list.shift",
    "list.unshift", "list.splice", "list.sort", "list.reverse", "list.slice",
    "list.map", "list.filter", "list.find", "list.reduce", "list.concat",
    "list.join", "list.length", "list.includes", "list.indexOf",
    "obj.new", "obj.get", "obj.set", "obj.has", "obj.del", "obj.keys",
    "obj.values", "obj.entries", "obj.merge",
    "json.stringify", "json.parse",
    "math.abs", "math.floor", "math.ceil", "math.round", "math.sqrt",
    "math.min", "math.max", "math.clamp",
    "time.parse", "time.format",
];

impl OpMeta {
    /// Starts metadata with standard layout, no parameters, `any` return.
    pub(crate) fn op(name: &str, category: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            description: description.into(),
            layout: OpLayout::Standard,
            slots: None,
            parameters: vec![],
            generic_parameters: vec![],
            return_type: "any".into(),
            lazy: false,
        }
    }

    pub(crate) fn infix(mut self) -> Self {
        self.layout = OpLayout::Infix;
        self
    }

    pub(crate) fn control_flow(mut self) -> Self {
        self.layout = OpLayout::ControlFlow;
        self
    }

    pub(crate) fn primitive(mut self) -> Self {
        self.layout = OpLayout::Primitive;
        self
    }

    pub(crate) fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub(crate) fn params(mut self, parameters: Vec<ParamSpec>) -> Self {
        self.parameters = parameters;
        self
    }

    pub(crate) fn generics(mut self, names: &[&str]) -> Self {
        self.generic_parameters = names.iter().map(|&n| n.to_owned()).collect();
        self
    }

    pub(crate) fn returns(mut self, ty: &str) -> Self {
        self.return_type = ty.into();
        self
    }
}

/// A required parameter.
pub fn param(name: &str, ty: &str) -> ParamSpec {
    ParamSpec {
        name: name.into(),
        ty: ty.into(),
        optional: false,
        description: None,
    }
}

/// An optional parameter.
pub fn opt_param(name: &str, ty: &str) -> ParamSpec {
    ParamSpec {
        name: name.into(),
        ty: ty.into(),
        optional: true,
        description: None,
    }
}

/// A variadic tail parameter; `ty` is the list-suffixed element type.
pub fn variadic(name: &str, ty: &str) -> ParamSpec {
    ParamSpec {
        name: format!("...{name}"),
        ty: ty.into(),
        optional: true,
        description: None,
    }
}

/// Wraps a strict handler function into a definition.
pub(crate) fn strict_op(
    meta: OpMeta,
    handler: impl Fn(Vec<Value>, &mut ScriptContext) -> EvalResult<Value> + Send + Sync + 'static,
) -> OpDef {
    OpDef {
        meta,
        handler: OpHandler::Strict(Arc::new(handler)),
    }
}

/// Wraps a lazy handler function into a definition.
pub(crate) fn lazy_op(
    meta: OpMeta,
    handler: impl Fn(&[Datum], &mut ScriptContext) -> EvalResult<Value> + Send + Sync + 'static,
) -> OpDef {
    OpDef {
        meta,
        handler: OpHandler::Lazy(Arc::new(handler)),
    }
}

//! The opcode registry: metadata, handlers, lookup, and argument validation.
//!
//! A registry maps opcode names to definitions. Several registries can exist
//! in one process: the canonical [`OpRegistry::standard`] used for normal
//! evaluation, and restricted ones such as the optimizer's pure registry.
//! Compilation and interpretation always resolve against an explicit
//! registry, never a global.

use std::{fmt, sync::Arc};

use ahash::AHashMap;

use crate::{
    context::ScriptContext,
    datum::Datum,
    error::{EvalResult, ScriptError},
    heap::{Heap, HeapData},
    value::Value,
};

/// Editor layout hint. Carried in metadata, never consulted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OpLayout {
    Infix,
    Standard,
    Primitive,
    ControlFlow,
}

/// One declared parameter.
///
/// A leading `...` on the name marks the final parameter as variadic; it then
/// accepts zero or more trailing arguments of the element type.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: String,
    pub optional: bool,
    pub description: Option<String>,
}

impl ParamSpec {
    #[must_use]
    pub fn is_variadic(&self) -> bool {
        self.name.starts_with("...")
    }
}

/// Metadata describing one opcode to validators, editors, and the
/// type-definition emitter.
#[derive(Debug, Clone)]
pub struct OpMeta {
    pub name: String,
    pub category: String,
    pub description: String,
    pub layout: OpLayout,
    /// Editor slot labels; `None` for ops without a block form.
    pub slots: Option<Vec<String>>,
    pub parameters: Vec<ParamSpec>,
    pub generic_parameters: Vec<String>,
    pub return_type: String,
    pub lazy: bool,
}

/// Handler function for a strict opcode: receives evaluated values.
pub type StrictFn = Arc<dyn Fn(Vec<Value>, &mut ScriptContext) -> EvalResult<Value> + Send + Sync>;

/// Handler function for a lazy opcode: receives the raw sub-ASTs and calls
/// back into the interpreter for the slots it chooses to run.
pub type LazyFn = Arc<dyn Fn(&[Datum], &mut ScriptContext) -> EvalResult<Value> + Send + Sync>;

/// An opcode implementation.
#[derive(Clone)]
pub enum OpHandler {
    Strict(StrictFn),
    Lazy(LazyFn),
}

impl fmt::Debug for OpHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict(_) => f.write_str("OpHandler::Strict"),
            Self::Lazy(_) => f.write_str("OpHandler::Lazy"),
        }
    }
}

/// A registered opcode: metadata plus handler.
#[derive(Debug, Clone)]
pub struct OpDef {
    pub meta: OpMeta,
    pub handler: OpHandler,
}

/// A named set of opcodes.
#[derive(Debug, Default, Clone)]
pub struct OpRegistry {
    ops: AHashMap<String, Arc<OpDef>>,
}

impl OpRegistry {
    /// An empty registry. Install libraries with [`OpRegistry::install`].
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The canonical registry with the full standard library.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.install(crate::ops::core_lib());
        registry.install(crate::ops::math_lib());
        registry.install(crate::ops::string_lib());
        registry.install(crate::ops::list_lib());
        registry.install(crate::ops::object_lib());
        registry.install(crate::ops::json_lib());
        registry.install(crate::ops::time_lib());
        registry
    }

    /// The restricted registry the optimizer evaluates pure subtrees
    /// against: side-effect-free ops plus the scoped control-flow forms.
    #[must_use]
    pub fn pure() -> Self {
        let standard = Self::standard();
        let mut registry = Self::empty();
        for name in crate::ops::PURE_OPS {
            if let Some(def) = standard.lookup(name) {
                registry.ops.insert((*name).to_owned(), Arc::clone(def));
            }
        }
        registry
    }

    /// Atomically merges a library of opcodes. A later registration with the
    /// same name replaces the earlier one.
    pub fn install(&mut self, library: Vec<OpDef>) {
        for def in library {
            self.ops.insert(def.meta.name.clone(), Arc::new(def));
        }
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Arc<OpDef>> {
        self.ops.get(name)
    }

    /// Looks an opcode up, failing with `UnknownOpcode`.
    pub fn get(&self, name: &str) -> Result<&Arc<OpDef>, ScriptError> {
        self.ops.get(name).ok_or_else(|| ScriptError::unknown_opcode(name))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Iterates definitions in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<OpDef>> {
        self.ops.values()
    }
}

/// Checks an argument vector against declared parameters: count bounds first,
/// then per-slot type compatibility. Called before strict handler dispatch
/// when validation is enabled and the opcode declares parameters.
pub fn validate_args(meta: &OpMeta, args: &[Value], heap: &Heap) -> Result<(), ScriptError> {
    validate_count(meta, args.len())?;
    let params = &meta.parameters;
    for (index, arg) in args.iter().enumerate() {
        let param = if index < params.len() {
            &params[index]
        } else {
            // Past the end only happens with a variadic tail.
            params.last().expect("variadic tail exists")
        };
        let ty = if param.is_variadic() {
            element_type(&param.ty)
        } else {
            param.ty.as_str()
        };
        if !type_matches(*arg, ty, &meta.generic_parameters, heap) {
            return Err(ScriptError::argument_type(
                &meta.name,
                format!(
                    "argument {} ('{}') expects {}, got {}",
                    index + 1,
                    param.name.trim_start_matches("..."),
                    ty,
                    arg.type_name(heap)
                ),
            ));
        }
    }
    Ok(())
}

/// Checks only the arity bounds. Used for lazy opcodes, whose argument slots
/// hold raw ASTs rather than values.
pub fn validate_count(meta: &OpMeta, got: usize) -> Result<(), ScriptError> {
    let params = &meta.parameters;
    let variadic = params.last().is_some_and(ParamSpec::is_variadic);
    let required = params
        .iter()
        .filter(|param| !param.optional && !param.is_variadic())
        .count();
    let max = if variadic { usize::MAX } else { params.len() };
    if got < required || got > max {
        let expected = if variadic {
            format!("at least {required}")
        } else if required == params.len() {
            format!("{required}")
        } else {
            format!("{required} to {}", params.len())
        };
        return Err(ScriptError::argument_count(
            &meta.name,
            format!("expected {expected} argument(s), got {got}"),
        ));
    }
    Ok(())
}

/// Strips one `[]` suffix from a variadic element type.
fn element_type(ty: &str) -> &str {
    ty.strip_suffix("[]").unwrap_or(ty)
}

/// Type tag compatibility for the declared-type grammar: base names, unions
/// `a|b`, and list-suffixed forms `T[]`. Generic parameter names and unknown
/// tags pass.
fn type_matches(value: Value, ty: &str, generics: &[String], heap: &Heap) -> bool {
    ty.split('|').any(|part| single_type_matches(value, part.trim(), generics, heap))
}

fn single_type_matches(value: Value, ty: &str, generics: &[String], heap: &Heap) -> bool {
    if let Some(element) = ty.strip_suffix("[]") {
        let Value::Ref(id) = value else { return false };
        let HeapData::List(items) = heap.get(id) else { return false };
        return items.iter().all(|item| type_matches(*item, element, generics, heap));
    }
    match ty {
        "any" | "unknown" => true,
        "null" => matches!(value, Value::Null),
        "boolean" => matches!(value, Value::Bool(_)),
        "number" => matches!(value, Value::Num(_)),
        "string" => value.as_str(heap).is_some(),
        "object" => value.as_object_id(heap).is_some(),
        "lambda" | "function" => value.as_lambda_id(heap).is_some(),
        "Entity" => is_entity(value, heap),
        "Capability" => matches!(value, Value::Ref(id) if matches!(heap.get(id), HeapData::Capability(_))),
        other => {
            // Generic parameter names and host-specific tags don't constrain.
            generics.iter().any(|g| g == other) || !other.chars().all(|c| c.is_ascii_lowercase())
        }
    }
}

/// An entity is an object carrying a numeric `id`.
fn is_entity(value: Value, heap: &Heap) -> bool {
    let Some(id) = value.as_object_id(heap) else {
        return false;
    };
    match heap.get(id) {
        HeapData::Object(map) => matches!(map.get("id"), Some(Value::Num(_))),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{opt_param, param, variadic};

    fn meta(parameters: Vec<ParamSpec>) -> OpMeta {
        OpMeta {
            name: "test.op".into(),
            category: "test".into(),
            description: String::new(),
            layout: OpLayout::Standard,
            slots: None,
            parameters,
            generic_parameters: vec![],
            return_type: "any".into(),
            lazy: false,
        }
    }

    #[test]
    fn count_bounds_with_optional_and_variadic() {
        let heap = Heap::new();
        let m = meta(vec![
            param("a", "number"),
            opt_param("b", "number"),
            variadic("rest", "number[]"),
        ]);
        assert!(validate_args(&m, &[Value::Num(1.0)], &heap).is_ok());
        assert!(validate_args(&m, &[], &heap).is_err());
        let many = vec![Value::Num(1.0); 6];
        assert!(validate_args(&m, &many, &heap).is_ok());

        let fixed = meta(vec![param("a", "number")]);
        assert!(validate_args(&fixed, &[Value::Num(1.0), Value::Num(2.0)], &heap).is_err());
    }

    #[test]
    fn union_and_list_types() {
        let mut heap = Heap::new();
        let m = meta(vec![param("a", "string|number")]);
        let s = heap.alloc_str("x");
        assert!(validate_args(&m, &[s], &heap).is_ok());
        assert!(validate_args(&m, &[Value::Num(2.0)], &heap).is_ok());
        assert!(validate_args(&m, &[Value::Bool(true)], &heap).is_err());

        let lists = meta(vec![param("xs", "number[]")]);
        let good = heap.alloc_list(vec![Value::Num(1.0)]);
        let bad = heap.alloc_list(vec![Value::Bool(true)]);
        assert!(validate_args(&lists, &[good], &heap).is_ok());
        assert!(validate_args(&lists, &[bad], &heap).is_err());
    }

    #[test]
    fn entity_requires_numeric_id() {
        let mut heap = Heap::new();
        let m = meta(vec![param("who", "Entity")]);
        let entity = heap.load_datum(&Datum::from_json_str(r#"{"id":3,"name":"elm"}"#).unwrap());
        let plain = heap.load_datum(&Datum::from_json_str(r#"{"name":"elm"}"#).unwrap());
        assert!(validate_args(&m, &[entity], &heap).is_ok());
        assert!(validate_args(&m, &[plain], &heap).is_err());
    }

    #[test]
    fn generic_names_bypass() {
        let heap = Heap::new();
        let mut m = meta(vec![param("x", "T")]);
        m.generic_parameters = vec!["T".into()];
        assert!(validate_args(&m, &[Value::Null], &heap).is_ok());
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = OpRegistry::empty();
        let def = |desc: &str| OpDef {
            meta: OpMeta {
                name: "dup".into(),
                category: "test".into(),
                description: desc.into(),
                layout: OpLayout::Standard,
                slots: None,
                parameters: vec![],
                generic_parameters: vec![],
                return_type: "any".into(),
                lazy: false,
            },
            handler: OpHandler::Strict(Arc::new(|_, _| Ok(Value::Null))),
        };
        registry.install(vec![def("first")]);
        registry.install(vec![def("second")]);
        assert_eq!(registry.lookup("dup").unwrap().meta.description, "second");
    }
}

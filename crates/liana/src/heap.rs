//! Arena storage for heap-resident script values.
//!
//! Strings, lists, objects, lambdas, and capability tokens live in an arena
//! owned by the `ScriptContext`; runtime [`Value`]s reference them by
//! [`HeapId`]. Slots are never freed individually — the whole arena drops
//! with the context. That is also the cycle-breaker: values may form cycles
//! through shared lists/objects and through closures, and none of it needs
//! tracing or reference counting.
//!
//! Allocation is metered by the context (each allocation charges gas), so an
//! adversarial script cannot outgrow its budget.

use std::fmt;

use indexmap::IndexMap;

use crate::{
    compile::CompiledFn,
    datum::Datum,
    error::{ErrorKind, ScriptError},
    scope::ScopeChain,
    value::Value,
};

/// Index of a value in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId(u32);

impl HeapId {
    fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("heap index overflow"))
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A lambda record: immutable params and body, plus the captured scope chain.
///
/// `execute` is present when the lambda was produced by compiled code; the
/// compiled body runs instead of interpreting `body`, against the same scope
/// chain interpreted lambdas use.
#[derive(Clone)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Datum,
    pub closure: ScopeChain,
    pub execute: Option<CompiledFn>,
}

impl fmt::Debug for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lambda")
            .field("params", &self.params)
            .field("body", &self.body)
            .field("closure", &self.closure)
            .field("execute", &self.execute.as_ref().map(|_| "<compiled>"))
            .finish()
    }
}

/// An opaque capability token. Carries no behavior inside the engine; hosts
/// interpret it at the boundary. Not JSON-serializable.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityToken {
    pub id: String,
    pub owner: f64,
}

impl CapabilityToken {
    /// Mints a token with a fresh v4 id.
    #[must_use]
    pub fn mint(owner: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner,
        }
    }
}

/// Payload of one arena slot.
#[derive(Debug)]
pub enum HeapData {
    Str(String),
    List(Vec<Value>),
    Object(IndexMap<String, Value>),
    Lambda(Lambda),
    Capability(CapabilityToken),
}

impl HeapData {
    /// The `std.typeof` name for this payload.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Object(_) => "object",
            Self::Lambda(_) => "lambda",
            Self::Capability(_) => "capability",
        }
    }
}

/// The arena. One per `ScriptContext`.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<HeapData>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live slots, for tests and diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn alloc(&mut self, data: HeapData) -> HeapId {
        let id = HeapId::new(self.slots.len());
        self.slots.push(data);
        id
    }

    /// # Panics
    /// Panics if `id` did not come from this heap.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.slots[id.index()]
    }

    /// # Panics
    /// Panics if `id` did not come from this heap.
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.slots[id.index()]
    }

    pub fn alloc_str(&mut self, s: impl Into<String>) -> Value {
        Value::Ref(self.alloc(HeapData::Str(s.into())))
    }

    pub fn alloc_list(&mut self, items: Vec<Value>) -> Value {
        Value::Ref(self.alloc(HeapData::List(items)))
    }

    pub fn alloc_object(&mut self, entries: IndexMap<String, Value>) -> Value {
        Value::Ref(self.alloc(HeapData::Object(entries)))
    }

    pub fn alloc_lambda(&mut self, lambda: Lambda) -> Value {
        Value::Ref(self.alloc(HeapData::Lambda(lambda)))
    }

    pub fn alloc_capability(&mut self, token: CapabilityToken) -> Value {
        Value::Ref(self.alloc(HeapData::Capability(token)))
    }

    /// Loads boundary data into the arena.
    pub fn load_datum(&mut self, datum: &Datum) -> Value {
        match datum {
            Datum::Null => Value::Null,
            Datum::Bool(b) => Value::Bool(*b),
            Datum::Num(n) => Value::Num(*n),
            Datum::Str(s) => self.alloc_str(s.as_ref()),
            Datum::List(items) => {
                let values = items.iter().map(|item| self.load_datum(item)).collect();
                self.alloc_list(values)
            }
            Datum::Map(entries) => {
                let map = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), self.load_datum(v)))
                    .collect();
                self.alloc_object(map)
            }
        }
    }

    /// Renders a value to boundary data, substituting markers for values that
    /// have no data form: lambdas, capabilities, and cyclic references.
    #[must_use]
    pub fn render_datum(&self, value: Value) -> Datum {
        let mut path = Vec::new();
        self.render_inner(value, &mut path, false)
            .expect("lossy render cannot fail")
    }

    /// Renders a value to JSON-safe data, failing on lambdas, capabilities,
    /// and cycles.
    pub fn render_json(&self, value: Value) -> Result<Datum, ScriptError> {
        let mut path = Vec::new();
        self.render_inner(value, &mut path, true)
    }

    fn render_inner(&self, value: Value, path: &mut Vec<HeapId>, strict: bool) -> Result<Datum, ScriptError> {
        let id = match value {
            Value::Null => return Ok(Datum::Null),
            Value::Bool(b) => return Ok(Datum::Bool(b)),
            Value::Num(n) => return Ok(Datum::Num(n)),
            Value::Ref(id) => id,
        };
        if path.contains(&id) {
            if strict {
                return Err(ScriptError::new(ErrorKind::Custom, "cannot serialize a cyclic value"));
            }
            return Ok(Datum::str("<cycle>"));
        }
        match self.get(id) {
            HeapData::Str(s) => Ok(Datum::str(s)),
            HeapData::List(items) => {
                path.push(id);
                let rendered: Result<Vec<_>, _> = items
                    .iter()
                    .map(|item| self.render_inner(*item, path, strict))
                    .collect();
                path.pop();
                Ok(Datum::list(rendered?))
            }
            HeapData::Object(entries) => {
                path.push(id);
                let mut map = IndexMap::with_capacity(entries.len());
                for (k, v) in entries {
                    map.insert(k.clone(), self.render_inner(*v, path, strict)?);
                }
                path.pop();
                Ok(Datum::map(map))
            }
            HeapData::Lambda(_) => {
                if strict {
                    Err(ScriptError::argument_type("json.stringify", "lambdas are not serializable"))
                } else {
                    Ok(Datum::str("<lambda>"))
                }
            }
            HeapData::Capability(token) => {
                if strict {
                    Err(ScriptError::argument_type(
                        "json.stringify",
                        "capabilities are not serializable",
                    ))
                } else {
                    Ok(Datum::str(format!("<capability:{}>", token.id)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_and_render_round_trip() {
        let mut heap = Heap::new();
        let datum = Datum::from_json_str(r#"{"id":7,"tags":["a","b"],"hp":12.5}"#).unwrap();
        let value = heap.load_datum(&datum);
        assert_eq!(heap.render_datum(value), datum);
        assert_eq!(heap.render_json(value).unwrap(), datum);
    }

    #[test]
    fn cyclic_list_renders_marker_and_fails_json() {
        let mut heap = Heap::new();
        let list = heap.alloc_list(vec![Value::Num(1.0)]);
        let Value::Ref(id) = list else { unreachable!() };
        match heap.get_mut(id) {
            HeapData::List(items) => items.push(list),
            _ => unreachable!(),
        }
        let rendered = heap.render_datum(list);
        assert_eq!(rendered, Datum::list(vec![Datum::Num(1.0), Datum::str("<cycle>")]));
        assert!(heap.render_json(list).is_err());
    }
}

//! The s-expression tree shared by scripts and the host boundary.
//!
//! A [`Datum`] is a JSON-shaped value used in three roles:
//! - the AST of a script (an expression is a list whose head is an opcode name),
//! - the payload of `std.quote` and other lazy argument slots,
//! - host-boundary data (invocation arguments, entity records, `send` payloads,
//!   rendered results).
//!
//! Compound nodes are reference-counted shared subtrees, so cloning a datum is
//! cheap and the AST can be sliced into frames without lifetimes. Datums are
//! immutable after construction; runtime mutation happens on heap values, not
//! on the tree.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, de::Error as _};

/// A node of the s-expression tree.
///
/// The persisted form is plain JSON: scalars map to literals, arrays to
/// expression nodes (or raw lists inside lazy slots), objects to raw maps
/// (only legal inside lazy slots such as `std.quote` payloads).
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Bool(bool),
    Num(f64),
    Str(Arc<str>),
    List(Arc<[Datum]>),
    Map(Arc<IndexMap<String, Datum>>),
}

impl Datum {
    /// Builds a string datum.
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Arc::from(s.as_ref()))
    }

    /// Builds a list datum from owned items.
    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Arc::from(items))
    }

    /// Builds a map datum from owned entries.
    #[must_use]
    pub fn map(entries: IndexMap<String, Self>) -> Self {
        Self::Map(Arc::new(entries))
    }

    /// Builds an expression node: a list with the opcode name first.
    #[must_use]
    pub fn call(op: &str, args: Vec<Self>) -> Self {
        let mut items = Vec::with_capacity(args.len() + 1);
        items.push(Self::str(op));
        items.extend(args);
        Self::list(items)
    }

    /// Splits an expression node into `(opcode, argument slice)`.
    ///
    /// Returns `None` for literals, raw maps, and lists whose head is not a
    /// string — those are not expressions.
    #[must_use]
    pub fn as_call(&self) -> Option<(&str, &[Self])> {
        if let Self::List(items) = self
            && let Some(Self::Str(head)) = items.first()
        {
            return Some((head, &items[1..]));
        }
        None
    }

    /// Returns true for primitive literal nodes (null/bool/number/string).
    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Null | Self::Bool(_) | Self::Num(_) | Self::Str(_))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Parses a datum from its JSON wire form.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serializes the datum to compact JSON.
    ///
    /// Integral numbers serialize without a fractional part; non-finite
    /// numbers serialize as `null`, matching the behavior of the JSON
    /// serializers scripts interact with.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serializes the datum to pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Converts a parsed `serde_json::Value` into a datum.
    #[must_use]
    pub fn from_json_value(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Num(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::str(s),
            serde_json::Value::Array(items) => Self::list(items.iter().map(Self::from_json_value).collect()),
            serde_json::Value::Object(entries) => {
                let map = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json_value(v)))
                    .collect();
                Self::map(map)
            }
        }
    }

    /// Converts the datum into a `serde_json::Value`.
    #[must_use]
    pub fn to_json_value(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Num(n) => match number_to_json(*n) {
                Some(number) => serde_json::Value::Number(number),
                None => serde_json::Value::Null,
            },
            Self::Str(s) => serde_json::Value::String(s.to_string()),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Self::to_json_value).collect()),
            Self::Map(entries) => {
                let map = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json_value()))
                    .collect();
                serde_json::Value::Object(map)
            }
        }
    }
}

/// Converts a script number into a JSON number, preferring the integer form
/// when the value is integral and fits i64.
fn number_to_json(n: f64) -> Option<serde_json::Number> {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= 9_007_199_254_740_992.0 {
        return Some(serde_json::Number::from(n as i64));
    }
    serde_json::Number::from_f64(n)
}

impl From<bool> for Datum {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Datum {
    fn from(n: f64) -> Self {
        Self::Num(n)
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

impl fmt::Display for Datum {
    /// Renders the datum as compact JSON, for error messages and logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_json_string() {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("<unserializable>"),
        }
    }
}

impl Serialize for Datum {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Num(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() <= 9_007_199_254_740_992.0 {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Self::Str(s) => serializer.serialize_str(s),
            Self::List(items) => serializer.collect_seq(items.iter()),
            Self::Map(entries) => serializer.collect_map(entries.iter()),
        }
    }
}

impl<'de> Deserialize<'de> for Datum {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DatumVisitor;

        impl<'de> serde::de::Visitor<'de> for DatumVisitor {
            type Value = Datum;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON value")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Datum, E> {
                Ok(Datum::Null)
            }

            fn visit_none<E: serde::de::Error>(self) -> Result<Datum, E> {
                Ok(Datum::Null)
            }

            fn visit_some<D: serde::Deserializer<'de>>(self, deserializer: D) -> Result<Datum, D::Error> {
                Datum::deserialize(deserializer)
            }

            fn visit_bool<E: serde::de::Error>(self, b: bool) -> Result<Datum, E> {
                Ok(Datum::Bool(b))
            }

            fn visit_i64<E: serde::de::Error>(self, n: i64) -> Result<Datum, E> {
                Ok(Datum::Num(n as f64))
            }

            fn visit_u64<E: serde::de::Error>(self, n: u64) -> Result<Datum, E> {
                Ok(Datum::Num(n as f64))
            }

            fn visit_f64<E: serde::de::Error>(self, n: f64) -> Result<Datum, E> {
                Ok(Datum::Num(n))
            }

            fn visit_str<E: serde::de::Error>(self, s: &str) -> Result<Datum, E> {
                Ok(Datum::str(s))
            }

            fn visit_string<E: serde::de::Error>(self, s: String) -> Result<Datum, E> {
                Ok(Datum::Str(Arc::from(s.as_str())))
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(self, mut seq: A) -> Result<Datum, A::Error> {
                let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(item) = seq.next_element::<Datum>()? {
                    items.push(item);
                }
                Ok(Datum::list(items))
            }

            fn visit_map<A: serde::de::MapAccess<'de>>(self, mut map: A) -> Result<Datum, A::Error> {
                let mut entries = IndexMap::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, Datum>()? {
                    if entries.insert(key.clone(), value).is_some() {
                        return Err(A::Error::custom(format!("duplicate key {key:?}")));
                    }
                }
                Ok(Datum::map(entries))
            }
        }

        deserializer.deserialize_any(DatumVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip() {
        let src = r#"["std.seq",["std.let","a",0],["+",["std.var","a"],1.5],null,true,"x"]"#;
        let datum = Datum::from_json_str(src).unwrap();
        assert_eq!(datum.to_json_string().unwrap(), src);
    }

    #[test]
    fn as_call_splits_expressions() {
        let datum = Datum::call("+", vec![Datum::Num(1.0), Datum::Num(2.0)]);
        let (op, args) = datum.as_call().unwrap();
        assert_eq!(op, "+");
        assert_eq!(args, &[Datum::Num(1.0), Datum::Num(2.0)]);
        assert!(Datum::Num(1.0).as_call().is_none());
        assert!(Datum::list(vec![Datum::Num(1.0)]).as_call().is_none());
    }

    #[test]
    fn integral_numbers_serialize_without_fraction() {
        assert_eq!(Datum::Num(3.0).to_json_string().unwrap(), "3");
        assert_eq!(Datum::Num(3.25).to_json_string().unwrap(), "3.25");
    }

    #[test]
    fn maps_preserve_insertion_order() {
        let src = r#"{"z":1,"a":2,"m":3}"#;
        let datum = Datum::from_json_str(src).unwrap();
        assert_eq!(datum.to_json_string().unwrap(), src);
    }
}

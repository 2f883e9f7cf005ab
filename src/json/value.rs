//! JSON held as text or as a parsed value. One side is authoritative; the other is derived
//! on first use and dropped whenever the authoritative side is replaced.

use crate::json::{merge, pretty_print};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

#[derive(Clone, Debug)]
enum Repr {
    Text { raw: String, parsed: OnceLock<Option<Value>> },
    Parsed { value: Value, raw: OnceLock<String> },
}

#[derive(Clone, Debug)]
pub struct JsonValue {
    repr: Repr,
}

impl JsonValue {
    pub fn from_text(raw: impl Into<String>) -> Self {
        JsonValue {
            repr: Repr::Text {
                raw: raw.into(),
                parsed: OnceLock::new(),
            },
        }
    }

    pub fn from_value(value: Value) -> Self {
        JsonValue {
            repr: Repr::Parsed {
                value,
                raw: OnceLock::new(),
            },
        }
    }

    /// Serialized text.
    pub fn raw(&self) -> &str {
        match &self.repr {
            Repr::Text { raw, .. } => raw,
            Repr::Parsed { value, raw } => raw.get_or_init(|| value.to_string()),
        }
    }

    /// Parsed structure, or `None` when the text is not JSON.
    pub fn parsed(&self) -> Option<&Value> {
        match &self.repr {
            Repr::Text { raw, parsed } => parsed
                .get_or_init(|| serde_json::from_str(raw).ok())
                .as_ref(),
            Repr::Parsed { value, .. } => Some(value),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.parsed().is_some()
    }

    pub fn set_raw(&mut self, raw: impl Into<String>) {
        *self = JsonValue::from_text(raw);
    }

    pub fn set_parsed(&mut self, value: Value) {
        *self = JsonValue::from_value(value);
    }

    /// Member of a parsed object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.parsed().and_then(|v| v.get(key))
    }

    /// Element of a parsed array.
    pub fn at(&self, index: usize) -> Option<&Value> {
        self.parsed().and_then(|v| v.get(index))
    }

    /// Element count of a parsed array or object; zero otherwise.
    pub fn len(&self) -> usize {
        match self.parsed() {
            Some(Value::Array(a)) => a.len(),
            Some(Value::Object(o)) => o.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_value(self) -> Option<Value> {
        match self.repr {
            Repr::Text { raw, parsed } => match parsed.into_inner() {
                Some(cached) => cached,
                None => serde_json::from_str(&raw).ok(),
            },
            Repr::Parsed { value, .. } => Some(value),
        }
    }

    /// Structural merge; an invalid side counts as `null`.
    pub fn merge(&self, other: &JsonValue) -> JsonValue {
        let left = self.parsed().cloned().unwrap_or(Value::Null);
        let right = other.parsed().cloned().unwrap_or(Value::Null);
        JsonValue::from_value(merge(left, right))
    }

    pub fn pretty(&self, width: usize, indent: &str) -> String {
        match self.parsed() {
            Some(v) => pretty_print(v, width, indent),
            None => self.raw().to_string(),
        }
    }
}

impl Default for JsonValue {
    fn default() -> Self {
        JsonValue::from_text("")
    }
}

impl From<Value> for JsonValue {
    fn from(value: Value) -> Self {
        JsonValue::from_value(value)
    }
}

impl From<String> for JsonValue {
    fn from(raw: String) -> Self {
        JsonValue::from_text(raw)
    }
}

impl fmt::Display for JsonValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.raw())
    }
}

impl PartialEq for JsonValue {
    fn eq(&self, other: &Self) -> bool {
        match (self.parsed(), other.parsed()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.raw() == other.raw(),
            _ => false,
        }
    }
}

impl Serialize for JsonValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.parsed() {
            Some(v) => v.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_is_parsed_lazily_and_cached() {
        let v = JsonValue::from_text(r#"{"a":[1,2]}"#);
        assert_eq!(v.get("a"), Some(&json!([1, 2])));
        assert_eq!(v.len(), 1);
        assert_eq!(v.raw(), r#"{"a":[1,2]}"#);
    }

    #[test]
    fn invalid_text_is_an_invalid_value_not_an_error() {
        let v = JsonValue::from_text("{nope");
        assert!(!v.is_valid());
        assert_eq!(v.get("a"), None);
        assert_eq!(v.to_string(), "{nope");
        assert_eq!(serde_json::to_value(&v).unwrap(), Value::Null);
    }

    #[test]
    fn reassigning_one_side_invalidates_the_other() {
        let mut v = JsonValue::from_value(json!([1]));
        assert_eq!(v.raw(), "[1]");
        v.set_parsed(json!([1, 2]));
        assert_eq!(v.raw(), "[1,2]");
        v.set_raw("[3]");
        assert_eq!(v.at(0), Some(&json!(3)));
    }

    #[test]
    fn merging_wrappers_merges_structures() {
        let merged = JsonValue::from_text("[1]").merge(&JsonValue::from_value(json!([2])));
        assert_eq!(merged.raw(), "[1,2]");
    }
}

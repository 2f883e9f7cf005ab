//! Records: narrow field access over backing rows, and the persisted entity CRUD acts on.

mod entity;
mod validation;

pub use entity::Entity;
pub use validation::{FieldErrors, RecordValidator};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Field-level access to a backing row. Hosts compose this instead of extending their row types.
pub trait FieldAccess {
    fn field(&self, name: &str) -> Option<&Value>;

    fn set_field(&mut self, name: &str, value: Value);

    /// The whole row as a JSON object.
    fn as_value(&self) -> Value;

    /// Typed read; `None` when absent or not convertible.
    fn field_as<T: DeserializeOwned>(&self, name: &str) -> Option<T>
    where
        Self: Sized,
    {
        self.field(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// One row fetched through a driver.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    values: Map<String, Value>,
}

impl Record {
    pub fn new(values: Map<String, Value>) -> Self {
        Record { values }
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_values(self) -> Map<String, Value> {
        self.values
    }
}

impl From<Map<String, Value>> for Record {
    fn from(values: Map<String, Value>) -> Self {
        Record::new(values)
    }
}

impl FieldAccess for Record {
    fn field(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    fn set_field(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    fn as_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typed_reads_convert_or_miss() {
        let mut record = Record::new(json!({ "id": 4, "name": "Lamp" }).as_object().unwrap().clone());
        assert_eq!(record.field_as::<i64>("id"), Some(4));
        assert_eq!(record.field_as::<i64>("name"), None);
        record.set_field("name", json!("Desk"));
        assert_eq!(record.as_value(), json!({ "id": 4, "name": "Desk" }));
    }
}

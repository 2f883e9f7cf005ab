//! The entity create/update/destroy operate on: a row plus pending changes and save errors.

use crate::config::Model;
use crate::error::AppError;
use crate::record::{FieldAccess, FieldErrors, RecordValidator};
use crate::sql::{delete, insert, update};
use crate::store::Store;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Entity {
    model: Arc<Model>,
    values: Map<String, Value>,
    changes: Map<String, Value>,
    errors: FieldErrors,
    persisted: bool,
    destroyed: bool,
}

impl Entity {
    /// Unsaved entity built from (already permitted) params. Unknown keys are dropped.
    pub fn new(model: Arc<Model>, attributes: Map<String, Value>) -> Self {
        let mut entity = Entity {
            model,
            values: Map::new(),
            changes: Map::new(),
            errors: FieldErrors::new(),
            persisted: false,
            destroyed: false,
        };
        entity.assign_attributes(attributes);
        entity
    }

    /// Entity for a row that already exists in the store.
    pub fn from_row(model: Arc<Model>, row: Map<String, Value>) -> Self {
        Entity {
            model,
            values: row,
            changes: Map::new(),
            errors: FieldErrors::new(),
            persisted: true,
            destroyed: false,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn id(&self) -> Option<&Value> {
        self.values.get(&self.model.primary_key).filter(|v| !v.is_null())
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted && !self.destroyed
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn changes(&self) -> &Map<String, Value> {
        &self.changes
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    /// Errors as a `{ field: [messages] }` object.
    pub fn errors_json(&self) -> Value {
        serde_json::to_value(&self.errors).unwrap_or(Value::Null)
    }

    /// Stage column values; the primary key and unknown keys are ignored.
    pub fn assign_attributes(&mut self, attributes: Map<String, Value>) {
        for (k, v) in attributes {
            if k == self.model.primary_key && self.persisted {
                continue;
            }
            if self.model.find_column(&k).is_none() {
                continue;
            }
            self.values.insert(k.clone(), v.clone());
            self.changes.insert(k, v);
        }
    }

    /// Validate, then insert or update. `Ok(false)` when validation fails; errors are kept on the entity.
    pub async fn save(&mut self, store: &dyn Store) -> Result<bool, AppError> {
        self.errors = RecordValidator::validate(&self.model, &self.values, self.persisted);
        if !self.errors.is_empty() {
            tracing::debug!(model = %self.model.name, errors = ?self.errors, "validation failed");
            return Ok(false);
        }
        let q = if self.persisted {
            let id = self
                .id()
                .cloned()
                .ok_or_else(|| AppError::BadRequest(format!("{} has no id", self.model.name)))?;
            update(&self.model, &id, &self.changes)
        } else {
            insert(&self.model, &self.values)
        };
        let row = store
            .execute_returning(&q)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} row vanished during save", self.model.name)))?;
        self.values = row;
        self.changes.clear();
        self.persisted = true;
        Ok(true)
    }

    /// Delete the row. `Ok(false)` if it was never saved or is already gone.
    pub async fn destroy(&mut self, store: &dyn Store) -> Result<bool, AppError> {
        let Some(id) = self.id().cloned().filter(|_| self.is_persisted()) else {
            return Ok(false);
        };
        let deleted = store.execute_returning(&delete(&self.model, &id)).await?;
        self.destroyed = true;
        Ok(deleted.is_some())
    }
}

impl FieldAccess for Entity {
    fn field(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    fn set_field(&mut self, name: &str, value: Value) {
        let mut attributes = Map::new();
        attributes.insert(name.to_string(), value);
        self.assign_attributes(attributes);
    }

    fn as_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

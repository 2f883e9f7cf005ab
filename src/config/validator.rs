//! Model validation: referential integrity before a model backs a resource.

use crate::config::{AssociationKind, ColumnKind, Model};
use crate::error::DefinitionError;
use std::collections::HashSet;

pub fn validate_model(model: &Model) -> Result<(), DefinitionError> {
    let invalid = |message: String| DefinitionError::InvalidModel {
        model: model.name.clone(),
        message,
    };

    let mut columns = HashSet::new();
    for c in &model.columns {
        if !columns.insert(c.name.as_str()) {
            return Err(invalid(format!("duplicate column '{}'", c.name)));
        }
        if let ColumnKind::Enum(values) = &c.kind {
            if values.is_empty() {
                return Err(invalid(format!("enum column '{}' declares no values", c.name)));
            }
        }
    }
    if !columns.contains(model.primary_key.as_str()) {
        return Err(invalid(format!("primary key '{}' is not a column", model.primary_key)));
    }

    let mut associations = HashSet::new();
    for a in &model.associations {
        if !associations.insert(a.name.as_str()) {
            return Err(invalid(format!("duplicate association '{}'", a.name)));
        }
        if columns.contains(a.name.as_str()) {
            return Err(invalid(format!("association '{}' collides with a column", a.name)));
        }
        if a.kind == AssociationKind::BelongsTo && !columns.contains(a.foreign_key.as_str()) {
            return Err(invalid(format!(
                "belongs_to '{}' foreign key '{}' is not a column",
                a.name, a.foreign_key
            )));
        }
    }
    Ok(())
}

//! Association macros: id/count attributes plus a context-gated batched loader per relation.

use crate::api::attribute::{AttributeOptions, ComputeFn};
use crate::api::meta::MetaOptions;
use crate::api::{ApiBuilder, MacroFn};
use crate::config::{Association, AssociationKind, Model};
use crate::error::{AppError, DefinitionError};
use crate::inflect::{canonical_api_name, singularize};
use crate::record::FieldAccess;
use crate::resource::{LoadRequest, Resource};
use crate::sql::quoted;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct AssociationOptions {
    /// Target descriptor name; overrides the association's target type.
    pub api: Option<String>,
    /// Merged into the generated id attribute.
    pub attribute: AttributeOptions,
}

impl AssociationOptions {
    pub fn api(mut self, api: impl Into<String>) -> Self {
        self.api = Some(api.into());
        self
    }

    pub fn attribute(mut self, options: AttributeOptions) -> Self {
        self.attribute = options;
        self
    }
}

/// Alias for the target table inside correlated subqueries.
fn alias(association: &Association) -> String {
    quoted(&format!("__{}", association.name))
}

fn correlated(model: &Model, association: &Association, select: &str) -> String {
    let a = alias(association);
    format!(
        "SELECT {} FROM {} {} WHERE {}.{} = {}",
        select,
        association.target_table(&model.schema),
        a,
        a,
        quoted(&association.foreign_key),
        model.pk_sql()
    )
}

fn ids_sql(model: &Model, association: &Association) -> String {
    let key = format!("{}.{}", alias(association), quoted(&association.target_key));
    format!(
        "({})",
        correlated(
            model,
            association,
            &format!("COALESCE(json_agg({} ORDER BY {}), '[]'::json)", key, key)
        )
    )
}

fn count_sql(model: &Model, association: &Association) -> String {
    format!("({})", correlated(model, association, "COUNT(*)"))
}

fn single_id_sql(model: &Model, association: &Association) -> String {
    let key = format!("{}.{}", alias(association), quoted(&association.target_key));
    format!(
        "({} ORDER BY {} LIMIT 1)",
        correlated(model, association, &key),
        key
    )
}

/// Loader for `name`: reads `id_attribute` and asks for those ids from the target descriptor.
/// Does nothing unless the resource is being served.
fn loader(name: &str, id_attribute: &str, explicit_api: Option<String>) -> MacroFn {
    let name = name.to_string();
    let id_attribute = id_attribute.to_string();
    Arc::new(move |resource: &Resource<'_>| -> Result<Option<LoadRequest>, AppError> {
        if !resource.in_context() {
            return Ok(None);
        }
        let api = match &explicit_api {
            Some(api) => resource.resolve_api(api)?,
            None => resource.find_api(&name)?,
        };
        let ids = match resource.get_attribute(&id_attribute)? {
            Value::Array(ids) => ids.into_iter().filter(|id| !id.is_null()).collect(),
            Value::Null => Vec::new(),
            id => vec![id],
        };
        Ok(Some(LoadRequest {
            api,
            ids,
            selection: resource.nested_selection(&name),
        }))
    })
}

impl ApiBuilder {
    fn association_of(&mut self, name: &str, kind: AssociationKind) -> Option<(Arc<Model>, Association)> {
        let Some(model) = self.model.clone() else {
            self.record_error(DefinitionError::MissingModel(self.full_name()));
            return None;
        };
        match model.find_association(name).filter(|a| a.kind == kind).cloned() {
            Some(association) => Some((model, association)),
            None => {
                self.record_error(DefinitionError::UnknownAssociation {
                    api: self.full_name(),
                    name: name.to_string(),
                });
                None
            }
        }
    }

    fn declare_loader(&mut self, name: &str, id_attribute: &str, association: &Association, options: AssociationOptions) {
        let reference = options
            .api
            .clone()
            .unwrap_or_else(|| canonical_api_name(&association.target));
        self.insert_macro(name, loader(name, id_attribute, options.api));
        self.meta(
            name,
            MetaOptions::new().children([id_attribute]).references([reference]),
        );
    }

    /// `{singular}_ids`, `{singular}_count`, and a loader macro named `name`.
    pub fn has_many(&mut self, name: &str, options: AssociationOptions) -> &mut Self {
        let Some((model, association)) = self.association_of(name, AssociationKind::HasMany) else {
            return self;
        };
        let single = singularize(name);
        let ids = format!("{}_ids", single);
        let count = format!("{}_count", single);

        let id_options = AttributeOptions::new().sortable(false).sql(ids_sql(&model, &association));
        self.attribute_with(&ids, id_options, None);
        self.attribute_with(&ids, options.attribute.clone(), None);

        let (ids_name, count_name) = (ids.clone(), count.clone());
        let compute: ComputeFn = Arc::new(move |resource: &Resource<'_>| -> Result<Value, AppError> {
            if resource.requested(&ids_name) {
                let n = resource.get_attribute(&ids_name)?.as_array().map_or(0, Vec::len);
                return Ok(json!(n));
            }
            Ok(resource.record().field(&count_name).cloned().unwrap_or(json!(0)))
        });
        self.attribute_with(
            &count,
            AttributeOptions::new().sql(count_sql(&model, &association)).derived_from(&ids),
            Some(compute),
        );

        self.declare_loader(name, &ids, &association, options);
        self
    }

    /// `{name}_id` and a loader macro for the single related record.
    pub fn has_one(&mut self, name: &str, options: AssociationOptions) -> &mut Self {
        let Some((model, association)) = self.association_of(name, AssociationKind::HasOne) else {
            return self;
        };
        let id = format!("{}_id", name);
        self.attribute_with(&id, AttributeOptions::new().sql(single_id_sql(&model, &association)), None);
        self.attribute_with(&id, options.attribute.clone(), None);
        self.declare_loader(name, &id, &association, options);
        self
    }

    /// Loader over the foreign key column, which is already an attribute of the model.
    pub fn belongs_to(&mut self, name: &str, options: AssociationOptions) -> &mut Self {
        let Some((model, association)) = self.association_of(name, AssociationKind::BelongsTo) else {
            return self;
        };
        let id = association.foreign_key.clone();
        if model.find_column(&id).is_none() {
            self.attribute(&id);
        }
        self.attribute_with(&id, options.attribute.clone(), None);
        self.declare_loader(name, &id, &association, options);
        self
    }
}

use crate::api::MetaOptions;
use crate::error::AppError;
use crate::record::FieldAccess;
use crate::resource::Resource;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Computes an attribute for one resource. May read other attributes through the resource.
pub type ComputeFn = Arc<dyn Fn(&Resource<'_>) -> Result<Value, AppError> + Send + Sync>;

#[derive(Clone)]
pub struct Attribute {
    pub name: String,
    pub sortable: bool,
    /// When this attribute is also requested, the value comes from it and our own
    /// native expression is not selected.
    pub derived_from: Option<String>,
    compute: Option<ComputeFn>,
}

impl Attribute {
    pub(crate) fn new(name: &str) -> Self {
        Attribute {
            name: name.to_string(),
            sortable: true,
            derived_from: None,
            compute: None,
        }
    }

    pub fn is_computed(&self) -> bool {
        self.compute.is_some()
    }

    /// Run the compute fn, or read the like-named field off the record.
    pub fn compute(&self, resource: &Resource<'_>) -> Result<Value, AppError> {
        match &self.compute {
            Some(f) => f(resource),
            None => Ok(resource.record().field(&self.name).cloned().unwrap_or(Value::Null)),
        }
    }

    pub(crate) fn merge(&mut self, options: &AttributeOptions, compute: Option<ComputeFn>) {
        if let Some(sortable) = options.sortable {
            self.sortable = sortable;
        }
        if options.derived_from.is_some() {
            self.derived_from = options.derived_from.clone();
        }
        if compute.is_some() {
            self.compute = compute;
        }
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("sortable", &self.sortable)
            .field("derived_from", &self.derived_from)
            .field("computed", &self.compute.is_some())
            .finish()
    }
}

/// Attribute options: meta options plus sortability.
#[derive(Clone, Debug, Default)]
pub struct AttributeOptions {
    pub meta: MetaOptions,
    pub sortable: Option<bool>,
    pub derived_from: Option<String>,
}

impl AttributeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.meta = self.meta.sql(sql);
        self
    }

    pub fn sortable(mut self, sortable: bool) -> Self {
        self.sortable = Some(sortable);
        self
    }

    pub fn derived_from(mut self, name: impl Into<String>) -> Self {
        self.derived_from = Some(name.into());
        self
    }

    pub fn meta(mut self, meta: MetaOptions) -> Self {
        self.meta = meta;
        self
    }
}

//! Request-scoped resources: one backing record plus the attributes requested for it.

use crate::api::{Api, ApiRegistry};
use crate::error::AppError;
use crate::record::Record;
use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

/// Requested fields, e.g. `["name", {"variants": ["name"]}]`. Strings name attributes or
/// macros; objects map macro names to their own selection.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub struct Selection {
    pub fields: Vec<String>,
    pub nested: IndexMap<String, Selection>,
}

impl Selection {
    /// Every declared attribute, no macros.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Selection {
            fields: names.into_iter().map(Into::into).collect(),
            nested: IndexMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, selection: Selection) -> Self {
        self.nested.insert(name.into(), selection);
        self
    }

    pub fn from_json(value: &Value) -> Result<Self, AppError> {
        let mut selection = Selection::default();
        selection.extend(value)?;
        Ok(selection)
    }

    fn extend(&mut self, value: &Value) -> Result<(), AppError> {
        match value {
            Value::Null => {}
            Value::String(name) => self.fields.push(name.clone()),
            Value::Array(items) => {
                for item in items {
                    self.extend(item)?;
                }
            }
            Value::Object(map) => {
                for (name, nested) in map {
                    self.nested.insert(name.clone(), Selection::from_json(nested)?);
                }
            }
            other => {
                return Err(AppError::BadRequest(format!(
                    "selection entries must be names or objects, got {}",
                    other
                )))
            }
        }
        Ok(())
    }
}

impl TryFrom<Value> for Selection {
    type Error = AppError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Selection::from_json(&value)
    }
}

/// A selection resolved against one descriptor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadPlan {
    /// Attributes rendered, in order.
    pub output: Vec<String>,
    /// Output attributes plus everything they or the requested macros depend on.
    pub needed: IndexSet<String>,
    pub macros: Vec<String>,
}

/// A batched load produced by a macro.
#[derive(Clone, Debug)]
pub struct LoadRequest {
    pub api: Arc<Api>,
    pub ids: Vec<Value>,
    pub selection: Selection,
}

pub struct Resource<'a> {
    api: &'a Api,
    record: Record,
    selection: &'a Selection,
    plan: &'a LoadPlan,
    registry: Option<&'a ApiRegistry>,
    cache: RefCell<HashMap<String, Value>>,
}

impl<'a> Resource<'a> {
    /// `registry` is the serving context; `None` means definition-time evaluation.
    pub fn new(
        api: &'a Api,
        record: Record,
        selection: &'a Selection,
        plan: &'a LoadPlan,
        registry: Option<&'a ApiRegistry>,
    ) -> Self {
        Resource {
            api,
            record,
            selection,
            plan,
            registry,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn api(&self) -> &'a Api {
        self.api
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn in_context(&self) -> bool {
        self.registry.is_some()
    }

    /// Whether `name` was loaded for this response, directly or as a dependency.
    pub fn requested(&self, name: &str) -> bool {
        self.plan.needed.contains(name)
    }

    /// Attribute value, computed once per resource.
    pub fn get_attribute(&self, name: &str) -> Result<Value, AppError> {
        let cached = self.cache.borrow().get(name).cloned();
        if let Some(value) = cached {
            return Ok(value);
        }
        let attribute = self.api.attribute(name).ok_or_else(|| {
            AppError::Validation(format!("unknown attribute '{}' on {}", name, self.api.full_name()))
        })?;
        let value = attribute.compute(self)?;
        self.cache.borrow_mut().insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// Requested attributes as one JSON object.
    pub fn render(&self) -> Result<Value, AppError> {
        let mut out = Map::new();
        for name in &self.plan.output {
            out.insert(name.clone(), self.get_attribute(name)?);
        }
        Ok(Value::Object(out))
    }

    /// Resolve `name` from this resource's namespace, substituting association target types.
    pub fn find_api(&self, name: &str) -> Result<Arc<Api>, AppError> {
        self.resolve_api(&self.api.resolve_name(name))
    }

    /// Resolve `value` from this resource's namespace as given.
    pub fn resolve_api(&self, value: &str) -> Result<Arc<Api>, AppError> {
        let registry = self
            .registry
            .ok_or_else(|| AppError::Resolution(format!("{} (no serving context)", value)))?;
        registry.resolve(value, self.api.namespace())
    }

    pub fn nested_selection(&self, name: &str) -> Selection {
        self.selection.nested.get(name).cloned().unwrap_or_default()
    }

    pub fn invoke_macro(&self, name: &str) -> Result<Option<LoadRequest>, AppError> {
        let f = self.api.macro_fn(name).ok_or_else(|| {
            AppError::Validation(format!("unknown macro '{}' on {}", name, self.api.full_name()))
        })?;
        f(self)
    }
}

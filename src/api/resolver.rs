//! Name-to-descriptor registry with namespace-walking lookup.

use crate::api::{Api, ApiBuilder};
use crate::error::{AppError, DefinitionError};
use crate::inflect::{camelize, canonical_api_name, strict_api_name};
use indexmap::IndexMap;
use std::sync::Arc;

/// Sealed descriptors keyed by full path, e.g. `Catalog::ProductsApi`.
#[derive(Debug, Default)]
pub struct ApiRegistry {
    apis: IndexMap<String, Arc<Api>>,
}

#[derive(Default)]
pub struct RegistryBuilder {
    builders: Vec<ApiBuilder>,
}

impl RegistryBuilder {
    pub fn register(mut self, builder: ApiBuilder) -> Self {
        self.builders.push(builder);
        self
    }

    /// Seal every descriptor. Fails on the first declaration error or duplicate path.
    pub fn build(self) -> Result<ApiRegistry, DefinitionError> {
        let mut apis = IndexMap::with_capacity(self.builders.len());
        for builder in self.builders {
            let api = builder.seal()?;
            let path = api.full_name();
            if apis.contains_key(&path) {
                return Err(DefinitionError::DuplicateResource(path));
            }
            apis.insert(path, Arc::new(api));
        }
        tracing::info!(resources = apis.len(), "resource registry sealed");
        Ok(ApiRegistry { apis })
    }
}

impl ApiRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, path: &str) -> Option<&Arc<Api>> {
        self.apis.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Api>> {
        self.apis.values()
    }

    pub fn len(&self) -> usize {
        self.apis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }

    /// Look up the conventional descriptor for `value` starting in `namespace` and walking
    /// outwards to the top level. `value` may carry its own `A::B` prefix.
    pub fn resolve(&self, value: &str, namespace: &[String]) -> Result<Arc<Api>, AppError> {
        let mut segments: Vec<String> = value
            .split("::")
            .filter(|s| !s.is_empty())
            .map(camelize)
            .collect();
        let last = segments
            .pop()
            .ok_or_else(|| AppError::Resolution(format!("'{}'", value)))?;
        segments.push(canonical_api_name(&last));
        let relative = segments.join("::");

        let mut scope = namespace.to_vec();
        loop {
            let path = if scope.is_empty() {
                relative.clone()
            } else {
                format!("{}::{}", scope.join("::"), relative)
            };
            if let Some(api) = self.apis.get(&path) {
                return servable(&path, api);
            }
            if scope.pop().is_none() {
                break;
            }
        }
        Err(AppError::Resolution(relative))
    }

    /// Exact lookup of `Camelcase(value)Api`: no namespace walking, no pluralization.
    pub fn strict_resolve(&self, value: &str) -> Result<Arc<Api>, AppError> {
        let path = strict_api_name(value);
        match self.apis.get(&path) {
            Some(api) => servable(&path, api),
            None => Err(AppError::Resolution(path)),
        }
    }
}

fn servable(path: &str, api: &Arc<Api>) -> Result<Arc<Api>, AppError> {
    if api.is_abstract() {
        return Err(AppError::NotResource(path.to_string()));
    }
    tracing::debug!(resource = %path, "resolved");
    Ok(Arc::clone(api))
}

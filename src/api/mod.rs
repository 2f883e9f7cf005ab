//! Resource descriptors. An [`ApiBuilder`] accumulates declarations once at startup and is
//! sealed into an immutable [`Api`]; serving code only ever reads the sealed form.

mod action;
mod associations;
mod attribute;
mod builder;
mod crud;
mod meta;
mod resolver;
mod scope;

pub use action::{action_fn, ActionContext, ActionHandler, ActionOutcome, Context, FnAction};
pub use associations::AssociationOptions;
pub use attribute::{Attribute, AttributeOptions, ComputeFn};
pub use builder::ApiBuilder;
pub use crud::{
    parse_crud_actions, BinaryMethod, CrudAction, CrudCallback, CrudCallbacks, Hook, HookFn, Method,
    NullaryMethod,
};
pub use meta::{MetaEntry, MetaGraph, MetaOptions, META_OPTION_KEYS};
pub use resolver::{ApiRegistry, RegistryBuilder};
pub use scope::{scope, try_scope, ScopeFn};

use crate::config::{disable_default_scopes, Model};
use crate::driver::{Driver, SortDirection};
use crate::error::AppError;
use crate::json::RowShape;
use crate::resource::{LoadPlan, LoadRequest, Resource, Selection};
use crate::sql::quoted;
use indexmap::{IndexMap, IndexSet};
use scope::{apply_scope, compose, CachedDriver};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

/// Loads nested data for one resource. `Ok(None)` outside a serving context.
pub type MacroFn = Arc<dyn Fn(&Resource<'_>) -> Result<Option<LoadRequest>, AppError> + Send + Sync>;

pub struct Api {
    path: Vec<String>,
    is_abstract: bool,
    model: Option<Arc<Model>>,
    resource_name: String,
    attributes: IndexMap<String, Attribute>,
    meta: MetaGraph,
    macros: IndexMap<String, MacroFn>,
    scopes: IndexMap<String, ScopeFn>,
    default_scopes: Vec<(String, ScopeFn)>,
    member_actions: IndexMap<String, Arc<dyn ActionHandler>>,
    collection_actions: IndexMap<String, Arc<dyn ActionHandler>>,
    permitted_params: Vec<String>,
    searchable: Vec<String>,
    crud_callbacks: CrudCallbacks,
    driver_cache: RwLock<Option<CachedDriver>>,
}

impl Api {
    /// Last path segment, e.g. `ProductsApi`.
    pub fn name(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// `Catalog::ProductsApi`.
    pub fn full_name(&self) -> String {
        self.path.join("::")
    }

    /// Enclosing namespace segments; empty at top level.
    pub fn namespace(&self) -> &[String] {
        &self.path[..self.path.len().saturating_sub(1)]
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn model(&self) -> Result<&Arc<Model>, AppError> {
        match (&self.model, self.is_abstract) {
            (Some(model), false) => Ok(model),
            _ => Err(AppError::Abstract(self.full_name())),
        }
    }

    /// Key this resource's records are collected under.
    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    pub fn attribute_sql(&self, name: &str) -> Option<&str> {
        self.meta.sql(name)
    }

    pub fn meta(&self) -> &MetaGraph {
        &self.meta
    }

    pub fn macro_fn(&self, name: &str) -> Option<&MacroFn> {
        self.macros.get(name)
    }

    pub fn has_scope(&self, name: &str) -> bool {
        self.scopes.contains_key(name)
    }

    pub fn member_action(&self, name: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.member_actions.get(name)
    }

    pub fn collection_action(&self, name: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.collection_actions.get(name)
    }

    pub fn permitted_params(&self) -> &[String] {
        &self.permitted_params
    }

    pub fn searchable(&self) -> &[String] {
        &self.searchable
    }

    pub fn crud_callbacks(&self) -> &CrudCallbacks {
        &self.crud_callbacks
    }

    /// Association name to its target type name; anything else passes through.
    pub fn resolve_name(&self, value: &str) -> String {
        self.model
            .as_ref()
            .and_then(|m| m.find_association(value))
            .map(|a| a.target.clone())
            .unwrap_or_else(|| value.to_string())
    }

    /// Base handle with default scopes applied, unless the process-wide switch disables them.
    pub fn driver(&self) -> Result<Driver, AppError> {
        self.driver_with(disable_default_scopes())
    }

    /// Memoized per switch value; a change of switch rebuilds rather than patches the cache.
    pub fn driver_with(&self, defaults_disabled: bool) -> Result<Driver, AppError> {
        if let Ok(cache) = self.driver_cache.read() {
            if let Some(cached) = cache.as_ref().filter(|c| c.defaults_disabled == defaults_disabled) {
                return Ok(cached.driver.clone());
            }
        }
        let model = self.model()?;
        let base = Driver::all(Arc::clone(model));
        let driver = if defaults_disabled {
            base
        } else {
            compose(model, base, self.default_scopes.iter().map(|(name, f)| (name, f)))?
        };
        tracing::debug!(api = %self.full_name(), defaults_disabled, "driver built");
        if let Ok(mut cache) = self.driver_cache.write() {
            *cache = Some(CachedDriver {
                defaults_disabled,
                driver: driver.clone(),
            });
        }
        Ok(driver)
    }

    /// Apply named scopes in order. Unknown names are rejected before any scope runs.
    pub fn apply_scopes(&self, driver: Driver, names: &[String]) -> Result<Driver, AppError> {
        let model = self.model()?;
        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            let f = self
                .scopes
                .get(name)
                .ok_or_else(|| AppError::Validation(format!("unknown scope '{}' on {}", name, self.full_name())))?;
            selected.push((name, f));
        }
        selected
            .into_iter()
            .try_fold(driver, |driver, (name, f)| apply_scope(model, driver, name, f))
    }

    /// Order by `"attribute [asc|desc]"`.
    pub fn apply_sort(&self, driver: Driver, sort: &str) -> Result<Driver, AppError> {
        let mut parts = sort.split_whitespace();
        let column = parts.next().unwrap_or_default();
        let direction = parts.next().unwrap_or_default().parse::<SortDirection>()?;
        let sql = self
            .attributes
            .get(column)
            .filter(|a| a.sortable)
            .and_then(|_| self.meta.sql(column))
            .ok_or_else(|| {
                AppError::Validation(format!("'{}' is not a sortable attribute of {}", column, self.full_name()))
            })?;
        Ok(driver.order(sql, direction))
    }

    /// Case-insensitive substring match over the searchable attributes.
    pub fn apply_search(&self, driver: Driver, term: &str) -> Result<Driver, AppError> {
        let mut exprs = Vec::with_capacity(self.searchable.len());
        for name in &self.searchable {
            let sql = self.meta.sql(name).ok_or_else(|| {
                AppError::Validation(format!("'{}' is not a searchable attribute of {}", name, self.full_name()))
            })?;
            exprs.push(sql.to_string());
        }
        Ok(driver.search(exprs, term))
    }

    /// Split a selection into output attributes and macros, and close over meta children.
    pub fn plan(&self, selection: &Selection) -> Result<LoadPlan, AppError> {
        let mut output = Vec::new();
        let mut macros = Vec::new();
        for field in &selection.fields {
            if self.attributes.contains_key(field) {
                output.push(field.clone());
            } else if self.macros.contains_key(field) {
                macros.push(field.clone());
            } else {
                return Err(AppError::Validation(format!(
                    "unknown attribute '{}' on {}",
                    field,
                    self.full_name()
                )));
            }
        }
        for name in selection.nested.keys() {
            if !self.macros.contains_key(name) {
                return Err(AppError::Validation(format!("unknown macro '{}' on {}", name, self.full_name())));
            }
            if !macros.contains(name) {
                macros.push(name.clone());
            }
        }
        if output.is_empty() {
            output = self.attributes.keys().cloned().collect();
        }

        let mut pending: VecDeque<String> = output.iter().cloned().collect();
        for name in &macros {
            if let Some(entry) = self.meta.get(name) {
                pending.extend(entry.children.iter().cloned());
            }
        }
        let mut needed = IndexSet::new();
        while let Some(name) = pending.pop_front() {
            if !self.attributes.contains_key(&name) || !needed.insert(name.clone()) {
                continue;
            }
            if let Some(entry) = self.meta.get(&name) {
                pending.extend(entry.children.iter().cloned());
            }
        }
        Ok(LoadPlan { output, needed, macros })
    }

    /// `sql AS "name"` for every needed attribute with a native expression. An attribute
    /// derived from another needed attribute is computed from it instead.
    pub fn select_list(&self, plan: &LoadPlan) -> Vec<String> {
        plan.needed
            .iter()
            .filter_map(|name| {
                let attribute = self.attributes.get(name)?;
                if attribute.derived_from.as_ref().is_some_and(|d| plan.needed.contains(d)) {
                    return None;
                }
                let sql = self.meta.sql(name)?;
                Some(format!("{} AS {}", sql, quoted(name)))
            })
            .collect()
    }

    /// Row shape for store-side aggregation, when the store can produce every output value.
    pub fn push_down_shape(&self, plan: &LoadPlan) -> Option<RowShape> {
        if !plan.macros.is_empty() {
            return None;
        }
        let pairs = plan
            .output
            .iter()
            .map(|name| self.meta.sql(name).map(|sql| (name.clone(), sql.to_string())))
            .collect::<Option<Vec<_>>>()?;
        Some(RowShape(pairs))
    }
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("path", &self.path)
            .field("abstract", &self.is_abstract)
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .field("macros", &self.macros.keys().collect::<Vec<_>>())
            .field("scopes", &self.scopes.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Condition;
    use crate::testing::fixtures;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn articles_api() -> ApiBuilder {
        let mut b = ApiBuilder::new("ArticlesApi");
        b.model(fixtures::articles());
        b
    }

    #[test]
    fn default_scopes_apply_in_declaration_order() {
        let mut b = articles_api();
        b.default_scope(Some("a"), Some(scope(|d| d.where_sql("a"))));
        b.default_scope(None, Some(scope(|d| d.where_sql("b"))));
        let api = b.seal().unwrap();
        let driver = api.driver_with(false).unwrap();
        assert_eq!(
            driver.conditions(),
            &[Condition::Raw("a".into()), Condition::Raw("b".into())]
        );
    }

    #[test]
    fn a_scope_returning_a_foreign_handle_stops_the_fold() {
        let later = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&later);
        let mut b = articles_api();
        b.default_scope(
            Some("elsewhere"),
            Some(scope(|_| Driver::all(Arc::new(fixtures::products())))),
        );
        b.default_scope(
            Some("after"),
            Some(scope(move |d| {
                seen.fetch_add(1, Ordering::SeqCst);
                d
            })),
        );
        let api = b.seal().unwrap();
        let err = api.driver_with(false).unwrap_err();
        assert!(err.to_string().contains("scope 'elsewhere'"));
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cached_driver_follows_the_switch() {
        let mut b = articles_api();
        b.default_scope(Some("published"), Some(scope(|d| d.where_sql("published"))));
        let api = b.seal().unwrap();
        assert_eq!(api.driver_with(false).unwrap().conditions().len(), 1);
        assert!(api.driver_with(true).unwrap().conditions().is_empty());
        assert_eq!(api.driver_with(false).unwrap().conditions().len(), 1);
    }

    #[test]
    fn named_scopes_sorting_and_search() {
        let mut b = articles_api();
        b.scope("titled", scope(|d| d.where_sql("\"articles\".\"title\" IS NOT NULL")));
        b.searchable(["title", "body"]);
        let api = b.seal().unwrap();
        let driver = api.driver_with(true).unwrap();
        let driver = api.apply_scopes(driver, &["titled".to_string()]).unwrap();
        let driver = api.apply_sort(driver, "title DESC").unwrap();
        let driver = api.apply_search(driver, "cat").unwrap();
        let q = driver.to_query(&[]);
        assert!(q.sql.contains("ORDER BY \"articles\".\"title\" DESC"));
        assert!(q.sql.contains("ILIKE $1"));

        let err = api.apply_scopes(api.driver_with(true).unwrap(), &["nope".to_string()]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(api.apply_sort(api.driver_with(true).unwrap(), "missing asc").is_err());
        assert!(api.apply_sort(api.driver_with(true).unwrap(), "title sideways").is_err());
    }

    #[test]
    fn sorting_requires_a_direction() {
        let api = articles_api().seal().unwrap();
        let err = api.apply_sort(api.driver_with(true).unwrap(), "title").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains("instead got ''"));
        assert!(api.apply_sort(api.driver_with(true).unwrap(), "title asc").is_ok());
    }

    #[test]
    fn model_columns_become_attributes() {
        let mut b = ApiBuilder::new("ProductsApi");
        b.model(fixtures::products());
        let api = b.seal().unwrap();
        let names: Vec<&str> = api.attributes().map(|a| a.name.as_str()).collect();
        assert_eq!(
            names,
            ["id", "name", "status", "metadata", "variant_ids", "variant_count", "article_ids", "article_count"]
        );
        assert!(api.attribute_sql("status").unwrap().starts_with("CASE \"products\".\"status\" WHEN 0 THEN 'draft'"));
        assert!(!api.attribute("metadata").unwrap().sortable);
        assert!(!api.attribute("variant_ids").unwrap().sortable);
        assert!(api.has_scope("all"));
        assert_eq!(api.resource_name(), "products");
        assert_eq!(api.resolve_name("variants"), "Variant");
        assert_eq!(api.resolve_name("widgets"), "widgets");
    }

    #[test]
    fn plans_pull_in_macro_dependencies_and_skip_derived_expressions() {
        let mut b = ApiBuilder::new("ProductsApi");
        b.model(fixtures::products());
        let api = b.seal().unwrap();
        let selection = Selection::from_json(&json!(["name", "variant_count", { "variants": ["name"] }])).unwrap();
        let plan = api.plan(&selection).unwrap();
        assert_eq!(plan.output, ["name", "variant_count"]);
        assert_eq!(plan.macros, ["variants"]);
        assert!(plan.needed.contains("variant_ids"));
        let select = api.select_list(&plan);
        assert!(select.iter().any(|s| s.ends_with("AS \"variant_ids\"")));
        assert!(!select.iter().any(|s| s.contains("COUNT(*)")));
        assert!(api.push_down_shape(&plan).is_none());

        let flat = api.plan(&Selection::fields(["id", "name"])).unwrap();
        assert!(matches!(api.push_down_shape(&flat), Some(RowShape(p)) if p.len() == 2));
        assert!(api.plan(&Selection::fields(["bogus"])).is_err());
    }

    #[test]
    fn actions_route_by_context() {
        let mut b = articles_api();
        b.collection(|b| {
            b.action("export", action_fn(|_, _| Ok(())));
        });
        b.action("publish", action_fn(|_, _| Ok(())));
        let api = b.seal().unwrap();
        assert!(api.collection_action("export").is_some());
        assert!(api.member_action("export").is_none());
        assert!(api.member_action("publish").is_some());
    }
}

//! Serving context: loads records for a request and dispatches actions.

use crate::api::{ActionContext, ActionOutcome, Api, ApiRegistry};
use crate::config::Settings;
use crate::driver::SortDirection;
use crate::error::AppError;
use crate::json::{id_key, missing_ids, JsonProjector, JsonValue};
use crate::record::{Entity, Record};
use crate::resource::{LoadPlan, LoadRequest, Resource, Selection};
use crate::sql::{quoted, select_column_list, PK_ALIAS};
use crate::store::Store;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Listing parameters for [`Controller::index`].
#[derive(Clone, Debug, Default, Deserialize)]
pub struct IndexQuery {
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub search: Option<String>,
    /// `"attribute [asc|desc]"`.
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub selection: Selection,
}

/// Everything loaded during one request, keyed by resource name.
#[derive(Clone, Debug, Default, Serialize)]
pub struct LoadedRecords {
    pub records: IndexMap<String, JsonValue>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub missing: IndexMap<String, Vec<Value>>,
}

impl LoadedRecords {
    /// Width-aware rendering of the whole payload.
    pub fn pretty(&self, settings: &Settings) -> String {
        match serde_json::to_value(self) {
            Ok(value) => crate::json::pretty_print(&value, settings.pretty_width, &settings.pretty_indent),
            Err(_) => String::new(),
        }
    }
}

pub struct Controller {
    registry: Arc<ApiRegistry>,
    store: Arc<dyn Store>,
    settings: Arc<Settings>,
    params: Value,
    caller: Option<String>,
    loaded: LoadedRecords,
}

impl Controller {
    pub fn new(
        registry: Arc<ApiRegistry>,
        store: Arc<dyn Store>,
        settings: Arc<Settings>,
        params: Value,
        caller: Option<String>,
    ) -> Self {
        Controller {
            registry,
            store,
            settings,
            params,
            caller,
            loaded: LoadedRecords::default(),
        }
    }

    pub fn registry(&self) -> &ApiRegistry {
        &self.registry
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    pub fn records(&self) -> &IndexMap<String, JsonValue> {
        &self.loaded.records
    }

    pub fn missing(&self) -> &IndexMap<String, Vec<Value>> {
        &self.loaded.missing
    }

    pub fn into_loaded(self) -> LoadedRecords {
        self.loaded
    }

    /// Load `ids` of `api`, then every batch the requested macros ask for, breadth first.
    pub async fn load_records(&mut self, api: &Arc<Api>, ids: &[Value], selection: &Selection) -> Result<(), AppError> {
        self.loaded
            .records
            .entry(api.resource_name().to_string())
            .or_insert_with(|| JsonValue::from_text("[]"));
        let mut queue = VecDeque::from([LoadRequest {
            api: Arc::clone(api),
            ids: ids.to_vec(),
            selection: selection.clone(),
        }]);
        while let Some(request) = queue.pop_front() {
            let mut seen = HashSet::new();
            let ids: Vec<Value> = request
                .ids
                .into_iter()
                .filter(|id| !id.is_null() && seen.insert(id_key(id)))
                .collect();
            for chunk in ids.chunks(self.settings.max_load_ids.max(1)) {
                let more = self.load_batch(&request.api, chunk, &request.selection).await?;
                queue.extend(more);
            }
        }
        Ok(())
    }

    async fn load_batch(&mut self, api: &Arc<Api>, ids: &[Value], selection: &Selection) -> Result<Vec<LoadRequest>, AppError> {
        let plan = api.plan(selection)?;
        let driver = api.driver()?;
        if let Some(shape) = api.push_down_shape(&plan) {
            let (json, missing) = JsonProjector::new(self.store.as_ref())
                .to_json_with_missing_ids(&driver, &shape, ids)
                .await?;
            self.collect(api, json, missing);
            return Ok(Vec::new());
        }

        let model = api.model()?;
        let mut select = vec![format!("{} AS {}", model.pk_sql(), quoted(PK_ALIAS))];
        select.extend(api.select_list(&plan));
        let q = driver
            .where_ids(ids)
            .order(&model.pk_sql(), SortDirection::Asc)
            .to_query(&select);
        let rows = self.store.fetch_rows(&q).await?;
        let found: Vec<Value> = rows.iter().filter_map(|row| row.get(PK_ALIAS).cloned()).collect();
        let missing = missing_ids(ids, &found);
        if !missing.is_empty() {
            tracing::warn!(api = %api.full_name(), missing = ?missing, "requested ids not found");
        }
        let (rendered, requests) = self.render_rows(api, rows, selection, &plan)?;
        self.collect(api, JsonValue::from_value(Value::Array(rendered)), missing);
        Ok(requests)
    }

    /// Per-record evaluation. Macro requests for the same macro are merged into one batch.
    fn render_rows(
        &self,
        api: &Api,
        rows: Vec<Map<String, Value>>,
        selection: &Selection,
        plan: &LoadPlan,
    ) -> Result<(Vec<Value>, Vec<LoadRequest>), AppError> {
        let mut rendered = Vec::with_capacity(rows.len());
        let mut batches: IndexMap<String, LoadRequest> = IndexMap::new();
        for mut row in rows {
            row.remove(PK_ALIAS);
            let resource = Resource::new(api, Record::new(row), selection, plan, Some(self.registry.as_ref()));
            rendered.push(resource.render()?);
            for name in &plan.macros {
                let Some(request) = resource.invoke_macro(name)? else { continue };
                match batches.get_mut(name) {
                    Some(batch) => batch.ids.extend(request.ids),
                    None => {
                        batches.insert(name.clone(), request);
                    }
                }
            }
        }
        Ok((
            rendered,
            batches.into_values().filter(|r| !r.ids.is_empty()).collect(),
        ))
    }

    fn collect(&mut self, api: &Api, json: JsonValue, missing: Vec<Value>) {
        let key = api.resource_name().to_string();
        let merged = match self.loaded.records.get(&key) {
            Some(existing) => existing.merge(&json),
            None => json,
        };
        self.loaded.records.insert(key.clone(), merged);
        if !missing.is_empty() {
            self.loaded.missing.entry(key).or_default().extend(missing);
        }
    }

    /// Scope, search, sort and window the descriptor's driver, then load the matching records.
    /// Returns the ids in query order; loaded arrays are ordered by id.
    pub async fn index(&mut self, api: &Arc<Api>, query: &IndexQuery) -> Result<Vec<Value>, AppError> {
        let mut driver = api.apply_scopes(api.driver()?, &query.scopes)?;
        if let Some(term) = query.search.as_deref().filter(|t| !t.trim().is_empty()) {
            driver = api.apply_search(driver, term)?;
        }
        if let Some(sort) = query.sort.as_deref() {
            driver = api.apply_sort(driver, sort)?;
        }
        if let Some(n) = query.limit {
            driver = driver.limit(n);
        }
        if let Some(n) = query.offset {
            driver = driver.offset(n);
        }
        let ids: Vec<Value> = if driver.is_none() {
            Vec::new()
        } else {
            self.store
                .fetch_rows(&driver.ids_query())
                .await?
                .into_iter()
                .filter_map(|mut row| row.remove("id"))
                .collect()
        };
        self.load_records(api, &ids, &query.selection).await?;
        Ok(ids)
    }

    /// Run `action`: a member action against the record `id`, a collection action when `id` is `None`.
    pub async fn perform(&self, api: &Api, action: &str, id: Option<&Value>) -> Result<ActionOutcome, AppError> {
        let mut ctx = ActionContext::new(api, self.store.as_ref(), self.params.clone(), self.caller.clone());
        match id {
            Some(id) => {
                let handler = api.member_action(action).ok_or_else(|| {
                    AppError::NotFound(format!("member action '{}' on {}", action, api.full_name()))
                })?;
                let mut entity = self.find_entity(api, id).await?;
                handler.call(&mut ctx, Some(&mut entity)).await?;
            }
            None => {
                let handler = api.collection_action(action).ok_or_else(|| {
                    AppError::NotFound(format!("collection action '{}' on {}", action, api.full_name()))
                })?;
                handler.call(&mut ctx, None).await?;
            }
        }
        tracing::debug!(api = %api.full_name(), action, halted = ctx.is_halted(), "action performed");
        Ok(ctx.into_outcome())
    }

    async fn find_entity(&self, api: &Api, id: &Value) -> Result<Entity, AppError> {
        let model = api.model()?;
        let q = api
            .driver()?
            .where_ids(std::slice::from_ref(id))
            .to_query(&[select_column_list(model)]);
        let row = self
            .store
            .fetch_rows(&q)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("{} {}", model.name, id)))?;
        Ok(Entity::from_row(Arc::clone(model), row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{action_fn, ApiBuilder, Hook};
    use crate::record::FieldAccess;
    use crate::testing::{fixtures, RecordingStore};
    use serde_json::json;
    use std::sync::Mutex;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    fn controller(registry: ApiRegistry, store: Arc<RecordingStore>, params: Value) -> Controller {
        Controller::new(Arc::new(registry), store, Arc::new(Settings::default()), params, Some("tester".into()))
    }

    fn catalog() -> ApiRegistry {
        let mut products = ApiBuilder::new("Catalog::ProductsApi");
        products.model(fixtures::products());
        let mut variants = ApiBuilder::new("VariantsApi");
        variants.model(fixtures::variants());
        ApiRegistry::builder().register(products).register(variants).build().unwrap()
    }

    fn articles_registry(observed: Arc<Mutex<Vec<String>>>, halt: bool) -> ApiRegistry {
        let mut b = ApiBuilder::new("ArticlesApi");
        b.model(fixtures::articles());
        b.permit_params(["title", "body"]);
        b.crud_actions(&["create", "update", "destroy"]);
        let before = Arc::clone(&observed);
        b.before_create(Hook::block(move |ctx, _entity| {
            before.lock().unwrap().push("before_create".into());
            if halt {
                ctx.halt();
            }
        }));
        let after = Arc::clone(&observed);
        b.after_create(Hook::block(move |_ctx, entity| {
            let id = entity.id().map(|v| v.to_string()).unwrap_or_default();
            after.lock().unwrap().push(format!("after_create:{}:{}", entity.is_persisted(), id));
        }));
        ApiRegistry::builder().register(b).build().unwrap()
    }

    #[tokio::test]
    async fn create_saves_permitted_params_and_renders_the_id() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(RecordingStore::new());
        store.push_returning(Some(map(json!({ "id": 5, "title": "Hi", "body": null, "product_id": null }))));
        let c = controller(
            articles_registry(Arc::clone(&observed), false),
            Arc::clone(&store),
            json!({ "title": "Hi", "admin": true }),
        );
        let api = c.registry().strict_resolve("articles").unwrap();
        let outcome = c.perform(&api, "create", None).await.unwrap();
        assert_eq!(outcome.response, Some(json!({ "id": 5 })));
        assert!(!outcome.halted);
        assert_eq!(*observed.lock().unwrap(), ["before_create", "after_create:true:5"]);
        let executed = store.executed();
        assert_eq!(executed.len(), 1);
        assert!(!executed[0].sql.contains("admin"));
    }

    #[tokio::test]
    async fn halting_before_create_skips_save_render_and_after_hook() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(RecordingStore::new());
        let c = controller(
            articles_registry(Arc::clone(&observed), true),
            Arc::clone(&store),
            json!({ "title": "Hi" }),
        );
        let api = c.registry().strict_resolve("articles").unwrap();
        let outcome = c.perform(&api, "create", None).await.unwrap();
        assert!(outcome.halted);
        assert_eq!(outcome.response, None);
        assert!(store.executed().is_empty());
        assert_eq!(*observed.lock().unwrap(), ["before_create"]);
    }

    #[tokio::test]
    async fn failed_saves_render_field_errors_and_still_run_after_hooks() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(RecordingStore::new());
        let c = controller(articles_registry(Arc::clone(&observed), false), Arc::clone(&store), json!({}));
        let api = c.registry().strict_resolve("articles").unwrap();
        let outcome = c.perform(&api, "create", None).await.unwrap();
        assert_eq!(outcome.errors, Some(json!({ "title": ["is required"] })));
        assert_eq!(outcome.response, None);
        assert_eq!(*observed.lock().unwrap(), ["before_create", "after_create:false:"]);
    }

    #[tokio::test]
    async fn member_actions_load_the_entity_first() {
        let store = Arc::new(RecordingStore::new());
        store.push_rows(vec![json!({ "id": 3, "title": "Old", "body": null, "product_id": null })]);
        store.push_returning(Some(map(json!({ "id": 3, "title": "New", "body": null, "product_id": null }))));
        let c = controller(
            articles_registry(Arc::new(Mutex::new(Vec::new())), false),
            Arc::clone(&store),
            json!({ "title": "New" }),
        );
        let api = c.registry().strict_resolve("articles").unwrap();
        let outcome = c.perform(&api, "update", Some(&json!(3))).await.unwrap();
        assert_eq!(outcome.response, Some(json!({ "id": 3 })));
        let executed = store.executed();
        assert!(executed[0].sql.starts_with("SELECT"));
        assert!(executed[1].sql.starts_with("UPDATE"));

        let missing = c.perform(&api, "update", Some(&json!(4))).await.unwrap_err();
        assert!(matches!(missing, AppError::NotFound(_)));
        let unknown = c.perform(&api, "archive", None).await.unwrap_err();
        assert!(matches!(unknown, AppError::NotFound(_)));
    }

    fn lifecycle_registry(observed: Arc<Mutex<Vec<String>>>, halt: bool) -> ApiRegistry {
        let mut b = ApiBuilder::new("ArticlesApi");
        b.model(fixtures::articles());
        b.permit_params(["title"]);
        b.crud_actions(&["update", "destroy"]);
        let seen = Arc::clone(&observed);
        b.before_update(Hook::block(move |ctx, _entity| {
            seen.lock().unwrap().push("before_update".into());
            if halt {
                ctx.halt();
            }
        }));
        let seen = Arc::clone(&observed);
        b.after_update(Hook::block(move |_ctx, _entity| {
            seen.lock().unwrap().push("after_update".into());
        }));
        let seen = Arc::clone(&observed);
        b.before_destroy(Hook::block(move |ctx, _entity| {
            seen.lock().unwrap().push("before_destroy".into());
            if halt {
                ctx.halt();
            }
        }));
        let seen = Arc::clone(&observed);
        b.after_destroy(Hook::block(move |_ctx, entity| {
            seen.lock().unwrap().push(format!("after_destroy:{}", entity.is_destroyed()));
        }));
        ApiRegistry::builder().register(b).build().unwrap()
    }

    #[tokio::test]
    async fn halting_before_update_skips_the_update() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(RecordingStore::new());
        store.push_rows(vec![json!({ "id": 3, "title": "Old", "body": null, "product_id": null })]);
        let c = controller(
            lifecycle_registry(Arc::clone(&observed), true),
            Arc::clone(&store),
            json!({ "title": "New" }),
        );
        let api = c.registry().strict_resolve("articles").unwrap();
        let outcome = c.perform(&api, "update", Some(&json!(3))).await.unwrap();
        assert!(outcome.halted);
        assert_eq!(outcome.response, None);
        let executed = store.executed();
        assert_eq!(executed.len(), 1);
        assert!(executed[0].sql.starts_with("SELECT"));
        assert_eq!(*observed.lock().unwrap(), ["before_update"]);
    }

    #[tokio::test]
    async fn halting_before_destroy_keeps_the_record() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(RecordingStore::new());
        store.push_rows(vec![json!({ "id": 3, "title": "Old", "body": null, "product_id": null })]);
        let c = controller(lifecycle_registry(Arc::clone(&observed), true), Arc::clone(&store), json!({}));
        let api = c.registry().strict_resolve("articles").unwrap();
        let outcome = c.perform(&api, "destroy", Some(&json!(3))).await.unwrap();
        assert!(outcome.halted);
        let executed = store.executed();
        assert_eq!(executed.len(), 1);
        assert!(!executed.iter().any(|q| q.sql.starts_with("DELETE")));
        assert_eq!(*observed.lock().unwrap(), ["before_destroy"]);
    }

    #[tokio::test]
    async fn destroy_deletes_and_runs_after_destroy() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(RecordingStore::new());
        store.push_rows(vec![json!({ "id": 3, "title": "Old", "body": null, "product_id": null })]);
        store.push_returning(Some(map(json!({ "id": 3, "title": "Old", "body": null, "product_id": null }))));
        let c = controller(lifecycle_registry(Arc::clone(&observed), false), Arc::clone(&store), json!({}));
        let api = c.registry().strict_resolve("articles").unwrap();
        let outcome = c.perform(&api, "destroy", Some(&json!(3))).await.unwrap();
        assert!(!outcome.halted);
        assert_eq!(outcome.errors, None);
        let executed = store.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[1].sql.starts_with("DELETE FROM \"public\".\"articles\""));
        assert_eq!(executed[1].params, vec![json!(3)]);
        assert_eq!(*observed.lock().unwrap(), ["before_destroy", "after_destroy:true"]);
    }

    #[tokio::test]
    async fn custom_actions_render_and_error() {
        let mut b = ApiBuilder::new("ArticlesApi");
        b.model(fixtures::articles());
        b.collection(|b| {
            b.action(
                "ping",
                action_fn(|ctx, _| {
                    let who = ctx.caller().unwrap_or("nobody").to_string();
                    ctx.render(json!({ "pong": who }));
                    Ok(())
                }),
            );
        });
        b.action(
            "title",
            action_fn(|ctx, entity| {
                match entity.and_then(|e| e.field("title").cloned()) {
                    Some(title) => ctx.render(title),
                    None => ctx.error(json!("no title")),
                }
                Ok(())
            }),
        );
        let store = Arc::new(RecordingStore::new());
        store.push_rows(vec![json!({ "id": 1, "title": null })]);
        let c = controller(ApiRegistry::builder().register(b).build().unwrap(), Arc::clone(&store), json!({}));
        let api = c.registry().strict_resolve("articles").unwrap();
        let pong = c.perform(&api, "ping", None).await.unwrap();
        assert_eq!(pong.response, Some(json!({ "pong": "tester" })));
        let title = c.perform(&api, "title", Some(&json!(1))).await.unwrap();
        assert_eq!(title.response, Some(Value::Null));
    }

    #[tokio::test]
    async fn flat_selections_are_aggregated_by_the_store() {
        let store = Arc::new(RecordingStore::new());
        store.push_aggregate(r#"[{"id":1,"name":"Lamp"},{"id":3,"name":"Desk"}]"#, Some("[1,3]"));
        let mut c = controller(catalog(), Arc::clone(&store), json!({}));
        let api = c.registry().resolve("product", &["Catalog".to_string()]).unwrap();
        c.load_records(&api, &[json!(1), json!(2), json!(3)], &Selection::fields(["id", "name"]))
            .await
            .unwrap();
        assert_eq!(c.records()["products"].len(), 2);
        assert_eq!(c.missing()["products"], vec![json!(2)]);
        assert_eq!(store.executed().len(), 1);
    }

    #[tokio::test]
    async fn macros_trigger_batched_nested_loads() {
        let store = Arc::new(RecordingStore::new());
        store.push_rows(vec![
            json!({ "__pk": 1, "name": "Lamp", "variant_ids": [10, 11] }),
            json!({ "__pk": 2, "name": "Desk", "variant_ids": [12] }),
        ]);
        store.push_aggregate(r#"[{"name":"a"},{"name":"b"}]"#, Some("[10,11]"));
        let mut c = controller(catalog(), Arc::clone(&store), json!({}));
        let api = c.registry().resolve("products", &["Catalog".to_string()]).unwrap();
        let selection = Selection::from_json(&json!(["name", "variant_count", { "variants": ["name"] }])).unwrap();
        c.load_records(&api, &[json!(1), json!(2)], &selection).await.unwrap();

        let products = c.records()["products"].parsed().cloned().unwrap();
        assert_eq!(
            products,
            json!([{ "name": "Lamp", "variant_count": 2 }, { "name": "Desk", "variant_count": 1 }])
        );
        assert_eq!(c.records()["variants"].len(), 2);
        assert_eq!(c.missing()["variants"], vec![json!(12)]);

        let executed = store.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[0].sql.contains("AS \"variant_ids\""));
        assert!(!executed[0].sql.contains("COUNT(*)"));
        assert_eq!(executed[1].params, vec![json!(10), json!(11), json!(12)]);
    }

    #[tokio::test]
    async fn index_applies_query_options_before_loading() {
        let store = Arc::new(RecordingStore::new());
        store.push_rows(vec![json!({ "id": 3 }), json!({ "id": 1 })]);
        store.push_aggregate(r#"[{"id":1},{"id":3}]"#, Some("[1,3]"));
        let mut c = controller(catalog(), Arc::clone(&store), json!({}));
        let api = c.registry().strict_resolve("catalog::products").unwrap();
        let query: IndexQuery = serde_json::from_value(json!({
            "scopes": ["all"],
            "search": "",
            "sort": "name desc",
            "limit": 2,
            "selection": ["id"]
        }))
        .unwrap();
        let ids = c.index(&api, &query).await.unwrap();
        assert_eq!(ids, vec![json!(3), json!(1)]);
        let first = &store.executed()[0].sql;
        assert!(first.contains("ORDER BY \"products\".\"name\" DESC LIMIT 2"));
        assert!(c.into_loaded().pretty(&Settings::default()).contains("\"products\""));
    }
}

use crate::api::action::{ActionHandler, Context};
use crate::api::associations::AssociationOptions;
use crate::api::attribute::{Attribute, AttributeOptions, ComputeFn};
use crate::api::crud::{parse_crud_actions, CrudAction, CrudCallback, CrudCallbacks, Hook, HookFn, Method};
use crate::api::meta::{MetaGraph, MetaOptions};
use crate::api::scope::{scope, ScopeFn};
use crate::api::{Api, MacroFn};
use crate::config::{validate_model, AssociationKind, ColumnKind, Model};
use crate::error::{AppError, DefinitionError};
use crate::inflect::{normalize, API_SUFFIX};
use crate::resource::{LoadRequest, Resource};
use crate::sql::{enum_case, select_column};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::{Arc, RwLock};

enum DefaultScope {
    Named(String),
    Block(String, ScopeFn),
}

/// A descriptor under construction. Declaration errors are collected and reported by [`ApiBuilder::seal`].
pub struct ApiBuilder {
    path: Vec<String>,
    is_abstract: bool,
    pub(crate) model: Option<Arc<Model>>,
    resource_name: Option<String>,
    attributes: IndexMap<String, Attribute>,
    meta: MetaGraph,
    macros: IndexMap<String, MacroFn>,
    scopes: IndexMap<String, ScopeFn>,
    default_scopes: Vec<DefaultScope>,
    member_actions: IndexMap<String, Arc<dyn ActionHandler>>,
    collection_actions: IndexMap<String, Arc<dyn ActionHandler>>,
    context: Context,
    permitted_params: Vec<String>,
    searchable: Vec<String>,
    hooks: Vec<(CrudCallback, Hook)>,
    methods: IndexMap<String, Method>,
    errors: Vec<DefinitionError>,
}

impl ApiBuilder {
    /// `path` is the full descriptor name, e.g. `Catalog::ProductsApi`.
    pub fn new(path: &str) -> Self {
        ApiBuilder {
            path: path.split("::").filter(|s| !s.is_empty()).map(str::to_string).collect(),
            is_abstract: false,
            model: None,
            resource_name: None,
            attributes: IndexMap::new(),
            meta: MetaGraph::default(),
            macros: IndexMap::new(),
            scopes: IndexMap::new(),
            default_scopes: Vec::new(),
            member_actions: IndexMap::new(),
            collection_actions: IndexMap::new(),
            context: Context::default(),
            permitted_params: Vec::new(),
            searchable: Vec::new(),
            hooks: Vec::new(),
            methods: IndexMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn full_name(&self) -> String {
        self.path.join("::")
    }

    pub(crate) fn record_error(&mut self, error: DefinitionError) {
        tracing::debug!(api = %self.full_name(), error = %error, "declaration error");
        self.errors.push(error);
    }

    /// Not servable: no driver, and resolving a name to it fails.
    pub fn mark_abstract(&mut self) -> &mut Self {
        self.is_abstract = true;
        self
    }

    /// Attach the backing model: one attribute per column, one association macro per
    /// association, and an identity `all` scope.
    pub fn model(&mut self, model: Model) -> &mut Self {
        if let Err(e) = validate_model(&model) {
            self.record_error(e);
            return self;
        }
        let model = Arc::new(model);
        self.model = Some(Arc::clone(&model));
        for column in &model.columns {
            let sql = match &column.kind {
                ColumnKind::Enum(values) => enum_case(&model.column_sql(&column.name), values),
                _ => select_column(&model, &column.name),
            };
            let mut options = AttributeOptions::new().sql(sql);
            if column.kind.is_structured() {
                options = options.sortable(false);
            }
            self.attribute_with(&column.name, options, None);
        }
        for association in &model.associations {
            let options = AssociationOptions::default();
            match association.kind {
                AssociationKind::HasMany => self.has_many(&association.name, options),
                AssociationKind::HasOne => self.has_one(&association.name, options),
                AssociationKind::BelongsTo => self.belongs_to(&association.name, options),
            };
        }
        self.scope("all", scope(|driver| driver))
    }

    pub fn resource_name(&mut self, name: &str) -> &mut Self {
        self.resource_name = Some(name.to_string());
        self
    }

    /// Plain attribute read off the record.
    pub fn attribute(&mut self, name: &str) -> &mut Self {
        self.attribute_with(name, AttributeOptions::new(), None)
    }

    /// Declare or merge an attribute. Redeclaring merges options and meta; it never errors.
    pub fn attribute_with(&mut self, name: &str, options: AttributeOptions, compute: Option<ComputeFn>) -> &mut Self {
        self.attributes
            .entry(name.to_string())
            .or_insert_with(|| Attribute::new(name))
            .merge(&options, compute);
        self.meta.declare(name, options.meta);
        self
    }

    pub fn computed<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&Resource<'_>) -> Result<Value, AppError> + Send + Sync + 'static,
    {
        self.attribute_with(name, AttributeOptions::new(), Some(Arc::new(f)))
    }

    pub fn meta(&mut self, name: &str, options: MetaOptions) -> &mut Self {
        self.meta.declare(name, options);
        self
    }

    /// Meta options given as JSON, e.g. `{"children": "author_id", "sql": "..."}`.
    pub fn meta_json(&mut self, name: &str, options: &Value) -> &mut Self {
        match MetaOptions::from_json(name, options) {
            Ok(options) => self.meta(name, options),
            Err(e) => {
                self.record_error(e);
                self
            }
        }
    }

    pub fn macro_fn<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&Resource<'_>) -> Result<Option<LoadRequest>, AppError> + Send + Sync + 'static,
    {
        self.macros.insert(name.to_string(), Arc::new(f));
        self
    }

    pub(crate) fn insert_macro(&mut self, name: &str, f: MacroFn) {
        self.macros.insert(name.to_string(), f);
    }

    pub fn scope(&mut self, name: &str, f: ScopeFn) -> &mut Self {
        self.scopes.insert(name.to_string(), f);
        self
    }

    /// Name only: apply an existing named scope by default. Block only: an anonymous default.
    /// Both: declare the named scope and apply it by default.
    pub fn default_scope(&mut self, name: Option<&str>, block: Option<ScopeFn>) -> &mut Self {
        match (name, block) {
            (None, None) => self.record_error(DefinitionError::EmptyDefaultScope),
            (Some(name), Some(f)) => {
                self.scope(name, f);
                self.default_scopes.push(DefaultScope::Named(name.to_string()));
            }
            (Some(name), None) => self.default_scopes.push(DefaultScope::Named(name.to_string())),
            (None, Some(f)) => {
                let key = format!("default_scope_{}", self.default_scopes.len());
                self.default_scopes.push(DefaultScope::Block(key, f));
            }
        }
        self
    }

    /// Declarations inside `f` register collection actions. The previous context is restored afterwards.
    pub fn collection<F: FnOnce(&mut Self)>(&mut self, f: F) -> &mut Self {
        self.within(Context::Collection, f)
    }

    pub fn member<F: FnOnce(&mut Self)>(&mut self, f: F) -> &mut Self {
        self.within(Context::Member, f)
    }

    fn within<F: FnOnce(&mut Self)>(&mut self, context: Context, f: F) -> &mut Self {
        let previous = std::mem::replace(&mut self.context, context);
        f(self);
        self.context = previous;
        self
    }

    pub fn action(&mut self, name: &str, handler: Arc<dyn ActionHandler>) -> &mut Self {
        let table = match self.context {
            Context::Member => &mut self.member_actions,
            Context::Collection => &mut self.collection_actions,
        };
        table.insert(name.to_string(), handler);
        self
    }

    /// Enable standard actions: `create` on the collection, `update` and `destroy` on members.
    pub fn crud_actions(&mut self, names: &[&str]) -> &mut Self {
        match parse_crud_actions(names) {
            Ok(actions) => {
                for action in actions {
                    let table = match action {
                        CrudAction::Create => &mut self.collection_actions,
                        CrudAction::Update | CrudAction::Destroy => &mut self.member_actions,
                    };
                    table.insert(action.name().to_string(), action.handler());
                }
            }
            Err(e) => self.record_error(e),
        }
        self
    }

    /// Set a lifecycle callback by name, from a method name or a block.
    pub fn crud_callback(&mut self, callback: &str, method: Option<&str>, block: Option<HookFn>) -> &mut Self {
        let parsed = callback
            .parse::<CrudCallback>()
            .and_then(|cb| Hook::from_parts(callback, method, block).map(|hook| (cb, hook)));
        match parsed {
            Ok((cb, hook)) => self.set_hook(cb, hook),
            Err(e) => {
                self.record_error(e);
                self
            }
        }
    }

    fn set_hook(&mut self, callback: CrudCallback, hook: Hook) -> &mut Self {
        self.hooks.retain(|(cb, _)| *cb != callback);
        self.hooks.push((callback, hook));
        self
    }

    pub fn before_create(&mut self, hook: Hook) -> &mut Self {
        self.set_hook(CrudCallback::BeforeCreate, hook)
    }

    pub fn after_create(&mut self, hook: Hook) -> &mut Self {
        self.set_hook(CrudCallback::AfterCreate, hook)
    }

    pub fn before_update(&mut self, hook: Hook) -> &mut Self {
        self.set_hook(CrudCallback::BeforeUpdate, hook)
    }

    pub fn after_update(&mut self, hook: Hook) -> &mut Self {
        self.set_hook(CrudCallback::AfterUpdate, hook)
    }

    pub fn before_destroy(&mut self, hook: Hook) -> &mut Self {
        self.set_hook(CrudCallback::BeforeDestroy, hook)
    }

    pub fn after_destroy(&mut self, hook: Hook) -> &mut Self {
        self.set_hook(CrudCallback::AfterDestroy, hook)
    }

    /// Named helper hooks can refer to.
    pub fn method(&mut self, name: &str, method: Method) -> &mut Self {
        self.methods.insert(name.to_string(), method);
        self
    }

    pub fn permit_params<I, S>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            let key = key.into();
            if !self.permitted_params.contains(&key) {
                self.permitted_params.push(key);
            }
        }
        self
    }

    pub fn searchable<I, S>(&mut self, attributes: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.searchable.extend(attributes.into_iter().map(Into::into));
        self
    }

    /// Freeze the declarations. The first recorded declaration error wins.
    pub fn seal(self) -> Result<Api, DefinitionError> {
        let full_name = self.full_name();
        if let Some(e) = self.errors.into_iter().next() {
            return Err(e);
        }
        if !self.is_abstract && self.model.is_none() {
            return Err(DefinitionError::MissingModel(full_name));
        }

        let mut default_scopes = Vec::with_capacity(self.default_scopes.len());
        for declared in self.default_scopes {
            match declared {
                DefaultScope::Named(name) => {
                    let f = self
                        .scopes
                        .get(&name)
                        .cloned()
                        .ok_or_else(|| DefinitionError::UnknownDefaultScope(name.clone()))?;
                    default_scopes.push((name, f));
                }
                DefaultScope::Block(key, f) => default_scopes.push((key, f)),
            }
        }

        let mut crud_callbacks = CrudCallbacks::default();
        for (callback, hook) in self.hooks {
            crud_callbacks.set(callback, hook.resolve(&self.methods)?);
        }

        for name in &self.searchable {
            if self.meta.sql(name).is_none() {
                return Err(DefinitionError::InvalidMetaOptions {
                    name: name.clone(),
                    message: "searchable attributes need a native expression".into(),
                });
            }
        }

        let resource_name = match (self.resource_name, &self.model) {
            (Some(name), _) => name,
            (None, Some(model)) => normalize(&model.table),
            (None, None) => {
                let name = self.path.last().map(String::as_str).unwrap_or_default();
                normalize(name.strip_suffix(API_SUFFIX).unwrap_or(name))
            }
        };

        tracing::debug!(
            api = %full_name,
            attributes = self.attributes.len(),
            macros = self.macros.len(),
            "descriptor sealed"
        );
        Ok(Api {
            path: self.path,
            is_abstract: self.is_abstract,
            model: self.model,
            resource_name,
            attributes: self.attributes,
            meta: self.meta,
            macros: self.macros,
            scopes: self.scopes,
            default_scopes,
            member_actions: self.member_actions,
            collection_actions: self.collection_actions,
            permitted_params: self.permitted_params,
            searchable: self.searchable,
            crud_callbacks,
            driver_cache: RwLock::new(None),
        })
    }
}

//! Standard create/update/destroy actions and their six lifecycle callbacks.
//!
//! A `before_*` callback may halt; a halted action stops right there: no save or destroy,
//! no render, and no `after_*` callback. On the non-halted path the `after_*` callback runs
//! once the save or destroy was attempted, whether or not it succeeded.

use crate::api::{ActionContext, ActionHandler};
use crate::error::{AppError, DefinitionError};
use crate::record::Entity;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CrudCallback {
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDestroy,
    AfterDestroy,
}

impl CrudCallback {
    pub const ALL: [CrudCallback; 6] = [
        CrudCallback::BeforeCreate,
        CrudCallback::AfterCreate,
        CrudCallback::BeforeUpdate,
        CrudCallback::AfterUpdate,
        CrudCallback::BeforeDestroy,
        CrudCallback::AfterDestroy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CrudCallback::BeforeCreate => "before_create",
            CrudCallback::AfterCreate => "after_create",
            CrudCallback::BeforeUpdate => "before_update",
            CrudCallback::AfterUpdate => "after_update",
            CrudCallback::BeforeDestroy => "before_destroy",
            CrudCallback::AfterDestroy => "after_destroy",
        }
    }
}

impl FromStr for CrudCallback {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CrudCallback::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| DefinitionError::UnknownCallback(s.to_string()))
    }
}

impl fmt::Display for CrudCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type HookFn = Arc<dyn Fn(&mut ActionContext<'_>, &mut Entity) + Send + Sync>;
pub type NullaryMethod = Arc<dyn Fn(&mut ActionContext<'_>) + Send + Sync>;
pub type BinaryMethod = Arc<dyn Fn(&mut ActionContext<'_>, &mut Entity, &Map<String, Value>) + Send + Sync>;

/// A named helper on a descriptor. Hooks given by name dispatch on its arity.
#[derive(Clone)]
pub enum Method {
    Nullary(NullaryMethod),
    Unary(HookFn),
    /// Takes the entity and the permitted params; too many inputs for a hook.
    Binary(BinaryMethod),
}

impl Method {
    pub fn arity(&self) -> usize {
        match self {
            Method::Nullary(_) => 0,
            Method::Unary(_) => 1,
            Method::Binary(_) => 2,
        }
    }
}

#[derive(Clone)]
pub enum Hook {
    Block(HookFn),
    Method(String),
}

impl Hook {
    pub fn block<F>(f: F) -> Self
    where
        F: Fn(&mut ActionContext<'_>, &mut Entity) + Send + Sync + 'static,
    {
        Hook::Block(Arc::new(f))
    }

    pub fn method(name: impl Into<String>) -> Self {
        Hook::Method(name.into())
    }

    /// Name-or-block form. A block wins when both are given.
    pub fn from_parts(callback: &str, name: Option<&str>, block: Option<HookFn>) -> Result<Self, DefinitionError> {
        match (name, block) {
            (_, Some(block)) => Ok(Hook::Block(block)),
            (Some(name), None) => Ok(Hook::Method(name.to_string())),
            (None, None) => Err(DefinitionError::EmptyHook(callback.to_string())),
        }
    }

    pub(crate) fn resolve(self, methods: &IndexMap<String, Method>) -> Result<HookFn, DefinitionError> {
        let name = match self {
            Hook::Block(f) => return Ok(f),
            Hook::Method(name) => name,
        };
        match methods.get(&name) {
            Some(Method::Nullary(f)) => {
                let f = Arc::clone(f);
                Ok(Arc::new(move |ctx: &mut ActionContext<'_>, _: &mut Entity| f(ctx)))
            }
            Some(Method::Unary(f)) => Ok(Arc::clone(f)),
            Some(Method::Binary(_)) => Err(DefinitionError::HookArity(name)),
            None => Err(DefinitionError::UnknownMethod(name)),
        }
    }
}

/// The six callback slots; unset slots are no-ops.
#[derive(Clone, Default)]
pub struct CrudCallbacks {
    slots: HashMap<CrudCallback, HookFn>,
}

impl CrudCallbacks {
    pub(crate) fn set(&mut self, callback: CrudCallback, f: HookFn) {
        self.slots.insert(callback, f);
    }

    pub fn is_set(&self, callback: CrudCallback) -> bool {
        self.slots.contains_key(&callback)
    }

    pub fn run(&self, callback: CrudCallback, ctx: &mut ActionContext<'_>, entity: &mut Entity) {
        if let Some(f) = self.slots.get(&callback) {
            f(ctx, entity);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrudAction {
    Create,
    Update,
    Destroy,
}

impl CrudAction {
    pub fn name(&self) -> &'static str {
        match self {
            CrudAction::Create => "create",
            CrudAction::Update => "update",
            CrudAction::Destroy => "destroy",
        }
    }

    pub(crate) fn handler(&self) -> Arc<dyn ActionHandler> {
        match self {
            CrudAction::Create => Arc::new(CreateAction),
            CrudAction::Update => Arc::new(UpdateAction),
            CrudAction::Destroy => Arc::new(DestroyAction),
        }
    }
}

/// Parse requested CRUD action names; every unknown name is reported together.
pub fn parse_crud_actions(names: &[&str]) -> Result<Vec<CrudAction>, DefinitionError> {
    let mut out = Vec::new();
    let mut unknown = Vec::new();
    for name in names {
        match *name {
            "create" => out.push(CrudAction::Create),
            "update" => out.push(CrudAction::Update),
            "destroy" => out.push(CrudAction::Destroy),
            other => unknown.push(other),
        }
    }
    if !unknown.is_empty() {
        return Err(DefinitionError::UnknownCrudActions(unknown.join(", ")));
    }
    Ok(out)
}

fn halted(ctx: &ActionContext<'_>, action: &str) -> bool {
    if ctx.is_halted() {
        tracing::warn!(api = %ctx.api().full_name(), action, "action halted by callback");
        return true;
    }
    false
}

/// Save, then render `{ id }` or the field errors.
async fn save_and_render(ctx: &mut ActionContext<'_>, entity: &mut Entity) -> Result<(), AppError> {
    if entity.save(ctx.store()).await? {
        ctx.render(json!({ "id": entity.id() }));
    } else {
        ctx.error(entity.errors_json());
    }
    Ok(())
}

struct CreateAction;

#[async_trait]
impl ActionHandler for CreateAction {
    async fn call(&self, ctx: &mut ActionContext<'_>, _entity: Option<&mut Entity>) -> Result<(), AppError> {
        let api = ctx.api();
        let mut entity = Entity::new(api.model()?.clone(), ctx.resource_params());
        api.crud_callbacks().run(CrudCallback::BeforeCreate, ctx, &mut entity);
        if halted(ctx, "create") {
            return Ok(());
        }
        save_and_render(ctx, &mut entity).await?;
        api.crud_callbacks().run(CrudCallback::AfterCreate, ctx, &mut entity);
        Ok(())
    }
}

struct UpdateAction;

#[async_trait]
impl ActionHandler for UpdateAction {
    async fn call(&self, ctx: &mut ActionContext<'_>, entity: Option<&mut Entity>) -> Result<(), AppError> {
        let api = ctx.api();
        let entity = entity.ok_or_else(|| AppError::BadRequest("update requires a record".into()))?;
        entity.assign_attributes(ctx.resource_params());
        api.crud_callbacks().run(CrudCallback::BeforeUpdate, ctx, entity);
        if halted(ctx, "update") {
            return Ok(());
        }
        save_and_render(ctx, entity).await?;
        api.crud_callbacks().run(CrudCallback::AfterUpdate, ctx, entity);
        Ok(())
    }
}

struct DestroyAction;

#[async_trait]
impl ActionHandler for DestroyAction {
    async fn call(&self, ctx: &mut ActionContext<'_>, entity: Option<&mut Entity>) -> Result<(), AppError> {
        let api = ctx.api();
        let entity = entity.ok_or_else(|| AppError::BadRequest("destroy requires a record".into()))?;
        api.crud_callbacks().run(CrudCallback::BeforeDestroy, ctx, entity);
        if halted(ctx, "destroy") {
            return Ok(());
        }
        entity.destroy(ctx.store()).await?;
        api.crud_callbacks().run(CrudCallback::AfterDestroy, ctx, entity);
        Ok(())
    }
}

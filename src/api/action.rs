//! Actions: member actions run against one loaded entity, collection actions against none.

use crate::api::Api;
use crate::error::AppError;
use crate::record::Entity;
use crate::store::Store;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Which action table subsequent declarations land in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Context {
    #[default]
    Member,
    Collection,
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// `entity` is the loaded record for member actions, `None` for collection actions.
    async fn call(&self, ctx: &mut ActionContext<'_>, entity: Option<&mut Entity>) -> Result<(), AppError>;
}

pub struct FnAction<F>(F);

#[async_trait]
impl<F> ActionHandler for FnAction<F>
where
    F: Fn(&mut ActionContext<'_>, Option<&mut Entity>) -> Result<(), AppError> + Send + Sync,
{
    async fn call(&self, ctx: &mut ActionContext<'_>, entity: Option<&mut Entity>) -> Result<(), AppError> {
        (self.0)(ctx, entity)
    }
}

/// A synchronous action body.
pub fn action_fn<F>(f: F) -> Arc<dyn ActionHandler>
where
    F: Fn(&mut ActionContext<'_>, Option<&mut Entity>) -> Result<(), AppError> + Send + Sync + 'static,
{
    Arc::new(FnAction(f))
}

/// Per-request state an action body and its hooks share.
pub struct ActionContext<'a> {
    api: &'a Api,
    store: &'a dyn Store,
    data: Value,
    caller: Option<String>,
    halted: bool,
    response: Option<Value>,
    errors: Option<Value>,
}

impl<'a> ActionContext<'a> {
    pub fn new(api: &'a Api, store: &'a dyn Store, data: Value, caller: Option<String>) -> Self {
        ActionContext {
            api,
            store,
            data,
            caller,
            halted: false,
            response: None,
            errors: None,
        }
    }

    pub fn api(&self) -> &'a Api {
        self.api
    }

    pub fn store(&self) -> &'a dyn Store {
        self.store
    }

    /// Raw request params.
    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    /// Request params filtered to the descriptor's permitted keys, in allow-list order.
    pub fn resource_params(&self) -> Map<String, Value> {
        let mut out = Map::new();
        let Some(data) = self.data.as_object() else { return out };
        for key in self.api.permitted_params() {
            if let Some(v) = data.get(key) {
                out.insert(key.clone(), v.clone());
            }
        }
        out
    }

    /// Skip the rest of the current action.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn render(&mut self, value: Value) {
        self.response = Some(value);
    }

    pub fn error(&mut self, value: Value) {
        self.errors = Some(value);
    }

    pub fn response(&self) -> Option<&Value> {
        self.response.as_ref()
    }

    pub fn errors(&self) -> Option<&Value> {
        self.errors.as_ref()
    }

    pub fn into_outcome(self) -> ActionOutcome {
        ActionOutcome {
            response: self.response,
            errors: self.errors,
            halted: self.halted,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ActionOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Value>,
    pub halted: bool,
}

//! Shared application state for all routes. The registry is sealed before serving starts.

use crate::api::ApiRegistry;
use crate::config::Settings;
use crate::controller::Controller;
use crate::store::Store;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub registry: Arc<ApiRegistry>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, registry: ApiRegistry, settings: Settings) -> Self {
        AppState {
            store,
            registry: Arc::new(registry),
            settings: Arc::new(settings),
        }
    }

    /// A fresh serving context for one request.
    pub fn controller(&self, params: Value, caller: Option<String>) -> Controller {
        Controller::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
            Arc::clone(&self.settings),
            params,
            caller,
        )
    }
}

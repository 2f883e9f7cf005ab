//! Cord SDK: declarative JSON API resources over PostgreSQL.

pub mod api;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod inflect;
pub mod json;
pub mod record;
pub mod resource;
pub mod response;
pub mod sql;
pub mod state;
pub mod store;

#[cfg(test)]
mod testing;

pub use api::{
    action_fn, scope, try_scope, ActionContext, ActionHandler, ActionOutcome, Api, ApiBuilder, ApiRegistry, AssociationOptions,
    AttributeOptions, Hook, MetaOptions, Method,
};
pub use config::{Association, AssociationKind, ColumnInfo, ColumnKind, Model, Settings, ValidationRule};
pub use controller::{Controller, IndexQuery, LoadedRecords};
pub use driver::{Driver, SortDirection};
pub use error::{AppError, DefinitionError};
pub use json::{merge, pretty_print, JsonProjector, JsonValue};
pub use record::{Entity, FieldAccess, Record};
pub use resource::{LoadRequest, Resource, Selection};
pub use response::{error_body, success_one, success_records};
pub use state::AppState;
pub use store::{PgStore, Store};

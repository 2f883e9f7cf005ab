//! Example consumer: declares a small catalog and serves it over HTTP.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Or from this directory: `cargo run`

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use cord_sdk::{
    scope, success_records, ActionContext, ActionHandler, ApiBuilder, ApiRegistry, AppError, AppState, Association,
    AssociationKind, ColumnInfo, ColumnKind, Entity, FieldAccess, Hook, IndexQuery, Model, PgStore, Settings,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

fn id_column() -> ColumnInfo {
    let mut id = ColumnInfo::new("id", ColumnKind::BigInt);
    id.has_default = true;
    id.nullable = false;
    id
}

fn products(schema: &str) -> Model {
    let status = [("draft".to_string(), json!(0)), ("live".to_string(), json!(1))]
        .into_iter()
        .collect();
    let mut model = Model::new("Product", "products")
        .column(id_column())
        .column(ColumnInfo::new("name", ColumnKind::Text))
        .column(ColumnInfo::new("status", ColumnKind::Enum(status)))
        .column(ColumnInfo::new("metadata", ColumnKind::Jsonb))
        .association(Association {
            name: "variants".into(),
            kind: AssociationKind::HasMany,
            target: "Variant".into(),
            table: "variants".into(),
            schema: None,
            foreign_key: "product_id".into(),
            target_key: "id".into(),
        });
    model.schema = schema.to_string();
    model
}

fn variants(schema: &str) -> Model {
    let mut model = Model::new("Variant", "variants")
        .column(id_column())
        .column(ColumnInfo::new("product_id", ColumnKind::BigInt))
        .column(ColumnInfo::new("sku", ColumnKind::Text))
        .association(Association {
            name: "product".into(),
            kind: AssociationKind::BelongsTo,
            target: "Product".into(),
            table: "products".into(),
            schema: None,
            foreign_key: "product_id".into(),
            target_key: "id".into(),
        });
    model.schema = schema.to_string();
    model
}

/// Member action: mark a product live and save it.
struct Publish;

#[async_trait]
impl ActionHandler for Publish {
    async fn call(&self, ctx: &mut ActionContext<'_>, entity: Option<&mut Entity>) -> Result<(), AppError> {
        let entity = entity.ok_or_else(|| AppError::BadRequest("publish requires a product".into()))?;
        entity.set_field("status", json!(1));
        if entity.save(ctx.store()).await? {
            ctx.render(json!({ "id": entity.id(), "status": "live" }));
        } else {
            ctx.error(entity.errors_json());
        }
        Ok(())
    }
}

fn registry(settings: &Settings) -> Result<ApiRegistry, cord_sdk::DefinitionError> {
    let mut products_api = ApiBuilder::new("Catalog::ProductsApi");
    products_api
        .model(products(&settings.schema))
        .scope("live", scope(|d| d.where_eq("status", json!(1))))
        .permit_params(["name", "status", "metadata"])
        .searchable(["name"])
        .crud_actions(&["create", "update", "destroy"])
        .before_destroy(Hook::block(|ctx, entity| {
            if entity.field("status") == Some(&json!(1)) {
                ctx.error(json!({ "status": ["live products cannot be deleted"] }));
                ctx.halt();
            }
        }))
        .action("publish", Arc::new(Publish));

    let mut variants_api = ApiBuilder::new("Catalog::VariantsApi");
    variants_api
        .model(variants(&settings.schema))
        .permit_params(["product_id", "sku"])
        .searchable(["sku"])
        .crud_actions(&["create", "destroy"]);

    ApiRegistry::builder()
        .register(products_api)
        .register(variants_api)
        .build()
}

fn caller(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-caller")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn path_id(id: &str) -> Value {
    id.parse::<i64>().map(Value::from).unwrap_or_else(|_| json!(id))
}

async fn query(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    headers: HeaderMap,
    Json(query): Json<IndexQuery>,
) -> Result<impl IntoResponse, AppError> {
    let api = state.registry.resolve(&resource, &["Catalog".to_string()])?;
    let mut controller = state.controller(Value::Null, caller(&headers));
    let ids = controller.index(&api, &query).await?;
    let loaded = controller.into_loaded();
    tracing::debug!(resource = %resource, body = %loaded.pretty(&state.settings), "loaded");
    Ok(success_records(ids, loaded))
}

async fn collection_action(
    State(state): State<AppState>,
    Path((resource, action)): Path<(String, String)>,
    headers: HeaderMap,
    Json(params): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let api = state.registry.resolve(&resource, &["Catalog".to_string()])?;
    let controller = state.controller(params, caller(&headers));
    controller.perform(&api, &action, None).await
}

async fn member_action(
    State(state): State<AppState>,
    Path((resource, id, action)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(params): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let api = state.registry.resolve(&resource, &["Catalog".to_string()])?;
    let controller = state.controller(params, caller(&headers));
    controller.perform(&api, &action, Some(&path_id(&id))).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cord_sdk=info,example_consumer=info")),
        )
        .init();

    let settings = Settings::from_env();
    settings.apply();
    let registry = registry(&settings)?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/cord".into());
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;
    let state = AppState::new(Arc::new(PgStore::new(pool)), registry, settings);

    let app = Router::new()
        .route("/:resource/query", post(query))
        .route("/:resource/actions/:action", post(collection_action))
        .route("/:resource/:id/actions/:action", post(member_action))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    let port = listener.local_addr()?.port();
    tracing::info!("Example consumer listening on http://127.0.0.1:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

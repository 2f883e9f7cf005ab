//! Test doubles: a store that replays queued responses and logs what it was asked to run.

use crate::error::AppError;
use crate::sql::QueryBuf;
use crate::store::{Aggregate, Store};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Default)]
pub struct RecordingStore {
    rows: Mutex<VecDeque<Vec<Map<String, Value>>>>,
    aggregates: Mutex<VecDeque<Aggregate>>,
    returning: Mutex<VecDeque<Option<Map<String, Value>>>>,
    executed: Mutex<Vec<QueryBuf>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_rows(&self, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
        self.rows.lock().unwrap().push_back(rows);
    }

    pub fn push_aggregate(&self, json: &str, ids: Option<&str>) {
        self.aggregates.lock().unwrap().push_back(Aggregate {
            json: json.to_string(),
            ids: ids.map(str::to_string),
        });
    }

    pub fn push_returning(&self, row: Option<Map<String, Value>>) {
        self.returning.lock().unwrap().push_back(row);
    }

    pub fn executed(&self) -> Vec<QueryBuf> {
        self.executed.lock().unwrap().clone()
    }

    fn log(&self, q: &QueryBuf) {
        self.executed.lock().unwrap().push(q.clone());
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn fetch_rows(&self, q: &QueryBuf) -> Result<Vec<Map<String, Value>>, AppError> {
        self.log(q);
        Ok(self.rows.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn fetch_aggregate(&self, q: &QueryBuf) -> Result<Aggregate, AppError> {
        self.log(q);
        Ok(self.aggregates.lock().unwrap().pop_front().unwrap_or(Aggregate {
            json: "[]".into(),
            ids: Some("[]".into()),
        }))
    }

    async fn execute_returning(&self, q: &QueryBuf) -> Result<Option<Map<String, Value>>, AppError> {
        self.log(q);
        Ok(self.returning.lock().unwrap().pop_front().flatten())
    }
}

pub mod fixtures {
    use crate::config::{Association, AssociationKind, ColumnInfo, ColumnKind, Model, ValidationRule};
    use indexmap::IndexMap;
    use serde_json::json;

    fn id_column() -> ColumnInfo {
        let mut id = ColumnInfo::new("id", ColumnKind::BigInt);
        id.has_default = true;
        id.nullable = false;
        id
    }

    fn has_many(name: &str, target: &str, table: &str) -> Association {
        Association {
            name: name.into(),
            kind: AssociationKind::HasMany,
            target: target.into(),
            table: table.into(),
            schema: None,
            foreign_key: "product_id".into(),
            target_key: "id".into(),
        }
    }

    pub fn products() -> Model {
        let mut status = IndexMap::new();
        status.insert("draft".to_string(), json!(0));
        status.insert("live".to_string(), json!(1));
        Model::new("Product", "products")
            .column(id_column())
            .column(ColumnInfo::new("name", ColumnKind::Text))
            .column(ColumnInfo::new("status", ColumnKind::Enum(status)))
            .column(ColumnInfo::new("metadata", ColumnKind::Jsonb))
            .association(has_many("variants", "Variant", "variants"))
            .association(has_many("articles", "Article", "articles"))
    }

    pub fn variants() -> Model {
        Model::new("Variant", "variants")
            .column(id_column())
            .column(ColumnInfo::new("product_id", ColumnKind::BigInt))
            .column(ColumnInfo::new("name", ColumnKind::Text))
            .association(Association {
                name: "product".into(),
                kind: AssociationKind::BelongsTo,
                target: "Product".into(),
                table: "products".into(),
                schema: None,
                foreign_key: "product_id".into(),
                target_key: "id".into(),
            })
    }

    pub fn articles() -> Model {
        let mut title = ColumnInfo::new("title", ColumnKind::Text);
        title.validation = Some(ValidationRule {
            required: Some(true),
            max_length: Some(120),
            ..Default::default()
        });
        Model::new("Article", "articles")
            .column(id_column())
            .column(title)
            .column(ColumnInfo::new("body", ColumnKind::Text))
            .column(ColumnInfo::new("product_id", ColumnKind::BigInt))
    }
}

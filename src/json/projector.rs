//! Push-down serialization: the store builds the JSON array; no per-record marshaling here.

use crate::driver::Driver;
use crate::error::AppError;
use crate::json::JsonValue;
use crate::sql::{json_aggregate, literal, quoted, PK_ALIAS, ROW_ALIAS};
use crate::store::Store;
use serde_json::Value;
use std::collections::HashSet;

const EMPTY_ARRAY: &str = "[]";

/// How each row becomes a JSON object: `(key, native expression)` pairs, in output order.
#[derive(Clone, Debug, PartialEq)]
pub struct RowShape(pub Vec<(String, String)>);

impl RowShape {
    fn expr(&self) -> String {
        let args: Vec<String> = self
            .0
            .iter()
            .map(|(key, sql)| format!("{}, {}", literal(key), sql))
            .collect();
        format!("json_build_object({})", args.join(", "))
    }
}

pub struct JsonProjector<'a> {
    store: &'a dyn Store,
}

impl<'a> JsonProjector<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        JsonProjector { store }
    }

    /// One JSON array for the whole query, ordered by primary key. The empty query never reaches the store.
    pub async fn to_json(&self, driver: &Driver, shape: &RowShape) -> Result<JsonValue, AppError> {
        if driver.is_none() {
            return Ok(JsonValue::from_text(EMPTY_ARRAY));
        }
        let q = json_aggregate(Self::inner(driver, shape), false);
        let aggregate = self.store.fetch_aggregate(&q).await?;
        Ok(JsonValue::from_text(aggregate.json))
    }

    /// Like [`Self::to_json`] restricted to `ids`, also returning the requested ids the store did not return.
    pub async fn to_json_with_missing_ids(
        &self,
        driver: &Driver,
        shape: &RowShape,
        ids: &[Value],
    ) -> Result<(JsonValue, Vec<Value>), AppError> {
        let driver = driver.clone().where_ids(ids);
        if driver.is_none() {
            return Ok((JsonValue::from_text(EMPTY_ARRAY), ids.to_vec()));
        }
        let q = json_aggregate(Self::inner(&driver, shape), true);
        let aggregate = self.store.fetch_aggregate(&q).await?;
        let found: Vec<Value> = aggregate
            .ids
            .as_deref()
            .and_then(|ids| serde_json::from_str(ids).ok())
            .unwrap_or_default();
        let missing = missing_ids(ids, &found);
        if !missing.is_empty() {
            tracing::warn!(table = %driver.model().table, missing = ?missing, "requested ids not found");
        }
        Ok((JsonValue::from_text(aggregate.json), missing))
    }

    fn inner(driver: &Driver, shape: &RowShape) -> crate::sql::QueryBuf {
        driver.to_query(&[
            format!("{} AS {}", driver.model().pk_sql(), quoted(PK_ALIAS)),
            format!("{} AS {}", shape.expr(), quoted(ROW_ALIAS)),
        ])
    }
}

/// Ids compare by their text form so `"7"` from a request matches `7` from the store.
pub fn id_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `requested` minus `found`, in request order.
pub fn missing_ids(requested: &[Value], found: &[Value]) -> Vec<Value> {
    let found: HashSet<String> = found.iter().map(id_key).collect();
    requested
        .iter()
        .filter(|id| !found.contains(&id_key(id)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, RecordingStore};
    use serde_json::json;
    use std::sync::Arc;

    fn shape() -> RowShape {
        RowShape(vec![
            ("id".into(), "\"articles\".\"id\"".into()),
            ("title".into(), "\"articles\".\"title\"".into()),
        ])
    }

    #[tokio::test]
    async fn empty_queries_short_circuit() {
        let store = RecordingStore::new();
        let driver = Driver::all(Arc::new(fixtures::articles())).none();
        let json = JsonProjector::new(&store).to_json(&driver, &shape()).await.unwrap();
        assert_eq!(json.raw(), "[]");
        assert!(store.executed().is_empty());
    }

    #[tokio::test]
    async fn aggregation_is_a_single_query() {
        let store = RecordingStore::new();
        store.push_aggregate(r#"[{"id":1,"title":"a"}]"#, None);
        let driver = Driver::all(Arc::new(fixtures::articles())).where_eq("title", json!("a"));
        let json = JsonProjector::new(&store).to_json(&driver, &shape()).await.unwrap();
        assert_eq!(json.at(0).and_then(|r| r.get("title")), Some(&json!("a")));
        let executed = store.executed();
        assert_eq!(executed.len(), 1);
        assert!(executed[0].sql.contains("json_build_object('id', \"articles\".\"id\", 'title', \"articles\".\"title\")"));
        assert_eq!(executed[0].params, vec![json!("a")]);
    }

    #[tokio::test]
    async fn reports_requested_ids_the_store_did_not_return() {
        let store = RecordingStore::new();
        store.push_aggregate(r#"[{"id":1},{"id":3}]"#, Some("[1,3]"));
        let driver = Driver::all(Arc::new(fixtures::articles()));
        let (json, missing) = JsonProjector::new(&store)
            .to_json_with_missing_ids(&driver, &shape(), &[json!(1), json!(2), json!(3)])
            .await
            .unwrap();
        assert_eq!(json.len(), 2);
        assert_eq!(missing, vec![json!(2)]);
        assert!(store.executed()[0].sql.contains("IN ($1, $2, $3)"));
    }

    #[test]
    fn id_keys_ignore_string_vs_number() {
        assert_eq!(missing_ids(&[json!("7"), json!(8)], &[json!(7)]), vec![json!(8)]);
    }
}

//! Builds parameterized INSERT, UPDATE, DELETE and the JSON aggregation wrapper.

use crate::config::{ColumnKind, Model};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Quote identifier for PostgreSQL (safe: only from model descriptions).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

/// Single-quoted SQL string literal.
pub fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    pub fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    pub fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// Push a parameter and return its placeholder, cast when a pg type is known.
    pub fn placeholder(&mut self, v: Value, pg_type: Option<&str>) -> String {
        let n = self.push_param(v);
        match pg_type {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }
}

/// Column expression as selected: numeric and custom types come back as text so they decode.
pub fn select_column(model: &Model, name: &str) -> String {
    let q = model.column_sql(name);
    let Some(col) = model.find_column(name) else { return q };
    let pg_type = col.pg_type.as_deref().unwrap_or("");
    if pg_type.contains('.') || pg_type == "numeric" || col.kind == ColumnKind::Numeric {
        format!("{}::text", q)
    } else {
        q
    }
}

pub fn select_column_list(model: &Model) -> String {
    model
        .columns
        .iter()
        .map(|c| format!("{} AS {}", select_column(model, &c.name), quoted(&c.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// INSERT: model columns present in body. Omits columns with DB default when the body
/// does not provide a value, and the primary key unless given.
pub fn insert(model: &Model, body: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in &model.columns {
        let val = body.get(&c.name).cloned();
        if val.is_none() && (c.has_default || c.name == model.primary_key) {
            continue;
        }
        let ph = q.placeholder(val.unwrap_or(Value::Null), c.pg_type.as_deref());
        cols.push(quoted(&c.name));
        placeholders.push(ph);
    }
    let table = model.qualified_table();
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, select_column_list(model))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table,
            cols.join(", "),
            placeholders.join(", "),
            select_column_list(model)
        )
    };
    q
}

/// UPDATE by id: SET only model columns present in body. Touches `updated_at` when the model has it.
pub fn update(model: &Model, id: &Value, body: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = model.qualified_table();
    let mut sets = Vec::new();
    for (k, v) in body {
        if *k == model.primary_key || k == "updated_at" {
            continue;
        }
        let Some(c) = model.find_column(k) else { continue };
        let rhs = q.placeholder(v.clone(), c.pg_type.as_deref());
        sets.push(format!("{} = {}", quoted(k), rhs));
    }
    if model.find_column("updated_at").is_some() {
        sets.push(format!("{} = NOW()", quoted("updated_at")));
    }
    let id_ph = q.placeholder(id.clone(), None);
    q.sql = if sets.is_empty() {
        format!(
            "SELECT {} FROM {} WHERE {} = {}",
            select_column_list(model),
            table,
            model.pk_sql(),
            id_ph
        )
    } else {
        format!(
            "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
            table,
            sets.join(", "),
            model.pk_sql(),
            id_ph,
            select_column_list(model)
        )
    };
    q
}

/// DELETE by id.
pub fn delete(model: &Model, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let id_ph = q.placeholder(id.clone(), None);
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {} RETURNING {}",
        model.qualified_table(),
        model.pk_sql(),
        id_ph,
        select_column_list(model)
    );
    q
}

/// `CASE expr WHEN code THEN 'name' ... END`: stored enum codes mapped to their symbolic names.
pub fn enum_case(expr: &str, values: &IndexMap<String, Value>) -> String {
    let arms: Vec<String> = values
        .iter()
        .map(|(name, code)| {
            let code = match code {
                Value::String(s) => literal(s),
                other => other.to_string(),
            };
            format!("WHEN {} THEN {}", code, literal(name))
        })
        .collect();
    format!("CASE {} {} END", expr, arms.join(" "))
}

/// Alias of the primary key column inside an aggregated subquery.
pub const PK_ALIAS: &str = "__pk";
/// Alias of the per-row JSON object inside an aggregated subquery.
pub const ROW_ALIAS: &str = "__row";

/// Wrap a subquery selecting `__pk` and `__row` into one JSON array, ordered by primary key.
/// With `with_ids` a second column aggregates the returned ids.
pub fn json_aggregate(inner: QueryBuf, with_ids: bool) -> QueryBuf {
    let pk = format!("sub.{}", quoted(PK_ALIAS));
    let mut cols = vec![format!(
        "COALESCE(json_agg(sub.{} ORDER BY {}), '[]'::json)::text AS {}",
        quoted(ROW_ALIAS),
        pk,
        quoted("json")
    )];
    if with_ids {
        cols.push(format!(
            "COALESCE(json_agg({} ORDER BY {}), '[]'::json)::text AS {}",
            pk,
            pk,
            quoted("ids")
        ));
    }
    QueryBuf {
        sql: format!("SELECT {} FROM ({}) sub", cols.join(", "), inner.sql),
        params: inner.params,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use serde_json::json;

    #[test]
    fn insert_skips_defaulted_and_missing_pk() {
        let model = fixtures::articles();
        let body = json!({ "title": "Hello" });
        let q = insert(&model, body.as_object().unwrap());
        assert!(q.sql.starts_with("INSERT INTO \"public\".\"articles\" (\"title\""));
        assert!(!q.sql.contains("(\"id\""));
        assert_eq!(q.params[0], json!("Hello"));
    }

    #[test]
    fn enum_codes_map_to_names() {
        let mut values = IndexMap::new();
        values.insert("draft".to_string(), json!(0));
        values.insert("o'neil".to_string(), json!("x"));
        assert_eq!(
            enum_case("\"t\".\"s\"", &values),
            "CASE \"t\".\"s\" WHEN 0 THEN 'draft' WHEN 'x' THEN 'o''neil' END"
        );
    }

    #[test]
    fn update_binds_id_last() {
        let model = fixtures::articles();
        let body = json!({ "title": "New", "id": 9, "bogus": 1 });
        let q = update(&model, &json!(7), body.as_object().unwrap());
        assert!(q.sql.contains("SET \"title\" = $1"));
        assert!(q.sql.contains("WHERE \"articles\".\"id\" = $2"));
        assert_eq!(q.params, vec![json!("New"), json!(7)]);
    }

    #[test]
    fn aggregate_orders_by_primary_key() {
        let inner = QueryBuf {
            sql: "SELECT 1 AS \"__pk\", json_build_object() AS \"__row\"".into(),
            params: vec![],
        };
        let q = json_aggregate(inner, true);
        assert!(q.sql.contains("json_agg(sub.\"__row\" ORDER BY sub.\"__pk\")"));
        assert!(q.sql.contains("AS \"ids\""));
    }

    #[test]
    fn literals_escape_quotes() {
        assert_eq!(literal("it's"), "'it''s'");
    }
}

//! Driver: the composable query handle scopes fold over. Renders to parameterized SQL;
//! the store does all filtering and ordering.

use crate::config::Model;
use crate::error::AppError;
use crate::sql::{quoted, QueryBuf};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            _ => Err(AppError::Validation(format!(
                "sort direction must be either 'asc' or 'desc', instead got '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Eq { expr: String, value: Value, cast: Option<String> },
    In { expr: String, values: Vec<Value>, cast: Option<String> },
    /// Any of `exprs` (as text) contains `term`, case-insensitively.
    Search { exprs: Vec<String>, term: String },
    /// Trusted SQL fragment without parameters.
    Raw(String),
}

#[derive(Clone, Debug)]
pub struct Driver {
    model: Arc<Model>,
    conditions: Vec<Condition>,
    orders: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    none: bool,
}

impl Driver {
    /// Every row of the model's table.
    pub fn all(model: Arc<Model>) -> Self {
        Driver {
            model,
            conditions: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            none: false,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Whether this handle queries `model`'s table. Scopes must hand back such a handle.
    pub fn is_driver_of(&self, model: &Model) -> bool {
        self.model.qualified_table() == model.qualified_table()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn orders(&self) -> &[String] {
        &self.orders
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// `"table"."column" = value`, cast to the column's pg type when it has one.
    pub fn where_eq(self, column: &str, value: Value) -> Self {
        let cast = self.model.find_column(column).and_then(|c| c.pg_type.clone());
        let expr = self.model.column_sql(column);
        self.filter(Condition::Eq { expr, value, cast })
    }

    pub fn where_sql(self, fragment: impl Into<String>) -> Self {
        self.filter(Condition::Raw(fragment.into()))
    }

    /// Restrict to primary keys in `ids`. No ids means no rows.
    pub fn where_ids(self, ids: &[Value]) -> Self {
        if ids.is_empty() {
            return self.none();
        }
        let cast = self.model.find_column(&self.model.primary_key).and_then(|c| c.pg_type.clone());
        let expr = self.model.pk_sql();
        self.filter(Condition::In {
            expr,
            values: ids.to_vec(),
            cast,
        })
    }

    pub fn search(self, exprs: Vec<String>, term: impl Into<String>) -> Self {
        if exprs.is_empty() {
            return self;
        }
        self.filter(Condition::Search {
            exprs,
            term: term.into(),
        })
    }

    pub fn order(mut self, expr: &str, direction: SortDirection) -> Self {
        self.orders.push(format!("{} {}", expr, direction));
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// The empty query: renders nothing and never reaches the store.
    pub fn none(mut self) -> Self {
        self.none = true;
        self
    }

    pub fn is_none(&self) -> bool {
        self.none
    }

    /// SELECT `select` (or every column) with this handle's filters, order and window.
    pub fn to_query(&self, select: &[String]) -> QueryBuf {
        let mut q = QueryBuf::new();
        let cols = if select.is_empty() {
            format!("{}.*", quoted(&self.model.table))
        } else {
            select.join(", ")
        };
        let where_clause = self.where_clause(&mut q);
        let order_clause = if self.orders.is_empty() {
            String::new()
        } else {
            format!(" ORDER BY {}", self.orders.join(", "))
        };
        let limit_clause = self.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
        let offset_clause = self.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
        q.sql = format!(
            "SELECT {} FROM {}{}{}{}{}",
            cols,
            self.model.qualified_table(),
            where_clause,
            order_clause,
            limit_clause,
            offset_clause
        );
        q
    }

    /// Query selecting only primary keys, aliased `id`.
    pub fn ids_query(&self) -> QueryBuf {
        self.to_query(&[format!("{} AS {}", self.model.pk_sql(), quoted("id"))])
    }

    fn where_clause(&self, q: &mut QueryBuf) -> String {
        let mut parts = Vec::new();
        for c in &self.conditions {
            match c {
                Condition::Eq { expr, value, cast } => {
                    let ph = q.placeholder(value.clone(), cast.as_deref());
                    parts.push(format!("{} = {}", expr, ph));
                }
                Condition::In { expr, values, cast } => {
                    let phs: Vec<String> = values
                        .iter()
                        .map(|v| q.placeholder(v.clone(), cast.as_deref()))
                        .collect();
                    parts.push(format!("{} IN ({})", expr, phs.join(", ")));
                }
                Condition::Search { exprs, term } => {
                    let ph = q.placeholder(Value::String(format!("%{}%", term)), None);
                    let ors: Vec<String> = exprs
                        .iter()
                        .map(|e| format!("({})::text ILIKE {}", e, ph))
                        .collect();
                    parts.push(format!("({})", ors.join(" OR ")));
                }
                Condition::Raw(sql) => parts.push(format!("({})", sql)),
            }
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", parts.join(" AND "))
        }
    }
}

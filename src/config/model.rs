//! Backing model description: the relational type a resource exposes.
//! Deserializable so hosts can describe their tables in JSON config.

use crate::sql::{qualified_table, quoted};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_schema() -> String {
    "public".into()
}

fn default_pk() -> String {
    "id".into()
}

fn default_true() -> bool {
    true
}

/// Storage type of a column. Enums map symbolic names to stored codes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Integer,
    BigInt,
    Float,
    Numeric,
    #[default]
    Text,
    Boolean,
    Uuid,
    Timestamp,
    Date,
    Json,
    Jsonb,
    Enum(IndexMap<String, Value>),
}

impl ColumnKind {
    /// Structured columns cannot be meaningfully ordered by the store.
    pub fn is_structured(&self) -> bool {
        matches!(self, ColumnKind::Json | ColumnKind::Jsonb)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: ColumnKind,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Whether the column has a DB default (e.g. gen_random_uuid(), NOW()).
    #[serde(default)]
    pub has_default: bool,
    /// PostgreSQL type name for casts when binding string values (e.g. "timestamptz").
    #[serde(default)]
    pub pg_type: Option<String>,
    #[serde(default)]
    pub validation: Option<ValidationRule>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        ColumnInfo {
            name: name.into(),
            kind,
            nullable: true,
            has_default: false,
            pg_type: None,
            validation: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    HasMany,
    HasOne,
    BelongsTo,
}

/// A relation to another model.
/// For has-many/has-one `foreign_key` lives on the target table; for belongs-to it lives on ours.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Association {
    pub name: String,
    pub kind: AssociationKind,
    /// Type name of the target model, e.g. "ProductVariant".
    pub target: String,
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    pub foreign_key: String,
    #[serde(default = "default_pk")]
    pub target_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    pub table: String,
    #[serde(default = "default_pk")]
    pub primary_key: String,
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub associations: Vec<Association>,
}

impl Model {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Model {
            name: name.into(),
            schema: default_schema(),
            table: table.into(),
            primary_key: default_pk(),
            columns: Vec::new(),
            associations: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnInfo) -> Self {
        self.columns.push(column);
        self
    }

    pub fn association(mut self, association: Association) -> Self {
        self.associations.push(association);
        self
    }

    pub fn qualified_table(&self) -> String {
        qualified_table(&self.schema, &self.table)
    }

    /// `"table"."column"`, the native expression for a plain column.
    pub fn column_sql(&self, column: &str) -> String {
        format!("{}.{}", quoted(&self.table), quoted(column))
    }

    pub fn pk_sql(&self) -> String {
        self.column_sql(&self.primary_key)
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn find_association(&self, name: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.name == name)
    }
}

impl Association {
    pub fn target_table(&self, default_schema: &str) -> String {
        qualified_table(self.schema.as_deref().unwrap_or(default_schema), &self.table)
    }
}

//! Meta graph: per-name metadata that accumulates across declarations.

use crate::error::DefinitionError;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub const META_OPTION_KEYS: [&str; 5] = ["children", "joins", "parents", "references", "sql"];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetaEntry {
    pub children: IndexSet<String>,
    pub joins: IndexSet<String>,
    /// Names of resources this entry points at.
    pub references: IndexSet<String>,
    /// Native store expression; last declaration wins.
    pub sql: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct MetaOptions {
    #[serde(default, deserialize_with = "one_or_many")]
    pub children: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub joins: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub parents: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub references: Vec<String>,
    #[serde(default)]
    pub sql: Option<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

impl MetaOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options from a JSON object. Keys outside [`META_OPTION_KEYS`] are a declaration error.
    pub fn from_json(name: &str, value: &Value) -> Result<Self, DefinitionError> {
        if let Value::Object(map) = value {
            if let Some(key) = map.keys().find(|k| !META_OPTION_KEYS.contains(&k.as_str())) {
                return Err(DefinitionError::UnknownMetaOption {
                    name: name.to_string(),
                    key: key.clone(),
                });
            }
        }
        serde_json::from_value(value.clone()).map_err(|e| DefinitionError::InvalidMetaOptions {
            name: name.to_string(),
            message: e.to_string(),
        })
    }

    pub fn children<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.children.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn joins<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.joins.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn parents<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parents.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn references<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.references.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct MetaGraph {
    entries: IndexMap<String, MetaEntry>,
}

impl MetaGraph {
    /// Union children/joins/references into `name`'s entry, replace `sql` when given,
    /// and register `name` as a child of each parent.
    pub fn declare(&mut self, name: &str, options: MetaOptions) {
        let entry = self.entries.entry(name.to_string()).or_default();
        entry.children.extend(options.children);
        entry.joins.extend(options.joins);
        entry.references.extend(options.references);
        if options.sql.is_some() {
            entry.sql = options.sql;
        }
        for parent in options.parents {
            self.entries
                .entry(parent)
                .or_default()
                .children
                .insert(name.to_string());
        }
    }

    pub fn get(&self, name: &str) -> Option<&MetaEntry> {
        self.entries.get(name)
    }

    pub fn sql(&self, name: &str) -> Option<&str> {
        self.entries.get(name).and_then(|e| e.sql.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetaEntry)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redeclaring_unions_sets_and_replaces_sql() {
        let mut graph = MetaGraph::default();
        graph.declare("author", MetaOptions::new().children(["author_id"]).joins(["users"]).sql("a"));
        graph.declare("author", MetaOptions::new().children(["author_name"]).references(["UsersApi"]).sql("b"));
        let entry = graph.get("author").unwrap();
        assert_eq!(entry.children.iter().collect::<Vec<_>>(), ["author_id", "author_name"]);
        assert!(entry.joins.contains("users"));
        assert!(entry.references.contains("UsersApi"));
        assert_eq!(entry.sql.as_deref(), Some("b"));
    }

    #[test]
    fn omitted_sql_keeps_the_previous_expression() {
        let mut graph = MetaGraph::default();
        graph.declare("x", MetaOptions::new().sql("1"));
        graph.declare("x", MetaOptions::new().joins(["t"]));
        assert_eq!(graph.sql("x"), Some("1"));
    }

    #[test]
    fn parents_gain_the_name_as_a_child() {
        let mut graph = MetaGraph::default();
        graph.declare("price_cents", MetaOptions::new().parents(["price", "summary"]));
        assert!(graph.get("price").unwrap().children.contains("price_cents"));
        assert!(graph.get("summary").unwrap().children.contains("price_cents"));
    }

    #[test]
    fn json_options_accept_one_or_many_and_reject_unknown_keys() {
        let opts = MetaOptions::from_json("a", &json!({ "children": "b_id", "joins": ["b"] })).unwrap();
        assert_eq!(opts.children, vec!["b_id".to_string()]);
        let err = MetaOptions::from_json("a", &json!({ "childs": "b" })).unwrap_err();
        assert_eq!(
            err,
            DefinitionError::UnknownMetaOption { name: "a".into(), key: "childs".into() }
        );
    }
}

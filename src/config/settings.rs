//! Process settings. Read from `CORD_*` env vars; the default-scope switch is process-wide.

use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};

static DISABLE_DEFAULT_SCOPES: AtomicBool = AtomicBool::new(false);

/// Whether descriptors should skip their default scopes when building a driver.
pub fn disable_default_scopes() -> bool {
    DISABLE_DEFAULT_SCOPES.load(Ordering::Acquire)
}

/// Flip the process-wide switch. Memoized drivers notice on their next read.
pub fn set_disable_default_scopes(value: bool) {
    DISABLE_DEFAULT_SCOPES.store(value, Ordering::Release);
}

fn default_width() -> usize {
    80
}

fn default_indent() -> String {
    "  ".into()
}

fn default_max_load_ids() -> usize {
    1000
}

fn default_schema() -> String {
    "public".into()
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub disable_default_scopes: bool,
    /// Line width budget for pretty-printed JSON.
    #[serde(default = "default_width")]
    pub pretty_width: usize,
    #[serde(default = "default_indent")]
    pub pretty_indent: String,
    /// Upper bound on ids in one batched load.
    #[serde(default = "default_max_load_ids")]
    pub max_load_ids: usize,
    /// Schema used for association tables that do not name one.
    #[serde(default = "default_schema")]
    pub schema: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            disable_default_scopes: false,
            pretty_width: default_width(),
            pretty_indent: default_indent(),
            max_load_ids: default_max_load_ids(),
            schema: default_schema(),
        }
    }
}

impl Settings {
    /// Defaults overridden by `CORD_DISABLE_DEFAULT_SCOPES`, `CORD_PRETTY_WIDTH`,
    /// `CORD_MAX_LOAD_IDS` and `CORD_SCHEMA`. Unparseable values keep the default.
    pub fn from_env() -> Self {
        let mut settings = Settings::default();
        if let Ok(v) = std::env::var("CORD_DISABLE_DEFAULT_SCOPES") {
            settings.disable_default_scopes = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(n) = std::env::var("CORD_PRETTY_WIDTH").ok().and_then(|v| v.parse().ok()) {
            settings.pretty_width = n;
        }
        if let Some(n) = std::env::var("CORD_MAX_LOAD_IDS").ok().and_then(|v| v.parse().ok()) {
            settings.max_load_ids = n;
        }
        if let Ok(schema) = std::env::var("CORD_SCHEMA") {
            if !schema.is_empty() {
                settings.schema = schema;
            }
        }
        settings
    }

    /// Publish the process-wide parts of these settings.
    pub fn apply(&self) {
        set_disable_default_scopes(self.disable_default_scopes);
        tracing::debug!(disable_default_scopes = self.disable_default_scopes, "settings applied");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let s: Settings = serde_json::from_str(r#"{ "pretty_width": 40 }"#).unwrap();
        assert_eq!(s.pretty_width, 40);
        assert_eq!(s.pretty_indent, "  ");
        assert_eq!(s.max_load_ids, 1000);
        assert!(!s.disable_default_scopes);
    }
}

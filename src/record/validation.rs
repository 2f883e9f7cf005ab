//! Field validation from column rules, run before an entity is saved.

use crate::config::{Model, ValidationRule};
use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Map, Value};

/// Messages per field, in column order.
pub type FieldErrors = IndexMap<String, Vec<String>>;

pub struct RecordValidator;

impl RecordValidator {
    /// Validate values against per-column rules. New records must carry every required field;
    /// persisted ones only check what is present.
    pub fn validate(model: &Model, values: &Map<String, Value>, persisted: bool) -> FieldErrors {
        let mut errors = FieldErrors::new();
        for column in &model.columns {
            let Some(rule) = &column.validation else { continue };
            let val = values.get(&column.name);
            let missing = val.map(Value::is_null).unwrap_or(true);
            if rule.required == Some(true) && missing && (!persisted || val.is_some()) {
                errors.entry(column.name.clone()).or_default().push("is required".into());
                continue;
            }
            if let Some(v) = val {
                let messages = validate_field(v, rule);
                if !messages.is_empty() {
                    errors.entry(column.name.clone()).or_default().extend(messages);
                }
            }
        }
        errors
    }
}

fn validate_field(v: &Value, rule: &ValidationRule) -> Vec<String> {
    let mut out = Vec::new();
    if v.is_null() {
        return out;
    }
    if let (Some(format), Some(s)) = (&rule.format, v.as_str()) {
        match format.to_lowercase().as_str() {
            "email" if !s.contains('@') || s.len() < 3 => out.push("must be a valid email".into()),
            "uuid" if uuid::Uuid::parse_str(s).is_err() => out.push("must be a valid UUID".into()),
            _ => {}
        }
    }
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(max) = rule.max_length {
            if len > max as usize {
                out.push(format!("must be at most {} characters", max));
            }
        }
        if let Some(min) = rule.min_length {
            if len < min as usize {
                out.push(format!("must be at least {} characters", min));
            }
        }
        if let Some(pattern) = &rule.pattern {
            match Regex::new(pattern) {
                Ok(re) if !re.is_match(s) => out.push("does not match required pattern".into()),
                Err(_) => out.push("has an invalid pattern".into()),
                _ => {}
            }
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            out.push(format!(
                "must be one of: {:?}",
                allowed.iter().take(5).collect::<Vec<_>>()
            ));
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rule.minimum {
            if n < min {
                out.push(format!("must be at least {}", min));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                out.push(format!("must be at most {}", max));
            }
        }
    }
    out
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

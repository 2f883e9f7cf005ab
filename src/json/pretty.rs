use serde_json::Value;

/// Width-aware pretty printer. A value that fits in `width` stays on one line; otherwise its
/// members go one per line, one `indent` deeper, each with the budget left after its prefix.
pub fn pretty_print(value: &Value, width: usize, indent: &str) -> String {
    render(value, width, indent, 0)
}

fn render(value: &Value, width: usize, indent: &str, depth: usize) -> String {
    let flat = value.to_string();
    if flat.len() <= width && !flat.contains('\n') {
        return flat;
    }
    let pad = indent.repeat(depth + 1);
    let close = indent.repeat(depth);
    match value {
        Value::Object(map) if !map.is_empty() => {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| {
                    let prefix = format!("{}: ", Value::String(k.clone()));
                    let budget = width.saturating_sub(indent.len() + prefix.len());
                    format!("{}{}{}", pad, prefix, render(v, budget, indent, depth + 1))
                })
                .collect();
            format!("{{\n{}\n{}}}", entries.join(",\n"), close)
        }
        Value::Array(items) if !items.is_empty() => {
            let budget = width.saturating_sub(indent.len());
            let entries: Vec<String> = items
                .iter()
                .map(|v| format!("{}{}", pad, render(v, budget, indent, depth + 1)))
                .collect();
            format!("[\n{}\n{}]", entries.join(",\n"), close)
        }
        _ => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_values_stay_flat() {
        assert_eq!(pretty_print(&json!({ "a": 1, "b": [1, 2] }), 80, "  "), r#"{"a":1,"b":[1,2]}"#);
    }

    #[test]
    fn wide_objects_break_one_key_per_line() {
        let v = json!({ "name": "a fairly long product name", "tags": ["x", "y"] });
        let out = pretty_print(&v, 30, "  ");
        assert_eq!(
            out,
            "{\n  \"name\": \"a fairly long product name\",\n  \"tags\": [\"x\",\"y\"]\n}"
        );
    }

    #[test]
    fn nested_budgets_shrink_by_the_key_prefix() {
        let v = json!({ "outer": { "k": "0123456789" } });
        // flat inner is 18 chars; "outer": prefix plus indent leaves 20 - 11 = 9
        let out = pretty_print(&v, 20, "  ");
        assert_eq!(out, "{\n  \"outer\": {\n    \"k\": \"0123456789\"\n  }\n}");
    }

    #[test]
    fn scalars_never_break() {
        assert_eq!(pretty_print(&json!("a long string value"), 3, "  "), "\"a long string value\"");
    }
}

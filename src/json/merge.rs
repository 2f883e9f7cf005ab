use serde_json::Value;

/// Structural merge: arrays concatenate, objects merge key-wise (recursing into shared keys),
/// anything else takes the right-hand value.
pub fn merge(left: Value, right: Value) -> Value {
    match (left, right) {
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Value::Array(a)
        }
        (Value::Object(mut a), Value::Object(b)) => {
            for (k, v) in b {
                let merged = match a.remove(&k) {
                    Some(existing) => merge(existing, v),
                    None => v,
                };
                a.insert(k, merged);
            }
            Value::Object(a)
        }
        (_, right) => right,
    }
}

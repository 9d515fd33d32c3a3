//! Canonical JSON stringification for signing and hashing.
//!
//! This function is the only source of payload bytes used for signatures and
//! content hashes. Object keys are sorted recursively, array order is
//! preserved, and separators are compact, so two semantically equal values
//! always produce identical bytes. `serde_json::Value` is acyclic by
//! construction, which rules out reference cycles in the input.

use serde_json::Value;

/// Serialize `value` to its canonical string form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, item);
            }
            out.push('}');
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    // Reuse serde_json's escaping rules so canonical strings stay parseable.
    out.push_str(&Value::String(s.to_string()).to_string());
}

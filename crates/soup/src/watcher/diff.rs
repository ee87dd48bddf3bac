//! Structural diff between two observations of an object.

use std::fmt;

use serde_json::Value;

/// Metadata that changes on every write and carries no desired state.
const VOLATILE_METADATA: [&str; 2] = ["resourceVersion", "managedFields"];

/// One changed leaf. `None` means the field is absent on that side.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub path: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<Value>| match v {
            Some(v) => v.to_string(),
            None => "<none>".to_string(),
        };
        write!(f, "{}: {} != {}", self.path, show(&self.old), show(&self.new))
    }
}

/// Drops write-bookkeeping metadata before comparing.
pub fn normalize(mut value: Value) -> Value {
    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        for key in VOLATILE_METADATA {
            metadata.remove(key);
        }
    }
    value
}

/// True when both observations carry the same state.
pub fn semantically_equal(old: &Value, new: &Value) -> bool {
    normalize(old.clone()) == normalize(new.clone())
}

/// Changed leaves between `old` and `new`, paths in key order.
pub fn diff(old: &Value, new: &Value) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    walk(
        "",
        Some(&normalize(old.clone())),
        Some(&normalize(new.clone())),
        &mut changes,
    );
    changes
}

fn walk(path: &str, old: Option<&Value>, new: Option<&Value>, out: &mut Vec<FieldChange>) {
    match (old, new) {
        (Some(Value::Object(a)), Some(Value::Object(b))) => {
            let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                walk(&child, a.get(key), b.get(key), out);
            }
        }
        (Some(Value::Array(a)), Some(Value::Array(b))) => {
            for i in 0..a.len().max(b.len()) {
                walk(&format!("{}[{}]", path, i), a.get(i), b.get(i), out);
            }
        }
        (a, b) if a == b => {}
        (a, b) => out.push(FieldChange {
            path: path.to_string(),
            old: a.cloned(),
            new: b.cloned(),
        }),
    }
}

/// One change per line.
pub fn render(changes: &[FieldChange]) -> String {
    changes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

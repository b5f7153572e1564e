//! Dotted field path access over JSON documents

use serde_json::Value;

/// Resolves a dotted path without expanding arrays.
///
/// Numeric segments index into arrays (`"tags.0"`). Returns None if any
/// segment is missing.
pub fn get_dotted<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Collects every value reachable through a dotted path, expanding arrays.
///
/// Arrays met in the middle of the path are traversed element by element.
/// A terminal array contributes both itself and each of its elements, which
/// is what predicate matching needs.
pub fn collect_dotted<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    collect_into(doc, &segments, &mut out);
    out
}

fn collect_into<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        if let Value::Array(items) = value {
            out.push(value);
            out.extend(items.iter());
        } else {
            out.push(value);
        }
        return;
    };

    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(*head) {
                collect_into(child, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(idx) = head.parse::<usize>() {
                if let Some(child) = items.get(idx) {
                    collect_into(child, rest, out);
                    return;
                }
            }
            for item in items {
                if item.is_object() {
                    collect_into(item, segments, out);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_dotted() {
        let doc = json!({"a": {"b": 5}, "tags": ["x", "y"]});
        assert_eq!(get_dotted(&doc, "a.b"), Some(&json!(5)));
        assert_eq!(get_dotted(&doc, "tags.1"), Some(&json!("y")));
        assert_eq!(get_dotted(&doc, "a.c"), None);
    }

    #[test]
    fn test_collect_dotted_expands_arrays() {
        let doc = json!({"items": [{"qty": 1}, {"qty": 7}], "tags": ["x", "y"]});
        assert_eq!(collect_dotted(&doc, "items.qty"), vec![&json!(1), &json!(7)]);
        assert_eq!(collect_dotted(&doc, "tags").len(), 3);
        assert!(collect_dotted(&doc, "missing").is_empty());
    }
}

//! Depth-bounded walker over untyped tool-arg JSON.
//!
//! Tool args are untyped in the wire schema, so detectors operate on a
//! tagged-variant walk (scalar | list | map) bounded to depth 32. Values
//! nested deeper are ignored.

use serde_json::Value;

/// Maximum nesting depth visited.
pub(crate) const MAX_WALK_DEPTH: usize = 32;

/// Visit every string leaf with its dotted path (e.g. `headers.referer`,
/// `urls[2]`).
pub(crate) fn walk_strings<'a, F>(value: &'a Value, visit: &mut F)
where
    F: FnMut(&str, &'a str),
{
    walk_inner(value, String::new(), 0, visit);
}

fn walk_inner<'a, F>(value: &'a Value, path: String, depth: usize, visit: &mut F)
where
    F: FnMut(&str, &'a str),
{
    if depth > MAX_WALK_DEPTH {
        return;
    }
    match value {
        Value::String(text) => visit(&path, text),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                walk_inner(item, format!("{path}[{index}]"), depth + 1, visit);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                walk_inner(item, child, depth + 1, visit);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Rewrite every string leaf in place, bounded by the same depth limit.
/// Returns the number of changed leaves.
pub(crate) fn map_strings<F>(value: &mut Value, transform: &mut F) -> usize
where
    F: FnMut(&str, &str) -> Option<String>,
{
    map_inner(value, String::new(), 0, transform)
}

fn map_inner<F>(value: &mut Value, path: String, depth: usize, transform: &mut F) -> usize
where
    F: FnMut(&str, &str) -> Option<String>,
{
    if depth > MAX_WALK_DEPTH {
        return 0;
    }
    match value {
        Value::String(text) => {
            if let Some(replacement) = transform(&path, text) {
                *text = replacement;
                1
            } else {
                0
            }
        }
        Value::Array(items) => items
            .iter_mut()
            .enumerate()
            .map(|(index, item)| map_inner(item, format!("{path}[{index}]"), depth + 1, transform))
            .sum(),
        Value::Object(map) => map
            .iter_mut()
            .map(|(key, item)| {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                map_inner(item, child, depth + 1, transform)
            })
            .sum(),
        Value::Null | Value::Bool(_) | Value::Number(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::{MAX_WALK_DEPTH, map_strings, walk_strings};
    use serde_json::{Value, json};

    #[test]
    fn visits_leaves_with_paths() {
        let value = json!({"url": "http://a", "nested": {"items": ["x", 2, "y"]}});
        let mut seen = Vec::new();
        walk_strings(&value, &mut |path, text| {
            seen.push((path.to_string(), text.to_string()));
        });
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("nested.items[0]".to_string(), "x".to_string()),
                ("nested.items[2]".to_string(), "y".to_string()),
                ("url".to_string(), "http://a".to_string()),
            ]
        );
    }

    #[test]
    fn depth_limit_reaches_32_not_33() {
        // Wrap a leaf in nested single-element arrays.
        let build = |layers: usize| {
            let mut value = Value::String("leaf".to_string());
            for _ in 0..layers {
                value = Value::Array(vec![value]);
            }
            value
        };

        let mut count = 0;
        walk_strings(&build(MAX_WALK_DEPTH), &mut |_, _| count += 1);
        assert_eq!(count, 1);

        count = 0;
        walk_strings(&build(MAX_WALK_DEPTH + 1), &mut |_, _| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn map_rewrites_and_counts() {
        let mut value = json!({"a": "keep", "b": ["change-me"]});
        let changed = map_strings(&mut value, &mut |_, text| {
            (text == "change-me").then(|| "changed".to_string())
        });
        assert_eq!(changed, 1);
        assert_eq!(value["b"][0], "changed");
    }
}

//! Deterministic cache keys for integration calls.
//!
//! Arguments go through `serde_json::Value` and object keys are sorted, so
//! two argument values that serialize to the same JSON object produce the
//! same key regardless of field insertion order.

use serde::Serialize;
use serde_json::{Map, Value};

pub const KEY_NAMESPACE: &str = "integration";

/// `integration:<name>:<canonical json of args>`.
pub fn cache_key<A: Serialize + ?Sized>(name: &str, args: &A) -> Result<String, serde_json::Error> {
    let canonical = canonicalize(serde_json::to_value(args)?);
    Ok(format!("{KEY_NAMESPACE}:{name}:{canonical}"))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Glob matching every cached result of one integration.
pub fn integration_pattern(name: &str) -> String {
    format!("{KEY_NAMESPACE}:{name}:*")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_key_format() {
        let key = cache_key("ANM", &json!({"id": "123"})).unwrap();
        assert_eq!(key, r#"integration:ANM:{"id":"123"}"#);
    }

    #[test]
    fn test_key_ignores_map_order() {
        let mut a = HashMap::new();
        a.insert("lat", -15.7);
        a.insert("lon", -47.9);
        let mut b = HashMap::new();
        b.insert("lon", -47.9);
        b.insert("lat", -15.7);

        assert_eq!(cache_key("USGS", &a).unwrap(), cache_key("USGS", &b).unwrap());
        assert_ne!(
            cache_key("USGS", &a).unwrap(),
            cache_key("Copernicus", &a).unwrap()
        );
    }

    #[test]
    fn test_pattern_matches_own_keys() {
        let pattern = crate::cache::GlobPattern::new(&integration_pattern("IBAMA"));
        assert!(pattern.matches(&cache_key("IBAMA", &(1, "x")).unwrap()));
        assert!(!pattern.matches(&cache_key("ANP", &(1, "x")).unwrap()));
    }
}

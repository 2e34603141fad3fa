//! Deterministic cache keys.
//!
//! Parameters are normalized (trimmed, lowercased names, nulls dropped, arrays
//! sorted) and ordered by name, so logically equal queries always produce the
//! same key regardless of the order filters were supplied in.

use crate::leaderboard::{CategoryId, WindowType};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Longer keys are replaced by a digest
const MAX_KEY_LEN: usize = 200;

pub const PROGRESSION_NS: &str = "progression";
pub const STATS_NS: &str = "stats";
pub const LEADERBOARD_NS: &str = "leaderboard";
pub const TOP_PLAYERS_NS: &str = "top_players";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheKey {
    namespace: String,
    params: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.trim().to_lowercase(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.params
            .insert(name.trim().to_lowercase(), value.to_string().trim().to_lowercase());
        self
    }

    /// Absent values are omitted, so `None` and "not given" share a key
    pub fn opt_param<V: ToString>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.param(name, v),
            None => self,
        }
    }

    /// Build from an arbitrary JSON filter object
    pub fn from_filters(namespace: &str, filters: &serde_json::Map<String, Value>) -> Self {
        filters
            .iter()
            .filter_map(|(name, value)| normalize_value(value).map(|v| (name, v)))
            .fold(Self::new(namespace), |key, (name, value)| key.param(name, value))
    }

    pub fn build(&self) -> String {
        let body = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let key = format!("{}:{}", self.namespace, body);
        if key.len() <= MAX_KEY_LEN {
            return key;
        }
        let digest = Sha256::digest(body.as_bytes());
        format!("{}:#{}", self.namespace, &hex::encode(digest)[..32])
    }

    /// Prefix shared by every key in `namespace`
    pub fn prefix(namespace: &str) -> String {
        format!("{}:", namespace.trim().to_lowercase())
    }
}

fn normalize_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let mut parts: Vec<String> = items.iter().filter_map(normalize_value).collect();
            if parts.is_empty() {
                return None;
            }
            parts.sort();
            parts.dedup();
            Some(parts.join(","))
        }
        Value::Object(map) => {
            let nested: BTreeMap<&String, String> = map
                .iter()
                .filter_map(|(k, v)| normalize_value(v).map(|v| (k, v)))
                .collect();
            Some(
                nested
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k, v))
                    .collect::<Vec<_>>()
                    .join(";"),
            )
        }
        other => Some(other.to_string()),
    }
}

pub fn progression_key(user_id: Uuid) -> String {
    CacheKey::new(PROGRESSION_NS).param("user", user_id).build()
}

pub fn stats_key(user_id: Uuid) -> String {
    CacheKey::new(STATS_NS).param("user", user_id).build()
}

pub fn leaderboard_key(
    window: WindowType,
    category_id: Option<CategoryId>,
    limit: usize,
    offset: usize,
) -> String {
    CacheKey::new(LEADERBOARD_NS)
        .param("window", window)
        .opt_param("category", category_id)
        .param("limit", limit)
        .param("offset", offset)
        .build()
}

pub fn top_players_key(limit: usize) -> String {
    CacheKey::new(TOP_PLAYERS_NS).param("limit", limit).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_param_order_does_not_matter() {
        let a = CacheKey::new("leaderboard")
            .param("window", "weekly")
            .param("limit", 10)
            .build();
        let b = CacheKey::new("Leaderboard")
            .param("LIMIT", 10)
            .param("window", " Weekly ")
            .build();
        assert_eq!(a, b);
        assert_eq!(a, "leaderboard:limit=10&window=weekly");
    }

    #[test]
    fn test_filters_normalized() {
        let a = json!({"category": 7, "tags": ["b", "a", "a"], "search": null});
        let b = json!({"tags": ["a", "b"], "category": 7});
        let ka = CacheKey::from_filters("categories", a.as_object().unwrap()).build();
        let kb = CacheKey::from_filters("categories", b.as_object().unwrap()).build();
        assert_eq!(ka, kb);
        assert_eq!(ka, "categories:category=7&tags=a,b");
    }

    #[test]
    fn test_optional_params_omitted() {
        assert_eq!(
            leaderboard_key(WindowType::Daily, None, 10, 0),
            "leaderboard:limit=10&offset=0&window=daily"
        );
        assert_ne!(
            leaderboard_key(WindowType::Daily, Some(3), 10, 0),
            leaderboard_key(WindowType::Daily, None, 10, 0)
        );
    }

    #[test]
    fn test_long_keys_are_hashed() {
        let long = "x".repeat(300);
        let key = CacheKey::new("search").param("q", &long).build();
        assert!(key.starts_with("search:#"));
        assert_eq!(key.len(), "search:#".len() + 32);
        assert_eq!(key, CacheKey::new("search").param("q", &long).build());
    }

    #[test]
    fn test_user_keys_share_prefix() {
        let user = Uuid::new_v4();
        assert!(progression_key(user).starts_with(&CacheKey::prefix(PROGRESSION_NS)));
        assert!(stats_key(user).starts_with("stats:user="));
    }
}

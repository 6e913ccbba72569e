//! Plan Cache: key derivation plus get/set/delete/clear over an injected
//! store.

use crate::types::{ParseDiagnostic, ParseOptions, SchemaDescriptor, SearchPlan};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// The canonical persisted cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanCacheEntry {
    pub plan: SearchPlan,
    pub confidence: f64,
    pub diagnostics: Vec<ParseDiagnostic>,
    pub tokens_used: u32,
    pub processing_time_ms: u64,
    pub updated_at: DateTime<Utc>,
    pub profile: Option<String>,
}

/// Injected key/value store for plan persistence. Implementations may be
/// synchronous or asynchronous; any thrown/rejected error is logged and
/// treated as a miss.
#[async_trait]
pub trait PlanCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<PlanCacheEntry>;
    async fn set(&self, key: &str, entry: PlanCacheEntry);
    async fn delete(&self, key: &str) {
        let _ = key;
    }
    async fn clear(&self, profile: Option<&str>) {
        let _ = profile;
    }
}

/// Deterministic key derivation: recursively sort object keys, stringify
/// the canonical form of `{profile, schema, instructions, options}`.
/// `confidenceThreshold` is part of `options` and therefore part of the
/// key — see DESIGN.md for the Open Question this resolves.
pub fn canonical_key(
    profile: Option<&str>,
    schema: &indexmap::IndexMap<String, SchemaDescriptor>,
    instructions: Option<&str>,
    options: Option<&ParseOptions>,
) -> String {
    let schema_value = serde_json::to_value(schema).unwrap_or(serde_json::Value::Null);
    let options_value = options
        .map(|o| serde_json::to_value(o).unwrap_or(serde_json::Value::Null))
        .unwrap_or(serde_json::Value::Null);

    let envelope = serde_json::json!({
        "profile": profile.unwrap_or("default"),
        "schema": schema_value,
        "instructions": instructions.unwrap_or(""),
        "options": options_value,
    });

    let canonical = sort_keys(&envelope);
    serde_json::to_string(&canonical).unwrap_or_default()
}

/// Recursively rewrites a `serde_json::Value`'s object keys into sorted
/// (`BTreeMap`-backed) order so structurally-identical values always
/// stringify identically regardless of insertion order.
fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> =
                map.iter().map(|(k, v)| (k.clone(), sort_keys(v))).collect();
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sort_keys).collect())
        }
        other => other.clone(),
    }
}

/// Built-in in-memory cache implementation. Entries are cloned on read and
/// write so no consumer can mutate a cached plan in place.
#[derive(Clone, Default)]
pub struct InMemoryPlanCache {
    store: Arc<Mutex<HashMap<String, PlanCacheEntry>>>,
}

impl InMemoryPlanCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanCache for InMemoryPlanCache {
    async fn get(&self, key: &str) -> Option<PlanCacheEntry> {
        self.store.lock().await.get(key).cloned()
    }

    async fn set(&self, key: &str, entry: PlanCacheEntry) {
        self.store.lock().await.insert(key.to_string(), entry);
    }

    async fn delete(&self, key: &str) {
        self.store.lock().await.remove(key);
    }

    async fn clear(&self, profile: Option<&str>) {
        let mut store = self.store.lock().await;
        match profile {
            None => store.clear(),
            Some(p) => store.retain(|_, entry| entry.profile.as_deref() != Some(p)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlanComplexity, PlanId, PlanMetadata, PlanOrigin, PlanStrategy};

    fn sample_plan() -> SearchPlan {
        SearchPlan {
            id: PlanId::new(),
            version: 1,
            steps: Vec::new(),
            strategy: PlanStrategy::Sequential,
            confidence_threshold: 0.5,
            metadata: PlanMetadata {
                detected_format: "text".to_string(),
                complexity: PlanComplexity::Low,
                estimated_tokens: 10,
                origin: PlanOrigin::Heuristic,
                planner_confidence: Some(0.7),
                context: None,
            },
        }
    }

    fn sample_entry() -> PlanCacheEntry {
        PlanCacheEntry {
            plan: sample_plan(),
            confidence: 0.7,
            diagnostics: Vec::new(),
            tokens_used: 10,
            processing_time_ms: 5,
            updated_at: Utc::now(),
            profile: None,
        }
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = InMemoryPlanCache::new();
        let entry = sample_entry();
        cache.set("k", entry.clone()).await;
        let fetched = cache.get("k").await.expect("entry should be present");
        assert_eq!(fetched.plan.id, entry.plan.id);
        assert_eq!(fetched.plan.metadata.origin, PlanOrigin::Heuristic);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let cache = InMemoryPlanCache::new();
        cache.set("k", sample_entry()).await;
        cache.delete("k").await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn clear_with_profile_only_removes_matching() {
        let cache = InMemoryPlanCache::new();
        let mut a = sample_entry();
        a.profile = Some("lean-agent".to_string());
        let mut b = sample_entry();
        b.profile = Some("vibe-coder".to_string());
        cache.set("a", a).await;
        cache.set("b", b).await;
        cache.clear(Some("lean-agent")).await;
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_some());
    }

    #[test]
    fn canonical_key_is_order_independent() {
        let mut schema_a = indexmap::IndexMap::new();
        schema_a.insert("a".to_string(), SchemaDescriptor::Hint("number".to_string()));
        schema_a.insert("b".to_string(), SchemaDescriptor::Hint("string".to_string()));

        let mut schema_b = indexmap::IndexMap::new();
        schema_b.insert("b".to_string(), SchemaDescriptor::Hint("string".to_string()));
        schema_b.insert("a".to_string(), SchemaDescriptor::Hint("number".to_string()));

        let key_a = canonical_key(None, &schema_a, Some("x"), None);
        let key_b = canonical_key(None, &schema_b, Some("x"), None);
        assert_eq!(key_a, key_b);
    }
}

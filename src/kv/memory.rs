use std::collections::{BTreeMap, HashMap};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use crate::kv::client::{IndexQuery, KvStore, PutOptions, StoreError, StoreResult};

struct StoredObject {
    value: Value,
    indexes: Vec<(String, String)>,
}

/// In-process store with the same semantics as the HTTP client: 404s are
/// `NotFound`, key listings are sorted, secondary indexes are exact/range.
pub struct MemoryStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Number of objects in `bucket`.
    pub fn len(&self, bucket: &str) -> usize {
        self.buckets.read().get(bucket).map_or(0, |b| b.len())
    }

    /// Direct read without going through the async trait.
    pub fn peek(&self, bucket: &str, key: &str) -> Option<Value> {
        self.buckets
            .read()
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|o| o.value.clone())
    }

    fn not_found(bucket: &str, key: &str) -> StoreError {
        StoreError::NotFound(format!("/riak/{}/{}", bucket, key))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn head(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let buckets = self.buckets.read();
        match buckets.get(bucket).and_then(|b| b.get(key)) {
            Some(_) => Ok(()),
            None => Err(Self::not_found(bucket, key)),
        }
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Value> {
        let buckets = self.buckets.read();
        buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|o| o.value.clone())
            .ok_or_else(|| Self::not_found(bucket, key))
    }

    async fn put(&self, bucket: &str, key: &str, value: &Value, options: &PutOptions) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidRequest("key (string) required".to_string()));
        }
        let mut buckets = self.buckets.write();
        buckets.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                value: value.clone(),
                indexes: options.indexes.clone(),
            },
        );
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let mut buckets = self.buckets.write();
        match buckets.get_mut(bucket).and_then(|b| b.remove(key)) {
            Some(_) => Ok(()),
            None => Err(Self::not_found(bucket, key)),
        }
    }

    async fn list_keys(&self, bucket: &str) -> StoreResult<Vec<String>> {
        let buckets = self.buckets.read();
        Ok(buckets
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn find_by_index(&self, bucket: &str, attribute: &str, query: &IndexQuery) -> StoreResult<Vec<String>> {
        let attribute = attribute.to_lowercase();
        let buckets = self.buckets.read();
        let Some(objects) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };
        Ok(objects
            .iter()
            .filter(|(_, o)| o.indexes.iter().any(|(a, v)| *a == attribute && query.matches(v)))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_keys_are_not_found() {
        let store = MemoryStore::new();
        assert!(store.head("b", "k").await.unwrap_err().is_not_found());
        assert!(store.delete("b", "k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn secondary_index_ranges_are_bytewise() {
        let store = MemoryStore::new();
        for name in ["child1", "child10", "child9", "Child95"] {
            let options = PutOptions::new().index("value", name);
            store.put("idx", name, &json!({ "value": name }), &options).await.unwrap();
        }
        let keys = store
            .find_by_index("idx", "value", &IndexQuery::Range("child9".into(), "\u{10ffff}".into()))
            .await
            .unwrap();
        assert_eq!(keys, vec!["child9".to_string()]);

        let exact = store.find_by_index("idx", "VALUE", &IndexQuery::Exact("child1".into())).await.unwrap();
        assert_eq!(exact, vec!["child1".to_string()]);
    }
}

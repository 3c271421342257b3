use std::collections::BTreeSet;
use std::sync::Arc;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use crate::core::config::{Config, IndexSpec};
use crate::core::error::{Error, Result};
use crate::core::types::Attributes;
use crate::index::fanin::FanIn;
use crate::index::key::{IndexKey, IndexKeyCodec, IndexKeySet, IndexRecord, VALUE_INDEX};
use crate::kv::client::{IndexQuery, KvStore, PutOptions, StoreError, StoreResult};

/// Outcome of a best-effort index batch. Failures were already logged.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub applied: usize,
    pub failed: Vec<(IndexKey, String)>,
}

impl IndexReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Key, bucket, record key and store outcome of one index write or delete.
type Applied<'k> = (&'k IndexKey, String, String, StoreResult<()>);

/// Maintains the derived index records of every entry.
pub struct IndexMaintainer {
    store: Arc<dyn KvStore>,
    codec: IndexKeyCodec,
    indexes: Vec<IndexSpec>,
    fanin: FanIn,
}

impl IndexMaintainer {
    pub fn new(store: Arc<dyn KvStore>, config: &Config) -> Self {
        IndexMaintainer {
            store,
            codec: IndexKeyCodec::new(config),
            indexes: config.indexes.clone(),
            fanin: FanIn::new(config.fanout_concurrency),
        }
    }

    pub fn codec(&self) -> &IndexKeyCodec {
        &self.codec
    }

    /// Names of every configured indexed attribute.
    pub fn indexed_attributes(&self) -> Vec<String> {
        self.indexes.iter().map(|spec| spec.name.clone()).collect()
    }

    fn spec(&self, attribute: &str) -> Option<&IndexSpec> {
        let attribute = attribute.to_lowercase();
        self.indexes.iter().find(|spec| spec.name == attribute)
    }

    /// Keys implied by every indexed attribute present in `attributes`.
    pub fn build_index_keys(&self, attributes: &Attributes) -> IndexKeySet {
        let mut keys = IndexKeySet::new();
        for spec in &self.indexes {
            if let Some(values) = attributes.get(&spec.name) {
                for value in values {
                    keys.insert(IndexKey::new(&spec.name, value, spec.unique));
                }
            }
        }
        keys
    }

    /// Keys implied by the named attributes only (modify delta).
    pub fn build_keys_for(&self, attributes: &Attributes, names: &BTreeSet<String>) -> IndexKeySet {
        let mut keys = IndexKeySet::new();
        for name in names {
            let Some(spec) = self.spec(name) else {
                continue;
            };
            if let Some(values) = attributes.get(name) {
                for value in values {
                    keys.insert(IndexKey::new(&spec.name, value, spec.unique));
                }
            }
        }
        keys
    }

    /// Probes every unique key; any existing record fails the request with a
    /// constraint violation naming the attribute.
    pub async fn check_unique(&self, log_id: &str, keys: &IndexKeySet) -> Result<()> {
        let probes: Vec<BoxFuture<'_, Result<()>>> = keys
            .iter()
            .filter(|k| k.unique)
            .map(|key| self.check_free(log_id, key).boxed())
            .collect();

        self.fanin.all(probes).await.map(|_| ())
    }

    async fn check_free(&self, log_id: &str, key: &IndexKey) -> Result<()> {
        let (bucket, record) = self.codec.locate(key, "");
        match self.store.head(&bucket, &record).await {
            Ok(()) => {
                log::debug!("{} unique index {}={} already taken", log_id, key.attribute, key.value);
                Err(Error::constraint_violation(key.attribute.clone()))
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    /// Writes one record per key. Failures are logged and reported, never
    /// returned: the owning entry is already committed.
    pub async fn write(&self, log_id: &str, keys: &IndexKeySet, owner: &str) -> IndexReport {
        let writes: Vec<BoxFuture<'_, Applied<'_>>> =
            keys.iter().map(|key| self.write_one(key, owner).boxed()).collect();

        let mut report = IndexReport::default();
        for (key, bucket, record_key, outcome) in self.fanin.settle(writes).await {
            match outcome {
                Ok(()) => {
                    log::trace!("{} indexed {}/{}", log_id, bucket, record_key);
                    report.applied += 1;
                }
                Err(e) => {
                    log::error!(
                        "{} failed to write index {}/{} for {}: {} (MANUAL RECOVERY NEEDED)",
                        log_id, bucket, record_key, owner, e
                    );
                    report.failed.push((key.clone(), e.to_string()));
                }
            }
        }
        report
    }

    async fn write_one<'k>(&self, key: &'k IndexKey, owner: &str) -> Applied<'k> {
        let (bucket, record_key) = self.codec.locate(key, owner);
        let outcome = match serde_json::to_value(key.record(owner)) {
            Ok(body) => {
                let options = PutOptions::new().index(VALUE_INDEX, &key.value);
                self.store.put(&bucket, &record_key, &body, &options).await
            }
            Err(e) => Err(StoreError::Serialization(e.to_string())),
        };
        (key, bucket, record_key, outcome)
    }

    /// Deletes one record per key; an already-absent record counts as removed.
    pub async fn remove(&self, log_id: &str, keys: &IndexKeySet, owner: &str) -> IndexReport {
        let deletes: Vec<BoxFuture<'_, Applied<'_>>> =
            keys.iter().map(|key| self.remove_one(key, owner).boxed()).collect();

        let mut report = IndexReport::default();
        for (key, bucket, record_key, outcome) in self.fanin.settle(deletes).await {
            match outcome {
                Ok(()) => report.applied += 1,
                Err(e) if e.is_not_found() => {
                    log::warn!("{} index {}/{} was already gone", log_id, bucket, record_key);
                    report.applied += 1;
                }
                Err(e) => {
                    log::error!(
                        "{} failed to remove index {}/{} for {}: {} (MANUAL RECOVERY NEEDED)",
                        log_id, bucket, record_key, owner, e
                    );
                    report.failed.push((key.clone(), e.to_string()));
                }
            }
        }
        report
    }

    async fn remove_one<'k>(&self, key: &'k IndexKey, owner: &str) -> Applied<'k> {
        let (bucket, record_key) = self.codec.locate(key, owner);
        let outcome = self.store.delete(&bucket, &record_key).await;
        (key, bucket, record_key, outcome)
    }

    /// Owner keys of every record of `attribute` whose value matches `query`.
    /// Records that vanish between the lookup and the fetch are skipped.
    pub async fn lookup(&self, attribute: &str, query: &IndexQuery) -> Result<Vec<String>> {
        let Some(spec) = self.spec(attribute) else {
            return Ok(Vec::new());
        };
        let bucket = self.codec.bucket(&spec.name, spec.unique);
        let record_keys = self.store.find_by_index(&bucket, VALUE_INDEX, query).await?;

        let fetches: Vec<BoxFuture<'_, Result<Option<Value>>>> = record_keys
            .iter()
            .map(|record_key| self.fetch_record(&bucket, record_key).boxed())
            .collect();
        let bodies = self.fanin.all_ordered(fetches).await?;

        let mut seen = BTreeSet::new();
        let mut owners = Vec::new();
        for body in bodies.into_iter().flatten() {
            let record: IndexRecord = serde_json::from_value(body)?;
            if seen.insert(record.owner.clone()) {
                owners.push(record.owner);
            }
        }
        Ok(owners)
    }

    async fn fetch_record(&self, bucket: &str, record_key: &str) -> Result<Option<Value>> {
        match self.store.get(bucket, record_key).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(Error::from(e)),
        }
    }
}

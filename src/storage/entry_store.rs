use std::sync::Arc;
use crate::core::dn::Dn;
use crate::core::error::{Error, Result};
use crate::core::types::Entry;
use crate::kv::client::{IndexQuery, KvStore, PutOptions};

/// Store-level secondary index naming an entry's parent key.
pub const PARENT_INDEX: &str = "_parent";

/// Load/save of canonical entry records in one bucket.
pub struct EntryStore {
    store: Arc<dyn KvStore>,
    pub bucket: String,
}

impl EntryStore {
    pub fn new(store: Arc<dyn KvStore>, bucket: &str) -> Self {
        EntryStore {
            store,
            bucket: bucket.to_string(),
        }
    }

    /// Loads the entry named by `dn`; 404 is `NoSuchObject`.
    pub async fn load(&self, dn: &Dn) -> Result<Entry> {
        self.find(&dn.key())
            .await?
            .ok_or_else(|| Error::no_such_object(dn.to_string()))
    }

    /// Loads by raw key; `None` on 404.
    pub async fn find(&self, key: &str) -> Result<Option<Entry>> {
        match self.store.get(&self.bucket, key).await {
            Ok(body) => Ok(Some(serde_json::from_value(body)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Normalizes and persists `entry` under its DN, tagged with its parent key.
    pub async fn save(&self, entry: &mut Entry) -> Result<()> {
        entry.normalize();
        let dn = entry.parsed_dn()?;
        // canonical form, whatever the caller typed
        entry.dn = dn.key();

        let mut options = PutOptions::new();
        if let Some(parent) = dn.parent() {
            options = options.index(PARENT_INDEX, &parent.key());
        }
        self.put(entry, options).await
    }

    /// Raw put of an already-normalized entry with explicit store indexes.
    pub async fn put(&self, entry: &Entry, options: PutOptions) -> Result<()> {
        let body = serde_json::to_value(entry)?;
        self.store.put(&self.bucket, &entry.dn, &body, &options).await?;
        Ok(())
    }

    pub async fn delete(&self, dn: &Dn) -> Result<()> {
        match self.store.delete(&self.bucket, &dn.key()).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Err(Error::no_such_object(dn.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Every key in the bucket, in store listing order.
    pub async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.store.list_keys(&self.bucket).await?)
    }

    /// Keys of the direct children of `parent`.
    pub async fn child_keys(&self, parent: &Dn) -> Result<Vec<String>> {
        let query = IndexQuery::Exact(parent.key());
        Ok(self.store.find_by_index(&self.bucket, PARENT_INDEX, &query).await?)
    }

    /// Keys whose store-level index `attribute` matches `query`.
    pub async fn find_by_index(&self, attribute: &str, query: &IndexQuery) -> Result<Vec<String>> {
        Ok(self.store.find_by_index(&self.bucket, attribute, query).await?)
    }
}

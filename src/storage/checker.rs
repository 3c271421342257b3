use std::sync::Arc;
use crate::core::dn::Dn;
use crate::core::error::{Error, Result};
use crate::kv::client::KvStore;

/// Read-before-write probes that stand in for the tree constraints the
/// store cannot enforce.
pub struct ExistenceChecker {
    store: Arc<dyn KvStore>,
    bucket: String,
    suffix: Dn,
}

impl ExistenceChecker {
    pub fn new(store: Arc<dyn KvStore>, bucket: &str, suffix: Dn) -> Self {
        ExistenceChecker {
            store,
            bucket: bucket.to_string(),
            suffix,
        }
    }

    /// HEAD probe. Absence is `false`, any other failure an operations error.
    pub async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        match self.store.head(bucket, key).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn entry_exists(&self, dn: &Dn) -> Result<bool> {
        self.exists(&self.bucket, &dn.key()).await
    }

    /// Every entry but the suffix needs an existing immediate parent.
    pub async fn parent_exists(&self, dn: &Dn) -> Result<()> {
        if *dn == self.suffix {
            return Ok(());
        }
        if !self.suffix.is_ancestor_of(dn) {
            return Err(Error::no_such_object(dn.to_string()));
        }

        let parent = dn.parent().unwrap_or_default();
        if self.entry_exists(&parent).await? {
            Ok(())
        } else {
            Err(Error::no_such_object(parent.to_string()))
        }
    }

    /// Number of entries that have `dn` as a proper ancestor, at any depth.
    pub async fn child_count(&self, dn: &Dn) -> Result<usize> {
        let keys = self.store.list_keys(&self.bucket).await?;
        let mut count = 0;
        for key in keys {
            match Dn::parse(&key) {
                Ok(other) if dn.is_ancestor_of(&other) => count += 1,
                Ok(_) => {}
                Err(e) => log::warn!("skipping unparseable key {}: {}", key, e),
            }
        }
        Ok(count)
    }
}

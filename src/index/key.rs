use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};
use crate::core::config::Config;

/// Store-level secondary index carried by every index record.
pub const VALUE_INDEX: &str = "value";

/// One `(attribute, value)` pair implied by an entry's attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexKey {
    pub attribute: String,
    pub value: String,
    pub unique: bool,
}

pub type IndexKeySet = BTreeSet<IndexKey>;

/// Body of an index record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub attribute: String,
    pub value: String,
    pub owner: String,
}

impl IndexKey {
    pub fn new(attribute: &str, value: &str, unique: bool) -> Self {
        IndexKey {
            attribute: attribute.to_lowercase(),
            value: value.to_string(),
            unique,
        }
    }

    pub fn record(&self, owner: &str) -> IndexRecord {
        IndexRecord {
            attribute: self.attribute.clone(),
            value: self.value.clone(),
            owner: owner.to_string(),
        }
    }
}

/// Maps index keys onto buckets and record keys.
///
/// Unique records live at `<unique bucket>_<attr>/<value>` so the record's
/// existence is the uniqueness proof. Non-unique records append the owner,
/// `<index bucket>_<attr>/<value>_<owner>`, so one value can map to many
/// entries.
#[derive(Debug, Clone)]
pub struct IndexKeyCodec {
    pub unique_bucket: String,
    pub index_bucket: String,
}

impl IndexKeyCodec {
    pub fn new(config: &Config) -> Self {
        IndexKeyCodec {
            unique_bucket: config.unique_index_bucket(),
            index_bucket: config.index_bucket(),
        }
    }

    pub fn bucket(&self, attribute: &str, unique: bool) -> String {
        let prefix = if unique { &self.unique_bucket } else { &self.index_bucket };
        format!("{}_{}", prefix, attribute.to_lowercase())
    }

    pub fn record_key(&self, key: &IndexKey, owner: &str) -> String {
        if key.unique {
            key.value.clone()
        } else {
            format!("{}_{}", key.value, owner)
        }
    }

    /// `(bucket, key)` address of the record for `key` owned by `owner`.
    pub fn locate(&self, key: &IndexKey, owner: &str) -> (String, String) {
        (self.bucket(&key.attribute, key.unique), self.record_key(key, owner))
    }
}

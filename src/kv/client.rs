use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Failures reported by a key-value store client.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// 404: the key (or bucket) does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// 409 or 300: conflicting write or unresolved siblings
    #[error("conflict on {0}")]
    Conflict(String),

    #[error("unexpected status {status} from {path}: {message}")]
    Status { status: u16, path: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Lookup against a store-maintained secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexQuery {
    Exact(String),
    /// Inclusive on both ends, byte-wise ordering
    Range(String, String),
}

impl IndexQuery {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            IndexQuery::Exact(v) => v == value,
            IndexQuery::Range(lo, hi) => lo.as_str() <= value && value <= hi.as_str(),
        }
    }
}

/// Secondary index values the store should maintain for a put.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub indexes: Vec<(String, String)>,
}

impl PutOptions {
    pub fn new() -> Self {
        PutOptions { indexes: Vec::new() }
    }

    pub fn index(mut self, attribute: &str, value: &str) -> Self {
        self.indexes.push((attribute.to_lowercase(), value.to_string()));
        self
    }
}

/// The single-key surface the backend needs from its store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Metadata-only existence probe.
    async fn head(&self, bucket: &str, key: &str) -> StoreResult<()>;

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Value>;

    async fn put(&self, bucket: &str, key: &str, value: &Value, options: &PutOptions) -> StoreResult<()>;

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()>;

    async fn list_keys(&self, bucket: &str) -> StoreResult<Vec<String>>;

    /// Keys whose secondary index `attribute` matches `query`.
    async fn find_by_index(&self, bucket: &str, attribute: &str, query: &IndexQuery) -> StoreResult<Vec<String>>;
}

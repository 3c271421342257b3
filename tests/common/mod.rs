#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use Dirkv::core::backend::Backend;
use Dirkv::core::config::{Config, IndexSpec};
use Dirkv::core::types::Attributes;
use Dirkv::kv::client::{IndexQuery, KvStore, PutOptions, StoreError, StoreResult};
use Dirkv::kv::memory::MemoryStore;
use Dirkv::protocol::request::{AddRequest, RequestMeta, Scope, SearchRequest};
use Dirkv::protocol::response::{ChannelSink, Outcome, SearchEntry, SinkMessage};
use Dirkv::query::parser::parse_filter;
use Dirkv::storage::sequence::CounterSequence;

pub const SUFFIX: &str = "o=test";
pub const CONNECTION: &str = "conn-1";

pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

pub fn test_config() -> Config {
    Config {
        suffix: SUFFIX.to_string(),
        bucket: "people".to_string(),
        indexes: vec![
            IndexSpec::unique("uid"),
            IndexSpec::non_unique("cn"),
            IndexSpec::non_unique("l"),
        ],
        ..Config::default()
    }
}

/// Backend over a fresh in-memory store, changelog numbered from 1.
pub fn backend_with(store: Arc<dyn KvStore>, config: Config) -> Backend {
    init_logging();
    Backend::with_store(config, store)
        .expect("valid test config")
        .with_sequence(Arc::new(CounterSequence::default()))
}

pub fn memory_backend() -> (Backend, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (backend_with(store.clone(), test_config()), store)
}

pub fn meta() -> RequestMeta {
    RequestMeta::new(CONNECTION).bound_as("cn=admin, o=test")
}

pub fn sink() -> (Arc<ChannelSink>, UnboundedReceiver<SinkMessage>) {
    let (sink, rx) = ChannelSink::new();
    (Arc::new(sink), rx)
}

pub fn person(cn: &str, uid: &str) -> Attributes {
    Attributes::new()
        .with("objectclass", &["person"])
        .with("cn", &[cn])
        .with("uid", &[uid])
}

pub async fn add(backend: &Backend, dn: &str, attributes: Attributes) -> Outcome {
    let (sink, _rx) = sink();
    let request = AddRequest { meta: meta(), dn: dn.to_string(), attributes };
    backend.add(request, sink).await
}

/// Adds the suffix entry and `ou=people` under it.
pub async fn seed(backend: &Backend) {
    let root = Attributes::new().with("objectclass", &["organization"]).with("o", &["test"]);
    assert!(add(backend, SUFFIX, root).await.is_success());
    let people = Attributes::new().with("objectclass", &["organizationalUnit"]).with("ou", &["people"]);
    assert!(add(backend, "ou=people, o=test", people).await.is_success());
}

/// Runs a search to completion and returns (entries, outcome).
pub async fn search(backend: &Backend, request: SearchRequest) -> (Vec<SearchEntry>, Outcome) {
    let (sink, mut rx) = sink();
    let outcome = backend.search(request, sink).await;
    let (entries, end) = drain(&mut rx);
    assert_eq!(end.map(|o| o.result_code()), Some(outcome.result_code()));
    (entries, outcome)
}

pub fn search_request(base: &str, scope: Scope, filter: &str) -> SearchRequest {
    SearchRequest::new(meta(), base, scope, parse_filter(filter).expect("valid filter"))
}

/// Everything currently buffered on a sink channel.
pub fn drain(rx: &mut UnboundedReceiver<SinkMessage>) -> (Vec<SearchEntry>, Option<Outcome>) {
    let mut entries = Vec::new();
    let mut end = None;
    while let Ok(message) = rx.try_recv() {
        match message {
            SinkMessage::Entry(entry) => entries.push(entry),
            SinkMessage::End(outcome) => end = Some(outcome),
        }
    }
    (entries, end)
}

pub fn dns(entries: &[SearchEntry]) -> Vec<String> {
    entries.iter().map(|e| e.dn.clone()).collect()
}

/// Memory store that fails writes to buckets with a given prefix and can
/// slow down reads.
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub fail_puts_to: Option<String>,
    pub read_delay: Option<Duration>,
}

impl FaultyStore {
    pub fn failing_puts(prefix: &str) -> Self {
        FaultyStore {
            inner: MemoryStore::new(),
            fail_puts_to: Some(prefix.to_string()),
            read_delay: None,
        }
    }

    pub fn slow_reads(delay: Duration) -> Self {
        FaultyStore {
            inner: MemoryStore::new(),
            fail_puts_to: None,
            read_delay: Some(delay),
        }
    }

    async fn pause(&self) {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl KvStore for FaultyStore {
    async fn head(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.inner.head(bucket, key).await
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Value> {
        self.pause().await;
        self.inner.get(bucket, key).await
    }

    async fn put(&self, bucket: &str, key: &str, value: &Value, options: &PutOptions) -> StoreResult<()> {
        if let Some(prefix) = &self.fail_puts_to {
            if bucket.starts_with(prefix.as_str()) {
                return Err(StoreError::Status {
                    status: 503,
                    path: format!("/riak/{}/{}", bucket, key),
                    message: "injected failure".to_string(),
                });
            }
        }
        self.inner.put(bucket, key, value, options).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.inner.delete(bucket, key).await
    }

    async fn list_keys(&self, bucket: &str) -> StoreResult<Vec<String>> {
        self.pause().await;
        self.inner.list_keys(bucket).await
    }

    async fn find_by_index(&self, bucket: &str, attribute: &str, query: &IndexQuery) -> StoreResult<Vec<String>> {
        self.inner.find_by_index(bucket, attribute, query).await
    }
}

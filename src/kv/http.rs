use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use crate::core::config::{CacheConfig, RetryConfig, StoreConfig};
use crate::kv::client::{IndexQuery, KvStore, PutOptions, StoreError, StoreResult};

const CLIENT_ID_HEADER: &str = "x-riak-clientid";
const INDEX_HEADER_PREFIX: &str = "x-riak-index-";

/// Riak-style HTTP client: `/riak/<bucket>/<key>` objects, `?keys=true`
/// listings and `/buckets/<bucket>/index/<attr>_bin/...` secondary indexes.
/// Requests round-robin over the configured endpoints and retry 5xx and
/// transport failures with exponential backoff.
pub struct HttpStore {
    client: Client,
    urls: Vec<Url>,
    next_url: AtomicUsize,
    client_id: String,
    retry: RetryConfig,
    cache: Option<ResponseCache>,
}

/// GET responses kept for at most `age`; writes through this client
/// invalidate their key.
struct ResponseCache {
    entries: Mutex<LruCache<String, (Instant, Value)>>,
    age: Duration,
}

#[derive(Deserialize)]
struct KeyList {
    #[serde(default)]
    keys: Vec<String>,
}

struct RawResponse {
    status: StatusCode,
    body: Vec<u8>,
}

impl ResponseCache {
    fn new(config: &CacheConfig) -> Option<Self> {
        let capacity = NonZeroUsize::new(config.size)?;
        Some(ResponseCache {
            entries: Mutex::new(LruCache::new(capacity)),
            age: Duration::from_secs(config.age_secs),
        })
    }

    fn get(&self, path: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get(path) {
            Some((stored, value)) if stored.elapsed() <= self.age => Some(value.clone()),
            Some(_) => {
                entries.pop(path);
                None
            }
            None => None,
        }
    }

    fn put(&self, path: &str, value: Option<&Value>) {
        let mut entries = self.entries.lock();
        match value {
            Some(value) => {
                entries.put(path.to_string(), (Instant::now(), value.clone()));
            }
            None => {
                entries.pop(path);
            }
        }
    }
}

impl HttpStore {
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        let urls = config
            .urls
            .iter()
            .map(|u| Url::parse(u).map_err(|e| StoreError::InvalidRequest(format!("{}: {}", u, e))))
            .collect::<StoreResult<Vec<_>>>()?;
        if urls.is_empty() {
            return Err(StoreError::InvalidRequest("at least one url required".to_string()));
        }

        let client = Client::builder()
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        Ok(HttpStore {
            client,
            urls,
            next_url: AtomicUsize::new(0),
            client_id: config
                .client_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            retry: config.retry.clone(),
            cache: config.cache.as_ref().and_then(ResponseCache::new),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn object_path(bucket: &str, key: &str) -> String {
        format!("/riak/{}/{}", bucket, key)
    }

    // Picks a new endpoint on every attempt
    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> StoreResult<Url> {
        let index = self.next_url.fetch_add(1, Ordering::Relaxed) % self.urls.len();
        let mut url = self.urls[index].clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| StoreError::InvalidRequest(format!("{} cannot be a base", self.urls[index])))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn request(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        headers: HeaderMap,
        body: Option<Vec<u8>>,
    ) -> StoreResult<RawResponse> {
        let mut attempt = 0;
        loop {
            let url = self.url(segments, query)?;
            log::trace!("{} {} #attempt={}", method, url, attempt);

            let mut builder = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone())
                .header(ACCEPT, "application/json")
                .header(CLIENT_ID_HEADER, self.client_id.as_str());
            if let Some(body) = &body {
                builder = builder.header(CONTENT_TYPE, "application/json").body(body.clone());
            }

            let failure = match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = response
                        .bytes()
                        .await
                        .map_err(|e| StoreError::Transport(e.to_string()))?
                        .to_vec();
                    if !status.is_server_error() {
                        log::trace!("HTTP {} from {}", status, url);
                        return Ok(RawResponse { status, body });
                    }
                    StoreError::Status {
                        status: status.as_u16(),
                        path: url.path().to_string(),
                        message: String::from_utf8_lossy(&body).into_owned(),
                    }
                }
                Err(e) => StoreError::Transport(e.to_string()),
            };

            if attempt >= self.retry.retries {
                return Err(failure);
            }
            let wait = self.retry.backoff(attempt);
            log::debug!("{} {} failed ({}), retrying in {:?}", method, url, failure, wait);
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }

    fn check(response: &RawResponse, path: &str, ok: &[StatusCode]) -> StoreResult<()> {
        if ok.contains(&response.status) {
            return Ok(());
        }
        Err(match response.status {
            StatusCode::NOT_FOUND => StoreError::NotFound(path.to_string()),
            StatusCode::CONFLICT | StatusCode::MULTIPLE_CHOICES => StoreError::Conflict(path.to_string()),
            status => StoreError::Status {
                status: status.as_u16(),
                path: path.to_string(),
                message: String::from_utf8_lossy(&response.body).into_owned(),
            },
        })
    }

    fn index_name(attribute: &str) -> String {
        let attribute = attribute.to_lowercase();
        if attribute.ends_with("_bin") || attribute.ends_with("_int") {
            attribute
        } else {
            format!("{}_bin", attribute)
        }
    }

    fn index_headers(options: &PutOptions) -> StoreResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (attribute, value) in &options.indexes {
            let name = format!("{}{}", INDEX_HEADER_PREFIX, Self::index_name(attribute));
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| StoreError::InvalidRequest(format!("index {}: {}", attribute, e)))?;
            let value = HeaderValue::from_bytes(value.as_bytes())
                .map_err(|e| StoreError::InvalidRequest(format!("index {}={}: {}", attribute, value, e)))?;
            headers.append(name, value);
        }
        Ok(headers)
    }

    fn parse_keys(body: &[u8]) -> StoreResult<Vec<String>> {
        if body.is_empty() {
            return Ok(Vec::new());
        }
        let list: KeyList = serde_json::from_slice(body)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(list.keys)
    }
}

#[async_trait]
impl KvStore for HttpStore {
    async fn head(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let path = Self::object_path(bucket, key);
        let response = self
            .request(Method::HEAD, &["riak", bucket, key], &[], HeaderMap::new(), None)
            .await?;
        Self::check(&response, &path, &[StatusCode::OK])
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Value> {
        let path = Self::object_path(bucket, key);
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(&path)) {
            log::trace!("cache hit {}", path);
            return Ok(cached);
        }

        let response = self
            .request(Method::GET, &["riak", bucket, key], &[], HeaderMap::new(), None)
            .await?;
        Self::check(&response, &path, &[StatusCode::OK])?;

        let value: Value = if response.body.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_slice(&response.body).map_err(|e| StoreError::Serialization(e.to_string()))?
        };
        if let Some(cache) = &self.cache {
            cache.put(&path, Some(&value));
        }
        Ok(value)
    }

    async fn put(&self, bucket: &str, key: &str, value: &Value, options: &PutOptions) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidRequest("key (string) required".to_string()));
        }
        let path = Self::object_path(bucket, key);
        let body = serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let headers = Self::index_headers(options)?;

        // Drop the cached copy before the write goes out
        if let Some(cache) = &self.cache {
            cache.put(&path, None);
        }
        let response = self
            .request(Method::PUT, &["riak", bucket, key], &[("returnbody", "false")], headers, Some(body))
            .await?;
        Self::check(&response, &path, &[StatusCode::OK, StatusCode::CREATED, StatusCode::NO_CONTENT])?;

        if let Some(cache) = &self.cache {
            cache.put(&path, Some(value));
        }
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let path = Self::object_path(bucket, key);
        if let Some(cache) = &self.cache {
            cache.put(&path, None);
        }
        let response = self
            .request(Method::DELETE, &["riak", bucket, key], &[], HeaderMap::new(), None)
            .await?;
        Self::check(&response, &path, &[StatusCode::OK, StatusCode::NO_CONTENT])
    }

    async fn list_keys(&self, bucket: &str) -> StoreResult<Vec<String>> {
        let path = format!("/riak/{}", bucket);
        let response = self
            .request(Method::GET, &["riak", bucket], &[("keys", "true"), ("props", "false")], HeaderMap::new(), None)
            .await?;
        match Self::check(&response, &path, &[StatusCode::OK]) {
            Ok(()) => Self::parse_keys(&response.body),
            // an unknown bucket simply has no keys
            Err(StoreError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn find_by_index(&self, bucket: &str, attribute: &str, query: &IndexQuery) -> StoreResult<Vec<String>> {
        let index = Self::index_name(attribute);
        let mut segments = vec!["buckets", bucket, "index", index.as_str()];
        match query {
            IndexQuery::Exact(value) => segments.push(value),
            IndexQuery::Range(lo, hi) => {
                segments.push(lo);
                segments.push(hi);
            }
        }
        let path = format!("/buckets/{}/index/{}", bucket, index);
        let response = self
            .request(Method::GET, &segments, &[], HeaderMap::new(), None)
            .await?;
        Self::check(&response, &path, &[StatusCode::OK])?;
        Self::parse_keys(&response.body)
    }
}

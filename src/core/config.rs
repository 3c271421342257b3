use std::time::Duration;
use serde::Deserialize;
use crate::core::dn::Dn;
use crate::core::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root DN served by this backend.
    pub suffix: String,

    // Buckets; the index/changelog ones derive from `bucket` when unset
    pub bucket: String,
    pub unique_index_bucket: Option<String>,
    pub index_bucket: Option<String>,
    pub changelog_bucket: Option<String>,

    pub indexes: Vec<IndexSpec>,
    /// Attributes redacted in changelog payloads; the first is checked by bind.
    pub password_attributes: Vec<String>,

    pub default_time_limit_secs: u64,  // 0 = no limit
    pub fanout_concurrency: usize,     // Max in-flight store calls per fan-out

    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn unique(name: &str) -> Self {
        IndexSpec { name: name.to_lowercase(), unique: true }
    }

    pub fn non_unique(name: &str) -> Self {
        IndexSpec { name: name.to_lowercase(), unique: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub urls: Vec<String>,
    pub client_id: Option<String>,
    pub retry: RetryConfig,
    pub cache: Option<CacheConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub retries: u32,
    pub factor: f64,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub size: usize,
    pub age_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            suffix: "o=example".to_string(),
            bucket: "directory".to_string(),
            unique_index_bucket: None,
            index_bucket: None,
            changelog_bucket: None,
            indexes: Vec::new(),
            password_attributes: vec!["userpassword".to_string()],
            default_time_limit_secs: 0,
            fanout_concurrency: 32,
            store: StoreConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            urls: vec!["http://localhost:8098".to_string()],
            client_id: None,
            retry: RetryConfig::default(),
            cache: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            retries: 3,
            factor: 2.0,
            min_timeout_ms: 1000,     // 1s first backoff
            max_timeout_ms: 60_000,   // 60s ceiling
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            size: 1000,
            age_secs: 300,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let millis = self.min_timeout_ms as f64 * self.factor.powi(attempt as i32);
        Duration::from_millis(millis.min(self.max_timeout_ms as f64) as u64)
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| Error::new(ErrorKind::InvalidConfig, e.to_string()))?;
        config.validate()
    }

    /// Checks required fields and lower-cases index and password names.
    pub fn validate(mut self) -> Result<Self> {
        let invalid = |why: String| Error::new(ErrorKind::InvalidConfig, why);

        if self.bucket.trim().is_empty() {
            return Err(invalid("bucket (string) required".to_string()));
        }
        let suffix = Dn::parse(&self.suffix).map_err(|e| invalid(format!("suffix: {}", e.context)))?;
        if suffix.is_root() {
            return Err(invalid("suffix (DN) required".to_string()));
        }
        if self.store.urls.is_empty() {
            return Err(invalid("store.urls must name at least one endpoint".to_string()));
        }
        if self.fanout_concurrency == 0 {
            return Err(invalid("fanout_concurrency must be positive".to_string()));
        }

        for spec in self.indexes.iter_mut() {
            if spec.name.trim().is_empty() {
                return Err(invalid("index names must be non-empty".to_string()));
            }
            spec.name = spec.name.trim().to_lowercase();
        }
        self.indexes.sort_by(|a, b| a.name.cmp(&b.name));
        self.indexes.dedup_by(|a, b| a.name == b.name);

        self.password_attributes = self
            .password_attributes
            .iter()
            .map(|p| p.trim().to_lowercase())
            .collect();

        Ok(self)
    }

    pub fn suffix_dn(&self) -> Result<Dn> {
        Dn::parse(&self.suffix)
    }

    pub fn unique_index_bucket(&self) -> String {
        self.unique_index_bucket
            .clone()
            .unwrap_or_else(|| format!("{}_unique_indexes", self.bucket))
    }

    pub fn index_bucket(&self) -> String {
        self.index_bucket
            .clone()
            .unwrap_or_else(|| format!("{}_indexes", self.bucket))
    }

    pub fn changelog_bucket(&self) -> String {
        self.changelog_bucket
            .clone()
            .unwrap_or_else(|| format!("{}_changelog", self.bucket))
    }

    pub fn default_time_limit(&self) -> Option<Duration> {
        match self.default_time_limit_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_from_json_and_normalizes() {
        let config = Config::from_json(r#"{
            "suffix": "o=test",
            "bucket": "people",
            "indexes": [{"name": "UID", "unique": true}, {"name": "l"}],
            "store": {"urls": ["http://riak:8098"], "cache": {"size": 10}}
        }"#).unwrap();

        assert_eq!(config.indexes, vec![IndexSpec::non_unique("l"), IndexSpec::unique("uid")]);
        assert_eq!(config.unique_index_bucket(), "people_unique_indexes");
        assert_eq!(config.changelog_bucket(), "people_changelog");
        assert_eq!(config.store.cache.unwrap().age_secs, 300);
        assert_eq!(config.store.retry.retries, 3);
    }

    #[test]
    fn rejects_missing_bucket_and_suffix() {
        assert!(Config::from_json(r#"{"bucket": ""}"#).is_err());
        assert!(Config::from_json(r#"{"suffix": ""}"#).is_err());
        assert!(Config::from_json(r#"{"suffix": "o=x", "store": {"urls": []}}"#).is_err());
    }

    #[test]
    fn backoff_is_capped() {
        let retry = RetryConfig { retries: 5, factor: 2.0, min_timeout_ms: 500, max_timeout_ms: 3000 };
        assert_eq!(retry.backoff(0), Duration::from_millis(500));
        assert_eq!(retry.backoff(2), Duration::from_millis(2000));
        assert_eq!(retry.backoff(4), Duration::from_millis(3000));
    }
}

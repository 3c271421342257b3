use std::sync::Arc;
use chrono::Utc;
use crate::core::config::Config;
use crate::core::dn::Dn;
use crate::core::error::Result;
use crate::core::types::Entry;
use crate::index::fanin::FanIn;
use crate::index::maintainer::IndexMaintainer;
use crate::kv::client::KvStore;
use crate::kv::http::HttpStore;
use crate::pipeline::{add, bind, compare, delete, moddn, modify, search};
use crate::protocol::request::{
    AddRequest, BindRequest, CompareRequest, DeleteRequest, ModifyDnRequest, ModifyRequest, RequestMeta,
    SearchRequest,
};
use crate::protocol::response::{Outcome, ResponseSink};
use crate::psearch::registry::{Mutation, PersistentSearchRegistry};
use crate::storage::changelog::{ChangeRecord, ChangeType, ChangelogWriter};
use crate::storage::checker::ExistenceChecker;
use crate::storage::entry_store::EntryStore;
use crate::storage::sequence::{MonotonicClockSequence, SequenceSource};

/// Directory backend over a key-value store.
///
/// Every operation runs its pipeline, then reports exactly one outcome to
/// the sink (registered persistent searches excepted) and returns it.
pub struct Backend {
    pub config: Config,
    pub suffix: Dn,

    store: Arc<dyn KvStore>,
    pub(crate) entries: EntryStore,
    pub(crate) changelog_entries: EntryStore,
    pub(crate) checker: ExistenceChecker,
    pub(crate) indexes: IndexMaintainer,
    pub(crate) changelog: ChangelogWriter,
    pub(crate) registry: Arc<PersistentSearchRegistry>,
    pub(crate) fanin: FanIn,
}

impl Backend {
    /// Backend over the configured HTTP store.
    pub fn open(config: Config) -> Result<Self> {
        let store = HttpStore::new(&config.store)?;
        Self::with_store(config, Arc::new(store))
    }

    /// Backend over any store implementation.
    pub fn with_store(config: Config, store: Arc<dyn KvStore>) -> Result<Self> {
        let config = config.validate()?;
        let suffix = config.suffix_dn()?;

        log::info!(
            "directory backend for {} on bucket {} ({} indexed attributes)",
            suffix, config.bucket, config.indexes.len()
        );

        Ok(Backend {
            entries: EntryStore::new(store.clone(), &config.bucket),
            changelog_entries: EntryStore::new(store.clone(), &config.changelog_bucket()),
            checker: ExistenceChecker::new(store.clone(), &config.bucket, suffix.clone()),
            indexes: IndexMaintainer::new(store.clone(), &config),
            changelog: ChangelogWriter::new(store.clone(), &config, Arc::new(MonotonicClockSequence::new())),
            registry: Arc::new(PersistentSearchRegistry::new()),
            fanin: FanIn::new(config.fanout_concurrency),
            store,
            suffix,
            config,
        })
    }

    /// Replaces the changelog number source.
    pub fn with_sequence(mut self, sequence: Arc<dyn SequenceSource>) -> Self {
        self.changelog = ChangelogWriter::new(self.store.clone(), &self.config, sequence);
        self
    }

    /// Shares a subscription registry, e.g. between backends of one server.
    pub fn with_registry(mut self, registry: Arc<PersistentSearchRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<PersistentSearchRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Loads one entry straight from the store.
    pub async fn load(&self, dn: &str) -> Result<Entry> {
        self.entries.load(&Dn::parse(dn)?).await
    }

    /// Connection closed: drop its persistent searches.
    pub fn disconnect(&self, connection_id: &str) -> usize {
        self.registry.deregister(connection_id)
    }

    pub async fn add(&self, request: AddRequest, sink: Arc<dyn ResponseSink>) -> Outcome {
        let log_id = request.meta.log_id.clone();
        log::debug!("{} add {}", log_id, request.dn);
        let result = match add::AddContext::new(request) {
            Ok(mut ctx) => add::pipeline().run(self, &log_id, &mut ctx).await,
            Err(e) => Err(e),
        };
        Self::finish(sink, result.into())
    }

    pub async fn delete(&self, request: DeleteRequest, sink: Arc<dyn ResponseSink>) -> Outcome {
        let log_id = request.meta.log_id.clone();
        log::debug!("{} delete {}", log_id, request.dn);
        let result = match delete::DeleteContext::new(request) {
            Ok(mut ctx) => delete::pipeline().run(self, &log_id, &mut ctx).await,
            Err(e) => Err(e),
        };
        Self::finish(sink, result.into())
    }

    pub async fn modify(&self, request: ModifyRequest, sink: Arc<dyn ResponseSink>) -> Outcome {
        let log_id = request.meta.log_id.clone();
        log::debug!("{} modify {} ({} changes)", log_id, request.dn, request.changes.len());
        let result = match modify::ModifyContext::new(request) {
            Ok(mut ctx) => modify::pipeline().run(self, &log_id, &mut ctx).await,
            Err(e) => Err(e),
        };
        Self::finish(sink, result.into())
    }

    pub async fn modify_dn(&self, request: ModifyDnRequest, sink: Arc<dyn ResponseSink>) -> Outcome {
        let log_id = request.meta.log_id.clone();
        log::debug!("{} modifyDN {} to {}", log_id, request.dn, request.new_rdn);
        let result = match moddn::ModifyDnContext::new(request) {
            Ok(mut ctx) => moddn::pipeline().run(self, &log_id, &mut ctx).await,
            Err(e) => Err(e),
        };
        Self::finish(sink, result.into())
    }

    pub async fn compare(&self, request: CompareRequest, sink: Arc<dyn ResponseSink>) -> Outcome {
        let log_id = request.meta.log_id.clone();
        log::debug!("{} compare {} {}", log_id, request.dn, request.attribute);
        let outcome = match compare::CompareContext::new(request) {
            Ok(mut ctx) => match compare::pipeline().run(self, &log_id, &mut ctx).await {
                Ok(()) => Outcome::Compare(ctx.matched),
                Err(e) => Outcome::Failed(e),
            },
            Err(e) => Outcome::Failed(e),
        };
        Self::finish(sink, outcome)
    }

    pub async fn bind(&self, request: BindRequest, sink: Arc<dyn ResponseSink>) -> Outcome {
        let log_id = request.meta.log_id.clone();
        log::debug!("{} bind {}", log_id, request.dn);
        let result = match bind::BindContext::new(request) {
            Ok(mut ctx) => bind::pipeline().run(self, &log_id, &mut ctx).await,
            Err(e) => Err(e),
        };
        Self::finish(sink, result.into())
    }

    /// Runs a search. A registered persistent search never ends: the sink
    /// keeps receiving notifications until the connection goes away.
    pub async fn search(&self, request: SearchRequest, sink: Arc<dyn ResponseSink>) -> Outcome {
        let log_id = request.meta.log_id.clone();
        log::debug!("{} search {} {:?} {}", log_id, request.base, request.scope, request.filter);
        let mut ctx = match search::SearchContext::new(request, sink.clone()) {
            Ok(ctx) => ctx,
            Err(e) => return Self::finish(sink, Outcome::Failed(e)),
        };

        let result = search::pipeline().run(self, &log_id, &mut ctx).await;
        match (result, ctx.subscription) {
            (Ok(()), Some(id)) => {
                log::debug!("{} persistent search #{} stays open", log_id, id);
                Outcome::Success
            }
            (Err(e), Some(id)) => {
                self.registry.cancel(id);
                Self::finish(sink, Outcome::Failed(e))
            }
            (result, None) => Self::finish(sink, result.into()),
        }
    }

    fn finish(sink: Arc<dyn ResponseSink>, outcome: Outcome) -> Outcome {
        sink.end(outcome.clone());
        outcome
    }

    /// Operational metadata for a write by `meta`.
    pub(crate) fn stamp(entry: &mut Entry, meta: &RequestMeta) {
        entry.stamp(&meta.bind_dn, &meta.log_id, Utc::now());
    }

    /// Fans a committed mutation out to subscribers. Never fails the request.
    pub(crate) fn notify(
        &self,
        log_id: &str,
        change_type: ChangeType,
        entry: &Entry,
        previous_dn: Option<&Dn>,
        record: &ChangeRecord,
    ) {
        let mutation = Mutation { change_type, entry, previous_dn, record };
        if let Err(e) = self.registry.notify(log_id, &mutation) {
            log::error!("{} persistent search notification failed: {}", log_id, e);
        }
    }
}

use std::sync::Arc;
use std::time::Duration;
use futures::future::{BoxFuture, FutureExt};
use crate::core::backend::Backend;
use crate::core::dn::Dn;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Entry;
use crate::pipeline::driver::{Flow, Pipeline};
use crate::protocol::request::{Scope, SearchRequest};
use crate::protocol::response::{ResponseSink, SearchEntry};
use crate::psearch::registry::Subscription;
use crate::query::planner::QueryPlanner;
use crate::storage::changelog::{changelog_root, is_changelog_dn, CHANGELOG_INDEXES};
use crate::storage::entry_store::EntryStore;

pub struct SearchContext {
    pub request: SearchRequest,
    pub base: Dn,
    pub sink: Arc<dyn ResponseSink>,
    /// Hidden-attributes control present
    pub show_operational: bool,
    pub sent: usize,
    /// Registry id once registered as a persistent search
    pub subscription: Option<u64>,
}

impl SearchContext {
    pub fn new(request: SearchRequest, sink: Arc<dyn ResponseSink>) -> Result<Self> {
        let base = Dn::parse(&request.base)?;
        let show_operational = request.meta.shows_operational();
        Ok(SearchContext {
            request,
            base,
            sink,
            show_operational,
            sent: 0,
            subscription: None,
        })
    }

    fn in_scope(&self, dn: &Dn) -> bool {
        match self.request.scope {
            Scope::Base => self.base == *dn,
            Scope::One => self.base.is_parent_of(dn),
            Scope::Sub => self.base.contains(dn),
        }
    }

    fn emit(&mut self, entry: Entry) -> Result<()> {
        let limit = self.request.size_limit;
        if limit > 0 && self.sent >= limit {
            return Err(Error::new(
                ErrorKind::SizeLimitExceeded,
                format!("more than {} entries match", limit),
            ));
        }
        let result = SearchEntry {
            dn: entry.dn,
            attributes: entry.attributes,
            change: None,
        };
        self.sink.send(result, !self.show_operational)?;
        self.sent += 1;
        Ok(())
    }

    fn time_limit(&self, backend: &Backend) -> Option<Duration> {
        match self.request.time_limit {
            0 => backend.config.default_time_limit(),
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

pub fn pipeline() -> Pipeline<SearchContext> {
    Pipeline::new("search")
        .step("register_persistent", register_persistent)
        .step("execute", execute)
}

fn register_persistent<'a>(backend: &'a Backend, ctx: &'a mut SearchContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let Some(control) = ctx.request.meta.persistent_search().copied() else {
            return Ok(Flow::Continue);
        };

        // without initial results nothing else would notice a missing base
        if control.changes_only && !base_exists(backend, &ctx.base).await? {
            return Err(Error::no_such_object(ctx.base.to_string()));
        }

        let id = backend.registry.register(Subscription {
            id: 0,
            connection_id: ctx.request.meta.connection_id.clone(),
            base: ctx.base.clone(),
            scope: ctx.request.scope,
            filter: ctx.request.filter.clone(),
            control,
            show_operational: ctx.show_operational,
            sink: ctx.sink.clone(),
        });
        ctx.subscription = Some(id);

        if control.changes_only {
            log::debug!("{} persistent search #{} skips initial results", ctx.request.meta.log_id, id);
            return Ok(Flow::Done);
        }
        Ok(Flow::Continue)
    }
    .boxed()
}

fn execute<'a>(backend: &'a Backend, ctx: &'a mut SearchContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        match ctx.time_limit(backend) {
            Some(limit) => match tokio::time::timeout(limit, run(backend, ctx)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Error::new(
                        ErrorKind::TimeLimitExceeded,
                        format!("search exceeded {}s", limit.as_secs()),
                    ));
                }
            },
            None => run(backend, ctx).await?,
        }
        log::debug!("{} search returned {} entries", ctx.request.meta.log_id, ctx.sent);
        Ok(Flow::Continue)
    }
    .boxed()
}

async fn run(backend: &Backend, ctx: &mut SearchContext) -> Result<()> {
    let changelog = is_changelog_dn(&ctx.base);
    let entries = if changelog { &backend.changelog_entries } else { &backend.entries };

    if ctx.request.scope == Scope::Base {
        let Some(entry) = entries.find(&ctx.base.key()).await? else {
            return Err(Error::no_such_object(ctx.base.to_string()));
        };
        if ctx.request.filter.matches(&entry.attributes) {
            ctx.emit(entry)?;
        }
        return Ok(());
    }

    if !base_exists(backend, &ctx.base).await? {
        return Err(Error::no_such_object(ctx.base.to_string()));
    }

    let (keys, ordered) = candidate_keys(backend, ctx, entries, changelog).await?;
    let keys: Vec<String> = keys
        .into_iter()
        .filter(|key| match Dn::parse(key) {
            Ok(dn) => ctx.in_scope(&dn),
            Err(e) => {
                log::warn!("{} skipping unparseable key {}: {}", ctx.request.meta.log_id, key, e);
                false
            }
        })
        .collect();
    log::trace!("{} {} candidates under {}", ctx.request.meta.log_id, keys.len(), ctx.base);

    let fetches: Vec<BoxFuture<'_, Result<Option<Entry>>>> =
        keys.iter().map(|key| entries.find(key).boxed()).collect();
    let found = if ordered {
        backend.fanin.all_ordered(fetches).await?
    } else {
        backend.fanin.all(fetches).await?
    };

    let mut matches: Vec<Entry> = found
        .into_iter()
        .flatten()
        .filter(|entry| ctx.request.filter.matches(&entry.attributes))
        .collect();
    if changelog {
        matches.sort_by_key(change_number);
    }

    for entry in matches {
        ctx.emit(entry)?;
    }
    Ok(())
}

async fn base_exists(backend: &Backend, base: &Dn) -> Result<bool> {
    if !is_changelog_dn(base) {
        return backend.checker.exists(&backend.entries.bucket, &base.key()).await;
    }
    // the changelog root is virtual
    if *base == changelog_root() {
        return Ok(true);
    }
    backend.checker.exists(&backend.changelog_entries.bucket, &base.key()).await
}

/// Candidate keys, and whether their order is the store's listing order.
async fn candidate_keys(
    backend: &Backend,
    ctx: &SearchContext,
    entries: &EntryStore,
    changelog: bool,
) -> Result<(Vec<String>, bool)> {
    if ctx.request.scope == Scope::One && !changelog {
        return Ok((entries.child_keys(&ctx.base).await?, true));
    }

    if changelog {
        let indexed: Vec<String> = CHANGELOG_INDEXES.iter().map(|name| name.to_string()).collect();
        if let Some(plan) = QueryPlanner::new(&indexed).plan(&ctx.request.filter) {
            log::trace!("{} changelog narrowed on {}", ctx.request.meta.log_id, plan.attribute);
            return Ok((entries.find_by_index(&plan.attribute, &plan.query).await?, false));
        }
    } else {
        let indexed = backend.indexes.indexed_attributes();
        if let Some(plan) = QueryPlanner::new(&indexed).plan(&ctx.request.filter) {
            log::trace!("{} narrowed on {}", ctx.request.meta.log_id, plan.attribute);
            return Ok((backend.indexes.lookup(&plan.attribute, &plan.query).await?, false));
        }
    }

    Ok((entries.keys().await?, true))
}

fn change_number(entry: &Entry) -> u64 {
    entry
        .attributes
        .get("changenumber")
        .and_then(|values| values.first())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

use futures::future::{BoxFuture, FutureExt};
use crate::core::backend::Backend;
use crate::core::dn::Dn;
use crate::core::error::{Error, Result};
use crate::core::types::Entry;
use crate::index::key::IndexKeySet;
use crate::pipeline::driver::{Flow, Pipeline};
use crate::protocol::request::AddRequest;
use crate::storage::changelog::{ChangePayload, ChangeRecord, ChangeType};

pub struct AddContext {
    pub request: AddRequest,
    pub dn: Dn,
    pub entry: Entry,
    pub keys: IndexKeySet,
    pub record: Option<ChangeRecord>,
}

impl AddContext {
    pub fn new(request: AddRequest) -> Result<Self> {
        let dn = Dn::parse(&request.dn)?;
        // clients never supply operational attributes
        let entry = Entry::new(&dn, request.attributes.without_operational());
        Ok(AddContext {
            request,
            dn,
            entry,
            keys: IndexKeySet::new(),
            record: None,
        })
    }
}

pub fn pipeline() -> Pipeline<AddContext> {
    Pipeline::new("add")
        .step("check_not_exists", check_not_exists)
        .step("parent_exists", parent_exists)
        .step("assign_operational", assign_operational)
        .step("build_index_keys", build_index_keys)
        .step("check_unique", check_unique)
        .step("persist", persist)
        .step("write_indexes", write_indexes)
        .step("changelog", changelog)
        .step("notify", notify)
}

fn check_not_exists<'a>(backend: &'a Backend, ctx: &'a mut AddContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        if backend.checker.entry_exists(&ctx.dn).await? {
            return Err(Error::already_exists(ctx.dn.to_string()));
        }
        Ok(Flow::Continue)
    }
    .boxed()
}

fn parent_exists<'a>(backend: &'a Backend, ctx: &'a mut AddContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        backend.checker.parent_exists(&ctx.dn).await?;
        Ok(Flow::Continue)
    }
    .boxed()
}

fn assign_operational<'a>(_backend: &'a Backend, ctx: &'a mut AddContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        Backend::stamp(&mut ctx.entry, &ctx.request.meta);
        ctx.entry.normalize();
        Ok(Flow::Continue)
    }
    .boxed()
}

fn build_index_keys<'a>(backend: &'a Backend, ctx: &'a mut AddContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        ctx.keys = backend.indexes.build_index_keys(&ctx.entry.attributes);
        log::trace!("{} {} index keys", ctx.request.meta.log_id, ctx.keys.len());
        Ok(Flow::Continue)
    }
    .boxed()
}

fn check_unique<'a>(backend: &'a Backend, ctx: &'a mut AddContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        backend.indexes.check_unique(&ctx.request.meta.log_id, &ctx.keys).await?;
        Ok(Flow::Continue)
    }
    .boxed()
}

fn persist<'a>(backend: &'a Backend, ctx: &'a mut AddContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        backend.entries.save(&mut ctx.entry).await?;
        log::debug!("{} added {}", ctx.request.meta.log_id, ctx.entry.dn);
        Ok(Flow::Continue)
    }
    .boxed()
}

fn write_indexes<'a>(backend: &'a Backend, ctx: &'a mut AddContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        backend.indexes.write(&ctx.request.meta.log_id, &ctx.keys, &ctx.entry.dn).await;
        Ok(Flow::Continue)
    }
    .boxed()
}

fn changelog<'a>(backend: &'a Backend, ctx: &'a mut AddContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let payload = ChangePayload::Entry(ctx.entry.attributes.clone());
        let record = backend
            .changelog
            .append(&ctx.request.meta.log_id, &ctx.dn, ChangeType::Add, payload)
            .await?;
        ctx.record = Some(record);
        Ok(Flow::Continue)
    }
    .boxed()
}

fn notify<'a>(backend: &'a Backend, ctx: &'a mut AddContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        if let Some(record) = &ctx.record {
            backend.notify(&ctx.request.meta.log_id, ChangeType::Add, &ctx.entry, None, record);
        }
        Ok(Flow::Continue)
    }
    .boxed()
}

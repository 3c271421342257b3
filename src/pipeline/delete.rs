use futures::future::{BoxFuture, FutureExt};
use crate::core::backend::Backend;
use crate::core::dn::Dn;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Entry;
use crate::index::key::IndexKeySet;
use crate::pipeline::driver::{Flow, Pipeline};
use crate::protocol::request::DeleteRequest;
use crate::storage::changelog::{ChangePayload, ChangeRecord, ChangeType};

pub struct DeleteContext {
    pub request: DeleteRequest,
    pub dn: Dn,
    /// Snapshot taken before the delete
    pub entry: Option<Entry>,
    pub keys: IndexKeySet,
    pub record: Option<ChangeRecord>,
}

impl DeleteContext {
    pub fn new(request: DeleteRequest) -> Result<Self> {
        let dn = Dn::parse(&request.dn)?;
        Ok(DeleteContext {
            request,
            dn,
            entry: None,
            keys: IndexKeySet::new(),
            record: None,
        })
    }

    fn snapshot(&self) -> Result<&Entry> {
        self.entry
            .as_ref()
            .ok_or_else(|| Error::no_such_object(self.dn.to_string()))
    }
}

pub fn pipeline() -> Pipeline<DeleteContext> {
    Pipeline::new("delete")
        .step("load", load)
        .step("check_leaf", check_leaf)
        .step("changelog", changelog)
        .step("delete_entry", delete_entry)
        .step("build_index_keys", build_index_keys)
        .step("remove_indexes", remove_indexes)
        .step("notify", notify)
}

fn load<'a>(backend: &'a Backend, ctx: &'a mut DeleteContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        ctx.entry = Some(backend.entries.load(&ctx.dn).await?);
        Ok(Flow::Continue)
    }
    .boxed()
}

fn check_leaf<'a>(backend: &'a Backend, ctx: &'a mut DeleteContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let children = backend.checker.child_count(&ctx.dn).await?;
        if children > 0 {
            return Err(Error::new(
                ErrorKind::NotAllowedOnNonLeaf,
                format!("{} has {} descendants", ctx.dn, children),
            ));
        }
        Ok(Flow::Continue)
    }
    .boxed()
}

fn changelog<'a>(backend: &'a Backend, ctx: &'a mut DeleteContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let payload = ChangePayload::Entry(ctx.snapshot()?.attributes.clone());
        let record = backend
            .changelog
            .append(&ctx.request.meta.log_id, &ctx.dn, ChangeType::Delete, payload)
            .await?;
        ctx.record = Some(record);
        Ok(Flow::Continue)
    }
    .boxed()
}

fn delete_entry<'a>(backend: &'a Backend, ctx: &'a mut DeleteContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        backend.entries.delete(&ctx.dn).await?;
        log::debug!("{} removed {}", ctx.request.meta.log_id, ctx.dn);
        Ok(Flow::Continue)
    }
    .boxed()
}

fn build_index_keys<'a>(backend: &'a Backend, ctx: &'a mut DeleteContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        ctx.keys = backend.indexes.build_index_keys(&ctx.snapshot()?.attributes);
        Ok(Flow::Continue)
    }
    .boxed()
}

fn remove_indexes<'a>(backend: &'a Backend, ctx: &'a mut DeleteContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        backend.indexes.remove(&ctx.request.meta.log_id, &ctx.keys, &ctx.dn.key()).await;
        Ok(Flow::Continue)
    }
    .boxed()
}

fn notify<'a>(backend: &'a Backend, ctx: &'a mut DeleteContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        if let (Some(entry), Some(record)) = (&ctx.entry, &ctx.record) {
            backend.notify(&ctx.request.meta.log_id, ChangeType::Delete, entry, None, record);
        }
        Ok(Flow::Continue)
    }
    .boxed()
}

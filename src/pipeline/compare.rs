use futures::future::{BoxFuture, FutureExt};
use crate::core::backend::Backend;
use crate::core::dn::Dn;
use crate::core::error::{Error, Result};
use crate::pipeline::driver::{Flow, Pipeline};
use crate::protocol::request::CompareRequest;

pub struct CompareContext {
    pub request: CompareRequest,
    pub dn: Dn,
    pub matched: bool,
}

impl CompareContext {
    pub fn new(request: CompareRequest) -> Result<Self> {
        let dn = Dn::parse(&request.dn)?;
        Ok(CompareContext { request, dn, matched: false })
    }
}

pub fn pipeline() -> Pipeline<CompareContext> {
    Pipeline::new("compare").step("compare", compare)
}

// Exact membership of the asserted value, case included
fn compare<'a>(backend: &'a Backend, ctx: &'a mut CompareContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let entry = backend.entries.load(&ctx.dn).await?;
        let Some(values) = entry.attributes.get(&ctx.request.attribute) else {
            return Err(Error::no_such_attribute(ctx.request.attribute.clone()));
        };
        ctx.matched = values.iter().any(|v| *v == ctx.request.value);
        Ok(Flow::Done)
    }
    .boxed()
}

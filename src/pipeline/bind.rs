use futures::future::{BoxFuture, FutureExt};
use crate::core::backend::Backend;
use crate::core::dn::Dn;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Entry;
use crate::pipeline::driver::{Flow, Pipeline};
use crate::protocol::request::BindRequest;

const DEFAULT_PASSWORD_ATTRIBUTE: &str = "userpassword";

pub struct BindContext {
    pub request: BindRequest,
    pub dn: Dn,
    pub entry: Option<Entry>,
}

impl BindContext {
    pub fn new(request: BindRequest) -> Result<Self> {
        let dn = Dn::parse(&request.dn)?;
        Ok(BindContext { request, dn, entry: None })
    }
}

pub fn pipeline() -> Pipeline<BindContext> {
    Pipeline::new("bind")
        .step("check_version", check_version)
        .step("load", load)
        .step("check_credentials", check_credentials)
}

fn check_version<'a>(_backend: &'a Backend, ctx: &'a mut BindContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        if ctx.request.version != 3 {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                format!("unsupported protocol version {}", ctx.request.version),
            ));
        }
        if !ctx.request.authentication.eq_ignore_ascii_case("simple") {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                format!("unsupported authentication {}", ctx.request.authentication),
            ));
        }
        Ok(Flow::Continue)
    }
    .boxed()
}

fn load<'a>(backend: &'a Backend, ctx: &'a mut BindContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        ctx.entry = Some(backend.entries.load(&ctx.dn).await?);
        Ok(Flow::Continue)
    }
    .boxed()
}

fn check_credentials<'a>(backend: &'a Backend, ctx: &'a mut BindContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let attribute = backend
            .config
            .password_attributes
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_PASSWORD_ATTRIBUTE);
        let entry = ctx.entry.as_ref().ok_or_else(|| Error::no_such_object(ctx.dn.to_string()))?;

        let Some(stored) = entry.attributes.get(attribute) else {
            return Err(Error::no_such_attribute(attribute));
        };
        if !stored.iter().any(|v| *v == ctx.request.credentials) {
            return Err(Error::new(ErrorKind::InvalidCredentials, ctx.dn.to_string()));
        }
        log::debug!("{} bound as {}", ctx.request.meta.log_id, ctx.dn);
        Ok(Flow::Done)
    }
    .boxed()
}

use futures::future::{BoxFuture, FutureExt};
use crate::core::backend::Backend;
use crate::core::dn::{Dn, Rdn};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Entry;
use crate::index::key::IndexKeySet;
use crate::pipeline::driver::{Flow, Pipeline};
use crate::protocol::request::ModifyDnRequest;
use crate::storage::changelog::{ChangePayload, ChangeRecord, ChangeType};

pub struct ModifyDnContext {
    pub request: ModifyDnRequest,
    pub dn: Dn,
    pub new_rdn: Rdn,
    pub new_superior: Option<Dn>,
    pub new_dn: Dn,
    pub entry: Option<Entry>,
    pub old_keys: IndexKeySet,
    pub new_keys: IndexKeySet,
    pub record: Option<ChangeRecord>,
}

impl ModifyDnContext {
    pub fn new(request: ModifyDnRequest) -> Result<Self> {
        let dn = Dn::parse(&request.dn)?;
        let new_rdn = Rdn::parse(&request.new_rdn)?;
        let new_superior = match &request.new_superior {
            Some(superior) => Some(Dn::parse(superior)?),
            None => None,
        };
        Ok(ModifyDnContext {
            request,
            dn,
            new_rdn,
            new_superior,
            new_dn: Dn::root(),
            entry: None,
            old_keys: IndexKeySet::new(),
            new_keys: IndexKeySet::new(),
            record: None,
        })
    }

    fn entry(&self) -> Result<&Entry> {
        self.entry.as_ref().ok_or_else(|| Error::no_such_object(self.dn.to_string()))
    }
}

pub fn pipeline() -> Pipeline<ModifyDnContext> {
    Pipeline::new("modifyDN")
        .step("require_delete_old_rdn", require_delete_old_rdn)
        .step("load", load)
        .step("check_leaf", check_leaf)
        .step("new_superior_exists", new_superior_exists)
        .step("compute_new_dn", compute_new_dn)
        .step("check_placement", check_placement)
        .step("check_new_dn_free", check_new_dn_free)
        .step("rewrite_attributes", rewrite_attributes)
        .step("build_index_keys", build_index_keys)
        .step("check_unique", check_unique)
        .step("changelog", changelog)
        .step("remove_old_indexes", remove_old_indexes)
        .step("delete_old_entry", delete_old_entry)
        .step("persist", persist)
        .step("write_indexes", write_indexes)
        .step("notify", notify)
}

fn require_delete_old_rdn<'a>(_backend: &'a Backend, ctx: &'a mut ModifyDnContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        if !ctx.request.delete_old_rdn {
            return Err(Error::new(ErrorKind::UnwillingToPerform, "must delete old rdn".to_string()));
        }
        Ok(Flow::Continue)
    }
    .boxed()
}

fn load<'a>(backend: &'a Backend, ctx: &'a mut ModifyDnContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let entry = backend.entries.load(&ctx.dn).await?;
        ctx.old_keys = backend.indexes.build_index_keys(&entry.attributes);
        ctx.entry = Some(entry);
        Ok(Flow::Continue)
    }
    .boxed()
}

fn check_leaf<'a>(backend: &'a Backend, ctx: &'a mut ModifyDnContext) -> BoxFuture<'a, Result<Flow>> {
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

fn new_superior_exists<'a>(backend: &'a Backend, ctx: &'a mut ModifyDnContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        if let Some(superior) = &ctx.new_superior {
            if !backend.checker.entry_exists(superior).await? {
                return Err(Error::no_such_object(superior.to_string()));
            }
        }
        Ok(Flow::Continue)
    }
    .boxed()
}

fn compute_new_dn<'a>(_backend: &'a Backend, ctx: &'a mut ModifyDnContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let parent = match &ctx.new_superior {
            Some(superior) => superior.clone(),
            None => ctx.dn.parent().unwrap_or_default(),
        };
        ctx.new_dn = parent.child(ctx.new_rdn.clone());
        log::debug!("{} renaming {} to {}", ctx.request.meta.log_id, ctx.dn, ctx.new_dn);
        Ok(Flow::Continue)
    }
    .boxed()
}

/// The suffix stays put, an entry never moves below itself, and the new
/// name stays inside the suffix.
fn check_placement<'a>(backend: &'a Backend, ctx: &'a mut ModifyDnContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let unwilling = |why: String| -> Result<Flow> { Err(Error::new(ErrorKind::UnwillingToPerform, why)) };
        if ctx.dn == backend.suffix {
            return unwilling(format!("cannot rename the suffix {}", ctx.dn));
        }
        if let Some(superior) = &ctx.new_superior {
            if ctx.dn.contains(superior) {
                return unwilling(format!("cannot move {} below itself", ctx.dn));
            }
        }
        if !backend.suffix.is_ancestor_of(&ctx.new_dn) {
            return unwilling(format!("{} is outside {}", ctx.new_dn, backend.suffix));
        }
        Ok(Flow::Continue)
    }
    .boxed()
}

fn check_new_dn_free<'a>(backend: &'a Backend, ctx: &'a mut ModifyDnContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        if backend.checker.entry_exists(&ctx.new_dn).await? {
            return Err(Error::already_exists(ctx.new_dn.to_string()));
        }
        Ok(Flow::Continue)
    }
    .boxed()
}

fn rewrite_attributes<'a>(_backend: &'a Backend, ctx: &'a mut ModifyDnContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let old_rdn = ctx.dn.rdn().cloned().unwrap_or_default();
        let new_rdn = ctx.new_rdn.clone();
        let new_dn = ctx.new_dn.clone();
        let meta = ctx.request.meta.clone();
        let entry = ctx
            .entry
            .as_mut()
            .ok_or_else(|| Error::no_such_object(new_dn.to_string()))?;

        for (attribute, value) in &old_rdn.pairs {
            entry.attributes.remove_values(attribute, &[value.clone()]);
        }
        for (attribute, value) in &new_rdn.pairs {
            entry.attributes.add_values(attribute, [value.clone()]);
        }
        entry.dn = new_dn.key();
        Backend::stamp(entry, &meta);
        Ok(Flow::Continue)
    }
    .boxed()
}

fn build_index_keys<'a>(backend: &'a Backend, ctx: &'a mut ModifyDnContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        ctx.new_keys = backend.indexes.build_index_keys(&ctx.entry()?.attributes);
        Ok(Flow::Continue)
    }
    .boxed()
}

fn check_unique<'a>(backend: &'a Backend, ctx: &'a mut ModifyDnContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let fresh: IndexKeySet = ctx.new_keys.difference(&ctx.old_keys).cloned().collect();
        backend.indexes.check_unique(&ctx.request.meta.log_id, &fresh).await?;
        Ok(Flow::Continue)
    }
    .boxed()
}

fn changelog<'a>(backend: &'a Backend, ctx: &'a mut ModifyDnContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let payload = ChangePayload::Rename {
            new_rdn: ctx.new_rdn.to_string(),
            delete_old_rdn: ctx.request.delete_old_rdn,
            new_superior: ctx.new_superior.as_ref().map(|dn| dn.to_string()),
        };
        let record = backend
            .changelog
            .append(&ctx.request.meta.log_id, &ctx.dn, ChangeType::ModDn, payload)
            .await?;
        ctx.record = Some(record);
        Ok(Flow::Continue)
    }
    .boxed()
}

fn remove_old_indexes<'a>(backend: &'a Backend, ctx: &'a mut ModifyDnContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        backend.indexes.remove(&ctx.request.meta.log_id, &ctx.old_keys, &ctx.dn.key()).await;
        Ok(Flow::Continue)
    }
    .boxed()
}

fn delete_old_entry<'a>(backend: &'a Backend, ctx: &'a mut ModifyDnContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        backend.entries.delete(&ctx.dn).await?;
        Ok(Flow::Continue)
    }
    .boxed()
}

fn persist<'a>(backend: &'a Backend, ctx: &'a mut ModifyDnContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let dn = ctx.new_dn.to_string();
        let entry = ctx.entry.as_mut().ok_or_else(|| Error::no_such_object(dn))?;
        backend.entries.save(entry).await?;
        Ok(Flow::Continue)
    }
    .boxed()
}

fn write_indexes<'a>(backend: &'a Backend, ctx: &'a mut ModifyDnContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        backend.indexes.write(&ctx.request.meta.log_id, &ctx.new_keys, &ctx.new_dn.key()).await;
        Ok(Flow::Continue)
    }
    .boxed()
}

fn notify<'a>(backend: &'a Backend, ctx: &'a mut ModifyDnContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        if let (Some(entry), Some(record)) = (&ctx.entry, &ctx.record) {
            backend.notify(&ctx.request.meta.log_id, ChangeType::ModDn, entry, Some(&ctx.dn), record);
        }
        Ok(Flow::Continue)
    }
    .boxed()
}

use std::collections::BTreeSet;
use futures::future::{BoxFuture, FutureExt};
use crate::core::backend::Backend;
use crate::core::dn::Dn;
use crate::core::error::{Error, Result};
use crate::core::types::{is_operational, normalize_name, Attributes, Entry};
use crate::index::key::IndexKeySet;
use crate::pipeline::driver::{Flow, Pipeline};
use crate::protocol::request::{Change, ChangeOperation, ModifyRequest};
use crate::storage::changelog::{ChangePayload, ChangeRecord, ChangeType};

pub struct ModifyContext {
    pub request: ModifyRequest,
    pub dn: Dn,
    pub entry: Option<Entry>,
    /// Index keys of the entry as loaded
    pub stashed: IndexKeySet,
    /// Attributes whose value set actually changed
    pub changed: BTreeSet<String>,
    pub applied: Vec<Change>,
    pub delta_keys: IndexKeySet,
    /// Index keys of the entry as it will be saved
    pub keys: IndexKeySet,
    pub record: Option<ChangeRecord>,
}

impl ModifyContext {
    pub fn new(request: ModifyRequest) -> Result<Self> {
        let dn = Dn::parse(&request.dn)?;
        Ok(ModifyContext {
            request,
            dn,
            entry: None,
            stashed: IndexKeySet::new(),
            changed: BTreeSet::new(),
            applied: Vec::new(),
            delta_keys: IndexKeySet::new(),
            keys: IndexKeySet::new(),
            record: None,
        })
    }

    fn entry(&self) -> Result<&Entry> {
        self.entry.as_ref().ok_or_else(|| Error::no_such_object(self.dn.to_string()))
    }

    fn entry_mut(&mut self) -> Result<&mut Entry> {
        let dn = &self.dn;
        self.entry.as_mut().ok_or_else(|| Error::no_such_object(dn.to_string()))
    }
}

/// Applies one change in place.
pub fn apply_change(attributes: &mut Attributes, change: &Change) {
    match change.operation {
        ChangeOperation::Add => {
            attributes.add_values(&change.attribute, change.values.iter().cloned());
        }
        ChangeOperation::Delete if change.values.is_empty() => {
            attributes.remove(&change.attribute);
        }
        ChangeOperation::Delete => {
            attributes.remove_values(&change.attribute, &change.values);
        }
        ChangeOperation::Replace => {
            attributes.replace(&change.attribute, change.values.clone());
        }
    }
}

pub fn pipeline() -> Pipeline<ModifyContext> {
    Pipeline::new("modify")
        .step("load", load)
        .step("stash_index_keys", stash_index_keys)
        .step("apply_changes", apply_changes)
        .step("build_delta_keys", build_delta_keys)
        .step("check_unique", check_unique)
        .step("merge_index_keys", merge_index_keys)
        .step("remove_stale_indexes", remove_stale_indexes)
        .step("refresh_operational", refresh_operational)
        .step("build_index_keys", build_index_keys)
        .step("changelog", changelog)
        .step("persist", persist)
        .step("write_indexes", write_indexes)
        .step("notify", notify)
}

fn load<'a>(backend: &'a Backend, ctx: &'a mut ModifyContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        ctx.entry = Some(backend.entries.load(&ctx.dn).await?);
        Ok(Flow::Continue)
    }
    .boxed()
}

fn stash_index_keys<'a>(backend: &'a Backend, ctx: &'a mut ModifyContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        ctx.stashed = backend.indexes.build_index_keys(&ctx.entry()?.attributes);
        Ok(Flow::Continue)
    }
    .boxed()
}

fn apply_changes<'a>(_backend: &'a Backend, ctx: &'a mut ModifyContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let log_id = ctx.request.meta.log_id.clone();
        let changes = ctx.request.changes.clone();
        let entry = ctx.entry_mut()?;
        let before = entry.attributes.clone();

        let mut applied = Vec::with_capacity(changes.len());
        let mut touched = BTreeSet::new();
        for mut change in changes {
            change.attribute = normalize_name(&change.attribute);
            if is_operational(&change.attribute) {
                log::debug!("{} skipping change to operational attribute {}", log_id, change.attribute);
                continue;
            }
            apply_change(&mut entry.attributes, &change);
            touched.insert(change.attribute.clone());
            applied.push(change);
        }
        // objectclass values are indexed and stored lower-cased
        entry.normalize();

        // net effect per attribute, so add-then-delete is no change
        let changed: BTreeSet<String> = touched
            .into_iter()
            .filter(|name| !before.same_values(&entry.attributes, name))
            .collect();
        log::trace!("{} changed attributes: {:?}", log_id, changed);

        ctx.applied = applied;
        ctx.changed = changed;
        Ok(Flow::Continue)
    }
    .boxed()
}

fn build_delta_keys<'a>(backend: &'a Backend, ctx: &'a mut ModifyContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        ctx.delta_keys = backend.indexes.build_keys_for(&ctx.entry()?.attributes, &ctx.changed);
        Ok(Flow::Continue)
    }
    .boxed()
}

fn check_unique<'a>(backend: &'a Backend, ctx: &'a mut ModifyContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        // values this entry already owns are not conflicts
        let fresh: IndexKeySet = ctx.delta_keys.difference(&ctx.stashed).cloned().collect();
        backend.indexes.check_unique(&ctx.request.meta.log_id, &fresh).await?;
        Ok(Flow::Continue)
    }
    .boxed()
}

fn merge_index_keys<'a>(_backend: &'a Backend, ctx: &'a mut ModifyContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let changed = &ctx.changed;
        let mut merged: IndexKeySet = ctx
            .stashed
            .iter()
            .filter(|key| !changed.contains(&key.attribute))
            .cloned()
            .collect();
        merged.extend(ctx.delta_keys.iter().cloned());
        ctx.keys = merged;
        Ok(Flow::Continue)
    }
    .boxed()
}

fn remove_stale_indexes<'a>(backend: &'a Backend, ctx: &'a mut ModifyContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let stale: IndexKeySet = ctx.stashed.difference(&ctx.keys).cloned().collect();
        if !stale.is_empty() {
            backend.indexes.remove(&ctx.request.meta.log_id, &stale, &ctx.dn.key()).await;
        }
        Ok(Flow::Continue)
    }
    .boxed()
}

fn refresh_operational<'a>(_backend: &'a Backend, ctx: &'a mut ModifyContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let meta = ctx.request.meta.clone();
        let entry = ctx.entry_mut()?;
        Backend::stamp(entry, &meta);
        Ok(Flow::Continue)
    }
    .boxed()
}

fn build_index_keys<'a>(backend: &'a Backend, ctx: &'a mut ModifyContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let full = backend.indexes.build_index_keys(&ctx.entry()?.attributes);
        if full != ctx.keys {
            log::warn!("{} merged index keys diverge from entry, using the full set", ctx.request.meta.log_id);
            ctx.keys = full;
        }
        Ok(Flow::Continue)
    }
    .boxed()
}

fn changelog<'a>(backend: &'a Backend, ctx: &'a mut ModifyContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let payload = ChangePayload::Modifications(ctx.applied.clone());
        let record = backend
            .changelog
            .append(&ctx.request.meta.log_id, &ctx.dn, ChangeType::Modify, payload)
            .await?;
        ctx.record = Some(record);
        Ok(Flow::Continue)
    }
    .boxed()
}

fn persist<'a>(backend: &'a Backend, ctx: &'a mut ModifyContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let entry = ctx.entry_mut()?;
        backend.entries.save(entry).await?;
        Ok(Flow::Continue)
    }
    .boxed()
}

fn write_indexes<'a>(backend: &'a Backend, ctx: &'a mut ModifyContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        let added: IndexKeySet = ctx.keys.difference(&ctx.stashed).cloned().collect();
        if !added.is_empty() {
            backend.indexes.write(&ctx.request.meta.log_id, &added, &ctx.dn.key()).await;
        }
        Ok(Flow::Continue)
    }
    .boxed()
}

fn notify<'a>(backend: &'a Backend, ctx: &'a mut ModifyContext) -> BoxFuture<'a, Result<Flow>> {
    async move {
        if let (Some(entry), Some(record)) = (&ctx.entry, &ctx.record) {
            backend.notify(&ctx.request.meta.log_id, ChangeType::Modify, entry, None, record);
        }
        Ok(Flow::Continue)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changes_apply_in_order() {
        let mut attrs = Attributes::new().with("mail", &["a@x"]).with("l", &["x"]);
        let changes = [
            Change::new(ChangeOperation::Add, "mail", &["b@x", "a@x"]),
            Change::new(ChangeOperation::Delete, "mail", &["a@x"]),
            Change::new(ChangeOperation::Delete, "sn", &[]),
            Change::new(ChangeOperation::Replace, "l", &[]),
            Change::new(ChangeOperation::Replace, "cn", &["c"]),
        ];
        for change in &changes {
            apply_change(&mut attrs, change);
        }
        assert_eq!(attrs.get("mail").unwrap(), &["b@x".to_string()]);
        assert!(!attrs.contains("l"));
        assert_eq!(attrs.get("cn").unwrap(), &["c".to_string()]);
    }
}

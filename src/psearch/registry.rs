use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::RwLock;
use crate::core::dn::Dn;
use crate::core::error::Result;
use crate::core::types::Entry;
use crate::protocol::request::Scope;
use crate::protocol::response::{ResponseSink, SearchEntry};
use crate::psearch::control::{EntryChangeNotification, PersistentSearchControl};
use crate::query::ast::Filter;
use crate::storage::changelog::{is_changelog_dn, ChangeRecord, ChangeType};

/// A live search waiting for matching mutations.
pub struct Subscription {
    pub id: u64,
    pub connection_id: String,
    pub base: Dn,
    pub scope: Scope,
    pub filter: Filter,
    pub control: PersistentSearchControl,
    pub show_operational: bool,
    pub sink: Arc<dyn ResponseSink>,
}

impl Subscription {
    fn in_scope(&self, dn: &Dn) -> bool {
        match self.scope {
            Scope::Base => self.base == *dn,
            Scope::One => self.base.is_parent_of(dn),
            Scope::Sub => self.base.contains(dn),
        }
    }

    fn watches_changelog(&self) -> bool {
        is_changelog_dn(&self.base)
    }
}

/// One committed mutation, as seen by subscribers.
pub struct Mutation<'a> {
    pub change_type: ChangeType,
    /// Resulting entry; the pre-delete snapshot for deletes
    pub entry: &'a Entry,
    /// Former DN of a renamed entry
    pub previous_dn: Option<&'a Dn>,
    pub record: &'a ChangeRecord,
}

/// In-memory persistent search subscriptions.
///
/// Register/deregister take the write lock. Notification snapshots the list
/// under the read lock and delivers outside it, so a slow sink never blocks
/// registration and the list never changes under an in-progress fan-out.
pub struct PersistentSearchRegistry {
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    next_id: AtomicU64,
}

impl PersistentSearchRegistry {
    pub fn new() -> Self {
        PersistentSearchRegistry {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Stores the subscription; returns its id.
    pub fn register(&self, mut subscription: Subscription) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        subscription.id = id;
        log::debug!(
            "registering persistent search #{} for {} on {}",
            id, subscription.connection_id, subscription.base
        );
        let mut subscriptions = self.subscriptions.write();
        subscriptions.push(Arc::new(subscription));
        log::debug!("{} persistent searches registered", subscriptions.len());
        id
    }

    /// Drops every subscription of a closed connection.
    pub fn deregister(&self, connection_id: &str) -> usize {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.connection_id != connection_id);
        let removed = before - subscriptions.len();
        if removed > 0 {
            log::debug!("removed {} persistent searches of {}", removed, connection_id);
        }
        removed
    }

    /// Drops one subscription by id.
    pub fn cancel(&self, id: u64) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    fn deregister_ids(&self, ids: &[u64]) {
        self.subscriptions.write().retain(|s| !ids.contains(&s.id));
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `mutation` to every interested subscription. A failed
    /// delivery means the connection is gone: the subscription is dropped.
    /// Returns the number of deliveries.
    pub fn notify(&self, log_id: &str, mutation: &Mutation<'_>) -> Result<usize> {
        let snapshot: Vec<Arc<Subscription>> = self.subscriptions.read().clone();
        if snapshot.is_empty() {
            return Ok(0);
        }

        let changelog_entry = mutation.record.to_entry()?;
        let entry_dn = mutation.entry.parsed_dn()?;
        let changelog_dn = mutation.record.dn();

        let mut delivered = 0;
        let mut gone = Vec::new();
        for subscription in snapshot {
            if !subscription.control.wants(mutation.change_type) {
                continue;
            }

            let (dn, entry) = if subscription.watches_changelog() {
                (&changelog_dn, &changelog_entry)
            } else {
                (&entry_dn, mutation.entry)
            };
            if !subscription.in_scope(dn) || !subscription.filter.matches(&entry.attributes) {
                continue;
            }

            let change = subscription.control.return_ecs.then(|| EntryChangeNotification {
                change_type: mutation.change_type,
                previous_dn: mutation.previous_dn.map(|dn| dn.to_string()),
                change_number: mutation.record.change_number,
            });
            let result = SearchEntry {
                dn: entry.dn.clone(),
                attributes: entry.attributes.clone(),
                change,
            };

            match subscription.sink.send(result, !subscription.show_operational) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    log::debug!("{} dropping persistent search #{}: {}", log_id, subscription.id, e);
                    gone.push(subscription.id);
                }
            }
        }

        if !gone.is_empty() {
            self.deregister_ids(&gone);
        }
        log::trace!("{} {} notified {} persistent searches", log_id, mutation.change_type.as_str(), delivered);
        Ok(delivered)
    }
}

impl Default for PersistentSearchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Attributes;
    use crate::protocol::response::{ChannelSink, SinkMessage};
    use crate::query::parser::parse_filter;
    use crate::storage::changelog::ChangePayload;

    fn subscribe(registry: &PersistentSearchRegistry, base: &str, mask: u8) -> tokio::sync::mpsc::UnboundedReceiver<SinkMessage> {
        let (sink, rx) = ChannelSink::new();
        registry.register(Subscription {
            id: 0,
            connection_id: format!("conn-{}", base),
            base: Dn::parse(base).unwrap(),
            scope: Scope::Sub,
            filter: parse_filter("(objectclass=*)").unwrap(),
            control: PersistentSearchControl::new(mask, true, true),
            show_operational: false,
            sink: Arc::new(sink),
        });
        rx
    }

    fn record(change_type: ChangeType, number: u64) -> ChangeRecord {
        ChangeRecord {
            change_number: number,
            target_dn: "cn=x, o=test".to_string(),
            change_type,
            change_time: "2024-01-01T00:00:00Z".to_string(),
            payload: ChangePayload::Entry(Attributes::new()),
        }
    }

    #[test]
    fn delivers_by_mask_scope_and_filter() {
        let registry = PersistentSearchRegistry::new();
        let mut adds = subscribe(&registry, "o=test", 1);
        let mut elsewhere = subscribe(&registry, "o=other", 15);
        let mut changelog = subscribe(&registry, "cn=changelog", 15);

        let entry = Entry {
            dn: "cn=x, o=test".to_string(),
            attributes: Attributes::new().with("objectclass", &["person"]),
        };
        let added = record(ChangeType::Add, 41);
        let mutation = Mutation { change_type: ChangeType::Add, entry: &entry, previous_dn: None, record: &added };
        assert_eq!(registry.notify("t", &mutation).unwrap(), 2);

        match adds.try_recv() {
            Ok(SinkMessage::Entry(e)) => {
                assert_eq!(e.dn, "cn=x, o=test");
                let ecn = e.change.unwrap();
                assert_eq!((ecn.change_type, ecn.change_number), (ChangeType::Add, 41));
            }
            other => panic!("unexpected {:?}", other),
        }
        match changelog.try_recv() {
            Ok(SinkMessage::Entry(e)) => assert_eq!(e.dn, "changenumber=41, cn=changelog"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(elsewhere.try_recv().is_err());

        let deleted = record(ChangeType::Delete, 42);
        let mutation = Mutation { change_type: ChangeType::Delete, entry: &entry, previous_dn: None, record: &deleted };
        registry.notify("t", &mutation).unwrap();
        assert!(adds.try_recv().is_err());
    }

    #[test]
    fn closed_connections_are_dropped() {
        let registry = PersistentSearchRegistry::new();
        let rx = subscribe(&registry, "o=test", 15);
        let _kept = subscribe(&registry, "o=test2", 15);
        drop(rx);

        let entry = Entry {
            dn: "cn=x, o=test".to_string(),
            attributes: Attributes::new().with("objectclass", &["person"]),
        };
        let added = record(ChangeType::Add, 1);
        let mutation = Mutation { change_type: ChangeType::Add, entry: &entry, previous_dn: None, record: &added };
        assert_eq!(registry.notify("t", &mutation).unwrap(), 0);
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.deregister("conn-o=test2"), 1);
        assert!(registry.is_empty());
    }
}

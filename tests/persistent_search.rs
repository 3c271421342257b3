mod common;

use common::*;
use Dirkv::core::error::ErrorKind;
use Dirkv::protocol::request::{
    Change, ChangeOperation, Control, DeleteRequest, ModifyDnRequest, ModifyRequest, Scope, SearchRequest,
};
use Dirkv::protocol::response::{Outcome, SinkMessage};
use Dirkv::psearch::control::PersistentSearchControl;
use Dirkv::storage::changelog::ChangeType;

fn persistent(base: &str, scope: Scope, filter: &str, control: PersistentSearchControl) -> SearchRequest {
    let mut request = search_request(base, scope, filter);
    request.meta = request.meta.with_control(Control::PersistentSearch(control));
    request
}

#[tokio::test]
async fn add_only_subscription_sees_adds_only() {
    let (backend, _store) = memory_backend();
    seed(&backend).await;

    let (tx, mut rx) = sink();
    let control = PersistentSearchControl::new(ChangeType::Add.mask(), true, true);
    let outcome = backend.search(persistent("o=test", Scope::Sub, "(objectclass=person)", control), tx).await;
    assert!(outcome.is_success());
    assert_eq!(backend.registry().len(), 1);
    // registered searches never end
    assert!(rx.try_recv().is_err());

    assert!(add(&backend, "cn=mia, o=test", person("mia", "mia")).await.is_success());
    match rx.try_recv() {
        Ok(SinkMessage::Entry(entry)) => {
            assert_eq!(entry.dn, "cn=mia, o=test");
            let notification = entry.change.unwrap();
            assert_eq!(notification.change_type, ChangeType::Add);
            assert!(notification.previous_dn.is_none());
        }
        other => panic!("unexpected {:?}", other),
    }

    let (del_tx, _del_rx) = sink();
    let request = DeleteRequest { meta: meta(), dn: "cn=mia, o=test".to_string() };
    assert!(backend.delete(request, del_tx).await.is_success());
    assert!(rx.try_recv().is_err());

    // filter mismatch: not a person
    let ou = Dirkv::core::types::Attributes::new().with("objectclass", &["organizationalUnit"]);
    assert!(add(&backend, "ou=groups, o=test", ou).await.is_success());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn initial_results_then_notifications() {
    let (backend, _store) = memory_backend();
    seed(&backend).await;
    assert!(add(&backend, "cn=nina, o=test", person("nina", "nina")).await.is_success());

    let (tx, mut rx) = sink();
    let control = PersistentSearchControl::new(PersistentSearchControl::ALL_CHANGES, false, false);
    let outcome = backend.search(persistent("o=test", Scope::One, "(uid=*)", control), tx).await;
    assert!(outcome.is_success());

    let (initial, end) = drain(&mut rx);
    assert_eq!(dns(&initial), vec!["cn=nina, o=test".to_string()]);
    assert!(end.is_none());

    let (mod_tx, _mod_rx) = sink();
    let request = ModifyRequest {
        meta: meta(),
        dn: "cn=nina, o=test".to_string(),
        changes: vec![Change::new(ChangeOperation::Add, "mail", &["nina@test"])],
    };
    assert!(backend.modify(request, mod_tx).await.is_success());

    let (updates, _) = drain(&mut rx);
    assert_eq!(updates.len(), 1);
    assert!(updates[0].attributes.contains("mail"));
    assert!(updates[0].change.is_none());
}

#[tokio::test]
async fn renames_carry_previous_dn() {
    let (backend, _store) = memory_backend();
    seed(&backend).await;
    assert!(add(&backend, "cn=olga, ou=people, o=test", person("olga", "olga")).await.is_success());

    let (tx, mut rx) = sink();
    let control = PersistentSearchControl::new(ChangeType::ModDn.mask(), true, true);
    backend.search(persistent("ou=people, o=test", Scope::Sub, "(objectclass=*)", control), tx).await;

    let (rename_tx, _rename_rx) = sink();
    let request = ModifyDnRequest {
        meta: meta(),
        dn: "cn=olga, ou=people, o=test".to_string(),
        new_rdn: "cn=olgie".to_string(),
        delete_old_rdn: true,
        new_superior: None,
    };
    assert!(backend.modify_dn(request, rename_tx).await.is_success());

    let (entries, _) = drain(&mut rx);
    assert_eq!(dns(&entries), vec!["cn=olgie, ou=people, o=test".to_string()]);
    let notification = entries[0].change.clone().unwrap();
    assert_eq!(notification.change_type, ChangeType::ModDn);
    assert_eq!(notification.previous_dn.as_deref(), Some("cn=olga, ou=people, o=test"));
}

#[tokio::test]
async fn changelog_subscription_receives_records() {
    let (backend, _store) = memory_backend();
    seed(&backend).await;

    let (tx, mut rx) = sink();
    let control = PersistentSearchControl::new(PersistentSearchControl::ALL_CHANGES, true, true);
    backend.search(persistent("cn=changelog", Scope::Sub, "(objectclass=*)", control), tx).await;

    assert!(add(&backend, "cn=pat, o=test", person("pat", "pat")).await.is_success());
    let (entries, _) = drain(&mut rx);
    assert_eq!(dns(&entries), vec!["changenumber=3, cn=changelog".to_string()]);
    assert_eq!(entries[0].attributes.get("targetdn").unwrap(), &["cn=pat, o=test".to_string()]);
    assert_eq!(entries[0].change.as_ref().map(|c| c.change_number), Some(3));
}

#[tokio::test]
async fn disconnect_and_closed_sinks_deregister() {
    let (backend, _store) = memory_backend();
    seed(&backend).await;
    let control = PersistentSearchControl::new(PersistentSearchControl::ALL_CHANGES, true, false);

    let (tx, _rx) = sink();
    backend.search(persistent("o=test", Scope::Sub, "(objectclass=*)", control), tx).await;
    let (tx, _rx2) = sink();
    backend.search(persistent("o=test", Scope::Base, "(objectclass=*)", control), tx).await;
    assert_eq!(backend.registry().len(), 2);
    assert_eq!(backend.disconnect(CONNECTION), 2);
    assert!(backend.registry().is_empty());

    let (tx, rx) = sink();
    backend.search(persistent("o=test", Scope::Sub, "(objectclass=*)", control), tx).await;
    drop(rx);
    assert!(add(&backend, "cn=quinn, o=test", person("quinn", "quinn")).await.is_success());
    assert!(backend.registry().is_empty());
}

#[tokio::test]
async fn failed_persistent_search_is_not_kept() {
    let (backend, _store) = memory_backend();
    seed(&backend).await;

    let (tx, mut rx) = sink();
    let control = PersistentSearchControl::new(PersistentSearchControl::ALL_CHANGES, false, true);
    let outcome = backend.search(persistent("ou=ghosts, o=test", Scope::Sub, "(objectclass=*)", control), tx).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::NoSuchObject));
    assert!(backend.registry().is_empty());
    assert!(matches!(drain(&mut rx).1, Some(Outcome::Failed(_))));
}

#[tokio::test]
async fn changes_only_subscription_needs_an_existing_base() {
    let (backend, _store) = memory_backend();
    seed(&backend).await;
    let control = PersistentSearchControl::new(PersistentSearchControl::ALL_CHANGES, true, true);

    let (tx, mut rx) = sink();
    let outcome = backend.search(persistent("ou=ghosts, o=test", Scope::Sub, "(objectclass=*)", control), tx).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::NoSuchObject));
    assert!(backend.registry().is_empty());
    assert!(matches!(drain(&mut rx).1, Some(Outcome::Failed(_))));

    let (tx, _rx) = sink();
    let outcome = backend.search(persistent("cn=changelog", Scope::Sub, "(objectclass=*)", control), tx).await;
    assert!(outcome.is_success());
    assert_eq!(backend.registry().len(), 1);
}

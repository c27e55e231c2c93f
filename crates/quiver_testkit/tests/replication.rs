//! Committed updates reach replicators, subscribers and the journal.

use quiver_core::{
    read_journal, Config, Database, ErrorKind, Item, ModifyMode, MutationContext, NamespaceConfig,
    Transaction, UpdatesFilter, WalPayload, WalRecord, WalRecordType,
};
use quiver_testkit::{item, items_def, items_namespace_with, RecordingReplicator, TestDatabase};
use std::time::Duration;

#[test]
fn serial_values_follow_append_order() {
    let recorder = RecordingReplicator::new();
    let ns = items_namespace_with("items", NamespaceConfig::default(), recorder.clone());
    let ctx = MutationContext::new();

    for _ in 0..2 {
        let mut it = Item::new().with("value", "x");
        it.set_precepts(vec!["id=serial()".to_string()]);
        ns.insert(&mut it, &ctx).unwrap();
    }

    let metas: Vec<String> = recorder
        .records()
        .into_iter()
        .filter_map(|r| match r.payload() {
            WalPayload::PutMeta { key, value } if key == "_SERIAL_id" => Some(value.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(metas, vec!["1".to_string(), "2".to_string()]);
    assert_eq!(ns.get_meta("_SERIAL_id", &ctx).unwrap().as_deref(), Some("2"));
    assert_eq!(ns.items_count(&ctx).unwrap(), 2);
}

#[test]
fn lsns_increase_in_commit_order() {
    let recorder = RecordingReplicator::new();
    let ns = items_namespace_with("items", NamespaceConfig::default(), recorder.clone());
    let ctx = MutationContext::new();
    for id in 0..20 {
        ns.upsert(&mut item(id), &ctx).unwrap();
    }
    let lsns: Vec<_> = recorder.updates().iter().map(|u| u.lsn).collect();
    assert_eq!(lsns.len(), 20);
    assert!(lsns.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn transaction_is_framed() {
    let recorder = RecordingReplicator::new();
    let ns = items_namespace_with("items", NamespaceConfig::default(), recorder.clone());
    let ctx = MutationContext::new();
    let mut tx = Transaction::new("items");
    tx.insert(item(1));
    tx.delete(item(2));
    tx.upsert(item(3));
    let res = ns.commit_transaction(&tx, &ctx).unwrap();
    assert_eq!(res.affected, 2);

    let records = recorder.records();
    let kinds: Vec<_> = records.iter().map(WalRecord::record_type).collect();
    assert_eq!(
        kinds,
        vec![
            WalRecordType::InitTransaction,
            WalRecordType::ItemModify,
            WalRecordType::ItemModify,
            WalRecordType::CommitTransaction,
        ]
    );
    assert!(records[1].in_transaction() && records[2].in_transaction());
    assert!(matches!(
        records[1].payload(),
        WalPayload::ItemModify { mode: ModifyMode::Insert, .. }
    ));
}

#[test]
fn replication_failure_does_not_undo_commit() {
    let recorder = RecordingReplicator::new();
    recorder.set_failing(true);
    let ns = items_namespace_with("items", NamespaceConfig::default(), recorder.clone());
    let ctx = MutationContext::new();
    ns.upsert(&mut item(1), &ctx).unwrap();
    assert_eq!(ns.items_count(&ctx).unwrap(), 1);
    assert_eq!(ns.perf_stat().replication_errors, 1);
}

fn stamped_with_bad_unit(id: i64) -> Item {
    let mut it = item(id);
    it.set_precepts(vec!["ts=now(weeks)".to_string()]);
    it
}

#[test]
fn failed_copy_commit_replicates_nothing() {
    let recorder = RecordingReplicator::new();
    let config = NamespaceConfig::new().tx_size_to_always_copy(2);
    let ns = items_namespace_with("items", config, recorder.clone());
    let ctx = MutationContext::new();

    let mut tx = Transaction::new("items");
    tx.upsert(item(1));
    tx.upsert(stamped_with_bad_unit(2));
    assert!(ns.commit_transaction(&tx, &ctx).is_err());
    assert!(recorder.updates().is_empty());
    assert_eq!(ns.items_count(&ctx).unwrap(), 0);
    assert_eq!(ns.perf_stat().copies, 0);

    ns.upsert(&mut item(5), &ctx).unwrap();
    let updates = recorder.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].record.record_type(), WalRecordType::ItemModify);
    assert_eq!(ns.repl_state(&ctx).unwrap().last_lsn, updates[0].lsn);
}

#[test]
fn failed_in_place_commit_replicates_nothing() {
    let recorder = RecordingReplicator::new();
    let ns = items_namespace_with("items", NamespaceConfig::default(), recorder.clone());
    let ctx = MutationContext::new();

    let mut tx = Transaction::new("items");
    tx.upsert(item(1));
    let mut counted = Item::new().with("value", "x");
    counted.set_precepts(vec!["id=serial()".to_string()]);
    tx.insert(counted);
    tx.upsert(stamped_with_bad_unit(2));

    let err = ns.commit_transaction(&tx, &ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Params);
    assert!(recorder.updates().is_empty());
    assert_eq!(ns.items_count(&ctx).unwrap(), 0);
    assert_eq!(ns.get_meta("_SERIAL_id", &ctx).unwrap(), None);
    assert!(ns.repl_state(&ctx).unwrap().last_lsn.is_empty());
}

#[test]
fn shared_record_built_once_for_all_subscribers() {
    let db = TestDatabase::memory();
    let ctx = MutationContext::new();
    let subs: Vec<_> = (0..4)
        .map(|_| db.subscribe_updates(UpdatesFilter::All))
        .collect();
    let filtered = db.subscribe_updates(UpdatesFilter::namespaces(["other"]));

    let ns = db.add_namespace(items_def("items"), &ctx).unwrap();
    for id in 0..5 {
        ns.upsert(&mut item(id), &ctx).unwrap();
    }

    let received: Vec<Vec<_>> = subs.iter().map(|s| s.drain()).collect();
    assert_eq!(received[0].len(), 6);
    for other in &received[1..] {
        assert_eq!(other.len(), received[0].len());
        for (a, b) in received[0].iter().zip(other) {
            assert!(a.shares_buffer_with(b));
        }
    }
    assert!(filtered.is_empty());
    assert_eq!(db.hub().delivery_count(), 24);
}

#[test]
fn slow_subscriber_keeps_newest_updates() {
    let db = Database::new(Config::new().subscriber_queue_capacity(4));
    let ctx = MutationContext::new();
    let sub = db.subscribe_updates(UpdatesFilter::All);

    let ns = db.add_namespace(items_def("items"), &ctx).unwrap();
    for id in 0..10 {
        ns.upsert(&mut item(id), &ctx).unwrap();
    }

    assert_eq!(sub.len(), 4);
    assert_eq!(sub.lagged(), 7);
    let last = sub.drain().pop().unwrap();
    assert_eq!(last.unpack().unwrap().origin_lsn, ns.repl_state(&ctx).unwrap().last_lsn);
}

#[test]
fn subscriber_wakes_on_update() {
    let db = TestDatabase::memory();
    let ctx = MutationContext::new().with_timeout(Duration::from_secs(5));
    let sub = db.subscribe_updates(UpdatesFilter::namespaces(["items"]));

    std::thread::scope(|scope| {
        scope.spawn(|| {
            let ctx = MutationContext::new();
            let ns = db.add_namespace(items_def("items"), &ctx).unwrap();
            ns.put_meta("k", "v", &ctx).unwrap();
        });
        let first = sub.recv(&ctx).unwrap();
        assert_eq!(first.record().unwrap().record_type(), WalRecordType::NamespaceAdd);
    });
}

#[test]
fn journal_holds_every_update() {
    let db = TestDatabase::with_journal();
    let ctx = MutationContext::new();
    let ns = db.add_namespace(items_def("items"), &ctx).unwrap();
    for id in 0..3 {
        ns.upsert(&mut item(id), &ctx).unwrap();
    }
    db.rename_namespace("items", "things", &ctx).unwrap();
    db.background_routine(&ctx).unwrap();

    let contents = read_journal(db.journal_path().unwrap()).unwrap();
    let views: Vec<_> = contents
        .records
        .iter()
        .map(|r| {
            let view = r.unpack().unwrap();
            (view.ns_name.to_string(), view.record().unwrap().record_type())
        })
        .collect();
    assert_eq!(views.len(), 5);
    assert_eq!(views[0], ("items".to_string(), WalRecordType::NamespaceAdd));
    assert_eq!(views[4], ("items".to_string(), WalRecordType::NamespaceRename));
    assert_eq!(contents.truncated_tail, 0);
}

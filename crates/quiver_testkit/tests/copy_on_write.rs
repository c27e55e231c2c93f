//! Copy-on-write commits under concurrent access.

use quiver_core::{MutationContext, NamespaceConfig, Transaction, Variant};
use quiver_testkit::scenarios::{populated_namespace, upsert_transaction};
use quiver_testkit::{item, items_namespace, stress_copy_commits, StressConfig};
use std::thread;

#[test]
fn ten_thousand_item_transaction_with_reader() {
    let ns = items_namespace("stress", NamespaceConfig::default());
    let result = stress_copy_commits(
        &ns,
        &StressConfig {
            transactions: 2,
            tx_size: 10_000,
            readers: 1,
        },
    );
    assert_eq!(result.transactions, 2);
    assert_eq!(result.items_written, 20_000);
    assert_eq!(result.copies, 2);
    assert_eq!(result.monotonic_violations, 0);
    assert_eq!(result.failed_reads, 0);

    let ctx = MutationContext::new();
    assert_eq!(ns.items_count(&ctx).unwrap(), 20_000);
    assert!(ns.get(&Variant::Int(19_999), &ctx).unwrap().is_some());
}

#[test]
fn at_most_one_copy_at_a_time() {
    let config = NamespaceConfig::new()
        .start_copy_policy_tx_size(100)
        .copy_policy_multiplier(1_000);
    let ns = items_namespace("items", config);

    thread::scope(|scope| {
        for t in 0..4i64 {
            let ns = &ns;
            scope.spawn(move || {
                let ctx = MutationContext::new();
                for round in 0..5i64 {
                    let tx = upsert_transaction("items", (t * 5 + round) * 100, 100);
                    let res = ns.commit_transaction(&tx, &ctx).unwrap();
                    assert!(res.copied);
                }
            });
        }
    });

    let stat = ns.perf_stat();
    assert_eq!(stat.copies, 20);
    assert_eq!(stat.peak_concurrent_copies, 1);
    assert_eq!(ns.items_count(&MutationContext::new()).unwrap(), 2_000);
}

#[test]
fn writers_during_copy_are_not_lost() {
    let config = NamespaceConfig::new().start_copy_policy_tx_size(500);
    let ns = items_namespace("items", config);

    thread::scope(|scope| {
        scope.spawn(|| {
            let ctx = MutationContext::new();
            for round in 0..4 {
                let tx = upsert_transaction("items", round * 500, 500);
                assert!(ns.commit_transaction(&tx, &ctx).unwrap().copied);
            }
        });
        scope.spawn(|| {
            let ctx = MutationContext::new();
            for id in 100_000..100_500 {
                ns.upsert(&mut item(id), &ctx).unwrap();
            }
        });
    });

    assert_eq!(ns.items_count(&MutationContext::new()).unwrap(), 2_500);
}

#[test]
fn failed_copy_leaves_namespace_usable() {
    let ns = populated_namespace(10, NamespaceConfig::new().tx_size_to_always_copy(2));
    let ctx = MutationContext::new();
    let before = ns.implementation_id();

    let mut tx = Transaction::new("items");
    tx.upsert(item(100));
    tx.upsert(quiver_core::Item::new().with("value", "no key"));
    assert!(ns.commit_transaction(&tx, &ctx).is_err());

    assert_eq!(ns.implementation_id(), before);
    assert_eq!(ns.items_count(&ctx).unwrap(), 10);
    ns.upsert(&mut item(11), &ctx).unwrap();
    assert_eq!(ns.items_count(&ctx).unwrap(), 11);
}

#[test]
fn retried_reads_see_published_copy() {
    let config = NamespaceConfig::new().start_copy_policy_tx_size(200);
    let ns = items_namespace("items", config);

    thread::scope(|scope| {
        scope.spawn(|| {
            let ctx = MutationContext::new();
            for round in 0..10 {
                let tx = upsert_transaction("items", round * 200, 200);
                ns.commit_transaction(&tx, &ctx).unwrap();
            }
        });
        scope.spawn(|| {
            let ctx = MutationContext::new();
            for _ in 0..2_000 {
                ns.get_meta("missing", &ctx).unwrap();
                ns.name(&ctx).unwrap();
            }
        });
    });
    assert_eq!(ns.items_count(&MutationContext::new()).unwrap(), 2_000);
}

//! Renames in place and onto another namespace.

use quiver_core::{
    CoreError, EnumNamespacesOpts, ErrorKind, MutationContext, NamespaceConfig, Variant,
};
use quiver_testkit::scenarios::populated_namespace;
use quiver_testkit::{item, items_def, items_namespace, TestDatabase};
use std::sync::Arc;
use std::thread;

#[test]
fn no_op_renames_keep_the_implementation() {
    let ctx = MutationContext::new();
    let ns = populated_namespace(3, NamespaceConfig::default());
    let id = ns.implementation_id();

    ns.rename_to(None, &ctx).unwrap();
    ns.rename_to(Some(&ns), &ctx).unwrap();
    ns.rename("", None, &ctx).unwrap();

    assert_eq!(ns.implementation_id(), id);
    assert_eq!(ns.name(&ctx).unwrap(), "items");
}

#[test]
fn in_place_rename_moves_storage() {
    let db = TestDatabase::with_storage();
    let ctx = MutationContext::new();
    let ns = db.add_namespace(items_def("items"), &ctx).unwrap();
    ns.put_meta("k", "v", &ctx).unwrap();
    let old_dir = ns.storage_path(&ctx).unwrap().unwrap();
    let before = ns.implementation_id();

    db.rename_namespace("items", "things", &ctx).unwrap();

    let new_dir = ns.storage_path(&ctx).unwrap().unwrap();
    assert_eq!(new_dir, db.storage_root().unwrap().join("things"));
    assert!(new_dir.exists());
    assert!(!old_dir.exists());
    assert_ne!(ns.implementation_id(), before);
    assert_eq!(ns.name(&ctx).unwrap(), "things");
    assert_eq!(ns.get_meta("k", &ctx).unwrap().as_deref(), Some("v"));
    assert!(Arc::ptr_eq(&db.namespace("things").unwrap(), &ns));
    assert_eq!(
        db.namespace("items").unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn rename_onto_open_namespace_replaces_it() {
    let db = TestDatabase::with_storage();
    let ctx = MutationContext::new();
    let src = db.add_namespace(items_def("staging"), &ctx).unwrap();
    let dst = db.add_namespace(items_def("live"), &ctx).unwrap();
    for id in 0..5 {
        src.upsert(&mut item(id), &ctx).unwrap();
    }
    dst.upsert(&mut item(99), &ctx).unwrap();
    let live_dir = dst.storage_path(&ctx).unwrap().unwrap();

    db.rename_namespace("staging", "live", &ctx).unwrap();

    assert_eq!(dst.name(&ctx).unwrap(), "live");
    assert_eq!(dst.items_count(&ctx).unwrap(), 5);
    assert!(dst.get(&Variant::Int(99), &ctx).unwrap().is_none());
    assert_eq!(dst.storage_path(&ctx).unwrap(), Some(live_dir.clone()));
    assert!(live_dir.exists());
    assert!(!db.storage_root().unwrap().join("staging").exists());

    let err = src.items_count(&ctx).unwrap_err();
    assert!(matches!(err, CoreError::NamespaceNotFound { .. }));

    let names: Vec<_> = db
        .enum_namespaces(&EnumNamespacesOpts::new().only_names(true), &ctx)
        .unwrap()
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert_eq!(names, vec!["live".to_string()]);
}

#[test]
fn writers_follow_in_place_rename() {
    let db = TestDatabase::memory();
    let ctx = MutationContext::new();
    let ns = db.add_namespace(items_def("items"), &ctx).unwrap();

    thread::scope(|scope| {
        let writer = scope.spawn(|| {
            let ctx = MutationContext::new();
            for id in 0..500 {
                ns.upsert(&mut item(id), &ctx).unwrap();
            }
        });
        for round in 0..10 {
            let (from, to) = if round % 2 == 0 {
                ("items", "renamed")
            } else {
                ("renamed", "items")
            };
            db.rename_namespace(from, to, &ctx).unwrap();
        }
        writer.join().unwrap();
    });

    assert_eq!(ns.items_count(&ctx).unwrap(), 500);
    assert_eq!(ns.name(&ctx).unwrap(), "items");
}

#[test]
fn opposite_renames_do_not_deadlock() {
    for _ in 0..20 {
        let a = items_namespace("a", NamespaceConfig::default());
        let b = items_namespace("b", NamespaceConfig::default());
        let ctx = MutationContext::new();
        a.upsert(&mut item(1), &ctx).unwrap();
        b.upsert(&mut item(2), &ctx).unwrap();

        let (ab, ba) = thread::scope(|scope| {
            let ab = scope.spawn(|| a.rename_to(Some(&b), &MutationContext::new()));
            let ba = scope.spawn(|| b.rename_to(Some(&a), &MutationContext::new()));
            (ab.join().unwrap(), ba.join().unwrap())
        });

        let (winner, loser) = match (&ab, &ba) {
            (Ok(()), Err(e)) => ((&b, 1), e),
            (Err(e), Ok(())) => ((&a, 2), e),
            other => panic!("exactly one rename should win: {other:?}"),
        };
        assert_eq!(loser.kind(), ErrorKind::NotFound);
        let (survivor, id) = winner;
        assert_eq!(survivor.items_count(&ctx).unwrap(), 1);
        assert!(survivor.get(&Variant::Int(id), &ctx).unwrap().is_some());
    }
}

#[test]
fn empty_rename_target_is_ignored() {
    let db = TestDatabase::memory();
    let ctx = MutationContext::new();
    let ns = db.add_namespace(items_def("items"), &ctx).unwrap();
    ns.upsert(&mut item(1), &ctx).unwrap();
    let before = ns.implementation_id();

    db.rename_namespace("items", "", &ctx).unwrap();
    let same = db.namespace("items").unwrap();
    assert!(Arc::ptr_eq(&ns, &same));
    assert_eq!(same.implementation_id(), before);
    assert_eq!(same.name(&ctx).unwrap(), "items");
    assert_eq!(same.items_count(&ctx).unwrap(), 1);
}

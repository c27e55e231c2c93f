//! Benchmark utilities.

use quiver_core::{
    encode_document, IndexDef, IndexOpts, Item, ModifyMode, NamespaceDef, Transaction, WalRecord,
};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Random alphanumeric text of `len` characters.
pub fn random_text(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Definition with an integer `id` primary key.
pub fn bench_def(name: &str) -> NamespaceDef {
    NamespaceDef::new(name).add_index(IndexDef::new("id", "hash", "int", IndexOpts::pk()))
}

/// Item with a random payload of `payload_size` characters.
pub fn random_item(id: i64, payload_size: usize) -> Item {
    Item::new()
        .with("id", id)
        .with("payload", random_text(payload_size))
}

/// `ItemModify` record carrying a random item.
pub fn item_modify_record(id: i64, payload_size: usize) -> WalRecord {
    let cjson = encode_document(random_item(id, payload_size).fields())
        .expect("Document must encode");
    WalRecord::item_modify(cjson, 0, ModifyMode::Upsert, false)
}

/// Transaction inserting ids `start..start + count`.
pub fn insert_transaction(ns: &str, start: i64, count: usize, payload_size: usize) -> Transaction {
    let mut tx = Transaction::new(ns);
    for id in start..start + count as i64 {
        tx.insert(random_item(id, payload_size));
    }
    tx
}

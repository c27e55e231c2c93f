//! Property-based test generators using proptest.
//!
//! Provides strategies for WAL records of every kind, documents and
//! namespace operations.

use proptest::prelude::*;
use quiver_core::{
    encode_document, Document, IndexDef, IndexOpts, Item, ItemId, Lsn, ModifyMode, NamespaceDef,
    ServerId, Variant, WalRecord,
};

/// Strategy for server ids inside the LSN range.
pub fn server_id_strategy() -> impl Strategy<Value = ServerId> {
    (0..=ServerId::MAX).prop_map(ServerId::new)
}

/// Strategy for LSNs, the empty one included.
pub fn lsn_strategy() -> impl Strategy<Value = Lsn> {
    prop_oneof![
        1 => Just(Lsn::EMPTY),
        9 => (server_id_strategy(), 0..1_000_000_000i64).prop_map(|(s, c)| Lsn::new(s, c)),
    ]
}

/// Strategy for field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for scalar values.
pub fn variant_strategy() -> impl Strategy<Value = Variant> {
    prop_oneof![
        Just(Variant::Null),
        any::<bool>().prop_map(Variant::Bool),
        any::<i64>().prop_map(Variant::Int),
        (-1.0e9..1.0e9f64).prop_map(Variant::Double),
        ".{0,24}".prop_map(Variant::String),
    ]
}

/// Strategy for documents.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    prop::collection::btree_map(field_name_strategy(), variant_strategy(), 0..8)
}

/// Strategy for items with an integer `id` primary key.
pub fn item_strategy() -> impl Strategy<Value = Item> {
    (any::<i64>(), document_strategy()).prop_map(|(id, doc)| {
        let mut item = Item::from_document(doc);
        item.set("id", id);
        item
    })
}

/// Strategy for modification modes.
pub fn modify_mode_strategy() -> impl Strategy<Value = ModifyMode> {
    prop_oneof![
        Just(ModifyMode::Update),
        Just(ModifyMode::Insert),
        Just(ModifyMode::Upsert),
        Just(ModifyMode::Delete),
    ]
}

fn text() -> impl Strategy<Value = String> {
    ".{0,48}"
}

fn bytes() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..128)
}

fn index_json() -> impl Strategy<Value = String> {
    (field_name_strategy(), any::<bool>()).prop_map(|(name, pk)| {
        let opts = if pk { IndexOpts::pk() } else { IndexOpts::default() };
        IndexDef::new(name, "hash", "int", opts)
            .to_json()
            .expect("Index definition must serialize")
    })
}

fn namespace_json() -> impl Strategy<Value = String> {
    field_name_strategy().prop_map(|name| {
        NamespaceDef::new(name)
            .to_json()
            .expect("Namespace definition must serialize")
    })
}

/// Strategy covering every WAL record kind, with the in-transaction flag
/// on the kinds that carry it.
pub fn wal_record_strategy() -> impl Strategy<Value = WalRecord> {
    prop_oneof![
        text().prop_map(WalRecord::repl_state),
        (any::<i32>(), any::<bool>()).prop_map(|(id, tx)| WalRecord::item_update(ItemId::new(id), tx)),
        (document_strategy(), any::<i32>(), modify_mode_strategy(), any::<bool>()).prop_map(
            |(doc, tm, mode, tx)| {
                let cjson = encode_document(&doc).expect("Document must encode");
                WalRecord::item_modify(cjson, tm, mode, tx)
            }
        ),
        index_json().prop_map(WalRecord::index_add),
        index_json().prop_map(WalRecord::index_drop),
        index_json().prop_map(WalRecord::index_update),
        (text(), text()).prop_map(|(k, v)| WalRecord::put_meta(k, v)),
        (text(), any::<bool>()).prop_map(|(q, tx)| WalRecord::update_query(q, tx)),
        namespace_json().prop_map(WalRecord::namespace_add),
        Just(WalRecord::namespace_drop()),
        field_name_strategy().prop_map(WalRecord::namespace_rename),
        Just(WalRecord::init_transaction()),
        Just(WalRecord::commit_transaction()),
        namespace_json().prop_map(WalRecord::force_sync),
        text().prop_map(WalRecord::set_schema),
        text().prop_map(WalRecord::wal_sync),
        bytes().prop_map(WalRecord::tags_matcher),
        Just(WalRecord::reset_local_wal()),
        (any::<i32>(), bytes()).prop_map(|(id, data)| WalRecord::raw_item(ItemId::new(id), data)),
    ]
}

/// One namespace operation for randomized sequences.
#[derive(Debug, Clone)]
pub enum NamespaceOperation {
    /// Write or delete an item.
    Modify {
        /// The item.
        item: Item,
        /// What to do with it.
        mode: ModifyMode,
    },
    /// Store a metadata value.
    PutMeta {
        /// Key.
        key: String,
        /// Value.
        value: String,
    },
    /// Remove every item.
    Truncate,
}

/// Strategy for a single namespace operation over a small key space.
pub fn namespace_operation_strategy() -> impl Strategy<Value = NamespaceOperation> {
    prop_oneof![
        8 => (0..32i64, modify_mode_strategy()).prop_map(|(id, mode)| NamespaceOperation::Modify {
            item: Item::new().with("id", id).with("value", format!("v{id}")),
            mode,
        }),
        2 => (field_name_strategy(), text()).prop_map(|(key, value)| NamespaceOperation::PutMeta { key, value }),
        1 => Just(NamespaceOperation::Truncate),
    ]
}

/// Strategy for operation sequences.
pub fn namespace_operations_strategy(
    max_len: usize,
) -> impl Strategy<Value = Vec<NamespaceOperation>> {
    prop::collection::vec(namespace_operation_strategy(), 0..max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn items_carry_integer_pk(item in item_strategy()) {
            prop_assert!(item.get("id").and_then(Variant::as_int).is_some());
        }

        #[test]
        fn lsns_stay_in_range(lsn in lsn_strategy()) {
            prop_assert!(lsn.is_empty() || lsn.server().as_i16() <= ServerId::MAX);
        }
    }
}

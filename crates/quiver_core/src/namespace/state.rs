//! Mutable state of one namespace implementation.
//!
//! Everything here runs under the owning implementation's lock. Every
//! change is logged through [`NsState::emit`], which assigns the LSN,
//! appends to the local WAL ring and queues the update for replication.

use super::definition::{IndexDef, NamespaceDef, ReplicationState, StorageOpts, TagsMatcher};
use super::transaction::{Transaction, TxResult};
use super::wal_ring::WalRing;
use crate::config::NamespaceConfig;
use crate::error::{CoreError, CoreResult};
use crate::functions::{serial_meta_key, FunctionCall, FunctionExecutor, SerialSource};
use crate::item::{encode_document, Document, Item, PkValue, Variant};
use crate::replication::{UpdateBatch, UpdateRecord};
use crate::stats::NamespaceMemStat;
use crate::types::{ItemId, Lsn, LsnPair, ServerId};
use crate::wal::{MarkedPackedWalRecord, ModifyMode, WalRecord};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFINITION_FILE: &str = "namespace.json";
const META_FILE: &str = "meta.json";

#[derive(Debug, Clone, Default)]
pub(crate) struct NsState {
    pub(super) def: NamespaceDef,
    pub(super) rows: Vec<Option<Document>>,
    pub(super) free_rows: Vec<i32>,
    pub(super) pk_field: Option<String>,
    pub(super) pk_map: HashMap<PkValue, ItemId>,
    pub(super) meta: BTreeMap<String, String>,
    pub(super) tags: TagsMatcher,
    pub(super) storage_path: Option<PathBuf>,
    pub(super) storage_dirty: bool,
    pub(super) repl: ReplicationState,
    pub(super) wal: WalRing,
    pub(super) lsn_counter: i64,
    pub(super) server_id: ServerId,
    pub(super) config: NamespaceConfig,
}

fn validate_indexes(indexes: &[IndexDef]) -> CoreResult<()> {
    let mut seen = std::collections::HashSet::new();
    for index in indexes {
        index.validate()?;
        if !seen.insert(index.name.as_str()) {
            return Err(CoreError::params(format!(
                "duplicate index '{}'",
                index.name
            )));
        }
    }
    if indexes.iter().filter(|i| i.opts.pk).count() > 1 {
        return Err(CoreError::params("more than one primary key index"));
    }
    Ok(())
}

impl NsState {
    pub(crate) fn new(
        def: NamespaceDef,
        server_id: ServerId,
        config: NamespaceConfig,
    ) -> CoreResult<Self> {
        if def.name.is_empty() {
            return Err(CoreError::params("namespace name must not be empty"));
        }
        validate_indexes(&def.indexes)?;
        let pk_field = def.pk_index().map(|i| i.field().to_string());
        let mut tags = TagsMatcher::new();
        for index in &def.indexes {
            tags.ensure(index.field());
        }
        Ok(Self {
            def,
            pk_field,
            tags,
            wal: WalRing::new(config.wal_size),
            server_id,
            config,
            ..Self::default()
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.def.name
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.def.name = name.to_string();
        self.storage_dirty = true;
    }

    pub(crate) fn items_count(&self) -> usize {
        self.pk_map.len()
    }

    /// Logs a locally originated record.
    pub(crate) fn emit(&mut self, record: WalRecord, updates: &mut UpdateBatch) -> Lsn {
        self.emit_from(record, Lsn::EMPTY, updates)
    }

    /// Logs a record applied from `upstream`.
    pub(crate) fn emit_from(
        &mut self,
        record: WalRecord,
        upstream: Lsn,
        updates: &mut UpdateBatch,
    ) -> Lsn {
        self.lsn_counter += 1;
        let lsn = Lsn::new(self.server_id, self.lsn_counter);
        self.wal
            .push(lsn, MarkedPackedWalRecord::pack(self.server_id, &record));
        self.repl.last_lsn = lsn;
        if !upstream.is_empty() {
            self.repl.upstream_lsn = upstream;
        }
        updates.push(UpdateRecord::new(self.def.name.clone(), lsn, upstream, record));
        lsn
    }

    fn require_pk(&self) -> CoreResult<String> {
        self.pk_field.clone().ok_or_else(|| {
            CoreError::logic(format!(
                "namespace '{}' has no primary key index",
                self.def.name
            ))
        })
    }

    fn pk_of(&self, doc: &Document, pk_field: &str) -> CoreResult<PkValue> {
        doc.get(pk_field).and_then(Variant::to_pk).ok_or_else(|| {
            CoreError::params(format!(
                "item has no int or string primary key in field '{pk_field}'"
            ))
        })
    }

    fn row(&self, id: ItemId) -> Option<&Document> {
        usize::try_from(id.as_i32())
            .ok()
            .and_then(|i| self.rows.get(i))
            .and_then(Option::as_ref)
    }

    fn set_row(&mut self, id: ItemId, doc: Option<Document>) {
        if let Some(slot) = usize::try_from(id.as_i32())
            .ok()
            .and_then(|i| self.rows.get_mut(i))
        {
            *slot = doc;
        }
    }

    fn alloc_row(&mut self, pk: PkValue, doc: Document) -> CoreResult<ItemId> {
        let id = match self.free_rows.pop() {
            Some(raw) => {
                let id = ItemId::new(raw);
                self.set_row(id, Some(doc));
                id
            }
            None => {
                let raw = i32::try_from(self.rows.len())
                    .map_err(|_| CoreError::logic("row id space exhausted"))?;
                self.rows.push(Some(doc));
                ItemId::new(raw)
            }
        };
        self.pk_map.insert(pk, id);
        Ok(id)
    }

    fn remove_row(&mut self, id: ItemId, pk: &PkValue) {
        self.set_row(id, None);
        self.free_rows.push(id.as_i32());
        self.pk_map.remove(pk);
    }

    /// Checks that `item` can be written with `mode` without emitting
    /// anything: precepts must be valid calls and the primary key must be
    /// present or filled by a precept.
    fn check_item(&self, item: &Item, mode: ModifyMode, pk_field: &str) -> CoreResult<()> {
        if mode == ModifyMode::Delete || item.precepts().is_empty() {
            return self.pk_of(item.fields(), pk_field).map(|_| ());
        }
        let mut fills_pk = false;
        for precept in item.precepts() {
            let call = FunctionCall::parse(precept)?;
            call.validate()?;
            fills_pk |= call.field == pk_field;
        }
        if !fills_pk {
            self.pk_of(item.fields(), pk_field)?;
        }
        Ok(())
    }

    fn apply_precepts(&mut self, item: &mut Item, updates: &mut UpdateBatch) -> CoreResult<()> {
        let calls = item
            .precepts()
            .iter()
            .map(|p| FunctionCall::parse(p))
            .collect::<CoreResult<Vec<_>>>()?;
        let mut exec = FunctionExecutor::new(self, updates);
        for call in &calls {
            let value = exec.execute(call)?;
            item.set(call.field.clone(), value);
        }
        Ok(())
    }

    /// Stores, overwrites or removes a document according to `mode`.
    ///
    /// Insert of an existing key and update or delete of a missing key do
    /// nothing and return `None`.
    pub(crate) fn write_document(
        &mut self,
        doc: Document,
        mode: ModifyMode,
        in_transaction: bool,
        upstream: Lsn,
        updates: &mut UpdateBatch,
    ) -> CoreResult<Option<ItemId>> {
        let pk_field = self.require_pk()?;
        let pk = self.pk_of(&doc, &pk_field)?;
        let existing = self.pk_map.get(&pk).copied();

        let (id, cjson) = match (mode, existing) {
            (ModifyMode::Insert, Some(_))
            | (ModifyMode::Update | ModifyMode::Delete, None) => return Ok(None),
            (ModifyMode::Delete, Some(id)) => {
                let cjson = encode_document(self.row(id).unwrap_or(&doc))?;
                self.remove_row(id, &pk);
                (id, cjson)
            }
            (_, Some(id)) => {
                let cjson = encode_document(&doc)?;
                self.register_tags(&doc);
                self.set_row(id, Some(doc));
                (id, cjson)
            }
            (_, None) => {
                let cjson = encode_document(&doc)?;
                self.register_tags(&doc);
                (self.alloc_row(pk, doc)?, cjson)
            }
        };

        let tm_version = self.tags.version();
        self.emit_from(
            WalRecord::item_modify(cjson, tm_version, mode, in_transaction),
            upstream,
            updates,
        );
        Ok(Some(id))
    }

    fn register_tags(&mut self, doc: &Document) {
        for key in doc.keys() {
            self.tags.ensure(key);
        }
    }

    /// Evaluates precepts, then writes the item.
    pub(crate) fn modify(
        &mut self,
        item: &mut Item,
        mode: ModifyMode,
        in_transaction: bool,
        updates: &mut UpdateBatch,
    ) -> CoreResult<Option<ItemId>> {
        let pk_field = self.require_pk()?;
        self.check_item(item, mode, &pk_field)?;
        if mode != ModifyMode::Delete && !item.precepts().is_empty() {
            self.apply_precepts(item, updates)?;
        }
        let result = self.write_document(
            item.fields().clone(),
            mode,
            in_transaction,
            Lsn::EMPTY,
            updates,
        )?;
        if let Some(id) = result {
            item.set_id(id);
        }
        Ok(result)
    }

    pub(crate) fn get(&self, pk: &Variant) -> CoreResult<Option<Item>> {
        let pk = pk
            .to_pk()
            .ok_or_else(|| CoreError::params(format!("{pk} is not a valid primary key")))?;
        Ok(self.pk_map.get(&pk).and_then(|&id| {
            self.row(id).map(|doc| {
                let mut item = Item::from_document(doc.clone());
                item.set_id(id);
                item
            })
        }))
    }

    pub(crate) fn items(&self) -> Vec<Item> {
        self.rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| {
                let doc = row.as_ref()?;
                let mut item = Item::from_document(doc.clone());
                item.set_id(ItemId::new(i32::try_from(i).ok()?));
                Some(item)
            })
            .collect()
    }

    pub(crate) fn clear_items(&mut self) {
        self.rows.clear();
        self.free_rows.clear();
        self.pk_map.clear();
    }

    pub(crate) fn truncate(&mut self, updates: &mut UpdateBatch) {
        self.clear_items();
        let query = format!("TRUNCATE {}", self.def.name);
        self.emit(WalRecord::update_query(query, false), updates);
    }

    /// Replaces every item.
    pub(crate) fn refill(&mut self, items: Vec<Item>, updates: &mut UpdateBatch) -> CoreResult<()> {
        let pk_field = self.require_pk()?;
        for item in &items {
            self.check_item(item, ModifyMode::Upsert, &pk_field)?;
        }
        self.truncate(updates);
        for mut item in items {
            self.modify(&mut item, ModifyMode::Upsert, false, updates)?;
        }
        Ok(())
    }

    fn build_pk_map(&self, field: &str) -> CoreResult<HashMap<PkValue, ItemId>> {
        let mut map = HashMap::with_capacity(self.pk_map.len());
        for (i, row) in self.rows.iter().enumerate() {
            let Some(doc) = row else { continue };
            let pk = self.pk_of(doc, field)?;
            let id = ItemId::new(
                i32::try_from(i).map_err(|_| CoreError::logic("row id space exhausted"))?,
            );
            if map.insert(pk.clone(), id).is_some() {
                return Err(CoreError::logic(format!(
                    "duplicate primary key {pk} in field '{field}'"
                )));
            }
        }
        Ok(map)
    }

    fn index_position(&self, name: &str) -> CoreResult<usize> {
        self.def
            .indexes
            .iter()
            .position(|i| i.name == name)
            .ok_or_else(|| {
                CoreError::params(format!(
                    "index '{name}' not found in namespace '{}'",
                    self.def.name
                ))
            })
    }

    pub(crate) fn add_index(&mut self, index: IndexDef, updates: &mut UpdateBatch) -> CoreResult<()> {
        index.validate()?;
        if self.def.indexes.iter().any(|i| i.name == index.name) {
            return Err(CoreError::params(format!(
                "index '{}' already exists",
                index.name
            )));
        }
        if index.opts.pk {
            if self.pk_field.is_some() {
                return Err(CoreError::params(format!(
                    "namespace '{}' already has a primary key",
                    self.def.name
                )));
            }
            self.pk_map = self.build_pk_map(index.field())?;
            self.pk_field = Some(index.field().to_string());
        }
        let json = index.to_json()?;
        self.tags.ensure(index.field());
        self.def.indexes.push(index);
        self.storage_dirty = true;
        self.emit(WalRecord::index_add(json), updates);
        Ok(())
    }

    pub(crate) fn update_index(
        &mut self,
        index: IndexDef,
        updates: &mut UpdateBatch,
    ) -> CoreResult<()> {
        index.validate()?;
        let pos = self.index_position(&index.name)?;
        let old_pk = self.def.indexes[pos].opts.pk;

        if index.opts.pk {
            if !old_pk && self.pk_field.is_some() {
                return Err(CoreError::params(format!(
                    "namespace '{}' already has a primary key",
                    self.def.name
                )));
            }
            self.pk_map = self.build_pk_map(index.field())?;
            self.pk_field = Some(index.field().to_string());
        } else if old_pk {
            if self.items_count() > 0 {
                return Err(CoreError::logic(
                    "cannot remove the primary key of a non-empty namespace",
                ));
            }
            self.pk_field = None;
        }

        let json = index.to_json()?;
        self.tags.ensure(index.field());
        self.def.indexes[pos] = index;
        self.storage_dirty = true;
        self.emit(WalRecord::index_update(json), updates);
        Ok(())
    }

    pub(crate) fn drop_index(&mut self, name: &str, updates: &mut UpdateBatch) -> CoreResult<()> {
        let pos = self.index_position(name)?;
        if self.def.indexes[pos].opts.pk {
            if self.items_count() > 0 {
                return Err(CoreError::logic(
                    "cannot drop the primary key of a non-empty namespace",
                ));
            }
            self.pk_field = None;
        }
        let removed = self.def.indexes.remove(pos);
        self.storage_dirty = true;
        self.emit(WalRecord::index_drop(removed.to_json()?), updates);
        Ok(())
    }

    pub(crate) fn set_schema(&mut self, schema: &str, updates: &mut UpdateBatch) -> CoreResult<()> {
        serde_json::from_str::<serde_json::Value>(schema)
            .map_err(|e| CoreError::params(format!("malformed schema: {e}")))?;
        self.def.schema_json = schema.to_string();
        self.storage_dirty = true;
        self.emit(WalRecord::set_schema(schema), updates);
        Ok(())
    }

    pub(crate) fn put_meta(
        &mut self,
        key: &str,
        value: &str,
        updates: &mut UpdateBatch,
    ) -> CoreResult<()> {
        if key.is_empty() {
            return Err(CoreError::params("empty meta key"));
        }
        self.meta.insert(key.to_string(), value.to_string());
        self.storage_dirty = true;
        self.emit(WalRecord::put_meta(key, value), updates);
        Ok(())
    }

    pub(crate) fn get_meta(&self, key: &str) -> Option<String> {
        self.meta.get(key).cloned()
    }

    pub(crate) fn enum_meta(&self) -> Vec<String> {
        self.meta.keys().cloned().collect()
    }

    pub(crate) fn tags_matcher(&self) -> &TagsMatcher {
        &self.tags
    }

    pub(crate) fn replace_tags_matcher(
        &mut self,
        tags: TagsMatcher,
        updates: &mut UpdateBatch,
    ) -> CoreResult<()> {
        let data = tags.encode()?;
        self.tags = tags;
        self.emit(WalRecord::tags_matcher(data), updates);
        Ok(())
    }

    pub(crate) fn repl_state(&self) -> ReplicationState {
        ReplicationState {
            data_count: self.items_count() as u64,
            ..self.repl
        }
    }

    pub(crate) fn set_repl_lsns(&mut self, lsns: LsnPair) {
        self.repl.upstream_lsn = lsns.upstream;
        if !lsns.origin.is_empty() {
            self.repl.last_lsn = lsns.origin;
            self.lsn_counter = lsns.origin.counter();
        }
    }

    /// Reads the definition stored under `root/<name>`, if any.
    pub(crate) fn stored_definition(root: &Path, name: &str) -> CoreResult<Option<NamespaceDef>> {
        let file = root.join(name).join(DEFINITION_FILE);
        if !file.exists() {
            return Ok(None);
        }
        NamespaceDef::from_json(&fs::read_to_string(file)?).map(Some)
    }

    pub(crate) fn definition(&self) -> NamespaceDef {
        self.def.clone()
    }

    pub(crate) fn on_config_updated(&mut self, config: NamespaceConfig) {
        self.wal.set_capacity(config.wal_size);
        self.config = config;
    }

    pub(crate) fn mem_stat(&self) -> NamespaceMemStat {
        NamespaceMemStat {
            name: self.def.name.clone(),
            items: self.items_count(),
            indexes: self.def.indexes.len(),
            meta_keys: self.meta.len(),
            wal_records: self.wal.len(),
            wal_bytes: self.wal.bytes(),
            storage_path: self.storage_path.clone(),
        }
    }

    /// Rejects transactions that would fail halfway through.
    fn validate_tx(&self, tx: &Transaction) -> CoreResult<()> {
        let pk_field = self.require_pk()?;
        for step in tx.steps() {
            self.check_item(&step.item, step.mode, &pk_field)?;
        }
        Ok(())
    }

    pub(crate) fn commit_transaction(
        &mut self,
        tx: &Transaction,
        updates: &mut UpdateBatch,
    ) -> CoreResult<TxResult> {
        self.validate_tx(tx)?;
        self.emit(WalRecord::init_transaction(), updates);
        let mut affected = 0;
        for step in tx.steps() {
            let mut item = step.item.clone();
            if self.modify(&mut item, step.mode, true, updates)?.is_some() {
                affected += 1;
            }
        }
        self.emit(WalRecord::commit_transaction(), updates);
        Ok(TxResult {
            affected,
            copied: false,
        })
    }

    // Storage binding.

    pub(crate) fn storage_opts(&self) -> StorageOpts {
        self.def.storage
    }

    pub(crate) fn storage_path(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }

    pub(crate) fn enable_storage(&mut self, root: &Path, opts: StorageOpts) -> CoreResult<()> {
        self.def.storage = opts;
        if !opts.enabled {
            self.storage_path = None;
            return Ok(());
        }
        let path = root.join(&self.def.name);
        if !path.exists() {
            if !opts.create_if_missing {
                return Err(CoreError::params(format!(
                    "storage directory '{}' does not exist",
                    path.display()
                )));
            }
            fs::create_dir_all(&path)?;
        }
        let meta_file = path.join(META_FILE);
        if meta_file.exists() {
            let stored: BTreeMap<String, String> =
                serde_json::from_slice(&fs::read(&meta_file)?)
                    .map_err(|e| CoreError::codec(format!("malformed {META_FILE}: {e}")))?;
            for (key, value) in stored {
                self.meta.entry(key).or_insert(value);
            }
        }
        debug!(ns = %self.def.name, path = %path.display(), "storage enabled");
        self.storage_path = Some(path);
        self.storage_dirty = true;
        self.flush_storage()
    }

    /// Writes the definition and meta files when something changed.
    pub(crate) fn flush_storage(&mut self) -> CoreResult<()> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };
        if !self.storage_dirty {
            return Ok(());
        }
        fs::write(path.join(DEFINITION_FILE), self.def.to_json()?)?;
        let meta = serde_json::to_string(&self.meta).map_err(|e| CoreError::codec(e.to_string()))?;
        fs::write(path.join(META_FILE), meta)?;
        self.storage_dirty = false;
        Ok(())
    }

    pub(crate) fn close_storage(&mut self) -> CoreResult<()> {
        self.flush_storage()?;
        self.storage_path = None;
        Ok(())
    }

    pub(crate) fn delete_storage(&mut self) -> CoreResult<()> {
        if let Some(path) = self.storage_path.take() {
            if path.exists() {
                fs::remove_dir_all(&path)?;
            }
            debug!(ns = %self.def.name, path = %path.display(), "storage deleted");
        }
        Ok(())
    }

    /// Moves the bound storage directory to `target`.
    pub(crate) fn move_storage(&mut self, target: Option<PathBuf>) -> CoreResult<()> {
        let Some(target) = target else {
            return Ok(());
        };
        if let Some(current) = &self.storage_path {
            if *current != target && current.exists() {
                if target.exists() {
                    fs::remove_dir_all(&target)?;
                }
                fs::rename(current, &target)?;
            }
            self.storage_path = Some(target);
            self.storage_dirty = true;
        }
        Ok(())
    }
}

impl SerialSource for NsState {
    fn next_serial(&mut self, field: &str, updates: &mut UpdateBatch) -> CoreResult<i64> {
        let key = serial_meta_key(field);
        let counter = self
            .meta
            .get(&key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
            + 1;
        self.put_meta(&key, &counter.to_string(), updates)?;
        Ok(counter)
    }
}

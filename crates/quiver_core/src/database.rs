//! Database facade: the registry of namespaces.

use crate::config::{Config, ConfigProvider};
use crate::context::{lock_with_context, ActivityRegistry, ActivitySnapshot, MutationContext};
use crate::error::{CoreError, CoreResult};
use crate::namespace::{stored_definition, EnumNamespacesOpts, Namespace, NamespaceDef};
use crate::replication::{NsDataReplicator, ReplicationHub, UpdatesFilter, UpdatesSubscription};
use crate::wal::WalJournal;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The main database handle.
///
/// `Database` owns every open [`Namespace`] together with the replication
/// hub their committed updates flow into.
///
/// # Example
///
/// ```rust,ignore
/// use quiver_core::{Config, Database, IndexDef, IndexOpts, Item, MutationContext, NamespaceDef};
///
/// let db = Database::new(Config::default());
/// let ctx = MutationContext::new();
/// let def = NamespaceDef::new("items")
///     .add_index(IndexDef::new("id", "hash", "int", IndexOpts::pk()));
/// let items = db.add_namespace(def, &ctx)?;
/// items.upsert(&mut Item::new().with("id", 1), &ctx)?;
/// ```
#[derive(Debug)]
pub struct Database {
    /// Configuration.
    config: Config,
    /// Per-namespace configuration source.
    provider: RwLock<ConfigProvider>,
    /// Open namespaces by name.
    namespaces: RwLock<BTreeMap<String, Arc<Namespace>>>,
    /// Replication funnel shared by every namespace.
    hub: Arc<ReplicationHub>,
    /// Running operations.
    activities: ActivityRegistry,
    /// Serializes renames.
    rename_lock: Mutex<()>,
    /// Parent directory of namespace storage, if any.
    storage_root: Option<PathBuf>,
}

impl Database {
    /// Creates an in-memory database.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub = ReplicationHub::new(config.namespace.cond_check_interval())
            .with_queue_capacity(config.subscriber_queue_capacity);
        Self::with_hub(config, hub)
    }

    /// Creates a database that appends every committed update to the
    /// journal at `path`.
    pub fn with_journal(config: Config, path: impl AsRef<Path>) -> CoreResult<Self> {
        let journal = WalJournal::open(path, config.journal_sync_on_write)?;
        let hub = ReplicationHub::with_journal(config.namespace.cond_check_interval(), journal)
            .with_queue_capacity(config.subscriber_queue_capacity);
        Ok(Self::with_hub(config, hub))
    }

    fn with_hub(config: Config, hub: ReplicationHub) -> Self {
        Self {
            provider: RwLock::new(ConfigProvider::new(config.namespace.clone())),
            config,
            namespaces: RwLock::new(BTreeMap::new()),
            hub: Arc::new(hub),
            activities: ActivityRegistry::new(),
            rename_lock: Mutex::new(()),
            storage_root: None,
        }
    }

    /// Stores namespaces with storage enabled under `root`.
    #[must_use]
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = Some(root.into());
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Storage root, when configured.
    #[must_use]
    pub fn storage_root(&self) -> Option<&Path> {
        self.storage_root.as_deref()
    }

    /// Replication hub every namespace reports to.
    #[must_use]
    pub fn hub(&self) -> &ReplicationHub {
        &self.hub
    }

    /// Creates a namespace and logs its definition.
    pub fn add_namespace(&self, def: NamespaceDef, ctx: &MutationContext) -> CoreResult<Arc<Namespace>> {
        let name = def.name.clone();
        if self.namespaces.read().contains_key(&name) {
            return Err(CoreError::namespace_exists(name));
        }
        let storage = def.storage;
        let config = self.provider.read().get_namespace_config(&name);
        let replicator: Arc<dyn NsDataReplicator> = self.hub.clone();
        let ns = Arc::new(Namespace::new(def, self.config.server_id, config, replicator)?);

        if let Some(root) = &self.storage_root {
            if storage.enabled {
                ns.enable_storage(root, storage, ctx)?;
            }
        }

        {
            let mut namespaces = self.namespaces.write();
            if namespaces.contains_key(&name) {
                return Err(CoreError::namespace_exists(name));
            }
            namespaces.insert(name.clone(), Arc::clone(&ns));
        }
        ns.log_added(ctx)?;
        info!(ns = %name, "namespace added");
        Ok(ns)
    }

    /// Returns the open namespace `name`, opening it from storage or
    /// creating it empty otherwise.
    pub fn open_namespace(&self, name: &str, ctx: &MutationContext) -> CoreResult<Arc<Namespace>> {
        if let Some(ns) = self.namespaces.read().get(name) {
            return Ok(Arc::clone(ns));
        }
        let def = match &self.storage_root {
            Some(root) => stored_definition(root, name)?,
            None => None,
        }
        .unwrap_or_else(|| NamespaceDef::new(name));

        match self.add_namespace(def, ctx) {
            Err(CoreError::NamespaceExists { .. }) => self.namespace(name),
            other => other,
        }
    }

    /// Returns the open namespace `name`.
    pub fn namespace(&self, name: &str) -> CoreResult<Arc<Namespace>> {
        self.namespaces
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::namespace_not_found(name))
    }

    /// Closes and removes a namespace, deleting its storage.
    pub fn drop_namespace(&self, name: &str, ctx: &MutationContext) -> CoreResult<()> {
        let ns = self
            .namespaces
            .write()
            .remove(name)
            .ok_or_else(|| CoreError::namespace_not_found(name))?;
        ns.mark_dropped(ctx)?;
        info!(ns = %name, "namespace dropped");
        Ok(())
    }

    /// Renames `src` to `dst`, replacing `dst` when it is open.
    pub fn rename_namespace(&self, src: &str, dst: &str, ctx: &MutationContext) -> CoreResult<()> {
        if src == dst || dst.is_empty() {
            return Ok(());
        }
        let _serial = lock_with_context(
            &self.rename_lock,
            ctx,
            self.config.namespace.cond_check_interval(),
            "rename namespace",
        )?;
        let src_ns = self.namespace(src)?;
        let dst_ns = self.namespaces.read().get(dst).cloned();

        match dst_ns {
            Some(dst_ns) => {
                src_ns.rename_to(Some(&dst_ns), ctx)?;
                self.namespaces.write().remove(src);
            }
            None => {
                src_ns.rename(dst, self.storage_root.as_deref(), ctx)?;
                let mut namespaces = self.namespaces.write();
                if let Some(ns) = namespaces.remove(src) {
                    namespaces.insert(dst.to_string(), ns);
                }
            }
        }
        // The moved storage still holds the definition under the old name.
        self.namespace(dst)?.background_routine(ctx)?;
        info!(from = %src, to = %dst, "namespace renamed");
        Ok(())
    }

    /// Lists namespace definitions.
    pub fn enum_namespaces(
        &self,
        opts: &EnumNamespacesOpts,
        ctx: &MutationContext,
    ) -> CoreResult<Vec<NamespaceDef>> {
        let open: Vec<(String, Arc<Namespace>)> = self
            .namespaces
            .read()
            .iter()
            .map(|(name, ns)| (name.clone(), Arc::clone(ns)))
            .collect();

        let mut defs = Vec::new();
        for (name, ns) in &open {
            if !opts.match_name_filter(name) {
                continue;
            }
            if opts.is_only_names() && !opts.is_hide_temporary() {
                defs.push(NamespaceDef::new(name.clone()));
                continue;
            }
            let def = match ns.definition(ctx) {
                Ok(def) => def,
                Err(CoreError::NamespaceNotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            if opts.is_hide_temporary() && def.is_temporary {
                continue;
            }
            defs.push(if opts.is_only_names() {
                NamespaceDef::new(def.name)
            } else {
                def
            });
        }

        if opts.is_with_closed() {
            if let Some(root) = &self.storage_root {
                defs.extend(self.closed_definitions(root, opts, &open)?);
            }
        }
        Ok(defs)
    }

    fn closed_definitions(
        &self,
        root: &Path,
        opts: &EnumNamespacesOpts,
        open: &[(String, Arc<Namespace>)],
    ) -> CoreResult<Vec<NamespaceDef>> {
        let mut defs = Vec::new();
        if !root.exists() {
            return Ok(defs);
        }
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if open.iter().any(|(n, _)| *n == name) || !opts.match_name_filter(&name) {
                continue;
            }
            match stored_definition(root, &name) {
                Ok(Some(def)) if !(opts.is_hide_temporary() && def.is_temporary) => defs.push(def),
                Ok(_) => {}
                Err(e) => warn!(ns = %name, error = %e, "skipping unreadable namespace definition"),
            }
        }
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(defs)
    }

    /// Installs a new configuration source and notifies every namespace.
    pub fn update_config(&self, provider: ConfigProvider, ctx: &MutationContext) -> CoreResult<()> {
        *self.provider.write() = provider.clone();
        let open: Vec<Arc<Namespace>> = self.namespaces.read().values().cloned().collect();
        for ns in open {
            match ns.on_config_updated(&provider, ctx) {
                Ok(()) | Err(CoreError::NamespaceNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        debug!("namespace configuration updated");
        Ok(())
    }

    /// Subscribes to committed updates.
    pub fn subscribe_updates(&self, filter: UpdatesFilter) -> UpdatesSubscription {
        self.hub.subscribe(filter)
    }

    /// Runs periodic maintenance on every namespace and flushes the journal.
    pub fn background_routine(&self, ctx: &MutationContext) -> CoreResult<()> {
        let open: Vec<Arc<Namespace>> = self.namespaces.read().values().cloned().collect();
        for ns in open {
            match ns.background_routine(ctx) {
                Ok(()) | Err(CoreError::NamespaceNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.hub.flush()
    }

    /// Creates a context whose activity is listed by [`Database::activities`]
    /// while it is alive.
    #[must_use]
    pub fn activity_context(&self, description: impl Into<String>) -> MutationContext {
        MutationContext::new().with_activity(self.activities.begin(description))
    }

    /// Operations currently running with a tracked activity.
    #[must_use]
    pub fn activities(&self) -> Vec<ActivitySnapshot> {
        self.activities.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Item;
    use crate::namespace::{IndexDef, IndexOpts, StorageOpts};
    use crate::wal::WalRecordType;
    use tempfile::tempdir;

    fn def(name: &str) -> NamespaceDef {
        NamespaceDef::new(name).add_index(IndexDef::new("id", "hash", "int", IndexOpts::pk()))
    }

    #[test]
    fn add_and_lookup() {
        let db = Database::new(Config::default());
        let ctx = MutationContext::new();
        db.add_namespace(def("items"), &ctx).unwrap();
        assert!(matches!(
            db.add_namespace(def("items"), &ctx),
            Err(CoreError::NamespaceExists { .. })
        ));
        assert!(db.namespace("items").is_ok());
        assert!(matches!(
            db.namespace("nope"),
            Err(CoreError::NamespaceNotFound { .. })
        ));
    }

    #[test]
    fn add_and_drop_are_logged() {
        let db = Database::new(Config::default());
        let ctx = MutationContext::new();
        let sub = db.subscribe_updates(UpdatesFilter::All);
        db.add_namespace(def("items"), &ctx).unwrap();
        db.drop_namespace("items", &ctx).unwrap();

        let kinds: Vec<_> = sub
            .drain()
            .iter()
            .map(|r| r.record().unwrap().record_type())
            .collect();
        assert_eq!(kinds, vec![WalRecordType::NamespaceAdd, WalRecordType::NamespaceDrop]);
        assert!(db.namespace("items").is_err());
    }

    #[test]
    fn rename_in_place_and_swap() {
        let db = Database::new(Config::default());
        let ctx = MutationContext::new();
        let a = db.add_namespace(def("a"), &ctx).unwrap();
        a.upsert(&mut Item::new().with("id", 1), &ctx).unwrap();

        db.rename_namespace("a", "b", &ctx).unwrap();
        assert!(db.namespace("a").is_err());
        let b = db.namespace("b").unwrap();
        assert_eq!(b.name(&ctx).unwrap(), "b");

        let c = db.add_namespace(def("c"), &ctx).unwrap();
        db.rename_namespace("b", "c", &ctx).unwrap();
        assert_eq!(c.items_count(&ctx).unwrap(), 1);
        assert!(db.namespace("b").is_err());

        db.rename_namespace("c", "c", &ctx).unwrap();
    }

    #[test]
    fn enumerate_with_filters() {
        let db = Database::new(Config::default());
        let ctx = MutationContext::new();
        db.add_namespace(def("items"), &ctx).unwrap();
        db.add_namespace(def("#config"), &ctx).unwrap();
        db.add_namespace(def("tmp").temporary(true), &ctx).unwrap();

        let all = db.enum_namespaces(&EnumNamespacesOpts::new(), &ctx).unwrap();
        assert_eq!(all.len(), 3);

        let opts = EnumNamespacesOpts::new().hide_system(true).hide_temporary(true);
        let names: Vec<_> = db
            .enum_namespaces(&opts, &ctx)
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["items".to_string()]);

        let filtered = db
            .enum_namespaces(&EnumNamespacesOpts::new().with_filter("ITEMS"), &ctx)
            .unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn storage_survives_reopen() {
        let dir = tempdir().unwrap();
        let ctx = MutationContext::new();
        {
            let db = Database::new(Config::default()).with_storage_root(dir.path());
            let ns = db.add_namespace(def("items"), &ctx).unwrap();
            ns.put_meta("k", "v", &ctx).unwrap();
            db.background_routine(&ctx).unwrap();
        }
        let db = Database::new(Config::default()).with_storage_root(dir.path());
        let closed = db
            .enum_namespaces(&EnumNamespacesOpts::new().with_closed(true), &ctx)
            .unwrap();
        assert_eq!(closed.len(), 1);

        let ns = db.open_namespace("items", &ctx).unwrap();
        assert_eq!(ns.get_meta("k", &ctx).unwrap().as_deref(), Some("v"));
        assert_eq!(ns.definition(&ctx).unwrap().indexes.len(), 1);
        assert_eq!(ns.storage_opts(&ctx).unwrap(), StorageOpts::default());
    }

    #[test]
    fn activities_are_listed() {
        let db = Database::new(Config::default());
        let ctx = db.activity_context("bulk load");
        assert_eq!(db.activities().len(), 1);
        drop(ctx);
        assert!(db.activities().is_empty());
    }
}

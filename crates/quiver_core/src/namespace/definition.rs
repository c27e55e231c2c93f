//! Namespace and index definitions.

use crate::error::{CoreError, CoreResult};
use crate::types::Lsn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Index flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOpts {
    /// Primary key index.
    pub pk: bool,
    /// Indexes array fields.
    pub array: bool,
    /// Items without the field are not indexed.
    pub sparse: bool,
}

impl IndexOpts {
    /// Primary key options.
    #[must_use]
    pub const fn pk() -> Self {
        Self {
            pk: true,
            array: false,
            sparse: false,
        }
    }
}

/// Definition of one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name.
    pub name: String,
    /// Document paths covered by the index.
    #[serde(default)]
    pub json_paths: Vec<String>,
    /// Index structure, e.g. `hash` or `tree`.
    pub index_type: String,
    /// Key type, e.g. `int` or `string`.
    pub field_type: String,
    /// Flags.
    #[serde(default)]
    pub opts: IndexOpts,
}

const INDEX_TYPES: &[&str] = &["hash", "tree", "-", "text", "ttl"];
const FIELD_TYPES: &[&str] = &["int", "int64", "double", "string", "bool", "composite"];

impl IndexDef {
    /// Creates an index over the field of the same name.
    pub fn new(
        name: impl Into<String>,
        index_type: impl Into<String>,
        field_type: impl Into<String>,
        opts: IndexOpts,
    ) -> Self {
        let name = name.into();
        Self {
            json_paths: vec![name.clone()],
            name,
            index_type: index_type.into(),
            field_type: field_type.into(),
            opts,
        }
    }

    /// Field path read by the index.
    #[must_use]
    pub fn field(&self) -> &str {
        self.json_paths.first().map_or(&self.name, String::as_str)
    }

    /// Checks the definition for consistency.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::params("index name must not be empty"));
        }
        if !INDEX_TYPES.contains(&self.index_type.as_str()) {
            return Err(CoreError::params(format!(
                "unsupported index type '{}' for index '{}'",
                self.index_type, self.name
            )));
        }
        if !FIELD_TYPES.contains(&self.field_type.as_str()) {
            return Err(CoreError::params(format!(
                "unsupported field type '{}' for index '{}'",
                self.field_type, self.name
            )));
        }
        if self.opts.pk && (self.opts.sparse || self.opts.array) {
            return Err(CoreError::params(format!(
                "primary key index '{}' can be neither sparse nor array",
                self.name
            )));
        }
        Ok(())
    }

    /// JSON rendering used in WAL records.
    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string(self).map_err(|e| CoreError::codec(e.to_string()))
    }

    /// Parses the JSON rendering.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| CoreError::params(format!("malformed index definition: {e}")))
    }
}

/// Storage binding options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOpts {
    /// Persist the namespace.
    pub enabled: bool,
    /// Create the storage directory when missing.
    pub create_if_missing: bool,
    /// Drop storage that fails to load instead of failing.
    pub drop_on_file_format_error: bool,
}

impl Default for StorageOpts {
    fn default() -> Self {
        Self {
            enabled: true,
            create_if_missing: true,
            drop_on_file_format_error: false,
        }
    }
}

impl StorageOpts {
    /// Options for a namespace without storage.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            create_if_missing: false,
            drop_on_file_format_error: false,
        }
    }
}

fn default_schema() -> String {
    "{}".to_string()
}

/// Definition of a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDef {
    /// Namespace name.
    pub name: String,
    /// Storage options.
    #[serde(default)]
    pub storage: StorageOpts,
    /// Indexes.
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    /// Temporary namespaces are hidden from some enumerations.
    #[serde(default)]
    pub is_temporary: bool,
    /// JSON schema, `{}` when unset.
    #[serde(default = "default_schema")]
    pub schema_json: String,
}

impl Default for NamespaceDef {
    fn default() -> Self {
        Self::new("")
    }
}

impl NamespaceDef {
    /// Returns the primary key index, if defined.
    #[must_use]
    pub fn pk_index(&self) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.opts.pk)
    }

    /// Creates a definition with default storage options and no indexes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage: StorageOpts::default(),
            indexes: Vec::new(),
            is_temporary: false,
            schema_json: default_schema(),
        }
    }

    /// Sets storage options.
    #[must_use]
    pub fn storage(mut self, storage: StorageOpts) -> Self {
        self.storage = storage;
        self
    }

    /// Marks the namespace temporary.
    #[must_use]
    pub fn temporary(mut self, value: bool) -> Self {
        self.is_temporary = value;
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn add_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Returns true when a non-empty schema is set.
    #[must_use]
    pub fn has_schema(&self) -> bool {
        !self.schema_json.is_empty() && self.schema_json != "{}"
    }

    /// JSON rendering used in WAL records.
    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string(self).map_err(|e| CoreError::codec(e.to_string()))
    }

    /// Parses the JSON rendering.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| CoreError::params(format!("malformed namespace definition: {e}")))
    }
}

const ENUM_WITH_CLOSED: u16 = 1;
const ENUM_ONLY_NAMES: u16 = 2;
const ENUM_HIDE_SYSTEM: u16 = 4;
const ENUM_HIDE_TEMPORARY: u16 = 8;

/// Options for namespace enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumNamespacesOpts {
    options: u16,
    filter: Option<String>,
}

impl EnumNamespacesOpts {
    /// Creates options listing every open namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(mut self, bit: u16, value: bool) -> Self {
        if value {
            self.options |= bit;
        } else {
            self.options &= !bit;
        }
        self
    }

    /// Includes namespaces that are known but not open.
    #[must_use]
    pub fn with_closed(self, value: bool) -> Self {
        self.flag(ENUM_WITH_CLOSED, value)
    }

    /// Returns names only, without reading definitions.
    #[must_use]
    pub fn only_names(self, value: bool) -> Self {
        self.flag(ENUM_ONLY_NAMES, value)
    }

    /// Hides system namespaces (names starting with `#`).
    #[must_use]
    pub fn hide_system(self, value: bool) -> Self {
        self.flag(ENUM_HIDE_SYSTEM, value)
    }

    /// Hides temporary namespaces.
    #[must_use]
    pub fn hide_temporary(self, value: bool) -> Self {
        self.flag(ENUM_HIDE_TEMPORARY, value)
    }

    /// Restricts the listing to one name, compared case-insensitively.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Closed namespaces requested.
    #[must_use]
    pub fn is_with_closed(&self) -> bool {
        self.options & ENUM_WITH_CLOSED != 0
    }

    /// Names only requested.
    #[must_use]
    pub fn is_only_names(&self) -> bool {
        self.options & ENUM_ONLY_NAMES != 0
    }

    /// System namespaces hidden.
    #[must_use]
    pub fn is_hide_system(&self) -> bool {
        self.options & ENUM_HIDE_SYSTEM != 0
    }

    /// Temporary namespaces hidden.
    #[must_use]
    pub fn is_hide_temporary(&self) -> bool {
        self.options & ENUM_HIDE_TEMPORARY != 0
    }

    /// Applies the name filter and the system-namespace rule.
    #[must_use]
    pub fn match_name_filter(&self, name: &str) -> bool {
        let filter_ok = self
            .filter
            .as_deref()
            .is_none_or(|f| f.is_empty() || f.eq_ignore_ascii_case(name));
        filter_ok && (!self.is_hide_system() || !is_system_name(name))
    }
}

/// Returns true for system namespace names.
#[must_use]
pub fn is_system_name(name: &str) -> bool {
    name.starts_with('#')
}

/// Dictionary of field names seen by a namespace.
///
/// Every newly seen name bumps the version, which is recorded with each
/// item modification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsMatcher {
    version: i32,
    tags: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl TagsMatcher {
    /// Creates an empty matcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version.
    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Known names in registration order.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Tag id of `name`, if known.
    #[must_use]
    pub fn tag(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Registers `name`. Returns true if it was new.
    pub fn ensure(&mut self, name: &str) -> bool {
        if self.index.contains_key(name) {
            return false;
        }
        self.index.insert(name.to_string(), self.tags.len());
        self.tags.push(name.to_string());
        self.version += 1;
        true
    }

    /// Encodes the matcher for a `TagsMatcher` WAL record.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out).map_err(|e| CoreError::codec(e.to_string()))?;
        Ok(out)
    }

    /// Decodes the output of [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let mut tm: Self =
            ciborium::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))?;
        tm.index = tm
            .tags
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        Ok(tm)
    }
}

/// Synchronisation status of a namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStatus {
    /// Not synchronising.
    #[default]
    Idle,
    /// Applying a snapshot.
    Syncing,
    /// Last synchronisation failed.
    Error,
}

/// Replication bookkeeping of a namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationState {
    /// Last LSN written locally.
    pub last_lsn: Lsn,
    /// Last LSN applied from upstream.
    pub upstream_lsn: Lsn,
    /// Number of stored items.
    pub data_count: u64,
    /// Synchronisation status.
    pub status: ReplicationStatus,
}

impl ReplicationState {
    /// JSON rendering used in `ReplState` and `WalSync` records.
    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string(self).map_err(|e| CoreError::codec(e.to_string()))
    }

    /// Parses the JSON rendering.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| CoreError::params(format!("malformed replication state: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items_def() -> NamespaceDef {
        NamespaceDef::new("items")
            .add_index(IndexDef::new("id", "hash", "int", IndexOpts::pk()))
            .add_index(IndexDef::new("name", "tree", "string", IndexOpts::default()))
    }

    #[test]
    fn definition_json_round_trip() {
        let def = items_def();
        let parsed = NamespaceDef::from_json(&def.to_json().unwrap()).unwrap();
        assert_eq!(parsed, def);
        assert!(!parsed.has_schema());
    }

    #[test]
    fn definition_defaults_from_sparse_json() {
        let def = NamespaceDef::from_json(r#"{"name": "bare"}"#).unwrap();
        assert!(def.storage.enabled);
        assert_eq!(def.schema_json, "{}");
        assert!(def.indexes.is_empty());
    }

    #[test]
    fn index_validation() {
        assert!(IndexDef::new("id", "hash", "int", IndexOpts::pk())
            .validate()
            .is_ok());
        assert!(IndexDef::new("id", "btree", "int", IndexOpts::default())
            .validate()
            .is_err());
        let mut bad_pk = IndexOpts::pk();
        bad_pk.sparse = true;
        assert!(IndexDef::new("id", "hash", "int", bad_pk).validate().is_err());
        assert!(IndexDef::new("", "hash", "int", IndexOpts::default())
            .validate()
            .is_err());
    }

    #[test]
    fn enum_filter() {
        let opts = EnumNamespacesOpts::new().hide_system(true);
        assert!(opts.match_name_filter("items"));
        assert!(!opts.match_name_filter("#config"));

        let opts = EnumNamespacesOpts::new().with_filter("ITEMS");
        assert!(opts.match_name_filter("items"));
        assert!(!opts.match_name_filter("orders"));
        assert!(!opts.match_name_filter("#items"));

        let opts = EnumNamespacesOpts::new()
            .only_names(true)
            .hide_temporary(true)
            .only_names(false);
        assert!(!opts.is_only_names());
        assert!(opts.is_hide_temporary());
        assert!(!opts.is_hide_system());
    }

    #[test]
    fn tags_matcher_versions() {
        let mut tm = TagsMatcher::new();
        assert!(tm.ensure("id"));
        assert!(tm.ensure("name"));
        assert!(!tm.ensure("id"));
        assert_eq!(tm.version(), 2);
        assert_eq!(tm.tag("name"), Some(1));

        let decoded = TagsMatcher::decode(&tm.encode().unwrap()).unwrap();
        assert_eq!(decoded.tags(), tm.tags());
        assert_eq!(decoded.tag("name"), Some(1));
        assert_eq!(decoded.version(), 2);
    }

    #[test]
    fn repl_state_json() {
        let state = ReplicationState {
            last_lsn: Lsn::from_raw(10),
            data_count: 3,
            ..ReplicationState::default()
        };
        let parsed = ReplicationState::from_json(&state.to_json().unwrap()).unwrap();
        assert_eq!(parsed, state);
    }
}

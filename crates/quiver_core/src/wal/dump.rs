//! Human readable renderings of WAL records.

use super::record::{ModifyMode, WalPayload, WalRecord};
use serde_json::{json, Map, Value};
use std::fmt::Write;

fn viewed_json(view: &str) -> Value {
    serde_json::from_str(view).unwrap_or_else(|_| Value::String(view.to_string()))
}

impl WalRecord {
    /// Renders the record on one line. Item payloads go through `viewer`.
    pub fn dump(&self, viewer: &dyn Fn(&[u8]) -> String) -> String {
        let mut out = String::from(self.record_type().name());
        if self.in_transaction {
            out.push_str(" InTransaction");
        }

        // Writing to a String cannot fail.
        let _ = match &self.payload {
            WalPayload::Empty
            | WalPayload::NamespaceDrop
            | WalPayload::InitTransaction
            | WalPayload::CommitTransaction
            | WalPayload::ResetLocalWal => Ok(()),
            WalPayload::ItemUpdate { id } => write!(out, " rowId={id}"),
            WalPayload::ItemModify { cjson, mode, .. } => {
                let verb = if *mode == ModifyMode::Delete {
                    "Delete"
                } else {
                    "Update"
                };
                write!(out, " {verb} {}", viewer(cjson))
            }
            WalPayload::PutMeta { key, value } => write!(out, " {key}={value}"),
            WalPayload::RawItem { id, cjson } => write!(out, " rowId={id}: {}", viewer(cjson)),
            WalPayload::TagsMatcher { data } => write!(out, " {} bytes", data.len()),
            WalPayload::ReplState { state: text }
            | WalPayload::IndexAdd { index: text }
            | WalPayload::IndexDrop { index: text }
            | WalPayload::IndexUpdate { index: text }
            | WalPayload::UpdateQuery { query: text }
            | WalPayload::NamespaceAdd { definition: text }
            | WalPayload::NamespaceRename { new_name: text }
            | WalPayload::ForceSync { definition: text }
            | WalPayload::SetSchema { schema: text }
            | WalPayload::WalSync { state: text } => write!(out, " {text}"),
        };
        out
    }

    /// Renders the record as a JSON object.
    pub fn to_json(&self, viewer: &dyn Fn(&[u8]) -> String) -> Value {
        let mut obj = Map::new();
        obj.insert("type".into(), json!(self.record_type().name()));
        if self.in_transaction {
            obj.insert("in_transaction".into(), json!(true));
        }

        match &self.payload {
            WalPayload::Empty
            | WalPayload::NamespaceDrop
            | WalPayload::InitTransaction
            | WalPayload::CommitTransaction
            | WalPayload::ResetLocalWal => {}
            WalPayload::ItemUpdate { id } => {
                obj.insert("row_id".into(), json!(id.as_i32()));
            }
            WalPayload::ItemModify {
                cjson,
                tm_version,
                mode,
            } => {
                obj.insert("mode".into(), json!(mode.to_string()));
                obj.insert("tm_version".into(), json!(tm_version));
                obj.insert("item".into(), viewed_json(&viewer(cjson)));
            }
            WalPayload::PutMeta { key, value } => {
                obj.insert("key".into(), json!(key));
                obj.insert("value".into(), json!(value));
            }
            WalPayload::RawItem { id, cjson } => {
                obj.insert("row_id".into(), json!(id.as_i32()));
                obj.insert("item".into(), viewed_json(&viewer(cjson)));
            }
            WalPayload::TagsMatcher { data } => {
                obj.insert("size".into(), json!(data.len()));
            }
            WalPayload::NamespaceRename { new_name } => {
                obj.insert("new_name".into(), json!(new_name));
            }
            WalPayload::UpdateQuery { query } => {
                obj.insert("query".into(), json!(query));
            }
            WalPayload::ReplState { state: text }
            | WalPayload::IndexAdd { index: text }
            | WalPayload::IndexDrop { index: text }
            | WalPayload::IndexUpdate { index: text }
            | WalPayload::NamespaceAdd { definition: text }
            | WalPayload::ForceSync { definition: text }
            | WalPayload::SetSchema { schema: text }
            | WalPayload::WalSync { state: text } => {
                obj.insert("data".into(), viewed_json(text));
            }
        }
        Value::Object(obj)
    }
}

//! Documents and items stored in namespaces.

mod codec;

pub use codec::{cjson_viewer, decode_document, document_to_json, encode_document};

use crate::types::ItemId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A scalar field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Variant {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// Double precision float.
    Double(f64),
    /// UTF-8 string.
    String(String),
}

impl Variant {
    /// Returns the integer value, if this is an `Int`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string value, if this is a `String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true for `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts to a primary-key value. Only `Int` and `String` qualify.
    #[must_use]
    pub fn to_pk(&self) -> Option<PkValue> {
        match self {
            Self::Int(v) => Some(PkValue::Int(*v)),
            Self::String(s) => Some(PkValue::String(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Primary-key value of an item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PkValue {
    /// Integer key.
    Int(i64),
    /// String key.
    String(String),
}

impl fmt::Display for PkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
        }
    }
}

/// Field map of a stored document. Keys are ordered so encodings are stable.
pub type Document = BTreeMap<String, Variant>;

/// A document on its way into or out of a namespace.
///
/// Precepts are computed-value instructions of the form
/// `field=function(args)`, evaluated when the item is written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Item {
    fields: Document,
    precepts: Vec<String>,
    id: Option<ItemId>,
}

impl Item {
    /// Creates an empty item.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing document.
    #[must_use]
    pub fn from_document(fields: Document) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    /// Sets a field, builder style.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Variant>) -> Self {
        self.set(field, value);
        self
    }

    /// Sets a field.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Variant>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Returns a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Variant> {
        self.fields.get(field)
    }

    /// Replaces the precept list.
    pub fn set_precepts(&mut self, precepts: Vec<String>) {
        self.precepts = precepts;
    }

    /// Returns the precept list.
    #[must_use]
    pub fn precepts(&self) -> &[String] {
        &self.precepts
    }

    /// Returns the fields.
    #[must_use]
    pub fn fields(&self) -> &Document {
        &self.fields
    }

    /// Consumes the item, returning its fields.
    #[must_use]
    pub fn into_fields(self) -> Document {
        self.fields
    }

    /// Row id assigned by the namespace, if stored.
    #[must_use]
    pub fn id(&self) -> Option<ItemId> {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: ItemId) {
        self.id = Some(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_accessors() {
        let item = Item::new().with("id", 7).with("name", "kettle");
        assert_eq!(item.get("id"), Some(&Variant::Int(7)));
        assert_eq!(item.get("name").and_then(Variant::as_str), Some("kettle"));
        assert!(item.get("missing").is_none());
        assert!(item.id().is_none());
    }

    #[test]
    fn pk_values() {
        assert_eq!(Variant::Int(3).to_pk(), Some(PkValue::Int(3)));
        assert_eq!(
            Variant::from("a").to_pk(),
            Some(PkValue::String("a".into()))
        );
        assert_eq!(Variant::Double(1.5).to_pk(), None);
        assert_eq!(Variant::Null.to_pk(), None);
    }
}

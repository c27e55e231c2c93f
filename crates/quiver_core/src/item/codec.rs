//! Compact binary encoding of documents.

use super::{Document, Variant};
use crate::error::{CoreError, CoreResult};
use serde_json::{Map, Number, Value};

/// Encodes a document as CBOR.
pub fn encode_document(doc: &Document) -> CoreResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(doc, &mut out).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(out)
}

/// Decodes a document produced by [`encode_document`].
pub fn decode_document(bytes: &[u8]) -> CoreResult<Document> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
}

/// Renders a document as a JSON object.
#[must_use]
pub fn document_to_json(doc: &Document) -> Value {
    let mut map = Map::new();
    for (key, value) in doc {
        let v = match value {
            Variant::Null => Value::Null,
            Variant::Bool(b) => Value::Bool(*b),
            Variant::Int(i) => Value::Number((*i).into()),
            Variant::Double(d) => Number::from_f64(*d).map_or(Value::Null, Value::Number),
            Variant::String(s) => Value::String(s.clone()),
        };
        map.insert(key.clone(), v);
    }
    Value::Object(map)
}

/// Returns a viewer that renders encoded documents as JSON text, for use
/// with WAL record dumps.
pub fn cjson_viewer() -> impl Fn(&[u8]) -> String {
    |bytes: &[u8]| match decode_document(bytes) {
        Ok(doc) => document_to_json(&doc).to_string(),
        Err(_) => format!("<{} undecodable bytes>", bytes.len()),
    }
}

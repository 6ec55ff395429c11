//! Multi-document YAML handling
//!
//! Rendered addon manifests are multi-document YAML streams. Documents are
//! parsed into `serde_json::Value` in source order; apply walks the list
//! forward, delete walks it backward.

use serde::Deserialize;
use serde_json::Value;

use crate::error::Error;
use crate::Result;

/// Parse a multi-document YAML stream into ordered JSON documents.
///
/// Empty documents (stray `---` separators, comment-only blocks) are
/// dropped.
pub fn split_documents(text: &str) -> Result<Vec<Value>> {
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(doc)
            .map_err(|e| Error::serialization(format!("parsing manifest document: {e}")))?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

/// Read and split a multi-document YAML file
pub fn split_file(path: &std::path::Path) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::internal(format!("reading {}: {e}", path.display())))?;
    split_documents(&text)
}

//! File metadata blobs.
//!
//! Metadata travels as `name FIELD_SEP value` records joined by `RECORD_SEP`.

use crate::{FIELD_SEPARATOR, RECORD_SEPARATOR};
use serde::{Deserialize, Serialize};

/// One metadata entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameValuePair {
    pub name: String,
    pub value: String,
}

impl NameValuePair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// How a set-metadata request combines with existing metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetadataFlag {
    /// Replace all existing entries.
    #[default]
    Overwrite,
    /// Insert missing entries and update existing ones.
    Merge,
}

impl MetadataFlag {
    pub fn as_byte(&self) -> u8 {
        match self {
            MetadataFlag::Overwrite => b'O',
            MetadataFlag::Merge => b'M',
        }
    }
}

/// Serializes entries into a metadata blob.
pub fn pack_metadata(meta_list: &[NameValuePair]) -> String {
    let mut out = String::new();
    for (i, pair) in meta_list.iter().enumerate() {
        if i > 0 {
            out.push(RECORD_SEPARATOR);
        }
        out.push_str(&pair.name);
        out.push(FIELD_SEPARATOR);
        out.push_str(&pair.value);
    }
    out
}

/// Splits a metadata blob back into entries.
///
/// A record without a field separator yields an entry with an empty value.
pub fn split_metadata(meta_buff: &str) -> Vec<NameValuePair> {
    if meta_buff.is_empty() {
        return Vec::new();
    }

    meta_buff
        .split(RECORD_SEPARATOR)
        .map(|row| match row.split_once(FIELD_SEPARATOR) {
            Some((name, value)) => NameValuePair::new(name, value),
            None => NameValuePair::new(row, ""),
        })
        .collect()
}

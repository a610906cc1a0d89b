use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound appended to a prefix to build an `_all_docs` key range.
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<KvDocument>,
}

/// One key of the store, persisted as its own document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub value: Value,
    /// Unix epoch milliseconds after which the document counts as absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

/// Minimal view used to read a document revision.
#[derive(Debug, Deserialize)]
pub struct RevisionOnly {
    #[serde(rename = "_rev")]
    pub rev: String,
}

impl KvDocument {
    pub fn new(id: String, value: Value, ttl: Option<Duration>, now: SystemTime) -> Self {
        Self {
            id,
            rev: None,
            value,
            expires_at_ms: ttl.map(|ttl| epoch_millis(now + ttl)),
        }
    }

    pub fn is_live(&self, now: SystemTime) -> bool {
        self.expires_at_ms
            .is_none_or(|deadline| epoch_millis(now) < deadline)
    }
}

fn epoch_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Escape the characters that cannot appear verbatim in a document path segment.
pub fn doc_path(key: &str) -> String {
    let mut path = String::with_capacity(key.len());
    for ch in key.chars() {
        match ch {
            '%' => path.push_str("%25"),
            '/' => path.push_str("%2F"),
            '?' => path.push_str("%3F"),
            '#' => path.push_str("%23"),
            _ => path.push(ch),
        }
    }
    path
}

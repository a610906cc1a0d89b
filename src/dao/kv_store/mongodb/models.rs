use std::time::{Duration, SystemTime};

use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};

/// Stored form of one key. The value is kept as JSON text so arbitrary keys survive BSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoKvDocument {
    #[serde(rename = "_id")]
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime>,
}

impl MongoKvDocument {
    pub fn new(key: String, value: String, ttl: Option<Duration>, now: SystemTime) -> Self {
        Self {
            key,
            value,
            expires_at: ttl.map(|ttl| DateTime::from_system_time(now + ttl)),
        }
    }

    pub fn is_live(&self, now: SystemTime) -> bool {
        self.expires_at
            .is_none_or(|deadline| DateTime::from_system_time(now) < deadline)
    }
}

pub fn key_filter(key: &str) -> Document {
    doc! { "_id": key }
}

/// Documents whose key starts with `prefix` and that have not expired yet.
///
/// The TTL monitor only runs about once a minute, so expiry is filtered here as well.
pub fn live_prefix_filter(prefix: &str, now: SystemTime) -> Document {
    let pattern = format!("^{}", escape_regex(prefix));
    let now = DateTime::from_system_time(now);
    doc! {
        "_id": { "$regex": pattern },
        "$or": [
            { "expires_at": { "$exists": false } },
            { "expires_at": { "$gt": now } },
        ],
    }
}

fn escape_regex(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if "\\^$.|?*+()[]{}".contains(ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::Checksum;

/// a commit object - one complete snapshot of a filesystem tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// root tree checksum
    pub tree: Checksum,
    /// root directory metadata checksum
    pub meta: Checksum,
    /// parent commit checksum (None for the first commit on a ref)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Checksum>,
    /// unix timestamp (seconds since epoch)
    pub timestamp: i64,
    /// one-line summary
    pub subject: String,
    /// free-form body text
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    /// optional key-value metadata (uses BTreeMap for deterministic serialization)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Commit {
    /// create a new commit with the current time
    pub fn new(
        tree: Checksum,
        meta: Checksum,
        parent: Option<Checksum>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            tree,
            meta,
            parent,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            subject: subject.into(),
            body: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// create a new commit with explicit timestamp
    pub fn with_timestamp(
        tree: Checksum,
        meta: Checksum,
        parent: Option<Checksum>,
        timestamp: i64,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            tree,
            meta,
            parent,
            timestamp,
            subject: subject.into(),
            body: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// set the body text
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// add metadata key-value pair
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// is this an initial commit (no parent)
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

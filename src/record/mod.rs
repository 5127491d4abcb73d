//! Record model shared by every sink
//!
//! A record type declares an explicit, versioned schema: a kind name, a
//! schema version and a stable list of scalar fields. The relational index
//! derives its columns from that list and the JSON export serialises the same
//! struct, so the two never drift apart.

mod sort_key;
mod types;

pub use sort_key::{FirstLetter, SortKey};
pub use types::{Article, Medicine};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A typed payload produced by an extractor
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Kind name; also the table name in the index and the tree name in the
    /// document store. Must be a plain lowercase identifier.
    const KIND: &'static str;

    /// Bumped whenever `FIELDS` changes
    const SCHEMA_VERSION: u32;

    /// Scalar fields mirrored as index columns, in a fixed order
    const FIELDS: &'static [&'static str];

    /// Human-meaningful unique key (title, name, term)
    fn natural_key(&self) -> &str;

    /// Values for `FIELDS`, same order and length
    fn field_values(&self) -> Vec<Option<String>>;

    /// Multi-valued tag or category list
    fn tags(&self) -> &[String] {
        &[]
    }

    /// Text the sort key is derived from
    fn sort_source(&self) -> &str {
        self.natural_key()
    }

    /// Plain-text rendering for `TextExports/`
    fn render_text(&self) -> String {
        let mut text = String::new();
        text.push_str(self.natural_key());
        text.push_str("\n\n");

        for (name, value) in Self::FIELDS.iter().zip(self.field_values()) {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                text.push_str(&format!("{}: {}\n", name, value));
            }
        }

        let tags = self.tags();
        if !tags.is_empty() {
            text.push_str(&format!("tags: {}\n", tags.join(", ")));
        }

        text
    }
}

/// Envelope written to the document store and the JSON export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument<R> {
    pub schema_version: u32,
    pub kind: String,
    /// Surrogate id, stable once assigned
    pub id: u64,
    pub natural_key: String,
    pub sort_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub record: R,
}

impl<R: Record> StoredDocument<R> {
    /// Wraps a freshly extracted record
    pub fn new(id: u64, sort_key: String, record: R, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: R::SCHEMA_VERSION,
            kind: R::KIND.to_string(),
            id,
            natural_key: record.natural_key().to_string(),
            sort_key,
            created_at: now,
            updated_at: now,
            record,
        }
    }

    /// Replaces the payload, keeping the id and creation time
    pub fn updated(self, sort_key: String, record: R, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: R::SCHEMA_VERSION,
            sort_key,
            natural_key: record.natural_key().to_string(),
            updated_at: now,
            record,
            ..self
        }
    }
}

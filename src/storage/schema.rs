//! Database schema definitions
//!
//! The `runs` table is static. Record tables are generated per record kind
//! from the kind's field list the first time that kind is saved.

use crate::storage::traits::{StorageError, StorageResult};

/// SQL schema shared by every kind
pub const SCHEMA_SQL: &str = r#"
-- Track harvest runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    dispatched INTEGER NOT NULL DEFAULT 0,
    completed INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    records_saved INTEGER NOT NULL DEFAULT 0,
    records_failed INTEGER NOT NULL DEFAULT 0
);
"#;

/// Columns every record table carries besides its scalar fields
pub const FIXED_COLUMNS: &[&str] = &[
    "id",
    "document_id",
    "natural_key",
    "sort_key",
    "schema_version",
    "created_at",
    "updated_at",
];

/// Initializes the static part of the schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Name of the child table holding a kind's tags
pub fn tags_table(kind: &str) -> String {
    format!("{}_tags", kind)
}

/// Builds the DDL for a record kind
///
/// Kind and field names are interpolated into SQL, so they must be plain
/// identifiers and must not shadow a fixed column.
pub fn record_table_sql(kind: &str, fields: &[&str]) -> StorageResult<String> {
    check_identifier(kind)?;
    for field in fields {
        check_identifier(field)?;
        if FIXED_COLUMNS.contains(field) {
            return Err(StorageError::Schema(format!(
                "field '{}' of kind '{}' collides with a built-in column",
                field, kind
            )));
        }
    }

    let field_columns: String = fields
        .iter()
        .map(|field| format!("    {} TEXT,\n", field))
        .collect();
    let tags = tags_table(kind);

    Ok(format!(
        r#"
CREATE TABLE IF NOT EXISTS {kind} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL,
    natural_key TEXT NOT NULL UNIQUE,
    sort_key TEXT NOT NULL,
    schema_version INTEGER NOT NULL,
{field_columns}    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_{kind}_natural_key ON {kind}(natural_key);
CREATE INDEX IF NOT EXISTS idx_{kind}_sort_key ON {kind}(sort_key);

CREATE TABLE IF NOT EXISTS {tags} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id INTEGER NOT NULL REFERENCES {kind}(id) ON DELETE CASCADE,
    tag TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_{tags}_record ON {tags}(record_id);
CREATE INDEX IF NOT EXISTS idx_{tags}_tag ON {tags}(tag);
"#
    ))
}

/// Accepts `[a-z][a-z0-9_]*`
pub fn check_identifier(name: &str) -> StorageResult<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StorageError::Schema(format!(
            "'{}' is not a valid identifier",
            name
        )))
    }
}

//! SQLite relational index
//!
//! One connection per index, guarded by a mutex, so concurrent saves are
//! serialised here.

use crate::record::{Record, StoredDocument};
use crate::storage::schema::{self, initialize_schema, record_table_sql, tags_table};
use crate::storage::traits::{RecordIndex, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus, RunTotals};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// A record row as stored in the index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    pub id: i64,
    pub document_id: u64,
    pub natural_key: String,
    pub sort_key: String,
    pub schema_version: u32,
    /// Scalar field values in column order
    pub fields: Vec<(String, Option<String>)>,
    pub created_at: String,
    pub updated_at: String,
}

/// SQLite index backend
pub struct SqliteIndex {
    conn: Mutex<Connection>,
    /// Kinds whose tables are known to exist
    ensured: Mutex<HashSet<&'static str>>,
}

impl SqliteIndex {
    /// Opens or creates the index database at `path`
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        Self::with_connection(conn)
    }

    /// Creates an in-memory index
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            ensured: Mutex::new(HashSet::new()),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Poisoned(format!("index connection: {}", e)))
    }

    /// Creates the record and tag tables for `R` if they are missing
    pub fn ensure_schema<R: Record>(&self) -> StorageResult<()> {
        let mut ensured = self
            .ensured
            .lock()
            .map_err(|e| StorageError::Poisoned(format!("schema cache: {}", e)))?;
        if ensured.contains(R::KIND) {
            return Ok(());
        }

        let sql = record_table_sql(R::KIND, R::FIELDS)?;
        self.conn()?.execute_batch(&sql)?;
        ensured.insert(R::KIND);
        tracing::debug!("Ensured index tables for kind '{}'", R::KIND);
        Ok(())
    }

    /// Inserts or updates the row for a document's natural key
    ///
    /// On conflict the row keeps its id and `created_at`. Returns the row id.
    pub fn upsert<R: Record>(&self, document: &StoredDocument<R>) -> StorageResult<i64> {
        self.ensure_schema::<R>()?;

        let values = document.record.field_values();
        if values.len() != R::FIELDS.len() {
            return Err(StorageError::Schema(format!(
                "kind '{}' declares {} fields but produced {} values",
                R::KIND,
                R::FIELDS.len(),
                values.len()
            )));
        }

        let kind = R::KIND;
        let columns: String = R::FIELDS.iter().map(|f| format!(", {}", f)).collect();
        // ?1..?4 are the fixed columns, fields follow, then the two timestamps
        let placeholders: String = (0..R::FIELDS.len())
            .map(|i| format!(", ?{}", i + 5))
            .collect();
        let created_idx = R::FIELDS.len() + 5;
        let updated_idx = created_idx + 1;
        let updates: String = R::FIELDS
            .iter()
            .map(|f| format!(", {f} = excluded.{f}"))
            .collect();

        let sql = format!(
            "INSERT INTO {kind} (document_id, natural_key, sort_key, schema_version{columns}, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4{placeholders}, ?{created_idx}, ?{updated_idx})
             ON CONFLICT(natural_key) DO UPDATE SET
                document_id = excluded.document_id,
                sort_key = excluded.sort_key,
                schema_version = excluded.schema_version{updates},
                updated_at = excluded.updated_at
             RETURNING id"
        );

        let mut bound: Vec<Value> = vec![
            Value::Integer(document.id as i64),
            Value::Text(document.natural_key.clone()),
            Value::Text(document.sort_key.clone()),
            Value::Integer(i64::from(document.schema_version)),
        ];
        bound.extend(values.into_iter().map(|v| v.map_or(Value::Null, Value::Text)));
        bound.push(Value::Text(document.created_at.to_rfc3339()));
        bound.push(Value::Text(document.updated_at.to_rfc3339()));

        let conn = self.conn()?;
        let row_id = conn.query_row(&sql, params_from_iter(bound), |row| row.get(0))?;
        Ok(row_id)
    }

    /// Replaces every tag of a row
    ///
    /// Blank tags are dropped and duplicates collapsed, keeping first order.
    pub fn replace_tags<R: Record>(&self, row_id: i64, tags: &[String]) -> StorageResult<()> {
        self.ensure_schema::<R>()?;
        let table = tags_table(R::KIND);

        let mut seen = HashSet::new();
        let tags: Vec<&str> = tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty() && seen.insert(*t))
            .collect();

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            &format!("DELETE FROM {} WHERE record_id = ?1", table),
            params![row_id],
        )?;
        {
            let mut stmt =
                tx.prepare(&format!("INSERT INTO {} (record_id, tag) VALUES (?1, ?2)", table))?;
            for tag in tags {
                stmt.execute(params![row_id, tag])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Looks a record up by natural key
    pub fn find_by_key<R: Record>(&self, natural_key: &str) -> StorageResult<Option<IndexRow>> {
        self.ensure_schema::<R>()?;
        let sql = select_rows_sql::<R>("natural_key = ?1");
        let conn = self.conn()?;
        let row = conn
            .query_row(&sql, params![natural_key], |row| read_row::<R>(row))
            .optional()?;
        Ok(row)
    }

    /// All records in a sort key bucket, ordered by natural key
    pub fn find_by_sort_key<R: Record>(&self, sort_key: &str) -> StorageResult<Vec<IndexRow>> {
        self.ensure_schema::<R>()?;
        let sql = format!(
            "{} ORDER BY natural_key",
            select_rows_sql::<R>("sort_key = ?1")
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![sort_key], |row| read_row::<R>(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Tags of a row in insertion order
    pub fn tags_for<R: Record>(&self, row_id: i64) -> StorageResult<Vec<String>> {
        self.ensure_schema::<R>()?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT tag FROM {} WHERE record_id = ?1 ORDER BY id",
            tags_table(R::KIND)
        ))?;
        let tags = stmt
            .query_map(params![row_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tags)
    }

    // ===== Run Management =====

    /// Records the start of a run
    pub fn create_run(&self, kind: &str, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO runs (kind, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![kind, now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Stores the final status and counters of a run
    pub fn finish_run(&self, run_id: i64, status: RunStatus, totals: &RunTotals) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, dispatched = ?3, completed = ?4,
             failed = ?5, records_saved = ?6, records_failed = ?7 WHERE id = ?8",
            params![
                status.to_db_string(),
                now,
                totals.dispatched,
                totals.completed,
                totals.failed,
                totals.records_saved,
                totals.records_failed,
                run_id
            ],
        )?;
        Ok(())
    }

    /// Gets a run by ID
    pub fn get_run(&self, run_id: i64) -> StorageResult<Option<RunRecord>> {
        let conn = self.conn()?;
        let run = conn
            .query_row(
                "SELECT id, kind, started_at, finished_at, config_hash, status, dispatched,
                 completed, failed, records_saved, records_failed FROM runs WHERE id = ?1",
                params![run_id],
                read_run,
            )
            .optional()?;
        Ok(run)
    }

    /// Gets the most recent run
    pub fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let conn = self.conn()?;
        let run = conn
            .query_row(
                "SELECT id, kind, started_at, finished_at, config_hash, status, dispatched,
                 completed, failed, records_saved, records_failed FROM runs ORDER BY id DESC LIMIT 1",
                [],
                read_run,
            )
            .optional()?;
        Ok(run)
    }
}

impl RecordIndex for SqliteIndex {
    fn has_kind(&self, kind: &str) -> StorageResult<bool> {
        schema::check_identifier(kind)?;
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![kind],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn count_records(&self, kind: &str) -> StorageResult<u64> {
        schema::check_identifier(kind)?;
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", kind), [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn field_columns(&self, kind: &str) -> StorageResult<Vec<String>> {
        schema::check_identifier(kind)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", kind))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns
            .into_iter()
            .filter(|c| !schema::FIXED_COLUMNS.contains(&c.as_str()))
            .collect())
    }

    fn count_non_empty(&self, kind: &str, field: &str) -> StorageResult<u64> {
        schema::check_identifier(kind)?;
        schema::check_identifier(field)?;
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {kind} WHERE {field} IS NOT NULL AND TRIM({field}) != ''"
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn tag_frequencies(&self, kind: &str, limit: usize) -> StorageResult<Vec<(String, u64)>> {
        schema::check_identifier(kind)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT tag, COUNT(*) AS frequency, MIN(id) AS first_seen
             FROM {}
             GROUP BY tag
             ORDER BY frequency DESC, first_seen ASC
             LIMIT ?1",
            tags_table(kind)
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn select_rows_sql<R: Record>(filter: &str) -> String {
    let columns: String = R::FIELDS.iter().map(|f| format!(", {}", f)).collect();
    format!(
        "SELECT id, document_id, natural_key, sort_key, schema_version, created_at, updated_at{} FROM {} WHERE {}",
        columns,
        R::KIND,
        filter
    )
}

fn read_row<R: Record>(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndexRow> {
    let mut fields = Vec::with_capacity(R::FIELDS.len());
    for (i, name) in R::FIELDS.iter().enumerate() {
        fields.push((name.to_string(), row.get::<_, Option<String>>(7 + i)?));
    }

    Ok(IndexRow {
        id: row.get(0)?,
        document_id: row.get::<_, i64>(1)? as u64,
        natural_key: row.get(2)?,
        sort_key: row.get(3)?,
        schema_version: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        fields,
    })
}

fn read_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        kind: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        config_hash: row.get(4)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(5)?).unwrap_or(RunStatus::Failed),
        totals: RunTotals {
            dispatched: row.get(6)?,
            completed: row.get(7)?,
            failed: row.get(8)?,
            records_saved: row.get(9)?,
            records_failed: row.get(10)?,
        },
    })
}

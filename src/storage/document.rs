//! Document store backed by sled
//!
//! Each record kind gets two trees: `<kind>` maps the surrogate id to the
//! JSON envelope and `<kind>.keys` maps the natural key to the id.

use crate::record::{Record, StoredDocument};
use crate::storage::traits::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// sled-backed document store
pub struct DocumentStore {
    db: sled::Db,
    path: PathBuf,
    requested_path: PathBuf,
}

impl DocumentStore {
    /// Opens the store at `path`
    ///
    /// If another process holds the store's lock, a sibling store named
    /// `<stem>_<timestamp><ext>` is created instead and a warning is logged:
    /// from then on this run's documents live in a different file.
    pub fn open(path: &Path) -> StorageResult<Self> {
        match open_db(path) {
            Ok(db) => Ok(Self {
                db,
                path: path.to_path_buf(),
                requested_path: path.to_path_buf(),
            }),
            Err(StorageError::Locked(locked)) => {
                let fallback = fallback_path(&locked, Utc::now());
                tracing::warn!(
                    "Document store {} is locked by another process; writing to {} instead. \
                     Documents are now split across both stores.",
                    locked.display(),
                    fallback.display()
                );
                let db = open_db(&fallback)?;
                Ok(Self {
                    db,
                    path: fallback,
                    requested_path: locked,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Path actually in use
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the store had to fall back to a new file
    pub fn is_fallback(&self) -> bool {
        self.path != self.requested_path
    }

    /// Finds the stored document for a natural key
    pub fn lookup<R: Record>(&self, natural_key: &str) -> StorageResult<Option<StoredDocument<R>>> {
        let keys = self.db.open_tree(keys_tree::<R>())?;
        let Some(raw_id) = keys.get(natural_key.as_bytes())? else {
            return Ok(None);
        };
        let id = decode_id(&raw_id)?;
        self.get::<R>(id)
    }

    /// Loads a document by surrogate id
    pub fn get<R: Record>(&self, id: u64) -> StorageResult<Option<StoredDocument<R>>> {
        let records = self.db.open_tree(R::KIND)?;
        match records.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Reserves a new surrogate id, starting at 1
    pub fn allocate_id(&self) -> StorageResult<u64> {
        Ok(self.db.generate_id()? + 1)
    }

    /// Writes a document and its key mapping atomically
    ///
    /// If the natural key already maps to a different id, that id wins and
    /// the returned document carries it.
    pub fn write<R: Record>(&self, document: StoredDocument<R>) -> StorageResult<StoredDocument<R>> {
        let records = self.db.open_tree(R::KIND)?;
        let keys = self.db.open_tree(keys_tree::<R>())?;

        let result = (&records, &keys).transaction(|(records, keys)| {
            let mut document = document.clone();
            if let Some(raw_id) = keys.get(document.natural_key.as_bytes())? {
                let existing = decode_id(&raw_id).map_err(ConflictableTransactionError::Abort)?;
                document.id = existing;
            }

            let bytes = serde_json::to_vec(&document)
                .map_err(|e| ConflictableTransactionError::Abort(StorageError::from(e)))?;
            let id_bytes = document.id.to_be_bytes();
            records.insert(&id_bytes[..], bytes)?;
            keys.insert(document.natural_key.as_bytes(), &id_bytes[..])?;
            Ok(document)
        });

        match result {
            Ok(document) => Ok(document),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(StorageError::Document(e)),
        }
    }

    /// Number of documents of a kind
    pub fn count<R: Record>(&self) -> StorageResult<usize> {
        Ok(self.db.open_tree(R::KIND)?.len())
    }

    /// Flushes dirty pages to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn keys_tree<R: Record>() -> String {
    format!("{}.keys", R::KIND)
}

fn decode_id(raw: &[u8]) -> StorageResult<u64> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| StorageError::Corrupt(format!("id of {} bytes", raw.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

fn open_db(path: &Path) -> StorageResult<sled::Db> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    match sled::open(path) {
        Ok(db) => Ok(db),
        Err(sled::Error::Io(e)) if is_lock_error(&e) => Err(StorageError::Locked(path.to_path_buf())),
        Err(e) => Err(e.into()),
    }
}

// sled 0.34 wraps a failed `try_lock_exclusive` in an `Other` io error
const SLED_LOCK_MESSAGE: &str = "could not acquire lock on";

fn is_lock_error(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock || e.to_string().starts_with(SLED_LOCK_MESSAGE)
}

/// Sibling path with a timestamp suffix, e.g. `documents_20240101_120000_123.sled`
pub fn fallback_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "documents".to_string());
    let suffix = now.format("%Y%m%d_%H%M%S_%3f");
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut candidate = path.with_file_name(format!("{}_{}{}", stem, suffix, extension));
    let mut attempt = 1;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{}_{}_{}{}", stem, suffix, attempt, extension));
        attempt += 1;
    }
    candidate
}

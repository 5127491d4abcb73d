//! Flat-file export
//!
//! Layout under the export root:
//! - `<bucket>/<file-name>.json`: pretty-printed document envelope
//! - `TextExports/<file-name>.txt`: plain-text rendering, when enabled
//!
//! The bucket is the record's sort key. Files are named after the natural
//! key, so re-saving a record overwrites its previous export. Keys that do
//! not survive sanitizing unchanged get `_<id>` appended.

use crate::record::{Record, StoredDocument};
use crate::storage::traits::StorageResult;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Directory holding the plain-text renderings
pub const TEXT_EXPORT_DIR: &str = "TextExports";

/// Upper bound on a sanitized file name, in characters
const MAX_FILE_NAME_CHARS: usize = 120;

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Files written for one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub json: PathBuf,
    pub text: Option<PathBuf>,
}

/// Writes records to the export tree
#[derive(Debug, Clone)]
pub struct FileExporter {
    root: PathBuf,
    text_export: bool,
}

impl FileExporter {
    pub fn new(root: impl Into<PathBuf>, text_export: bool) -> Self {
        Self {
            root: root.into(),
            text_export,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the JSON export for a document
    pub fn json_path<R: Record>(&self, document: &StoredDocument<R>) -> PathBuf {
        self.bucket_dir(&document.sort_key)
            .join(format!("{}.json", file_name_for(document)))
    }

    /// Exports a document, replacing any earlier export of the same key
    ///
    /// When `previous_sort_key` names a different bucket, the JSON file left
    /// in that bucket is removed.
    pub fn export<R: Record>(
        &self,
        document: &StoredDocument<R>,
        previous_sort_key: Option<&str>,
    ) -> StorageResult<ExportPaths> {
        let name = file_name_for(document);

        let json = self.bucket_dir(&document.sort_key).join(format!("{}.json", name));
        let body = serde_json::to_string_pretty(document)?;
        write_atomic(&json, body.as_bytes())?;

        if let Some(previous) = previous_sort_key.filter(|p| *p != document.sort_key) {
            let stale = self.bucket_dir(previous).join(format!("{}.json", name));
            match fs::remove_file(&stale) {
                Ok(()) => tracing::debug!("Removed stale export {}", stale.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let text = if self.text_export {
            let path = self.root.join(TEXT_EXPORT_DIR).join(format!("{}.txt", name));
            write_atomic(&path, document.record.render_text().as_bytes())?;
            Some(path)
        } else {
            None
        };

        Ok(ExportPaths { json, text })
    }

    fn bucket_dir(&self, sort_key: &str) -> PathBuf {
        self.root.join(sanitize_file_name(sort_key, "_"))
    }
}

/// Natural key as a file name, suffixed with the surrogate id when sanitizing
/// lost information so distinct keys never share a file
fn file_name_for<R: Record>(document: &StoredDocument<R>) -> String {
    let id = document.id.to_string();
    let name = sanitize_file_name(&document.natural_key, &id);
    if name == document.natural_key || name == id {
        return name;
    }

    let room = MAX_FILE_NAME_CHARS.saturating_sub(id.len() + 1);
    let stem: String = name.chars().take(room).collect();
    format!("{}_{}", stem.trim_end_matches(['.', ' ']), id)
}

/// Writes through a temporary sibling and renames it into place
fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    fs::write(&tmp, contents)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Turns arbitrary text into a portable file name
///
/// # Arguments
///
/// * `name` - Text to sanitize, usually a natural key
/// * `fallback` - Used when nothing usable is left, usually the surrogate id
///
/// # Returns
///
/// A non-empty name without path separators, reserved characters or
/// Windows device names, at most 120 characters long.
pub fn sanitize_file_name(name: &str, fallback: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let bounded: String = replaced.trim().chars().take(MAX_FILE_NAME_CHARS).collect();
    let trimmed = bounded.trim_end_matches(['.', ' ']);

    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        return fallback.to_string();
    }

    let stem = trimmed.split('.').next().unwrap_or(trimmed);
    if RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(stem)) {
        return format!("_{}", trimmed);
    }

    trimmed.to_string()
}

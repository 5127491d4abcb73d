//! Persistence layer
//!
//! Fans a record out to the document store, the relational index and the
//! export tree. Each save is a small state machine; the stage it stopped at
//! is reported when a sink fails. There is no transaction spanning the three
//! sinks, so a failed save can leave earlier sinks updated.

use crate::config::OutputConfig;
use crate::record::{Record, SortKey, StoredDocument};
use crate::storage::document::DocumentStore;
use crate::storage::export::{ExportPaths, FileExporter};
use crate::storage::sqlite::SqliteIndex;
use crate::storage::traits::{SaveStage, SinkWriteError, StorageError, StorageResult};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Where the three sinks live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub document_store: PathBuf,
    pub index: PathBuf,
    pub export_root: PathBuf,
    pub text_export: bool,
}

impl StorePaths {
    pub fn from_config(output: &OutputConfig) -> Self {
        Self {
            document_store: PathBuf::from(&output.document_store_path),
            index: PathBuf::from(&output.index_path),
            export_root: PathBuf::from(&output.export_root),
            text_export: output.text_export,
        }
    }

    /// Default layout below a single directory
    pub fn under(dir: &Path) -> Self {
        Self {
            document_store: dir.join("documents.sled"),
            index: dir.join("index.db"),
            export_root: dir.join("export"),
            text_export: true,
        }
    }
}

/// Outcome of a successful save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    /// Surrogate id in the document store
    pub id: u64,
    /// Row id in the relational index
    pub row_id: i64,
    /// Whether the natural key was new
    pub created: bool,
    pub exported: ExportPaths,
}

enum SaveState<R: Record> {
    Lookup,
    UpsertDocument {
        previous: Option<StoredDocument<R>>,
    },
    UpsertIndex {
        document: StoredDocument<R>,
        previous_sort_key: Option<String>,
        created: bool,
    },
    ReplaceTags {
        document: StoredDocument<R>,
        previous_sort_key: Option<String>,
        created: bool,
        row_id: i64,
    },
    ExportFile {
        document: StoredDocument<R>,
        previous_sort_key: Option<String>,
        created: bool,
        row_id: i64,
    },
    Done(SaveReport),
}

impl<R: Record> SaveState<R> {
    fn stage(&self) -> SaveStage {
        match self {
            SaveState::Lookup => SaveStage::Lookup,
            SaveState::UpsertDocument { .. } => SaveStage::UpsertDocument,
            SaveState::UpsertIndex { .. } => SaveStage::UpsertIndex,
            SaveState::ReplaceTags { .. } => SaveStage::ReplaceTags,
            SaveState::ExportFile { .. } => SaveStage::ExportFile,
            SaveState::Done(_) => SaveStage::Done,
        }
    }
}

/// The three sinks behind a single save call
///
/// Safe to share between workers; each sink serialises its own writes.
pub struct PersistenceLayer {
    documents: DocumentStore,
    index: SqliteIndex,
    exporter: FileExporter,
    sort_key: Arc<dyn SortKey>,
    // Held from lookup until the document write so a key gets one id
    key_lock: Mutex<()>,
}

impl PersistenceLayer {
    /// Opens all three sinks
    pub fn open(paths: &StorePaths, sort_key: Arc<dyn SortKey>) -> StorageResult<Self> {
        let documents = DocumentStore::open(&paths.document_store)?;
        let index = SqliteIndex::open(&paths.index)?;
        let exporter = FileExporter::new(&paths.export_root, paths.text_export);

        tracing::info!(
            "Persistence ready: documents={}, index={}, export={}",
            documents.path().display(),
            paths.index.display(),
            paths.export_root.display()
        );

        Ok(Self {
            documents,
            index,
            exporter,
            sort_key,
            key_lock: Mutex::new(()),
        })
    }

    /// Saves a record to every sink, logging any failure
    ///
    /// Returns `true` when all sinks were written.
    pub fn save<R: Record>(&self, record: &R) -> bool {
        match self.try_save(record) {
            Ok(report) => {
                tracing::debug!(
                    "Saved {} '{}' as id {} ({})",
                    R::KIND,
                    record.natural_key(),
                    report.id,
                    if report.created { "new" } else { "updated" }
                );
                true
            }
            Err(e) => {
                tracing::error!("{}", e);
                false
            }
        }
    }

    /// Saves a record to every sink
    ///
    /// An existing natural key keeps its surrogate id, index row and creation
    /// time; its payload, tags and exports are replaced.
    pub fn try_save<R: Record>(&self, record: &R) -> Result<SaveReport, SinkWriteError> {
        let natural_key = record.natural_key();
        if natural_key.trim().is_empty() {
            return Err(SinkWriteError::new(
                natural_key,
                SaveStage::Lookup,
                StorageError::InvalidRecord(format!("{} with an empty natural key", R::KIND)),
            ));
        }

        let sort_key = self.sort_key.sort_key(record.sort_source());
        let fail = |stage: SaveStage, e: StorageError| SinkWriteError::new(natural_key, stage, e);

        let guard = self
            .key_lock
            .lock()
            .map_err(|e| fail(SaveStage::Lookup, StorageError::Poisoned(e.to_string())))?;
        let mut guard = Some(guard);

        let mut state: SaveState<R> = SaveState::Lookup;
        loop {
            let stage = state.stage();
            state = match state {
                SaveState::Lookup => {
                    let previous = self
                        .documents
                        .lookup::<R>(natural_key)
                        .map_err(|e| fail(stage, e))?;
                    SaveState::UpsertDocument { previous }
                }
                SaveState::UpsertDocument { previous } => {
                    let now = Utc::now();
                    let (candidate, previous_sort_key) = match previous {
                        Some(existing) => {
                            let previous_sort_key = existing.sort_key.clone();
                            (
                                existing.updated(sort_key.clone(), record.clone(), now),
                                Some(previous_sort_key),
                            )
                        }
                        None => {
                            let id = self.documents.allocate_id().map_err(|e| fail(stage, e))?;
                            (
                                StoredDocument::new(id, sort_key.clone(), record.clone(), now),
                                None,
                            )
                        }
                    };
                    let created = previous_sort_key.is_none();
                    let document = self.documents.write(candidate).map_err(|e| fail(stage, e))?;
                    guard.take();
                    SaveState::UpsertIndex {
                        document,
                        previous_sort_key,
                        created,
                    }
                }
                SaveState::UpsertIndex {
                    document,
                    previous_sort_key,
                    created,
                } => {
                    let row_id = self.index.upsert(&document).map_err(|e| fail(stage, e))?;
                    SaveState::ReplaceTags {
                        document,
                        previous_sort_key,
                        created,
                        row_id,
                    }
                }
                SaveState::ReplaceTags {
                    document,
                    previous_sort_key,
                    created,
                    row_id,
                } => {
                    self.index
                        .replace_tags::<R>(row_id, document.record.tags())
                        .map_err(|e| fail(stage, e))?;
                    SaveState::ExportFile {
                        document,
                        previous_sort_key,
                        created,
                        row_id,
                    }
                }
                SaveState::ExportFile {
                    document,
                    previous_sort_key,
                    created,
                    row_id,
                } => {
                    let exported = self
                        .exporter
                        .export(&document, previous_sort_key.as_deref())
                        .map_err(|e| fail(stage, e))?;
                    SaveState::Done(SaveReport {
                        id: document.id,
                        row_id,
                        created,
                        exported,
                    })
                }
                SaveState::Done(report) => return Ok(report),
            };
        }
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub fn index(&self) -> &SqliteIndex {
        &self.index
    }

    pub fn exporter(&self) -> &FileExporter {
        &self.exporter
    }

    pub fn export_root(&self) -> &Path {
        self.exporter.root()
    }

    /// Flushes the document store
    pub fn close(&self) -> StorageResult<()> {
        self.documents.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FirstLetter, Medicine};
    use crate::storage::traits::{RecordIndex, Sink};

    fn medicine(name: &str, pinyin: &str, efficacy: &str, tags: &[&str]) -> Medicine {
        Medicine {
            name: name.to_string(),
            pinyin: Some(pinyin.to_string()),
            efficacy: Some(efficacy.to_string()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Medicine::default()
        }
    }

    fn open(dir: &Path) -> PersistenceLayer {
        PersistenceLayer::open(&StorePaths::under(dir), Arc::new(FirstLetter)).unwrap()
    }

    #[test]
    fn test_save_writes_every_sink() {
        let dir = tempfile::tempdir().unwrap();
        let layer = open(dir.path());

        let report = layer
            .try_save(&medicine("阿胶", "ē jiāo", "补血", &["补血药"]))
            .unwrap();
        assert!(report.created);

        let doc = layer.documents().lookup::<Medicine>("阿胶").unwrap().unwrap();
        assert_eq!(doc.id, report.id);
        assert_eq!(doc.sort_key, "E");

        let row = layer.index().find_by_key::<Medicine>("阿胶").unwrap().unwrap();
        assert_eq!(row.id, report.row_id);
        assert_eq!(row.document_id, report.id);
        assert_eq!(layer.index().tags_for::<Medicine>(row.id).unwrap(), vec!["补血药"]);

        assert_eq!(
            report.exported.json,
            layer.export_root().join("E").join("阿胶.json")
        );
        assert!(report.exported.json.exists());
    }

    #[test]
    fn test_resave_keeps_id_and_single_row() {
        let dir = tempfile::tempdir().unwrap();
        let layer = open(dir.path());

        let first = layer
            .try_save(&medicine("阿胶", "ē jiāo", "补血", &["补血药", "动物药"]))
            .unwrap();
        let second = layer
            .try_save(&medicine("阿胶", "ē jiāo", "滋阴润燥", &["补阴药"]))
            .unwrap();

        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(first.row_id, second.row_id);
        assert_eq!(layer.documents().count::<Medicine>().unwrap(), 1);
        assert_eq!(layer.index().count_records("medicine").unwrap(), 1);

        let doc = layer.documents().lookup::<Medicine>("阿胶").unwrap().unwrap();
        assert_eq!(doc.record.efficacy.as_deref(), Some("滋阴润燥"));
        assert!(doc.updated_at >= doc.created_at);
        assert_eq!(
            layer.index().tags_for::<Medicine>(second.row_id).unwrap(),
            vec!["补阴药"]
        );
    }

    #[test]
    fn test_sort_key_change_moves_export() {
        let dir = tempfile::tempdir().unwrap();
        let layer = open(dir.path());

        let first = layer.try_save(&medicine("阿胶", "ē jiāo", "补血", &[])).unwrap();
        let second = layer.try_save(&medicine("阿胶", "a jiao", "补血", &[])).unwrap();

        assert!(!first.exported.json.exists());
        assert!(second.exported.json.exists());
        assert_eq!(second.exported.json, layer.export_root().join("A").join("阿胶.json"));
    }

    #[test]
    fn test_empty_natural_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layer = open(dir.path());

        let err = layer.try_save(&medicine("  ", "a", "b", &[])).unwrap_err();
        assert_eq!(err.stage, SaveStage::Lookup);
        assert_eq!(err.sink, Sink::DocumentStore);
        assert!(!layer.save(&medicine("", "a", "b", &[])));
        assert!(!layer.index().has_kind("medicine").unwrap());
    }

    #[test]
    fn test_custom_sort_key() {
        let dir = tempfile::tempdir().unwrap();
        let sort_key = |source: &str| format!("len{}", source.chars().count());
        let layer = PersistenceLayer::open(&StorePaths::under(dir.path()), Arc::new(sort_key)).unwrap();

        assert!(layer.save(&medicine("当归", "dang gui", "补血活血", &[])));
        let doc = layer.documents().lookup::<Medicine>("当归").unwrap().unwrap();
        assert_eq!(doc.sort_key, "len8");
    }
}

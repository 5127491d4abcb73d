//! Integration tests for the persistence layer
//!
//! These run the three sinks against real files in a temporary directory.

use page_harvest::output::{load_statistics, write_statistics, StatisticsAggregator};
use page_harvest::record::{FirstLetter, Medicine, Record};
use page_harvest::storage::{PersistenceLayer, RecordIndex, StorePaths, TEXT_EXPORT_DIR};
use std::path::Path;
use std::sync::Arc;

fn medicine(name: &str, pinyin: &str, efficacy: &str, tags: &[&str]) -> Medicine {
    Medicine {
        name: name.to_string(),
        pinyin: Some(pinyin.to_string()),
        efficacy: Some(efficacy.to_string()),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        ..Medicine::default()
    }
}

fn open_layer(dir: &Path) -> PersistenceLayer {
    PersistenceLayer::open(&StorePaths::under(dir), Arc::new(FirstLetter)).expect("open")
}

#[test]
fn test_same_key_saved_twice_updates_in_place() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layer = open_layer(dir.path());

    let first = layer
        .try_save(&medicine("阿胶", "ē jiāo", "补血", &["补血药", "动物药"]))
        .expect("first save");
    let second = layer
        .try_save(&medicine("阿胶", "ē jiāo", "滋阴润燥", &["补阴药"]))
        .expect("second save");

    // Surrogate id and index row survive the update
    assert_eq!(first.id, second.id);
    assert_eq!(first.row_id, second.row_id);
    assert!(first.created);
    assert!(!second.created);

    let index = layer.index();
    assert_eq!(index.count_records(Medicine::KIND).expect("count"), 1);
    let row = index.find_by_key::<Medicine>("阿胶").expect("query").expect("row");
    let efficacy = row
        .fields
        .iter()
        .find(|(name, _)| name == "efficacy")
        .and_then(|(_, value)| value.clone());
    assert_eq!(efficacy.as_deref(), Some("滋阴润燥"));
    assert_eq!(index.tags_for::<Medicine>(row.id).expect("tags"), vec!["补阴药"]);

    let doc = layer
        .documents()
        .lookup::<Medicine>("阿胶")
        .expect("lookup")
        .expect("document");
    assert_eq!(doc.id, first.id);
    assert_eq!(doc.record.efficacy.as_deref(), Some("滋阴润燥"));
    assert_eq!(layer.documents().count::<Medicine>().expect("count"), 1);

    let json = std::fs::read_to_string(&second.exported.json).expect("export");
    assert!(json.contains("滋阴润燥"));
    assert!(!json.contains("\"补血\""));

    let text = second.exported.text.expect("text export");
    assert_eq!(
        text,
        layer.export_root().join(TEXT_EXPORT_DIR).join("阿胶.txt")
    );
}

#[test]
fn test_distinct_keys_get_distinct_ids() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layer = open_layer(dir.path());

    let a = layer.try_save(&medicine("阿胶", "ē jiāo", "补血", &[])).expect("save");
    let b = layer.try_save(&medicine("当归", "dāng guī", "活血", &[])).expect("save");

    assert_ne!(a.id, b.id);
    assert_eq!(layer.index().count_records(Medicine::KIND).expect("count"), 2);
    assert_eq!(
        layer.index().find_by_sort_key::<Medicine>("D").expect("query").len(),
        1
    );
}

#[test]
fn test_unsafe_key_is_sanitized_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layer = open_layer(dir.path());

    let report = layer
        .try_save(&medicine("川芎/炒", "chuān xiōng", "活血", &[]))
        .expect("save");

    assert_eq!(
        report.exported.json,
        layer
            .export_root()
            .join("C")
            .join(format!("川芎_炒_{}.json", report.id))
    );
    assert!(report.exported.json.exists());

    // A key that sanitizes to the same text keeps its own file
    let other = layer
        .try_save(&medicine("川芎:炒", "chuān xiōng", "活血", &[]))
        .expect("save");
    assert_ne!(other.exported.json, report.exported.json);
    assert!(report.exported.json.exists());
    assert!(other.exported.json.exists());

    // The natural key itself is stored verbatim
    assert!(layer
        .index()
        .find_by_key::<Medicine>("川芎/炒")
        .expect("query")
        .is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_of_distinct_keys() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layer = Arc::new(open_layer(dir.path()));

    let mut tasks = tokio::task::JoinSet::new();
    for worker in 0..4 {
        let layer = Arc::clone(&layer);
        tasks.spawn(async move {
            let mut saved = 0;
            for i in 0..25 {
                let name = format!("药{}-{}", worker, i);
                if layer.save(&medicine(&name, "yao", "x", &["补益药"])) {
                    saved += 1;
                }
            }
            saved
        });
    }

    let mut total = 0;
    while let Some(saved) = tasks.join_next().await {
        total += saved.expect("task");
    }

    assert_eq!(total, 100);
    assert_eq!(layer.index().count_records(Medicine::KIND).expect("count"), 100);
    assert_eq!(layer.documents().count::<Medicine>().expect("count"), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_of_same_key_share_one_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layer = Arc::new(open_layer(dir.path()));

    let mut tasks = tokio::task::JoinSet::new();
    for worker in 0..8 {
        let layer = Arc::clone(&layer);
        tasks.spawn(async move {
            layer
                .try_save(&medicine("阿胶", "ē jiāo", &format!("版本{}", worker), &[]))
                .expect("save")
                .id
        });
    }

    let mut ids = Vec::new();
    while let Some(id) = tasks.join_next().await {
        ids.push(id.expect("task"));
    }

    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(layer.index().count_records(Medicine::KIND).expect("count"), 1);
    assert_eq!(layer.documents().count::<Medicine>().expect("count"), 1);
}

#[test]
fn test_locked_document_store_falls_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = StorePaths::under(dir.path());

    // Another holder of the store
    let _holder = sled::open(&paths.document_store).expect("holder");

    let layer = PersistenceLayer::open(&paths, Arc::new(FirstLetter)).expect("open");
    assert!(layer.documents().is_fallback());
    assert_ne!(layer.documents().path(), paths.document_store.as_path());

    // The run continues against the fallback store
    assert!(layer.save(&medicine("阿胶", "ē jiāo", "补血", &[])));
    assert_eq!(layer.index().count_records(Medicine::KIND).expect("count"), 1);
}

#[test]
fn test_statistics_over_saved_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layer = open_layer(dir.path());

    layer.save(&medicine("阿胶", "ē jiāo", "补血", &["补血药", "动物药"]));
    layer.save(&medicine("当归", "dāng guī", "补血活血", &["补血药", "活血药"]));
    layer.save(&medicine("川芎", "chuān xiōng", "", &["活血药"]));
    layer.save(&medicine("熟地", "shú dì", "补血", &["补血药"]));

    let stats = StatisticsAggregator::new(layer.index())
        .aggregate(Medicine::KIND, 2)
        .expect("aggregate");

    assert_eq!(stats.total_records, 4);
    assert_eq!(stats.field("efficacy"), Some(3));
    assert_eq!(stats.field("pinyin"), Some(4));
    assert_eq!(stats.top_tags.len(), 2);
    assert_eq!(stats.top_tags[0].tag, "补血药");
    assert_eq!(stats.top_tags[0].count, 3);
    assert_eq!(stats.top_tags[1].tag, "活血药");

    let path = write_statistics(&stats, layer.export_root()).expect("write");
    assert!(path.ends_with("statistics_medicine.json"));
    assert_eq!(
        load_statistics(layer.export_root(), Medicine::KIND).expect("load"),
        stats
    );
}

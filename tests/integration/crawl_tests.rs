//! Integration tests for the harvester
//!
//! These tests use wiremock to create mock HTTP servers and run the full
//! fetch, extract and persist cycle end-to-end.

use page_harvest::config::RunConfig;
use page_harvest::crawler::{Harvester, HttpFetcher, JsonPageExtractor};
use page_harvest::record::{FirstLetter, Medicine, Record};
use page_harvest::storage::{RecordIndex, RunStatus, SqliteIndex, TEXT_EXPORT_DIR};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing at the mock server
fn create_test_config(base_url: &str, dir: &Path, concurrency: u32) -> RunConfig {
    let mut config = RunConfig::default();
    config.source.url_template = format!("{}/list?page={{page}}", base_url);
    config.run.concurrency = concurrency;
    config.run.delay_min_ms = 0;
    config.run.delay_max_ms = 5;
    config.fetch.max_retries = 3;
    config.fetch.retry_base_delay_ms = 0;
    config.fetch.jitter_min_ms = 0;
    config.fetch.jitter_max_ms = 0;
    config.fetch.timeout_secs = 5;
    config.output.document_store_path = dir.join("documents.sled").display().to_string();
    config.output.index_path = dir.join("index.db").display().to_string();
    config.output.export_root = dir.join("export").display().to_string();
    config
}

fn harvester(config: RunConfig) -> Harvester<HttpFetcher, JsonPageExtractor<Medicine>> {
    let fetcher = HttpFetcher::from_config(&config.source, &config.fetch).expect("client");
    Harvester::new(config, fetcher, JsonPageExtractor::new(), Arc::new(FirstLetter))
}

/// Builds a listing page body
fn listing(total_pages: u32, records: &[(&str, &str, &str)]) -> String {
    let records: Vec<serde_json::Value> = records
        .iter()
        .map(|(name, pinyin, efficacy)| {
            serde_json::json!({
                "name": name,
                "pinyin": pinyin,
                "efficacy": efficacy,
                "tags": ["补益药"],
            })
        })
        .collect();
    serde_json::json!({ "total_pages": total_pages, "records": records }).to_string()
}

async fn mount_page(server: &MockServer, page: u32, body: String) {
    Mock::given(method("GET"))
        .and(path("/list"))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// JSON exports below the bucket directories
fn exported_json_files(export_root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for bucket in std::fs::read_dir(export_root).expect("export root") {
        let bucket = bucket.expect("entry").path();
        if !bucket.is_dir() || bucket.file_name().is_some_and(|n| n == TEXT_EXPORT_DIR) {
            continue;
        }
        for file in std::fs::read_dir(&bucket).expect("bucket") {
            let file = file.expect("entry").path();
            if file.extension().is_some_and(|e| e == "json") {
                files.push(file);
            }
        }
    }
    files.sort();
    files
}

#[tokio::test]
async fn test_five_pages_with_flaky_third_page() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().expect("tempdir");

    for page in [1u32, 2, 4, 5] {
        let a = format!("药{}a", page);
        let b = format!("药{}b", page);
        mount_page(
            &mock_server,
            page,
            listing(5, &[(&a, "a", "x"), (&b, "b", "y")]),
        )
        .await;
    }

    // Page 3 fails twice before succeeding
    Mock::given(method("GET"))
        .and(path("/list"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;
    mount_page(
        &mock_server,
        3,
        listing(5, &[("药3a", "c", "x"), ("药3b", "d", "y")]),
    )
    .await;

    let config = create_test_config(&mock_server.uri(), dir.path(), 2);
    let export_root = PathBuf::from(&config.output.export_root);
    let report = harvester(config)
        .run(CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(report.total_pages, 5);
    assert_eq!(report.dispatched, 5);
    assert_eq!(report.completed, 5);
    assert_eq!(report.failed, 0);
    assert_eq!(report.records_saved, 10);
    assert_eq!(report.records_failed, 0);
    assert!(!report.cancelled);

    let statistics = report.statistics.as_ref().expect("statistics");
    assert_eq!(statistics.total_records, 10);
    assert_eq!(statistics.top_tags[0].tag, "补益药");
    assert_eq!(statistics.top_tags[0].count, 10);
    assert_eq!(exported_json_files(&export_root).len(), 10);
}

#[tokio::test]
async fn test_exhausted_page_does_not_abort_run() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().expect("tempdir");

    mount_page(&mock_server, 1, listing(3, &[("阿胶", "ē jiāo", "补血")])).await;
    mount_page(&mock_server, 3, listing(3, &[("当归", "dāng guī", "活血")])).await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), dir.path(), 2);
    let index_path = PathBuf::from(&config.output.index_path);
    let report = harvester(config)
        .run(CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(report.dispatched, 3);
    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.records_saved, 2);

    let index = SqliteIndex::open(&index_path).expect("index");
    let run = index.latest_run().expect("query").expect("run row");
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.totals.failed, 1);
    assert_eq!(index.count_records(Medicine::KIND).expect("count"), 2);
}

#[tokio::test]
async fn test_duplicate_key_across_pages_keeps_one_record() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().expect("tempdir");

    mount_page(
        &mock_server,
        1,
        listing(2, &[("阿胶", "ē jiāo", "补血"), ("当归", "dāng guī", "活血")]),
    )
    .await;
    mount_page(&mock_server, 2, listing(2, &[("阿胶", "ē jiāo", "滋阴润燥")])).await;

    // One worker so page 2 is saved last
    let config = create_test_config(&mock_server.uri(), dir.path(), 1);
    let export_root = PathBuf::from(&config.output.export_root);
    let index_path = PathBuf::from(&config.output.index_path);
    let report = harvester(config)
        .run(CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(report.records_saved, 3);
    assert_eq!(report.statistics.as_ref().expect("statistics").total_records, 2);

    let files = exported_json_files(&export_root);
    assert_eq!(files.len(), 2);

    let ejiao = export_root.join("E").join("阿胶.json");
    let body = std::fs::read_to_string(&ejiao).expect("export");
    let json: serde_json::Value = serde_json::from_str(&body).expect("json");
    assert_eq!(json["record"]["efficacy"], "滋阴润燥");
    assert_eq!(json["natural_key"], "阿胶");

    let index = SqliteIndex::open(&index_path).expect("index");
    let row = index.find_by_key::<Medicine>("阿胶").expect("query").expect("row");
    assert_eq!(row.document_id, json["id"].as_u64().expect("id"));
}

#[tokio::test]
async fn test_cancellation_stops_dispatch_and_drains_in_flight() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().expect("tempdir");

    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(listing(40, &[]))
                .set_delay(Duration::from_millis(50)),
        )
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), dir.path(), 2);
    let index_path = PathBuf::from(&config.output.index_path);
    let harvester = harvester(config);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        trigger.cancel();
    });

    let report = harvester.run(cancel).await.expect("run");

    assert!(report.cancelled);
    assert!(report.dispatched > 0);
    assert!(report.dispatched < 40);
    assert_eq!(report.completed + report.failed, report.dispatched);

    let index = SqliteIndex::open(&index_path).expect("index");
    let run = index.latest_run().expect("query").expect("run row");
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.totals.dispatched, report.dispatched);
}

#[tokio::test]
async fn test_default_page_count_when_source_does_not_report_one() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().expect("tempdir");

    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"records": []}"#))
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(&mock_server.uri(), dir.path(), 2);
    config.run.default_total_pages = Some(4);
    config.run.start_page = 2;

    let report = harvester(config)
        .run(CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(report.total_pages, 4);
    assert_eq!(report.dispatched, 3);
    assert_eq!(report.completed, 3);
}

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;

/// Main configuration structure for Page-Harvest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub run: RunSettings,
    pub source: SourceConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Scheduling parameters for a single run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Number of work items processed concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Lower bound of the politeness delay before each fetch (milliseconds)
    #[serde(rename = "delay-min-ms", default = "default_delay_min_ms")]
    pub delay_min_ms: u64,

    /// Upper bound (exclusive) of the politeness delay (milliseconds)
    #[serde(rename = "delay-max-ms", default = "default_delay_max_ms")]
    pub delay_max_ms: u64,

    /// First page of the range
    #[serde(rename = "start-page", default = "default_start_page")]
    pub start_page: u32,

    /// Number of pages to visit, -1 for every page the source reports
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: i64,

    /// Page count used when the source does not report one
    #[serde(
        rename = "default-total-pages",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_total_pages: Option<u32>,
}

/// Where pages come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Listing URL with a `{page}` placeholder
    #[serde(rename = "url-template")]
    pub url_template: String,

    /// Skip TLS certificate validation for this source
    #[serde(rename = "accept-invalid-certs", default)]
    pub accept_invalid_certs: bool,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

/// Retry and timeout behaviour of the fetcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Total attempts per page before giving up
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(rename = "retry-base-delay-ms", default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(rename = "jitter-min-ms", default)]
    pub jitter_min_ms: u64,

    #[serde(rename = "jitter-max-ms", default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
}

/// Locations of the three sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Path of the sled document store
    #[serde(rename = "document-store-path", default = "default_document_store_path")]
    pub document_store_path: String,

    /// Path of the SQLite index database
    #[serde(rename = "index-path", default = "default_index_path")]
    pub index_path: String,

    /// Root directory of the JSON export tree
    #[serde(rename = "export-root", default = "default_export_root")]
    pub export_root: String,

    /// Also write `TextExports/<key>.txt` renderings
    #[serde(rename = "text-export", default = "default_text_export")]
    pub text_export: bool,

    /// Length of the top tag list in the statistics file
    #[serde(rename = "top-tags", default = "default_top_tags")]
    pub top_tags: usize,
}

fn default_concurrency() -> u32 {
    4
}

fn default_delay_min_ms() -> u64 {
    500
}

fn default_delay_max_ms() -> u64 {
    1500
}

fn default_start_page() -> u32 {
    1
}

fn default_max_pages() -> i64 {
    -1
}

fn default_user_agent() -> String {
    format!("page-harvest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_jitter_max_ms() -> u64 {
    500
}

fn default_document_store_path() -> String {
    "data/documents.sled".to_string()
}

fn default_index_path() -> String {
    "data/index.db".to_string()
}

fn default_export_root() -> String {
    "data/export".to_string()
}

fn default_text_export() -> bool {
    true
}

fn default_top_tags() -> usize {
    20
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run: RunSettings::default(),
            source: SourceConfig::default(),
            fetch: FetchConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            delay_min_ms: default_delay_min_ms(),
            delay_max_ms: default_delay_max_ms(),
            start_page: default_start_page(),
            max_pages: default_max_pages(),
            default_total_pages: None,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url_template: "https://example.com/list?page={page}".to_string(),
            accept_invalid_certs: false,
            user_agent: default_user_agent(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            jitter_min_ms: 0,
            jitter_max_ms: default_jitter_max_ms(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            document_store_path: default_document_store_path(),
            index_path: default_index_path(),
            export_root: default_export_root(),
            text_export: default_text_export(),
            top_tags: default_top_tags(),
        }
    }
}

impl RunSettings {
    /// Computes the inclusive page range for a source reporting `total_pages`
    ///
    /// The range is empty when `start_page` lies beyond the last page.
    pub fn page_range(&self, total_pages: u32) -> RangeInclusive<u32> {
        let end = if self.max_pages < 0 {
            total_pages
        } else {
            let span = u32::try_from(self.max_pages).unwrap_or(u32::MAX);
            total_pages.min(self.start_page.saturating_add(span).saturating_sub(1))
        };
        self.start_page..=end
    }

    /// Politeness window as durations
    pub fn delay_window(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.delay_min_ms),
            Duration::from_millis(self.delay_max_ms),
        )
    }

    /// Sets one value by its config key, as used by `config set`
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Validation(format!("'{}' is not a valid {}", value, key)))
        }

        match key {
            "concurrency" => self.concurrency = parse(key, value)?,
            "delay-min-ms" => self.delay_min_ms = parse(key, value)?,
            "delay-max-ms" => self.delay_max_ms = parse(key, value)?,
            "start-page" => self.start_page = parse(key, value)?,
            "max-pages" => self.max_pages = parse(key, value)?,
            "default-total-pages" => {
                self.default_total_pages = match value.trim() {
                    "" | "none" => None,
                    v => Some(parse(key, v)?),
                }
            }
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

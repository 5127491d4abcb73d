//! Work items and the record extraction seam
//!
//! Field extraction is site specific and lives outside this crate behind
//! [`Extractor`]. The only extractor shipped here reads sources that already
//! serve JSON pages.

use crate::record::Record;
use crate::ExtractionError;
use serde::Deserialize;
use std::marker::PhantomData;
use url::Url;

/// Placeholder substituted with the page number
pub const PAGE_PLACEHOLDER: &str = "{page}";

/// One page to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub page: u32,
    pub url: Url,
}

impl WorkItem {
    /// Builds the item for `page` from a URL template containing `{page}`
    pub fn from_template(template: &str, page: u32) -> Result<Self, url::ParseError> {
        let url = Url::parse(&template.replace(PAGE_PLACEHOLDER, &page.to_string()))?;
        Ok(Self { page, url })
    }
}

/// Turns a fetched page body into records
pub trait Extractor: Send + Sync {
    type Record: Record;

    /// Records found on one page
    fn extract(&self, item: &WorkItem, body: &str) -> Result<Vec<Self::Record>, ExtractionError>;

    /// Total page count advertised by a listing page, if any
    fn total_pages(&self, _body: &str) -> Option<u32> {
        None
    }
}

#[derive(Deserialize)]
#[serde(bound = "R: Record")]
struct JsonPage<R> {
    #[serde(default = "Vec::new")]
    records: Vec<R>,
}

#[derive(Deserialize)]
struct JsonPageCount {
    #[serde(default)]
    total_pages: Option<u32>,
}

/// Reads pages shaped as `{ "total_pages": n, "records": [ ... ] }`
#[derive(Debug, Clone)]
pub struct JsonPageExtractor<R> {
    _record: PhantomData<fn() -> R>,
}

impl<R> JsonPageExtractor<R> {
    pub fn new() -> Self {
        Self {
            _record: PhantomData,
        }
    }
}

impl<R> Default for JsonPageExtractor<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> Extractor for JsonPageExtractor<R> {
    type Record = R;

    fn extract(&self, item: &WorkItem, body: &str) -> Result<Vec<R>, ExtractionError> {
        let page: JsonPage<R> = serde_json::from_str(body).map_err(|e| ExtractionError {
            page: item.page,
            message: e.to_string(),
        })?;
        Ok(page.records)
    }

    fn total_pages(&self, body: &str) -> Option<u32> {
        serde_json::from_str::<JsonPageCount>(body)
            .ok()
            .and_then(|page| page.total_pages)
            .filter(|n| *n > 0)
    }
}

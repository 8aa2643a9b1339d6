//! Pluggable record extraction
//!
//! An [`Extractor`] turns one fetched page into records plus an optional
//! pagination hint. Extractors are looked up in an [`ExtractorRegistry`] either
//! by site id or by matching the page host against each entry's patterns.

mod registry;
mod selector;

pub use registry::ExtractorRegistry;
pub use selector::SelectorExtractor;

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

/// Errors raised while extracting records from a page
///
/// Extraction failures are recoverable: the page counts as processed with
/// zero records.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("No record blocks found on {0}")]
    NoRecords(String),

    #[error("Malformed page {url}: {reason}")]
    Malformed { url: String, reason: String },
}

/// One record pulled from a page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedRecord {
    /// Text the record is deduplicated on (e.g. the question)
    pub primary_text: String,

    /// Everything else the extractor captured
    pub fields: BTreeMap<String, serde_json::Value>,

    /// Page the record was found on
    pub source_url: String,
}

impl ExtractedRecord {
    pub fn new(primary_text: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            primary_text: primary_text.into(),
            fields: BTreeMap::new(),
            source_url: source_url.into(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Dedup fingerprint of this record within `scope_key`
    pub fn fingerprint(&self, scope_key: &str) -> String {
        crate::sink::fingerprint(scope_key, &self.primary_text)
    }
}

/// Result of extracting one page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub records: Vec<ExtractedRecord>,

    /// The page to visit after this one; None ends pagination
    pub next_page: Option<Url>,
}

/// Site-specific page parser
pub trait Extractor: Send + Sync {
    /// Extracts records and the next-page hint from a page
    fn extract(&self, html: &str, page_url: &Url) -> Result<Extraction, ExtractError>;

    /// Finds only the next-page hint
    ///
    /// Consulted when `extract` fails, so a page whose record markup is broken
    /// does not end pagination early.
    fn next_page(&self, _html: &str, _page_url: &Url) -> Option<Url> {
        None
    }
}

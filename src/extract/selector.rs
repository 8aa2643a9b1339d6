//! CSS-selector driven extractor
//!
//! Configured per site from a `[[site]]` table:
//! - `record-selector` picks one element per record
//! - `primary-selector` (inside a record) yields the dedup text
//! - each `[[site.field]]` yields a named field, as text or an attribute
//! - `next-selector` finds the pagination link (`rel="next"` by default)

use crate::config::SiteConfig;
use crate::extract::{ExtractError, ExtractedRecord, Extraction, Extractor};
use crate::url::resolve_href;
use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};
use url::Url;

struct FieldSelector {
    name: String,
    selector: Selector,
    attr: Option<String>,
    multiple: bool,
}

impl FieldSelector {
    fn read(&self, block: ElementRef<'_>) -> Option<serde_json::Value> {
        let mut values = block
            .select(&self.selector)
            .filter_map(|el| match &self.attr {
                Some(attr) => el.value().attr(attr).map(|v| v.trim().to_string()),
                None => Some(element_text(el)),
            })
            .filter(|v| !v.is_empty());

        if self.multiple {
            let all: Vec<serde_json::Value> = values.map(serde_json::Value::String).collect();
            (!all.is_empty()).then_some(serde_json::Value::Array(all))
        } else {
            values.next().map(serde_json::Value::String)
        }
    }
}

/// Extractor compiled from a site's selector configuration
pub struct SelectorExtractor {
    record: Selector,
    primary: Selector,
    next: Selector,
    require_records: bool,
    fields: Vec<FieldSelector>,
}

impl SelectorExtractor {
    pub fn from_site(site: &SiteConfig) -> Result<Self, ConfigError> {
        let compile = |selector: &str| {
            Selector::parse(selector).map_err(|_| ConfigError::InvalidSelector {
                site: site.id.clone(),
                selector: selector.to_string(),
            })
        };

        let fields = site
            .fields
            .iter()
            .map(|field| {
                Ok(FieldSelector {
                    name: field.name.clone(),
                    selector: compile(&field.selector)?,
                    attr: field.attr.clone(),
                    multiple: field.multiple,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            record: compile(&site.record_selector)?,
            primary: compile(&site.primary_selector)?,
            next: compile(&site.next_selector)?,
            require_records: site.require_records,
            fields,
        })
    }

    fn find_next(&self, document: &Html, page_url: &Url) -> Option<Url> {
        document
            .select(&self.next)
            .filter_map(|el| el.value().attr("href"))
            .find_map(|href| resolve_href(href, page_url))
    }
}

impl Extractor for SelectorExtractor {
    fn extract(&self, html: &str, page_url: &Url) -> Result<Extraction, ExtractError> {
        let document = Html::parse_document(html);

        let mut blocks = 0usize;
        let mut records = Vec::new();
        for block in document.select(&self.record) {
            blocks += 1;

            let Some(primary) = block
                .select(&self.primary)
                .next()
                .map(element_text)
                .filter(|t| !t.is_empty())
            else {
                tracing::debug!("Record block without primary text on {}", page_url);
                continue;
            };

            let mut record = ExtractedRecord::new(primary, page_url.as_str());
            for field in &self.fields {
                if let Some(value) = field.read(block) {
                    record.fields.insert(field.name.clone(), value);
                }
            }
            records.push(record);
        }

        if blocks == 0 && self.require_records {
            return Err(ExtractError::NoRecords(page_url.to_string()));
        }

        Ok(Extraction {
            records,
            next_page: self.find_next(&document, page_url),
        })
    }

    fn next_page(&self, html: &str, page_url: &Url) -> Option<Url> {
        let document = Html::parse_document(html);
        self.find_next(&document, page_url)
    }
}

/// Collects an element's text with whitespace collapsed
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

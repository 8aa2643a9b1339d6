use crate::config::SiteConfig;
use crate::extract::{Extractor, SelectorExtractor};
use crate::url::{extract_domain, host_matches};
use crate::ConfigResult;
use std::fmt;
use url::Url;

struct Entry {
    site_id: String,
    hosts: Vec<String>,
    extractor: Box<dyn Extractor>,
}

/// Extractors keyed by site id, each with the host patterns it serves
#[derive(Default)]
pub struct ExtractorRegistry {
    entries: Vec<Entry>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry of selector extractors from `[[site]]` entries
    pub fn from_sites(sites: &[SiteConfig]) -> ConfigResult<Self> {
        let mut registry = Self::new();
        for site in sites {
            registry.register(
                &site.id,
                site.hosts.clone(),
                SelectorExtractor::from_site(site)?,
            );
        }
        Ok(registry)
    }

    /// Registers an extractor, replacing any previous entry with the same id
    pub fn register(
        &mut self,
        site_id: &str,
        hosts: Vec<String>,
        extractor: impl Extractor + 'static,
    ) {
        let hosts = hosts.into_iter().map(|h| h.to_lowercase()).collect();
        let entry = Entry {
            site_id: site_id.to_string(),
            hosts,
            extractor: Box::new(extractor),
        };

        match self.entries.iter_mut().find(|e| e.site_id == site_id) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Looks up an extractor by site id
    pub fn get(&self, site_id: &str) -> Option<&dyn Extractor> {
        self.entries
            .iter()
            .find(|e| e.site_id == site_id)
            .map(|e| e.extractor.as_ref())
    }

    /// Picks the first registered entry whose host patterns match the URL
    ///
    /// Returns the site id alongside the extractor.
    pub fn resolve(&self, url: &Url) -> Option<(&str, &dyn Extractor)> {
        let host = extract_domain(url)?;
        self.entries
            .iter()
            .find(|e| e.hosts.iter().any(|p| host_matches(p, &host)))
            .map(|e| (e.site_id.as_str(), e.extractor.as_ref()))
    }

    pub fn site_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.site_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.site_ids()).finish()
    }
}

//! URL handling module for Sumi-Harvest
//!
//! This module provides page URL normalization (used for loop detection and
//! checkpoint comparisons), href resolution for extractors, and host pattern
//! matching for the extractor registry.

mod normalize;

pub use normalize::{normalize_url, resolve_href};

use url::Url;

/// Returns the lowercase host of a URL, or None for host-less URLs
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Checks whether a host matches a site pattern
///
/// Two pattern forms are supported:
/// 1. `example.com` matches only that exact host
/// 2. `*.example.com` matches `example.com` and any subdomain of it
///
/// The host is expected to be lowercase already (see [`extract_domain`]).
///
/// ```
/// use sumi_harvest::url::host_matches;
///
/// assert!(host_matches("*.testpoint.pk", "testpoint.pk"));
/// assert!(host_matches("*.testpoint.pk", "www.testpoint.pk"));
/// assert!(!host_matches("testpoint.pk", "www.testpoint.pk"));
/// ```
pub fn host_matches(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            host == base
                || host
                    .strip_suffix(base)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        }
        None => host == pattern,
    }
}

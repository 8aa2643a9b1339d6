use crate::{UrlError, UrlResult};
use url::Url;

/// Query parameters that never change which listing page is served
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid"];

/// Normalizes a page URL so that equivalent spellings compare equal
///
/// Pagination links on list sites are frequently emitted in slightly different
/// forms (fragment anchors, tracking parameters, reordered query strings). The
/// checkpoint compares normalized URLs, so loop detection does not depend on
/// the exact spelling a site chose.
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Accept only `http` and `https` schemes (the scheme itself is preserved)
/// 3. Lowercase the host; an empty path becomes `/`
/// 4. Remove the fragment
/// 5. Drop `utm_*` and other tracking parameters
/// 6. Sort remaining query parameters by key; drop an empty query
///
/// Paths are left as the site wrote them, trailing slash included, since many
/// paginators distinguish `/page/2/` from `/page/2`.
///
/// # Examples
///
/// ```
/// use sumi_harvest::url::normalize_url;
///
/// let url = normalize_url("https://PakMCQs.com/list/?page=2&utm_source=x#top").unwrap();
/// assert_eq!(url.as_str(), "https://pakmcqs.com/list/?page=2");
/// ```
pub fn normalize_url(url_str: &str) -> UrlResult<Url> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    let host = url
        .host_str()
        .map(|h| h.to_lowercase())
        .ok_or(UrlError::MissingDomain)?;
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    if url.path().is_empty() {
        url.set_path("/");
    }

    url.set_fragment(None);

    if url.query().is_some() {
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !is_tracking_param(key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params.sort_by(|a, b| a.0.cmp(&b.0));

        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// Resolves an `href` found on `base` into a normalized absolute page URL
///
/// Returns None for links that can never be a next page:
/// empty hrefs, fragment-only anchors, `javascript:`/`mailto:`/`tel:`/`data:`
/// links and anything that does not resolve to HTTP(S).
pub fn resolve_href(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let absolute = base.join(href).ok()?;
    normalize_url(absolute.as_str()).ok()
}

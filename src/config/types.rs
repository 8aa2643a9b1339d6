use serde::Deserialize;

/// Main configuration structure for Sumi-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fetcher: FetcherConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default, rename = "site")]
    pub sites: Vec<SiteConfig>,
}

/// HTTP fetch and retry configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FetcherConfig {
    /// User-Agent header sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// TCP connect timeout (seconds)
    #[serde(rename = "connect-timeout-secs", default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Whole-request read timeout (seconds)
    #[serde(rename = "read-timeout-secs", default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Attempts per page before the fetch is given up
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay (milliseconds); doubles per attempt
    #[serde(rename = "backoff-base-ms", default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound for any single retry delay (milliseconds)
    #[serde(rename = "backoff-cap-ms", default = "default_backoff_cap")]
    pub backoff_cap_ms: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_cap_ms: default_backoff_cap(),
        }
    }
}

/// Database location
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file (checkpoints and records)
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Session defaults applied when a request leaves a knob unset
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DefaultsConfig {
    #[serde(rename = "chunk-size", default = "default_chunk_size")]
    pub chunk_size: u32,

    #[serde(rename = "auto-continue", default = "default_true")]
    pub auto_continue: bool,

    #[serde(rename = "inter-chunk-delay-secs", default)]
    pub inter_chunk_delay_secs: u64,

    /// How long an executor lease stays valid without renewal
    #[serde(rename = "lease-ttl-secs", default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            auto_continue: true,
            inter_chunk_delay_secs: 0,
            lease_ttl_secs: default_lease_ttl(),
        }
    }
}

/// A CSS-selector driven extractor for one site
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Registry key (e.g. "testpoint")
    pub id: String,

    /// Host patterns (e.g. "example.com" or "*.example.com")
    pub hosts: Vec<String>,

    /// Selector matching one element per record
    #[serde(rename = "record-selector")]
    pub record_selector: String,

    /// Selector (relative to the record element) for the dedup text
    #[serde(rename = "primary-selector")]
    pub primary_selector: String,

    /// Selector for the pagination link
    #[serde(rename = "next-selector", default = "default_next_selector")]
    pub next_selector: String,

    /// Treat a page without any record element as an extraction failure
    #[serde(rename = "require-records", default)]
    pub require_records: bool,

    #[serde(default, rename = "field")]
    pub fields: Vec<FieldConfig>,
}

/// A named record field
#[derive(Debug, Clone, Deserialize)]
pub struct FieldConfig {
    pub name: String,

    /// Selector relative to the record element
    pub selector: String,

    /// Read this attribute instead of the element text
    #[serde(default)]
    pub attr: Option<String>,

    /// Collect every match into a list instead of taking the first
    #[serde(default)]
    pub multiple: bool,
}

fn default_user_agent() -> String {
    format!("sumi-harvest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base() -> u64 {
    1500
}

fn default_backoff_cap() -> u64 {
    20_000
}

fn default_chunk_size() -> u32 {
    25
}

fn default_lease_ttl() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_next_selector() -> String {
    r#"a[rel~="next"], link[rel~="next"]"#.to_string()
}

use crate::config::types::{Config, DefaultsConfig, FetcherConfig, SiteConfig, StorageConfig};
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_fetcher_config(&config.fetcher)?;
    validate_storage_config(&config.storage)?;
    validate_defaults(&config.defaults)?;
    validate_sites(&config.sites)?;
    Ok(())
}

/// Validates fetcher configuration
fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.connect_timeout_secs == 0 || config.read_timeout_secs == 0 {
        return Err(ConfigError::Validation(format!(
            "timeouts must be >= 1s, got connect={}s read={}s",
            config.connect_timeout_secs, config.read_timeout_secs
        )));
    }

    if config.max_attempts < 1 || config.max_attempts > 20 {
        return Err(ConfigError::Validation(format!(
            "max-attempts must be between 1 and 20, got {}",
            config.max_attempts
        )));
    }

    if config.backoff_base_ms > config.backoff_cap_ms {
        return Err(ConfigError::Validation(format!(
            "backoff-base-ms ({}) cannot exceed backoff-cap-ms ({})",
            config.backoff_base_ms, config.backoff_cap_ms
        )));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates session defaults
fn validate_defaults(config: &DefaultsConfig) -> Result<(), ConfigError> {
    if config.chunk_size < 1 {
        return Err(ConfigError::Validation(format!(
            "chunk-size must be >= 1, got {}",
            config.chunk_size
        )));
    }

    if config.lease_ttl_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "lease-ttl-secs must be >= 1, got {}",
            config.lease_ttl_secs
        )));
    }

    Ok(())
}

/// Validates `[[site]]` extractor entries
fn validate_sites(sites: &[SiteConfig]) -> Result<(), ConfigError> {
    let mut ids = HashSet::new();

    for site in sites {
        if site.id.trim().is_empty() {
            return Err(ConfigError::Validation("site id cannot be empty".to_string()));
        }

        if !ids.insert(site.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate site id '{}'",
                site.id
            )));
        }

        if site.hosts.is_empty() {
            return Err(ConfigError::Validation(format!(
                "site '{}' must list at least one host pattern",
                site.id
            )));
        }

        for host in &site.hosts {
            validate_domain_pattern(host)?;
        }

        for selector in [
            &site.record_selector,
            &site.primary_selector,
            &site.next_selector,
        ] {
            validate_selector(&site.id, selector)?;
        }

        let mut names = HashSet::new();
        for field in &site.fields {
            validate_selector(&site.id, &field.selector)?;
            if !names.insert(field.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "site '{}' declares field '{}' twice",
                    site.id, field.name
                )));
            }
        }
    }

    Ok(())
}

fn validate_selector(site: &str, selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|_| ConfigError::InvalidSelector {
            site: site.to_string(),
            selector: selector.to_string(),
        })
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    validate_domain_string(pattern.strip_prefix("*.").unwrap_or(pattern))
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    if domain != "localhost" && !domain.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.com')",
            domain
        )));
    }

    Ok(())
}

use crate::config::types::{
    CatalogConfig, Config, HarvestConfig, NetworkConfig, OutputConfig, ProxyConfig,
};
use crate::proxy::ProxyScheme;
use crate::ConfigError;
use url::Url;

/// Placeholder substituted with the candidate identifier in URL templates
pub const APPID_PLACEHOLDER: &str = "{appid}";

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_harvest_config(&config.harvest)?;
    validate_network_config(&config.network)?;
    validate_proxy_config(&config.proxy)?;
    validate_catalog_config(&config.catalog)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates quota and worker settings
fn validate_harvest_config(config: &HarvestConfig) -> Result<(), ConfigError> {
    if config.max_games < 1 {
        return Err(ConfigError::Validation(format!(
            "max_games must be >= 1, got {}",
            config.max_games
        )));
    }

    if config.workers < 1 || config.workers > 100 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 100, got {}",
            config.workers
        )));
    }

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(
            "batch_size must be >= 1".to_string(),
        ));
    }

    if config.checkpoint_interval < 1 {
        return Err(ConfigError::Validation(
            "checkpoint_interval must be >= 1".to_string(),
        ));
    }

    if config.progress_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "progress_interval_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates timeouts and retry policy
fn validate_network_config(config: &NetworkConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.request_timeout_secs < 1 || config.listing_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request and listing timeouts must be >= 1s".to_string(),
        ));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.backoff_max_ms < config.backoff_base_ms {
        return Err(ConfigError::Validation(format!(
            "backoff_max_ms ({}) must be >= backoff_base_ms ({})",
            config.backoff_max_ms, config.backoff_base_ms
        )));
    }

    if !(0.0..=1.0).contains(&config.jitter_fraction) {
        return Err(ConfigError::Validation(format!(
            "jitter_fraction must be within [0, 1], got {}",
            config.jitter_fraction
        )));
    }

    if config.transport_rotations < 1 {
        return Err(ConfigError::Validation(
            "transport_rotations must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    if ProxyScheme::parse(&config.default_scheme).is_none() {
        return Err(ConfigError::Validation(format!(
            "default_scheme must be one of http, https, socks5, socks5h; got '{}'",
            config.default_scheme
        )));
    }

    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure_threshold must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates catalog endpoints and classification rules
fn validate_catalog_config(config: &CatalogConfig) -> Result<(), ConfigError> {
    Url::parse(&config.list_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid list_url: {}", e)))?;

    validate_template("details_url", &config.details_url)?;
    validate_template("reviews_url", &config.reviews_url)?;

    if config.accepted_types.is_empty() {
        return Err(ConfigError::Validation(
            "accepted_types must list at least one type".to_string(),
        ));
    }

    Ok(())
}

/// Validates an endpoint template containing the `{appid}` placeholder
fn validate_template(name: &str, template: &str) -> Result<(), ConfigError> {
    if !template.contains(APPID_PLACEHOLDER) {
        return Err(ConfigError::Validation(format!(
            "{} must contain the {} placeholder",
            name, APPID_PLACEHOLDER
        )));
    }

    let sample = template.replace(APPID_PLACEHOLDER, "0");
    Url::parse(&sample)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {}: {}", name, e)))?;

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    for (name, path) in [
        ("games_path", &config.games_path),
        ("reviews_path", &config.reviews_path),
        ("checkpoint_path", &config.checkpoint_path),
    ] {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
        }
    }

    if config.games_path == config.reviews_path {
        return Err(ConfigError::Validation(
            "games_path and reviews_path must be different files".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_template() {
        assert!(validate_template("t", "https://example.com/app/{appid}").is_ok());
        assert!(validate_template("t", "http://127.0.0.1:9000/details?appids={appid}").is_ok());

        assert!(validate_template("t", "https://example.com/app").is_err());
        assert!(validate_template("t", "not a url {appid}").is_err());
    }

    #[test]
    fn test_validate_worker_bounds() {
        let mut config = Config::default();
        config.harvest.workers = 101;
        assert!(validate(&config).is_err());

        config.harvest.workers = 1;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_validate_backoff_bounds() {
        let mut config = Config::default();
        config.network.backoff_base_ms = 5000;
        config.network.backoff_max_ms = 1000;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.network.jitter_fraction = 1.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_proxy_scheme() {
        let mut config = Config::default();
        config.proxy.default_scheme = "ftp".to_string();
        assert!(validate(&config).is_err());

        config.proxy.default_scheme = "socks5".to_string();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_validate_distinct_output_streams() {
        let mut config = Config::default();
        config.output.reviews_path = config.output.games_path.clone();
        assert!(validate(&config).is_err());
    }
}

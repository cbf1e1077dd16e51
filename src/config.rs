//! Service configuration
//!
//! Read from environment variables with defaults. Only `from_env` touches the
//! process environment; tests go through `from_lookup`.

use anyhow::{anyhow, bail, Context, Result};
use std::time::Duration;

use crate::period::DefaultWindow;
use crate::region::ResolutionMode;

const DEFAULT_PORT: u16 = 3600;
const DEFAULT_CARTODB_USER: &str = "wri-01";
const DEFAULT_GEOSTORE_URL: &str = "https://api.resourcewatch.org";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Listen port
    pub port: u16,
    /// Query endpoint the engine executes against
    pub store_url: String,
    /// Query endpoint used in export links
    pub download_url: String,
    /// Optional store credential, never written into export links
    pub store_api_key: Option<String>,
    /// Boundary service base URL
    pub geostore_url: String,
    /// Inbound request deadline
    pub request_timeout: Duration,
    /// Per remote call; always shorter than `request_timeout`
    pub upstream_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
    pub default_window: DefaultWindow,
    pub resolution: ResolutionMode,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.parse().with_context(|| format!("Invalid PORT '{}'", raw))?,
            None => DEFAULT_PORT,
        };

        let user = get("CARTODB_USER").unwrap_or_else(|| DEFAULT_CARTODB_USER.to_string());
        let store_url = get("CARTODB_API_URL")
            .unwrap_or_else(|| format!("https://{}.carto.com/api/v2/sql", user));
        let download_url = get("CARTODB_DOWNLOAD_URL").unwrap_or_else(|| store_url.clone());

        let geostore_url = get("GEOSTORE_URL")
            .unwrap_or_else(|| DEFAULT_GEOSTORE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let default_window = match get("DEFAULT_PERIOD_START") {
            Some(raw) => DefaultWindow::parse(&raw)
                .ok_or_else(|| anyhow!("Invalid DEFAULT_PERIOD_START '{}'", raw))?,
            None => DefaultWindow::default(),
        };

        let resolution = match get("REGION_RESOLUTION") {
            Some(raw) => raw.parse()?,
            None => ResolutionMode::default(),
        };

        let request_timeout = Duration::from_secs(parse_u64(&get, "REQUEST_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?);
        if request_timeout.is_zero() {
            bail!("REQUEST_TIMEOUT_SECS must be positive");
        }
        // A request makes up to three sequential remote calls
        let upstream_timeout = match get("UPSTREAM_TIMEOUT_MS") {
            Some(raw) => Duration::from_millis(
                raw.parse().with_context(|| format!("Invalid UPSTREAM_TIMEOUT_MS '{}'", raw))?,
            ),
            None => request_timeout / 3,
        };
        if upstream_timeout.is_zero() || upstream_timeout >= request_timeout {
            bail!(
                "UPSTREAM_TIMEOUT_MS ({:?}) must be positive and shorter than REQUEST_TIMEOUT_SECS ({:?})",
                upstream_timeout,
                request_timeout
            );
        }

        Ok(Self {
            port,
            store_url,
            download_url,
            store_api_key: get("CARTODB_API_KEY"),
            geostore_url,
            request_timeout,
            upstream_timeout,
            cache_ttl: Duration::from_secs(parse_u64(&get, "CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)?),
            cache_capacity: parse_u64(&get, "CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY)?,
            default_window,
            resolution,
        })
    }
}

fn parse_u64(get: &dyn Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    match get(key) {
        Some(raw) => raw.parse().with_context(|| format!("Invalid {} '{}'", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 3600);
        assert_eq!(config.store_url, "https://wri-01.carto.com/api/v2/sql");
        assert_eq!(config.download_url, config.store_url);
        assert_eq!(config.store_api_key, None);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.upstream_timeout, Duration::from_secs(10));
        assert_eq!(config.default_window, DefaultWindow::default());
        assert_eq!(config.resolution, ResolutionMode::Boundary);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PORT", "8080"),
            ("CARTODB_USER", "someone"),
            ("CARTODB_DOWNLOAD_URL", "https://downloads.example/sql"),
            ("GEOSTORE_URL", "http://geostore.local/"),
            ("DEFAULT_PERIOD_START", "yesterday"),
            ("REGION_RESOLUTION", "direct"),
            ("CACHE_TTL_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.store_url, "https://someone.carto.com/api/v2/sql");
        assert_eq!(config.download_url, "https://downloads.example/sql");
        assert_eq!(config.geostore_url, "http://geostore.local");
        assert_eq!(config.default_window, DefaultWindow::Yesterday);
        assert_eq!(config.resolution, ResolutionMode::Direct);
        assert_eq!(config.cache_ttl, Duration::ZERO);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(config_from(&[("PORT", "http")]).is_err());
        assert!(config_from(&[("REGION_RESOLUTION", "sometimes")]).is_err());
        assert!(config_from(&[("DEFAULT_PERIOD_START", "last tuesday")]).is_err());
        assert!(config_from(&[("REQUEST_TIMEOUT_SECS", "0")]).is_err());
    }

    #[test]
    fn test_upstream_timeout_is_shorter_than_deadline() {
        let config = config_from(&[("REQUEST_TIMEOUT_SECS", "1")]).unwrap();
        assert!(config.upstream_timeout < config.request_timeout);

        let config = config_from(&[("REQUEST_TIMEOUT_SECS", "5"), ("UPSTREAM_TIMEOUT_MS", "1500")]).unwrap();
        assert_eq!(config.upstream_timeout, Duration::from_millis(1500));

        assert!(config_from(&[("REQUEST_TIMEOUT_SECS", "2"), ("UPSTREAM_TIMEOUT_MS", "2000")]).is_err());
        assert!(config_from(&[("UPSTREAM_TIMEOUT_MS", "0")]).is_err());
    }
}

//! Layered application configuration.
//!
//! Sources, lowest priority first: compiled defaults, an optional TOML file
//! (`shelflife.toml` or `--config <path>`), then `SHELFLIFE__*` environment
//! variables with `__` separating nested keys, e.g.
//! `SHELFLIFE__FETCH__TIMEOUT_SECS=20`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::{Result, ShelfLifeError, DEFAULT_CONFIG_FILE, VERSION};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Version stamped into cache records
    pub version: String,
    pub site: SiteConfig,
    pub fetch: FetchConfig,
    pub cache: CacheConfig,
    pub search: SearchConfig,
    pub sync: SyncConfig,
    pub proxy: ProxyConfig,
}

/// Where the catalog lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// URL of the page that loads the catalog; relative sources resolve against it
    pub page_url: String,
    /// Repository directory the site is published under
    pub repo_name: String,
    /// Catalog file name
    pub data_file: String,
    /// External mirrors, tried last
    pub mirrors: Vec<String>,
}

/// Network fetch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-candidate timeout for catalog loads
    pub timeout_secs: u64,
    /// Per-candidate timeout for diagnostic probes
    pub probe_timeout_secs: u64,
}

/// Local cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory of the key-value store
    pub dir: PathBuf,
    /// Age after which cached data counts as stale
    pub ttl_hours: u64,
}

/// Search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub min_query_len: usize,
    pub max_results: usize,
    pub debounce_ms: u64,
}

/// Connectivity and resynchronization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Delay between regaining connectivity and synchronizing
    pub reconnect_delay_secs: u64,
    /// Initial connectivity state
    pub start_online: bool,
}

/// Offline proxy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address the proxy listens on
    pub listen: String,
    /// Origin that requests are forwarded to
    pub upstream: String,
    /// Version suffix of the cache names
    pub cache_version: String,
    /// Paths cached at install time
    pub precache: Vec<String>,
    /// Directory for persisted response caches; memory only when unset
    pub cache_dir: Option<PathBuf>,
    /// Substring that identifies the catalog resource
    pub data_pattern: String,
    /// Upstream request timeout
    pub network_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: VERSION.to_string(),
            site: SiteConfig::default(),
            fetch: FetchConfig::default(),
            cache: CacheConfig::default(),
            search: SearchConfig::default(),
            sync: SyncConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        let repo = "ProgressSAP.github.io";
        Self {
            page_url: format!("https://svidovichss-droid.github.io/{}/", repo),
            repo_name: repo.to_string(),
            data_file: "data.json".to_string(),
            mirrors: vec![
                format!(
                    "https://raw.githubusercontent.com/svidovichss-droid/{}/main/data.json",
                    repo
                ),
                format!(
                    "https://raw.githubusercontent.com/svidovichss-droid/{}/refs/heads/main/data.json",
                    repo
                ),
            ],
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            probe_timeout_secs: 5,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".shelflife"),
            ttl_hours: 24,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_query_len: 2,
            max_results: 10,
            debounce_ms: 300,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: 2,
            start_online: true,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8787".to_string(),
            upstream: SiteConfig::default().page_url,
            cache_version: "v3.0".to_string(),
            precache: vec![
                "/".to_string(),
                "/manifest.json".to_string(),
                "/css/style.css".to_string(),
            ],
            cache_dir: None,
            data_pattern: "data.json".to_string(),
            network_timeout_secs: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, file and environment.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("SHELFLIFE")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("site.mirrors")
                    .with_list_parse_key("proxy.precache")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ShelfLifeError::Config(e.to_string()))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| ShelfLifeError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.fetch.timeout_secs == 0 || self.fetch.probe_timeout_secs == 0 {
            return Err(ShelfLifeError::Config("fetch timeouts must be non-zero".into()));
        }

        if self.proxy.network_timeout_secs == 0 {
            return Err(ShelfLifeError::Config("proxy.network_timeout_secs must be non-zero".into()));
        }

        if self.search.min_query_len == 0 {
            return Err(ShelfLifeError::Config("search.min_query_len must be at least 1".into()));
        }

        self.page_url()?;
        self.upstream_url()?;
        self.listen_addr()?;

        for mirror in &self.site.mirrors {
            Url::parse(mirror)
                .map_err(|e| ShelfLifeError::Config(format!("invalid mirror {}: {}", mirror, e)))?;
        }

        Ok(())
    }

    /// Parsed page URL
    pub fn page_url(&self) -> Result<Url> {
        Url::parse(&self.site.page_url)
            .map_err(|e| ShelfLifeError::Config(format!("invalid site.page_url: {}", e)))
    }

    /// Parsed proxy upstream
    pub fn upstream_url(&self) -> Result<Url> {
        Url::parse(&self.proxy.upstream)
            .map_err(|e| ShelfLifeError::Config(format!("invalid proxy.upstream: {}", e)))
    }

    /// Parsed proxy listen address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.proxy
            .listen
            .parse()
            .map_err(|e| ShelfLifeError::Config(format!("invalid proxy.listen: {}", e)))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.probe_timeout_secs)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        // Clamp to a century so the conversion cannot overflow
        let hours = self.cache.ttl_hours.min(24 * 365 * 100);
        chrono::Duration::hours(hours as i64)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.search.debounce_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.sync.reconnect_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.cache_ttl(), chrono::Duration::hours(24));
        assert_eq!(config.debounce(), Duration::from_millis(300));
        assert_eq!(config.site.mirrors.len(), 2);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[fetch]
timeout_secs = 3

[site]
page_url = "http://localhost:8000/app/"
mirrors = []

[cache]
ttl_hours = 1
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.fetch.timeout_secs, 3);
        assert_eq!(config.fetch.probe_timeout_secs, 5);
        assert_eq!(config.site.page_url, "http://localhost:8000/app/");
        assert!(config.site.mirrors.is_empty());
        assert_eq!(config.cache.ttl_hours, 1);
        assert_eq!(config.search.max_results, 10);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = AppConfig::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(result, Err(ShelfLifeError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.fetch.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.site.page_url = "not a url".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.proxy.listen = "localhost".into();
        assert!(config.validate().is_err());
    }
}

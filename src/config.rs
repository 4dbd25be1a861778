use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Application configuration loaded from environment variables or TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path to the DuckDB database file. If not set, counters live in an
    /// in-memory database (useful for development and tests only).
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Path to a MaxMind GeoLite2 .mmdb file for IP geolocation.
    /// If not set or file is missing, geo fields are simply omitted.
    #[serde(default)]
    pub geoip_db_path: Option<PathBuf>,
    /// Deployment-wide domain-key restriction: when set, every tracking
    /// request must carry its site's key in the X-Domain-Key header.
    #[serde(default)]
    pub require_domain_key: bool,
    /// Maximum recent-activity rows kept per site. 0 = unbounded.
    #[serde(default = "default_recent_activity_cap")]
    pub recent_activity_cap: usize,
    /// Tracked sites. Site management lives in the dashboard; the ingest
    /// service only needs this read-only snapshot.
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

/// One tracked site as configured by its owner.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    pub id: i64,
    pub domain: String,
    #[serde(default)]
    pub domain_key: Option<String>,
    #[serde(default = "default_tracking_enabled")]
    pub tracking_enabled: bool,
    #[serde(default)]
    pub exclude_bots: bool,
    /// Newline-separated single IPs or CIDR blocks.
    #[serde(default)]
    pub excluded_ips: String,
    /// Newline-separated query parameter names; the entry `&` strips the
    /// whole query string.
    #[serde(default)]
    pub excluded_params: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8200
}

const fn default_recent_activity_cap() -> usize {
    100
}

const fn default_tracking_enabled() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: None,
            geoip_db_path: None,
            require_domain_key: false,
            recent_activity_cap: default_recent_activity_cap(),
            sites: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults.
    ///
    /// Environment variables override file values:
    /// - `TRACK_HOST` → host
    /// - `TRACK_PORT` → port
    /// - `TRACK_DB` → db_path
    /// - `TRACK_GEOIP_DB` → geoip_db_path
    /// - `TRACK_REQUIRE_DOMAIN_KEY` → require_domain_key
    /// - `TRACK_RECENT_CAP` → recent_activity_cap
    pub fn load(config_path: Option<&Path>) -> Self {
        let mut config =
            config_path.map_or_else(Self::default, |path| match std::fs::read_to_string(path) {
                Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                    tracing::warn!("Failed to parse config file: {e}, using defaults");
                    Self::default()
                }),
                Err(e) => {
                    tracing::warn!("Failed to read config file: {e}, using defaults");
                    Self::default()
                }
            });

        // Environment variable overrides
        if let Ok(host) = std::env::var("TRACK_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("TRACK_PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }
        if let Ok(db) = std::env::var("TRACK_DB") {
            config.db_path = Some(PathBuf::from(db));
        }
        if let Ok(geoip) = std::env::var("TRACK_GEOIP_DB") {
            config.geoip_db_path = Some(PathBuf::from(geoip));
        }
        if let Ok(val) = std::env::var("TRACK_REQUIRE_DOMAIN_KEY") {
            config.require_domain_key = val != "0" && val.to_lowercase() != "false";
        }
        if let Ok(val) = std::env::var("TRACK_RECENT_CAP") {
            if let Ok(cap) = val.parse() {
                config.recent_activity_cap = cap;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    /// Mutex to serialize tests that call `Config::load`, which reads
    /// environment variables. Without this, `test_env_var_overrides` can
    /// pollute other tests running in parallel.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8200);
        assert!(config.db_path.is_none());
        assert!(config.geoip_db_path.is_none());
        assert!(!config.require_domain_key);
        assert_eq!(config.recent_activity_cap, 100);
        assert!(config.sites.is_empty());
    }

    #[test]
    fn test_load_from_toml() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        write!(
            file,
            r#"
host = "127.0.0.1"
port = 9000
db_path = "/var/lib/track/counters.duckdb"
geoip_db_path = "/data/GeoLite2-City.mmdb"
require_domain_key = true
recent_activity_cap = 50

[[sites]]
id = 1
domain = "example.com"
domain_key = "k-123"
exclude_bots = true
excluded_ips = """
203.0.113.9
10.0.0.0/8"""
excluded_params = "secret"

[[sites]]
id = 2
domain = "other.org"
tracking_enabled = false
"#
        )
        .unwrap();

        let config = Config::load(Some(&config_path));
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(
            config.db_path,
            Some(PathBuf::from("/var/lib/track/counters.duckdb"))
        );
        assert!(config.require_domain_key);
        assert_eq!(config.recent_activity_cap, 50);
        assert_eq!(config.sites.len(), 2);

        let first = &config.sites[0];
        assert_eq!(first.id, 1);
        assert_eq!(first.domain, "example.com");
        assert_eq!(first.domain_key.as_deref(), Some("k-123"));
        assert!(first.exclude_bots);
        assert!(first.tracking_enabled);
        assert!(first.excluded_ips.contains("10.0.0.0/8"));

        assert!(!config.sites[1].tracking_enabled);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let config = Config::load(Some(Path::new("/nonexistent/config.toml")));
        assert_eq!(config.port, 8200);
    }

    #[test]
    fn test_load_no_path_uses_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let config = Config::load(None);
        assert_eq!(config.port, 8200);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_env_var_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();

        // Save original values
        let orig_port = std::env::var("TRACK_PORT").ok();

        std::env::set_var("TRACK_PORT", "3000");
        let config = Config::load(None);
        assert_eq!(config.port, 3000);

        // Restore
        match orig_port {
            Some(v) => std::env::set_var("TRACK_PORT", v),
            None => std::env::remove_var("TRACK_PORT"),
        }
    }

    #[test]
    fn test_invalid_toml_uses_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "this is not valid toml {{{").unwrap();

        let config = Config::load(Some(&config_path));
        assert_eq!(config.port, 8200);
    }
}

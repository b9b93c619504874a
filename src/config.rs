//! Configuration file parser for ~/.config/feedwell/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid source '{name}': {reason}")]
    InvalidSource { name: String, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// A feed the aggregator pulls articles from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    /// Display name, shown as the article's `source`.
    pub name: String,
    /// RSS/Atom/JSON Feed URL.
    pub url: String,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP API listens on.
    pub bind: String,

    /// SQLite database path. Relative paths resolve against the config directory.
    pub database_path: Option<String>,

    /// Minutes before the cached article list is considered stale.
    pub refresh_interval_minutes: u64,

    /// Hours extracted article content stays cached.
    pub content_ttl_hours: i64,

    /// User-Agent header for feed and page requests.
    pub user_agent: String,

    /// Allow fetching pages on localhost/private networks (local testing only).
    pub allow_private_hosts: bool,

    /// Feeds to aggregate.
    pub sources: Vec<SourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8788".to_string(),
            database_path: None,
            refresh_interval_minutes: 15,
            content_ttl_hours: 72,
            user_agent: concat!("feedwell/", env!("CARGO_PKG_VERSION")).to_string(),
            allow_private_hosts: false,
            sources: default_sources(),
        }
    }
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::new("Hacker News", "https://hnrss.org/newest"),
        SourceConfig::new(
            "TypeScript Blog",
            "https://devblogs.microsoft.com/typescript/feed/",
        ),
    ]
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "bind",
        "database_path",
        "refresh_interval_minutes",
        "content_ttl_hours",
        "user_agent",
        "allow_private_hosts",
        "sources",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    /// - Source with a non-http(s) URL or empty name → `Err(ConfigError::InvalidSource)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::from_toml(&content)?;
        tracing::info!(
            path = %path.display(),
            sources = config.sources.len(),
            bind = %config.bind,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text (see [`Config::load`] for the rules).
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(ConfigError::InvalidSource {
                    name: source.url.clone(),
                    reason: "name must not be empty".to_string(),
                });
            }
            crate::util::validate_http_url(&source.url).map_err(|e| {
                ConfigError::InvalidSource {
                    name: source.name.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(())
    }

    /// Staleness threshold for the cached article list.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_minutes.max(1) * 60)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind, "127.0.0.1:8788");
        assert_eq!(config.refresh_interval_minutes, 15);
        assert_eq!(config.content_ttl_hours, 72);
        assert!(!config.allow_private_hosts);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].name, "Hacker News");
        assert_eq!(config.refresh_interval(), Duration::from_secs(900));
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedwell_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.sources, default_sources());
    }

    #[test]
    fn test_whitespace_only_returns_default() {
        let config = Config::from_toml("   \n  \n  ").unwrap();
        assert_eq!(config.bind, "127.0.0.1:8788");
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let config = Config::from_toml("refresh_interval_minutes = 30\n").unwrap();
        assert_eq!(config.refresh_interval_minutes, 30);
        assert_eq!(config.content_ttl_hours, 72);
        assert_eq!(config.sources.len(), 2);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
bind = "0.0.0.0:9000"
database_path = "cache.db"
refresh_interval_minutes = 5
content_ttl_hours = 24
user_agent = "test-agent"
allow_private_hosts = true

[[sources]]
name = "Lobsters"
url = "https://lobste.rs/rss"

[[sources]]
name = "Rust Blog"
url = "https://blog.rust-lang.org/feed.xml"
"#;
        let config = Config::from_toml(content).unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.database_path.as_deref(), Some("cache.db"));
        assert_eq!(config.refresh_interval_minutes, 5);
        assert_eq!(config.content_ttl_hours, 24);
        assert_eq!(config.user_agent, "test-agent");
        assert!(config.allow_private_hosts);
        assert_eq!(
            config.sources,
            vec![
                SourceConfig::new("Lobsters", "https://lobste.rs/rss"),
                SourceConfig::new("Rust Blog", "https://blog.rust-lang.org/feed.xml"),
            ]
        );
    }

    #[test]
    fn test_empty_sources_list_allowed() {
        let config = Config::from_toml("sources = []\n").unwrap();
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_invalid_source_url_rejected() {
        let content = r#"
[[sources]]
name = "Local"
url = "file:///etc/passwd"
"#;
        let err = Config::from_toml(content).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSource { .. }));
        assert!(err.to_string().contains("Local"));
    }

    #[test]
    fn test_blank_source_name_rejected() {
        let content = r#"
[[sources]]
name = "  "
url = "https://example.com/feed"
"#;
        assert!(matches!(
            Config::from_toml(content),
            Err(ConfigError::InvalidSource { .. })
        ));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = Config::from_toml("this is not [valid toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::from_toml("bind = \"127.0.0.1:1\"\ntheme = \"dark\"\n").unwrap();
        assert_eq!(config.bind, "127.0.0.1:1");
    }

    #[test]
    fn test_wrong_type_returns_error() {
        assert!(Config::from_toml("refresh_interval_minutes = \"soon\"\n").is_err());
    }

    #[test]
    fn test_zero_interval_clamped() {
        let config = Config::from_toml("refresh_interval_minutes = 0\n").unwrap();
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("feedwell_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_from_disk() {
        let dir = std::env::temp_dir().join("feedwell_config_test_load");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "content_ttl_hours = 1\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.content_ttl_hours, 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}

//! Configuration file parser for ~/.config/veritas/config.toml.
//!
//! The file is optional; a missing or blank file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are usually typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::FeedOptions;

/// Environment variable that overrides `api_token` from the file.
pub const API_TOKEN_ENV: &str = "VERITAS_API_TOKEN";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration
// ============================================================================

/// Every key is optional; missing keys take their default.
///
/// `Debug` masks `api_token`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// GraphQL endpoint URL.
    pub endpoint: String,

    /// Articles requested per page.
    pub page_size: usize,

    /// Quiet period before a search term is applied.
    pub search_debounce_ms: u64,

    /// Per-attempt request timeout.
    pub request_timeout_secs: u64,

    /// Bearer token sent with every request. `VERITAS_API_TOKEN` wins over
    /// this.
    pub api_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000/query".to_string(),
            page_size: 20,
            search_debounce_ms: 300,
            request_timeout_secs: 30,
            api_token: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("page_size", &self.page_size)
            .field("search_debounce_ms", &self.search_debounce_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 5] = [
        "endpoint",
        "page_size",
        "search_debounce_ms",
        "request_timeout_secs",
        "api_token",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing or blank file → `Ok(Config::default())`
    /// - Invalid TOML or wrong value types → `Err(ConfigError::Parse)`
    /// - `page_size` or `request_timeout_secs` of 0 → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
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

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            endpoint = %config.endpoint,
            page_size = config.page_size,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse TOML text. Blank text yields the defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
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
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "page_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "request_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn feed_options(&self) -> FeedOptions {
        FeedOptions {
            page_size: self.page_size,
            search_debounce: Duration::from_millis(self.search_debounce_ms),
        }
    }

    /// The token to authenticate with, from the environment or the file.
    pub fn api_token(&self) -> Option<SecretString> {
        let from_env = std::env::var(API_TOKEN_ENV).ok();
        Self::pick_token(from_env, self.api_token.as_deref())
    }

    fn pick_token(from_env: Option<String>, from_file: Option<&str>) -> Option<SecretString> {
        from_env
            .filter(|token| !token.trim().is_empty())
            .or_else(|| from_file.map(str::to_string))
            .filter(|token| !token.trim().is_empty())
            .map(SecretString::from)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn write_config(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("veritas_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.endpoint, "http://localhost:3000/query");
        assert_eq!(config.page_size, 20);
        assert_eq!(config.search_debounce_ms, 300);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.api_token.is_none());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/veritas_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.page_size, 20);
    }

    #[test]
    fn test_blank_file_returns_default() {
        let path = write_config("blank", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.endpoint, Config::default().endpoint);
        cleanup(&path);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let path = write_config("partial", "page_size = 50\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.search_debounce_ms, 300);
        cleanup(&path);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
endpoint = "https://news.example.org/graphql"
page_size = 10
search_debounce_ms = 150
request_timeout_secs = 5
api_token = "file-token"
"#;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.endpoint, "https://news.example.org/graphql");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.api_token.as_deref(), Some("file-token"));

        let options = config.feed_options();
        assert_eq!(options.page_size, 10);
        assert_eq!(options.search_debounce, Duration::from_millis(150));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = Config::parse("this is not [valid toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_wrong_type_returns_error() {
        assert!(Config::parse("page_size = \"twenty\"\n").is_err());
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let err = Config::parse("page_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "page_size", .. }));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::parse("page_size = 5\ntheme = \"dark\"\n").unwrap();
        assert_eq!(config.page_size, 5);
    }

    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
        cleanup(&path);
    }

    #[test]
    fn test_env_token_wins_over_file() {
        let token = Config::pick_token(Some("env".to_string()), Some("file")).unwrap();
        assert_eq!(token.expose_secret(), "env");

        let token = Config::pick_token(Some("  ".to_string()), Some("file")).unwrap();
        assert_eq!(token.expose_secret(), "file");

        assert!(Config::pick_token(None, Some("")).is_none());
        assert!(Config::pick_token(None, None).is_none());
    }

    #[test]
    fn test_debug_masks_api_token() {
        let config = Config {
            api_token: Some("super-secret-token-12345".to_string()),
            ..Config::default()
        };
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-token-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_debug_shows_none_when_no_token() {
        let debug_output = format!("{:?}", Config::default());
        assert!(debug_output.contains("None"));
        assert!(!debug_output.contains("[REDACTED]"));
    }
}

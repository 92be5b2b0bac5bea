//! Configuration loading, validation, and management for flowgate.
//!
//! Loads configuration from `$FLOWGATE_CONFIG` or `~/.flowgate/config.toml`
//! with environment variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file.
pub const ENV_CONFIG_PATH: &str = "FLOWGATE_CONFIG";
pub const ENV_GATEWAY_URL: &str = "FLOWGATE_GATEWAY_URL";
pub const ENV_GATEWAY_TOKEN: &str = "FLOWGATE_GATEWAY_TOKEN";
pub const ENV_TIMEZONE: &str = "FLOWGATE_TIMEZONE";

/// The root configuration structure.
///
/// Maps directly to `~/.flowgate/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Agent gateway connection
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Conversation flow behavior
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Memory search cache
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Group message debouncing
    #[serde(default)]
    pub debounce: DebounceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// In-memory store fixture used by the CLI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixture: Option<PathBuf>,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub base_url: String,

    /// Timeout for non-streaming gateway calls
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Outer deadline for trigger streams and background tasks
    #[serde(default = "default_stream_deadline_secs")]
    pub stream_deadline_secs: u64,

    /// Forwarded as `Authorization` when a request carries no token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:8081".into()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_stream_deadline_secs() -> u64 {
    600
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("stream_deadline_secs", &self.stream_deadline_secs)
            .field("token", &redact(&self.token))
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            timeout_secs: default_timeout_secs(),
            stream_deadline_secs: default_stream_deadline_secs(),
            token: None,
        }
    }
}

impl GatewayConfig {
    /// Base URL without trailing slashes; blank falls back to the default.
    pub fn normalized_base_url(&self) -> String {
        let trimmed = self.base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            default_gateway_url()
        } else {
            trimmed.to_string()
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        let secs = if self.timeout_secs == 0 {
            default_timeout_secs()
        } else {
            self.timeout_secs
        };
        std::time::Duration::from_secs(secs)
    }

    pub fn stream_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stream_deadline_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// IANA timezone passed to the agent
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// History turns loaded for heartbeat runs
    #[serde(default = "default_evolution_history_limit")]
    pub evolution_history_limit: i64,

    /// Max skills sent per request (0 = send all)
    #[serde(default)]
    pub skill_candidate_limit: usize,
}

fn default_timezone() -> String {
    "UTC".into()
}
fn default_evolution_history_limit() -> i64 {
    10
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            evolution_history_limit: default_evolution_history_limit(),
            skill_candidate_limit: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_cache_ttl_secs() -> u64 {
    60
}
fn default_cache_capacity() -> usize {
    256
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_window_ms() -> u64 {
    300
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `$FLOWGATE_CONFIG` or the default path
    /// (~/.flowgate/config.toml), then apply environment overrides:
    /// - `FLOWGATE_GATEWAY_URL`
    /// - `FLOWGATE_GATEWAY_TOKEN`
    /// - `FLOWGATE_TIMEZONE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var(ENV_CONFIG_PATH)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::config_dir().join("config.toml"));
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup. Blank values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get(ENV_GATEWAY_URL) {
            self.gateway.base_url = url;
        }
        if let Some(token) = get(ENV_GATEWAY_TOKEN) {
            self.gateway.token = Some(token);
        }
        if let Some(tz) = get(ENV_TIMEZONE) {
            self.resolver.timezone = tz;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".flowgate")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.gateway.normalized_base_url();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "gateway.base_url must be an http(s) URL, got '{url}'"
            )));
        }

        if self.memory.cache_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "memory.cache_capacity must be > 0".into(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::ValidationError(format!(
                "logging.format must be 'pretty' or 'json', got '{}'",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Timezone to report to the agent; blank falls back to UTC.
    pub fn timezone(&self) -> String {
        let tz = self.resolver.timezone.trim();
        if tz.is_empty() {
            default_timezone()
        } else {
            tz.to_string()
        }
    }

    /// Generate a default config TOML string (for the `config init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.gateway.base_url, "http://127.0.0.1:8081");
        assert_eq!(config.gateway.timeout_secs, 60);
        assert_eq!(config.resolver.timezone, "UTC");
        assert_eq!(config.resolver.evolution_history_limit, 10);
        assert_eq!(config.memory.cache_capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.gateway.base_url, config.gateway.base_url);
        assert_eq!(parsed.debounce.window_ms, config.debounce.window_ms);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.resolver.timezone, "UTC");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[gateway]
base_url = "https://agent.internal:9000/"

[resolver]
skill_candidate_limit = 12
"#
        )
        .unwrap();
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.gateway.normalized_base_url(), "https://agent.internal:9000");
        assert_eq!(config.gateway.timeout_secs, 60);
        assert_eq!(config.resolver.skill_candidate_limit, 12);
        assert_eq!(config.resolver.timezone, "UTC");
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gateway\nbase_url = 1").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn non_http_gateway_rejected() {
        let mut config = AppConfig::default();
        config.gateway.base_url = "ftp://example.com".into();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn zero_cache_capacity_rejected() {
        let mut config = AppConfig::default();
        config.memory.cache_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_log_format_rejected() {
        let mut config = AppConfig::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn blank_base_url_falls_back() {
        let mut config = AppConfig::default();
        config.gateway.base_url = "   ".into();
        assert_eq!(config.gateway.normalized_base_url(), "http://127.0.0.1:8081");
    }

    #[test]
    fn zero_timeout_uses_default() {
        let mut config = AppConfig::default();
        config.gateway.timeout_secs = 0;
        assert_eq!(config.gateway.timeout(), std::time::Duration::from_secs(60));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_GATEWAY_URL, "http://gw:8081"),
            (ENV_GATEWAY_TOKEN, "Bearer abc"),
            (ENV_TIMEZONE, " "),
        ]);
        let mut config = AppConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.gateway.base_url, "http://gw:8081");
        assert_eq!(config.gateway.token.as_deref(), Some("Bearer abc"));
        assert_eq!(config.timezone(), "UTC");
    }

    #[test]
    fn token_is_redacted_in_debug() {
        let mut config = AppConfig::default();
        config.gateway.token = Some("secret-token".into());
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("secret-token"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("127.0.0.1:8081"));
        assert!(toml_str.contains("evolution_history_limit"));
    }
}

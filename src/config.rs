//! Configuration management

use std::{env, fmt, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::gateway::allowlist::AddressRange;
use crate::gateway::proxy::UpstreamOperation;
use crate::{Error, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "OAUTH_PROXY_";

/// Config files probed when no explicit path is given, in order
const DEFAULT_CONFIG_PATHS: &[&str] = &["config.yaml", "config/config.yaml"];

/// Log levels accepted by `server.log_level`
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Upstream OAuth provider endpoints
    pub upstream: UpstreamConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// An explicit `path` must exist. Without one, `./config.yaml` and
    /// `./config/config.yaml` are tried and the first one found is used.
    /// `OAUTH_PROXY_`-prefixed environment variables are merged on top,
    /// with `__` separating nested keys (`OAUTH_PROXY_SERVER__PORT`).
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        } else if let Some(found) = DEFAULT_CONFIG_PATHS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
        {
            tracing::debug!(path = %found.display(), "Using config file");
            figment = figment.merge(Yaml::file(found));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Check the configuration and return every problem found
    ///
    /// An empty vector means the configuration is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if !self.auth.disabled
            && self.auth.resolve_api_key().is_none()
            && self.auth.ip_whitelist.iter().all(|e| e.trim().is_empty())
        {
            problems.push(
                "No authentication method configured: set an API key (--api-key / \
                 OAUTH_PROXY_API_KEY) or an IP whitelist (--ip-whitelist / \
                 OAUTH_PROXY_IP_WHITELIST)"
                    .to_string(),
            );
        }

        if self.server.port == 0 {
            problems.push("Port must be non-zero".to_string());
        }

        if !VALID_LOG_LEVELS.contains(&self.server.log_level.as_str()) {
            problems.push(format!(
                "Invalid log level: {} (valid: {})",
                self.server.log_level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }

        if self.server.request_timeout.is_zero() {
            problems.push("Request timeout must be greater than zero".to_string());
        }

        for entry in &self.auth.ip_whitelist {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if let Err(e) = entry.parse::<AddressRange>() {
                problems.push(format!("Invalid IP whitelist entry: {e}"));
            }
        }

        for op in UpstreamOperation::ALL {
            let url = self.upstream.url_for(op);
            if let Err(e) = Url::parse(url) {
                problems.push(format!("Invalid {} URL '{url}': {e}", op.name()));
            }
        }

        problems
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development (text logs)
    #[default]
    Development,
    /// Production (JSON logs)
    Production,
}

impl Environment {
    /// Default log format for this environment
    #[must_use]
    pub fn default_log_format(self) -> &'static str {
        match self {
            Self::Development => "text",
            Self::Production => "json",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => f.write_str("development"),
            Self::Production => f.write_str("production"),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Deployment environment
    pub environment: Environment,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Timeout applied to every upstream call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            environment: Environment::Development,
            log_level: "info".to_string(),
            request_timeout: Duration::from_secs(10),
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

/// Authentication configuration for protected routes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret expected in `X-API-Key`.
    /// Supports a literal value or `env:VAR_NAME`.
    pub api_key: Option<String>,

    /// Addresses and CIDR ranges allowed to call protected routes
    pub ip_whitelist: Vec<String>,

    /// Skip the authentication gate entirely
    pub disabled: bool,
}

impl AuthConfig {
    /// Resolve the API key (expand `env:VAR`), treating empty values as unset
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        let raw = self.api_key.as_deref()?;
        let resolved = match raw.strip_prefix("env:") {
            Some(var_name) => env::var(var_name).ok()?,
            None => raw.to_string(),
        };
        let trimmed = resolved.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// Non-empty whitelist entries, trimmed
    #[must_use]
    pub fn whitelist_entries(&self) -> Vec<String> {
        self.ip_whitelist
            .iter()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Upstream OAuth provider endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Browser authorization endpoint (redirect target)
    pub authorize_url: String,
    /// Token exchange endpoint
    pub token_url: String,
    /// User info endpoint
    pub userinfo_url: String,
    /// Token introspection endpoint
    pub tokeninfo_url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            authorize_url: UpstreamOperation::Authorize.default_url().to_string(),
            token_url: UpstreamOperation::TokenExchange.default_url().to_string(),
            userinfo_url: UpstreamOperation::UserInfo.default_url().to_string(),
            tokeninfo_url: UpstreamOperation::TokenInfo.default_url().to_string(),
        }
    }
}

impl UpstreamConfig {
    /// URL configured for an operation
    #[must_use]
    pub fn url_for(&self, op: UpstreamOperation) -> &str {
        match op {
            UpstreamOperation::Authorize => &self.authorize_url,
            UpstreamOperation::TokenExchange => &self.token_url,
            UpstreamOperation::UserInfo => &self.userinfo_url,
            UpstreamOperation::TokenInfo => &self.tokeninfo_url,
        }
    }
}

/// Serde adapter for human-readable durations
///
/// Accepts `"10s"`, `"2m"`, `"500ms"` or a bare number of seconds
/// (either as a string or an integer).
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(u64),
        Text(String),
    }

    /// Serialize Duration to a human-readable string (e.g., "30s", "500ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize a duration from "30s", "5m", "100ms" or plain seconds
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the value cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawDuration::deserialize(deserializer)? {
            RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
            RawDuration::Text(s) => parse(s.trim()).map_err(serde::de::Error::custom),
        }
    }

    /// Parse "30s", "5m", "100ms" or plain seconds
    ///
    /// # Errors
    ///
    /// Returns an error if the numeric part is not an unsigned integer.
    pub fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn valid_config() -> Config {
        Config {
            auth: AuthConfig {
                api_key: Some("abc123".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.request_timeout, Duration::from_secs(10));
        assert_eq!(config.server.environment, Environment::Development);
        assert_eq!(
            config.upstream.token_url,
            "https://oauth2.googleapis.com/token"
        );
        assert!(!config.auth.disabled);
    }

    #[test]
    fn test_yaml_deserialization() {
        let yaml = r#"
server:
  port: 9000
  environment: production
  request_timeout: 5
auth:
  api_key: "secret-key"
  ip_whitelist:
    - 192.168.1.0/24
    - 10.0.0.1
upstream:
  token_url: "http://127.0.0.1:9999/token"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.environment, Environment::Production);
        assert_eq!(config.server.request_timeout, Duration::from_secs(5));
        assert_eq!(config.auth.ip_whitelist.len(), 2);
        assert_eq!(config.upstream.token_url, "http://127.0.0.1:9999/token");
        // Untouched upstream URLs keep their defaults
        assert_eq!(
            config.upstream.userinfo_url,
            UpstreamOperation::UserInfo.default_url()
        );
    }

    #[test]
    fn test_unknown_environment_rejected() {
        let yaml = "server:\n  environment: staging\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_duration_formats() {
        for (raw, expected) in [
            ("\"30s\"", Duration::from_secs(30)),
            ("\"2m\"", Duration::from_secs(120)),
            ("\"250ms\"", Duration::from_millis(250)),
            ("\"7\"", Duration::from_secs(7)),
            ("12", Duration::from_secs(12)),
        ] {
            let yaml = format!("server:\n  request_timeout: {raw}\n");
            let config: Config = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(config.server.request_timeout, expected, "input {raw}");
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "server:\n  port: 9100\nauth:\n  api_key: from-file").unwrap();
        drop(f);

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.auth.resolve_api_key().as_deref(), Some("from-file"));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Config::load(Some(Path::new("/nonexistent/oauth-proxy.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_resolve_api_key() {
        let auth = AuthConfig {
            api_key: Some("  literal  ".to_string()),
            ..Default::default()
        };
        assert_eq!(auth.resolve_api_key().as_deref(), Some("literal"));

        let empty = AuthConfig {
            api_key: Some(String::new()),
            ..Default::default()
        };
        assert!(empty.resolve_api_key().is_none());

        let missing_env = AuthConfig {
            api_key: Some("env:OAUTH_PROXY_TEST_SURELY_UNSET_VAR".to_string()),
            ..Default::default()
        };
        assert!(missing_env.resolve_api_key().is_none());
    }

    #[test]
    fn test_whitelist_entries_trimmed() {
        let auth = AuthConfig {
            ip_whitelist: vec![" 10.0.0.1 ".to_string(), String::new(), "  ".to_string()],
            ..Default::default()
        };
        assert_eq!(auth.whitelist_entries(), vec!["10.0.0.1".to_string()]);
    }

    #[test]
    fn test_validate_ok() {
        assert!(valid_config().validate().is_empty());
    }

    #[test]
    fn test_validate_requires_auth() {
        let config = Config::default();
        let problems = config.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("No authentication method"));

        let disabled = Config {
            auth: AuthConfig {
                disabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(disabled.validate().is_empty());
    }

    #[test]
    fn test_validate_collects_all_problems() {
        let mut config = valid_config();
        config.server.port = 0;
        config.server.log_level = "loud".to_string();
        config.server.request_timeout = Duration::ZERO;
        config.auth.ip_whitelist = vec!["10.0.0.0/33".to_string(), "not-an-ip".to_string()];
        config.upstream.token_url = "not a url".to_string();

        let problems = config.validate();
        assert_eq!(problems.len(), 6, "{problems:?}");
        assert!(problems.iter().any(|p| p.contains("Port")));
        assert!(problems.iter().any(|p| p.contains("log level")));
        assert!(problems.iter().any(|p| p.contains("timeout")));
        assert!(problems.iter().any(|p| p.contains("10.0.0.0/33")));
        assert!(problems.iter().any(|p| p.contains("not-an-ip")));
        assert!(problems.iter().any(|p| p.contains("token")));
    }

    #[test]
    fn test_environment_log_format() {
        assert_eq!(Environment::Development.default_log_format(), "text");
        assert_eq!(Environment::Production.default_log_format(), "json");
        assert_eq!(Environment::Production.to_string(), "production");
    }
}

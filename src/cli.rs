//! Command-line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{Config, Environment, humantime_serde};

/// Gmail OAuth Proxy - access-controlled gateway to Google's OAuth endpoints
#[derive(Parser, Debug)]
#[command(name = "gmail-oauth-proxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "OAUTH_PROXY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the config value
    #[arg(long, env = "OAUTH_PROXY_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log format (text, json); defaults to json in production
    #[arg(long, env = "OAUTH_PROXY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Server options (used when no subcommand is given)
    #[command(flatten)]
    pub server: ServerArgs,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Server overrides applied on top of the config file and environment
#[derive(Args, Debug, Default, Clone)]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(short, long, env = "OAUTH_PROXY_PORT", global = true)]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "OAUTH_PROXY_HOST", global = true)]
    pub host: Option<String>,

    /// API key expected in the X-API-Key header
    #[arg(long, env = "OAUTH_PROXY_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Allowed client IPs or CIDR ranges (repeatable or comma-separated)
    #[arg(
        long,
        env = "OAUTH_PROXY_IP_WHITELIST",
        value_delimiter = ',',
        global = true
    )]
    pub ip_whitelist: Vec<String>,

    /// Deployment environment (development, production)
    #[arg(long = "env", env = "OAUTH_PROXY_ENV", value_parser = parse_environment, global = true)]
    pub environment: Option<Environment>,

    /// Upstream request timeout (e.g. 10s, 500ms, 2m)
    #[arg(long, env = "OAUTH_PROXY_TIMEOUT", value_parser = parse_timeout, global = true)]
    pub timeout: Option<std::time::Duration>,

    /// Disable authentication on protected routes (development only)
    #[arg(long, env = "OAUTH_PROXY_DISABLE_AUTH", global = true)]
    pub disable_auth: bool,
}

impl ServerArgs {
    /// Apply these overrides to `config`; unset flags leave it untouched
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref host) = self.host {
            config.server.host.clone_from(host);
        }
        if let Some(ref api_key) = self.api_key {
            config.auth.api_key = Some(api_key.clone());
        }
        let entries: Vec<String> = self
            .ip_whitelist
            .iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if !entries.is_empty() {
            config.auth.ip_whitelist = entries;
        }
        if let Some(environment) = self.environment {
            config.server.environment = environment;
        }
        if let Some(timeout) = self.timeout {
            config.server.request_timeout = timeout;
        }
        if self.disable_auth {
            config.auth.disabled = true;
        }
    }
}

fn parse_environment(s: &str) -> Result<Environment, String> {
    match s.to_ascii_lowercase().as_str() {
        "development" | "dev" => Ok(Environment::Development),
        "production" | "prod" => Ok(Environment::Production),
        other => Err(format!(
            "invalid environment '{other}' (expected development or production)"
        )),
    }
}

fn parse_timeout(s: &str) -> Result<std::time::Duration, String> {
    humantime_serde::parse(s.trim()).map_err(|e| format!("invalid timeout '{s}': {e}"))
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the proxy server (default)
    #[command(alias = "server")]
    Serve,

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Show version information
    Version {
        /// Print only the version number
        #[arg(short, long)]
        short: bool,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration (API key masked)
    Show,

    /// Validate the effective configuration
    Validate,

    /// Delete the cached auto-generated API key
    ClearCache,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_is_server_mode() {
        let cli = Cli::try_parse_from(["gmail-oauth-proxy"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.server.port.is_none());
    }

    #[test]
    fn test_server_flags() {
        let cli = Cli::try_parse_from([
            "gmail-oauth-proxy",
            "serve",
            "--port",
            "9000",
            "--api-key",
            "abc123",
            "--ip-whitelist",
            "10.0.0.0/8,192.168.1.1",
            "--ip-whitelist",
            "203.0.113.7",
            "--env",
            "production",
            "--timeout",
            "5s",
        ])
        .unwrap();

        assert!(matches!(cli.command, Some(Command::Serve)));
        assert_eq!(cli.server.port, Some(9000));
        assert_eq!(
            cli.server.ip_whitelist,
            ["10.0.0.0/8", "192.168.1.1", "203.0.113.7"]
        );
        assert_eq!(cli.server.environment, Some(Environment::Production));
        assert_eq!(cli.server.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_server_alias() {
        let cli = Cli::try_parse_from(["gmail-oauth-proxy", "server"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Serve)));
    }

    #[test]
    fn test_invalid_env_rejected() {
        assert!(Cli::try_parse_from(["gmail-oauth-proxy", "--env", "staging"]).is_err());
        assert!(Cli::try_parse_from(["gmail-oauth-proxy", "--timeout", "soon"]).is_err());
    }

    #[test]
    fn test_config_subcommands() {
        let cli = Cli::try_parse_from(["gmail-oauth-proxy", "config", "clear-cache"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand::ClearCache))
        ));

        let cli = Cli::try_parse_from(["gmail-oauth-proxy", "version", "--short"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Version { short: true })));
    }

    #[test]
    fn test_apply_overrides() {
        let args = ServerArgs {
            port: Some(9100),
            host: Some("127.0.0.1".to_string()),
            api_key: Some("k".to_string()),
            ip_whitelist: vec![" 10.0.0.1 ".to_string(), String::new()],
            environment: Some(Environment::Production),
            timeout: Some(Duration::from_millis(500)),
            disable_auth: false,
        };
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.auth.api_key.as_deref(), Some("k"));
        assert_eq!(config.auth.ip_whitelist, ["10.0.0.1"]);
        assert_eq!(config.server.environment, Environment::Production);
        assert_eq!(config.server.request_timeout, Duration::from_millis(500));
        assert!(!config.auth.disabled);
    }

    #[test]
    fn test_apply_leaves_unset_fields() {
        let mut config = Config::default();
        config.auth.ip_whitelist = vec!["10.0.0.1".to_string()];
        ServerArgs::default().apply(&mut config);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.ip_whitelist, ["10.0.0.1"]);
    }
}

//! Gmail OAuth Proxy - access-controlled gateway to Google's OAuth endpoints

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use gmail_oauth_proxy::{
    cli::{Cli, Command, ConfigCommand},
    config::Config,
    gateway::{Gateway, redact},
    key_cache::ApiKeyCache,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(Command::Version { short }) = cli.command {
        print_version(short);
        return ExitCode::SUCCESS;
    }

    // Load configuration (file + environment), then CLI overrides
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    cli.server.apply(&mut config);
    if let Some(ref level) = cli.log_level {
        config.server.log_level.clone_from(level);
    }

    let log_format = cli
        .log_format
        .as_deref()
        .unwrap_or_else(|| config.server.environment.default_log_format());
    if let Err(e) = setup_tracing(&config.server.log_level, Some(log_format)) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Config(cmd)) => run_config_command(&cmd, &config),
        Some(Command::Serve) | None => run_server(config).await,
        Some(Command::Version { .. }) => ExitCode::SUCCESS,
    }
}

fn print_version(short: bool) {
    if short {
        println!("{}", env!("CARGO_PKG_VERSION"));
    } else {
        println!("gmail-oauth-proxy {}", env!("CARGO_PKG_VERSION"));
        println!("{}", env!("CARGO_PKG_DESCRIPTION"));
    }
}

/// Run configuration management commands
fn run_config_command(cmd: &ConfigCommand, config: &Config) -> ExitCode {
    match cmd {
        ConfigCommand::Show => {
            let mut shown = config.clone();
            shown.auth.api_key = config
                .auth
                .resolve_api_key()
                .map(|key| redact::mask_value(&key));
            match serde_yaml::to_string(&shown) {
                Ok(yaml) => {
                    print!("{yaml}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Failed to render configuration: {e}");
                    ExitCode::FAILURE
                }
            }
        }

        ConfigCommand::Validate => {
            let problems = config.validate();
            if problems.is_empty() {
                println!("Configuration is valid");
                ExitCode::SUCCESS
            } else {
                eprintln!("Configuration has {} problem(s):", problems.len());
                for problem in &problems {
                    eprintln!("  - {problem}");
                }
                ExitCode::FAILURE
            }
        }

        ConfigCommand::ClearCache => {
            match ApiKeyCache::new().and_then(|cache| cache.clear().map(|removed| (cache, removed))) {
                Ok((cache, true)) => {
                    println!("Removed cached API key: {}", cache.file_path().display());
                    ExitCode::SUCCESS
                }
                Ok((_, false)) => {
                    println!("No cached API key to remove");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Failed to clear cache: {e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

/// Fill in a cached or generated API key when no auth method is configured
fn ensure_api_key(config: &mut Config) -> gmail_oauth_proxy::Result<()> {
    if config.auth.disabled
        || config.auth.resolve_api_key().is_some()
        || !config.auth.whitelist_entries().is_empty()
    {
        return Ok(());
    }

    let cache = ApiKeyCache::new()?;
    let (api_key, generated) = cache.get_or_generate()?;

    if generated {
        warn!(
            path = %cache.file_path().display(),
            "No authentication configured; generated a new API key"
        );
        // Shown once so operators can hand it to clients
        eprintln!("Generated API key: {api_key}");
        eprintln!("Clients must send it in the X-API-Key header.");
    } else {
        info!(
            path = %cache.file_path().display(),
            api_key = %redact::mask_value(&api_key),
            "Using cached API key"
        );
    }

    config.auth.api_key = Some(api_key);
    Ok(())
}

/// Run the proxy server
async fn run_server(mut config: Config) -> ExitCode {
    if let Err(e) = ensure_api_key(&mut config) {
        error!("Failed to prepare API key: {e}");
        return ExitCode::FAILURE;
    }

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!("Invalid configuration: {problem}");
        }
        return ExitCode::FAILURE;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        environment = %config.server.environment,
        "Starting Gmail OAuth Proxy"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}

//! Gmail OAuth Proxy Library
//!
//! Access-controlled gateway in front of Google's OAuth 2.0 endpoints.
//!
//! # Features
//!
//! - **Authentication gate**: shared `X-API-Key` secret, IP/CIDR allowlist,
//!   or both (both must pass)
//! - **Forwarding proxy**: authorize redirect, token exchange, user info and
//!   token introspection with upstream passthrough
//! - **Redacted audit trail**: tokens, secrets and codes are masked before
//!   they reach the log sink
//! - **Auto-generated key**: a persistent API key when nothing is configured

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod key_cache;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// HTTP client and server internals that log full request URLs at `debug`
const URL_LOGGING_TARGETS: [&str; 3] = ["reqwest", "hyper", "hyper_util"];

/// Log filter for `level`
///
/// Below `info`, the `reqwest` and `hyper` internals stay at `info` so
/// query-string tokens never reach the sink.
#[must_use]
pub fn log_filter(level: &str) -> EnvFilter {
    let level = level.trim().to_ascii_lowercase();
    let mut directives = level.clone();
    if matches!(level.as_str(), "debug" | "trace") {
        for target in URL_LOGGING_TARGETS {
            directives.push_str(&format!(",{target}=info"));
        }
    }
    EnvFilter::new(directives)
}

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`. `format` is `json` or text.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    }
    .map_err(|e| Error::Internal(format!("Failed to initialize tracing: {e}")))
}

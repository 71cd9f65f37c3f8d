//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, info_span, warn};

use super::access_log::RequestLogger;
use super::auth::{AuthGate, AuthPolicy};
use super::proxy::{OAuthProxy, UpstreamOperation};
use super::redact;
use super::router::{AppState, create_router};
use crate::config::Config;
use crate::{Error, Result};

/// Allowlist entries shown in the startup banner
const BANNER_ALLOWLIST_ENTRIES: usize = 3;

/// OAuth proxy gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared state handed to the router
    state: Arc<AppState>,
}

impl Gateway {
    /// Create a new gateway
    ///
    /// Builds each component's logging span once and hands it down.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no authentication method is configured
    /// and auth is not disabled, or if the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let gate = if config.auth.disabled {
            None
        } else {
            let policy = AuthPolicy::from_config(&config.auth)?;
            Some(Arc::new(AuthGate::new(policy, info_span!("auth_gate"))))
        };

        let proxy = OAuthProxy::new(
            config.upstream.clone(),
            config.server.request_timeout,
            info_span!("proxy"),
        )?;

        let logger = Arc::new(RequestLogger::new(
            info_span!("access"),
            config.server.max_body_size,
        ));

        let state = Arc::new(AppState {
            gate,
            proxy,
            logger,
            max_body_size: config.server.max_body_size,
        });

        Ok(Self { config, state })
    }

    /// Router serving this gateway, without a listener
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Run the gateway until Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;

        self.log_banner(addr);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Server stopped");
        Ok(())
    }

    fn log_banner(&self, addr: SocketAddr) {
        let config = &self.config;

        info!("============================================================");
        info!("GMAIL OAUTH PROXY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(address = %addr, "Listening");
        info!(
            environment = %config.server.environment,
            log_level = %config.server.log_level,
            timeout = ?config.server.request_timeout,
            "Runtime"
        );

        match &self.state.gate {
            None => warn!("AUTHENTICATION disabled - protected routes are open to all requests"),
            Some(gate) => {
                let policy = gate.policy();
                let entries = policy.allowed_addresses();
                let shown: Vec<&str> = entries
                    .iter()
                    .take(BANNER_ALLOWLIST_ENTRIES)
                    .map(String::as_str)
                    .collect();
                info!(
                    api_key = %policy.shared_secret().map(redact::mask_value).unwrap_or_default(),
                    ip_whitelist = ?shown,
                    ip_whitelist_total = entries.len(),
                    "AUTHENTICATION enabled (both must pass when both are set)"
                );
            }
        }

        info!("Routes:");
        info!("  GET  http://{addr}/health");
        for op in UpstreamOperation::ALL {
            info!(
                "  {:<4} http://{addr}/{}  -> {}",
                op.method().as_str(),
                route_for(op),
                self.state.proxy.upstream().url_for(op)
            );
        }
        info!("============================================================");
    }
}

/// Path serving an operation
fn route_for(op: UpstreamOperation) -> &'static str {
    match op {
        UpstreamOperation::Authorize => "auth",
        UpstreamOperation::TokenExchange => "token",
        UpstreamOperation::UserInfo => "userinfo",
        UpstreamOperation::TokenInfo => "tokeninfo",
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;

    #[test]
    fn test_new_requires_auth_method() {
        let err = Gateway::new(Config::default()).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_new_with_auth_disabled() {
        let config = Config {
            auth: AuthConfig {
                disabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let gateway = Gateway::new(config).unwrap();
        assert!(gateway.state.gate.is_none());
    }

    #[test]
    fn test_routes_cover_every_operation() {
        let routes: Vec<&str> = UpstreamOperation::ALL.into_iter().map(route_for).collect();
        assert_eq!(routes, ["auth", "token", "userinfo", "tokeninfo"]);
    }
}

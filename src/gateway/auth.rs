//! Authentication gate for protected routes
//!
//! Two mechanisms, combined by an explicit decision table:
//! - Shared secret presented in the `X-API-Key` header
//! - IP allowlist of single addresses and CIDR ranges
//!
//! When both are configured a request must pass both. When only one is
//! configured, that one decides. When neither is configured the gate
//! refuses every request with a configuration error.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::{Span, debug, info};

use super::api_error::ApiError;
use super::{allowlist, client_addr};
use crate::config::AuthConfig;
use crate::{Error, Result};

/// Header carrying the shared secret
pub const API_KEY_HEADER: &str = "x-api-key";

/// Resolved, validated authentication policy
///
/// Immutable for the lifetime of the server. Construction guarantees at
/// least one mechanism is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPolicy {
    shared_secret: Option<String>,
    allowed_addresses: Vec<String>,
}

impl AuthPolicy {
    /// Build a policy, rejecting one with no mechanism configured
    ///
    /// An empty secret counts as absent; blank allowlist entries are dropped.
    pub fn new(shared_secret: Option<String>, allowed_addresses: Vec<String>) -> Result<Self> {
        let shared_secret = shared_secret.filter(|s| !s.is_empty());
        let allowed_addresses: Vec<String> = allowed_addresses
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();

        if shared_secret.is_none() && allowed_addresses.is_empty() {
            return Err(Error::Config(
                "at least one authentication method is required: API key or IP whitelist"
                    .to_string(),
            ));
        }

        Ok(Self {
            shared_secret,
            allowed_addresses,
        })
    }

    /// Resolve a policy from configuration
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        Self::new(config.resolve_api_key(), config.whitelist_entries())
    }

    /// Configured shared secret, if any
    #[must_use]
    pub fn shared_secret(&self) -> Option<&str> {
        self.shared_secret.as_deref()
    }

    /// Configured allowlist entries, in order
    #[must_use]
    pub fn allowed_addresses(&self) -> &[String] {
        &self.allowed_addresses
    }

    /// Whether a shared secret is configured
    #[must_use]
    pub fn has_secret(&self) -> bool {
        self.shared_secret.is_some()
    }

    /// Whether an allowlist is configured
    #[must_use]
    pub fn has_allowlist(&self) -> bool {
        !self.allowed_addresses.is_empty()
    }
}

/// Outcome of checking the presented secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretCheck {
    /// Header absent or empty
    Missing,
    /// Header present but wrong
    Invalid,
    /// Header matches the configured secret
    Valid,
}

impl SecretCheck {
    /// Whether the secret check passed
    #[must_use]
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }
}

/// Reason recorded for every gate decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    /// Secret accepted (secret-only policy)
    SecretOk,
    /// Address accepted (allowlist-only policy)
    IpOk,
    /// Secret and address both accepted
    BothOk,
    /// No mechanism configured
    NotConfigured,
    /// Secret-only policy, header absent
    SecretMissing,
    /// Secret-only policy, header wrong
    SecretInvalid,
    /// Allowlist-only policy, address rejected
    IpNotAllowed,
    /// Both configured, both failed
    BothFailed,
    /// Both configured, secret failed
    SecretFailed,
    /// Both configured, address failed
    IpFailed,
}

impl ReasonCode {
    /// Wire code returned in error bodies and logged for audit
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SecretOk => "AUTH_SECRET_OK",
            Self::IpOk => "AUTH_IP_OK",
            Self::BothOk => "AUTH_BOTH_OK",
            Self::NotConfigured => "AUTH_NOT_CONFIGURED",
            Self::SecretMissing => "AUTH_SECRET_MISSING",
            Self::SecretInvalid => "AUTH_SECRET_INVALID",
            Self::IpNotAllowed => "AUTH_IP_NOT_ALLOWED",
            Self::BothFailed => "AUTH_BOTH_FAILED",
            Self::SecretFailed => "AUTH_SECRET_FAILED",
            Self::IpFailed => "AUTH_IP_FAILED",
        }
    }

    /// Human-readable message for the caller
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::SecretOk | Self::IpOk | Self::BothOk => "Authenticated",
            Self::NotConfigured => "Authentication not configured",
            Self::SecretMissing => "Missing X-API-Key header",
            Self::SecretInvalid => "Invalid API key",
            Self::IpNotAllowed | Self::IpFailed => "IP address not allowed",
            Self::BothFailed => "Both API key and IP address validation failed",
            Self::SecretFailed => "API key validation failed",
        }
    }

    /// HTTP status for this reason
    ///
    /// IP-only failures are 403; anything involving the secret is 401.
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::SecretOk | Self::IpOk | Self::BothOk => StatusCode::OK,
            Self::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IpNotAllowed | Self::IpFailed => StatusCode::FORBIDDEN,
            Self::SecretMissing | Self::SecretInvalid | Self::BothFailed | Self::SecretFailed => {
                StatusCode::UNAUTHORIZED
            }
        }
    }

    /// Whether this reason admits the request
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::SecretOk | Self::IpOk | Self::BothOk)
    }
}

/// Per-request gate decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Why
    pub reason: ReasonCode,
    /// Status to answer with when denied
    pub status: StatusCode,
}

impl From<ReasonCode> for AuthDecision {
    fn from(reason: ReasonCode) -> Self {
        Self {
            allowed: reason.is_allowed(),
            reason,
            status: reason.status(),
        }
    }
}

/// The decision table.
///
/// | secret | allowlist | rule                      |
/// |--------|-----------|---------------------------|
/// | no     | no        | refuse (not configured)   |
/// | yes    | no        | allow iff secret valid    |
/// | no     | yes       | allow iff address allowed |
/// | yes    | yes       | allow iff both pass       |
///
/// `secret` is ignored when no secret is configured and `ip_ok` is ignored
/// when no allowlist is configured.
#[must_use]
pub fn decide(has_secret: bool, has_allowlist: bool, secret: SecretCheck, ip_ok: bool) -> AuthDecision {
    let reason = match (has_secret, has_allowlist) {
        (false, false) => ReasonCode::NotConfigured,
        (true, false) => match secret {
            SecretCheck::Valid => ReasonCode::SecretOk,
            SecretCheck::Missing => ReasonCode::SecretMissing,
            SecretCheck::Invalid => ReasonCode::SecretInvalid,
        },
        (false, true) => {
            if ip_ok {
                ReasonCode::IpOk
            } else {
                ReasonCode::IpNotAllowed
            }
        }
        (true, true) => match (secret.is_valid(), ip_ok) {
            (true, true) => ReasonCode::BothOk,
            (false, false) => ReasonCode::BothFailed,
            (false, true) => ReasonCode::SecretFailed,
            (true, false) => ReasonCode::IpFailed,
        },
    };
    reason.into()
}

/// Authentication gate
///
/// Pure over the request headers and resolved address; holds only the
/// read-only policy and its logging span.
#[derive(Debug)]
pub struct AuthGate {
    policy: AuthPolicy,
    span: Span,
}

impl AuthGate {
    /// Create a gate for a validated policy, logging inside `span`
    #[must_use]
    pub fn new(policy: AuthPolicy, span: Span) -> Self {
        Self { policy, span }
    }

    /// The policy this gate enforces
    #[must_use]
    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Logging context for this gate
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Compare the presented `X-API-Key` with the configured secret
    #[must_use]
    pub fn check_secret(&self, headers: &HeaderMap) -> SecretCheck {
        let Some(expected) = self.policy.shared_secret() else {
            return SecretCheck::Invalid;
        };

        match headers.get(API_KEY_HEADER) {
            None => SecretCheck::Missing,
            Some(value) if value.is_empty() => SecretCheck::Missing,
            Some(value) => {
                if bool::from(value.as_bytes().ct_eq(expected.as_bytes())) {
                    SecretCheck::Valid
                } else {
                    SecretCheck::Invalid
                }
            }
        }
    }

    /// Decide whether a request from `client` with `headers` may proceed
    #[must_use]
    pub fn evaluate(&self, headers: &HeaderMap, client: &str) -> AuthDecision {
        let _enter = self.span.enter();

        let has_secret = self.policy.has_secret();
        let has_allowlist = self.policy.has_allowlist();

        let secret = if has_secret {
            self.check_secret(headers)
        } else {
            SecretCheck::Missing
        };
        let ip_ok = has_allowlist && allowlist::matches(client, self.policy.allowed_addresses());

        debug!(
            client = %client,
            secret = ?secret,
            ip_ok,
            "Evaluated authentication mechanisms"
        );

        decide(has_secret, has_allowlist, secret, ip_ok)
    }
}

/// Gate middleware for protected routes
///
/// Denials short-circuit with the gate's error body. Admitted requests
/// carry their [`AuthDecision`] on the response for the access log.
pub async fn auth_middleware(
    State(gate): State<Arc<AuthGate>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_addr::resolve(request.headers(), peer);

    let decision = gate.evaluate(request.headers(), &client);

    if !decision.allowed {
        return gate
            .span()
            .in_scope(|| ApiError::Auth { decision, client }.into_response());
    }

    gate.span().in_scope(|| {
        info!(client = %client, reason = decision.reason.as_str(), "Authentication successful");
    });

    let mut response = next.run(request).await;
    response.extensions_mut().insert(decision);
    response
}

//! Error responses for the HTTP surface
//!
//! Every failure the gateway answers with is an [`ApiError`]. Conversion to
//! a response is the single place failures are logged, so nothing is logged
//! twice.

use axum::{
    Json,
    extract::rejection::{BytesRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::auth::{AuthDecision, ReasonCode};

/// Error body returned for every gateway-level failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable description
    pub error: String,
    /// Machine-readable code
    pub code: String,
}

/// Failure answered by the gateway itself
///
/// Upstream error payloads are not represented here; they are passed
/// through untouched.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or malformed request fields (400)
    Validation(String),
    /// Gate denial, or the gate refusing because nothing is configured
    Auth {
        /// The gate's decision
        decision: AuthDecision,
        /// Resolved caller address
        client: String,
    },
    /// `/userinfo` called without an `Authorization` header (401)
    MissingAuthorization,
    /// Upstream transport failure; the detail is logged, never returned (502)
    Proxy(String),
    /// Unexpected local fault (500)
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth { decision, .. } => decision.status,
            Self::MissingAuthorization => StatusCode::UNAUTHORIZED,
            Self::Proxy(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body returned to the caller
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        let (error, code) = match self {
            Self::Validation(detail) => (detail.clone(), "invalid_request"),
            Self::Auth { decision, .. } => (
                decision.reason.message().to_string(),
                decision.reason.as_str(),
            ),
            Self::MissingAuthorization => (
                "Missing Authorization header".to_string(),
                "invalid_token",
            ),
            Self::Proxy(_) => (
                "Failed to communicate with OAuth provider".to_string(),
                "temporarily_unavailable",
            ),
            Self::Internal(_) => ("Internal server error".to_string(), "server_error"),
        };
        ErrorBody {
            error,
            code: code.to_string(),
        }
    }

    fn log(&self) {
        match self {
            Self::Validation(detail) => warn!(detail = %detail, "Request validation failed"),
            Self::Auth { decision, client } if decision.reason == ReasonCode::NotConfigured => {
                error!(
                    client = %client,
                    reason = decision.reason.as_str(),
                    "No authentication method configured"
                );
            }
            Self::Auth { decision, client } => warn!(
                client = %client,
                reason = decision.reason.as_str(),
                status = decision.status.as_u16(),
                "Authentication failed"
            ),
            Self::MissingAuthorization => warn!("Missing Authorization header"),
            Self::Proxy(detail) => error!(error = %detail, "Upstream request failed"),
            Self::Internal(detail) => error!(error = %detail, "Internal error"),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(format!("Invalid query string: {}", rejection.body_text()))
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        Self::Validation(format!("Unreadable request body: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(err: ApiError) -> (StatusCode, ErrorBody) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_validation_error() {
        let (status, body) = body_of(ApiError::Validation("Missing code".to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "invalid_request");
        assert_eq!(body.error, "Missing code");
    }

    #[tokio::test]
    async fn test_auth_error_uses_reason_code() {
        let err = ApiError::Auth {
            decision: ReasonCode::IpFailed.into(),
            client: "198.51.100.9".to_string(),
        };
        let (status, body) = body_of(err).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.code, "AUTH_IP_FAILED");
    }

    #[tokio::test]
    async fn test_not_configured_is_500() {
        let err = ApiError::Auth {
            decision: ReasonCode::NotConfigured.into(),
            client: String::new(),
        };
        let (status, body) = body_of(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, "AUTH_NOT_CONFIGURED");
    }

    #[tokio::test]
    async fn test_proxy_error_hides_detail() {
        let err = ApiError::Proxy("connection refused (os error 111)".to_string());
        let (status, body) = body_of(err).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.code, "temporarily_unavailable");
        assert!(!body.error.contains("refused"));
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let (status, body) = body_of(ApiError::Internal("boom".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, "server_error");
        assert_eq!(body.error, "Internal server error");
    }
}

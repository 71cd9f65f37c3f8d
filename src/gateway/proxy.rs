//! Forwarding proxy for the four OAuth operations
//!
//! Each operation validates the inbound request, then either builds a
//! browser redirect (authorize) or makes exactly one upstream call and
//! passes the upstream status, body and `Content-Type` back unchanged.
//! Transport failures become [`ApiError::Proxy`]; upstream error payloads
//! are data and are never reinterpreted.

use std::collections::HashMap;
use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, redirect};
use serde_json::{Map, Value};
use tracing::{Instrument, Span, info};
use url::Url;

use super::api_error::ApiError;
use super::redact;
use crate::config::UpstreamConfig;
use crate::{Error, Result};

/// User agent sent on every upstream call
pub const USER_AGENT: &str = concat!("gmail-oauth-proxy/", env!("CARGO_PKG_VERSION"));

/// Authorize parameters that must be present, in forwarding order
const AUTHORIZE_REQUIRED: [&str; 5] = [
    "client_id",
    "redirect_uri",
    "scope",
    "state",
    "response_type",
];

/// Authorize parameters forwarded when present
const AUTHORIZE_OPTIONAL: [&str; 2] = ["access_type", "prompt"];

/// Token exchange fields read from the inbound body
const TOKEN_FIELDS: [&str; 6] = [
    "client_id",
    "client_secret",
    "grant_type",
    "code",
    "redirect_uri",
    "refresh_token",
];

/// The upstream operations this proxy knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamOperation {
    /// Browser authorization redirect
    Authorize,
    /// Code or refresh-token exchange
    TokenExchange,
    /// User profile lookup with a bearer token
    UserInfo,
    /// Access token introspection
    TokenInfo,
}

impl UpstreamOperation {
    /// Every operation, in route order
    pub const ALL: [Self; 4] = [
        Self::Authorize,
        Self::TokenExchange,
        Self::UserInfo,
        Self::TokenInfo,
    ];

    /// Short name used in logs and validation messages
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::TokenExchange => "token",
            Self::UserInfo => "userinfo",
            Self::TokenInfo => "tokeninfo",
        }
    }

    /// Google endpoint used when none is configured
    #[must_use]
    pub fn default_url(self) -> &'static str {
        match self {
            Self::Authorize => "https://accounts.google.com/o/oauth2/v2/auth",
            Self::TokenExchange => "https://oauth2.googleapis.com/token",
            Self::UserInfo => "https://www.googleapis.com/oauth2/v2/userinfo",
            Self::TokenInfo => "https://oauth2.googleapis.com/tokeninfo",
        }
    }

    /// Method used towards the upstream (authorize is a browser GET)
    #[must_use]
    pub fn method(self) -> Method {
        match self {
            Self::TokenExchange => Method::POST,
            Self::Authorize | Self::UserInfo | Self::TokenInfo => Method::GET,
        }
    }
}

/// Non-empty value of `key`, if any
fn field<'a>(fields: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    fields.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

fn require<'a>(fields: &'a HashMap<String, String>, key: &str) -> std::result::Result<&'a str, ApiError> {
    field(fields, key).ok_or_else(|| ApiError::Validation(format!("Missing required field: {key}")))
}

/// Validated authorize parameters, in forwarding order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeRequest {
    params: Vec<(&'static str, String)>,
}

impl AuthorizeRequest {
    /// Validate query parameters
    ///
    /// Only the known parameters are kept; anything else is dropped.
    ///
    /// # Errors
    ///
    /// [`ApiError::Validation`] if a required parameter is missing or
    /// `response_type` is not `code`.
    pub fn from_query(query: &HashMap<String, String>) -> std::result::Result<Self, ApiError> {
        let mut params = Vec::with_capacity(AUTHORIZE_REQUIRED.len() + AUTHORIZE_OPTIONAL.len());

        for key in AUTHORIZE_REQUIRED {
            let value = field(query, key).ok_or_else(|| {
                ApiError::Validation(format!("Missing required parameter: {key}"))
            })?;
            params.push((key, value.to_string()));
        }

        let response_type = field(query, "response_type").unwrap_or_default();
        if response_type != "code" {
            return Err(ApiError::Validation(format!(
                "Unsupported response_type: {response_type}"
            )));
        }

        for key in AUTHORIZE_OPTIONAL {
            if let Some(value) = field(query, key) {
                params.push((key, value.to_string()));
            }
        }

        Ok(Self { params })
    }

    /// Parameters in forwarding order
    #[must_use]
    pub fn params(&self) -> &[(&'static str, String)] {
        &self.params
    }
}

/// Grant-specific part of a token exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// `grant_type=authorization_code`
    AuthorizationCode {
        /// Authorization code from the redirect
        code: String,
        /// Redirect URI used for the authorize step
        redirect_uri: String,
    },
    /// `grant_type=refresh_token`
    RefreshToken {
        /// Refresh token to redeem
        refresh_token: String,
    },
}

/// Validated token exchange request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenExchangeRequest {
    /// OAuth client identifier
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Grant and its fields
    pub grant: Grant,
}

impl TokenExchangeRequest {
    /// Validate a field mapping parsed from the request body
    ///
    /// # Errors
    ///
    /// [`ApiError::Validation`] if a required field is missing or
    /// `grant_type` is not supported.
    pub fn from_fields(fields: &HashMap<String, String>) -> std::result::Result<Self, ApiError> {
        let client_id = require(fields, "client_id")?.to_string();
        let client_secret = require(fields, "client_secret")?.to_string();
        let grant_type = require(fields, "grant_type")?;

        let grant = match grant_type {
            "authorization_code" => Grant::AuthorizationCode {
                code: require(fields, "code")?.to_string(),
                redirect_uri: require(fields, "redirect_uri")?.to_string(),
            },
            "refresh_token" => Grant::RefreshToken {
                refresh_token: require(fields, "refresh_token")?.to_string(),
            },
            other => {
                return Err(ApiError::Validation(format!(
                    "Unsupported grant_type: {other}"
                )));
            }
        };

        Ok(Self {
            client_id,
            client_secret,
            grant,
        })
    }

    /// Wire value of `grant_type`
    #[must_use]
    pub fn grant_type(&self) -> &'static str {
        match self.grant {
            Grant::AuthorizationCode { .. } => "authorization_code",
            Grant::RefreshToken { .. } => "refresh_token",
        }
    }

    /// Exactly the fields forwarded upstream, in order
    #[must_use]
    pub fn form_fields(&self) -> Vec<(&'static str, &str)> {
        let mut fields = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", self.grant_type()),
        ];
        match &self.grant {
            Grant::AuthorizationCode { code, redirect_uri } => {
                fields.push(("code", code));
                fields.push(("redirect_uri", redirect_uri));
            }
            Grant::RefreshToken { refresh_token } => {
                fields.push(("refresh_token", refresh_token));
            }
        }
        fields
    }
}

/// Parse a token exchange body according to its `Content-Type`
///
/// JSON bodies must be objects whose known fields are strings (nulls count
/// as absent). Form bodies keep the first occurrence of each key.
///
/// # Errors
///
/// [`ApiError::Validation`] for an unsupported content type or a body that
/// does not parse.
pub fn parse_token_body(
    content_type: Option<&str>,
    body: &[u8],
) -> std::result::Result<HashMap<String, String>, ApiError> {
    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();

    if content_type.contains("json") {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ApiError::Validation(format!("Invalid JSON body: {e}")))?;
        let Value::Object(object) = value else {
            return Err(ApiError::Validation(
                "JSON body must be an object".to_string(),
            ));
        };

        let mut fields = HashMap::new();
        for key in TOKEN_FIELDS {
            match object.get(key) {
                None | Some(Value::Null) => {}
                Some(Value::String(s)) => {
                    fields.insert(key.to_string(), s.clone());
                }
                Some(_) => {
                    return Err(ApiError::Validation(format!(
                        "Field '{key}' must be a string"
                    )));
                }
            }
        }
        Ok(fields)
    } else if content_type.contains("x-www-form-urlencoded") {
        let mut fields = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(body) {
            fields.entry(key.into_owned()).or_insert_with(|| value.into_owned());
        }
        Ok(fields)
    } else {
        Err(ApiError::Validation(
            "Unsupported Content-Type: expected application/json or \
             application/x-www-form-urlencoded"
                .to_string(),
        ))
    }
}

/// Upstream response passed through to the caller
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// Upstream status code
    pub status: StatusCode,
    /// Upstream `Content-Type`, if sent
    pub content_type: Option<HeaderValue>,
    /// Full upstream body
    pub body: Bytes,
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        if let Some(content_type) = self.content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}

/// Forwarding proxy
///
/// Holds the shared HTTP client, which is safe for concurrent use and
/// reuses connections across requests.
#[derive(Debug, Clone)]
pub struct OAuthProxy {
    client: Client,
    upstream: UpstreamConfig,
    span: Span,
}

impl OAuthProxy {
    /// Create a proxy whose upstream calls are bounded by `timeout`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(upstream: UpstreamConfig, timeout: Duration, span: Span) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            upstream,
            span,
        })
    }

    /// Upstream endpoints in use
    #[must_use]
    pub fn upstream(&self) -> &UpstreamConfig {
        &self.upstream
    }

    /// Build the upstream authorization URL for a browser redirect
    ///
    /// No upstream call is made.
    ///
    /// # Errors
    ///
    /// [`ApiError::Validation`] for bad parameters, [`ApiError::Internal`]
    /// if the configured authorize URL does not parse.
    pub fn authorize(&self, query: &HashMap<String, String>) -> std::result::Result<String, ApiError> {
        let _enter = self.span.enter();
        let request = AuthorizeRequest::from_query(query)?;

        let op = UpstreamOperation::Authorize;
        let mut url = Url::parse(self.upstream.url_for(op))
            .map_err(|e| ApiError::Internal(format!("Invalid authorize URL: {e}")))?;
        url.query_pairs_mut()
            .extend_pairs(request.params().iter().map(|(k, v)| (*k, v.as_str())));

        let mut audit: Map<String, Value> = request
            .params()
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::String(v.clone())))
            .collect();
        audit.insert("url".to_string(), Value::String(self.upstream.url_for(op).to_string()));
        let record = Value::Object(redact::redact(&audit));
        info!(
            operation = op.name(),
            request = %record,
            "Redirecting to OAuth provider"
        );

        Ok(url.into())
    }

    /// Exchange a code or refresh token at the upstream token endpoint
    ///
    /// # Errors
    ///
    /// [`ApiError::Proxy`] on transport failure.
    pub async fn exchange_token(
        &self,
        request: &TokenExchangeRequest,
    ) -> std::result::Result<UpstreamResponse, ApiError> {
        let op = UpstreamOperation::TokenExchange;
        let fields = request.form_fields();
        let audit: Map<String, Value> = fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
            .collect();

        let builder = self.client.post(self.upstream.url_for(op)).form(&fields);
        self.forward(op, builder, audit).await
    }

    /// Look up the user profile with the caller's `Authorization` header
    ///
    /// # Errors
    ///
    /// [`ApiError::MissingAuthorization`] if the header is absent,
    /// [`ApiError::Proxy`] on transport failure.
    pub async fn user_info(
        &self,
        authorization: Option<&str>,
    ) -> std::result::Result<UpstreamResponse, ApiError> {
        let Some(authorization) = authorization.filter(|a| !a.trim().is_empty()) else {
            return Err(ApiError::MissingAuthorization);
        };

        let op = UpstreamOperation::UserInfo;
        let mut audit = Map::new();
        audit.insert(
            "bearer_token".to_string(),
            Value::String(authorization.to_string()),
        );

        let builder = self
            .client
            .get(self.upstream.url_for(op))
            .header(header::AUTHORIZATION, authorization);
        self.forward(op, builder, audit).await
    }

    /// Introspect an access token
    ///
    /// # Errors
    ///
    /// [`ApiError::Validation`] if `access_token` is absent,
    /// [`ApiError::Proxy`] on transport failure.
    pub async fn token_info(
        &self,
        access_token: Option<&str>,
    ) -> std::result::Result<UpstreamResponse, ApiError> {
        let Some(access_token) = access_token.filter(|t| !t.is_empty()) else {
            return Err(ApiError::Validation(
                "Missing required parameter: access_token".to_string(),
            ));
        };

        let op = UpstreamOperation::TokenInfo;
        let mut audit = Map::new();
        audit.insert(
            "access_token".to_string(),
            Value::String(access_token.to_string()),
        );

        let builder = self
            .client
            .get(self.upstream.url_for(op))
            .query(&[("access_token", access_token)]);
        self.forward(op, builder, audit).await
    }

    /// Send one upstream request, auditing both directions
    async fn forward(
        &self,
        op: UpstreamOperation,
        builder: RequestBuilder,
        mut audit: Map<String, Value>,
    ) -> std::result::Result<UpstreamResponse, ApiError> {
        let url = self.upstream.url_for(op);

        async move {
            audit.insert("url".to_string(), Value::String(url.to_string()));
            let record = Value::Object(redact::redact(&audit));
            info!(
                operation = op.name(),
                method = %op.method(),
                request = %record,
                "Forwarding request to OAuth provider"
            );

            let response = builder
                .send()
                .await
                .map_err(|e| transport_error(op, "request", e))?;

            let status = response.status();
            let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
            let body = response
                .bytes()
                .await
                .map_err(|e| transport_error(op, "response read", e))?;

            match serde_json::from_slice::<Value>(&body)
                .ok()
                .as_ref()
                .and_then(redact::redact_value)
            {
                Some(redacted) => info!(
                    operation = op.name(),
                    status = status.as_u16(),
                    response = %redacted,
                    "Received response from OAuth provider"
                ),
                None => info!(
                    operation = op.name(),
                    status = status.as_u16(),
                    bytes = body.len(),
                    "Received response from OAuth provider"
                ),
            }

            Ok::<_, ApiError>(UpstreamResponse {
                status,
                content_type,
                body,
            })
        }
        .instrument(self.span.clone())
        .await
    }
}

/// Classify a transport failure without the request URL, which may carry
/// an access token in its query string
fn transport_error(op: UpstreamOperation, stage: &str, e: reqwest::Error) -> ApiError {
    let kind = if e.is_timeout() {
        "timed out"
    } else if e.is_connect() {
        "connection failed"
    } else {
        "failed"
    };
    ApiError::Proxy(format!("{} {stage} {kind}: {}", op.name(), e.without_url()))
}

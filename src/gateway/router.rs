//! HTTP router and handlers

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{
        DefaultBodyLimit, Query, State,
        rejection::{BytesRejection, QueryRejection},
    },
    http::{HeaderMap, Request, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{Span, debug_span};

use super::access_log::{RequestLogger, access_log_middleware, request_body_middleware};
use super::api_error::ApiError;
use super::auth::{AuthGate, auth_middleware};
use super::proxy::{OAuthProxy, TokenExchangeRequest, parse_token_body};

/// Where `GET /` sends browsers
pub const DOCS_URL: &str = "https://cc11001100.github.io/gmail-oauth-proxy-server/";

/// Service name reported by the health check
pub const SERVICE_NAME: &str = "gmail-oauth-proxy-server";

/// Shared application state
pub struct AppState {
    /// Authentication gate; `None` only when auth is explicitly disabled
    pub gate: Option<Arc<AuthGate>>,
    /// Forwarding proxy
    pub proxy: OAuthProxy,
    /// Access and body logging context
    pub logger: Arc<RequestLogger>,
    /// Maximum accepted request body (bytes)
    pub max_body_size: usize,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let logger = Arc::clone(&state.logger);

    let mut protected = Router::new()
        .route("/auth", get(authorize_handler))
        .route("/token", post(token_handler))
        .route("/userinfo", get(userinfo_handler))
        .route("/tokeninfo", get(tokeninfo_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&logger),
            request_body_middleware,
        ));

    // The gate wraps the body logger, so denied requests are never read
    if let Some(gate) = &state.gate {
        protected = protected.route_layer(middleware::from_fn_with_state(
            Arc::clone(gate),
            auth_middleware,
        ));
    }

    Router::new()
        .route("/health", get(health_handler))
        .route("/", get(root_handler))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().make_span_with(request_span))
                .layer(middleware::from_fn_with_state(logger, access_log_middleware))
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(DefaultBodyLimit::max(state.max_body_size)),
        )
        .with_state(state)
}

/// HTTP span for a request; records the path only, since query strings
/// carry tokens
fn request_span(request: &Request<Body>) -> Span {
    debug_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        version = ?request.version(),
    )
}

/// Render a caught panic as the standard internal error body
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    ApiError::Internal(format!("handler panicked: {detail}")).into_response()
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
    }))
}

/// GET / - permanent redirect to the project documentation
async fn root_handler() -> impl IntoResponse {
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, DOCS_URL)])
}

/// GET /auth - redirect the browser to the upstream consent screen
async fn authorize_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let location = state.proxy.authorize(&query)?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

/// POST /token - exchange a code or refresh token
async fn token_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let body = body?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let fields = parse_token_body(content_type, &body)?;
    let request = TokenExchangeRequest::from_fields(&fields)?;
    Ok(state.proxy.exchange_token(&request).await?.into_response())
}

/// GET /userinfo - forward the caller's bearer token
async fn userinfo_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    Ok(state.proxy.user_info(authorization).await?.into_response())
}

/// GET /tokeninfo - introspect an access token
async fn tokeninfo_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let access_token = query.get("access_token").map(String::as_str);
    Ok(state.proxy.token_info(access_token).await?.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_panic_rendered_as_server_error() {
        let response = handle_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "server_error");
        assert!(!body["error"].as_str().unwrap().contains("boom"));
    }
}

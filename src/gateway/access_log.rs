//! Access and request-body logging middleware

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, to_bytes},
    extract::{ConnectInfo, State},
    http::{Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use tracing::{Span, debug, error, info};

use super::api_error::ApiError;
use super::auth::AuthDecision;
use super::{client_addr, redact};

/// Request logging context shared by both middlewares
#[derive(Debug)]
pub struct RequestLogger {
    span: Span,
    max_body_size: usize,
}

impl RequestLogger {
    /// Create a logger emitting inside `span`, buffering at most
    /// `max_body_size` bytes of request body
    #[must_use]
    pub fn new(span: Span, max_body_size: usize) -> Self {
        Self {
            span,
            max_body_size,
        }
    }
}

/// One access record per request, passed through the redactor
///
/// Logged at `error` for status >= 400, `info` otherwise.
pub async fn access_log_middleware(
    State(logger): State<Arc<RequestLogger>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_ip = client_addr::resolve(request.headers(), peer);
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    let mut fields: Map<String, Value> = Map::new();
    fields.insert("method".to_string(), json!(method));
    fields.insert("path".to_string(), json!(path));
    fields.insert("status".to_string(), json!(status));
    fields.insert("latency_ms".to_string(), json!(latency_ms));
    fields.insert("client_ip".to_string(), json!(client_ip));
    fields.insert("user_agent".to_string(), json!(user_agent));
    if let Some(decision) = response.extensions().get::<AuthDecision>() {
        fields.insert("auth".to_string(), json!(decision.reason.as_str()));
    }
    let record = Value::Object(redact::redact(&fields));

    logger.span.in_scope(|| {
        if status >= 400 {
            error!(status, latency_ms, request = %record, "Request failed");
        } else {
            info!(status, latency_ms, request = %record, "Request completed");
        }
    });

    response
}

/// Log the redacted JSON body of protected requests at `debug`
///
/// The body is buffered and restored unchanged. Non-JSON bodies pass
/// through without being read.
pub async fn request_body_middleware(
    State(logger): State<Arc<RequestLogger>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("application/json"));

    if !is_json {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, logger.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return logger
                .span
                .in_scope(|| ApiError::Validation(format!("Unreadable request body: {e}")).into_response());
        }
    };

    if let Some(redacted) = serde_json::from_slice::<Value>(&bytes)
        .ok()
        .as_ref()
        .and_then(redact::redact_value)
    {
        logger.span.in_scope(|| {
            debug!(path = %parts.uri.path(), body = %redacted, "Request body");
        });
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, middleware, routing::post};
    use tower::ServiceExt;

    async fn echo(body: String) -> String {
        body
    }

    fn app(max_body_size: usize) -> Router {
        let logger = Arc::new(RequestLogger::new(Span::none(), max_body_size));
        Router::new()
            .route("/echo", post(echo))
            .layer(middleware::from_fn_with_state(
                logger.clone(),
                request_body_middleware,
            ))
            .layer(middleware::from_fn_with_state(logger, access_log_middleware))
    }

    async fn send(app: Router, content_type: &str, body: &'static str) -> (u16, String) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/echo")
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status().as_u16();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_json_body_restored() {
        let body = r#"{"code":"4/0AX4XfWhLong","client_id":"cid"}"#;
        let (status, echoed) = send(app(1024), "application/json", body).await;
        assert_eq!(status, 200);
        assert_eq!(echoed, body);
    }

    #[tokio::test]
    async fn test_non_json_body_untouched() {
        let (status, echoed) = send(app(4), "text/plain", "longer than four").await;
        assert_eq!(status, 200);
        assert_eq!(echoed, "longer than four");
    }

    #[tokio::test]
    async fn test_oversized_json_body_rejected() {
        let (status, _) = send(app(4), "application/json", r#"{"a":"bcdef"}"#).await;
        assert_eq!(status, 400);
    }
}

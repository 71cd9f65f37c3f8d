//! Gateway server implementation
//!
//! Request pipeline for protected routes: caller address resolution, the
//! authentication gate, request logging, then the forwarding proxy. The
//! health check and the documentation redirect bypass the gate.

pub mod access_log;
pub mod allowlist;
pub mod api_error;
pub mod auth;
pub mod client_addr;
pub mod proxy;
pub mod redact;
mod router;
mod server;

pub use api_error::{ApiError, ErrorBody};
pub use auth::{AuthDecision, AuthGate, AuthPolicy, ReasonCode, SecretCheck, auth_middleware, decide};
pub use proxy::{OAuthProxy, UpstreamOperation};
pub use router::{AppState, DOCS_URL, SERVICE_NAME, create_router};
pub use server::Gateway;

//! HTTP surface of flowdispatch.
//!
//! Exposes the [`dispatcher::ExecutionOrchestrator`] over axum:
//!
//! | Route | Method | Handler |
//! |-------|--------|---------|
//! | `/api/workflows/execute` | `POST` | Runs a workflow graph |
//! | `/api/workflows/execute` | `GET` | Backend health |
//! | `/api/quota` | `GET` | Caller's monthly quota standing |
//!
//! Sessions are taken from the `Authorization: Bearer <token>` header and
//! handed to the orchestrator unchanged; resolving them is the session
//! resolver's job.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Request decoding, status mapping and response shaping
//! live here. Nothing in this crate makes a dispatch decision.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use dispatcher::ExecutionOrchestrator;

mod error;
mod handler;

pub use error::HttpError;
pub use handler::{ExecuteBody, ExecuteResponse, HealthResponse, QuotaResponse};

/// Tracing target for request handling.
pub const TRACING_TARGET_HTTP: &str = "flowdispatch::http";

/// Path of the execute and health endpoints.
pub const EXECUTE_PATH: &str = "/api/workflows/execute";

/// Path of the quota endpoint.
pub const QUOTA_PATH: &str = "/api/quota";

// ---------------------------------------------------------------------------
// State and options
// ---------------------------------------------------------------------------

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<ExecutionOrchestrator>,
}

impl AppState {
    /// Wraps a shared orchestrator.
    pub fn new(orchestrator: Arc<ExecutionOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub(crate) fn orchestrator(&self) -> &ExecutionOrchestrator {
        &self.orchestrator
    }
}

/// Transport-level knobs for [`router`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterOptions {
    /// Origins allowed by CORS. Empty allows any origin.
    pub allowed_origins: Vec<String>,
    /// Largest accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Builds the application router.
pub fn router(state: AppState, options: &RouterOptions) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_layer(&options.allowed_origins));

    Router::new()
        .route(EXECUTE_PATH, post(handler::execute).get(handler::health))
        .route(QUOTA_PATH, get(handler::quota))
        .layer(DefaultBodyLimit::max(options.max_body_bytes))
        .with_state(state)
        .layer(middleware)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(600));

    if allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let origins = allowed_origins.iter().filter_map(|origin| {
        HeaderValue::from_str(origin)
            .inspect_err(|_| {
                tracing::warn!(target: TRACING_TARGET_HTTP, %origin, "ignoring unparseable CORS origin");
            })
            .ok()
    });
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Serves `app` on `listener` until Ctrl-C.
pub async fn serve(listener: TcpListener, app: Router) -> std::io::Result<()> {
    if let Ok(address) = listener.local_addr() {
        tracing::info!(target: TRACING_TARGET_HTTP, %address, "listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(target: TRACING_TARGET_HTTP, %error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!(target: TRACING_TARGET_HTTP, "shutting down");
}

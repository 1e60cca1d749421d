//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::layer::{CooldownLayer, RateLimitLayer};
use crate::error::{Result, WardenError};
use crate::ratelimit::{CooldownTracker, SlidingWindowLimiter};

/// Build the application router.
///
/// `POST /` is the protected route; `GET /health` is never rate limited.
/// When a cooldown tracker is given it runs before the window check.
pub fn router(
    limiter: Arc<SlidingWindowLimiter>,
    cooldown: Option<Arc<CooldownTracker>>,
) -> Router {
    let mut protected = post(accept).layer(RateLimitLayer::new(limiter));
    if let Some(tracker) = cooldown {
        protected = protected.layer(CooldownLayer::new(tracker));
    }

    Router::new()
        .route("/health", get(health))
        .route("/", protected)
        .layer(TraceLayer::new_for_http())
}

async fn accept() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// HTTP server for the protected application.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server for the given router.
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(
            addr = %self.addr,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            WardenError::Io(e)
        })
    }
}

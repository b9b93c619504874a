//! HTTP API consumed by the browser front end.
//!
//! - `GET /articles` - cached article list, refreshed lazily when stale
//! - `GET /article/:id` - one stored article
//! - `GET /article/:id/content` - full content via the extraction pipeline
//! - `GET /content?url=..&feed=..` - ad-hoc extraction
//! - `GET /refresh_status` - last and next refresh times
//! - `GET /health`

pub mod error;
pub mod handlers;
pub mod router;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub use error::{ApiError, ErrorCode};
pub use handlers::AppState;
pub use router::create_router;

/// Bind `addr` and serve the API until Ctrl-C.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "API listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

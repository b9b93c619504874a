//! Router configuration.

use axum::{http::Method, routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    extract_content, get_article, get_article_content, get_refresh_status, health_check,
    list_articles, AppState,
};

/// Create the API router.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/articles", get(list_articles))
        .route("/article/:id", get(get_article))
        .route("/article/:id/content", get(get_article_content))
        .route("/content", get(extract_content))
        .route("/refresh_status", get(get_refresh_status))
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer()),
        )
        .with_state(app_state)
}

/// The API is read-only and public: any origin, no credentials.
pub fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any)
}

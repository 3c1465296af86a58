pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod database;
pub mod errors;
pub mod models;
pub mod realtime;
pub mod repositories;
pub mod services;

// Always available for integration tests but marked as test-only
#[cfg(any(test, debug_assertions, feature = "test-utils"))]
pub mod test_utils;

use anyhow::Result;
use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use auth::AppState;
pub use config::AppConfig;
pub use database::Database;

/// Full HTTP surface: banner, health, the socket endpoint and the JSON API.
pub async fn create_app(app_state: AppState) -> Result<Router> {
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(realtime::socket::ws_handler))
        .nest("/api", api::create_router().await?)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(app_state);

    Ok(app)
}

async fn root_handler() -> &'static str {
    "CodeCollab: Collaborative Code Editor"
}

async fn health_handler(axum::extract::State(app_state): axum::extract::State<AppState>) -> &'static str {
    match app_state.database.health_check().await {
        Ok(_) => "OK",
        Err(_) => "Database connection failed",
    }
}

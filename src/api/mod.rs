pub mod auth;
pub mod chat;
pub mod files;
pub mod invitations;
pub mod projects;

use anyhow::Result;
use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;

use crate::auth::extractors::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub connections: usize,
}

pub async fn create_router() -> Result<Router<AppState>> {
    let project_routes = projects::create_router()
        .await?
        .merge(files::create_router().await?)
        .merge(invitations::create_project_router().await?)
        .merge(chat::create_router().await?);

    let router = Router::new()
        .route("/status", get(status_handler))
        .nest("/auth", auth::create_router().await?)
        .nest("/projects", project_routes)
        .nest("/invitations", invitations::create_router().await?);

    Ok(router)
}

async fn status_handler(State(app_state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: app_state.startup_time.elapsed().as_secs(),
        connections: app_state.hub.connection_count().await,
    })
}

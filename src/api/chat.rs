use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::auth::{extractors::AppState, AuthenticatedUser};
use crate::errors::AppResult;
use crate::models::{ChatMessage, ChatMessageId, ProjectId};

#[derive(Debug, Deserialize)]
pub struct ChatHistoryParams {
    pub limit: Option<u32>,
    pub before: Option<ChatMessageId>,
}

#[derive(Debug, Deserialize)]
pub struct SendChatRequest {
    pub message: String,
}

pub async fn create_router() -> Result<Router<AppState>> {
    let router = Router::new().route("/{id}/chat", get(list_messages).post(send_message));

    Ok(router)
}

async fn list_messages(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path(project_id): Path<ProjectId>,
    Query(params): Query<ChatHistoryParams>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    let messages = app_state
        .chat
        .history(auth_user.user.id, project_id, params.before, params.limit)
        .await?;
    Ok(Json(messages))
}

async fn send_message(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path(project_id): Path<ProjectId>,
    Json(req): Json<SendChatRequest>,
) -> AppResult<(StatusCode, Json<ChatMessage>)> {
    let message = app_state
        .chat
        .send(auth_user.user.id, project_id, &req.message)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;

use crate::auth::{extractors::AppState, AuthenticatedUser};
use crate::errors::{AppError, AppResult};
use crate::models::{CollaboratorRole, InvitationId, InvitationView, ProjectId};

#[derive(Debug, Deserialize)]
pub struct SendInvitationRequest {
    pub username: String,
    #[serde(default = "default_role")]
    pub role: CollaboratorRole,
}

fn default_role() -> CollaboratorRole {
    CollaboratorRole::Editor
}

/// Routes nested under `/projects`.
pub async fn create_project_router() -> Result<Router<AppState>> {
    let router = Router::new().route(
        "/{id}/invitations",
        get(list_project_invitations).post(send_invitation),
    );

    Ok(router)
}

/// Routes nested under `/invitations`.
pub async fn create_router() -> Result<Router<AppState>> {
    let router = Router::new()
        .route("/", get(list_incoming))
        .route("/{id}", delete(cancel_invitation))
        .route("/{id}/accept", post(accept_invitation))
        .route("/{id}/reject", post(reject_invitation));

    Ok(router)
}

async fn send_invitation(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path(project_id): Path<ProjectId>,
    Json(req): Json<SendInvitationRequest>,
) -> AppResult<(StatusCode, Json<InvitationView>)> {
    if req.username.trim().is_empty() {
        return Err(AppError::validation("Username is required"));
    }
    let view = app_state
        .invitations
        .send(auth_user.user.id, project_id, &req.username, req.role)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list_project_invitations(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path(project_id): Path<ProjectId>,
) -> AppResult<Json<Vec<InvitationView>>> {
    Ok(Json(
        app_state
            .invitations
            .list_for_project(auth_user.user.id, project_id)
            .await?,
    ))
}

async fn list_incoming(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
) -> AppResult<Json<Vec<InvitationView>>> {
    Ok(Json(app_state.invitations.list_incoming(auth_user.user.id).await?))
}

async fn accept_invitation(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path(id): Path<InvitationId>,
) -> AppResult<Json<InvitationView>> {
    Ok(Json(app_state.invitations.accept(auth_user.user.id, id).await?))
}

async fn reject_invitation(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path(id): Path<InvitationId>,
) -> AppResult<Json<InvitationView>> {
    Ok(Json(app_state.invitations.reject(auth_user.user.id, id).await?))
}

async fn cancel_invitation(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path(id): Path<InvitationId>,
) -> AppResult<Json<InvitationView>> {
    Ok(Json(app_state.invitations.cancel(auth_user.user.id, id).await?))
}

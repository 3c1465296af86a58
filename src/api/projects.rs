use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::auth::{extractors::AppState, AuthenticatedUser};
use crate::errors::{AppError, AppResult};
use crate::models::{Collaborator, Project, ProjectId, ProjectWithRole, UserId};
use crate::realtime::protocol::{KickNotice, PresenceMember};
use crate::realtime::ServerEvent;
use crate::repositories::{CollaboratorRepository, ProjectRepository};

pub const PROJECT_DELETED: &str = "Project deleted";

#[derive(Debug, Deserialize, Validate)]
pub struct ProjectRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorsResponse {
    pub owner_id: UserId,
    pub collaborators: Vec<Collaborator>,
    pub online: Vec<PresenceMember>,
}

pub async fn create_router() -> Result<Router<AppState>> {
    let router = Router::new()
        .route("/", get(list_projects).post(create_project))
        .route("/{id}", get(get_project).put(rename_project).delete(delete_project))
        .route("/{id}/collaborators", get(list_collaborators))
        .route("/{id}/collaborators/{user_id}", delete(remove_collaborator))
        .route("/{id}/leave", post(leave_project));

    Ok(router)
}

fn clean_name(req: &ProjectRequest) -> AppResult<String> {
    let name = req.name.trim();
    if name.is_empty() || req.validate().is_err() {
        return Err(AppError::validation("Project name must be between 1 and 100 characters"));
    }
    Ok(name.to_string())
}

async fn list_projects(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
) -> AppResult<Json<Vec<ProjectWithRole>>> {
    let projects = ProjectRepository::new(app_state.database.pool().clone())
        .list_for_user(auth_user.user.id)
        .await?;
    Ok(Json(projects))
}

async fn create_project(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Json(req): Json<ProjectRequest>,
) -> AppResult<(StatusCode, Json<Project>)> {
    let name = clean_name(&req)?;
    let project = ProjectRepository::new(app_state.database.pool().clone())
        .create_project(auth_user.user.id, &name)
        .await?;

    info!(project_id = project.id, owner_id = auth_user.user.id, "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path(id): Path<ProjectId>,
) -> AppResult<Json<ProjectWithRole>> {
    let role = app_state.access.require_access(id, auth_user.user.id).await?;
    let repository = ProjectRepository::new(app_state.database.pool().clone());
    let project = repository
        .get_project(id)
        .await?
        .ok_or_else(|| AppError::not_found("Project not found"))?;
    repository.touch_last_access(id).await?;

    Ok(Json(ProjectWithRole { project, role }))
}

async fn rename_project(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path(id): Path<ProjectId>,
    Json(req): Json<ProjectRequest>,
) -> AppResult<Json<Project>> {
    let name = clean_name(&req)?;
    app_state.access.require_owner(id, auth_user.user.id).await?;
    let project = ProjectRepository::new(app_state.database.pool().clone())
        .rename_project(id, &name)
        .await?;
    Ok(Json(project))
}

async fn delete_project(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path(id): Path<ProjectId>,
) -> AppResult<StatusCode> {
    let project = app_state.access.require_owner(id, auth_user.user.id).await?;
    ProjectRepository::new(app_state.database.pool().clone())
        .delete_project(id)
        .await?;

    let notice = ServerEvent::KickedFromProject(KickNotice {
        project_id: id,
        project_name: project.name,
        reason: PROJECT_DELETED.to_string(),
    });
    let notified = app_state.hub.close_room(id, notice).await;
    info!(project_id = id, notified, "Project deleted");

    Ok(StatusCode::NO_CONTENT)
}

async fn list_collaborators(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path(id): Path<ProjectId>,
) -> AppResult<Json<CollaboratorsResponse>> {
    app_state.access.require_access(id, auth_user.user.id).await?;
    let project = ProjectRepository::new(app_state.database.pool().clone())
        .get_project(id)
        .await?
        .ok_or_else(|| AppError::not_found("Project not found"))?;
    let collaborators = CollaboratorRepository::new(app_state.database.pool().clone())
        .list_for_project(id)
        .await?;

    Ok(Json(CollaboratorsResponse {
        owner_id: project.owner_id,
        collaborators,
        online: app_state.hub.members(id).await,
    }))
}

async fn remove_collaborator(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path((id, user_id)): Path<(ProjectId, UserId)>,
) -> AppResult<StatusCode> {
    app_state
        .invitations
        .remove_collaborator(auth_user.user.id, id, user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn leave_project(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path(id): Path<ProjectId>,
) -> AppResult<StatusCode> {
    app_state.invitations.leave(auth_user.user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

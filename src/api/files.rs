use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::auth::{extractors::AppState, AuthenticatedUser};
use crate::errors::AppResult;
use crate::models::{FileId, FileSummary, ProjectId, MAX_ENCODED_CONTENT_BYTES};
use crate::services::FileContent;

#[derive(Debug, Deserialize)]
pub struct CreateFileRequest {
    pub path: String,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFileRequest {
    pub content: Option<String>,
    pub path: Option<String>,
}

pub async fn create_router() -> Result<Router<AppState>> {
    let router = Router::new()
        .route("/{id}/files", get(list_files).post(create_file))
        .route(
            "/{id}/files/{file_id}",
            get(get_file).put(update_file).delete(delete_file),
        )
        .layer(DefaultBodyLimit::max(MAX_ENCODED_CONTENT_BYTES));

    Ok(router)
}

async fn list_files(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path(project_id): Path<ProjectId>,
) -> AppResult<Json<Vec<FileSummary>>> {
    Ok(Json(app_state.files.list(auth_user.user.id, project_id).await?))
}

async fn create_file(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path(project_id): Path<ProjectId>,
    Json(req): Json<CreateFileRequest>,
) -> AppResult<(StatusCode, Json<FileSummary>)> {
    let file = app_state
        .files
        .create(auth_user.user.id, project_id, &req.path, req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(file)))
}

async fn get_file(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path((project_id, file_id)): Path<(ProjectId, FileId)>,
) -> AppResult<Json<FileContent>> {
    Ok(Json(app_state.files.read(auth_user.user.id, project_id, file_id).await?))
}

async fn update_file(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path((project_id, file_id)): Path<(ProjectId, FileId)>,
    Json(req): Json<UpdateFileRequest>,
) -> AppResult<Json<FileSummary>> {
    let file = app_state
        .files
        .update(auth_user.user.id, project_id, file_id, req.content, req.path.as_deref())
        .await?;
    Ok(Json(file))
}

async fn delete_file(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path((project_id, file_id)): Path<(ProjectId, FileId)>,
) -> AppResult<StatusCode> {
    app_state.files.delete(auth_user.user.id, project_id, file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

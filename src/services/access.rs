//! Access Control Oracle.
//!
//! Answers "may this user touch this project, and as what?" straight from the
//! database on every call. Nothing is cached between requests and room
//! membership is never consulted.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::models::{Project, ProjectId, ProjectRole, UserId};
use crate::repositories::{CollaboratorRepository, ProjectRepository};

#[derive(Clone)]
pub struct AccessOracle {
    pool: SqlitePool,
}

impl AccessOracle {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Ownership is checked first and does not depend on the collaborator table.
    pub async fn role_of(&self, project_id: ProjectId, user_id: UserId) -> Result<Option<ProjectRole>> {
        let Some(project) = ProjectRepository::new(self.pool.clone()).get_project(project_id).await? else {
            return Ok(None);
        };

        if project.owner_id == user_id {
            return Ok(Some(ProjectRole::Owner));
        }

        let role = CollaboratorRepository::new(self.pool.clone())
            .find_role(project_id, user_id)
            .await?
            .map(ProjectRole::from);

        Ok(role)
    }

    pub async fn has_access(&self, project_id: ProjectId, user_id: UserId) -> Result<bool> {
        Ok(self.role_of(project_id, user_id).await?.is_some())
    }

    /// Any role at all.
    pub async fn require_access(&self, project_id: ProjectId, user_id: UserId) -> AppResult<ProjectRole> {
        match self.role_of(project_id, user_id).await? {
            Some(role) => Ok(role),
            None => {
                debug!(project_id, user_id, "Access denied");
                Err(AppError::forbidden("You do not have access to this project"))
            }
        }
    }

    /// Owner or editor.
    pub async fn require_editor(&self, project_id: ProjectId, user_id: UserId) -> AppResult<ProjectRole> {
        let role = self.require_access(project_id, user_id).await?;
        if !role.can_edit() {
            debug!(project_id, user_id, "Viewer attempted to modify project");
            return Err(AppError::forbidden("Viewers cannot modify this project"));
        }
        Ok(role)
    }

    pub async fn require_owner(&self, project_id: ProjectId, user_id: UserId) -> AppResult<Project> {
        let project = ProjectRepository::new(self.pool.clone())
            .get_project(project_id)
            .await?
            .ok_or_else(|| AppError::forbidden("You do not have access to this project"))?;

        if project.owner_id != user_id {
            return Err(AppError::forbidden("Only the project owner can do this"));
        }
        Ok(project)
    }
}

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use std::fmt;

use super::UserId;

pub type ProjectId = i64;

/// Hard cap on collaborators (accepted plus pending invitations) per project.
pub const MAX_COLLABORATORS: i64 = 2;

#[derive(Debug, Serialize, Deserialize, Clone, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub owner_id: UserId,
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub last_access_at: chrono::DateTime<chrono::Utc>,
}

/// Effective role of a user on a project.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProjectRole {
    Owner,
    Editor,
    Viewer,
}

impl ProjectRole {
    pub fn can_edit(self) -> bool {
        matches!(self, ProjectRole::Owner | ProjectRole::Editor)
    }

    pub fn is_owner(self) -> bool {
        self == ProjectRole::Owner
    }
}

impl From<CollaboratorRole> for ProjectRole {
    fn from(role: CollaboratorRole) -> Self {
        match role {
            CollaboratorRole::Editor => ProjectRole::Editor,
            CollaboratorRole::Viewer => ProjectRole::Viewer,
        }
    }
}

impl fmt::Display for ProjectRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectRole::Owner => write!(f, "owner"),
            ProjectRole::Editor => write!(f, "editor"),
            ProjectRole::Viewer => write!(f, "viewer"),
        }
    }
}

/// Role a non-owner can hold. The owner is never stored as a collaborator.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CollaboratorRole {
    Editor,
    Viewer,
}

#[derive(Debug, Serialize, Deserialize, Clone, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub username: String,
    pub avatar: Option<String>,
    pub role: CollaboratorRole,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A project as seen by one particular user.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProjectWithRole {
    #[serde(flatten)]
    pub project: Project,
    pub role: ProjectRole,
}

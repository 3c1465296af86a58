use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

use super::{CollaboratorRole, ProjectId, UserId};

pub type InvitationId = i64;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    Removed,
    Left,
}

impl InvitationStatus {
    /// Statuses that occupy one of the project's collaborator slots.
    pub fn holds_slot(self) -> bool {
        matches!(self, InvitationStatus::Pending | InvitationStatus::Accepted)
    }

    /// Whether `self -> next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: InvitationStatus) -> bool {
        use InvitationStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted) | (Pending, Rejected) | (Pending, Cancelled) | (Accepted, Removed) | (Accepted, Left)
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: InvitationId,
    pub project_id: ProjectId,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub role: CollaboratorRole,
    pub status: InvitationStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Invitation joined with the names a UI needs to render it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct InvitationView {
    pub id: InvitationId,
    pub project_id: ProjectId,
    pub project_name: String,
    pub from_user_id: UserId,
    pub from_username: String,
    pub to_user_id: UserId,
    pub to_username: String,
    pub role: CollaboratorRole,
    pub status: InvitationStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

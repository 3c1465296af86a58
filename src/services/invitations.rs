//! Invitation State Machine.
//!
//! ```text
//! pending --accept--> accepted --remove--> removed
//!    |                    \------leave---> left
//!    +--reject--> rejected
//!    +--cancel--> cancelled
//! ```
//!
//! Every transition runs in one transaction that starts by write-locking the
//! project row, so the "at most two pending or accepted invitations" cap holds
//! under concurrent requests. Live connections are notified only after commit.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::models::{
    CollaboratorRole, Invitation, InvitationId, InvitationStatus, InvitationView, Project, ProjectId, UserId,
    MAX_COLLABORATORS,
};
use crate::realtime::protocol::{KickNotice, ServerEvent};
use crate::realtime::Hub;
use crate::repositories::{CollaboratorRepository, InvitationRepository, ProjectRepository, UserRepository};

pub const REMOVED_BY_OWNER: &str = "Removed by owner";

pub struct InvitationService {
    pool: SqlitePool,
    hub: Arc<Hub>,
}

impl InvitationService {
    pub fn new(pool: SqlitePool, hub: Arc<Hub>) -> Self {
        Self { pool, hub }
    }

    fn repository(&self) -> InvitationRepository {
        InvitationRepository::new(self.pool.clone())
    }

    async fn load_view(&self, id: InvitationId) -> AppResult<InvitationView> {
        self.repository()
            .get_view(id)
            .await?
            .ok_or_else(|| AppError::not_found("Invitation not found"))
    }

    /// Owner invites `to_username` with `role`.
    pub async fn send(
        &self,
        sender_id: UserId,
        project_id: ProjectId,
        to_username: &str,
        role: CollaboratorRole,
    ) -> AppResult<InvitationView> {
        let target = UserRepository::new(self.pool.clone())
            .find_by_username(to_username.trim())
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))?;

        let mut tx = self.pool.begin().await?;
        let project = lock_project(&mut tx, project_id).await?;
        if project.owner_id != sender_id {
            return Err(AppError::forbidden("Only the project owner can invite collaborators"));
        }
        if target.id == sender_id {
            return Err(AppError::validation("You cannot invite yourself"));
        }
        if CollaboratorRepository::is_collaborator(&mut tx, project_id, target.id).await? {
            return Err(AppError::conflict("User is already a collaborator"));
        }
        if InvitationRepository::find_by_status(&mut tx, project_id, target.id, InvitationStatus::Pending)
            .await?
            .is_some()
        {
            return Err(AppError::conflict("User already has a pending invitation to this project"));
        }
        if InvitationRepository::count_active(&mut tx, project_id).await? >= MAX_COLLABORATORS {
            return Err(AppError::CapacityReached);
        }

        let invitation = InvitationRepository::create(&mut tx, project_id, sender_id, target.id, role).await?;
        tx.commit().await?;

        info!(project_id, invitation_id = invitation.id, to_user_id = target.id, role = role_name(role), "Invitation sent");
        let view = self.load_view(invitation.id).await?;
        self.hub
            .send_to_user(target.id, ServerEvent::InvitationReceived(view.clone()))
            .await;
        Ok(view)
    }

    /// Invitee accepts: the invitation becomes `accepted` and a collaborator row appears.
    pub async fn accept(&self, user_id: UserId, invitation_id: InvitationId) -> AppResult<InvitationView> {
        let mut tx = self.pool.begin().await?;
        let invitation = load_invitation(&mut tx, invitation_id).await?;
        if invitation.to_user_id != user_id {
            return Err(AppError::forbidden("This invitation is not addressed to you"));
        }
        lock_project(&mut tx, invitation.project_id).await?;
        transition(&mut tx, &invitation, InvitationStatus::Accepted).await?;

        if CollaboratorRepository::is_collaborator(&mut tx, invitation.project_id, user_id).await? {
            return Err(AppError::conflict("You are already a collaborator on this project"));
        }
        CollaboratorRepository::insert(&mut tx, invitation.project_id, user_id, invitation.role).await?;
        tx.commit().await?;

        info!(project_id = invitation.project_id, invitation_id, user_id, "Invitation accepted");
        let view = self.load_view(invitation_id).await?;
        self.hub
            .send_to_user(invitation.from_user_id, ServerEvent::InvitationUpdated(view.clone()))
            .await;
        self.hub.broadcast_presence(invitation.project_id).await;
        Ok(view)
    }

    pub async fn reject(&self, user_id: UserId, invitation_id: InvitationId) -> AppResult<InvitationView> {
        let mut tx = self.pool.begin().await?;
        let invitation = load_invitation(&mut tx, invitation_id).await?;
        if invitation.to_user_id != user_id {
            return Err(AppError::forbidden("This invitation is not addressed to you"));
        }
        transition(&mut tx, &invitation, InvitationStatus::Rejected).await?;
        tx.commit().await?;

        info!(project_id = invitation.project_id, invitation_id, user_id, "Invitation rejected");
        let view = self.load_view(invitation_id).await?;
        self.hub
            .send_to_user(invitation.from_user_id, ServerEvent::InvitationUpdated(view.clone()))
            .await;
        Ok(view)
    }

    /// Owner withdraws a pending invitation.
    pub async fn cancel(&self, owner_id: UserId, invitation_id: InvitationId) -> AppResult<InvitationView> {
        let mut tx = self.pool.begin().await?;
        let invitation = load_invitation(&mut tx, invitation_id).await?;
        let project = lock_project(&mut tx, invitation.project_id).await?;
        if project.owner_id != owner_id {
            return Err(AppError::forbidden("Only the project owner can cancel invitations"));
        }
        transition(&mut tx, &invitation, InvitationStatus::Cancelled).await?;
        tx.commit().await?;

        info!(project_id = project.id, invitation_id, "Invitation cancelled");
        let view = self.load_view(invitation_id).await?;
        self.hub
            .send_to_user(invitation.to_user_id, ServerEvent::InvitationUpdated(view.clone()))
            .await;
        Ok(view)
    }

    /// Owner removes a collaborator. The user is kicked out of the live room.
    pub async fn remove_collaborator(&self, owner_id: UserId, project_id: ProjectId, user_id: UserId) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let project = lock_project(&mut tx, project_id).await?;
        if project.owner_id != owner_id {
            return Err(AppError::forbidden("Only the project owner can remove collaborators"));
        }
        if user_id == owner_id {
            return Err(AppError::validation("The project owner cannot be removed"));
        }
        if !CollaboratorRepository::delete(&mut tx, project_id, user_id).await? {
            return Err(AppError::not_found("User is not a collaborator on this project"));
        }
        close_accepted(&mut tx, project_id, user_id, InvitationStatus::Removed).await?;
        tx.commit().await?;

        info!(project_id, user_id, "Collaborator removed");
        let notice = ServerEvent::KickedFromProject(KickNotice {
            project_id,
            project_name: project.name.clone(),
            reason: REMOVED_BY_OWNER.to_string(),
        });
        self.hub.evict_user(project_id, user_id, Some(notice)).await;
        Ok(())
    }

    /// Collaborator walks away from a project. Owners cannot leave their own project.
    pub async fn leave(&self, user_id: UserId, project_id: ProjectId) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let project = lock_project(&mut tx, project_id).await?;
        if project.owner_id == user_id {
            return Err(AppError::forbidden("Project owners cannot leave their own project"));
        }
        if !CollaboratorRepository::delete(&mut tx, project_id, user_id).await? {
            return Err(AppError::not_found("You are not a collaborator on this project"));
        }
        let closed = close_accepted(&mut tx, project_id, user_id, InvitationStatus::Left).await?;
        tx.commit().await?;

        info!(project_id, user_id, "Collaborator left project");
        self.hub.evict_user(project_id, user_id, None).await;

        if let Some(invitation_id) = closed {
            match self.load_view(invitation_id).await {
                Ok(view) => {
                    self.hub
                        .send_to_user(project.owner_id, ServerEvent::InvitationUpdated(view))
                        .await;
                }
                Err(e) => warn!(invitation_id, "Could not load invitation after leave: {}", e),
            }
        }
        Ok(())
    }

    pub async fn list_incoming(&self, user_id: UserId) -> AppResult<Vec<InvitationView>> {
        Ok(self.repository().list_incoming_pending(user_id).await?)
    }

    /// Pending and accepted invitations of a project, visible to its owner only.
    pub async fn list_for_project(&self, owner_id: UserId, project_id: ProjectId) -> AppResult<Vec<InvitationView>> {
        let project = ProjectRepository::new(self.pool.clone())
            .get_project(project_id)
            .await?
            .ok_or_else(|| AppError::forbidden("You do not have access to this project"))?;
        if project.owner_id != owner_id {
            return Err(AppError::forbidden("Only the project owner can view invitations"));
        }
        Ok(self.repository().list_active_for_project(project_id).await?)
    }
}

fn role_name(role: CollaboratorRole) -> &'static str {
    match role {
        CollaboratorRole::Editor => "editor",
        CollaboratorRole::Viewer => "viewer",
    }
}

async fn lock_project(conn: &mut sqlx::SqliteConnection, project_id: ProjectId) -> AppResult<Project> {
    ProjectRepository::lock_for_update(conn, project_id)
        .await?
        .ok_or_else(|| AppError::not_found("Project not found"))
}

async fn load_invitation(conn: &mut sqlx::SqliteConnection, invitation_id: InvitationId) -> AppResult<Invitation> {
    InvitationRepository::get(conn, invitation_id)
        .await?
        .ok_or_else(|| AppError::not_found("Invitation not found"))
}

async fn transition(
    conn: &mut sqlx::SqliteConnection,
    invitation: &Invitation,
    next: InvitationStatus,
) -> AppResult<()> {
    if !invitation.status.can_transition_to(next) {
        return Err(AppError::conflict(format!(
            "Invitation is {} and can no longer change",
            status_name(invitation.status)
        )));
    }
    if !InvitationRepository::transition(conn, invitation.id, invitation.status, next).await? {
        return Err(AppError::conflict("Invitation was modified concurrently"));
    }
    Ok(())
}

/// Moves the accepted invitation behind a collaborator row into `removed` or `left`.
async fn close_accepted(
    conn: &mut sqlx::SqliteConnection,
    project_id: ProjectId,
    user_id: UserId,
    next: InvitationStatus,
) -> AppResult<Option<InvitationId>> {
    let Some(invitation) =
        InvitationRepository::find_by_status(conn, project_id, user_id, InvitationStatus::Accepted).await?
    else {
        return Ok(None);
    };
    transition(conn, &invitation, next).await?;
    Ok(Some(invitation.id))
}

fn status_name(status: InvitationStatus) -> &'static str {
    match status {
        InvitationStatus::Pending => "pending",
        InvitationStatus::Accepted => "accepted",
        InvitationStatus::Rejected => "rejected",
        InvitationStatus::Cancelled => "cancelled",
        InvitationStatus::Removed => "removed",
        InvitationStatus::Left => "left",
    }
}

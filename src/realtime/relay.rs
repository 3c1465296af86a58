//! Edit Broadcast Relay.
//!
//! Each inbound event is validated in a fixed order (shape, ids, access, payload
//! size) and either fanned out to the rest of the project room or answered with a
//! unicast `error`. A rejected event is never forwarded and never affects other
//! connections.

use std::sync::Arc;

use tracing::{debug, warn};

use super::hub::{ConnectionId, Hub};
use super::protocol::{
    ClientEvent, CursorMove, CursorUpdate, FileAdded, FileChange, FileCreated, FileDeleted, FileRemoved,
    FileUpdated, JoinedProject, ServerEvent,
};
use crate::errors::{AppError, AppResult};
use crate::models::{UserId, MAX_CONTENT_BYTES};
use crate::repositories::ProjectRepository;
use crate::services::AccessOracle;

/// Identity of one authenticated socket connection.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub username: String,
}

pub struct Relay {
    hub: Arc<Hub>,
    access: AccessOracle,
    projects: ProjectRepository,
}

fn require_positive_id(value: i64, what: &str) -> AppResult<()> {
    if value <= 0 {
        return Err(AppError::validation(format!("Invalid {what}")));
    }
    Ok(())
}

impl Relay {
    pub fn new(hub: Arc<Hub>, access: AccessOracle, projects: ProjectRepository) -> Self {
        Self { hub, access, projects }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Parse and dispatch one text frame.
    pub async fn handle_text(&self, ctx: &ConnectionContext, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle(ctx, event).await,
            Err(e) => {
                debug!(connection_id = %ctx.connection_id, "Malformed event: {}", e);
                self.hub
                    .send_to_connection(ctx.connection_id, ServerEvent::error("Malformed event payload"))
                    .await;
            }
        }
    }

    pub async fn handle(&self, ctx: &ConnectionContext, event: ClientEvent) {
        let name = event.name();
        let result = match event {
            ClientEvent::JoinProject(req) => self.join_project(ctx, req.project_id).await,
            ClientEvent::LeaveProject(req) => self.leave_project(ctx, req.project_id).await,
            ClientEvent::FileChange(change) => self.file_change(ctx, change).await.map(|_| ()),
            ClientEvent::FileCreated(created) => self.file_created(ctx, created).await.map(|_| ()),
            ClientEvent::FileDeleted(deleted) => self.file_deleted(ctx, deleted).await.map(|_| ()),
            ClientEvent::CursorMove(cursor) => {
                // Cursor updates are advisory; failures are dropped without a reply.
                if let Err(e) = self.cursor_move(ctx, cursor).await {
                    debug!(connection_id = %ctx.connection_id, "Dropped cursor update: {}", e);
                }
                Ok(())
            }
        };

        if let Err(e) = result {
            match &e {
                AppError::Database(detail) => {
                    warn!(connection_id = %ctx.connection_id, user_id = ctx.user_id, event = name, "Storage error: {}", detail)
                }
                _ => debug!(connection_id = %ctx.connection_id, user_id = ctx.user_id, event = name, "Rejected: {}", e),
            }
            self.hub
                .send_to_connection(ctx.connection_id, ServerEvent::error(e.client_message()))
                .await;
        }
    }

    pub async fn join_project(&self, ctx: &ConnectionContext, project_id: i64) -> AppResult<()> {
        require_positive_id(project_id, "project id")?;
        self.access.require_access(project_id, ctx.user_id).await?;

        // Ack first so the joiner sees `joined-project` before the member list.
        self.hub
            .send_to_connection(ctx.connection_id, ServerEvent::JoinedProject(JoinedProject { project_id }))
            .await;
        self.hub
            .join(ctx.connection_id, project_id)
            .await
            .ok_or(AppError::Unauthorized)?;

        if let Err(e) = self.projects.touch_last_access(project_id).await {
            warn!(project_id, "Failed to record project access: {}", e);
        }
        Ok(())
    }

    pub async fn leave_project(&self, ctx: &ConnectionContext, project_id: i64) -> AppResult<()> {
        require_positive_id(project_id, "project id")?;
        self.hub.leave(ctx.connection_id, project_id).await;
        Ok(())
    }

    pub async fn file_change(&self, ctx: &ConnectionContext, change: FileChange) -> AppResult<usize> {
        require_positive_id(change.project_id, "project id")?;
        require_positive_id(change.file_id, "file id")?;
        self.access.require_editor(change.project_id, ctx.user_id).await?;
        if change.content.len() > MAX_CONTENT_BYTES {
            return Err(AppError::validation("File content exceeds the 10 MiB limit"));
        }

        let event = ServerEvent::FileUpdated(FileUpdated {
            project_id: change.project_id,
            file_id: change.file_id,
            content: change.content,
            user_id: ctx.user_id,
            username: ctx.username.clone(),
            cursor_position: change.cursor_position,
            is_typing: change.is_typing,
        });
        Ok(self.hub.fan_out(change.project_id, Some(ctx.connection_id), event).await)
    }

    pub async fn file_created(&self, ctx: &ConnectionContext, created: FileCreated) -> AppResult<usize> {
        require_positive_id(created.project_id, "project id")?;
        require_positive_id(created.file.id, "file id")?;
        self.access.require_editor(created.project_id, ctx.user_id).await?;

        let event = ServerEvent::FileAdded(FileAdded {
            project_id: created.project_id,
            file: created.file,
            user_id: ctx.user_id,
            username: ctx.username.clone(),
        });
        Ok(self.hub.fan_out(created.project_id, Some(ctx.connection_id), event).await)
    }

    pub async fn file_deleted(&self, ctx: &ConnectionContext, deleted: FileDeleted) -> AppResult<usize> {
        require_positive_id(deleted.project_id, "project id")?;
        require_positive_id(deleted.file_id, "file id")?;
        self.access.require_editor(deleted.project_id, ctx.user_id).await?;

        let event = ServerEvent::FileRemoved(FileRemoved {
            project_id: deleted.project_id,
            file_id: deleted.file_id,
            user_id: ctx.user_id,
            username: ctx.username.clone(),
        });
        Ok(self.hub.fan_out(deleted.project_id, Some(ctx.connection_id), event).await)
    }

    pub async fn cursor_move(&self, ctx: &ConnectionContext, cursor: CursorMove) -> AppResult<usize> {
        require_positive_id(cursor.project_id, "project id")?;
        require_positive_id(cursor.file_id, "file id")?;
        self.access.require_access(cursor.project_id, ctx.user_id).await?;

        let event = ServerEvent::CursorPosition(CursorUpdate {
            project_id: cursor.project_id,
            file_id: cursor.file_id,
            position: cursor.position,
            user_id: ctx.user_id,
            username: ctx.username.clone(),
        });
        Ok(self.hub.fan_out(cursor.project_id, Some(ctx.connection_id), event).await)
    }

    /// Connection teardown: presence cleanup is immediate and unconditional.
    pub async fn disconnect(&self, ctx: &ConnectionContext) {
        self.hub.disconnect(ctx.connection_id).await;
    }
}

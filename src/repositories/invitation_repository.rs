use crate::models::{CollaboratorRole, Invitation, InvitationId, InvitationStatus, InvitationView, ProjectId, UserId};
use anyhow::Result;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

const INVITATION_COLUMNS: &str = "id, project_id, from_user_id, to_user_id, role, status, created_at, updated_at";

const VIEW_SELECT: &str = "SELECT i.id, i.project_id, p.name AS project_name, \
     i.from_user_id, fu.username AS from_username, i.to_user_id, tu.username AS to_username, \
     i.role, i.status, i.created_at, i.updated_at \
     FROM invitations i \
     JOIN projects p ON p.id = i.project_id \
     JOIN users fu ON fu.id = i.from_user_id \
     JOIN users tu ON tu.id = i.to_user_id";

pub struct InvitationRepository {
    pool: SqlitePool,
}

impl InvitationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_view(&self, id: InvitationId) -> Result<Option<InvitationView>> {
        let view = sqlx::query_as::<_, InvitationView>(&format!("{VIEW_SELECT} WHERE i.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(view)
    }

    /// Pending invitations addressed to the user, newest first.
    pub async fn list_incoming_pending(&self, user_id: UserId) -> Result<Vec<InvitationView>> {
        let views = sqlx::query_as::<_, InvitationView>(&format!(
            "{VIEW_SELECT} WHERE i.to_user_id = ? AND i.status = 'pending' ORDER BY i.created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(views)
    }

    /// Invitations currently holding a collaborator slot on the project.
    pub async fn list_active_for_project(&self, project_id: ProjectId) -> Result<Vec<InvitationView>> {
        let views = sqlx::query_as::<_, InvitationView>(&format!(
            "{VIEW_SELECT} WHERE i.project_id = ? AND i.status IN ('pending', 'accepted') ORDER BY i.created_at"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(views)
    }

    pub async fn get(conn: &mut SqliteConnection, id: InvitationId) -> Result<Option<Invitation>> {
        let invitation = sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(invitation)
    }

    pub async fn create(
        conn: &mut SqliteConnection,
        project_id: ProjectId,
        from_user_id: UserId,
        to_user_id: UserId,
        role: CollaboratorRole,
    ) -> Result<Invitation> {
        let now = Utc::now();
        let invitation = sqlx::query_as::<_, Invitation>(&format!(
            "INSERT INTO invitations (project_id, from_user_id, to_user_id, role, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, 'pending', ?, ?) RETURNING {INVITATION_COLUMNS}"
        ))
        .bind(project_id)
        .bind(from_user_id)
        .bind(to_user_id)
        .bind(role)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        Ok(invitation)
    }

    /// Number of invitations in `pending` or `accepted` for the project.
    pub async fn count_active(conn: &mut SqliteConnection, project_id: ProjectId) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM invitations WHERE project_id = ? AND status IN ('pending', 'accepted')",
        )
        .bind(project_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(count)
    }

    pub async fn find_by_status(
        conn: &mut SqliteConnection,
        project_id: ProjectId,
        to_user_id: UserId,
        status: InvitationStatus,
    ) -> Result<Option<Invitation>> {
        let invitation = sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations \
             WHERE project_id = ? AND to_user_id = ? AND status = ? ORDER BY id DESC LIMIT 1"
        ))
        .bind(project_id)
        .bind(to_user_id)
        .bind(status)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(invitation)
    }

    /// Compare-and-set on the status column. Returns false when the row was not in `from`.
    pub async fn transition(
        conn: &mut SqliteConnection,
        id: InvitationId,
        from: InvitationStatus,
        to: InvitationStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE invitations SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(to)
            .bind(Utc::now())
            .bind(id)
            .bind(from)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

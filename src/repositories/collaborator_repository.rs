use crate::models::{Collaborator, CollaboratorRole, ProjectId, UserId};
use anyhow::Result;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

pub struct CollaboratorRepository {
    pool: SqlitePool,
}

impl CollaboratorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_role(&self, project_id: ProjectId, user_id: UserId) -> Result<Option<CollaboratorRole>> {
        let role = sqlx::query_scalar::<_, CollaboratorRole>(
            "SELECT role FROM collaborators WHERE project_id = ? AND user_id = ?",
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(role)
    }

    pub async fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<Collaborator>> {
        let collaborators = sqlx::query_as::<_, Collaborator>(
            "SELECT c.project_id, c.user_id, u.username, u.avatar, c.role, c.created_at \
             FROM collaborators c JOIN users u ON u.id = c.user_id \
             WHERE c.project_id = ? ORDER BY c.created_at",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(collaborators)
    }

    pub async fn is_collaborator(conn: &mut SqliteConnection, project_id: ProjectId, user_id: UserId) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM collaborators WHERE project_id = ? AND user_id = ?",
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(count > 0)
    }

    pub async fn insert(
        conn: &mut SqliteConnection,
        project_id: ProjectId,
        user_id: UserId,
        role: CollaboratorRole,
    ) -> Result<()> {
        sqlx::query("INSERT INTO collaborators (project_id, user_id, role, created_at) VALUES (?, ?, ?, ?)")
            .bind(project_id)
            .bind(user_id)
            .bind(role)
            .bind(Utc::now())
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Returns whether a row was removed.
    pub async fn delete(conn: &mut SqliteConnection, project_id: ProjectId, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM collaborators WHERE project_id = ? AND user_id = ?")
            .bind(project_id)
            .bind(user_id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

use crate::models::{Project, ProjectId, ProjectRole, ProjectWithRole, UserId};
use crate::models::CollaboratorRole;
use anyhow::Result;
use chrono::Utc;
use sqlx::{FromRow, SqliteConnection, SqlitePool};

const PROJECT_COLUMNS: &str = "id, owner_id, name, created_at, updated_at, last_access_at";

pub struct ProjectRepository {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct SharedProjectRow {
    #[sqlx(flatten)]
    project: Project,
    role: CollaboratorRole,
}

impl ProjectRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_project(&self, owner_id: UserId, name: &str) -> Result<Project> {
        let now = Utc::now();
        let project = sqlx::query_as::<_, Project>(&format!(
            "INSERT INTO projects (owner_id, name, created_at, updated_at, last_access_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(owner_id)
        .bind(name)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(project)
    }

    pub async fn get_project(&self, id: ProjectId) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(project)
    }

    /// Owned projects followed by projects shared with the user.
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<ProjectWithRole>> {
        let owned = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE owner_id = ? ORDER BY updated_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let shared = sqlx::query_as::<_, SharedProjectRow>(
            "SELECT p.id, p.owner_id, p.name, p.created_at, p.updated_at, p.last_access_at, c.role \
             FROM projects p JOIN collaborators c ON c.project_id = p.id \
             WHERE c.user_id = ? ORDER BY p.updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut projects: Vec<ProjectWithRole> = owned
            .into_iter()
            .map(|project| ProjectWithRole { project, role: ProjectRole::Owner })
            .collect();
        projects.extend(
            shared
                .into_iter()
                .map(|row| ProjectWithRole { project: row.project, role: row.role.into() }),
        );

        Ok(projects)
    }

    pub async fn rename_project(&self, id: ProjectId, name: &str) -> Result<Project> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "UPDATE projects SET name = ?, updated_at = ? WHERE id = ? RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(name)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(project)
    }

    pub async fn delete_project(&self, id: ProjectId) -> Result<()> {
        sqlx::query("DELETE FROM projects WHERE id = ?").bind(id).execute(&self.pool).await?;

        Ok(())
    }

    pub async fn touch_last_access(&self, id: ProjectId) -> Result<()> {
        sqlx::query("UPDATE projects SET last_access_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Bump `updated_at` inside a transaction. Being a write, it takes SQLite's write
    /// lock, so concurrent membership changes to the same database serialize behind it.
    pub async fn lock_for_update(conn: &mut SqliteConnection, id: ProjectId) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "UPDATE projects SET updated_at = ? WHERE id = ? RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(project)
    }
}

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::models::{CollaboratorRole, Project, User};
use crate::repositories::{CollaboratorRepository, ProjectRepository, UserRepository};

/// Create an isolated in-memory SQLite database with the real schema applied
pub async fn create_test_database() -> Result<SqlitePool> {
    // Every `:memory:` URL gets its own uniquely named database, kept alive by the single
    // pinned connection below.
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1) // SQLite in-memory works best with single connection
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Insert a user with a throwaway password hash.
pub async fn create_test_user(pool: &SqlitePool, username: &str) -> Result<User> {
    UserRepository::new(pool.clone()).create_user(username, "not-a-real-hash").await
}

pub async fn create_test_project(pool: &SqlitePool, owner: &User, name: &str) -> Result<Project> {
    ProjectRepository::new(pool.clone()).create_project(owner.id, name).await
}

/// Attach `user` to `project` directly, bypassing the invitation flow.
pub async fn add_test_collaborator(
    pool: &SqlitePool,
    project: &Project,
    user: &User,
    role: CollaboratorRole,
) -> Result<()> {
    let mut conn = pool.acquire().await?;
    CollaboratorRepository::insert(&mut conn, project.id, user.id, role).await?;
    Ok(())
}

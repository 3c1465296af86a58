use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::{File, FileId, FileSummary, ProjectId};

const FILE_COLUMNS: &str = "id, project_id, path, name, language, content, is_media, size, created_at, updated_at";
const SUMMARY_COLUMNS: &str = "id, path, name, language, is_media, size";

/// Everything needed to insert a file row. `content` is already encrypted.
pub struct NewFile<'a> {
    pub project_id: ProjectId,
    pub path: &'a str,
    pub name: &'a str,
    pub language: &'a str,
    pub content: &'a str,
    pub is_media: bool,
    pub size: i64,
}

pub struct FileRepository {
    pool: SqlitePool,
}

impl FileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_file(&self, file: &NewFile<'_>) -> Result<File> {
        let now = Utc::now();
        let result = sqlx::query_as::<_, File>(&format!(
            "INSERT INTO files (project_id, path, name, language, content, is_media, size, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {FILE_COLUMNS}"
        ))
        .bind(file.project_id)
        .bind(file.path)
        .bind(file.name)
        .bind(file.language)
        .bind(file.content)
        .bind(file.is_media)
        .bind(file.size)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(result)
    }

    pub async fn get_file(&self, project_id: ProjectId, id: FileId) -> Result<Option<File>> {
        let file = sqlx::query_as::<_, File>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE project_id = ? AND id = ?"
        ))
        .bind(project_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(file)
    }

    pub async fn find_by_path(&self, project_id: ProjectId, path: &str) -> Result<Option<FileSummary>> {
        let file = sqlx::query_as::<_, FileSummary>(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM files WHERE project_id = ? AND path = ?"
        ))
        .bind(project_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(file)
    }

    pub async fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<FileSummary>> {
        let files = sqlx::query_as::<_, FileSummary>(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM files WHERE project_id = ? ORDER BY path"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(files)
    }

    pub async fn update_content(&self, id: FileId, content: &str, size: i64) -> Result<File> {
        let file = sqlx::query_as::<_, File>(&format!(
            "UPDATE files SET content = ?, size = ?, updated_at = ? WHERE id = ? RETURNING {FILE_COLUMNS}"
        ))
        .bind(content)
        .bind(size)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(file)
    }

    pub async fn rename_file(
        &self,
        id: FileId,
        path: &str,
        name: &str,
        language: &str,
        is_media: bool,
    ) -> Result<File> {
        let file = sqlx::query_as::<_, File>(&format!(
            "UPDATE files SET path = ?, name = ?, language = ?, is_media = ?, updated_at = ? \
             WHERE id = ? RETURNING {FILE_COLUMNS}"
        ))
        .bind(path)
        .bind(name)
        .bind(language)
        .bind(is_media)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(file)
    }

    pub async fn delete_file(&self, project_id: ProjectId, id: FileId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE project_id = ? AND id = ?")
            .bind(project_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

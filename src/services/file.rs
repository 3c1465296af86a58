use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::{AccessOracle, EncryptionService};
use crate::errors::{AppError, AppResult};
use crate::models::{FileId, FileSummary, ProjectId, UserId, MAX_CONTENT_BYTES};
use crate::repositories::{FileRepository, NewFile};

pub const MAX_PATH_LEN: usize = 512;

/// File metadata plus decrypted content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    #[serde(flatten)]
    pub file: FileSummary,
    pub content: String,
}

/// Normalise a user supplied path: slash-separated, no empty, `.` or `..` segments.
pub fn normalize_path(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(AppError::validation("File path cannot be empty"));
    }
    if trimmed.len() > MAX_PATH_LEN {
        return Err(AppError::validation("File path is too long"));
    }
    if trimmed.contains('\\') || trimmed.chars().any(char::is_control) {
        return Err(AppError::validation("File path contains invalid characters"));
    }

    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        match segment.trim() {
            "" => return Err(AppError::validation("File path contains an empty segment")),
            "." | ".." => return Err(AppError::validation("File path cannot contain '.' or '..'")),
            s if s != segment => return Err(AppError::validation("File path segments cannot start or end with spaces")),
            s => segments.push(s),
        }
    }

    Ok(segments.join("/"))
}

/// Final path segment.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn detect_language(path: &str) -> &'static str {
    let name = file_name(path).to_ascii_lowercase();
    if name == "dockerfile" {
        return "dockerfile";
    }
    if name == "makefile" {
        return "makefile";
    }

    let extension = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match extension {
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "json" => "json",
        "md" | "markdown" => "markdown",
        "py" => "python",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "cs" => "csharp",
        "php" => "php",
        "rb" => "ruby",
        "sh" | "bash" => "shell",
        "sql" => "sql",
        "xml" | "svg" => "xml",
        "yml" | "yaml" => "yaml",
        "toml" => "toml",
        _ => "plaintext",
    }
}

/// Images, audio and video are stored as opaque media payloads.
pub fn is_media_path(path: &str) -> bool {
    mime_guess::from_path(path).first().is_some_and(|mime| {
        let kind = mime.type_();
        kind == mime_guess::mime::IMAGE || kind == mime_guess::mime::AUDIO || kind == mime_guess::mime::VIDEO
    })
}

fn check_content_size(content: &str) -> AppResult<()> {
    if content.len() > MAX_CONTENT_BYTES {
        return Err(AppError::validation("File content exceeds the 10 MiB limit"));
    }
    Ok(())
}

fn is_unique_violation(e: &anyhow::Error) -> bool {
    e.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|e| e.is_unique_violation())
}

/// Project file CRUD. Content is encrypted before it reaches the database.
pub struct FileService {
    repository: FileRepository,
    access: AccessOracle,
    encryption: Arc<EncryptionService>,
}

impl FileService {
    pub fn new(pool: SqlitePool, access: AccessOracle, encryption: Arc<EncryptionService>) -> Self {
        Self { repository: FileRepository::new(pool), access, encryption }
    }

    pub async fn list(&self, user_id: UserId, project_id: ProjectId) -> AppResult<Vec<FileSummary>> {
        self.access.require_access(project_id, user_id).await?;
        Ok(self.repository.list_for_project(project_id).await?)
    }

    pub async fn read(&self, user_id: UserId, project_id: ProjectId, file_id: FileId) -> AppResult<FileContent> {
        self.access.require_access(project_id, user_id).await?;
        let file = self
            .repository
            .get_file(project_id, file_id)
            .await?
            .ok_or_else(|| AppError::not_found("File not found"))?;

        let content = self.encryption.decrypt(project_id, &file.content)?;
        Ok(FileContent { file: FileSummary::from(&file), content })
    }

    pub async fn create(
        &self,
        user_id: UserId,
        project_id: ProjectId,
        raw_path: &str,
        content: Option<String>,
    ) -> AppResult<FileSummary> {
        self.access.require_editor(project_id, user_id).await?;
        let path = normalize_path(raw_path)?;
        let content = content.unwrap_or_default();
        check_content_size(&content)?;

        if self.repository.find_by_path(project_id, &path).await?.is_some() {
            return Err(AppError::conflict("A file with this path already exists"));
        }

        let encrypted = self.encryption.encrypt(project_id, &content)?;
        let new_file = NewFile {
            project_id,
            path: &path,
            name: file_name(&path),
            language: detect_language(&path),
            content: &encrypted,
            is_media: is_media_path(&path),
            size: content.len() as i64,
        };

        let file = self.repository.create_file(&new_file).await.map_err(|e| {
            if is_unique_violation(&e) {
                AppError::conflict("A file with this path already exists")
            } else {
                AppError::from(e)
            }
        })?;

        info!(project_id, file_id = file.id, path = %file.path, "File created");
        Ok(FileSummary::from(&file))
    }

    /// Save new content and/or move the file to a new path.
    pub async fn update(
        &self,
        user_id: UserId,
        project_id: ProjectId,
        file_id: FileId,
        content: Option<String>,
        new_path: Option<&str>,
    ) -> AppResult<FileSummary> {
        self.access.require_editor(project_id, user_id).await?;
        let mut file = self
            .repository
            .get_file(project_id, file_id)
            .await?
            .ok_or_else(|| AppError::not_found("File not found"))?;

        if let Some(raw_path) = new_path {
            let path = normalize_path(raw_path)?;
            if path != file.path {
                if self.repository.find_by_path(project_id, &path).await?.is_some() {
                    return Err(AppError::conflict("A file with this path already exists"));
                }
                file = self
                    .repository
                    .rename_file(file_id, &path, file_name(&path), detect_language(&path), is_media_path(&path))
                    .await?;
                debug!(project_id, file_id, path = %file.path, "File renamed");
            }
        }

        if let Some(content) = content {
            check_content_size(&content)?;
            let encrypted = self.encryption.encrypt(project_id, &content)?;
            file = self.repository.update_content(file_id, &encrypted, content.len() as i64).await?;
            debug!(project_id, file_id, size = file.size, "File saved");
        }

        Ok(FileSummary::from(&file))
    }

    pub async fn delete(&self, user_id: UserId, project_id: ProjectId, file_id: FileId) -> AppResult<()> {
        self.access.require_editor(project_id, user_id).await?;
        if !self.repository.delete_file(project_id, file_id).await? {
            return Err(AppError::not_found("File not found"));
        }
        info!(project_id, file_id, "File deleted");
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::ProjectId;

pub type FileId = i64;

/// Largest content payload accepted for a live edit or a save.
pub const MAX_CONTENT_BYTES: usize = 10 * 1024 * 1024;

/// Upper bound for a JSON body or socket frame carrying a maximum-size content
/// string: every byte may escape to `\u00XX`, plus room for the envelope.
pub const MAX_ENCODED_CONTENT_BYTES: usize = 6 * MAX_CONTENT_BYTES + 64 * 1024;

/// File row. `content` holds the encrypted payload and never leaves the storage layer.
#[derive(Debug, Clone, FromRow)]
pub struct File {
    pub id: FileId,
    pub project_id: ProjectId,
    pub path: String,
    pub name: String,
    pub language: String,
    pub content: String,
    pub is_media: bool,
    pub size: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Content-free descriptor used in listings and `file-added` signals.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub id: FileId,
    pub path: String,
    pub name: String,
    pub language: String,
    pub is_media: bool,
    pub size: i64,
}

impl From<&File> for FileSummary {
    fn from(file: &File) -> Self {
        Self {
            id: file.id,
            path: file.path.clone(),
            name: file.name.clone(),
            language: file.language.clone(),
            is_media: file.is_media,
            size: file.size,
        }
    }
}

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{ProjectId, UserId};

pub type ChatMessageId = i64;

pub const MAX_CHAT_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: ChatMessageId,
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub username: String,
    pub message: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

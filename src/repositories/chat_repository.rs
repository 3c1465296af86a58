use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::models::{ChatMessage, ChatMessageId, ProjectId, UserId};

pub struct ChatRepository {
    pool: SqlitePool,
}

impl ChatRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_message(&self, project_id: ProjectId, user_id: UserId, message: &str) -> Result<ChatMessage> {
        let id = sqlx::query_scalar::<_, ChatMessageId>(
            "INSERT INTO chat_messages (project_id, user_id, message, created_at) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(project_id)
        .bind(user_id)
        .bind(message)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        let message = sqlx::query_as::<_, ChatMessage>(
            "SELECT m.id, m.project_id, m.user_id, u.username, m.message, m.created_at \
             FROM chat_messages m JOIN users u ON u.id = m.user_id WHERE m.id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(message)
    }

    /// A page of messages, oldest first, ending just before `before` when given.
    pub async fn list_messages(
        &self,
        project_id: ProjectId,
        before: Option<ChatMessageId>,
        limit: u32,
    ) -> Result<Vec<ChatMessage>> {
        let mut messages = sqlx::query_as::<_, ChatMessage>(
            "SELECT m.id, m.project_id, m.user_id, u.username, m.message, m.created_at \
             FROM chat_messages m JOIN users u ON u.id = m.user_id \
             WHERE m.project_id = ? AND m.id < ? ORDER BY m.id DESC LIMIT ?",
        )
        .bind(project_id)
        .bind(before.unwrap_or(i64::MAX))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        messages.reverse();
        Ok(messages)
    }

    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chat_messages WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

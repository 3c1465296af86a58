//! Chat Channel: persisted per-project messages, broadcast to the whole room
//! (sender included) and throttled per user.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::models::{ChatMessage, ChatMessageId, ProjectId, UserId, MAX_CHAT_MESSAGE_CHARS};
use crate::realtime::{Hub, ServerEvent};
use crate::repositories::ChatRepository;
use crate::services::AccessOracle;

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const MAX_HISTORY_LIMIT: u32 = 200;

/// One accepted message per user per interval. Rejected attempts do not reset the clock.
pub struct ChatRateLimiter {
    interval: Duration,
    last_sent: Mutex<HashMap<UserId, Instant>>,
}

impl ChatRateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn try_acquire(&self, user_id: UserId) -> Option<RateLimitPermit> {
        self.try_acquire_at(user_id, Instant::now()).await
    }

    pub async fn try_acquire_at(&self, user_id: UserId, now: Instant) -> Option<RateLimitPermit> {
        let mut last_sent = self.last_sent.lock().await;
        let previous = last_sent.get(&user_id).copied();
        if let Some(previous) = previous {
            if now.saturating_duration_since(previous) < self.interval {
                return None;
            }
        }
        last_sent.insert(user_id, now);
        Some(RateLimitPermit { user_id, acquired_at: now, previous })
    }

    /// Give back a slot whose message was never stored. A newer acquisition wins.
    pub async fn release(&self, permit: RateLimitPermit) {
        let mut last_sent = self.last_sent.lock().await;
        if last_sent.get(&permit.user_id) != Some(&permit.acquired_at) {
            return;
        }
        match permit.previous {
            Some(previous) => {
                last_sent.insert(permit.user_id, previous);
            }
            None => {
                last_sent.remove(&permit.user_id);
            }
        }
    }
}

/// A granted send slot, kept until the message is stored.
#[derive(Debug)]
pub struct RateLimitPermit {
    user_id: UserId,
    acquired_at: Instant,
    previous: Option<Instant>,
}

/// Trims, strips angle brackets and caps the text at the maximum length.
/// Returns `None` when nothing is left to send.
pub fn sanitize_message(raw: &str) -> Option<String> {
    let stripped: String = raw.chars().filter(|c| *c != '<' && *c != '>').collect();
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_CHAT_MESSAGE_CHARS).collect())
}

pub struct ChatService {
    repository: ChatRepository,
    access: AccessOracle,
    hub: Arc<Hub>,
    limiter: ChatRateLimiter,
}

impl ChatService {
    pub fn new(pool: SqlitePool, access: AccessOracle, hub: Arc<Hub>, rate_limit: Duration) -> Self {
        Self {
            repository: ChatRepository::new(pool),
            access,
            hub,
            limiter: ChatRateLimiter::new(rate_limit),
        }
    }

    pub async fn send(&self, user_id: UserId, project_id: ProjectId, raw: &str) -> AppResult<ChatMessage> {
        let text = sanitize_message(raw).ok_or_else(|| AppError::validation("Message cannot be empty"))?;
        self.access.require_access(project_id, user_id).await?;

        let Some(permit) = self.limiter.try_acquire(user_id).await else {
            debug!(user_id, project_id, "Chat message rate limited");
            return Err(AppError::RateLimited);
        };

        let message = match self.repository.create_message(project_id, user_id, &text).await {
            Ok(message) => message,
            Err(e) => {
                self.limiter.release(permit).await;
                return Err(e.into());
            }
        };
        let delivered = self
            .hub
            .fan_out(project_id, None, ServerEvent::ChatMessage(message.clone()))
            .await;
        debug!(user_id, project_id, message_id = message.id, delivered, "Chat message sent");
        Ok(message)
    }

    pub async fn history(
        &self,
        user_id: UserId,
        project_id: ProjectId,
        before: Option<ChatMessageId>,
        limit: Option<u32>,
    ) -> AppResult<Vec<ChatMessage>> {
        self.access.require_access(project_id, user_id).await?;
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.repository.list_messages(project_id, before, limit).await?)
    }
}

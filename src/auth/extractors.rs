use crate::auth::{claims::TokenClaims, errors::AuthError, jwt::JwtService};
use crate::config::AppConfig;
use crate::database::Database;
use crate::models::User;
use crate::realtime::{Hub, Relay};
use crate::repositories::{ProjectRepository, UserRepository};
use crate::services::{AccessOracle, ChatService, EncryptionService, FileService, InvitationService};
use anyhow::Result;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

// Application state shared across HTTP handlers and socket connections
#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub jwt_service: JwtService,
    pub config: AppConfig,
    pub hub: Arc<Hub>,
    pub access: AccessOracle,
    pub relay: Arc<Relay>,
    pub files: Arc<FileService>,
    pub invitations: Arc<InvitationService>,
    pub chat: Arc<ChatService>,
    pub startup_time: Instant,
}

impl AppState {
    pub fn new(database: Database, config: AppConfig) -> Result<Self> {
        let pool = database.pool().clone();
        let jwt_service = JwtService::new(&config.auth)?;
        let encryption = Arc::new(EncryptionService::new(&config.storage.content_encryption_key)?);
        let hub = Arc::new(Hub::new());
        let access = AccessOracle::new(pool.clone());

        let relay = Arc::new(Relay::new(hub.clone(), access.clone(), ProjectRepository::new(pool.clone())));
        let files = Arc::new(FileService::new(pool.clone(), access.clone(), encryption));
        let invitations = Arc::new(InvitationService::new(pool.clone(), hub.clone()));
        let chat = Arc::new(ChatService::new(
            pool,
            access.clone(),
            hub.clone(),
            Duration::from_millis(config.chat.rate_limit_ms),
        ));

        Ok(Self {
            database,
            jwt_service,
            config,
            hub,
            access,
            relay,
            files,
            invitations,
            chat,
            startup_time: Instant::now(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
    pub claims: TokenClaims,
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_token_from_auth_header(&parts.headers)?;
        let auth_user = authenticate_token(state, &token).await?;

        if let Err(e) = UserRepository::new(state.database.pool().clone())
            .touch_last_access(auth_user.user.id)
            .await
        {
            warn!("Failed to record last access for user {}: {}", auth_user.user.id, e);
        }

        Ok(auth_user)
    }
}

fn extract_token_from_auth_header(headers: &axum::http::HeaderMap) -> Result<String, AuthError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    if let Some(token) = auth_header.strip_prefix("Bearer ") {
        Ok(token.to_string())
    } else {
        Err(AuthError::InvalidAuthHeader)
    }
}

/// Validates a token and resolves it to a stored user.
///
/// The `(sub, username)` pair in the claims must match the stored row, so a token
/// minted for a user who was later renamed or recreated is refused.
pub async fn authenticate_token(state: &AppState, token: &str) -> Result<AuthenticatedUser, AuthError> {
    let claims = state.jwt_service.decode_token(token).map_err(|e| {
        debug!("Failed to decode token: {:?}", e);
        AuthError::InvalidToken(e.to_string())
    })?;

    if claims.is_expired() {
        warn!("Token expired for user ID: {}", claims.sub);
        return Err(AuthError::TokenExpired);
    }

    let user = UserRepository::new(state.database.pool().clone())
        .get_user(claims.sub)
        .await
        .map_err(|e| {
            error!("Database error while fetching user {}: {:?}", claims.sub, e);
            AuthError::DatabaseError(e.to_string())
        })?
        .ok_or_else(|| {
            warn!("User not found for ID: {}", claims.sub);
            AuthError::UserNotFound
        })?;

    if user.username != claims.username {
        warn!("Token username does not match user {}", claims.sub);
        return Err(AuthError::InvalidToken("username mismatch".to_string()));
    }

    Ok(AuthenticatedUser { user, claims })
}

use anyhow::Result;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::auth::{extractors::AppState, AuthError, AuthenticatedUser};
use crate::models::{User, UserId};
use crate::repositories::UserRepository;

lazy_static::lazy_static! {
    static ref USERNAME_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_-]{3,32}$").expect("username pattern is valid");
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 3, max = 32))]
    pub username: String,
    #[validate(length(min = 6))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 32))]
    pub username: String,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(max = 512))]
    pub avatar: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserInfo,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: UserId,
    pub username: String,
    pub avatar: Option<String>,
    pub last_access_at: chrono::DateTime<chrono::Utc>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            avatar: user.avatar,
            last_access_at: user.last_access_at,
            created_at: user.created_at,
        }
    }
}

pub fn is_valid_username(username: &str) -> bool {
    USERNAME_PATTERN.is_match(username)
}

pub async fn create_router() -> Result<Router<AppState>> {
    let router = Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/profile", get(get_profile).put(update_profile));

    Ok(router)
}

async fn login(
    State(app_state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    req.validate().map_err(|_| AuthError::InvalidCredentials)?;

    let user_repo = UserRepository::new(app_state.database.pool().clone());
    let user = user_repo
        .find_by_username(&req.username)
        .await
        .map_err(|e| AuthError::DatabaseError(e.to_string()))?
        .ok_or(AuthError::InvalidCredentials)?;

    let is_valid = verify_password(&req.password, &user.password_hash).map_err(|_| AuthError::InvalidCredentials)?;
    if !is_valid {
        return Err(AuthError::InvalidCredentials);
    }

    user_repo
        .touch_last_access(user.id)
        .await
        .map_err(|e| AuthError::DatabaseError(e.to_string()))?;

    let token = app_state
        .jwt_service
        .create_token_for_user(user.id, user.username.clone())
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

    info!(user_id = user.id, "User logged in");
    Ok(Json(AuthResponse { token, user: UserInfo::from(user) }))
}

async fn register(
    State(app_state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    req.validate()
        .map_err(|e| AuthError::InvalidRegistration(e.to_string()))?;
    if !is_valid_username(&req.username) {
        return Err(AuthError::InvalidRegistration(
            "Username must be 3-32 letters, digits, '_' or '-'".to_string(),
        ));
    }

    let user_repo = UserRepository::new(app_state.database.pool().clone());
    if user_repo
        .find_by_username(&req.username)
        .await
        .map_err(|e| AuthError::DatabaseError(e.to_string()))?
        .is_some()
    {
        return Err(AuthError::UsernameExists);
    }

    let password_hash =
        hash_password(&req.password).map_err(|e| AuthError::InvalidRegistration(e.to_string()))?;

    let user = user_repo.create_user(&req.username, &password_hash).await.map_err(|e| {
        if e.to_string().contains("UNIQUE") {
            AuthError::UsernameExists
        } else {
            AuthError::DatabaseError(e.to_string())
        }
    })?;

    let token = app_state
        .jwt_service
        .create_token_for_user(user.id, user.username.clone())
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

    info!(user_id = user.id, username = %user.username, "User registered");
    Ok(Json(AuthResponse { token, user: UserInfo::from(user) }))
}

async fn get_profile(auth_user: AuthenticatedUser) -> Result<Json<UserInfo>, AuthError> {
    Ok(Json(UserInfo::from(auth_user.user)))
}

async fn update_profile(
    State(app_state): State<AppState>,
    auth_user: AuthenticatedUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserInfo>, AuthError> {
    req.validate()
        .map_err(|e| AuthError::InvalidRegistration(e.to_string()))?;

    let avatar = req.avatar.as_deref().map(str::trim).filter(|a| !a.is_empty());
    let user = UserRepository::new(app_state.database.pool().clone())
        .update_avatar(auth_user.user.id, avatar)
        .await
        .map_err(|e| AuthError::DatabaseError(e.to_string()))?;

    Ok(Json(UserInfo::from(user)))
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))?
        .to_string();
    Ok(password_hash)
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("Password hash parsing failed: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

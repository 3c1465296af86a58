use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failures of the account endpoints and of bearer-token authentication,
/// over HTTP and during the socket handshake.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingAuthHeader,
    #[error("Invalid authorization header format")]
    InvalidAuthHeader,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Token expired")]
    TokenExpired,
    #[error("User not found")]
    UserNotFound,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid registration data: {0}")]
    InvalidRegistration(String),
    #[error("Username already exists")]
    UsernameExists,
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidRegistration(_) => StatusCode::BAD_REQUEST,
            AuthError::UsernameExists => StatusCode::CONFLICT,
            AuthError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Token failures collapse into one message so a client cannot tell a
    /// forged token from a stale one.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::MissingAuthHeader | AuthError::InvalidAuthHeader => {
                "Missing or invalid authorization header".to_string()
            }
            AuthError::InvalidToken(_) | AuthError::TokenExpired | AuthError::UserNotFound => {
                "Invalid or expired token".to_string()
            }
            AuthError::InvalidCredentials => "Invalid username or password".to_string(),
            AuthError::InvalidRegistration(msg) => msg.clone(),
            AuthError::UsernameExists => "Username already exists".to_string(),
            AuthError::DatabaseError(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let AuthError::DatabaseError(detail) = &self {
            error!("Authentication failed with storage error: {}", detail);
        }

        let status = self.status_code();
        let body = Json(json!({
            "error": self.client_message(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expires_in: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub content_encryption_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub rate_limit_ms: u64,
    pub retention_days: i64,
    pub sweep_interval_secs: u64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl AppConfig {
    pub fn new() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = Self {
            server: ServerConfig {
                host: env_or("HOST", "0.0.0.0"),
                port: env_parse("PORT", 3000),
            },
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", "sqlite://codecollab.db?mode=rwc"),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 5),
            },
            auth: AuthConfig {
                jwt_secret: env_or("JWT_SECRET", "your-secret-key"),
                jwt_expires_in: env_or("JWT_EXPIRES_IN", "24h"),
            },
            storage: StorageConfig {
                content_encryption_key: env_or("CONTENT_ENCRYPTION_KEY", "change-me-content-encryption-key"),
            },
            chat: ChatConfig {
                rate_limit_ms: env_parse("CHAT_RATE_LIMIT_MS", 500),
                retention_days: env_parse("CHAT_RETENTION_DAYS", 30),
                sweep_interval_secs: env_parse("RETENTION_SWEEP_INTERVAL_SECS", 3600),
            },
        };

        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create default config")
    }
}

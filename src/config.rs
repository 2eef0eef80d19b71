use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_PATH: &str = "/api/v1";

/// Smallest signing secret accepted outside the debug profile (HS256 wants >= 256 bits).
const MIN_SIGNING_SECRET_LEN: usize = 32;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    pub cors: CorsConfig,
    pub session: SessionConfig,
    pub token: TokenConfig,
    pub events: EventsConfig,
    pub email: EmailConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
    /// Run embedded migrations when the pool is staged.
    pub run_migrations: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub address: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    pub base_path: String,
    pub enable_swagger: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Maximum number of concurrently active sessions per user.
    pub max_active_sessions: u32,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    /// Deadline applied to every session store call.
    pub store_timeout_ms: u64,
    /// On refresh replay, revoke every other live session of the same user.
    pub replay_revokes_all_sessions: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TokenConfig {
    pub signing_secret: String,
    pub issuer: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EventsConfig {
    pub queue_capacity: usize,
    pub delivery_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_address: String,
    pub from_name: String,
    pub enabled: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/session_keeper".to_string(),
            max_connections: 16,
            min_connections: 4,
            acquire_timeout: 5,
            run_migrations: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            address: "127.0.0.1".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_API_BASE_PATH.to_string(),
            enable_swagger: true,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_credentials: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_active_sessions: 3,
            access_token_ttl_seconds: 15 * 60,
            refresh_token_ttl_seconds: 14 * 24 * 60 * 60,
            store_timeout_ms: 2_000,
            replay_revokes_all_sessions: true,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            signing_secret: "dev-only-signing-secret-change-me-please".to_string(),
            issuer: "session-keeper".to_string(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            delivery_timeout_ms: 3_000,
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            from_address: "noreply@example.com".to_string(),
            from_name: "Session Keeper".to_string(),
            enabled: false,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources in priority order:
    /// 1. Compiled defaults
    /// 2. SessionKeeper.toml (optional)
    /// 3. Environment variables prefixed with SESSION_KEEPER_ (e.g. SESSION_KEEPER_SESSION__MAX_ACTIVE_SESSIONS)
    /// 4. DATABASE_URL
    pub fn load() -> Result<Self, figment::Error> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("SessionKeeper.toml"))
            .merge(Env::prefixed("SESSION_KEEPER_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()))
            .extract()?;

        config.validate().map_err(figment::Error::from)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        let session = &self.session;
        if session.max_active_sessions == 0 {
            return Err("session.max_active_sessions must be at least 1".to_string());
        }
        if session.access_token_ttl_seconds <= 0 {
            return Err("session.access_token_ttl_seconds must be positive".to_string());
        }
        if session.refresh_token_ttl_seconds <= session.access_token_ttl_seconds {
            return Err("session.refresh_token_ttl_seconds must exceed the access token ttl".to_string());
        }
        let wildcard = self.cors.allowed_origins.iter().any(|o| o == "*");
        if wildcard && self.cors.allow_credentials {
            return Err("cors: wildcard origins cannot be combined with allow_credentials".to_string());
        }
        if self.events.queue_capacity == 0 {
            return Err("events.queue_capacity must be at least 1".to_string());
        }

        let profile = std::env::var("ROCKET_PROFILE").unwrap_or_else(|_| "debug".to_string());
        if profile != "debug" && self.token.signing_secret.len() < MIN_SIGNING_SECRET_LEN {
            return Err(format!(
                "token.signing_secret must be at least {} bytes for profile '{}'",
                MIN_SIGNING_SECRET_LEN, profile
            ));
        }

        Ok(())
    }
}

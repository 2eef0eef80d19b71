use rocket::http::{ContentType, Status};
use rocket::response::Responder;
use rocket::{Request, Response};
use rocket_okapi::OpenApiError;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::Responses;
use rocket_okapi::response::OpenApiResponderInner;
use std::io::Cursor;
use thiserror::Error;
use tracing::{error, warn};
use validator::ValidationErrors;

/// Message returned for every authentication failure, whatever check failed.
const UNAUTHORIZED_MESSAGE: &str = "Unauthorized";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Account is inactive")]
    AccountInactive,
    #[error("Token is malformed")]
    TokenMalformed,
    #[error("Token signature is invalid")]
    InvalidSignature,
    #[error("Token has expired")]
    TokenExpired,
    #[error("Token has been revoked")]
    TokenRevoked,
    #[error("Session not found")]
    SessionNotFound,
    /// A refresh token whose session was already rotated or revoked was presented again.
    #[error("Refresh token replay detected")]
    RefreshReplay,
    #[error("Insufficient permissions")]
    Forbidden,
    #[error("Internal server error")]
    LimitEvictionFailure {
        message: String,
        #[source]
        source: sqlx::error::Error,
    },
    #[error("Notification delivery failed: {0}")]
    NotificationFailure(String),
    #[error("Audit emission failed: {0}")]
    AuditEmitFailure(String),
    #[error("Internal server error")]
    Db {
        message: String,
        #[source]
        source: sqlx::error::Error,
    },
    #[error("Session store did not answer within {timeout_ms}ms")]
    StoreTimeout { timeout_ms: u64 },
    #[error("Internal server error")]
    PasswordHash { message: String },
    #[error("Internal server error")]
    TokenEncoding {
        #[source]
        source: jsonwebtoken::errors::Error,
    },
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationErrors),
    #[error("Internal server error")]
    MissingState(&'static str),
}

impl AppError {
    pub fn db(message: impl Into<String>, source: sqlx::error::Error) -> Self {
        Self::Db {
            message: message.into(),
            source,
        }
    }

    pub fn eviction(message: impl Into<String>, source: sqlx::error::Error) -> Self {
        Self::LimitEvictionFailure {
            message: message.into(),
            source,
        }
    }

    pub fn password_hash(message: impl Into<String>, source: password_hash::Error) -> Self {
        Self::PasswordHash {
            message: format!("{}: {}", message.into(), source),
        }
    }

    /// True for every failure that must be reported to clients as a plain 401.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            AppError::InvalidCredentials
                | AppError::AccountInactive
                | AppError::TokenMalformed
                | AppError::InvalidSignature
                | AppError::TokenExpired
                | AppError::TokenRevoked
                | AppError::SessionNotFound
                | AppError::RefreshReplay
        )
    }

    /// Short machine-readable label, used for audit metadata and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::AccountInactive => "account_inactive",
            AppError::TokenMalformed => "token_malformed",
            AppError::InvalidSignature => "invalid_signature",
            AppError::TokenExpired => "token_expired",
            AppError::TokenRevoked => "token_revoked",
            AppError::SessionNotFound => "session_not_found",
            AppError::RefreshReplay => "refresh_replay",
            AppError::Forbidden => "forbidden",
            AppError::LimitEvictionFailure { .. } => "limit_eviction_failure",
            AppError::NotificationFailure(_) => "notification_failure",
            AppError::AuditEmitFailure(_) => "audit_emit_failure",
            AppError::Db { .. } => "db",
            AppError::StoreTimeout { .. } => "store_timeout",
            AppError::PasswordHash { .. } => "password_hash",
            AppError::TokenEncoding { .. } => "token_encoding",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::ValidationError(_) => "validation",
            AppError::MissingState(_) => "missing_state",
        }
    }
}

impl From<password_hash::Error> for AppError {
    fn from(e: password_hash::Error) -> Self {
        AppError::password_hash("Password hashing failed", e)
    }
}

impl From<&AppError> for Status {
    fn from(e: &AppError) -> Self {
        match e {
            e if e.is_auth_failure() => Status::Unauthorized,
            AppError::Forbidden => Status::Forbidden,
            AppError::StoreTimeout { .. } => Status::ServiceUnavailable,
            AppError::BadRequest(_) => Status::BadRequest,
            AppError::ValidationError(_) => Status::BadRequest,
            AppError::NotFound(_) => Status::NotFound,
            _ => Status::InternalServerError,
        }
    }
}

impl<'r> Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &Request<'_>) -> rocket::response::Result<'static> {
        let method = req.method();
        let uri = req.uri();

        let request_id = req
            .local_cache(|| None::<crate::middleware::RequestId>)
            .as_ref()
            .map(|r| r.0.as_str())
            .unwrap_or("unknown");

        let user_id = req
            .local_cache(|| None::<crate::auth::CurrentUser>)
            .as_ref()
            .map(|u| u.user_id.to_string())
            .unwrap_or_else(|| "anonymous".to_string());

        let status = Status::from(&self);

        match &self {
            AppError::RefreshReplay => error!(
                error = ?self,
                kind = self.kind(),
                request_id = %request_id,
                method = %method,
                uri = %uri,
                "refresh token replay: possible credential theft"
            ),
            e if e.is_auth_failure() => warn!(
                kind = self.kind(),
                request_id = %request_id,
                user_id = %user_id,
                method = %method,
                uri = %uri,
                "authentication failed"
            ),
            _ => error!(
                error = ?self,
                request_id = %request_id,
                user_id = %user_id,
                method = %method,
                uri = %uri,
                "request failed"
            ),
        }

        let message = if self.is_auth_failure() {
            UNAUTHORIZED_MESSAGE.to_string()
        } else {
            self.to_string()
        };
        let body = serde_json::json!({ "message": message }).to_string();

        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

impl OpenApiResponderInner for AppError {
    fn responses(_gen: &mut OpenApiGenerator) -> Result<Responses, OpenApiError> {
        use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse};
        let mut responses = Responses::default();
        for (code, description) in [
            ("400", "Bad Request"),
            ("401", "Unauthorized"),
            ("403", "Forbidden"),
            ("404", "Not Found"),
            ("500", "Internal Server Error"),
            ("503", "Service Unavailable"),
        ] {
            responses.responses.insert(
                code.to_string(),
                RefOr::Object(OpenApiResponse {
                    description: description.to_string(),
                    ..Default::default()
                }),
            );
        }
        Ok(responses)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("Resource not found".to_string()),
            _ => AppError::db("Database error", e),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match e.kind() {
            ErrorKind::ExpiredSignature => AppError::TokenExpired,
            ErrorKind::InvalidSignature => AppError::InvalidSignature,
            _ => AppError::TokenMalformed,
        }
    }
}

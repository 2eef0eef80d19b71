use crate::error::app_error::AppError;
use crate::models::role::{Capability, Role};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;
use validator::Validate;

/// Claims carried by a signed access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user id)
    pub sub: Uuid,
    pub role: Role,
    pub tenant_id: Uuid,
    /// Session the token belongs to
    pub sid: Uuid,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Random token id; keeps tokens issued in the same second distinct
    pub jti: Uuid,
    pub iss: String,
}

/// Token pair handed to the caller exactly once. Only hashes are persisted.
#[derive(Serialize, Debug, Clone, JsonSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1, max = 512))]
    pub refresh_token: String,
}

/// Identity of an authenticated caller, as established by token validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserContext {
    pub user_id: Uuid,
    pub role: Role,
    pub tenant_id: Uuid,
    pub session_id: Uuid,
}

impl UserContext {
    pub fn require(&self, capability: Capability) -> Result<(), AppError> {
        if self.role.has(capability) { Ok(()) } else { Err(AppError::Forbidden) }
    }
}

impl From<&AccessClaims> for UserContext {
    fn from(claims: &AccessClaims) -> Self {
        Self {
            user_id: claims.sub,
            role: claims.role,
            tenant_id: claims.tenant_id,
            session_id: claims.sid,
        }
    }
}

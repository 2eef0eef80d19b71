use crate::config::SessionConfig;
use crate::error::app_error::AppError;
use crate::models::role::Role;
use crate::models::session::{ClientContext, NewSession};
use crate::models::token::{AccessClaims, TokenPair};
use crate::service::token_codec::TokenCodec;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// A freshly minted pair together with the row that will back it.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub pair: TokenPair,
    pub new_session: NewSession,
}

/// Mints token pairs for a new session. Nothing is persisted here.
#[derive(Clone)]
pub struct TokenIssuer {
    codec: TokenCodec,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(codec: TokenCodec, config: &SessionConfig) -> Self {
        Self {
            codec,
            access_ttl: Duration::seconds(config.access_token_ttl_seconds),
            refresh_ttl: Duration::seconds(config.refresh_token_ttl_seconds),
        }
    }

    pub fn issue(&self, user_id: Uuid, role: Role, tenant_id: Uuid, client: ClientContext, now: DateTime<Utc>) -> Result<IssuedSession, AppError> {
        let session_id = Uuid::new_v4();
        let access_expires_at = now + self.access_ttl;
        let refresh_expires_at = now + self.refresh_ttl;

        let claims = AccessClaims {
            sub: user_id,
            role,
            tenant_id,
            sid: session_id,
            iat: now.timestamp(),
            exp: access_expires_at.timestamp(),
            jti: Uuid::new_v4(),
            iss: self.codec.issuer().to_string(),
        };
        let access_token = self.codec.issue(&claims)?;
        let refresh_token = TokenCodec::generate_refresh_token();

        let new_session = NewSession {
            id: session_id,
            user_id,
            access_token_hash: TokenCodec::hash_token(&access_token),
            refresh_token_hash: TokenCodec::hash_token(&refresh_token),
            issued_at: now,
            access_expires_at,
            refresh_expires_at,
            client,
        };

        Ok(IssuedSession {
            pair: TokenPair {
                access_token,
                refresh_token,
                token_type: "Bearer".to_string(),
                expires_in: self.access_ttl.num_seconds(),
            },
            new_session,
        })
    }
}

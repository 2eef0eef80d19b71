use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;

/// Why a session stopped being usable. Stored as the `revoked_reason` Postgres enum.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, JsonSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "revoked_reason", rename_all = "snake_case")]
pub enum RevokedReason {
    Logout,
    SessionLimitExceeded,
    UserRequestedRevokeAll,
    RefreshRotation,
    RefreshReplayDetected,
    AdminRevoked,
}

impl RevokedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RevokedReason::Logout => "logout",
            RevokedReason::SessionLimitExceeded => "session_limit_exceeded",
            RevokedReason::UserRequestedRevokeAll => "user_requested_revoke_all",
            RevokedReason::RefreshRotation => "refresh_rotation",
            RevokedReason::RefreshReplayDetected => "refresh_replay_detected",
            RevokedReason::AdminRevoked => "admin_revoked",
        }
    }
}

/// Durable record binding a token pair to a user and device.
///
/// Only the revocation columns ever change after insert, and only from
/// `revoked = false` to `revoked = true`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub access_token_hash: String,
    pub refresh_token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<RevokedReason>,
}

impl Session {
    /// Counts against the per-user limit: not revoked and refresh window still open.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.refresh_expires_at > now
    }

    pub fn access_expired(&self, now: DateTime<Utc>) -> bool {
        self.access_expires_at <= now
    }

    pub fn refresh_expired(&self, now: DateTime<Utc>) -> bool {
        self.refresh_expires_at <= now
    }
}

/// Device context captured when a session is issued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// A session about to be inserted; the store assigns nothing, every column is decided up front.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub access_token_hash: String,
    pub refresh_token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub client: ClientContext,
}

impl NewSession {
    pub fn into_session(self) -> Session {
        Session {
            id: self.id,
            user_id: self.user_id,
            access_token_hash: self.access_token_hash,
            refresh_token_hash: self.refresh_token_hash,
            issued_at: self.issued_at,
            access_expires_at: self.access_expires_at,
            refresh_expires_at: self.refresh_expires_at,
            ip_address: self.client.ip_address,
            user_agent: self.client.user_agent,
            revoked: false,
            revoked_at: None,
            revoked_reason: None,
        }
    }
}

/// Result of inserting a session under the per-user limit.
#[derive(Debug, Clone)]
pub struct SessionAdmission {
    pub session: Session,
    /// Sessions revoked with `session_limit_exceeded` to make room, oldest first.
    pub evicted: Vec<Session>,
}

/// Result of the locked part of a refresh rotation.
#[derive(Debug, Clone)]
pub enum RotationOutcome {
    Rotated { predecessor: Session, successor: Session },
    /// The predecessor was revoked before the lock was taken: a replay.
    AlreadyRevoked(Session),
    Expired(Session),
    NotFound,
}

/// Session metadata exposed to clients. Never carries token material.
#[derive(Serialize, Debug, JsonSchema)]
pub struct SessionInfo {
    pub id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub is_current: bool,
}

impl SessionInfo {
    pub fn from_session(session: &Session, current_session_id: &Uuid) -> Self {
        Self {
            id: session.id,
            issued_at: session.issued_at,
            access_expires_at: session.access_expires_at,
            refresh_expires_at: session.refresh_expires_at,
            ip_address: session.ip_address.clone(),
            user_agent: session.user_agent.clone(),
            is_current: &session.id == current_session_id,
        }
    }
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct RevokeAllResponse {
    pub revoked_count: u64,
}

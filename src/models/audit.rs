use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Event types for the security audit log
pub mod audit_events {
    // Authentication events
    pub const LOGIN_SUCCESS: &str = "login_success";
    pub const LOGIN_FAILED: &str = "login_failed";
    pub const LOGOUT: &str = "logout";

    // Session lifecycle events
    pub const SESSION_EVICTED: &str = "session_evicted";
    pub const SESSION_REVOKED: &str = "session_revoked";
    pub const SESSIONS_REVOKED_BULK: &str = "sessions_revoked_bulk";
    pub const REFRESH_ROTATED: &str = "refresh_rotated";
    pub const REFRESH_REPLAY_DETECTED: &str = "refresh_replay_detected";
}

/// One entry handed to an audit sink.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub event_type: &'static str,
    pub user_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub success: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<JsonValue>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(event_type: &'static str, success: bool) -> Self {
        Self {
            event_type,
            user_id: None,
            session_id: None,
            success,
            ip_address: None,
            user_agent: None,
            metadata: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn client(mut self, client: &crate::models::session::ClientContext) -> Self {
        self.ip_address = client.ip_address.clone();
        self.user_agent = client.user_agent.clone();
        self
    }

    pub fn metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

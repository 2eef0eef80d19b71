use crate::database::session::SessionStore;
use crate::error::app_error::AppError;
use crate::models::audit::{AuditEvent, audit_events};
use crate::models::session::{RevokedReason, Session};
use crate::service::events::EventDispatcher;
use crate::service::metrics::SessionMetrics;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct RevocationService {
    store: Arc<dyn SessionStore>,
    events: EventDispatcher,
    metrics: SessionMetrics,
}

impl RevocationService {
    pub fn new(store: Arc<dyn SessionStore>, events: EventDispatcher, metrics: SessionMetrics) -> Self {
        Self { store, events, metrics }
    }

    /// Idempotent: revoking an already revoked session succeeds without touching it.
    pub async fn revoke_session(&self, session_id: &Uuid, reason: RevokedReason) -> Result<(), AppError> {
        match self.store.revoke_session(session_id, reason, Utc::now()).await? {
            Some(session) => {
                self.report(&[session], reason, audit_events::SESSION_REVOKED);
                Ok(())
            }
            None => match self.store.get_session(session_id).await? {
                Some(_) => Ok(()),
                None => Err(AppError::SessionNotFound),
            },
        }
    }

    /// Revoke one of the caller's own sessions; another user's session looks nonexistent.
    pub async fn revoke_own_session(&self, user_id: &Uuid, session_id: &Uuid, reason: RevokedReason) -> Result<(), AppError> {
        match self.store.get_session(session_id).await? {
            Some(session) if &session.user_id == user_id => self.revoke_session(session_id, reason).await,
            _ => Err(AppError::NotFound("Session not found".to_string())),
        }
    }

    /// Revoke every live session of `user_id` except `current_session_id`.
    pub async fn revoke_all_except_current(&self, user_id: &Uuid, current_session_id: &Uuid) -> Result<u64, AppError> {
        let reason = RevokedReason::UserRequestedRevokeAll;
        let revoked = self
            .store
            .revoke_all_except(user_id, Some(current_session_id), reason, Utc::now())
            .await?;
        self.report(&revoked, reason, audit_events::SESSIONS_REVOKED_BULK);
        Ok(revoked.len() as u64)
    }

    pub async fn revoke_all_for_user(&self, user_id: &Uuid, reason: RevokedReason) -> Result<u64, AppError> {
        let revoked = self.store.revoke_all_except(user_id, None, reason, Utc::now()).await?;
        self.report(&revoked, reason, audit_events::SESSIONS_REVOKED_BULK);
        Ok(revoked.len() as u64)
    }

    fn report(&self, revoked: &[Session], reason: RevokedReason, event_type: &'static str) {
        if revoked.is_empty() {
            return;
        }
        self.metrics.record_events("session_revoked", revoked.len() as u64);

        for session in revoked {
            tracing::info!(user_id = %session.user_id, session_id = %session.id, reason = reason.as_str(), "session revoked");
            self.events.audit(
                AuditEvent::new(event_type, true)
                    .user(session.user_id)
                    .session(session.id)
                    .metadata(serde_json::json!({ "reason": reason.as_str() })),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Harness;

    #[tokio::test]
    async fn revoke_all_except_current_spares_the_caller() {
        let harness = Harness::new(3).await;
        let user = harness.add_user("sam@example.com", "pa55word!").await;

        let a = harness.login(&user.email, "pa55word!").await.unwrap();
        let b = harness.login(&user.email, "pa55word!").await.unwrap();
        let c = harness.login(&user.email, "pa55word!").await.unwrap();
        let current = harness.validator.validate(&c.access_token).await.unwrap();

        let revoked = harness
            .revocation
            .revoke_all_except_current(&user.id, &current.session_id)
            .await
            .unwrap();

        assert_eq!(revoked, 2);
        assert!(matches!(harness.validator.validate(&a.access_token).await, Err(AppError::TokenRevoked)));
        assert!(matches!(harness.validator.validate(&b.access_token).await, Err(AppError::TokenRevoked)));
        assert_eq!(harness.validator.validate(&c.access_token).await.unwrap().user_id, user.id);

        let a_row = harness.session_for(&a.access_token).await;
        assert_eq!(a_row.revoked_reason, Some(RevokedReason::UserRequestedRevokeAll));
    }

    #[tokio::test]
    async fn revoking_twice_is_a_no_op_success() {
        let harness = Harness::new(3).await;
        let user = harness.add_user("lee@example.com", "pa55word!").await;
        let pair = harness.login(&user.email, "pa55word!").await.unwrap();
        let session = harness.session_for(&pair.access_token).await;

        harness.revocation.revoke_session(&session.id, RevokedReason::Logout).await.unwrap();
        let first = harness.store.get(&session.id).await.unwrap();
        harness
            .revocation
            .revoke_session(&session.id, RevokedReason::AdminRevoked)
            .await
            .unwrap();
        let second = harness.store.get(&session.id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.revoked_reason, Some(RevokedReason::Logout));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let harness = Harness::new(3).await;
        let result = harness.revocation.revoke_session(&Uuid::new_v4(), RevokedReason::Logout).await;
        assert!(matches!(result, Err(AppError::SessionNotFound)));
    }

    #[tokio::test]
    async fn cannot_revoke_someone_elses_session() {
        let harness = Harness::new(3).await;
        let owner = harness.add_user("owner@example.com", "pa55word!").await;
        let intruder = harness.add_user("intruder@example.com", "pa55word!").await;
        let pair = harness.login(&owner.email, "pa55word!").await.unwrap();
        let session = harness.session_for(&pair.access_token).await;

        let result = harness
            .revocation
            .revoke_own_session(&intruder.id, &session.id, RevokedReason::Logout)
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(harness.validator.validate(&pair.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn revocation_is_terminal_for_validation() {
        let harness = Harness::new(3).await;
        let user = harness.add_user("ari@example.com", "pa55word!").await;
        let pair = harness.login(&user.email, "pa55word!").await.unwrap();
        let session = harness.session_for(&pair.access_token).await;

        harness.revocation.revoke_session(&session.id, RevokedReason::Logout).await.unwrap();

        for _ in 0..10 {
            assert!(matches!(harness.validator.validate(&pair.access_token).await, Err(AppError::TokenRevoked)));
            assert!(harness.rotator.rotate(&pair.refresh_token, Default::default()).await.is_err());
        }
    }
}

use crate::database::session::SessionStore;
use crate::database::user::UserDirectory;
use crate::error::app_error::AppError;
use crate::models::audit::{AuditEvent, audit_events};
use crate::models::session::{ClientContext, RevokedReason, RotationOutcome, Session};
use crate::models::token::TokenPair;
use crate::service::events::EventDispatcher;
use crate::service::metrics::SessionMetrics;
use crate::service::revocation::RevocationService;
use crate::service::token_codec::TokenCodec;
use crate::service::token_issuer::TokenIssuer;
use chrono::Utc;
use std::sync::Arc;

/// Exchanges a refresh token for a new pair, exactly once.
#[derive(Clone)]
pub struct RefreshRotator {
    store: Arc<dyn SessionStore>,
    users: Arc<dyn UserDirectory>,
    issuer: TokenIssuer,
    revocation: RevocationService,
    events: EventDispatcher,
    metrics: SessionMetrics,
    replay_revokes_all_sessions: bool,
}

impl RefreshRotator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
        issuer: TokenIssuer,
        revocation: RevocationService,
        events: EventDispatcher,
        metrics: SessionMetrics,
        replay_revokes_all_sessions: bool,
    ) -> Self {
        Self {
            store,
            users,
            issuer,
            revocation,
            events,
            metrics,
            replay_revokes_all_sessions,
        }
    }

    /// Unknown token: `TokenMalformed`. Known but revoked: `RefreshReplay`.
    /// Past its refresh window: `TokenExpired`.
    pub async fn rotate(&self, refresh_token: &str, client: ClientContext) -> Result<TokenPair, AppError> {
        let hash = TokenCodec::hash_token(refresh_token);
        let Some(session) = self.store.find_by_refresh_hash(&hash).await? else {
            return Err(AppError::TokenMalformed);
        };

        if session.revoked {
            return Err(self.on_replay(&session, &client).await);
        }
        let now = Utc::now();
        if session.refresh_expired(now) {
            return Err(AppError::TokenExpired);
        }

        let user = self.users.get_user_by_id(&session.user_id).await?.ok_or(AppError::SessionNotFound)?;
        if !user.is_active {
            return Err(AppError::AccountInactive);
        }

        let issued = self.issuer.issue(user.id, user.role, user.tenant_id, client.clone(), now)?;

        match self.store.rotate_session(&session.id, &issued.new_session).await? {
            RotationOutcome::Rotated { predecessor, successor } => {
                self.metrics.record_event("refresh_rotated");
                tracing::info!(user_id = %user.id, predecessor = %predecessor.id, successor = %successor.id, "refresh token rotated");
                self.events.audit(
                    AuditEvent::new(audit_events::REFRESH_ROTATED, true)
                        .user(user.id)
                        .session(successor.id)
                        .client(&client)
                        .metadata(serde_json::json!({ "predecessor": predecessor.id })),
                );
                Ok(issued.pair)
            }
            // Lost a race with a concurrent rotation of the same token.
            RotationOutcome::AlreadyRevoked(current) => Err(self.on_replay(&current, &client).await),
            RotationOutcome::Expired(_) => Err(AppError::TokenExpired),
            RotationOutcome::NotFound => Err(AppError::TokenMalformed),
        }
    }

    async fn on_replay(&self, session: &Session, client: &ClientContext) -> AppError {
        self.metrics.record_event("refresh_replay");
        tracing::error!(
            user_id = %session.user_id,
            session_id = %session.id,
            revoked_reason = session.revoked_reason.map(RevokedReason::as_str).unwrap_or("-"),
            ip = client.ip_address.as_deref().unwrap_or("-"),
            "refresh token replay detected"
        );

        let mut cascaded = 0;
        if self.replay_revokes_all_sessions && refresh_was_consumed(session) {
            match self
                .revocation
                .revoke_all_for_user(&session.user_id, RevokedReason::RefreshReplayDetected)
                .await
            {
                Ok(count) => cascaded = count,
                Err(e) => tracing::error!(user_id = %session.user_id, error = %e, "failed to revoke sessions after replay"),
            }
        }

        self.events.audit(
            AuditEvent::new(audit_events::REFRESH_REPLAY_DETECTED, false)
                .user(session.user_id)
                .session(session.id)
                .client(client)
                .metadata(serde_json::json!({
                    "previous_reason": session.revoked_reason.map(RevokedReason::as_str),
                    "sessions_revoked": cascaded,
                })),
        );

        AppError::RefreshReplay
    }
}

/// True when the refresh token was spent by a rotation, as opposed to a
/// session that was evicted, logged out or revoked by an administrator.
fn refresh_was_consumed(session: &Session) -> bool {
    matches!(
        session.revoked_reason,
        Some(RevokedReason::RefreshRotation | RevokedReason::RefreshReplayDetected)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::test_utils::Harness;

    #[tokio::test]
    async fn rotation_returns_working_pair_and_retires_predecessor() {
        let harness = Harness::new(3).await;
        let user = harness.add_user("rae@example.com", "pa55word!").await;
        let original = harness.login(&user.email, "pa55word!").await.unwrap();
        let old_session = harness.session_for(&original.access_token).await;

        let client = ClientContext {
            ip_address: Some("192.0.2.7".to_string()),
            user_agent: Some("fleet-app/2.1".to_string()),
        };
        let rotated = harness.rotator.rotate(&original.refresh_token, client.clone()).await.unwrap();

        let context = harness.validator.validate(&rotated.access_token).await.unwrap();
        assert_eq!(context.user_id, user.id);

        let predecessor = harness.store.get(&old_session.id).await.unwrap();
        assert!(predecessor.revoked);
        assert_eq!(predecessor.revoked_reason, Some(RevokedReason::RefreshRotation));

        let successor = harness.session_for(&rotated.access_token).await;
        assert!(!successor.revoked);
        assert_eq!(successor.revoked_reason, None);
        assert_eq!(successor.ip_address, client.ip_address);
        assert_eq!(successor.user_agent, client.user_agent);

        assert!(matches!(harness.validator.validate(&original.access_token).await, Err(AppError::TokenRevoked)));
    }

    #[tokio::test]
    async fn second_rotation_of_same_token_is_replay() {
        let harness = Harness::new(3).await;
        let user = harness.add_user("kai@example.com", "pa55word!").await;
        let original = harness.login(&user.email, "pa55word!").await.unwrap();

        let rotated = harness.rotator.rotate(&original.refresh_token, ClientContext::default()).await.unwrap();
        let replay = harness.rotator.rotate(&original.refresh_token, ClientContext::default()).await;

        assert!(matches!(replay, Err(AppError::RefreshReplay)));
        // The cascade also kills the successor issued to whoever rotated first.
        assert!(matches!(harness.validator.validate(&rotated.access_token).await, Err(AppError::TokenRevoked)));
        assert_eq!(harness.metrics.event_count("refresh_replay"), 1);
    }

    #[tokio::test]
    async fn replay_without_cascade_leaves_successor_alone() {
        let config = SessionConfig {
            replay_revokes_all_sessions: false,
            ..SessionConfig::default()
        };
        let harness = Harness::with_session_config(config).await;
        let user = harness.add_user("noa@example.com", "pa55word!").await;
        let original = harness.login(&user.email, "pa55word!").await.unwrap();

        let rotated = harness.rotator.rotate(&original.refresh_token, ClientContext::default()).await.unwrap();
        let replay = harness.rotator.rotate(&original.refresh_token, ClientContext::default()).await;

        assert!(matches!(replay, Err(AppError::RefreshReplay)));
        assert!(harness.validator.validate(&rotated.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn evicted_session_refresh_does_not_cascade() {
        let harness = Harness::new(3).await;
        let user = harness.add_user("ivo@example.com", "pa55word!").await;
        let mut pairs = Vec::new();
        for _ in 0..4 {
            pairs.push(harness.login(&user.email, "pa55word!").await.unwrap());
        }

        let result = harness.rotator.rotate(&pairs[0].refresh_token, ClientContext::default()).await;

        assert!(matches!(result, Err(AppError::RefreshReplay)));
        assert_eq!(harness.store.active_count(&user.id, Utc::now()).await, 3);
        for pair in &pairs[1..] {
            assert!(harness.validator.validate(&pair.access_token).await.is_ok());
        }
        assert_eq!(harness.metrics.event_count("refresh_replay"), 1);
    }

    #[tokio::test]
    async fn logged_out_device_refresh_leaves_other_devices_signed_in() {
        let harness = Harness::new(3).await;
        let user = harness.add_user("ada@example.com", "pa55word!").await;
        let device_a = harness.login(&user.email, "pa55word!").await.unwrap();
        let device_b = harness.login(&user.email, "pa55word!").await.unwrap();

        let caller = harness.validator.validate(&device_a.access_token).await.unwrap();
        harness.auth.logout(&caller, false).await.unwrap();

        let result = harness.rotator.rotate(&device_a.refresh_token, ClientContext::default()).await;

        assert!(matches!(result, Err(AppError::RefreshReplay)));
        assert!(harness.validator.validate(&device_b.access_token).await.is_ok());
        assert_eq!(harness.store.active_count(&user.id, Utc::now()).await, 1);
    }

    #[tokio::test]
    async fn unknown_refresh_token_is_not_a_replay() {
        let harness = Harness::new(3).await;
        let result = harness
            .rotator
            .rotate(&TokenCodec::generate_refresh_token(), ClientContext::default())
            .await;
        assert!(matches!(result, Err(AppError::TokenMalformed)));
        assert_eq!(harness.metrics.event_count("refresh_replay"), 0);
    }

    #[tokio::test]
    async fn expired_refresh_window_is_token_expired() {
        let harness = Harness::new(3).await;
        let user = harness.add_user("eli@example.com", "pa55word!").await;
        let pair = harness.login(&user.email, "pa55word!").await.unwrap();
        let session = harness.session_for(&pair.access_token).await;
        harness
            .store
            .shift_expiry(&session.id, chrono::Duration::days(-30))
            .await;

        let result = harness.rotator.rotate(&pair.refresh_token, ClientContext::default()).await;
        assert!(matches!(result, Err(AppError::TokenExpired)));
    }

    #[tokio::test]
    async fn concurrent_rotations_yield_exactly_one_winner() {
        let harness = Harness::new(3).await;
        let user = harness.add_user("jo@example.com", "pa55word!").await;
        let pair = harness.login(&user.email, "pa55word!").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let rotator = harness.rotator.clone();
            let token = pair.refresh_token.clone();
            handles.push(tokio::spawn(async move { rotator.rotate(&token, ClientContext::default()).await }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert!(matches!(e, AppError::RefreshReplay)),
            }
        }
        assert_eq!(winners, 1);
    }
}

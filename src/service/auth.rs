use crate::database::session::SessionStore;
use crate::database::user::UserDirectory;
use crate::error::app_error::AppError;
use crate::models::audit::{AuditEvent, audit_events};
use crate::models::role::Capability;
use crate::models::session::{ClientContext, RevokedReason, SessionInfo};
use crate::models::token::{TokenPair, UserContext};
use crate::service::credentials::CredentialVerifier;
use crate::service::events::{EventDispatcher, NotificationRecipient};
use crate::service::metrics::SessionMetrics;
use crate::service::revocation::RevocationService;
use crate::service::session_limiter::SessionLimiter;
use crate::service::token_issuer::TokenIssuer;
use chrono::Utc;
use std::sync::Arc;

/// Login, logout and session listing for the authenticated caller.
#[derive(Clone)]
pub struct AuthService {
    verifier: CredentialVerifier,
    issuer: TokenIssuer,
    limiter: SessionLimiter,
    revocation: RevocationService,
    store: Arc<dyn SessionStore>,
    users: Arc<dyn UserDirectory>,
    events: EventDispatcher,
    metrics: SessionMetrics,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        verifier: CredentialVerifier,
        issuer: TokenIssuer,
        limiter: SessionLimiter,
        revocation: RevocationService,
        store: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
        events: EventDispatcher,
        metrics: SessionMetrics,
    ) -> Self {
        Self {
            verifier,
            issuer,
            limiter,
            revocation,
            store,
            users,
            events,
            metrics,
        }
    }

    /// Verifies credentials, mints a pair and admits the session under the
    /// per-user limit. Nothing is persisted when credentials fail.
    pub async fn login(&self, email: &str, password: &str, client: ClientContext) -> Result<TokenPair, AppError> {
        let user = match self.verifier.verify(email, password).await {
            Ok(user) => user,
            Err(e) => {
                if e.is_auth_failure() {
                    self.metrics.record_event("login_failed");
                    self.events.audit(
                        AuditEvent::new(audit_events::LOGIN_FAILED, false)
                            .client(&client)
                            .metadata(serde_json::json!({ "reason": e.kind() })),
                    );
                }
                return Err(e);
            }
        };

        let issued = self.issuer.issue(user.id, user.role, user.tenant_id, client.clone(), Utc::now())?;
        let recipient = NotificationRecipient {
            user_id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
        };
        let admission = self.limiter.admit(&recipient, &issued.new_session).await?;

        self.metrics.record_event("login_success");
        tracing::info!(
            user_id = %user.id,
            session_id = %admission.session.id,
            evicted = admission.evicted.len(),
            "login succeeded"
        );
        self.events.audit(
            AuditEvent::new(audit_events::LOGIN_SUCCESS, true)
                .user(user.id)
                .session(admission.session.id)
                .client(&client),
        );

        Ok(issued.pair)
    }

    /// Ends the caller's session, or every session of the caller when `all` is set.
    pub async fn logout(&self, caller: &UserContext, all: bool) -> Result<u64, AppError> {
        let revoked = if all {
            self.revocation
                .revoke_all_for_user(&caller.user_id, RevokedReason::UserRequestedRevokeAll)
                .await?
        } else {
            self.revocation.revoke_session(&caller.session_id, RevokedReason::Logout).await?;
            1
        };

        self.metrics.record_event("logout");
        self.events.audit(
            AuditEvent::new(audit_events::LOGOUT, true)
                .user(caller.user_id)
                .session(caller.session_id)
                .metadata(serde_json::json!({ "all": all, "revoked": revoked })),
        );
        Ok(revoked)
    }

    /// Revoke every active session of `target_user_id` on behalf of an operator.
    /// A target outside the caller's reach is reported as not found.
    pub async fn admin_revoke_user_sessions(&self, caller: &UserContext, target_user_id: &uuid::Uuid) -> Result<u64, AppError> {
        let any_tenant = caller.role.has(Capability::RevokeAnyTenantSessions);
        if !any_tenant && !caller.role.has(Capability::RevokeTenantSessions) {
            return Err(AppError::Forbidden);
        }

        let target = self
            .users
            .get_user_by_id(target_user_id)
            .await?
            .filter(|user| any_tenant || user.tenant_id == caller.tenant_id)
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let revoked = self.revocation.revoke_all_for_user(&target.id, RevokedReason::AdminRevoked).await?;
        tracing::info!(
            operator_id = %caller.user_id,
            user_id = %target.id,
            revoked,
            "sessions revoked by operator"
        );
        Ok(revoked)
    }

    /// Active sessions of the caller, newest first.
    pub async fn active_sessions(&self, caller: &UserContext) -> Result<Vec<SessionInfo>, AppError> {
        let sessions = self.store.list_active_sessions(&caller.user_id, Utc::now()).await?;
        Ok(sessions
            .iter()
            .map(|s| SessionInfo::from_session(s, &caller.session_id))
            .collect())
    }
}

use crate::database::session::SessionStore;
use crate::error::app_error::AppError;
use crate::models::token::UserContext;
use crate::service::metrics::SessionMetrics;
use crate::service::token_codec::TokenCodec;
use chrono::Utc;
use std::sync::Arc;

/// Read path run on every authenticated request: signature and expiry
/// first, then the session row, so a revoked session rejects its access
/// token immediately rather than at natural expiry.
#[derive(Clone)]
pub struct TokenValidator {
    codec: TokenCodec,
    store: Arc<dyn SessionStore>,
    metrics: SessionMetrics,
}

impl TokenValidator {
    pub fn new(codec: TokenCodec, store: Arc<dyn SessionStore>, metrics: SessionMetrics) -> Self {
        Self { codec, store, metrics }
    }

    pub async fn validate(&self, access_token: &str) -> Result<UserContext, AppError> {
        let result = self.check(access_token).await;
        if let Err(e) = &result
            && e.is_auth_failure()
        {
            self.metrics.record_validation_failure(e.kind());
        }
        result
    }

    async fn check(&self, access_token: &str) -> Result<UserContext, AppError> {
        let claims = self.codec.parse(access_token)?;

        let hash = TokenCodec::hash_token(access_token);
        let session = self.store.find_by_access_hash(&hash).await?.ok_or(AppError::SessionNotFound)?;

        // A hash match owned by someone else is an integrity fault, never a pass.
        if session.user_id != claims.sub || session.id != claims.sid {
            tracing::error!(session_id = %session.id, "access token claims disagree with stored session");
            return Err(AppError::SessionNotFound);
        }
        if session.revoked {
            return Err(AppError::TokenRevoked);
        }
        if session.access_expired(Utc::now()) {
            return Err(AppError::TokenExpired);
        }

        Ok(UserContext::from(&claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenConfig;
    use crate::models::role::Role;
    use crate::models::session::ClientContext;
    use crate::service::token_issuer::TokenIssuer;
    use crate::test_utils::Harness;
    use chrono::Duration;

    #[tokio::test]
    async fn valid_token_yields_caller_context() {
        let harness = Harness::new(3).await;
        let user = harness.add_user("vic@example.com", "pa55word!").await;
        let pair = harness.login(&user.email, "pa55word!").await.unwrap();

        let context = harness.validator.validate(&pair.access_token).await.unwrap();
        let session = harness.session_for(&pair.access_token).await;
        assert_eq!(context.user_id, user.id);
        assert_eq!(context.role, user.role);
        assert_eq!(context.session_id, session.id);
    }

    #[tokio::test]
    async fn well_signed_token_without_session_is_rejected() {
        let harness = Harness::new(3).await;
        let issuer = TokenIssuer::new(harness.codec.clone(), &Default::default());
        let orphan = issuer
            .issue(uuid::Uuid::new_v4(), Role::Driver, uuid::Uuid::new_v4(), ClientContext::default(), Utc::now())
            .unwrap();

        let result = harness.validator.validate(&orphan.pair.access_token).await;
        assert!(matches!(result, Err(AppError::SessionNotFound)));
    }

    #[tokio::test]
    async fn foreign_signature_is_rejected() {
        let harness = Harness::new(3).await;
        let foreign = TokenCodec::new(&TokenConfig {
            signing_secret: "another-service-entirely-different-key".to_string(),
            issuer: harness.codec.issuer().to_string(),
        });
        let issuer = TokenIssuer::new(foreign, &Default::default());
        let forged = issuer
            .issue(uuid::Uuid::new_v4(), Role::SuperAdmin, uuid::Uuid::new_v4(), ClientContext::default(), Utc::now())
            .unwrap();

        let result = harness.validator.validate(&forged.pair.access_token).await;
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[tokio::test]
    async fn stored_access_expiry_is_enforced() {
        let harness = Harness::new(3).await;
        let user = harness.add_user("exp@example.com", "pa55word!").await;
        let pair = harness.login(&user.email, "pa55word!").await.unwrap();
        let session = harness.session_for(&pair.access_token).await;
        harness.store.shift_expiry(&session.id, Duration::minutes(-16)).await;

        let result = harness.validator.validate(&pair.access_token).await;
        assert!(matches!(result, Err(AppError::TokenExpired)));
    }

    #[tokio::test]
    async fn failures_are_counted_by_reason() {
        let harness = Harness::new(3).await;
        let _ = harness.validator.validate("garbage").await;
        assert!(harness.metrics.render().contains("token_validation_failures_total{reason=\"token_malformed\"} 1"));
    }
}

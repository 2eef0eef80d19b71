pub mod auth;
pub mod credentials;
pub mod email;
pub mod events;
pub mod metrics;
pub mod refresh_rotator;
pub mod revocation;
pub mod session_limiter;
pub mod token_codec;
pub mod token_issuer;
pub mod token_validator;

use crate::config::SessionConfig;
use crate::database::session::SessionStore;
use crate::database::user::UserDirectory;
use auth::AuthService;
use credentials::CredentialVerifier;
use events::EventDispatcher;
use metrics::SessionMetrics;
use refresh_rotator::RefreshRotator;
use revocation::RevocationService;
use rocket::{Build, Rocket};
use session_limiter::SessionLimiter;
use std::sync::Arc;
use token_codec::TokenCodec;
use token_issuer::TokenIssuer;
use token_validator::TokenValidator;

/// The services handed to Rocket as managed state.
pub struct SessionServices {
    pub auth: AuthService,
    pub validator: TokenValidator,
    pub rotator: RefreshRotator,
    pub revocation: RevocationService,
    pub metrics: SessionMetrics,
}

impl SessionServices {
    pub fn build(
        codec: TokenCodec,
        store: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
        events: EventDispatcher,
        metrics: SessionMetrics,
        config: &SessionConfig,
    ) -> Self {
        let issuer = TokenIssuer::new(codec.clone(), config);
        let revocation = RevocationService::new(store.clone(), events.clone(), metrics.clone());
        let limiter = SessionLimiter::new(store.clone(), config.max_active_sessions as usize, events.clone(), metrics.clone());
        let validator = TokenValidator::new(codec, store.clone(), metrics.clone());
        let rotator = RefreshRotator::new(
            store.clone(),
            users.clone(),
            issuer.clone(),
            revocation.clone(),
            events.clone(),
            metrics.clone(),
            config.replay_revokes_all_sessions,
        );
        let auth = AuthService::new(
            CredentialVerifier::new(users.clone()),
            issuer,
            limiter,
            revocation.clone(),
            store,
            users,
            events,
            metrics.clone(),
        );

        Self {
            auth,
            validator,
            rotator,
            revocation,
            metrics,
        }
    }

    pub fn manage(self, rocket: Rocket<Build>) -> Rocket<Build> {
        rocket
            .manage(self.auth)
            .manage(self.validator)
            .manage(self.rotator)
            .manage(self.revocation)
            .manage(self.metrics)
    }
}

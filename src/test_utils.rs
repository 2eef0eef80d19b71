use crate::config::{DEFAULT_API_BASE_PATH, EventsConfig, SessionConfig, TokenConfig};
use crate::database::session::SessionStore;
use crate::database::user::UserDirectory;
use crate::error::app_error::AppError;
use crate::models::audit::AuditEvent;
use crate::models::role::Role;
use crate::models::session::{ClientContext, NewSession, RevokedReason, RotationOutcome, Session, SessionAdmission};
use crate::models::token::TokenPair;
use crate::models::user::User;
use crate::service::SessionServices;
use crate::service::auth::AuthService;
use crate::service::events::{AuditSink, EventDispatcher, NotificationRecipient, Notifier, SessionMeta};
use crate::service::metrics::SessionMetrics;
use crate::service::refresh_rotator::RefreshRotator;
use crate::service::revocation::RevocationService;
use crate::service::session_limiter::select_evictions;
use crate::service::token_codec::TokenCodec;
use crate::service::token_validator::TokenValidator;
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{DateTime, Duration, Utc};
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHasher, SaltString};
use rocket::local::asynchronous::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// Cheap Argon2 parameters so tests do not spend seconds per login.
fn hash_password(password: &str) -> String {
    let params = Params::new(256, 1, 1, None).unwrap();
    let salt = SaltString::generate(&mut OsRng);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password(password.as_bytes(), &salt)
        .unwrap()
        .to_string()
}

pub fn new_session_for(user_id: &Uuid, issued_at: DateTime<Utc>, client: ClientContext) -> NewSession {
    NewSession {
        id: Uuid::new_v4(),
        user_id: *user_id,
        access_token_hash: TokenCodec::hash_token(&TokenCodec::generate_refresh_token()),
        refresh_token_hash: TokenCodec::hash_token(&TokenCodec::generate_refresh_token()),
        issued_at,
        access_expires_at: issued_at + Duration::minutes(15),
        refresh_expires_at: issued_at + Duration::days(14),
        client,
    }
}

pub fn sample_session(user_id: &Uuid, issued_at: DateTime<Utc>) -> Session {
    new_session_for(user_id, issued_at, ClientContext::default()).into_session()
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    condition()
}

/// One lock over the whole map, so every unit of work is trivially serialized.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: AsyncMutex<HashMap<Uuid, Session>>,
    failing_evictions: AsyncMutex<usize>,
}

impl InMemorySessionStore {
    pub async fn get(&self, id: &Uuid) -> Option<Session> {
        self.sessions.lock().await.get(id).cloned()
    }

    pub async fn active_count(&self, user_id: &Uuid, now: DateTime<Utc>) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| &s.user_id == user_id && s.is_active(now))
            .count()
    }

    /// The next `count` admissions that need to evict fail without changing anything.
    pub async fn fail_next_evictions(&self, count: usize) {
        *self.failing_evictions.lock().await = count;
    }

    /// Moves both expiry timestamps of a session by `delta`.
    pub async fn shift_expiry(&self, id: &Uuid, delta: Duration) {
        if let Some(session) = self.sessions.lock().await.get_mut(id) {
            session.access_expires_at += delta;
            session.refresh_expires_at += delta;
        }
    }

    fn revoke(session: &mut Session, reason: RevokedReason, now: DateTime<Utc>) {
        session.revoked = true;
        session.revoked_at = Some(now);
        session.revoked_reason = Some(reason);
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn admit_session(&self, new_session: &NewSession, limit: usize) -> Result<SessionAdmission, AppError> {
        let now = new_session.issued_at;
        let mut sessions = self.sessions.lock().await;

        let active: Vec<Session> = sessions
            .values()
            .filter(|s| s.user_id == new_session.user_id && s.is_active(now))
            .cloned()
            .collect();
        let evicted = select_evictions(&active, limit);

        if !evicted.is_empty() {
            let mut failing = self.failing_evictions.lock().await;
            if *failing > 0 {
                *failing -= 1;
                return Err(AppError::eviction("Failed to evict sessions over the limit", sqlx::Error::PoolTimedOut));
            }
        }

        let mut revoked = Vec::with_capacity(evicted.len());
        for victim in &evicted {
            if let Some(session) = sessions.get_mut(&victim.id) {
                Self::revoke(session, RevokedReason::SessionLimitExceeded, now);
                revoked.push(session.clone());
            }
        }

        let session = new_session.clone().into_session();
        sessions.insert(session.id, session.clone());

        Ok(SessionAdmission { session, evicted: revoked })
    }

    async fn rotate_session(&self, predecessor_id: &Uuid, successor: &NewSession) -> Result<RotationOutcome, AppError> {
        let now = successor.issued_at;
        let mut sessions = self.sessions.lock().await;

        let predecessor = match sessions.get_mut(predecessor_id) {
            None => return Ok(RotationOutcome::NotFound),
            Some(session) if session.revoked => return Ok(RotationOutcome::AlreadyRevoked(session.clone())),
            Some(session) if session.refresh_expired(now) => return Ok(RotationOutcome::Expired(session.clone())),
            Some(session) => {
                Self::revoke(session, RevokedReason::RefreshRotation, now);
                session.clone()
            }
        };

        let successor = successor.clone().into_session();
        sessions.insert(successor.id, successor.clone());

        Ok(RotationOutcome::Rotated { predecessor, successor })
    }

    async fn find_by_access_hash(&self, hash: &str) -> Result<Option<Session>, AppError> {
        Ok(self.sessions.lock().await.values().find(|s| s.access_token_hash == hash).cloned())
    }

    async fn find_by_refresh_hash(&self, hash: &str) -> Result<Option<Session>, AppError> {
        Ok(self.sessions.lock().await.values().find(|s| s.refresh_token_hash == hash).cloned())
    }

    async fn get_session(&self, id: &Uuid) -> Result<Option<Session>, AppError> {
        Ok(self.get(id).await)
    }

    async fn list_active_sessions(&self, user_id: &Uuid, now: DateTime<Utc>) -> Result<Vec<Session>, AppError> {
        let mut active: Vec<Session> = self
            .sessions
            .lock()
            .await
            .values()
            .filter(|s| &s.user_id == user_id && s.is_active(now))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.issued_at.cmp(&a.issued_at).then(a.id.cmp(&b.id)));
        Ok(active)
    }

    async fn revoke_session(&self, id: &Uuid, reason: RevokedReason, now: DateTime<Utc>) -> Result<Option<Session>, AppError> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(id) {
            Some(session) if !session.revoked => {
                Self::revoke(session, reason, now);
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn revoke_all_except(&self, user_id: &Uuid, keep: Option<&Uuid>, reason: RevokedReason, now: DateTime<Utc>) -> Result<Vec<Session>, AppError> {
        let mut sessions = self.sessions.lock().await;
        let mut revoked = Vec::new();
        for session in sessions.values_mut() {
            if &session.user_id == user_id && session.is_active(now) && Some(&session.id) != keep {
                Self::revoke(session, reason, now);
                revoked.push(session.clone());
            }
        }
        Ok(revoked)
    }
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: AsyncMutex<Vec<User>>,
}

impl InMemoryUserDirectory {
    pub async fn add_user(&self, email: &str, password: &str, role: Role, is_active: bool) -> User {
        self.insert(email, password, role, Uuid::new_v4(), is_active).await
    }

    pub async fn add_user_in(&self, email: &str, password: &str, role: Role, tenant_id: Uuid) -> User {
        self.insert(email, password, role, tenant_id, true).await
    }

    async fn insert(&self, email: &str, password: &str, role: Role, tenant_id: Uuid, is_active: bool) -> User {
        let user = User {
            id: Uuid::new_v4(),
            name: email.split('@').next().unwrap_or(email).to_string(),
            email: email.to_string(),
            password_hash: hash_password(password),
            role,
            tenant_id,
            is_active,
        };
        self.users.lock().await.push(user.clone());
        user
    }
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .users
            .lock()
            .await
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn get_user_by_id(&self, id: &Uuid) -> Result<Option<User>, AppError> {
        Ok(self.users.lock().await.iter().find(|u| &u.id == id).cloned())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(NotificationRecipient, SessionMeta, usize)>>,
}

impl RecordingNotifier {
    pub fn calls(&self) -> Vec<(NotificationRecipient, SessionMeta, usize)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_session_eviction(&self, user: &NotificationRecipient, new_session: &SessionMeta, evicted_count: usize) -> Result<(), AppError> {
        self.calls.lock().unwrap().push((user.clone(), new_session.clone(), evicted_count));
        Ok(())
    }
}

pub struct FailingNotifier;

#[async_trait::async_trait]
impl Notifier for FailingNotifier {
    async fn notify_session_eviction(&self, _user: &NotificationRecipient, _new_session: &SessionMeta, _evicted_count: usize) -> Result<(), AppError> {
        Err(AppError::NotificationFailure("smtp unavailable".to_string()))
    }
}

#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.event_type).collect()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl AuditSink for RecordingAuditSink {
    async fn emit(&self, event: &AuditEvent) -> Result<(), AppError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Every service wired over in-memory collaborators.
pub struct Harness {
    pub codec: TokenCodec,
    pub store: Arc<InMemorySessionStore>,
    pub users: Arc<InMemoryUserDirectory>,
    pub notifier: Arc<RecordingNotifier>,
    pub audit: Arc<RecordingAuditSink>,
    pub metrics: SessionMetrics,
    pub auth: AuthService,
    pub validator: TokenValidator,
    pub rotator: RefreshRotator,
    pub revocation: RevocationService,
}

impl Harness {
    pub async fn new(limit: u32) -> Self {
        Self::with_session_config(SessionConfig {
            max_active_sessions: limit,
            ..SessionConfig::default()
        })
        .await
    }

    pub async fn with_session_config(config: SessionConfig) -> Self {
        let codec = TokenCodec::new(&TokenConfig::default());
        let store = Arc::new(InMemorySessionStore::default());
        let users = Arc::new(InMemoryUserDirectory::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let audit = Arc::new(RecordingAuditSink::default());
        let metrics = SessionMetrics::new().unwrap();
        let events = EventDispatcher::spawn(notifier.clone(), audit.clone(), &EventsConfig::default(), metrics.clone());

        let services = SessionServices::build(
            codec.clone(),
            store.clone(),
            users.clone(),
            events,
            metrics.clone(),
            &config,
        );

        Self {
            codec,
            store,
            users,
            notifier,
            audit,
            metrics,
            auth: services.auth,
            validator: services.validator,
            rotator: services.rotator,
            revocation: services.revocation,
        }
    }

    /// Same wiring again, for mounting into a Rocket instance.
    pub fn services(&self) -> SessionServices {
        SessionServices {
            auth: self.auth.clone(),
            validator: self.validator.clone(),
            rotator: self.rotator.clone(),
            revocation: self.revocation.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Local client over the full API, swagger off, mounted at the default base path.
    pub async fn client(&self) -> Client {
        let rocket = crate::mount_api(self.services().manage(rocket::build()), DEFAULT_API_BASE_PATH, false);
        Client::tracked(rocket).await.unwrap()
    }

    /// Adds an active driver in a fresh tenant.
    pub async fn add_user(&self, email: &str, password: &str) -> User {
        self.users.add_user(email, password, Role::Driver, true).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AppError> {
        self.auth.login(email, password, ClientContext::default()).await
    }

    pub async fn session_for(&self, access_token: &str) -> Session {
        self.store
            .find_by_access_hash(&TokenCodec::hash_token(access_token))
            .await
            .unwrap()
            .unwrap()
    }
}

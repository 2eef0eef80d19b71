use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::session::{NewSession, RevokedReason, RotationOutcome, Session, SessionAdmission};
use crate::service::session_limiter::select_evictions;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, user_id, access_token_hash, refresh_token_hash, issued_at, access_expires_at, refresh_expires_at, \
                               ip_address, user_agent, revoked, revoked_at, revoked_reason";

/// Durable record of every issued session.
///
/// `admit_session`, `rotate_session` and `revoke_all_except` are each one
/// unit of work serialized per `user_id`; implementations must hold that
/// guarantee across processes, not only inside one.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Count live sessions, revoke the oldest ones beyond `limit - 1` and insert `new_session`.
    async fn admit_session(&self, new_session: &NewSession, limit: usize) -> Result<SessionAdmission, AppError>;
    /// Revoke `predecessor_id` with `refresh_rotation` and insert `successor`, unless the predecessor is already dead.
    async fn rotate_session(&self, predecessor_id: &Uuid, successor: &NewSession) -> Result<RotationOutcome, AppError>;
    async fn find_by_access_hash(&self, hash: &str) -> Result<Option<Session>, AppError>;
    async fn find_by_refresh_hash(&self, hash: &str) -> Result<Option<Session>, AppError>;
    async fn get_session(&self, id: &Uuid) -> Result<Option<Session>, AppError>;
    async fn list_active_sessions(&self, user_id: &Uuid, now: DateTime<Utc>) -> Result<Vec<Session>, AppError>;
    /// Returns the revoked row, or `None` when nothing changed (unknown or already revoked).
    async fn revoke_session(&self, id: &Uuid, reason: RevokedReason, now: DateTime<Utc>) -> Result<Option<Session>, AppError>;
    async fn revoke_all_except(&self, user_id: &Uuid, keep: Option<&Uuid>, reason: RevokedReason, now: DateTime<Utc>) -> Result<Vec<Session>, AppError>;
}

/// Serializes concurrent units of work for one user until the transaction ends.
async fn lock_user(tx: &mut Transaction<'_, Postgres>, user_id: &Uuid) -> Result<(), AppError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(user_id.to_string())
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::db("Failed to take per-user session lock", e))?;
    Ok(())
}

async fn insert_session(tx: &mut Transaction<'_, Postgres>, new_session: &NewSession) -> Result<Session, AppError> {
    let session = sqlx::query_as::<_, Session>(&format!(
        r#"
        INSERT INTO user_session (id, user_id, access_token_hash, refresh_token_hash, issued_at, access_expires_at, refresh_expires_at, ip_address, user_agent)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {SESSION_COLUMNS}
        "#
    ))
    .bind(new_session.id)
    .bind(new_session.user_id)
    .bind(&new_session.access_token_hash)
    .bind(&new_session.refresh_token_hash)
    .bind(new_session.issued_at)
    .bind(new_session.access_expires_at)
    .bind(new_session.refresh_expires_at)
    .bind(&new_session.client.ip_address)
    .bind(&new_session.client.user_agent)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| AppError::db("Failed to insert session", e))?;

    Ok(session)
}

#[async_trait::async_trait]
impl SessionStore for PostgresRepository {
    async fn admit_session(&self, new_session: &NewSession, limit: usize) -> Result<SessionAdmission, AppError> {
        let now = new_session.issued_at;
        let mut tx = self.pool.begin().await?;
        lock_user(&mut tx, &new_session.user_id).await?;

        let active = sqlx::query_as::<_, Session>(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM user_session
            WHERE user_id = $1
              AND revoked = false
              AND refresh_expires_at > $2
            ORDER BY issued_at, id
            "#
        ))
        .bind(new_session.user_id)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let to_evict: Vec<Uuid> = select_evictions(&active, limit).iter().map(|s| s.id).collect();
        let mut evicted = Vec::new();
        if !to_evict.is_empty() {
            evicted = sqlx::query_as::<_, Session>(&format!(
                r#"
                UPDATE user_session
                SET revoked = true, revoked_at = $2, revoked_reason = $3
                WHERE id = ANY($1)
                  AND revoked = false
                RETURNING {SESSION_COLUMNS}
                "#
            ))
            .bind(&to_evict)
            .bind(now)
            .bind(RevokedReason::SessionLimitExceeded)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| AppError::eviction("Failed to evict sessions over the limit", e))?;
            evicted.sort_by(|a, b| (a.issued_at, a.id).cmp(&(b.issued_at, b.id)));
        }

        let session = insert_session(&mut tx, new_session).await?;
        tx.commit().await?;

        Ok(SessionAdmission { session, evicted })
    }

    async fn rotate_session(&self, predecessor_id: &Uuid, successor: &NewSession) -> Result<RotationOutcome, AppError> {
        let now = successor.issued_at;
        let mut tx = self.pool.begin().await?;
        lock_user(&mut tx, &successor.user_id).await?;

        let current = sqlx::query_as::<_, Session>(&format!("SELECT {SESSION_COLUMNS} FROM user_session WHERE id = $1 FOR UPDATE"))
            .bind(predecessor_id)
            .fetch_optional(&mut *tx)
            .await?;

        let current = match current {
            None => return Ok(RotationOutcome::NotFound),
            Some(session) if session.revoked => return Ok(RotationOutcome::AlreadyRevoked(session)),
            Some(session) if session.refresh_expired(now) => return Ok(RotationOutcome::Expired(session)),
            Some(session) => session,
        };

        let predecessor = sqlx::query_as::<_, Session>(&format!(
            r#"
            UPDATE user_session
            SET revoked = true, revoked_at = $2, revoked_reason = $3
            WHERE id = $1
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(current.id)
        .bind(now)
        .bind(RevokedReason::RefreshRotation)
        .fetch_one(&mut *tx)
        .await?;

        let successor = insert_session(&mut tx, successor).await?;
        tx.commit().await?;

        Ok(RotationOutcome::Rotated { predecessor, successor })
    }

    async fn find_by_access_hash(&self, hash: &str) -> Result<Option<Session>, AppError> {
        let session = sqlx::query_as::<_, Session>(&format!("SELECT {SESSION_COLUMNS} FROM user_session WHERE access_token_hash = $1"))
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    async fn find_by_refresh_hash(&self, hash: &str) -> Result<Option<Session>, AppError> {
        let session = sqlx::query_as::<_, Session>(&format!("SELECT {SESSION_COLUMNS} FROM user_session WHERE refresh_token_hash = $1"))
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    async fn get_session(&self, id: &Uuid) -> Result<Option<Session>, AppError> {
        let session = sqlx::query_as::<_, Session>(&format!("SELECT {SESSION_COLUMNS} FROM user_session WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    async fn list_active_sessions(&self, user_id: &Uuid, now: DateTime<Utc>) -> Result<Vec<Session>, AppError> {
        let sessions = sqlx::query_as::<_, Session>(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM user_session
            WHERE user_id = $1
              AND revoked = false
              AND refresh_expires_at > $2
            ORDER BY issued_at DESC, id
            "#
        ))
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    async fn revoke_session(&self, id: &Uuid, reason: RevokedReason, now: DateTime<Utc>) -> Result<Option<Session>, AppError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            UPDATE user_session
            SET revoked = true, revoked_at = $2, revoked_reason = $3
            WHERE id = $1
              AND revoked = false
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn revoke_all_except(&self, user_id: &Uuid, keep: Option<&Uuid>, reason: RevokedReason, now: DateTime<Utc>) -> Result<Vec<Session>, AppError> {
        let mut tx = self.pool.begin().await?;
        lock_user(&mut tx, user_id).await?;

        let revoked = sqlx::query_as::<_, Session>(&format!(
            r#"
            UPDATE user_session
            SET revoked = true, revoked_at = $3, revoked_reason = $4
            WHERE user_id = $1
              AND revoked = false
              AND refresh_expires_at > $3
              AND ($2::uuid IS NULL OR id <> $2)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(keep.copied())
        .bind(now)
        .bind(reason)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(revoked)
    }
}

/// Bounds every call on the wrapped store with a deadline so a store outage
/// surfaces as `StoreTimeout` instead of a hung request.
#[derive(Clone)]
pub struct DeadlineSessionStore {
    inner: Arc<dyn SessionStore>,
    timeout: Duration,
}

impl DeadlineSessionStore {
    pub fn new(inner: Arc<dyn SessionStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn within<T>(&self, fut: impl Future<Output = Result<T, AppError>> + Send) -> Result<T, AppError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                tracing::error!(timeout_ms, "session store call timed out");
                Err(AppError::StoreTimeout { timeout_ms })
            }
        }
    }
}

#[async_trait::async_trait]
impl SessionStore for DeadlineSessionStore {
    async fn admit_session(&self, new_session: &NewSession, limit: usize) -> Result<SessionAdmission, AppError> {
        self.within(self.inner.admit_session(new_session, limit)).await
    }

    async fn rotate_session(&self, predecessor_id: &Uuid, successor: &NewSession) -> Result<RotationOutcome, AppError> {
        self.within(self.inner.rotate_session(predecessor_id, successor)).await
    }

    async fn find_by_access_hash(&self, hash: &str) -> Result<Option<Session>, AppError> {
        self.within(self.inner.find_by_access_hash(hash)).await
    }

    async fn find_by_refresh_hash(&self, hash: &str) -> Result<Option<Session>, AppError> {
        self.within(self.inner.find_by_refresh_hash(hash)).await
    }

    async fn get_session(&self, id: &Uuid) -> Result<Option<Session>, AppError> {
        self.within(self.inner.get_session(id)).await
    }

    async fn list_active_sessions(&self, user_id: &Uuid, now: DateTime<Utc>) -> Result<Vec<Session>, AppError> {
        self.within(self.inner.list_active_sessions(user_id, now)).await
    }

    async fn revoke_session(&self, id: &Uuid, reason: RevokedReason, now: DateTime<Utc>) -> Result<Option<Session>, AppError> {
        self.within(self.inner.revoke_session(id, reason, now)).await
    }

    async fn revoke_all_except(&self, user_id: &Uuid, keep: Option<&Uuid>, reason: RevokedReason, now: DateTime<Utc>) -> Result<Vec<Session>, AppError> {
        self.within(self.inner.revoke_all_except(user_id, keep, reason, now)).await
    }
}

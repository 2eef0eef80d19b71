use crate::database::session::SessionStore;
use crate::error::app_error::AppError;
use crate::models::audit::{AuditEvent, audit_events};
use crate::models::session::{NewSession, Session, SessionAdmission};
use crate::service::events::{EventDispatcher, NotificationRecipient, SessionMeta};
use crate::service::metrics::SessionMetrics;
use std::sync::Arc;

/// Picks the live sessions to revoke so that one more can be inserted
/// without exceeding `limit`.
///
/// Oldest `issued_at` goes first; equal timestamps fall back to the lowest id.
/// Callers must pass only active sessions of a single user.
pub fn select_evictions(active: &[Session], limit: usize) -> Vec<Session> {
    let keep = limit.saturating_sub(1);
    if active.len() <= keep {
        return Vec::new();
    }

    let mut ordered: Vec<&Session> = active.iter().collect();
    ordered.sort_by(|a, b| (a.issued_at, a.id).cmp(&(b.issued_at, b.id)));
    ordered.into_iter().take(active.len() - keep).cloned().collect()
}

/// Admits new sessions under the per-user limit and reports what it evicted.
#[derive(Clone)]
pub struct SessionLimiter {
    store: Arc<dyn SessionStore>,
    limit: usize,
    events: EventDispatcher,
    metrics: SessionMetrics,
}

impl SessionLimiter {
    pub fn new(store: Arc<dyn SessionStore>, limit: usize, events: EventDispatcher, metrics: SessionMetrics) -> Self {
        Self {
            store,
            limit: limit.max(1),
            events,
            metrics,
        }
    }

    /// Count, evict and insert as one unit of work in the store. An eviction
    /// failure is retried once before surfacing.
    pub async fn admit(&self, recipient: &NotificationRecipient, new_session: &NewSession) -> Result<SessionAdmission, AppError> {
        let admission = match self.store.admit_session(new_session, self.limit).await {
            Err(AppError::LimitEvictionFailure { message, source }) => {
                tracing::warn!(user_id = %new_session.user_id, error = %source, "{}; retrying once", message);
                self.store.admit_session(new_session, self.limit).await?
            }
            other => other?,
        };

        if !admission.evicted.is_empty() {
            self.report_evictions(recipient, &admission);
        }

        Ok(admission)
    }

    fn report_evictions(&self, recipient: &NotificationRecipient, admission: &SessionAdmission) {
        let evicted_count = admission.evicted.len();
        self.metrics.record_events("session_evicted", evicted_count as u64);

        for evicted in &admission.evicted {
            tracing::info!(
                user_id = %evicted.user_id,
                session_id = %evicted.id,
                replaced_by = %admission.session.id,
                "session evicted: limit exceeded"
            );
            self.events.audit(
                AuditEvent::new(audit_events::SESSION_EVICTED, true)
                    .user(evicted.user_id)
                    .session(evicted.id)
                    .metadata(serde_json::json!({
                        "reason": "session_limit_exceeded",
                        "replaced_by": admission.session.id,
                        "limit": self.limit,
                    })),
            );
        }

        self.events
            .notify_eviction(recipient.clone(), SessionMeta::from(&admission.session), evicted_count);
    }
}

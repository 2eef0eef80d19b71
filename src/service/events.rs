use crate::config::EventsConfig;
use crate::error::app_error::AppError;
use crate::models::audit::AuditEvent;
use crate::models::session::Session;
use crate::service::metrics::SessionMetrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Who receives an eviction notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecipient {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
}

/// Metadata of the session whose creation caused the eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMeta {
    pub session_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl From<&Session> for SessionMeta {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id,
            issued_at: session.issued_at,
            ip_address: session.ip_address.clone(),
            user_agent: session.user_agent.clone(),
        }
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_session_eviction(&self, user: &NotificationRecipient, new_session: &SessionMeta, evicted_count: usize) -> Result<(), AppError>;
}

#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, event: &AuditEvent) -> Result<(), AppError>;
}

/// Notifier used when no outbound channel is configured.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify_session_eviction(&self, user: &NotificationRecipient, new_session: &SessionMeta, evicted_count: usize) -> Result<(), AppError> {
        tracing::info!(
            user_id = %user.user_id,
            session_id = %new_session.session_id,
            ip = new_session.ip_address.as_deref().unwrap_or("-"),
            evicted_count,
            "session eviction notice (no delivery channel configured)"
        );
        Ok(())
    }
}

enum Job {
    Eviction {
        user: NotificationRecipient,
        new_session: SessionMeta,
        evicted_count: usize,
    },
    Audit(AuditEvent),
}

/// Bounded, fire-and-forget queue in front of the notifier and the audit sink.
///
/// Enqueueing never blocks and never fails the caller: a full queue drops
/// the job with a warning. A single worker task delivers jobs, each bounded
/// by the configured delivery timeout; failures are logged and discarded.
#[derive(Clone)]
pub struct EventDispatcher {
    sender: mpsc::Sender<Job>,
    metrics: SessionMetrics,
}

impl EventDispatcher {
    /// Must be called from within a Tokio runtime.
    pub fn spawn(notifier: Arc<dyn Notifier>, audit_sink: Arc<dyn AuditSink>, config: &EventsConfig, metrics: SessionMetrics) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let timeout = Duration::from_millis(config.delivery_timeout_ms);
        tokio::spawn(run_worker(receiver, notifier, audit_sink, timeout));

        Self { sender, metrics }
    }

    pub fn notify_eviction(&self, user: NotificationRecipient, new_session: SessionMeta, evicted_count: usize) {
        self.enqueue(Job::Eviction {
            user,
            new_session,
            evicted_count,
        });
    }

    pub fn audit(&self, event: AuditEvent) {
        self.enqueue(Job::Audit(event));
    }

    fn enqueue(&self, job: Job) {
        match self.sender.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                self.metrics.record_event("event_dropped");
                tracing::warn!(job = job.label(), "event queue full, dropping job");
            }
            Err(TrySendError::Closed(job)) => {
                self.metrics.record_event("event_dropped");
                tracing::warn!(job = job.label(), "event worker stopped, dropping job");
            }
        }
    }
}

impl Job {
    fn label(&self) -> &'static str {
        match self {
            Job::Eviction { .. } => "eviction_notice",
            Job::Audit(event) => event.event_type,
        }
    }
}

async fn run_worker(mut receiver: mpsc::Receiver<Job>, notifier: Arc<dyn Notifier>, audit_sink: Arc<dyn AuditSink>, timeout: Duration) {
    while let Some(job) = receiver.recv().await {
        let label = job.label();
        let outcome = match job {
            Job::Eviction {
                user,
                new_session,
                evicted_count,
            } => deliver(timeout, notifier.notify_session_eviction(&user, &new_session, evicted_count), AppError::NotificationFailure).await,
            Job::Audit(event) => deliver(timeout, audit_sink.emit(&event), AppError::AuditEmitFailure).await,
        };

        if let Err(e) = outcome {
            tracing::warn!(job = label, error = %e, kind = e.kind(), "best-effort delivery failed");
        }
    }
    tracing::debug!("event worker stopped");
}

async fn deliver<F>(timeout: Duration, fut: F, on_timeout: fn(String) -> AppError) -> Result<(), AppError>
where
    F: std::future::Future<Output = Result<(), AppError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(format!("timed out after {}ms", timeout.as_millis()))),
    }
}

use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::audit::AuditEvent;
use crate::service::events::AuditSink;

/// Writes every event to `security_audit_log` and mirrors it to tracing.
#[async_trait::async_trait]
impl AuditSink for PostgresRepository {
    async fn emit(&self, event: &AuditEvent) -> Result<(), AppError> {
        let uid_str = event.user_id.map(|u| u.to_string());
        let sid_str = event.session_id.map(|s| s.to_string());
        if event.success {
            tracing::info!(
                category = "audit",
                event_type = event.event_type,
                user_id = uid_str.as_deref().unwrap_or("-"),
                session_id = sid_str.as_deref().unwrap_or("-"),
                ip = event.ip_address.as_deref().unwrap_or("-"),
                "security audit event"
            );
        } else {
            tracing::warn!(
                category = "audit",
                event_type = event.event_type,
                user_id = uid_str.as_deref().unwrap_or("-"),
                session_id = sid_str.as_deref().unwrap_or("-"),
                ip = event.ip_address.as_deref().unwrap_or("-"),
                user_agent = event.user_agent.as_deref().unwrap_or("-"),
                "security audit event (failure)"
            );
        }

        sqlx::query(
            r#"
            INSERT INTO security_audit_log (user_id, session_id, event_type, success, ip_address, user_agent, metadata, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.user_id)
        .bind(event.session_id)
        .bind(event.event_type)
        .bind(event.success)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&event.metadata)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::AuditEmitFailure(e.to_string()))?;

        Ok(())
    }
}

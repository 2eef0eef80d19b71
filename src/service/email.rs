use crate::config::EmailConfig;
use crate::error::app_error::AppError;
use crate::service::events::{NotificationRecipient, Notifier, SessionMeta};
use lettre::message::header::ContentType;
use lettre::message::{MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Sends "new sign-in" notices when older sessions were signed out to make room.
pub struct EmailNotifier {
    config: EmailConfig,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| AppError::NotificationFailure(format!("Failed to create SMTP transport: {}", e)))?
            .credentials(creds)
            .port(config.smtp_port)
            .build();

        Ok(Self { config, mailer })
    }

    fn subject(evicted_count: usize) -> String {
        if evicted_count == 1 {
            "New sign-in: one older session was signed out".to_string()
        } else {
            format!("New sign-in: {} older sessions were signed out", evicted_count)
        }
    }

    fn eviction_text(user: &NotificationRecipient, new_session: &SessionMeta, evicted_count: usize) -> String {
        format!(
            r#"Hi {},

Your account was just signed in from a new device.

When: {}
IP address: {}
Device: {}

To stay within the limit of active sessions, {} older session(s) were signed out.

If this was not you, sign in and revoke all other sessions, then change your password.
"#,
            user.name,
            new_session.issued_at.format("%Y-%m-%d %H:%M UTC"),
            new_session.ip_address.as_deref().unwrap_or("unknown"),
            new_session.user_agent.as_deref().unwrap_or("unknown"),
            evicted_count
        )
    }

    fn eviction_html(user: &NotificationRecipient, new_session: &SessionMeta, evicted_count: usize) -> String {
        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>New sign-in</title></head>
<body style="font-family: -apple-system, 'Segoe UI', Roboto, Arial, sans-serif; color: #141517;">
  <p>Hi {},</p>
  <p>Your account was just signed in from a new device.</p>
  <table cellpadding="4">
    <tr><td><strong>When</strong></td><td>{}</td></tr>
    <tr><td><strong>IP address</strong></td><td>{}</td></tr>
    <tr><td><strong>Device</strong></td><td>{}</td></tr>
  </table>
  <p>To stay within the limit of active sessions, <strong>{}</strong> older session(s) were signed out.</p>
  <p>If this was not you, sign in and revoke all other sessions, then change your password.</p>
</body>
</html>
"#,
            html_escape(&user.name),
            new_session.issued_at.format("%Y-%m-%d %H:%M UTC"),
            html_escape(new_session.ip_address.as_deref().unwrap_or("unknown")),
            html_escape(new_session.user_agent.as_deref().unwrap_or("unknown")),
            evicted_count
        )
    }
}

fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    async fn notify_session_eviction(&self, user: &NotificationRecipient, new_session: &SessionMeta, evicted_count: usize) -> Result<(), AppError> {
        let email = Message::builder()
            .from(
                format!("{} <{}>", self.config.from_name, self.config.from_address)
                    .parse()
                    .map_err(|e| AppError::NotificationFailure(format!("Invalid from address: {}", e)))?,
            )
            .to(user
                .email
                .parse()
                .map_err(|e| AppError::NotificationFailure(format!("Invalid to address: {}", e)))?)
            .subject(Self::subject(evicted_count))
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(Self::eviction_text(user, new_session, evicted_count)),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(Self::eviction_html(user, new_session, evicted_count)),
                    ),
            )
            .map_err(|e| AppError::NotificationFailure(format!("Failed to build email: {}", e)))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| AppError::NotificationFailure(format!("Failed to send email: {}", e)))?;

        tracing::info!(user_id = %user.user_id, evicted_count, "eviction notice sent");
        Ok(())
    }
}

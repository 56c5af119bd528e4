//! SMTP email notifications

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::alerting::Notification;
use crate::config::EmailConfig;
use crate::error::{Error, Result};

use super::{Channel, ChannelError, ChannelKind};

/// Implicit-TLS SMTP port
const SMTPS_PORT: u16 = 465;

/// Email channel over an async SMTP transport
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailChannel {
    /// Create from configuration; addresses are parsed up front
    pub fn new(config: &EmailConfig) -> Result<Self> {
        if config.smtp_host.trim().is_empty() {
            return Err(Error::channel("email: smtp_host is required"));
        }
        if config.to.is_empty() {
            return Err(Error::channel("email: at least one recipient is required"));
        }

        let from = parse_mailbox(&config.from)?;
        let to = config
            .to
            .iter()
            .map(|addr| parse_mailbox(addr))
            .collect::<Result<Vec<_>>>()?;

        let relay = if config.smtp_port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        } else if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        } else {
            Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                &config.smtp_host,
            ))
        };
        let mut builder = relay
            .map_err(|e| Error::channel(format!("email: invalid SMTP relay: {e}")))?
            .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }

    fn subject(notification: &Notification) -> String {
        let alert = &notification.alert;
        format!(
            "[poolwatch][{}] {} - {}/{}",
            alert.severity,
            notification.headline(),
            alert.target_name,
            alert.rule_name
        )
    }

    fn body(notification: &Notification) -> String {
        let alert = &notification.alert;
        let mut body = format!(
            "Rule: {rule}\nSeverity: {severity}\nStatus: {status}\nTarget: {target}\nInstance: {instance}\nMessage: {message}\nFired At: {fired}",
            rule = alert.rule_name,
            severity = alert.severity,
            status = alert.status.as_str(),
            target = alert.target_name,
            instance = alert.instance_name,
            message = alert.message,
            fired = alert.fired_at.to_rfc3339(),
        );
        if let Some(resolved_at) = alert.resolved_at {
            body.push_str(&format!("\nResolved At: {}", resolved_at.to_rfc3339()));
        }
        body
    }

    fn message(&self, notification: &Notification) -> std::result::Result<Message, ChannelError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(Self::subject(notification))
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }

        builder
            .body(Self::body(notification))
            .map_err(|e| ChannelError::Email(e.to_string()))
    }
}

fn parse_mailbox(raw: &str) -> Result<Mailbox> {
    raw.trim()
        .parse()
        .map_err(|e| Error::channel(format!("email: invalid address '{raw}': {e}")))
}

#[async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, notification: &Notification) -> std::result::Result<(), ChannelError> {
        let message = self.message(notification)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| ChannelError::Email(e.to_string()))?;

        info!(
            rule = %notification.alert.rule_name,
            recipients = self.to.len(),
            "Email notification sent"
        );
        Ok(())
    }
}

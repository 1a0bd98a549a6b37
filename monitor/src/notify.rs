//! Notification delivery
//!
//! The monitor only needs "send this subject and body to these people".
//! [`SmtpNotifier`] does that over STARTTLS with `lettre`; [`LogNotifier`]
//! writes the message to the log instead, for dry runs and hosts without a
//! relay.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{error, info, warn};

use crate::alert::{Notification, Severity};
use crate::config::SmtpConfig;
use crate::error::{DeliveryError, DeliveryResult};

/// Transport for notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipients: &[String], notification: &Notification) -> DeliveryResult<()>;
}

/// Sends notifications as plain-text email through an SMTP relay
pub struct SmtpNotifier {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    timeout: Duration,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> DeliveryResult<Self> {
        let from = parse_mailbox(&config.from_address)?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| DeliveryError::Transport(e.to_string()))?
            .port(config.port);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            from,
            transport: builder.build(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn build_message(&self, recipients: &[String], notification: &Notification) -> DeliveryResult<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(notification.subject.clone())
            .header(ContentType::TEXT_PLAIN);

        for recipient in recipients {
            builder = builder.to(parse_mailbox(recipient)?);
        }

        builder
            .body(notification.body())
            .map_err(|e| DeliveryError::Build(e.to_string()))
    }
}

fn parse_mailbox(address: &str) -> DeliveryResult<Mailbox> {
    address.parse().map_err(|e: lettre::address::AddressError| DeliveryError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, recipients: &[String], notification: &Notification) -> DeliveryResult<()> {
        if recipients.is_empty() {
            return Err(DeliveryError::NoRecipients);
        }

        let message = self.build_message(recipients, notification)?;

        match tokio::time::timeout(self.timeout, self.transport.send(message)).await {
            Ok(Ok(_)) => {
                info!(
                    subject = %notification.subject,
                    recipients = recipients.len(),
                    "Notification email sent"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(DeliveryError::Transport(e.to_string())),
            Err(_) => Err(DeliveryError::Timeout {
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

/// Writes notifications to the log instead of delivering them
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipients: &[String], notification: &Notification) -> DeliveryResult<()> {
        let body = notification.body();
        match notification.severity {
            Some(Severity::Critical) => error!(
                subject = %notification.subject,
                recipients = ?recipients,
                "Notification (not sent):\n{}",
                body
            ),
            Some(Severity::Warning) => warn!(
                subject = %notification.subject,
                recipients = ?recipients,
                "Notification (not sent):\n{}",
                body
            ),
            None => info!(
                subject = %notification.subject,
                recipients = ?recipients,
                "Notification (not sent):\n{}",
                body
            ),
        }
        Ok(())
    }
}

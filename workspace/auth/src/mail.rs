//! Outgoing mail.
//!
//! Delivery itself is someone else's job; this module only defines the
//! [`Mailer`] seam plus two implementations: an in-memory outbox for tests
//! and a mailer that writes messages to the log.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::MailError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub subject: String,
    pub body: String,
    pub from_email: String,
    pub to: Vec<String>,
    pub html_message: Option<String>,
}

/// Delivery options accepted by [`send_mail`].
#[derive(Debug, Clone, Default)]
pub struct MailOptions {
    pub html_message: Option<String>,
    /// Swallow delivery errors instead of returning them.
    pub fail_silently: bool,
}

#[async_trait]
pub trait Mailer: Send + Sync + std::fmt::Debug {
    /// Sender used when the caller does not name one.
    fn default_from_email(&self) -> &str;

    async fn send(&self, message: EmailMessage) -> Result<(), MailError>;
}

/// Build a message and hand it to `mailer`.
pub async fn send_mail(
    mailer: &dyn Mailer,
    subject: &str,
    message: &str,
    from_email: Option<&str>,
    recipients: &[String],
    options: MailOptions,
) -> Result<(), MailError> {
    if recipients.is_empty() {
        return Err(MailError::NoRecipients);
    }

    let email = EmailMessage {
        subject: subject.to_string(),
        body: message.to_string(),
        from_email: from_email
            .unwrap_or_else(|| mailer.default_from_email())
            .to_string(),
        to: recipients.to_vec(),
        html_message: options.html_message,
    };

    match mailer.send(email).await {
        Err(e) if options.fail_silently => {
            warn!("Ignoring mail delivery failure: {}", e);
            Ok(())
        }
        other => other,
    }
}

/// Keeps every message in memory.
#[derive(Debug, Clone)]
pub struct LocmemMailer {
    default_from_email: String,
    outbox: Arc<Mutex<Vec<EmailMessage>>>,
}

impl LocmemMailer {
    pub fn new(default_from_email: impl Into<String>) -> Self {
        Self {
            default_from_email: default_from_email.into(),
            outbox: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Snapshot of the messages sent so far.
    pub fn outbox(&self) -> Vec<EmailMessage> {
        self.outbox
            .lock()
            .map(|outbox| outbox.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for LocmemMailer {
    fn default_from_email(&self) -> &str {
        &self.default_from_email
    }

    async fn send(&self, message: EmailMessage) -> Result<(), MailError> {
        self.outbox
            .lock()
            .map_err(|e| MailError::Transport(e.to_string()))?
            .push(message);
        Ok(())
    }
}

/// Writes each message to the `info` log instead of delivering it.
#[derive(Debug, Clone)]
pub struct TracingMailer {
    default_from_email: String,
}

impl TracingMailer {
    pub fn new(default_from_email: impl Into<String>) -> Self {
        Self {
            default_from_email: default_from_email.into(),
        }
    }
}

#[async_trait]
impl Mailer for TracingMailer {
    fn default_from_email(&self) -> &str {
        &self.default_from_email
    }

    async fn send(&self, message: EmailMessage) -> Result<(), MailError> {
        info!(
            from = %message.from_email,
            to = ?message.to,
            subject = %message.subject,
            "{}",
            message.body
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct BrokenMailer;

    #[async_trait]
    impl Mailer for BrokenMailer {
        fn default_from_email(&self) -> &str {
            "webmaster@localhost"
        }

        async fn send(&self, _message: EmailMessage) -> Result<(), MailError> {
            Err(MailError::Transport("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_send_mail_uses_default_sender() {
        let mailer = LocmemMailer::new("webmaster@localhost");
        send_mail(
            &mailer,
            "Hi",
            "Body",
            None,
            &["to@example.com".to_string()],
            MailOptions::default(),
        )
        .await
        .unwrap();

        let outbox = mailer.outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].from_email, "webmaster@localhost");
        assert_eq!(outbox[0].to, vec!["to@example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_fail_silently() {
        let recipients = vec!["to@example.com".to_string()];
        let loud = send_mail(&BrokenMailer, "s", "m", None, &recipients, MailOptions::default()).await;
        assert!(matches!(loud, Err(MailError::Transport(_))));

        let quiet = MailOptions {
            fail_silently: true,
            ..Default::default()
        };
        assert!(send_mail(&BrokenMailer, "s", "m", None, &recipients, quiet).await.is_ok());
    }

    #[tokio::test]
    async fn test_no_recipients() {
        let mailer = LocmemMailer::new("webmaster@localhost");
        let result = send_mail(&mailer, "s", "m", None, &[], MailOptions::default()).await;
        assert_eq!(result, Err(MailError::NoRecipients));
    }
}

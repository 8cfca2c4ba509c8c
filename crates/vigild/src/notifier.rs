//! Alert delivery over SMTP.

use crate::config::SmtpConfig;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::path::Path;
use std::time::Duration;
use vigil_core::{Notification, Notifier, NotifyError};

/// Sends alerts as e-mail over implicit-TLS SMTP, bounded by a timeout.
pub struct SmtpNotifier {
    transport: SmtpTransport,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let from = parse_mailbox(&config.sender_email)?;
        let to = parse_mailbox(&config.receiver_email)?;
        let creds = Credentials::new(config.sender_email.clone(), config.sender_password.clone());

        let transport = SmtpTransport::relay(&config.smtp_server)
            .map_err(|e| NotifyError::Transport(e.to_string()))?
            .port(config.smtp_port)
            .credentials(creds)
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();

        tracing::info!(
            server = %config.smtp_server,
            port = config.smtp_port,
            to = %config.receiver_email,
            "SMTP notifier configured"
        );

        Ok(Self {
            transport,
            from,
            to,
        })
    }
}

impl Notifier for SmtpNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let email = build_message(&self.from, &self.to, notification)?;
        self.transport
            .send(&email)
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        tracing::info!(to = %self.to, "alert e-mail sent");
        Ok(())
    }
}

/// Stand-in used when no SMTP config is present. Every alert counts as
/// undelivered, so no cooldown is ever entered.
pub struct LogOnlyNotifier;

impl Notifier for LogOnlyNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::warn!(
            subject = %notification.subject,
            attachment = ?notification.attachment,
            "no SMTP config; alert not delivered"
        );
        Err(NotifyError::NotConfigured)
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address
        .parse()
        .map_err(|e| NotifyError::Message(format!("invalid address {address:?}: {e}")))
}

/// Build the alert e-mail. An unreadable attachment degrades to text-only.
pub fn build_message(
    from: &Mailbox,
    to: &Mailbox,
    notification: &Notification,
) -> Result<Message, NotifyError> {
    let builder = Message::builder()
        .from(from.clone())
        .to(to.clone())
        .subject(notification.subject.clone());
    let text = SinglePart::plain(notification.body.clone());

    let attachment = notification.attachment.as_deref().and_then(read_attachment);
    let message = match attachment {
        Some(image) => builder.multipart(MultiPart::mixed().singlepart(text).singlepart(image)),
        None => builder.singlepart(text),
    };
    message.map_err(|e| NotifyError::Message(e.to_string()))
}

fn read_attachment(path: &Path) -> Option<SinglePart> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "attachment unreadable; sending text only");
            return None;
        }
    };
    let subtype = match path.extension().and_then(|e| e.to_str()).map(str::to_lowercase) {
        Some(ext) if ext == "jpg" || ext.is_empty() => "jpeg".to_string(),
        Some(ext) => ext,
        None => "jpeg".to_string(),
    };
    let content_type = ContentType::parse(&format!("image/{subtype}")).ok()?;
    let filename = path.file_name()?.to_string_lossy().into_owned();
    Some(Attachment::new(filename).body(bytes, content_type))
}

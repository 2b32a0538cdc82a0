//! Send emails to user for important updates.

use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::Smtp;
use crate::error::Result;

/// SMTP mail manager.
///
/// An unconfigured manager silently drops every message, which keeps local
/// setups and tests working without a relay.
#[derive(Clone, Default)]
pub struct MailManager {
    from: Option<Mailbox>,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl MailManager {
    /// Create a new [`MailManager`] from SMTP configuration.
    pub fn new(config: &Smtp) -> Result<Self> {
        let credentials =
            Credentials::new(config.username.clone(), config.password.clone());

        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
                .credentials(credentials);
        if let Some(port) = config.port {
            builder = builder.port(port);
        }

        tracing::info!(host = config.host, "smtp relay configured");

        Ok(Self {
            from: Some(config.from.parse()?),
            transport: Some(builder.build()),
        })
    }

    /// Send an HTML mail to a single recipient.
    pub async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let (Some(from), Some(transport)) = (&self.from, &self.transport)
        else {
            tracing::debug!(%to, "mail transport not configured, skipping");
            return Ok(());
        };

        let message = Message::builder()
            .from(from.clone())
            .to(to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_owned())?;

        transport.send(message).await?;
        tracing::trace!(%to, "mail sent");

        Ok(())
    }
}

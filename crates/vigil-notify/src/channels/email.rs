use crate::error::{NotifyError, Result};
use crate::utils::html_to_text;
use crate::{EmailSettings, InlineImage};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

const IMPLICIT_TLS_PORT: u16 = 465;

pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailChannel {
    pub fn new(settings: &EmailSettings) -> Result<Self> {
        let smtp_err = |e: lettre::transport::smtp::Error| NotifyError::SmtpError(e.to_string());
        let builder = if !settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        } else if settings.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host).map_err(smtp_err)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host).map_err(smtp_err)?
        };
        let mut builder = builder.port(settings.port);

        if let (Some(user), Some(pass)) = (settings.username.as_deref(), settings.password.as_deref()) {
            if !user.is_empty() {
                builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
            }
        }

        Ok(Self {
            transport: builder.build(),
            from: sender_mailbox(settings)?,
        })
    }

    /// Sends one message to all recipients, retrying transport failures
    /// up to 3 times with exponential backoff.
    pub async fn send(
        &self,
        subject: &str,
        recipients: &[String],
        html: &str,
        inline_images: &[InlineImage],
    ) -> Result<()> {
        let email = build_message(&self.from, recipients, subject, html, inline_images)?;

        let mut last_err = None;
        for attempt in 0..3u32 {
            match self.transport.send(email.clone()).await {
                Ok(_) => {
                    last_err = None;
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        recipients = recipients.len(),
                        error = %e,
                        "Email send failed, retrying"
                    );
                    last_err = Some(e);
                    if attempt < 2 {
                        tokio::time::sleep(std::time::Duration::from_millis(100 * 2u64.pow(attempt)))
                            .await;
                    }
                }
            }
        }

        match last_err {
            Some(e) => {
                tracing::error!(error = %e, "Email send failed after 3 retries");
                Err(NotifyError::SmtpError(e.to_string()))
            }
            None => Ok(()),
        }
    }
}

fn sender_mailbox(settings: &EmailSettings) -> Result<Mailbox> {
    let address: lettre::Address = settings
        .from_address
        .parse()
        .map_err(|e: lettre::address::AddressError| NotifyError::Address {
            address: settings.from_address.clone(),
            reason: e.to_string(),
        })?;
    let name = settings
        .from_name
        .clone()
        .filter(|n| !n.trim().is_empty());
    Ok(Mailbox::new(name, address))
}

/// Builds the MIME message: `multipart/alternative` with a plain-text part
/// and a `multipart/related` HTML part carrying the inline images, which
/// the HTML references as `cid:<content_id>`.
pub fn build_message(
    from: &Mailbox,
    recipients: &[String],
    subject: &str,
    html: &str,
    inline_images: &[InlineImage],
) -> Result<Message> {
    if recipients.is_empty() {
        return Err(NotifyError::NoRecipients);
    }

    let mut builder = Message::builder().from(from.clone()).subject(subject);
    for recipient in recipients {
        let mailbox: Mailbox = recipient.parse().map_err(|e: lettre::address::AddressError| {
            NotifyError::Address {
                address: recipient.clone(),
                reason: e.to_string(),
            }
        })?;
        builder = builder.to(mailbox);
    }

    let mut related = MultiPart::related().singlepart(SinglePart::html(html.to_string()));
    for image in inline_images {
        let content_type = ContentType::parse(&image.content_type)
            .map_err(|e| NotifyError::Message(format!("{}: {e}", image.content_type)))?;
        related = related.singlepart(
            Attachment::new_inline(image.content_id.clone()).body(image.bytes.clone(), content_type),
        );
    }

    let body = MultiPart::alternative()
        .singlepart(SinglePart::plain(html_to_text(html)))
        .multipart(related);

    builder
        .multipart(body)
        .map_err(|e| NotifyError::Message(e.to_string()))
}

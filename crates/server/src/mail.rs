//! Outgoing mail.
//!
//! Without an SMTP block in the configuration, messages are written to the log
//! so registration keeps working in development.

use crate::AppResources;
use crate::email_templates::{ContactNotificationTemplate, VerificationEmailTemplate};
use lettre::AsyncTransport;
use lettre::message::{Mailbox, MultiPart, SinglePart, header::ContentType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("failed to send message: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("failed to render template: {0}")]
    Render(#[from] askama::Error),
}

/// Send a multipart (text + HTML) message, or log it when SMTP is disabled.
#[tracing::instrument(skip(resources, text_body, html_body))]
pub async fn send(
    resources: &AppResources,
    to: &str,
    reply_to: Option<&str>,
    subject: &str,
    text_body: String,
    html_body: String,
) -> Result<(), MailError> {
    let (Some(mailer), Some(smtp)) = (&resources.mailer, &resources.config.smtp) else {
        tracing::info!(to, subject, body = %text_body, "SMTP not configured; logging email instead");
        return Ok(());
    };

    let mut builder = lettre::Message::builder()
        .from(smtp.from.parse::<Mailbox>()?)
        .to(to.parse::<Mailbox>()?)
        .subject(subject)
        .header(lettre::message::header::MIME_VERSION_1_0);
    if let Some(reply_to) = reply_to {
        builder = builder.reply_to(reply_to.parse::<Mailbox>()?);
    }

    let message = builder.multipart(
        MultiPart::alternative()
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(text_body),
            )
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(html_body),
            ),
    )?;

    mailer.send(message).await?;
    tracing::info!(to, subject, "Sent email");
    Ok(())
}

pub async fn send_verification_email(
    resources: &AppResources,
    to: &str,
    name: Option<&str>,
    token: &str,
) -> Result<(), MailError> {
    let verify_url = format!(
        "{}/api/auth/verify-email?token={}",
        resources.config.issuer(),
        urlencoding::encode(token)
    );
    let template = VerificationEmailTemplate {
        name: name.map(String::from),
        verify_url,
        valid_hours: (resources.config.auth.verification_lifetime_secs / 3600).max(1),
    };
    let html = template.render_html()?;
    send(
        resources,
        to,
        None,
        "Verify your email address",
        template.render_text(),
        html,
    )
    .await
}

/// Forward a contact message to the configured recipient, if any.
pub async fn send_contact_notification(
    resources: &AppResources,
    name: &str,
    email: &str,
    message: &str,
) -> Result<(), MailError> {
    let Some(recipient) = resources.config.contact_recipient.as_deref() else {
        tracing::debug!("No contact_recipient configured; message stored only");
        return Ok(());
    };
    let template = ContactNotificationTemplate {
        name: name.to_string(),
        email: email.to_string(),
        message: message.to_string(),
    };
    let html = template.render_html()?;
    send(
        resources,
        recipient,
        Some(email),
        &format!("Contact form: {name}"),
        template.render_text(),
        html,
    )
    .await
}

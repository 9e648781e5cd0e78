use std::time::{Duration, Instant};

use klaxon_core::MessagePayload;
use klaxon_vendor::{Vendor, VendorError};
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, error, info};

use crate::config::EmailConfig;

/// SMTP vendor serving the `email` mode.
///
/// Sends plain-text notifications; when the renderer attached oneclick
/// claim markup in `extra_html`, the message goes out as a
/// multipart/alternative with an HTML part carrying the markup appended to
/// the body.
pub struct EmailVendor {
    from_address: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl std::fmt::Debug for EmailVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailVendor")
            .field("from_address", &self.from_address)
            .field("transport", &"<AsyncSmtpTransport>")
            .finish()
    }
}

impl EmailVendor {
    /// Build the vendor and its SMTP transport from configuration.
    pub fn new(config: &EmailConfig) -> Result<Self, VendorError> {
        let transport = build_transport(config)?;
        Ok(Self {
            from_address: config.from_address.clone(),
            transport,
        })
    }

    /// Build the vendor with a pre-built transport (for testing).
    #[must_use]
    pub fn with_transport(
        config: &EmailConfig,
        transport: AsyncSmtpTransport<Tokio1Executor>,
    ) -> Self {
        Self {
            from_address: config.from_address.clone(),
            transport,
        }
    }
}

impl Vendor for EmailVendor {
    fn name(&self) -> &str {
        "smtp"
    }

    fn modes(&self) -> &[&str] {
        &["email"]
    }

    async fn send(&self, message: &MessagePayload) -> Result<Duration, VendorError> {
        let email = build_email(&self.from_address, message)?;
        let destination = message.destination.as_deref().unwrap_or("?");

        debug!(message_id = ?message.message_id, to = destination, "sending email via SMTP");
        let start = Instant::now();
        self.transport.send(email).await.map_err(|e| {
            error!(error = %e, to = destination, "SMTP send failed");
            map_smtp_error(&e)
        })?;
        let latency = start.elapsed();

        info!(message_id = ?message.message_id, to = destination, ?latency, "email sent");
        Ok(latency)
    }
}

/// Build a `lettre::Message` from a prepared payload.
fn build_email(from_address: &str, message: &MessagePayload) -> Result<Message, VendorError> {
    let from: Mailbox = from_address
        .parse()
        .map_err(|e| VendorError::Configuration(format!("invalid from address: {e}")))?;

    let destination = message
        .destination
        .as_deref()
        .ok_or_else(|| VendorError::InvalidPayload("message has no destination".to_owned()))?;
    let to: Mailbox = destination
        .parse()
        .map_err(|e| VendorError::InvalidPayload(format!("invalid recipient address: {e}")))?;

    let builder = Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject.as_deref().unwrap_or(""));

    let built = match &message.extra_html {
        Some(extra_html) => {
            // Oneclick markup wants an HTML rendering; keep the text part so
            // plain clients still see the body.
            let html = format!("<pre>{}</pre>{extra_html}", message.body);
            builder
                .multipart(
                    MultiPart::alternative()
                        .singlepart(
                            SinglePart::builder()
                                .header(ContentType::TEXT_PLAIN)
                                .body(message.body.clone()),
                        )
                        .singlepart(
                            SinglePart::builder()
                                .header(ContentType::TEXT_HTML)
                                .body(html),
                        ),
                )
                .map_err(|e| VendorError::SendFailed(format!("failed to build email: {e}")))?
        }
        None => builder
            .body(message.body.clone())
            .map_err(|e| VendorError::SendFailed(format!("failed to build email: {e}")))?,
    };

    Ok(built)
}

/// Build an async SMTP transport from the configuration.
fn build_transport(
    config: &EmailConfig,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, VendorError> {
    let builder = if config.tls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| VendorError::Configuration(format!("SMTP TLS relay error: {e}")))?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
    };

    let builder = builder.port(config.port);

    let builder = if let (Some(user), Some(pass)) = (&config.username, &config.password) {
        builder.credentials(Credentials::new(user.clone(), pass.clone()))
    } else {
        builder
    };

    Ok(builder.build())
}

/// Map a lettre SMTP error to the appropriate `VendorError` variant.
fn map_smtp_error(error: &lettre::transport::smtp::Error) -> VendorError {
    let message = error.to_string();
    if error.is_transient() {
        VendorError::Connection(format!("transient SMTP error: {message}"))
    } else if error.is_permanent() {
        VendorError::SendFailed(format!("permanent SMTP error: {message}"))
    } else {
        VendorError::Connection(format!("SMTP error: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(destination: &str) -> MessagePayload {
        MessagePayload {
            message_id: Some(1),
            destination: Some(destination.to_owned()),
            subject: Some("API latency critical".to_owned()),
            body: "api-cluster p99 above threshold".to_owned(),
            mode: Some("email".to_owned()),
            ..MessagePayload::default()
        }
    }

    #[test]
    fn build_plain_email() {
        let email = build_email("klaxon@example.com", &payload("alice@example.com")).unwrap();
        let formatted = String::from_utf8(email.formatted()).unwrap();
        assert!(formatted.contains("API latency critical"));
        assert!(formatted.contains("alice@example.com"));
    }

    #[test]
    fn build_multipart_when_extra_html_present() {
        let mut m = payload("alice@example.com");
        m.extra_html = Some("<a href=\"https://example.com/claim\">Claim</a>".to_owned());
        let email = build_email("klaxon@example.com", &m).unwrap();
        let formatted = String::from_utf8(email.formatted()).unwrap();
        assert!(formatted.contains("multipart/alternative"));
        assert!(formatted.contains("text/html"));
    }

    #[test]
    fn missing_destination_is_invalid_payload() {
        let mut m = payload("alice@example.com");
        m.destination = None;
        let err = build_email("klaxon@example.com", &m).unwrap_err();
        assert!(matches!(err, VendorError::InvalidPayload(_)));
    }

    #[test]
    fn bad_recipient_is_invalid_payload() {
        let err = build_email("klaxon@example.com", &payload("not-an-address")).unwrap_err();
        assert!(matches!(err, VendorError::InvalidPayload(_)));
    }

    #[test]
    fn blank_subject_allowed() {
        let mut m = payload("alice@example.com");
        m.subject = None;
        assert!(build_email("klaxon@example.com", &m).is_ok());
    }
}

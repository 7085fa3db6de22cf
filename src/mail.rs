use std::fs;

use camino::Utf8Path;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::{Message, SmtpTransport, Transport};

use crate::config::validate_host_port;
use crate::error::MailError;

/// Delivers a written report.
pub trait Mailer {
    fn send(
        &self,
        artifact: &Utf8Path,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), MailError>;
}

/// Plain SMTP relay, e.g. a local MTA on port 25.
pub struct SmtpMailer {
    from: Mailbox,
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(host_port: &str, from: &str) -> Result<Self, MailError> {
        let (host, port) = validate_host_port(host_port)?;
        let transport = SmtpTransport::builder_dangerous(host).port(port).build();

        Ok(Self {
            from: mailbox(from)?,
            transport,
        })
    }
}

impl Mailer for SmtpMailer {
    fn send(
        &self,
        artifact: &Utf8Path,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        let data = fs::read(artifact)?;
        let filename = artifact.file_name().unwrap_or("report.png");
        let message = build_message(&self.from, recipients, subject, body, filename, data)?;

        tracing::info!(recipients = recipients.len(), "sending email");
        self.transport.send(&message)?;
        tracing::info!("email sent");

        Ok(())
    }
}

fn mailbox(address: &str) -> Result<Mailbox, MailError> {
    address
        .parse()
        .map_err(|e| MailError::Address(address.to_string(), e))
}

/// Text body plus the PNG as an attachment named `filename`.
pub fn build_message(
    from: &Mailbox,
    recipients: &[String],
    subject: &str,
    body: &str,
    filename: &str,
    png: Vec<u8>,
) -> Result<Message, MailError> {
    let mut builder = Message::builder().from(from.clone()).subject(subject);
    for recipient in recipients {
        builder = builder.to(mailbox(recipient)?);
    }

    let attachment =
        Attachment::new(filename.to_string()).body(png, ContentType::parse("image/png")?);

    let message = builder.multipart(
        MultiPart::mixed()
            .singlepart(SinglePart::plain(body.to_string()))
            .singlepart(attachment),
    )?;

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> Mailbox {
        "Reports <reports@example.com>".parse().unwrap()
    }

    #[test]
    fn test_build_message() {
        let recipients = vec!["ops@example.com".to_string(), "dev@example.com".to_string()];
        let message = build_message(
            &sender(),
            &recipients,
            "Daily report",
            "(see attached image)",
            "out.png",
            b"\x89PNG fake".to_vec(),
        )
        .unwrap();

        let text = String::from_utf8_lossy(&message.formatted()).to_string();
        assert!(text.contains("Subject: Daily report"));
        assert!(text.contains("ops@example.com"));
        assert!(text.contains("dev@example.com"));
        assert!(text.contains("multipart/mixed"));
        assert!(text.contains("image/png"));
        assert!(text.contains("filename=\"out.png\""));
        assert!(text.contains("(see attached image)"));
    }

    #[test]
    fn test_bad_recipient() {
        let err = build_message(
            &sender(),
            &["not an address".to_string()],
            "s",
            "b",
            "out.png",
            vec![],
        )
        .unwrap_err();

        assert!(matches!(err, MailError::Address(addr, _) if addr == "not an address"));
    }

    #[test]
    fn test_mailer_rejects_bad_host() {
        let result = SmtpMailer::new("smtp server", "me@example.com");
        assert!(matches!(result, Err(MailError::Config(_))));
    }

    #[test]
    fn test_missing_artifact() {
        let mailer = SmtpMailer::new("localhost:25", "me@example.com").unwrap();
        let err = mailer
            .send(
                Utf8Path::new("/nonexistent/out.png"),
                &["you@example.com".to_string()],
                "s",
                "b",
            )
            .unwrap_err();

        assert!(matches!(err, MailError::Io(_)));
    }
}

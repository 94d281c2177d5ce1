//! Outgoing MIME message construction
//!
//! Every input is checked here, before any network call: attachment files are
//! read fully and addresses are parsed as RFC 5322 mailboxes.

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{IntegrationError, Result};
use crate::models::OutgoingMail;

/// An attachment read into memory
#[derive(Debug, Clone)]
pub struct LoadedAttachment {
    pub filename: String,
    pub content_type: ContentType,
    pub data: Vec<u8>,
}

/// Parsed recipient lists
#[derive(Debug, Clone)]
pub struct Recipients {
    pub to: Vec<Mailbox>,
    pub cc: Vec<Mailbox>,
    pub bcc: Vec<Mailbox>,
}

/// Read every attachment, failing on the first unreadable path
pub async fn load_attachments(paths: &[PathBuf]) -> Result<Vec<LoadedAttachment>> {
    let mut loaded = Vec::with_capacity(paths.len());
    for path in paths {
        let data = tokio::fs::read(path).await.map_err(|e| {
            IntegrationError::validation(format!("Cannot read attachment {:?}: {}", path, e))
        })?;

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();
        let content_type = guess_content_type(path)?;

        debug!("Loaded attachment {} ({} bytes)", filename, data.len());
        loaded.push(LoadedAttachment {
            filename,
            content_type,
            data,
        });
    }
    Ok(loaded)
}

fn guess_content_type(path: &Path) -> Result<ContentType> {
    let guess = mime_guess::from_path(path).first_or_octet_stream();
    ContentType::parse(guess.essence_str())
        .or_else(|_| ContentType::parse("application/octet-stream"))
        .map_err(|e| IntegrationError::validation(format!("Unusable content type: {}", e)))
}

pub fn parse_mailbox(address: &str, field: &str) -> Result<Mailbox> {
    address.trim().parse::<Mailbox>().map_err(|e| {
        IntegrationError::validation(format!("Invalid {} address '{}': {}", field, address, e))
    })
}

/// Parse `to` (required), `cc` and `bcc`
pub fn parse_recipients(mail: &OutgoingMail) -> Result<Recipients> {
    if mail.to.is_empty() {
        return Err(IntegrationError::validation(
            "At least one recipient is required",
        ));
    }

    let parse_all = |addresses: &[String], field: &str| -> Result<Vec<Mailbox>> {
        addresses.iter().map(|a| parse_mailbox(a, field)).collect()
    };

    Ok(Recipients {
        to: parse_all(&mail.to, "to")?,
        cc: parse_all(&mail.cc, "cc")?,
        bcc: parse_all(&mail.bcc, "bcc")?,
    })
}

/// Render an RFC 5322 message, keeping the Bcc header for server-side delivery
pub fn compose(
    from: Mailbox,
    recipients: Recipients,
    subject: &str,
    body: &str,
    attachments: Vec<LoadedAttachment>,
) -> Result<Vec<u8>> {
    let mut builder = lettre::Message::builder()
        .from(from)
        .subject(subject)
        .keep_bcc();

    for mailbox in recipients.to {
        builder = builder.to(mailbox);
    }
    for mailbox in recipients.cc {
        builder = builder.cc(mailbox);
    }
    for mailbox in recipients.bcc {
        builder = builder.bcc(mailbox);
    }

    let text_part = SinglePart::plain(body.to_string());

    let message = if attachments.is_empty() {
        builder.singlepart(text_part)
    } else {
        let mut multi = MultiPart::mixed().singlepart(text_part);
        for attachment in attachments {
            multi = multi.singlepart(
                Attachment::new(attachment.filename).body(attachment.data, attachment.content_type),
            );
        }
        builder.multipart(multi)
    }
    .map_err(|e| IntegrationError::validation(format!("Cannot build message: {}", e)))?;

    Ok(message.formatted())
}

/// Gmail `raw` field encoding
pub fn encode_raw(message: &[u8]) -> String {
    URL_SAFE.encode(message)
}

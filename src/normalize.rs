//! Raw Gmail payloads into [`Message`] records

use chrono::{DateTime, Utc};
use lettre::message::Mailboxes;

use crate::models::wire::{WireHeader, WireMessage, WirePart};
use crate::models::Message;

const NO_SUBJECT: &str = "(No Subject)";
const UNKNOWN_SENDER: &str = "Unknown";

/// Build the domain record from a `format=full` message
pub fn normalize_message(raw: WireMessage) -> Message {
    let payload = raw.payload.unwrap_or_default();
    let headers = &payload.headers;

    let subject = header(headers, "subject")
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(NO_SUBJECT)
        .to_string();
    let sender = header(headers, "from")
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(UNKNOWN_SENDER)
        .to_string();
    let to = header(headers, "to").map(parse_address_list).unwrap_or_default();
    let cc = header(headers, "cc").map(parse_address_list).unwrap_or_default();

    let timestamp = header(headers, "date")
        .and_then(parse_date)
        .or(raw.internal_date)
        .unwrap_or_default();

    let body = extract_body(&payload);
    let has = |label: &str| raw.label_ids.iter().any(|l| l == label);

    Message {
        unread: has("UNREAD"),
        starred: has("STARRED"),
        important: has("IMPORTANT"),
        id: raw.id,
        thread_id: raw.thread_id,
        subject,
        sender,
        to,
        cc,
        timestamp,
        preview: raw.snippet.unwrap_or_default(),
        body,
        labels: raw.label_ids,
    }
}

/// First header with the given name, compared case-insensitively
fn header<'a>(headers: &'a [WireHeader], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Parse an RFC 2822 date header, falling back to RFC 3339
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    // "Tue, 14 Nov 2023 22:13:20 +0000 (UTC)": drop the trailing comment
    let trimmed = match date_str.rfind(" (") {
        Some(i) if date_str.ends_with(')') => &date_str[..i],
        _ => date_str,
    }
    .trim();

    DateTime::parse_from_rfc2822(trimmed)
        .or_else(|_| DateTime::parse_from_rfc3339(trimmed))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Split an address header into individual mailboxes
pub fn parse_address_list(value: &str) -> Vec<String> {
    match value.parse::<Mailboxes>() {
        Ok(mailboxes) => mailboxes.iter().map(|m| m.to_string()).collect(),
        Err(_) => value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

/// Readable body: first `text/plain` part depth-first, then first `text/html`
pub fn extract_body(payload: &WirePart) -> String {
    find_part_data(payload, "text/plain")
        .or_else(|| find_part_data(payload, "text/html"))
        .or_else(|| payload.body.as_ref().and_then(|b| b.data.as_deref()))
        .map(|data| String::from_utf8_lossy(data).into_owned())
        .unwrap_or_default()
}

fn find_part_data<'a>(part: &'a WirePart, mime_type: &str) -> Option<&'a [u8]> {
    if part.mime_type.eq_ignore_ascii_case(mime_type) {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
            return Some(data);
        }
    }
    part.parts
        .iter()
        .find_map(|child| find_part_data(child, mime_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::wire::WireBody;

    fn text_part(mime_type: &str, text: &str) -> WirePart {
        WirePart {
            mime_type: mime_type.to_string(),
            body: Some(WireBody {
                size: text.len() as u64,
                data: Some(text.as_bytes().to_vec()),
                attachment_id: None,
            }),
            ..Default::default()
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> Vec<WireHeader> {
        pairs
            .iter()
            .map(|(name, value)| WireHeader {
                name: name.to_string(),
                value: value.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_defaults_for_missing_headers() {
        let raw = WireMessage {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            payload: Some(text_part("text/plain", "hi")),
            ..Default::default()
        };

        let message = normalize_message(raw);
        assert_eq!(message.subject, "(No Subject)");
        assert_eq!(message.sender, "Unknown");
        assert!(message.to.is_empty());
        assert_eq!(message.body, "hi");
        assert_eq!(message.timestamp, DateTime::<Utc>::default());
    }

    #[test]
    fn test_full_message() {
        let mut payload = WirePart {
            mime_type: "multipart/mixed".to_string(),
            headers: headers(&[
                ("From", "Alice <alice@example.com>"),
                ("To", "bob@example.com, \"Carol C\" <carol@example.com>"),
                ("cc", "dave@example.com"),
                ("SUBJECT", "Quarterly report"),
                ("Date", "Tue, 14 Nov 2023 22:13:20 +0000 (UTC)"),
            ]),
            ..Default::default()
        };
        payload.parts = vec![
            WirePart {
                mime_type: "multipart/alternative".to_string(),
                parts: vec![
                    text_part("text/html", "<p>Report</p>"),
                    text_part("text/plain", "Report"),
                ],
                ..Default::default()
            },
            text_part("application/pdf", "%PDF"),
        ];

        let raw = WireMessage {
            id: "m2".to_string(),
            thread_id: "t2".to_string(),
            label_ids: vec!["INBOX".to_string(), "UNREAD".to_string(), "STARRED".to_string()],
            snippet: Some("Report".to_string()),
            payload: Some(payload),
            ..Default::default()
        };

        let message = normalize_message(raw);
        assert_eq!(message.subject, "Quarterly report");
        assert_eq!(message.sender, "Alice <alice@example.com>");
        assert_eq!(message.to.len(), 2);
        assert_eq!(message.to[0], "bob@example.com");
        assert!(message.to[1].contains("carol@example.com"));
        assert_eq!(message.cc, vec!["dave@example.com".to_string()]);
        assert_eq!(message.body, "Report");
        assert_eq!(message.timestamp.timestamp(), 1_700_000_000);
        assert!(message.unread);
        assert!(message.starred);
        assert!(!message.important);
    }

    #[test]
    fn test_html_fallback() {
        let payload = WirePart {
            mime_type: "multipart/alternative".to_string(),
            parts: vec![text_part("text/html", "<b>only html</b>")],
            ..Default::default()
        };
        assert_eq!(extract_body(&payload), "<b>only html</b>");
    }

    #[test]
    fn test_internal_date_fallback() {
        let raw = WireMessage {
            id: "m3".to_string(),
            internal_date: DateTime::from_timestamp_millis(1_600_000_000_000),
            payload: Some(WirePart {
                headers: headers(&[("Date", "not a date")]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(normalize_message(raw).timestamp.timestamp(), 1_600_000_000);
    }

    #[test]
    fn test_parse_date_formats() {
        assert!(parse_date("Mon, 1 Jan 2024 10:00:00 +0100").is_some());
        assert!(parse_date("2024-01-01T10:00:00Z").is_some());
        assert!(parse_date("yesterday").is_none());
    }

    #[test]
    fn test_parse_address_list_fallback() {
        assert_eq!(
            parse_address_list("not an address, ,x@y.z"),
            vec!["not an address".to_string(), "x@y.z".to_string()]
        );
    }
}

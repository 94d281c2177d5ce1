use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A mail message normalized from the provider payload
///
/// Built once from a fetch and never mutated; flag changes act on the remote
/// message and are observed by fetching it again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub sender: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub preview: String,
    pub body: String,
    pub labels: Vec<String>,
    pub unread: bool,
    pub starred: bool,
    pub important: bool,
}

/// Identity and mailbox counters of the authenticated account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub address: String,
    pub messages_total: u64,
    pub threads_total: u64,
    pub history_id: Option<String>,
}

/// Identifier of a message accepted for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: String,
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    /// `system` or `user`
    pub kind: Option<String>,
}

/// Requested flag state; `None` leaves a flag untouched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagChange {
    pub read: Option<bool>,
    pub starred: Option<bool>,
}

impl FlagChange {
    pub fn mark_read() -> Self {
        Self {
            read: Some(true),
            starred: None,
        }
    }

    pub fn star() -> Self {
        Self {
            read: None,
            starred: Some(true),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_none() && self.starred.is_none()
    }

    /// Gmail label ids to add and remove for this change
    pub fn label_delta(&self) -> (Vec<&'static str>, Vec<&'static str>) {
        let mut add = Vec::new();
        let mut remove = Vec::new();
        match self.read {
            Some(true) => remove.push("UNREAD"),
            Some(false) => add.push("UNREAD"),
            None => {}
        }
        match self.starred {
            Some(true) => add.push("STARRED"),
            Some(false) => remove.push("STARRED"),
            None => {}
        }
        (add, remove)
    }
}

/// An outgoing message before composition
#[derive(Debug, Clone, Default)]
pub struct OutgoingMail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    /// Local files read and embedded before anything is sent
    pub attachments: Vec<PathBuf>,
}

/// Gmail REST payloads, as received
pub mod wire {
    use super::deserializers::{deserialize_base64url, deserialize_gmail_timestamp};
    use chrono::{DateTime, Utc};
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WireMessage {
        pub id: String,
        #[serde(default)]
        pub thread_id: String,
        #[serde(default)]
        pub label_ids: Vec<String>,
        #[serde(default)]
        pub snippet: Option<String>,
        #[serde(default, deserialize_with = "deserialize_gmail_timestamp")]
        pub internal_date: Option<DateTime<Utc>>,
        #[serde(default)]
        pub payload: Option<WirePart>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WirePart {
        #[serde(default)]
        pub mime_type: String,
        #[serde(default)]
        pub filename: Option<String>,
        #[serde(default)]
        pub headers: Vec<WireHeader>,
        #[serde(default)]
        pub body: Option<WireBody>,
        #[serde(default)]
        pub parts: Vec<WirePart>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WireBody {
        #[serde(default)]
        pub size: u64,
        #[serde(default, deserialize_with = "deserialize_base64url")]
        pub data: Option<Vec<u8>>,
        #[serde(default)]
        pub attachment_id: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct WireHeader {
        pub name: String,
        #[serde(default)]
        pub value: String,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WireMessageList {
        #[serde(default)]
        pub messages: Vec<WireMessageRef>,
        #[serde(default)]
        pub next_page_token: Option<String>,
        #[serde(default)]
        pub result_size_estimate: Option<u64>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WireMessageRef {
        pub id: String,
        #[serde(default)]
        pub thread_id: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WireProfile {
        pub email_address: String,
        #[serde(default)]
        pub messages_total: u64,
        #[serde(default)]
        pub threads_total: u64,
        #[serde(default)]
        pub history_id: Option<String>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct WireLabelList {
        #[serde(default)]
        pub labels: Vec<WireLabel>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct WireLabel {
        pub id: String,
        pub name: String,
        #[serde(default, rename = "type")]
        pub kind: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WireSendResponse {
        pub id: String,
        #[serde(default)]
        pub thread_id: Option<String>,
    }
}

/// Custom deserializers for Gmail API types
pub mod deserializers {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use chrono::{DateTime, Utc};
    use serde::{
        de::{self, Deserializer},
        Deserialize,
    };

    /// Deserialize Gmail timestamp (milliseconds since epoch as string)
    pub fn deserialize_gmail_timestamp<'de, D>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(s) => {
                let millis = s.parse::<i64>().map_err(de::Error::custom)?;
                let dt = DateTime::from_timestamp_millis(millis)
                    .ok_or_else(|| de::Error::custom("Invalid timestamp"))?;
                Ok(Some(dt))
            }
            None => Ok(None),
        }
    }

    /// Deserialize base64url encoded data, padded or not
    pub fn deserialize_base64url<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(s) => decode_base64url(&s).map(Some).map_err(de::Error::custom),
            None => Ok(None),
        }
    }

    /// Decode base64url, tolerating padding, line breaks and the standard alphabet
    pub fn decode_base64url(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
        let normalized: String = data
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '=')
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                c => c,
            })
            .collect();
        URL_SAFE_NO_PAD.decode(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::wire::*;
    use super::*;

    #[test]
    fn test_flag_change_label_delta() {
        assert_eq!(FlagChange::mark_read().label_delta(), (vec![], vec!["UNREAD"]));
        assert_eq!(FlagChange::star().label_delta(), (vec!["STARRED"], vec![]));

        let undo = FlagChange {
            read: Some(false),
            starred: Some(false),
        };
        assert_eq!(undo.label_delta(), (vec!["UNREAD"], vec!["STARRED"]));
        assert!(FlagChange::default().is_empty());
    }

    #[test]
    fn test_decode_base64url_variants() {
        use super::deserializers::decode_base64url;

        assert_eq!(decode_base64url("SGVsbG8").unwrap(), b"Hello");
        assert_eq!(decode_base64url("SGVsbG8=").unwrap(), b"Hello");
        assert_eq!(decode_base64url("-_8").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(decode_base64url("+/8=").unwrap(), vec![0xfb, 0xff]);
        assert!(decode_base64url("%%%").is_err());
    }

    #[test]
    fn test_wire_message_deserialization() {
        let json = r#"{
            "id": "18c1",
            "threadId": "18c0",
            "labelIds": ["INBOX", "UNREAD"],
            "snippet": "Hi there",
            "internalDate": "1700000000000",
            "payload": {
                "mimeType": "text/plain",
                "headers": [{"name": "Subject", "value": "Hello"}],
                "body": {"size": 5, "data": "SGVsbG8"}
            }
        }"#;

        let message: WireMessage = serde_json::from_str(json).unwrap();
        assert_eq!(message.thread_id, "18c0");
        assert_eq!(
            message.internal_date.unwrap().timestamp_millis(),
            1_700_000_000_000
        );
        let payload = message.payload.unwrap();
        assert_eq!(payload.body.unwrap().data.unwrap(), b"Hello");
        assert_eq!(payload.headers[0].name, "Subject");
    }

    #[test]
    fn test_message_serialization() {
        let message = Message {
            id: "123".to_string(),
            thread_id: "456".to_string(),
            subject: "Test Subject".to_string(),
            sender: "Test User <test@example.com>".to_string(),
            to: vec!["recipient@example.com".to_string()],
            cc: vec![],
            timestamp: Utc::now(),
            preview: "Preview".to_string(),
            body: "Body".to_string(),
            labels: vec!["INBOX".to_string()],
            unread: true,
            starred: false,
            important: false,
        };

        let json = serde_json::to_string(&message).unwrap();
        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(message, deserialized);
    }
}

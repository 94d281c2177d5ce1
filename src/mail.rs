//! Mail facade over the Gmail REST API
//!
//! Every operation goes through one [`ResilientClient`], so it inherits the
//! same authorization, throttling and retry behaviour. Operations return
//! normalized records from [`crate::models`] or an [`crate::IntegrationError`].

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{resolve_application_secret, AuthManager, GMAIL_SCOPES};
use crate::client::{GoogleClassifier, ResilientClient};
use crate::compose;
use crate::config::MailConfig;
use crate::consent::ConsentFlow;
use crate::credential::FileCredentialStore;
use crate::error::Result;
use crate::models::wire::{WireLabelList, WireMessage, WireMessageList, WireProfile, WireSendResponse};
use crate::models::{FlagChange, Label, Message, OutgoingMail, Profile, SentMessage};
use crate::normalize::normalize_message;
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::transport::{HttpRequest, HttpTransport};

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Endpoint groups, each with its own rate-limit spacing
pub const GROUP_MESSAGES: &str = "gmail.messages";
pub const GROUP_SEND: &str = "gmail.send";
pub const GROUP_ACCOUNT: &str = "gmail.account";

/// Largest page the Gmail list endpoint accepts
const MAX_PAGE_SIZE: u32 = 500;

pub const DEFAULT_SEARCH_LIMIT: usize = 20;

pub struct MailFacade {
    client: ResilientClient,
    auth: Arc<AuthManager>,
    api_base: String,
    page_size: u32,
    sender: Option<String>,
    /// Authenticated address, looked up once for the `From` header
    profile_address: Mutex<Option<String>>,
}

impl MailFacade {
    pub fn new(
        auth: Arc<AuthManager>,
        transport: Arc<dyn HttpTransport>,
        limiter: RateLimiter,
        policy: RetryPolicy,
    ) -> Self {
        let client = ResilientClient::new(
            "gmail",
            transport,
            auth.clone(),
            Arc::new(GoogleClassifier),
            limiter,
            policy,
        );
        Self {
            client,
            auth,
            api_base: GMAIL_API_BASE.to_string(),
            page_size: 100,
            sender: None,
            profile_address: Mutex::new(None),
        }
    }

    /// Build the facade from the `[mail]` section
    ///
    /// The OAuth client identity comes from `GMAIL_CLIENT_ID` / `GMAIL_CLIENT_SECRET`
    /// when set, otherwise from `client_secret_path`.
    pub async fn from_config(
        config: &MailConfig,
        transport: Arc<dyn HttpTransport>,
        consent: Arc<dyn ConsentFlow>,
    ) -> Result<Self> {
        let secret = resolve_application_secret(&config.client_secret_path).await?;
        let store = Arc::new(FileCredentialStore::new(config.token_path.clone()));
        let auth = AuthManager::new(secret, GMAIL_SCOPES, store, consent, transport.clone())
            .with_refresh_margin(Duration::from_secs(config.refresh_margin_secs));

        let limits = config.limits();
        Ok(Self::new(
            Arc::new(auth),
            transport,
            RateLimiter::new(limits.min_request_interval),
            limits.retry,
        )
        .with_api_base(&config.api_base)
        .with_page_size(config.page_size)
        .with_sender(config.sender.clone()))
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Fixed `From` address; the authenticated account is used when `None`
    pub fn with_sender(mut self, sender: Option<String>) -> Self {
        self.sender = sender;
        self
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    pub fn client(&self) -> &ResilientClient {
        &self.client
    }

    /// Make sure a usable credential exists, then verify it with a profile call
    pub async fn authenticate(&self, force: bool) -> Result<Profile> {
        if force {
            self.auth.force_reauth().await?;
        } else {
            self.auth.ensure_valid_credential().await?;
        }
        let profile = self.get_profile().await?;
        info!("Authenticated as {}", profile.address);
        Ok(profile)
    }

    /// Forget the stored credential
    pub async fn sign_out(&self) -> Result<()> {
        *self.profile_address.lock().await = None;
        self.auth.sign_out().await
    }

    /// Identity and counters of the authenticated account
    pub async fn get_profile(&self) -> Result<Profile> {
        let request = HttpRequest::get(format!("{}/profile", self.api_base));
        let raw: WireProfile = self.client.execute_json(GROUP_ACCOUNT, request).await?;

        *self.profile_address.lock().await = Some(raw.email_address.clone());
        Ok(Profile {
            address: raw.email_address,
            messages_total: raw.messages_total,
            threads_total: raw.threads_total,
            history_id: raw.history_id,
        })
    }

    /// Run a native Gmail search and fetch at most `max_results` messages
    ///
    /// Pages are requested until `max_results` ids are collected or the
    /// provider reports no further page. No cursor survives the call.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        include_trashed: bool,
    ) -> Result<Vec<Message>> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let ids = self.list_message_ids(query, max_results, include_trashed).await?;
        debug!("Search '{}' matched {} messages", query, ids.len());

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_message(&id).await {
                Ok(message) => messages.push(message),
                Err(e) if e.status() == Some(404) => {
                    warn!("Message {} disappeared before it could be fetched", id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(messages)
    }

    async fn list_message_ids(
        &self,
        query: &str,
        max_results: usize,
        include_trashed: bool,
    ) -> Result<Vec<String>> {
        let mut ids: Vec<String> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let remaining = max_results - ids.len();
            let mut request = HttpRequest::get(format!("{}/messages", self.api_base))
                .query("maxResults", remaining.min(self.page_size as usize))
                .query("includeSpamTrash", include_trashed);
            if !query.is_empty() {
                request = request.query("q", query);
            }
            if let Some(token) = &page_token {
                request = request.query("pageToken", token);
            }

            let page: WireMessageList = self.client.execute_json(GROUP_MESSAGES, request).await?;
            if page.messages.is_empty() {
                break;
            }
            ids.extend(page.messages.into_iter().map(|m| m.id));

            if ids.len() >= max_results {
                break;
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        ids.truncate(max_results);
        Ok(ids)
    }

    pub async fn important(&self, max_results: usize, include_trashed: bool) -> Result<Vec<Message>> {
        self.search(&important_query(include_trashed), max_results, include_trashed)
            .await
    }

    pub async fn starred(&self, max_results: usize, include_trashed: bool) -> Result<Vec<Message>> {
        self.search(&starred_query(include_trashed), max_results, include_trashed)
            .await
    }

    pub async fn unread(&self, extra_query: Option<&str>, max_results: usize) -> Result<Vec<Message>> {
        self.search(&unread_query(extra_query), max_results, false).await
    }

    /// One message, normalized
    pub async fn get_message(&self, message_id: &str) -> Result<Message> {
        let request = HttpRequest::get(format!(
            "{}/messages/{}",
            self.api_base,
            urlencoding::encode(message_id)
        ))
        .query("format", "full");
        let raw: WireMessage = self.client.execute_json(GROUP_MESSAGES, request).await?;
        Ok(normalize_message(raw))
    }

    /// Compose and send a message
    ///
    /// Attachments and addresses are validated before any network call.
    pub async fn send(&self, mail: &OutgoingMail) -> Result<SentMessage> {
        let attachments = compose::load_attachments(&mail.attachments).await?;
        let recipients = compose::parse_recipients(mail)?;
        let from = match &self.sender {
            Some(sender) => compose::parse_mailbox(sender, "from")?,
            None => compose::parse_mailbox(&self.sender_address().await?, "from")?,
        };

        let raw = compose::compose(from, recipients, &mail.subject, &mail.body, attachments)?;
        let request = HttpRequest::post(format!("{}/messages/send", self.api_base))
            .json(&json!({ "raw": compose::encode_raw(&raw) }));

        let sent: WireSendResponse = self.client.execute_json(GROUP_SEND, request).await?;
        info!("Sent message {} to {} recipient(s)", sent.id, mail.to.len());
        Ok(SentMessage {
            id: sent.id,
            thread_id: sent.thread_id,
        })
    }

    async fn sender_address(&self) -> Result<String> {
        if let Some(address) = self.profile_address.lock().await.clone() {
            return Ok(address);
        }
        Ok(self.get_profile().await?.address)
    }

    /// Apply read/starred state to one message
    ///
    /// Setting a flag to the state it already has succeeds without change.
    /// Returns `false` when the message does not exist.
    pub async fn mutate_flags(&self, message_id: &str, change: FlagChange) -> Result<bool> {
        if change.is_empty() {
            debug!("No flag change requested for {}", message_id);
            return Ok(true);
        }

        let (add, remove) = change.label_delta();
        let request = HttpRequest::post(format!(
            "{}/messages/{}/modify",
            self.api_base,
            urlencoding::encode(message_id)
        ))
        .json(&json!({ "addLabelIds": add, "removeLabelIds": remove }));

        match self.client.execute(GROUP_MESSAGES, request).await {
            Ok(_) => Ok(true),
            Err(e) if e.status() == Some(404) => {
                warn!("Cannot change flags of {}: message not found", message_id);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn mark_as_read(&self, message_id: &str) -> Result<bool> {
        self.mutate_flags(message_id, FlagChange::mark_read()).await
    }

    pub async fn mark_as_starred(&self, message_id: &str) -> Result<bool> {
        self.mutate_flags(message_id, FlagChange::star()).await
    }

    pub async fn list_labels(&self) -> Result<Vec<Label>> {
        let request = HttpRequest::get(format!("{}/labels", self.api_base));
        let raw: WireLabelList = self.client.execute_json(GROUP_ACCOUNT, request).await?;
        Ok(raw
            .labels
            .into_iter()
            .map(|l| Label {
                id: l.id,
                name: l.name,
                kind: l.kind,
            })
            .collect())
    }
}

fn exclude_spam_trash(mut query: String, include_trashed: bool) -> String {
    if !include_trashed {
        query.push_str(" -in:spam -in:trash");
    }
    query
}

pub fn important_query(include_trashed: bool) -> String {
    exclude_spam_trash("is:important".to_string(), include_trashed)
}

pub fn starred_query(include_trashed: bool) -> String {
    exclude_spam_trash("is:starred".to_string(), include_trashed)
}

pub fn unread_query(extra: Option<&str>) -> String {
    let mut query = "is:unread -in:spam -in:trash".to_string();
    if let Some(extra) = extra.map(str::trim).filter(|e| !e.is_empty()) {
        query.push(' ');
        query.push_str(extra);
    }
    query
}

impl std::fmt::Debug for MailFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailFacade")
            .field("api_base", &self.api_base)
            .field("page_size", &self.page_size)
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convenience_queries() {
        assert_eq!(important_query(false), "is:important -in:spam -in:trash");
        assert_eq!(important_query(true), "is:important");
        assert_eq!(starred_query(false), "is:starred -in:spam -in:trash");
        assert_eq!(unread_query(None), "is:unread -in:spam -in:trash");
        assert_eq!(
            unread_query(Some("from:boss@example.com")),
            "is:unread -in:spam -in:trash from:boss@example.com"
        );
        assert_eq!(unread_query(Some("  ")), "is:unread -in:spam -in:trash");
    }
}

//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use hyper::StatusCode;
use mockall::mock;
use productivity_integrations::auth::{AuthManager, GMAIL_SCOPES};
use productivity_integrations::consent::{ConsentFlow, ConsentRequest};
use productivity_integrations::credential::{Credential, CredentialStore};
use productivity_integrations::error::Result;
use productivity_integrations::mail::MailFacade;
use productivity_integrations::rate_limiter::RateLimiter;
use productivity_integrations::retry::RetryPolicy;
use productivity_integrations::transport::{HttpRequest, HttpResponse, HttpTransport, TransportFailure};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use yup_oauth2::ApplicationSecret;

pub const TOKEN_URI: &str = "https://oauth.test/token";
pub const GMAIL_BASE: &str = "https://gmail.test/gmail/v1/users/me";
pub const ACCOUNT: &str = "me@example.com";

mock! {
    pub Consent {}

    #[async_trait]
    impl ConsentFlow for Consent {
        fn redirect_uri(&self) -> String;
        async fn obtain_code(&self, request: &ConsentRequest) -> Result<String>;
    }
}

/// Create a JSON response with the given status
pub fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse::new(
        StatusCode::from_u16(status).unwrap(),
        body.to_string(),
    )
}

pub fn response_with_header(status: u16, body: Value, name: &'static str, value: &str) -> HttpResponse {
    let mut response = json_response(status, body);
    response
        .headers
        .insert(name, hyper::header::HeaderValue::from_str(value).unwrap());
    response
}

/// Replays canned outcomes in order and records every request
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<std::result::Result<HttpResponse, TransportFailure>>>,
    requests: Mutex<Vec<HttpRequest>>,
    times: Mutex<Vec<Instant>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: HttpResponse) -> &Self {
        self.script.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn push_json(&self, status: u16, body: Value) -> &Self {
        self.push(json_response(status, body))
    }

    pub fn push_failure(&self, failure: TransportFailure) -> &Self {
        self.script.lock().unwrap().push_back(Err(failure));
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Virtual instants at which each call was issued
    pub fn call_times(&self) -> Vec<Instant> {
        self.times.lock().unwrap().clone()
    }

    /// Gaps between consecutive calls
    pub fn gaps(&self) -> Vec<Duration> {
        self.call_times()
            .windows(2)
            .map(|w| w[1].duration_since(w[0]))
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportFailure> {
        self.requests.lock().unwrap().push(request);
        self.times.lock().unwrap().push(Instant::now());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportFailure::Connect("script exhausted".to_string())))
    }
}

/// In-memory credential store with a save counter
#[derive(Default)]
pub struct MemoryStore {
    credential: Mutex<Option<Credential>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn with(credential: Credential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn current(&self) -> Option<Credential> {
        self.credential.lock().unwrap().clone()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load(&self) -> Result<Option<Credential>> {
        Ok(self.current())
    }

    async fn save(&self, credential: &Credential) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.credential.lock().unwrap() = Some(credential.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.credential.lock().unwrap() = None;
        Ok(())
    }
}

pub fn test_secret() -> ApplicationSecret {
    ApplicationSecret {
        client_id: "test-client".to_string(),
        client_secret: "test-secret".to_string(),
        auth_uri: "https://oauth.test/auth".to_string(),
        token_uri: TOKEN_URI.to_string(),
        ..Default::default()
    }
}

fn all_scopes() -> BTreeSet<String> {
    GMAIL_SCOPES.iter().map(|s| s.to_string()).collect()
}

/// A credential valid for another hour
pub fn valid_credential(access_token: &str) -> Credential {
    Credential {
        access_token: access_token.to_string(),
        refresh_token: Some("refresh-1".to_string()),
        expires_at: Utc::now() + ChronoDuration::hours(1),
        scopes: all_scopes(),
    }
}

/// A credential that expired ten minutes ago
pub fn expired_credential(access_token: &str) -> Credential {
    Credential {
        expires_at: Utc::now() - ChronoDuration::minutes(10),
        ..valid_credential(access_token)
    }
}

/// Short delays so paused-clock tests stay readable
pub fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        honor_retry_after: true,
    }
}

pub fn auth_manager(
    store: Arc<dyn CredentialStore>,
    consent: Arc<dyn ConsentFlow>,
    transport: Arc<dyn HttpTransport>,
) -> Arc<AuthManager> {
    Arc::new(AuthManager::new(
        test_secret(),
        GMAIL_SCOPES,
        store,
        consent,
        transport,
    ))
}

pub fn mail_facade(
    store: Arc<dyn CredentialStore>,
    consent: Arc<dyn ConsentFlow>,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
) -> MailFacade {
    let auth = auth_manager(store, consent, transport.clone());
    MailFacade::new(auth, transport, RateLimiter::unlimited(), policy)
        .with_api_base(GMAIL_BASE)
        .with_sender(Some(ACCOUNT.to_string()))
}

/// Gmail `format=full` message body
pub fn gmail_message(id: &str, from: &str, subject: &str, labels: &[&str]) -> Value {
    json!({
        "id": id,
        "threadId": format!("thread_{}", id),
        "labelIds": labels,
        "snippet": format!("Snippet of {}", subject),
        "internalDate": "1704124800000",
        "payload": {
            "mimeType": "text/plain",
            "headers": [
                {"name": "From", "value": from},
                {"name": "To", "value": ACCOUNT},
                {"name": "Subject", "value": subject},
                {"name": "Date", "value": "Mon, 1 Jan 2024 10:00:00 -0800"}
            ],
            "body": {"size": 5, "data": "SGVsbG8"}
        }
    })
}

/// Gmail list response
pub fn gmail_list(ids: &[&str], next_page_token: Option<&str>) -> Value {
    let messages: Vec<Value> = ids
        .iter()
        .map(|id| json!({"id": id, "threadId": format!("thread_{}", id)}))
        .collect();
    let mut response = json!({
        "messages": messages,
        "resultSizeEstimate": messages.len()
    });
    if let Some(token) = next_page_token {
        response["nextPageToken"] = json!(token);
    }
    response
}

pub fn token_response(access_token: &str) -> Value {
    json!({
        "access_token": access_token,
        "expires_in": 3599,
        "token_type": "Bearer"
    })
}

/// Stateful in-process Gmail and token endpoint
///
/// Resource calls must carry the currently issued access token.
pub struct FakeGmail {
    state: Mutex<FakeState>,
    calls: AtomicUsize,
}

struct FakeState {
    messages: BTreeMap<String, FakeMessage>,
    access_token: String,
    issued: u32,
    refresh_accepted: bool,
    sent: Vec<String>,
    requests: Vec<HttpRequest>,
}

struct FakeMessage {
    from: String,
    subject: String,
    labels: BTreeSet<String>,
}

impl FakeGmail {
    pub fn new(access_token: &str) -> Self {
        Self {
            state: Mutex::new(FakeState {
                messages: BTreeMap::new(),
                access_token: access_token.to_string(),
                issued: 0,
                refresh_accepted: true,
                sent: Vec::new(),
                requests: Vec::new(),
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_message(self, id: &str, from: &str, subject: &str, labels: &[&str]) -> Self {
        self.state.lock().unwrap().messages.insert(
            id.to_string(),
            FakeMessage {
                from: from.to_string(),
                subject: subject.to_string(),
                labels: labels.iter().map(|l| l.to_string()).collect(),
            },
        );
        self
    }

    /// Seed `count` inbox messages named `m000`, `m001`, ...
    pub fn with_inbox(mut self, count: usize) -> Self {
        for i in 0..count {
            self = self.with_message(
                &format!("m{:03}", i),
                "Sender <sender@example.com>",
                &format!("Message {}", i),
                &["INBOX", "UNREAD"],
            );
        }
        self
    }

    pub fn reject_refresh(self) -> Self {
        self.state.lock().unwrap().refresh_accepted = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn labels_of(&self, id: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap()
            .messages
            .get(id)
            .map(|m| m.labels.clone())
            .unwrap_or_default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    fn handle(&self, state: &mut FakeState, request: &HttpRequest) -> HttpResponse {
        if request.url.starts_with(TOKEN_URI) {
            return Self::token_endpoint(state, request);
        }

        let expected = format!("Bearer {}", state.access_token);
        if request.header_value("Authorization") != Some(expected.as_str()) {
            return json_response(
                401,
                json!({"error": {"code": 401, "message": "Invalid Credentials"}}),
            );
        }

        let full_path = request.path();
        let path = full_path.trim_start_matches("/gmail/v1/users/me");
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        match (request.method.as_str(), segments.as_slice()) {
            ("GET", ["profile"]) => json_response(
                200,
                json!({
                    "emailAddress": ACCOUNT,
                    "messagesTotal": state.messages.len(),
                    "threadsTotal": state.messages.len(),
                    "historyId": "1234"
                }),
            ),
            ("GET", ["labels"]) => json_response(
                200,
                json!({"labels": [
                    {"id": "INBOX", "name": "INBOX", "type": "system"},
                    {"id": "Label_1", "name": "Projects", "type": "user"}
                ]}),
            ),
            ("GET", ["messages"]) => Self::list(state, request),
            ("GET", ["messages", id]) => match state.messages.get(*id) {
                Some(message) => {
                    let labels: Vec<&str> = message.labels.iter().map(|l| l.as_str()).collect();
                    json_response(200, gmail_message(id, &message.from, &message.subject, &labels))
                }
                None => not_found(),
            },
            ("POST", ["messages", "send"]) => {
                let body: Value = serde_json::from_slice(request.body.as_deref().unwrap_or_default())
                    .unwrap_or(Value::Null);
                state.sent.push(body["raw"].as_str().unwrap_or_default().to_string());
                json_response(200, json!({"id": format!("sent{}", state.sent.len()), "threadId": "t-sent"}))
            }
            ("POST", ["messages", id, "modify"]) => {
                let body: Value = serde_json::from_slice(request.body.as_deref().unwrap_or_default())
                    .unwrap_or(Value::Null);
                let Some(message) = state.messages.get_mut(*id) else {
                    return not_found();
                };
                for label in body["addLabelIds"].as_array().into_iter().flatten() {
                    message.labels.insert(label.as_str().unwrap_or_default().to_string());
                }
                for label in body["removeLabelIds"].as_array().into_iter().flatten() {
                    message.labels.remove(label.as_str().unwrap_or_default());
                }
                json_response(200, json!({"id": id}))
            }
            _ => not_found(),
        }
    }

    fn list(state: &FakeState, request: &HttpRequest) -> HttpResponse {
        let query = request.query_param("q").unwrap_or_default();
        let required: Vec<&str> = query
            .split_whitespace()
            .filter_map(|term| term.strip_prefix("is:"))
            .map(|flag| match flag {
                "unread" => "UNREAD",
                "starred" => "STARRED",
                "important" => "IMPORTANT",
                _ => "INBOX",
            })
            .collect();

        let matching: Vec<&String> = state
            .messages
            .iter()
            .filter(|(_, m)| required.iter().all(|l| m.labels.contains(*l)))
            .map(|(id, _)| id)
            .collect();

        let page_size: usize = request
            .query_param("maxResults")
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);
        let offset: usize = request
            .query_param("pageToken")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let page: Vec<&str> = matching
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|id| id.as_str())
            .collect();
        let next = offset + page.len();
        let token = (next < matching.len()).then(|| next.to_string());
        json_response(200, gmail_list(&page, token.as_deref()))
    }

    fn token_endpoint(state: &mut FakeState, request: &HttpRequest) -> HttpResponse {
        let body = String::from_utf8_lossy(request.body.as_deref().unwrap_or_default()).to_string();
        let is_refresh = body.contains("grant_type=refresh_token");

        if is_refresh && !state.refresh_accepted {
            return json_response(
                400,
                json!({"error": "invalid_grant", "error_description": "Token has been expired or revoked."}),
            );
        }

        state.issued += 1;
        state.access_token = format!("fresh-token-{}", state.issued);
        let mut response = token_response(&state.access_token);
        if !is_refresh {
            response["refresh_token"] = json!("refresh-from-consent");
            response["scope"] = json!(GMAIL_SCOPES.join(" "));
        }
        json_response(200, response)
    }
}

fn not_found() -> HttpResponse {
    json_response(
        404,
        json!({"error": {"code": 404, "message": "Requested entity was not found."}}),
    )
}

#[async_trait]
impl HttpTransport for FakeGmail {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());
        Ok(self.handle(&mut state, &request))
    }
}

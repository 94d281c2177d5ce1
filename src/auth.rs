//! OAuth2 credential lifecycle and request authorization

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;
use yup_oauth2::ApplicationSecret;

use crate::consent::{ConsentFlow, ConsentRequest};
use crate::credential::{Credential, CredentialStore};
use crate::error::{IntegrationError, Result};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// Gmail API scopes required by the mail integration
///
/// These scopes provide:
/// - gmail.readonly: Search and read messages
/// - gmail.send: Send messages
/// - gmail.modify: Change read/starred state
/// - gmail.labels: List labels
pub const GMAIL_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.labels",
];

pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// OAuth error codes meaning the grant itself is no longer usable
const REJECTED_GRANT_ERRORS: &[&str] = &["invalid_grant", "invalid_client", "unauthorized_client"];

/// Attaches credentials to outbound requests
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, request: &mut HttpRequest) -> Result<()>;

    /// Whether `handle_rejection` can produce a different credential
    fn can_refresh(&self) -> bool;

    /// Called once after the provider rejected the credential on `request`
    async fn handle_rejection(&self, request: &HttpRequest) -> Result<()>;
}

/// A fixed secret sent as a header on every request
#[derive(Clone)]
pub struct StaticAuthorizer {
    header: String,
    value: String,
}

impl StaticAuthorizer {
    /// `<name>: <key>` API key header
    pub fn api_key(header: &str, key: impl Into<String>) -> Self {
        Self {
            header: header.to_string(),
            value: key.into(),
        }
    }

    /// `Authorization: Bearer <token>`
    pub fn bearer(token: &str) -> Self {
        Self {
            header: "Authorization".to_string(),
            value: format!("Bearer {}", token),
        }
    }

    /// `Authorization: Basic base64(<user>:<password>)`
    pub fn basic(user: &str, password: &str) -> Self {
        Self {
            header: "Authorization".to_string(),
            value: format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password))),
        }
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authorize(&self, request: &mut HttpRequest) -> Result<()> {
        request.set_header(&self.header, self.value.clone());
        Ok(())
    }

    fn can_refresh(&self) -> bool {
        false
    }

    async fn handle_rejection(&self, _request: &HttpRequest) -> Result<()> {
        Err(IntegrationError::auth(
            "provider rejected the configured API credential",
        ))
    }
}

/// Successful token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// OAuth error body (RFC 6749 section 5.2)
#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Owns consent and refresh; hands out credentials that are valid for use
///
/// The cached credential sits behind an async mutex held for the whole
/// load/refresh/consent sequence, so concurrent callers never race two
/// refreshes against each other.
pub struct AuthManager {
    secret: ApplicationSecret,
    scopes: Vec<String>,
    refresh_margin: ChronoDuration,
    store: Arc<dyn CredentialStore>,
    consent: Arc<dyn ConsentFlow>,
    transport: Arc<dyn HttpTransport>,
    current: Mutex<Option<Credential>>,
}

impl AuthManager {
    pub fn new(
        secret: ApplicationSecret,
        scopes: &[&str],
        store: Arc<dyn CredentialStore>,
        consent: Arc<dyn ConsentFlow>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            secret,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            refresh_margin: ChronoDuration::seconds(60),
            store,
            consent,
            transport,
            current: Mutex::new(None),
        }
    }

    /// Refresh this long before the recorded expiry
    pub fn with_refresh_margin(mut self, margin: std::time::Duration) -> Self {
        self.refresh_margin =
            ChronoDuration::from_std(margin).unwrap_or_else(|_| ChronoDuration::seconds(60));
        self
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Return a credential that is unexpired and carries every required scope
    ///
    /// Loads from the store, refreshes near expiry, or runs consent when
    /// nothing usable is stored. A valid credential is returned without any
    /// network call.
    pub async fn ensure_valid_credential(&self) -> Result<Credential> {
        let mut slot = self.current.lock().await;

        if slot.is_none() {
            *slot = self.store.load().await?;
        }

        let Some(credential) = slot.clone() else {
            info!("No stored credential, starting consent");
            return self.run_consent(&mut slot).await;
        };

        if !credential.covers(&self.scopes) {
            warn!("Stored credential lacks required scopes, starting consent");
            return self.run_consent(&mut slot).await;
        }

        if !credential.expires_within(self.refresh_margin, Utc::now()) {
            return Ok(credential);
        }

        match credential.refresh_token.clone() {
            Some(refresh_token) => self.refresh(&mut slot, credential, &refresh_token).await,
            None => {
                info!("Credential expired and has no refresh token, starting consent");
                self.run_consent(&mut slot).await
            }
        }
    }

    /// Always run consent, overwriting any stored credential
    pub async fn force_reauth(&self) -> Result<Credential> {
        let mut slot = self.current.lock().await;
        self.run_consent(&mut slot).await
    }

    /// Replace a credential the provider rejected before its recorded expiry
    ///
    /// If another caller already replaced `rejected_token`, the replacement is
    /// returned without a second refresh.
    pub async fn refresh_after_rejection(&self, rejected_token: &str) -> Result<Credential> {
        let mut slot = self.current.lock().await;

        if slot.is_none() {
            *slot = self.store.load().await?;
        }

        match slot.clone() {
            Some(current)
                if current.access_token != rejected_token
                    && current.is_valid_for(&self.scopes, self.refresh_margin, Utc::now()) =>
            {
                debug!("Credential was already replaced by a concurrent refresh");
                Ok(current)
            }
            Some(current) => match current.refresh_token.clone() {
                Some(refresh_token) => self.refresh(&mut slot, current, &refresh_token).await,
                None => self.run_consent(&mut slot).await,
            },
            None => self.run_consent(&mut slot).await,
        }
    }

    /// Forget the cached and stored credential
    pub async fn sign_out(&self) -> Result<()> {
        let mut slot = self.current.lock().await;
        *slot = None;
        self.store.clear().await?;
        info!("Signed out");
        Ok(())
    }

    /// Provider consent URL for the given redirect and anti-forgery state
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> Result<String> {
        let auth_uri = if self.secret.auth_uri.is_empty() {
            GOOGLE_AUTH_URI
        } else {
            self.secret.auth_uri.as_str()
        };
        let mut url = Url::parse(auth_uri).map_err(|e| {
            IntegrationError::validation(format!("Invalid OAuth authorization URI {:?}: {}", auth_uri, e))
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.secret.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state);
        Ok(url.into())
    }

    fn token_uri(&self) -> &str {
        if self.secret.token_uri.is_empty() {
            GOOGLE_TOKEN_URI
        } else {
            &self.secret.token_uri
        }
    }

    async fn run_consent(&self, slot: &mut Option<Credential>) -> Result<Credential> {
        let redirect_uri = self.consent.redirect_uri();
        let state = uuid::Uuid::new_v4().to_string();
        let request = ConsentRequest {
            authorization_url: self.authorization_url(&redirect_uri, &state)?,
            redirect_uri: redirect_uri.clone(),
            state,
        };

        let code = self.consent.obtain_code(&request).await?;

        let token_request = HttpRequest::post(self.token_uri()).form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
        ]);
        let response = self.post_token_request(token_request).await?;

        if !response.is_success() {
            let detail = token_error(&response);
            return Err(if response.status.is_server_error() {
                IntegrationError::Transport {
                    message: format!("Token exchange failed: {}", detail),
                    status: Some(response.status.as_u16()),
                }
            } else {
                IntegrationError::auth(format!("Authorization code exchange rejected: {}", detail))
            });
        }

        let granted = self.credential_from_response(&response, None)?;
        if !granted.covers(&self.scopes) {
            let missing: Vec<&str> = self
                .scopes
                .iter()
                .filter(|s| !granted.scopes.contains(*s))
                .map(|s| s.as_str())
                .collect();
            return Err(IntegrationError::auth(format!(
                "Consent did not grant required scopes: {}",
                missing.join(", ")
            )));
        }

        self.store.save(&granted).await?;
        info!("Consent completed, credential valid until {}", granted.expires_at);
        *slot = Some(granted.clone());
        Ok(granted)
    }

    async fn refresh(
        &self,
        slot: &mut Option<Credential>,
        previous: Credential,
        refresh_token: &str,
    ) -> Result<Credential> {
        debug!("Refreshing access token");
        let token_request = HttpRequest::post(self.token_uri()).form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
        ]);
        let response = self.post_token_request(token_request).await?;

        if !response.is_success() {
            let body: TokenErrorResponse = response.json().unwrap_or_default();
            let rejected = matches!(response.status.as_u16(), 400 | 401)
                || REJECTED_GRANT_ERRORS.contains(&body.error.as_str());

            if rejected {
                error!(
                    "Refresh token rejected ({}), clearing stored credential",
                    body.error
                );
                *slot = None;
                self.store.clear().await?;
                return Err(IntegrationError::auth(format!(
                    "Refresh rejected by provider: {}",
                    token_error(&response)
                )));
            }

            warn!("Token refresh failed with HTTP {}", response.status);
            return Err(IntegrationError::Transport {
                message: format!("Token refresh failed: {}", token_error(&response)),
                status: Some(response.status.as_u16()),
            });
        }

        let refreshed = self.credential_from_response(&response, Some(&previous))?;
        if !refreshed.covers(&self.scopes) {
            // A refresh cannot widen scopes; only consent can restore them
            warn!("Refreshed credential lacks required scopes, starting consent");
            return self.run_consent(slot).await;
        }
        self.store.save(&refreshed).await?;
        info!("Access token refreshed, valid until {}", refreshed.expires_at);
        *slot = Some(refreshed.clone());
        Ok(refreshed)
    }

    async fn post_token_request(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.transport.send(request).await.map_err(|e| {
            IntegrationError::transport(format!("Token endpoint unreachable: {}", e))
        })
    }

    /// Build a credential from a token response, keeping what the response omits
    fn credential_from_response(
        &self,
        response: &HttpResponse,
        previous: Option<&Credential>,
    ) -> Result<Credential> {
        let token: TokenResponse = response.json().map_err(|e| {
            IntegrationError::auth(format!("Malformed token endpoint response: {}", e))
        })?;

        let scopes: BTreeSet<String> = match token.scope {
            Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
            None => match previous {
                Some(previous) => previous.scopes.clone(),
                None => self.scopes.iter().cloned().collect(),
            },
        };

        let lifetime = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let expires_at = ChronoDuration::try_seconds(lifetime)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                IntegrationError::auth(format!(
                    "Malformed token endpoint response: expires_in {} is out of range",
                    lifetime
                ))
            })?;

        Ok(Credential {
            access_token: token.access_token,
            refresh_token: token
                .refresh_token
                .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
            expires_at,
            scopes,
        })
    }
}

#[async_trait]
impl Authorizer for AuthManager {
    async fn authorize(&self, request: &mut HttpRequest) -> Result<()> {
        let credential = self.ensure_valid_credential().await?;
        request.set_header("Authorization", format!("Bearer {}", credential.access_token));
        Ok(())
    }

    fn can_refresh(&self) -> bool {
        true
    }

    async fn handle_rejection(&self, request: &HttpRequest) -> Result<()> {
        let rejected = request
            .header_value("Authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or_default();
        self.refresh_after_rejection(rejected).await.map(|_| ())
    }
}

fn token_error(response: &HttpResponse) -> String {
    match response.json::<TokenErrorResponse>() {
        Ok(body) if !body.error.is_empty() => match body.error_description {
            Some(description) => format!("{} ({})", body.error, description),
            None => body.error,
        },
        _ => format!("HTTP {}", response.status),
    }
}

/// Load the provider-issued client secret JSON (`installed` or `web` format)
pub async fn load_application_secret(path: &Path) -> Result<ApplicationSecret> {
    yup_oauth2::read_application_secret(path)
        .await
        .map_err(|e| {
            IntegrationError::validation(format!(
                "Failed to read OAuth client secret {:?}: {}",
                path, e
            ))
        })
}

/// Load OAuth2 client identity from environment variables
///
/// # Environment Variables
/// - `GMAIL_CLIENT_ID`: OAuth2 client ID
/// - `GMAIL_CLIENT_SECRET`: OAuth2 client secret
/// - `GMAIL_REDIRECT_URI`: Redirect URI (optional, defaults to http://localhost:8080)
pub fn application_secret_from_env() -> Result<ApplicationSecret> {
    let client_id = env::var("GMAIL_CLIENT_ID")
        .map_err(|_| IntegrationError::validation("GMAIL_CLIENT_ID not set"))?;
    let client_secret = env::var("GMAIL_CLIENT_SECRET")
        .map_err(|_| IntegrationError::validation("GMAIL_CLIENT_SECRET not set"))?;
    let redirect_uri =
        env::var("GMAIL_REDIRECT_URI").unwrap_or_else(|_| "http://localhost:8080".to_string());

    Ok(ApplicationSecret {
        client_id,
        client_secret,
        auth_uri: GOOGLE_AUTH_URI.to_string(),
        token_uri: GOOGLE_TOKEN_URI.to_string(),
        redirect_uris: vec![redirect_uri],
        ..Default::default()
    })
}

/// Environment identity wins over the client secret file
pub async fn resolve_application_secret(path: &Path) -> Result<ApplicationSecret> {
    if env::var("GMAIL_CLIENT_ID").is_ok() {
        debug!("Using OAuth client identity from environment");
        return application_secret_from_env();
    }
    load_application_secret(path).await
}

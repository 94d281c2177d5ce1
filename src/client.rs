//! Generic resilient client shared by every integration
//!
//! Each call goes through the same pipeline:
//! 1. The [`Authorizer`] attaches (and if needed refreshes) credentials
//! 2. The [`RateLimiter`] spaces the call within its endpoint group
//! 3. The [`HttpTransport`] executes it
//! 4. A provider-specific [`FailureClassifier`] turns the outcome into success or a [`Failure`]
//! 5. The [`RetryPolicy`] decides whether to wait, refresh, or give up
//!
//! Providers only supply classification rules, endpoint groups and the
//! mapping of responses into domain records.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::Authorizer;
use crate::error::{parse_retry_after, Failure, FailureKind, Result};
use crate::rate_limiter::RateLimiter;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::transport::{decode_error, HttpRequest, HttpResponse, HttpTransport, TransportFailure};

/// Decides whether a provider response is a success or a classified failure
pub trait FailureClassifier: Send + Sync {
    /// `None` when the response is a success
    fn classify(&self, response: &HttpResponse) -> Option<Failure>;

    fn classify_transport(&self, failure: &TransportFailure) -> Failure {
        match failure {
            TransportFailure::Timeout(_) | TransportFailure::Connect(_) => {
                Failure::new(FailureKind::Transient, None, failure.to_string())
            }
            TransportFailure::InvalidRequest(_) => {
                Failure::new(FailureKind::Permanent, None, failure.to_string())
            }
        }
    }
}

/// Plain HTTP status semantics
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusClassifier;

impl FailureClassifier for StatusClassifier {
    fn classify(&self, response: &HttpResponse) -> Option<Failure> {
        if response.is_success() {
            return None;
        }

        let status = response.status.as_u16();
        let message = error_message(response);
        let kind = match status {
            401 => FailureKind::AuthExpired,
            429 => FailureKind::RateLimited {
                retry_after: parse_retry_after(&response.headers),
            },
            408 | 500..=599 => FailureKind::Transient,
            _ => FailureKind::Permanent,
        };
        Some(Failure::new(kind, Some(status), message))
    }
}

/// Google APIs also report quota exhaustion as 403 with a reason code
#[derive(Debug, Default, Clone, Copy)]
pub struct GoogleClassifier;

const GOOGLE_RATE_LIMIT_REASONS: &[&str] = &["rateLimitExceeded", "userRateLimitExceeded"];

impl FailureClassifier for GoogleClassifier {
    fn classify(&self, response: &HttpResponse) -> Option<Failure> {
        let mut failure = StatusClassifier.classify(response)?;

        if failure.status == Some(403) {
            let body: Value = response.json().unwrap_or(Value::Null);
            let rate_limited = body["error"]["errors"]
                .as_array()
                .map(|errors| {
                    errors.iter().any(|e| {
                        e["reason"]
                            .as_str()
                            .is_some_and(|r| GOOGLE_RATE_LIMIT_REASONS.contains(&r))
                    })
                })
                .unwrap_or(false);

            if rate_limited {
                failure.kind = FailureKind::RateLimited {
                    retry_after: parse_retry_after(&response.headers),
                };
            }
        }
        Some(failure)
    }
}

/// Slack answers most failures with HTTP 200 and `{"ok": false, "error": ...}`
#[derive(Debug, Default, Clone, Copy)]
pub struct SlackClassifier;

impl FailureClassifier for SlackClassifier {
    fn classify(&self, response: &HttpResponse) -> Option<Failure> {
        if !response.is_success() {
            return StatusClassifier.classify(response);
        }

        let body: Value = response.json().ok()?;
        if body["ok"].as_bool() != Some(false) {
            return None;
        }

        let code = body["error"].as_str().unwrap_or("unknown_error");
        let kind = match code {
            "ratelimited" => FailureKind::RateLimited {
                retry_after: parse_retry_after(&response.headers),
            },
            "invalid_auth" | "token_expired" | "token_revoked" | "not_authed"
            | "account_inactive" => FailureKind::AuthExpired,
            "internal_error" | "service_unavailable" | "fatal_error" | "request_timeout" => {
                FailureKind::Transient
            }
            _ => FailureKind::Permanent,
        };
        Some(Failure::new(
            kind,
            Some(response.status.as_u16()),
            format!("Slack API error: {}", code),
        ))
    }
}

/// Best-effort human readable error from a provider error body
pub fn error_message(response: &HttpResponse) -> String {
    let body: Value = response.json().unwrap_or(Value::Null);
    let message = body["error"]["message"]
        .as_str()
        .or_else(|| body["error"].as_str())
        .or_else(|| body["message"].as_str());

    match message {
        Some(message) => format!("HTTP {}: {}", response.status.as_u16(), message),
        None => format!("HTTP {}", response.status.as_u16()),
    }
}

/// Authorizer, rate limiter, retry policy and classifier around one transport
pub struct ResilientClient {
    provider: String,
    transport: Arc<dyn HttpTransport>,
    authorizer: Arc<dyn Authorizer>,
    classifier: Arc<dyn FailureClassifier>,
    limiter: RateLimiter,
    policy: RetryPolicy,
}

impl ResilientClient {
    pub fn new(
        provider: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        authorizer: Arc<dyn Authorizer>,
        classifier: Arc<dyn FailureClassifier>,
        limiter: RateLimiter,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider: provider.into(),
            transport,
            authorizer,
            classifier,
            limiter,
            policy,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute one logical call, retrying according to the policy
    ///
    /// Returns the successful response, or the classified failure of the last
    /// attempt converted into an [`crate::IntegrationError`].
    pub async fn execute(&self, endpoint_group: &str, request: HttpRequest) -> Result<HttpResponse> {
        let mut state = self.policy.start();

        loop {
            let mut attempt = request.clone();
            self.authorizer.authorize(&mut attempt).await?;
            self.limiter.wait_if_needed(endpoint_group).await;

            let n = state.begin_attempt();
            debug!(
                provider = %self.provider,
                group = endpoint_group,
                attempt = n,
                "{} {}",
                attempt.method,
                attempt.path()
            );

            let failure = match self.transport.send(attempt.clone()).await {
                Ok(response) => match self.classifier.classify(&response) {
                    None => return Ok(response),
                    Some(failure) => failure,
                },
                Err(e) => self.classifier.classify_transport(&e),
            };

            match state.decide(&failure, self.authorizer.can_refresh()) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        "{} {} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        self.provider,
                        endpoint_group,
                        n,
                        self.policy.max_retries + 1,
                        failure.message,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::RefreshCredentials => {
                    info!(
                        "{} rejected the credential, refreshing once",
                        self.provider
                    );
                    self.authorizer.handle_rejection(&attempt).await?;
                }
                RetryDecision::GiveUp => {
                    debug!(
                        "{} {} giving up after {} attempts, waited {:?}",
                        self.provider,
                        endpoint_group,
                        state.attempts(),
                        state.total_wait()
                    );
                    return Err(failure.into_error(state.attempts()));
                }
            }
        }
    }

    /// [`Self::execute`] and deserialize the body
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        endpoint_group: &str,
        request: HttpRequest,
    ) -> Result<T> {
        let response = self.execute(endpoint_group, request).await?;
        response
            .json()
            .map_err(|e| decode_error(&self.provider, e))
    }
}

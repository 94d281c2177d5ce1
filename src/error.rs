use hyper::HeaderMap;
use std::time::Duration;
use thiserror::Error;

/// Type alias for Result with IntegrationError
pub type Result<T> = std::result::Result<T, IntegrationError>;

/// Errors surfaced by every integration facade
///
/// Provider-native and transport errors never escape a facade; they are
/// classified into one of these four kinds first.
#[derive(Error, Debug)]
pub enum IntegrationError {
    /// Credentials are missing, were rejected, or consent could not be completed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Provider kept rate-limiting after all retries
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Caller-supplied input was rejected before any network call
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Everything else, including exhausted transient failures
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },
}

impl IntegrationError {
    pub fn auth(message: impl Into<String>) -> Self {
        IntegrationError::Authentication(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        IntegrationError::Validation(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        IntegrationError::Transport {
            message: message.into(),
            status: None,
        }
    }

    /// HTTP status of the final provider response, when there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            IntegrationError::Transport { status, .. } => *status,
            IntegrationError::RateLimit { .. } => Some(429),
            _ => None,
        }
    }

    /// Check if the error is transient and the whole call may be retried later
    pub fn is_transient(&self) -> bool {
        match self {
            IntegrationError::RateLimit { .. } => true,
            IntegrationError::Transport { status, .. } => {
                matches!(status, None | Some(408) | Some(500..=599))
            }
            _ => false,
        }
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// How a failed call attempt should be treated by the retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Network failure, timeout, or 5xx
    Transient,
    /// Provider-reported rate limit, optionally with a retry hint
    RateLimited { retry_after: Option<Duration> },
    /// The credential was rejected (401 or equivalent)
    AuthExpired,
    /// Will not succeed without changing the request
    Permanent,
}

/// A classified failure of a single call attempt
#[derive(Debug, Clone)]
pub struct Failure {
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::Transient | FailureKind::RateLimited { .. }
        )
    }

    /// Convert into the caller-facing error once retrying has stopped
    pub fn into_error(self, attempts: u32) -> IntegrationError {
        match self.kind {
            FailureKind::AuthExpired => IntegrationError::Authentication(format!(
                "credentials rejected by provider: {}",
                self.message
            )),
            FailureKind::RateLimited { retry_after } => IntegrationError::RateLimit {
                message: format!("{} (after {} attempts)", self.message, attempts),
                retry_after,
            },
            FailureKind::Transient => IntegrationError::Transport {
                message: format!("{} (after {} attempts)", self.message, attempts),
                status: self.status,
            },
            FailureKind::Permanent if self.status == Some(403) => {
                IntegrationError::Authentication(format!("access forbidden: {}", self.message))
            }
            FailureKind::Permanent => IntegrationError::Transport {
                message: self.message,
                status: self.status,
            },
        }
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// The Retry-After header can be specified in two formats:
/// 1. Delay-seconds: An integer indicating seconds to wait (e.g., "120")
/// 2. HTTP-date: An HTTP date format (e.g., "Wed, 21 Oct 2015 07:28:00 GMT")
///
/// Returns `None` when the header is missing, invalid, or names a past date,
/// leaving the delay to the backoff schedule.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let http_date = httpdate::parse_http_date(value).ok()?;
    http_date.duration_since(std::time::SystemTime::now()).ok()
}

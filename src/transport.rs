//! Raw HTTP boundary shared by the token endpoint and every resource endpoint

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{HeaderMap, Method, StatusCode};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::error::{IntegrationError, Result};

const SENSITIVE_HEADERS: &[&str] = &["authorization", "x-api-key", "x-goog-api-key"];

/// An outbound call, independent of the HTTP client that executes it
#[derive(Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    /// Append a URL-encoded query parameter
    pub fn query(mut self, key: &str, value: impl fmt::Display) -> Self {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        self.url.push(separator);
        self.url.push_str(&urlencoding::encode(key));
        self.url.push('=');
        self.url.push_str(&urlencoding::encode(&value.to_string()));
        self
    }

    /// Set a header, replacing any existing value with the same name
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(self, value: &serde_json::Value) -> Self {
        let mut request = self.header("Content-Type", "application/json");
        request.body = Some(Bytes::from(value.to_string()));
        request
    }

    pub fn form(self, pairs: &[(&str, &str)]) -> Self {
        let encoded = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let mut request = self.header("Content-Type", "application/x-www-form-urlencoded");
        request.body = Some(Bytes::from(encoded));
        request
    }

    /// Path component of the URL, without scheme, host, or query
    pub fn path(&self) -> String {
        Url::parse(&self.url)
            .map(|url| url.path().to_string())
            .unwrap_or_else(|_| "/".to_string())
    }

    /// Decoded value of a query parameter
    pub fn query_param(&self, key: &str) -> Option<String> {
        Url::parse(&self.url)
            .ok()?
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(n, v)| {
                let shown = if SENSITIVE_HEADERS
                    .iter()
                    .any(|s| n.eq_ignore_ascii_case(s))
                {
                    "<redacted>"
                } else {
                    v.as_str()
                };
                (n.as_str(), shown)
            })
            .collect();
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("body_len", &self.body.as_ref().map(|b| b.len()))
            .finish()
    }
}

/// A fully buffered response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Failures that happen before a response is received
#[derive(Error, Debug, Clone)]
pub enum TransportFailure {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request could not be built: {0}")]
    InvalidRequest(String),
}

/// Executes one HTTP exchange
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportFailure>;
}

/// Production transport over hyper with rustls
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    request_timeout: Duration,
}

impl HyperTransport {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        install_crypto_provider();

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(connect_timeout));

        let builder = match hyper_rustls::HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder,
            Err(e) => {
                warn!("Native TLS roots unavailable ({}), using bundled roots", e);
                hyper_rustls::HttpsConnectorBuilder::new().with_webpki_roots()
            }
        };
        let https = builder.https_or_http().enable_http1().wrap_connector(http);

        let client = Client::builder(TokioExecutor::new()).build(https);

        Ok(Self {
            client,
            request_timeout,
        })
    }
}

#[async_trait]
impl HttpTransport for HyperTransport {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportFailure> {
        let mut builder = hyper::Request::builder()
            .method(request.method.clone())
            .uri(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let body = Full::new(request.body.clone().unwrap_or_default());
        let req = builder
            .body(body)
            .map_err(|e| TransportFailure::InvalidRequest(e.to_string()))?;

        debug!("{} {}", request.method, request.path());

        let exchange = async {
            let response = self
                .client
                .request(req)
                .await
                .map_err(|e| TransportFailure::Connect(e.to_string()))?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| TransportFailure::Connect(format!("failed to read body: {}", e)))?
                .to_bytes();
            Ok::<_, TransportFailure>(HttpResponse {
                status,
                headers,
                body,
            })
        };

        match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TransportFailure::Timeout(self.request_timeout)),
        }
    }
}

/// Install the process-wide rustls crypto provider; repeated calls are harmless
pub fn install_crypto_provider() {
    #[cfg(not(windows))]
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    #[cfg(windows)]
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Convert a provider response body that failed to deserialize
pub fn decode_error(context: &str, error: serde_json::Error) -> IntegrationError {
    IntegrationError::transport(format!("Unexpected {} response: {}", context, error))
}

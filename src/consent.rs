//! Interactive OAuth2 consent
//!
//! The browser step depends on the host environment, so the authentication
//! manager only sees the [`ConsentFlow`] trait. [`LoopbackConsent`] runs the
//! real desktop flow; [`StaticCodeConsent`] returns a pre-canned code.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{IntegrationError, Result};

/// Everything a consent flow needs to obtain an authorization code
#[derive(Debug, Clone)]
pub struct ConsentRequest {
    pub authorization_url: String,
    pub redirect_uri: String,
    /// Anti-forgery value the callback must echo back
    pub state: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsentFlow: Send + Sync {
    /// Redirect URI registered with the provider for this flow
    fn redirect_uri(&self) -> String;

    /// Obtain an authorization code from the resource owner
    async fn obtain_code(&self, request: &ConsentRequest) -> Result<String>;
}

/// Opens the system browser and captures the redirect on a local port
#[derive(Debug, Clone)]
pub struct LoopbackConsent {
    port: u16,
    timeout: Duration,
    open_browser: bool,
}

impl LoopbackConsent {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self {
            port,
            timeout,
            open_browser: true,
        }
    }

    /// Only print the URL; for hosts without a usable browser
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    /// Serve redirect requests until one carries a decision. Each connection
    /// runs on its own task so an idle browser preconnect cannot stall the flow.
    async fn wait_for_callback(&self, listener: TcpListener, expected_state: &str) -> Result<String> {
        let expected: Arc<str> = Arc::from(expected_state);
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<Result<String>>();

        loop {
            tokio::select! {
                Some(outcome) = outcome_rx.recv() => return outcome,
                accepted = listener.accept() => {
                    let (stream, peer) = accepted.map_err(|e| {
                        IntegrationError::auth(format!("Failed to accept consent callback: {}", e))
                    })?;
                    debug!("Consent callback connection from {}", peer);

                    let expected = expected.clone();
                    let outcome_tx = outcome_tx.clone();
                    let service = service_fn(move |request: Request<Incoming>| {
                        let params = CallbackParams::from_query(request.uri().query());
                        let response = match params.into_callback(&expected) {
                            Callback::Stray => page(StatusCode::NOT_FOUND, "Not found"),
                            Callback::Denied(error) => {
                                let _ = outcome_tx.send(Err(IntegrationError::auth(format!(
                                    "Consent was not granted: {}",
                                    error
                                ))));
                                page(StatusCode::BAD_REQUEST, "Authorization was denied.")
                            }
                            Callback::StateMismatch => {
                                let _ = outcome_tx.send(Err(IntegrationError::auth(
                                    "Consent callback state did not match the request",
                                )));
                                page(StatusCode::BAD_REQUEST, "Authorization state mismatch.")
                            }
                            Callback::Granted(code) => {
                                let _ = outcome_tx.send(Ok(code));
                                page(
                                    StatusCode::OK,
                                    "Authentication successful! You can close this window.",
                                )
                            }
                        };
                        async move { Ok::<_, Infallible>(response) }
                    });

                    tokio::spawn(async move {
                        if let Err(e) = http1::Builder::new()
                            .keep_alive(false)
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!("Consent callback connection from {} ended: {}", peer, e);
                        }
                    });
                }
            }
        }
    }
}

#[async_trait]
impl ConsentFlow for LoopbackConsent {
    fn redirect_uri(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    async fn obtain_code(&self, request: &ConsentRequest) -> Result<String> {
        let listener = TcpListener::bind(("127.0.0.1", self.port))
            .await
            .map_err(|e| {
                IntegrationError::auth(format!(
                    "Could not listen for the consent redirect on port {}: {}",
                    self.port, e
                ))
            })?;

        println!("\n=== Authorization Required ===");
        println!("Visit this URL to grant access:\n\n{}\n", request.authorization_url);

        if self.open_browser {
            if let Err(e) = webbrowser::open(&request.authorization_url) {
                warn!("Failed to open browser: {}. Open the URL manually.", e);
            }
        }

        info!(
            "Waiting up to {}s for the consent redirect",
            self.timeout.as_secs()
        );
        match tokio::time::timeout(self.timeout, self.wait_for_callback(listener, &request.state))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(IntegrationError::auth(format!(
                "Consent was not completed within {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// Returns a pre-canned authorization code and counts invocations
#[derive(Debug)]
pub struct StaticCodeConsent {
    code: String,
    redirect_uri: String,
    calls: AtomicUsize,
}

impl StaticCodeConsent {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            redirect_uri: "http://localhost".to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConsentFlow for StaticCodeConsent {
    fn redirect_uri(&self) -> String {
        self.redirect_uri.clone()
    }

    async fn obtain_code(&self, _request: &ConsentRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.code.clone())
    }
}

/// For non-interactive deployments: consent always fails
#[derive(Debug, Default, Clone)]
pub struct DisabledConsent;

#[async_trait]
impl ConsentFlow for DisabledConsent {
    fn redirect_uri(&self) -> String {
        "http://localhost".to_string()
    }

    async fn obtain_code(&self, _request: &ConsentRequest) -> Result<String> {
        Err(IntegrationError::auth(
            "interactive consent unavailable; run `workbridge auth` on a machine with a browser",
        ))
    }
}

/// Query parameters of the redirect request
#[derive(Debug, Default, PartialEq, Eq)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// What a single redirect request means for the flow
#[derive(Debug, PartialEq, Eq)]
enum Callback {
    /// Favicon and other requests without a decision
    Stray,
    Denied(String),
    StateMismatch,
    Granted(String),
}

impl CallbackParams {
    fn from_query(query: Option<&str>) -> Self {
        let mut params = CallbackParams::default();
        let Some(query) = query else {
            return params;
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }

    fn into_callback(self, expected_state: &str) -> Callback {
        if let Some(error) = self.error {
            return Callback::Denied(error);
        }
        let Some(code) = self.code else {
            return Callback::Stray;
        };
        if self.state.as_deref() != Some(expected_state) {
            return Callback::StateMismatch;
        }
        Callback::Granted(code)
    }
}

fn page(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = format!("<html><body><h1>{}</h1></body></html>", message);
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
    response
}

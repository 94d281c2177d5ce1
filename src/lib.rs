//! Productivity Integrations
//!
//! Resilient clients for the services a personal productivity assistant talks
//! to: mail (Gmail), chat (Slack), time tracking (Toggl Track) and two text
//! generation providers (Anthropic, Gemini).
//!
//! # Overview
//!
//! Every integration is a thin facade over one [`client::ResilientClient`]:
//! - **Authentication**: OAuth2 consent and refresh for mail, static API keys elsewhere
//! - **Rate limiting**: minimum spacing between calls of one endpoint group
//! - **Retry**: bounded exponential backoff honoring provider retry hints
//! - **Classification**: provider-specific mapping of responses to failure kinds
//! - **Normalization**: provider payloads become plain domain records
//!
//! # Example Usage
//!
//! ```no_run
//! use productivity_integrations::config::Config;
//! use productivity_integrations::consent::LoopbackConsent;
//! use productivity_integrations::mail::MailFacade;
//! use productivity_integrations::transport::{install_crypto_provider, HyperTransport};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     install_crypto_provider();
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let transport = Arc::new(HyperTransport::new(
//!         config.transport.connect_timeout(),
//!         config.transport.request_timeout(),
//!     )?);
//!     let consent = Arc::new(LoopbackConsent::new(8080, Duration::from_secs(300)));
//!     let mail = MailFacade::from_config(&config.mail, transport, consent).await?;
//!
//!     for message in mail.unread(None, 10).await? {
//!         println!("{}: {}", message.sender, message.subject);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 credential lifecycle and request authorizers
//! - [`client`] - Generic resilient client and failure classifiers
//! - [`compose`] - Outgoing MIME message construction
//! - [`config`] - Configuration management
//! - [`consent`] - Interactive consent flows
//! - [`credential`] - Credential record and persistent store
//! - [`error`] - Error types and result aliases
//! - [`mail`], [`slack`], [`toggl`], [`anthropic`], [`gemini`] - Provider facades
//! - [`models`] - Normalized mail records and Gmail wire types
//! - [`rate_limiter`] / [`retry`] - Throttling and retry policy
//! - [`transport`] - HTTP boundary

pub mod anthropic;
pub mod auth;
pub mod cli;
pub mod client;
pub mod compose;
pub mod config;
pub mod consent;
pub mod credential;
pub mod error;
pub mod gemini;
pub mod generation;
pub mod mail;
pub mod models;
pub mod normalize;
pub mod rate_limiter;
pub mod retry;
pub mod slack;
pub mod toggl;
pub mod transport;

// Re-export commonly used types for convenience
pub use error::{IntegrationError, Result};

// Core data models
pub use models::{FlagChange, Label, Message, OutgoingMail, Profile, SentMessage};

// Resilience building blocks
pub use client::{FailureClassifier, ResilientClient};
pub use rate_limiter::RateLimiter;
pub use retry::RetryPolicy;

// Authentication
pub use auth::{AuthManager, Authorizer, StaticAuthorizer};
pub use consent::{ConsentFlow, DisabledConsent, LoopbackConsent, StaticCodeConsent};
pub use credential::{Credential, CredentialStore, FileCredentialStore};

// Config types
pub use config::{Config, Secrets};

// Facades
pub use anthropic::AnthropicFacade;
pub use gemini::GeminiFacade;
pub use generation::{CompletionRequest, TextGenerator};
pub use mail::MailFacade;
pub use slack::SlackFacade;
pub use toggl::TogglFacade;

// Transport
pub use transport::{HttpRequest, HttpResponse, HttpTransport, HyperTransport};

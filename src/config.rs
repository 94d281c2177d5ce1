use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{IntegrationError, Result};
use crate::retry::RetryPolicy;

/// Configuration bundle consumed by every facade constructor
///
/// Secrets never live here; see [`Secrets`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub toggl: TogglConfig,
    #[serde(default)]
    pub anthropic: AnthropicConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Built-in throttling and retry bounds for one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitDefaults {
    pub min_request_interval: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

pub const GMAIL_LIMITS: LimitDefaults = LimitDefaults {
    min_request_interval: Duration::from_millis(100),
    max_retries: 3,
    base_delay: Duration::from_secs(1),
    max_delay: Duration::from_secs(30),
};

pub const SLACK_LIMITS: LimitDefaults = LimitDefaults {
    min_request_interval: Duration::from_millis(1000),
    max_retries: 3,
    base_delay: Duration::from_secs(1),
    max_delay: Duration::from_secs(30),
};

pub const TOGGL_LIMITS: LimitDefaults = LimitDefaults {
    min_request_interval: Duration::from_millis(1000),
    max_retries: 3,
    base_delay: Duration::from_secs(1),
    max_delay: Duration::from_secs(30),
};

pub const AI_LIMITS: LimitDefaults = LimitDefaults {
    min_request_interval: Duration::ZERO,
    max_retries: 3,
    base_delay: Duration::from_secs(2),
    max_delay: Duration::from_secs(60),
};

/// Per-provider `[<provider>.limits]` table; unset keys use the provider's defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_request_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub honor_retry_after: Option<bool>,
}

/// Effective limits after applying defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLimits {
    pub min_request_interval: Duration,
    pub retry: RetryPolicy,
}

impl LimitsConfig {
    /// Fully populated table, as written by `create_example`
    pub fn from_defaults(defaults: &LimitDefaults) -> Self {
        Self {
            min_request_interval_ms: Some(defaults.min_request_interval.as_millis() as u64),
            max_retries: Some(defaults.max_retries),
            base_delay_ms: Some(defaults.base_delay.as_millis() as u64),
            max_delay_ms: Some(defaults.max_delay.as_millis() as u64),
            honor_retry_after: Some(true),
        }
    }

    pub fn resolve(&self, defaults: &LimitDefaults) -> ResolvedLimits {
        let ms = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_millis).unwrap_or(fallback)
        };
        ResolvedLimits {
            min_request_interval: ms(self.min_request_interval_ms, defaults.min_request_interval),
            retry: RetryPolicy {
                max_retries: self.max_retries.unwrap_or(defaults.max_retries),
                base_delay: ms(self.base_delay_ms, defaults.base_delay),
                max_delay: ms(self.max_delay_ms, defaults.max_delay),
                honor_retry_after: self.honor_retry_after.unwrap_or(true),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_api_base_gmail")]
    pub api_base: String,
    /// Provider-issued OAuth client secret JSON
    #[serde(default = "default_client_secret_path")]
    pub client_secret_path: PathBuf,
    /// Where the credential bundle is persisted; keep out of version control
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
    #[serde(default = "default_redirect_port")]
    pub redirect_port: u16,
    #[serde(default = "default_consent_timeout_secs")]
    pub consent_timeout_secs: u64,
    /// Sender address; the authenticated account when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base_gmail(),
            client_secret_path: default_client_secret_path(),
            token_path: default_token_path(),
            redirect_port: default_redirect_port(),
            consent_timeout_secs: default_consent_timeout_secs(),
            sender: None,
            refresh_margin_secs: default_refresh_margin_secs(),
            page_size: default_page_size(),
            limits: LimitsConfig::from_defaults(&GMAIL_LIMITS),
        }
    }
}

impl MailConfig {
    pub fn limits(&self) -> ResolvedLimits {
        self.limits.resolve(&GMAIL_LIMITS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default = "default_api_base_slack")]
    pub api_base: String,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base_slack(),
            limits: LimitsConfig::from_defaults(&SLACK_LIMITS),
        }
    }
}

impl SlackConfig {
    pub fn limits(&self) -> ResolvedLimits {
        self.limits.resolve(&SLACK_LIMITS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TogglConfig {
    #[serde(default = "default_api_base_toggl")]
    pub api_base: String,
    /// Overridden by `TOGGL_WORKSPACE_ID`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<u64>,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for TogglConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base_toggl(),
            workspace_id: None,
            limits: LimitsConfig::from_defaults(&TOGGL_LIMITS),
        }
    }
}

impl TogglConfig {
    pub fn limits(&self) -> ResolvedLimits {
        self.limits.resolve(&TOGGL_LIMITS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default = "default_api_base_anthropic")]
    pub api_base: String,
    #[serde(default = "default_anthropic_model")]
    pub model: String,
    #[serde(default = "default_anthropic_version")]
    pub api_version: String,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base_anthropic(),
            model: default_anthropic_model(),
            api_version: default_anthropic_version(),
            limits: LimitsConfig::from_defaults(&AI_LIMITS),
        }
    }
}

impl AnthropicConfig {
    pub fn limits(&self) -> ResolvedLimits {
        self.limits.resolve(&AI_LIMITS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_api_base_gemini")]
    pub api_base: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base_gemini(),
            model: default_gemini_model(),
            limits: LimitsConfig::from_defaults(&AI_LIMITS),
        }
    }
}

impl GeminiConfig {
    pub fn limits(&self) -> ResolvedLimits {
        self.limits.resolve(&AI_LIMITS)
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_api_base_gmail() -> String {
    "https://gmail.googleapis.com/gmail/v1/users/me".to_string()
}

fn default_client_secret_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_token_path() -> PathBuf {
    PathBuf::from("credentials/gmail_token.json")
}

fn default_redirect_port() -> u16 {
    8080
}

fn default_consent_timeout_secs() -> u64 {
    300
}

fn default_refresh_margin_secs() -> u64 {
    60
}

fn default_page_size() -> u32 {
    100
}

fn default_api_base_slack() -> String {
    "https://slack.com/api".to_string()
}

fn default_api_base_toggl() -> String {
    "https://api.track.toggl.com/api/v9".to_string()
}

fn default_api_base_anthropic() -> String {
    "https://api.anthropic.com/v1".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_anthropic_version() -> String {
    "2023-06-01".to_string()
}

fn default_api_base_gemini() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_gemini_model() -> String {
    "gemini-1.5-pro".to_string()
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            IntegrationError::validation(format!("Failed to read config file: {}", e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            IntegrationError::validation(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    IntegrationError::validation(format!(
                        "Failed to create config directory: {}",
                        e
                    ))
                })?;
            }
        }

        let content = toml::to_string_pretty(self).map_err(|e| {
            IntegrationError::validation(format!("Failed to serialize config: {}", e))
        })?;

        tokio::fs::write(path, content).await.map_err(|e| {
            IntegrationError::validation(format!("Failed to write config file: {}", e))
        })?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.transport.connect_timeout_secs == 0 {
            return Err(IntegrationError::validation(
                "transport.connect_timeout_secs must be greater than 0",
            ));
        }
        if self.transport.request_timeout_secs == 0 {
            return Err(IntegrationError::validation(
                "transport.request_timeout_secs must be greater than 0",
            ));
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(IntegrationError::validation(format!(
                    "Invalid logging.format: '{}'. Must be 'pretty' or 'json'",
                    other
                )));
            }
        }

        if self.mail.page_size == 0 || self.mail.page_size > 500 {
            return Err(IntegrationError::validation(
                "mail.page_size must be between 1 and 500",
            ));
        }
        if self.mail.consent_timeout_secs == 0 {
            return Err(IntegrationError::validation(
                "mail.consent_timeout_secs must be greater than 0",
            ));
        }

        let providers = [
            ("mail", self.mail.limits()),
            ("slack", self.slack.limits()),
            ("toggl", self.toggl.limits()),
            ("anthropic", self.anthropic.limits()),
            ("gemini", self.gemini.limits()),
        ];
        for (name, limits) in providers {
            validate_limits(name, &limits)?;
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}

fn validate_limits(provider: &str, limits: &ResolvedLimits) -> Result<()> {
    let retry = &limits.retry;
    if retry.base_delay.is_zero() {
        return Err(IntegrationError::validation(format!(
            "{}.limits.base_delay_ms must be greater than 0",
            provider
        )));
    }
    if retry.max_delay < retry.base_delay {
        return Err(IntegrationError::validation(format!(
            "{}.limits.max_delay_ms cannot be less than base_delay_ms",
            provider
        )));
    }
    if retry.max_retries > 10 {
        return Err(IntegrationError::validation(format!(
            "{}.limits.max_retries cannot exceed 10",
            provider
        )));
    }
    Ok(())
}

/// API secrets, read from the environment only
#[derive(Clone, Default)]
pub struct Secrets {
    pub slack_bot_token: Option<String>,
    pub toggl_api_token: Option<String>,
    pub toggl_workspace_id: Option<u64>,
    pub anthropic_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

impl Secrets {
    /// # Environment Variables
    /// - `SLACK_BOT_TOKEN`
    /// - `TOGGL_API_TOKEN`, `TOGGL_WORKSPACE_ID`
    /// - `ANTHROPIC_API_KEY` (falls back to `CLAUDE_API_KEY`)
    /// - `GEMINI_API_KEY`
    pub fn from_env() -> Result<Self> {
        let toggl_workspace_id = match non_empty_env("TOGGL_WORKSPACE_ID") {
            Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
                IntegrationError::validation(format!(
                    "TOGGL_WORKSPACE_ID must be a number, got '{}'",
                    raw
                ))
            })?),
            None => None,
        };

        Ok(Self {
            slack_bot_token: non_empty_env("SLACK_BOT_TOKEN"),
            toggl_api_token: non_empty_env("TOGGL_API_TOKEN"),
            toggl_workspace_id,
            anthropic_api_key: non_empty_env("ANTHROPIC_API_KEY")
                .or_else(|| non_empty_env("CLAUDE_API_KEY")),
            gemini_api_key: non_empty_env("GEMINI_API_KEY"),
        })
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("slack_bot_token", &set(&self.slack_bot_token))
            .field("toggl_api_token", &set(&self.toggl_api_token))
            .field("toggl_workspace_id", &self.toggl_workspace_id)
            .field("anthropic_api_key", &set(&self.anthropic_api_key))
            .field("gemini_api_key", &set(&self.gemini_api_key))
            .finish()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

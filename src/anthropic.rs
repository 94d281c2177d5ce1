//! Anthropic Messages API facade

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::auth::StaticAuthorizer;
use crate::client::{ResilientClient, StatusClassifier};
use crate::config::AnthropicConfig;
use crate::error::{IntegrationError, Result};
use crate::generation::{CompletionRequest, TextGenerator};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::transport::{HttpRequest, HttpTransport};

pub const GROUP_MESSAGES: &str = "anthropic.messages";

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

pub struct AnthropicFacade {
    client: ResilientClient,
    api_base: String,
    model: String,
    api_version: String,
}

impl AnthropicFacade {
    pub fn new(
        api_key: &str,
        transport: Arc<dyn HttpTransport>,
        limiter: RateLimiter,
        policy: RetryPolicy,
    ) -> Self {
        let defaults = AnthropicConfig::default();
        let client = ResilientClient::new(
            "anthropic",
            transport,
            Arc::new(StaticAuthorizer::api_key("x-api-key", api_key)),
            Arc::new(StatusClassifier),
            limiter,
            policy,
        );
        Self {
            client,
            api_base: defaults.api_base,
            model: defaults.model,
            api_version: defaults.api_version,
        }
    }

    pub fn from_config(
        config: &AnthropicConfig,
        api_key: Option<&str>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let key = api_key.ok_or_else(|| IntegrationError::validation("ANTHROPIC_API_KEY not set"))?;
        let limits = config.limits();
        let mut facade = Self::new(
            key,
            transport,
            RateLimiter::new(limits.min_request_interval),
            limits.retry,
        );
        facade.api_base = config.api_base.trim_end_matches('/').to_string();
        facade.model = config.model.clone();
        facade.api_version = config.api_version.clone();
        Ok(facade)
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextGenerator for AnthropicFacade {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, request: &CompletionRequest) -> Result<String> {
        request.validate()?;

        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }

        let http = HttpRequest::post(format!("{}/messages", self.api_base))
            .header("anthropic-version", self.api_version.clone())
            .json(&body);
        let response: MessagesResponse = self.client.execute_json(GROUP_MESSAGES, http).await?;

        debug!("Anthropic stop reason: {:?}", response.stop_reason);
        let text: String = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(IntegrationError::transport(
                "Anthropic response contained no text",
            ));
        }
        Ok(text)
    }
}

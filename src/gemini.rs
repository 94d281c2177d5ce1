//! Gemini `generateContent` facade

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::StaticAuthorizer;
use crate::client::{FailureClassifier, GoogleClassifier, ResilientClient};
use crate::config::GeminiConfig;
use crate::error::{Failure, FailureKind, IntegrationError, Result};
use crate::generation::{CompletionRequest, TextGenerator};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

pub const GROUP_GENERATE: &str = "gemini.generate";

/// Google reports a bad API key as HTTP 400 with this reason
#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiClassifier;

impl FailureClassifier for GeminiClassifier {
    fn classify(&self, response: &HttpResponse) -> Option<Failure> {
        let mut failure = GoogleClassifier.classify(response)?;
        if failure.status == Some(400) {
            let body: Value = response.json().unwrap_or(Value::Null);
            let invalid_key = body["error"]["details"]
                .as_array()
                .is_some_and(|details| {
                    details
                        .iter()
                        .any(|d| d["reason"].as_str() == Some("API_KEY_INVALID"))
                });
            if invalid_key {
                failure.kind = FailureKind::AuthExpired;
            }
        }
        Some(failure)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Result<String> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(IntegrationError::transport(format!(
                "Gemini blocked the prompt: {}",
                reason
            )));
        }

        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| IntegrationError::transport("Gemini returned no candidates"))?;
        let finish_reason = candidate.finish_reason;
        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(IntegrationError::transport(format!(
                "Gemini candidate contained no text (finish reason {})",
                finish_reason.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(text)
    }
}

pub struct GeminiFacade {
    client: ResilientClient,
    api_base: String,
    model: String,
}

impl GeminiFacade {
    pub fn new(
        api_key: &str,
        transport: Arc<dyn HttpTransport>,
        limiter: RateLimiter,
        policy: RetryPolicy,
    ) -> Self {
        let defaults = GeminiConfig::default();
        let client = ResilientClient::new(
            "gemini",
            transport,
            Arc::new(StaticAuthorizer::api_key("x-goog-api-key", api_key)),
            Arc::new(GeminiClassifier),
            limiter,
            policy,
        );
        Self {
            client,
            api_base: defaults.api_base,
            model: defaults.model,
        }
    }

    pub fn from_config(
        config: &GeminiConfig,
        api_key: Option<&str>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let key = api_key.ok_or_else(|| IntegrationError::validation("GEMINI_API_KEY not set"))?;
        let limits = config.limits();
        Ok(Self::new(
            key,
            transport,
            RateLimiter::new(limits.min_request_interval),
            limits.retry,
        )
        .with_api_base(&config.api_base)
        .with_model(&config.model))
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
impl TextGenerator for GeminiFacade {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &CompletionRequest) -> Result<String> {
        request.validate()?;

        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "maxOutputTokens": request.max_tokens,
                "temperature": request.temperature,
            },
        });
        if let Some(system) = &request.system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }

        let http = HttpRequest::post(format!(
            "{}/models/{}:generateContent",
            self.api_base, self.model
        ))
        .json(&body);
        let response: GenerateResponse = self.client.execute_json(GROUP_GENERATE, http).await?;
        response.into_text()
    }
}

//! Common surface of the text-generation providers

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{IntegrationError, Result};

pub const MAX_OUTPUT_TOKENS: u32 = 8192;

/// A single-turn generation request; prompt construction is the caller's job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            max_tokens: 1024,
            temperature: 0.7,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Checked before any network call
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(IntegrationError::validation("Prompt must not be empty"));
        }
        if self.max_tokens == 0 || self.max_tokens > MAX_OUTPUT_TOKENS {
            return Err(IntegrationError::validation(format!(
                "max_tokens must be between 1 and {}",
                MAX_OUTPUT_TOKENS
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(IntegrationError::validation(
                "temperature must be between 0.0 and 2.0",
            ));
        }
        Ok(())
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider name for logs and CLI output
    fn name(&self) -> &str;

    async fn generate(&self, request: &CompletionRequest) -> Result<String>;
}

//! Slack Web API facade (bot token)

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::auth::StaticAuthorizer;
use crate::client::{ResilientClient, SlackClassifier};
use crate::config::SlackConfig;
use crate::error::{IntegrationError, Result};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::transport::{HttpRequest, HttpTransport};

pub const GROUP_READ: &str = "slack.read";
pub const GROUP_WRITE: &str = "slack.write";

pub const DEFAULT_STATUS_EMOJI: &str = ":robot_face:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_member: bool,
    #[serde(default)]
    pub num_members: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub ts: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub tz: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
}

/// Result of `chat.postMessage`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

#[derive(Deserialize)]
struct ChannelList {
    #[serde(default)]
    channels: Vec<Channel>,
}

#[derive(Deserialize)]
struct History {
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct UserInfo {
    user: User,
}

pub struct SlackFacade {
    client: ResilientClient,
    api_base: String,
}

impl SlackFacade {
    pub fn new(
        token: &str,
        transport: Arc<dyn HttpTransport>,
        limiter: RateLimiter,
        policy: RetryPolicy,
    ) -> Self {
        let client = ResilientClient::new(
            "slack",
            transport,
            Arc::new(StaticAuthorizer::bearer(token)),
            Arc::new(SlackClassifier),
            limiter,
            policy,
        );
        Self {
            client,
            api_base: "https://slack.com/api".to_string(),
        }
    }

    /// Fails with `Validation` when no bot token is available
    pub fn from_config(
        config: &SlackConfig,
        token: Option<&str>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let token = token.ok_or_else(|| IntegrationError::validation("SLACK_BOT_TOKEN not set"))?;
        let limits = config.limits();
        Ok(Self::new(
            token,
            transport,
            RateLimiter::new(limits.min_request_interval),
            limits.retry,
        )
        .with_api_base(&config.api_base))
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        group: &str,
        request: HttpRequest,
    ) -> Result<T> {
        self.client.execute_json(group, request).await
    }

    /// Public and private channels visible to the bot
    pub async fn list_channels(&self) -> Result<Vec<Channel>> {
        let request = HttpRequest::get(self.method_url("conversations.list"))
            .query("types", "public_channel,private_channel")
            .query("exclude_archived", true);
        let list: ChannelList = self.call(GROUP_READ, request).await?;
        Ok(list.channels)
    }

    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        blocks: Option<Value>,
    ) -> Result<PostedMessage> {
        if channel.trim().is_empty() {
            return Err(IntegrationError::validation("Slack channel is required"));
        }
        if text.trim().is_empty() && blocks.is_none() {
            return Err(IntegrationError::validation(
                "Slack message needs text or blocks",
            ));
        }

        let mut body = json!({ "channel": channel, "text": text });
        if let Some(blocks) = blocks {
            body["blocks"] = blocks;
        }
        let request = HttpRequest::post(self.method_url("chat.postMessage")).json(&body);

        let posted: PostedMessage = self.call(GROUP_WRITE, request).await?;
        info!("Posted Slack message {} to {}", posted.ts, posted.channel);
        Ok(posted)
    }

    /// Most recent messages in a channel, newest first
    pub async fn channel_history(&self, channel: &str, limit: u32) -> Result<Vec<ChatMessage>> {
        let request = HttpRequest::get(self.method_url("conversations.history"))
            .query("channel", channel)
            .query("limit", limit.clamp(1, 1000));
        let history: History = self.call(GROUP_READ, request).await?;
        Ok(history.messages)
    }

    pub async fn user_info(&self, user_id: &str) -> Result<User> {
        let request = HttpRequest::get(self.method_url("users.info")).query("user", user_id);
        let info: UserInfo = self.call(GROUP_READ, request).await?;
        Ok(info.user)
    }

    /// Set the bot user's status; `emoji` defaults to `:robot_face:`
    pub async fn update_status(&self, text: &str, emoji: Option<&str>) -> Result<()> {
        let body = json!({
            "profile": {
                "status_text": text,
                "status_emoji": emoji.unwrap_or(DEFAULT_STATUS_EMOJI),
                "status_expiration": 0,
            }
        });
        let request = HttpRequest::post(self.method_url("users.profile.set")).json(&body);
        self.client.execute(GROUP_WRITE, request).await?;
        Ok(())
    }
}

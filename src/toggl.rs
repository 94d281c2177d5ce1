//! Toggl Track v9 facade (API token over HTTP basic auth)

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::auth::StaticAuthorizer;
use crate::client::{ResilientClient, StatusClassifier};
use crate::config::TogglConfig;
use crate::error::{IntegrationError, Result};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::transport::{HttpRequest, HttpTransport};

pub const GROUP_API: &str = "toggl.api";

/// Identifies this client on entries it creates
const CREATED_WITH: &str = "workbridge";

/// Window used by [`TogglFacade::time_entries`] when no start is given
const DEFAULT_LOOKBACK_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: u64,
    pub workspace_id: u64,
    #[serde(default)]
    pub project_id: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub stop: Option<DateTime<Utc>>,
    /// Seconds; negative while the entry is running
    #[serde(default)]
    pub duration: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
}

impl TimeEntry {
    pub fn is_running(&self) -> bool {
        self.duration < 0 || self.stop.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub workspace_id: Option<u64>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub color: Option<String>,
}

/// Toggl sends `null` for empty tag lists
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

pub struct TogglFacade {
    client: ResilientClient,
    api_base: String,
    workspace_id: Option<u64>,
}

impl TogglFacade {
    pub fn new(
        api_token: &str,
        transport: Arc<dyn HttpTransport>,
        limiter: RateLimiter,
        policy: RetryPolicy,
    ) -> Self {
        let client = ResilientClient::new(
            "toggl",
            transport,
            Arc::new(StaticAuthorizer::basic(api_token, "api_token")),
            Arc::new(StatusClassifier),
            limiter,
            policy,
        );
        Self {
            client,
            api_base: "https://api.track.toggl.com/api/v9".to_string(),
            workspace_id: None,
        }
    }

    /// `workspace_id` from the environment wins over the config file
    pub fn from_config(
        config: &TogglConfig,
        api_token: Option<&str>,
        workspace_id: Option<u64>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let token =
            api_token.ok_or_else(|| IntegrationError::validation("TOGGL_API_TOKEN not set"))?;
        let limits = config.limits();
        Ok(Self::new(
            token,
            transport,
            RateLimiter::new(limits.min_request_interval),
            limits.retry,
        )
        .with_api_base(&config.api_base)
        .with_workspace(workspace_id.or(config.workspace_id)))
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_workspace(mut self, workspace_id: Option<u64>) -> Self {
        self.workspace_id = workspace_id;
        self
    }

    fn workspace(&self) -> Result<u64> {
        self.workspace_id
            .ok_or_else(|| IntegrationError::validation("Toggl workspace id is not configured"))
    }

    /// The running entry, if any
    pub async fn current_time_entry(&self) -> Result<Option<TimeEntry>> {
        let request = HttpRequest::get(format!("{}/me/time_entries/current", self.api_base));
        self.client.execute_json(GROUP_API, request).await
    }

    /// Entries between `start` and `end`; defaults to the last seven days
    pub async fn time_entries(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<TimeEntry>> {
        let end = end.unwrap_or_else(Utc::now);
        let start = start.unwrap_or(end - ChronoDuration::days(DEFAULT_LOOKBACK_DAYS));
        if start > end {
            return Err(IntegrationError::validation(
                "Time entry range starts after it ends",
            ));
        }

        let request = HttpRequest::get(format!("{}/me/time_entries", self.api_base))
            .query("start_date", start.to_rfc3339())
            .query("end_date", end.to_rfc3339());
        self.client.execute_json(GROUP_API, request).await
    }

    pub async fn start_time_entry(
        &self,
        description: &str,
        project_id: Option<u64>,
        tags: &[String],
    ) -> Result<TimeEntry> {
        let workspace_id = self.workspace()?;
        let mut body = json!({
            "description": description,
            "workspace_id": workspace_id,
            "created_with": CREATED_WITH,
            "start": Utc::now().to_rfc3339(),
            "duration": -1,
        });
        if let Some(project_id) = project_id {
            body["project_id"] = json!(project_id);
        }
        if !tags.is_empty() {
            body["tags"] = json!(tags);
        }

        let request = HttpRequest::post(format!(
            "{}/workspaces/{}/time_entries",
            self.api_base, workspace_id
        ))
        .json(&body);
        let entry: TimeEntry = self.client.execute_json(GROUP_API, request).await?;
        info!("Started time entry {}", entry.id);
        Ok(entry)
    }

    pub async fn stop_time_entry(&self, entry_id: u64) -> Result<TimeEntry> {
        let workspace_id = self.workspace()?;
        let request = HttpRequest::patch(format!(
            "{}/workspaces/{}/time_entries/{}/stop",
            self.api_base, workspace_id, entry_id
        ));
        let entry: TimeEntry = self.client.execute_json(GROUP_API, request).await?;
        info!("Stopped time entry {}", entry.id);
        Ok(entry)
    }

    pub async fn projects(&self) -> Result<Vec<Project>> {
        let workspace_id = self.workspace()?;
        let request = HttpRequest::get(format!(
            "{}/workspaces/{}/projects",
            self.api_base, workspace_id
        ));
        let projects: Option<Vec<Project>> = self.client.execute_json(GROUP_API, request).await?;
        Ok(projects.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_entry_deserialization() {
        let json = r#"{
            "id": 3001,
            "workspace_id": 42,
            "project_id": null,
            "description": "Writing docs",
            "start": "2024-03-01T09:00:00+00:00",
            "stop": null,
            "duration": -1709283600,
            "tags": null
        }"#;
        let entry: TimeEntry = serde_json::from_str(json).unwrap();
        assert!(entry.is_running());
        assert!(entry.tags.is_empty());
        assert_eq!(entry.description.as_deref(), Some("Writing docs"));
    }

    #[test]
    fn test_current_entry_null_is_none() {
        let entry: Option<TimeEntry> = serde_json::from_str("null").unwrap();
        assert!(entry.is_none());
    }
}

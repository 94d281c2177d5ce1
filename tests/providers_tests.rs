//! Slack, Toggl and text generation facades over a scripted transport

mod common;

use common::*;
use productivity_integrations::rate_limiter::RateLimiter;
use productivity_integrations::{
    AnthropicFacade, CompletionRequest, GeminiFacade, IntegrationError, SlackFacade,
    TextGenerator, TogglFacade,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn body_json(request: &productivity_integrations::HttpRequest) -> Value {
    serde_json::from_slice(request.body.as_deref().unwrap_or_default()).unwrap()
}

fn slack(transport: Arc<ScriptedTransport>) -> SlackFacade {
    SlackFacade::new("xoxb-test", transport, RateLimiter::unlimited(), fast_policy(3))
        .with_api_base("https://slack.test/api")
}

#[tokio::test]
async fn test_slack_post_message() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(200, json!({"ok": true, "channel": "C1", "ts": "1700000000.000200"}));

    let posted = slack(transport.clone())
        .post_message("C1", "Standup in 5", None)
        .await
        .unwrap();

    assert_eq!(posted.ts, "1700000000.000200");
    let request = &transport.requests()[0];
    assert_eq!(request.url, "https://slack.test/api/chat.postMessage");
    assert_eq!(request.header_value("Authorization"), Some("Bearer xoxb-test"));
    assert_eq!(body_json(request)["text"], "Standup in 5");
}

#[tokio::test]
async fn test_slack_empty_message_is_rejected_locally() {
    let transport = Arc::new(ScriptedTransport::new());

    let err = slack(transport.clone())
        .post_message("C1", "   ", None)
        .await
        .unwrap_err();

    assert!(matches!(err, IntegrationError::Validation(_)));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_slack_invalid_auth_is_terminal() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(200, json!({"ok": false, "error": "invalid_auth"}));

    let err = slack(transport.clone()).list_channels().await.unwrap_err();

    assert!(matches!(err, IntegrationError::Authentication(_)));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slack_ratelimited_then_success() {
    let transport = Arc::new(ScriptedTransport::new());
    transport
        .push(response_with_header(
            200,
            json!({"ok": false, "error": "ratelimited"}),
            "retry-after",
            "1",
        ))
        .push_json(
            200,
            json!({"ok": true, "messages": [{"ts": "1.0", "user": "U1", "text": "hi"}]}),
        );

    let history = slack(transport.clone())
        .channel_history("C1", 5000)
        .await
        .unwrap();

    assert_eq!(history.len(), 1);
    assert_eq!(transport.calls(), 2);
    assert_eq!(
        transport.requests()[0].query_param("limit").as_deref(),
        Some("1000")
    );
}

#[tokio::test]
async fn test_slack_status_uses_default_emoji() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(200, json!({"ok": true}));

    slack(transport.clone())
        .update_status("Heads down", None)
        .await
        .unwrap();

    let body = body_json(&transport.requests()[0]);
    assert_eq!(body["profile"]["status_text"], "Heads down");
    assert_eq!(body["profile"]["status_emoji"], ":robot_face:");
}

fn toggl(transport: Arc<ScriptedTransport>, workspace: Option<u64>) -> TogglFacade {
    TogglFacade::new("toggl-token", transport, RateLimiter::unlimited(), fast_policy(3))
        .with_api_base("https://toggl.test/api/v9")
        .with_workspace(workspace)
}

#[tokio::test]
async fn test_toggl_no_running_entry() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push(json_response(200, Value::Null));

    let current = toggl(transport.clone(), Some(42))
        .current_time_entry()
        .await
        .unwrap();

    assert!(current.is_none());
    // base64("toggl-token:api_token")
    assert_eq!(
        transport.requests()[0].header_value("Authorization"),
        Some("Basic dG9nZ2wtdG9rZW46YXBpX3Rva2Vu")
    );
}

#[tokio::test]
async fn test_toggl_start_entry() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(
        200,
        json!({
            "id": 9001, "workspace_id": 42, "project_id": 7,
            "description": "Review", "start": "2024-03-01T09:00:00Z",
            "stop": null, "duration": -1, "tags": ["deep"]
        }),
    );

    let entry = toggl(transport.clone(), Some(42))
        .start_time_entry("Review", Some(7), &["deep".to_string()])
        .await
        .unwrap();

    assert!(entry.is_running());
    let request = &transport.requests()[0];
    assert_eq!(request.url, "https://toggl.test/api/v9/workspaces/42/time_entries");
    let body = body_json(request);
    assert_eq!(body["duration"], -1);
    assert_eq!(body["project_id"], 7);
    assert_eq!(body["tags"], json!(["deep"]));
    assert_eq!(body["created_with"], "workbridge");
}

#[tokio::test]
async fn test_toggl_missing_workspace_makes_no_call() {
    let transport = Arc::new(ScriptedTransport::new());
    let facade = toggl(transport.clone(), None);

    assert!(matches!(
        facade.projects().await,
        Err(IntegrationError::Validation(_))
    ));
    assert!(matches!(
        facade.stop_time_entry(1).await,
        Err(IntegrationError::Validation(_))
    ));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_toggl_projects_null_is_empty() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push(json_response(200, Value::Null));

    let projects = toggl(transport, Some(42)).projects().await.unwrap();
    assert!(projects.is_empty());
}

fn anthropic(transport: Arc<ScriptedTransport>) -> AnthropicFacade {
    AnthropicFacade::new("sk-ant-test", transport, RateLimiter::unlimited(), fast_policy(3))
        .with_api_base("https://anthropic.test/v1")
        .with_model("claude-test")
}

#[tokio::test]
async fn test_anthropic_generate() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(
        200,
        json!({
            "content": [{"type": "text", "text": "Three "}, {"type": "text", "text": "priorities"}],
            "stop_reason": "end_turn"
        }),
    );

    let request = CompletionRequest::new("Plan my day").with_system("Be brief");
    let text = anthropic(transport.clone()).generate(&request).await.unwrap();

    assert_eq!(text, "Three priorities");
    let sent = &transport.requests()[0];
    assert_eq!(sent.url, "https://anthropic.test/v1/messages");
    assert_eq!(sent.header_value("x-api-key"), Some("sk-ant-test"));
    assert!(sent.header_value("anthropic-version").is_some());
    let body = body_json(sent);
    assert_eq!(body["model"], "claude-test");
    assert_eq!(body["system"], "Be brief");
    assert_eq!(body["messages"][0]["content"], "Plan my day");
}

#[tokio::test]
async fn test_anthropic_empty_prompt_makes_no_call() {
    let transport = Arc::new(ScriptedTransport::new());

    let err = anthropic(transport.clone())
        .generate(&CompletionRequest::new("  "))
        .await
        .unwrap_err();

    assert!(matches!(err, IntegrationError::Validation(_)));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_anthropic_overload_is_retried() {
    let transport = Arc::new(ScriptedTransport::new());
    transport
        .push_json(529, json!({"type": "error", "error": {"type": "overloaded_error"}}))
        .push_json(200, json!({"content": [{"type": "text", "text": "ok"}]}));

    let text = anthropic(transport.clone())
        .generate(&CompletionRequest::new("hello"))
        .await
        .unwrap();

    assert_eq!(text, "ok");
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_gemini_generate() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(
        200,
        json!({"candidates": [{"content": {"parts": [{"text": "Done"}]}, "finishReason": "STOP"}]}),
    );
    let gemini = GeminiFacade::new("gm-key", transport.clone(), RateLimiter::unlimited(), fast_policy(3))
        .with_api_base("https://gemini.test/v1beta")
        .with_model("gemini-test");

    let request = CompletionRequest::new("Summarize").with_max_tokens(64);
    let text = gemini.generate(&request).await.unwrap();

    assert_eq!(text, "Done");
    let sent = &transport.requests()[0];
    assert_eq!(
        sent.url,
        "https://gemini.test/v1beta/models/gemini-test:generateContent"
    );
    assert_eq!(sent.header_value("x-goog-api-key"), Some("gm-key"));
    assert_eq!(body_json(sent)["generationConfig"]["maxOutputTokens"], 64);
}

#[tokio::test]
async fn test_gemini_invalid_key_is_authentication_error() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(
        400,
        json!({"error": {"code": 400, "message": "API key not valid.",
               "details": [{"reason": "API_KEY_INVALID"}]}}),
    );
    let gemini = GeminiFacade::new("bad", transport.clone(), RateLimiter::unlimited(), fast_policy(3))
        .with_api_base("https://gemini.test/v1beta");

    let err = gemini.generate(&CompletionRequest::new("hi")).await.unwrap_err();

    assert!(matches!(err, IntegrationError::Authentication(_)));
    assert_eq!(transport.calls(), 1);
}

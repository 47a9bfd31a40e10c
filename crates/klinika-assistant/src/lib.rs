//! Client for the remote assistant service (OpenAI Assistants v2 wire shape).
//!
//! The core never talks HTTP directly — it consumes the [`AssistantApi`]
//! trait, which exposes exactly the capability set the run machinery needs:
//! create/verify a thread, append a message, start a run, poll a run, and
//! list a thread's messages.
//!
//! "Thread busy" responses are surfaced as a structured
//! [`AssistantError::Busy`] carrying the blocking run's identifier when the
//! service embeds one in its error text, so callers never have to match on
//! prose themselves.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// The blocking run id the service embeds in thread-busy error messages,
/// e.g. "Can't add messages to thread_x while a run run_abc123 is active."
static EMBEDDED_RUN_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\brun_[A-Za-z0-9]+\b").expect("static regex"));

/// Terminal and in-flight states a run can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// True while the run still occupies its thread.
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::InProgress)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
            RunStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// One message on a thread, flattened to the text content the bot cares about.
#[derive(Debug, Clone)]
pub struct ThreadMessage {
    pub role: String,
    pub text: String,
    /// Service-side creation time, unix seconds.
    pub created_at: i64,
}

#[derive(Debug, Error)]
pub enum AssistantError {
    /// The thread already has an active run. `active_run_id` is the blocking
    /// run when the service named it in the error payload.
    #[error("thread busy{}", .active_run_id.as_deref().map(|id| format!(" (run {id})")).unwrap_or_default())]
    Busy { active_run_id: Option<String> },
    #[error("thread not found")]
    NotFound,
    #[error("assistant API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("assistant request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Capability surface of the remote assistant service.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// Create a fresh conversation thread, returning its handle.
    async fn create_thread(&self) -> Result<String, AssistantError>;
    /// Lightweight existence check for a stored handle.
    async fn get_thread(&self, thread_id: &str) -> Result<(), AssistantError>;
    /// Append a message to a thread. May fail with [`AssistantError::Busy`].
    async fn add_message(
        &self,
        thread_id: &str,
        role: &str,
        content: &str,
    ) -> Result<(), AssistantError>;
    /// Start a run on a thread. May fail with [`AssistantError::Busy`].
    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<String, AssistantError>;
    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<RunStatus, AssistantError>;
    /// Messages on the thread, newest first as the service returns them.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, AssistantError>;
}

/// Valid thread handles always carry the service's `thread_` prefix.
/// Anything else must be treated as "no thread" before a request is made.
pub fn is_valid_thread_id(thread_id: &str) -> bool {
    thread_id.starts_with("thread_") && thread_id.len() > "thread_".len()
}

/// Classify an error response body, promoting thread-contention errors to
/// the structured [`AssistantError::Busy`] variant.
fn classify_api_error(status: u16, body: &Value) -> AssistantError {
    let message = body
        .pointer("/error/message")
        .and_then(|m| m.as_str())
        .unwrap_or("")
        .to_string();

    if status == 404 {
        return AssistantError::NotFound;
    }

    let lowered = message.to_lowercase();
    if lowered.contains("while a run") && lowered.contains("is active")
        || lowered.contains("already has an active run")
    {
        let active_run_id = EMBEDDED_RUN_ID
            .find(&message)
            .map(|m| m.as_str().to_string());
        return AssistantError::Busy { active_run_id };
    }

    AssistantError::Api { status, message }
}

/// reqwest-backed implementation against the hosted assistant service.
pub struct OpenAiAssistantClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiAssistantClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("failed to create reqwest client"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    /// Send a request and decode the body, mapping non-2xx responses through
    /// [`classify_api_error`].
    async fn send(&self, rb: reqwest::RequestBuilder) -> Result<Value, AssistantError> {
        let resp = rb.send().await?;
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(classify_api_error(status.as_u16(), &body));
        }
        Ok(body)
    }
}

#[async_trait]
impl AssistantApi for OpenAiAssistantClient {
    async fn create_thread(&self) -> Result<String, AssistantError> {
        let body = self
            .send(
                self.request(reqwest::Method::POST, "/threads")
                    .json(&serde_json::json!({})),
            )
            .await?;
        let id = body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AssistantError::Api {
                status: 200,
                message: "thread create response missing id".to_string(),
            })?;
        debug!("created thread {id}");
        Ok(id.to_string())
    }

    async fn get_thread(&self, thread_id: &str) -> Result<(), AssistantError> {
        self.send(self.request(reqwest::Method::GET, &format!("/threads/{thread_id}")))
            .await?;
        Ok(())
    }

    async fn add_message(
        &self,
        thread_id: &str,
        role: &str,
        content: &str,
    ) -> Result<(), AssistantError> {
        self.send(
            self.request(
                reqwest::Method::POST,
                &format!("/threads/{thread_id}/messages"),
            )
            .json(&serde_json::json!({ "role": role, "content": content })),
        )
        .await?;
        Ok(())
    }

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<String, AssistantError> {
        let body = self
            .send(
                self.request(reqwest::Method::POST, &format!("/threads/{thread_id}/runs"))
                    .json(&serde_json::json!({ "assistant_id": assistant_id })),
            )
            .await?;
        let id = body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AssistantError::Api {
                status: 200,
                message: "run create response missing id".to_string(),
            })?;
        debug!("created run {id} on thread {thread_id}");
        Ok(id.to_string())
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<RunStatus, AssistantError> {
        let body = self
            .send(self.request(
                reqwest::Method::GET,
                &format!("/threads/{thread_id}/runs/{run_id}"),
            ))
            .await?;
        let status = body
            .get("status")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| AssistantError::Api {
                status: 200,
                message: format!("unrecognized run status: {e}"),
            })?
            .unwrap_or(RunStatus::Unknown);
        Ok(status)
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, AssistantError> {
        let body = self
            .send(self.request(
                reqwest::Method::GET,
                &format!("/threads/{thread_id}/messages"),
            ))
            .await?;
        let mut messages = Vec::new();
        for item in body.get("data").and_then(|d| d.as_array()).into_iter().flatten() {
            let role = item
                .get("role")
                .and_then(|r| r.as_str())
                .unwrap_or("")
                .to_string();
            let created_at = item.get("created_at").and_then(|c| c.as_i64()).unwrap_or(0);
            // Content is a list of parts; the bot only relays text parts.
            let text = item
                .get("content")
                .and_then(|c| c.as_array())
                .map(|parts| {
                    parts
                        .iter()
                        .filter_map(|p| p.pointer("/text/value").and_then(|t| t.as_str()))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();
            messages.push(ThreadMessage {
                role,
                text,
                created_at,
            });
        }
        Ok(messages)
    }
}

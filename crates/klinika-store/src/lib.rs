//! Persisted store client for Klinika.
//!
//! The bot keeps three tables in a hosted PostgREST-style row store:
//! `user_profiles` (one row per WhatsApp number: thread/run bookkeeping plus
//! merged lead-qualification fields), `chat_logs` (append-only conversation
//! history, also consumed by the dashboard), and `settings` (key/value, e.g.
//! the CS staff number).
//!
//! The core consumes the [`Store`] trait; [`SupabaseStore`] is the reqwest
//! implementation. All profile mutations are single-row upserts keyed by
//! `wa_number` — no transactions, last write wins, which is acceptable for
//! the advisory thread/run bookkeeping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use klinika_types::{ChatLogEntry, InsightFields, ThreadRole, UserProfile};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("store response decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Row-store capability surface consumed by the core.
#[async_trait]
pub trait Store: Send + Sync {
    /// Point read of a user's profile row.
    async fn get_profile(&self, wa_number: &str) -> Result<Option<UserProfile>, StoreError>;
    /// Persist a newly created thread handle for `(wa_number, role)`.
    async fn set_thread_id(
        &self,
        wa_number: &str,
        role: ThreadRole,
        thread_id: &str,
    ) -> Result<(), StoreError>;
    /// Record (`Some`) or clear (`None`) the in-flight run handle for
    /// `(wa_number, role)`. Clearing when nothing is recorded is a no-op.
    async fn set_run_id(
        &self,
        wa_number: &str,
        role: ThreadRole,
        run_id: Option<&str>,
    ) -> Result<(), StoreError>;
    /// Clear the stored thread handle for `(wa_number, role)` along with any
    /// run handle recorded against it. The row itself is kept.
    async fn reset_thread(&self, wa_number: &str, role: ThreadRole) -> Result<(), StoreError>;
    /// Merge extracted insight fields into the profile. Only fields present
    /// in `fields.to_update_map()` are written.
    async fn merge_insights(
        &self,
        wa_number: &str,
        fields: &InsightFields,
    ) -> Result<(), StoreError>;
    async fn mark_cs_notified(&self, wa_number: &str) -> Result<(), StoreError>;
    async fn log_chat(&self, entry: &ChatLogEntry) -> Result<(), StoreError>;
    /// Most recent outgoing (bot) message for the user strictly before
    /// `before` — conversation context for the insight payload.
    async fn last_bot_message_before(
        &self,
        wa_number: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError>;
    async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Cheap connectivity probe used by the `doctor` command.
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Build the upsert body for a profile mutation: the key column, the changed
/// fields, and the freshened `last_updated` stamp.
fn profile_upsert_body(wa_number: &str, fields: Map<String, Value>) -> Value {
    let mut body = fields;
    body.insert("wa_number".to_string(), Value::String(wa_number.to_string()));
    body.insert(
        "last_updated".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    Value::Object(body)
}

pub struct SupabaseStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SupabaseStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .expect("failed to create reqwest client"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{}", self.base_url, table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, rb: reqwest::RequestBuilder) -> Result<Value, StoreError> {
        let resp = rb.send().await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(StoreError::Api {
                status: status.as_u16(),
                message: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Upsert keyed on `wa_number`, merging with any existing row.
    async fn upsert_profile(
        &self,
        wa_number: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let body = profile_upsert_body(wa_number, fields);
        self.send(
            self.request(reqwest::Method::POST, "user_profiles")
                .header("Prefer", "resolution=merge-duplicates")
                .query(&[("on_conflict", "wa_number")])
                .json(&body),
        )
        .await?;
        Ok(())
    }

    /// Update an existing row only; silently a no-op when the row is absent.
    async fn update_profile(
        &self,
        wa_number: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let body = profile_upsert_body(wa_number, fields);
        self.send(
            self.request(reqwest::Method::PATCH, "user_profiles")
                .query(&[("wa_number", format!("eq.{wa_number}"))])
                .json(&body),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for SupabaseStore {
    async fn get_profile(&self, wa_number: &str) -> Result<Option<UserProfile>, StoreError> {
        let body = self
            .send(
                self.request(reqwest::Method::GET, "user_profiles")
                    .query(&[
                        ("wa_number", format!("eq.{wa_number}")),
                        ("select", "*".to_string()),
                        ("limit", "1".to_string()),
                    ]),
            )
            .await?;
        let rows = body.as_array().cloned().unwrap_or_default();
        match rows.into_iter().next() {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }

    async fn set_thread_id(
        &self,
        wa_number: &str,
        role: ThreadRole,
        thread_id: &str,
    ) -> Result<(), StoreError> {
        debug!("persisting {} = {thread_id} for {wa_number}", role.thread_column());
        let mut fields = Map::new();
        fields.insert(
            role.thread_column().to_string(),
            Value::String(thread_id.to_string()),
        );
        self.upsert_profile(wa_number, fields).await
    }

    async fn set_run_id(
        &self,
        wa_number: &str,
        role: ThreadRole,
        run_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut fields = Map::new();
        fields.insert(
            role.run_column().to_string(),
            run_id.map(|id| Value::String(id.to_string())).unwrap_or(Value::Null),
        );
        match run_id {
            // Recording a run must create the row if it is somehow missing.
            Some(_) => self.upsert_profile(wa_number, fields).await,
            // Clearing an absent row is a no-op, so a plain update suffices.
            None => self.update_profile(wa_number, fields).await,
        }
    }

    async fn reset_thread(&self, wa_number: &str, role: ThreadRole) -> Result<(), StoreError> {
        debug!("resetting {} thread for {wa_number}", role);
        let mut fields = Map::new();
        fields.insert(role.thread_column().to_string(), Value::Null);
        fields.insert(role.run_column().to_string(), Value::Null);
        self.update_profile(wa_number, fields).await
    }

    async fn merge_insights(
        &self,
        wa_number: &str,
        fields: &InsightFields,
    ) -> Result<(), StoreError> {
        let survivors = fields.to_update_map();
        if survivors.is_empty() {
            return Ok(());
        }
        debug!(
            "merging {} insight field(s) into profile {wa_number}",
            survivors.len()
        );
        self.upsert_profile(wa_number, survivors).await
    }

    async fn mark_cs_notified(&self, wa_number: &str) -> Result<(), StoreError> {
        let mut fields = Map::new();
        fields.insert("notified_cs".to_string(), Value::Bool(true));
        self.update_profile(wa_number, fields).await
    }

    async fn log_chat(&self, entry: &ChatLogEntry) -> Result<(), StoreError> {
        self.send(
            self.request(reqwest::Method::POST, "chat_logs")
                .json(entry),
        )
        .await?;
        Ok(())
    }

    async fn last_bot_message_before(
        &self,
        wa_number: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError> {
        let body = self
            .send(
                self.request(reqwest::Method::GET, "chat_logs").query(&[
                    ("wa_number", format!("eq.{wa_number}")),
                    ("direction", "eq.outgoing".to_string()),
                    ("timestamp", format!("lt.{}", before.to_rfc3339())),
                    ("select", "message".to_string()),
                    ("order", "timestamp.desc".to_string()),
                    ("limit", "1".to_string()),
                ]),
            )
            .await?;
        Ok(body
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("message"))
            .and_then(|m| m.as_str())
            .map(|m| m.to_string()))
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let body = self
            .send(self.request(reqwest::Method::GET, "settings").query(&[
                ("key", format!("eq.{key}")),
                ("select", "value".to_string()),
                ("limit", "1".to_string()),
            ]))
            .await?;
        Ok(body
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("value"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string()))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.send(
            self.request(reqwest::Method::GET, "chat_logs")
                .query(&[("select", "wa_number"), ("limit", "1")]),
        )
        .await?;
        Ok(())
    }
}

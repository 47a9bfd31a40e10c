//! Insight pipeline: best-effort extraction of structured lead data from the
//! conversation, on its own thread with its own assistant identity.
//!
//! The pipeline never raises. Any failure — thread creation, the run itself,
//! or parsing the response — resolves to an all-null [`ExtractedInsight`]
//! with the error recorded internally, and the surrounding chat flow is
//! never disturbed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use klinika_store::Store;
use klinika_types::{ExtractedInsight, InsightFields, ThreadRole};

use crate::notifier::CsNotifier;
use crate::runs::RunExecutor;
use crate::threads::ThreadRegistry;

pub struct InsightPipeline {
    registry: ThreadRegistry,
    executor: Arc<RunExecutor>,
    store: Arc<dyn Store>,
    notifier: CsNotifier,
}

impl InsightPipeline {
    pub fn new(
        registry: ThreadRegistry,
        executor: Arc<RunExecutor>,
        store: Arc<dyn Store>,
        notifier: CsNotifier,
    ) -> Self {
        Self {
            registry,
            executor,
            store,
            notifier,
        }
    }

    /// Extract insights from `message`, merge the survivors into the user's
    /// profile, and hand the refreshed profile to the CS notifier.
    pub async fn extract_and_apply(
        &self,
        wa_number: &str,
        message: &str,
        received_at: DateTime<Utc>,
    ) -> ExtractedInsight {
        let payload = self.prepare_payload(wa_number, message, received_at).await;

        let thread_id = match self
            .registry
            .get_or_create(wa_number, ThreadRole::Insight)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!("insight thread unavailable for {wa_number}: {e}");
                return ExtractedInsight::failed(format!("insight thread unavailable: {e}"));
            }
        };

        let raw = match self
            .executor
            .execute(wa_number, ThreadRole::Insight, &thread_id, &payload)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!("insight run failed for {wa_number}: {e}");
                return ExtractedInsight::failed(format!("insight run failed: {e}"));
            }
        };

        let extracted = parse_insight_response(&raw);
        if let Some(error) = &extracted.error {
            warn!("insight extraction for {wa_number} produced no data: {error}");
            return extracted;
        }
        if extracted.fields.is_empty() {
            debug!("insight extraction for {wa_number} carried no new fields");
            return extracted;
        }

        if let Err(e) = self.store.merge_insights(wa_number, &extracted.fields).await {
            warn!("failed to merge insights for {wa_number}: {e}");
            return extracted;
        }
        info!("merged insight fields for {wa_number}");

        match self.store.get_profile(wa_number).await {
            Ok(Some(profile)) => {
                self.notifier.maybe_notify(&profile).await;
            }
            Ok(None) => warn!("profile for {wa_number} missing after insight merge"),
            Err(e) => warn!("profile re-read after insight merge failed for {wa_number}: {e}"),
        }

        extracted
    }

    /// Pair the user's message with the bot turn it replies to, scoped by the
    /// arrival timestamp so a reply sent after this message never leaks in.
    async fn prepare_payload(
        &self,
        wa_number: &str,
        message: &str,
        received_at: DateTime<Utc>,
    ) -> String {
        let prior = match self
            .store
            .last_bot_message_before(wa_number, received_at)
            .await
        {
            Ok(prior) => prior,
            Err(e) => {
                warn!("bot-context lookup failed for {wa_number} ({e}); extracting without it");
                None
            }
        };
        match prior {
            Some(bot_message) => format!("[Chatbot]: {bot_message}\n[User]: {message}"),
            None => format!("[User]: {message}"),
        }
    }
}

/// Parse the extraction assistant's reply into the profile's field names.
/// Tolerates a Markdown code fence around the JSON body; anything else
/// malformed yields an all-null record with the parse error recorded.
pub fn parse_insight_response(text: &str) -> ExtractedInsight {
    let body = strip_code_fences(text);
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            return ExtractedInsight::failed(format!("insight response is not valid JSON: {e}"))
        }
    };
    let Value::Object(obj) = value else {
        return ExtractedInsight::failed("insight response is not a JSON object");
    };

    let fields = InsightFields {
        name: string_field(&obj, "name"),
        gender: string_field(&obj, "gender"),
        domisili: string_field(&obj, "location"),
        keluhan: joined_field(&obj, "health_complaints"),
        barrier: joined_field(&obj, "conversion_barriers"),
        lead_status: string_field(&obj, "interest_level"),
        age: obj.get("age").and_then(Value::as_i64),
        symptoms: joined_field(&obj, "symptoms"),
        medical_history: string_field(&obj, "medical_history"),
        urgency_level: string_field(&obj, "urgency_level"),
        emotion: string_field(&obj, "emotion"),
        program_awareness: string_field(&obj, "program_awareness"),
    };
    ExtractedInsight {
        fields,
        error: None,
    }
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Array fields are flattened to a comma-separated string; a non-array value
/// under an array key is treated as absent.
fn joined_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    let items: Vec<&str> = obj
        .get(key)?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items.join(", "))
    }
}

// Shared Domain Types
// Profile, insight, and chat-log types used across the Klinika crates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which of the two assistant identities a thread or run belongs to.
///
/// The chat role drives the user-facing conversation; the insight role runs
/// the structured lead-qualification extraction on its own thread. The two
/// are fully independent — a run on one must never block the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadRole {
    Chat,
    Insight,
}

impl ThreadRole {
    /// Profile column holding the persistent thread handle for this role.
    pub fn thread_column(&self) -> &'static str {
        match self {
            ThreadRole::Chat => "thread_id_chatbot",
            ThreadRole::Insight => "thread_id_analytic",
        }
    }

    /// Profile column holding the in-flight run handle for this role.
    pub fn run_column(&self) -> &'static str {
        match self {
            ThreadRole::Chat => "run_id_chatbot",
            ThreadRole::Insight => "run_id_analytic",
        }
    }
}

impl std::fmt::Display for ThreadRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreadRole::Chat => write!(f, "chat"),
            ThreadRole::Insight => write!(f, "insight"),
        }
    }
}

/// One row per WhatsApp user: conversation-thread bookkeeping plus the
/// merged lead-qualification profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub wa_number: String,
    pub thread_id_chatbot: Option<String>,
    pub thread_id_analytic: Option<String>,
    /// Advisory hint that a run might still be active on the chat thread.
    /// The remote service is the authority; a non-null value here only means
    /// "poll before starting a new run".
    pub run_id_chatbot: Option<String>,
    pub run_id_analytic: Option<String>,
    #[serde(flatten)]
    pub insights: InsightFields,
    /// Stored as a nullable column; null means "not yet notified".
    #[serde(default, deserialize_with = "null_as_false")]
    pub notified_cs: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl UserProfile {
    pub fn thread_id(&self, role: ThreadRole) -> Option<&str> {
        match role {
            ThreadRole::Chat => self.thread_id_chatbot.as_deref(),
            ThreadRole::Insight => self.thread_id_analytic.as_deref(),
        }
    }

    pub fn run_id(&self, role: ThreadRole) -> Option<&str> {
        match role {
            ThreadRole::Chat => self.run_id_chatbot.as_deref(),
            ThreadRole::Insight => self.run_id_analytic.as_deref(),
        }
    }

    /// True once the lead has crossed the notification threshold.
    pub fn is_qualified_lead(&self) -> bool {
        matches!(
            self.insights.lead_status.as_deref(),
            Some("high") | Some("very_high")
        )
    }
}

/// Structured fields extracted from a conversation by the insight assistant.
///
/// Every field is optional: extraction is best-effort, and only fields that
/// actually carry a value are merged into the persisted profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsightFields {
    pub name: Option<String>,
    pub gender: Option<String>,
    pub domisili: Option<String>,
    pub keluhan: Option<String>,
    pub barrier: Option<String>,
    pub lead_status: Option<String>,
    pub age: Option<i64>,
    pub symptoms: Option<String>,
    pub medical_history: Option<String>,
    pub urgency_level: Option<String>,
    pub emotion: Option<String>,
    pub program_awareness: Option<String>,
}

impl InsightFields {
    /// Produce the update map for a profile upsert: only non-null,
    /// non-empty-string fields survive, so previously known information is
    /// never overwritten with blanks.
    pub fn to_update_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        let Ok(Value::Object(full)) = serde_json::to_value(self) else {
            return map;
        };
        for (key, value) in full {
            match &value {
                Value::Null => continue,
                Value::String(s) if s.is_empty() => continue,
                _ => {
                    map.insert(key, value);
                }
            }
        }
        map
    }

    pub fn is_empty(&self) -> bool {
        self.to_update_map().is_empty()
    }
}

/// Result of one insight-extraction pass. Extraction never raises: on any
/// failure the fields are all null and `error` records what went wrong.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedInsight {
    #[serde(flatten)]
    pub fields: InsightFields,
    pub error: Option<String>,
}

impl ExtractedInsight {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            fields: InsightFields::default(),
            error: Some(error.into()),
        }
    }
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatDirection {
    Incoming,
    Outgoing,
}

impl std::fmt::Display for ChatDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatDirection::Incoming => write!(f, "incoming"),
            ChatDirection::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// One persisted chat-log row, feeding both the dashboard's live view and
/// the insight payload's conversation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatLogEntry {
    pub wa_number: String,
    pub message: String,
    pub direction: ChatDirection,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl ChatLogEntry {
    pub fn new(
        wa_number: impl Into<String>,
        message: impl Into<String>,
        direction: ChatDirection,
        thread_id: Option<String>,
    ) -> Self {
        Self {
            wa_number: wa_number.into(),
            message: message.into(),
            direction,
            timestamp: Utc::now(),
            thread_id,
        }
    }
}

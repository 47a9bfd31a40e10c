//! Core configuration.
//!
//! Loaded from `KLINIKA_*` environment variables; only the two assistant
//! identities are required. The timing knobs default to the polling bounds
//! the run machinery is built around and exist mainly so tests can shrink
//! them under paused time.

use std::time::Duration;

use anyhow::bail;

use klinika_types::ThreadRole;

/// Fallback reply when anything in the chat flow fails. The end user never
/// sees recovery detail, only this.
pub const DEFAULT_APOLOGY_REPLY: &str =
    "Maaf, terjadi kesalahan dalam memproses pesan Anda. Silakan coba lagi nanti.";

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Assistant identity driving the user-facing conversation.
    pub chat_assistant_id: String,
    /// Assistant identity producing structured lead-qualification output.
    pub insight_assistant_id: String,
    /// Interval between run-status polls.
    pub run_poll_interval: Duration,
    /// Maximum wait for a run to leave the active set.
    pub run_timeout: Duration,
    /// Bounded wait on a blocking run discovered via a busy error.
    pub conflict_poll_timeout: Duration,
    /// Backoff before retrying when a busy error names no blocking run.
    pub conflict_backoff: Duration,
    /// Attempt cap for busy retries; exceeding it is terminal.
    pub max_busy_attempts: u32,
    pub apology_reply: String,
    /// Dashboard base URL, linked from CS notifications.
    pub dashboard_url: String,
}

impl CoreConfig {
    pub fn new(
        chat_assistant_id: impl Into<String>,
        insight_assistant_id: impl Into<String>,
    ) -> Self {
        Self {
            chat_assistant_id: chat_assistant_id.into(),
            insight_assistant_id: insight_assistant_id.into(),
            run_poll_interval: Duration::from_secs(1),
            run_timeout: Duration::from_secs(30),
            conflict_poll_timeout: Duration::from_secs(10),
            conflict_backoff: Duration::from_secs(3),
            max_busy_attempts: 5,
            apology_reply: DEFAULT_APOLOGY_REPLY.to_string(),
            dashboard_url: "http://localhost:3000".to_string(),
        }
    }

    /// Build from environment variables. Fails when either assistant
    /// identity is missing.
    pub fn from_env() -> anyhow::Result<Self> {
        let chat = match std::env::var("KLINIKA_CHAT_ASSISTANT_ID") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => bail!("KLINIKA_CHAT_ASSISTANT_ID is not set"),
        };
        let insight = match std::env::var("KLINIKA_INSIGHT_ASSISTANT_ID") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => bail!("KLINIKA_INSIGHT_ASSISTANT_ID is not set"),
        };

        let mut config = Self::new(chat, insight);
        if let Some(secs) = env_u64("KLINIKA_RUN_TIMEOUT_SECS") {
            config.run_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("KLINIKA_CONFLICT_POLL_TIMEOUT_SECS") {
            config.conflict_poll_timeout = Duration::from_secs(secs);
        }
        if let Ok(url) = std::env::var("KLINIKA_DASHBOARD_URL") {
            if !url.trim().is_empty() {
                config.dashboard_url = url.trim_end_matches('/').to_string();
            }
        }
        Ok(config)
    }

    pub fn assistant_id(&self, role: ThreadRole) -> &str {
        match role {
            ThreadRole::Chat => &self.chat_assistant_id,
            ThreadRole::Insight => &self.insight_assistant_id,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

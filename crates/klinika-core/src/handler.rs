//! Inbound message handler: the full per-message flow from raw WhatsApp text
//! to the outbound reply, with insight extraction fired in the background.
//!
//! The user only ever sees either the assistant's (cleaned) reply or the
//! fixed apology line. Everything else — run failures, contention, store
//! hiccups — stays in the logs.

use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use klinika_store::Store;
use klinika_types::{ChatDirection, ChatLogEntry, ThreadRole};

use crate::config::CoreConfig;
use crate::error::RunError;
use crate::insight::InsightPipeline;
use crate::runs::RunExecutor;
use crate::sender::OutboundSender;
use crate::threads::ThreadRegistry;

/// File-search citation markers the assistant interleaves into its replies,
/// e.g. `【4:0†knowledge.pdf】`.
static CITATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"【\d+:\d+†[^】]+】").unwrap_or_else(|e| panic!("citation regex: {e}"))
});
static BLANK_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").unwrap_or_else(|e| panic!("blank-run regex: {e}")));

/// Strip citation markers and collapse runs of three or more newlines left
/// behind by their removal.
pub fn clean_assistant_response(text: &str) -> String {
    let without_citations = CITATION.replace_all(text, "");
    BLANK_RUNS.replace_all(&without_citations, "\n").into_owned()
}

pub struct MessageHandler {
    registry: ThreadRegistry,
    executor: Arc<RunExecutor>,
    store: Arc<dyn Store>,
    sender: Arc<dyn OutboundSender>,
    insight: Arc<InsightPipeline>,
    config: Arc<CoreConfig>,
}

impl MessageHandler {
    pub fn new(
        registry: ThreadRegistry,
        executor: Arc<RunExecutor>,
        store: Arc<dyn Store>,
        sender: Arc<dyn OutboundSender>,
        insight: Arc<InsightPipeline>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self {
            registry,
            executor,
            store,
            sender,
            insight,
            config,
        }
    }

    /// Handle one inbound message end to end. Infallible by contract: the
    /// worst outcome the user observes is the apology reply.
    pub async fn handle(&self, wa_number: &str, text: &str) {
        let received_at = Utc::now();
        info!("inbound message from {wa_number}");

        self.log(ChatLogEntry::new(
            wa_number,
            text,
            ChatDirection::Incoming,
            None,
        ))
        .await;

        let (reply, thread_id) = match self.chat_reply(wa_number, text).await {
            Ok((reply, thread_id)) => (reply, Some(thread_id)),
            Err(e) => {
                warn!("chat flow failed for {wa_number}: {e}");
                (self.config.apology_reply.clone(), None)
            }
        };
        let chat_succeeded = thread_id.is_some();

        if let Err(e) = self.sender.send_text(wa_number, &reply).await {
            warn!("failed to send reply to {wa_number}: {e}");
        } else {
            self.log(ChatLogEntry::new(
                wa_number,
                reply.as_str(),
                ChatDirection::Outgoing,
                thread_id,
            ))
            .await;
        }

        // Extraction only follows a successful chat run; an apology turn
        // carries nothing worth extracting. Fire-and-forget: it must never
        // delay the reply path.
        if chat_succeeded {
            let insight = self.insight.clone();
            let wa = wa_number.to_string();
            let message = text.to_string();
            tokio::spawn(async move {
                insight.extract_and_apply(&wa, &message, received_at).await;
            });
        }
    }

    async fn chat_reply(&self, wa_number: &str, text: &str) -> Result<(String, String), RunError> {
        let thread_id = self.registry.get_or_create(wa_number, ThreadRole::Chat).await?;
        let raw = self
            .executor
            .execute(wa_number, ThreadRole::Chat, &thread_id, text)
            .await?;
        Ok((clean_assistant_response(&raw), thread_id))
    }

    async fn log(&self, entry: ChatLogEntry) {
        if let Err(e) = self.store.log_chat(&entry).await {
            warn!("failed to log {} message for {}: {e}", entry.direction, entry.wa_number);
        }
    }
}

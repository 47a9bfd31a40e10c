//! WhatsApp channel adapter.
//!
//! Talks to an external WhatsApp HTTP bridge that owns the socket, pairing,
//! and reconnect lifecycle. This adapter long-polls `GET /messages` for
//! inbound text, posts replies to `POST /send`, and reads `GET /status` for
//! health. Group and broadcast chats are skipped; JIDs are normalized to
//! bare phone numbers before they reach the core.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ChannelsConfig;
use crate::traits::{Channel, InboundMessage, SendMessage};

const POLL_TIMEOUT_SECS: u64 = 25;

/// Reduce a WhatsApp JID (`6281234567890@s.whatsapp.net`) to the bare
/// number. A leading `+` is dropped as well.
pub fn normalize_wa_number(jid: &str) -> String {
    let number = jid.split('@').next().unwrap_or(jid);
    number.strip_prefix('+').unwrap_or(number).to_string()
}

/// Group chats and status broadcasts are not conversations the bot joins.
pub fn is_group_or_broadcast(jid: &str) -> bool {
    jid.contains("@g.us") || jid.contains("broadcast")
}

#[derive(Debug, Deserialize)]
struct BridgeMessage {
    id: String,
    jid: String,
    #[serde(default)]
    text: Option<String>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct BridgeMessages {
    #[serde(default)]
    messages: Vec<BridgeMessage>,
}

#[derive(Debug, Deserialize)]
struct BridgeStatus {
    #[serde(default)]
    connected: bool,
}

pub struct WhatsAppBridgeChannel {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl WhatsAppBridgeChannel {
    pub fn new(config: ChannelsConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()?;
        Ok(Self {
            base_url: config.bridge_base_url,
            token: config.bridge_token,
            client,
        })
    }

    fn request(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }
}

#[async_trait]
impl Channel for WhatsAppBridgeChannel {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn send(&self, message: &SendMessage) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "number": message.recipient,
            "text": message.text,
        });
        let resp = self
            .request(self.client.post(format!("{}/send", self.base_url)))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("bridge send failed ({status}): {body}");
        }
        Ok(())
    }

    async fn listen(&self, tx: mpsc::Sender<InboundMessage>) -> anyhow::Result<()> {
        loop {
            let resp = self
                .request(self.client.get(format!("{}/messages", self.base_url)))
                .query(&[("timeout", POLL_TIMEOUT_SECS.to_string())])
                .send()
                .await;

            let resp = match resp {
                Ok(r) => r,
                Err(e) => {
                    warn!("bridge poll error: {e}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
            };

            if !resp.status().is_success() {
                let status = resp.status();
                warn!("bridge poll failed ({status})");
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }

            let batch: BridgeMessages = match resp.json().await {
                Ok(b) => b,
                Err(e) => {
                    warn!("bridge response parse error: {e}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
            };

            for msg in batch.messages {
                if is_group_or_broadcast(&msg.jid) {
                    debug!("skipping group/broadcast message from {}", msg.jid);
                    continue;
                }
                let Some(text) = msg.text.filter(|t| !t.trim().is_empty()) else {
                    continue;
                };
                let inbound = InboundMessage {
                    id: msg.id,
                    wa_number: normalize_wa_number(&msg.jid),
                    text,
                    timestamp: msg.timestamp,
                };
                if tx.send(inbound).await.is_err() {
                    return Ok(()); // receiver dropped — shutdown
                }
            }
        }
    }

    async fn health_check(&self) -> bool {
        let resp = self
            .request(self.client.get(format!("{}/status", self.base_url)))
            .send()
            .await;
        match resp {
            Ok(r) if r.status().is_success() => r
                .json::<BridgeStatus>()
                .await
                .map(|s| s.connected)
                .unwrap_or(false),
            _ => false,
        }
    }
}

//! Listener supervision and core hand-off.
//!
//! The channel listener is restarted with exponential backoff when it fails;
//! every inbound message is handled on its own task so a slow run for one
//! user never queues behind another user's message.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use klinika_core::{MessageHandler, OutboundSender};

use crate::traits::{Channel, InboundMessage, SendMessage};

/// Adapts a [`Channel`] to the core's outbound-sender seam.
pub struct ChannelSender {
    channel: Arc<dyn Channel>,
}

impl ChannelSender {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl OutboundSender for ChannelSender {
    async fn send_text(&self, wa_number: &str, text: &str) -> anyhow::Result<()> {
        self.channel
            .send(&SendMessage {
                recipient: wa_number.to_string(),
                text: text.to_string(),
            })
            .await
    }
}

/// Start the supervised listener. The returned `JoinSet` owns the listener
/// task; `.abort_all()` shuts it down.
pub async fn start_channel_listener(
    channel: Arc<dyn Channel>,
    handler: Arc<MessageHandler>,
) -> JoinSet<()> {
    let mut set = JoinSet::new();
    let name = channel.name().to_string();
    set.spawn(supervise(channel, handler));
    info!("{name} listener started");
    set
}

async fn supervise(channel: Arc<dyn Channel>, handler: Arc<MessageHandler>) {
    let mut backoff_secs: u64 = 1;
    loop {
        let (tx, mut rx) = mpsc::channel::<InboundMessage>(64);

        let channel_listen = channel.clone();
        let listen_handle = tokio::spawn(async move {
            if let Err(e) = channel_listen.listen(tx).await {
                error!("channel listener error: {e}");
            }
        });

        while let Some(msg) = rx.recv().await {
            let handler = handler.clone();
            tokio::spawn(async move {
                handler.handle(&msg.wa_number, &msg.text).await;
            });
        }

        listen_handle.abort();

        // Even the healthy path waits: a listener that returns immediately
        // must not spin the restart loop.
        let healthy = channel.health_check().await;
        let delay = restart_delay(healthy, &mut backoff_secs);
        if !healthy {
            warn!(
                "channel '{}' unhealthy, restarting in {}s",
                channel.name(),
                delay.as_secs()
            );
        }
        tokio::time::sleep(delay).await;
    }
}

/// Delay before the next listener restart. A healthy channel resets the
/// ladder and still waits one second; an unhealthy one climbs it, capped
/// at a minute.
fn restart_delay(healthy: bool, backoff_secs: &mut u64) -> Duration {
    if healthy {
        *backoff_secs = 1;
        Duration::from_secs(1)
    } else {
        let delay = Duration::from_secs(*backoff_secs);
        *backoff_secs = (*backoff_secs * 2).min(60);
        delay
    }
}

//! Transport seam: the core never talks to a messaging backend directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// One message received from the transport, already filtered and normalized
/// to a bare phone number.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub wa_number: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SendMessage {
    pub recipient: String,
    pub text: String,
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &SendMessage) -> anyhow::Result<()>;

    /// Receive messages until the receiver is dropped or the transport fails.
    /// Returning `Ok` means a clean shutdown; `Err` triggers a supervised
    /// restart.
    async fn listen(&self, tx: mpsc::Sender<InboundMessage>) -> anyhow::Result<()>;

    /// Whether the transport currently looks usable.
    async fn health_check(&self) -> bool;
}

use async_trait::async_trait;

/// Outbound-message capability, injected into the core so the transport's
/// connection lifecycle stays entirely outside it.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send_text(&self, wa_number: &str, text: &str) -> anyhow::Result<()>;
}

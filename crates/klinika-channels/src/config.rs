//! Configuration for the WhatsApp bridge adapter, read from `KLINIKA_*`
//! environment variables.

use anyhow::bail;

#[derive(Debug, Clone)]
pub struct ChannelsConfig {
    /// Base URL of the WhatsApp HTTP bridge, e.g. `http://127.0.0.1:8090`.
    pub bridge_base_url: String,
    /// Optional bearer token the bridge expects.
    pub bridge_token: Option<String>,
}

impl ChannelsConfig {
    /// Build from environment variables. The bridge URL is the only required
    /// setting.
    pub fn from_env() -> anyhow::Result<Self> {
        let bridge_base_url = match std::env::var("KLINIKA_WA_BRIDGE_URL") {
            Ok(url) if !url.trim().is_empty() => url.trim_end_matches('/').to_string(),
            _ => bail!("KLINIKA_WA_BRIDGE_URL is not set"),
        };
        let bridge_token = std::env::var("KLINIKA_WA_BRIDGE_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        Ok(Self {
            bridge_base_url,
            bridge_token,
        })
    }
}

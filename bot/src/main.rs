use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use klinika_assistant::OpenAiAssistantClient;
use klinika_channels::{
    start_channel_listener, Channel, ChannelSender, ChannelsConfig, WhatsAppBridgeChannel,
};
use klinika_core::{
    CoreConfig, CsNotifier, InsightPipeline, MessageHandler, RunExecutor, ThreadRegistry,
};
use klinika_observability::{init_bot_logging, logs_dir_under};
use klinika_store::{Store, SupabaseStore};

#[derive(Parser, Debug)]
#[command(name = "klinika-bot")]
#[command(about = "WhatsApp clinic engagement bot")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bot: connect the channel and handle messages until stopped.
    Serve {
        #[arg(long, env = "KLINIKA_STATE_DIR")]
        state_dir: Option<String>,
        #[arg(long, default_value_t = 14)]
        log_retention_days: u64,
    },
    /// Verify environment variables and connectivity, then exit.
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            state_dir,
            log_retention_days,
        } => serve(state_dir, log_retention_days).await,
        Command::Doctor => doctor().await,
    }
}

fn require_env(name: &str) -> anyhow::Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => anyhow::bail!("{name} is not set"),
    }
}

async fn serve(state_dir: Option<String>, log_retention_days: u64) -> anyhow::Result<()> {
    let state_dir = state_dir
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let logs_dir = logs_dir_under(&state_dir);
    let (_log_guard, log_info) = init_bot_logging(&logs_dir, log_retention_days)?;
    info!(
        "logging initialized: dir={} prefix={}",
        log_info.logs_dir, log_info.prefix
    );

    let openai_key = require_env("OPENAI_API_KEY")?;
    let supabase_url = require_env("SUPABASE_URL")?;
    let supabase_key = require_env("SUPABASE_KEY")?;
    let core_config = Arc::new(CoreConfig::from_env().context("core configuration")?);
    let channels_config = ChannelsConfig::from_env().context("channel configuration")?;

    let assistant = Arc::new(OpenAiAssistantClient::new(openai_key));
    let store: Arc<dyn Store> = Arc::new(SupabaseStore::new(supabase_url, supabase_key));
    let channel: Arc<dyn Channel> = Arc::new(WhatsAppBridgeChannel::new(channels_config)?);
    let sender = Arc::new(ChannelSender::new(channel.clone()));

    let registry = ThreadRegistry::new(assistant.clone(), store.clone());
    let executor = Arc::new(RunExecutor::new(
        assistant.clone(),
        store.clone(),
        core_config.clone(),
    ));
    let notifier = CsNotifier::new(store.clone(), sender.clone(), core_config.clone());
    let insight = Arc::new(InsightPipeline::new(
        registry.clone(),
        executor.clone(),
        store.clone(),
        notifier,
    ));
    let handler = Arc::new(MessageHandler::new(
        registry,
        executor,
        store,
        sender,
        insight,
        core_config,
    ));

    let mut listeners = start_channel_listener(channel, handler).await;
    info!("klinika-bot serving");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    listeners.abort_all();
    Ok(())
}

/// Check every external dependency the bot needs and report each one, then
/// fail if any check failed.
async fn doctor() -> anyhow::Result<()> {
    let mut failures = 0usize;

    let mut check = |name: &str, ok: bool, detail: String| {
        if ok {
            println!("ok    {name}: {detail}");
        } else {
            println!("FAIL  {name}: {detail}");
            failures += 1;
        }
    };

    for name in [
        "OPENAI_API_KEY",
        "SUPABASE_URL",
        "SUPABASE_KEY",
        "KLINIKA_CHAT_ASSISTANT_ID",
        "KLINIKA_INSIGHT_ASSISTANT_ID",
        "KLINIKA_WA_BRIDGE_URL",
    ] {
        match std::env::var(name) {
            Ok(v) if !v.trim().is_empty() => check(name, true, "set".to_string()),
            _ => check(name, false, "missing".to_string()),
        }
    }

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if key.starts_with("sk-") {
            check("assistant key", true, "expected shape".to_string());
        } else {
            check("assistant key", false, "does not look like an API key".to_string());
        }
    }

    if let (Ok(url), Ok(key)) = (std::env::var("SUPABASE_URL"), std::env::var("SUPABASE_KEY")) {
        let store = SupabaseStore::new(url, key);
        match store.health_check().await {
            Ok(()) => check("store", true, "reachable".to_string()),
            Err(e) => check("store", false, format!("{e}")),
        }
    }

    if let Ok(config) = ChannelsConfig::from_env() {
        let bridge = WhatsAppBridgeChannel::new(config)?;
        if bridge.health_check().await {
            check("bridge", true, "connected".to_string());
        } else {
            check("bridge", false, "not connected".to_string());
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} check(s) failed");
    }
    println!("all checks passed");
    Ok(())
}

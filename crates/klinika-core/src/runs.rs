//! Run tracker and run executor.
//!
//! The tracker is the pair of `run_id_*` columns on the user's profile row.
//! It is advisory only — a non-null value means "a run might still be
//! active, poll before starting a new one", never "this thread is locked".
//! The remote service is the enforcement authority; this bookkeeping exists
//! so a second flow (or a crash-and-resume) can discover and await a run
//! this process already started.
//!
//! The executor drives one run end to end:
//!
//! ```text
//! Idle -> MessageAppended -> Running -> Completed | Failed | TimedOut
//! ```
//!
//! Every terminal transition clears the tracked run id. A stuck non-null
//! run id would permanently block the user, so the clear happens
//! unconditionally on every exit path, including early failures.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use klinika_assistant::{AssistantApi, AssistantError, RunStatus};
use klinika_store::Store;
use klinika_types::ThreadRole;

use crate::config::CoreConfig;
use crate::conflict::with_busy_retry;
use crate::error::RunError;

/// Poll a run at `interval` until it leaves the active set or `timeout`
/// elapses. A run the service no longer knows counts as settled: it cannot
/// be active, and waiting out the full bound on it would stall the caller.
/// Other poll failures are treated as transient and retried; only the
/// deadline ends the wait.
pub async fn poll_run_status(
    assistant: &dyn AssistantApi,
    thread_id: &str,
    run_id: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<RunStatus, RunError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match assistant.get_run(thread_id, run_id).await {
            Ok(status) if !status.is_active() => return Ok(status),
            Ok(status) => debug!("run {run_id} still {status}"),
            Err(AssistantError::NotFound) => {
                warn!("run {run_id} no longer exists; treating it as settled");
                return Ok(RunStatus::Expired);
            }
            Err(e) => warn!("run {run_id} poll failed (transient, retrying): {e}"),
        }
        if tokio::time::Instant::now() + interval > deadline {
            return Err(RunError::Timeout(timeout));
        }
        tokio::time::sleep(interval).await;
    }
}

pub struct RunExecutor {
    assistant: Arc<dyn AssistantApi>,
    store: Arc<dyn Store>,
    config: Arc<CoreConfig>,
}

impl RunExecutor {
    pub fn new(
        assistant: Arc<dyn AssistantApi>,
        store: Arc<dyn Store>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self {
            assistant,
            store,
            config,
        }
    }

    /// Append `message` to the thread, run the role's assistant over it, and
    /// return the newest assistant reply text.
    pub async fn execute(
        &self,
        wa_number: &str,
        role: ThreadRole,
        thread_id: &str,
        message: &str,
    ) -> Result<String, RunError> {
        self.await_tracked_run(wa_number, role, thread_id).await;

        let result = self.append_and_run(wa_number, role, thread_id, message).await;

        // The single most safety-critical step: the tracked run id must be
        // null after every exit path, or the user is blocked forever.
        if let Err(e) = self.store.set_run_id(wa_number, role, None).await {
            warn!("failed to clear tracked {role} run for {wa_number}: {e}");
        }

        let status = result?;
        if status != RunStatus::Completed {
            return Err(RunError::Terminal { status });
        }

        let messages = self.assistant.list_messages(thread_id).await?;
        messages
            .into_iter()
            .filter(|m| m.role == "assistant")
            .max_by_key(|m| m.created_at)
            .map(|m| m.text)
            .ok_or(RunError::NoAssistantReply)
    }

    /// Step 1 of the state machine: if the tracker hints at an in-flight run
    /// on this thread, wait it out before colliding with it. Failures here
    /// are logged and ignored — the tracker is a stale-tolerant cache, and
    /// the busy-retry path below reconciles against the service anyway.
    async fn await_tracked_run(&self, wa_number: &str, role: ThreadRole, thread_id: &str) {
        let tracked = match self.store.get_profile(wa_number).await {
            Ok(profile) => profile.and_then(|p| p.run_id(role).map(|r| r.to_string())),
            Err(e) => {
                warn!("profile read failed before {role} run for {wa_number} ({e}); proceeding");
                None
            }
        };
        let Some(run_id) = tracked else { return };

        info!("tracked {role} run {run_id} for {wa_number}; awaiting it before starting a new run");
        match poll_run_status(
            self.assistant.as_ref(),
            thread_id,
            &run_id,
            self.config.run_timeout,
            self.config.run_poll_interval,
        )
        .await
        {
            Ok(status) => debug!("tracked run {run_id} settled with status {status}"),
            Err(e) => warn!("tracked run {run_id} did not settle ({e}); proceeding"),
        }
    }

    /// Steps 2–5: append, create the run, record it, poll it to exit.
    async fn append_and_run(
        &self,
        wa_number: &str,
        role: ThreadRole,
        thread_id: &str,
        message: &str,
    ) -> Result<RunStatus, RunError> {
        with_busy_retry(
            self.assistant.as_ref(),
            &self.config,
            thread_id,
            "append message",
            || self.assistant.add_message(thread_id, "user", message),
        )
        .await?;

        let assistant_id = self.config.assistant_id(role);
        let run_id = with_busy_retry(
            self.assistant.as_ref(),
            &self.config,
            thread_id,
            "create run",
            || self.assistant.create_run(thread_id, assistant_id),
        )
        .await?;
        info!("created {role} run {run_id} on thread {thread_id}");

        // Record before polling so a concurrent caller (or a restart) can
        // discover the run. Losing this write only degrades to the busy-error
        // path, so it is not fatal.
        if let Err(e) = self.store.set_run_id(wa_number, role, Some(&run_id)).await {
            warn!("failed to record {role} run {run_id} for {wa_number}: {e}");
        }

        poll_run_status(
            self.assistant.as_ref(),
            thread_id,
            &run_id,
            self.config.run_timeout,
            self.config.run_poll_interval,
        )
        .await
    }
}

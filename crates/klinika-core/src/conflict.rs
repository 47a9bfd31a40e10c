//! Conflict resolution for thread contention.
//!
//! Two flows share one remote thread per user per role, and the service
//! rejects any write while a run is active on it. The rejection is surfaced
//! as a structured [`AssistantError::Busy`] that may carry the blocking
//! run's id. With the id we wait on that exact run; without it we back off
//! blind and try again. Either way the attempt count is hard-capped — a
//! thread that stays contended past the cap is reported, not spun on.

use tracing::{info, warn};

use klinika_assistant::{AssistantApi, AssistantError};

use crate::config::CoreConfig;
use crate::error::RunError;
use crate::runs::poll_run_status;

/// Run `op` against `thread_id`, absorbing busy rejections up to
/// `config.max_busy_attempts` attempts. Non-busy errors pass through on the
/// first occurrence.
pub async fn with_busy_retry<T, F, Fut>(
    assistant: &dyn AssistantApi,
    config: &CoreConfig,
    thread_id: &str,
    operation: &str,
    mut op: F,
) -> Result<T, RunError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AssistantError>>,
{
    for attempt in 1..=config.max_busy_attempts {
        let active_run_id = match op().await {
            Ok(value) => return Ok(value),
            Err(AssistantError::Busy { active_run_id }) => active_run_id,
            Err(e) => return Err(e.into()),
        };

        if attempt == config.max_busy_attempts {
            break;
        }

        match active_run_id {
            Some(run_id) => {
                info!(
                    "{operation} on {thread_id} blocked by run {run_id} \
                     (attempt {attempt}); awaiting it"
                );
                // Bounded wait on the named run; if it will not settle we
                // fall through to the next attempt and let the cap decide.
                if let Err(e) = poll_run_status(
                    assistant,
                    thread_id,
                    &run_id,
                    config.conflict_poll_timeout,
                    config.run_poll_interval,
                )
                .await
                {
                    warn!("blocking run {run_id} on {thread_id} did not settle: {e}");
                }
            }
            None => {
                info!(
                    "{operation} on {thread_id} rejected as busy with no run id \
                     (attempt {attempt}); backing off"
                );
                tokio::time::sleep(config.conflict_backoff).await;
            }
        }
    }

    warn!(
        "{operation} on {thread_id} still contended after {} attempts; giving up",
        config.max_busy_attempts
    );
    Err(RunError::ThreadContended {
        attempts: config.max_busy_attempts,
    })
}

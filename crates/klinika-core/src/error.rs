use std::time::Duration;

use klinika_assistant::{AssistantError, RunStatus};
use thiserror::Error;

/// Failures of the run machinery. Everything here is internal detail: the
/// chat-facing caller collapses any variant into the fixed apology reply.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Assistant(#[from] AssistantError),
    /// The run reached a terminal state other than successful completion.
    #[error("run ended with status {status}")]
    Terminal { status: RunStatus },
    /// The run never left the active set within the polling bound. The
    /// remote run may still finish later; the next interaction reconciles.
    #[error("run polling timed out after {0:?}")]
    Timeout(Duration),
    /// The busy-retry cap was exhausted without acquiring the thread.
    #[error("could not acquire thread after {attempts} attempts")]
    ThreadContended { attempts: u32 },
    #[error("no assistant reply found on thread")]
    NoAssistantReply,
}

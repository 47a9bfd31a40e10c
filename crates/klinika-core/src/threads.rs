//! Thread registry — maps `(user, role)` to a persistent conversation
//! thread on the remote assistant service.
//!
//! A stored handle is reused only when it is format-valid and the service
//! still knows it; otherwise a fresh thread is created and persisted. Thread
//! creation failures propagate — there is no safe default thread.

use std::sync::Arc;

use tracing::{info, warn};

use klinika_assistant::{is_valid_thread_id, AssistantApi, AssistantError};
use klinika_store::Store;
use klinika_types::ThreadRole;

use crate::error::RunError;

#[derive(Clone)]
pub struct ThreadRegistry {
    assistant: Arc<dyn AssistantApi>,
    store: Arc<dyn Store>,
}

impl ThreadRegistry {
    pub fn new(assistant: Arc<dyn AssistantApi>, store: Arc<dyn Store>) -> Self {
        Self { assistant, store }
    }

    /// Resolve the thread handle for `(wa_number, role)`, creating and
    /// persisting one when the stored handle is absent, malformed, or no
    /// longer live on the service.
    pub async fn get_or_create(
        &self,
        wa_number: &str,
        role: ThreadRole,
    ) -> Result<String, RunError> {
        let stored = match self.store.get_profile(wa_number).await {
            Ok(profile) => profile.and_then(|p| p.thread_id(role).map(|t| t.to_string())),
            Err(e) => {
                warn!("profile read failed for {wa_number} ({e}); treating as new user");
                None
            }
        };

        if let Some(thread_id) = stored {
            if !is_valid_thread_id(&thread_id) {
                warn!("malformed {role} thread handle {thread_id:?} for {wa_number}; creating a fresh thread");
            } else {
                match self.assistant.get_thread(&thread_id).await {
                    Ok(()) => return Ok(thread_id),
                    Err(AssistantError::NotFound) => {
                        info!("{role} thread {thread_id} for {wa_number} no longer exists; creating a fresh thread");
                    }
                    Err(e) => {
                        warn!("{role} thread {thread_id} verification failed ({e}); creating a fresh thread");
                    }
                }
            }
        }

        let thread_id = self.assistant.create_thread().await?;
        info!("created {role} thread {thread_id} for {wa_number}");
        if let Err(e) = self.store.set_thread_id(wa_number, role, &thread_id).await {
            // Bookkeeping only: keep going with the in-memory handle and let
            // the next interaction re-create if the write never landed.
            warn!("failed to persist {role} thread {thread_id} for {wa_number}: {e}");
        }
        Ok(thread_id)
    }

    /// Forget the stored thread for `(wa_number, role)`. Any run handle
    /// recorded against it is cleared with it; the next message starts a
    /// brand-new conversation context.
    pub async fn reset(&self, wa_number: &str, role: ThreadRole) -> Result<(), RunError> {
        if let Err(e) = self.store.reset_thread(wa_number, role).await {
            warn!("failed to reset {role} thread for {wa_number}: {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockAssistant, MockStore};
    use klinika_types::UserProfile;

    const WA: &str = "6281234567890";

    fn profile_with_chat_thread(thread_id: &str) -> UserProfile {
        UserProfile {
            wa_number: WA.to_string(),
            thread_id_chatbot: Some(thread_id.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn reuses_stored_thread_without_creating() {
        let assistant = Arc::new(MockAssistant::default());
        assistant.know_thread("thread_existing");
        let store = Arc::new(MockStore::with_profile(profile_with_chat_thread(
            "thread_existing",
        )));
        let registry = ThreadRegistry::new(assistant.clone(), store);

        let first = registry.get_or_create(WA, ThreadRole::Chat).await.unwrap();
        let second = registry.get_or_create(WA, ThreadRole::Chat).await.unwrap();

        assert_eq!(first, "thread_existing");
        assert_eq!(second, "thread_existing");
        assert_eq!(
            assistant
                .created_threads
                .load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn creates_thread_for_new_user_and_persists() {
        let assistant = Arc::new(MockAssistant::default());
        let store = Arc::new(MockStore::default());
        let registry = ThreadRegistry::new(assistant, store.clone());

        let thread_id = registry.get_or_create(WA, ThreadRole::Chat).await.unwrap();

        assert!(thread_id.starts_with("thread_"));
        let profile = store.profile.lock().unwrap().clone().unwrap();
        assert_eq!(profile.thread_id_chatbot.as_deref(), Some(thread_id.as_str()));
    }

    #[tokio::test]
    async fn malformed_handle_forces_recreation() {
        let assistant = Arc::new(MockAssistant::default());
        let store = Arc::new(MockStore::with_profile(profile_with_chat_thread(
            "not-a-thread-id",
        )));
        let registry = ThreadRegistry::new(assistant.clone(), store.clone());

        let thread_id = registry.get_or_create(WA, ThreadRole::Chat).await.unwrap();

        assert!(is_valid_thread_id(&thread_id));
        assert_eq!(
            assistant
                .created_threads
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        let profile = store.profile.lock().unwrap().clone().unwrap();
        assert_eq!(profile.thread_id_chatbot.as_deref(), Some(thread_id.as_str()));
    }

    #[tokio::test]
    async fn expired_thread_is_replaced() {
        let assistant = Arc::new(MockAssistant::default());
        // Valid format, but get_thread will report it gone.
        let store = Arc::new(MockStore::with_profile(profile_with_chat_thread(
            "thread_expired",
        )));
        let registry = ThreadRegistry::new(assistant.clone(), store.clone());

        let thread_id = registry.get_or_create(WA, ThreadRole::Chat).await.unwrap();

        assert_ne!(thread_id, "thread_expired");
        assert_eq!(
            assistant
                .created_threads
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn creation_failure_propagates() {
        let assistant = Arc::new(MockAssistant::default());
        *assistant.create_thread_error.lock().unwrap() = Some(AssistantError::Api {
            status: 500,
            message: "server error".to_string(),
        });
        let store = Arc::new(MockStore::default());
        let registry = ThreadRegistry::new(assistant, store);

        let result = registry.get_or_create(WA, ThreadRole::Chat).await;
        assert!(matches!(
            result,
            Err(RunError::Assistant(AssistantError::Api { status: 500, .. }))
        ));
    }

    #[tokio::test]
    async fn persist_failure_still_returns_handle() {
        let assistant = Arc::new(MockAssistant::default());
        let store = Arc::new(MockStore::default());
        store
            .fail_writes
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let registry = ThreadRegistry::new(assistant, store);

        let thread_id = registry.get_or_create(WA, ThreadRole::Chat).await.unwrap();
        assert!(is_valid_thread_id(&thread_id));
    }

    #[tokio::test]
    async fn roles_resolve_to_independent_threads() {
        let assistant = Arc::new(MockAssistant::default());
        let store = Arc::new(MockStore::default());
        let registry = ThreadRegistry::new(assistant, store.clone());

        let chat = registry.get_or_create(WA, ThreadRole::Chat).await.unwrap();
        let insight = registry
            .get_or_create(WA, ThreadRole::Insight)
            .await
            .unwrap();

        assert_ne!(chat, insight);
        let profile = store.profile.lock().unwrap().clone().unwrap();
        assert_eq!(profile.thread_id_chatbot.as_deref(), Some(chat.as_str()));
        assert_eq!(profile.thread_id_analytic.as_deref(), Some(insight.as_str()));
    }

    #[tokio::test]
    async fn reset_clears_thread_and_run_together() {
        let assistant = Arc::new(MockAssistant::default());
        let mut profile = profile_with_chat_thread("thread_existing");
        profile.run_id_chatbot = Some("run_left_over".to_string());
        let store = Arc::new(MockStore::with_profile(profile));
        let registry = ThreadRegistry::new(assistant, store.clone());

        registry.reset(WA, ThreadRole::Chat).await.unwrap();

        let profile = store.profile.lock().unwrap().clone().unwrap();
        assert!(profile.thread_id_chatbot.is_none());
        assert!(profile.run_id_chatbot.is_none());
    }
}

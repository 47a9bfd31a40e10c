//! Hand-rolled test doubles for the core's trait seams.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use klinika_assistant::{AssistantApi, AssistantError, RunStatus, ThreadMessage};
use klinika_store::{Store, StoreError};
use klinika_types::{ChatLogEntry, InsightFields, ThreadRole, UserProfile};

use crate::sender::OutboundSender;

#[derive(Default)]
pub(crate) struct MockAssistant {
    pub created_threads: AtomicUsize,
    pub created_runs: AtomicUsize,
    /// Thread ids `get_thread` treats as live.
    pub known_threads: Mutex<Vec<String>>,
    pub create_thread_error: Mutex<Option<AssistantError>>,
    /// Scripted results, consumed front-first; empty queue means Ok.
    pub add_message_results: Mutex<VecDeque<Result<(), AssistantError>>>,
    pub create_run_results: Mutex<VecDeque<Result<String, AssistantError>>>,
    /// Per-run status script; the final entry repeats once the queue drains.
    pub run_statuses: Mutex<HashMap<String, VecDeque<RunStatus>>>,
    /// Run ids `get_run` answers with `NotFound`.
    pub missing_runs: Mutex<Vec<String>>,
    /// Every run id observed via `get_run`, in order.
    pub polled_runs: Mutex<Vec<String>>,
    /// `(thread_id, content)` pairs successfully appended.
    pub appended: Mutex<Vec<(String, String)>>,
    pub thread_messages: Mutex<Vec<ThreadMessage>>,
}

impl MockAssistant {
    pub fn script_run(&self, run_id: &str, statuses: &[RunStatus]) {
        self.run_statuses
            .lock()
            .unwrap()
            .insert(run_id.to_string(), statuses.iter().copied().collect());
    }

    pub fn forget_run(&self, run_id: &str) {
        self.missing_runs.lock().unwrap().push(run_id.to_string());
    }

    pub fn know_thread(&self, thread_id: &str) {
        self.known_threads
            .lock()
            .unwrap()
            .push(thread_id.to_string());
    }

    pub fn set_assistant_reply(&self, text: &str) {
        *self.thread_messages.lock().unwrap() = vec![
            ThreadMessage {
                role: "user".to_string(),
                text: "hello".to_string(),
                created_at: 1,
            },
            ThreadMessage {
                role: "assistant".to_string(),
                text: text.to_string(),
                created_at: 2,
            },
        ];
    }
}

#[async_trait]
impl AssistantApi for MockAssistant {
    async fn create_thread(&self) -> Result<String, AssistantError> {
        if let Some(err) = self.create_thread_error.lock().unwrap().take() {
            return Err(err);
        }
        let n = self.created_threads.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("thread_mock{n}");
        self.know_thread(&id);
        Ok(id)
    }

    async fn get_thread(&self, thread_id: &str) -> Result<(), AssistantError> {
        if self
            .known_threads
            .lock()
            .unwrap()
            .iter()
            .any(|t| t == thread_id)
        {
            Ok(())
        } else {
            Err(AssistantError::NotFound)
        }
    }

    async fn add_message(
        &self,
        thread_id: &str,
        _role: &str,
        content: &str,
    ) -> Result<(), AssistantError> {
        if let Some(result) = self.add_message_results.lock().unwrap().pop_front() {
            result?;
        }
        self.appended
            .lock()
            .unwrap()
            .push((thread_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn create_run(
        &self,
        _thread_id: &str,
        _assistant_id: &str,
    ) -> Result<String, AssistantError> {
        if let Some(result) = self.create_run_results.lock().unwrap().pop_front() {
            return result;
        }
        let n = self.created_runs.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("run_mock{n}"))
    }

    async fn get_run(&self, _thread_id: &str, run_id: &str) -> Result<RunStatus, AssistantError> {
        self.polled_runs.lock().unwrap().push(run_id.to_string());
        if self.missing_runs.lock().unwrap().iter().any(|r| r == run_id) {
            return Err(AssistantError::NotFound);
        }
        let mut scripts = self.run_statuses.lock().unwrap();
        match scripts.get_mut(run_id) {
            Some(queue) if queue.len() > 1 => Ok(queue.pop_front().unwrap()),
            Some(queue) => Ok(*queue.front().unwrap_or(&RunStatus::Completed)),
            None => Ok(RunStatus::Completed),
        }
    }

    async fn list_messages(&self, _thread_id: &str) -> Result<Vec<ThreadMessage>, AssistantError> {
        Ok(self.thread_messages.lock().unwrap().clone())
    }
}

fn write_failure() -> StoreError {
    StoreError::Api {
        status: 500,
        message: "mock write failure".to_string(),
    }
}

#[derive(Default)]
pub(crate) struct MockStore {
    pub profile: Mutex<Option<UserProfile>>,
    pub fail_writes: AtomicBool,
    pub fail_reads: AtomicBool,
    /// Successful `set_run_id` writes, in order.
    pub run_id_writes: Mutex<Vec<(ThreadRole, Option<String>)>>,
    pub merged: Mutex<Vec<InsightFields>>,
    pub chat_log: Mutex<Vec<ChatLogEntry>>,
    pub settings: Mutex<HashMap<String, String>>,
    pub last_bot_message: Mutex<Option<String>>,
}

impl MockStore {
    pub fn with_profile(profile: UserProfile) -> Self {
        let store = Self::default();
        *store.profile.lock().unwrap() = Some(profile);
        store
    }

    pub fn set_setting(&self, key: &str, value: &str) {
        self.settings
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    fn edit_profile(&self, wa_number: &str, f: impl FnOnce(&mut UserProfile)) {
        let mut guard = self.profile.lock().unwrap();
        let profile = guard.get_or_insert_with(|| UserProfile {
            wa_number: wa_number.to_string(),
            ..Default::default()
        });
        f(profile);
        profile.last_updated = Some(Utc::now());
    }

    pub fn tracked_run(&self, role: ThreadRole) -> Option<String> {
        self.profile
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|p| p.run_id(role).map(|r| r.to_string()))
    }
}

#[async_trait]
impl Store for MockStore {
    async fn get_profile(&self, _wa_number: &str) -> Result<Option<UserProfile>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(write_failure());
        }
        Ok(self.profile.lock().unwrap().clone())
    }

    async fn set_thread_id(
        &self,
        wa_number: &str,
        role: ThreadRole,
        thread_id: &str,
    ) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(write_failure());
        }
        self.edit_profile(wa_number, |p| match role {
            ThreadRole::Chat => p.thread_id_chatbot = Some(thread_id.to_string()),
            ThreadRole::Insight => p.thread_id_analytic = Some(thread_id.to_string()),
        });
        Ok(())
    }

    async fn set_run_id(
        &self,
        wa_number: &str,
        role: ThreadRole,
        run_id: Option<&str>,
    ) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(write_failure());
        }
        let owned = run_id.map(|r| r.to_string());
        self.run_id_writes
            .lock()
            .unwrap()
            .push((role, owned.clone()));
        self.edit_profile(wa_number, |p| match role {
            ThreadRole::Chat => p.run_id_chatbot = owned,
            ThreadRole::Insight => p.run_id_analytic = owned,
        });
        Ok(())
    }

    async fn reset_thread(&self, wa_number: &str, role: ThreadRole) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(write_failure());
        }
        self.edit_profile(wa_number, |p| match role {
            ThreadRole::Chat => {
                p.thread_id_chatbot = None;
                p.run_id_chatbot = None;
            }
            ThreadRole::Insight => {
                p.thread_id_analytic = None;
                p.run_id_analytic = None;
            }
        });
        Ok(())
    }

    async fn merge_insights(
        &self,
        wa_number: &str,
        fields: &InsightFields,
    ) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(write_failure());
        }
        self.merged.lock().unwrap().push(fields.clone());
        let survivors = fields.to_update_map();
        self.edit_profile(wa_number, |p| {
            let mut current = match serde_json::to_value(&p.insights) {
                Ok(serde_json::Value::Object(map)) => map,
                _ => serde_json::Map::new(),
            };
            for (key, value) in survivors {
                current.insert(key, value);
            }
            if let Ok(updated) = serde_json::from_value(serde_json::Value::Object(current)) {
                p.insights = updated;
            }
        });
        Ok(())
    }

    async fn mark_cs_notified(&self, wa_number: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(write_failure());
        }
        self.edit_profile(wa_number, |p| p.notified_cs = true);
        Ok(())
    }

    async fn log_chat(&self, entry: &ChatLogEntry) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(write_failure());
        }
        self.chat_log.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn last_bot_message_before(
        &self,
        _wa_number: &str,
        _before: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(write_failure());
        }
        Ok(self.last_bot_message.lock().unwrap().clone())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.settings.lock().unwrap().get(key).cloned())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockSender {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl OutboundSender for MockSender {
    async fn send_text(&self, wa_number: &str, text: &str) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("mock send failure");
        }
        self.sent
            .lock()
            .unwrap()
            .push((wa_number.to_string(), text.to_string()));
        Ok(())
    }
}

//! Conversation engine: per-thread turns against the chat model.
//!
//! Threads live in a map guarded by a `parking_lot::Mutex` that is held
//! only long enough to find or create a thread's slot. Each slot is a
//! `tokio::sync::Mutex<ThreadState>`, so turns on one thread run one at a
//! time while turns on different threads proceed in parallel, and no
//! lock shared between threads is ever held across a model call.
//!
//! A turn is transactional. The plan is computed from the stored state,
//! every model call runs, and only then is the state updated. If any call
//! fails or times out, the stored history is exactly what it was before.
//!
//! Threads are created on first use and live until [`ConversationEngine::close_thread`].
//! Closing waits for an in-flight turn on the thread, and a turn that
//! finds its slot closed starts over on a fresh thread, so no reply is
//! ever committed to a thread that has already been forgotten.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use catalog_rag_core::conversation::{reply_request_after_summary, ThreadId, ThreadState, TurnPlan};
use catalog_rag_core::llm::ChatModel;
use catalog_rag_core::models::ChatMessage;
use catalog_rag_core::RagError;

struct ThreadEntry {
    state: ThreadState,
    closed: bool,
}

type ThreadSlot = Arc<tokio::sync::Mutex<ThreadEntry>>;

pub struct ConversationEngine {
    model: Arc<dyn ChatModel>,
    threads: Mutex<HashMap<ThreadId, ThreadSlot>>,
    summary_threshold: usize,
    timeout: Duration,
}

impl ConversationEngine {
    pub fn new(model: Arc<dyn ChatModel>, summary_threshold: usize, timeout_secs: u64) -> Self {
        Self {
            model,
            threads: Mutex::new(HashMap::new()),
            summary_threshold: summary_threshold.max(1),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn slot(&self, thread_id: &str) -> ThreadSlot {
        let mut threads = self.threads.lock();
        threads
            .entry(thread_id.to_string())
            .or_insert_with(|| {
                log::debug!("new conversation thread {}", thread_id);
                Arc::new(tokio::sync::Mutex::new(ThreadEntry {
                    state: ThreadState::default(),
                    closed: false,
                }))
            })
            .clone()
    }

    async fn bounded<F>(&self, operation: &'static str, call: F) -> Result<String, RagError>
    where
        F: Future<Output = Result<String, RagError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(RagError::ConversationModel(msg))) => Err(RagError::ConversationModel(msg)),
            Ok(Err(e @ RagError::Timeout { .. })) => Err(e),
            Ok(Err(other)) => Err(RagError::ConversationModel(other.to_string())),
            Err(_) => Err(RagError::Timeout {
                operation,
                secs: self.timeout.as_secs(),
            }),
        }
    }

    /// Run one turn on `thread_id` and return the assistant's reply.
    ///
    /// On error the thread's history is left unchanged; retrying is safe.
    pub async fn turn(&self, thread_id: &str, text: &str) -> Result<String, RagError> {
        let mut entry = loop {
            let entry = self.slot(thread_id).lock_owned().await;
            if !entry.closed {
                break entry;
            }
        };
        let state = &mut entry.state;
        let human = ChatMessage::human(text);

        match state.plan_turn(&human, self.summary_threshold) {
            TurnPlan::Direct { request } => {
                let reply = self
                    .bounded("reply generation", self.model.complete(&request))
                    .await?;
                state.commit_direct(human, &reply);
                Ok(reply)
            }
            TurnPlan::Summarize { summary_request } => {
                log::info!(
                    "summarizing thread {} ({} messages)",
                    thread_id,
                    state.len()
                );
                let summary = self
                    .bounded("summarization", self.model.complete(&summary_request))
                    .await?;
                let request = reply_request_after_summary(&summary, &human);
                let reply = self
                    .bounded("reply generation", self.model.complete(&request))
                    .await?;
                state.commit_summarized(&summary, human, &reply);
                Ok(reply)
            }
        }
    }

    /// Snapshot of a thread, or `None` if it does not exist.
    ///
    /// Waits for an in-flight turn on the same thread to finish.
    pub async fn history(&self, thread_id: &str) -> Option<ThreadState> {
        let slot = self.threads.lock().get(thread_id).cloned()?;
        let entry = slot.lock().await;
        if entry.closed {
            return None;
        }
        Some(entry.state.clone())
    }

    /// Forget a thread. Returns whether it existed.
    ///
    /// Waits for an in-flight turn on the same thread to finish first.
    pub async fn close_thread(&self, thread_id: &str) -> bool {
        let Some(slot) = self.threads.lock().get(thread_id).cloned() else {
            return false;
        };
        let mut entry = slot.lock().await;
        if entry.closed {
            return false;
        }
        entry.closed = true;
        self.forget(thread_id, &slot);
        log::debug!("closed conversation thread {}", thread_id);
        true
    }

    /// Drop `slot` from the map unless a newer slot already replaced it.
    fn forget(&self, thread_id: &str, slot: &ThreadSlot) {
        let mut threads = self.threads.lock();
        if threads
            .get(thread_id)
            .map_or(false, |current| Arc::ptr_eq(current, slot))
        {
            threads.remove(thread_id);
        }
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use catalog_rag_core::conversation::SUMMARY_INSTRUCTION;
    use catalog_rag_core::models::Role;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Echoes the last message; fails while `broken` is set.
    struct Echo {
        broken: AtomicBool,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Echo {
        fn new() -> Self {
            Self {
                broken: AtomicBool::new(false),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, RagError> {
            self.requests.lock().push(messages.to_vec());
            if self.broken.load(Ordering::SeqCst) {
                return Err(RagError::ConversationModel("service unavailable".into()));
            }
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            if last == SUMMARY_INSTRUCTION {
                Ok("summary".to_string())
            } else {
                Ok(format!("re: {}", last))
            }
        }
    }

    fn engine() -> (ConversationEngine, Arc<Echo>) {
        let model = Arc::new(Echo::new());
        (ConversationEngine::new(model.clone(), 4, 5), model)
    }

    #[tokio::test]
    async fn test_direct_turns_append() {
        let (engine, _) = engine();
        assert_eq!(engine.turn("t", "hola").await.unwrap(), "re: hola");
        engine.turn("t", "otra").await.unwrap();
        let state = engine.history("t").await.unwrap();
        assert_eq!(state.len(), 4);
        assert!(state.summary.is_none());
    }

    #[tokio::test]
    async fn test_third_turn_summarizes() {
        let (engine, model) = engine();
        engine.turn("t", "a").await.unwrap();
        engine.turn("t", "b").await.unwrap();
        let reply = engine.turn("t", "c").await.unwrap();
        assert_eq!(reply, "re: c");

        let state = engine.history("t").await.unwrap();
        assert_eq!(state.len(), 3);
        assert_eq!(state.messages[0], ChatMessage::assistant("summary"));
        assert_eq!(state.messages[1], ChatMessage::human("c"));
        assert_eq!(state.summary.as_deref(), Some("summary"));

        let requests = model.requests.lock();
        let last = requests.last().unwrap();
        let roles: Vec<Role> = last.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::Assistant, Role::Human]);
    }

    #[tokio::test]
    async fn test_failed_turn_leaves_history_unchanged() {
        let (engine, model) = engine();
        engine.turn("t", "a").await.unwrap();
        let before = engine.history("t").await.unwrap();

        model.broken.store(true, Ordering::SeqCst);
        let err = engine.turn("t", "b").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(engine.history("t").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_close_thread() {
        let (engine, _) = engine();
        engine.turn("t", "a").await.unwrap();
        assert_eq!(engine.thread_count(), 1);
        assert!(engine.close_thread("t").await);
        assert!(!engine.close_thread("t").await);
        assert!(engine.history("t").await.is_none());
    }

    /// Replies after a pause so a close can race the turn.
    struct Slow;

    #[async_trait]
    impl ChatModel for Slow {
        fn model_name(&self) -> &str {
            "slow"
        }
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, RagError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(format!("re: {}", last))
        }
    }

    #[tokio::test]
    async fn test_close_waits_for_in_flight_turn() {
        let engine = Arc::new(ConversationEngine::new(Arc::new(Slow), 4, 5));
        let turning = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.turn("t", "a").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(engine.close_thread("t").await);
        assert!(turning.await.unwrap().is_ok());
        assert_eq!(engine.thread_count(), 0);
        assert!(engine.history("t").await.is_none());

        engine.turn("t", "b").await.unwrap();
        let state = engine.history("t").await.unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state.messages[0], ChatMessage::human("b"));
    }
}

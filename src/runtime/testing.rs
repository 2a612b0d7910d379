//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use crate::conversation::Conversation;
use crate::db::ConversationSummary;
use crate::workflow::steps::{CountryStep, ProductStep};
use crate::workflow::WorkflowDriver;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn fixed_clock() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// Country, then product: the smallest schema with an ordering to get wrong
pub fn country_product_driver() -> WorkflowDriver {
    WorkflowDriver::builder()
        .step(CountryStep::default())
        .step(ProductStep)
        .completion_message("All set")
        .clock(fixed_clock)
        .build()
}

// ============================================================================
// In-Memory Storage
// ============================================================================

/// In-memory storage for testing
pub struct InMemoryStorage {
    snapshots: Mutex<HashMap<String, Conversation>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
            saves: AtomicUsize::new(0),
            fail_saves: AtomicBool::new(false),
        }
    }

    /// Seed a snapshot without counting it as a save
    pub fn insert(&self, conversation: Conversation) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(conversation.id.clone(), conversation);
    }

    pub fn get(&self, conv_id: &str) -> Option<Conversation> {
        self.snapshots.lock().unwrap().get(conv_id).cloned()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make every following save fail
    pub fn set_failing(&self, failing: bool) {
        self.fail_saves.store(failing, Ordering::SeqCst);
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for InMemoryStorage {
    async fn load(&self, conv_id: &str) -> Result<Option<Conversation>, String> {
        Ok(self.get(conv_id))
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), String> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err("disk full".to_string());
        }

        let mut snapshots = self.snapshots.lock().unwrap();
        if let Some(stored) = snapshots.get(&conversation.id) {
            if !stored.chat_log.is_prefix_of(&conversation.chat_log) {
                return Err(format!(
                    "Refusing to rewrite chat log of {}",
                    conversation.id
                ));
            }
        }
        snapshots.insert(conversation.id.clone(), conversation.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, String> {
        let snapshots = self.snapshots.lock().unwrap();
        let mut summaries: Vec<_> = snapshots
            .values()
            .map(|conv| ConversationSummary {
                id: conv.id.clone(),
                status: conv.status,
                order_status: conv.order_status,
                message_count: i64::try_from(conv.chat_log.len()).unwrap_or(i64::MAX),
                created_at: fixed_clock(),
                updated_at: fixed_clock(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }
}

// ============================================================================
// Test Runtime Builder
// ============================================================================

use crate::runtime::{ConversationHandle, ConversationRuntime, RuntimeEvent};
use crate::workflow::Event;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Helper for building test runtimes with minimal boilerplate
pub struct TestRuntime {
    pub storage: Arc<InMemoryStorage>,
    pub handle: ConversationHandle,
    pub broadcast_rx: broadcast::Receiver<RuntimeEvent>,
    pub shutdown: CancellationToken,
    _runtime_handle: tokio::task::JoinHandle<()>,
}

impl TestRuntime {
    pub fn new() -> TestRuntimeBuilder {
        TestRuntimeBuilder::new()
    }
}

pub struct TestRuntimeBuilder {
    conversation: Conversation,
    driver: Option<WorkflowDriver>,
    record_rejected: bool,
}

impl TestRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            conversation: Conversation::new("test-conv"),
            driver: None,
            record_rejected: true,
        }
    }

    pub fn driver(mut self, driver: WorkflowDriver) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn conversation(mut self, conversation: Conversation) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn record_rejected(mut self, record: bool) -> Self {
        self.record_rejected = record;
        self
    }

    pub fn build(self) -> TestRuntime {
        let storage = Arc::new(InMemoryStorage::new());
        storage.insert(self.conversation.clone());
        let driver = Arc::new(self.driver.unwrap_or_else(country_product_driver));

        let (command_tx, command_rx) = mpsc::channel(32);
        let (broadcast_tx, broadcast_rx) = broadcast::channel(128);
        let shutdown = CancellationToken::new();
        let handle = ConversationHandle::new(
            self.conversation.id.clone(),
            command_tx,
            broadcast_tx.clone(),
        );

        let runtime = ConversationRuntime::new(
            self.conversation,
            driver,
            storage.clone(),
            command_rx,
            broadcast_tx,
            shutdown.clone(),
        )
        .with_record_rejected(self.record_rejected);

        let runtime_handle = tokio::spawn(runtime.run());

        TestRuntime {
            storage,
            handle,
            broadcast_rx,
            shutdown,
            _runtime_handle: runtime_handle,
        }
    }
}

impl Default for TestRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRuntime {
    pub async fn advance(&self) -> Conversation {
        self.handle
            .send(Event::Advance)
            .await
            .expect("advance failed")
    }

    /// Collect every event broadcast so far
    pub async fn drain_events(&mut self) -> Vec<RuntimeEvent> {
        let mut events = Vec::new();
        while let Ok(Ok(event)) =
            tokio::time::timeout(Duration::from_millis(50), self.broadcast_rx.recv()).await
        {
            events.push(event);
        }
        events
    }

    /// Snapshot last persisted for this conversation
    pub fn stored(&self) -> Conversation {
        self.storage
            .get(self.handle.id())
            .expect("conversation not stored")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ConversationStatus, DataCarrier, OrderStatus, Sender};
    use crate::runtime::{RuntimeError, RuntimeManager};
    use crate::workflow::{ErrorKind, WorkflowError};

    fn messages(events: &[RuntimeEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                RuntimeEvent::Message { message } => Some(message.text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_in_memory_storage() {
        let storage = InMemoryStorage::new();
        let conv = Conversation::new("conv-1").add_chat_line(
            Sender::Bot,
            "Hello",
            DataCarrier::None,
            fixed_clock(),
        );

        storage.save(&conv).await.unwrap();
        assert_eq!(storage.load("conv-1").await.unwrap(), Some(conv));
        assert_eq!(storage.save_count(), 1);

        // The stored log may only grow
        let err = storage.save(&Conversation::new("conv-1")).await.unwrap_err();
        assert!(err.contains("rewrite"));
        assert_eq!(storage.list().await.unwrap()[0].message_count, 1);
    }

    #[tokio::test]
    async fn test_advance_emits_greeting() {
        let mut rt = TestRuntime::new().build();
        let conv = rt.advance().await;

        assert_eq!(conv.chat_log.len(), 2);
        assert_eq!(rt.stored(), conv);

        let events = rt.drain_events().await;
        let texts = messages(&events);
        assert_eq!(texts.len(), 2);
        assert!(texts[0].starts_with("Hello, I am your chosen Assistant"));
        assert!(texts[1].starts_with("To start, please indicate your country"));

        // Second advance changes nothing and notifies nobody
        let again = rt.advance().await;
        assert_eq!(again, conv);
        assert!(rt.drain_events().await.is_empty());
    }

    #[tokio::test]
    async fn test_full_dialogue() {
        let mut rt = TestRuntime::new().build();
        rt.advance().await;
        rt.handle.submit("Germany").await.unwrap();
        let done = rt.handle.submit("concierge").await.unwrap();

        assert_eq!(done.status, ConversationStatus::Finished);
        assert_eq!(done.chat_log.last().unwrap().text, "All set");
        assert_eq!(rt.stored(), done);

        let events = rt.drain_events().await;
        assert!(events.iter().any(|e| matches!(
            e,
            RuntimeEvent::StatusChange {
                status: ConversationStatus::Finished,
                order_status: OrderStatus::Open,
            }
        )));

        let closed = rt.handle.send(Event::OrderFulfilled).await.unwrap();
        assert_eq!(closed.status, ConversationStatus::Closed);
        assert_eq!(closed.order_status, OrderStatus::Done);
    }

    #[tokio::test]
    async fn test_rejected_input_is_recorded() {
        let mut rt = TestRuntime::new().build();
        let prompted = rt.advance().await;
        rt.drain_events().await;

        let err = rt.handle.submit("Atlantis").await.unwrap_err();
        assert!(err.is_user_recoverable());

        let events = rt.drain_events().await;
        match &events[0] {
            RuntimeEvent::Rejected { step, prompt, .. } => {
                assert_eq!(step, "country");
                assert_eq!(prompt.len(), 2);
            }
            other => panic!("Expected Rejected, got {other:?}"),
        }

        let stored = rt.stored();
        assert_eq!(stored.chat_log.len(), prompted.chat_log.len() + 2);
        assert_eq!(
            stored.chat_log.messages()[2].data,
            DataCarrier::Rejected {
                step: "country".to_string(),
                reason: "Unknown country: Atlantis".to_string(),
            }
        );
        assert_eq!(stored.metadata, prompted.metadata);
    }

    #[tokio::test]
    async fn test_rejected_input_not_recorded_when_disabled() {
        let mut rt = TestRuntime::new().record_rejected(false).build();
        let prompted = rt.advance().await;
        let saves = rt.storage.save_count();

        assert!(rt.handle.submit("Atlantis").await.is_err());
        assert_eq!(rt.storage.save_count(), saves);
        assert_eq!(rt.handle.snapshot().await.unwrap(), prompted);
        assert!(rt
            .drain_events()
            .await
            .iter()
            .any(|e| matches!(e, RuntimeEvent::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_submits_are_serialized() {
        let rt = TestRuntime::new().record_rejected(false).build();
        rt.advance().await;

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let handle = rt.handle.clone();
                tokio::spawn(async move { handle.submit("Germany").await })
            })
            .collect();

        let mut accepted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => accepted += 1,
                // Later writers see the product step
                Err(RuntimeError::Workflow(e)) => assert_eq!(e.kind(), ErrorKind::Validation),
                Err(other) => panic!("Unexpected error: {other}"),
            }
        }
        assert_eq!(accepted, 1);

        let conv = rt.handle.snapshot().await.unwrap();
        assert!(conv.chat_log.has_contiguous_sequence());
        assert_eq!(
            conv.chat_log
                .iter()
                .filter(|m| matches!(m.data, DataCarrier::Answer { .. }))
                .count(),
            1
        );
        assert_eq!(rt.stored(), conv);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_snapshot() {
        let mut rt = TestRuntime::new().build();
        let prompted = rt.advance().await;
        rt.drain_events().await;

        rt.storage.set_failing(true);
        let err = rt.handle.submit("Germany").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Storage(_)));
        assert_eq!(rt.handle.snapshot().await.unwrap(), prompted);

        let events = rt.drain_events().await;
        assert!(events.iter().all(|e| matches!(e, RuntimeEvent::Error { .. })));

        // Recovers once storage does
        rt.storage.set_failing(false);
        let conv = rt.handle.submit("Germany").await.unwrap();
        assert_eq!(conv.metadata.country.unwrap().code, "DE");
    }

    #[tokio::test]
    async fn test_closed_conversation_refuses_input() {
        let mut rt = TestRuntime::new().build();
        rt.advance().await;
        rt.handle.send(Event::Cancel).await.unwrap();
        rt.drain_events().await;

        // The runtime released itself once the conversation closed
        let err = rt.handle.submit("Germany").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Closed));
        assert!(rt.drain_events().await.is_empty());
        assert_eq!(rt.stored().status, ConversationStatus::Closed);
    }

    #[tokio::test]
    async fn test_resumed_closed_conversation_reports_then_stops() {
        let closed = Conversation::new("test-conv").with_status(ConversationStatus::Closed);
        let mut rt = TestRuntime::new().conversation(closed).build();

        let err = rt.handle.submit("Germany").await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Workflow(WorkflowError::ConversationClosed)
        ));
        assert!(matches!(
            rt.drain_events().await.as_slice(),
            [RuntimeEvent::Error { .. }]
        ));

        assert!(matches!(rt.handle.snapshot().await, Err(RuntimeError::Closed)));
    }

    #[tokio::test]
    async fn test_shutdown_stops_runtime() {
        let rt = TestRuntime::new().build();
        rt.advance().await;
        rt.shutdown.cancel();

        let err = rt.handle.submit("Germany").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Closed));
    }

    // ------------------------------------------------------------------------
    // Runtime manager
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_manager_starts_and_reuses_runtime() {
        let storage = Arc::new(InMemoryStorage::new());
        let manager = RuntimeManager::new(storage.clone(), country_product_driver());

        let handle = manager.start_conversation().await.unwrap();
        let id = handle.id().to_string();
        assert!(storage.get(&id).is_some());

        let prompted = handle.send(Event::Advance).await.unwrap();
        let again = manager.get_or_create(&id).await.unwrap();
        assert_eq!(again.snapshot().await.unwrap(), prompted);
        assert_eq!(manager.running().await, 1);

        let conv = manager
            .send_event(&id, Event::user_input("France"))
            .await
            .unwrap();
        assert_eq!(conv.metadata.country.unwrap().name, "France");
        assert_eq!(manager.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_manager_resumes_stored_conversation() {
        let storage = Arc::new(InMemoryStorage::new());
        let driver = country_product_driver();
        let stored = driver
            .submit(&Conversation::new("conv-1"), "Spain")
            .unwrap();
        storage.insert(stored.clone());

        let manager = RuntimeManager::new(storage, country_product_driver());
        let mut rx = manager.subscribe("conv-1").await.unwrap();
        let conv = manager.send_event("conv-1", Event::Advance).await.unwrap();

        assert!(stored.chat_log.is_prefix_of(&conv.chat_log));
        match rx.recv().await.unwrap() {
            RuntimeEvent::Message { message } => {
                assert_eq!(
                    message.data,
                    DataCarrier::Prompt {
                        step: "product".to_string()
                    }
                );
            }
            other => panic!("Expected Message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_manager_unknown_and_corrupt() {
        let storage = Arc::new(InMemoryStorage::new());
        let manager = RuntimeManager::new(storage.clone(), country_product_driver());

        assert!(matches!(
            manager.get_or_create("missing").await,
            Err(RuntimeError::NotFound(id)) if id == "missing"
        ));

        // Finished while the product step is unanswered
        storage.insert(Conversation::new("broken").with_status(ConversationStatus::Finished));
        assert!(matches!(
            manager.get_or_create("broken").await,
            Err(RuntimeError::Workflow(WorkflowError::CorruptMetadata(_)))
        ));
        assert_eq!(manager.running().await, 0);
    }

    #[tokio::test]
    async fn test_manager_releases_closed_conversation() {
        let storage = Arc::new(InMemoryStorage::new());
        let manager = RuntimeManager::new(storage.clone(), country_product_driver());
        let handle = manager.start_conversation().await.unwrap();
        let id = handle.id().to_string();
        handle.send(Event::Advance).await.unwrap();
        assert_eq!(manager.running().await, 1);

        let cancelled = handle.send(Event::Cancel).await.unwrap();
        assert!(cancelled.is_terminal());

        tokio::time::timeout(Duration::from_secs(1), async {
            while manager.running().await > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("runtime was not released");

        assert!(matches!(
            handle.send(Event::Advance).await,
            Err(RuntimeError::Closed)
        ));

        // Resuming reloads the closed snapshot and still refuses input
        assert!(matches!(
            manager.send_event(&id, Event::user_input("France")).await,
            Err(RuntimeError::Workflow(WorkflowError::ConversationClosed))
        ));
        assert_eq!(storage.get(&id).unwrap(), cancelled);
    }

    #[tokio::test]
    async fn test_manager_shutdown() {
        let manager = RuntimeManager::new(Arc::new(InMemoryStorage::new()), country_product_driver());
        let handle = manager.start_conversation().await.unwrap();

        manager.shutdown().await;

        assert!(matches!(
            handle.send(Event::Advance).await,
            Err(RuntimeError::Closed)
        ));
        assert!(matches!(
            manager.start_conversation().await,
            Err(RuntimeError::Closed)
        ));
        assert_eq!(manager.running().await, 0);
    }
}

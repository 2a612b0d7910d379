//! Runtime for executing conversations
//!
//! Each live conversation is owned by one task that applies events in
//! arrival order, so concurrent writers never race on a snapshot.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::ConversationRuntime;
pub use traits::*;

use crate::conversation::{ChatMessage, Conversation, ConversationStatus, OrderStatus};
use crate::db::ConversationSummary;
use crate::workflow::{Event, WorkflowDriver, WorkflowError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;

/// Type alias for production runtime with concrete implementations
pub type ProductionRuntime = ConversationRuntime<DatabaseStorage>;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Conversation not found: {0}")]
    NotFound(String),
    #[error("Conversation runtime stopped")]
    Closed,
}

impl RuntimeError {
    /// The user can fix this by sending different input
    pub fn is_user_recoverable(&self) -> bool {
        match self {
            RuntimeError::Workflow(e) => e.kind().is_user_recoverable(),
            _ => false,
        }
    }
}

/// Events broadcast to subscribers of a conversation
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A new chat log entry
    Message { message: ChatMessage },
    StatusChange {
        status: ConversationStatus,
        order_status: OrderStatus,
    },
    /// Input failed validation; `prompt` is the still pending question
    Rejected {
        step: String,
        reason: String,
        prompt: Vec<String>,
    },
    Error { message: String },
}

/// Mailbox entries for a conversation runtime
#[derive(Debug)]
pub(crate) enum Command {
    Apply {
        event: Event,
        reply: oneshot::Sender<Result<Conversation, RuntimeError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Conversation>,
    },
}

/// Handle to interact with a running conversation
#[derive(Clone)]
pub struct ConversationHandle {
    id: String,
    command_tx: mpsc::Sender<Command>,
    broadcast_tx: broadcast::Sender<RuntimeEvent>,
}

impl ConversationHandle {
    pub(crate) fn new(
        id: impl Into<String>,
        command_tx: mpsc::Sender<Command>,
        broadcast_tx: broadcast::Sender<RuntimeEvent>,
    ) -> Self {
        Self {
            id: id.into(),
            command_tx,
            broadcast_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Apply an event and wait for the resulting snapshot
    pub async fn send(&self, event: Event) -> Result<Conversation, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Apply { event, reply })
            .await
            .map_err(|_| RuntimeError::Closed)?;
        rx.await.map_err(|_| RuntimeError::Closed)?
    }

    pub async fn submit(&self, text: impl Into<String>) -> Result<Conversation, RuntimeError> {
        self.send(Event::user_input(text)).await
    }

    /// Current snapshot held by the runtime
    pub async fn snapshot(&self) -> Result<Conversation, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| RuntimeError::Closed)?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }
}

/// Manager for all conversation runtimes
pub struct RuntimeManager<S: SnapshotStore + Clone + 'static = DatabaseStorage> {
    storage: S,
    driver: Arc<WorkflowDriver>,
    record_rejected: bool,
    runtimes: Arc<RwLock<HashMap<String, ConversationHandle>>>,
    shutdown: CancellationToken,
}

impl<S: SnapshotStore + Clone + 'static> RuntimeManager<S> {
    pub fn new(storage: S, driver: WorkflowDriver) -> Self {
        Self {
            storage,
            driver: Arc::new(driver),
            record_rejected: true,
            runtimes: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Keep rejected input on the chat log
    #[must_use]
    pub fn with_record_rejected(mut self, record: bool) -> Self {
        self.record_rejected = record;
        self
    }

    pub fn driver(&self) -> &WorkflowDriver {
        &self.driver
    }

    /// Create, persist and start a fresh conversation
    pub async fn start_conversation(&self) -> Result<ConversationHandle, RuntimeError> {
        if self.shutdown.is_cancelled() {
            return Err(RuntimeError::Closed);
        }

        let conversation = Conversation::start();
        self.storage
            .save(&conversation)
            .await
            .map_err(RuntimeError::Storage)?;
        tracing::info!(conv_id = %conversation.id, "Started conversation");

        let mut runtimes = self.runtimes.write().await;
        let handle = self.spawn(conversation);
        runtimes.insert(handle.id.clone(), handle.clone());
        Ok(handle)
    }

    /// Get or create a runtime for a stored conversation
    pub async fn get_or_create(&self, conversation_id: &str) -> Result<ConversationHandle, RuntimeError> {
        if self.shutdown.is_cancelled() {
            return Err(RuntimeError::Closed);
        }

        // Check if already running
        {
            let runtimes = self.runtimes.read().await;
            if let Some(handle) = runtimes.get(conversation_id) {
                return Ok(handle.clone());
            }
        }

        // Hold the write lock across the load so one id never gets two runtimes
        let mut runtimes = self.runtimes.write().await;
        if let Some(handle) = runtimes.get(conversation_id) {
            return Ok(handle.clone());
        }

        let conversation = self
            .storage
            .load(conversation_id)
            .await
            .map_err(RuntimeError::Storage)?
            .ok_or_else(|| RuntimeError::NotFound(conversation_id.to_string()))?;

        self.driver.check(&conversation).inspect_err(|e| {
            tracing::error!(conv_id = %conversation_id, error = %e, "Refusing to resume conversation");
        })?;

        tracing::info!(
            conv_id = %conversation_id,
            status = %conversation.status,
            messages = conversation.chat_log.len(),
            "Resuming conversation"
        );
        let handle = self.spawn(conversation);
        runtimes.insert(conversation_id.to_string(), handle.clone());
        Ok(handle)
    }

    fn spawn(&self, conversation: Conversation) -> ConversationHandle {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(128);
        let id = conversation.id.clone();
        let handle = ConversationHandle::new(id.clone(), command_tx, broadcast_tx.clone());

        let runtime = ConversationRuntime::new(
            conversation,
            self.driver.clone(),
            self.storage.clone(),
            command_rx,
            broadcast_tx,
            self.shutdown.child_token(),
        )
        .with_record_rejected(self.record_rejected);

        // Drop the entry once the runtime exits, unless a newer one replaced it
        let runtimes = Arc::clone(&self.runtimes);
        let tx = handle.command_tx.downgrade();
        tokio::spawn(async move {
            runtime.run().await;
            let mut runtimes = runtimes.write().await;
            let ours = match (runtimes.get(&id), tx.upgrade()) {
                (Some(current), Some(tx)) => current.command_tx.same_channel(&tx),
                _ => false,
            };
            if ours {
                runtimes.remove(&id);
                tracing::debug!(conv_id = %id, "Removed stopped runtime");
            }
        });
        handle
    }

    /// Send an event to a conversation
    pub async fn send_event(&self, conversation_id: &str, event: Event) -> Result<Conversation, RuntimeError> {
        let handle = self.get_or_create(conversation_id).await?;
        handle.send(event).await
    }

    /// Subscribe to conversation updates
    pub async fn subscribe(
        &self,
        conversation_id: &str,
    ) -> Result<broadcast::Receiver<RuntimeEvent>, RuntimeError> {
        let handle = self.get_or_create(conversation_id).await?;
        Ok(handle.subscribe())
    }

    pub async fn list(&self) -> Result<Vec<ConversationSummary>, RuntimeError> {
        self.storage.list().await.map_err(RuntimeError::Storage)
    }

    /// Number of live runtimes. Runtimes of closed conversations are released.
    pub async fn running(&self) -> usize {
        self.runtimes.read().await.len()
    }

    /// Stop every runtime. Handles obtained earlier fail with `Closed`.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let stopped = std::mem::take(&mut *self.runtimes.write().await);
        tracing::info!(count = stopped.len(), "Runtime manager shut down");
    }
}

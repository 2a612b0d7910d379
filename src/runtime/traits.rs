//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::conversation::Conversation;
use crate::db::{ConversationSummary, Database, DbError};
use async_trait::async_trait;
use std::sync::Arc;

/// Storage for conversation snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load a snapshot, `None` if the conversation was never saved
    async fn load(&self, conv_id: &str) -> Result<Option<Conversation>, String>;

    /// Persist a snapshot. The stored chat log may only grow.
    async fn save(&self, conversation: &Conversation) -> Result<(), String>;

    /// List stored conversations
    async fn list(&self) -> Result<Vec<ConversationSummary>, String>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: SnapshotStore + ?Sized> SnapshotStore for Arc<T> {
    async fn load(&self, conv_id: &str) -> Result<Option<Conversation>, String> {
        (**self).load(conv_id).await
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), String> {
        (**self).save(conversation).await
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, String> {
        (**self).list().await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as a snapshot store
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn inner(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl SnapshotStore for DatabaseStorage {
    async fn load(&self, conv_id: &str) -> Result<Option<Conversation>, String> {
        match self.db.load_snapshot(conv_id) {
            Ok(conv) => Ok(Some(conv)),
            Err(DbError::ConversationNotFound(_)) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), String> {
        self.db.save_snapshot(conversation).map_err(|e| e.to_string())
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, String> {
        self.db.list_conversations().map_err(|e| e.to_string())
    }
}

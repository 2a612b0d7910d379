//! Conversation snapshots
//!
//! A `Conversation` is an immutable value. Every operation that changes it
//! returns a new snapshot; callers keep or discard old ones as they see fit.

pub mod chat;
pub mod metadata;

pub use chat::{ChatLog, ChatMessage, DataCarrier, Sender};
pub use metadata::{ConversationMetadata, Country, Product, ShippingAddress};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of the interactive exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Started,
    /// At least one answer was accepted
    Updated,
    /// Every applicable step is answered
    Finished,
    /// Closed from outside (order fulfilled or cancelled)
    Closed,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStatus::Started => "started",
            ConversationStatus::Updated => "updated",
            ConversationStatus::Finished => "finished",
            ConversationStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fulfilment of the underlying purchase request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Open,
    Done,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::Done => "done",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full state of one conversation at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub status: ConversationStatus,
    pub order_status: OrderStatus,
    pub chat_log: ChatLog,
    pub metadata: ConversationMetadata,
}

impl Conversation {
    /// Fresh conversation: default metadata, empty log
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ConversationStatus::Started,
            order_status: OrderStatus::Open,
            chat_log: ChatLog::new(),
            metadata: ConversationMetadata::default(),
        }
    }

    /// Fresh conversation with a random id
    pub fn start() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    /// The order behind this conversation was delivered
    pub fn is_completed(&self) -> bool {
        self.order_status == OrderStatus::Done
    }

    /// No further interaction is possible
    pub fn is_terminal(&self) -> bool {
        self.is_completed() || self.status == ConversationStatus::Closed
    }

    /// Apply `f` to the metadata, leaving everything else as it was.
    ///
    /// This is the only way metadata fields change.
    #[must_use]
    pub fn update_metadata<F>(&self, f: F) -> Self
    where
        F: FnOnce(ConversationMetadata) -> ConversationMetadata,
    {
        Self {
            metadata: f(self.metadata.clone()),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_status(&self, status: ConversationStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_order_status(&self, order_status: OrderStatus) -> Self {
        Self {
            order_status,
            ..self.clone()
        }
    }

    /// Append one chat entry
    #[must_use]
    pub fn add_chat_line(
        &self,
        sender: Sender,
        text: impl Into<String>,
        data: DataCarrier,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            chat_log: self.chat_log.appended(sender, text, data, at),
            ..self.clone()
        }
    }

    /// Append a system entry and move to `status` in one step
    #[must_use]
    pub fn add_system_chat_line(
        &self,
        text: impl Into<String>,
        data: DataCarrier,
        status: ConversationStatus,
        at: DateTime<Utc>,
    ) -> Self {
        self.add_chat_line(Sender::System, text, data, at)
            .with_status(status)
    }
}

//! Effects produced by transitions

use crate::conversation::{ChatMessage, ConversationStatus, OrderStatus};

/// Work for the runtime to carry out after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Save the new snapshot
    PersistSnapshot,

    /// Entries appended by this transition, oldest first
    NotifyMessages { messages: Vec<ChatMessage> },

    /// Status or order status changed
    NotifyStatus {
        status: ConversationStatus,
        order_status: OrderStatus,
    },
}

impl Effect {
    pub fn notify_messages(messages: &[ChatMessage]) -> Self {
        Effect::NotifyMessages {
            messages: messages.to_vec(),
        }
    }
}

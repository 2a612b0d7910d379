//! Step abstraction
//!
//! `WorkflowStep` is the typed form each concrete step implements.
//! `Step` is the object-safe form the driver works with; every
//! `WorkflowStep` is a `Step` through the blanket impl below.

use super::error::ValidationError;
use crate::conversation::{Conversation, ConversationMetadata};

/// One question/answer unit of the dialogue, tied to one metadata field.
///
/// Implementations are stateless: every method is a pure function of its
/// arguments, so a stored conversation replays to the same transcript.
pub trait WorkflowStep: Send + Sync {
    type Value: Clone + Send + Sync;

    /// Stable identifier, used in log markers and revision requests
    fn key(&self) -> &'static str;

    /// Whether the step is part of this conversation at all
    fn applies(&self, _conversation: &Conversation) -> bool {
        true
    }

    /// What the assistant says when the step becomes current
    fn bot_messages(&self, conversation: &Conversation) -> Vec<String>;

    /// Structured options for selection UIs; empty for free-text steps
    fn choices(&self, _conversation: &Conversation) -> Vec<String> {
        Vec::new()
    }

    /// Turn raw user input into a value
    fn parse(&self, conversation: &Conversation, raw: &str) -> Result<Self::Value, ValidationError>;

    /// The step's own field; `None` means not answered yet
    fn retrieve_value(&self, conversation: &Conversation) -> Option<Self::Value>;

    /// Write the step's own field through `Conversation::update_metadata`
    fn put_value(&self, conversation: &Conversation, value: Self::Value) -> Conversation;

    /// Unset the step's own field
    fn clear_value(&self, metadata: ConversationMetadata) -> ConversationMetadata;

    /// Render a value for the user entry that mirrors an accepted answer
    fn string_value(&self, value: &Self::Value) -> String;
}

/// Result of feeding raw input into a step
#[derive(Debug, Clone)]
pub struct Accepted {
    pub conversation: Conversation,
    pub display: String,
}

/// Type-erased step capabilities used by the driver
pub trait Step: Send + Sync {
    fn step_key(&self) -> &'static str;
    fn is_applicable(&self, conversation: &Conversation) -> bool;
    fn prompt(&self, conversation: &Conversation) -> Vec<String>;
    fn options(&self, conversation: &Conversation) -> Vec<String>;
    fn is_satisfied(&self, conversation: &Conversation) -> bool;
    fn rendered_value(&self, conversation: &Conversation) -> Option<String>;
    /// Parse and store; the returned conversation has only metadata changed
    fn accept_input(&self, conversation: &Conversation, raw: &str)
        -> Result<Accepted, ValidationError>;
    fn reopen(&self, conversation: &Conversation) -> Conversation;
}

impl<S: WorkflowStep> Step for S {
    fn step_key(&self) -> &'static str {
        self.key()
    }

    fn is_applicable(&self, conversation: &Conversation) -> bool {
        self.applies(conversation)
    }

    fn prompt(&self, conversation: &Conversation) -> Vec<String> {
        self.bot_messages(conversation)
    }

    fn options(&self, conversation: &Conversation) -> Vec<String> {
        self.choices(conversation)
    }

    fn is_satisfied(&self, conversation: &Conversation) -> bool {
        self.retrieve_value(conversation).is_some()
    }

    fn rendered_value(&self, conversation: &Conversation) -> Option<String> {
        self.retrieve_value(conversation)
            .map(|value| self.string_value(&value))
    }

    fn accept_input(
        &self,
        conversation: &Conversation,
        raw: &str,
    ) -> Result<Accepted, ValidationError> {
        let value = self.parse(conversation, raw)?;
        let display = self.string_value(&value);
        Ok(Accepted {
            conversation: self.put_value(conversation, value),
            display,
        })
    }

    fn reopen(&self, conversation: &Conversation) -> Conversation {
        conversation.update_metadata(|metadata| self.clear_value(metadata))
    }
}

impl std::fmt::Debug for dyn Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Step").field(&self.step_key()).finish()
    }
}

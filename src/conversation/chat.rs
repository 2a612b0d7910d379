//! Chat messages and the append-only chat log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Who produced a chat entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Bot,
    System,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::User => write!(f, "user"),
            Sender::Bot => write!(f, "bot"),
            Sender::System => write!(f, "system"),
        }
    }
}

/// Opaque payload carried by a chat entry.
///
/// The workflow tags its own entries so the log alone tells which step
/// prompts were already emitted and which answers were accepted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataCarrier {
    #[default]
    None,
    /// Bot question belonging to a step
    Prompt { step: String },
    /// Accepted answer mirrored back as a user entry
    Answer { step: String },
    /// Raw input that failed validation, kept for audit
    Rejected { step: String, reason: String },
    /// The named step and every later step were reopened
    Revision { step: String },
    /// Closing notice after the last step
    Completion,
    /// Free for embedding applications
    Custom { value: Value },
}

/// One entry of the chat log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sequence_id: i64,
    pub sender: Sender,
    pub text: String,
    #[serde(default)]
    pub data: DataCarrier,
    pub created_at: DateTime<Utc>,
}

/// Ordered, append-only sequence of chat entries.
///
/// Appending returns a new log; existing entries are never edited or removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted entries, in stored order
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChatMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Sequence id of the newest entry, 0 for an empty log
    pub fn last_sequence_id(&self) -> i64 {
        self.messages.last().map_or(0, |m| m.sequence_id)
    }

    /// Entries appended after the given sequence id
    pub fn since(&self, sequence_id: i64) -> &[ChatMessage] {
        let start = self
            .messages
            .partition_point(|m| m.sequence_id <= sequence_id);
        &self.messages[start..]
    }

    /// Return a new log with one more entry
    #[must_use]
    pub fn appended(
        &self,
        sender: Sender,
        text: impl Into<String>,
        data: DataCarrier,
        at: DateTime<Utc>,
    ) -> Self {
        let mut messages = self.messages.clone();
        messages.push(ChatMessage {
            sequence_id: self.last_sequence_id() + 1,
            sender,
            text: text.into(),
            data,
            created_at: at,
        });
        Self { messages }
    }

    /// True when every entry of `self` appears unchanged at the start of `other`
    pub fn is_prefix_of(&self, other: &ChatLog) -> bool {
        other.messages.starts_with(&self.messages)
    }

    /// Sequence ids start at 1 and increase by one per entry
    pub fn has_contiguous_sequence(&self) -> bool {
        self.messages
            .iter()
            .zip(1_i64..)
            .all(|(m, expected)| m.sequence_id == expected)
    }

    /// Whether the prompt for `step` is already on the log since the step was
    /// last answered or reopened.
    ///
    /// Scans backwards: a `Prompt` marker for the step means emitted, an
    /// `Answer` for the step or any `Revision` means the prompt is stale.
    pub fn prompt_emitted(&self, step: &str) -> bool {
        for message in self.messages.iter().rev() {
            match &message.data {
                DataCarrier::Prompt { step: s } if s == step => return true,
                DataCarrier::Answer { step: s } if s == step => return false,
                DataCarrier::Revision { .. } => return false,
                _ => {}
            }
        }
        false
    }

    /// Whether the completion notice was emitted since the last revision
    pub fn completion_emitted(&self) -> bool {
        for message in self.messages.iter().rev() {
            match &message.data {
                DataCarrier::Completion => return true,
                DataCarrier::Revision { .. } => return false,
                _ => {}
            }
        }
        false
    }
}

impl<'a> IntoIterator for &'a ChatLog {
    type Item = &'a ChatMessage;
    type IntoIter = std::slice::Iter<'a, ChatMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

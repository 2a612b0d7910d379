//! Events that can occur in a conversation

use serde::{Deserialize, Serialize};

/// Events that trigger transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Bring the dialogue up to date (emit the pending prompt)
    Advance,

    /// Raw answer from the user
    UserInput { text: String },

    /// Reopen a step and everything after it
    Revise { step: String },

    // External order events
    OrderFulfilled,
    Cancel,
}

impl Event {
    pub fn user_input(text: impl Into<String>) -> Self {
        Event::UserInput { text: text.into() }
    }

    pub fn revise(step: impl Into<String>) -> Self {
        Event::Revise { step: step.into() }
    }
}

//! Pure transition function
//!
//! Maps `(conversation, event)` to a new conversation plus the effects the
//! runtime must execute. Given the same inputs it always produces the same
//! outputs (the driver's clock aside) and performs no I/O.

use super::driver::WorkflowDriver;
use super::effect::Effect;
use super::error::{ValidationError, WorkflowError};
use super::event::Event;
use crate::conversation::Conversation;

/// Result of a transition
#[derive(Debug)]
pub struct TransitionResult {
    pub conversation: Conversation,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    /// Derive effects from the difference between two snapshots
    pub fn between(old: &Conversation, new: Conversation) -> Self {
        let mut effects = Vec::new();

        if &new != old {
            effects.push(Effect::PersistSnapshot);
        }

        let appended = new.chat_log.since(old.chat_log.last_sequence_id());
        if !appended.is_empty() {
            effects.push(Effect::notify_messages(appended));
        }

        if new.status != old.status || new.order_status != old.order_status {
            effects.push(Effect::NotifyStatus {
                status: new.status,
                order_status: new.order_status,
            });
        }

        Self {
            conversation: new,
            effects,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Apply one event.
///
/// Accepted input and revisions are followed by an advance, so the next
/// prompt is on the log as soon as the answer is.
pub fn transition(
    conversation: &Conversation,
    driver: &WorkflowDriver,
    event: Event,
) -> Result<TransitionResult, WorkflowError> {
    let next = match event {
        Event::Advance => driver.advance(conversation)?,

        Event::UserInput { text } => {
            let answered = driver.submit(conversation, &text)?;
            driver.advance(&answered)?
        }

        Event::Revise { step } => {
            let reopened = driver.revise(conversation, &step)?;
            driver.advance(&reopened)?
        }

        Event::OrderFulfilled => driver.fulfil(conversation)?,

        Event::Cancel => driver.cancel(conversation)?,
    };

    Ok(TransitionResult::between(conversation, next))
}

/// Audit transition for input that failed validation
pub fn reject(
    conversation: &Conversation,
    driver: &WorkflowDriver,
    raw: &str,
    error: &ValidationError,
) -> TransitionResult {
    TransitionResult::between(
        conversation,
        driver.record_rejection(conversation, raw, error),
    )
}

//! Workflow driver
//!
//! Runs an ordered schema of steps against conversation snapshots. The
//! driver holds no conversation state: every operation takes a snapshot
//! and returns a new one, or an error with the input left as it was.

use super::error::{ValidationError, WorkflowError};
use super::step::{Accepted, Step, WorkflowStep};
use crate::conversation::{Conversation, ConversationStatus, DataCarrier, OrderStatus, Sender};
use chrono::{DateTime, Utc};

/// Source of message timestamps
pub type Clock = fn() -> DateTime<Utc>;

/// Assembles a schema
pub struct WorkflowBuilder {
    steps: Vec<Box<dyn Step>>,
    completion_messages: Vec<String>,
    clock: Clock,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            completion_messages: Vec::new(),
            clock: Utc::now,
        }
    }

    /// Append a step to the schema. A second step with an already used key
    /// is ignored.
    #[must_use]
    pub fn step<S: WorkflowStep + 'static>(mut self, step: S) -> Self {
        if self.steps.iter().any(|s| s.step_key() == step.key()) {
            tracing::warn!(step = step.key(), "Duplicate step key in schema, ignoring");
            return self;
        }
        self.steps.push(Box::new(step));
        self
    }

    /// Bot message emitted once every applicable step is answered
    #[must_use]
    pub fn completion_message(mut self, text: impl Into<String>) -> Self {
        self.completion_messages.push(text.into());
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> WorkflowDriver {
        WorkflowDriver {
            steps: self.steps,
            completion_messages: self.completion_messages,
            clock: self.clock,
        }
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives conversations through a fixed, ordered list of steps
pub struct WorkflowDriver {
    steps: Vec<Box<dyn Step>>,
    completion_messages: Vec<String>,
    clock: Clock,
}

impl std::fmt::Debug for WorkflowDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDriver")
            .field("steps", &self.step_keys())
            .finish_non_exhaustive()
    }
}

impl WorkflowDriver {
    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder::new()
    }

    pub fn steps(&self) -> impl Iterator<Item = &dyn Step> {
        self.steps.iter().map(|s| -> &dyn Step { s.as_ref() })
    }

    pub fn step_keys(&self) -> Vec<&'static str> {
        self.steps().map(Step::step_key).collect()
    }

    pub fn step(&self, key: &str) -> Option<&dyn Step> {
        self.steps().find(|s| s.step_key() == key)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.step_key() == key)
    }

    /// First applicable step, in schema order, without a value.
    ///
    /// Later answers present behind a gap are left alone; the gap is current.
    pub fn current_step(&self, conversation: &Conversation) -> Option<&dyn Step> {
        self.steps()
            .find(|s| s.is_applicable(conversation) && !s.is_satisfied(conversation))
    }

    /// No applicable step is waiting for an answer
    pub fn is_complete(&self, conversation: &Conversation) -> bool {
        self.current_step(conversation).is_none()
    }

    /// Integrity check for snapshots that may come from a foreign producer
    pub fn check(&self, conversation: &Conversation) -> Result<(), WorkflowError> {
        if !conversation.chat_log.has_contiguous_sequence() {
            return Err(WorkflowError::CorruptMetadata(
                "chat log sequence ids are not contiguous".to_string(),
            ));
        }

        if let Some(step) = self
            .steps()
            .find(|s| !s.is_applicable(conversation) && s.is_satisfied(conversation))
        {
            return Err(WorkflowError::CorruptMetadata(format!(
                "{} is set but does not apply to this conversation",
                step.step_key()
            )));
        }

        if conversation.status == ConversationStatus::Finished {
            if let Some(step) = self.current_step(conversation) {
                return Err(WorkflowError::CorruptMetadata(format!(
                    "conversation is finished but {} is unanswered",
                    step.step_key()
                )));
            }
        }

        Ok(())
    }

    fn ensure_open(conversation: &Conversation) -> Result<(), WorkflowError> {
        if conversation.is_terminal() {
            return Err(WorkflowError::ConversationClosed);
        }
        if conversation.status == ConversationStatus::Finished {
            return Err(WorkflowError::WorkflowComplete);
        }
        Ok(())
    }

    /// Emit the current step's prompt unless the log already has it.
    ///
    /// With no step left, marks the conversation finished and emits the
    /// completion messages once. Calling this again without new input
    /// returns an equal conversation.
    pub fn advance(&self, conversation: &Conversation) -> Result<Conversation, WorkflowError> {
        self.check(conversation)?;
        if conversation.is_terminal() {
            return Ok(conversation.clone());
        }

        let Some(step) = self.current_step(conversation) else {
            return Ok(self.finish(conversation));
        };

        let key = step.step_key();
        if conversation.chat_log.prompt_emitted(key) {
            return Ok(conversation.clone());
        }

        tracing::debug!(conv_id = %conversation.id, step = key, "Emitting step prompt");
        let now = (self.clock)();
        Ok(step
            .prompt(conversation)
            .into_iter()
            .fold(conversation.clone(), |conv, text| {
                conv.add_chat_line(
                    Sender::Bot,
                    text,
                    DataCarrier::Prompt {
                        step: key.to_string(),
                    },
                    now,
                )
            }))
    }

    fn finish(&self, conversation: &Conversation) -> Conversation {
        let mut finished = conversation.clone();
        if finished.status != ConversationStatus::Finished {
            tracing::info!(conv_id = %conversation.id, "Workflow finished");
            finished = finished.with_status(ConversationStatus::Finished);
        }
        if finished.chat_log.completion_emitted() {
            return finished;
        }

        let now = (self.clock)();
        self.completion_messages
            .iter()
            .fold(finished, |conv, text| {
                conv.add_chat_line(Sender::Bot, text.as_str(), DataCarrier::Completion, now)
            })
    }

    /// Parse raw input with the current step's rule and store the answer
    pub fn submit(&self, conversation: &Conversation, raw: &str) -> Result<Conversation, WorkflowError> {
        Self::ensure_open(conversation)?;
        self.check(conversation)?;

        let step = self
            .current_step(conversation)
            .ok_or(WorkflowError::WorkflowComplete)?;

        let accepted = step.accept_input(conversation, raw).inspect_err(|e| {
            tracing::debug!(
                conv_id = %conversation.id,
                step = step.step_key(),
                reason = %e,
                "Rejected answer"
            );
        })?;

        Ok(self.commit(step.step_key(), accepted))
    }

    /// Store an already typed value for `step`, which must be current
    pub fn put_value<S: WorkflowStep>(
        &self,
        conversation: &Conversation,
        step: &S,
        value: S::Value,
    ) -> Result<Conversation, WorkflowError> {
        Self::ensure_open(conversation)?;
        self.check(conversation)?;

        let current = self.current_step(conversation).map(Step::step_key);
        if current != Some(step.key()) {
            tracing::error!(
                conv_id = %conversation.id,
                step = step.key(),
                current = ?current,
                "Answer for a step that is not current"
            );
            return Err(WorkflowError::OutOfOrderAnswer {
                step: step.key().to_string(),
                current: current.map(str::to_string),
            });
        }

        let display = step.string_value(&value);
        Ok(self.commit(
            step.key(),
            Accepted {
                conversation: step.put_value(conversation, value),
                display,
            },
        ))
    }

    fn commit(&self, key: &str, accepted: Accepted) -> Conversation {
        let now = (self.clock)();
        let conversation = accepted
            .conversation
            .add_chat_line(
                Sender::User,
                accepted.display,
                DataCarrier::Answer {
                    step: key.to_string(),
                },
                now,
            )
            .with_status(ConversationStatus::Updated);

        tracing::info!(conv_id = %conversation.id, step = key, "Answer accepted");

        if self.is_complete(&conversation) {
            conversation.with_status(ConversationStatus::Finished)
        } else {
            conversation
        }
    }

    /// Keep rejected input on the log for audit.
    ///
    /// Appends the raw input as a user entry marked rejected, followed by a
    /// system annotation. Metadata and status are untouched and the current
    /// step's prompt is not repeated.
    #[must_use]
    pub fn record_rejection(
        &self,
        conversation: &Conversation,
        raw: &str,
        error: &ValidationError,
    ) -> Conversation {
        let now = (self.clock)();
        conversation
            .add_chat_line(
                Sender::User,
                raw.trim(),
                DataCarrier::Rejected {
                    step: error.step.clone(),
                    reason: error.message.clone(),
                },
                now,
            )
            .add_chat_line(Sender::System, error.message.as_str(), DataCarrier::None, now)
    }

    /// Reopen `key` and every step after it.
    ///
    /// Later answers depend on earlier ones (the shipping step exists only
    /// for some products), so they are all cleared. Nothing to clear is a
    /// no-op.
    pub fn revise(&self, conversation: &Conversation, key: &str) -> Result<Conversation, WorkflowError> {
        if conversation.is_terminal() {
            return Err(WorkflowError::ConversationClosed);
        }
        let index = self
            .position(key)
            .ok_or_else(|| WorkflowError::UnknownStep(key.to_string()))?;

        let reopened_steps = &self.steps[index..];
        if !reopened_steps.iter().any(|s| s.is_satisfied(conversation)) {
            return Ok(conversation.clone());
        }

        tracing::info!(conv_id = %conversation.id, step = key, "Reopening steps");
        let reopened = reopened_steps
            .iter()
            .fold(conversation.clone(), |conv, s| s.reopen(&conv));

        Ok(reopened.add_system_chat_line(
            format!("The answer for {key} and every later step was reopened"),
            DataCarrier::Revision {
                step: key.to_string(),
            },
            ConversationStatus::Updated,
            (self.clock)(),
        ))
    }

    /// External order fulfilment: `Finished -> Closed` with the order done
    pub fn fulfil(&self, conversation: &Conversation) -> Result<Conversation, WorkflowError> {
        if conversation.is_terminal() {
            return Err(WorkflowError::ConversationClosed);
        }
        if conversation.status != ConversationStatus::Finished {
            return Err(WorkflowError::NotFinished);
        }

        tracing::info!(conv_id = %conversation.id, "Order fulfilled");
        Ok(conversation
            .add_system_chat_line(
                "Your order has been fulfilled",
                DataCarrier::None,
                ConversationStatus::Closed,
                (self.clock)(),
            )
            .with_order_status(OrderStatus::Done))
    }

    /// External cancellation, allowed from any open state
    pub fn cancel(&self, conversation: &Conversation) -> Result<Conversation, WorkflowError> {
        if conversation.is_terminal() {
            return Err(WorkflowError::ConversationClosed);
        }

        tracing::info!(conv_id = %conversation.id, "Conversation cancelled");
        Ok(conversation
            .add_system_chat_line(
                "The conversation was cancelled",
                DataCarrier::None,
                ConversationStatus::Closed,
                (self.clock)(),
            )
            .with_order_status(OrderStatus::Cancelled))
    }
}

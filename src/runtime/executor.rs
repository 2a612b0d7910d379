//! Conversation runtime executor

use super::traits::SnapshotStore;
use super::{Command, RuntimeError, RuntimeEvent};

use crate::conversation::Conversation;
use crate::workflow::{
    reject, transition, Effect, Event, TransitionResult, WorkflowDriver, WorkflowError,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Single writer for one conversation.
///
/// Owns the latest snapshot, applies commands from its mailbox one at a
/// time, persists before notifying, and broadcasts what changed.
pub struct ConversationRuntime<S>
where
    S: SnapshotStore + 'static,
{
    conversation: Conversation,
    driver: Arc<WorkflowDriver>,
    storage: S,
    command_rx: mpsc::Receiver<Command>,
    broadcast_tx: broadcast::Sender<RuntimeEvent>,
    shutdown: CancellationToken,
    /// Keep input that failed validation on the chat log
    record_rejected: bool,
}

impl<S> ConversationRuntime<S>
where
    S: SnapshotStore + 'static,
{
    pub(crate) fn new(
        conversation: Conversation,
        driver: Arc<WorkflowDriver>,
        storage: S,
        command_rx: mpsc::Receiver<Command>,
        broadcast_tx: broadcast::Sender<RuntimeEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            conversation,
            driver,
            storage,
            command_rx,
            broadcast_tx,
            shutdown,
            record_rejected: true,
        }
    }

    #[must_use]
    pub fn with_record_rejected(mut self, record: bool) -> Self {
        self.record_rejected = record;
        self
    }

    pub async fn run(mut self) {
        tracing::info!(conv_id = %self.conversation.id, "Starting conversation runtime");

        loop {
            let command = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                command = self.command_rx.recv() => command,
            };
            let Some(command) = command else { break };

            match command {
                Command::Apply { event, reply } => {
                    let result = self.process_event(event).await;
                    // Caller may have given up waiting
                    let _ = reply.send(result);
                    if self.conversation.is_terminal() {
                        tracing::info!(
                            conv_id = %self.conversation.id,
                            status = %self.conversation.status,
                            "Conversation closed, releasing runtime"
                        );
                        break;
                    }
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.conversation.clone());
                }
            }
        }

        tracing::info!(conv_id = %self.conversation.id, "Conversation runtime stopped");
    }

    async fn process_event(&mut self, event: Event) -> Result<Conversation, RuntimeError> {
        let raw = match &event {
            Event::UserInput { text } => Some(text.clone()),
            _ => None,
        };

        match transition(&self.conversation, &self.driver, event) {
            Ok(result) => {
                self.apply(result).await?;
                Ok(self.conversation.clone())
            }
            Err(WorkflowError::Validation(error)) => {
                let prompt = self
                    .driver
                    .current_step(&self.conversation)
                    .map(|step| step.prompt(&self.conversation))
                    .unwrap_or_default();
                let _ = self.broadcast_tx.send(RuntimeEvent::Rejected {
                    step: error.step.clone(),
                    reason: error.message.clone(),
                    prompt,
                });

                if let (true, Some(raw)) = (self.record_rejected, raw) {
                    let audited = reject(&self.conversation, &self.driver, &raw, &error);
                    self.apply(audited).await?;
                }
                Err(WorkflowError::Validation(error).into())
            }
            Err(e) => {
                // Transition errors are user-facing (e.g. "conversation is closed")
                tracing::warn!(conv_id = %self.conversation.id, error = %e, "Event refused");
                let _ = self.broadcast_tx.send(RuntimeEvent::Error {
                    message: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Execute effects in order. The snapshot is only adopted once every
    /// effect succeeded.
    async fn apply(&mut self, result: TransitionResult) -> Result<(), RuntimeError> {
        let TransitionResult {
            conversation,
            effects,
        } = result;

        for effect in effects {
            if let Err(e) = self.execute_effect(&conversation, effect).await {
                tracing::error!(conv_id = %conversation.id, error = %e, "Effect failed");
                let _ = self.broadcast_tx.send(RuntimeEvent::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        }

        self.conversation = conversation;
        Ok(())
    }

    async fn execute_effect(
        &self,
        conversation: &Conversation,
        effect: Effect,
    ) -> Result<(), RuntimeError> {
        match effect {
            Effect::PersistSnapshot => self
                .storage
                .save(conversation)
                .await
                .map_err(RuntimeError::Storage),

            Effect::NotifyMessages { messages } => {
                for message in messages {
                    let _ = self.broadcast_tx.send(RuntimeEvent::Message { message });
                }
                Ok(())
            }

            Effect::NotifyStatus {
                status,
                order_status,
            } => {
                tracing::debug!(conv_id = %conversation.id, %status, %order_status, "Status changed");
                let _ = self.broadcast_tx.send(RuntimeEvent::StatusChange {
                    status,
                    order_status,
                });
                Ok(())
            }
        }
    }
}

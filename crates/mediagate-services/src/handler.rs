//! Queue message handler trait
//!
//! The worker hands each delivery batch to the handler bound to its queue. Messages
//! in a batch are handled one after another, and one failing message never stops its
//! siblings from being handled.

use async_trait::async_trait;
use mediagate_core::{InboundMessage, MessageOutcome, TaskError};

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, message: &InboundMessage) -> Result<(), TaskError>;

    /// Handle a delivery batch sequentially, one outcome per message.
    ///
    /// Unrecoverable errors are acknowledged so the message is not redelivered.
    async fn handle_batch(&self, messages: &[InboundMessage]) -> Vec<MessageOutcome> {
        let mut outcomes = Vec::with_capacity(messages.len());
        for message in messages {
            let outcome = match self.handle(message).await {
                Ok(()) => MessageOutcome::Ack,
                Err(e) => {
                    let outcome = MessageOutcome::from(&e);
                    match outcome {
                        MessageOutcome::Retry => tracing::warn!(
                            handler = self.name(),
                            message_id = %message.message_id,
                            receive_count = message.receive_count,
                            error = %e,
                            "Message handling failed, leaving for redelivery"
                        ),
                        MessageOutcome::Ack => tracing::error!(
                            handler = self.name(),
                            message_id = %message.message_id,
                            error = %e,
                            "Message handling failed permanently, dropping message"
                        ),
                    }
                    outcome
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

//! Handler failures and what they mean for the queued message.
//!
//! A failed message is either left on the queue for redelivery or acknowledged and
//! dropped. [`TaskError`] carries that decision as a [`MessageOutcome`], so the batch
//! loop only has to read it back.

use crate::error::EventParseError;
use crate::models::MessageOutcome;
use std::fmt;

#[derive(Debug)]
pub struct TaskError {
    cause: anyhow::Error,
    outcome: MessageOutcome,
}

impl TaskError {
    /// A failure redelivery cannot fix, such as a malformed body or missing
    /// configuration. The message is acknowledged.
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            cause: err.into(),
            outcome: MessageOutcome::Ack,
        }
    }

    /// A transient failure (object store or coordination store outage). The message
    /// stays on the queue.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            cause: err.into(),
            outcome: MessageOutcome::Retry,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.outcome == MessageOutcome::Retry
    }

    /// What the consumer does with the message that produced this error.
    pub fn outcome(&self) -> MessageOutcome {
        self.outcome
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.cause)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.source()
    }
}

impl From<&TaskError> for MessageOutcome {
    fn from(err: &TaskError) -> Self {
        err.outcome
    }
}

/// An unparseable body stays unparseable on redelivery.
impl From<EventParseError> for TaskError {
    fn from(err: EventParseError) -> Self {
        Self::unrecoverable(err)
    }
}

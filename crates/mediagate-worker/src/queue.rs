//! SQS queue consumer: long polling, bounded concurrency, acknowledgement and retry.
//!
//! Each consumer is bound to one queue and one [`MessageHandler`]. A batch is only
//! received once a concurrency permit is free. Acknowledged messages are deleted;
//! messages left for retry get their visibility timeout pushed out with exponential
//! backoff so redelivery is spread out until the queue's redrive policy moves them to
//! a dead-letter queue.
//!
//! Shutdown: when the shutdown flag flips, the consumer stops receiving and waits for
//! in-flight batches to finish before returning.

use anyhow::{Context, Result};
use aws_sdk_sqs::types::{DeleteMessageBatchRequestEntry, Message, MessageSystemAttributeName};
use aws_sdk_sqs::Client as SqsClient;
use mediagate_core::{InboundMessage, MessageOutcome};
use mediagate_services::MessageHandler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

/// Maximum delay in seconds before a retried message becomes visible again.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Pause after a failed receive call.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Computes backoff in seconds for a given delivery count (exponential with cap).
#[inline]
pub(crate) fn compute_retry_backoff_seconds(receive_count: u32) -> u64 {
    2_u64
        .checked_pow(receive_count)
        .unwrap_or(u64::MAX)
        .min(MAX_RETRY_BACKOFF_SECS)
}

#[derive(Debug, Clone)]
pub struct QueueConsumerConfig {
    pub batch_size: i32,
    pub wait_time_secs: i32,
    pub max_concurrent_batches: usize,
}

/// A received message plus the handle needed to delete or delay it.
#[derive(Debug, Clone)]
pub(crate) struct ReceivedMessage {
    pub message: InboundMessage,
    pub receipt_handle: String,
}

impl ReceivedMessage {
    fn from_sqs(message: &Message) -> Option<Self> {
        let receipt_handle = message.receipt_handle()?.to_string();
        let message_id = message.message_id().unwrap_or_default().to_string();
        let receive_count = message
            .attributes()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
            .and_then(|count| count.parse().ok())
            .unwrap_or(1);
        Some(Self {
            message: InboundMessage {
                message_id,
                body: message.body().unwrap_or_default().to_string(),
                receive_count,
            },
            receipt_handle,
        })
    }
}

/// Split a batch by outcome into (acknowledged, retried).
pub(crate) fn partition_outcomes<'a>(
    received: &'a [ReceivedMessage],
    outcomes: &[MessageOutcome],
) -> (Vec<&'a ReceivedMessage>, Vec<&'a ReceivedMessage>) {
    let mut acked = Vec::new();
    let mut retried = Vec::new();
    for (message, outcome) in received.iter().zip(outcomes) {
        match outcome {
            MessageOutcome::Ack => acked.push(message),
            MessageOutcome::Retry => retried.push(message),
        }
    }
    // A handler returning fewer outcomes than messages leaves the rest for redelivery.
    retried.extend(received.iter().skip(outcomes.len()));
    (acked, retried)
}

pub struct QueueConsumer {
    client: SqsClient,
    queue_url: String,
    handler: Arc<dyn MessageHandler>,
    config: QueueConsumerConfig,
}

impl QueueConsumer {
    pub fn new(
        client: SqsClient,
        queue_url: String,
        handler: Arc<dyn MessageHandler>,
        config: QueueConsumerConfig,
    ) -> Self {
        Self {
            client,
            queue_url,
            handler,
            config,
        }
    }

    pub fn handler_name(&self) -> &'static str {
        self.handler.name()
    }

    /// Consume until `shutdown` flips to `true`, then drain in-flight batches.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            handler = self.handler.name(),
            queue_url = %self.queue_url,
            max_concurrent_batches = self.config.max_concurrent_batches,
            batch_size = self.config.batch_size,
            "Queue consumer started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_batches));
        let mut in_flight = JoinSet::new();

        loop {
            while in_flight.try_join_next().is_some() {}

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            let received = tokio::select! {
                received = self.receive() => received,
                _ = shutdown.changed() => break,
            };

            match received {
                Ok(batch) if batch.is_empty() => drop(permit),
                Ok(batch) => {
                    let consumer = self.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        consumer.process_batch(batch).await;
                    });
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(
                        handler = self.handler.name(),
                        error = %e,
                        "Failed to receive messages, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        tracing::info!(
            handler = self.handler.name(),
            in_flight = in_flight.len(),
            "Queue consumer stopping, waiting for in-flight batches"
        );
        while in_flight.join_next().await.is_some() {}
        tracing::info!(handler = self.handler.name(), "Queue consumer stopped");
    }

    async fn receive(&self) -> Result<Vec<ReceivedMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(self.config.batch_size)
            .wait_time_seconds(self.config.wait_time_secs)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .context("Failed to receive SQS messages")?;

        Ok(output
            .messages()
            .iter()
            .filter_map(|message| {
                let received = ReceivedMessage::from_sqs(message);
                if received.is_none() {
                    tracing::warn!(
                        message_id = ?message.message_id(),
                        "Received message without receipt handle"
                    );
                }
                received
            })
            .collect())
    }

    #[tracing::instrument(skip(self, batch), fields(handler = self.handler.name(), batch_size = batch.len()))]
    async fn process_batch(&self, batch: Vec<ReceivedMessage>) {
        let messages: Vec<InboundMessage> = batch.iter().map(|r| r.message.clone()).collect();
        let outcomes = self.handler.handle_batch(&messages).await;
        let (acked, retried) = partition_outcomes(&batch, &outcomes);

        tracing::debug!(acked = acked.len(), retried = retried.len(), "Batch handled");

        if let Err(e) = self.delete_messages(&acked).await {
            tracing::error!(error = %e, "Failed to delete acknowledged messages");
        }
        for message in retried {
            if let Err(e) = self.delay_retry(message).await {
                tracing::warn!(
                    error = %e,
                    message_id = %message.message.message_id,
                    "Failed to delay retried message"
                );
            }
        }
    }

    async fn delete_messages(&self, messages: &[&ReceivedMessage]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let entries = messages
            .iter()
            .enumerate()
            .map(|(i, m)| {
                DeleteMessageBatchRequestEntry::builder()
                    .id(i.to_string())
                    .receipt_handle(&m.receipt_handle)
                    .build()
                    .context("Invalid delete entry")
            })
            .collect::<Result<Vec<_>>>()?;

        let output = self
            .client
            .delete_message_batch()
            .queue_url(&self.queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .context("Failed to delete SQS messages")?;

        for failed in output.failed() {
            tracing::warn!(
                entry = %failed.id(),
                code = %failed.code(),
                message = ?failed.message(),
                "Message delete failed, it will be redelivered"
            );
        }
        Ok(())
    }

    async fn delay_retry(&self, message: &ReceivedMessage) -> Result<()> {
        let backoff_seconds = compute_retry_backoff_seconds(message.message.receive_count);
        tracing::info!(
            message_id = %message.message.message_id,
            receive_count = message.message.receive_count,
            backoff_seconds,
            "Scheduling message retry"
        );
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt_handle)
            .visibility_timeout(i32::try_from(backoff_seconds).unwrap_or(i32::MAX))
            .send()
            .await
            .context("Failed to change message visibility")?;
        Ok(())
    }
}

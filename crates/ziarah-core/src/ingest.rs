use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use ziarah_models::message::ChatMessage;

use crate::queue::Delivery;
use crate::AppState;

/// How long one poll blocks waiting for work before re-checking shutdown.
const POLL_WAIT: Duration = Duration::from_secs(1);
/// Back-off after the queue itself failed.
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Row written, notification fan-out started.
    Persisted,
    /// Row already present from an earlier delivery.
    Duplicate,
    /// Storage failed; handed back for redelivery.
    Requeued,
    /// Undecodable envelope, acknowledged and discarded.
    Dropped,
}

pub async fn process_delivery(state: &AppState, delivery: &Delivery) -> DeliveryOutcome {
    let message: ChatMessage = match serde_json::from_str(&delivery.payload) {
        Ok(message) => message,
        Err(err) => {
            tracing::error!(error = %err, "dropping undecodable queue envelope");
            if let Err(err) = state.queue.ack(delivery).await {
                tracing::warn!(error = %err, "failed to ack poison envelope");
            }
            return DeliveryOutcome::Dropped;
        }
    };

    match ziarah_db::messages::upsert_message(&state.db, &message).await {
        Ok(inserted) => {
            if let Err(err) = state.queue.ack(delivery).await {
                // Left in processing; recovery redelivers and the upsert is a no-op.
                tracing::warn!(message_id = %message.id, error = %err, "ack failed");
            }
            if inserted {
                tracing::debug!(message_id = %message.id, "message persisted");
                state.notifier.spawn(message);
                DeliveryOutcome::Persisted
            } else {
                tracing::debug!(message_id = %message.id, "duplicate delivery ignored");
                DeliveryOutcome::Duplicate
            }
        }
        Err(err) => {
            tracing::warn!(message_id = %message.id, error = %err, "persist failed, requeueing");
            tokio::time::sleep(state.config.ingest_retry_delay).await;
            if let Err(err) = state.queue.requeue(delivery).await {
                tracing::error!(message_id = %message.id, error = %err, "requeue failed");
            }
            DeliveryOutcome::Requeued
        }
    }
}

/// Drains the queue until `shutdown` fires. A delivery already being
/// processed is finished first.
pub async fn run_consumer(state: AppState, worker_id: usize, shutdown: Arc<Notify>) {
    let stop = shutdown.notified();
    tokio::pin!(stop);
    stop.as_mut().enable();

    tracing::info!(worker_id, "ingestion consumer started");
    loop {
        let next = tokio::select! {
            _ = &mut stop => break,
            next = state.queue.next_delivery(POLL_WAIT) => next,
        };
        match next {
            Ok(Some(delivery)) => {
                let outcome = process_delivery(&state, &delivery).await;
                tracing::trace!(worker_id, ?outcome, "delivery handled");
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(worker_id, error = %err, "queue poll failed");
                tokio::select! {
                    _ = &mut stop => break,
                    _ = tokio::time::sleep(QUEUE_ERROR_BACKOFF) => {}
                }
            }
        }
    }
    tracing::info!(worker_id, "ingestion consumer stopped");
}

pub fn spawn_consumers(state: &AppState, count: usize, shutdown: Arc<Notify>) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|worker_id| tokio::spawn(run_consumer(state.clone(), worker_id, shutdown.clone())))
        .collect()
}

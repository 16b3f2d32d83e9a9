use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use super::{Delivery, TaskBroker, TaskEnvelope, TaskHandler};
use crate::config::{AlertQueueConfig, KafkaConfig};
use crate::error::{DispatchError, QueueError};

const MAX_BACKOFF: Duration = Duration::from_secs(60);
const RECEIVE_ERROR_PAUSE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub retry_backoff: Duration,
    /// Consecutive receive failures that trip the circuit breaker.
    pub max_consecutive_failures: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl WorkerConfig {
    pub fn new(queue: &AlertQueueConfig, kafka: &KafkaConfig) -> Self {
        Self {
            concurrency: queue.concurrency.max(1),
            retry_backoff: queue.retry_backoff,
            max_consecutive_failures: kafka.max_retries.max(1),
            circuit_breaker_cooldown: Duration::from_secs(kafka.circuit_breaker_cooldown),
        }
    }
}

/// What the pool did with one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed,
    Retried { next_attempt: u32 },
    DeadLettered { reason: String },
    /// Neither requeue nor dead-letter reached the broker; the delivery is
    /// left unacknowledged for redelivery.
    Unacknowledged { reason: String },
}

/// Exponential backoff from `base`, capped at one minute.
pub fn retry_backoff(base: Duration, retried: u32) -> Duration {
    let factor = 1u32.checked_shl(retried.min(16)).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF)
}

/// Pulls deliveries from a broker and runs them on a bounded set of
/// concurrent workers.
pub struct WorkerPool {
    broker: Arc<dyn TaskBroker>,
    handler: Arc<dyn TaskHandler>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(
        broker: Arc<dyn TaskBroker>,
        handler: Arc<dyn TaskHandler>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            broker,
            handler,
            config,
        }
    }

    /// Consumes until `shutdown` flips to true (or the broker closes), then
    /// waits for in-flight tasks to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let concurrency = self.config.concurrency;
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut consecutive_failures = 0u32;

        info!(concurrency, "Alert worker pool started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Circuit Breaker Check
            if consecutive_failures >= self.config.max_consecutive_failures {
                warn!(
                    "Circuit breaker tripped ({} consecutive failures)! Sleeping for {:?}...",
                    consecutive_failures, self.config.circuit_breaker_cooldown
                );
                tokio::select! {
                    _ = tokio::time::sleep(self.config.circuit_breaker_cooldown) => {}
                    _ = shutdown.changed() => break,
                }
                consecutive_failures = 0;
                info!("Circuit breaker reset. Resuming consumption.");
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            let received = tokio::select! {
                received = self.broker.next() => received,
                _ = shutdown.changed() => break,
            };

            match received {
                Ok(delivery) => {
                    consecutive_failures = 0;

                    let broker = self.broker.clone();
                    let handler = self.handler.clone();
                    let backoff = self.config.retry_backoff;

                    // Each delivery runs on its own task so one slow send does
                    // not hold up the consumer loop.
                    tokio::spawn(async move {
                        process_delivery(broker.as_ref(), handler.as_ref(), backoff, delivery).await;
                        drop(permit);
                    });
                }
                Err(QueueError::Closed) => {
                    info!("Broker closed, stopping alert worker pool");
                    break;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(
                        "Broker error: {}. Incrementing failure count ({} / {})",
                        e, consecutive_failures, self.config.max_consecutive_failures
                    );
                    // Small delay to prevent tight loop in case of minor network glitches
                    tokio::time::sleep(RECEIVE_ERROR_PAUSE).await;
                }
            }
        }

        // Every permit back means every spawned task has finished.
        let _ = semaphore.acquire_many(concurrency as u32).await;
        info!("Alert worker pool stopped");
    }
}

/// Runs one delivery to a decision: ack on success, requeue on a retryable
/// failure while the retry budget lasts, dead-letter otherwise. A failed
/// requeue falls back to dead-lettering. The delivery is acknowledged unless
/// the task could not be handed back to the broker at all.
pub async fn process_delivery(
    broker: &dyn TaskBroker,
    handler: &dyn TaskHandler,
    backoff: Duration,
    delivery: Delivery,
) -> Outcome {
    let envelope = &delivery.envelope;

    let wait = envelope.available_at - Utc::now();
    if let Ok(wait) = wait.to_std() {
        if !wait.is_zero() {
            debug!(task_id = %envelope.id, "Delaying retry for {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    let started = Instant::now();
    let result = match tokio::time::timeout(envelope.timeout(), handler.handle(envelope)).await {
        Ok(result) => result,
        Err(_) => Err(DispatchError::Transient(format!(
            "task timed out after {:?}",
            envelope.timeout()
        ))),
    };

    let outcome = match result {
        Ok(()) => {
            info!(
                task_id = %envelope.id,
                attempt = envelope.attempt(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Task completed"
            );
            Outcome::Completed
        }
        Err(err) if err.is_retryable() && envelope.can_retry() => {
            let next = envelope.next_attempt(&err, retry_backoff(backoff, envelope.retried));
            warn!(
                task_id = %envelope.id,
                attempt = envelope.attempt(),
                max_retry = envelope.max_retry,
                "Task failed, scheduling retry: {}",
                err
            );
            match broker.publish(&next).await {
                Ok(()) => Outcome::Retried {
                    next_attempt: next.attempt(),
                },
                Err(e) => {
                    error!(
                        task_id = %envelope.id,
                        "Failed to requeue task, dead-lettering instead: {}",
                        e
                    );
                    dead_letter(broker, &envelope.failed(&err), err.to_string()).await
                }
            }
        }
        Err(err) => {
            let dead = envelope.failed(&err);
            error!(
                task_id = %envelope.id,
                attempt = envelope.attempt(),
                retryable = err.is_retryable(),
                "Task dead-lettered: {}",
                err
            );
            dead_letter(broker, &dead, err.to_string()).await
        }
    };

    if let Outcome::Unacknowledged { .. } = outcome {
        warn!(task_id = %envelope.id, "Leaving task unacknowledged for redelivery");
        return outcome;
    }

    if let Err(e) = broker.ack(&delivery).await {
        error!(task_id = %envelope.id, "Failed to acknowledge task: {}", e);
    }

    outcome
}

async fn dead_letter(broker: &dyn TaskBroker, dead: &TaskEnvelope, reason: String) -> Outcome {
    match broker.dead_letter(dead).await {
        Ok(()) => Outcome::DeadLettered { reason },
        Err(e) => {
            error!(task_id = %dead.id, "Failed to dead-letter task: {}", e);
            Outcome::Unacknowledged {
                reason: e.to_string(),
            }
        }
    }
}
